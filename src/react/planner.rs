//! Planner：拼装提示词、调用推理模型、解析回复
//!
//! system 段包含完整工具目录（每个参数的类型 / 是否必需 / 描述）与输出格式约定；
//! user 段为任务目标加最近 N 步执行历史。

use std::sync::Arc;

use crate::llm::{LlmClient, LlmError, UsageSnapshot};
use crate::memory::{ExecutionHistory, Message};
use crate::react::parser::{parse_response, PlanStep};
use crate::tools::ToolDescriptor;

pub struct Planner {
    llm: Arc<dyn LlmClient>,
    history_window: usize,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>, history_window: usize) -> Self {
        Self {
            llm,
            history_window,
        }
    }

    /// 获取 LLM 累计 token 使用统计
    pub fn token_usage(&self) -> UsageSnapshot {
        self.llm.token_usage()
    }

    /// 一次思考：模型调用失败返回 Err，回复无法识别时返回空 PlanStep
    pub async fn think(
        &self,
        system_prompt: &str,
        goal: &str,
        history: &ExecutionHistory,
    ) -> Result<PlanStep, LlmError> {
        let messages = [
            Message::system(system_prompt),
            Message::user(build_user_prompt(goal, history, self.history_window)),
        ];
        let response = self.llm.complete(&messages).await?;
        tracing::debug!(response = %response, "model response");
        Ok(parse_response(&response))
    }
}

/// system 段：工具目录 + 格式约定 + 规则
pub fn build_system_prompt(tools: &[ToolDescriptor], max_steps: usize) -> String {
    let catalog = if tools.is_empty() {
        "(no tools available)".to_string()
    } else {
        tools
            .iter()
            .map(ToolDescriptor::render_for_prompt)
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        r#"You are a desktop assistant that completes the user's task by operating the computer through tools.

Work in the ReAct (Reasoning and Acting) style:
1. Thought: analyse the current situation and decide the next step
2. Action: pick exactly one tool
3. Action Input: the tool arguments as a JSON object
4. Observation: the result of the tool (provided by the system, do not write it yourself)
Repeat until the task is done.

Available tools:
{catalog}

Output format:
Thought: <your reasoning>
Action: <tool name>
Action Input: {{"param": "value"}}

When the task is done, output:
Thought: the task is complete
Final Answer: <short summary for the user, in the user's language>

Rules:
1. Perform only one action per reply.
2. Prefer keyboard shortcuts and simple operations over long procedures.
3. If the task is unclear or impossible, reply with a Final Answer explaining why.
4. You must finish within {max_steps} steps.
5. If the same kind of action fails twice in a row, stop and give a Final Answer."#
    )
}

/// user 段：任务 + 最近执行历史
pub fn build_user_prompt(goal: &str, history: &ExecutionHistory, window: usize) -> String {
    format!(
        "Task: {goal}\n{}\nDecide the next action.",
        history.to_prompt_section(window)
    )
}
