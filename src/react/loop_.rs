//! ReAct 主循环
//!
//! THINKING -> {ACTING -> OBSERVING -> THINKING} | DONE | ABORTED
//!
//! - 每轮开始先检查取消令牌，再检查步数预算，二者都不满足才调用模型；
//! - 模型调用失败或回复无法识别：直接 ABORTED（思考失败），不在循环内重试；
//! - 工具失败不会终止循环，失败原因作为 Observation 进入下一轮提示词，由模型自行调整。
//!
//! 可选 event_tx：向前端推送 StepUpdate / Thinking / ToolCall / Observation / Finished。

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::llm::UsageSnapshot;
use crate::memory::{ExecutionHistory, ExecutionHistoryEntry};
use crate::react::planner::build_system_prompt;
use crate::react::{Planner, ReactEvent};
use crate::tools::ToolExecutor;

/// Observation 预览最大字符数
const OBSERVATION_PREVIEW_CHARS: usize = 200;
/// 思考内容展示最大字符数
const THINKING_PREVIEW_CHARS: usize = 800;

/// 循环状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Thinking,
    Acting,
    Observing,
    Done,
    Aborted,
}

/// 一条命令的结局
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandOutcome {
    /// 模型给出 Final Answer；steps 为思考轮数
    Completed { message: String, steps: usize },
    /// 模型调用失败或回复无法识别
    ThinkingFailed { reason: String, steps: usize },
    BudgetExhausted { steps: usize },
    Interrupted { steps: usize },
}

impl CommandOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CommandOutcome::Completed { .. })
    }

    pub fn steps(&self) -> usize {
        match self {
            CommandOutcome::Completed { steps, .. }
            | CommandOutcome::ThinkingFailed { steps, .. }
            | CommandOutcome::BudgetExhausted { steps }
            | CommandOutcome::Interrupted { steps } => *steps,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CommandOutcome::Completed { .. } => "completed",
            CommandOutcome::ThinkingFailed { .. } => "thinking_failed",
            CommandOutcome::BudgetExhausted { .. } => "budget_exhausted",
            CommandOutcome::Interrupted { .. } => "interrupted",
        }
    }
}

/// 单条命令的执行状态；每条命令新建，不跨命令复用
#[derive(Debug)]
pub struct CommandExecution {
    pub goal: String,
    pub history: ExecutionHistory,
    /// 已完成的 THINKING -> ACTING -> OBSERVING 轮数
    pub step_count: usize,
    pub state: LoopState,
}

impl CommandExecution {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            history: ExecutionHistory::new(),
            step_count: 0,
            state: LoopState::Thinking,
        }
    }
}

/// 循环结果：结局、完整执行历史、终止状态（Done / Aborted）与本条命令的 token 用量
#[derive(Debug)]
pub struct ReactResult {
    pub outcome: CommandOutcome,
    pub history: ExecutionHistory,
    pub final_state: LoopState,
    pub token_usage: UsageSnapshot,
}

/// 一次循环所需的组件
pub struct ReactSession<'a> {
    pub planner: &'a Planner,
    pub executor: &'a ToolExecutor,
    pub cancel_token: CancellationToken,
    pub max_steps: usize,
    /// 可选：事件推送通道
    pub event_tx: Option<&'a UnboundedSender<ReactEvent>>,
}

impl<'a> ReactSession<'a> {
    pub fn new(
        planner: &'a Planner,
        executor: &'a ToolExecutor,
        cancel_token: CancellationToken,
        max_steps: usize,
    ) -> Self {
        Self {
            planner,
            executor,
            cancel_token,
            max_steps,
            event_tx: None,
        }
    }

    pub fn with_event_tx(mut self, tx: &'a UnboundedSender<ReactEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    fn send(&self, ev: ReactEvent) {
        if let Some(tx) = self.event_tx {
            let _ = tx.send(ev);
        }
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        format!("{}...", text.chars().take(max_chars).collect::<String>())
    } else {
        text.to_string()
    }
}

/// 执行一条命令直到 DONE 或 ABORTED
pub async fn react_loop(session: &ReactSession<'_>, goal: &str) -> ReactResult {
    let mut exec = CommandExecution::new(goal);
    // 工具目录启动后只读，整条命令共用一份 system 段
    let system_prompt = build_system_prompt(
        session.executor.registry().list_all_tools(),
        session.max_steps,
    );

    let usage_before = session.planner.token_usage();
    tracing::info!(goal = %goal, max_steps = session.max_steps, "command started");

    let outcome = loop {
        debug_assert_eq!(exec.state, LoopState::Thinking);

        if session.cancel_token.is_cancelled() {
            tracing::info!(steps = exec.step_count, "command interrupted");
            break CommandOutcome::Interrupted {
                steps: exec.step_count,
            };
        }
        if exec.step_count >= session.max_steps {
            tracing::warn!(max_steps = session.max_steps, "step budget exhausted, task not completed");
            break CommandOutcome::BudgetExhausted {
                steps: exec.step_count,
            };
        }

        let round = exec.step_count + 1;
        session.send(ReactEvent::StepUpdate {
            step: round,
            max_steps: session.max_steps,
        });
        session.send(ReactEvent::Thinking);
        tracing::info!(step = round, "thinking");

        let step = match session.planner.think(&system_prompt, &exec.goal, &exec.history).await {
            Ok(step) => step,
            Err(e) => {
                tracing::error!(step = round, error = %e, "thinking failed");
                break CommandOutcome::ThinkingFailed {
                    reason: e.to_string(),
                    steps: round,
                };
            }
        };

        if !step.thought.is_empty() {
            tracing::info!(thought = %step.thought, "thought");
            session.send(ReactEvent::ThinkingContent {
                text: preview(&step.thought, THINKING_PREVIEW_CHARS),
            });
        }

        if step.done {
            let message = step.final_message.unwrap_or_default();
            tracing::info!(steps = round, message = %message, "task completed");
            break CommandOutcome::Completed {
                message,
                steps: round,
            };
        }

        let Some(tool) = step.chosen_tool else {
            break CommandOutcome::ThinkingFailed {
                reason: "unparseable model response".to_string(),
                steps: round,
            };
        };

        exec.state = LoopState::Acting;
        let args = serde_json::Value::Object(step.arguments.clone());
        tracing::info!(tool = %tool, args = %args, "action");
        session.send(ReactEvent::ToolCall {
            tool: tool.clone(),
            args: args.clone(),
        });
        let result = session.executor.execute(&tool, args).await;

        exec.state = LoopState::Observing;
        let observation = result.observation();
        if result.success {
            session.send(ReactEvent::Observation {
                tool: tool.clone(),
                preview: preview(&observation, OBSERVATION_PREVIEW_CHARS),
            });
        } else {
            tracing::warn!(tool = %tool, error = %observation, "step failed, letting the model adapt");
            session.send(ReactEvent::ToolFailure {
                tool: tool.clone(),
                reason: observation.clone(),
            });
        }

        exec.history.push(ExecutionHistoryEntry {
            thought: step.thought,
            chosen_tool: tool,
            arguments: step.arguments,
            observation,
            succeeded: result.success,
        });
        exec.step_count += 1;
        exec.state = LoopState::Thinking;
    };

    exec.state = if outcome.is_success() {
        LoopState::Done
    } else {
        LoopState::Aborted
    };
    let token_usage = session.planner.token_usage().since(&usage_before);
    tracing::info!(
        outcome = outcome.label(),
        steps = outcome.steps(),
        prompt_tokens = token_usage.prompt_tokens,
        completion_tokens = token_usage.completion_tokens,
        total_tokens = token_usage.total_tokens,
        "command finished"
    );
    session.send(ReactEvent::Finished {
        outcome: outcome.label().to_string(),
        steps: outcome.steps(),
    });

    ReactResult {
        outcome,
        history: exec.history,
        final_state: exec.state,
        token_usage,
    }
}
