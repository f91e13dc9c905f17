//! ReAct 过程事件：供前端或测试观察思考、工具调用与观察结果

use serde::Serialize;

/// 单步过程事件（可序列化为 JSON）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReactEvent {
    /// 第几步（从 1 开始）
    StepUpdate { step: usize, max_steps: usize },
    /// 正在调用模型
    Thinking,
    ThinkingContent { text: String },
    ToolCall {
        tool: String,
        args: serde_json::Value,
    },
    /// 工具返回（预览，避免过长）
    Observation { tool: String, preview: String },
    ToolFailure { tool: String, reason: String },
    /// 命令结束；outcome 为 completed / thinking_failed / budget_exhausted / interrupted
    Finished { outcome: String, steps: usize },
}
