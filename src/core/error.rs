//! 助手错误类型
//!
//! 单条命令内部的失败（工具失败、解析失败、步数耗尽）不走这里，而是体现在 CommandOutcome 中；
//! AgentError 只用于启动失败与视觉 / 截图 / 播报等外围组件的错误。

use thiserror::Error;

use crate::llm::LlmError;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Required tool provider '{provider}' unavailable: {reason}")]
    RequiredProviderUnavailable { provider: String, reason: String },

    #[error("LLM error: {0}")]
    LlmError(#[from] LlmError),

    #[error("Vision error: {0}")]
    VisionError(String),

    #[error("Screen capture failed: {0}")]
    CaptureError(String),

    #[error("Speech error: {0}")]
    SpeechError(String),

    #[error("Config error: {0}")]
    ConfigError(String),
}

impl From<config::ConfigError> for AgentError {
    fn from(e: config::ConfigError) -> Self {
        AgentError::ConfigError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = AgentError::RequiredProviderUnavailable {
            provider: "windows".into(),
            reason: "startup timed out after 30s".into(),
        };
        assert_eq!(
            err.to_string(),
            "Required tool provider 'windows' unavailable: startup timed out after 30s"
        );
        let err: AgentError = LlmError::Timeout(30).into();
        assert!(err.to_string().starts_with("LLM error"));
    }
}
