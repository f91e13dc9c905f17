//! 工具服务抽象
//!
//! 每个 provider 代表一个能力域（桌面控制、浏览器控制……），启动时给出自己的工具目录，
//! 之后按名调用。工具本身的失败是 ToolInvocationResult（success=false），
//! 只有传输层问题（进程退出、连接断开）才是 ProviderError。

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::tools::ToolDescriptor;

/// 传输 / 生命周期错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("provider failed to start: {0}")]
    Startup(String),

    #[error("provider transport error: {0}")]
    Transport(String),

    #[error("provider connection closed")]
    Closed,
}

/// 单次工具调用的标准化结果
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolInvocationResult {
    pub success: bool,
    pub content: String,
    pub error: Option<String>,
    /// provider 原始返回（MCP 为 CallToolResult 的 JSON）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
}

impl ToolInvocationResult {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            success: true,
            content: content.into(),
            error: None,
            raw: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            content: String::new(),
            error: Some(error.into()),
            raw: None,
        }
    }

    pub fn not_found(tool: &str) -> Self {
        Self::failure(format!("tool not found: {tool}"))
    }

    pub fn with_raw(mut self, raw: Value) -> Self {
        self.raw = Some(raw);
        self
    }

    /// 喂回模型的 Observation 文本：失败时带上错误原因
    pub fn observation(&self) -> String {
        if self.success {
            if self.content.is_empty() {
                "(success, no output)".to_string()
            } else {
                self.content.clone()
            }
        } else {
            format!("Error: {}", self.error.as_deref().unwrap_or("unknown error"))
        }
    }
}

/// 工具服务：启动并列出工具、按名调用、关闭
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// provider 名称（配置中的 name）
    fn name(&self) -> &str;

    /// 建立连接并返回工具目录（顺序即注册顺序）
    async fn start(&self) -> Result<Vec<ToolDescriptor>, ProviderError>;

    /// 调用本 provider 的工具
    async fn call_tool(
        &self,
        tool: &str,
        arguments: Map<String, Value>,
    ) -> Result<ToolInvocationResult, ProviderError>;

    /// 断开连接、结束子进程
    async fn shutdown(&self) -> Result<(), ProviderError>;
}
