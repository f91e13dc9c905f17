//! MCP 工具服务（stdio 子进程）
//!
//! 每个 [[providers]] 项启动一个子进程并通过 rmcp 客户端握手，启动时拉取完整工具目录。
//! 调用结果统一成 ToolInvocationResult：取所有 text 类内容按换行拼接，isError 决定成败。

use std::collections::HashMap;

use async_trait::async_trait;
use rmcp::model::CallToolRequestParam;
use rmcp::service::{RoleClient, RunningService, ServiceExt};
use rmcp::transport::TokioChildProcess;
use serde_json::{Map, Value};
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::config::{expand_env, ProviderEntry};
use crate::tools::{ProviderError, ToolDescriptor, ToolInvocationResult, ToolProvider};

type ClientService = RunningService<RoleClient, ()>;

pub struct McpProvider {
    name: String,
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    service: Mutex<Option<ClientService>>,
}

impl McpProvider {
    pub fn new(entry: &ProviderEntry) -> Self {
        Self {
            name: entry.name.clone(),
            command: entry.command.clone(),
            args: entry.args.clone(),
            env: entry
                .env
                .iter()
                .map(|(k, v)| (k.clone(), expand_env(v)))
                .collect(),
            service: Mutex::new(None),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args);
        for (k, v) in &self.env {
            cmd.env(k, v);
        }
        cmd
    }
}

#[async_trait]
impl ToolProvider for McpProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self) -> Result<Vec<ToolDescriptor>, ProviderError> {
        let mut guard = self.service.lock().await;
        if let Some(old) = guard.take() {
            let _ = old.cancel().await;
        }

        tracing::debug!(provider = %self.name, command = %self.command, args = ?self.args, "spawning MCP server");
        let transport = TokioChildProcess::new(self.command())
            .map_err(|e| ProviderError::Startup(format!("failed to spawn '{}': {e}", self.command)))?;
        let service = ()
            .serve(transport)
            .await
            .map_err(|e| ProviderError::Startup(format!("MCP handshake failed: {e}")))?;

        let tools = match service.list_all_tools().await {
            Ok(tools) => tools,
            Err(e) => {
                let _ = service.cancel().await;
                return Err(ProviderError::Startup(format!("tools/list failed: {e}")));
            }
        };

        let descriptors = tools
            .iter()
            .map(|t| {
                ToolDescriptor::from_json_schema(
                    t.name.to_string(),
                    t.description.as_deref().unwrap_or_default(),
                    &t.input_schema,
                )
            })
            .collect();

        *guard = Some(service);
        Ok(descriptors)
    }

    async fn call_tool(
        &self,
        tool: &str,
        arguments: Map<String, Value>,
    ) -> Result<ToolInvocationResult, ProviderError> {
        // 只在取 peer 时持锁，允许并发调用
        let peer = {
            let guard = self.service.lock().await;
            match guard.as_ref() {
                Some(service) => service.peer().clone(),
                None => return Err(ProviderError::Closed),
            }
        };

        let result = peer
            .call_tool(CallToolRequestParam {
                name: tool.to_string().into(),
                arguments: Some(arguments),
            })
            .await;

        match result {
            Ok(result) => {
                let raw = serde_json::to_value(&result)
                    .map_err(|e| ProviderError::Transport(format!("unreadable tool result: {e}")))?;
                Ok(normalize_call_result(raw))
            }
            // 协议层错误（参数不合法、工具不存在等）由服务端给出，连接本身仍可用
            Err(rmcp::ServiceError::McpError(e)) => {
                Ok(ToolInvocationResult::failure(e.message.to_string()))
            }
            Err(e) => Err(ProviderError::Transport(e.to_string())),
        }
    }

    async fn shutdown(&self) -> Result<(), ProviderError> {
        let service = self.service.lock().await.take();
        if let Some(service) = service {
            service
                .cancel()
                .await
                .map_err(|e| ProviderError::Transport(format!("shutdown failed: {e}")))?;
        }
        Ok(())
    }
}

/// CallToolResult（JSON）-> ToolInvocationResult；没有 text 内容时 content 为空
pub fn normalize_call_result(raw: Value) -> ToolInvocationResult {
    let texts: Vec<&str> = raw
        .get("content")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter(|item| item.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|item| item.get("text").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();

    let content = texts.join("\n");
    let is_error = raw.get("isError").and_then(Value::as_bool).unwrap_or(false);

    let result = if is_error {
        ToolInvocationResult {
            success: false,
            content: content.clone(),
            error: Some(content),
            raw: None,
        }
    } else {
        ToolInvocationResult::ok(content)
    };
    result.with_raw(raw)
}
