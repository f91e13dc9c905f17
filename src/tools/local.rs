//! 进程内工具服务
//!
//! 实现 Tool trait 的工具直接注册到 LocalProvider，不经过子进程。
//! 离线运行与测试时用它替代 MCP 服务。

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::tools::{ProviderError, ToolDescriptor, ToolInvocationResult, ToolProvider};

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、异步执行（args 为 JSON 对象）
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认无参数
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String>;
}

type ToolFn = dyn Fn(Value) -> Result<String, String> + Send + Sync;

/// 闭包工具
pub struct FnTool {
    name: String,
    description: String,
    schema: Value,
    func: Box<ToolFn>,
}

impl FnTool {
    pub fn new<F>(name: impl Into<String>, description: impl Into<String>, func: F) -> Self
    where
        F: Fn(Value) -> Result<String, String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            schema: serde_json::json!({"type": "object", "properties": {}, "required": []}),
            func: Box::new(func),
        }
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = schema;
        self
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.schema.clone()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        (self.func)(args)
    }
}

/// 进程内 provider；记录调用次数
pub struct LocalProvider {
    name: String,
    tools: Vec<Arc<dyn Tool>>,
    calls: AtomicUsize,
    closed: AtomicBool,
}

impl LocalProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tools: Vec::new(),
            calls: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.push(Arc::new(tool));
    }

    pub fn with_tool(mut self, tool: impl Tool + 'static) -> Self {
        self.register(tool);
        self
    }

    /// 到达本 provider 的调用次数
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolProvider for LocalProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self) -> Result<Vec<ToolDescriptor>, ProviderError> {
        self.closed.store(false, Ordering::SeqCst);
        Ok(self
            .tools
            .iter()
            .map(|tool| {
                let schema = tool.parameters_schema();
                let empty = Map::new();
                ToolDescriptor::from_json_schema(
                    tool.name(),
                    tool.description(),
                    schema.as_object().unwrap_or(&empty),
                )
            })
            .collect())
    }

    async fn call_tool(
        &self,
        tool: &str,
        arguments: Map<String, Value>,
    ) -> Result<ToolInvocationResult, ProviderError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ProviderError::Closed);
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        let Some(found) = self.tools.iter().find(|t| t.name() == tool) else {
            return Ok(ToolInvocationResult::not_found(tool));
        };
        Ok(match found.execute(Value::Object(arguments)).await {
            Ok(content) => ToolInvocationResult::ok(content),
            Err(e) => ToolInvocationResult::failure(e),
        })
    }

    async fn shutdown(&self) -> Result<(), ProviderError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
