//! 工具执行器
//!
//! 持有 ToolRegistry 与单次调用超时。execute(tool_name, args) 先做参数规整与校验，
//! 再在独立任务中调用 registry，超时、panic、provider 失败都折叠为 success=false 的结果；
//! 每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use tokio::time::timeout;

use crate::tools::{ToolInvocationResult, ToolRegistry};

pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// 执行指定工具；永不返回 Err，失败原因放在结果的 error 中
    pub async fn execute(&self, tool_name: &str, args: Value) -> ToolInvocationResult {
        let start = Instant::now();
        let args_preview = args_preview(&args);

        let (result, outcome) = self.run(tool_name, args).await;

        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": result.success,
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        result
    }

    async fn run(&self, tool_name: &str, args: Value) -> (ToolInvocationResult, &'static str) {
        if tool_name.trim().is_empty() {
            return (ToolInvocationResult::failure("no tool specified"), "rejected");
        }

        let arguments = match args {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                tracing::warn!(tool = %tool_name, args = %other, "non-object tool arguments, calling with {{}}");
                Map::new()
            }
        };

        let Some(descriptor) = self.registry.get(tool_name) else {
            return (ToolInvocationResult::not_found(tool_name), "not_found");
        };
        if let Err(problems) = descriptor.validate(&arguments) {
            return (
                ToolInvocationResult::failure(format!(
                    "invalid arguments for {tool_name}: {}",
                    problems.join("; ")
                )),
                "invalid_args",
            );
        }

        // 独立任务：工具内部 panic 变成 JoinError 而不是拖垮当前命令
        let registry = Arc::clone(&self.registry);
        let name = tool_name.to_string();
        let handle = tokio::spawn(async move { registry.call_tool(&name, arguments).await });
        let abort = handle.abort_handle();

        match timeout(self.timeout, handle).await {
            Ok(Ok(result)) => {
                let outcome = if result.success { "ok" } else { "error" };
                (result, outcome)
            }
            Ok(Err(join_err)) => (
                ToolInvocationResult::failure(format!("tool {tool_name} crashed: {join_err}")),
                "panic",
            ),
            Err(_) => {
                abort.abort();
                (
                    ToolInvocationResult::failure(format!(
                        "tool {tool_name} timed out after {}s",
                        self.timeout.as_secs()
                    )),
                    "timeout",
                )
            }
        }
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
