//! 工具注册表 / 连接器
//!
//! 把多个 provider 的工具目录合并成一个扁平目录，并按工具名把调用路由到所属 provider。
//!
//! - 启动：逐个启动 provider，各自独立超时；必需 provider 失败则整体失败，可选 provider 失败只告警。
//! - 重名：先注册者胜出，后来者跳过并告警（注册顺序 = 配置顺序，再按 provider 自身的工具顺序）。
//! - 运行中：provider 出现传输错误后被标记为不可用，其工具之后的每次调用都直接返回失败。
//! - 关闭：stop 之后的调用立即返回「连接已关闭」，不会挂起。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::time::timeout;

use crate::core::AgentError;
use crate::tools::{ProviderError, ToolDescriptor, ToolInvocationResult, ToolProvider};

/// 启动参数：一个 provider 及其启动策略
pub struct ProviderSpec {
    pub provider: Arc<dyn ToolProvider>,
    pub required: bool,
    pub startup_timeout: Duration,
}

impl ProviderSpec {
    pub fn new(provider: Arc<dyn ToolProvider>, required: bool, startup_timeout: Duration) -> Self {
        Self {
            provider,
            required,
            startup_timeout,
        }
    }
}

struct ProviderSlot {
    provider: Arc<dyn ToolProvider>,
    alive: AtomicBool,
}

/// 合并后的工具目录；目录在启动后只读
pub struct ToolRegistry {
    slots: Vec<ProviderSlot>,
    tools: Vec<ToolDescriptor>,
    /// 工具名 -> slots 下标
    owners: HashMap<String, usize>,
    unavailable: Vec<String>,
    closed: AtomicBool,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tool_count", &self.tools.len())
            .field("provider_count", &self.slots.len())
            .field("unavailable", &self.unavailable)
            .finish()
    }
}

impl ToolRegistry {
    /// 启动所有 provider 并合并目录
    pub async fn start(specs: Vec<ProviderSpec>) -> Result<Self, AgentError> {
        let mut registry = Self {
            slots: Vec::new(),
            tools: Vec::new(),
            owners: HashMap::new(),
            unavailable: Vec::new(),
            closed: AtomicBool::new(false),
        };

        for spec in specs {
            let name = spec.provider.name().to_string();
            tracing::info!(provider = %name, required = spec.required, "starting tool provider");

            let outcome = match timeout(spec.startup_timeout, spec.provider.start()).await {
                Ok(Ok(tools)) => Ok(tools),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!(
                    "startup timed out after {}s",
                    spec.startup_timeout.as_secs()
                )),
            };

            match outcome {
                Ok(tools) => registry.add_provider(spec.provider, tools),
                Err(reason) => {
                    // 超时的子进程可能已拉起，尽力清理
                    if let Err(e) = spec.provider.shutdown().await {
                        tracing::debug!(provider = %name, error = %e, "cleanup after failed start");
                    }
                    if spec.required {
                        tracing::error!(provider = %name, %reason, "required tool provider failed to start");
                        registry.stop().await;
                        return Err(AgentError::RequiredProviderUnavailable {
                            provider: name,
                            reason,
                        });
                    }
                    tracing::warn!(provider = %name, %reason, "optional tool provider unavailable, continuing without its tools");
                    registry.unavailable.push(name);
                }
            }
        }

        Ok(registry)
    }

    fn add_provider(&mut self, provider: Arc<dyn ToolProvider>, tools: Vec<ToolDescriptor>) {
        let index = self.slots.len();
        let provider_name = provider.name().to_string();
        let mut added = 0usize;

        for tool in tools {
            if let Some(&owner) = self.owners.get(&tool.name) {
                tracing::warn!(
                    tool = %tool.name,
                    kept = %self.slots[owner].provider.name(),
                    skipped = %provider_name,
                    "duplicate tool name, keeping first registered"
                );
                continue;
            }
            self.owners.insert(tool.name.clone(), index);
            self.tools.push(tool);
            added += 1;
        }

        tracing::info!(provider = %provider_name, tools = added, "tool provider ready");
        self.slots.push(ProviderSlot {
            provider,
            alive: AtomicBool::new(true),
        });
    }

    /// 合并后的目录，顺序稳定
    pub fn list_all_tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.owners.get(name).and_then(|_| self.tools.iter().find(|t| t.name == name))
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name.clone()).collect()
    }

    /// 启动失败而被跳过的可选 provider
    pub fn unavailable_providers(&self) -> &[String] {
        &self.unavailable
    }

    /// 按名调用；任何失败都以 success=false 的结果返回
    pub async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> ToolInvocationResult {
        if self.closed.load(Ordering::SeqCst) {
            return ToolInvocationResult::failure(ProviderError::Closed.to_string());
        }

        let Some(&index) = self.owners.get(name) else {
            return ToolInvocationResult::not_found(name);
        };
        let slot = &self.slots[index];
        let provider_name = slot.provider.name();

        if !slot.alive.load(Ordering::SeqCst) {
            return ToolInvocationResult::failure(format!(
                "tool provider '{provider_name}' is no longer available"
            ));
        }

        match slot.provider.call_tool(name, arguments).await {
            Ok(result) => result,
            Err(ProviderError::Closed) => {
                ToolInvocationResult::failure(ProviderError::Closed.to_string())
            }
            Err(e) => {
                slot.alive.store(false, Ordering::SeqCst);
                tracing::error!(provider = %provider_name, tool = %name, error = %e, "tool provider failed, its tools are now disabled");
                ToolInvocationResult::failure(e.to_string())
            }
        }
    }

    /// 关闭所有 provider；单个 provider 关闭失败只记录日志，继续关闭下一个
    pub async fn stop(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for slot in &self.slots {
            let name = slot.provider.name();
            match slot.provider.shutdown().await {
                Ok(()) => tracing::info!(provider = %name, "tool provider stopped"),
                Err(e) => tracing::warn!(provider = %name, error = %e, "tool provider shutdown failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{FnTool, LocalProvider};
    use async_trait::async_trait;
    use serde_json::json;

    fn local(name: &str, tools: &[&str]) -> Arc<LocalProvider> {
        let mut provider = LocalProvider::new(name);
        for tool in tools {
            let owner = name.to_string();
            provider.register(FnTool::new(*tool, format!("{tool} from {name}"), move |_args| {
                Ok(owner.clone())
            }));
        }
        Arc::new(provider)
    }

    fn spec(provider: Arc<dyn ToolProvider>, required: bool) -> ProviderSpec {
        ProviderSpec::new(provider, required, Duration::from_secs(5))
    }

    /// 启动即失败或永不返回的 provider
    struct BrokenProvider {
        hang: bool,
    }

    #[async_trait]
    impl ToolProvider for BrokenProvider {
        fn name(&self) -> &str {
            "broken"
        }

        async fn start(&self) -> Result<Vec<ToolDescriptor>, ProviderError> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            Err(ProviderError::Startup("uvx: command not found".to_string()))
        }

        async fn call_tool(
            &self,
            _tool: &str,
            _arguments: Map<String, Value>,
        ) -> Result<ToolInvocationResult, ProviderError> {
            Err(ProviderError::Closed)
        }

        async fn shutdown(&self) -> Result<(), ProviderError> {
            Err(ProviderError::Closed)
        }
    }

    /// 第一次调用后进程「崩溃」
    struct CrashingProvider;

    #[async_trait]
    impl ToolProvider for CrashingProvider {
        fn name(&self) -> &str {
            "crashy"
        }

        async fn start(&self) -> Result<Vec<ToolDescriptor>, ProviderError> {
            Ok(vec![ToolDescriptor::new("Crash-Tool", "crashes")])
        }

        async fn call_tool(
            &self,
            _tool: &str,
            _arguments: Map<String, Value>,
        ) -> Result<ToolInvocationResult, ProviderError> {
            Err(ProviderError::Transport("broken pipe".to_string()))
        }

        async fn shutdown(&self) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_merged_catalog_order_is_stable() {
        let registry = ToolRegistry::start(vec![
            spec(local("desktop", &["App-Tool", "Click-Tool"]), true),
            spec(local("browser", &["Navigate-Tool"]), false),
        ])
        .await
        .unwrap();
        assert_eq!(registry.tool_names(), vec!["App-Tool", "Click-Tool", "Navigate-Tool"]);
        assert_eq!(registry.tool_names(), registry.tool_names());
    }

    #[tokio::test]
    async fn test_duplicate_name_first_registered_wins() {
        let registry = ToolRegistry::start(vec![
            spec(local("desktop", &["Scroll-Tool"]), true),
            spec(local("browser", &["Scroll-Tool", "Tab-Tool"]), false),
        ])
        .await
        .unwrap();
        assert_eq!(registry.list_all_tools().len(), 2);
        let result = registry.call_tool("Scroll-Tool", Map::new()).await;
        assert!(result.success);
        assert_eq!(result.content, "desktop");
    }

    #[tokio::test]
    async fn test_unknown_tool_does_not_reach_provider() {
        let desktop = local("desktop", &["App-Tool"]);
        let registry = ToolRegistry::start(vec![spec(desktop.clone(), true)]).await.unwrap();
        let result = registry.call_tool("Teleport-Tool", Map::new()).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("not found"));
        assert_eq!(desktop.call_count(), 0);
    }

    #[tokio::test]
    async fn test_optional_provider_failure_is_tolerated() {
        let registry = ToolRegistry::start(vec![
            spec(local("desktop", &["App-Tool"]), true),
            spec(Arc::new(BrokenProvider { hang: false }), false),
        ])
        .await
        .unwrap();
        assert_eq!(registry.unavailable_providers(), ["broken".to_string()]);
        assert_eq!(registry.tool_names(), vec!["App-Tool"]);
    }

    #[tokio::test]
    async fn test_required_provider_failure_is_fatal() {
        let err = ToolRegistry::start(vec![spec(Arc::new(BrokenProvider { hang: false }), true)])
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::RequiredProviderUnavailable { ref provider, .. } if provider == "broken"));
    }

    #[tokio::test]
    async fn test_startup_timeout_is_per_provider() {
        let registry = ToolRegistry::start(vec![
            ProviderSpec::new(Arc::new(BrokenProvider { hang: true }), false, Duration::from_millis(50)),
            spec(local("desktop", &["App-Tool"]), true),
        ])
        .await
        .unwrap();
        assert_eq!(registry.unavailable_providers().len(), 1);
        assert_eq!(registry.tool_names(), vec!["App-Tool"]);
    }

    #[tokio::test]
    async fn test_crashed_provider_degrades_to_failing() {
        let desktop = local("desktop", &["App-Tool"]);
        let registry = ToolRegistry::start(vec![
            spec(desktop.clone(), true),
            spec(Arc::new(CrashingProvider), false),
        ])
        .await
        .unwrap();

        let first = registry.call_tool("Crash-Tool", Map::new()).await;
        assert!(!first.success);
        let second = registry.call_tool("Crash-Tool", Map::new()).await;
        assert!(second.error.unwrap().contains("no longer available"));

        // 其它 provider 不受影响
        assert!(registry.call_tool("App-Tool", Map::new()).await.success);
    }

    #[tokio::test]
    async fn test_call_after_stop_fails_cleanly() {
        let desktop = local("desktop", &["App-Tool"]);
        let registry = ToolRegistry::start(vec![spec(desktop.clone(), true)]).await.unwrap();
        registry.stop().await;
        registry.stop().await;
        let result = registry
            .call_tool("App-Tool", json!({"action": "launch"}).as_object().cloned().unwrap())
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("closed"));
        assert_eq!(desktop.call_count(), 0);
    }
}
