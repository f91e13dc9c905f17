pub mod executor;
pub mod local;
pub mod mcp;
pub mod provider;
pub mod registry;
pub mod schema;

pub use executor::ToolExecutor;
pub use local::{FnTool, LocalProvider, Tool};
pub use mcp::{normalize_call_result, McpProvider};
pub use provider::{ProviderError, ToolInvocationResult, ToolProvider};
pub use registry::{ProviderSpec, ToolRegistry};
pub use schema::{ParamSpec, ToolDescriptor};
