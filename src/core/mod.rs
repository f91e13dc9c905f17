//! 核心编排层：错误类型、任务路由、执行监管

pub mod error;
pub mod router;
pub mod supervisor;

pub use error::AgentError;
pub use router::{TaskMode, TaskRouter};
pub use supervisor::{CommandReport, CommandTicket, ExecutionSupervisor, SupervisorSettings};
