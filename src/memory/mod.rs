//! 记忆层：模型消息、单条命令内的执行历史

pub mod conversation;
pub mod history;

pub use conversation::{Message, Role};
pub use history::{ExecutionHistory, ExecutionHistoryEntry};
