//! 认知层：响应解析、Planner、ReAct 主循环

pub mod events;
pub mod loop_;
pub mod parser;
pub mod planner;

pub use events::ReactEvent;
pub use loop_::{react_loop, CommandExecution, CommandOutcome, LoopState, ReactResult, ReactSession};
pub use parser::{parse_response, PlanStep};
pub use planner::Planner;
