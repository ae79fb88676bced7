//! 动作执行器

mod action_executor;

pub use action_executor::{ActionExecutor, ExecutionContext, ExecutorConfig};
