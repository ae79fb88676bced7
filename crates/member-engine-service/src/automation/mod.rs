//! 自动化执行
//!
//! - `evaluator`: 条件求值，操作符集合与规则引擎一致
//! - `engine`: 事件到执行记录的编排

mod engine;
mod evaluator;

pub use engine::AutomationEngine;
pub use evaluator::{ConditionError, ConditionEvaluator};
