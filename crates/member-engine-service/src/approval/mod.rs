//! 审批判定
//!
//! `decision` 是纯函数，只依赖策略与用量快照；`engine` 负责在用量锁内
//! 采集快照、落库判定结果并应用通过后的效果。

pub mod decision;
mod engine;

pub use decision::{Decision, UsageSnapshot, decide};
pub use engine::ApprovalEngine;
