//! 会员行为请求与自动化执行引擎
//!
//! ## 核心功能
//!
//! - **请求受理**：会员提交签到、积分、兑换等行为请求，按幂等键去重
//! - **审批判定**：依据商户策略自动通过、转人工或拒绝，用量上限按会员串行判定
//! - **积分账本**：原子入账，来源引用保证同一来源只入账一次
//! - **自动化**：通行证生命周期事件触发条件判断与有序动作执行
//!
//! ## 模块结构
//!
//! - `models`: 领域模型
//! - `error`: 错误类型
//! - `repository`: 仓储层（PostgreSQL / 内存）
//! - `lock`: 按键互斥锁
//! - `policy`: 策略缓存
//! - `approval`: 审批判定与执行
//! - `automation`: 条件求值与执行编排
//! - `executor`: 单个动作的执行与投递重试
//! - `notification`: 外部投递接口与文案渲染
//! - `service`: 业务服务层
//! - `api`: HTTP 接口
//! - `consumer`: Kafka 事件消费

pub mod api;
pub mod approval;
pub mod automation;
pub mod consumer;
pub mod error;
pub mod executor;
pub mod lock;
pub mod models;
pub mod notification;
pub mod policy;
pub mod repository;
pub mod service;

pub use error::{EngineError, Result};
