//! HTTP 请求处理器

pub mod automation;
pub mod event;
pub mod ledger;
pub mod policy;
pub mod request;
