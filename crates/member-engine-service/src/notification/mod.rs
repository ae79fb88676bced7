//! 通知投递
//!
//! 引擎只依赖 `NotificationDispatcher` 接口，实际投递（通行证字段推送、邮件、
//! 自定义字段写入）由外部协作服务完成。

mod dispatcher;
pub mod template;

pub use dispatcher::{HttpNotificationDispatcher, NotificationDispatcher};
#[cfg(test)]
pub use dispatcher::MockNotificationDispatcher;
