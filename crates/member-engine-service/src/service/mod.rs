//! 业务服务层

mod automation_service;
mod ledger_service;
mod request_service;

pub use automation_service::AutomationService;
pub use ledger_service::LedgerService;
pub use request_service::RequestService;
