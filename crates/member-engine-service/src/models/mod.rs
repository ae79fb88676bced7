//! 会员引擎领域模型

pub mod automation;
pub mod enums;
pub mod execution;
pub mod ledger;
pub mod policy;
pub mod request;

pub use automation::{
    AddPointsConfig, Automation, AutomationAction, AutomationDraft, Condition,
    CustomFieldConfig, EmailConfig, Operator, PushNotificationConfig,
};
pub use enums::{ActionType, AutomationStatus, DecisionReason, FieldOperation, RequestStatus};
pub use execution::{ActionOutcome, DispatchAttempt, ExecutionRecord, OutcomeStatus};
pub use ledger::{CreditResult, LedgerCredit, MAX_POINTS_PER_ENTRY, PointsLedgerEntry};
pub use policy::ActionPolicy;
pub use request::{
    ActionPayload, CheckInPayload, EarnPointsPayload, MemberActionRequest, NewActionRequest,
    ReceiptCreditPayload, RedeemOfferPayload, SpendValuePayload, SubmitOutcome, TicketUsePayload,
};
