pub mod engine;
pub mod error;
pub mod ledger;
pub mod models;
pub mod notify;
pub mod repayment;
pub mod storage;
pub mod workflow;

pub use engine::{
    ApprovalEngine, ApprovalTrail, CancellationCommand, CancellationReceipt, DecisionCommand,
    DecisionReceipt,
};
pub use error::{BenefitsError, BenefitsResult};
pub use models::{
    ApprovalAction, ApprovalRecord, Approver, CancellationRecord, CredentialToken,
    DecisionStatus, DeductionEntry, DeductionStatus, EmployeeBalance, LoanSnapshot, LoanType,
    PaymentHistoryRecord, PaymentStatus, RequestPayload, RequestSnapshot, RequestStatus,
    RequestType,
};
pub use notify::{NOTIFICATION_CHANNEL, Notification, NotificationDispatcher};
pub use repayment::{
    CompletedLoan, DEFAULT_PAYMENT_METHOD, LoanStatement, PaymentCommand, PaymentReceipt,
    RefreshSummary, RepaymentLedger,
};
pub use storage::{LedgerStore, LedgerTx, WorkflowStore, WorkflowTx};
pub use workflow::{EffectPlan, FinalApprovalEffect, WorkflowPolicy, policy_for};
