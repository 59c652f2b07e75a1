use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{LoanType, RequestStatus, RequestType};

pub const NOTIFICATION_CHANNEL: &str = "benefits.notifications";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    /// Tells the submitter their request was rejected or fully approved.
    DecisionReached {
        request_type: RequestType,
        request_id: Uuid,
        employee_id: String,
        status: RequestStatus,
        decided_by: String,
        comment: Option<String>,
    },
    /// Tells every approver at `approval_level` that the request is waiting on them.
    AwaitingApproval {
        request_type: RequestType,
        request_id: Uuid,
        approval_level: i32,
    },
    RequestWithdrawn {
        request_type: RequestType,
        request_id: Uuid,
        employee_id: String,
        approval_level: i32,
    },
    LoanCompleted {
        loan_type: LoanType,
        loan_id: Uuid,
        employee_id: String,
    },
}

/// Delivery of notifications after a transition has committed. Resolving recipients at an
/// approval level is the dispatcher's concern.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn dispatch(&self, notification: &Notification) -> anyhow::Result<()>;
}
