use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::BenefitsResult;
use crate::models::{
    ApprovalRecord, Approver, CancellationRecord, DeductionEntry, LoanSnapshot, LoanType,
    PaymentHistoryRecord, RequestSnapshot, RequestStatus, RequestType,
};
use crate::workflow::EffectPlan;

/// Source of workflow transactions. Dropping a transaction without committing rolls it back.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    type Tx: WorkflowTx;

    async fn begin(&self) -> BenefitsResult<Self::Tx>;
}

#[async_trait]
pub trait WorkflowTx: Send {
    async fn approver(&mut self, employee_id: &str) -> BenefitsResult<Option<Approver>>;

    /// Loads the request and holds its row lock until commit or rollback.
    async fn lock_request(
        &mut self,
        request_type: RequestType,
        request_id: Uuid,
    ) -> BenefitsResult<Option<RequestSnapshot>>;

    /// Loads the request without taking its row lock.
    async fn read_request(
        &mut self,
        request_type: RequestType,
        request_id: Uuid,
    ) -> BenefitsResult<Option<RequestSnapshot>>;

    async fn approval_exists(
        &mut self,
        request_type: RequestType,
        request_id: Uuid,
        approval_level: i32,
    ) -> BenefitsResult<bool>;

    /// Must fail with `Conflict` when a record already exists for the same level.
    async fn insert_approval(&mut self, record: &ApprovalRecord) -> BenefitsResult<()>;

    async fn insert_cancellation(&mut self, record: &CancellationRecord) -> BenefitsResult<()>;

    async fn update_request_state(
        &mut self,
        request_type: RequestType,
        request_id: Uuid,
        status: RequestStatus,
        approval_level: i32,
        updated_at: DateTime<Utc>,
    ) -> BenefitsResult<()>;

    async fn apply_effect(
        &mut self,
        request_type: RequestType,
        request_id: Uuid,
        plan: &EffectPlan,
    ) -> BenefitsResult<()>;

    async fn approvals(
        &mut self,
        request_type: RequestType,
        request_id: Uuid,
    ) -> BenefitsResult<Vec<ApprovalRecord>>;

    async fn cancellations(
        &mut self,
        request_type: RequestType,
        request_id: Uuid,
    ) -> BenefitsResult<Vec<CancellationRecord>>;

    async fn commit(self) -> BenefitsResult<()>;
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    type Tx: LedgerTx;

    async fn begin(&self) -> BenefitsResult<Self::Tx>;

    /// Loans that own at least one deduction entry.
    async fn scheduled_loans(&self, loan_type: LoanType) -> BenefitsResult<Vec<Uuid>>;

    async fn loans_with_status(
        &self,
        loan_type: LoanType,
        status: RequestStatus,
    ) -> BenefitsResult<Vec<Uuid>>;
}

#[async_trait]
pub trait LedgerTx: Send {
    /// Loads the loan and holds the loan-scoped lock until commit or rollback.
    async fn lock_loan(
        &mut self,
        loan_type: LoanType,
        loan_id: Uuid,
    ) -> BenefitsResult<Option<LoanSnapshot>>;

    /// Loads the loan without taking the loan-scoped lock.
    async fn read_loan(
        &mut self,
        loan_type: LoanType,
        loan_id: Uuid,
    ) -> BenefitsResult<Option<LoanSnapshot>>;

    /// The loan's installments ordered by deduction date.
    async fn schedule(
        &mut self,
        loan_type: LoanType,
        loan_id: Uuid,
    ) -> BenefitsResult<Vec<DeductionEntry>>;

    async fn update_entries(
        &mut self,
        loan_type: LoanType,
        entries: &[DeductionEntry],
    ) -> BenefitsResult<()>;

    async fn set_loan_status(
        &mut self,
        loan_type: LoanType,
        loan_id: Uuid,
        status: RequestStatus,
        updated_at: DateTime<Utc>,
    ) -> BenefitsResult<()>;

    async fn append_payment(&mut self, record: &PaymentHistoryRecord) -> BenefitsResult<()>;

    async fn payments(
        &mut self,
        loan_type: LoanType,
        loan_id: Uuid,
    ) -> BenefitsResult<Vec<PaymentHistoryRecord>>;

    async fn commit(self) -> BenefitsResult<()>;
}
