use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use benefits_core::workflow::deduct_benefit;
use benefits_core::{
    ApprovalRecord, Approver, BenefitsError, BenefitsResult, CancellationRecord, DeductionEntry,
    EffectPlan, EmployeeBalance, LedgerStore, LedgerTx, LoanSnapshot, LoanType,
    PaymentHistoryRecord, RequestPayload, RequestSnapshot, RequestStatus, RequestType,
    WorkflowStore, WorkflowTx,
};
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

mod dispatch;

pub use dispatch::{FailingDispatcher, RecordingDispatcher};

#[derive(Debug, Clone, Default)]
struct State {
    approvers: HashMap<String, Approver>,
    requests: HashMap<(RequestType, Uuid), RequestSnapshot>,
    approvals: Vec<ApprovalRecord>,
    cancellations: Vec<CancellationRecord>,
    balances: HashMap<String, EmployeeBalance>,
    schedules: HashMap<(LoanType, Uuid), Vec<DeductionEntry>>,
    payments: Vec<PaymentHistoryRecord>,
}

/// Process-local store. Every transaction holds one mutex for its whole lifetime and works
/// on a copy of the state that replaces the original only on commit.
#[derive(Clone, Default)]
pub struct InMemoryBenefitsStore {
    state: Arc<Mutex<State>>,
    row_locks: Arc<AtomicUsize>,
}

pub struct InMemoryTx {
    guard: OwnedMutexGuard<State>,
    working: State,
    row_locks: Arc<AtomicUsize>,
}

impl InMemoryBenefitsStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn open(&self) -> InMemoryTx {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        InMemoryTx {
            guard,
            working,
            row_locks: self.row_locks.clone(),
        }
    }

    /// How many request or loan row locks transactions have asked for so far.
    pub async fn row_locks_taken(&self) -> usize {
        self.row_locks.load(Ordering::SeqCst)
    }

    pub async fn seed_approver(&self, approver: Approver) {
        let mut state = self.state.lock().await;
        state
            .approvers
            .insert(approver.employee_id.clone(), approver);
    }

    pub async fn seed_balance(&self, balance: EmployeeBalance) {
        let mut state = self.state.lock().await;
        state
            .balances
            .insert(balance.employee_id.clone(), balance);
    }

    pub async fn seed_request(&self, request: RequestSnapshot) {
        let mut state = self.state.lock().await;
        state
            .requests
            .insert((request.request_type, request.id), request);
    }

    /// Places a decision directly, as a concurrent writer that committed first would.
    pub async fn seed_approval(&self, record: ApprovalRecord) {
        let mut state = self.state.lock().await;
        state.approvals.push(record);
    }

    pub async fn seed_schedule(
        &self,
        loan_type: LoanType,
        loan_id: Uuid,
        entries: Vec<DeductionEntry>,
    ) {
        let mut state = self.state.lock().await;
        state.schedules.insert((loan_type, loan_id), entries);
    }

    pub async fn request(
        &self,
        request_type: RequestType,
        request_id: Uuid,
    ) -> Option<RequestSnapshot> {
        let state = self.state.lock().await;
        state.requests.get(&(request_type, request_id)).cloned()
    }

    pub async fn approvals_for(
        &self,
        request_type: RequestType,
        request_id: Uuid,
    ) -> Vec<ApprovalRecord> {
        let state = self.state.lock().await;
        approvals_of(&state, request_type, request_id)
    }

    pub async fn cancellations_for(
        &self,
        request_type: RequestType,
        request_id: Uuid,
    ) -> Vec<CancellationRecord> {
        let state = self.state.lock().await;
        cancellations_of(&state, request_type, request_id)
    }

    pub async fn balance(&self, employee_id: &str) -> Option<EmployeeBalance> {
        let state = self.state.lock().await;
        state.balances.get(employee_id).cloned()
    }

    pub async fn schedule_for(&self, loan_type: LoanType, loan_id: Uuid) -> Vec<DeductionEntry> {
        let state = self.state.lock().await;
        schedule_of(&state, loan_type, loan_id)
    }

    pub async fn payments_for(
        &self,
        loan_type: LoanType,
        loan_id: Uuid,
    ) -> Vec<PaymentHistoryRecord> {
        let state = self.state.lock().await;
        payments_of(&state, loan_type, loan_id)
    }
}

fn approvals_of(
    state: &State,
    request_type: RequestType,
    request_id: Uuid,
) -> Vec<ApprovalRecord> {
    let mut records: Vec<ApprovalRecord> = state
        .approvals
        .iter()
        .filter(|record| record.request_type == request_type && record.request_id == request_id)
        .cloned()
        .collect();
    records.sort_by_key(|record| record.approval_level);
    records
}

fn cancellations_of(
    state: &State,
    request_type: RequestType,
    request_id: Uuid,
) -> Vec<CancellationRecord> {
    let mut records: Vec<CancellationRecord> = state
        .cancellations
        .iter()
        .filter(|record| record.request_type == request_type && record.request_id == request_id)
        .cloned()
        .collect();
    records.sort_by_key(|record| record.cancelled_at);
    records
}

fn schedule_of(state: &State, loan_type: LoanType, loan_id: Uuid) -> Vec<DeductionEntry> {
    let mut entries = state
        .schedules
        .get(&(loan_type, loan_id))
        .cloned()
        .unwrap_or_default();
    entries.sort_by_key(|entry| entry.deduction_date);
    entries
}

fn payments_of(state: &State, loan_type: LoanType, loan_id: Uuid) -> Vec<PaymentHistoryRecord> {
    state
        .payments
        .iter()
        .filter(|record| record.loan_type == loan_type && record.loan_id == loan_id)
        .cloned()
        .collect()
}

fn missing_request(request_type: RequestType, request_id: Uuid) -> BenefitsError {
    BenefitsError::NotFound(format!("{} request {request_id}", request_type.as_str()))
}

#[async_trait]
impl WorkflowStore for InMemoryBenefitsStore {
    type Tx = InMemoryTx;

    async fn begin(&self) -> BenefitsResult<InMemoryTx> {
        Ok(self.open().await)
    }
}

#[async_trait]
impl WorkflowTx for InMemoryTx {
    async fn approver(&mut self, employee_id: &str) -> BenefitsResult<Option<Approver>> {
        Ok(self.working.approvers.get(employee_id).cloned())
    }

    async fn lock_request(
        &mut self,
        request_type: RequestType,
        request_id: Uuid,
    ) -> BenefitsResult<Option<RequestSnapshot>> {
        self.row_locks.fetch_add(1, Ordering::SeqCst);
        self.read_request(request_type, request_id).await
    }

    async fn read_request(
        &mut self,
        request_type: RequestType,
        request_id: Uuid,
    ) -> BenefitsResult<Option<RequestSnapshot>> {
        Ok(self
            .working
            .requests
            .get(&(request_type, request_id))
            .cloned())
    }

    async fn approval_exists(
        &mut self,
        request_type: RequestType,
        request_id: Uuid,
        approval_level: i32,
    ) -> BenefitsResult<bool> {
        Ok(self.working.approvals.iter().any(|record| {
            record.request_type == request_type
                && record.request_id == request_id
                && record.approval_level == approval_level
        }))
    }

    async fn insert_approval(&mut self, record: &ApprovalRecord) -> BenefitsResult<()> {
        if self
            .approval_exists(record.request_type, record.request_id, record.approval_level)
            .await?
        {
            return Err(BenefitsError::Conflict(format!(
                "approval already recorded at level {}",
                record.approval_level
            )));
        }
        self.working.approvals.push(record.clone());
        Ok(())
    }

    async fn insert_cancellation(&mut self, record: &CancellationRecord) -> BenefitsResult<()> {
        self.working.cancellations.push(record.clone());
        Ok(())
    }

    async fn update_request_state(
        &mut self,
        request_type: RequestType,
        request_id: Uuid,
        status: RequestStatus,
        approval_level: i32,
        updated_at: DateTime<Utc>,
    ) -> BenefitsResult<()> {
        let request = self
            .working
            .requests
            .get_mut(&(request_type, request_id))
            .ok_or_else(|| missing_request(request_type, request_id))?;
        request.status = status;
        request.current_approval_level = approval_level;
        request.updated_at = updated_at;
        Ok(())
    }

    async fn apply_effect(
        &mut self,
        request_type: RequestType,
        request_id: Uuid,
        plan: &EffectPlan,
    ) -> BenefitsResult<()> {
        match plan {
            EffectPlan::None => Ok(()),
            EffectPlan::DeductBenefit {
                employee_id,
                amount,
            } => {
                let balance = self.working.balances.get_mut(employee_id).ok_or_else(|| {
                    BenefitsError::Internal(anyhow::anyhow!(
                        "no benefit balance on file for {employee_id}"
                    ))
                })?;
                balance.benefits_amount_remaining =
                    deduct_benefit(balance.benefits_amount_remaining, *amount);
                Ok(())
            }
            EffectPlan::IssueCredential(token) => {
                let request = self
                    .working
                    .requests
                    .get_mut(&(request_type, request_id))
                    .ok_or_else(|| missing_request(request_type, request_id))?;
                request.credential = Some(token.clone());
                Ok(())
            }
        }
    }

    async fn approvals(
        &mut self,
        request_type: RequestType,
        request_id: Uuid,
    ) -> BenefitsResult<Vec<ApprovalRecord>> {
        Ok(approvals_of(&self.working, request_type, request_id))
    }

    async fn cancellations(
        &mut self,
        request_type: RequestType,
        request_id: Uuid,
    ) -> BenefitsResult<Vec<CancellationRecord>> {
        Ok(cancellations_of(&self.working, request_type, request_id))
    }

    async fn commit(self) -> BenefitsResult<()> {
        let InMemoryTx {
            mut guard, working, ..
        } = self;
        *guard = working;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for InMemoryBenefitsStore {
    type Tx = InMemoryTx;

    async fn begin(&self) -> BenefitsResult<InMemoryTx> {
        Ok(self.open().await)
    }

    async fn scheduled_loans(&self, loan_type: LoanType) -> BenefitsResult<Vec<Uuid>> {
        let state = self.state.lock().await;
        let mut loan_ids: Vec<Uuid> = state
            .schedules
            .iter()
            .filter(|((kind, _), entries)| *kind == loan_type && !entries.is_empty())
            .map(|((_, loan_id), _)| *loan_id)
            .collect();
        loan_ids.sort();
        Ok(loan_ids)
    }

    async fn loans_with_status(
        &self,
        loan_type: LoanType,
        status: RequestStatus,
    ) -> BenefitsResult<Vec<Uuid>> {
        let state = self.state.lock().await;
        let mut loan_ids: Vec<Uuid> = state
            .requests
            .values()
            .filter(|request| {
                request.request_type == loan_type.request_type() && request.status == status
            })
            .map(|request| request.id)
            .collect();
        loan_ids.sort();
        Ok(loan_ids)
    }
}

#[async_trait]
impl LedgerTx for InMemoryTx {
    async fn lock_loan(
        &mut self,
        loan_type: LoanType,
        loan_id: Uuid,
    ) -> BenefitsResult<Option<LoanSnapshot>> {
        self.row_locks.fetch_add(1, Ordering::SeqCst);
        self.read_loan(loan_type, loan_id).await
    }

    async fn read_loan(
        &mut self,
        loan_type: LoanType,
        loan_id: Uuid,
    ) -> BenefitsResult<Option<LoanSnapshot>> {
        let Some(request) = self
            .working
            .requests
            .get(&(loan_type.request_type(), loan_id))
        else {
            return Ok(None);
        };

        let RequestPayload::Loan { loan_amount } = &request.payload else {
            return Err(BenefitsError::Internal(anyhow::anyhow!(
                "request {loan_id} does not carry a loan payload"
            )));
        };

        Ok(Some(LoanSnapshot {
            id: request.id,
            loan_type,
            employee_id: request.employee_id.clone(),
            loan_amount: *loan_amount,
            status: request.status,
        }))
    }

    async fn schedule(
        &mut self,
        loan_type: LoanType,
        loan_id: Uuid,
    ) -> BenefitsResult<Vec<DeductionEntry>> {
        Ok(schedule_of(&self.working, loan_type, loan_id))
    }

    async fn update_entries(
        &mut self,
        loan_type: LoanType,
        entries: &[DeductionEntry],
    ) -> BenefitsResult<()> {
        for entry in entries {
            let stored = self
                .working
                .schedules
                .get_mut(&(loan_type, entry.loan_id))
                .and_then(|schedule| schedule.iter_mut().find(|row| row.id == entry.id))
                .ok_or_else(|| {
                    BenefitsError::Internal(anyhow::anyhow!(
                        "deduction entry {} is not on file",
                        entry.id
                    ))
                })?;
            *stored = entry.clone();
        }
        Ok(())
    }

    async fn set_loan_status(
        &mut self,
        loan_type: LoanType,
        loan_id: Uuid,
        status: RequestStatus,
        updated_at: DateTime<Utc>,
    ) -> BenefitsResult<()> {
        let request_type = loan_type.request_type();
        let request = self
            .working
            .requests
            .get_mut(&(request_type, loan_id))
            .ok_or_else(|| missing_request(request_type, loan_id))?;
        request.status = status;
        request.updated_at = updated_at;
        Ok(())
    }

    async fn append_payment(&mut self, record: &PaymentHistoryRecord) -> BenefitsResult<()> {
        if self
            .working
            .payments
            .iter()
            .any(|existing| existing.transaction_id == record.transaction_id)
        {
            return Err(BenefitsError::Conflict(format!(
                "transaction {} already recorded",
                record.transaction_id
            )));
        }
        self.working.payments.push(record.clone());
        Ok(())
    }

    async fn payments(
        &mut self,
        loan_type: LoanType,
        loan_id: Uuid,
    ) -> BenefitsResult<Vec<PaymentHistoryRecord>> {
        Ok(payments_of(&self.working, loan_type, loan_id))
    }

    async fn commit(self) -> BenefitsResult<()> {
        let InMemoryTx { mut guard, working, .. } = self;
        *guard = working;
        Ok(())
    }
}
