use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{BenefitsError, BenefitsResult};
use crate::ledger::{allocate_payment, deducted_total, is_fully_paid, refresh_entry, total_paid};
use crate::models::{
    DeductionEntry, LoanSnapshot, LoanType, PaymentHistoryRecord, RequestStatus,
};
use crate::notify::{Notification, NotificationDispatcher};
use crate::storage::{LedgerStore, LedgerTx};

pub const DEFAULT_PAYMENT_METHOD: &str = "MANUAL";

/// Payments are stored as given, so they must already be in whole cents.
const MONEY_SCALE: u32 = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentCommand {
    pub loan_type: LoanType,
    pub loan_id: Uuid,
    pub amount: Decimal,
    pub notes: Option<String>,
    pub skip_schedule_allocation: bool,
    pub payment_method: String,
    pub paid_on: NaiveDate,
    pub recorded_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentReceipt {
    pub loan_type: LoanType,
    pub loan_id: Uuid,
    pub transaction_id: String,
    pub payment_amount: Decimal,
    pub touched_entries: Vec<DeductionEntry>,
    pub loan_completed: bool,
    pub loan_status: RequestStatus,
    pub unallocated_amount: Decimal,
    pub cancelled_entries: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RefreshSummary {
    pub as_of: NaiveDate,
    pub loans_scanned: usize,
    pub entries_updated: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletedLoan {
    pub loan_type: LoanType,
    pub loan_id: Uuid,
    pub employee_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoanStatement {
    pub loan: LoanSnapshot,
    pub entries: Vec<DeductionEntry>,
    pub payments: Vec<PaymentHistoryRecord>,
    pub total_paid: Decimal,
    pub outstanding: Decimal,
}

/// Scheduled-deduction ledger for approved loans.
pub struct RepaymentLedger<S, N> {
    store: S,
    notifier: N,
}

impl<S, N> RepaymentLedger<S, N>
where
    S: LedgerStore,
    N: NotificationDispatcher,
{
    pub fn new(store: S, notifier: N) -> Self {
        Self { store, notifier }
    }

    /// Posts a manual payment and, unless told otherwise, spreads it over the schedule.
    ///
    /// The history row, the schedule changes and the loan status change share one
    /// transaction under the loan lock, so concurrent payments never read the same
    /// "earliest unresolved" installment.
    pub async fn apply_payment(&self, command: PaymentCommand) -> BenefitsResult<PaymentReceipt> {
        let amount = command.amount;
        if amount <= Decimal::ZERO {
            return Err(BenefitsError::InvalidInput(
                "payment_amount must be positive".to_string(),
            ));
        }
        if amount.normalize().scale() > MONEY_SCALE {
            return Err(BenefitsError::InvalidInput(format!(
                "payment_amount {amount} has more than {MONEY_SCALE} decimal places"
            )));
        }
        let notes = command
            .notes
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);
        let payment_method = match command.payment_method.trim() {
            "" => DEFAULT_PAYMENT_METHOD.to_string(),
            method => method.to_ascii_uppercase(),
        };

        let mut tx = self.store.begin().await?;
        let loan = tx
            .lock_loan(command.loan_type, command.loan_id)
            .await?
            .ok_or_else(|| {
                BenefitsError::NotFound(format!(
                    "{} {}",
                    command.loan_type.as_str(),
                    command.loan_id
                ))
            })?;

        if !matches!(loan.status, RequestStatus::Approved | RequestStatus::Completed) {
            return Err(BenefitsError::Conflict(format!(
                "loan is {} and has no active repayment schedule",
                loan.status.as_str()
            )));
        }

        let record = PaymentHistoryRecord {
            transaction_id: new_transaction_id(),
            loan_id: loan.id,
            loan_type: loan.loan_type,
            payment_amount: amount,
            payment_date: command.paid_on,
            notes: notes.clone(),
            payment_method,
            recorded_by: command.recorded_by.clone(),
            recorded_at: Utc::now(),
        };
        tx.append_payment(&record).await?;

        if command.skip_schedule_allocation {
            tx.commit().await?;
            info!(
                "payment {} of {} recorded for {} {} without allocation",
                record.transaction_id,
                amount,
                loan.loan_type.as_str(),
                loan.id
            );
            return Ok(PaymentReceipt {
                loan_type: loan.loan_type,
                loan_id: loan.id,
                transaction_id: record.transaction_id,
                payment_amount: amount,
                touched_entries: Vec::new(),
                loan_completed: false,
                loan_status: loan.status,
                unallocated_amount: amount,
                cancelled_entries: 0,
            });
        }

        let mut entries = tx.schedule(loan.loan_type, loan.id).await?;
        let allocation = allocate_payment(
            &mut entries,
            loan.loan_amount,
            amount,
            command.paid_on,
            notes.as_deref(),
        );
        let touched: Vec<DeductionEntry> = allocation
            .touched
            .iter()
            .filter_map(|id| entries.iter().find(|entry| entry.id == *id).cloned())
            .collect();

        if !touched.is_empty() {
            tx.update_entries(loan.loan_type, &touched).await?;
        }

        let completed_now = allocation.loan_completed && loan.status != RequestStatus::Completed;
        if completed_now {
            tx.set_loan_status(
                loan.loan_type,
                loan.id,
                RequestStatus::Completed,
                record.recorded_at,
            )
            .await?;
        }

        tx.commit().await?;

        info!(
            "payment {} of {} applied to {} {}: {} entries touched, {} cancelled, completed={}",
            record.transaction_id,
            amount,
            loan.loan_type.as_str(),
            loan.id,
            touched.len(),
            allocation.cancelled,
            allocation.loan_completed
        );

        if completed_now {
            self.notify(&Notification::LoanCompleted {
                loan_type: loan.loan_type,
                loan_id: loan.id,
                employee_id: loan.employee_id.clone(),
            })
            .await;
        }

        Ok(PaymentReceipt {
            loan_type: loan.loan_type,
            loan_id: loan.id,
            transaction_id: record.transaction_id,
            payment_amount: amount,
            touched_entries: touched,
            loan_completed: allocation.loan_completed,
            loan_status: if allocation.loan_completed {
                RequestStatus::Completed
            } else {
                loan.status
            },
            unallocated_amount: allocation.unallocated,
            cancelled_entries: allocation.cancelled,
        })
    }

    /// Re-derives date-based statuses. Safe to run any number of times for the same date.
    pub async fn refresh_schedules(&self, as_of: NaiveDate) -> BenefitsResult<RefreshSummary> {
        let mut summary = RefreshSummary {
            as_of,
            loans_scanned: 0,
            entries_updated: 0,
        };

        for loan_type in LoanType::ALL {
            for loan_id in self.store.scheduled_loans(loan_type).await? {
                let mut tx = self.store.begin().await?;
                if tx.lock_loan(loan_type, loan_id).await?.is_none() {
                    warn!(
                        "deduction schedule references missing {} {}",
                        loan_type.as_str(),
                        loan_id
                    );
                    continue;
                }

                let mut entries = tx.schedule(loan_type, loan_id).await?;
                let changed: Vec<DeductionEntry> = entries
                    .iter_mut()
                    .filter_map(|entry| refresh_entry(entry, as_of).then(|| entry.clone()))
                    .collect();

                if !changed.is_empty() {
                    tx.update_entries(loan_type, &changed).await?;
                }
                tx.commit().await?;

                summary.loans_scanned += 1;
                summary.entries_updated += changed.len();
            }
        }

        info!(
            "schedule refresh as of {}: {} loans scanned, {} entries updated",
            as_of, summary.loans_scanned, summary.entries_updated
        );

        Ok(summary)
    }

    /// Marks approved loans whose deducted installments cover the principal as completed.
    pub async fn complete_loans_if_paid(&self) -> BenefitsResult<Vec<CompletedLoan>> {
        let mut completed = Vec::new();

        for loan_type in LoanType::ALL {
            for loan_id in self
                .store
                .loans_with_status(loan_type, RequestStatus::Approved)
                .await?
            {
                let mut tx = self.store.begin().await?;
                let Some(loan) = tx.lock_loan(loan_type, loan_id).await? else {
                    continue;
                };
                if loan.status != RequestStatus::Approved {
                    continue;
                }

                let entries = tx.schedule(loan_type, loan_id).await?;
                if !is_fully_paid(deducted_total(&entries), loan.loan_amount) {
                    continue;
                }

                tx.set_loan_status(loan_type, loan_id, RequestStatus::Completed, Utc::now())
                    .await?;
                tx.commit().await?;

                info!("{} {} completed by scheduled deductions", loan_type.as_str(), loan_id);
                self.notify(&Notification::LoanCompleted {
                    loan_type,
                    loan_id,
                    employee_id: loan.employee_id.clone(),
                })
                .await;

                completed.push(CompletedLoan {
                    loan_type,
                    loan_id,
                    employee_id: loan.employee_id,
                });
            }
        }

        Ok(completed)
    }

    pub async fn statement(
        &self,
        loan_type: LoanType,
        loan_id: Uuid,
    ) -> BenefitsResult<LoanStatement> {
        let mut tx = self.store.begin().await?;
        let loan = tx
            .read_loan(loan_type, loan_id)
            .await?
            .ok_or_else(|| BenefitsError::NotFound(format!("{} {loan_id}", loan_type.as_str())))?;
        let entries = tx.schedule(loan_type, loan_id).await?;
        let payments = tx.payments(loan_type, loan_id).await?;
        tx.commit().await?;

        let total_paid = total_paid(&entries);
        let outstanding = (loan.loan_amount - total_paid).max(Decimal::ZERO);

        Ok(LoanStatement {
            loan,
            entries,
            payments,
            total_paid,
            outstanding,
        })
    }

    async fn notify(&self, notification: &Notification) {
        if let Err(err) = self.notifier.dispatch(notification).await {
            warn!("notification dispatch failed: {err:#}");
        }
    }
}

fn new_transaction_id() -> String {
    format!("TXN-{}", Uuid::new_v4().simple()).to_ascii_uppercase()
}
