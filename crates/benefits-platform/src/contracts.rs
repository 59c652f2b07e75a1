use benefits_core::{CompletedLoan, DeductionEntry, RequestStatus};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecideRequest {
    pub action: String,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordPaymentRequest {
    pub loan_id: Uuid,
    pub loan_type: String,
    pub payment_amount: Decimal,
    pub notes: Option<String>,
    #[serde(default)]
    pub skip_schedule_allocation: bool,
    pub payment_method: Option<String>,
    pub paid_on: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordPaymentResponse {
    pub transaction_id: String,
    pub loan_id: Uuid,
    pub payment_amount: Decimal,
    pub updated_deductions: Vec<DeductionEntry>,
    pub loan_completed: bool,
    pub loan_status: RequestStatus,
    pub unallocated_amount: Decimal,
    pub cancelled_deductions: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefreshRequest {
    pub as_of: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshResponse {
    pub as_of: NaiveDate,
    pub loans_scanned: usize,
    pub entries_updated: usize,
    pub loans_completed: Vec<CompletedLoan>,
}
