use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{BenefitsError, BenefitsResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum RequestType {
    MedicalReimbursement,
    MedicalLoa,
    HousingLoan,
    CarLoan,
    SalaryLoan,
    StaffHouseBooking,
}

impl RequestType {
    pub const ALL: [RequestType; 6] = [
        RequestType::MedicalReimbursement,
        RequestType::MedicalLoa,
        RequestType::HousingLoan,
        RequestType::CarLoan,
        RequestType::SalaryLoan,
        RequestType::StaffHouseBooking,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::MedicalReimbursement => "MEDICAL_REIMBURSEMENT",
            Self::MedicalLoa => "MEDICAL_LOA",
            Self::HousingLoan => "HOUSING_LOAN",
            Self::CarLoan => "CAR_LOAN",
            Self::SalaryLoan => "SALARY_LOAN",
            Self::StaffHouseBooking => "STAFF_HOUSE_BOOKING",
        }
    }

    /// Accepts either the kebab-case path form or the upper snake case storage form.
    pub fn parse(value: &str) -> BenefitsResult<Self> {
        let normalized = value.trim().to_ascii_uppercase().replace('-', "_");
        match normalized.as_str() {
            "MEDICAL_REIMBURSEMENT" => Ok(Self::MedicalReimbursement),
            "MEDICAL_LOA" => Ok(Self::MedicalLoa),
            "HOUSING_LOAN" => Ok(Self::HousingLoan),
            "CAR_LOAN" => Ok(Self::CarLoan),
            "SALARY_LOAN" => Ok(Self::SalaryLoan),
            "STAFF_HOUSE_BOOKING" => Ok(Self::StaffHouseBooking),
            _ => Err(BenefitsError::InvalidInput(format!(
                "unsupported request_type: {value}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum LoanType {
    Housing,
    Car,
    Salary,
}

impl LoanType {
    pub const ALL: [LoanType; 3] = [LoanType::Housing, LoanType::Car, LoanType::Salary];

    pub fn as_str(self) -> &'static str {
        self.request_type().as_str()
    }

    pub fn request_type(self) -> RequestType {
        match self {
            Self::Housing => RequestType::HousingLoan,
            Self::Car => RequestType::CarLoan,
            Self::Salary => RequestType::SalaryLoan,
        }
    }

    pub fn parse(value: &str) -> BenefitsResult<Self> {
        let normalized = value.trim().to_ascii_uppercase().replace('-', "_");
        match normalized.as_str() {
            "HOUSING" | "HOUSING_LOAN" => Ok(Self::Housing),
            "CAR" | "CAR_LOAN" => Ok(Self::Car),
            "SALARY" | "SALARY_LOAN" => Ok(Self::Salary),
            _ => Err(BenefitsError::InvalidInput(format!(
                "loan_type must be housing, car, or salary (got {value})"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
    Completed,
}

impl RequestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
            Self::Cancelled => "CANCELLED",
            Self::Completed => "COMPLETED",
        }
    }

    pub fn parse(value: &str) -> BenefitsResult<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "APPROVED" => Ok(Self::Approved),
            "REJECTED" => Ok(Self::Rejected),
            "CANCELLED" => Ok(Self::Cancelled),
            "COMPLETED" => Ok(Self::Completed),
            other => Err(BenefitsError::Internal(anyhow::anyhow!(
                "unknown request status {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalAction {
    Approve,
    Reject,
}

impl ApprovalAction {
    pub fn parse(value: &str) -> BenefitsResult<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "approve" => Ok(Self::Approve),
            "reject" => Ok(Self::Reject),
            _ => Err(BenefitsError::InvalidInput(
                "action must be approve or reject".to_string(),
            )),
        }
    }

    pub fn decision_status(self) -> DecisionStatus {
        match self {
            Self::Approve => DecisionStatus::Approved,
            Self::Reject => DecisionStatus::Rejected,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionStatus {
    Approved,
    Rejected,
}

impl DecisionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
        }
    }

    pub fn parse(value: &str) -> BenefitsResult<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "APPROVED" => Ok(Self::Approved),
            "REJECTED" => Ok(Self::Rejected),
            other => Err(BenefitsError::Internal(anyhow::anyhow!(
                "unknown approval decision {other}"
            ))),
        }
    }
}

/// Type-specific fields captured at submission. The workflow only reads them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RequestPayload {
    MedicalReimbursement {
        total_amount: Decimal,
    },
    MedicalLoa {
        hospital_name: String,
        visit_date: NaiveDate,
    },
    Loan {
        loan_amount: Decimal,
    },
    StaffHouseBooking {
        house_name: String,
        check_in: NaiveDate,
        check_out: NaiveDate,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CredentialToken {
    pub payload: String,
    pub digest: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestSnapshot {
    pub id: Uuid,
    pub request_type: RequestType,
    pub employee_id: String,
    pub status: RequestStatus,
    pub current_approval_level: i32,
    pub payload: RequestPayload,
    pub credential: Option<CredentialToken>,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Approver {
    pub employee_id: String,
    pub numeric_level: i32,
    pub can_approve: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApprovalRecord {
    pub id: Uuid,
    pub request_type: RequestType,
    pub request_id: Uuid,
    pub approval_level: i32,
    pub approver_id: String,
    pub status: DecisionStatus,
    pub comment: Option<String>,
    pub decided_at: DateTime<Utc>,
}

/// An employee withdrawing their own request. Kept apart from approver decisions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CancellationRecord {
    pub id: Uuid,
    pub request_type: RequestType,
    pub request_id: Uuid,
    pub cancelled_by: String,
    pub level_at_cancellation: i32,
    pub previous_status: RequestStatus,
    pub reason: Option<String>,
    pub cancelled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmployeeBalance {
    pub employee_id: String,
    pub benefits_package: String,
    pub benefits_amount_remaining: Decimal,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeductionStatus {
    Upcoming,
    Pending,
    Deducted,
    PartiallyDeducted,
    Cancelled,
}

impl DeductionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Upcoming => "UPCOMING",
            Self::Pending => "PENDING",
            Self::Deducted => "DEDUCTED",
            Self::PartiallyDeducted => "PARTIALLY_DEDUCTED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(value: &str) -> BenefitsResult<Self> {
        match value.trim().to_ascii_uppercase().replace(' ', "_").as_str() {
            "UPCOMING" => Ok(Self::Upcoming),
            "PENDING" => Ok(Self::Pending),
            "DEDUCTED" => Ok(Self::Deducted),
            "PARTIALLY_DEDUCTED" => Ok(Self::PartiallyDeducted),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(BenefitsError::Internal(anyhow::anyhow!(
                "unknown deduction status {other}"
            ))),
        }
    }

    /// Resolved entries are never revisited by the date-based refresh or the allocator.
    pub fn is_resolved(self) -> bool {
        matches!(
            self,
            Self::Deducted | Self::PartiallyDeducted | Self::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    PartiallyPaid,
    FullyPaid,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PartiallyPaid => "PARTIALLY_PAID",
            Self::FullyPaid => "FULLY_PAID",
        }
    }

    pub fn parse(value: &str) -> BenefitsResult<Self> {
        match value.trim().to_ascii_uppercase().replace(' ', "_").as_str() {
            "PARTIALLY_PAID" => Ok(Self::PartiallyPaid),
            "FULLY_PAID" => Ok(Self::FullyPaid),
            other => Err(BenefitsError::Internal(anyhow::anyhow!(
                "unknown payment status {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeductionEntry {
    pub id: Uuid,
    pub loan_id: Uuid,
    pub deduction_date: NaiveDate,
    pub amount: Decimal,
    pub status: DeductionStatus,
    pub actual_deduction_date: Option<NaiveDate>,
    pub is_early_payment: bool,
    pub payment_status: Option<PaymentStatus>,
    pub payment_amount: Option<Decimal>,
    pub payment_notes: Option<String>,
}

impl DeductionEntry {
    pub fn scheduled(loan_id: Uuid, deduction_date: NaiveDate, amount: Decimal) -> Self {
        Self {
            id: Uuid::new_v4(),
            loan_id,
            deduction_date,
            amount,
            status: DeductionStatus::Upcoming,
            actual_deduction_date: None,
            is_early_payment: false,
            payment_status: None,
            payment_amount: None,
            payment_notes: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoanSnapshot {
    pub id: Uuid,
    pub loan_type: LoanType,
    pub employee_id: String,
    pub loan_amount: Decimal,
    pub status: RequestStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentHistoryRecord {
    pub transaction_id: String,
    pub loan_id: Uuid,
    pub loan_type: LoanType,
    pub payment_amount: Decimal,
    pub payment_date: NaiveDate,
    pub notes: Option<String>,
    pub payment_method: String,
    pub recorded_by: String,
    pub recorded_at: DateTime<Utc>,
}
