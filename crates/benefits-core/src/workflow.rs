use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{BenefitsError, BenefitsResult};
use crate::models::{
    ApprovalAction, Approver, CredentialToken, RequestPayload, RequestSnapshot, RequestStatus,
    RequestType,
};

pub const MIN_REJECTION_COMMENT_CHARS: usize = 5;

/// What a final approval writes besides the status change. Applied by the store inside the
/// decision transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum EffectPlan {
    None,
    DeductBenefit { employee_id: String, amount: Decimal },
    IssueCredential(CredentialToken),
}

/// Hook run when a request reaches its last approval level.
pub trait FinalApprovalEffect: Send + Sync {
    fn name(&self) -> &'static str;

    fn plan(
        &self,
        request: &RequestSnapshot,
        approver: &Approver,
        decided_at: DateTime<Utc>,
    ) -> BenefitsResult<EffectPlan>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoEffect;

impl FinalApprovalEffect for NoEffect {
    fn name(&self) -> &'static str {
        "none"
    }

    fn plan(
        &self,
        _request: &RequestSnapshot,
        _approver: &Approver,
        _decided_at: DateTime<Utc>,
    ) -> BenefitsResult<EffectPlan> {
        Ok(EffectPlan::None)
    }
}

/// Charges the reimbursed total against the requester's remaining benefit allowance.
#[derive(Debug, Clone, Copy, Default)]
pub struct BenefitDeduction;

impl FinalApprovalEffect for BenefitDeduction {
    fn name(&self) -> &'static str {
        "benefit_deduction"
    }

    fn plan(
        &self,
        request: &RequestSnapshot,
        _approver: &Approver,
        _decided_at: DateTime<Utc>,
    ) -> BenefitsResult<EffectPlan> {
        let RequestPayload::MedicalReimbursement { total_amount } = &request.payload else {
            return Err(payload_mismatch(request));
        };

        Ok(EffectPlan::DeductBenefit {
            employee_id: request.employee_id.clone(),
            amount: *total_amount,
        })
    }
}

/// Issues the QR credential a hospital scans to admit an employee on approved leave.
#[derive(Debug, Clone, Copy, Default)]
pub struct CredentialIssuance;

impl FinalApprovalEffect for CredentialIssuance {
    fn name(&self) -> &'static str {
        "credential_issuance"
    }

    fn plan(
        &self,
        request: &RequestSnapshot,
        approver: &Approver,
        decided_at: DateTime<Utc>,
    ) -> BenefitsResult<EffectPlan> {
        issue_credential(request, approver, decided_at).map(EffectPlan::IssueCredential)
    }
}

pub struct WorkflowPolicy {
    pub request_type: RequestType,
    pub max_level: i32,
    pub employee_cancellable: bool,
    pub effect: &'static dyn FinalApprovalEffect,
}

static MEDICAL_REIMBURSEMENT: WorkflowPolicy = WorkflowPolicy {
    request_type: RequestType::MedicalReimbursement,
    max_level: 4,
    employee_cancellable: false,
    effect: &BenefitDeduction,
};

static MEDICAL_LOA: WorkflowPolicy = WorkflowPolicy {
    request_type: RequestType::MedicalLoa,
    max_level: 1,
    employee_cancellable: false,
    effect: &CredentialIssuance,
};

static HOUSING_LOAN: WorkflowPolicy = WorkflowPolicy {
    request_type: RequestType::HousingLoan,
    max_level: 4,
    employee_cancellable: false,
    effect: &NoEffect,
};

static CAR_LOAN: WorkflowPolicy = WorkflowPolicy {
    request_type: RequestType::CarLoan,
    max_level: 4,
    employee_cancellable: false,
    effect: &NoEffect,
};

static SALARY_LOAN: WorkflowPolicy = WorkflowPolicy {
    request_type: RequestType::SalaryLoan,
    max_level: 4,
    employee_cancellable: false,
    effect: &NoEffect,
};

static STAFF_HOUSE_BOOKING: WorkflowPolicy = WorkflowPolicy {
    request_type: RequestType::StaffHouseBooking,
    max_level: 2,
    employee_cancellable: true,
    effect: &NoEffect,
};

pub fn policy_for(request_type: RequestType) -> &'static WorkflowPolicy {
    match request_type {
        RequestType::MedicalReimbursement => &MEDICAL_REIMBURSEMENT,
        RequestType::MedicalLoa => &MEDICAL_LOA,
        RequestType::HousingLoan => &HOUSING_LOAN,
        RequestType::CarLoan => &CAR_LOAN,
        RequestType::SalaryLoan => &SALARY_LOAN,
        RequestType::StaffHouseBooking => &STAFF_HOUSE_BOOKING,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub status: RequestStatus,
    pub level: i32,
    pub final_approval: bool,
}

impl WorkflowPolicy {
    pub fn transition(&self, current_level: i32, action: ApprovalAction) -> Transition {
        match action {
            ApprovalAction::Reject => Transition {
                status: RequestStatus::Rejected,
                level: current_level,
                final_approval: false,
            },
            ApprovalAction::Approve if current_level < self.max_level => Transition {
                status: RequestStatus::Pending,
                level: current_level + 1,
                final_approval: false,
            },
            ApprovalAction::Approve => Transition {
                status: RequestStatus::Approved,
                level: current_level,
                final_approval: true,
            },
        }
    }
}

pub fn authorize_approver(approver: Option<Approver>, actor_id: &str) -> BenefitsResult<Approver> {
    match approver {
        Some(approver) if approver.can_approve => Ok(approver),
        Some(_) => Err(BenefitsError::Forbidden(format!(
            "{actor_id} is not allowed to approve requests"
        ))),
        None => Err(BenefitsError::Forbidden(format!(
            "{actor_id} is not a registered approver"
        ))),
    }
}

/// Returns the trimmed comment, or `None` when it is blank. Rejections must carry a reason.
pub fn validate_comment(
    action: ApprovalAction,
    comment: Option<&str>,
) -> BenefitsResult<Option<String>> {
    let comment = comment.map(str::trim).filter(|value| !value.is_empty());

    if action == ApprovalAction::Reject
        && comment.is_none_or(|value| value.chars().count() < MIN_REJECTION_COMMENT_CHARS)
    {
        return Err(BenefitsError::InvalidInput(format!(
            "a rejection comment of at least {MIN_REJECTION_COMMENT_CHARS} characters is required"
        )));
    }

    Ok(comment.map(str::to_string))
}

pub fn ensure_awaiting(request: &RequestSnapshot, approver: &Approver) -> BenefitsResult<()> {
    if request.status != RequestStatus::Pending {
        return Err(BenefitsError::Conflict(format!(
            "request already {}",
            request.status.as_str()
        )));
    }

    if approver.numeric_level != request.current_approval_level {
        return Err(BenefitsError::Forbidden(format!(
            "request awaits level {} but approver holds level {}",
            request.current_approval_level, approver.numeric_level
        )));
    }

    Ok(())
}

pub fn ensure_cancellable(
    policy: &WorkflowPolicy,
    request: &RequestSnapshot,
    employee_id: &str,
) -> BenefitsResult<()> {
    if !policy.employee_cancellable {
        return Err(BenefitsError::InvalidInput(format!(
            "{} requests cannot be cancelled by the employee",
            policy.request_type.as_str()
        )));
    }

    if request.employee_id != employee_id {
        return Err(BenefitsError::Forbidden(
            "only the submitter may cancel this request".to_string(),
        ));
    }

    match request.status {
        RequestStatus::Pending | RequestStatus::Approved => Ok(()),
        other => Err(BenefitsError::Conflict(format!(
            "request already {}",
            other.as_str()
        ))),
    }
}

/// Remaining allowance after a reimbursement, never below zero.
pub fn deduct_benefit(remaining: Decimal, amount: Decimal) -> Decimal {
    (remaining - amount).max(Decimal::ZERO)
}

#[derive(Serialize)]
struct CredentialClaims<'a> {
    request_id: Uuid,
    employee_id: &'a str,
    hospital_name: &'a str,
    visit_date: NaiveDate,
    approved_by: &'a str,
    approved_at: DateTime<Utc>,
}

pub fn issue_credential(
    request: &RequestSnapshot,
    approver: &Approver,
    approved_at: DateTime<Utc>,
) -> BenefitsResult<CredentialToken> {
    let RequestPayload::MedicalLoa {
        hospital_name,
        visit_date,
    } = &request.payload
    else {
        return Err(payload_mismatch(request));
    };

    let claims = CredentialClaims {
        request_id: request.id,
        employee_id: &request.employee_id,
        hospital_name,
        visit_date: *visit_date,
        approved_by: &approver.employee_id,
        approved_at,
    };
    let payload = serde_json::to_string(&claims).map_err(anyhow::Error::from)?;
    let digest = format!("{:x}", Sha256::digest(payload.as_bytes()));

    Ok(CredentialToken { payload, digest })
}

fn payload_mismatch(request: &RequestSnapshot) -> BenefitsError {
    BenefitsError::Internal(anyhow::anyhow!(
        "request {} carries a payload that does not match {}",
        request.id,
        request.request_type.as_str()
    ))
}
