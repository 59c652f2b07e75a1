use anyhow::Result;
use benefits_core::{
    ApprovalRecord, Approver, BenefitsError, BenefitsResult, CancellationRecord, CredentialToken,
    DecisionStatus, DeductionEntry, DeductionStatus, LoanType, PaymentHistoryRecord,
    PaymentStatus, RequestPayload, RequestSnapshot, RequestStatus, RequestType,
};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgPoolOptions, postgres::PgRow};
use tracing::info;

const MAX_CONNECTIONS: u32 = 10;

pub async fn connect_database(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect(database_url)
        .await?;

    info!("postgres pool ready with up to {} connections", MAX_CONNECTIONS);
    Ok(pool)
}

/// Postgres-backed workflow and ledger store. One transaction per engine operation, with
/// `FOR UPDATE` on the request or loan row standing in for the per-entity lock.
#[derive(Clone)]
pub struct PgBenefitsStore {
    pool: PgPool,
}

pub struct PgTx {
    pub(crate) tx: Transaction<'static, Postgres>,
}

impl PgBenefitsStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub(crate) async fn open(&self) -> BenefitsResult<PgTx> {
        let tx = self.pool.begin().await.map_err(db_error)?;
        Ok(PgTx { tx })
    }
}

impl PgTx {
    pub(crate) async fn finish(self) -> BenefitsResult<()> {
        self.tx.commit().await.map_err(db_error)
    }
}

pub(crate) struct RequestTables {
    pub requests: &'static str,
    pub approvals: &'static str,
    pub cancellations: &'static str,
}

pub(crate) fn request_tables(request_type: RequestType) -> RequestTables {
    match request_type {
        RequestType::MedicalReimbursement => RequestTables {
            requests: "medical_reimbursements",
            approvals: "medical_reimbursement_approvals",
            cancellations: "medical_reimbursement_cancellations",
        },
        RequestType::MedicalLoa => RequestTables {
            requests: "medical_loas",
            approvals: "medical_loa_approvals",
            cancellations: "medical_loa_cancellations",
        },
        RequestType::HousingLoan => RequestTables {
            requests: "housing_loans",
            approvals: "housing_loan_approvals",
            cancellations: "housing_loan_cancellations",
        },
        RequestType::CarLoan => RequestTables {
            requests: "car_loans",
            approvals: "car_loan_approvals",
            cancellations: "car_loan_cancellations",
        },
        RequestType::SalaryLoan => RequestTables {
            requests: "salary_loans",
            approvals: "salary_loan_approvals",
            cancellations: "salary_loan_cancellations",
        },
        RequestType::StaffHouseBooking => RequestTables {
            requests: "staff_house_bookings",
            approvals: "staff_house_booking_approvals",
            cancellations: "staff_house_booking_cancellations",
        },
    }
}

pub(crate) fn deduction_table(loan_type: LoanType) -> &'static str {
    match loan_type {
        LoanType::Housing => "housing_loan_deductions",
        LoanType::Car => "car_loan_deductions",
        LoanType::Salary => "salary_loan_deductions",
    }
}

/// Unique violations become `Conflict`; every other database failure is internal.
pub(crate) fn db_error(err: sqlx::Error) -> BenefitsError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return BenefitsError::Conflict("a record for this step already exists".to_string());
        }
    }
    BenefitsError::Internal(err.into())
}

pub(crate) fn approver_from_row(row: &PgRow) -> Result<Approver> {
    Ok(Approver {
        employee_id: row.try_get("employee_id")?,
        numeric_level: row.try_get("numeric_level")?,
        can_approve: row.try_get("can_approve")?,
    })
}

pub(crate) fn request_from_row(request_type: RequestType, row: &PgRow) -> Result<RequestSnapshot> {
    let status: String = row.try_get("status")?;

    let payload = match request_type {
        RequestType::MedicalReimbursement => RequestPayload::MedicalReimbursement {
            total_amount: row.try_get("total_amount")?,
        },
        RequestType::MedicalLoa => RequestPayload::MedicalLoa {
            hospital_name: row.try_get("hospital_name")?,
            visit_date: row.try_get("visit_date")?,
        },
        RequestType::HousingLoan | RequestType::CarLoan | RequestType::SalaryLoan => {
            RequestPayload::Loan {
                loan_amount: row.try_get("loan_amount")?,
            }
        }
        RequestType::StaffHouseBooking => RequestPayload::StaffHouseBooking {
            house_name: row.try_get("house_name")?,
            check_in: row.try_get("check_in")?,
            check_out: row.try_get("check_out")?,
        },
    };

    let credential = if request_type == RequestType::MedicalLoa {
        let payload: Option<String> = row.try_get("credential_payload")?;
        let digest: Option<String> = row.try_get("credential_digest")?;
        payload
            .zip(digest)
            .map(|(payload, digest)| CredentialToken { payload, digest })
    } else {
        None
    };

    Ok(RequestSnapshot {
        id: row.try_get("id")?,
        request_type,
        employee_id: row.try_get("employee_id")?,
        status: RequestStatus::parse(&status)?,
        current_approval_level: row.try_get("current_approval_level")?,
        payload,
        credential,
        submitted_at: row.try_get("submitted_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub(crate) fn approval_from_row(request_type: RequestType, row: &PgRow) -> Result<ApprovalRecord> {
    let status: String = row.try_get("status")?;
    Ok(ApprovalRecord {
        id: row.try_get("id")?,
        request_type,
        request_id: row.try_get("request_id")?,
        approval_level: row.try_get("approval_level")?,
        approver_id: row.try_get("approver_id")?,
        status: DecisionStatus::parse(&status)?,
        comment: row.try_get("comment")?,
        decided_at: row.try_get("decided_at")?,
    })
}

pub(crate) fn cancellation_from_row(
    request_type: RequestType,
    row: &PgRow,
) -> Result<CancellationRecord> {
    let previous_status: String = row.try_get("previous_status")?;
    Ok(CancellationRecord {
        id: row.try_get("id")?,
        request_type,
        request_id: row.try_get("request_id")?,
        cancelled_by: row.try_get("cancelled_by")?,
        level_at_cancellation: row.try_get("level_at_cancellation")?,
        previous_status: RequestStatus::parse(&previous_status)?,
        reason: row.try_get("reason")?,
        cancelled_at: row.try_get("cancelled_at")?,
    })
}

pub(crate) fn deduction_from_row(row: &PgRow) -> Result<DeductionEntry> {
    let status: String = row.try_get("status")?;
    let payment_status: Option<String> = row.try_get("payment_status")?;
    Ok(DeductionEntry {
        id: row.try_get("id")?,
        loan_id: row.try_get("loan_id")?,
        deduction_date: row.try_get("deduction_date")?,
        amount: row.try_get("amount")?,
        status: DeductionStatus::parse(&status)?,
        actual_deduction_date: row.try_get("actual_deduction_date")?,
        is_early_payment: row.try_get("is_early_payment")?,
        payment_status: payment_status
            .as_deref()
            .map(PaymentStatus::parse)
            .transpose()?,
        payment_amount: row.try_get("payment_amount")?,
        payment_notes: row.try_get("payment_notes")?,
    })
}

pub(crate) fn payment_from_row(row: &PgRow) -> Result<PaymentHistoryRecord> {
    let loan_type: String = row.try_get("loan_type")?;
    Ok(PaymentHistoryRecord {
        transaction_id: row.try_get("transaction_id")?,
        loan_id: row.try_get("loan_id")?,
        loan_type: LoanType::parse(&loan_type)?,
        payment_amount: row.try_get("payment_amount")?,
        payment_date: row.try_get("payment_date")?,
        notes: row.try_get("notes")?,
        payment_method: row.try_get("payment_method")?,
        recorded_by: row.try_get("recorded_by")?,
        recorded_at: row.try_get("recorded_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_request_type_has_distinct_tables() {
        let mut names: Vec<&str> = RequestType::ALL
            .iter()
            .flat_map(|request_type| {
                let tables = request_tables(*request_type);
                [tables.requests, tables.approvals, tables.cancellations]
            })
            .chain(LoanType::ALL.iter().map(|loan_type| deduction_table(*loan_type)))
            .collect();
        let total = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), total);
    }

    #[test]
    fn deduction_tables_follow_their_loan_tables() {
        for loan_type in LoanType::ALL {
            let loans = request_tables(loan_type.request_type()).requests;
            assert!(deduction_table(loan_type).starts_with(loans.trim_end_matches('s')));
        }
    }
}
