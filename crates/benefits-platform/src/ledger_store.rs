use async_trait::async_trait;
use benefits_core::{
    BenefitsError, BenefitsResult, DeductionEntry, LedgerStore, LedgerTx, LoanSnapshot, LoanType,
    PaymentHistoryRecord, RequestStatus,
};
use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use crate::db::{
    PgBenefitsStore, PgTx, db_error, deduction_from_row, deduction_table, payment_from_row,
    request_tables,
};

const DEDUCTION_COLUMNS: &str = "id, loan_id, deduction_date, amount, status, \
     actual_deduction_date, is_early_payment, payment_status, payment_amount, payment_notes";

fn loan_table(loan_type: LoanType) -> &'static str {
    request_tables(loan_type.request_type()).requests
}

#[async_trait]
impl LedgerStore for PgBenefitsStore {
    type Tx = PgTx;

    async fn begin(&self) -> BenefitsResult<PgTx> {
        self.open().await
    }

    async fn scheduled_loans(&self, loan_type: LoanType) -> BenefitsResult<Vec<Uuid>> {
        let sql = format!(
            "SELECT DISTINCT loan_id FROM {} ORDER BY loan_id",
            deduction_table(loan_type)
        );
        sqlx::query_scalar::<_, Uuid>(&sql)
            .fetch_all(self.pool())
            .await
            .map_err(db_error)
    }

    async fn loans_with_status(
        &self,
        loan_type: LoanType,
        status: RequestStatus,
    ) -> BenefitsResult<Vec<Uuid>> {
        let sql = format!(
            "SELECT id FROM {} WHERE status = $1 ORDER BY id",
            loan_table(loan_type)
        );
        sqlx::query_scalar::<_, Uuid>(&sql)
            .bind(status.as_str())
            .fetch_all(self.pool())
            .await
            .map_err(db_error)
    }
}

impl PgTx {
    async fn select_loan(
        &mut self,
        loan_type: LoanType,
        loan_id: Uuid,
        lock_clause: &str,
    ) -> BenefitsResult<Option<LoanSnapshot>> {
        let sql = format!(
            "SELECT id, employee_id, loan_amount, status FROM {} WHERE id = $1{lock_clause}",
            loan_table(loan_type)
        );
        let Some(row) = sqlx::query(&sql)
            .bind(loan_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error)?
        else {
            return Ok(None);
        };

        let status: String = row.try_get("status").map_err(db_error)?;
        Ok(Some(LoanSnapshot {
            id: row.try_get("id").map_err(db_error)?,
            loan_type,
            employee_id: row.try_get("employee_id").map_err(db_error)?,
            loan_amount: row.try_get("loan_amount").map_err(db_error)?,
            status: RequestStatus::parse(&status)?,
        }))
    }
}

#[async_trait]
impl LedgerTx for PgTx {
    async fn lock_loan(
        &mut self,
        loan_type: LoanType,
        loan_id: Uuid,
    ) -> BenefitsResult<Option<LoanSnapshot>> {
        self.select_loan(loan_type, loan_id, " FOR UPDATE").await
    }

    async fn read_loan(
        &mut self,
        loan_type: LoanType,
        loan_id: Uuid,
    ) -> BenefitsResult<Option<LoanSnapshot>> {
        self.select_loan(loan_type, loan_id, "").await
    }

    async fn schedule(
        &mut self,
        loan_type: LoanType,
        loan_id: Uuid,
    ) -> BenefitsResult<Vec<DeductionEntry>> {
        let sql = format!(
            "SELECT {DEDUCTION_COLUMNS} FROM {} WHERE loan_id = $1 ORDER BY deduction_date, id",
            deduction_table(loan_type)
        );
        let rows = sqlx::query(&sql)
            .bind(loan_id)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db_error)?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            entries.push(deduction_from_row(row)?);
        }
        Ok(entries)
    }

    async fn update_entries(
        &mut self,
        loan_type: LoanType,
        entries: &[DeductionEntry],
    ) -> BenefitsResult<()> {
        let sql = format!(
            r#"
            UPDATE {}
            SET status = $3,
                actual_deduction_date = $4,
                is_early_payment = $5,
                payment_status = $6,
                payment_amount = $7,
                payment_notes = $8,
                updated_at = $9
            WHERE id = $1 AND loan_id = $2
            "#,
            deduction_table(loan_type)
        );
        let now = Utc::now();

        for entry in entries {
            let result = sqlx::query(&sql)
                .bind(entry.id)
                .bind(entry.loan_id)
                .bind(entry.status.as_str())
                .bind(entry.actual_deduction_date)
                .bind(entry.is_early_payment)
                .bind(entry.payment_status.map(|status| status.as_str()))
                .bind(entry.payment_amount)
                .bind(entry.payment_notes.as_deref())
                .bind(now)
                .execute(&mut *self.tx)
                .await
                .map_err(db_error)?;

            if result.rows_affected() == 0 {
                return Err(BenefitsError::Internal(anyhow::anyhow!(
                    "deduction entry {} is not on file",
                    entry.id
                )));
            }
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
        let sql = format!(
            "UPDATE {} SET status = $2, updated_at = $3 WHERE id = $1",
            loan_table(loan_type)
        );
        sqlx::query(&sql)
            .bind(loan_id)
            .bind(status.as_str())
            .bind(updated_at)
            .execute(&mut *self.tx)
            .await
            .map_err(db_error)?;

        Ok(())
    }

    async fn append_payment(&mut self, record: &PaymentHistoryRecord) -> BenefitsResult<()> {
        sqlx::query(
            r#"
            INSERT INTO loan_payment_history (
                transaction_id, loan_id, loan_type, payment_amount, payment_date, notes,
                payment_method, recorded_by, recorded_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&record.transaction_id)
        .bind(record.loan_id)
        .bind(record.loan_type.as_str())
        .bind(record.payment_amount)
        .bind(record.payment_date)
        .bind(record.notes.as_deref())
        .bind(&record.payment_method)
        .bind(&record.recorded_by)
        .bind(record.recorded_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    async fn payments(
        &mut self,
        loan_type: LoanType,
        loan_id: Uuid,
    ) -> BenefitsResult<Vec<PaymentHistoryRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT transaction_id, loan_id, loan_type, payment_amount, payment_date, notes,
                   payment_method, recorded_by, recorded_at
            FROM loan_payment_history
            WHERE loan_id = $1 AND loan_type = $2
            ORDER BY recorded_at
            "#,
        )
        .bind(loan_id)
        .bind(loan_type.as_str())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_error)?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            records.push(payment_from_row(row)?);
        }
        Ok(records)
    }

    async fn commit(self) -> BenefitsResult<()> {
        self.finish().await
    }
}
