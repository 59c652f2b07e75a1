use async_trait::async_trait;
use benefits_core::{
    ApprovalRecord, Approver, BenefitsError, BenefitsResult, CancellationRecord, EffectPlan,
    RequestSnapshot, RequestStatus, RequestType, WorkflowStore, WorkflowTx,
};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::{
    PgBenefitsStore, PgTx, approval_from_row, approver_from_row, cancellation_from_row, db_error,
    request_from_row, request_tables,
};

#[async_trait]
impl WorkflowStore for PgBenefitsStore {
    type Tx = PgTx;

    async fn begin(&self) -> BenefitsResult<PgTx> {
        self.open().await
    }
}

impl PgTx {
    async fn select_request(
        &mut self,
        request_type: RequestType,
        request_id: Uuid,
        lock_clause: &str,
    ) -> BenefitsResult<Option<RequestSnapshot>> {
        let sql = format!(
            "SELECT * FROM {} WHERE id = $1{lock_clause}",
            request_tables(request_type).requests
        );
        let row = sqlx::query(&sql)
            .bind(request_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error)?;

        Ok(row
            .as_ref()
            .map(|row| request_from_row(request_type, row))
            .transpose()?)
    }
}

#[async_trait]
impl WorkflowTx for PgTx {
    async fn approver(&mut self, employee_id: &str) -> BenefitsResult<Option<Approver>> {
        let row = sqlx::query(
            "SELECT employee_id, numeric_level, can_approve FROM approvers WHERE employee_id = $1",
        )
        .bind(employee_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error)?;

        Ok(row.as_ref().map(approver_from_row).transpose()?)
    }

    async fn lock_request(
        &mut self,
        request_type: RequestType,
        request_id: Uuid,
    ) -> BenefitsResult<Option<RequestSnapshot>> {
        self.select_request(request_type, request_id, " FOR UPDATE").await
    }

    async fn read_request(
        &mut self,
        request_type: RequestType,
        request_id: Uuid,
    ) -> BenefitsResult<Option<RequestSnapshot>> {
        self.select_request(request_type, request_id, "").await
    }

    async fn approval_exists(
        &mut self,
        request_type: RequestType,
        request_id: Uuid,
        approval_level: i32,
    ) -> BenefitsResult<bool> {
        let sql = format!(
            "SELECT EXISTS (SELECT 1 FROM {} WHERE request_id = $1 AND approval_level = $2)",
            request_tables(request_type).approvals
        );
        sqlx::query_scalar::<_, bool>(&sql)
            .bind(request_id)
            .bind(approval_level)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(db_error)
    }

    async fn insert_approval(&mut self, record: &ApprovalRecord) -> BenefitsResult<()> {
        let sql = format!(
            r#"
            INSERT INTO {}
                (id, request_id, approval_level, approver_id, status, comment, decided_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
            request_tables(record.request_type).approvals
        );
        sqlx::query(&sql)
            .bind(record.id)
            .bind(record.request_id)
            .bind(record.approval_level)
            .bind(&record.approver_id)
            .bind(record.status.as_str())
            .bind(record.comment.as_deref())
            .bind(record.decided_at)
            .execute(&mut *self.tx)
            .await
            .map_err(db_error)?;

        Ok(())
    }

    async fn insert_cancellation(&mut self, record: &CancellationRecord) -> BenefitsResult<()> {
        let sql = format!(
            r#"
            INSERT INTO {} (
                id, request_id, cancelled_by, level_at_cancellation, previous_status, reason,
                cancelled_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
            request_tables(record.request_type).cancellations
        );
        sqlx::query(&sql)
            .bind(record.id)
            .bind(record.request_id)
            .bind(&record.cancelled_by)
            .bind(record.level_at_cancellation)
            .bind(record.previous_status.as_str())
            .bind(record.reason.as_deref())
            .bind(record.cancelled_at)
            .execute(&mut *self.tx)
            .await
            .map_err(db_error)?;

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
        let sql = format!(
            "UPDATE {} SET status = $2, current_approval_level = $3, updated_at = $4 WHERE id = $1",
            request_tables(request_type).requests
        );
        let result = sqlx::query(&sql)
            .bind(request_id)
            .bind(status.as_str())
            .bind(approval_level)
            .bind(updated_at)
            .execute(&mut *self.tx)
            .await
            .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(BenefitsError::NotFound(format!(
                "{} request {request_id}",
                request_type.as_str()
            )));
        }
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
                let result = sqlx::query(
                    r#"
                    UPDATE employees
                    SET benefits_amount_remaining = GREATEST(benefits_amount_remaining - $2, 0),
                        updated_at = $3
                    WHERE employee_id = $1
                    "#,
                )
                .bind(employee_id)
                .bind(*amount)
                .bind(Utc::now())
                .execute(&mut *self.tx)
                .await
                .map_err(db_error)?;

                if result.rows_affected() == 0 {
                    return Err(BenefitsError::Internal(anyhow::anyhow!(
                        "no benefit balance on file for {employee_id}"
                    )));
                }
                Ok(())
            }
            EffectPlan::IssueCredential(token) => {
                let sql = format!(
                    "UPDATE {} SET credential_payload = $2, credential_digest = $3 WHERE id = $1",
                    request_tables(request_type).requests
                );
                sqlx::query(&sql)
                    .bind(request_id)
                    .bind(&token.payload)
                    .bind(&token.digest)
                    .execute(&mut *self.tx)
                    .await
                    .map_err(db_error)?;
                Ok(())
            }
        }
    }

    async fn approvals(
        &mut self,
        request_type: RequestType,
        request_id: Uuid,
    ) -> BenefitsResult<Vec<ApprovalRecord>> {
        let sql = format!(
            r#"
            SELECT id, request_id, approval_level, approver_id, status, comment, decided_at
            FROM {}
            WHERE request_id = $1
            ORDER BY approval_level
            "#,
            request_tables(request_type).approvals
        );
        let rows = sqlx::query(&sql)
            .bind(request_id)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db_error)?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            records.push(approval_from_row(request_type, row)?);
        }
        Ok(records)
    }

    async fn cancellations(
        &mut self,
        request_type: RequestType,
        request_id: Uuid,
    ) -> BenefitsResult<Vec<CancellationRecord>> {
        let sql = format!(
            r#"
            SELECT id, request_id, cancelled_by, level_at_cancellation, previous_status, reason,
                   cancelled_at
            FROM {}
            WHERE request_id = $1
            ORDER BY cancelled_at
            "#,
            request_tables(request_type).cancellations
        );
        let rows = sqlx::query(&sql)
            .bind(request_id)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db_error)?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            records.push(cancellation_from_row(request_type, row)?);
        }
        Ok(records)
    }

    async fn commit(self) -> BenefitsResult<()> {
        self.finish().await
    }
}
