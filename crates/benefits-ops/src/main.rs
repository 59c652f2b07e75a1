use anyhow::Result;
use benefits_core::{LedgerStore, NotificationDispatcher, RepaymentLedger};
use benefits_platform::{PgBenefitsStore, RedisBus, ServiceConfig, connect_database};
use chrono::Utc;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "benefits_ops=info".to_string()),
        )
        .init();

    let config = ServiceConfig::worker_from_env()?;
    let pool = connect_database(&config.database_url).await?;
    let redis = RedisBus::connect(&config.redis_url)?;
    let ledger = RepaymentLedger::new(PgBenefitsStore::new(pool), redis);

    let mut ticker = interval(config.refresh_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        "ops worker refreshing deduction schedules every {}s",
        config.refresh_interval.as_secs()
    );

    loop {
        ticker.tick().await;
        if let Err(err) = run_cycle(&ledger).await {
            error!("ledger maintenance cycle failed: {err:#}");
        }
    }
}

/// One maintenance pass: date-based schedule refresh, then completion of paid-off loans.
async fn run_cycle<S, N>(ledger: &RepaymentLedger<S, N>) -> Result<()>
where
    S: LedgerStore,
    N: NotificationDispatcher,
{
    let today = Utc::now().date_naive();
    let summary = ledger.refresh_schedules(today).await?;
    let completed = ledger.complete_loans_if_paid().await?;

    info!(
        "cycle as of {}: {} loans scanned, {} entries updated, {} loans completed",
        summary.as_of,
        summary.loans_scanned,
        summary.entries_updated,
        completed.len()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use benefits_core::{
        DeductionEntry, DeductionStatus, LoanType, RequestPayload, RequestSnapshot, RequestStatus,
    };
    use benefits_store::{InMemoryBenefitsStore, RecordingDispatcher};
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    use super::*;

    #[tokio::test]
    async fn cycle_deducts_past_installments_and_closes_paid_loans() {
        let store = InMemoryBenefitsStore::new();
        let loan_id = Uuid::new_v4();
        let now = Utc::now();
        store
            .seed_request(RequestSnapshot {
                id: loan_id,
                request_type: LoanType::Salary.request_type(),
                employee_id: "EMP-4004".to_string(),
                status: RequestStatus::Approved,
                current_approval_level: 4,
                payload: RequestPayload::Loan {
                    loan_amount: Decimal::from(2000),
                },
                credential: None,
                submitted_at: now,
                updated_at: now,
            })
            .await;
        let entries = [(2020, 1), (2020, 2)]
            .into_iter()
            .map(|(year, month)| {
                let date = NaiveDate::from_ymd_opt(year, month, 28).unwrap();
                DeductionEntry::scheduled(loan_id, date, Decimal::from(1000))
            })
            .collect();
        store.seed_schedule(LoanType::Salary, loan_id, entries).await;

        let notifier = RecordingDispatcher::new();
        let ledger = RepaymentLedger::new(store.clone(), notifier.clone());
        run_cycle(&ledger).await.unwrap();

        assert!(store
            .schedule_for(LoanType::Salary, loan_id)
            .await
            .iter()
            .all(|entry| entry.status == DeductionStatus::Deducted));
        let loan = store
            .request(LoanType::Salary.request_type(), loan_id)
            .await
            .unwrap();
        assert_eq!(loan.status, RequestStatus::Completed);
        assert_eq!(notifier.sent().await.len(), 1);
    }
}
