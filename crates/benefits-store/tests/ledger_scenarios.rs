use benefits_core::{
    BenefitsError, DEFAULT_PAYMENT_METHOD, DeductionEntry, DeductionStatus, LoanType,
    Notification, PaymentCommand, PaymentStatus, RepaymentLedger, RequestPayload,
    RequestSnapshot, RequestStatus,
};
use benefits_store::{InMemoryBenefitsStore, RecordingDispatcher};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

const BORROWER: &str = "EMP-3003";
const ADMIN: &str = "PAYROLL-ADMIN";

fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

struct Fixture {
    store: InMemoryBenefitsStore,
    notifier: RecordingDispatcher,
    ledger: RepaymentLedger<InMemoryBenefitsStore, RecordingDispatcher>,
}

fn fixture() -> Fixture {
    let store = InMemoryBenefitsStore::new();
    let notifier = RecordingDispatcher::new();
    let ledger = RepaymentLedger::new(store.clone(), notifier.clone());
    Fixture {
        store,
        notifier,
        ledger,
    }
}

/// Seeds a loan with one installment per month starting January 2027.
async fn seed_loan(
    store: &InMemoryBenefitsStore,
    loan_type: LoanType,
    status: RequestStatus,
    installments: u32,
    installment: i64,
) -> Uuid {
    let now = Utc::now();
    let loan_id = Uuid::new_v4();
    store
        .seed_request(RequestSnapshot {
            id: loan_id,
            request_type: loan_type.request_type(),
            employee_id: BORROWER.to_string(),
            status,
            current_approval_level: 4,
            payload: RequestPayload::Loan {
                loan_amount: Decimal::from(installment * i64::from(installments)),
            },
            credential: None,
            submitted_at: now,
            updated_at: now,
        })
        .await;

    let entries: Vec<DeductionEntry> = (1..=installments)
        .map(|month| {
            DeductionEntry::scheduled(loan_id, date(2027, month, 15), Decimal::from(installment))
        })
        .collect();
    store.seed_schedule(loan_type, loan_id, entries).await;
    loan_id
}

fn payment(loan_type: LoanType, loan_id: Uuid, amount: Decimal) -> PaymentCommand {
    PaymentCommand {
        loan_type,
        loan_id,
        amount,
        notes: None,
        skip_schedule_allocation: false,
        payment_method: String::new(),
        paid_on: date(2026, 10, 19),
        recorded_by: ADMIN.to_string(),
    }
}

#[tokio::test]
async fn lump_payment_then_top_up_follows_the_waterfall() {
    let fx = fixture();
    let loan_id = seed_loan(&fx.store, LoanType::Salary, RequestStatus::Approved, 12, 1000).await;

    let first = fx
        .ledger
        .apply_payment(payment(LoanType::Salary, loan_id, Decimal::from(2500)))
        .await
        .unwrap();
    assert_eq!(first.touched_entries.len(), 3);
    assert_eq!(first.loan_status, RequestStatus::Approved);
    assert!(!first.loan_completed);
    assert!(first.transaction_id.starts_with("TXN-"));

    let mut top_up = payment(LoanType::Salary, loan_id, Decimal::from(500));
    top_up.notes = Some("cash at payroll desk".to_string());
    top_up.payment_method = "cash".to_string();
    let second = fx.ledger.apply_payment(top_up).await.unwrap();
    assert_eq!(second.touched_entries.len(), 1);

    let schedule = fx.store.schedule_for(LoanType::Salary, loan_id).await;
    let statuses: Vec<DeductionStatus> = schedule.iter().map(|entry| entry.status).collect();
    assert_eq!(&statuses[..3], &[DeductionStatus::Deducted; 3]);
    assert!(statuses[3..]
        .iter()
        .all(|status| *status == DeductionStatus::Upcoming));
    assert_eq!(schedule[2].payment_amount, Some(Decimal::from(1000)));
    assert_eq!(schedule[2].payment_status, Some(PaymentStatus::FullyPaid));
    assert_eq!(
        schedule[2].payment_notes.as_deref(),
        Some("cash at payroll desk")
    );

    let history = fx.store.payments_for(LoanType::Salary, loan_id).await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].payment_method, DEFAULT_PAYMENT_METHOD);
    assert_eq!(history[1].payment_method, "CASH");
    assert!(history.iter().all(|record| record.recorded_by == ADMIN));
    assert_ne!(history[0].transaction_id, history[1].transaction_id);
}

#[tokio::test]
async fn settling_the_principal_completes_the_loan() {
    let fx = fixture();
    let loan_id = seed_loan(&fx.store, LoanType::Car, RequestStatus::Approved, 6, 1000).await;

    fx.ledger
        .apply_payment(payment(LoanType::Car, loan_id, Decimal::from(2000)))
        .await
        .unwrap();
    let receipt = fx
        .ledger
        .apply_payment(payment(LoanType::Car, loan_id, Decimal::from(4000)))
        .await
        .unwrap();

    assert!(receipt.loan_completed);
    assert_eq!(receipt.loan_status, RequestStatus::Completed);
    assert_eq!(receipt.unallocated_amount, Decimal::ZERO);

    let loan = fx
        .store
        .request(LoanType::Car.request_type(), loan_id)
        .await
        .unwrap();
    assert_eq!(loan.status, RequestStatus::Completed);

    let schedule = fx.store.schedule_for(LoanType::Car, loan_id).await;
    assert!(schedule
        .iter()
        .all(|entry| entry.status == DeductionStatus::Deducted));

    let sent = fx.notifier.sent().await;
    assert_eq!(sent.len(), 1);
    assert!(matches!(
        &sent[0],
        Notification::LoanCompleted { loan_type: LoanType::Car, employee_id, .. }
            if employee_id == BORROWER
    ));
}

#[tokio::test]
async fn early_settlement_cancels_unneeded_installments() {
    let fx = fixture();
    let loan_id = seed_loan(&fx.store, LoanType::Housing, RequestStatus::Approved, 4, 1000).await;
    // Principal renegotiated down after the schedule was drawn up.
    fx.store
        .seed_request(RequestSnapshot {
            payload: RequestPayload::Loan {
                loan_amount: Decimal::from(2000),
            },
            ..fx
                .store
                .request(LoanType::Housing.request_type(), loan_id)
                .await
                .unwrap()
        })
        .await;

    let receipt = fx
        .ledger
        .apply_payment(payment(LoanType::Housing, loan_id, Decimal::from(2000)))
        .await
        .unwrap();

    assert!(receipt.loan_completed);
    assert_eq!(receipt.cancelled_entries, 2);
    let after = fx.store.schedule_for(LoanType::Housing, loan_id).await;
    assert_eq!(after[2].status, DeductionStatus::Cancelled);
    assert_eq!(after[3].status, DeductionStatus::Cancelled);
}

#[tokio::test]
async fn history_only_payment_leaves_the_schedule_alone() {
    let fx = fixture();
    let loan_id = seed_loan(&fx.store, LoanType::Salary, RequestStatus::Approved, 3, 1000).await;
    let before = fx.store.schedule_for(LoanType::Salary, loan_id).await;

    let mut command = payment(LoanType::Salary, loan_id, Decimal::new(75050, 2));
    command.skip_schedule_allocation = true;
    let receipt = fx.ledger.apply_payment(command).await.unwrap();

    assert!(receipt.touched_entries.is_empty());
    assert_eq!(receipt.unallocated_amount, Decimal::new(75050, 2));
    assert_eq!(fx.store.schedule_for(LoanType::Salary, loan_id).await, before);
    assert_eq!(fx.store.payments_for(LoanType::Salary, loan_id).await.len(), 1);
    assert!(fx.notifier.sent().await.is_empty());
}

#[tokio::test]
async fn payment_is_validated_before_anything_is_written() {
    let fx = fixture();
    let pending = seed_loan(&fx.store, LoanType::Car, RequestStatus::Pending, 3, 1000).await;
    let approved = seed_loan(&fx.store, LoanType::Car, RequestStatus::Approved, 3, 1000).await;

    assert!(matches!(
        fx.ledger
            .apply_payment(payment(LoanType::Car, approved, Decimal::ZERO))
            .await,
        Err(BenefitsError::InvalidInput(_))
    ));
    assert!(matches!(
        fx.ledger
            .apply_payment(payment(LoanType::Car, approved, Decimal::from(-5)))
            .await,
        Err(BenefitsError::InvalidInput(_))
    ));
    assert!(matches!(
        fx.ledger
            .apply_payment(payment(LoanType::Car, approved, Decimal::new(100005, 3)))
            .await,
        Err(BenefitsError::InvalidInput(_))
    ));
    assert!(matches!(
        fx.ledger
            .apply_payment(payment(LoanType::Car, Uuid::new_v4(), Decimal::from(100)))
            .await,
        Err(BenefitsError::NotFound(_))
    ));
    assert!(matches!(
        fx.ledger
            .apply_payment(payment(LoanType::Housing, approved, Decimal::from(100)))
            .await,
        Err(BenefitsError::NotFound(_))
    ));
    assert!(matches!(
        fx.ledger
            .apply_payment(payment(LoanType::Car, pending, Decimal::from(100)))
            .await,
        Err(BenefitsError::Conflict(_))
    ));

    assert!(fx.store.payments_for(LoanType::Car, approved).await.is_empty());
    assert!(fx.store.payments_for(LoanType::Car, pending).await.is_empty());
}

#[tokio::test]
async fn payment_amount_is_recorded_as_given() {
    let fx = fixture();
    let loan_id = seed_loan(&fx.store, LoanType::Car, RequestStatus::Approved, 3, 1000).await;
    let amount = Decimal::new(4505, 1); // 450.5

    let receipt = fx
        .ledger
        .apply_payment(payment(LoanType::Car, loan_id, amount))
        .await
        .unwrap();

    assert_eq!(receipt.payment_amount, amount);
    let history = fx.store.payments_for(LoanType::Car, loan_id).await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].payment_amount, amount);
    assert_eq!(history[0].payment_amount.to_string(), "450.5");
}

#[tokio::test]
async fn refresh_is_idempotent_and_respects_early_payments() {
    let fx = fixture();
    let loan_id = seed_loan(&fx.store, LoanType::Salary, RequestStatus::Approved, 6, 1000).await;
    fx.ledger
        .apply_payment(payment(LoanType::Salary, loan_id, Decimal::from(1500)))
        .await
        .unwrap();
    let early = fx.store.schedule_for(LoanType::Salary, loan_id).await;

    let as_of = date(2027, 4, 1);
    let first = fx.ledger.refresh_schedules(as_of).await.unwrap();
    assert_eq!(first.loans_scanned, 1);
    // March is deducted and April becomes pending. The early entries stay as they were.
    assert_eq!(first.entries_updated, 2);

    let schedule = fx.store.schedule_for(LoanType::Salary, loan_id).await;
    assert_eq!(schedule[0], early[0]);
    assert_eq!(schedule[1], early[1]);
    assert_eq!(schedule[1].status, DeductionStatus::PartiallyDeducted);
    assert_eq!(schedule[2].status, DeductionStatus::Deducted);
    assert_eq!(schedule[2].actual_deduction_date, Some(date(2027, 3, 15)));
    assert_eq!(schedule[3].status, DeductionStatus::Pending);
    assert_eq!(schedule[4].status, DeductionStatus::Upcoming);

    let second = fx.ledger.refresh_schedules(as_of).await.unwrap();
    assert_eq!(second.entries_updated, 0);
    assert_eq!(fx.store.schedule_for(LoanType::Salary, loan_id).await, schedule);
}

#[tokio::test]
async fn deducted_schedules_complete_their_loans() {
    let fx = fixture();
    let paid = seed_loan(&fx.store, LoanType::Housing, RequestStatus::Approved, 3, 1000).await;
    let running = seed_loan(&fx.store, LoanType::Salary, RequestStatus::Approved, 12, 500).await;

    fx.ledger.refresh_schedules(date(2027, 3, 31)).await.unwrap();
    let completed = fx.ledger.complete_loans_if_paid().await.unwrap();

    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].loan_id, paid);
    assert_eq!(completed[0].loan_type, LoanType::Housing);
    assert_eq!(
        fx.store
            .request(LoanType::Housing.request_type(), paid)
            .await
            .unwrap()
            .status,
        RequestStatus::Completed
    );
    assert_eq!(
        fx.store
            .request(LoanType::Salary.request_type(), running)
            .await
            .unwrap()
            .status,
        RequestStatus::Approved
    );

    assert!(fx.ledger.complete_loans_if_paid().await.unwrap().is_empty());
    assert_eq!(fx.notifier.sent().await.len(), 1);
}

#[tokio::test]
async fn concurrent_payments_never_share_an_installment() {
    let fx = fixture();
    let loan_id = seed_loan(&fx.store, LoanType::Car, RequestStatus::Approved, 4, 1000).await;

    let (left, right) = tokio::join!(
        fx.ledger
            .apply_payment(payment(LoanType::Car, loan_id, Decimal::from(1500))),
        fx.ledger
            .apply_payment(payment(LoanType::Car, loan_id, Decimal::from(1500)))
    );
    left.unwrap();
    right.unwrap();

    let schedule = fx.store.schedule_for(LoanType::Car, loan_id).await;
    let applied: Decimal = schedule
        .iter()
        .filter_map(|entry| entry.payment_amount)
        .sum();
    assert_eq!(applied, Decimal::from(3000));
    assert_eq!(
        schedule
            .iter()
            .map(|entry| entry.status)
            .collect::<Vec<_>>(),
        vec![
            DeductionStatus::Deducted,
            DeductionStatus::Deducted,
            DeductionStatus::Deducted,
            DeductionStatus::Upcoming,
        ]
    );
    assert_eq!(fx.store.payments_for(LoanType::Car, loan_id).await.len(), 2);
}

#[tokio::test]
async fn statement_reports_paid_and_outstanding() {
    let fx = fixture();
    let loan_id = seed_loan(&fx.store, LoanType::Salary, RequestStatus::Approved, 4, 1000).await;
    fx.ledger
        .apply_payment(payment(LoanType::Salary, loan_id, Decimal::from(1250)))
        .await
        .unwrap();

    let locks_before = fx.store.row_locks_taken().await;
    let statement = fx.ledger.statement(LoanType::Salary, loan_id).await.unwrap();
    assert_eq!(fx.store.row_locks_taken().await, locks_before);
    assert_eq!(statement.loan.loan_amount, Decimal::from(4000));
    assert_eq!(statement.entries.len(), 4);
    assert_eq!(statement.payments.len(), 1);
    assert_eq!(statement.total_paid, Decimal::from(1250));
    assert_eq!(statement.outstanding, Decimal::from(2750));

    assert!(matches!(
        fx.ledger.statement(LoanType::Salary, Uuid::new_v4()).await,
        Err(BenefitsError::NotFound(_))
    ));
}
