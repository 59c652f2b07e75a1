use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::models::{DeductionEntry, DeductionStatus, PaymentStatus};

pub const EARLY_SETTLEMENT_NOTE: &str = "Cancelled: loan fully repaid ahead of schedule";

/// Slack allowed when comparing what has been paid against the principal.
pub fn completion_tolerance() -> Decimal {
    Decimal::new(1, 2) // 0.01
}

pub fn is_fully_paid(paid: Decimal, principal: Decimal) -> bool {
    paid >= principal - completion_tolerance()
}

/// Date-based status for an installment that has not been resolved by a payment.
/// Returns whether the entry changed.
pub fn refresh_entry(entry: &mut DeductionEntry, as_of: NaiveDate) -> bool {
    if entry.status.is_resolved() || entry.is_early_payment {
        return false;
    }

    let before = (entry.status, entry.actual_deduction_date);

    if entry.deduction_date <= as_of {
        entry.status = DeductionStatus::Deducted;
        if entry.actual_deduction_date.is_none() {
            entry.actual_deduction_date = Some(entry.deduction_date);
        }
    } else if entry.deduction_date.year() == as_of.year()
        && entry.deduction_date.month() == as_of.month()
    {
        entry.status = DeductionStatus::Pending;
    } else {
        entry.status = DeductionStatus::Upcoming;
    }

    before != (entry.status, entry.actual_deduction_date)
}

/// Scheduled amount of every installment deducted so far.
pub fn deducted_total(entries: &[DeductionEntry]) -> Decimal {
    entries
        .iter()
        .filter(|entry| entry.status == DeductionStatus::Deducted)
        .map(|entry| entry.amount)
        .sum()
}

/// Money actually applied, counting the scheduled amount where no payment was recorded.
pub fn total_paid(entries: &[DeductionEntry]) -> Decimal {
    entries
        .iter()
        .filter(|entry| {
            matches!(
                entry.status,
                DeductionStatus::Deducted | DeductionStatus::PartiallyDeducted
            )
        })
        .map(|entry| entry.payment_amount.unwrap_or(entry.amount))
        .sum()
}

#[derive(Debug, Clone, PartialEq)]
pub struct Allocation {
    /// Ids of every entry the payment modified, in schedule order.
    pub touched: Vec<Uuid>,
    pub unallocated: Decimal,
    pub loan_completed: bool,
    pub cancelled: usize,
}

/// Applies a lump payment to the schedule, earliest installment first.
///
/// A partially deducted installment is always completed before any later installment
/// receives funds. When the total paid reaches the principal, the remaining unresolved
/// installments are cancelled in place.
pub fn allocate_payment(
    entries: &mut [DeductionEntry],
    principal: Decimal,
    amount: Decimal,
    paid_on: NaiveDate,
    notes: Option<&str>,
) -> Allocation {
    entries.sort_by_key(|entry| entry.deduction_date);

    let mut touched: Vec<Uuid> = Vec::new();
    let mut remaining = amount;
    let note = notes.map(str::to_string);

    if let Some(entry) = entries
        .iter_mut()
        .find(|entry| entry.status == DeductionStatus::PartiallyDeducted)
    {
        let already_paid = entry.payment_amount.unwrap_or(Decimal::ZERO);
        let owed = entry.amount - already_paid;

        if remaining >= owed {
            entry.status = DeductionStatus::Deducted;
            entry.payment_status = Some(PaymentStatus::FullyPaid);
            entry.payment_amount = Some(entry.amount);
            remaining -= owed;
        } else {
            entry.payment_amount = Some(already_paid + remaining);
            entry.payment_status = Some(PaymentStatus::PartiallyPaid);
            remaining = Decimal::ZERO;
        }
        if note.is_some() {
            entry.payment_notes = note.clone();
        }
        touched.push(entry.id);
    }

    while remaining > Decimal::ZERO {
        let Some(entry) = entries.iter_mut().find(|entry| !entry.status.is_resolved()) else {
            break;
        };

        entry.actual_deduction_date = Some(paid_on);
        entry.is_early_payment = true;
        if note.is_some() {
            entry.payment_notes = note.clone();
        }

        if remaining >= entry.amount {
            entry.status = DeductionStatus::Deducted;
            entry.payment_status = Some(PaymentStatus::FullyPaid);
            entry.payment_amount = Some(entry.amount);
            remaining -= entry.amount;
        } else {
            entry.status = DeductionStatus::PartiallyDeducted;
            entry.payment_status = Some(PaymentStatus::PartiallyPaid);
            entry.payment_amount = Some(remaining);
            remaining = Decimal::ZERO;
        }
        touched.push(entry.id);
    }

    let loan_completed = is_fully_paid(total_paid(entries), principal);
    let mut cancelled = 0;

    if loan_completed {
        for entry in entries.iter_mut().filter(|entry| {
            matches!(
                entry.status,
                DeductionStatus::Upcoming | DeductionStatus::Pending
            )
        }) {
            entry.status = DeductionStatus::Cancelled;
            entry.payment_notes = Some(EARLY_SETTLEMENT_NOTE.to_string());
            cancelled += 1;
            if !touched.contains(&entry.id) {
                touched.push(entry.id);
            }
        }
    }

    Allocation {
        touched,
        unallocated: remaining,
        loan_completed,
        cancelled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    fn refresh_all(entries: &mut [DeductionEntry], as_of: NaiveDate) -> usize {
        entries
            .iter_mut()
            .map(|entry| refresh_entry(entry, as_of))
            .filter(|changed| *changed)
            .count()
    }

    fn monthly_schedule(count: u32, amount: i64) -> Vec<DeductionEntry> {
        let loan_id = Uuid::new_v4();
        (1..=count)
            .map(|month| {
                DeductionEntry::scheduled(loan_id, date(2027, month, 15), Decimal::from(amount))
            })
            .collect()
    }

    #[test]
    fn waterfall_fills_earliest_installments_first() {
        let mut entries = monthly_schedule(12, 1000);
        let allocation = allocate_payment(
            &mut entries,
            Decimal::from(12000),
            Decimal::from(2500),
            date(2026, 10, 19),
            None,
        );

        assert_eq!(allocation.touched.len(), 3);
        assert!(!allocation.loan_completed);
        assert_eq!(allocation.unallocated, Decimal::ZERO);

        assert_eq!(entries[0].status, DeductionStatus::Deducted);
        assert_eq!(entries[1].status, DeductionStatus::Deducted);
        assert_eq!(entries[0].payment_amount, Some(Decimal::from(1000)));
        assert_eq!(entries[2].status, DeductionStatus::PartiallyDeducted);
        assert_eq!(entries[2].payment_amount, Some(Decimal::from(500)));
        assert_eq!(entries[2].payment_status, Some(PaymentStatus::PartiallyPaid));
        assert!(entries[2].is_early_payment);
        assert_eq!(entries[2].actual_deduction_date, Some(date(2026, 10, 19)));
        for entry in &entries[3..] {
            assert_eq!(entry.status, DeductionStatus::Upcoming);
            assert_eq!(entry.payment_amount, None);
        }
    }

    #[test]
    fn partial_installment_is_completed_before_later_ones() {
        let mut entries = monthly_schedule(12, 1000);
        let principal = Decimal::from(12000);
        allocate_payment(&mut entries, principal, Decimal::from(2500), date(2026, 10, 19), None);

        let allocation = allocate_payment(
            &mut entries,
            principal,
            Decimal::from(500),
            date(2026, 10, 20),
            Some("top-up"),
        );

        assert_eq!(allocation.touched, vec![entries[2].id]);
        assert_eq!(entries[2].status, DeductionStatus::Deducted);
        assert_eq!(entries[2].payment_amount, Some(Decimal::from(1000)));
        assert_eq!(entries[2].payment_status, Some(PaymentStatus::FullyPaid));
        assert_eq!(entries[2].payment_notes.as_deref(), Some("top-up"));
        assert_eq!(entries[3].status, DeductionStatus::Upcoming);
        assert_eq!(entries[3].payment_amount, None);
    }

    #[test]
    fn small_payment_tops_up_partial_without_touching_next() {
        let mut entries = monthly_schedule(3, 1000);
        let principal = Decimal::from(3000);
        allocate_payment(&mut entries, principal, Decimal::from(1200), date(2026, 10, 1), None);
        allocate_payment(&mut entries, principal, Decimal::from(300), date(2026, 10, 2), None);

        assert_eq!(entries[1].status, DeductionStatus::PartiallyDeducted);
        assert_eq!(entries[1].payment_amount, Some(Decimal::from(500)));
        assert_eq!(entries[2].status, DeductionStatus::Upcoming);
    }

    #[test]
    fn settling_principal_completes_and_cancels_the_rest() {
        let mut entries = monthly_schedule(4, 1000);
        entries[0].status = DeductionStatus::Deducted;
        entries[0].actual_deduction_date = Some(entries[0].deduction_date);

        let allocation = allocate_payment(
            &mut entries,
            Decimal::new(300001, 2),
            Decimal::from(3000),
            date(2026, 10, 19),
            None,
        );

        assert!(allocation.loan_completed);
        assert_eq!(allocation.cancelled, 0);
        assert!(entries.iter().all(|entry| entry.status == DeductionStatus::Deducted));
    }

    #[test]
    fn completion_cancels_installments_the_principal_no_longer_needs() {
        let mut entries = monthly_schedule(4, 1000);
        let allocation = allocate_payment(
            &mut entries,
            Decimal::from(2000),
            Decimal::from(2000),
            date(2026, 10, 19),
            None,
        );

        assert!(allocation.loan_completed);
        assert_eq!(allocation.cancelled, 2);
        assert_eq!(allocation.touched.len(), 4);
        assert_eq!(entries[2].status, DeductionStatus::Cancelled);
        assert_eq!(entries[3].payment_notes.as_deref(), Some(EARLY_SETTLEMENT_NOTE));
    }

    #[test]
    fn overpayment_is_reported_as_unallocated() {
        let mut entries = monthly_schedule(2, 1000);
        let allocation = allocate_payment(
            &mut entries,
            Decimal::from(2000),
            Decimal::from(2600),
            date(2026, 10, 19),
            None,
        );

        assert!(allocation.loan_completed);
        assert_eq!(allocation.unallocated, Decimal::from(600));
    }

    #[test]
    fn refresh_classifies_by_date() {
        let as_of = date(2027, 3, 10);
        let mut entries = monthly_schedule(5, 1000);

        let changed: Vec<bool> = entries
            .iter_mut()
            .map(|entry| refresh_entry(entry, as_of))
            .collect();

        assert_eq!(changed, vec![true, true, true, false, false]);
        assert_eq!(entries[0].status, DeductionStatus::Deducted);
        assert_eq!(entries[0].actual_deduction_date, Some(date(2027, 1, 15)));
        assert_eq!(entries[1].status, DeductionStatus::Deducted);
        assert_eq!(entries[2].status, DeductionStatus::Pending);
        assert_eq!(entries[3].status, DeductionStatus::Upcoming);
    }

    #[test]
    fn refresh_is_idempotent_and_skips_early_payments() {
        let as_of = date(2027, 6, 30);
        let mut entries = monthly_schedule(8, 1000);
        allocate_payment(
            &mut entries,
            Decimal::from(8000),
            Decimal::from(1500),
            date(2026, 12, 1),
            None,
        );

        let first = refresh_all(&mut entries, as_of);
        let snapshot = entries.clone();
        let second = refresh_all(&mut entries, as_of);

        assert_eq!(first, 4);
        assert_eq!(second, 0);
        assert_eq!(entries, snapshot);
        assert_eq!(entries[0].actual_deduction_date, Some(date(2026, 12, 1)));
        assert_eq!(entries[1].status, DeductionStatus::PartiallyDeducted);
    }

    #[test]
    fn pending_entry_returns_to_deducted_when_its_date_passes() {
        let mut entry =
            DeductionEntry::scheduled(Uuid::new_v4(), date(2027, 3, 20), Decimal::from(400));
        assert!(refresh_entry(&mut entry, date(2027, 3, 1)));
        assert_eq!(entry.status, DeductionStatus::Pending);
        assert!(refresh_entry(&mut entry, date(2027, 3, 20)));
        assert_eq!(entry.status, DeductionStatus::Deducted);
    }

    #[test]
    fn totals_follow_their_own_rules() {
        let mut entries = monthly_schedule(3, 1000);
        entries[0].status = DeductionStatus::Deducted;
        entries[1].status = DeductionStatus::PartiallyDeducted;
        entries[1].payment_amount = Some(Decimal::from(250));

        assert_eq!(deducted_total(&entries), Decimal::from(1000));
        assert_eq!(total_paid(&entries), Decimal::from(1250));
        assert!(is_fully_paid(Decimal::new(99999, 2), Decimal::from(1000)));
        assert!(!is_fully_paid(Decimal::new(99998, 2), Decimal::from(1000)));
    }
}
