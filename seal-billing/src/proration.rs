//! Calendar-month proration math.
//!
//! Reconciliation and cancellation credits use the calendar month
//! (`days_in_month`), NOT the escrow 28-day spending period; the two
//! formulations coexist on purpose. All division floors, in cents.

use chrono::{Datelike, NaiveDate};
use seal_common::amount::UsdCents;

/// Number of days in `date`'s calendar month.
pub fn days_in_month(date: NaiveDate) -> u32 {
    let (next_year, next_month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    let first_of_next = NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .expect("the 1st always exists");
    first_of_next
        .signed_duration_since(month_start(date))
        .num_days() as u32
}

/// The 1st of `date`'s month.
pub fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).expect("the 1st always exists")
}

/// The 1st of the following month.
pub fn next_month_start(date: NaiveDate) -> NaiveDate {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).expect("the 1st always exists")
}

/// Days of `date`'s month not used when usage stops at end of `date`'s day.
pub fn days_not_used(date: NaiveDate) -> u32 {
    days_in_month(date) - date.day()
}

/// `floor(amount * days / days_in_month(date))` in cents.
pub fn prorate(amount: UsdCents, days: u32, date: NaiveDate) -> UsdCents {
    let dim = i64::from(days_in_month(date));
    let cents = amount.cents() * i64::from(days) / dim;
    UsdCents::try_from_cents(cents).expect("floor of non-negative product")
}

/// The unused-month remainder credited when a charge reconciles late or a
/// cancellation is scheduled: `floor(amount * days_not_used / days_in_month)`.
pub fn unused_month_credit(amount: UsdCents, today: NaiveDate) -> UsdCents {
    prorate(amount, days_not_used(today), today)
}
