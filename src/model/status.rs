//! Derives the status a bill is shown with from its payment state and due date.

use crate::model::bill::{Bill, PaymentStatus};
use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

/// Default number of days ahead of today that counts as "due soon".
pub const DEFAULT_DUE_SOON_DAYS: u32 = 15;

/// The status a bill is displayed with. This is never stored, it is recomputed from the bill's
/// `PaymentStatus`, its due date and today's date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayStatus {
    Overdue,
    DueSoon,
    Pending,
    Paid,
}

serde_plain::derive_display_from_serialize!(DisplayStatus);
serde_plain::derive_fromstr_from_deserialize!(DisplayStatus);

/// Which status tiers are in effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusTiers {
    /// `None` disables the due-soon tier, such bills are shown as pending.
    pub due_soon_days: Option<u32>,
}

impl StatusTiers {
    pub const fn new(due_soon_days: Option<u32>) -> Self {
        Self { due_soon_days }
    }

    /// Only paid, overdue and pending.
    pub const fn without_due_soon() -> Self {
        Self {
            due_soon_days: None,
        }
    }
}

impl Default for StatusTiers {
    fn default() -> Self {
        Self {
            due_soon_days: Some(DEFAULT_DUE_SOON_DAYS),
        }
    }
}

/// Classifies `bill` relative to `today`. Only calendar dates are compared.
pub fn classify(bill: &Bill, today: NaiveDate, tiers: StatusTiers) -> DisplayStatus {
    classify_parts(bill.fields().status(), bill.fields().due_date(), today, tiers)
}

pub(crate) fn classify_parts(
    status: PaymentStatus,
    due_date: NaiveDate,
    today: NaiveDate,
    tiers: StatusTiers,
) -> DisplayStatus {
    if status == PaymentStatus::Paid {
        return DisplayStatus::Paid;
    }
    if due_date <= today {
        return DisplayStatus::Overdue;
    }
    if let Some(days) = tiers.due_soon_days {
        // A date so far in the future that adding overflows is certainly not due soon.
        if let Some(horizon) = today.checked_add_days(Days::new(u64::from(days))) {
            if due_date <= horizon {
                return DisplayStatus::DueSoon;
            }
        }
    }
    DisplayStatus::Pending
}
