use crate::model::status::{DisplayStatus, StatusTiers};
use crate::model::{Amount, Bill};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Counts and totals of a set of bills, by display status.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Summary {
    pub total: usize,
    pub paid: usize,
    pub overdue: usize,
    pub due_soon: usize,
    pub pending: usize,
    pub total_amount: Amount,
    pub paid_amount: Amount,
    /// Everything not paid, whether overdue, due soon or pending.
    pub open_amount: Amount,
}

impl Summary {
    pub fn compute<'a>(
        bills: impl IntoIterator<Item = &'a Bill>,
        today: NaiveDate,
        tiers: StatusTiers,
    ) -> Self {
        let mut summary = Summary::default();
        for bill in bills {
            let amount = bill.fields().amount();
            summary.total += 1;
            summary.total_amount = summary.total_amount + amount;
            match bill.display_status(today, tiers) {
                DisplayStatus::Paid => {
                    summary.paid += 1;
                    summary.paid_amount = summary.paid_amount + amount;
                    continue;
                }
                DisplayStatus::Overdue => summary.overdue += 1,
                DisplayStatus::DueSoon => summary.due_soon += 1,
                DisplayStatus::Pending => summary.pending += 1,
            }
            summary.open_amount = summary.open_amount + amount;
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BillFields, BillId};
    use std::str::FromStr;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::from_str(s).unwrap()
    }

    fn bill(id: &str, amount: &str, due: &str, paid: bool) -> Bill {
        let mut fields = BillFields::new(id, Amount::from_str(amount).unwrap(), date(due));
        if paid {
            fields = fields.with_paid(date(due));
        }
        Bill::confirmed(BillId::new(id), fields)
    }

    #[test]
    fn test_compute() {
        let bills = vec![
            bill("1", "350.00", "2025-03-01", true),
            bill("2", "89.90", "2025-03-01", false),
            bill("3", "100.00", "2025-03-12", false),
            bill("4", "10.10", "2025-06-01", false),
        ];
        let summary = Summary::compute(&bills, date("2025-03-10"), StatusTiers::default());
        assert_eq!(summary.total, 4);
        assert_eq!(summary.paid, 1);
        assert_eq!(summary.overdue, 1);
        assert_eq!(summary.due_soon, 1);
        assert_eq!(summary.pending, 1);
        assert_eq!(summary.total_amount, Amount::from_str("550.00").unwrap());
        assert_eq!(summary.paid_amount, Amount::from_str("350.00").unwrap());
        assert_eq!(summary.open_amount, Amount::from_str("200.00").unwrap());
    }

    #[test]
    fn test_compute_empty() {
        let bills: Vec<Bill> = Vec::new();
        let summary = Summary::compute(&bills, date("2025-03-10"), StatusTiers::default());
        assert_eq!(summary, Summary::default());
    }
}
