//! Client-side filtering and sorting of the bill list.

use crate::model::status::{DisplayStatus, StatusTiers};
use crate::model::Bill;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// A calendar month, written as `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Month {
    year: i32,
    month: u32,
}

impl Month {
    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date.year() == self.year && date.month() == self.month
    }
}

impl FromStr for Month {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (year, month) = s
            .trim()
            .split_once('-')
            .ok_or_else(|| anyhow::anyhow!("Expected a month like 2025-03, got '{s}'"))?;
        let year: i32 = year.parse()?;
        let month: u32 = month.parse()?;
        if !(1..=12).contains(&month) {
            anyhow::bail!("Month must be between 1 and 12, got {month}");
        }
        Ok(Self { year, month })
    }
}

impl Display for Month {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// The order bills are listed in.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    /// Keep the order of the local store.
    Stored,
    #[default]
    DueDate,
    Amount,
    Description,
}

serde_plain::derive_display_from_serialize!(SortKey);
serde_plain::derive_fromstr_from_deserialize!(SortKey);

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BillFilter {
    pub status: Option<DisplayStatus>,
    /// Case-insensitive match against description, payment method and bank.
    pub search: Option<String>,
    /// Bills due in this month.
    pub month: Option<Month>,
    pub sort: SortKey,
    pub descending: bool,
}

impl BillFilter {
    pub fn matches(&self, bill: &Bill, today: NaiveDate, tiers: StatusTiers) -> bool {
        if let Some(status) = self.status {
            if bill.display_status(today, tiers) != status {
                return false;
            }
        }
        if let Some(month) = self.month {
            if !month.contains(bill.fields().due_date()) {
                return false;
            }
        }
        if let Some(search) = self.search.as_deref() {
            let needle = search.trim().to_lowercase();
            if !needle.is_empty() {
                let fields = bill.fields();
                let found = [fields.description(), fields.payment_method(), fields.bank()]
                    .iter()
                    .any(|hay| hay.to_lowercase().contains(&needle));
                if !found {
                    return false;
                }
            }
        }
        true
    }

    /// Returns the matching bills in the requested order.
    pub fn apply<'a>(
        &self,
        bills: &'a [Bill],
        today: NaiveDate,
        tiers: StatusTiers,
    ) -> Vec<&'a Bill> {
        let mut out: Vec<&Bill> = bills
            .iter()
            .filter(|bill| self.matches(bill, today, tiers))
            .collect();
        match self.sort {
            SortKey::Stored => {}
            SortKey::DueDate => out.sort_by_key(|b| b.fields().due_date()),
            SortKey::Amount => out.sort_by_key(|b| b.fields().amount()),
            SortKey::Description => out.sort_by_key(|b| b.fields().description().to_lowercase()),
        }
        if self.descending {
            out.reverse();
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Amount, BillFields, BillId};

    fn date(s: &str) -> NaiveDate {
        NaiveDate::from_str(s).unwrap()
    }

    fn bills() -> Vec<Bill> {
        vec![
            Bill::confirmed(
                BillId::new("1"),
                BillFields::new("ENERGY", Amount::from_str("350").unwrap(), date("2025-04-10"))
                    .with_bank("BANK A"),
            ),
            Bill::confirmed(
                BillId::new("2"),
                BillFields::new("phone", Amount::from_str("89.90").unwrap(), date("2025-03-05"))
                    .with_payment_method("DEBIT"),
            ),
            Bill::confirmed(
                BillId::new("3"),
                BillFields::new("Rent", Amount::from_str("1200").unwrap(), date("2025-03-20")),
            ),
        ]
    }

    fn ids(bills: &[&Bill]) -> Vec<String> {
        bills
            .iter()
            .map(|b| b.identity().to_string())
            .collect()
    }

    #[test]
    fn test_month_parse() {
        let month = Month::from_str("2025-03").unwrap();
        assert_eq!(month.to_string(), "2025-03");
        assert!(month.contains(date("2025-03-31")));
        assert!(!month.contains(date("2025-04-01")));
        assert!(Month::from_str("2025-13").is_err());
        assert!(Month::from_str("march").is_err());
    }

    #[test]
    fn test_default_sorts_by_due_date() {
        let bills = bills();
        let out = BillFilter::default().apply(&bills, date("2025-03-10"), StatusTiers::default());
        assert_eq!(ids(&out), vec!["2", "3", "1"]);
    }

    #[test]
    fn test_filter_by_status_and_search() {
        let bills = bills();
        let today = date("2025-03-10");
        let overdue = BillFilter {
            status: Some(DisplayStatus::Overdue),
            ..Default::default()
        };
        assert_eq!(
            ids(&overdue.apply(&bills, today, StatusTiers::default())),
            vec!["2"]
        );

        let search = BillFilter {
            search: Some("bank a".to_string()),
            ..Default::default()
        };
        assert_eq!(
            ids(&search.apply(&bills, today, StatusTiers::default())),
            vec!["1"]
        );
    }

    #[test]
    fn test_filter_by_month_sorted_by_amount_descending() {
        let bills = bills();
        let filter = BillFilter {
            month: Some(Month::from_str("2025-03").unwrap()),
            sort: SortKey::Amount,
            descending: true,
            ..Default::default()
        };
        let out = filter.apply(&bills, date("2025-03-10"), StatusTiers::default());
        assert_eq!(ids(&out), vec!["3", "2"]);
    }
}
