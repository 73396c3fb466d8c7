//! Read-only commands: `list` and `summary`.
//!
//! Both show the local list after it was reconciled with the backend. When the backend cannot be
//! reached they show the list as saved by the last command, with changes not yet sent applied.

use crate::commands::{Out, Workspace};
use crate::model::{Bill, BillFilter, DisplayStatus, Summary};
use crate::sync::Connectivity;
use crate::{Config, Mode, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// One line of `bills list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    /// The status the bill is shown with today.
    pub shown_as: DisplayStatus,
    #[serde(flatten)]
    pub bill: Bill,
}

/// Lists the bills matching `filter`.
pub async fn list(config: &Config, mode: Mode, filter: BillFilter) -> Result<Out<Vec<Row>>> {
    let workspace = Workspace::open(config, mode).await?;
    let out = list_in(&workspace, &filter);
    workspace.close().await?;
    Ok(out)
}

pub(crate) fn list_in(workspace: &Workspace, filter: &BillFilter) -> Out<Vec<Row>> {
    let engine = workspace.engine();
    let today = engine.today();
    let tiers = engine.settings().tiers;
    let bills = engine.list();
    let rows: Vec<Row> = filter
        .apply(&bills, today, tiers)
        .into_iter()
        .map(|bill| Row {
            shown_as: bill.display_status(today, tiers),
            bill: bill.clone(),
        })
        .collect();

    let mut message = format!("{} of {} bills{}", rows.len(), bills.len(), offline_note(workspace));
    for row in &rows {
        let fields = row.bill.fields();
        let installment = fields
            .installment()
            .map(|i| format!(" ({i})"))
            .unwrap_or_default();
        // Writing to a String cannot fail.
        let _ = write!(
            message,
            "\n{}{:<14} {:<9} {} {:>14}  {}{installment}",
            if row.bill.is_synced() { ' ' } else { '*' },
            row.bill.identity().to_string(),
            row.shown_as.to_string(),
            fields.due_date(),
            fields.amount().to_string(),
            fields.description(),
        );
    }
    Out::new(message, rows)
}

/// Counts and totals by status.
pub async fn summary(config: &Config, mode: Mode) -> Result<Out<Summary>> {
    let workspace = Workspace::open(config, mode).await?;
    let out = summary_in(&workspace);
    workspace.close().await?;
    Ok(out)
}

pub(crate) fn summary_in(workspace: &Workspace) -> Out<Summary> {
    let summary = workspace.engine().summary();
    let message = format!(
        "{} bills, {} total{}\n  paid:     {:>4}  {}\n  overdue:  {:>4}\n  due soon: {:>4}\n  \
        pending:  {:>4}\n  open:           {}",
        summary.total,
        summary.total_amount,
        offline_note(workspace),
        summary.paid,
        summary.paid_amount,
        summary.overdue,
        summary.due_soon,
        summary.pending,
        summary.open_amount,
    );
    Out::new(message, summary)
}

fn offline_note(workspace: &Workspace) -> &'static str {
    match workspace.connectivity() {
        Connectivity::Online => "",
        _ => " (offline, as of the last sync)",
    }
}
