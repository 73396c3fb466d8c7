//! Insert command handlers.

use crate::args::AddArgs;
use crate::commands::{refused, report, Out, Settled, Workspace};
use crate::model::{Bill, BillFields, Note};
use crate::sync::Outcome;
use crate::{Config, Error, ErrorType, Mode, Result};

/// Adds a bill, or `--installments` monthly installments splitting its amount.
///
/// The bill is in the local list at once. When the backend is reachable the command waits for it to
/// be saved there, otherwise it is saved in the journal and sent by a later command.
///
/// # Returns
///
/// On success, returns an `Out` containing the added bills as they are now, with the ids the
/// backend assigned if it was reached.
///
/// # Errors
///
/// - Returns a `Validation` error if the bill is invalid, e.g. the amount is not positive.
/// - Returns a `Network` error if the backend refused the bill, which was then removed again.
pub async fn add(config: &Config, mode: Mode, args: AddArgs) -> Result<Out<Vec<Bill>>> {
    let workspace = Workspace::open(config, mode).await?;
    let out = add_in(&workspace, args).await;
    workspace.close().await?;
    out
}

pub(crate) async fn add_in(workspace: &Workspace, args: AddArgs) -> Result<Out<Vec<Bill>>> {
    let engine = workspace.engine();
    let mut fields = BillFields::new(args.description(), args.amount(), args.due())
        .with_payment_method(args.method())
        .with_bank(args.bank());
    if let Some(note) = args.note().map(str::trim).filter(|n| !n.is_empty()) {
        fields = fields.with_note(Note::new(note, engine.clock().now()));
    }

    let Some(count) = args.installments() else {
        let ticket = engine.create(fields).map_err(refused)?;
        let target = ticket.target().clone();
        let settled = workspace.settle(ticket).await;
        let (message, bill) = report(&format!("Added {}", args.description()), settled)?;
        let bill = bill.or_else(|| engine.find(&target));
        return Ok(Out::new(message, bill.into_iter().collect()));
    };

    let group = engine
        .create_installments(fields, count)
        .map_err(refused)?;
    let tickets = group.into_tickets();
    let targets: Vec<_> = tickets.iter().map(|t| t.target().clone()).collect();
    let (mut synced, mut queued, mut failed) = (0usize, 0usize, Vec::new());
    for ticket in tickets {
        match workspace.settle(ticket).await {
            Settled::Done(Outcome::Synced(_)) => synced += 1,
            Settled::Queued => queued += 1,
            Settled::Done(Outcome::AuthRejected) => {
                report("Adding installments", Settled::Done(Outcome::AuthRejected))?;
            }
            Settled::Done(Outcome::Failed(reason)) => failed.push(reason),
            Settled::Done(Outcome::Deleted | Outcome::Cancelled) => {}
        }
    }
    let bills: Vec<Bill> = targets.iter().filter_map(|t| engine.find(t)).collect();
    if synced == 0 && queued == 0 {
        let reason = failed.first().cloned().unwrap_or_default();
        return Err(Error::new(
            ErrorType::Network,
            anyhow::anyhow!("No installment was saved: {reason}"),
        ));
    }
    let mut message = format!(
        "Added {count} installments of {}: {synced} saved",
        args.description()
    );
    if queued > 0 {
        message.push_str(&format!(", {queued} to be sent later"));
    }
    if !failed.is_empty() {
        message.push_str(&format!(", {} refused and removed", failed.len()));
    }
    Ok(Out::new(message, bills))
}
