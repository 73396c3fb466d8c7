//! Update command handlers.

use crate::args::{EditArgs, NoteArgs, PayArgs};
use crate::commands::{refused, report, Out, Settled, Workspace};
use crate::model::{Bill, Identity};
use crate::sync::{Outcome, Ticket};
use crate::{Config, Error, ErrorType, Mode, Result};

/// Changes the fields given in `args` on one bill.
///
/// # Errors
///
/// - Returns a `NotFound` error if the id does not match any bill.
/// - Returns a `Validation` error if nothing would change or the result is invalid.
/// - Returns a `Network` error if the backend refused the change, which was then undone.
pub async fn edit(config: &Config, mode: Mode, args: EditArgs) -> Result<Out<Option<Bill>>> {
    let workspace = Workspace::open(config, mode).await?;
    let out = edit_in(&workspace, args).await;
    workspace.close().await?;
    out
}

pub(crate) async fn edit_in(workspace: &Workspace, args: EditArgs) -> Result<Out<Option<Bill>>> {
    let key = workspace.key(args.id())?;
    let ticket = workspace
        .engine()
        .update(&key, args.patch())
        .map_err(refused)?;
    finish(workspace, &key, "Updated", ticket).await
}

/// Changes a bill like `edit` and carries the description and notes over to the other installments
/// of its group.
pub async fn edit_group(config: &Config, mode: Mode, args: EditArgs) -> Result<Out<Vec<Bill>>> {
    let workspace = Workspace::open(config, mode).await?;
    let out = edit_group_in(&workspace, args).await;
    workspace.close().await?;
    out
}

pub(crate) async fn edit_group_in(workspace: &Workspace, args: EditArgs) -> Result<Out<Vec<Bill>>> {
    let engine = workspace.engine();
    let key = workspace.key(args.id())?;
    let group = engine.update_group(&key, args.patch()).map_err(refused)?;
    let count = group.len();
    let tickets = group.into_tickets();
    let targets: Vec<Identity> = tickets.iter().map(|t| t.target().clone()).collect();
    let mut failed = Vec::new();
    let mut queued = 0usize;
    for ticket in tickets {
        let target = ticket.target().clone();
        match workspace.settle(ticket).await {
            Settled::Done(Outcome::Failed(reason)) => failed.push(format!("{target}: {reason}")),
            Settled::Done(Outcome::AuthRejected) => {
                report("Updating the group", Settled::Done(Outcome::AuthRejected))?;
            }
            Settled::Queued => queued += 1,
            Settled::Done(_) => {}
        }
    }
    let bills: Vec<Bill> = targets.iter().filter_map(|t| engine.find(t)).collect();
    if failed.len() == count {
        return Err(Error::new(
            ErrorType::Network,
            anyhow::anyhow!("The changes were undone: {}", failed.join("; ")),
        ));
    }
    let mut message = format!("Updated {count} bills");
    if queued > 0 {
        message.push_str(&format!(", {queued} to be sent later"));
    }
    if !failed.is_empty() {
        message.push_str(&format!(", undone for {}", failed.join("; ")));
    }
    Ok(Out::new(message, bills))
}

/// Marks a bill paid, or not paid with `--undo`.
pub async fn pay(config: &Config, mode: Mode, args: PayArgs) -> Result<Out<Option<Bill>>> {
    let workspace = Workspace::open(config, mode).await?;
    let out = pay_in(&workspace, args).await;
    workspace.close().await?;
    out
}

pub(crate) async fn pay_in(workspace: &Workspace, args: PayArgs) -> Result<Out<Option<Bill>>> {
    let engine = workspace.engine();
    let key = workspace.key(args.id())?;
    if args.undo() {
        let ticket = engine.mark_unpaid(&key).map_err(refused)?;
        finish(workspace, &key, "Marked as not paid", ticket).await
    } else {
        let ticket = engine.mark_paid(&key, args.on()).map_err(refused)?;
        finish(workspace, &key, "Marked as paid", ticket).await
    }
}

/// Adds a note to a bill.
pub async fn note(config: &Config, mode: Mode, args: NoteArgs) -> Result<Out<Option<Bill>>> {
    let workspace = Workspace::open(config, mode).await?;
    let out = note_in(&workspace, args).await;
    workspace.close().await?;
    out
}

pub(crate) async fn note_in(workspace: &Workspace, args: NoteArgs) -> Result<Out<Option<Bill>>> {
    let key = workspace.key(args.id())?;
    let ticket = workspace
        .engine()
        .add_note(&key, args.text())
        .map_err(refused)?;
    finish(workspace, &key, "Added the note", ticket).await
}

async fn finish(
    workspace: &Workspace,
    key: &Identity,
    what: &str,
    ticket: Ticket,
) -> Result<Out<Option<Bill>>> {
    let settled = workspace.settle(ticket).await;
    let (message, bill) = report(&format!("{what} {key}"), settled)?;
    Ok(Out::new(message, bill.or_else(|| workspace.engine().find(key))))
}
