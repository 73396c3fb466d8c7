//! Delete command handlers.

use crate::commands::{refused, report, Out, Workspace};
use crate::{Config, Mode, Result};

/// Deletes a bill by id.
///
/// A bill that was added offline and never reached the backend is simply dropped along with its
/// pending changes. If the backend refuses the delete the bill is put back where it was.
pub async fn delete(config: &Config, mode: Mode, id: &str) -> Result<Out<String>> {
    let workspace = Workspace::open(config, mode).await?;
    let out = delete_in(&workspace, id).await;
    workspace.close().await?;
    out
}

pub(crate) async fn delete_in(workspace: &Workspace, id: &str) -> Result<Out<String>> {
    let key = workspace.key(id)?;
    let ticket = workspace.engine().delete(&key).map_err(refused)?;
    let settled = workspace.settle(ticket).await;
    let (message, _) = report(&format!("Deleted {key}"), settled)?;
    Ok(Out::new(message, key.to_string()))
}
