//! Session command handlers.
//!
//! This module implements the CLI commands for:
//! - `bills login` - Store the bearer token and check it against the backend
//! - `bills logout` - Forget the token and anything not yet sent

use crate::commands::{Out, Workspace};
use crate::error::{ErrorType, IntoResult};
use crate::sync::{Connectivity, Journal};
use crate::{Config, Mode, Result};
use tracing::debug;

/// Handles the `bills login` command.
///
/// The token is saved to the secrets directory and then used to probe the backend. A token the
/// backend rejects is not kept. When the backend cannot be reached the token is kept unchecked.
///
/// # Errors
/// Returns an `Auth` error if the backend rejects the token.
pub async fn login(config: &Config, mode: Mode, token: &str) -> Result<Out<Connectivity>> {
    let token = token.trim();
    if token.is_empty() {
        return Err(anyhow::anyhow!("The token cannot be empty")).pub_result(ErrorType::Validation);
    }
    config.save_token(token).await.pub_result(ErrorType::Config)?;
    debug!("Saved the token to {}", config.token_path().display());

    // A rejected token makes `open` remove it again.
    let workspace = Workspace::open(config, mode).await?;
    let connectivity = workspace.connectivity();
    let count = workspace.engine().list().len();
    workspace.close().await?;
    let message = match connectivity {
        Connectivity::Online => format!("Logged in, {count} bills"),
        _ => "Saved the token, the backend could not be reached to check it".to_string(),
    };
    Ok(Out::new(message, connectivity))
}

/// Handles the `bills logout` command. Changes that were not sent yet are dropped.
pub async fn logout(config: &Config) -> Result<Out<()>> {
    let pending = Journal::load(&config.journal_path())
        .await
        .pub_result(ErrorType::Config)?
        .map(|journal| journal.tasks().len())
        .unwrap_or_default();
    config.remove_token().await.pub_result(ErrorType::Config)?;
    Journal::remove(&config.journal_path())
        .await
        .pub_result(ErrorType::Config)?;
    let message = match pending {
        0 => "Logged out".to_string(),
        n => format!("Logged out, {n} changes that were not sent have been dropped"),
    };
    Ok(message.into())
}
