//! Command handlers for the bills CLI.
//!
//! This module contains implementations for all CLI subcommands. Every command that touches bills
//! opens a `Workspace`: the sync engine with the changes saved by earlier commands loaded, probed
//! against the backend. Closing it saves whatever could not be sent.

mod auth;
mod delete;
mod init;
mod insert;
mod query;
mod serve;
mod sync;
mod update;

use crate::api::{self, BillApi, SessionProvider, StaticSession};
use crate::error::{ErrorType, IntoResult};
use crate::model::{Bill, Identity};
use crate::sync::{Connectivity, Journal, LogObserver, Outcome, SyncEngine, SystemClock, Ticket};
use crate::{Config, Error, Mode, Result};
use futures::FutureExt;
use serde::Serialize;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub use auth::{login, logout};
pub use delete::delete;
pub use init::init;
pub use insert::add;
pub use query::{list, summary};
pub use serve::serve;
pub use sync::{sync, watch, SyncStatus};
pub use update::{edit, edit_group, note, pay};

/// The token used when running against the in-memory API without having logged in.
const TEST_MODE_TOKEN: &str = "test";

/// How often a command waiting on a write checks that the engine can still send it.
const SETTLE_CHECK: Duration = Duration::from_millis(250);

/// The output type for a command. This allows the command to return a consistent message and,
/// optionally, structured data.
#[derive(Debug, Clone, Serialize)]
pub struct Out<T>
where
    T: Serialize + Clone + Debug,
{
    /// A message that can be printed to the user regarding the outcome of the command execution.
    message: String,

    /// Any structured data that needs to be output from the call.
    structure: Option<T>,
}

impl<T, S> From<S> for Out<T>
where
    T: Debug + Clone + Serialize,
    S: Into<String>,
{
    fn from(value: S) -> Self {
        Out::new_message(value)
    }
}

impl<T> Out<T>
where
    T: Serialize + Clone + Debug,
{
    /// Create a new `Out` object that has `Some(structure)`.
    pub fn new<S>(message: S, structure: T) -> Self
    where
        S: Into<String>,
    {
        Self {
            message: message.into(),
            structure: Some(structure),
        }
    }

    /// Create a new `Out` object that has `None` for `structure`.
    pub fn new_message<S>(message: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            message: message.into(),
            structure: None,
        }
    }

    /// Get the `message`.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the structured data stored in `structure`.
    pub fn structure(&self) -> Option<&T> {
        self.structure.as_ref()
    }

    /// Print the message to `info!` and the structured data (if it exists) as JSON to `debug!`.
    pub fn print(&self) {
        info!("{}", self.message);
        if let Some(structure) = self.structure() {
            if let Ok(json) = serde_json::to_string_pretty(structure) {
                debug!("Command output:\n\n{json}\n\n");
            }
        }
    }
}

/// What became of a change by the time the command finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Settled {
    Done(Outcome),
    /// The backend could not be reached, the change is saved and will be sent later.
    Queued,
}

/// The sync engine for the duration of one command.
pub(crate) struct Workspace {
    config: Config,
    engine: SyncEngine,
    connectivity: Connectivity,
    /// Changes loaded from the journal.
    loaded: usize,
}

impl Workspace {
    /// Connects to the backend selected by `mode` with the stored token.
    pub(crate) async fn open(config: &Config, mode: Mode) -> Result<Self> {
        let token = config.load_token().await.pub_result(ErrorType::Config)?;
        let token = match (token, mode) {
            (Some(token), _) => token,
            (None, Mode::Test) => TEST_MODE_TOKEN.to_string(),
            (None, Mode::Http) => {
                return Err(anyhow::anyhow!(
                    "You are not logged in, run 'bills login --token <TOKEN>' first"
                ))
                .pub_result(ErrorType::Auth)
            }
        };
        let session = Arc::new(StaticSession::new(Some(token)));
        let api = api::bill_api(config, session.clone(), mode).pub_result(ErrorType::Config)?;
        Self::connect(config, api, session).await
    }

    /// Loads the saved changes into an engine over `api` and probes the backend.
    pub(crate) async fn connect(
        config: &Config,
        api: Arc<dyn BillApi>,
        session: Arc<dyn SessionProvider>,
    ) -> Result<Self> {
        let engine = SyncEngine::new(
            api,
            session,
            Arc::new(SystemClock),
            Arc::new(LogObserver),
            config.sync_settings(),
        );
        let journal = Journal::load(&config.journal_path())
            .await
            .pub_result(ErrorType::Config)?;
        let mut loaded = 0;
        if let Some(journal) = journal {
            loaded = journal.tasks().len();
            debug!(
                "Loaded {} pending changes saved at {}",
                journal.tasks().len(),
                journal.saved_at()
            );
            engine.import(journal);
        }
        let connectivity = engine.probe().await;
        debug!("The backend is {connectivity}");
        if connectivity == Connectivity::Unauthorized {
            // The engine dropped everything it had, so must we.
            config.remove_token().await.pub_result(ErrorType::Config)?;
            Journal::remove(&config.journal_path())
                .await
                .pub_result(ErrorType::Config)?;
            return Err(Error::new(ErrorType::Auth, session_rejected()));
        }
        Ok(Self {
            config: config.clone(),
            engine,
            connectivity,
            loaded,
        })
    }

    pub(crate) fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    pub(crate) fn connectivity(&self) -> Connectivity {
        self.connectivity
    }

    /// The number of changes saved by earlier commands when this one started.
    pub(crate) fn loaded(&self) -> usize {
        self.loaded
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    /// Finds the bill a user-typed id refers to.
    pub(crate) fn key(&self, id: &str) -> Result<Identity> {
        self.engine
            .resolve(id)
            .ok_or_else(|| anyhow::anyhow!("There is no bill with the id '{id}'"))
            .pub_result(ErrorType::NotFound)
    }

    /// Waits for the backend's answer to a change, unless the change cannot be sent right now.
    pub(crate) async fn settle(&self, ticket: Ticket) -> Settled {
        let outcome = ticket.outcome();
        tokio::pin!(outcome);
        let mut check = tokio::time::interval(SETTLE_CHECK);
        loop {
            tokio::select! {
                outcome = &mut outcome => return Settled::Done(outcome),
                _ = check.tick() => {
                    if !self.engine.can_sync() {
                        return match (&mut outcome).now_or_never() {
                            Some(outcome) => Settled::Done(outcome),
                            None => Settled::Queued,
                        };
                    }
                }
            }
        }
    }

    /// Waits for a drain still running in the background, then saves what is left to send.
    ///
    /// A drain that outlasts the request timeout is told to stop, and the writes it has out are
    /// awaited. They could have reached the backend already, so they are never saved for later.
    pub(crate) async fn close(self) -> Result<()> {
        let deadline = Instant::now() + self.config.request_timeout();
        while self.engine.is_draining() && Instant::now() < deadline {
            tokio::time::sleep(SETTLE_CHECK).await;
        }
        if self.engine.is_draining() {
            debug!("Stopping the drain, waiting for the writes it has out");
            self.engine.set_offline();
            while self.engine.is_draining() {
                tokio::time::sleep(SETTLE_CHECK).await;
            }
        }
        let path = self.config.journal_path();
        let journal = self.engine.export();
        if journal.is_empty() {
            Journal::remove(&path).await.pub_result(ErrorType::Config)?;
        } else {
            info!(
                "{} changes will be sent the next time the backend is reachable",
                journal.tasks().len()
            );
            journal.save(&path).await.pub_result(ErrorType::Config)?;
        }
        Ok(())
    }
}

/// Turns the fate of a change into the command's result. `what` describes the change, e.g.
/// "Added RENT".
pub(crate) fn report(what: &str, settled: Settled) -> Result<(String, Option<Bill>)> {
    match settled {
        Settled::Done(Outcome::Synced(bill)) => {
            Ok((format!("{what}, saved as {}", bill.identity()), Some(bill)))
        }
        Settled::Done(Outcome::Deleted) => Ok((format!("{what}, removed from the backend"), None)),
        Settled::Done(Outcome::Cancelled) => {
            Ok((format!("{what}, it had not been sent yet"), None))
        }
        Settled::Queued => Ok((
            format!("{what}, the backend is unreachable so it will be sent later"),
            None,
        )),
        Settled::Done(Outcome::Failed(reason)) => {
            warn!("{what}, but the backend refused it: {reason}");
            Err(Error::new(
                ErrorType::Network,
                anyhow::anyhow!("The change was undone: {reason}"),
            ))
        }
        Settled::Done(Outcome::AuthRejected) => Err(Error::new(ErrorType::Auth, session_rejected())),
    }
}

fn session_rejected() -> anyhow::Error {
    anyhow::anyhow!("The backend rejected your session, run 'bills login --token <TOKEN>' again")
}

/// The public error for a change the engine refused to make.
pub(crate) fn refused(e: crate::sync::MutationError) -> Error {
    use crate::sync::MutationError;
    let error_type = match &e {
        MutationError::Invalid(_) => ErrorType::Validation,
        MutationError::NotFound(_) => ErrorType::NotFound,
        MutationError::SessionExpired => ErrorType::Auth,
    };
    Error::new(error_type, e)
}
