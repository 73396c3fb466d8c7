//! `bills sync` sends what earlier commands could not, `bills watch` keeps doing so until stopped.

use crate::commands::{session_rejected, Out, Workspace, SETTLE_CHECK};
use crate::error::{ErrorType, IntoResult};
use crate::sync::{Connectivity, Journal};
use crate::{Config, Error, Mode, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use tracing::{debug, info};

/// Where syncing stands when the command finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub connectivity: Connectivity,
    /// Saved changes that reached the backend during this command.
    pub sent: usize,
    /// Changes still waiting for the backend.
    pub pending: usize,
    /// Bills in the local list.
    pub bills: usize,
}

impl SyncStatus {
    fn of(workspace: &Workspace, connectivity: Connectivity) -> Self {
        let engine = workspace.engine();
        let pending = engine.pending_count();
        Self {
            connectivity,
            sent: workspace.loaded().saturating_sub(pending),
            pending,
            bills: engine.list().len(),
        }
    }

    fn message(&self) -> String {
        match self.connectivity {
            Connectivity::Online if self.pending == 0 => format!(
                "In sync, {} bills, sent {} saved changes",
                self.bills, self.sent
            ),
            Connectivity::Online => format!(
                "Sent {} saved changes, {} are still waiting to be retried",
                self.sent, self.pending
            ),
            _ => format!(
                "The backend is unreachable, {} changes will be sent later",
                self.pending
            ),
        }
    }
}

/// Reconciles with the backend and sends the changes saved by earlier commands.
pub async fn sync(config: &Config, mode: Mode) -> Result<Out<SyncStatus>> {
    let workspace = Workspace::open(config, mode).await?;
    let out = sync_in(&workspace).await;
    workspace.close().await?;
    Ok(out)
}

pub(crate) async fn sync_in(workspace: &Workspace) -> Out<SyncStatus> {
    let engine = workspace.engine();
    // Opening the workspace already probed, this sends anything queued since.
    let connectivity = if engine.pending_count() > 0 {
        engine.probe().await
    } else {
        workspace.connectivity()
    };
    let status = SyncStatus::of(workspace, connectivity);
    Out::new(status.message(), status)
}

/// Watches the backend, sending changes whenever it is reachable, until ctrl-c.
pub async fn watch(config: &Config, mode: Mode) -> Result<Out<SyncStatus>> {
    let workspace = Workspace::open(config, mode).await?;
    info!("Watching the backend, press ctrl-c to stop");
    watch_until(workspace, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            debug!("Unable to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    })
    .await
}

/// Runs the connectivity monitor until `stop` completes or the backend rejects the session.
pub(crate) async fn watch_until<F>(workspace: Workspace, stop: F) -> Result<Out<SyncStatus>>
where
    F: Future<Output = ()>,
{
    let monitor = workspace.engine().start_monitor();
    tokio::pin!(stop);
    let mut check = tokio::time::interval(SETTLE_CHECK);
    loop {
        tokio::select! {
            _ = &mut stop => break,
            _ = check.tick() => {
                if monitor.is_finished() {
                    break;
                }
            }
        }
    }
    monitor.stop();

    if workspace.engine().is_halted() {
        let config = workspace.config();
        config.remove_token().await.pub_result(ErrorType::Config)?;
        Journal::remove(&config.journal_path())
            .await
            .pub_result(ErrorType::Config)?;
        return Err(Error::new(ErrorType::Auth, session_rejected()));
    }

    let connectivity = if workspace.engine().is_online() {
        Connectivity::Online
    } else {
        Connectivity::Offline
    };
    let status = SyncStatus::of(&workspace, connectivity);
    workspace.close().await?;
    Ok(Out::new(status.message(), status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Failure, FailureKind, OpKind, TestBillApi};
    use crate::args::AddArgs;
    use crate::commands::insert::add_in;
    use crate::model::Amount;
    use crate::test::TestEnv;
    use chrono::NaiveDate;
    use std::str::FromStr;
    use std::sync::Arc;

    fn rent() -> AddArgs {
        AddArgs::new(
            "RENT",
            Amount::from_str("1200").unwrap(),
            NaiveDate::from_ymd_opt(2030, 1, 5).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_sync_sends_saved_changes() {
        let env = TestEnv::new().await;
        let api = Arc::new(TestBillApi::seeded());

        api.set_offline(true);
        let workspace = env.workspace(&api).await;
        add_in(&workspace, rent()).await.unwrap();
        workspace.close().await.unwrap();
        assert!(env.config().journal_path().exists());

        let workspace = env.workspace(&api).await;
        api.set_offline(false);
        let out = sync_in(&workspace).await;
        let status = *out.structure().unwrap();
        assert_eq!(status.connectivity, Connectivity::Online);
        assert_eq!(status.sent, 1);
        assert_eq!(status.pending, 0);
        assert_eq!(status.bills, 4);
        assert_eq!(api.bills().len(), 4);
        workspace.close().await.unwrap();
        assert!(!env.config().journal_path().exists());
    }

    #[tokio::test]
    async fn test_sync_while_offline() {
        let env = TestEnv::new().await;
        let api = Arc::new(TestBillApi::seeded());
        api.set_offline(true);
        let workspace = env.workspace(&api).await;
        add_in(&workspace, rent()).await.unwrap();
        let out = sync_in(&workspace).await;
        let status = *out.structure().unwrap();
        assert_eq!(status.connectivity, Connectivity::Offline);
        assert_eq!(status.pending, 1);
        assert!(out.message().contains("sent later"), "{}", out.message());
        workspace.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_watch_stops_when_asked() {
        let env = TestEnv::new().await;
        let api = Arc::new(TestBillApi::seeded());
        let workspace = env.workspace(&api).await;
        let out = watch_until(workspace, std::future::ready(())).await.unwrap();
        assert_eq!(out.structure().unwrap().connectivity, Connectivity::Online);
        assert_eq!(out.structure().unwrap().bills, 3);
    }

    #[tokio::test]
    async fn test_watch_ends_when_session_is_rejected() {
        let env = TestEnv::new().await;
        let config = env.config();
        config.save_token("old").await.unwrap();
        let api = Arc::new(TestBillApi::seeded());
        let workspace = env.workspace(&api).await;
        // The workspace's own probe succeeds, the monitor's first one does not.
        api.fail(Failure::new(FailureKind::Unauthorized).on(OpKind::Ping));
        let err = watch_until(workspace, std::future::pending())
            .await
            .err()
            .unwrap();
        assert_eq!(err.error_type(), ErrorType::Auth);
        assert!(config.load_token().await.unwrap().is_none());
        assert!(!config.journal_path().exists());
    }
}
