use crate::sync::{Connectivity, SyncEngine};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// A running connectivity monitor. Dropping the handle leaves the monitor running, call `stop`.
#[derive(Debug)]
pub struct MonitorHandle {
    handle: JoinHandle<()>,
}

impl MonitorHandle {
    pub fn stop(self) {
        self.handle.abort();
    }

    /// True once the monitor has stopped on its own, which happens when the session is rejected.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the monitor to stop on its own.
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            if !e.is_cancelled() {
                warn!("The connectivity monitor crashed: {e}");
            }
        }
    }
}

impl SyncEngine {
    /// Probes the backend right away and then every `probe_interval` of the settings. Each probe
    /// reconciles and drains as needed. The monitor stops when the session is rejected.
    pub fn start_monitor(&self) -> MonitorHandle {
        let engine = self.clone();
        let interval = self.settings().probe_interval;
        MonitorHandle {
            handle: tokio::spawn(run(engine, interval)),
        }
    }
}

async fn run(engine: SyncEngine, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let connectivity = engine.probe().await;
        debug!("Probe: {connectivity}");
        if connectivity == Connectivity::Unauthorized {
            warn!("Stopping the connectivity monitor until the next login");
            break;
        }
    }
}
