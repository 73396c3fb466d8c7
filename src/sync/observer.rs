use crate::model::Bill;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

serde_plain::derive_display_from_serialize!(Severity);

/// A short message meant for the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub message: String,
    pub severity: Severity,
}

impl Notice {
    pub fn new(message: impl Into<String>, severity: Severity) -> Self {
        Self {
            message: message.into(),
            severity,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(message, Severity::Error)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(message, Severity::Warning)
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(message, Severity::Success)
    }
}

impl Display for Notice {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.severity, self.message)
    }
}

/// Receives the state the engine wants shown. Both calls must return promptly, they are made from
/// inside the engine's processing loop.
pub trait Observer: Send + Sync {
    /// Called with the full list of bills after every change.
    fn on_change(&self, bills: &[Bill]);

    /// Fire-and-forget feedback for the user.
    fn on_notice(&self, notice: &Notice);
}

/// Writes changes and notices to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl Observer for LogObserver {
    fn on_change(&self, bills: &[Bill]) {
        let pending = bills.iter().filter(|b| !b.is_synced()).count();
        debug!("{} bills, {pending} not yet synced", bills.len());
    }

    fn on_notice(&self, notice: &Notice) {
        match notice.severity {
            Severity::Info | Severity::Success => info!("{}", notice.message),
            Severity::Warning => warn!("{}", notice.message),
            Severity::Error => error!("{}", notice.message),
        }
    }
}
