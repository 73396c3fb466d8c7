//! The remote bill API and the session that authenticates against it.
//!
//! `BillApi` is the seam between the sync engine and the network. `HttpBillApi` talks to the
//! backend over HTTP. `TestBillApi` keeps everything in memory and can be told to fail, it is
//! compiled even in the production build so the whole app can be run without a backend.

mod http;
mod test_api;
pub(crate) mod wire;

use crate::error::Res;
use crate::model::{Bill, BillFields, BillId};
use crate::Config;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

pub(crate) use http::HttpBillApi;
pub(crate) use test_api::seed_bills;
pub use test_api::{Failure, FailureKind, OpKind, TestBillApi};

/// When this environment variable is set to a non-empty value, the app uses `TestBillApi` instead
/// of the HTTP backend.
pub const TEST_MODE_ENV: &str = "BILLS_IN_TEST_MODE";

/// Selects the `BillApi` implementation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Talk to the backend configured in `config.json`.
    #[default]
    Http,
    /// Use in-memory, seeded data.
    Test,
}

impl Mode {
    pub fn from_env() -> Self {
        match std::env::var(TEST_MODE_ENV) {
            Ok(value) if !value.is_empty() => Mode::Test,
            _ => Mode::Http,
        }
    }
}

/// Why a call to the backend did not succeed.
#[derive(Debug)]
pub enum ApiError {
    /// The backend rejected the session (HTTP 401/403). Never retried.
    Unauthorized(String),
    /// The bill does not exist on the backend.
    NotFound(String),
    /// The backend refused the request, e.g. a validation failure. Retrying will not help.
    Rejected { status: u16, message: String },
    /// The backend could not be reached or failed on its side. Worth retrying.
    Transient(anyhow::Error),
}

impl ApiError {
    pub fn transient(message: impl Display) -> Self {
        ApiError::Transient(anyhow::anyhow!("{message}"))
    }

    /// Maps a non-success HTTP status to an error.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => ApiError::Unauthorized(message),
            404 => ApiError::NotFound(message),
            408 | 429 => ApiError::Transient(anyhow::anyhow!("HTTP {status}: {message}")),
            400..=499 => ApiError::Rejected { status, message },
            _ => ApiError::Transient(anyhow::anyhow!("HTTP {status}: {message}")),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Transient(_))
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized(_))
    }
}

impl Display for ApiError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Unauthorized(message) => write!(f, "Not authorized: {message}"),
            ApiError::NotFound(message) => write!(f, "Not found: {message}"),
            ApiError::Rejected { status, message } => {
                write!(f, "Rejected by the server ({status}): {message}")
            }
            ApiError::Transient(e) => write!(f, "{e:#}"),
        }
    }
}

impl std::error::Error for ApiError {}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// The operations the sync engine needs from the backend.
#[async_trait::async_trait]
pub trait BillApi: Send + Sync {
    /// A cheap liveness check. Reports `Unauthorized` when the session is no longer accepted.
    async fn ping(&self) -> ApiResult<()>;

    /// Fetches every bill the backend holds.
    async fn list(&self) -> ApiResult<Vec<Bill>>;

    /// Creates a bill and returns the backend's copy of it, which carries the permanent id.
    async fn create(&self, fields: &BillFields) -> ApiResult<Bill>;

    /// Replaces the fields of an existing bill.
    async fn update(&self, id: &BillId, fields: &BillFields) -> ApiResult<Bill>;

    async fn delete(&self, id: &BillId) -> ApiResult<()>;
}

/// Supplies the bearer token and learns when the backend has rejected it.
pub trait SessionProvider: Send + Sync {
    fn token(&self) -> Option<String>;

    /// Called when the backend rejects the token. After this `is_valid` returns false until a new
    /// token is supplied.
    fn invalidate(&self);

    fn is_valid(&self) -> bool;
}

/// A session whose token is known up front, e.g. read from the secrets directory.
#[derive(Debug, Default)]
pub struct StaticSession {
    token: Mutex<Option<String>>,
    invalidated: AtomicBool,
}

impl StaticSession {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: Mutex::new(token),
            invalidated: AtomicBool::new(false),
        }
    }

    /// Replaces the token and makes the session valid again.
    pub fn renew(&self, token: impl Into<String>) {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = Some(token.into());
        self.invalidated.store(false, Ordering::SeqCst);
    }
}

impl SessionProvider for StaticSession {
    fn token(&self) -> Option<String> {
        if self.invalidated.load(Ordering::SeqCst) {
            return None;
        }
        self.token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn invalidate(&self) {
        debug!("Invalidating the session");
        self.invalidated.store(true, Ordering::SeqCst);
    }

    fn is_valid(&self) -> bool {
        !self.invalidated.load(Ordering::SeqCst)
            && self
                .token
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .is_some()
    }
}

/// Creates the `BillApi` selected by `mode`.
pub(crate) fn bill_api(
    config: &Config,
    session: Arc<dyn SessionProvider>,
    mode: Mode,
) -> Res<Arc<dyn BillApi>> {
    match mode {
        Mode::Http => {
            let api = HttpBillApi::new(config.api_url(), config.request_timeout(), session)?;
            Ok(Arc::new(api))
        }
        Mode::Test => Ok(Arc::new(TestBillApi::seeded())),
    }
}
