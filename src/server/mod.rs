//! A reference backend that speaks the same REST dialect as the production one.
//!
//! Bills are kept in memory as plain JSON objects, so fields this crate does not know about survive
//! a round trip just like they do on the real backend. When a token is configured every route other
//! than `/` requires `Authorization: Bearer <token>`.

mod routes;

#[cfg(test)]
mod tests;

use crate::api::wire::WireBill;
use crate::sync::{Clock, SystemClock};
use crate::Res;
use anyhow::Context;
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Map, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, info};

pub(crate) type Record = Map<String, Value>;

/// The state shared by all handlers.
pub struct Backend {
    bills: Mutex<Vec<Record>>,
    next_id: AtomicU64,
    token: Option<String>,
    clock: Arc<dyn Clock>,
    started: Instant,
}

impl Backend {
    pub fn new(token: Option<String>) -> Self {
        Self {
            bills: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            token: token.filter(|t| !t.is_empty()),
            clock: Arc::new(SystemClock),
            started: Instant::now(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Starts out with a few sample bills.
    pub fn seeded(self) -> Self {
        for bill in crate::api::seed_bills() {
            if let Ok(Value::Object(record)) = serde_json::to_value(WireBill::from_bill(&bill)) {
                self.insert(record);
            }
        }
        self
    }

    /// Stores `record` under a new id and returns the stored copy.
    pub(crate) fn insert(&self, mut record: Record) -> Record {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        record.insert("id".to_string(), Value::String(id.to_string()));
        self.bills().push(record.clone());
        record
    }

    pub(crate) fn bills(&self) -> MutexGuard<'_, Vec<Record>> {
        self.bills.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub(crate) fn uptime(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    pub fn len(&self) -> usize {
        self.bills().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn accepts(&self, authorization: Option<&str>) -> bool {
        let Some(expected) = self.token.as_deref() else {
            return true;
        };
        authorization
            .and_then(|value| value.strip_prefix("Bearer "))
            .is_some_and(|token| token.trim() == expected)
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("bills", &self.len())
            .field("auth", &self.token.is_some())
            .finish()
    }
}

/// Builds the router with every route of the backend.
pub fn router(backend: Arc<Backend>) -> Router {
    let api = Router::new()
        .route("/health", get(routes::health))
        .route("/api/contas", get(routes::list).post(routes::create))
        .route(
            "/api/contas/:id",
            get(routes::get)
                .put(routes::update)
                .patch(routes::update)
                .delete(routes::delete),
        )
        .route("/api/dashboard", get(routes::dashboard))
        .route_layer(middleware::from_fn_with_state(
            backend.clone(),
            require_token,
        ));

    Router::new()
        .route("/", get(routes::root))
        .merge(api)
        .fallback(routes::not_found)
        .layer(middleware::from_fn(log_request))
        .with_state(backend)
}

/// Serves on `listener` until the task is dropped or the process receives ctrl-c.
pub async fn run(listener: TcpListener, backend: Arc<Backend>) -> Res<()> {
    let app = router(backend);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("The server stopped with an error")
}

/// Binds `addr` and serves the backend on it.
pub async fn serve(addr: SocketAddr, backend: Backend) -> Res<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Unable to listen on {addr}"))?;
    let local = listener.local_addr().context("Unable to read the bound address")?;
    info!(
        "Serving {} bills on http://{local} (auth {})",
        backend.len(),
        if backend.token.is_some() { "on" } else { "off" }
    );
    run(listener, Arc::new(backend)).await
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutting down");
    }
}

async fn require_token(
    State(backend): State<Arc<Backend>>,
    request: Request,
    next: Next,
) -> Response {
    let authorization = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    if backend.accepts(authorization) {
        return next.run(request).await;
    }
    debug!("Rejected {} {} without a valid token", request.method(), request.uri().path());
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({
            "success": false,
            "error": "Not authorized",
        })),
    )
        .into_response()
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let response = next.run(request).await;
    debug!("{method} {path} -> {}", response.status());
    response
}
