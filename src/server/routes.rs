use crate::api::wire::{parse_date, STATUS_PAID, STATUS_PENDING};
use crate::model::Amount;
use crate::server::{Backend, Record};
use axum::extract::{Path, State};
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::NaiveDate;
use serde_json::{json, Value};
use std::sync::Arc;

const STATUS_CANCELLED: &str = "CANCELADO";
const STATUS_OVERDUE: &str = "VENCIDO";
const STATUS_DUE_SOON: &str = "IMINENTE";
const DUE_SOON_DAYS: i64 = 15;
const REQUIRED: [&str; 3] = ["descricao", "valor", "data_vencimento"];

/// The status shown for a stored record. Unlike the client, a bill due today is not yet overdue.
pub(crate) fn dynamic_status(record: &Record, today: NaiveDate) -> &'static str {
    match record.get("status").and_then(Value::as_str) {
        Some(STATUS_PAID) => return STATUS_PAID,
        Some(STATUS_CANCELLED) => return STATUS_CANCELLED,
        _ => {}
    }
    let Some(due) = record
        .get("data_vencimento")
        .and_then(Value::as_str)
        .and_then(parse_date)
    else {
        return STATUS_PENDING;
    };
    let days = (due - today).num_days();
    if days < 0 {
        STATUS_OVERDUE
    } else if days <= DUE_SOON_DAYS {
        STATUS_DUE_SOON
    } else {
        STATUS_PENDING
    }
}

fn with_status(record: &Record, today: NaiveDate) -> Value {
    let mut out = record.clone();
    out.insert(
        "status_dinamico".to_string(),
        Value::String(dynamic_status(record, today).to_string()),
    );
    Value::Object(out)
}

/// Whether a field holds something, the way the backend judges required fields.
fn is_present(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

fn now(backend: &Backend) -> Value {
    Value::String(backend.clock().now().to_rfc3339())
}

fn failure(status: StatusCode, error: &str) -> Response {
    (status, Json(json!({ "success": false, "error": error }))).into_response()
}

fn bill_not_found() -> Response {
    failure(StatusCode::NOT_FOUND, "Bill not found")
}

fn body_object(body: Value) -> Result<Record, Response> {
    match body {
        Value::Object(record) => Ok(record),
        _ => Err(failure(
            StatusCode::BAD_REQUEST,
            "The request body must be a JSON object",
        )),
    }
}

pub(super) async fn root(State(backend): State<Arc<Backend>>) -> impl IntoResponse {
    Json(json!({
        "status": "online",
        "message": "The bills API is up",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": now(&backend),
        "endpoints": {
            "contas": "/api/contas",
            "health": "/health",
        },
    }))
}

pub(super) async fn health(State(backend): State<Arc<Backend>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "uptime": backend.uptime(),
        "timestamp": now(&backend),
        "totalContas": backend.len(),
    }))
}

pub(super) async fn list(State(backend): State<Arc<Backend>>) -> impl IntoResponse {
    let today = backend.clock().today();
    let data: Vec<Value> = backend
        .bills()
        .iter()
        .map(|record| with_status(record, today))
        .collect();
    Json(json!({
        "success": true,
        "total": data.len(),
        "data": data,
        "timestamp": now(&backend),
    }))
}

pub(super) async fn get(
    State(backend): State<Arc<Backend>>,
    Path(id): Path<String>,
) -> Response {
    let today = backend.clock().today();
    let found = backend
        .bills()
        .iter()
        .find(|record| has_id(record, &id))
        .map(|record| with_status(record, today));
    match found {
        Some(data) => Json(json!({ "success": true, "data": data })).into_response(),
        None => bill_not_found(),
    }
}

pub(super) async fn create(State(backend): State<Arc<Backend>>, Json(body): Json<Value>) -> Response {
    let mut record = match body_object(body) {
        Ok(record) => record,
        Err(response) => return response,
    };
    if !REQUIRED.iter().all(|field| is_present(record.get(*field))) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "success": false,
                "error": "Required fields are missing",
                "required": REQUIRED,
            })),
        )
            .into_response();
    }
    if !is_present(record.get("status")) {
        record.insert("status".to_string(), Value::String(STATUS_PENDING.to_string()));
    }
    record.insert("created_at".to_string(), now(&backend));
    record.insert("updated_at".to_string(), now(&backend));
    let stored = backend.insert(record);
    let data = with_status(&stored, backend.clock().today());
    (
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Bill created",
            "data": data,
        })),
    )
        .into_response()
}

/// Serves both PUT and PATCH: the body's fields are merged over the stored record.
pub(super) async fn update(
    State(backend): State<Arc<Backend>>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let patch = match body_object(body) {
        Ok(patch) => patch,
        Err(response) => return response,
    };
    let updated_at = now(&backend);
    let updated = {
        let mut bills = backend.bills();
        let Some(record) = bills.iter_mut().find(|record| has_id(record, &id)) else {
            return bill_not_found();
        };
        record.extend(patch);
        record.insert("id".to_string(), Value::String(id));
        record.insert("updated_at".to_string(), updated_at);
        record.clone()
    };
    Json(json!({
        "success": true,
        "message": "Bill updated",
        "data": with_status(&updated, backend.clock().today()),
    }))
    .into_response()
}

pub(super) async fn delete(
    State(backend): State<Arc<Backend>>,
    Path(id): Path<String>,
) -> Response {
    let removed = {
        let mut bills = backend.bills();
        bills
            .iter()
            .position(|record| has_id(record, &id))
            .map(|ix| bills.remove(ix))
    };
    match removed {
        Some(record) => Json(json!({
            "success": true,
            "message": "Bill deleted",
            "data": record,
        }))
        .into_response(),
        None => bill_not_found(),
    }
}

pub(super) async fn dashboard(State(backend): State<Arc<Backend>>) -> impl IntoResponse {
    let today = backend.clock().today();
    let mut paid = 0usize;
    let mut overdue = 0usize;
    let mut due_soon = 0usize;
    let mut pending = 0usize;
    let mut total_amount = Amount::ZERO;
    let mut paid_amount = Amount::ZERO;
    let mut open_amount = Amount::ZERO;
    let bills = backend.bills().clone();
    for record in &bills {
        let amount = record
            .get("valor")
            .and_then(|v| serde_json::from_value::<Amount>(v.clone()).ok())
            .unwrap_or(Amount::ZERO);
        total_amount = total_amount + amount;
        match dynamic_status(record, today) {
            STATUS_PAID => {
                paid += 1;
                paid_amount = paid_amount + amount;
                continue;
            }
            STATUS_OVERDUE => overdue += 1,
            STATUS_DUE_SOON => due_soon += 1,
            STATUS_PENDING => pending += 1,
            _ => {}
        }
        open_amount = open_amount + amount;
    }
    Json(json!({
        "success": true,
        "data": {
            "total": bills.len(),
            "pagos": paid,
            "vencidos": overdue,
            "iminentes": due_soon,
            "pendentes": pending,
            "valor_total": total_amount,
            "valor_pago": paid_amount,
            "valor_pendente": open_amount,
        },
        "timestamp": now(&backend),
    }))
}

pub(super) async fn not_found(method: Method, uri: Uri) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "success": false,
            "error": "Route not found",
            "path": uri.path(),
            "method": method.as_str(),
        })),
    )
        .into_response()
}

fn has_id(record: &Record, id: &str) -> bool {
    match record.get("id") {
        Some(Value::String(s)) => s == id,
        Some(Value::Number(n)) => n.to_string() == id,
        _ => false,
    }
}
