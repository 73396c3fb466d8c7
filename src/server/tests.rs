use super::*;
use crate::api::{BillApi, HttpBillApi, SessionProvider, StaticSession};
use crate::model::{Amount, BillFields, BillId, BillPatch, Identity, PaymentStatus};
use crate::sync::{Connectivity, FixedClock, Outcome, SyncEngine, SyncSettings};
use crate::test::{test_today, RecordingObserver};
use chrono::NaiveDate;
use reqwest::StatusCode;
use serde_json::json;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Serves `backend` on an ephemeral port for the rest of the test.
async fn spawn(backend: Backend) -> (Url, Arc<Backend>) {
    let backend = Arc::new(backend.with_clock(Arc::new(FixedClock::on(test_today()))));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(backend.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (Url::parse(&format!("http://{addr}/")).unwrap(), backend)
}

fn http_api(base: &Url, token: &str) -> (HttpBillApi, Arc<StaticSession>) {
    let session = Arc::new(StaticSession::new(Some(token.to_string())));
    let api = HttpBillApi::new(base, Duration::from_secs(5), session.clone()).unwrap();
    (api, session)
}

fn date(s: &str) -> NaiveDate {
    NaiveDate::from_str(s).unwrap()
}

fn rent() -> BillFields {
    BillFields::new("RENT", Amount::from_str("1200").unwrap(), date("2025-03-05"))
        .with_payment_method("PIX")
}

#[tokio::test]
async fn test_routes() {
    let (base, backend) = spawn(Backend::new(None)).await;
    let client = reqwest::Client::new();
    let contas = base.join("api/contas").unwrap();

    let root: Value = client.get(base.clone()).send().await.unwrap().json().await.unwrap();
    assert_eq!(root["status"], "online");

    let response = client
        .post(contas.clone())
        .json(&json!({ "descricao": "RENT", "valor": 0 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(backend.is_empty());

    let response = client
        .post(contas.clone())
        .json(&json!({
            "descricao": "RENT",
            "valor": 1200,
            "data_vencimento": "2025-03-05",
            "frequencia": "MENSAL",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created: Value = response.json().await.unwrap();
    let id = created["data"]["id"].as_str().unwrap().to_string();
    assert_eq!(created["data"]["status"], "PENDENTE");
    assert_eq!(created["data"]["status_dinamico"], "IMINENTE");
    // Fields the client does not know about are kept.
    assert_eq!(created["data"]["frequencia"], "MENSAL");

    let one = base.join(&format!("api/contas/{id}")).unwrap();
    let patched: Value = client
        .patch(one.clone())
        .json(&json!({ "status": "PAGO", "id": "other" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(patched["data"]["id"], id.as_str());
    assert_eq!(patched["data"]["descricao"], "RENT");
    assert_eq!(patched["data"]["status_dinamico"], "PAGO");

    let dashboard: Value = client
        .get(base.join("api/dashboard").unwrap())
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(dashboard["data"]["total"], 1);
    assert_eq!(dashboard["data"]["pagos"], 1);
    assert_eq!(dashboard["data"]["valor_pago"], 1200.0);

    let response = client.delete(one.clone()).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let response = client.get(one).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = client.get(base.join("nope").unwrap()).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["path"], "/nope");
}

#[test]
fn test_dynamic_status() {
    let today = date("2025-03-01");
    let record = |due: &str, status: &str| {
        let Value::Object(record) = json!({ "data_vencimento": due, "status": status }) else {
            unreachable!()
        };
        record
    };
    let status = |due: &str, s: &str| routes::dynamic_status(&record(due, s), today);
    assert_eq!(status("2025-02-28", "PENDENTE"), "VENCIDO");
    assert_eq!(status("2025-03-01", "PENDENTE"), "IMINENTE");
    assert_eq!(status("2025-03-16", "PENDENTE"), "IMINENTE");
    assert_eq!(status("2025-03-17", "PENDENTE"), "PENDENTE");
    assert_eq!(status("2025-02-01", "PAGO"), "PAGO");
    assert_eq!(status("2025-02-01", "CANCELADO"), "CANCELADO");
    assert_eq!(status("not a date", "PENDENTE"), "PENDENTE");
}

#[tokio::test]
async fn test_http_api_round_trip() {
    let (base, backend) = spawn(Backend::new(Some("secret".to_string()))).await;
    let (api, _session) = http_api(&base, "secret");

    api.ping().await.unwrap();
    let created = api.create(&rent()).await.unwrap();
    let id = created.id().unwrap().clone();
    assert_eq!(created.fields(), &rent());
    assert_eq!(backend.len(), 1);

    let paid = BillPatch::paid(date("2025-03-02")).apply(&rent()).unwrap();
    let updated = api.update(&id, &paid).await.unwrap();
    assert_eq!(updated.fields().status(), PaymentStatus::Paid);
    assert_eq!(updated.fields().payment_date(), Some(date("2025-03-02")));

    let listed = api.list().await.unwrap();
    assert_eq!(listed, vec![updated]);

    api.delete(&id).await.unwrap();
    assert!(matches!(
        api.delete(&id).await.unwrap_err(),
        crate::api::ApiError::NotFound(_)
    ));
    assert!(matches!(
        api.update(&BillId::new("404"), &rent()).await.unwrap_err(),
        crate::api::ApiError::NotFound(_)
    ));
}

#[tokio::test]
async fn test_wrong_token_is_unauthorized() {
    let (base, _backend) = spawn(Backend::new(Some("secret".to_string()))).await;
    let (api, _session) = http_api(&base, "guess");
    assert!(api.ping().await.unwrap_err().is_unauthorized());
    assert!(api.list().await.unwrap_err().is_unauthorized());

    // The landing route is open.
    let response = reqwest::get(base).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_engine_syncs_with_backend() {
    let (base, backend) = spawn(Backend::new(Some("secret".to_string())).seeded()).await;
    let (api, session) = http_api(&base, "secret");
    let observer = Arc::new(RecordingObserver::default());
    let engine = SyncEngine::new(
        Arc::new(api),
        session,
        Arc::new(FixedClock::on(test_today())),
        observer,
        SyncSettings::default(),
    );

    assert_eq!(engine.probe().await, Connectivity::Online);
    assert_eq!(engine.list().len(), 3);

    let ticket = engine.create(rent()).unwrap();
    let Outcome::Synced(bill) = ticket.outcome().await else {
        panic!("the create did not sync");
    };
    let key = bill.identity().clone();
    assert!(matches!(key, Identity::Permanent(_)));
    assert_eq!(backend.len(), 4);

    let outcome = engine.add_note(&key, "paid by card").unwrap().outcome().await;
    assert!(outcome.is_success(), "{outcome}");
    let outcome = engine.mark_paid(&key, None).unwrap().outcome().await;
    assert!(outcome.is_success(), "{outcome}");
    let stored = backend
        .bills()
        .iter()
        .find(|r| r["descricao"] == "RENT")
        .cloned()
        .unwrap();
    assert_eq!(stored["status"], "PAGO");
    assert_eq!(stored["observacoes"][0]["texto"], "paid by card");

    let outcome = engine.delete(&key).unwrap().outcome().await;
    assert_eq!(outcome, Outcome::Deleted);
    assert_eq!(backend.len(), 3);
    assert_eq!(engine.pending_count(), 0);
}

#[tokio::test]
async fn test_engine_halts_when_token_is_rejected() {
    let (base, _backend) = spawn(Backend::new(Some("secret".to_string()))).await;
    let (api, session) = http_api(&base, "stale");
    let observer = Arc::new(RecordingObserver::default());
    let engine = SyncEngine::new(
        Arc::new(api),
        session.clone(),
        Arc::new(FixedClock::on(test_today())),
        observer.clone(),
        SyncSettings::default(),
    );

    assert_eq!(engine.probe().await, Connectivity::Unauthorized);
    assert!(engine.is_halted());
    assert!(!session.is_valid());
    assert!(!observer.errors().is_empty());

    session.renew("secret");
    engine.resume();
    assert_eq!(engine.probe().await, Connectivity::Online);
}
