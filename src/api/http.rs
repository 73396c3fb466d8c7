//! Implements the `BillApi` trait over HTTP using `reqwest`.

use crate::api::wire::{Envelope, WireBill};
use crate::api::{ApiError, ApiResult, BillApi, SessionProvider};
use crate::error::Res;
use crate::model::{Bill, BillFields, BillId};
use anyhow::Context;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;
use url::Url;

const HEALTH: &str = "health";
const BILLS: [&str; 2] = ["api", "contas"];

/// Talks to the backend's REST routes. Every request carries the session's bearer token.
pub(crate) struct HttpBillApi {
    client: Client,
    base: Url,
    session: Arc<dyn SessionProvider>,
}

impl HttpBillApi {
    pub(crate) fn new(
        base: &Url,
        timeout: Duration,
        session: Arc<dyn SessionProvider>,
    ) -> Res<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Unable to create the HTTP client")?;
        let mut base = base.clone();
        // So that joining "api/contas" appends rather than replaces the last segment.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            client,
            base,
            session,
        })
    }

    fn url(&self, segments: &[&str]) -> ApiResult<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::transient(format!("'{}' cannot be a base URL", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn bill_url(&self, id: &BillId) -> ApiResult<Url> {
        self.url(&[BILLS[0], BILLS[1], id.as_str()])
    }

    fn request(&self, method: Method, url: Url) -> ApiResult<RequestBuilder> {
        let token = self
            .session
            .token()
            .ok_or_else(|| ApiError::Unauthorized("There is no session token".to_string()))?;
        trace!("{method} {url}");
        Ok(self.client.request(method, url).bearer_auth(token))
    }

    async fn send(request: RequestBuilder) -> ApiResult<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| ApiError::Transient(anyhow::Error::new(e).context("Request failed")))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        // Error bodies are usually an envelope, but a proxy might send anything.
        let body = response.text().await.unwrap_or_default();
        let reason = serde_json::from_str::<Envelope<serde_json::Value>>(&body)
            .ok()
            .and_then(|envelope| envelope.reason())
            .unwrap_or_else(|| status.to_string());
        Err(ApiError::from_status(status.as_u16(), reason))
    }

    async fn data<T: DeserializeOwned>(response: Response) -> ApiResult<T> {
        let status = response.status().as_u16();
        let envelope: Envelope<T> = response.json().await.map_err(|e| {
            ApiError::Transient(anyhow::Error::new(e).context("Unable to parse the response"))
        })?;
        open_envelope(envelope, status)
    }
}

/// The data of a successful envelope. A failure reported inside a 2xx response is the server
/// refusing the request, which a retry would not change.
fn open_envelope<T>(envelope: Envelope<T>, status: u16) -> ApiResult<T> {
    if !envelope.success {
        let message = envelope
            .reason()
            .unwrap_or_else(|| "The server reported a failure".to_string());
        return Err(ApiError::Rejected { status, message });
    }
    envelope
        .data
        .ok_or_else(|| ApiError::transient("The response has no data"))
}

#[async_trait::async_trait]
impl BillApi for HttpBillApi {
    async fn ping(&self) -> ApiResult<()> {
        let url = self.url(&[HEALTH])?;
        Self::send(self.request(Method::GET, url)?).await?;
        Ok(())
    }

    async fn list(&self) -> ApiResult<Vec<Bill>> {
        let url = self.url(&BILLS)?;
        let response = Self::send(self.request(Method::GET, url)?).await?;
        let bills: Vec<WireBill> = Self::data(response).await?;
        bills.into_iter().map(WireBill::into_bill).collect()
    }

    async fn create(&self, fields: &BillFields) -> ApiResult<Bill> {
        let url = self.url(&BILLS)?;
        let request = self
            .request(Method::POST, url)?
            .json(&WireBill::from_fields(fields));
        let bill: WireBill = Self::data(Self::send(request).await?).await?;
        bill.into_bill()
    }

    async fn update(&self, id: &BillId, fields: &BillFields) -> ApiResult<Bill> {
        let url = self.bill_url(id)?;
        let request = self
            .request(Method::PUT, url)?
            .json(&WireBill::from_fields(fields));
        let bill: WireBill = Self::data(Self::send(request).await?).await?;
        bill.into_bill()
    }

    async fn delete(&self, id: &BillId) -> ApiResult<()> {
        let url = self.bill_url(id)?;
        Self::send(self.request(Method::DELETE, url)?).await?;
        Ok(())
    }
}
