//! Outbound push provider calls and the provider wire format.
//!
//! One HTTP POST per delivery batch:
//! `{ "registration_ids": [...], "data": { "tag": "..." } }` with the service
//! API key in the Authorization header. A 200 response carries per-recipient
//! results positionally correlated to `registration_ids`.

use serde::{Deserialize, Serialize};

use crate::request::DeliveryRequest;

#[derive(Debug, Serialize)]
struct DeliveryPayload<'a> {
    registration_ids: &'a [String],
    data: DeliveryData<'a>,
}

#[derive(Debug, Serialize)]
struct DeliveryData<'a> {
    tag: &'a str,
}

/// Provider response body on HTTP 200.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderResponse {
    #[serde(default)]
    pub failure: i64,
    #[serde(default)]
    pub canonical_ids: i64,
    #[serde(default)]
    pub results: Vec<ProviderResult>,
}

/// One per-recipient entry of a provider response.
///
/// Exactly one of three shapes on the wire: a plain success
/// (`message_id`), a success with identifier rotation (`message_id` +
/// `registration_id`), or an error (`error`).
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderResult {
    pub message_id: Option<String>,
    pub registration_id: Option<String>,
    pub error: Option<String>,
}

/// What came back from one send attempt.
#[derive(Debug, Clone)]
pub enum DeliveryOutcome {
    /// The request never produced an HTTP response.
    TransportError(String),
    Reply {
        status: u16,
        /// Parsed body; `None` when the body was absent or unparseable.
        body: Option<ProviderResponse>,
    },
}

/// HTTP client for the push provider.
#[derive(Clone)]
pub struct PushClient {
    http: reqwest::Client,
    url: String,
    api_key: String,
}

impl PushClient {
    pub fn new(url: String, api_key: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            url,
            api_key,
        }
    }

    /// Post one delivery batch. Transport failures are returned as an
    /// outcome, not an error — the classifier decides what to do with them.
    pub async fn send(&self, request: &DeliveryRequest) -> DeliveryOutcome {
        let payload = DeliveryPayload {
            registration_ids: &request.recipients,
            data: DeliveryData {
                tag: request.tag.as_str(),
            },
        };

        let response = self
            .http
            .post(&self.url)
            .header(reqwest::header::AUTHORIZATION, &self.api_key)
            .json(&payload)
            .send()
            .await;

        match response {
            Err(e) => {
                tracing::warn!(request = %request.id, error = %e, "Provider request failed in transit");
                DeliveryOutcome::TransportError(e.to_string())
            }
            Ok(response) => {
                let status = response.status().as_u16();
                let body = response.json::<ProviderResponse>().await.ok();
                DeliveryOutcome::Reply { status, body }
            }
        }
    }
}
