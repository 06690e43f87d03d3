//! Authenticated REST calls to the Pub/Sub API.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::types::{Error, PublishResponse, PullResponse, ReceivedMessage, Result, encode_data};

pub const DEFAULT_BASE_URL: &str = "https://pubsub.googleapis.com/v1";

/// Timeout for a single API request. Pulls return immediately, so this only
/// bounds slow or hung connections.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared HTTP client for the Pub/Sub REST API. Clone is a cheap Arc
/// refcount bump.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

struct Inner {
    client: Client,
    base_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PullRequest {
    return_immediately: bool,
    max_messages: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AckRequest<'a> {
    ack_ids: &'a [String],
}

#[derive(Serialize)]
struct PublishRequest {
    messages: Vec<OutgoingMessage>,
}

#[derive(Serialize)]
struct OutgoingMessage {
    data: String,
}

impl Transport {
    pub fn new() -> Result<Self> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Point the transport at another endpoint (emulator, mock server).
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Api {
                status: 0,
                message: format!("http client: {e}"),
            })?;
        let base_url = base_url.into().trim_end_matches('/').to_string();

        Ok(Self {
            inner: Arc::new(Inner { client, base_url }),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    /// Pull up to `max_messages` without waiting for messages to arrive.
    /// An empty subscription is an empty batch.
    pub async fn pull(
        &self,
        project: &str,
        subscription: &str,
        token: &str,
        max_messages: u32,
    ) -> Result<Vec<ReceivedMessage>> {
        let path = format!("/projects/{project}/subscriptions/{subscription}:pull");
        let body = PullRequest {
            return_immediately: true,
            max_messages,
        };
        let resp: PullResponse = self.post(&path, token, &body).await?;
        Ok(resp.received_messages)
    }

    pub async fn ack(
        &self,
        project: &str,
        subscription: &str,
        token: &str,
        ack_ids: &[String],
    ) -> Result<()> {
        let path = format!("/projects/{project}/subscriptions/{subscription}:acknowledge");
        let _: serde_json::Value = self.post(&path, token, &AckRequest { ack_ids }).await?;
        Ok(())
    }

    /// Publish messages, returning their ids in input order.
    pub async fn publish<T: Serialize>(
        &self,
        project: &str,
        topic: &str,
        token: &str,
        messages: &[T],
    ) -> Result<Vec<String>> {
        let path = format!("/projects/{project}/topics/{topic}:publish");
        let body = PublishRequest {
            messages: messages
                .iter()
                .map(|m| encode_data(m).map(|data| OutgoingMessage { data }))
                .collect::<Result<_>>()?,
        };
        let resp: PublishResponse = self.post(&path, token, &body).await?;
        if resp.message_ids.len() != messages.len() {
            return Err(Error::Api {
                status: 0,
                message: format!(
                    "publish returned {} ids for {} messages",
                    resp.message_ids.len(),
                    messages.len()
                ),
            });
        }
        Ok(resp.message_ids)
    }

    async fn post<B, R>(&self, path: &str, token: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned + Default,
    {
        let url = format!("{}{path}", self.inner.base_url);
        debug!(url = %url, "pubsub request");

        let resp = self
            .inner
            .client
            .post(&url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Api {
                status: e.status().map_or(0, |s| s.as_u16()),
                message: e.to_string(),
            })?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| Error::Api {
            status: status.as_u16(),
            message: e.to_string(),
        })?;

        if !status.is_success() {
            let message = error_message(&text)
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").into());
            return Err(Error::Api {
                status: status.as_u16(),
                message,
            });
        }

        // Ack answers `{}`, and some emulators answer nothing at all.
        if text.trim().is_empty() {
            return Ok(R::default());
        }
        serde_json::from_str(&text).map_err(|e| Error::Api {
            status: status.as_u16(),
            message: format!("decode response: {e}"),
        })
    }
}

/// Pull the message out of a Google API error body
/// (`{"error":{"code":404,"message":"...","status":"NOT_FOUND"}}`), falling
/// back to the raw body.
fn error_message(body: &str) -> Option<String> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }
    let structured = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.pointer("/error/message")?.as_str().map(String::from));
    Some(structured.unwrap_or_else(|| body.to_string()))
}
