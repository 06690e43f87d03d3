//! Public types for the gcp-pubsub crate.

use std::collections::HashMap;
use std::time::Duration;

use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A boxed error type for token providers and message handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T> = std::result::Result<T, Error>;

/// A message as stored by Pub/Sub.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PubsubMessage {
    /// Base64-encoded payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, String>,
}

/// One envelope of a pull batch. `ack_id` is the only token needed to
/// acknowledge it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceivedMessage {
    pub ack_id: String,
    #[serde(default)]
    pub message: PubsubMessage,
}

impl ReceivedMessage {
    /// Decode the payload: base64, then JSON. `Ok(None)` when the envelope
    /// carries no data.
    pub fn decode_data(&self) -> Result<Option<serde_json::Value>> {
        let Some(data) = self.message.data.as_deref().filter(|d| !d.is_empty()) else {
            return Ok(None);
        };
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| Error::Decode(format!("base64: {e}")))?;
        let value = serde_json::from_slice(&bytes)
            .map_err(|e| Error::Decode(format!("json: {e}")))?;
        Ok(Some(value))
    }

    /// Time elapsed since the message was published, or `None` if the
    /// service did not report a publish time. Clock skew yields zero.
    pub fn age(&self, now: DateTime<Utc>) -> Option<Duration> {
        let published = self.message.publish_time?;
        Some((now - published).to_std().unwrap_or_default())
    }

    /// Message id for log lines.
    pub fn id(&self) -> &str {
        self.message.message_id.as_deref().unwrap_or("unknown")
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PullResponse {
    #[serde(default)]
    pub received_messages: Vec<ReceivedMessage>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PublishResponse {
    #[serde(default)]
    pub message_ids: Vec<String>,
}

/// Encode a value the way publish sends it: JSON, then base64.
pub(crate) fn encode_data<T: Serialize>(value: &T) -> Result<String> {
    let json = serde_json::to_vec(value).map_err(|e| Error::Decode(format!("json: {e}")))?;
    Ok(base64::engine::general_purpose::STANDARD.encode(json))
}

/// Errors returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// `status` is 0 when the call failed before a response arrived.
    #[error("pubsub api error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("token fetch failed: {0}")]
    TokenFetch(BoxError),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("credentials error: {0}")]
    Credentials(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// HTTP status of an API error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pull_response_json_deserialization() {
        let json = r#"{
            "receivedMessages": [{
                "ackId": "ack-1",
                "message": {
                    "data": "eyJ4IjoxfQ==",
                    "messageId": "123",
                    "publishTime": "2024-05-01T12:00:00.123Z"
                }
            }]
        }"#;
        let resp: PullResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.received_messages.len(), 1);
        let msg = &resp.received_messages[0];
        assert_eq!(msg.ack_id, "ack-1");
        assert_eq!(msg.id(), "123");
        assert_eq!(msg.decode_data().unwrap(), Some(serde_json::json!({"x": 1})));
    }

    #[test]
    fn empty_pull_response_has_no_messages() {
        let resp: PullResponse = serde_json::from_str("{}").unwrap();
        assert!(resp.received_messages.is_empty());
    }

    #[test]
    fn missing_data_decodes_to_none() {
        let msg = ReceivedMessage {
            ack_id: "a".into(),
            message: PubsubMessage::default(),
        };
        assert!(msg.decode_data().unwrap().is_none());
        assert_eq!(msg.id(), "unknown");
    }

    #[test]
    fn invalid_base64_is_decode_error() {
        let msg = ReceivedMessage {
            ack_id: "a".into(),
            message: PubsubMessage {
                data: Some("!!not base64!!".into()),
                ..Default::default()
            },
        };
        assert!(matches!(msg.decode_data(), Err(Error::Decode(_))));
    }

    #[test]
    fn encoded_payload_decodes_to_same_value() {
        let value = serde_json::json!({"order": 42, "items": ["a", "b"], "price": 1.5});
        let msg = ReceivedMessage {
            ack_id: "a".into(),
            message: PubsubMessage {
                data: Some(encode_data(&value).unwrap()),
                ..Default::default()
            },
        };
        assert_eq!(msg.decode_data().unwrap(), Some(value));
    }

    #[test]
    fn age_is_measured_from_publish_time() {
        let published = Utc::now() - chrono::Duration::seconds(90);
        let msg = ReceivedMessage {
            ack_id: "a".into(),
            message: PubsubMessage {
                publish_time: Some(published),
                ..Default::default()
            },
        };
        let age = msg.age(published + chrono::Duration::seconds(90)).unwrap();
        assert_eq!(age, Duration::from_secs(90));
        // Publish time in the future clamps to zero
        assert_eq!(
            msg.age(published - chrono::Duration::seconds(5)).unwrap(),
            Duration::ZERO
        );
    }

    #[test]
    fn api_error_exposes_status() {
        let err = Error::Api {
            status: 404,
            message: "Resource not found".into(),
        };
        assert_eq!(err.status(), Some(404));
        assert_eq!(err.to_string(), "pubsub api error 404: Resource not found");
        assert_eq!(Error::InvalidArgument("x".into()).status(), None);
    }
}
