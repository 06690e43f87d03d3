//! Publish-only handle to a topic.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::auth::TokenProvider;
use crate::transport::Transport;
use crate::types::{Error, Result};

#[derive(Clone)]
pub struct Topic {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Transport,
    project: String,
    name: String,
    token: Arc<dyn TokenProvider>,
}

impl Topic {
    pub fn new(
        transport: Transport,
        project: impl Into<String>,
        name: impl Into<String>,
        token: Arc<dyn TokenProvider>,
    ) -> Result<Self> {
        let project = project.into();
        let name = name.into();
        if project.is_empty() {
            return Err(Error::InvalidArgument("project cannot be empty".into()));
        }
        if name.is_empty() {
            return Err(Error::InvalidArgument("topic cannot be empty".into()));
        }
        Ok(Self {
            inner: Arc::new(Inner {
                transport,
                project,
                name,
                token,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Publish a batch of JSON-serializable payloads. Returns one message id
    /// per payload, in order. An empty batch fails without a request.
    pub async fn publish<T: Serialize>(&self, messages: &[T]) -> Result<Vec<String>> {
        if messages.is_empty() {
            return Err(Error::InvalidArgument("messages cannot be empty".into()));
        }
        let token = self
            .inner
            .token
            .token()
            .await
            .map_err(Error::TokenFetch)?;
        let ids = self
            .inner
            .transport
            .publish(&self.inner.project, &self.inner.name, &token, messages)
            .await?;
        debug!(topic = %self.inner.name, count = ids.len(), "published");
        Ok(ids)
    }

    /// Publish a single payload and return its message id.
    pub async fn publish_one<T: Serialize>(&self, message: &T) -> Result<String> {
        self.publish(std::slice::from_ref(message))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Api {
                status: 0,
                message: "publish returned no message id".into(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticToken;

    fn topic() -> Topic {
        Topic::new(
            Transport::with_base_url("http://127.0.0.1:9").unwrap(),
            "proj",
            "orders",
            Arc::new(StaticToken("t".into())),
        )
        .unwrap()
    }

    #[test]
    fn construction_requires_identity() {
        let transport = Transport::with_base_url("http://127.0.0.1:9").unwrap();
        let token: Arc<dyn TokenProvider> = Arc::new(StaticToken("t".into()));
        assert!(Topic::new(transport.clone(), "", "orders", token.clone()).is_err());
        assert!(Topic::new(transport, "proj", "", token).is_err());
        assert_eq!(topic().name(), "orders");
    }

    #[tokio::test]
    async fn empty_batch_fails_locally() {
        let empty: [serde_json::Value; 0] = [];
        assert!(matches!(
            topic().publish(&empty).await,
            Err(Error::InvalidArgument(_))
        ));
    }
}
