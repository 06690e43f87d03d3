//! Entry point tying credentials, token source and transport together.

use std::path::Path;
use std::sync::Arc;

use crate::auth::{Credentials, TokenProvider};
use crate::subscription::Subscription;
use crate::topic::Topic;
use crate::transport::Transport;
use crate::types::Result;

/// Factory for [`Subscription`] and [`Topic`] handles of one project.
#[derive(Clone)]
pub struct PubSub {
    project_id: String,
    token: Arc<dyn TokenProvider>,
    transport: Transport,
}

impl PubSub {
    pub fn new(project_id: impl Into<String>, token: Arc<dyn TokenProvider>) -> Result<Self> {
        Ok(Self::with_transport(project_id, token, Transport::new()?))
    }

    /// Take the project id from a service-account key file.
    pub fn from_credentials_file(path: &Path, token: Arc<dyn TokenProvider>) -> Result<Self> {
        let credentials = Credentials::from_file(path)?;
        tracing::info!(
            project_id = %credentials.project_id,
            client_email = %credentials.client_email,
            "loaded credentials"
        );
        Self::new(credentials.project_id, token)
    }

    pub fn with_transport(
        project_id: impl Into<String>,
        token: Arc<dyn TokenProvider>,
        transport: Transport,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            token,
            transport,
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn subscription(&self, name: impl Into<String>) -> Result<Subscription> {
        Subscription::new(
            self.transport.clone(),
            self.project_id.clone(),
            name,
            self.token.clone(),
        )
    }

    pub fn topic(&self, name: impl Into<String>) -> Result<Topic> {
        Topic::new(
            self.transport.clone(),
            self.project_id.clone(),
            name,
            self.token.clone(),
        )
    }
}
