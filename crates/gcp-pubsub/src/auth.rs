//! Bearer-token source and service-account credentials.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use async_trait::async_trait;
use serde::Deserialize;

use crate::types::{BoxError, Error, Result};

/// A future that returns a bearer token.
pub type TokenFuture = Pin<Box<dyn Future<Output = std::result::Result<String, BoxError>> + Send>>;

/// Supplies a bearer token on demand. Called before every API request;
/// caching and refresh are the implementation's business.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self) -> std::result::Result<String, BoxError>;
}

/// A fixed token, e.g. from `gcloud auth print-access-token` or an emulator.
#[derive(Clone)]
pub struct StaticToken(pub String);

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self) -> std::result::Result<String, BoxError> {
        Ok(self.0.clone())
    }
}

#[async_trait]
impl<F> TokenProvider for F
where
    F: Fn() -> TokenFuture + Send + Sync,
{
    async fn token(&self) -> std::result::Result<String, BoxError> {
        (self)().await
    }
}

/// The fields of a service-account key file this crate cares about.
#[derive(Clone, Deserialize)]
pub struct Credentials {
    pub project_id: String,
    pub client_email: String,
    pub private_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("project_id", &self.project_id)
            .field("client_email", &self.client_email)
            .finish_non_exhaustive()
    }
}

impl Credentials {
    /// Read a service-account JSON key file.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::Credentials(format!(
                "credentials file not found: {}",
                path.display()
            )));
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Credentials(format!("read {}: {e}", path.display())))?;
        serde_json::from_str(&content)
            .map_err(|e| Error::Credentials(format!("parse {}: {e}", path.display())))
    }
}
