mod listen;
mod publish;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use gcp_pubsub::{DEFAULT_BASE_URL, Error, PubSub, Result, StaticToken, Transport};

pub use listen::{ListenArgs, run_listen};
pub use publish::{PublishArgs, run_publish};

/// Connection flags shared by every subcommand.
#[derive(Args)]
pub struct ConnectionArgs {
    /// Service-account key file; supplies the project id when --project is absent
    #[arg(long, env = "GOOGLE_APPLICATION_CREDENTIALS")]
    credentials: Option<PathBuf>,
    /// Google Cloud project id
    #[arg(long, env = "PUBSUB_PROJECT")]
    project: Option<String>,
    /// OAuth2 access token sent as the bearer credential
    #[arg(long, env = "PUBSUB_ACCESS_TOKEN", hide_env_values = true)]
    token: String,
    /// Pub/Sub REST endpoint (e.g. an emulator)
    #[arg(long, env = "PUBSUB_ENDPOINT", default_value = DEFAULT_BASE_URL)]
    endpoint: String,
}

impl ConnectionArgs {
    fn connect(self) -> Result<PubSub> {
        let token = Arc::new(StaticToken(self.token));
        let transport = Transport::with_base_url(self.endpoint)?;
        if let Some(project) = self.project {
            return Ok(PubSub::with_transport(project, token, transport));
        }
        match self.credentials {
            Some(path) => {
                let credentials = gcp_pubsub::Credentials::from_file(&path)?;
                Ok(PubSub::with_transport(credentials.project_id, token, transport))
            }
            None => Err(Error::InvalidArgument(
                "project is required (set --project / PUBSUB_PROJECT or --credentials)".into(),
            )),
        }
    }
}
