use clap::Args;
use gcp_pubsub::{Error, Result};
use tracing::info;

use super::ConnectionArgs;

#[derive(Args)]
pub struct PublishArgs {
    #[command(flatten)]
    connection: ConnectionArgs,
    /// Topic name
    #[arg(long, short)]
    topic: String,
    /// JSON payloads, one message each
    #[arg(required = true)]
    payloads: Vec<String>,
}

/// Publish each payload and print the resulting message ids, one per line.
pub async fn run_publish(args: PublishArgs) -> Result<()> {
    let payloads = parse_payloads(&args.payloads)?;
    let topic = args.connection.connect()?.topic(args.topic)?;

    let ids = topic.publish(&payloads).await?;
    info!(topic = %topic.name(), count = ids.len(), "published");
    for id in ids {
        println!("{id}");
    }
    Ok(())
}

fn parse_payloads(raw: &[String]) -> Result<Vec<serde_json::Value>> {
    raw.iter()
        .map(|p| {
            serde_json::from_str(p)
                .map_err(|e| Error::InvalidArgument(format!("payload {p:?} is not JSON: {e}")))
        })
        .collect()
}
