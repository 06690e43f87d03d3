//! Minimal Google Cloud Pub/Sub client over the REST API.
//!
//! Pulls batches from a subscription, dispatches each payload to a handler,
//! acknowledges, and publishes to topics.
//!
//! # Features
//! - Pull/ack/publish with a caller-supplied bearer token source
//! - Long-running [`Subscription::listen`] loop that never dies on transport
//!   or handler errors
//! - Liveness watchdog: `listen` returns [`ListenExit::Stalled`] when no poll
//!   or message activity happened within the budget
//! - Optional `GET /status` health endpoint
//!
//! # Example
//! ```no_run
//! # async fn example() -> Result<(), gcp_pubsub::Error> {
//! use std::sync::Arc;
//! use gcp_pubsub::{ListenExit, ListenOptions, PubSub, StaticToken};
//! use tokio_util::sync::CancellationToken;
//!
//! let pubsub = PubSub::new("my-project", Arc::new(StaticToken("ya29...".into())))?;
//! let sub = pubsub.subscription("orders-sub")?;
//!
//! let exit = sub
//!     .listen(
//!         |payload| async move {
//!             println!("got: {payload}");
//!             Ok::<(), gcp_pubsub::BoxError>(())
//!         },
//!         ListenOptions::from_env()?,
//!         CancellationToken::new(),
//!     )
//!     .await?;
//! if let ListenExit::Stalled { .. } = exit {
//!     std::process::exit(3);
//! }
//! # Ok(())
//! # }
//! ```

mod auth;
mod client;
pub mod health;
mod liveness;
mod options;
mod subscription;
mod topic;
mod transport;
mod types;

pub use auth::{Credentials, StaticToken, TokenFuture, TokenProvider};
pub use client::PubSub;
pub use liveness::{Liveness, LivenessStatus, watchdog};
pub use options::{DEFAULT_MAX_MESSAGES, DEFAULT_POLL_SLEEP, HEALTH_PORT_ENV, ListenOptions};
pub use subscription::{ListenExit, Subscription};
pub use topic::Topic;
pub use transport::{DEFAULT_BASE_URL, Transport};
pub use types::{BoxError, Error, PubsubMessage, ReceivedMessage, Result};
