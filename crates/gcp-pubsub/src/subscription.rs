//! Pull subscription: [`Subscription::pull`], [`Subscription::ack`] and the
//! long-running [`Subscription::listen`] loop.

use std::convert::Infallible;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::FutureExt as _;
use futures_util::future::join_all;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::auth::TokenProvider;
use crate::health;
use crate::liveness::{Liveness, watchdog};
use crate::options::ListenOptions;
use crate::transport::Transport;
use crate::types::{BoxError, Error, ReceivedMessage, Result};

/// Why [`Subscription::listen`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenExit {
    /// The cancellation token fired.
    Cancelled,
    /// No activity for longer than the liveness budget. The host should exit
    /// and let its supervisor restart it.
    Stalled { idle: Duration },
}

/// Handle to a pull subscription. Clone is a cheap Arc refcount bump.
#[derive(Clone)]
pub struct Subscription {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Transport,
    project: String,
    name: String,
    token: Arc<dyn TokenProvider>,
}

enum Outcome {
    Handled,
    NoData,
    Expired { age: Duration },
}

/// Aborts the health endpoint when `listen` returns or is dropped.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl Subscription {
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
            return Err(Error::InvalidArgument("subscription cannot be empty".into()));
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

    pub fn project(&self) -> &str {
        &self.inner.project
    }

    async fn fresh_token(&self) -> Result<String> {
        self.inner.token.token().await.map_err(Error::TokenFetch)
    }

    /// Pull up to `max_messages` envelopes. No messages is an empty batch.
    pub async fn pull(&self, max_messages: u32) -> Result<Vec<ReceivedMessage>> {
        if max_messages == 0 {
            return Err(Error::InvalidArgument(
                "max_messages must be at least 1".into(),
            ));
        }
        let token = self.fresh_token().await?;
        self.inner
            .transport
            .pull(&self.inner.project, &self.inner.name, &token, max_messages)
            .await
    }

    /// Acknowledge envelopes by ack id. Fails locally on an empty list.
    pub async fn ack(&self, ack_ids: &[String]) -> Result<()> {
        if ack_ids.is_empty() {
            return Err(Error::InvalidArgument("ack ids cannot be empty".into()));
        }
        let token = self.fresh_token().await?;
        self.inner
            .transport
            .ack(&self.inner.project, &self.inner.name, &token, ack_ids)
            .await
    }

    /// Acknowledge a single envelope. Same request as `ack(&[id])`.
    pub async fn ack_one(&self, ack_id: &str) -> Result<()> {
        self.ack(&[ack_id.to_string()]).await
    }

    /// Poll, dispatch and ack until `cancel` fires or the watchdog trips.
    ///
    /// Each batch is processed concurrently and fully acked before the next
    /// pull. Every envelope is acked exactly once whatever the handler does.
    /// Transport and handler failures are logged and never end the loop; the
    /// only `Err` is an invalid `options` or a health port that cannot be bound.
    pub async fn listen<H, Fut>(
        &self,
        handler: H,
        options: ListenOptions,
        cancel: CancellationToken,
    ) -> Result<ListenExit>
    where
        H: Fn(serde_json::Value) -> Fut + Send + Sync,
        Fut: Future<Output = std::result::Result<(), BoxError>> + Send,
    {
        options.validate()?;
        let liveness = Liveness::new(options.effective_timeout());

        let _health = match options.health_port {
            Some(port) => {
                let listener = TcpListener::bind(("0.0.0.0", port)).await?;
                let liveness = liveness.clone();
                Some(AbortOnDrop(tokio::spawn(async move {
                    if let Err(e) = health::serve(listener, liveness).await {
                        error!(error = %e, "health endpoint failed");
                    }
                })))
            }
            None => None,
        };

        info!(
            subscription = %self.inner.name,
            max_messages = options.max_messages,
            poll_sleep_ms = options.poll_sleep.as_millis() as u64,
            timeout_ms = liveness.budget().as_millis() as u64,
            "listening"
        );

        let exit = tokio::select! {
            _ = cancel.cancelled() => {
                info!(subscription = %self.inner.name, "listen cancelled");
                ListenExit::Cancelled
            }
            idle = watchdog(liveness.clone(), liveness.budget()) => {
                error!(
                    subscription = %self.inner.name,
                    idle_ms = idle.as_millis() as u64,
                    "no activity within liveness budget"
                );
                ListenExit::Stalled { idle }
            }
            never = self.poll_loop(&handler, &options, &liveness) => match never {},
        };

        Ok(exit)
    }

    async fn poll_loop<H, Fut>(
        &self,
        handler: &H,
        options: &ListenOptions,
        liveness: &Liveness,
    ) -> Infallible
    where
        H: Fn(serde_json::Value) -> Fut,
        Fut: Future<Output = std::result::Result<(), BoxError>>,
    {
        loop {
            match self.poll_once(handler, options, liveness).await {
                Ok(0) => {
                    debug!(
                        subscription = %self.inner.name,
                        sleep_ms = options.poll_sleep.as_millis() as u64,
                        "no messages, sleeping"
                    );
                    tokio::time::sleep(options.poll_sleep).await;
                }
                Ok(count) => {
                    debug!(subscription = %self.inner.name, count, "batch processed");
                }
                Err(e) => {
                    warn!(
                        subscription = %self.inner.name,
                        error = %e,
                        sleep_ms = options.poll_sleep.as_millis() as u64,
                        "listen iteration failed, sleeping"
                    );
                    tokio::time::sleep(options.poll_sleep).await;
                }
            }
        }
    }

    /// One pull plus processing of the whole batch. Returns the batch size.
    async fn poll_once<H, Fut>(
        &self,
        handler: &H,
        options: &ListenOptions,
        liveness: &Liveness,
    ) -> Result<usize>
    where
        H: Fn(serde_json::Value) -> Fut,
        Fut: Future<Output = std::result::Result<(), BoxError>>,
    {
        let batch = self.pull(options.max_messages).await?;
        liveness.record();

        let count = batch.len();
        join_all(
            batch
                .into_iter()
                .map(|envelope| self.process(envelope, handler, options, liveness)),
        )
        .await;
        Ok(count)
    }

    async fn process<H, Fut>(
        &self,
        envelope: ReceivedMessage,
        handler: &H,
        options: &ListenOptions,
        liveness: &Liveness,
    ) where
        H: Fn(serde_json::Value) -> Fut,
        Fut: Future<Output = std::result::Result<(), BoxError>>,
    {
        liveness.record();
        let message_id = envelope.id();

        match dispatch(&envelope, handler, options).await {
            Ok(Outcome::Handled) => debug!(message_id, "message handled"),
            Ok(Outcome::NoData) => debug!(message_id, "message has no data, skipping"),
            Ok(Outcome::Expired { age }) => info!(
                message_id,
                age_ms = age.as_millis() as u64,
                "message past limit time, skipping"
            ),
            Err(e) => warn!(message_id, error = %e, "error processing message"),
        }

        debug!(message_id, "ack message");
        if let Err(e) = self.ack_one(&envelope.ack_id).await {
            warn!(message_id, error = %e, "ack failed");
        }
    }
}

async fn dispatch<H, Fut>(
    envelope: &ReceivedMessage,
    handler: &H,
    options: &ListenOptions,
) -> std::result::Result<Outcome, BoxError>
where
    H: Fn(serde_json::Value) -> Fut,
    Fut: Future<Output = std::result::Result<(), BoxError>>,
{
    if envelope.message.data.as_deref().is_none_or(str::is_empty) {
        return Ok(Outcome::NoData);
    }
    if let Some(limit) = options.message_age_limit()
        && let Some(age) = envelope.age(Utc::now())
        && age > limit
    {
        return Ok(Outcome::Expired { age });
    }
    let Some(payload) = envelope.decode_data()? else {
        return Ok(Outcome::NoData);
    };

    debug!(message_id = envelope.id(), "processing message");
    AssertUnwindSafe(async { handler(payload).await })
        .catch_unwind()
        .await
        .map_err(|panic| -> BoxError {
            format!("handler panicked: {}", panic_message(&*panic)).into()
        })??;
    Ok(Outcome::Handled)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticToken;
    use crate::types::PubsubMessage;

    fn transport() -> Transport {
        Transport::with_base_url("http://127.0.0.1:9").unwrap()
    }

    fn token() -> Arc<dyn TokenProvider> {
        Arc::new(StaticToken("t".into()))
    }

    async fn never_called(_v: serde_json::Value) -> std::result::Result<(), BoxError> {
        panic!("handler must not run")
    }

    async fn panicking(_v: serde_json::Value) -> std::result::Result<(), BoxError> {
        panic!("kaboom")
    }

    fn envelope(data: Option<&str>, age: chrono::Duration) -> ReceivedMessage {
        ReceivedMessage {
            ack_id: "ack".into(),
            message: PubsubMessage {
                data: data.map(String::from),
                message_id: Some("m-1".into()),
                publish_time: Some(Utc::now() - age),
                ..Default::default()
            },
        }
    }

    #[test]
    fn construction_requires_identity() {
        assert!(Subscription::new(transport(), "proj", "sub", token()).is_ok());
        assert!(matches!(
            Subscription::new(transport(), "", "sub", token()),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            Subscription::new(transport(), "proj", "", token()),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn ack_empty_fails_without_request() {
        // Port 9 is unroutable for HTTP; a request would surface as an Api error.
        let sub = Subscription::new(transport(), "proj", "sub", token()).unwrap();
        assert!(matches!(sub.ack(&[]).await, Err(Error::InvalidArgument(_))));
        assert!(matches!(sub.pull(0).await, Err(Error::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn dispatch_skips_missing_data() {
        let env = envelope(None, chrono::Duration::zero());
        let outcome = dispatch(&env, &never_called, &ListenOptions::default()).await.unwrap();
        assert!(matches!(outcome, Outcome::NoData));
    }

    #[tokio::test]
    async fn dispatch_skips_expired_message() {
        let options = ListenOptions {
            limit_message_time: Some(Duration::from_secs(60)),
            ..Default::default()
        };
        let env = envelope(Some("eyJ4IjoxfQ=="), chrono::Duration::seconds(120));
        let outcome = dispatch(&env, &never_called, &options).await.unwrap();
        assert!(matches!(outcome, Outcome::Expired { age } if age >= Duration::from_secs(120)));
    }

    #[tokio::test]
    async fn zero_age_limit_handles_every_message() {
        let calls = std::sync::atomic::AtomicUsize::new(0);
        let handler = |_v: serde_json::Value| {
            calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async { Ok::<(), BoxError>(()) }
        };
        let options = ListenOptions {
            limit_message_time: Some(Duration::ZERO),
            ..Default::default()
        };
        assert!(options.validate().is_ok());
        let env = envelope(Some("eyJ4IjoxfQ=="), chrono::Duration::milliseconds(1));
        let outcome = dispatch(&env, &handler, &options).await.unwrap();
        assert!(matches!(outcome, Outcome::Handled));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dispatch_runs_handler_within_limit() {
        let seen = std::sync::Mutex::new(Vec::new());
        let handler = |v: serde_json::Value| {
            seen.lock().unwrap().push(v);
            async { Ok::<(), BoxError>(()) }
        };
        let options = ListenOptions {
            limit_message_time: Some(Duration::from_secs(60)),
            ..Default::default()
        };
        let env = envelope(Some("eyJ4IjoxfQ=="), chrono::Duration::seconds(5));
        let outcome = dispatch(&env, &handler, &options).await.unwrap();
        assert!(matches!(outcome, Outcome::Handled));
        assert_eq!(*seen.lock().unwrap(), vec![serde_json::json!({"x": 1})]);
    }

    #[tokio::test]
    async fn dispatch_surfaces_handler_error_and_panic() {
        let env = envelope(Some("eyJ4IjoxfQ=="), chrono::Duration::zero());
        let options = ListenOptions::default();

        let failing = |_v: serde_json::Value| async { Err::<(), BoxError>("boom".into()) };
        let err = dispatch(&env, &failing, &options).await.err().unwrap();
        assert_eq!(err.to_string(), "boom");

        let err = dispatch(&env, &panicking, &options).await.err().unwrap();
        assert!(err.to_string().contains("kaboom"));
    }

    #[tokio::test]
    async fn listen_rejects_invalid_options() {
        let sub = Subscription::new(transport(), "proj", "sub", token()).unwrap();
        let options = ListenOptions {
            max_messages: 0,
            ..Default::default()
        };
        let result = sub
            .listen(
                |_v| async { Ok::<(), BoxError>(()) },
                options,
                CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }
}
