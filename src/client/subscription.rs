//! Reconnecting subscription client.
//!
//! Maintains a single live connection to a user's event stream and
//! recovers from drops without caller involvement: every failure
//! schedules one reconnect after a capped exponential backoff, and the
//! retry counter resets on each successful open. Runs until shut down.

use futures::StreamExt;
use reqwest::header;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::models::UserRole;
use crate::sse::{FrameParser, SseEvent};

pub const INITIAL_BACKOFF: Duration = Duration::from_millis(1000);
pub const MAX_BACKOFF: Duration = Duration::from_millis(30_000);

/// Delay before reconnect attempt number `retry` (0-based):
/// `min(initial × 2^retry, max)`.
pub fn backoff_delay(retry: u32, initial: Duration, max: Duration) -> Duration {
    let factor = 1u64 << retry.min(20);
    let millis = (initial.as_millis() as u64).saturating_mul(factor);
    Duration::from_millis(millis.min(max.as_millis() as u64))
}

#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    /// Service base URL, e.g. `http://localhost:8080`
    pub base_url: String,
    pub role: UserRole,
    /// Session JWT, sent as the `token` cookie
    pub token: String,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl SubscriptionConfig {
    pub fn new(base_url: impl Into<String>, role: UserRole, token: impl Into<String>) -> Self {
        SubscriptionConfig {
            base_url: base_url.into(),
            role,
            token: token.into(),
            initial_backoff: INITIAL_BACKOFF,
            max_backoff: MAX_BACKOFF,
        }
    }

    fn subscribe_url(&self) -> String {
        format!(
            "{}/api/{}/notifications/subscribe",
            self.base_url.trim_end_matches('/'),
            self.role.as_str()
        )
    }
}

/// Event callback: receives the event name and its parsed JSON payload.
pub type EventCallback = dyn Fn(&str, serde_json::Value) + Send + Sync;

/// Handle to a running subscription.
///
/// [`Subscription::shutdown`] tears the loop down and waits for it to
/// finish. Dropping the handle closes the shutdown channel, which also
/// stops the task at its next select point, just without waiting for it.
pub struct Subscription {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
    connected: Arc<AtomicBool>,
}

impl Subscription {
    /// Start the subscription loop on a background task.
    pub fn spawn<F>(config: SubscriptionConfig, callback: F) -> Self
    where
        F: Fn(&str, serde_json::Value) + Send + Sync + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let connected = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(run_loop(
            config,
            Arc::new(callback),
            connected.clone(),
            shutdown_rx,
        ));
        Subscription {
            shutdown_tx,
            task,
            connected,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Tear the subscription down: closes the active stream, cancels any
    /// pending reconnect, and waits for the task to finish. No further
    /// connection attempts happen afterwards.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.task.await;
    }
}

enum StreamEnd {
    /// Connection failed or dropped; schedule a reconnect.
    Failed,
    /// Shutdown was signalled; stop for good.
    Shutdown,
}

async fn run_loop(
    config: SubscriptionConfig,
    callback: Arc<EventCallback>,
    connected: Arc<AtomicBool>,
    mut shutdown: watch::Receiver<bool>,
) {
    let client = reqwest::Client::new();
    let mut retry: u32 = 0;

    loop {
        let end = connect_and_stream(
            &client,
            &config,
            &callback,
            &connected,
            &mut retry,
            &mut shutdown,
        )
        .await;
        connected.store(false, Ordering::SeqCst);

        if matches!(end, StreamEnd::Shutdown) {
            break;
        }

        let delay = backoff_delay(retry, config.initial_backoff, config.max_backoff);
        retry = retry.saturating_add(1);
        tracing::debug!(delay_ms = delay.as_millis() as u64, retry, "scheduling reconnect");

        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
    tracing::debug!("subscription torn down");
}

async fn connect_and_stream(
    client: &reqwest::Client,
    config: &SubscriptionConfig,
    callback: &Arc<EventCallback>,
    connected: &AtomicBool,
    retry: &mut u32,
    shutdown: &mut watch::Receiver<bool>,
) -> StreamEnd {
    let request = client
        .get(config.subscribe_url())
        .header(header::ACCEPT, "text/event-stream")
        .header(header::COOKIE, format!("token={}", config.token));

    let response = tokio::select! {
        _ = shutdown.changed() => return StreamEnd::Shutdown,
        result = request.send() => match result {
            Ok(response) => response,
            Err(err) => {
                tracing::debug!(error = %err, "stream open failed");
                return StreamEnd::Failed;
            }
        }
    };

    if !response.status().is_success() {
        tracing::debug!(status = %response.status(), "stream open rejected");
        return StreamEnd::Failed;
    }
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if !content_type.starts_with("text/event-stream") {
        tracing::debug!(content_type, "unexpected content type");
        return StreamEnd::Failed;
    }

    // open succeeded: the backoff sequence restarts from here
    *retry = 0;
    connected.store(true, Ordering::SeqCst);
    tracing::debug!(url = %config.subscribe_url(), "stream open");

    let mut parser = FrameParser::new();
    let mut body = response.bytes_stream();
    loop {
        tokio::select! {
            _ = shutdown.changed() => return StreamEnd::Shutdown,
            chunk = body.next() => match chunk {
                Some(Ok(bytes)) => {
                    for event in parser.push(&bytes) {
                        dispatch(event, callback);
                    }
                }
                Some(Err(err)) => {
                    tracing::debug!(error = %err, "stream dropped");
                    return StreamEnd::Failed;
                }
                None => {
                    tracing::debug!("stream closed by server");
                    return StreamEnd::Failed;
                }
            }
        }
    }
}

fn dispatch(event: SseEvent, callback: &Arc<EventCallback>) {
    match serde_json::from_str::<serde_json::Value>(&event.data) {
        Ok(payload) => callback(&event.event, payload),
        Err(err) => {
            // malformed payloads are discarded; the stream stays open
            tracing::debug!(event = %event.event, error = %err, "discarding malformed payload");
        }
    }
}
