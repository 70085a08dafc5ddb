use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::backoff::RetryPolicy;
use super::poll::StatusPoller;
use super::EventSink;
use crate::backend::{EventStream, LinkBackend};
use crate::domain::Freshness;
use crate::error::{LinkError, NetworkError, StreamError};

/// Settings for one operator's transport.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportConfig {
    /// Operator id the push subscription is keyed by.
    pub operator_id: String,
    pub poll_interval: Duration,
    pub retry: RetryPolicy,
    /// Consecutive failed poll rounds before channels are marked unreachable.
    pub failure_threshold: u32,
    /// Upper bound for a single subscribe or status request.
    pub request_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            operator_id: "default".to_string(),
            poll_interval: Duration::from_secs(2),
            retry: RetryPolicy::default(),
            failure_threshold: 3,
            request_timeout: Duration::from_secs(15),
        }
    }
}

/// State of the push subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushState {
    Connecting,
    Live,
    /// Push is down; polling is authoritative until attempt `attempt` succeeds.
    Reconnecting { attempt: u32 },
    Stopped,
}

impl fmt::Display for PushState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PushState::Connecting => write!(f, "connecting"),
            PushState::Live => write!(f, "live"),
            PushState::Reconnecting { attempt } => write!(f, "reconnecting (attempt {})", attempt),
            PushState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Background task that keeps an [`EventSink`] fed from the backend.
///
/// Dropping the adapter stops the task.
pub struct TransportAdapter {
    state_rx: watch::Receiver<PushState>,
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl TransportAdapter {
    /// Start the transport on the current tokio runtime.
    pub fn spawn(
        backend: Arc<dyn LinkBackend>,
        sink: Arc<dyn EventSink>,
        config: TransportConfig,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(PushState::Connecting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            run_transport(backend, sink, config, state_tx, shutdown_rx).await;
        });

        Self {
            state_rx,
            shutdown_tx,
            task: Some(task),
        }
    }

    pub fn state(&self) -> PushState {
        *self.state_rx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<PushState> {
        self.state_rx.clone()
    }

    pub fn is_live(&self) -> bool {
        self.state() == PushState::Live
    }

    /// Stop the transport and wait for the task to finish.
    pub async fn shutdown(mut self) {
        info!("Shutting down transport");
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Transport task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for TransportAdapter {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// How a push stream ended.
enum StreamEnd {
    Shutdown,
    Dropped(LinkError),
}

/// Subscribe, consume, and on loss poll until the backoff delay has passed.
async fn run_transport(
    backend: Arc<dyn LinkBackend>,
    sink: Arc<dyn EventSink>,
    config: TransportConfig,
    state_tx: watch::Sender<PushState>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut poller = StatusPoller::new(
        Arc::clone(&backend),
        config.request_timeout,
        config.failure_threshold,
    );
    let mut attempt: u32 = 0;
    let mut next_poll = Instant::now();

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let subscribed = tokio::select! {
            _ = shutdown_rx.changed() => break,
            result = tokio::time::timeout(
                config.request_timeout,
                backend.subscribe(&config.operator_id),
            ) => result,
        };

        let error = match subscribed {
            Ok(Ok(stream)) => {
                if attempt > 0 {
                    info!(attempt, "push channel re-established");
                } else {
                    info!(operator = %config.operator_id, "push channel live");
                }
                attempt = 0;
                let _ = state_tx.send(PushState::Live);
                sink.set_freshness_all(Freshness::Live);

                // Catch up on whatever happened while push was down.
                poller.reset();
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = poller.poll_round(sink.as_ref()) => {}
                }

                match consume(stream, sink.as_ref(), &mut shutdown_rx).await {
                    StreamEnd::Shutdown => break,
                    StreamEnd::Dropped(err) => err,
                }
            }
            Ok(Err(err)) => err,
            Err(_) => LinkError::Stream(StreamError::SubscribeFailed {
                message: format!("no answer within {}s", config.request_timeout.as_secs()),
            }),
        };

        let delay = config.retry.delay_for_attempt(attempt, retry_hint_ms(&error));
        attempt = attempt.saturating_add(1);
        warn!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Push channel down, polling until reconnect"
        );
        let _ = state_tx.send(PushState::Reconnecting { attempt });
        sink.set_freshness_all(Freshness::Degraded);

        let deadline = Instant::now() + delay;
        if poll_until(
            &mut poller,
            sink.as_ref(),
            config.poll_interval,
            deadline,
            &mut next_poll,
            &mut shutdown_rx,
        )
        .await
        {
            break;
        }
    }

    info!("Transport loop ended");
    let _ = state_tx.send(PushState::Stopped);
}

/// Forward push events until the stream ends, fails, or shutdown is requested.
async fn consume(
    mut stream: EventStream,
    sink: &dyn EventSink,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> StreamEnd {
    loop {
        let item = tokio::select! {
            _ = shutdown_rx.changed() => return StreamEnd::Shutdown,
            item = stream.next() => item,
        };

        match item {
            Some(Ok(envelope)) => {
                debug!(
                    channel = %envelope.channel_id,
                    event = envelope.event.kind(),
                    "push event"
                );
                sink.deliver_event(envelope);
            }
            Some(Err(LinkError::Stream(err))) if !err.should_reconnect() => {
                // Skip malformed events without dropping the stream
                warn!(code = err.error_code(), "Skipping push event: {}", err);
            }
            Some(Err(err)) => return StreamEnd::Dropped(err),
            None => {
                return StreamEnd::Dropped(LinkError::Stream(StreamError::ServerClosed {
                    reason: None,
                }))
            }
        }
    }
}

/// Poll on `poll_interval` until `deadline`. Returns true on shutdown.
///
/// `next_poll` survives across reconnect attempts so quick subscribe failures
/// never poll faster than the interval.
async fn poll_until(
    poller: &mut StatusPoller,
    sink: &dyn EventSink,
    poll_interval: Duration,
    deadline: Instant,
    next_poll: &mut Instant,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> bool {
    loop {
        let now = Instant::now();
        if now >= deadline {
            return false;
        }

        if *next_poll <= now {
            tokio::select! {
                _ = shutdown_rx.changed() => return true,
                _ = poller.poll_round(sink) => {}
            }
            *next_poll = Instant::now() + poll_interval;
            continue;
        }

        let wake = (*next_poll).min(deadline);
        tokio::select! {
            _ = shutdown_rx.changed() => return true,
            _ = tokio::time::sleep_until(wake) => {}
        }
    }
}

fn retry_hint_ms(error: &LinkError) -> Option<u64> {
    match error {
        LinkError::Network(NetworkError::RateLimited {
            retry_after_secs: Some(secs),
        }) => Some(secs.saturating_mul(1_000)),
        _ => None,
    }
}
