//! Status polling fallback
//!
//! Used while the live event channel is unavailable. The poller publishes
//! every snapshot on a `watch` channel and stops on its own once the session
//! is finished, the server refuses the request or the circuit breaker opens.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, warn};

use voting::{SessionStatus, StatusSnapshot};

use crate::backoff::{BackoffPolicy, CircuitBreaker};
use crate::error::{ClientError, ClientResult};

/// Anything that can answer a status query
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch_status(&self, session_id: i64) -> ClientResult<StatusSnapshot>;
}

/// Status source backed by the HTTP API
#[derive(Clone)]
pub struct HttpStatusSource {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpStatusSource {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }
}

#[async_trait]
impl StatusSource for HttpStatusSource {
    async fn fetch_status(&self, session_id: i64) -> ClientResult<StatusSnapshot> {
        let response = self
            .client
            .get(format!("{}/sessions/{}/status", self.base_url, session_id))
            .bearer_auth(&self.token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ClientError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json().await?)
    }
}

/// Why a poller stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The session reached a terminal status
    SessionFinished(SessionStatus),
    CircuitOpen { failures: u32 },
    /// The server refused the request in a way retrying cannot fix
    Rejected(String),
    /// Every snapshot receiver was dropped
    Cancelled,
}

pub struct StatusPoller<S> {
    source: Arc<S>,
    session_id: i64,
    policy: BackoffPolicy,
}

impl<S: StatusSource + 'static> StatusPoller<S> {
    pub fn new(source: Arc<S>, session_id: i64, policy: BackoffPolicy) -> Self {
        Self {
            source,
            session_id,
            policy,
        }
    }

    /// Poll until a stop condition, publishing each snapshot on `snapshots`
    pub async fn run(&self, snapshots: watch::Sender<Option<StatusSnapshot>>) -> StopReason {
        let mut breaker = CircuitBreaker::new(self.policy);

        loop {
            if snapshots.is_closed() {
                return StopReason::Cancelled;
            }

            match self.source.fetch_status(self.session_id).await {
                Ok(snapshot) => {
                    breaker.record_success();
                    let status = snapshot.status;
                    snapshots.send_replace(Some(snapshot));

                    if status.is_terminal() {
                        debug!(
                            "Session {} is {}, polling stopped",
                            self.session_id, status
                        );
                        return StopReason::SessionFinished(status);
                    }
                    sleep(self.policy.interval).await;
                }
                Err(e) if !e.is_retryable() => {
                    warn!("Status polling of session {} rejected: {}", self.session_id, e);
                    return StopReason::Rejected(e.to_string());
                }
                Err(e) => {
                    let delay = breaker.record_failure();
                    if breaker.is_open() {
                        warn!(
                            "Status polling of session {} gave up after {} failures: {}",
                            self.session_id,
                            breaker.consecutive_failures(),
                            e
                        );
                        return StopReason::CircuitOpen {
                            failures: breaker.consecutive_failures(),
                        };
                    }

                    debug!(
                        "Status poll of session {} failed ({}), retrying in {:?}",
                        self.session_id, e, delay
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    /// Run the poller on its own task
    pub fn spawn(self) -> PollerHandle {
        let (sender, receiver) = watch::channel(None);
        let task = tokio::spawn(async move { self.run(sender).await });

        PollerHandle { receiver, task }
    }
}

pub struct PollerHandle {
    receiver: watch::Receiver<Option<StatusSnapshot>>,
    task: JoinHandle<StopReason>,
}

impl PollerHandle {
    pub fn latest(&self) -> Option<StatusSnapshot> {
        self.receiver.borrow().clone()
    }

    /// Wait for the next snapshot; `None` once the poller stopped
    pub async fn changed(&mut self) -> Option<StatusSnapshot> {
        self.receiver.changed().await.ok()?;
        self.receiver.borrow_and_update().clone()
    }

    /// Wait for the poller to stop
    pub async fn join(self) -> StopReason {
        self.task.await.unwrap_or(StopReason::Cancelled)
    }

    pub fn stop(self) {
        self.task.abort();
    }
}
