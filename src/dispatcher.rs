//! Dispatcher: privileged coordinator shared by every sentinel
//!
//! One actor task owns the in-flight check map and drives the verifier.
//! Sentinels talk to it through a cloneable [`DispatcherHandle`]. Requests for
//! URLs that normalize identically join a single in-flight check, and the
//! resulting verdict is broadcast to every waiter as one shared `Arc`.
//!
//! ```text
//! Sentinel ──VerdictRequest──▶ DispatcherHandle ──mpsc──▶ actor
//!                                                          │ cache hit → reply
//!                                                          │ in flight → join
//!                                                          └ miss → spawn Verifier::query
//! ```

use crate::config::GuardConfig;
use crate::error::{GuardError, Result};
use crate::normalize::NormalizedUrl;
use crate::source::ThreatSource;
use crate::types::{CorrelationId, TabId, Verdict, VerdictRequest, VerdictResponse, VerdictSource, VerdictStats};
use crate::verifier::Verifier;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{self, JoinError, JoinHandle, JoinSet};

/// Where a verdict is delivered
#[derive(Debug)]
enum Reply {
    /// Awaited directly by [`DispatcherHandle::submit`]
    Direct(oneshot::Sender<Arc<Verdict>>),
    /// Per-document response channel, keyed by correlation id
    Channel(mpsc::UnboundedSender<VerdictResponse>),
}

#[derive(Debug)]
struct Waiter {
    correlation_id: CorrelationId,
    tab_id: TabId,
    reply: Reply,
}

/// Pending verification for one normalized URL
#[derive(Debug, Default)]
struct InFlightCheck {
    waiters: Vec<Waiter>,
}

#[derive(Debug)]
enum Command {
    Submit { request: VerdictRequest, reply: Reply },
    Stats(oneshot::Sender<VerdictStats>),
    InFlightCount(oneshot::Sender<usize>),
    Reset(oneshot::Sender<()>),
    Shutdown,
}

/// Cloneable handle for submitting verdict requests
#[derive(Debug, Clone)]
pub struct DispatcherHandle {
    tx: mpsc::Sender<Command>,
}

impl DispatcherHandle {
    /// Submit a request and wait for its verdict
    ///
    /// Fails only with `GuardError::Shutdown`.
    pub async fn submit(&self, request: VerdictRequest) -> Result<Arc<Verdict>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Submit {
            request,
            reply: Reply::Direct(reply),
        })
        .await?;
        rx.await.map_err(|_| GuardError::Shutdown)
    }

    /// Submit a request whose verdict is delivered on `responses`
    ///
    /// Returns once the request is queued. Delivery to a closed channel is
    /// silently dropped.
    pub async fn submit_with_reply(
        &self,
        request: VerdictRequest,
        responses: mpsc::UnboundedSender<VerdictResponse>,
    ) -> Result<()> {
        self.send(Command::Submit {
            request,
            reply: Reply::Channel(responses),
        })
        .await
    }

    /// Snapshot of aggregate statistics
    pub async fn stats(&self) -> Result<VerdictStats> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Stats(tx)).await?;
        rx.await.map_err(|_| GuardError::Shutdown)
    }

    /// Number of URLs currently being verified
    pub async fn in_flight_count(&self) -> Result<usize> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::InFlightCount(tx)).await?;
        rx.await.map_err(|_| GuardError::Shutdown)
    }

    /// Clear the verdict cache and statistics
    ///
    /// In-flight checks are not cancelled; they complete and repopulate the
    /// cache.
    pub async fn reset(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Reset(tx)).await?;
        rx.await.map_err(|_| GuardError::Shutdown)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.tx.send(command).await.map_err(|_| GuardError::Shutdown)
    }
}

#[cfg(test)]
impl DispatcherHandle {
    /// Handle whose queue nobody drains; keep the second value alive to
    /// hold the queue open
    pub(crate) fn unserviced(buffer: usize) -> (Self, impl Sized) {
        let (tx, rx) = mpsc::channel::<Command>(buffer.max(1));
        (Self { tx }, rx)
    }
}

/// Owner of the dispatcher actor
///
/// Created with [`Dispatcher::start`] and torn down with
/// [`Dispatcher::shutdown`]. Must be started inside a tokio runtime.
#[derive(Debug)]
pub struct Dispatcher {
    handle: DispatcherHandle,
    task: JoinHandle<()>,
}

impl Dispatcher {
    /// Validate the config and start the actor
    pub fn start(config: &GuardConfig, source: Arc<dyn ThreatSource>) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_verifier(
            Verifier::new(source, config),
            config.response_buffer,
        ))
    }

    /// Start the actor around an existing verifier
    pub fn with_verifier(verifier: Verifier, buffer: usize) -> Self {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        tracing::info!(source = verifier.source_name(), "Dispatcher started");
        let task = tokio::spawn(DispatcherActor::new(verifier).run(rx));
        Self {
            handle: DispatcherHandle { tx },
            task,
        }
    }

    /// A new handle for a sentinel
    pub fn handle(&self) -> DispatcherHandle {
        self.handle.clone()
    }

    pub async fn submit(&self, request: VerdictRequest) -> Result<Arc<Verdict>> {
        self.handle.submit(request).await
    }

    pub async fn stats(&self) -> Result<VerdictStats> {
        self.handle.stats().await
    }

    pub async fn reset(&self) -> Result<()> {
        self.handle.reset().await
    }

    /// Stop the actor and wait for it to exit
    ///
    /// Outstanding waiters are dropped; their submits fail with
    /// `GuardError::Shutdown`.
    pub async fn shutdown(self) {
        let _ = self.handle.tx.send(Command::Shutdown).await;
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Dispatcher task ended abnormally");
        }
    }
}

struct DispatcherActor {
    verifier: Verifier,
    in_flight: HashMap<NormalizedUrl, InFlightCheck>,
    stats: VerdictStats,
    tasks: JoinSet<(NormalizedUrl, Verdict)>,
    task_urls: HashMap<task::Id, NormalizedUrl>,
}

impl DispatcherActor {
    fn new(verifier: Verifier) -> Self {
        Self {
            verifier,
            in_flight: HashMap::new(),
            stats: VerdictStats::default(),
            tasks: JoinSet::new(),
            task_urls: HashMap::new(),
        }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        loop {
            tokio::select! {
                command = rx.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle(command),
                },
                Some(joined) = self.tasks.join_next_with_id(), if !self.tasks.is_empty() => {
                    self.complete(joined);
                }
            }
        }

        self.tasks.abort_all();
        tracing::info!(
            in_flight = self.in_flight.len(),
            "Dispatcher stopped"
        );
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Submit { request, reply } => self.submit(request, reply),
            Command::Stats(tx) => {
                let _ = tx.send(self.stats);
            }
            Command::InFlightCount(tx) => {
                let _ = tx.send(self.in_flight.len());
            }
            Command::Reset(tx) => {
                self.verifier.clear_cache();
                self.stats = VerdictStats::default();
                tracing::info!("Dispatcher reset, cache and statistics cleared");
                let _ = tx.send(());
            }
            Command::Shutdown => {}
        }
    }

    fn submit(&mut self, request: VerdictRequest, reply: Reply) {
        let VerdictRequest {
            correlation_id,
            normalized_url: url,
            tab_id,
        } = request;
        let waiter = Waiter {
            correlation_id,
            tab_id,
            reply,
        };

        if let Some(check) = self.in_flight.get_mut(&url) {
            check.waiters.push(waiter);
            self.stats.deduplicated += 1;
            tracing::debug!(
                url = %url,
                waiters = check.waiters.len(),
                "Joined in-flight check"
            );
            return;
        }

        // Pinned before the lookup so an expired entry stays cached until its
        // re-check lands
        self.verifier.pin(&url);
        if let Some(cached) = self.verifier.cached(&url) {
            self.verifier.unpin(&url);
            self.stats.cache_hits += 1;
            self.deliver(waiter, Arc::new(cached));
            return;
        }

        self.in_flight.insert(
            url.clone(),
            InFlightCheck {
                waiters: vec![waiter],
            },
        );

        let verifier = self.verifier.clone();
        let task_url = url.clone();
        let task = self.tasks.spawn(async move {
            let verdict = match AssertUnwindSafe(verifier.query(&url)).catch_unwind().await {
                Ok(verdict) => verdict,
                Err(_) => {
                    tracing::error!(url = %url, "Threat lookup panicked, issuing fallback verdict");
                    verifier.fallback(&url, "internal")
                }
            };
            (url, verdict)
        });
        self.task_urls.insert(task.id(), task_url);
    }

    fn complete(
        &mut self,
        joined: std::result::Result<(task::Id, (NormalizedUrl, Verdict)), JoinError>,
    ) {
        let (url, verdict) = match joined {
            Ok((id, done)) => {
                self.task_urls.remove(&id);
                done
            }
            Err(e) => {
                let Some(url) = self.task_urls.remove(&e.id()) else {
                    tracing::error!(error = %e, "Unknown verification task failed");
                    return;
                };
                tracing::error!(url = %url, error = %e, "Verification task failed, issuing fallback verdict");
                let verdict = self.verifier.fallback(&url, "internal");
                (url, verdict)
            }
        };

        self.verifier.record(&verdict);
        self.verifier.unpin(&url);
        match verdict.source() {
            VerdictSource::Live => self.stats.live_queries += 1,
            VerdictSource::Fallback => self.stats.fallbacks += 1,
            VerdictSource::Cache => {}
        }

        let verdict = Arc::new(verdict);
        let waiters = self
            .in_flight
            .remove(&url)
            .map(|check| check.waiters)
            .unwrap_or_default();
        tracing::debug!(
            url = %url,
            classification = ?verdict.classification(),
            waiters = waiters.len(),
            "In-flight check completed"
        );
        for waiter in waiters {
            self.deliver(waiter, verdict.clone());
        }
    }

    fn deliver(&mut self, waiter: Waiter, verdict: Arc<Verdict>) {
        self.stats.record_delivery(verdict.classification());
        let Waiter {
            correlation_id,
            tab_id,
            reply,
        } = waiter;

        let delivered = match reply {
            Reply::Direct(tx) => tx.send(verdict).is_ok(),
            Reply::Channel(tx) => tx
                .send(VerdictResponse {
                    correlation_id: correlation_id.clone(),
                    verdict,
                })
                .is_ok(),
        };
        if !delivered {
            tracing::debug!(
                correlation_id = %correlation_id,
                tab_id = tab_id.0,
                "Requester gone, verdict dropped"
            );
        }
    }
}
