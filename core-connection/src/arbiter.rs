//! # Connection Arbiter
//!
//! Races identity probes against every endpoint candidate and publishes the
//! first one that answers.
//!
//! ## Race rules
//!
//! - Candidates are stably reordered so local ones are spawned first. All
//!   probes then run concurrently; ordering never delays a remote probe.
//! - The first successful probe wins. The winner alone writes the shared
//!   [`ActiveEndpoint`]; every other probe is aborted right away.
//! - A probe that errors or panics counts as that candidate's failure.
//! - Races are serialized, so two overlapping races cannot both publish.

use crate::endpoint::{ActiveEndpoint, Endpoint, EndpointCandidate};
use crate::error::{ProbeFailure, RaceError};
use crate::prober::EndpointProber;
use core_runtime::events::{ConnectionEvent, CoreEvent, EventBus};
use core_runtime::logging::redact_url;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

type ProbeResult = (String, std::result::Result<Endpoint, String>);

pub struct ConnectionArbiter {
    prober: Arc<dyn EndpointProber>,
    active: Arc<ActiveEndpoint>,
    event_bus: EventBus,
    race_lock: Mutex<()>,
}

impl ConnectionArbiter {
    pub fn new(
        prober: Arc<dyn EndpointProber>,
        active: Arc<ActiveEndpoint>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            prober,
            active,
            event_bus,
            race_lock: Mutex::new(()),
        }
    }

    pub fn active_endpoint(&self) -> &Arc<ActiveEndpoint> {
        &self.active
    }

    /// Select an endpoint among `candidates` within `timeout`.
    ///
    /// # Errors
    ///
    /// - `RaceError::NoCandidates` for an empty list
    /// - `RaceError::AllFailed` when every probe failed before the deadline
    /// - `RaceError::Timeout` when probes were still running at the deadline
    #[instrument(skip(self, candidates), fields(candidates = candidates.len()))]
    pub async fn race(
        &self,
        candidates: Vec<EndpointCandidate>,
        timeout: Duration,
    ) -> Result<Endpoint, RaceError> {
        if candidates.is_empty() {
            return Err(self.fail(RaceError::NoCandidates));
        }

        let _race = self.race_lock.lock().await;
        let started = Instant::now();
        // A timeout past the clock's range means no deadline.
        let deadline = tokio::time::Instant::now().checked_add(timeout);

        let mut ordered = candidates;
        ordered.sort_by_key(|candidate| !candidate.is_local);

        self.emit(ConnectionEvent::RaceStarted {
            candidates: ordered.len(),
        });

        let mut probes: JoinSet<ProbeResult> = JoinSet::new();
        for candidate in ordered {
            let prober = Arc::clone(&self.prober);
            probes.spawn(async move {
                let outcome = AssertUnwindSafe(prober.probe(&candidate))
                    .catch_unwind()
                    .await;
                let outcome = match outcome {
                    Ok(Ok(endpoint)) => Ok(endpoint),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(_) => Err("probe panicked".to_string()),
                };
                (candidate.uri, outcome)
            });
        }

        let mut failures = Vec::new();
        loop {
            let next = match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, probes.join_next()).await,
                None => Ok(probes.join_next().await),
            };
            match next {
                Err(_) => {
                    let outstanding = probes.len();
                    probes.abort_all();
                    return Err(self.fail(RaceError::Timeout {
                        outstanding,
                        failures,
                    }));
                }
                Ok(None) => {
                    return Err(self.fail(RaceError::AllFailed { failures }));
                }
                Ok(Some(Ok((_, Ok(endpoint))))) => {
                    probes.abort_all();
                    self.active.publish(endpoint.clone());

                    let elapsed_ms = started.elapsed().as_millis() as u64;
                    info!(
                        uri = %redact_url(&endpoint.uri),
                        is_local = endpoint.is_local,
                        elapsed_ms,
                        "Endpoint selected"
                    );
                    self.emit(ConnectionEvent::EndpointSelected {
                        uri: endpoint.uri.clone(),
                        is_local: endpoint.is_local,
                        elapsed_ms,
                    });
                    return Ok(endpoint);
                }
                Ok(Some(Ok((uri, Err(message))))) => {
                    debug!(uri = %redact_url(&uri), error = %message, "Probe failed");
                    failures.push(ProbeFailure { uri, message });
                }
                Ok(Some(Err(join_error))) => {
                    failures.push(ProbeFailure {
                        uri: "<unknown>".to_string(),
                        message: join_error.to_string(),
                    });
                }
            }
        }
    }

    fn fail(&self, error: RaceError) -> RaceError {
        warn!(reason = error.reason(), error = %error, "Endpoint race failed");
        self.emit(ConnectionEvent::RaceFailed {
            reason: error.reason().to_string(),
            message: error.to_string(),
        });
        error
    }

    fn emit(&self, event: ConnectionEvent) {
        let _ = self.event_bus.emit(CoreEvent::Connection(event));
    }
}
