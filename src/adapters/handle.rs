//! AdapterHandle - lifecycle wrapper around one adapter's logic.
//!
//! Supervises the logic's main task, restarts it on unexpected failure
//! within a bounded budget, and guarantees the Stopping/Stopped event pair
//! on every terminal exit so the aggregator always flushes.

use anyhow::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::adapters::traits::{AdapterContext, AdapterLogic};
use crate::bus::{BusEvent, SharedBus};

/// Restart policy applied on unexpected logic termination.
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    /// Pause between a failure and the next attempt.
    pub backoff: Duration,
    /// Consecutive failures tolerated before giving up.
    pub max_restarts: u32,
    /// A run at least this long resets the failure counter.
    pub healthy_after: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            backoff: Duration::from_secs(1),
            max_restarts: 5,
            healthy_after: Duration::from_secs(300),
        }
    }
}

/// Wraps an [`AdapterLogic`] with lifecycle management:
/// - watches the bus for `ShuttingDown` and its token for direct stop
/// - restarts crashed logic per [`RestartPolicy`]
/// - publishes `AdapterStopping` before `stop()` and `AdapterStopped` after
pub struct AdapterHandle {
    logic: Arc<dyn AdapterLogic>,
    bus: SharedBus,
    shutdown: CancellationToken,
    policy: RestartPolicy,
}

impl AdapterHandle {
    pub fn new(logic: Arc<dyn AdapterLogic>, bus: SharedBus, shutdown: CancellationToken) -> Self {
        Self {
            logic,
            bus,
            shutdown,
            policy: RestartPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RestartPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn prefix(&self) -> &'static str {
        self.logic.prefix()
    }

    pub fn logic(&self) -> &Arc<dyn AdapterLogic> {
        &self.logic
    }

    /// Supervise the logic until clean shutdown or budget exhaustion.
    ///
    /// Every exit path ends with `AdapterStopping` -> `logic.stop()` ->
    /// `AdapterStopped`; the final event is the shutdown ACK the
    /// coordinator waits on.
    pub async fn run(self) -> Result<()> {
        let prefix = self.logic.prefix();
        let mut failures: u32 = 0;
        let mut outcome = Ok(());

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let started = Instant::now();
            match self.run_once().await {
                Ok(()) => {
                    info!(adapter = prefix, "clean exit");
                    break;
                }
                Err(e) => {
                    if started.elapsed() >= self.policy.healthy_after {
                        info!(adapter = prefix, "stable run before failure, counter reset");
                        failures = 0;
                    }
                    failures += 1;

                    if failures >= self.policy.max_restarts {
                        error!(
                            adapter = prefix,
                            failures, "restart budget exhausted, giving up: {e:#}"
                        );
                        outcome = Err(e);
                        break;
                    }

                    warn!(
                        adapter = prefix,
                        attempt = failures,
                        "logic failed, restarting in {:?}: {e:#}",
                        self.policy.backoff
                    );

                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.policy.backoff) => {}
                    }
                }
            }
        }

        self.bus.publish(BusEvent::AdapterStopping {
            adapter: prefix.to_string(),
        });
        self.logic.stop().await;
        self.bus.publish(BusEvent::AdapterStopped {
            adapter: prefix.to_string(),
        });

        info!(adapter = prefix, "stopped");
        outcome
    }

    /// One supervised run of the logic.
    async fn run_once(&self) -> Result<()> {
        let prefix = self.logic.prefix();
        let mut rx = self.bus.subscribe();

        let ctx = AdapterContext {
            bus: self.bus.clone(),
            shutdown: self.shutdown.clone(),
        };

        tokio::select! {
            result = self.logic.run(ctx) => result,

            // ShuttingDown on the bus means cooperative stop, not failure
            _ = async {
                loop {
                    match rx.recv().await {
                        Ok(BusEvent::ShuttingDown) | Err(_) => break,
                        Ok(_) => {}
                    }
                }
            } => {
                info!(adapter = prefix, "stopping on ShuttingDown");
                Ok(())
            }

            _ = self.shutdown.cancelled() => {
                info!(adapter = prefix, "cancelled via token");
                Ok(())
            }
        }
    }
}
