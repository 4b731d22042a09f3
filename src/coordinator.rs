//! AdapterCoordinator - decides which adapter handles exist.
//!
//! Reads enabled-adapter configuration, instantiates exactly the enabled
//! handles (a disabled adapter never appears anywhere in the system), routes
//! commands by zone prefix, and drives acknowledged shutdown.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapters::handle::{AdapterHandle, RestartPolicy};
use crate::adapters::traits::AdapterLogic;
use crate::bus::{BusEvent, SharedBus};
use crate::error::BridgeError;

const DEFAULT_GRACE_TIMEOUT: Duration = Duration::from_secs(5);

struct AdapterEntry {
    logic: Arc<dyn AdapterLogic>,
    enabled: bool,
    /// Supervisor task while running.
    task: Option<JoinHandle<()>>,
    cancel: CancellationToken,
}

/// Registry of adapters; doubles as the command router (`prefix -> logic`).
pub struct AdapterCoordinator {
    adapters: RwLock<HashMap<String, AdapterEntry>>,
    bus: SharedBus,
    /// Parent of every per-adapter token.
    shutdown: CancellationToken,
    grace_timeout: Duration,
    restart_policy: RestartPolicy,
}

impl AdapterCoordinator {
    pub fn new(bus: SharedBus) -> Self {
        Self {
            adapters: RwLock::new(HashMap::new()),
            bus,
            shutdown: CancellationToken::new(),
            grace_timeout: DEFAULT_GRACE_TIMEOUT,
            restart_policy: RestartPolicy::default(),
        }
    }

    pub fn with_grace_timeout(mut self, timeout: Duration) -> Self {
        self.grace_timeout = timeout;
        self
    }

    pub fn with_restart_policy(mut self, policy: RestartPolicy) -> Self {
        self.restart_policy = policy;
        self
    }

    /// Register an adapter's logic with its enabled flag. Nothing runs until
    /// [`start_enabled`](Self::start_enabled) or
    /// [`set_enabled`](Self::set_enabled).
    pub async fn register(&self, logic: Arc<dyn AdapterLogic>, enabled: bool) {
        let prefix = logic.prefix().to_string();
        debug!(adapter = %prefix, enabled, "registered adapter");
        self.adapters.write().await.insert(
            prefix,
            AdapterEntry {
                logic,
                enabled,
                task: None,
                cancel: self.shutdown.child_token(),
            },
        );
    }

    /// Start every enabled, not-yet-running adapter.
    pub async fn start_enabled(&self) {
        let mut adapters = self.adapters.write().await;
        for (prefix, entry) in adapters.iter_mut() {
            if entry.enabled && entry.task.as_ref().map_or(true, |t| t.is_finished()) {
                Self::spawn_entry(prefix, entry, &self.bus, &self.restart_policy);
            }
        }
    }

    fn spawn_entry(
        prefix: &str,
        entry: &mut AdapterEntry,
        bus: &SharedBus,
        policy: &RestartPolicy,
    ) {
        let handle = AdapterHandle::new(entry.logic.clone(), bus.clone(), entry.cancel.clone())
            .with_policy(policy.clone());
        let prefix = prefix.to_string();
        entry.task = Some(tokio::spawn(async move {
            if let Err(e) = handle.run().await {
                warn!(adapter = %prefix, "adapter ended in failure: {e:#}");
            }
        }));
    }

    /// Idempotent runtime enable/disable. Enabling starts the handle with a
    /// fresh crash budget; disabling stops it and waits for the ACK.
    pub async fn set_enabled(&self, prefix: &str, enabled: bool) -> Result<(), BridgeError> {
        if enabled {
            let mut adapters = self.adapters.write().await;
            let entry = adapters
                .get_mut(prefix)
                .ok_or_else(|| BridgeError::NotFound(prefix.to_string()))?;
            entry.enabled = true;
            // A finished task (clean exit or exhausted crash budget) counts
            // as stopped; re-enabling gets a fresh handle and budget.
            if entry.task.as_ref().map_or(true, |t| t.is_finished()) {
                entry.cancel = self.shutdown.child_token();
                Self::spawn_entry(prefix, entry, &self.bus, &self.restart_policy);
                info!(adapter = prefix, "adapter started");
            }
            Ok(())
        } else {
            let task = {
                let mut adapters = self.adapters.write().await;
                let entry = adapters
                    .get_mut(prefix)
                    .ok_or_else(|| BridgeError::NotFound(prefix.to_string()))?;
                entry.enabled = false;
                entry.cancel.cancel();
                // Reset immediately so a concurrent enable gets a live token
                entry.cancel = self.shutdown.child_token();
                entry.task.take()
            };

            if let Some(task) = task {
                info!(adapter = prefix, "stopping adapter");
                match tokio::time::timeout(self.grace_timeout, task).await {
                    Ok(Ok(())) => info!(adapter = prefix, "adapter stopped"),
                    Ok(Err(e)) => warn!(adapter = prefix, "adapter task panicked: {e}"),
                    Err(_) => warn!(adapter = prefix, "adapter ignored stop, abandoning"),
                }
            }
            Ok(())
        }
    }

    pub async fn is_enabled(&self, prefix: &str) -> bool {
        self.adapters
            .read()
            .await
            .get(prefix)
            .map(|e| e.enabled)
            .unwrap_or(false)
    }

    pub async fn is_running(&self, prefix: &str) -> bool {
        self.adapters
            .read()
            .await
            .get(prefix)
            .map(|e| e.task.as_ref().is_some_and(|t| !t.is_finished()))
            .unwrap_or(false)
    }

    /// Route a zone id to the adapter owning its prefix.
    pub async fn route(&self, zone_id: &str) -> Result<Arc<dyn AdapterLogic>, BridgeError> {
        let prefix = zone_id.split(':').next().unwrap_or("");
        self.route_prefix(prefix).await.map_err(|_| {
            BridgeError::NotFound(format!("no adapter for zone '{}'", zone_id))
        })
    }

    /// Look up an adapter by its prefix directly.
    pub async fn route_prefix(&self, prefix: &str) -> Result<Arc<dyn AdapterLogic>, BridgeError> {
        let adapters = self.adapters.read().await;
        adapters
            .get(prefix)
            .filter(|e| e.enabled)
            .map(|e| e.logic.clone())
            .ok_or_else(|| BridgeError::NotFound(format!("no adapter '{}'", prefix)))
    }

    pub async fn registered(&self) -> Vec<String> {
        self.adapters.read().await.keys().cloned().collect()
    }

    /// Graceful shutdown:
    /// 1. publish `ShuttingDown`
    /// 2. await one `AdapterStopped` ACK per running adapter, bounded by the
    ///    grace timeout
    /// 3. cancel stragglers and join every task
    pub async fn shutdown(&self) {
        let running: Vec<String> = {
            let adapters = self.adapters.read().await;
            adapters
                .iter()
                .filter(|(_, e)| e.task.as_ref().is_some_and(|t| !t.is_finished()))
                .map(|(prefix, _)| prefix.clone())
                .collect()
        };

        // Subscribe before publishing so no ACK can be missed
        let rx = self.bus.subscribe();
        self.bus.publish(BusEvent::ShuttingDown);

        if running.is_empty() {
            info!("no adapters running, shutdown complete");
            return;
        }

        info!(count = running.len(), "shutting down adapters: {running:?}");

        let acked = self.wait_for_acks(rx, &running).await;
        if acked < running.len() {
            warn!(
                "received {}/{} shutdown ACKs within grace, forcing the rest",
                acked,
                running.len()
            );
        }

        self.shutdown.cancel();

        let tasks: Vec<(String, JoinHandle<()>)> = {
            let mut adapters = self.adapters.write().await;
            adapters
                .iter_mut()
                .filter_map(|(prefix, e)| e.task.take().map(|t| (prefix.clone(), t)))
                .collect()
        };

        for (prefix, task) in tasks {
            match tokio::time::timeout(Duration::from_secs(1), task).await {
                Ok(Ok(())) => debug!(adapter = %prefix, "task joined"),
                Ok(Err(e)) => warn!(adapter = %prefix, "task panicked: {e}"),
                Err(_) => warn!(adapter = %prefix, "task did not join, abandoning"),
            }
        }

        info!("coordinator shutdown complete");
    }

    async fn wait_for_acks(
        &self,
        mut rx: tokio::sync::broadcast::Receiver<BusEvent>,
        expected: &[String],
    ) -> usize {
        let mut received: Vec<String> = Vec::new();
        let deadline = tokio::time::Instant::now() + self.grace_timeout;

        while received.len() < expected.len() {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }

            match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Ok(BusEvent::AdapterStopped { adapter })) => {
                    if expected.contains(&adapter) && !received.contains(&adapter) {
                        debug!(adapter = %adapter, "shutdown ACK");
                        received.push(adapter);
                    }
                }
                Ok(Ok(_)) => {}
                Ok(Err(_)) | Err(_) => break,
            }
        }

        received.len()
    }
}
