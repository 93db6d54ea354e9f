//! Service bootstrap
//!
//! Waits for the store to answer, installs every required capability and
//! only then reports `Ready`. The procedure is idempotent: running it again
//! re-checks each step and installs nothing that is already installed.
//!
//! ```text
//! NotStarted -> WaitingForStore -> InstallingCapabilities -> Ready
//!      \______________\___________________\________________-> Failed
//! ```
//!
//! `Failed` is terminal.

use chrono::{DateTime, Utc};
use geosearch_store::{Clock, RetryPolicy};
use serde::Serialize;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

/// Errors reported by a provisioner
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Store unreachable: {0}")]
    Unreachable(String),

    #[error("Unknown capability: {0}")]
    UnknownCapability(String),

    #[error("Installing {name} failed: {reason}")]
    Install { name: String, reason: String },

    #[error("Provisioning task failed: {0}")]
    Task(String),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum BootstrapError {
    #[error("Bootstrap failed: {0}")]
    Failed(String),

    #[error("Bootstrap cancelled")]
    Cancelled,
}

/// The environment being bootstrapped. Calls may block.
pub trait Provisioner: Send + Sync + 'static {
    /// Readiness check against the backing store
    fn probe(&self) -> Result<(), ProvisionError>;

    fn is_installed(&self, capability: &str) -> Result<bool, ProvisionError>;

    /// Install a capability. Installing an installed one is a no-op.
    fn install(&self, capability: &str) -> Result<(), ProvisionError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BootstrapState {
    NotStarted,
    WaitingForStore { attempt: u32 },
    InstallingCapabilities { pending: Vec<String> },
    Ready,
    Failed { reason: String },
}

impl BootstrapState {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CapabilityStatus {
    pub name: String,
    pub installed: bool,
    /// When the capability was last seen installed
    pub verified_at: Option<DateTime<Utc>>,
}

/// Required capabilities and their installation state
#[derive(Debug, Clone, Default, Serialize)]
pub struct CapabilityDescriptor {
    pub capabilities: Vec<CapabilityStatus>,
}

impl CapabilityDescriptor {
    fn new(names: &[String]) -> Self {
        Self {
            capabilities: names
                .iter()
                .map(|name| CapabilityStatus {
                    name: name.clone(),
                    installed: false,
                    verified_at: None,
                })
                .collect(),
        }
    }

    pub fn all_installed(&self) -> bool {
        self.capabilities.iter().all(|c| c.installed)
    }

    fn mark(&mut self, name: &str, installed: bool, at: DateTime<Utc>) {
        if let Some(status) = self.capabilities.iter_mut().find(|c| c.name == name) {
            status.installed = installed;
            status.verified_at = installed.then_some(at);
        }
    }
}

/// Retry timing for the two waiting phases
#[derive(Debug, Clone)]
pub struct BootstrapPolicy {
    /// Store probing; `max_attempts` consecutive failures give up
    pub probe: RetryPolicy,
    /// Per-capability install retries
    pub install: RetryPolicy,
}

impl BootstrapPolicy {
    /// Fixed-interval probing and exponential install backoff with the same
    /// failure limit
    pub fn new(probe_interval: Duration, max_failures: u32) -> Self {
        Self {
            probe: RetryPolicy::fixed(max_failures, probe_interval),
            install: RetryPolicy {
                max_attempts: max_failures,
                initial_backoff: Duration::from_millis(100),
                max_backoff: probe_interval.max(Duration::from_millis(100)),
                multiplier: 2.0,
            },
        }
    }
}

pub struct Bootstrap {
    provisioner: Arc<dyn Provisioner>,
    required: Vec<String>,
    policy: BootstrapPolicy,
    clock: Arc<dyn Clock>,
    state: watch::Sender<BootstrapState>,
    descriptor: RwLock<CapabilityDescriptor>,
}

impl Bootstrap {
    pub fn new(
        provisioner: Arc<dyn Provisioner>,
        required: Vec<String>,
        policy: BootstrapPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (state, _) = watch::channel(BootstrapState::NotStarted);
        let descriptor = RwLock::new(CapabilityDescriptor::new(&required));
        Self {
            provisioner,
            required,
            policy,
            clock,
            state,
            descriptor,
        }
    }

    pub fn state(&self) -> BootstrapState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<BootstrapState> {
        self.state.subscribe()
    }

    pub fn descriptor(&self) -> CapabilityDescriptor {
        self.descriptor.read().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.state.borrow().is_ready()
    }

    /// Drive the bootstrap to `Ready`.
    ///
    /// Setting `shutdown` to true cancels any wait; the state is left as it
    /// was. A failed bootstrap stays failed.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), BootstrapError> {
        if let BootstrapState::Failed { reason } = self.state() {
            return Err(BootstrapError::Failed(reason));
        }

        tracing::info!("Bootstrap started ({} capabilities)", self.required.len());
        match self.provision(&mut shutdown).await {
            Ok(()) => {
                self.set_state(BootstrapState::Ready);
                tracing::info!("Bootstrap complete, service ready");
                Ok(())
            }
            Err(BootstrapError::Failed(reason)) => {
                tracing::error!("Bootstrap failed: {}", reason);
                self.set_state(BootstrapState::Failed {
                    reason: reason.clone(),
                });
                Err(BootstrapError::Failed(reason))
            }
            Err(BootstrapError::Cancelled) => {
                tracing::info!("Bootstrap cancelled");
                Err(BootstrapError::Cancelled)
            }
        }
    }

    async fn provision(&self, shutdown: &mut watch::Receiver<bool>) -> Result<(), BootstrapError> {
        self.wait_for_store(shutdown).await?;

        let mut pending = Vec::new();
        for name in &self.required {
            if self.check(name, shutdown).await? {
                self.mark(name, true);
            } else {
                pending.push(name.clone());
            }
        }

        if !pending.is_empty() {
            self.set_state(BootstrapState::InstallingCapabilities {
                pending: pending.clone(),
            });
            for name in &pending {
                self.install(name, shutdown).await?;
            }
        }

        // Final verification
        for name in &self.required {
            if !self.check(name, shutdown).await? {
                self.mark(name, false);
                return Err(BootstrapError::Failed(format!(
                    "capability '{}' not installed after provisioning",
                    name
                )));
            }
            self.mark(name, true);
        }
        Ok(())
    }

    async fn wait_for_store(&self, shutdown: &mut watch::Receiver<bool>) -> Result<(), BootstrapError> {
        let policy = &self.policy.probe;
        let max = policy.attempts();
        for attempt in 1..=max {
            if *shutdown.borrow() {
                return Err(BootstrapError::Cancelled);
            }
            self.set_state(BootstrapState::WaitingForStore { attempt });

            match self.blocking(|p| p.probe()).await {
                Ok(()) => {
                    tracing::info!("Store reachable (attempt {})", attempt);
                    return Ok(());
                }
                Err(e) if attempt == max => {
                    return Err(BootstrapError::Failed(format!(
                        "store unreachable after {} attempts: {}",
                        max, e
                    )));
                }
                Err(e) => {
                    tracing::warn!("Store not ready (attempt {}/{}): {}", attempt, max, e);
                    sleep_or_cancel(policy.backoff_for(attempt), shutdown).await?;
                }
            }
        }
        Err(BootstrapError::Failed("store never probed".to_string()))
    }

    async fn install(&self, name: &str, shutdown: &mut watch::Receiver<bool>) -> Result<(), BootstrapError> {
        let policy = &self.policy.install;
        let max = policy.attempts();
        for attempt in 1..=max {
            if *shutdown.borrow() {
                return Err(BootstrapError::Cancelled);
            }
            let owned = name.to_string();
            match self.blocking(move |p| p.install(&owned)).await {
                Ok(()) => {
                    tracing::info!("Installed capability {}", name);
                    self.mark(name, true);
                    return Ok(());
                }
                Err(e) if attempt == max => {
                    return Err(BootstrapError::Failed(format!(
                        "installing '{}' failed {} times: {}",
                        name, max, e
                    )));
                }
                Err(e) => {
                    tracing::warn!(
                        "Installing {} failed (attempt {}/{}): {}",
                        name,
                        attempt,
                        max,
                        e
                    );
                    sleep_or_cancel(policy.backoff_for(attempt), shutdown).await?;
                }
            }
        }
        Err(BootstrapError::Failed(format!("'{}' was never installed", name)))
    }

    /// Installation check, retried like a store probe
    async fn check(&self, name: &str, shutdown: &mut watch::Receiver<bool>) -> Result<bool, BootstrapError> {
        let policy = &self.policy.probe;
        let max = policy.attempts();
        for attempt in 1..=max {
            if *shutdown.borrow() {
                return Err(BootstrapError::Cancelled);
            }
            let owned = name.to_string();
            match self.blocking(move |p| p.is_installed(&owned)).await {
                Ok(installed) => return Ok(installed),
                Err(e) if attempt == max => {
                    return Err(BootstrapError::Failed(format!(
                        "checking '{}' failed {} times: {}",
                        name, max, e
                    )));
                }
                Err(e) => {
                    tracing::warn!(
                        "Checking {} failed (attempt {}/{}): {}",
                        name,
                        attempt,
                        max,
                        e
                    );
                    sleep_or_cancel(policy.backoff_for(attempt), shutdown).await?;
                }
            }
        }
        Err(BootstrapError::Failed(format!("'{}' was never checked", name)))
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, ProvisionError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Provisioner) -> Result<T, ProvisionError> + Send + 'static,
    {
        let provisioner = self.provisioner.clone();
        tokio::task::spawn_blocking(move || f(provisioner.as_ref()))
            .await
            .unwrap_or_else(|e| Err(ProvisionError::Task(e.to_string())))
    }

    fn mark(&self, name: &str, installed: bool) {
        let now = self.clock.now();
        self.descriptor.write().mark(name, installed, now);
    }

    fn set_state(&self, state: BootstrapState) {
        tracing::debug!("Bootstrap state: {:?}", state);
        self.state.send_replace(state);
    }
}

async fn sleep_or_cancel(
    delay: Duration,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<(), BootstrapError> {
    tokio::select! {
        _ = tokio::time::sleep(delay) => Ok(()),
        changed = shutdown.changed() => {
            // A dropped sender counts as shutdown
            if changed.is_err() || *shutdown.borrow() {
                Err(BootstrapError::Cancelled)
            } else {
                Ok(())
            }
        }
    }
}
