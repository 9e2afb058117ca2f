//! Lifecycle manager: component registration, signal trapping, coordinated
//! graceful shutdown with a bounded grace period.
//!
//! This is the Rust answer to spec.md section 5/9's "process-wide
//! singletons... explicit lifecycles": the offset store client, the
//! configuration store, and the job scheduler are each registered here
//! instead of living behind global getters.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::LifecycleError;
use crate::handle::{ComponentEvent, Handle, HandleInner};
use crate::metrics;
use crate::readiness::ReadinessHandler;
use crate::signals;

#[derive(Clone, Debug)]
pub struct ManagerOptions {
    pub service_name: String,
    pub global_shutdown_timeout: Duration,
    pub trap_signals: bool,
}

impl ManagerOptions {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            global_shutdown_timeout: Duration::from_secs(30),
            trap_signals: true,
        }
    }

    pub fn with_global_shutdown_timeout(mut self, d: Duration) -> Self {
        self.global_shutdown_timeout = d;
        self
    }

    pub fn with_trap_signals(mut self, enabled: bool) -> Self {
        self.trap_signals = enabled;
        self
    }
}

/// Coordinates startup/shutdown of every independent task in a producer or
/// consumer process: inbound RPC handlers, per-(server, topic) conductors,
/// the Configuration Resolver puller, the Credential Broker refresher.
pub struct Manager {
    options: ManagerOptions,
    shutdown_token: CancellationToken,
    event_tx: mpsc::Sender<ComponentEvent>,
    event_rx: mpsc::Receiver<ComponentEvent>,
    registered: HashSet<String>,
    shutdown_started: Arc<AtomicBool>,
}

impl Manager {
    pub fn new(options: ManagerOptions) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            options,
            shutdown_token: CancellationToken::new(),
            event_tx,
            event_rx,
            registered: HashSet::new(),
            shutdown_started: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn readiness_handler(&self) -> ReadinessHandler {
        ReadinessHandler::new(self.shutdown_token.clone())
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Register a new component and obtain its [`Handle`]. `tag` should be
    /// unique and stable (e.g. `"conductor:acme:orders"`).
    pub fn register(&mut self, tag: impl Into<String>) -> Handle {
        let tag = tag.into();
        self.registered.insert(tag.clone());
        Handle {
            inner: Arc::new(HandleInner {
                tag,
                shutdown_token: self.shutdown_token.clone(),
                event_tx: self.event_tx.clone(),
                completed: AtomicBool::new(false),
            }),
        }
    }

    /// Request shutdown directly (e.g. from an admin endpoint or test code).
    pub fn request_shutdown(&self) {
        self.begin_shutdown("manager", "request_shutdown");
    }

    fn begin_shutdown(&self, trigger_component: &str, reason: &str) {
        if self
            .shutdown_started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            info!(component = trigger_component, reason, "beginning shutdown");
            metrics::emit_shutdown_initiated(&self.options.service_name, trigger_component, reason);
            self.shutdown_token.cancel();
        }
    }

    /// Drives the manager until every registered component has completed
    /// (or failed, or the OS requested shutdown), then waits up to
    /// `global_shutdown_timeout` for outstanding work to drain.
    pub async fn run(mut self) -> Result<(), LifecycleError> {
        let mut remaining: HashSet<String> = self.registered.clone();
        let shutdown_token = self.shutdown_token.clone();
        let trap_signals = self.options.trap_signals;

        let signal_fut = async {
            if trap_signals {
                signals::wait_for_shutdown_signal().await;
            } else {
                std::future::pending::<()>().await;
            }
        };
        tokio::pin!(signal_fut);

        let mut first_failure: Option<LifecycleError> = None;
        let start = Instant::now();

        loop {
            if remaining.is_empty() {
                break;
            }
            tokio::select! {
                _ = &mut signal_fut, if !shutdown_token.is_cancelled() => {
                    self.begin_shutdown("signal", "SIGINT/SIGTERM");
                }
                event = self.event_rx.recv() => {
                    match event {
                        Some(ComponentEvent::Failure { tag, reason }) => {
                            warn!(component = %tag, reason = %reason, "component reported failure");
                            metrics::emit_component_shutdown_result(&self.options.service_name, &tag, "failure");
                            first_failure.get_or_insert(LifecycleError::ComponentFailure { tag: tag.clone(), reason });
                            remaining.remove(&tag);
                            self.begin_shutdown(&tag, "component_failure");
                        }
                        Some(ComponentEvent::WorkCompleted { tag }) => {
                            metrics::emit_component_shutdown_result(&self.options.service_name, &tag, "completed");
                            remaining.remove(&tag);
                        }
                        Some(ComponentEvent::Died { tag }) => {
                            warn!(component = %tag, "component handle dropped unexpectedly");
                            metrics::emit_component_shutdown_result(&self.options.service_name, &tag, "died");
                            first_failure.get_or_insert(LifecycleError::ComponentDied { tag: tag.clone() });
                            remaining.remove(&tag);
                            self.begin_shutdown(&tag, "component_died");
                        }
                        None => break,
                    }
                }
            }

            if shutdown_token.is_cancelled() && start.elapsed() >= self.options.global_shutdown_timeout {
                metrics::emit_shutdown_completed(&self.options.service_name, false);
                return Err(LifecycleError::ShutdownTimeout {
                    elapsed: start.elapsed(),
                    remaining: remaining.into_iter().collect(),
                });
            }
        }

        metrics::emit_shutdown_completed(&self.options.service_name, first_failure.is_none());
        match first_failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Stop the manager programmatically, waiting up to `grace` for
    /// in-flight components to complete. Used by tests and by admin-driven
    /// shutdown paths that don't want to wait for the full `run()` loop.
    pub async fn stop(&self, grace: Duration) {
        self.begin_shutdown("stop", "explicit_stop");
        tokio::time::sleep(grace.min(self.options.global_shutdown_timeout)).await;
    }
}
