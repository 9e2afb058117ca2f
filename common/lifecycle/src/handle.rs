//! Component handle: the per-component RAII token registered with the [`crate::Manager`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub(crate) enum ComponentEvent {
    Failure { tag: String, reason: String },
    WorkCompleted { tag: String },
    Died { tag: String },
}

/// RAII handle for a registered component: a Streaming Conductor task, the
/// Configuration Resolver puller, an inbound RPC handler, etc.
///
/// Cloning and passing the handle into spawned sub-tasks is expected. When
/// the last clone is dropped, the manager is notified: if shutdown is
/// already underway the drop counts as a clean completion, otherwise it is
/// treated as an unexpected death and the manager begins shutting down
/// every other component.
#[derive(Clone)]
pub struct Handle {
    pub(crate) inner: Arc<HandleInner>,
}

pub(crate) struct HandleInner {
    pub(crate) tag: String,
    pub(crate) shutdown_token: CancellationToken,
    pub(crate) event_tx: mpsc::Sender<ComponentEvent>,
    pub(crate) completed: AtomicBool,
}

impl Handle {
    pub fn shutdown_recv(&self) -> tokio_util::sync::WaitForCancellationFuture<'_> {
        self.inner.shutdown_token.cancelled()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.shutdown_token.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown_token.is_cancelled()
    }

    pub fn tag(&self) -> &str {
        &self.inner.tag
    }

    /// Signal a fatal error; triggers global shutdown of every other component.
    pub fn signal_failure(&self, reason: impl Into<String>) {
        let _ = self.inner.event_tx.try_send(ComponentEvent::Failure {
            tag: self.inner.tag.clone(),
            reason: reason.into(),
        });
    }

    /// Mark this component as finished. Required for finite work (e.g. a
    /// single Configuration Resolver refresh triggered on demand).
    pub fn work_completed(&self) {
        self.inner.completed.store(true, Ordering::SeqCst);
        let _ = self
            .inner
            .event_tx
            .try_send(ComponentEvent::WorkCompleted {
                tag: self.inner.tag.clone(),
            });
    }
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        if self.completed.load(Ordering::SeqCst) {
            return;
        }
        let event = if self.shutdown_token.is_cancelled() {
            ComponentEvent::WorkCompleted {
                tag: self.tag.clone(),
            }
        } else {
            ComponentEvent::Died {
                tag: self.tag.clone(),
            }
        };
        let _ = self.event_tx.try_send(event);
    }
}
