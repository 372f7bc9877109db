//! Best-effort pod teardown.

use std::{
    collections::HashSet,
    fmt,
    sync::{Arc, Mutex, PoisonError},
};

use crate::marketplace::{Marketplace, MarketplaceError};

/// Result of a termination attempt. Never an error: the guard runs on paths
/// that are already failing and must not replace the original failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationOutcome {
    /// The provider accepted the termination.
    Terminated,
    /// This guard already terminated the pod; no request was sent.
    AlreadyTerminated,
    /// The provider call failed; the pod may still be running.
    Failed(String),
}

impl TerminationOutcome {
    /// Whether the pod is known to be gone.
    #[must_use]
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed(_))
    }
}

impl fmt::Display for TerminationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Terminated => f.write_str("pod terminated"),
            Self::AlreadyTerminated => f.write_str("pod was already terminated"),
            Self::Failed(e) => write!(f, "termination failed ({e}), stop the pod manually"),
        }
    }
}

/// Terminates pods at most once per identifier.
pub struct TerminationGuard<M: ?Sized> {
    market: Arc<M>,
    terminated: Mutex<HashSet<String>>,
}

impl<M: Marketplace + ?Sized> TerminationGuard<M> {
    #[must_use]
    pub fn new(market: Arc<M>) -> Self {
        Self {
            market,
            terminated: Mutex::new(HashSet::new()),
        }
    }

    /// Terminate `id`, logging the outcome.
    ///
    /// Repeated calls for the same identifier report
    /// [`TerminationOutcome::AlreadyTerminated`] without contacting the provider.
    /// A pod the provider no longer knows is also already terminated.
    pub async fn terminate(&self, id: &str) -> TerminationOutcome {
        if self.is_terminated(id) {
            tracing::info!("Pod {id} already terminated");
            return TerminationOutcome::AlreadyTerminated;
        }

        match self.market.terminate_job(id).await {
            Ok(()) => {
                self.mark_terminated(id);
                tracing::info!("Pod {id} terminated");
                TerminationOutcome::Terminated
            }
            Err(MarketplaceError::NotFound(_)) => {
                self.mark_terminated(id);
                tracing::info!("Pod {id} no longer exists");
                TerminationOutcome::AlreadyTerminated
            }
            Err(e) => {
                tracing::warn!("Failed to terminate pod {id}: {e}");
                TerminationOutcome::Failed(e.to_string())
            }
        }
    }

    fn mark_terminated(&self, id: &str) {
        self.terminated
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string());
    }

    /// Whether this guard has terminated `id`.
    #[must_use]
    pub fn is_terminated(&self, id: &str) -> bool {
        self.terminated
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(id)
    }
}
