//! Launch lifecycle: quote, submit, wait for the pod to start, and terminate it
//! when it does not.
//!
//! ```text
//! Building -> Submitting -> AwaitingRuntime -> Running
//!     \            \               \
//!      +------------+---------------+-> Failed -> Terminating -> Terminated
//! ```
//!
//! Only a failure after the provider assigned an identifier goes through
//! termination. A running pod is handed back to the caller and left alone; the
//! provider's own termination deadline covers a forgotten one.

use std::{fmt, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::time::Instant;

use crate::{
    bid::{BidError, compute_bid, validate_ceiling},
    config::ProviderSettings,
    guard::{TerminationGuard, TerminationOutcome},
    marketplace::{Marketplace, MarketplaceError, RemoteJob, Runtime, SSH_PROXY_HOST},
    spec::JobConfig,
};

/// Where the pods can be watched while waiting.
pub const CONSOLE_URL: &str = "https://www.runpod.io/console/pods";

/// Phase of a launch. Phases only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Building,
    Submitting,
    AwaitingRuntime,
    /// Terminal success.
    Running,
    Failed,
    Terminating,
    /// Terminal failure.
    Terminated,
}

impl Phase {
    /// Whether `next` is a legal successor of `self`.
    #[must_use]
    pub fn can_advance_to(self, next: Phase) -> bool {
        use Phase::{AwaitingRuntime, Building, Failed, Running, Submitting, Terminated, Terminating};
        matches!(
            (self, next),
            (Building, Submitting | Failed)
                | (Submitting, AwaitingRuntime | Failed)
                | (AwaitingRuntime, Running | Failed)
                | (Failed, Terminating)
                | (Terminating, Terminated)
        )
    }
}

/// Launch step, used to tell the operator where a launch broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Building,
    Quoting,
    Submitting,
    AwaitingRuntime,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Building => "building",
            Self::Quoting => "quoting",
            Self::Submitting => "submitting",
            Self::AwaitingRuntime => "awaiting runtime",
        })
    }
}

/// Why a submitted pod was given up on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// No runtime reported within the maximum wait.
    Timeout(Duration),
    /// The provider stopped recognising the pod.
    Vanished(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout(waited) => write!(f, "did not start within {}s", waited.as_secs()),
            Self::Vanished(e) => write!(f, "pod disappeared ({e})"),
        }
    }
}

/// Handle to a started pod.
#[derive(Debug, Clone, PartialEq)]
pub struct RunningJob {
    pub id: String,
    pub host_id: Option<String>,
    pub runtime: Runtime,
}

impl RunningJob {
    /// Shell command for connecting through the SSH proxy.
    #[must_use]
    pub fn ssh_command(&self) -> Option<String> {
        self.host_id.as_deref().map(ssh_command)
    }
}

fn ssh_command(host_id: &str) -> String {
    format!("ssh {host_id}@{SSH_PROXY_HOST} -i ~/.ssh/id_ed25519")
}

/// The in-memory record of one launch.
#[derive(Debug, Clone)]
pub struct Job {
    spec: JobConfig,
    id: Option<String>,
    host_id: Option<String>,
    phase: Phase,
    history: Vec<Phase>,
    bid: Option<f64>,
    runtime: Option<Runtime>,
    poll_attempts: u32,
    termination: Option<TerminationOutcome>,
    created_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    terminated_at: Option<DateTime<Utc>>,
}

impl Job {
    #[must_use]
    pub fn new(spec: JobConfig) -> Self {
        Self {
            spec,
            id: None,
            host_id: None,
            phase: Phase::Building,
            history: vec![Phase::Building],
            bid: None,
            runtime: None,
            poll_attempts: 0,
            termination: None,
            created_at: None,
            started_at: None,
            terminated_at: None,
        }
    }

    fn advance(&mut self, next: Phase) {
        debug_assert!(
            self.phase.can_advance_to(next),
            "illegal transition {:?} -> {:?}",
            self.phase,
            next
        );
        tracing::debug!(
            "Launch {}: {:?} -> {:?}",
            self.id.as_deref().unwrap_or("<unsubmitted>"),
            self.phase,
            next
        );

        match next {
            Phase::AwaitingRuntime => self.created_at = Some(Utc::now()),
            Phase::Running => self.started_at = Some(Utc::now()),
            Phase::Terminated => self.terminated_at = Some(Utc::now()),
            _ => {}
        }
        self.phase = next;
        self.history.push(next);
    }

    #[must_use]
    pub fn spec(&self) -> &JobConfig {
        &self.spec
    }

    /// Provider-assigned identifier, once submitted.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Every phase visited, in order.
    #[must_use]
    pub fn history(&self) -> &[Phase] {
        &self.history
    }

    /// Price offered per GPU.
    #[must_use]
    pub fn bid(&self) -> Option<f64> {
        self.bid
    }

    #[must_use]
    pub fn runtime(&self) -> Option<&Runtime> {
        self.runtime.as_ref()
    }

    /// Status requests issued while waiting for the runtime.
    #[must_use]
    pub fn poll_attempts(&self) -> u32 {
        self.poll_attempts
    }

    #[must_use]
    pub fn termination(&self) -> Option<&TerminationOutcome> {
        self.termination.as_ref()
    }

    #[must_use]
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    #[must_use]
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    #[must_use]
    pub fn terminated_at(&self) -> Option<DateTime<Utc>> {
        self.terminated_at
    }
}

/// Polling behaviour of the orchestrator.
#[derive(Debug, Clone)]
pub struct LaunchSettings {
    pub poll_interval: Duration,
    /// Total time a pod gets to report a runtime.
    pub max_wait: Duration,
    /// Log the raw status exchanges while polling.
    pub poll_debug: bool,
    /// Show a spinner while waiting.
    pub show_progress: bool,
}

impl Default for LaunchSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            max_wait: Duration::from_secs(600),
            poll_debug: false,
            show_progress: false,
        }
    }
}

impl LaunchSettings {
    #[must_use]
    pub fn from_provider(provider: &ProviderSettings) -> Self {
        Self {
            poll_interval: Duration::from_secs(provider.poll_interval_secs),
            max_wait: Duration::from_secs(provider.max_wait_secs),
            ..Self::default()
        }
    }
}

/// Drives a [`Job`] through its lifecycle against a marketplace.
pub struct Orchestrator<M: ?Sized> {
    market: Arc<M>,
    guard: TerminationGuard<M>,
    settings: LaunchSettings,
}

impl<M: Marketplace + ?Sized> Orchestrator<M> {
    /// Create a new orchestrator.
    #[must_use]
    pub fn new(market: Arc<M>, settings: LaunchSettings) -> Self {
        Self {
            guard: TerminationGuard::new(market.clone()),
            market,
            settings,
        }
    }

    /// The termination guard used on failure paths.
    #[must_use]
    pub fn guard(&self) -> &TerminationGuard<M> {
        &self.guard
    }

    /// Launch `job` and wait for it to start.
    ///
    /// On success the pod keeps running and is the caller's to stop. Any
    /// failure after the provider assigned an identifier terminates the pod
    /// before the error is returned.
    pub async fn launch(&self, job: &mut Job) -> Result<RunningJob, LaunchError> {
        let ceiling = job.spec.max_bid_per_unit;
        if let Err(e) = validate_ceiling(ceiling) {
            job.advance(Phase::Failed);
            tracing::error!("Not launching {}: {e}", job.spec.name);
            return Err(e.into());
        }

        let quote = match self
            .market
            .get_quote(&job.spec.resource_class, job.spec.resource_count)
            .await
        {
            Ok(quote) => quote,
            Err(source) => {
                job.advance(Phase::Failed);
                tracing::error!(
                    "Failed to get a quote for {}: {source}",
                    job.spec.resource_class
                );
                return Err(LaunchError::Provider {
                    stage: Stage::Quoting,
                    source,
                });
            }
        };

        let bid = match compute_bid(&quote, ceiling) {
            Ok(bid) => bid,
            Err(e) => {
                job.advance(Phase::Failed);
                tracing::error!("Not launching {}: {e}", job.spec.name);
                return Err(e.into());
            }
        };
        job.bid = Some(bid);

        tracing::info!(
            "Bidding {:.3}/h per GPU for {}x {} ({} cloud)",
            bid,
            job.spec.resource_count,
            job.spec.resource_class,
            job.spec.cloud_type
        );

        job.advance(Phase::Submitting);
        let remote = match self.market.create_job(&job.spec, bid).await {
            Ok(remote) if !remote.id.trim().is_empty() => remote,
            Ok(_) => {
                job.advance(Phase::Failed);
                tracing::error!("Failed to create pod for {}", job.spec.name);
                return Err(LaunchError::Provider {
                    stage: Stage::Submitting,
                    source: MarketplaceError::Rejected(
                        "provider returned no pod identifier".into(),
                    ),
                });
            }
            Err(source) => {
                job.advance(Phase::Failed);
                tracing::error!("Failed to create pod for {}: {source}", job.spec.name);
                return Err(LaunchError::Provider {
                    stage: Stage::Submitting,
                    source,
                });
            }
        };

        let id = remote.id.clone();
        job.id = Some(id.clone());
        job.host_id.clone_from(&remote.host_id);
        job.advance(Phase::AwaitingRuntime);

        tracing::info!(
            "Created pod {id}, waiting for it to start...(at most {} seconds)",
            self.settings.max_wait.as_secs()
        );
        tracing::info!(
            " - While you're waiting, you can check the status of the pod at {CONSOLE_URL}"
        );
        if let Some(host) = remote.host_id.as_deref() {
            tracing::info!(
                " - After started, use the following command to ssh into the pod: {}",
                ssh_command(host)
            );
        }

        match self.await_runtime(job, &id).await {
            Ok(running) => {
                job.runtime = Some(running.runtime.clone());
                job.advance(Phase::Running);
                tracing::info!(
                    "Pod {id} started after {} status checks",
                    job.poll_attempts
                );
                Ok(running)
            }
            Err(reason) => {
                job.advance(Phase::Failed);
                tracing::error!("Pod {id} failed to start: {reason}");

                job.advance(Phase::Terminating);
                let cleanup = self.guard.terminate(&id).await;
                if cleanup.is_success() {
                    job.advance(Phase::Terminated);
                }
                job.termination = Some(cleanup.clone());

                Err(LaunchError::JobFailed {
                    stage: Stage::AwaitingRuntime,
                    job_id: id,
                    reason,
                    cleanup,
                })
            }
        }
    }

    /// Poll until the pod reports a runtime or the deadline passes.
    ///
    /// Transient errors are logged and polling continues; a rejected or
    /// not-found status request means the pod is gone.
    async fn await_runtime(&self, job: &mut Job, id: &str) -> Result<RunningJob, FailureReason> {
        let started = Instant::now();
        let deadline = started + self.settings.max_wait;
        let spinner = self.spinner(id);

        let result = loop {
            job.poll_attempts += 1;

            // A request still in flight at the deadline is abandoned.
            let status = tokio::time::timeout_at(
                deadline,
                self.market.get_job(id, self.settings.poll_debug),
            )
            .await;

            match status {
                Err(_) => break Err(FailureReason::Timeout(self.settings.max_wait)),
                Ok(Ok(RemoteJob {
                    runtime: Some(runtime),
                    host_id,
                    ..
                })) => {
                    break Ok(RunningJob {
                        id: id.to_string(),
                        host_id: host_id.or_else(|| job.host_id.clone()),
                        runtime,
                    });
                }
                Ok(Ok(remote)) => {
                    if remote.host_id.is_some() {
                        job.host_id = remote.host_id;
                    }
                }
                Ok(Err(MarketplaceError::Transient(e))) => {
                    tracing::warn!("Status check for pod {id} failed, will retry: {e}");
                }
                Ok(Err(MarketplaceError::Rejected(e) | MarketplaceError::NotFound(e))) => {
                    break Err(FailureReason::Vanished(e));
                }
            }

            spinner.set_message(format!(
                "pod {id}: waiting for runtime ({}s / {}s)",
                started.elapsed().as_secs(),
                self.settings.max_wait.as_secs()
            ));

            tokio::time::sleep_until((Instant::now() + self.settings.poll_interval).min(deadline))
                .await;
            if Instant::now() >= deadline {
                break Err(FailureReason::Timeout(self.settings.max_wait));
            }
        };

        spinner.finish_and_clear();
        result
    }

    fn spinner(&self, id: &str) -> ProgressBar {
        if !self.settings.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new_spinner();
        if let Ok(style) =
            ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")
        {
            pb.set_style(style);
        }
        pb.set_message(format!("pod {id}: waiting for runtime"));
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }
}

/// Errors that end a launch.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("bidding failed: {0}")]
    Bid(#[from] BidError),
    #[error("{stage} failed: {source}")]
    Provider {
        stage: Stage,
        #[source]
        source: MarketplaceError,
    },
    #[error("{stage} failed for pod {job_id}: {reason}; {cleanup}")]
    JobFailed {
        stage: Stage,
        job_id: String,
        reason: FailureReason,
        cleanup: TerminationOutcome,
    },
}

impl LaunchError {
    /// Stage at which the launch stopped.
    #[must_use]
    pub fn stage(&self) -> Stage {
        match self {
            Self::Bid(BidError::InvalidBidCeiling(_)) => Stage::Building,
            Self::Bid(BidError::NoQuoteAvailable(_)) => Stage::Quoting,
            Self::Provider { stage, .. } | Self::JobFailed { stage, .. } => *stage,
        }
    }

    /// Identifier of the pod that was terminated (or attempted), if any.
    #[must_use]
    pub fn job_id(&self) -> Option<&str> {
        match self {
            Self::JobFailed { job_id, .. } => Some(job_id),
            _ => None,
        }
    }
}
