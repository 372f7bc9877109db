#![warn(clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::cast_precision_loss,
    clippy::too_many_lines
)]

//! Spot GPU Training Launcher
//!
//! Rents a spot pod for a training config, waits a bounded time for it to come
//! up, and terminates it if it never does.

pub mod bid;
pub mod config;
pub mod guard;
pub mod lifecycle;
pub mod marketplace;
pub mod spec;

pub use bid::{BidError, compute_bid};
pub use config::{CloudType, ConfigError, Credential, LaunchDocument, Override, ProviderSettings};
pub use guard::{TerminationGuard, TerminationOutcome};
pub use lifecycle::{
    FailureReason, Job, LaunchError, LaunchSettings, Orchestrator, Phase, RunningJob, Stage,
};
pub use marketplace::{BidQuote, Marketplace, MarketplaceError, RemoteJob, Runtime};
pub use spec::{JobConfig, LaunchPlan, build_spec, build_spec_at};
