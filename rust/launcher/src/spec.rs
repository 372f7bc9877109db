//! Assembles the pod request from a launch document.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};

use crate::config::{CloudType, ConfigError, LaunchDocument, Override, ProviderSettings};

/// Environment variable telling the pod which training config to run.
pub const TRAINING_CONFIG_ENV: &str = "TRAINING_CONFIG";

/// Fully resolved pod request. Not modified after submission.
#[derive(Debug, Clone, PartialEq)]
pub struct JobConfig {
    /// Display name of the pod.
    pub name: String,
    /// GPU type identifier.
    pub resource_class: String,
    pub resource_count: u32,
    pub min_vcpu: u32,
    pub min_memory_gb: u32,
    pub min_download_mbps: u32,
    pub min_upload_mbps: u32,
    pub image: String,
    pub env: BTreeMap<String, String>,
    /// Docker arguments, already escaped for embedding in a quoted string.
    pub entry: Option<String>,
    /// Provider-enforced termination time.
    pub terminate_at: DateTime<Utc>,
    pub max_bid_per_unit: f64,
    pub cloud_type: CloudType,
    pub template_id: String,
}

impl JobConfig {
    /// Build the request from resolved provider settings.
    ///
    /// The termination deadline is measured from `now`, so time spent
    /// submitting does not extend it.
    pub fn from_provider(
        document: &LaunchDocument,
        provider: &ProviderSettings,
        now: DateTime<Utc>,
    ) -> Result<Self, ConfigError> {
        let config_path = document.path().display().to_string();

        let mut env = provider.env.clone();
        env.insert(TRAINING_CONFIG_ENV.to_string(), config_path.clone());

        let entry = provider.entry.as_deref().map(escape_entry).transpose()?;

        let terminate_at = i64::try_from(provider.terminate_after)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .and_then(|after| now.checked_add_signed(after))
            .ok_or_else(|| ConfigError::Invalid {
                field: "terminate_after",
                reason: format!("{} seconds is out of range", provider.terminate_after),
            })?;

        Ok(Self {
            name: format!("Training {config_path}"),
            resource_class: provider.gpu.clone(),
            resource_count: provider.gpu_count,
            min_vcpu: provider.min_vcpu_count,
            min_memory_gb: provider.min_memory_in_gb,
            min_download_mbps: provider.min_download,
            min_upload_mbps: provider.min_upload,
            image: provider.image.clone(),
            env,
            entry,
            terminate_at,
            max_bid_per_unit: provider.max_bid_per_gpu,
            cloud_type: provider.cloud_type,
            template_id: provider.template_id.clone(),
        })
    }
}

/// Escape an entry point so it can sit inside a double-quoted string.
fn escape_entry(entry: &str) -> Result<String, ConfigError> {
    let quoted = serde_json::to_string(entry).map_err(|e| ConfigError::Invalid {
        field: "entry",
        reason: e.to_string(),
    })?;
    Ok(quoted[1..quoted.len() - 1].to_string())
}

/// Everything a launch needs, resolved once from the document.
#[derive(Debug, Clone)]
pub struct LaunchPlan {
    pub job: JobConfig,
    pub provider: ProviderSettings,
}

/// Merge `overrides` into a copy of `document` and resolve the pod request.
pub fn build_spec(
    document: &LaunchDocument,
    overrides: &[Override],
) -> Result<LaunchPlan, ConfigError> {
    build_spec_at(document, overrides, Utc::now())
}

/// [`build_spec`] with an explicit build time.
pub fn build_spec_at(
    document: &LaunchDocument,
    overrides: &[Override],
    now: DateTime<Utc>,
) -> Result<LaunchPlan, ConfigError> {
    let mut merged = document.clone();
    merged.apply_overrides(overrides)?;
    let provider = merged.provider_settings()?;
    let job = JobConfig::from_provider(&merged, &provider, now)?;
    Ok(LaunchPlan { job, provider })
}
