//! Configuration parsing for launches.
//!
//! A launch document is a TOML file holding free-form training parameters at
//! the top level and a `[runpod]` table describing the pod to rent. Overrides
//! given on the command line are merged into the raw document before the
//! provider block is resolved into [`ProviderSettings`].

use std::{
    collections::BTreeMap,
    env, fmt,
    path::{Path, PathBuf},
    str::FromStr,
};

use serde::Deserialize;

/// Name of the nested provider table.
pub const PROVIDER_BLOCK: &str = "runpod";

/// Raw launch document, before overrides and before resolving defaults.
#[derive(Debug, Clone)]
pub struct LaunchDocument {
    path: PathBuf,
    root: toml::Table,
}

impl LaunchDocument {
    /// Load a launch document from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(path.as_ref().display().to_string(), e))?;
        Self::parse(path.as_ref(), &content)
    }

    /// Parse a launch document from TOML text. `path` is recorded for the job
    /// name and the `TRAINING_CONFIG` variable.
    pub fn parse(path: impl Into<PathBuf>, content: &str) -> Result<Self, ConfigError> {
        let root: toml::Table =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(Self {
            path: path.into(),
            root,
        })
    }

    /// Path the document was loaded from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether unknown override keys are rejected.
    #[must_use]
    pub fn is_strict(&self) -> bool {
        self.root
            .get("strict")
            .and_then(toml::Value::as_bool)
            .unwrap_or(false)
    }

    /// Look up a value by dotted key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&toml::Value> {
        let mut segments = key.split('.');
        let mut value = self.root.get(segments.next()?)?;
        for segment in segments {
            value = value.as_table()?.get(segment)?;
        }
        Some(value)
    }

    /// Merge command-line overrides into the document.
    ///
    /// Strictness is decided by the document as loaded, so an override cannot
    /// switch strict mode off for the overrides that follow it.
    pub fn apply_overrides(&mut self, overrides: &[Override]) -> Result<(), ConfigError> {
        let strict = self.is_strict();
        for item in overrides {
            self.apply_override(item, strict)?;
        }
        Ok(())
    }

    fn apply_override(&mut self, item: &Override, strict: bool) -> Result<(), ConfigError> {
        let segments: Vec<&str> = item.key.split('.').collect();
        let Some((last, parents)) = segments.split_last() else {
            return Err(ConfigError::invalid_override(&item.key, "empty key"));
        };

        let mut table = &mut self.root;
        for segment in parents {
            if strict && !table.contains_key(*segment) {
                return Err(ConfigError::UnknownConfigKey(item.key.clone()));
            }
            let next = table
                .entry(*segment)
                .or_insert_with(|| toml::Value::Table(toml::Table::new()));
            table = match next {
                toml::Value::Table(t) => t,
                _ => {
                    return Err(ConfigError::invalid_override(
                        &item.key,
                        format!("`{segment}` is not a table"),
                    ));
                }
            };
        }

        let value = match table.get(*last) {
            Some(toml::Value::Boolean(_)) => {
                toml::Value::Boolean(parse_bool(&item.value).ok_or_else(|| {
                    ConfigError::invalid_override(
                        &item.key,
                        format!("`{}` is not a boolean", item.value),
                    )
                })?)
            }
            None if strict => return Err(ConfigError::UnknownConfigKey(item.key.clone())),
            _ => parse_value(&item.value),
        };

        tracing::debug!("Override {} = {}", item.key, value);
        table.insert((*last).to_string(), value);
        Ok(())
    }

    /// Resolve the provider block, applying defaults.
    pub fn provider_settings(&self) -> Result<ProviderSettings, ConfigError> {
        let block = self
            .root
            .get(PROVIDER_BLOCK)
            .ok_or(ConfigError::MissingProviderBlock)?;
        if !block.is_table() {
            return Err(ConfigError::Parse(format!(
                "`{PROVIDER_BLOCK}` must be a table"
            )));
        }
        let settings: ProviderSettings = block
            .clone()
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Parse(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }
}

/// A `key=value` override supplied at invocation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Override {
    pub key: String,
    pub value: String,
}

impl FromStr for Override {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (key, value) = s
            .split_once('=')
            .ok_or_else(|| ConfigError::invalid_override(s, "expected key=value"))?;
        let key = key.trim();
        if key.is_empty() || key.split('.').any(str::is_empty) {
            return Err(ConfigError::invalid_override(s, "empty key"));
        }
        Ok(Self {
            key: key.to_string(),
            value: value.to_string(),
        })
    }
}

/// Parse boolean override text.
fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Interpret override text as a TOML literal, falling back to a bare string.
fn parse_value(raw: &str) -> toml::Value {
    toml::from_str::<toml::Table>(&format!("v = {raw}"))
        .ok()
        .and_then(|mut t| t.remove("v"))
        .unwrap_or_else(|| toml::Value::String(raw.to_string()))
}

/// Which part of the marketplace to rent from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum CloudType {
    /// Datacenter hosts only.
    #[default]
    Secure,
    /// Community hosts only.
    Community,
    /// Either.
    All,
}

impl CloudType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Secure => "SECURE",
            Self::Community => "COMMUNITY",
            Self::All => "ALL",
        }
    }
}

impl fmt::Display for CloudType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider block settings after defaults are applied.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSettings {
    /// GPU type to rent.
    #[serde(default = "default_gpu")]
    pub gpu: String,
    #[serde(default = "default_gpu_count")]
    pub gpu_count: u32,
    /// Highest price per GPU per hour we are willing to bid.
    #[serde(default = "default_max_bid")]
    pub max_bid_per_gpu: f64,
    #[serde(default = "default_min_vcpu")]
    pub min_vcpu_count: u32,
    #[serde(default = "default_min_memory")]
    pub min_memory_in_gb: u32,
    /// Minimum download bandwidth in Mbps.
    #[serde(default = "default_min_download")]
    pub min_download: u32,
    /// Minimum upload bandwidth in Mbps.
    #[serde(default = "default_min_upload")]
    pub min_upload: u32,
    #[serde(default)]
    pub cloud_type: CloudType,
    #[serde(default = "default_template_id")]
    pub template_id: String,
    /// Container image to run.
    #[serde(default = "default_image")]
    pub image: String,
    /// Seconds after building the request at which the provider stops the pod.
    #[serde(default = "default_terminate_after")]
    pub terminate_after: u64,
    /// Extra environment variables for the pod.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Entry point override passed as docker arguments.
    #[serde(default)]
    pub entry: Option<String>,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Give up on a pod that has not started after this many seconds.
    #[serde(default = "default_max_wait")]
    pub max_wait_secs: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            gpu: default_gpu(),
            gpu_count: default_gpu_count(),
            max_bid_per_gpu: default_max_bid(),
            min_vcpu_count: default_min_vcpu(),
            min_memory_in_gb: default_min_memory(),
            min_download: default_min_download(),
            min_upload: default_min_upload(),
            cloud_type: CloudType::default(),
            template_id: default_template_id(),
            image: default_image(),
            terminate_after: default_terminate_after(),
            env: BTreeMap::new(),
            entry: None,
            api_url: default_api_url(),
            api_key_env: default_api_key_env(),
            max_wait_secs: default_max_wait(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

impl ProviderSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.gpu.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "gpu",
                reason: "must not be empty".into(),
            });
        }
        if self.gpu_count == 0 {
            return Err(ConfigError::Invalid {
                field: "gpu_count",
                reason: "must be at least 1".into(),
            });
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "poll_interval_secs",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

fn default_gpu() -> String {
    "NVIDIA RTX A5000".to_string()
}

fn default_gpu_count() -> u32 {
    1
}

fn default_max_bid() -> f64 {
    2.0
}

fn default_min_vcpu() -> u32 {
    8
}

fn default_min_memory() -> u32 {
    29
}

fn default_min_download() -> u32 {
    2000
}

fn default_min_upload() -> u32 {
    1500
}

fn default_template_id() -> String {
    "758uq6u5fc".to_string()
}

fn default_image() -> String {
    "winglian/axolotl-runpod:main-py3.9-cu118-2.0.0".to_string()
}

// Keeps a forgotten pod from running for more than 15 minutes.
fn default_terminate_after() -> u64 {
    900
}

fn default_api_url() -> String {
    "https://api.runpod.io/graphql".to_string()
}

fn default_api_key_env() -> String {
    "RUNPOD_API_KEY".to_string()
}

fn default_max_wait() -> u64 {
    600
}

fn default_poll_interval() -> u64 {
    5
}

/// Provider API key.
#[derive(Clone)]
pub struct Credential(String);

impl Credential {
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Read the key from the named environment variable.
    pub fn from_env(var: &str) -> Result<Self, ConfigError> {
        match env::var(var) {
            Ok(key) if !key.trim().is_empty() => Ok(Self(key)),
            _ => Err(ConfigError::MissingCredential(var.to_string())),
        }
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    Io(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("no [runpod] block found in config file")]
    MissingProviderBlock,
    #[error("no {0} environment variable found")]
    MissingCredential(String),
    #[error("unknown config key `{0}` (strict mode)")]
    UnknownConfigKey(String),
    #[error("invalid override `{key}`: {reason}")]
    InvalidOverride { key: String, reason: String },
    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    fn invalid_override(key: &str, reason: impl Into<String>) -> Self {
        Self::InvalidOverride {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}
