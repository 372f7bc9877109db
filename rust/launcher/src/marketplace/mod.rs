//! Marketplace client seam.
//!
//! The orchestrator only talks to the provider through [`Marketplace`]. The
//! production implementation is [`runpod::RunpodClient`]. Implementations never
//! retry; callers decide what to do with a [`MarketplaceError::Transient`].

pub mod runpod;

use async_trait::async_trait;

use crate::spec::JobConfig;

/// Host that proxies SSH connections to pods.
pub const SSH_PROXY_HOST: &str = "ssh.runpod.io";

#[async_trait]
pub trait Marketplace: Send + Sync {
    /// Current market price for `count` units of a GPU type.
    async fn get_quote(
        &self,
        resource_class: &str,
        count: u32,
    ) -> Result<BidQuote, MarketplaceError>;

    /// Rent a spot pod at `bid_per_unit` per GPU.
    async fn create_job(
        &self,
        spec: &JobConfig,
        bid_per_unit: f64,
    ) -> Result<RemoteJob, MarketplaceError>;

    /// Fetch a status snapshot. `debug` logs the raw exchange for this call only.
    async fn get_job(&self, id: &str, debug: bool) -> Result<RemoteJob, MarketplaceError>;

    async fn terminate_job(&self, id: &str) -> Result<(), MarketplaceError>;
}

/// Market price for a GPU type.
#[derive(Debug, Clone, PartialEq)]
pub struct BidQuote {
    pub resource_class: String,
    /// Lowest accepted spot bid per GPU per hour, if anything is on offer.
    pub minimum_price: Option<f64>,
}

/// Provider view of a pod.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RemoteJob {
    pub id: String,
    /// Host identifier used as the SSH user.
    pub host_id: Option<String>,
    /// Present once the container is up.
    pub runtime: Option<Runtime>,
}

impl RemoteJob {
    /// `user@host` for the SSH proxy.
    #[must_use]
    pub fn ssh_address(&self) -> Option<String> {
        self.host_id
            .as_deref()
            .map(|host| format!("{host}@{SSH_PROXY_HOST}"))
    }
}

/// Connection details of a started pod.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Runtime {
    pub uptime_secs: u64,
    pub ports: Vec<PortMapping>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortMapping {
    pub ip: String,
    pub is_public: bool,
    pub private_port: u16,
    pub public_port: u16,
    /// Protocol, e.g. "tcp" or "http".
    pub kind: String,
}

/// Errors returned by a marketplace.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MarketplaceError {
    /// Network trouble or provider overload; the same request may succeed later.
    #[error("transient network error: {0}")]
    Transient(String),
    /// Malformed request or no capacity.
    #[error("provider rejected request: {0}")]
    Rejected(String),
    /// The provider has no record of the pod.
    #[error("pod not found: {0}")]
    NotFound(String),
}

impl MarketplaceError {
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssh_address() {
        let job = RemoteJob {
            id: "abc123".into(),
            host_id: Some("abc123-64410f5e".into()),
            runtime: None,
        };
        assert_eq!(
            job.ssh_address().as_deref(),
            Some("abc123-64410f5e@ssh.runpod.io")
        );
        assert_eq!(RemoteJob::default().ssh_address(), None);
    }
}
