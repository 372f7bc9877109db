//! Runpod GraphQL client.
//!
//! Every call is a single POST to the GraphQL endpoint with the API key as a
//! query parameter. Failures are split into transient (connection problems,
//! timeouts, 5xx, 429) and rejected (anything the provider answered with an
//! error or an empty result). A pod the provider no longer knows is reported
//! as not found.

use std::{fmt::Write as _, time::Duration};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, de::DeserializeOwned};

use super::{BidQuote, Marketplace, MarketplaceError, PortMapping, RemoteJob, Runtime};
use crate::{config::Credential, spec::JobConfig};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Marketplace backed by the Runpod API.
pub struct RunpodClient {
    http: Client,
    endpoint: String,
    credential: Credential,
    /// Log raw requests and responses for quote, create and terminate calls.
    debug: bool,
}

impl RunpodClient {
    /// Create a new client for `endpoint`.
    pub fn new(
        endpoint: impl Into<String>,
        credential: Credential,
        debug: bool,
    ) -> Result<Self, MarketplaceError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| MarketplaceError::Rejected(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
            credential,
            debug,
        })
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        query: &str,
        debug: bool,
    ) -> Result<T, MarketplaceError> {
        if debug {
            tracing::debug!("runpod request: {query}");
        }

        let response = self
            .http
            .post(&self.endpoint)
            .query(&[("api_key", self.credential.expose())])
            .json(&serde_json::json!({ "query": query }))
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        let body = response.text().await.map_err(classify_transport)?;

        if debug {
            tracing::debug!("runpod response ({status}): {body}");
        }

        if !status.is_success() {
            return Err(classify_status(status, &body));
        }

        let parsed: GraphqlResponse<T> = serde_json::from_str(&body)
            .map_err(|e| MarketplaceError::Rejected(format!("malformed response: {e}")))?;

        if let Some(errors) = parsed.errors.filter(|e| !e.is_empty()) {
            let messages: Vec<_> = errors.into_iter().map(|e| e.message).collect();
            return Err(classify_graphql_errors(&messages));
        }

        parsed
            .data
            .ok_or_else(|| MarketplaceError::Rejected("response carried no data".into()))
    }
}

#[async_trait]
impl Marketplace for RunpodClient {
    async fn get_quote(
        &self,
        resource_class: &str,
        count: u32,
    ) -> Result<BidQuote, MarketplaceError> {
        let data: GpuTypesData = self
            .execute(&gpu_quote_query(resource_class, count), self.debug)
            .await?;

        let minimum_price = data
            .gpu_types
            .into_iter()
            .find(|gpu| gpu.id == resource_class)
            .and_then(|gpu| gpu.lowest_price)
            .and_then(|price| price.minimum_bid_price);

        Ok(BidQuote {
            resource_class: resource_class.to_string(),
            minimum_price,
        })
    }

    async fn create_job(
        &self,
        spec: &JobConfig,
        bid_per_unit: f64,
    ) -> Result<RemoteJob, MarketplaceError> {
        let data: RentData = self
            .execute(&rent_mutation(spec, bid_per_unit), self.debug)
            .await?;
        data.pod_rent_interruptable
            .map(PodNode::into_remote)
            .ok_or_else(|| MarketplaceError::Rejected("provider returned no pod".into()))
    }

    async fn get_job(&self, id: &str, debug: bool) -> Result<RemoteJob, MarketplaceError> {
        let data: PodData = self.execute(&pod_query(id), debug).await?;
        data.pod
            .map(PodNode::into_remote)
            .ok_or_else(|| MarketplaceError::NotFound(id.to_string()))
    }

    async fn terminate_job(&self, id: &str) -> Result<(), MarketplaceError> {
        let _: serde_json::Value = self.execute(&terminate_mutation(id), self.debug).await?;
        Ok(())
    }
}

fn classify_transport(error: reqwest::Error) -> MarketplaceError {
    if error.is_timeout() || error.is_connect() || error.is_request() || error.is_body() {
        MarketplaceError::Transient(error.to_string())
    } else {
        MarketplaceError::Rejected(error.to_string())
    }
}

fn classify_status(status: StatusCode, body: &str) -> MarketplaceError {
    let message = format!("HTTP {status}: {}", body.trim());
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        MarketplaceError::Transient(message)
    } else {
        MarketplaceError::Rejected(message)
    }
}

fn classify_graphql_errors(messages: &[String]) -> MarketplaceError {
    let joined = messages.join("; ");
    let missing = messages.iter().any(|m| {
        let m = m.to_ascii_lowercase();
        m.contains("not found") || m.contains("does not exist")
    });
    if missing {
        MarketplaceError::NotFound(joined)
    } else {
        MarketplaceError::Rejected(joined)
    }
}

/// Quote a value as a GraphQL string literal.
fn gql_str(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

fn gpu_quote_query(resource_class: &str, count: u32) -> String {
    format!(
        "query GpuTypes {{ gpuTypes(input: {{id: {id}}}) {{ id displayName memoryInGb \
         lowestPrice(input: {{gpuCount: {count}}}) {{ minimumBidPrice uninterruptablePrice }} }} }}",
        id = gql_str(resource_class),
    )
}

fn rent_mutation(spec: &JobConfig, bid_per_unit: f64) -> String {
    let mut input = format!(
        "bidPerGpu: {bid_per_unit}, cloudType: {cloud}, gpuCount: {count}, \
         minVcpuCount: {vcpu}, minMemoryInGb: {memory}, gpuTypeId: {gpu}, name: {name}, \
         imageName: {image}, templateId: {template}, minDownload: {download}, \
         minUpload: {upload}, terminateAfter: {terminate}",
        cloud = spec.cloud_type,
        count = spec.resource_count,
        vcpu = spec.min_vcpu,
        memory = spec.min_memory_gb,
        gpu = gql_str(&spec.resource_class),
        name = gql_str(&spec.name),
        image = gql_str(&spec.image),
        template = gql_str(&spec.template_id),
        download = spec.min_download_mbps,
        upload = spec.min_upload_mbps,
        terminate = gql_str(&spec.terminate_at.format("%Y-%m-%dT%H:%M:%SZ").to_string()),
    );

    // Escaped by the job builder.
    if let Some(entry) = &spec.entry {
        let _ = write!(input, ", dockerArgs: \"{entry}\"");
    }

    let env: Vec<String> = spec
        .env
        .iter()
        .map(|(key, value)| format!("{{key: {}, value: {}}}", gql_str(key), gql_str(value)))
        .collect();
    let _ = write!(input, ", env: [{}]", env.join(", "));

    format!(
        "mutation {{ podRentInterruptable(input: {{{input}}}) {{ id imageName machineId \
         machine {{ podHostId }} }} }}"
    )
}

fn pod_query(id: &str) -> String {
    format!(
        "query Pod {{ pod(input: {{podId: {id}}}) {{ id desiredStatus machine {{ podHostId }} \
         runtime {{ uptimeInSeconds ports {{ ip isIpPublic privatePort publicPort type }} }} }} }}",
        id = gql_str(id),
    )
}

fn terminate_mutation(id: &str) -> String {
    format!(
        "mutation {{ podTerminate(input: {{podId: {id}}}) }}",
        id = gql_str(id)
    )
}

#[derive(Debug, Deserialize)]
struct GraphqlResponse<T> {
    data: Option<T>,
    errors: Option<Vec<GraphqlError>>,
}

#[derive(Debug, Deserialize)]
struct GraphqlError {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GpuTypesData {
    #[serde(default)]
    gpu_types: Vec<GpuTypeNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GpuTypeNode {
    id: String,
    lowest_price: Option<LowestPrice>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LowestPrice {
    minimum_bid_price: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RentData {
    pod_rent_interruptable: Option<PodNode>,
}

#[derive(Debug, Deserialize)]
struct PodData {
    pod: Option<PodNode>,
}

#[derive(Debug, Deserialize)]
struct PodNode {
    id: String,
    machine: Option<MachineNode>,
    runtime: Option<RuntimeNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MachineNode {
    pod_host_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RuntimeNode {
    uptime_in_seconds: Option<u64>,
    #[serde(default)]
    ports: Option<Vec<PortNode>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PortNode {
    ip: String,
    is_ip_public: bool,
    private_port: u16,
    public_port: u16,
    #[serde(rename = "type")]
    kind: String,
}

impl PodNode {
    fn into_remote(self) -> RemoteJob {
        RemoteJob {
            id: self.id,
            host_id: self.machine.and_then(|m| m.pod_host_id),
            runtime: self.runtime.map(|rt| Runtime {
                uptime_secs: rt.uptime_in_seconds.unwrap_or_default(),
                ports: rt
                    .ports
                    .unwrap_or_default()
                    .into_iter()
                    .map(|p| PortMapping {
                        ip: p.ip,
                        is_public: p.is_ip_public,
                        private_port: p.private_port,
                        public_port: p.public_port,
                        kind: p.kind,
                    })
                    .collect(),
            }),
        }
    }
}
