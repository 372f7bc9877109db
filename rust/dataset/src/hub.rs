//! HuggingFace Hub tree listing.

use std::time::Duration;

use base64::{Engine, engine::general_purpose::STANDARD};
use serde::Deserialize;

pub const DEFAULT_HUB_URL: &str = "https://huggingface.co";

/// Entries the hub returns per tree page.
const PAGE_SIZE: u32 = 50;

/// A file in a dataset revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    /// Path within the repository.
    pub path: String,
    pub url: String,
    /// LFS object id, present only for LFS-tracked files.
    pub sha256: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type", default)]
    kind: String,
    lfs: Option<LfsPointer>,
}

#[derive(Debug, Deserialize)]
struct LfsPointer {
    oid: String,
}

/// Cursor for the page after the entry at `last_path`.
///
/// The hub expects base64 of `base64({"file_name":...}):<page size>`, with
/// `=` percent-encoded.
#[must_use]
pub fn page_cursor(last_path: &str) -> String {
    let name = serde_json::json!({ "file_name": last_path }).to_string();
    let inner = STANDARD.encode(name);
    STANDARD
        .encode(format!("{inner}:{PAGE_SIZE}"))
        .replace('=', "%3D")
}

pub struct HubClient {
    http: reqwest::Client,
    base_url: String,
}

impl HubClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, HubError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn tree_url(&self, dataset: &str, branch: &str, cursor: &str) -> String {
        format!(
            "{}/api/datasets/{dataset}/tree/{branch}?cursor={cursor}",
            self.base_url
        )
    }

    fn file_url(&self, dataset: &str, branch: &str, path: &str) -> String {
        format!(
            "{}/datasets/{dataset}/resolve/{branch}/{path}",
            self.base_url
        )
    }

    /// Every file in `dataset` at `branch`, following pagination until the
    /// hub returns an empty page.
    pub async fn list_files(
        &self,
        dataset: &str,
        branch: &str,
    ) -> Result<Vec<RemoteFile>, HubError> {
        let mut files = Vec::new();
        let mut cursor = String::new();

        loop {
            let url = self.tree_url(dataset, branch, &cursor);
            tracing::debug!("GET {url}");

            let response = self.http.get(&url).send().await?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(HubError::Status {
                    status: status.as_u16(),
                    body,
                });
            }

            let page: Vec<TreeEntry> = response.json().await?;
            let Some(last) = page.last() else {
                break;
            };

            let next = page_cursor(&last.path);
            if next == cursor {
                return Err(HubError::StalledPagination(last.path.clone()));
            }
            cursor = next;

            files.extend(page.into_iter().filter(|e| e.kind != "directory").map(
                |entry| RemoteFile {
                    url: self.file_url(dataset, branch, &entry.path),
                    sha256: entry.lfs.map(|lfs| lfs.oid),
                    path: entry.path,
                },
            ));
        }

        tracing::info!("Found {} files in {dataset}@{branch}", files.len());
        Ok(files)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("hub request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("hub returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("hub kept returning the page ending at `{0}`")]
    StalledPagination(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_cursor() {
        assert_eq!(
            page_cursor("data/train.json"),
            "ZXlKbWFXeGxYMjVoYldVaU9pSmtZWFJoTDNSeVlXbHVMbXB6YjI0aWZRPT06NTA%3D"
        );
    }

    #[test]
    fn test_urls() {
        let client = HubClient::new("https://huggingface.co/").unwrap();
        assert_eq!(
            client.tree_url("tatsu-lab/alpaca", "main", ""),
            "https://huggingface.co/api/datasets/tatsu-lab/alpaca/tree/main?cursor="
        );
        assert_eq!(
            client.file_url("tatsu-lab/alpaca", "main", "data/train.parquet"),
            "https://huggingface.co/datasets/tatsu-lab/alpaca/resolve/main/data/train.parquet"
        );
    }

    #[test]
    fn test_entry_parsing() {
        let page: Vec<TreeEntry> = serde_json::from_str(
            r#"[
                {"type": "directory", "oid": "1", "path": "data"},
                {"type": "file", "oid": "2", "size": 10, "path": "README.md"},
                {"type": "file", "oid": "3", "size": 99, "path": "data/a.parquet",
                 "lfs": {"oid": "abc", "size": 99, "pointerSize": 130}}
            ]"#,
        )
        .unwrap();
        assert_eq!(page[0].kind, "directory");
        assert!(page[1].lfs.is_none());
        assert_eq!(page[2].lfs.as_ref().unwrap().oid, "abc");
    }
}
