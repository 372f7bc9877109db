//! One dataset revision, from listing to files on disk.

use std::path::{Path, PathBuf};

use crate::{
    download::{Aria2Downloader, DownloadReport},
    hub::{HubClient, HubError},
    layout::output_folder,
    manifest::Manifest,
};

/// Where a fetch wrote its files and how the downloads went.
#[derive(Debug)]
pub struct FetchOutcome {
    pub folder: PathBuf,
    pub listed: usize,
    pub report: DownloadReport,
}

/// List `dataset` at `branch`, then write the manifest and download every file
/// under `base`.
///
/// Nothing is written unless the listing succeeds.
pub async fn fetch(
    hub: &HubClient,
    downloader: &Aria2Downloader,
    dataset: &str,
    branch: &str,
    base: &Path,
) -> Result<FetchOutcome, FetchError> {
    let files = hub.list_files(dataset, branch).await?;

    let folder = output_folder(base, dataset, branch);
    std::fs::create_dir_all(&folder).map_err(|e| FetchError::Io(folder.clone(), e))?;
    Manifest::new(dataset, branch, &files)
        .write(&folder)
        .map_err(|e| FetchError::Io(folder.clone(), e))?;

    tracing::info!("Downloading {} files to {}", files.len(), folder.display());
    let report = downloader.download_all(&files, &folder).await;

    Ok(FetchOutcome {
        folder,
        listed: files.len(),
        report,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error(transparent)]
    Hub(#[from] HubError),
    #[error("failed to write to {0}: {1}")]
    Io(PathBuf, std::io::Error),
}
