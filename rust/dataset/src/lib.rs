#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

//! HuggingFace Dataset Fetcher
//!
//! Lists every file of a dataset revision, records the revision and LFS
//! checksums in `huggingface-metadata.txt`, and downloads the files with
//! aria2c.

pub mod branch;
pub mod download;
pub mod fetch;
pub mod hub;
pub mod layout;
pub mod manifest;

pub use branch::{BranchError, DEFAULT_BRANCH, sanitize_branch_name};
pub use download::{Aria2Downloader, DownloadReport};
pub use fetch::{FetchError, FetchOutcome, fetch};
pub use hub::{HubClient, HubError, RemoteFile};
pub use layout::{normalize_dataset_id, output_folder};
pub use manifest::{MANIFEST_FILE, Manifest};
