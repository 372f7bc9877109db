//! Output folder naming.

use std::path::{Path, PathBuf};

use crate::branch::DEFAULT_BRANCH;

/// Folder used when no output directory is given.
pub const DEFAULT_BASE_FOLDER: &str = "datasets";

/// Strip a trailing `/` from a dataset id.
#[must_use]
pub fn normalize_dataset_id(dataset: &str) -> &str {
    dataset.strip_suffix('/').unwrap_or(dataset)
}

/// `<base>/<owner>_<name>[_<branch>]`.
#[must_use]
pub fn output_folder(base: &Path, dataset: &str, branch: &str) -> PathBuf {
    let segments: Vec<&str> = dataset.split('/').collect();
    let tail = &segments[segments.len().saturating_sub(2)..];
    let mut name = tail.join("_");
    if branch != DEFAULT_BRANCH {
        name.push('_');
        name.push_str(branch);
    }
    base.join(name)
}
