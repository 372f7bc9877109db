//! Concurrent downloads through aria2c.

use std::{
    path::{Component, Path, PathBuf},
    process::{Command as StdCommand, Stdio},
    sync::Arc,
    time::Duration,
};

use indicatif::{ProgressBar, ProgressStyle};
use tokio::{process::Command, sync::Semaphore, task::JoinSet};

use crate::hub::RemoteFile;

/// Marker aria2c keeps next to a file until the transfer completes.
const CONTROL_SUFFIX: &str = ".aria2";

/// Outcome of a batch of downloads.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DownloadReport {
    pub downloaded: usize,
    /// Already complete on disk.
    pub skipped: usize,
    /// `(path, reason)` per failed file.
    pub failed: Vec<(String, String)>,
}

impl DownloadReport {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct Aria2Downloader {
    binary: String,
    threads: usize,
    show_progress: bool,
}

impl Aria2Downloader {
    /// Run at most `threads` aria2c processes at once.
    #[must_use]
    pub fn new(threads: usize) -> Self {
        Self {
            binary: "aria2c".to_string(),
            threads: threads.max(1),
            show_progress: false,
        }
    }

    /// Use a different executable in place of `aria2c`.
    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    #[must_use]
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Check if the downloader executable is on `PATH`.
    #[must_use]
    pub fn is_installed(&self) -> bool {
        StdCommand::new("which")
            .arg(&self.binary)
            .stdout(Stdio::null())
            .status()
            .is_ok_and(|s| s.success())
    }

    /// Resumable, 16-connection transfer of `url` to `<dir>/<file_name>`.
    #[must_use]
    pub fn args(url: &str, dir: &Path, file_name: &str) -> Vec<String> {
        vec![
            "-c".into(),
            "-x".into(),
            "16".into(),
            "-s".into(),
            "16".into(),
            "-k".into(),
            "1M".into(),
            url.into(),
            "-d".into(),
            dir.to_string_lossy().into_owned(),
            "-o".into(),
            file_name.into(),
        ]
    }

    /// A file is complete when it exists without an aria2c control file.
    #[must_use]
    pub fn is_complete(target: &Path) -> bool {
        let mut control = target.as_os_str().to_owned();
        control.push(CONTROL_SUFFIX);
        target.exists() && !PathBuf::from(control).exists()
    }

    /// Where a repository path lands under `dir`. Paths that could escape
    /// `dir` are refused.
    fn target(dir: &Path, path: &str) -> Option<(PathBuf, String)> {
        let relative = Path::new(path);
        if path.is_empty()
            || !relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
        {
            return None;
        }
        let target = dir.join(relative);
        let parent = target.parent()?.to_path_buf();
        let name = target.file_name()?.to_string_lossy().into_owned();
        Some((parent, name))
    }

    /// Download every file into `dir`, keeping the repository layout and
    /// skipping files already complete.
    ///
    /// Failures are collected rather than aborting the batch.
    pub async fn download_all(&self, files: &[RemoteFile], dir: &Path) -> DownloadReport {
        let mut report = DownloadReport::default();
        let pb = self.progress_bar(files.len() as u64);
        let permits = Arc::new(Semaphore::new(self.threads));
        let mut tasks = JoinSet::new();

        for file in files {
            let Some((parent, name)) = Self::target(dir, &file.path) else {
                tracing::warn!("Refusing to download {}: unsafe path", file.path);
                report
                    .failed
                    .push((file.path.clone(), "unsafe path".to_string()));
                pb.inc(1);
                continue;
            };
            if Self::is_complete(&parent.join(&name)) {
                tracing::info!("Skipping {}, already downloaded", file.path);
                report.skipped += 1;
                pb.inc(1);
                continue;
            }

            let permits = permits.clone();
            let binary = self.binary.clone();
            let args = Self::args(&file.url, &parent, &name);
            let path = file.path.clone();
            tasks.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return (path, Err("download pool closed".to_string()));
                };
                if let Err(e) = tokio::fs::create_dir_all(&parent).await {
                    return (path, Err(format!("failed to create {}: {e}", parent.display())));
                }
                tracing::debug!("Spawning: {binary} {}", args.join(" "));
                let result = match Command::new(&binary)
                    .args(&args)
                    .stdout(Stdio::null())
                    .stderr(Stdio::piped())
                    .output()
                    .await
                {
                    Ok(output) if output.status.success() => Ok(()),
                    Ok(output) => Err(format!(
                        "{binary} exited with {}: {}",
                        output.status,
                        String::from_utf8_lossy(&output.stderr).trim()
                    )),
                    Err(e) => Err(format!("failed to run {binary}: {e}")),
                };
                (path, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            pb.inc(1);
            match joined {
                Ok((path, Ok(()))) => {
                    pb.set_message(path);
                    report.downloaded += 1;
                }
                Ok((path, Err(reason))) => {
                    tracing::warn!("Failed to download {path}: {reason}");
                    report.failed.push((path, reason));
                }
                Err(e) => {
                    tracing::warn!("Download task failed: {e}");
                    report.failed.push((String::new(), e.to_string()));
                }
            }
        }

        pb.finish_and_clear();
        report
    }

    fn progress_bar(&self, len: u64) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len);
        if let Ok(style) = ProgressStyle::default_bar().template(
            "{spinner:.green} [{elapsed_precise}] {msg:32} [{wide_bar:.cyan/blue}] {pos:>4}/{len:4}",
        ) {
            pb.set_style(style.progress_chars("#*-"));
        }
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn remote(path: &str) -> RemoteFile {
        RemoteFile {
            path: path.into(),
            url: format!("https://huggingface.co/datasets/x/y/resolve/main/{path}"),
            sha256: None,
        }
    }

    #[test]
    fn test_args() {
        let args = Aria2Downloader::args(
            "https://huggingface.co/datasets/x/y/resolve/main/a.json",
            Path::new("datasets/x_y"),
            "a.json",
        );
        assert_eq!(
            args.join(" "),
            "-c -x 16 -s 16 -k 1M https://huggingface.co/datasets/x/y/resolve/main/a.json \
             -d datasets/x_y -o a.json"
        );
    }

    #[test]
    fn test_is_complete() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("a.json");
        assert!(!Aria2Downloader::is_complete(&target));

        std::fs::write(&target, "{}").unwrap();
        std::fs::write(dir.path().join("a.json.aria2"), "").unwrap();
        assert!(!Aria2Downloader::is_complete(&target));

        std::fs::remove_file(dir.path().join("a.json.aria2")).unwrap();
        assert!(Aria2Downloader::is_complete(&target));
    }

    #[test]
    fn test_target_keeps_repository_layout() {
        let dir = Path::new("datasets/x_y");
        assert_eq!(
            Aria2Downloader::target(dir, "train/data.parquet"),
            Some((PathBuf::from("datasets/x_y/train"), "data.parquet".into()))
        );
        assert_eq!(
            Aria2Downloader::target(dir, "README.md"),
            Some((PathBuf::from("datasets/x_y"), "README.md".into()))
        );
        assert_eq!(Aria2Downloader::target(dir, "../escape.json"), None);
        assert_eq!(Aria2Downloader::target(dir, "/etc/passwd"), None);
        assert_eq!(Aria2Downloader::target(dir, ""), None);
    }

    #[test]
    fn test_threads_at_least_one() {
        assert_eq!(Aria2Downloader::new(0).threads, 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_download_all_skips_complete_files() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("done.json"), "{}").unwrap();

        let files = vec![remote("done.json"), remote("a.json"), remote("sub/b.json")];
        let report = Aria2Downloader::new(2)
            .with_binary("true")
            .download_all(&files, dir.path())
            .await;

        assert_eq!(report.skipped, 1);
        assert_eq!(report.downloaded, 2);
        assert!(report.is_success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_download_all_collects_failures() {
        let dir = tempdir().unwrap();
        let files = vec![remote("a.json"), remote("b.json")];
        let report = Aria2Downloader::new(1)
            .with_binary("false")
            .download_all(&files, dir.path())
            .await;

        assert_eq!(report.downloaded, 0);
        assert_eq!(report.failed.len(), 2);
        assert!(!report.is_success());
    }

    /// Writes the URL into the `-d`/`-o` target the way aria2c would.
    #[cfg(unix)]
    fn fake_aria2(dir: &Path) -> String {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("fake-aria2c");
        std::fs::write(&script, "#!/bin/sh\necho \"$8\" > \"${10}/${12}\"\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script.to_string_lossy().into_owned()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_same_file_name_in_different_folders() {
        let bin = tempdir().unwrap();
        let dir = tempdir().unwrap();
        let files = vec![remote("train/data.parquet"), remote("test/data.parquet")];
        let report = Aria2Downloader::new(2)
            .with_binary(fake_aria2(bin.path()))
            .download_all(&files, dir.path())
            .await;

        assert!(report.is_success(), "{:?}", report.failed);
        assert_eq!(report.downloaded, 2);
        for split in ["train", "test"] {
            let content =
                std::fs::read_to_string(dir.path().join(split).join("data.parquet")).unwrap();
            assert!(content.trim_end().ends_with(&format!("{split}/data.parquet")));
        }
        assert!(!dir.path().join("data.parquet").exists());
    }

    #[tokio::test]
    async fn test_unsafe_path_is_refused() {
        let dir = tempdir().unwrap();
        let report = Aria2Downloader::new(1)
            .with_binary("definitely-not-a-real-downloader")
            .download_all(&[remote("../outside.json")], dir.path())
            .await;
        assert_eq!(report.failed, vec![("../outside.json".to_string(), "unsafe path".to_string())]);
    }

    #[tokio::test]
    async fn test_missing_binary_is_a_failure() {
        let dir = tempdir().unwrap();
        let report = Aria2Downloader::new(1)
            .with_binary("definitely-not-a-real-downloader")
            .download_all(&[remote("a.json")], dir.path())
            .await;
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].1.contains("failed to run"));
    }
}
