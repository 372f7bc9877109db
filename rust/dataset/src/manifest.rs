//! `huggingface-metadata.txt`, written next to the downloaded files.

use std::{fmt::Write as _, io, path::Path};

use crate::hub::RemoteFile;

pub const MANIFEST_FILE: &str = "huggingface-metadata.txt";

/// What was fetched, from where, and when.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub dataset: String,
    pub branch: String,
    /// Local time, `%Y-%m-%d %H:%M:%S`.
    pub downloaded_at: String,
    /// `(sha256, path)` for every LFS-tracked file.
    pub checksums: Vec<(String, String)>,
}

impl Manifest {
    /// Manifest for a listing fetched now.
    #[must_use]
    pub fn new(dataset: &str, branch: &str, files: &[RemoteFile]) -> Self {
        Self {
            dataset: dataset.to_string(),
            branch: branch.to_string(),
            downloaded_at: chrono::Local::now()
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
            checksums: files
                .iter()
                .filter_map(|f| f.sha256.clone().map(|sha| (sha, f.path.clone())))
                .collect(),
        }
    }

    #[must_use]
    pub fn render(&self) -> String {
        let mut out = format!(
            "url: https://huggingface.co/{}\nbranch: {}\ndownload date: {}\n",
            self.dataset, self.branch, self.downloaded_at
        );
        if !self.checksums.is_empty() {
            out.push_str("sha256sum:\n");
            for (sha, path) in &self.checksums {
                let _ = writeln!(out, "    {sha} {path}");
            }
        }
        out
    }

    /// Write to `<dir>/huggingface-metadata.txt`, replacing any previous one.
    pub fn write(&self, dir: &Path) -> io::Result<()> {
        std::fs::write(dir.join(MANIFEST_FILE), self.render())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn manifest(checksums: Vec<(&str, &str)>) -> Manifest {
        Manifest {
            dataset: "tatsu-lab/alpaca".into(),
            branch: "main".into(),
            downloaded_at: "2024-03-01 12:00:00".into(),
            checksums: checksums
                .into_iter()
                .map(|(s, p)| (s.into(), p.into()))
                .collect(),
        }
    }

    #[test]
    fn test_render_with_checksums() {
        let m = manifest(vec![("abc123", "data/train.parquet"), ("def456", "test.parquet")]);
        assert_eq!(
            m.render(),
            "url: https://huggingface.co/tatsu-lab/alpaca\n\
             branch: main\n\
             download date: 2024-03-01 12:00:00\n\
             sha256sum:\n    \
             abc123 data/train.parquet\n    \
             def456 test.parquet\n"
        );
    }

    #[test]
    fn test_render_without_checksums_omits_section() {
        assert_eq!(
            manifest(vec![]).render(),
            "url: https://huggingface.co/tatsu-lab/alpaca\n\
             branch: main\n\
             download date: 2024-03-01 12:00:00\n"
        );
    }

    #[test]
    fn test_new_keeps_only_lfs_files() {
        let files = vec![
            RemoteFile {
                path: "README.md".into(),
                url: "https://huggingface.co/datasets/x/y/resolve/main/README.md".into(),
                sha256: None,
            },
            RemoteFile {
                path: "data.parquet".into(),
                url: "https://huggingface.co/datasets/x/y/resolve/main/data.parquet".into(),
                sha256: Some("ff00".into()),
            },
        ];
        let m = Manifest::new("x/y", "main", &files);
        assert_eq!(m.checksums, vec![("ff00".to_string(), "data.parquet".to_string())]);
        assert_eq!(m.downloaded_at.len(), "2024-03-01 12:00:00".len());
    }

    #[test]
    fn test_write_overwrites() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILE), "stale").unwrap();
        manifest(vec![]).write(dir.path()).unwrap();
        let content = std::fs::read_to_string(dir.path().join(MANIFEST_FILE)).unwrap();
        assert!(content.starts_with("url: https://huggingface.co/tatsu-lab/alpaca\n"));
    }
}
