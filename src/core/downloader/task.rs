use std::path::{Path, PathBuf};

use crate::core::checksum::Digest;
use crate::core::error::MirrorFailure;

/// One artifact to fetch. Consumed by exactly one `fetch` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTask {
    /// Candidate URLs, tried in order.
    pub sources: Vec<String>,
    pub destination: PathBuf,
    /// Where bytes land until verified; sibling of `destination` so the
    /// publish rename stays on one filesystem.
    pub staging: PathBuf,
    pub expected_digest: Option<Digest>,
    /// Bytes per second; `None` is unlimited.
    pub max_throughput: Option<u64>,
    pub size_hint: Option<u64>,
}

impl DownloadTask {
    pub fn new(sources: Vec<String>, destination: impl Into<PathBuf>) -> Self {
        let destination = destination.into();
        let staging = staging_path_for(&destination);
        Self {
            sources,
            destination,
            staging,
            expected_digest: None,
            max_throughput: None,
            size_hint: None,
        }
    }

    /// Mirror roots joined with a relative artifact path.
    pub fn from_mirrors<'a>(
        mirrors: impl IntoIterator<Item = &'a str>,
        relative: &str,
        destination: impl Into<PathBuf>,
    ) -> Self {
        let relative = relative.trim_start_matches('/');
        let mut sources: Vec<String> = Vec::new();
        for mirror in mirrors {
            let url = format!("{}/{}", mirror.trim_end_matches('/'), relative);
            if !sources.contains(&url) {
                sources.push(url);
            }
        }
        Self::new(sources, destination)
    }

    pub fn with_digest(mut self, digest: Digest) -> Self {
        self.expected_digest = Some(digest);
        self
    }

    pub fn with_throughput(mut self, bytes_per_sec: Option<u64>) -> Self {
        self.max_throughput = bytes_per_sec.filter(|rate| *rate > 0);
        self
    }

    pub fn with_size_hint(mut self, size: Option<u64>) -> Self {
        self.size_hint = size;
        self
    }
}

/// `dir/name` → `dir/.name.part`
pub fn staging_path_for(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "download".to_string());
    destination.with_file_name(format!(".{name}.part"))
}

/// A verified file now visible at its destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedPath {
    pub path: PathBuf,
    /// The mirror that served the published bytes.
    pub source: String,
    pub bytes: u64,
    /// Earlier mirrors that failed before `source` succeeded.
    pub failures: Vec<MirrorFailure>,
}
