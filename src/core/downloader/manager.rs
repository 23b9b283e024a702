use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

use crate::core::cancel::CancelSignal;
use crate::core::checksum;
use crate::core::error::{FailureReason, LauncherError, LauncherResult, MirrorFailure};
use crate::core::http::{Transfer, Transport};

use super::task::{DownloadTask, PublishedPath};
use super::throttle::Throttle;

const DEFAULT_WORKERS: usize = 4;

/// Progress of one task through its mirror list.
enum FetchState {
    Pending,
    Trying(usize),
    NextMirror(usize),
    Published(PublishedPath),
    Exhausted,
}

enum AttemptError {
    Failed(FailureReason),
    Cancelled,
}

impl From<FailureReason> for AttemptError {
    fn from(reason: FailureReason) -> Self {
        AttemptError::Failed(reason)
    }
}

/// Mirror-failover, digest-verified, atomically publishing downloader.
pub struct DownloadManager {
    transport: Arc<dyn Transport>,
    /// Maximum number of tasks in flight.
    workers: usize,
    cancel: CancelSignal,
}

impl DownloadManager {
    pub fn new(transport: Arc<dyn Transport>, cancel: CancelSignal) -> Self {
        Self {
            transport,
            workers: DEFAULT_WORKERS,
            cancel,
        }
    }

    pub fn with_workers(mut self, n: usize) -> Self {
        self.workers = n.max(1);
        self
    }

    // ── Single task ─────────────────────────────────────

    /// Fetch one artifact, trying each source in order.
    ///
    /// The destination is either left untouched or replaced by a fully
    /// verified file; never partially written.
    #[instrument(skip(self, task), fields(destination = %task.destination.display()))]
    pub async fn fetch(&self, task: DownloadTask) -> LauncherResult<PublishedPath> {
        let mut failures: Vec<MirrorFailure> = Vec::new();
        let mut state = FetchState::Pending;

        loop {
            state = match state {
                FetchState::Pending => {
                    if task.sources.is_empty() {
                        FetchState::Exhausted
                    } else {
                        FetchState::Trying(0)
                    }
                }
                FetchState::Trying(i) => {
                    let url = &task.sources[i];
                    debug!("Trying mirror {}/{}: {}", i + 1, task.sources.len(), url);
                    // Only the first attempt may resume a leftover staging file.
                    match self.attempt(&task, url, i == 0).await {
                        Ok(bytes) => FetchState::Published(PublishedPath {
                            path: task.destination.clone(),
                            source: url.clone(),
                            bytes,
                            failures: std::mem::take(&mut failures),
                        }),
                        Err(AttemptError::Cancelled) => {
                            discard_staging(&task.staging).await;
                            return Err(LauncherError::Cancelled);
                        }
                        Err(AttemptError::Failed(reason)) => {
                            warn!("Mirror {} failed: {}", url, reason);
                            failures.push(MirrorFailure {
                                url: url.clone(),
                                reason,
                            });
                            discard_staging(&task.staging).await;
                            FetchState::NextMirror(i + 1)
                        }
                    }
                }
                FetchState::NextMirror(i) => {
                    if i < task.sources.len() {
                        FetchState::Trying(i)
                    } else {
                        FetchState::Exhausted
                    }
                }
                FetchState::Published(published) => {
                    info!(
                        "Published {:?} from {} ({} bytes)",
                        published.path, published.source, published.bytes
                    );
                    return Ok(published);
                }
                FetchState::Exhausted => {
                    return Err(LauncherError::DownloadExhausted {
                        destination: task.destination.clone(),
                        failures,
                    });
                }
            };
        }
    }

    async fn attempt(
        &self,
        task: &DownloadTask,
        url: &str,
        allow_resume: bool,
    ) -> Result<u64, AttemptError> {
        if let Some(parent) = task.staging.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| FailureReason::Io(format!("{}: {e}", parent.display())))?;
        }

        let mut offset = if allow_resume {
            tokio::fs::metadata(&task.staging)
                .await
                .map(|m| m.len())
                .unwrap_or(0)
        } else {
            0
        };
        if offset > 0 {
            debug!("Resuming {} at byte {}", url, offset);
        }

        let mut transfer = self.open(url, offset).await?;
        if transfer.status == 416 && offset > 0 {
            // Leftover staging does not fit the remote file; start over.
            discard_staging(&task.staging).await;
            offset = 0;
            transfer = self.open(url, 0).await?;
        }
        if !transfer.is_success() {
            return Err(FailureReason::Status(transfer.status).into());
        }

        let resumed = offset > 0 && transfer.is_partial();
        let mut received = if resumed { offset } else { 0 };
        let expected_total = transfer.content_length.map(|len| len + received);

        let mut file = open_staging(&task.staging, resumed)
            .await
            .map_err(|e| FailureReason::Io(format!("{}: {e}", task.staging.display())))?;
        let mut throttle = task.max_throughput.map(Throttle::new);

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(AttemptError::Cancelled),
                next = transfer.body.next() => next,
            };
            let Some(chunk) = next else { break };
            let chunk = chunk.map_err(|e| FailureReason::Network(e.to_string()))?;

            file.write_all(&chunk)
                .await
                .map_err(|e| FailureReason::Io(e.to_string()))?;
            received += chunk.len() as u64;

            if let Some(throttle) = throttle.as_mut() {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Err(AttemptError::Cancelled),
                    _ = throttle.consume(chunk.len() as u64) => {}
                }
            }
        }

        file.flush()
            .await
            .map_err(|e| FailureReason::Io(e.to_string()))?;
        file.sync_all()
            .await
            .map_err(|e| FailureReason::Io(e.to_string()))?;
        drop(file);

        if let Some(expected) = expected_total {
            if received != expected {
                return Err(FailureReason::Truncated {
                    expected,
                    received,
                }
                .into());
            }
        }

        // Verification strictly precedes publish.
        if let Some(expected) = &task.expected_digest {
            let actual = checksum::digest_async(&task.staging, expected.algorithm)
                .await
                .map_err(|e| FailureReason::Io(e.to_string()))?;
            if actual != *expected {
                return Err(FailureReason::Integrity {
                    expected: expected.to_string(),
                    actual: actual.to_string(),
                }
                .into());
            }
        }

        publish(&task.staging, &task.destination)
            .await
            .map_err(|e| FailureReason::Io(e.to_string()))?;
        Ok(received)
    }

    async fn open(
        &self,
        url: &str,
        offset: u64,
    ) -> Result<Transfer, AttemptError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(AttemptError::Cancelled),
            opened = self.transport.open(url, offset) => opened.map_err(|e| {
                AttemptError::Failed(match e {
                    LauncherError::Network { reason, .. } => FailureReason::Network(reason),
                    other => FailureReason::Network(other.to_string()),
                })
            }),
        }
    }

    // ── Batch ───────────────────────────────────────────

    /// Fetch many tasks with at most `workers` in flight.
    ///
    /// Tasks sharing a destination are collapsed to the first one.
    /// Returns one result per distinct destination.
    pub async fn fetch_all(
        &self,
        tasks: Vec<DownloadTask>,
    ) -> Vec<(PathBuf, LauncherResult<PublishedPath>)> {
        let mut seen = HashSet::new();
        let tasks: Vec<DownloadTask> = tasks
            .into_iter()
            .filter(|task| {
                let fresh = seen.insert(task.destination.clone());
                if !fresh {
                    debug!("Skipping duplicate task for {:?}", task.destination);
                }
                fresh
            })
            .collect();

        info!(
            "Starting batch download: {} files, workers={}",
            tasks.len(),
            self.workers
        );

        stream::iter(tasks)
            .map(|task| async move {
                let destination = task.destination.clone();
                (destination, self.fetch(task).await)
            })
            .buffer_unordered(self.workers)
            .collect()
            .await
    }
}

async fn open_staging(path: &Path, append: bool) -> std::io::Result<tokio::fs::File> {
    let mut options = tokio::fs::OpenOptions::new();
    options.create(true).write(true);
    if append {
        options.append(true);
    } else {
        options.truncate(true);
    }
    options.open(path).await
}

async fn publish(staging: &Path, destination: &Path) -> std::io::Result<()> {
    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::rename(staging, destination).await
}

async fn discard_staging(staging: &Path) {
    match tokio::fs::remove_file(staging).await {
        Ok(()) => debug!("Removed staging file {:?}", staging),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove staging file {:?}: {}", staging, e),
    }
}

/// Refuses a batch that clearly cannot fit on the destination's disk.
pub fn ensure_free_space(path: &Path, required_bytes: u64) -> LauncherResult<()> {
    if required_bytes == 0 {
        return Ok(());
    }
    let disks = sysinfo::Disks::new_with_refreshed_list();
    let canonical = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let mut best_len = 0usize;
    let mut available = None;
    for disk in disks.list() {
        let mount = disk.mount_point();
        if canonical.starts_with(mount) {
            let len = mount.as_os_str().len();
            if len >= best_len {
                best_len = len;
                available = Some(disk.available_space());
            }
        }
    }
    match available {
        Some(bytes) if bytes < required_bytes => Err(LauncherError::Other(format!(
            "Not enough free space under {:?}: available={} required={}",
            path, bytes, required_bytes
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::checksum::{Algorithm, Digest};
    use crate::core::http::testing::{Response, StaticTransport};

    const ABC_MD5: &str = "900150983cd24fb0d6963f7d28e17f72";

    fn manager(transport: Arc<StaticTransport>) -> DownloadManager {
        DownloadManager::new(transport, CancelSignal::new())
    }

    fn task(dir: &Path, sources: &[&str]) -> DownloadTask {
        DownloadTask::new(
            sources.iter().map(|s| s.to_string()).collect(),
            dir.join("bin").join("core.dll"),
        )
    }

    #[tokio::test]
    async fn later_mirror_succeeds_and_earlier_failures_are_kept() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(StaticTransport::new());
        transport
            .route("http://a/core.dll", Response::Fail("timed out".into()))
            .route("http://b/core.dll", Response::Status(503))
            .body("http://c/core.dll", "abc");

        let task = task(
            dir.path(),
            &["http://a/core.dll", "http://b/core.dll", "http://c/core.dll"],
        )
        .with_digest(Digest::md5(ABC_MD5).unwrap());
        let staging = task.staging.clone();

        let published = manager(transport).fetch(task).await.unwrap();
        assert_eq!(published.source, "http://c/core.dll");
        assert_eq!(published.bytes, 3);
        assert_eq!(published.failures.len(), 2);
        assert_eq!(published.failures[0].url, "http://a/core.dll");
        assert_eq!(published.failures[1].reason, FailureReason::Status(503));
        assert_eq!(std::fs::read(&published.path).unwrap(), b"abc");
        assert!(!staging.exists());
    }

    #[tokio::test]
    async fn timeout_then_digest_mismatch_exhausts_and_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(StaticTransport::new());
        transport
            .route("http://a/core.dll", Response::Fail("timed out".into()))
            .body("http://b/core.dll", "not the right bytes");

        let task = task(dir.path(), &["http://a/core.dll", "http://b/core.dll"])
            .with_digest(Digest::md5(ABC_MD5).unwrap());
        let destination = task.destination.clone();
        let staging = task.staging.clone();

        let err = manager(transport).fetch(task).await.unwrap_err();
        match err {
            LauncherError::DownloadExhausted { failures, .. } => {
                assert_eq!(failures.len(), 2);
                assert!(matches!(failures[0].reason, FailureReason::Network(_)));
                assert!(matches!(failures[1].reason, FailureReason::Integrity { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!destination.exists());
        assert!(!staging.exists());
    }

    #[tokio::test]
    async fn mid_stream_failure_never_touches_existing_destination() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(StaticTransport::new());
        transport.route(
            "http://a/core.dll",
            Response::BreakAfter(b"new contents".to_vec(), 4),
        );

        let task = task(dir.path(), &["http://a/core.dll"]);
        std::fs::create_dir_all(task.destination.parent().unwrap()).unwrap();
        std::fs::write(&task.destination, b"old").unwrap();
        let destination = task.destination.clone();
        let staging = task.staging.clone();

        assert!(manager(transport).fetch(task).await.is_err());
        assert_eq!(std::fs::read(&destination).unwrap(), b"old");
        assert!(!staging.exists());
    }

    #[tokio::test]
    async fn leftover_staging_is_resumed_with_a_range_request() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(StaticTransport::new());
        transport.body("http://a/core.dll", "abcdefghij");

        let task = task(dir.path(), &["http://a/core.dll"]);
        std::fs::create_dir_all(task.staging.parent().unwrap()).unwrap();
        std::fs::write(&task.staging, b"abcd").unwrap();
        let expected = Digest::new(Algorithm::Md5, "a925576942e94b2ef57a066101b48876").unwrap();
        let task = task.with_digest(expected);

        let published = manager(transport.clone()).fetch(task).await.unwrap();
        assert_eq!(std::fs::read(&published.path).unwrap(), b"abcdefghij");
        assert_eq!(
            transport.ranged_requests(),
            vec![("http://a/core.dll".to_string(), 4)]
        );
    }

    #[tokio::test]
    async fn no_sources_is_exhausted_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(StaticTransport::new());
        let err = manager(transport).fetch(task(dir.path(), &[])).await.unwrap_err();
        assert!(matches!(err, LauncherError::DownloadExhausted { failures, .. } if failures.is_empty()));
    }

    #[tokio::test]
    async fn cancelled_fetch_discards_staging() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(StaticTransport::new());
        transport.body("http://a/core.dll", "abc");
        let cancel = CancelSignal::new();
        cancel.cancel();

        let task = task(dir.path(), &["http://a/core.dll"]);
        let destination = task.destination.clone();
        let err = DownloadManager::new(transport, cancel)
            .fetch(task)
            .await
            .unwrap_err();
        assert!(matches!(err, LauncherError::Cancelled));
        assert!(!destination.exists());
    }

    #[tokio::test]
    async fn batch_runs_distinct_destinations_once() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(StaticTransport::new());
        transport.body("http://a/one", "1").body("http://a/two", "2");

        let tasks = vec![
            DownloadTask::new(vec!["http://a/one".into()], dir.path().join("one")),
            DownloadTask::new(vec!["http://a/two".into()], dir.path().join("two")),
            DownloadTask::new(vec!["http://a/one".into()], dir.path().join("one")),
        ];

        let results = manager(transport.clone())
            .with_workers(2)
            .fetch_all(tasks)
            .await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|(_, r)| r.is_ok()));
        assert_eq!(transport.opens(), 2);
    }

    #[tokio::test]
    async fn leftover_longer_than_remote_restarts_from_zero() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(StaticTransport::new());
        transport.body("http://a/core.dll", "abc");

        let task = task(dir.path(), &["http://a/core.dll"]).with_digest(Digest::md5(ABC_MD5).unwrap());
        std::fs::create_dir_all(task.staging.parent().unwrap()).unwrap();
        std::fs::write(&task.staging, b"stale bytes").unwrap();

        let published = manager(transport.clone()).fetch(task).await.unwrap();
        assert_eq!(std::fs::read(&published.path).unwrap(), b"abc");
        assert_eq!(published.bytes, 3);
        assert!(published.failures.is_empty());
        assert_eq!(
            transport.ranged_requests(),
            vec![("http://a/core.dll".to_string(), 11)]
        );
        assert_eq!(transport.opens(), 2);
    }

    #[tokio::test]
    async fn body_shorter_than_content_length_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(StaticTransport::new());
        transport.route("http://a/core.dll", Response::Short(b"abc".to_vec(), 10));

        let task = task(dir.path(), &["http://a/core.dll"]);
        let destination = task.destination.clone();
        let staging = task.staging.clone();

        let err = manager(transport).fetch(task).await.unwrap_err();
        match err {
            LauncherError::DownloadExhausted { failures, .. } => {
                assert_eq!(failures.len(), 1);
                assert_eq!(
                    failures[0].reason,
                    FailureReason::Truncated {
                        expected: 10,
                        received: 3
                    }
                );
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!destination.exists());
        assert!(!staging.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn throughput_cap_paces_the_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(StaticTransport::new());
        transport.body("http://a/core.dll", "x".repeat(70));

        let task = task(dir.path(), &["http://a/core.dll"]).with_throughput(Some(10));
        let start = tokio::time::Instant::now();
        let published = manager(transport).fetch(task).await.unwrap();

        assert_eq!(published.bytes, 70);
        // One second of burst, then 60 bytes at 10 B/s.
        assert!(tokio::time::Instant::now() - start >= std::time::Duration::from_secs(5));
    }
}
