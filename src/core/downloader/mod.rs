// ─── Downloader ───
// Concurrent mod archive fetcher: worker pool with retries, a per-mod cache
// directory, atomic writes, and authenticated-API fallback headers.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::error::{UpdaterError, UpdaterResult};
use crate::core::tasks;

pub const DEFAULT_CONCURRENCY: usize = 6;

const MAX_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: std::time::Duration = std::time::Duration::from_secs(2);

/// A single archive to fetch.
#[derive(Debug, Clone)]
pub struct DownloadJob {
    pub url: String,
    pub filename: String,
    /// Organizes the cache into per-mod subdirectories.
    pub mod_name: String,
    /// The URL is an authenticated-API URL that needs special headers.
    pub is_auth_api: bool,
}

#[derive(Debug)]
pub struct DownloadResult {
    pub job: DownloadJob,
    pub error: Option<UpdaterError>,
}

#[derive(Debug, Clone, Copy)]
pub struct Progress {
    pub completed: u64,
    pub total: u64,
}

/// Concurrent downloader with retry and cache behavior shared by mod
/// archives, pack archives, and launcher-library artifacts.
pub struct Downloader {
    client: Client,
    concurrency: usize,
    auth_token: Option<String>,
    cache_dir: Option<PathBuf>,
}

impl Downloader {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            concurrency: DEFAULT_CONCURRENCY,
            auth_token: None,
            cache_dir: None,
        }
    }

    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    pub fn with_auth_token(mut self, token: Option<String>) -> Self {
        self.auth_token = token;
        self
    }

    pub fn with_cache_dir(mut self, cache_dir: Option<PathBuf>) -> Self {
        self.cache_dir = cache_dir;
        self
    }

    pub fn has_auth_token(&self) -> bool {
        self.auth_token.is_some()
    }

    // ── Batch downloads ─────────────────────────────────

    /// Downloads every job into `dest_dir` with the configured concurrency.
    /// `on_progress` fires after each completed job, success or failure, in
    /// completion order. The returned results keep the input order.
    pub async fn run(
        &self,
        jobs: Vec<DownloadJob>,
        dest_dir: &Path,
        cancel: &CancellationToken,
        on_progress: impl Fn(Progress) + Send + Sync,
    ) -> Vec<DownloadResult> {
        let total = jobs.len() as u64;
        let completed = AtomicU64::new(0);

        let indexed: Vec<(usize, DownloadJob)> = jobs.into_iter().enumerate().collect();
        let mut results = tasks::run_bounded(indexed, self.concurrency, |(i, job)| {
            let completed = &completed;
            let on_progress = &on_progress;
            async move {
                let error = self.download(&job, dest_dir, cancel).await.err();
                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                on_progress(Progress {
                    completed: done,
                    total,
                });
                (i, DownloadResult { job, error })
            }
        })
        .await;

        results.sort_by_key(|(i, _)| *i);
        results.into_iter().map(|(_, r)| r).collect()
    }

    // ── Single job with retry ───────────────────────────

    /// Downloads one job with up to three attempts and a growing delay
    /// between them. Cancellation aborts both the delay and the transfer.
    pub async fn download(
        &self,
        job: &DownloadJob,
        dest_dir: &Path,
        cancel: &CancellationToken,
    ) -> UpdaterResult<()> {
        let mut last_err = UpdaterError::Cancelled;
        for attempt in 1..=MAX_ATTEMPTS {
            if attempt > 1 {
                debug!(filename = %job.filename, attempt, "retrying download");
                tokio::select! {
                    _ = cancel.cancelled() => return Err(UpdaterError::Cancelled),
                    _ = tokio::time::sleep(RETRY_BASE_DELAY * (attempt - 1)) => {}
                }
            }

            let outcome = tokio::select! {
                _ = cancel.cancelled() => Err(UpdaterError::Cancelled),
                r = self.attempt(job, dest_dir) => r,
            };
            match outcome {
                Ok(()) => return Ok(()),
                Err(UpdaterError::Cancelled) => return Err(UpdaterError::Cancelled),
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }

    async fn attempt(&self, job: &DownloadJob, dest_dir: &Path) -> UpdaterResult<()> {
        let dest_path = dest_dir.join(&job.filename);
        debug!(mod_name = %job.mod_name, filename = %job.filename, url = %job.url, "download start");

        // Cache hit: copy straight to the destination.
        if let Some(cache_dir) = &self.cache_dir {
            let cache_path = cache_dir.join(&job.mod_name).join(&job.filename);
            if tokio::fs::metadata(&cache_path).await.is_ok() {
                debug!(mod_name = %job.mod_name, filename = %job.filename, "cache hit");
                return copy_atomic(&cache_path, &dest_path).await;
            }
            debug!(mod_name = %job.mod_name, filename = %job.filename, "cache miss");
        }

        let resp = self.get(&job.url, job.is_auth_api).await?;

        // When caching, finalize into the cache first, then copy out.
        if let Some(cache_dir) = &self.cache_dir {
            let mod_cache_dir = cache_dir.join(&job.mod_name);
            tokio::fs::create_dir_all(&mod_cache_dir)
                .await
                .map_err(|e| UpdaterError::io(&mod_cache_dir, e))?;
            let cache_path = mod_cache_dir.join(&job.filename);
            stream_to_file(resp, &cache_path).await?;
            return copy_atomic(&cache_path, &dest_path).await;
        }

        stream_to_file(resp, &dest_path).await
    }

    // ── Single file, no cache ───────────────────────────

    /// Downloads one URL to an exact path with the same retry behavior.
    /// Used for pack archives and launcher-library artifacts.
    pub async fn fetch_to_file(
        &self,
        url: &str,
        dest_path: &Path,
        is_auth_api: bool,
        cancel: &CancellationToken,
    ) -> UpdaterResult<()> {
        let mut last_err = UpdaterError::Cancelled;
        for attempt in 1..=MAX_ATTEMPTS {
            if attempt > 1 {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(UpdaterError::Cancelled),
                    _ = tokio::time::sleep(RETRY_BASE_DELAY * (attempt - 1)) => {}
                }
            }

            let outcome = tokio::select! {
                _ = cancel.cancelled() => Err(UpdaterError::Cancelled),
                r = async {
                    let resp = self.get(url, is_auth_api).await?;
                    stream_to_file(resp, dest_path).await
                } => r,
            };
            match outcome {
                Ok(()) => return Ok(()),
                Err(UpdaterError::Cancelled) => return Err(UpdaterError::Cancelled),
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }

    async fn get(&self, url: &str, is_auth_api: bool) -> UpdaterResult<reqwest::Response> {
        let mut req = self.client.get(url);
        if is_auth_api {
            if let Some(token) = &self.auth_token {
                req = req
                    .header("Accept", "application/octet-stream")
                    .header("Authorization", format!("token {token}"));
            }
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(UpdaterError::DownloadFailed {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(resp)
    }
}

/// Streams a response body to `<path>.tmp`, then renames into place. The
/// temp file is removed on any failure, so a crashed or failed transfer
/// never leaves a partial file at the final path.
async fn stream_to_file(mut resp: reqwest::Response, path: &Path) -> UpdaterResult<()> {
    let tmp_path = tmp_sibling(path);

    let write = async {
        let mut file = tokio::fs::File::create(&tmp_path)
            .await
            .map_err(|e| UpdaterError::io(&tmp_path, e))?;
        while let Some(chunk) = resp.chunk().await? {
            file.write_all(&chunk)
                .await
                .map_err(|e| UpdaterError::io(&tmp_path, e))?;
        }
        file.flush()
            .await
            .map_err(|e| UpdaterError::io(&tmp_path, e))?;
        drop(file);
        tokio::fs::rename(&tmp_path, path)
            .await
            .map_err(|e| UpdaterError::io(path, e))
    };

    if let Err(e) = write.await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e);
    }
    Ok(())
}

/// Copies `src` to `dst` via temp file + rename. The final rename is
/// idempotent, so concurrent copies of the same pair are safe.
async fn copy_atomic(src: &Path, dst: &Path) -> UpdaterResult<()> {
    let tmp_path = tmp_sibling(dst);
    if let Err(e) = tokio::fs::copy(src, &tmp_path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(UpdaterError::io(dst, e));
    }
    if let Err(e) = tokio::fs::rename(&tmp_path, dst).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(UpdaterError::io(dst, e));
    }
    Ok(())
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cache_hit_copies_without_network() {
        let cache = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();

        let cached = cache.path().join("alpha");
        tokio::fs::create_dir_all(&cached).await.unwrap();
        tokio::fs::write(cached.join("alpha-1.0.0.jar"), b"jar-bytes")
            .await
            .unwrap();

        let downloader = Downloader::new(Client::new())
            .with_cache_dir(Some(cache.path().to_path_buf()));
        let job = DownloadJob {
            // Unroutable; a cache miss would fail loudly instead of passing.
            url: "http://invalid.invalid/alpha-1.0.0.jar".to_string(),
            filename: "alpha-1.0.0.jar".to_string(),
            mod_name: "alpha".to_string(),
            is_auth_api: false,
        };

        let cancel = CancellationToken::new();
        downloader
            .download(&job, dest.path(), &cancel)
            .await
            .unwrap();

        let body = tokio::fs::read(dest.path().join("alpha-1.0.0.jar"))
            .await
            .unwrap();
        assert_eq!(body, b"jar-bytes");
        assert!(!dest.path().join("alpha-1.0.0.jar.tmp").exists());
    }

    #[tokio::test]
    async fn cancelled_download_returns_cancelled() {
        let dest = tempfile::tempdir().unwrap();
        let downloader = Downloader::new(Client::new());
        let job = DownloadJob {
            url: "http://invalid.invalid/x.jar".to_string(),
            filename: "x.jar".to_string(),
            mod_name: "x".to_string(),
            is_auth_api: false,
        };

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = downloader
            .download(&job, dest.path(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, UpdaterError::Cancelled));
    }

    #[tokio::test]
    async fn run_reports_progress_and_keeps_order() {
        let cache = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();

        for name in ["a", "b"] {
            let dir = cache.path().join(name);
            tokio::fs::create_dir_all(&dir).await.unwrap();
            tokio::fs::write(dir.join(format!("{name}.jar")), name)
                .await
                .unwrap();
        }

        let downloader = Downloader::new(Client::new())
            .with_cache_dir(Some(cache.path().to_path_buf()))
            .with_concurrency(2);
        let jobs = vec![
            DownloadJob {
                url: String::new(),
                filename: "a.jar".to_string(),
                mod_name: "a".to_string(),
                is_auth_api: false,
            },
            DownloadJob {
                url: String::new(),
                filename: "b.jar".to_string(),
                mod_name: "b".to_string(),
                is_auth_api: false,
            },
        ];

        let seen = std::sync::Mutex::new(Vec::new());
        let cancel = CancellationToken::new();
        let results = downloader
            .run(jobs, dest.path(), &cancel, |p| {
                seen.lock().unwrap().push((p.completed, p.total));
            })
            .await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].job.filename, "a.jar");
        assert_eq!(results[1].job.filename, "b.jar");
        assert!(results.iter().all(|r| r.error.is_none()));

        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen.contains(&(2, 2)));
    }
}
