//! The resumable download engine.
//!
//! A download is one record plus an ordered list of files fetched
//! sequentially. Each file resumes from whatever is already on disk via a
//! byte-range request; progress is flushed to the database and published on
//! the `downloads` topic every 500 ms or 1 MiB, whichever comes first.
//! Cancellation propagates through a token and aborts the in-flight read
//! within one chunk.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use easel_core::status::DownloadStatus;
use easel_db::models::download::{DownloadFile, ModelDownload, NewDownloadFile};
use easel_db::repositories::DownloadRepo;
use easel_db::DbPool;
use easel_events::{Event, EventBus, Topic};
use futures::StreamExt;
use reqwest::header::{CONTENT_RANGE, RANGE};
use reqwest::StatusCode;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::error::DownloadError;
use crate::progress;
use crate::registry::RegistryClient;

/// Progress flush cadence: at least this often while bytes are moving.
const FLUSH_INTERVAL: Duration = Duration::from_millis(500);

/// ...or after this many bytes, whichever comes first.
const FLUSH_BYTES: u64 = 1024 * 1024;

/// Aggregated view returned by the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct DownloadView {
    #[serde(flatten)]
    pub record: ModelDownload,
    pub progress: f64,
    pub files: Vec<DownloadFile>,
}

/// Runs and tracks model downloads.
pub struct DownloadEngine {
    pool: DbPool,
    registry: RegistryClient,
    events: Arc<EventBus>,
    models_dir: PathBuf,
    /// Cancellation signals for in-flight downloads.
    active: Mutex<HashMap<String, CancellationToken>>,
}

impl DownloadEngine {
    pub fn new(
        pool: DbPool,
        registry: RegistryClient,
        events: Arc<EventBus>,
        models_dir: PathBuf,
    ) -> Arc<Self> {
        Arc::new(Self {
            pool,
            registry,
            events,
            models_dir,
            active: Mutex::new(HashMap::new()),
        })
    }

    /// Validate the repo against the registry, persist the download record,
    /// and spawn the transfer task. Returns the created record immediately.
    ///
    /// An empty `files` list means "everything the repo metadata lists".
    pub async fn start(
        self: &Arc<Self>,
        repo: &str,
        files: &[String],
    ) -> Result<ModelDownload, DownloadError> {
        let metadata = self.registry.model_info(repo).await?;

        let requested: Vec<String> = if files.is_empty() {
            metadata.siblings.iter().map(|s| s.rfilename.clone()).collect()
        } else {
            files.to_vec()
        };
        if requested.is_empty() {
            return Err(DownloadError::Registry(format!(
                "repo '{repo}' lists no downloadable files"
            )));
        }

        let plan: Vec<NewDownloadFile> = requested
            .iter()
            .map(|path| NewDownloadFile {
                remote_path: path.clone(),
                dest_path: self.dest_path(repo, path).display().to_string(),
                total_bytes: metadata
                    .siblings
                    .iter()
                    .find(|s| &s.rfilename == path)
                    .and_then(|s| s.size),
            })
            .collect();

        let record = DownloadRepo::create(&self.pool, repo, &plan).await?;

        let cancel = CancellationToken::new();
        self.active
            .lock()
            .expect("active map poisoned")
            .insert(record.id.clone(), cancel.clone());

        self.publish(
            "download.started",
            serde_json::json!({
                "download_id": record.id,
                "repo": repo,
                "files": requested,
            }),
        );
        tracing::info!(
            download_id = %record.id,
            repo,
            files = requested.len(),
            "download started",
        );

        let engine = Arc::clone(self);
        let download = record.clone();
        tokio::spawn(async move {
            engine.run(download, cancel).await;
        });

        Ok(record)
    }

    /// Signal an in-flight download to abort; a not-yet-terminal record
    /// without a live task is cancelled directly.
    pub async fn cancel(&self, id: &str) -> Result<ModelDownload, DownloadError> {
        let record = DownloadRepo::find_by_id(&self.pool, id)
            .await?
            .ok_or_else(|| DownloadError::NotFound(id.to_string()))?;

        let token = self.active.lock().expect("active map poisoned").get(id).cloned();
        match token {
            Some(token) => token.cancel(),
            None if !record.status.is_terminal() => {
                DownloadRepo::set_status(&self.pool, id, DownloadStatus::Cancelled, None).await?;
                self.publish(
                    "download.cancelled",
                    serde_json::json!({"download_id": id}),
                );
            }
            None => {}
        }

        DownloadRepo::find_by_id(&self.pool, id)
            .await?
            .ok_or_else(|| DownloadError::NotFound(id.to_string()))
    }

    /// The aggregated view of one download.
    pub async fn status(&self, id: &str) -> Result<DownloadView, DownloadError> {
        let record = DownloadRepo::find_by_id(&self.pool, id)
            .await?
            .ok_or_else(|| DownloadError::NotFound(id.to_string()))?;
        let files = DownloadRepo::files(&self.pool, id).await?;
        let (_, _, fraction) = progress::aggregate(&files);
        Ok(DownloadView {
            record,
            progress: fraction,
            files,
        })
    }

    /// Download records newest-first, paginated.
    pub async fn all(&self, limit: i64, offset: i64) -> Result<Vec<ModelDownload>, DownloadError> {
        Ok(DownloadRepo::list_all(&self.pool, limit, offset).await?)
    }

    /// Remove terminal records older than `max_age`.
    pub async fn cleanup(&self, max_age: chrono::Duration) -> Result<u64, DownloadError> {
        Ok(DownloadRepo::cleanup_older_than(&self.pool, max_age).await?)
    }

    // ---- transfer task ----

    async fn run(self: Arc<Self>, download: ModelDownload, cancel: CancellationToken) {
        let outcome = self.run_inner(&download, &cancel).await;

        let (status, error, event_type) = match &outcome {
            Ok(()) => (DownloadStatus::Completed, None, "download.completed"),
            Err(DownloadError::Cancelled) => {
                (DownloadStatus::Cancelled, None, "download.cancelled")
            }
            Err(e) => (DownloadStatus::Failed, Some(e.to_string()), "download.failed"),
        };

        if let Err(e) =
            DownloadRepo::set_status(&self.pool, &download.id, status, error.as_deref()).await
        {
            tracing::error!(download_id = %download.id, error = %e, "cannot persist download status");
        }

        self.publish(
            event_type,
            serde_json::json!({
                "download_id": download.id,
                "repo": download.repo,
                "status": status,
                "error": error,
            }),
        );
        match &outcome {
            Ok(()) => tracing::info!(download_id = %download.id, "download completed"),
            Err(e) => tracing::warn!(download_id = %download.id, error = %e, "download ended"),
        }

        self.active
            .lock()
            .expect("active map poisoned")
            .remove(&download.id);
    }

    async fn run_inner(
        &self,
        download: &ModelDownload,
        cancel: &CancellationToken,
    ) -> Result<(), DownloadError> {
        let files = DownloadRepo::files(&self.pool, &download.id).await?;

        for file in &files {
            if file.complete {
                continue;
            }
            self.download_file(download, file, cancel).await?;
        }

        // A finished download must leave every file readable and non-empty.
        for file in DownloadRepo::files(&self.pool, &download.id).await? {
            let size = tokio::fs::metadata(&file.dest_path)
                .await
                .map(|m| m.len())
                .unwrap_or(0);
            if size == 0 {
                return Err(DownloadError::Integrity(format!(
                    "{} is missing or empty after download",
                    file.dest_path
                )));
            }
        }
        Ok(())
    }

    async fn download_file(
        &self,
        download: &ModelDownload,
        file: &DownloadFile,
        cancel: &CancellationToken,
    ) -> Result<(), DownloadError> {
        let url = self.registry.resolve_url(&download.repo, &file.remote_path)?;
        let dest = PathBuf::from(&file.dest_path);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Whatever is already on disk is the resume offset.
        let start_offset = tokio::fs::metadata(&dest).await.map(|m| m.len()).unwrap_or(0);

        let mut request = self.registry.http().get(&url);
        if start_offset > 0 {
            request = request.header(RANGE, format!("bytes={start_offset}-"));
            tracing::debug!(
                download_id = %download.id,
                remote_path = %file.remote_path,
                start_offset,
                "resuming from byte offset",
            );
        }
        let response = request.send().await?;
        let status = response.status();

        // The requested range starts at or past EOF: the file is done.
        if status == StatusCode::RANGE_NOT_SATISFIABLE {
            let on_disk = start_offset as i64;
            DownloadRepo::update_file(&self.pool, file.id, on_disk, file.total_bytes.max(on_disk))
                .await?;
            DownloadRepo::mark_file_complete(&self.pool, file.id).await?;
            self.flush_progress(download, file, on_disk, file.total_bytes.max(on_disk), None)
                .await?;
            return Ok(());
        }
        if !status.is_success() {
            return Err(DownloadError::Http {
                status: status.as_u16(),
                url,
            });
        }

        // 206 appends at the offset; a plain 200 means the server ignored
        // the range (or none was sent) and the file restarts from zero.
        let (offset, total) = if status == StatusCode::PARTIAL_CONTENT {
            let total = response
                .headers()
                .get(CONTENT_RANGE)
                .and_then(|v| v.to_str().ok())
                .and_then(progress::content_range_total)
                .or_else(|| {
                    response
                        .content_length()
                        .map(|len| len as i64 + start_offset as i64)
                });
            (start_offset, total)
        } else {
            (0, response.content_length().map(|len| len as i64))
        };
        let total = total.unwrap_or(file.total_bytes);

        let mut out = if offset > 0 {
            tokio::fs::OpenOptions::new().append(true).open(&dest).await?
        } else {
            tokio::fs::File::create(&dest).await?
        };

        let mut stream = Box::pin(response.bytes_stream());
        let mut downloaded = offset;
        let mut last_flush = Instant::now();
        let mut bytes_since_flush: u64 = 0;

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    out.flush().await?;
                    DownloadRepo::update_file(&self.pool, file.id, downloaded as i64, total).await?;
                    return Err(DownloadError::Cancelled);
                }
                next = stream.next() => next,
            };

            let Some(chunk) = next else { break };
            let chunk = chunk?;
            out.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            bytes_since_flush += chunk.len() as u64;

            if last_flush.elapsed() >= FLUSH_INTERVAL || bytes_since_flush >= FLUSH_BYTES {
                let speed = progress::speed_bps(bytes_since_flush, last_flush.elapsed());
                self.flush_progress(download, file, downloaded as i64, total, speed).await?;
                last_flush = Instant::now();
                bytes_since_flush = 0;
            }
        }

        out.flush().await?;
        let final_total = total.max(downloaded as i64);
        DownloadRepo::update_file(&self.pool, file.id, downloaded as i64, final_total).await?;
        DownloadRepo::mark_file_complete(&self.pool, file.id).await?;
        self.flush_progress(download, file, downloaded as i64, final_total, None).await?;
        Ok(())
    }

    /// Persist one file's counters, recompute the aggregate, and publish a
    /// progress event carrying both.
    async fn flush_progress(
        &self,
        download: &ModelDownload,
        file: &DownloadFile,
        downloaded: i64,
        total: i64,
        speed: Option<i64>,
    ) -> Result<(), DownloadError> {
        DownloadRepo::update_file(&self.pool, file.id, downloaded, total).await?;

        let files = DownloadRepo::files(&self.pool, &download.id).await?;
        let (agg_downloaded, agg_total, fraction) = progress::aggregate(&files);
        let eta = speed.and_then(|s| progress::eta_secs(agg_total, agg_downloaded, s));

        DownloadRepo::update_aggregate(
            &self.pool,
            &download.id,
            agg_downloaded,
            agg_total,
            speed,
            eta,
        )
        .await?;

        self.publish(
            "download.progress",
            serde_json::json!({
                "download_id": download.id,
                "repo": download.repo,
                "file": {
                    "remote_path": file.remote_path,
                    "downloaded_bytes": downloaded,
                    "total_bytes": total,
                    "progress": if total > 0 { (downloaded as f64 / total as f64).min(1.0) } else { 0.0 },
                },
                "bytes_downloaded": agg_downloaded,
                "total_bytes": agg_total,
                "progress": fraction,
                "speed_bps": speed,
                "eta_secs": eta,
            }),
        );
        Ok(())
    }

    // ---- helpers ----

    /// Destination for one file: `{models_dir}/{repo with '/' flattened}/{path}`.
    fn dest_path(&self, repo: &str, remote_path: &str) -> PathBuf {
        self.models_dir.join(repo.replace('/', "--")).join(remote_path)
    }

    fn publish(&self, event_type: &str, payload: serde_json::Value) {
        self.events
            .publish(Event::new(Topic::Downloads, event_type).with_payload(payload));
    }
}
