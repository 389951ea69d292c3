//! Export coordinator for orchestrating export operations
//!
//! The coordinator is the only place where an export is judged a success or
//! a failure. It walks through
//! `Idle → Initiating → Streaming → Finalizing → Done | Aborted`:
//!
//! 1. Initiate the multipart session (a failure here needs no abort)
//! 2. Read the cursor batch by batch, serialize records, seal parts and hand
//!    them to the worker pool without waiting for earlier uploads
//! 3. Drain the pool and complete the session with parts sorted by number
//!
//! Any failure or cancellation after step 1 cancels the pool, waits for it,
//! aborts the session and returns the original error. Every initiated session
//! therefore ends either completed or aborted.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::part::{DEFAULT_CHUNK_SIZE_BYTES, Part, PartBuilder};
use super::pool::{DEFAULT_MAX_CONCURRENCY, WorkerPool};
use super::progress::ProgressTracker;
use super::serializer::{JsonMode, LineSerializer};
use super::session::UploadSession;
use super::source::{RecordCursor, RecordSource, SourceSelector};
use crate::error::{ExportError, Result};
use crate::storage::{MultipartBackend, UploadResult};

/// Default number of records per cursor batch
pub const DEFAULT_BATCH_SIZE: u32 = 1000;

/// Default delay before the first retry of a failed part
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 200;

/// Tuning knobs for one export
#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// Part size cap in bytes
    pub chunk_size_bytes: usize,
    /// Maximum number of part uploads in flight
    pub max_concurrency: usize,
    /// Records per cursor batch
    pub batch_size: u32,
    /// Extra attempts per part after a failed upload (0 disables retries)
    pub part_retries: u32,
    /// Delay before the first retry; doubled on every further attempt
    pub retry_backoff_ms: u64,
    /// Skip records that cannot be serialized instead of failing the export
    pub skip_malformed: bool,
    /// Extended JSON flavour of each line
    pub json_mode: JsonMode,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            chunk_size_bytes: DEFAULT_CHUNK_SIZE_BYTES,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            batch_size: DEFAULT_BATCH_SIZE,
            part_retries: 0,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            skip_malformed: false,
            json_mode: JsonMode::Canonical,
        }
    }
}

/// Coordinator state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Initiating,
    Streaming,
    Finalizing,
    Done,
    Aborted,
}

/// Result of a successful export
#[derive(Debug, Clone)]
pub struct ExportReport {
    /// Location of the committed object
    pub location: String,
    /// Number of documents written to the object
    pub documents_exported: u64,
    /// Number of malformed documents skipped
    pub documents_skipped: u64,
    /// Number of parts uploaded
    pub parts_uploaded: u64,
    /// Object size in bytes
    pub bytes_uploaded: u64,
    /// Time taken for export
    pub elapsed_ms: u64,
}

#[derive(Debug, Default)]
struct StreamStats {
    batches: u64,
    documents: u64,
    skipped: u64,
    parts: u64,
    bytes: u64,
    uploaded: u64,
}

/// Coordinator for export operations
pub struct ExportCoordinator {
    source: Arc<dyn RecordSource>,
    backend: Arc<dyn MultipartBackend>,
    selector: SourceSelector,
    bucket: String,
    key: String,
    options: ExportOptions,
    serializer: LineSerializer,
    tracker: ProgressTracker,
    cancel_token: CancellationToken,
    state: PipelineState,
}

impl ExportCoordinator {
    /// Create a new export coordinator
    pub fn new(
        source: Arc<dyn RecordSource>,
        backend: Arc<dyn MultipartBackend>,
        selector: SourceSelector,
        bucket: impl Into<String>,
        key: impl Into<String>,
        options: ExportOptions,
    ) -> Self {
        Self {
            source,
            backend,
            selector,
            bucket: bucket.into(),
            key: key.into(),
            serializer: LineSerializer::new(options.json_mode),
            options,
            tracker: ProgressTracker::hidden(),
            cancel_token: CancellationToken::new(),
            state: PipelineState::Idle,
        }
    }

    /// Set progress tracker for this export operation
    pub fn with_progress(mut self, tracker: ProgressTracker) -> Self {
        self.tracker = tracker;
        self
    }

    /// Set cancellation token for this export operation
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Execute the export operation
    ///
    /// # Returns
    /// * `Result<ExportReport>` - Export statistics, or the error that aborted it
    pub async fn execute(&mut self) -> Result<ExportReport> {
        let start_time = Instant::now();

        if self.cancel_token.is_cancelled() {
            self.state = PipelineState::Aborted;
            return Err(ExportError::Cancelled);
        }

        info!(
            "Starting export of {} to {}/{}",
            self.selector.namespace(),
            self.bucket,
            self.key
        );

        self.state = PipelineState::Initiating;
        let session =
            match UploadSession::initiate(self.backend.clone(), &self.bucket, &self.key).await {
                Ok(session) => session,
                Err(e) => {
                    self.state = PipelineState::Aborted;
                    error!("Could not start multipart upload: {}", e);
                    return Err(e);
                }
            };

        self.state = PipelineState::Streaming;
        let mut pool = WorkerPool::new(self.options.max_concurrency, &self.cancel_token);

        let outcome = match self.stream(&session, &mut pool).await {
            Ok(stats) => self.finalize(&session, &mut pool, stats).await,
            Err(e) => Err(e),
        };

        let (location, stats) = match outcome {
            Ok(done) => done,
            Err(e) => return Err(self.fail(&session, &mut pool, e).await),
        };

        self.state = PipelineState::Done;
        self.tracker.finish();

        let elapsed_ms = start_time.elapsed().as_millis() as u64;
        info!(
            "Export completed: {} documents, {} parts, {} bytes, {} ms",
            stats.documents, stats.parts, stats.bytes, elapsed_ms
        );

        Ok(ExportReport {
            location,
            documents_exported: stats.documents,
            documents_skipped: stats.skipped,
            parts_uploaded: stats.parts,
            bytes_uploaded: stats.bytes,
            elapsed_ms,
        })
    }

    /// Open the cursor, pump it dry, and always close it
    async fn stream(
        &self,
        session: &UploadSession,
        pool: &mut WorkerPool<UploadResult>,
    ) -> Result<StreamStats> {
        let mut cursor = tokio::select! {
            biased;
            _ = pool.token().cancelled() => return Err(pool.halt_reason()),
            cursor = self.source.open(&self.selector, self.options.batch_size) => cursor?,
        };

        let result = self.pump(cursor.as_mut(), session, pool).await;

        if let Err(e) = cursor.close().await {
            warn!("Failed to close cursor: {}", e);
        }
        result
    }

    async fn pump(
        &self,
        cursor: &mut dyn RecordCursor,
        session: &UploadSession,
        pool: &mut WorkerPool<UploadResult>,
    ) -> Result<StreamStats> {
        let mut builder = PartBuilder::new(self.options.chunk_size_bytes);
        let mut stats = StreamStats::default();

        loop {
            debug!("Fetching batch #{}", stats.batches + 1);

            // The pool token also fires when an upload fails.
            let batch = tokio::select! {
                biased;
                _ = pool.token().cancelled() => return Err(pool.halt_reason()),
                batch = cursor.next_batch() => batch?,
            };

            let Some(records) = batch else {
                debug!("No more records available");
                break;
            };
            stats.batches += 1;

            for record in &records {
                let line = match self.serializer.serialize(record) {
                    Ok(line) => line,
                    Err(e) if self.options.skip_malformed => {
                        warn!("Skipping record in batch {}: {}", stats.batches, e);
                        stats.skipped += 1;
                        continue;
                    }
                    Err(e) => return Err(e),
                };

                stats.documents += 1;
                if let Some(part) = builder.push_line(&line) {
                    self.dispatch(part, session, pool, &mut stats).await?;
                }
            }

            self.reap(pool, &mut stats)?;
            self.tracker
                .update(stats.documents, stats.bytes + builder.buffered_bytes() as u64);

            if stats.batches % 10 == 0 {
                info!(
                    "Progress: {} documents in {} batches, {} parts sealed",
                    stats.documents, stats.batches, stats.parts
                );
            }
        }

        if let Some(part) = builder.finish() {
            self.dispatch(part, session, pool, &mut stats).await?;
        }

        Ok(stats)
    }

    /// Register a sealed part and hand it to the pool
    async fn dispatch(
        &self,
        part: Part,
        session: &UploadSession,
        pool: &mut WorkerPool<UploadResult>,
        stats: &mut StreamStats,
    ) -> Result<()> {
        self.reap(pool, stats)?;

        stats.parts += 1;
        stats.bytes += part.len() as u64;
        session.register(part.part_number()).await?;

        debug!(
            "Dispatching part {} ({} bytes, {} in flight)",
            part.part_number(),
            part.len(),
            pool.pending()
        );

        let backoff = Duration::from_millis(self.options.retry_backoff_ms);
        pool.submit(upload_with_retry(
            session.clone(),
            part,
            self.options.part_retries,
            backoff,
        ))
        .await
    }

    /// Collect finished uploads without waiting, surfacing the first failure
    fn reap(&self, pool: &mut WorkerPool<UploadResult>, stats: &mut StreamStats) -> Result<()> {
        while let Some(result) = pool.try_next() {
            let uploaded = result?;
            stats.uploaded += 1;
            debug!("Part {} uploaded", uploaded.part_number);
        }
        Ok(())
    }

    /// Wait for outstanding uploads and commit the object
    async fn finalize(
        &mut self,
        session: &UploadSession,
        pool: &mut WorkerPool<UploadResult>,
        mut stats: StreamStats,
    ) -> Result<(String, StreamStats)> {
        debug!("Waiting for {} outstanding uploads", pool.pending());
        let drained = tokio::select! {
            biased;
            _ = self.cancel_token.cancelled() => return Err(ExportError::Cancelled),
            drained = pool.drain() => drained?,
        };
        stats.uploaded += drained.len() as u64;
        debug!("{} of {} parts uploaded", stats.uploaded, stats.parts);

        if self.cancel_token.is_cancelled() {
            return Err(ExportError::Cancelled);
        }

        self.state = PipelineState::Finalizing;

        if stats.parts == 0 {
            // Multipart uploads need at least one part; store the empty object directly.
            info!("Source produced no records, writing an empty object");
            session.abort().await;
            let location = self
                .backend
                .put_object(&self.bucket, &self.key, Bytes::new())
                .await?;
            return Ok((location, stats));
        }

        let location = session.complete().await?;
        Ok((location, stats))
    }

    /// Cancel outstanding work, abort the session and hand back the root cause
    async fn fail(
        &mut self,
        session: &UploadSession,
        pool: &mut WorkerPool<UploadResult>,
        err: ExportError,
    ) -> ExportError {
        self.state = PipelineState::Aborted;

        if err.is_cancelled() {
            info!("Export operation cancelled, aborting upload");
        } else {
            error!("Export failed ({}): {}; aborting upload", err.kind(), err);
        }

        let cancelled = pool.shutdown().await;
        if cancelled > 0 {
            debug!("Cancelled {} in-flight part uploads", cancelled);
        }

        session.abort().await;
        self.tracker.finish();
        err
    }
}

/// Upload one part, retrying with exponential backoff
async fn upload_with_retry(
    session: UploadSession,
    part: Part,
    retries: u32,
    backoff: Duration,
) -> Result<UploadResult> {
    let mut attempt = 0u32;
    loop {
        match session.upload_part(part.clone()).await {
            Ok(result) => return Ok(result),
            Err(ExportError::Cancelled) => return Err(ExportError::Cancelled),
            Err(e) if attempt < retries => {
                attempt += 1;
                let delay = backoff.saturating_mul(2u32.saturating_pow(attempt - 1));
                warn!(
                    "Part {} failed (attempt {}/{}), retrying in {:?}: {}",
                    part.part_number(),
                    attempt,
                    retries + 1,
                    delay,
                    e
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
