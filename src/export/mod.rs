//! Streaming export pipeline
//!
//! Reads records from a [`RecordSource`] in cursor batches, serializes each
//! one as a line of Extended JSON, groups lines into size-capped parts and
//! uploads the parts concurrently through a [`MultipartBackend`]. The object
//! becomes visible only once every part is stored and the upload is
//! completed; otherwise the upload is aborted.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use mongos3::export::{ExportOptions, MongoSource, SourceSelector, export_to_object};
//! use mongos3::storage::{S3Backend, S3Config};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> mongos3::Result<()> {
//! let source = Arc::new(MongoSource::connect("mongodb://localhost:27017").await?);
//! let backend = Arc::new(S3Backend::new(&S3Config::default()).await);
//! let report = export_to_object(
//!     source,
//!     backend,
//!     SourceSelector::new("shop", "orders"),
//!     "exports",
//!     "orders.jsonl",
//!     ExportOptions::default(),
//!     CancellationToken::new(),
//! )
//! .await?;
//! println!("{} documents written to {}", report.documents_exported, report.location);
//! # Ok(())
//! # }
//! ```

pub mod coordinator;
pub mod part;
pub mod pool;
pub mod progress;
pub mod serializer;
pub mod session;
pub mod source;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

pub use coordinator::{ExportCoordinator, ExportOptions, ExportReport, PipelineState};
pub use part::{Part, PartBuilder, PartState};
pub use pool::WorkerPool;
pub use progress::ProgressTracker;
pub use serializer::{JsonMode, LineSerializer};
pub use session::{SessionState, UploadSession};
pub use source::{MongoSource, Record, RecordCursor, RecordSource, SourceSelector};

use crate::error::Result;
use crate::storage::MultipartBackend;

/// Export every selected record to a single object at `bucket`/`key`
///
/// On success the object holds one line per record in cursor order. On any
/// failure, or when `cancel` fires, the multipart upload is aborted and the
/// first error is returned.
pub async fn export_to_object(
    source: Arc<dyn RecordSource>,
    backend: Arc<dyn MultipartBackend>,
    selector: SourceSelector,
    bucket: &str,
    key: &str,
    options: ExportOptions,
    cancel: CancellationToken,
) -> Result<ExportReport> {
    ExportCoordinator::new(source, backend, selector, bucket, key, options)
        .with_cancellation(cancel)
        .execute()
        .await
}
