//! Error handling for export operations.
//!
//! Every failure an export can hit is expressed as an [`ExportError`]. The
//! variants mirror the stages of the pipeline so callers can tell a source
//! failure from a rejected part upload or a caller-requested cancellation:
//!
//! - `SourceRead`: the cursor or the backing store failed
//! - `Serialization`: a record could not be encoded as a JSON line
//! - `PartUpload`: a single part failed to upload
//! - `Completion`: the backend refused to assemble the object
//! - `BackendUnavailable` / `InvalidTarget`: the multipart session could not start
//! - `Cancelled`: the export was cancelled before it finished
//!
//! # Example
//!
//! ```rust
//! use mongos3::error::ExportError;
//!
//! let err = ExportError::PartUpload { part_number: 2, cause: "timeout".into() };
//! assert_eq!(err.part_number(), Some(2));
//! assert!(!err.is_cancelled());
//! ```

pub mod kinds;

// Re-export commonly used types
pub use kinds::{ConfigError, ExportError, Result};
