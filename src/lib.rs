//! MongoDB to S3 export library
//!
//! This library provides the streaming export pipeline behind the `mongos3`
//! binary. It can be used on its own to export any record source to any
//! multipart-capable object store.
//!
//! # Modules
//!
//! - `cli`: Command-line interface and argument parsing
//! - `config`: Configuration management
//! - `error`: Error types and handling
//! - `export`: Serializer, part builder, upload session, worker pool and coordinator
//! - `storage`: Multipart backend trait and the S3 implementation
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use mongos3::{Config, export::{MongoSource, SourceSelector, export_to_object}};
//! use mongos3::storage::S3Backend;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let source = MongoSource::connect(&config.source.uri).await?;
//!     let backend = S3Backend::new(&config.storage).await;
//!
//!     let report = export_to_object(
//!         Arc::new(source),
//!         Arc::new(backend),
//!         SourceSelector::new("shop", "orders"),
//!         "exports",
//!         "orders.jsonl",
//!         config.export_options(),
//!         CancellationToken::new(),
//!     )
//!     .await?;
//!
//!     println!("Wrote {} documents", report.documents_exported);
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod export;
pub mod storage;

// Re-export commonly used types
pub use config::Config;
pub use error::{ExportError, Result};
pub use export::{ExportCoordinator, ExportOptions, ExportReport, export_to_object};
pub use storage::{MultipartBackend, S3Backend};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library version string
///
/// # Returns
/// * `&str` - Version string
pub fn version() -> &'static str {
    VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
