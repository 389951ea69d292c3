//! Object storage backends
//!
//! The export pipeline talks to object storage only through the
//! [`MultipartBackend`] trait: a three-phase multipart protocol
//! (initiate / upload part / complete or abort) plus a single-shot put used
//! for empty exports.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

pub mod s3;

pub use s3::{S3Backend, S3Config};

/// Location of one multipart upload on the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
}

/// Result of a successful part upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResult {
    pub part_number: i32,
    /// Integrity token issued by the backend for this part
    pub e_tag: String,
}

/// Three-phase multipart upload protocol exposed by a storage provider
#[async_trait]
pub trait MultipartBackend: Send + Sync {
    /// Start a multipart upload and return its upload id
    ///
    /// Fails with `BackendUnavailable` or `InvalidTarget`.
    async fn initiate(&self, bucket: &str, key: &str) -> Result<String>;

    /// Store one part of the upload
    ///
    /// Fails with `PartUpload` carrying the part number.
    async fn upload_part(
        &self,
        target: &UploadTarget,
        part_number: i32,
        payload: Bytes,
    ) -> Result<UploadResult>;

    /// Assemble the object from parts sorted by part number
    ///
    /// # Returns
    /// * `Result<String>` - Location of the committed object
    async fn complete(&self, target: &UploadTarget, parts: &[UploadResult]) -> Result<String>;

    /// Discard the upload and every part stored for it
    async fn abort(&self, target: &UploadTarget) -> Result<()>;

    /// Store a whole object in a single request
    async fn put_object(&self, bucket: &str, key: &str, payload: Bytes) -> Result<String>;
}

/// Conventional `s3://bucket/key` location string
pub fn object_location(bucket: &str, key: &str) -> String {
    format!("s3://{}/{}", bucket, key)
}
