//! S3 backend built on aws-sdk-s3
//!
//! Parts are sent with a Content-MD5 header so S3 verifies every payload
//! before issuing its ETag.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{MultipartBackend, UploadResult, UploadTarget, object_location};
use crate::error::{ExportError, Result};

/// Highest part number S3 accepts in one multipart upload
pub const MAX_PART_NUMBER: i32 = 10_000;

/// Smallest size S3 accepts for any part but the last (5 MiB)
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Largest size S3 accepts for a single part (5 GiB)
pub const MAX_PART_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Service error codes meaning the bucket or key itself was rejected
///
/// Permission and request-shape errors stay `BackendUnavailable`: they are
/// about credentials or the call, not the destination.
const INVALID_TARGET_CODES: &[&str] = &["NoSuchBucket", "InvalidBucketName", "KeyTooLongError"];

fn is_invalid_target_code(code: Option<&str>) -> bool {
    code.is_some_and(|code| INVALID_TARGET_CODES.contains(&code))
}

/// S3 connection options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct S3Config {
    /// AWS region; falls back to the default provider chain when unset
    #[serde(default)]
    pub region: Option<String>,

    /// Custom endpoint URL (MinIO, LocalStack, ...)
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Use path-style addressing (`endpoint/bucket/key`)
    #[serde(default)]
    pub force_path_style: bool,
}

/// Multipart backend talking to Amazon S3 or an S3-compatible service
#[derive(Debug, Clone)]
pub struct S3Backend {
    client: Client,
}

impl S3Backend {
    /// Build a backend from the shared AWS configuration chain
    ///
    /// Credentials come from the standard provider chain (environment,
    /// profile, instance metadata).
    pub async fn new(config: &S3Config) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let shared = loader.load().await;

        let s3_config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(config.force_path_style)
            .build();

        debug!(
            "Created S3 backend (region: {:?}, endpoint: {:?}, path style: {})",
            config.region, config.endpoint, config.force_path_style
        );

        Self::from_client(Client::from_conf(s3_config))
    }

    /// Wrap an already configured client
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    fn md5_base64(data: &[u8]) -> String {
        let sum = md5::compute(data);
        B64.encode(sum.0)
    }
}

/// Classify an initiate-time failure
fn initiate_error<E, R>(err: SdkError<E, R>) -> ExportError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let message = DisplayErrorContext(&err).to_string();
    match &err {
        SdkError::ServiceError(_) if is_invalid_target_code(err.code()) => {
            ExportError::InvalidTarget(message)
        }
        _ => ExportError::BackendUnavailable(message),
    }
}

#[async_trait]
impl MultipartBackend for S3Backend {
    async fn initiate(&self, bucket: &str, key: &str) -> Result<String> {
        let output = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .content_type("application/x-ndjson")
            .send()
            .await
            .map_err(initiate_error)?;

        output
            .upload_id()
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                ExportError::BackendUnavailable("response carried no upload id".to_string())
            })
    }

    async fn upload_part(
        &self,
        target: &UploadTarget,
        part_number: i32,
        payload: Bytes,
    ) -> Result<UploadResult> {
        if !(1..=MAX_PART_NUMBER).contains(&part_number) {
            return Err(ExportError::PartUpload {
                part_number,
                cause: format!("part number outside 1..={MAX_PART_NUMBER}"),
            });
        }

        let checksum = Self::md5_base64(&payload);
        let output = self
            .client
            .upload_part()
            .bucket(&target.bucket)
            .key(&target.key)
            .upload_id(&target.upload_id)
            .part_number(part_number)
            .content_md5(checksum)
            .body(ByteStream::from(payload))
            .send()
            .await
            .map_err(|e| ExportError::PartUpload {
                part_number,
                cause: DisplayErrorContext(&e).to_string(),
            })?;

        let e_tag = output.e_tag().ok_or_else(|| ExportError::PartUpload {
            part_number,
            cause: "response carried no ETag".to_string(),
        })?;

        Ok(UploadResult {
            part_number,
            e_tag: e_tag.to_string(),
        })
    }

    async fn complete(&self, target: &UploadTarget, parts: &[UploadResult]) -> Result<String> {
        let completed_parts = parts
            .iter()
            .map(|p| {
                CompletedPart::builder()
                    .part_number(p.part_number)
                    .e_tag(&p.e_tag)
                    .build()
            })
            .collect::<Vec<_>>();

        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        let output = self
            .client
            .complete_multipart_upload()
            .bucket(&target.bucket)
            .key(&target.key)
            .upload_id(&target.upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|e| ExportError::Completion(DisplayErrorContext(&e).to_string()))?;

        Ok(output
            .location()
            .map(str::to_string)
            .unwrap_or_else(|| object_location(&target.bucket, &target.key)))
    }

    async fn abort(&self, target: &UploadTarget) -> Result<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&target.bucket)
            .key(&target.key)
            .upload_id(&target.upload_id)
            .send()
            .await
            .map_err(|e| ExportError::BackendUnavailable(DisplayErrorContext(&e).to_string()))?;
        Ok(())
    }

    async fn put_object(&self, bucket: &str, key: &str, payload: Bytes) -> Result<String> {
        let checksum = Self::md5_base64(&payload);
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type("application/x-ndjson")
            .content_md5(checksum)
            .body(ByteStream::from(payload))
            .send()
            .await
            .map_err(initiate_error)?;

        Ok(object_location(bucket, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_md5_base64_of_empty_payload() {
        assert_eq!(S3Backend::md5_base64(b""), "1B2M2Y8AsgTpgAmY7PhCfg==");
    }

    #[test]
    fn test_only_destination_codes_are_invalid_target() {
        assert!(is_invalid_target_code(Some("NoSuchBucket")));
        assert!(is_invalid_target_code(Some("KeyTooLongError")));
        assert!(!is_invalid_target_code(Some("AccessDenied")));
        assert!(!is_invalid_target_code(Some("InvalidArgument")));
        assert!(!is_invalid_target_code(Some("SlowDown")));
        assert!(!is_invalid_target_code(None));
    }

    #[test]
    fn test_s3_config_from_toml() {
        let config: S3Config = toml::from_str(
            r#"
            region = "eu-west-1"
            endpoint = "http://127.0.0.1:9000"
            force_path_style = true
            "#,
        )
        .unwrap();

        assert_eq!(config.region.as_deref(), Some("eu-west-1"));
        assert!(config.force_path_style);
    }

    #[tokio::test]
    async fn test_part_number_above_limit_is_rejected_locally() {
        let conf = aws_sdk_s3::config::Builder::new()
            .region(Region::new("us-east-1"))
            .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest())
            .build();
        let backend = S3Backend::from_client(Client::from_conf(conf));
        let target = UploadTarget {
            bucket: "bucket".into(),
            key: "key".into(),
            upload_id: "id".into(),
        };

        let err = backend
            .upload_part(&target, MAX_PART_NUMBER + 1, Bytes::from_static(b"x\n"))
            .await
            .unwrap_err();
        assert_eq!(err.part_number(), Some(MAX_PART_NUMBER + 1));
    }
}
