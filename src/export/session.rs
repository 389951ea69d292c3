//! Multipart upload session
//!
//! An [`UploadSession`] represents one remote multipart upload. It keeps the
//! upload id, the state of every part contributed so far and the tags
//! returned for uploaded parts. Clones share the same ledger, so concurrent
//! upload tasks record their results in one place.
//!
//! State only moves forward:
//! `Created → Initiated → Uploading → Completed | Aborted`, with
//! `Initiated → Aborted` for failures before the first part. Once the
//! session is closed no further part uploads or completions are accepted.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::part::{Part, PartState};
use crate::error::{ExportError, Result};
use crate::storage::{MultipartBackend, UploadResult, UploadTarget};

/// Lifecycle state of a multipart session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Initiated,
    Uploading,
    Completed,
    Aborted,
}

impl SessionState {
    /// Whether the session accepts no further operations
    pub fn is_closed(&self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Aborted)
    }
}

#[derive(Debug)]
struct Ledger {
    state: SessionState,
    parts: BTreeMap<i32, PartState>,
    results: BTreeMap<i32, String>,
}

impl Ledger {
    fn new() -> Self {
        Self {
            state: SessionState::Created,
            parts: BTreeMap::new(),
            results: BTreeMap::new(),
        }
    }

    fn transition(&mut self, next: SessionState) -> bool {
        use SessionState::*;
        let allowed = matches!(
            (self.state, next),
            (Created, Initiated)
                | (Initiated, Uploading)
                | (Uploading, Completed)
                | (Initiated, Aborted)
                | (Uploading, Aborted)
                | (Created, Aborted)
        );
        if allowed {
            self.state = next;
        }
        allowed
    }
}

/// Handle to one remote multipart upload
#[derive(Clone)]
pub struct UploadSession {
    backend: Arc<dyn MultipartBackend>,
    target: Arc<UploadTarget>,
    ledger: Arc<Mutex<Ledger>>,
}

impl UploadSession {
    /// Start a multipart upload for `bucket`/`key`
    ///
    /// Empty bucket or key names are rejected before contacting the backend.
    ///
    /// # Returns
    /// * `Result<Self>` - Initiated session, or `InvalidTarget` / `BackendUnavailable`
    pub async fn initiate(
        backend: Arc<dyn MultipartBackend>,
        bucket: &str,
        key: &str,
    ) -> Result<Self> {
        if bucket.trim().is_empty() {
            return Err(ExportError::InvalidTarget("bucket name is empty".to_string()));
        }
        if key.trim().is_empty() {
            return Err(ExportError::InvalidTarget("object key is empty".to_string()));
        }

        let upload_id = backend.initiate(bucket, key).await?;
        let mut ledger = Ledger::new();
        ledger.transition(SessionState::Initiated);

        info!("Initiated multipart upload {} for {}/{}", upload_id, bucket, key);

        Ok(Self {
            backend,
            target: Arc::new(UploadTarget {
                bucket: bucket.to_string(),
                key: key.to_string(),
                upload_id,
            }),
            ledger: Arc::new(Mutex::new(ledger)),
        })
    }

    pub fn target(&self) -> &UploadTarget {
        &self.target
    }

    pub fn backend(&self) -> &Arc<dyn MultipartBackend> {
        &self.backend
    }

    pub async fn state(&self) -> SessionState {
        self.ledger.lock().await.state
    }

    pub async fn part_state(&self, part_number: i32) -> Option<PartState> {
        self.ledger.lock().await.parts.get(&part_number).copied()
    }

    /// Record a sealed part as pending before it is handed to a worker
    pub async fn register(&self, part_number: i32) -> Result<()> {
        let mut ledger = self.ledger.lock().await;
        if ledger.state.is_closed() {
            return Err(ExportError::PartUpload {
                part_number,
                cause: format!("session is {:?}", ledger.state),
            });
        }
        if ledger.parts.contains_key(&part_number) {
            return Err(ExportError::PartUpload {
                part_number,
                cause: "part number already assigned".to_string(),
            });
        }
        ledger.parts.insert(part_number, PartState::Pending);
        Ok(())
    }

    /// Upload one part and record its tag
    ///
    /// No retry is attempted here; a failure marks the part `Failed`.
    pub async fn upload_part(&self, part: Part) -> Result<UploadResult> {
        let part_number = part.part_number();
        {
            let mut ledger = self.ledger.lock().await;
            if ledger.state == SessionState::Initiated {
                ledger.transition(SessionState::Uploading);
            }
            if ledger.state != SessionState::Uploading {
                return Err(ExportError::PartUpload {
                    part_number,
                    cause: format!("session is {:?}", ledger.state),
                });
            }
            ledger.parts.insert(part_number, PartState::Uploading);
        }

        debug!("Uploading part {} ({} bytes)", part_number, part.len());
        let outcome = self
            .backend
            .upload_part(&self.target, part_number, part.payload().clone())
            .await;

        let mut ledger = self.ledger.lock().await;
        match outcome {
            Ok(result) => {
                ledger.parts.insert(part_number, PartState::Uploaded);
                ledger.results.insert(part_number, result.e_tag.clone());
                Ok(result)
            }
            Err(e @ (ExportError::PartUpload { .. } | ExportError::Cancelled)) => {
                ledger.parts.insert(part_number, PartState::Failed);
                Err(e)
            }
            Err(other) => {
                ledger.parts.insert(part_number, PartState::Failed);
                Err(ExportError::PartUpload {
                    part_number,
                    cause: other.to_string(),
                })
            }
        }
    }

    /// Uploaded parts sorted by part number
    pub async fn results(&self) -> Vec<UploadResult> {
        let ledger = self.ledger.lock().await;
        ledger
            .results
            .iter()
            .map(|(part_number, e_tag)| UploadResult {
                part_number: *part_number,
                e_tag: e_tag.clone(),
            })
            .collect()
    }

    /// Assemble the object from every uploaded part
    ///
    /// Refused unless every registered part is `Uploaded`.
    ///
    /// # Returns
    /// * `Result<String>` - Location of the committed object
    pub async fn complete(&self) -> Result<String> {
        let parts = {
            let ledger = self.ledger.lock().await;
            if ledger.state != SessionState::Uploading {
                return Err(ExportError::Completion(format!(
                    "cannot complete a session in state {:?}",
                    ledger.state
                )));
            }
            if let Some((number, state)) = ledger
                .parts
                .iter()
                .find(|(_, state)| **state != PartState::Uploaded)
            {
                return Err(ExportError::Completion(format!(
                    "part {} is {:?}",
                    number, state
                )));
            }
            if ledger.results.is_empty() {
                return Err(ExportError::Completion("no parts were uploaded".to_string()));
            }
            ledger
                .results
                .iter()
                .map(|(part_number, e_tag)| UploadResult {
                    part_number: *part_number,
                    e_tag: e_tag.clone(),
                })
                .collect::<Vec<_>>()
        };

        let location = self.backend.complete(&self.target, &parts).await?;

        self.ledger.lock().await.transition(SessionState::Completed);
        info!(
            "Completed multipart upload {} with {} parts",
            self.target.upload_id,
            parts.len()
        );
        Ok(location)
    }

    /// Abort the upload, discarding stored parts
    ///
    /// Idempotent. Backend failures are logged and swallowed so they never
    /// mask the error that caused the abort.
    pub async fn abort(&self) {
        {
            let mut ledger = self.ledger.lock().await;
            if ledger.state.is_closed() {
                debug!(
                    "Abort ignored, upload {} already {:?}",
                    self.target.upload_id, ledger.state
                );
                return;
            }
            ledger.transition(SessionState::Aborted);
        }

        match self.backend.abort(&self.target).await {
            Ok(()) => info!("Aborted multipart upload {}", self.target.upload_id),
            Err(e) => warn!(
                "Failed to abort multipart upload {}: {}",
                self.target.upload_id, e
            ),
        }
    }
}
