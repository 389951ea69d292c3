//! In-memory test doubles for the record source and the storage backend.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bson::{Document, RawDocumentBuf, doc};
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use super::source::{Record, RecordCursor, RecordSource, SourceSelector};
use crate::error::{ExportError, Result};
use crate::storage::{MultipartBackend, UploadResult, UploadTarget, object_location};

/// Raw record with a fixed-width sequence field, so every line has the same length
pub fn record(seq: usize) -> Record {
    RawDocumentBuf::from_document(&doc! { "seq": format!("{:06}", seq) }).unwrap()
}

pub fn records(range: std::ops::Range<usize>) -> Vec<Record> {
    range.map(record).collect()
}

pub fn raw(doc: Document) -> Record {
    RawDocumentBuf::from_document(&doc).unwrap()
}

/// Record whose string length runs past the end of the document
pub fn malformed_record() -> Record {
    RawDocumentBuf::from_bytes(vec![12, 0, 0, 0, 0x02, b'a', 0, 0xFF, 0xFF, 0xFF, 0x7F, 0]).unwrap()
}

#[derive(Default)]
struct SourceStats {
    reads: AtomicUsize,
    closes: AtomicUsize,
}

/// Source serving pre-built batches
pub struct MockSource {
    batches: Vec<Vec<Record>>,
    stats: Arc<SourceStats>,
    fail_at: Option<usize>,
    stall_at: Option<usize>,
    cancel_at: Option<(usize, CancellationToken)>,
}

impl MockSource {
    pub fn new(batches: Vec<Vec<Record>>) -> Self {
        Self {
            batches,
            stats: Arc::new(SourceStats::default()),
            fail_at: None,
            stall_at: None,
            cancel_at: None,
        }
    }

    /// Fail the read with this zero-based index
    pub fn fail_at(mut self, read: usize) -> Self {
        self.fail_at = Some(read);
        self
    }

    /// The read with this zero-based index never returns
    pub fn stall_at(mut self, read: usize) -> Self {
        self.stall_at = Some(read);
        self
    }

    /// On the read with this zero-based index, cancel `token` and never return
    pub fn cancel_at(mut self, read: usize, token: CancellationToken) -> Self {
        self.cancel_at = Some((read, token));
        self
    }

    /// Number of `next_batch` calls made so far
    pub fn reads(&self) -> usize {
        self.stats.reads.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.stats.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordSource for MockSource {
    async fn open(
        &self,
        _selector: &SourceSelector,
        _batch_size: u32,
    ) -> Result<Box<dyn RecordCursor>> {
        Ok(Box::new(MockCursor {
            batches: self.batches.clone().into_iter(),
            stats: self.stats.clone(),
            fail_at: self.fail_at,
            stall_at: self.stall_at,
            cancel_at: self.cancel_at.clone(),
        }))
    }
}

struct MockCursor {
    batches: std::vec::IntoIter<Vec<Record>>,
    stats: Arc<SourceStats>,
    fail_at: Option<usize>,
    stall_at: Option<usize>,
    cancel_at: Option<(usize, CancellationToken)>,
}

#[async_trait]
impl RecordCursor for MockCursor {
    async fn next_batch(&mut self) -> Result<Option<Vec<Record>>> {
        let read = self.stats.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_at == Some(read) {
            return Err(ExportError::SourceRead("cursor killed".to_string()));
        }
        if self.stall_at == Some(read) {
            std::future::pending::<()>().await;
        }
        if let Some((at, token)) = &self.cancel_at {
            if *at == read {
                token.cancel();
                std::future::pending::<()>().await;
            }
        }
        Ok(self.batches.next())
    }

    async fn close(&mut self) -> Result<()> {
        self.stats.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct BackendState {
    initiate_calls: usize,
    upload_attempts: Vec<i32>,
    uploaded: BTreeMap<i32, Bytes>,
    failures_left: HashMap<i32, usize>,
    complete_calls: usize,
    completed: Option<Vec<UploadResult>>,
    abort_calls: usize,
    puts: Vec<(String, Bytes)>,
}

/// Backend recording every call, with scripted failures
#[derive(Default)]
pub struct RecordingBackend {
    state: Mutex<BackendState>,
    fail_initiate: bool,
    fail_parts: HashSet<i32>,
    fail_after: Vec<i32>,
    fail_complete: bool,
    fail_abort: bool,
    cancel_on_part: Option<(i32, CancellationToken)>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_initiate(mut self) -> Self {
        self.fail_initiate = true;
        self
    }

    /// Every upload of this part fails
    pub fn fail_part(mut self, part_number: i32) -> Self {
        self.fail_parts.insert(part_number);
        self
    }

    /// Failing parts wait until these parts are stored before failing
    pub fn fail_after(mut self, parts: Vec<i32>) -> Self {
        self.fail_after = parts;
        self
    }

    /// The first `times` uploads of this part fail, later ones succeed
    pub fn flaky_part(self, part_number: i32, times: usize) -> Self {
        self.state
            .lock()
            .unwrap()
            .failures_left
            .insert(part_number, times);
        self
    }

    /// Uploading this part cancels `token` and never returns
    pub fn cancel_on_part(mut self, part_number: i32, token: CancellationToken) -> Self {
        self.cancel_on_part = Some((part_number, token));
        self
    }

    pub fn fail_complete(mut self) -> Self {
        self.fail_complete = true;
        self
    }

    pub fn fail_abort(mut self) -> Self {
        self.fail_abort = true;
        self
    }

    pub fn initiate_calls(&self) -> usize {
        self.state.lock().unwrap().initiate_calls
    }

    pub fn upload_attempts(&self) -> usize {
        self.state.lock().unwrap().upload_attempts.len()
    }

    pub fn attempted_parts(&self) -> Vec<i32> {
        self.state.lock().unwrap().upload_attempts.clone()
    }

    pub fn uploaded_parts(&self) -> BTreeMap<i32, Bytes> {
        self.state.lock().unwrap().uploaded.clone()
    }

    pub fn complete_calls(&self) -> usize {
        self.state.lock().unwrap().complete_calls
    }

    pub fn completed_parts(&self) -> Option<Vec<UploadResult>> {
        self.state.lock().unwrap().completed.clone()
    }

    pub fn abort_calls(&self) -> usize {
        self.state.lock().unwrap().abort_calls
    }

    pub fn puts(&self) -> Vec<(String, Bytes)> {
        self.state.lock().unwrap().puts.clone()
    }

    /// Stored part payloads concatenated in part-number order
    pub fn assembled(&self) -> Vec<u8> {
        self.uploaded_parts()
            .values()
            .flat_map(|payload| payload.to_vec())
            .collect()
    }

    fn stored(&self, parts: &[i32]) -> bool {
        let state = self.state.lock().unwrap();
        parts.iter().all(|n| state.uploaded.contains_key(n))
    }
}

#[async_trait]
impl MultipartBackend for RecordingBackend {
    async fn initiate(&self, bucket: &str, key: &str) -> Result<String> {
        self.state.lock().unwrap().initiate_calls += 1;
        if self.fail_initiate {
            return Err(ExportError::BackendUnavailable(format!(
                "cannot reach {}/{}",
                bucket, key
            )));
        }
        Ok("upload-1".to_string())
    }

    async fn upload_part(
        &self,
        _target: &UploadTarget,
        part_number: i32,
        payload: Bytes,
    ) -> Result<UploadResult> {
        let flaky = {
            let mut state = self.state.lock().unwrap();
            state.upload_attempts.push(part_number);
            match state.failures_left.get_mut(&part_number) {
                Some(left) if *left > 0 => {
                    *left -= 1;
                    true
                }
                _ => false,
            }
        };

        if let Some((n, token)) = &self.cancel_on_part {
            if *n == part_number {
                token.cancel();
                std::future::pending::<()>().await;
            }
        }

        if flaky || self.fail_parts.contains(&part_number) {
            while !self.stored(&self.fail_after) {
                tokio::task::yield_now().await;
            }
            return Err(ExportError::PartUpload {
                part_number,
                cause: "connection reset".to_string(),
            });
        }

        tokio::task::yield_now().await;
        self.state
            .lock()
            .unwrap()
            .uploaded
            .insert(part_number, payload);
        Ok(UploadResult {
            part_number,
            e_tag: format!("\"etag-{}\"", part_number),
        })
    }

    async fn complete(&self, target: &UploadTarget, parts: &[UploadResult]) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.complete_calls += 1;
        if self.fail_complete {
            return Err(ExportError::Completion("part count mismatch".to_string()));
        }
        state.completed = Some(parts.to_vec());
        Ok(object_location(&target.bucket, &target.key))
    }

    async fn abort(&self, _target: &UploadTarget) -> Result<()> {
        self.state.lock().unwrap().abort_calls += 1;
        if self.fail_abort {
            return Err(ExportError::BackendUnavailable("abort refused".to_string()));
        }
        Ok(())
    }

    async fn put_object(&self, bucket: &str, key: &str, payload: Bytes) -> Result<String> {
        self.state
            .lock()
            .unwrap()
            .puts
            .push((key.to_string(), payload));
        Ok(object_location(bucket, key))
    }
}
