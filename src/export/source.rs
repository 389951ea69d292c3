//! Record sources for export operations
//!
//! This module provides a unified interface for reading records in
//! cursor-sized batches without loading the whole result set into memory.
//! The pipeline never mutates the source.

use async_trait::async_trait;
use bson::{Document, RawDocumentBuf};
use futures::{TryStream, TryStreamExt};
use mongodb::options::ClientOptions;
use mongodb::{Client, Cursor};
use tracing::{debug, info};

use crate::error::{ExportError, Result};

/// One record as fetched from the source: an opaque raw BSON document
pub type Record = RawDocumentBuf;

/// Which records to export
#[derive(Debug, Clone)]
pub struct SourceSelector {
    pub database: String,
    pub collection: String,
    /// Query filter; an empty document selects the whole collection
    pub filter: Document,
}

impl SourceSelector {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
            filter: Document::new(),
        }
    }

    pub fn with_filter(mut self, filter: Document) -> Self {
        self.filter = filter;
        self
    }

    /// `database.collection` namespace used in logs
    pub fn namespace(&self) -> String {
        format!("{}.{}", self.database, self.collection)
    }
}

/// Opens cursors over a record collection
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Open a cursor over the selected records
    ///
    /// # Arguments
    /// * `selector` - Namespace and filter to read
    /// * `batch_size` - Number of records per fetched batch
    async fn open(&self, selector: &SourceSelector, batch_size: u32)
    -> Result<Box<dyn RecordCursor>>;
}

/// Cursor yielding records in source order, one batch at a time
#[async_trait]
pub trait RecordCursor: Send {
    /// Fetch the next batch of records
    ///
    /// # Returns
    /// * `Result<Option<Vec<Record>>>` - Next batch, or None once exhausted
    async fn next_batch(&mut self) -> Result<Option<Vec<Record>>>;

    /// Close the cursor and release server resources
    async fn close(&mut self) -> Result<()>;
}

/// MongoDB-backed record source
#[derive(Clone)]
pub struct MongoSource {
    client: Client,
    no_cursor_timeout: bool,
}

impl MongoSource {
    /// Connect to MongoDB
    ///
    /// # Arguments
    /// * `uri` - MongoDB connection URI
    pub async fn connect(uri: &str) -> Result<Self> {
        let mut options = ClientOptions::parse(uri)
            .await
            .map_err(|e| ExportError::SourceRead(format!("invalid connection URI: {}", e)))?;
        options.app_name = Some(format!("mongos3/{}", env!("CARGO_PKG_VERSION")));

        let client = Client::with_options(options)?;
        Ok(Self::from_client(client))
    }

    pub fn from_client(client: Client) -> Self {
        Self {
            client,
            no_cursor_timeout: true,
        }
    }

    /// Keep the server-side cursor alive for the whole export
    pub fn with_no_cursor_timeout(mut self, enabled: bool) -> Self {
        self.no_cursor_timeout = enabled;
        self
    }
}

#[async_trait]
impl RecordSource for MongoSource {
    async fn open(
        &self,
        selector: &SourceSelector,
        batch_size: u32,
    ) -> Result<Box<dyn RecordCursor>> {
        let collection = self
            .client
            .database(&selector.database)
            .collection::<RawDocumentBuf>(&selector.collection);

        let cursor = collection
            .find(selector.filter.clone())
            .batch_size(batch_size)
            .no_cursor_timeout(self.no_cursor_timeout)
            .await?;

        info!(
            "Opened cursor on {} (batch size {})",
            selector.namespace(),
            batch_size
        );

        Ok(Box::new(MongoCursor::new(cursor, batch_size)))
    }
}

/// Pull up to `limit` records off a fallible stream
async fn fill_batch<S, E>(stream: &mut S, limit: usize) -> Result<Vec<Record>>
where
    S: TryStream<Ok = Record, Error = E> + Unpin,
    E: Into<ExportError>,
{
    let mut batch = Vec::with_capacity(limit);
    while batch.len() < limit {
        match stream.try_next().await.map_err(Into::into)? {
            Some(record) => batch.push(record),
            None => break,
        }
    }
    Ok(batch)
}

/// Batching wrapper around a MongoDB cursor
///
/// The cursor is dropped as soon as it is exhausted, fails, or is closed;
/// dropping it kills the server-side cursor.
pub struct MongoCursor {
    cursor: Option<Cursor<RawDocumentBuf>>,
    batch_size: usize,
    fetched: u64,
}

impl MongoCursor {
    pub fn new(cursor: Cursor<RawDocumentBuf>, batch_size: u32) -> Self {
        Self {
            cursor: Some(cursor),
            batch_size: batch_size.max(1) as usize,
            fetched: 0,
        }
    }
}

#[async_trait]
impl RecordCursor for MongoCursor {
    async fn next_batch(&mut self) -> Result<Option<Vec<Record>>> {
        let Some(cursor) = self.cursor.as_mut() else {
            return Ok(None);
        };

        let batch = match fill_batch(cursor, self.batch_size).await {
            Ok(batch) => batch,
            Err(e) => {
                self.cursor = None;
                return Err(e);
            }
        };

        if batch.is_empty() {
            debug!("Source exhausted after {} records", self.fetched);
            self.cursor = None;
            return Ok(None);
        }

        self.fetched += batch.len() as u64;
        debug!("Read {} records ({} so far)", batch.len(), self.fetched);
        Ok(Some(batch))
    }

    async fn close(&mut self) -> Result<()> {
        if self.cursor.take().is_some() {
            info!("Released cursor after {} records", self.fetched);
        }
        Ok(())
    }
}
