//! Record serialization for export operations
//!
//! Converts one raw BSON record into one line of MongoDB Extended JSON
//! terminated by `\n`. Concatenating the lines of every record in source order
//! yields the collection as newline-delimited JSON.

use bson::{Bson, RawDocumentBuf};
use serde::{Deserialize, Serialize};

use crate::error::{ExportError, Result};

/// Extended JSON flavour used for each line
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JsonMode {
    /// Canonical Extended JSON: lossless, every BSON type keeps a type wrapper
    #[default]
    Canonical,
    /// Relaxed Extended JSON: numbers and dates rendered as plain JSON where possible
    Relaxed,
}

/// Serializer producing one JSON line per record
#[derive(Debug, Clone, Copy, Default)]
pub struct LineSerializer {
    mode: JsonMode,
}

impl LineSerializer {
    /// Create a serializer for the given Extended JSON mode
    pub fn new(mode: JsonMode) -> Self {
        Self { mode }
    }

    /// Extended JSON mode used by this serializer
    pub fn mode(&self) -> JsonMode {
        self.mode
    }

    /// Serialize a record into a complete line, including the trailing newline
    ///
    /// # Arguments
    /// * `record` - Raw BSON document as returned by the cursor
    ///
    /// # Returns
    /// * `Result<Vec<u8>>` - UTF-8 bytes of the line, or `Serialization` error
    pub fn serialize(&self, record: &RawDocumentBuf) -> Result<Vec<u8>> {
        let doc = record
            .to_document()
            .map_err(|e| ExportError::Serialization(format!("malformed BSON record: {e}")))?;

        let value = match self.mode {
            JsonMode::Canonical => Bson::Document(doc).into_canonical_extjson(),
            JsonMode::Relaxed => Bson::Document(doc).into_relaxed_extjson(),
        };

        let mut line = serde_json::to_vec(&value)
            .map_err(|e| ExportError::Serialization(format!("JSON encoding failed: {e}")))?;

        // serde_json escapes control characters, so a raw newline here means
        // the line would be split across records.
        if line.contains(&b'\n') {
            return Err(ExportError::Serialization(
                "encoded record contains a line separator".to_string(),
            ));
        }

        line.push(b'\n');
        Ok(line)
    }
}
