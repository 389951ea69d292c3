use std::{fmt, io};

/// Crate-wide `Result` type using [`ExportError`] as the error.
pub type Result<T> = std::result::Result<T, ExportError>;

/// Top-level error type for export operations.
#[derive(Debug)]
pub enum ExportError {
    /// The record cursor or its backing store failed.
    SourceRead(String),

    /// A record could not be encoded in the canonical line format.
    Serialization(String),

    /// A part upload failed on the transport or in the backend.
    PartUpload { part_number: i32, cause: String },

    /// The backend rejected the final assembly of the object.
    Completion(String),

    /// The backend could not be reached when starting the session.
    BackendUnavailable(String),

    /// The backend rejected the bucket or key.
    InvalidTarget(String),

    /// The export was cancelled by the caller or by an upstream failure.
    Cancelled,

    /// Configuration errors.
    Config(ConfigError),

    /// I/O errors.
    Io(io::Error),

    /// An upload task ended without producing a result (panic or runtime shutdown).
    Worker(String),
}

/// Configuration-specific errors.
#[derive(Debug)]
pub enum ConfigError {
    /// Config file could not be read.
    FileNotFound(String),

    /// Invalid config format.
    InvalidFormat(String),

    /// Missing required field.
    MissingField(String),

    /// Invalid field value.
    InvalidValue { field: String, value: String },
}

impl ExportError {
    /// Whether this error represents a cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ExportError::Cancelled)
    }

    /// Part number carried by a part upload failure.
    pub fn part_number(&self) -> Option<i32> {
        match self {
            ExportError::PartUpload { part_number, .. } => Some(*part_number),
            _ => None,
        }
    }

    /// Short machine-readable name of the error kind, used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            ExportError::SourceRead(_) => "source_read",
            ExportError::Serialization(_) => "serialization",
            ExportError::PartUpload { .. } => "part_upload",
            ExportError::Completion(_) => "completion",
            ExportError::BackendUnavailable(_) => "backend_unavailable",
            ExportError::InvalidTarget(_) => "invalid_target",
            ExportError::Cancelled => "cancelled",
            ExportError::Config(_) => "config",
            ExportError::Io(_) => "io",
            ExportError::Worker(_) => "worker",
        }
    }
}

/* ========================= Display & Error impls ========================= */

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportError::SourceRead(msg) => write!(f, "Source read failed: {msg}"),
            ExportError::Serialization(msg) => write!(f, "Serialization failed: {msg}"),
            ExportError::PartUpload { part_number, cause } => {
                write!(f, "Upload of part {part_number} failed: {cause}")
            }
            ExportError::Completion(msg) => write!(f, "Multipart completion failed: {msg}"),
            ExportError::BackendUnavailable(msg) => write!(f, "Storage backend unavailable: {msg}"),
            ExportError::InvalidTarget(msg) => write!(f, "Invalid upload target: {msg}"),
            ExportError::Cancelled => write!(f, "Export cancelled"),
            ExportError::Config(e) => write!(f, "Configuration error: {e}"),
            ExportError::Io(e) => write!(f, "I/O error: {e}"),
            ExportError::Worker(msg) => write!(f, "Upload worker failed: {msg}"),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "Config file not found: {path}"),
            ConfigError::InvalidFormat(msg) => write!(f, "Invalid config format: {msg}"),
            ConfigError::MissingField(field) => write!(f, "Missing required field: {field}"),
            ConfigError::InvalidValue { field, value } => {
                write!(f, "Invalid value '{value}' for field '{field}'")
            }
        }
    }
}

impl std::error::Error for ExportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExportError::Config(e) => Some(e),
            ExportError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl std::error::Error for ConfigError {}

/* ========================= Conversions to ExportError ========================= */

impl From<io::Error> for ExportError {
    fn from(err: io::Error) -> Self {
        ExportError::Io(err)
    }
}

impl From<mongodb::error::Error> for ExportError {
    fn from(err: mongodb::error::Error) -> Self {
        ExportError::SourceRead(err.to_string())
    }
}

impl From<ConfigError> for ExportError {
    fn from(err: ConfigError) -> Self {
        ExportError::Config(err)
    }
}

impl From<tokio::task::JoinError> for ExportError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            ExportError::Cancelled
        } else {
            ExportError::Worker(err.to_string())
        }
    }
}
