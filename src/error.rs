//! Error types for the dataset pipeline

use std::path::PathBuf;
use thiserror::Error;

/// Custom error type for dataset processing
///
/// Row-level CSV problems, integrity violations and health findings are
/// reported as values inside their respective reports; this enum covers the
/// failures that abort a single file or a whole operation.
#[derive(Debug, Error)]
pub enum DatasetError {
    /// E001: File system I/O error
    #[error("E001: I/O error - {0}")]
    Io(#[from] std::io::Error),

    /// E002: CSV reader/writer error
    #[error("E002: CSV error - {0}")]
    Csv(#[from] csv::Error),

    /// E003: A required CSV column is absent from the header
    #[error("E003: Missing required column '{column}' in {path}")]
    MissingColumn { path: PathBuf, column: String },

    /// E004: Note sequence violates ordering or duration invariants
    #[error("E004: Malformed note sequence - {0}")]
    MalformedSequence(String),

    /// E005: MIDI serialization failed
    #[error("E005: MIDI encode error - {0}")]
    MidiEncode(String),

    /// E006: MIDI bytes could not be parsed
    #[error("E006: MIDI parse error - {0}")]
    MidiParse(String),

    /// E007: WAV file could not be read
    #[error("E007: Audio read error - {0}")]
    AudioRead(String),

    /// E008: Manifest could not be built, read or written
    #[error("E008: Manifest error - {0}")]
    Manifest(String),

    /// E009: Configuration validation failed
    #[error("E009: Configuration error - {0}")]
    Config(String),

    /// E010: JSON report serialization error
    #[error("E010: JSON serialization error - {0}")]
    Json(#[from] serde_json::Error),

    /// E011: Input path or argument is unusable
    #[error("E011: Invalid input - {0}")]
    InvalidInput(String),
}

impl From<hound::Error> for DatasetError {
    fn from(err: hound::Error) -> Self {
        DatasetError::AudioRead(err.to_string())
    }
}

impl From<midly::Error> for DatasetError {
    fn from(err: midly::Error) -> Self {
        DatasetError::MidiParse(err.to_string())
    }
}

impl From<tempfile::PersistError> for DatasetError {
    fn from(err: tempfile::PersistError) -> Self {
        DatasetError::Io(err.error)
    }
}

/// Result type alias for dataset operations
pub type Result<T> = std::result::Result<T, DatasetError>;
