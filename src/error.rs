//! Error taxonomy for the trimming pipeline.
//!
//! All variants are unrecoverable for the run: they carry enough context to
//! identify the offending record or trimming step and are surfaced to the
//! caller rather than logged and swallowed. The enum is `Clone` (message
//! payloads only) so a failure raised on a worker thread can be delivered
//! through the shared block result to every downstream consumer.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum TrimError {
    /// Structurally invalid FASTQ input, e.g. a wrong leading marker
    /// character or a record with a missing line.
    #[error("malformed FASTQ record: {0}")]
    MalformedRecord(String),

    /// The two mate streams are desynchronized: one yielded a record while
    /// the other was already exhausted.
    #[error("unpaired input: {0}")]
    UnpairedInput(String),

    /// Two records submitted as mates do not denote the same fragment.
    #[error("pairing validation failed: {0}")]
    Pairing(String),

    /// Bad or unknown trimming step, or an out-of-range parameter.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Unexpected condition inside a trimming step or the pipeline itself.
    #[error("transformation failed: {0}")]
    Transformation(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TrimError {
    fn from(error: std::io::Error) -> Self {
        TrimError::Io(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TrimError>;
