use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConvertError>;

/// Per-source failures. Any of these skips the affected source only.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("failed to decode event log `{}`: {source}", path.display())]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: evtx::err::EvtxError,
    },

    #[error("failed to write timeline `{}`: {source}", path.display())]
    SerializationFailure {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error(
        "output `{}` for `{}` is already produced from `{}`",
        output.display(),
        path.display(),
        claimed_by.display()
    )]
    OutputCollision {
        path: PathBuf,
        output: PathBuf,
        claimed_by: PathBuf,
    },
}

impl ConvertError {
    /// The path the error is about (output for write failures, input otherwise).
    pub fn path(&self) -> &std::path::Path {
        match self {
            ConvertError::SourceUnreadable { path, .. } => path,
            ConvertError::SerializationFailure { path, .. } => path,
            ConvertError::OutputCollision { path, .. } => path,
        }
    }

    pub(crate) fn serialization(path: impl Into<PathBuf>, source: impl Into<csv::Error>) -> Self {
        ConvertError::SerializationFailure {
            path: path.into(),
            source: source.into(),
        }
    }
}

/// A single record that could not be turned into a [`crate::DecodedRecord`].
///
/// Never fatal for the source; the record is skipped and counted.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed event XML at byte {position}: {source}")]
    Xml {
        position: u64,
        #[source]
        source: quick_xml::Error,
    },

    #[error("event XML has no `Event` root element")]
    MissingEventRoot,
}

pub type DecodeResult<T> = std::result::Result<T, DecodeError>;
