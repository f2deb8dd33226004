//! The writer's error taxonomy (spec §7). Kept as a small, closed enum
//! rather than `Box<dyn Error>` since callers are expected to match on it
//! (a schema mismatch aborts differently than an I/O failure).

use std::fmt;
use std::io;

#[derive(Debug)]
pub enum WriteError {
    /// Column count or a column's (length, by_value, align) disagrees with
    /// the row data handed to `write_row`.
    SchemaMismatch(String),
    /// The underlying page store failed a read or write.
    Io(io::Error),
    /// `postscript_size >= 256`, or a footer could not fit within the
    /// addressable footer-fork range.
    SerializationOverflow(String),
    /// The codec itself reported an error. A codec declining to compress
    /// is not an error and never produces this variant.
    Codec(String),
}

impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteError::SchemaMismatch(msg) => write!(f, "schema mismatch: {}", msg),
            WriteError::Io(err) => write!(f, "page store I/O error: {}", err),
            WriteError::SerializationOverflow(msg) => write!(f, "serialization overflow: {}", msg),
            WriteError::Codec(msg) => write!(f, "codec error: {}", msg),
        }
    }
}

impl std::error::Error for WriteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WriteError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for WriteError {
    fn from(err: io::Error) -> Self {
        WriteError::Io(err)
    }
}

pub type WriteResult<T> = Result<T, WriteError>;
