use std::{fmt, io};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that stop an operation as a whole. A malformed torrent or an
/// unreadable piece is not one of them, those end up in the report.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error")]
    IO(#[from] io::Error),

    #[error("Piece {index} does not exist, the torrent has {count} pieces")]
    PieceOutOfRange { index: usize, count: usize },

    #[error("The reconciliation pass was cancelled before it completed")]
    Cancelled,

    #[error("A hashing worker stopped unexpectedly: {0}")]
    Worker(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error(
        "Tried to load $HOME but could not find it. Please make sure you have \
         a $HOME env and that this program has the permission to read it."
    )]
    HomeInvalid,

    #[error("Could not list the torrents of endpoint `{name}`: {source}")]
    Source {
        name: String,
        #[source]
        source: io::Error,
    },
}

/// What made a metadata blob unusable.
#[derive(
    Error, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum DecodeErrorKind {
    #[error("truncated input")]
    Truncated,

    #[error("invalid type")]
    InvalidType,

    #[error("missing field")]
    MissingField,

    #[error("length mismatch")]
    LengthMismatch,

    #[error("non-canonical encoding")]
    NonCanonical,

    #[error("unsafe path")]
    UnsafePath,
}

/// A malformed metadata blob.
///
/// `path` is the field path of the offending element, such as
/// `info.files[2].length`, and is empty when the error concerns the whole
/// document. `offset` is the byte position in the blob, when known.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodeError {
    pub kind: DecodeErrorKind,
    pub path: String,
    pub offset: Option<usize>,
    pub detail: String,
}

impl DecodeError {
    pub fn new(kind: DecodeErrorKind, detail: impl Into<String>) -> Self {
        Self { kind, path: String::new(), offset: None, detail: detail.into() }
    }

    pub fn missing_field(path: impl Into<String>) -> Self {
        Self {
            kind: DecodeErrorKind::MissingField,
            path: path.into(),
            offset: None,
            detail: "required field is absent".to_owned(),
        }
    }

    pub fn at(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.detail)?;
        if !self.path.is_empty() {
            write!(f, " (at `{}`", self.path)?;
            if let Some(offset) = self.offset {
                write!(f, ", byte {offset}")?;
            }
            return f.write_str(")");
        }
        if let Some(offset) = self.offset {
            write!(f, " (byte {offset})")?;
        }
        Ok(())
    }
}

/// An I/O failure while reading the bytes of a piece, which is not the
/// plain absence of the file.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("could not read `{path}` ({kind}): {message}")]
pub struct ReadError {
    /// Path of the file relative to the scan root.
    pub path: String,
    pub kind: String,
    pub message: String,
}

impl ReadError {
    pub fn new(path: impl Into<String>, err: &io::Error) -> Self {
        Self {
            path: path.into(),
            kind: format!("{:?}", err.kind()),
            message: err.to_string(),
        }
    }
}

/// A path the scanner could not walk into or stat.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("could not scan `{path}`: {message}")]
pub struct ScanError {
    pub path: String,
    pub message: String,
}
