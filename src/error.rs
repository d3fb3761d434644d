// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::coding::{DecodeError, EncodeError};
use std::path::PathBuf;

/// Represents errors that can occur in the index.
#[derive(Debug)]
pub enum Error {
    /// I/O error.
    Io(std::io::Error),

    /// Serialization failed.
    Encode(EncodeError),

    /// Deserialization failed.
    Decode(DecodeError),

    /// The data directory exists but does not contain an `index.dat`, and
    /// `create` was not set.
    IndexNotFound,

    /// A segment or oplog file failed a structural check (bad magic, CRC
    /// mismatch, unexpected EOF, unsupported codec version).
    Corruption {
        /// Path of the offending file, if known.
        path: Option<PathBuf>,
        /// Human-readable reason.
        reason: String,
    },

    /// A search exceeded its deadline.
    Timeout,

    /// An operation was attempted on an index that has already been closed.
    NotOpen,

    /// `open` was called with `create: true` on a directory that already
    /// contains an index.
    AlreadyOpen,

    /// The underlying filesystem is out of space.
    OutOfSpace,

    /// A caller-supplied argument was invalid (e.g. an empty hash list, or
    /// `id == 0`).
    InvalidArgument(&'static str),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Encode(e) => write!(f, "encode error: {e}"),
            Self::Decode(e) => write!(f, "decode error: {e}"),
            Self::IndexNotFound => write!(f, "index not found"),
            Self::Corruption { path, reason } => match path {
                Some(p) => write!(f, "corruption in {}: {reason}", p.display()),
                None => write!(f, "corruption: {reason}"),
            },
            Self::Timeout => write!(f, "search deadline exceeded"),
            Self::NotOpen => write!(f, "index is not open"),
            Self::AlreadyOpen => write!(f, "index is already open"),
            Self::OutOfSpace => write!(f, "out of disk space"),
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        if value.kind() == std::io::ErrorKind::StorageFull {
            return Self::OutOfSpace;
        }
        Self::Io(value)
    }
}

impl From<EncodeError> for Error {
    fn from(value: EncodeError) -> Self {
        Self::Encode(value)
    }
}

impl From<DecodeError> for Error {
    fn from(value: DecodeError) -> Self {
        Self::Decode(value)
    }
}

/// Index result.
pub type Result<T> = std::result::Result<T, Error>;
