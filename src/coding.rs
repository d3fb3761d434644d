// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use std::io::{Read, Write};

/// Error during serialization.
#[derive(Debug)]
pub enum EncodeError {
    /// I/O error.
    Io(std::io::Error),
}

impl std::fmt::Display for EncodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "EncodeError({})",
            match self {
                Self::Io(e) => e.to_string(),
            }
        )
    }
}

impl From<std::io::Error> for EncodeError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl std::error::Error for EncodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
        }
    }
}

/// Error during deserialization: a corrupt block, file, or oplog record.
#[derive(Debug)]
pub enum DecodeError {
    /// I/O error (including unexpected EOF).
    Io(std::io::Error),

    /// The magic bytes at the start of a file or block did not match.
    InvalidMagic(&'static str),

    /// A checksum stored alongside data did not match the data's computed
    /// checksum. Carries (expected, computed).
    InvalidChecksum((u32, u32)),

    /// The codec version in a header is newer than this build understands.
    UnsupportedVersion(u8),

    /// An enum tag did not correspond to any known variant.
    InvalidTag((&'static str, u8)),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::InvalidMagic(what) => write!(f, "invalid magic bytes in {what}"),
            Self::InvalidChecksum((expected, computed)) => {
                write!(f, "checksum mismatch: expected {expected}, got {computed}")
            }
            Self::UnsupportedVersion(v) => write!(f, "unsupported codec version {v}"),
            Self::InvalidTag((what, tag)) => write!(f, "invalid tag {tag} for {what}"),
        }
    }
}

impl From<std::io::Error> for DecodeError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl std::error::Error for DecodeError {}

/// Trait to serialize stuff.
pub trait Encode {
    /// Serializes into writer.
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError>;

    /// Serializes into vector.
    fn encode_into_vec(&self) -> Vec<u8> {
        let mut v = vec![];
        self.encode_into(&mut v).expect("cannot fail");
        v
    }
}

/// Trait to deserialize stuff.
pub trait Decode {
    /// Deserializes from reader.
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError>
    where
        Self: Sized;
}
