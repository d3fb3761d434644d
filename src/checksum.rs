// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::coding::DecodeError;

/// Computes the CRC32 of a byte slice.
#[must_use]
pub fn crc32(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}

/// Verifies a CRC32 read alongside some bytes, returning a [`DecodeError`] on
/// mismatch.
pub fn check(bytes: &[u8], expected: u32) -> Result<(), DecodeError> {
    let computed = crc32(bytes);

    if computed == expected {
        Ok(())
    } else {
        Err(DecodeError::InvalidChecksum((expected, computed)))
    }
}

/// A [`std::io::Write`] wrapper that accumulates a running CRC32 over
/// everything written through it, used while serializing blocks and metadata
/// so the checksum never has to be computed over a second pass of the bytes.
pub struct ChecksummedWriter<W: std::io::Write> {
    inner: W,
    hasher: crc32fast::Hasher,
}

impl<W: std::io::Write> ChecksummedWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            inner: writer,
            hasher: crc32fast::Hasher::new(),
        }
    }

    pub fn checksum(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: std::io::Write> std::io::Write for ChecksummedWriter<W> {
    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }

    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.hasher.update(buf);
        self.inner.write(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn crc_roundtrip() {
        let bytes = b"hello fingerprint";
        let sum = crc32(bytes);
        assert!(check(bytes, sum).is_ok());
        assert!(check(bytes, sum.wrapping_add(1)).is_err());
    }

    #[test]
    fn checksummed_writer_matches_direct() {
        use std::io::Write;

        let mut writer = ChecksummedWriter::new(Vec::new());
        writer.write_all(b"abc").unwrap();
        writer.write_all(b"def").unwrap();
        assert_eq!(writer.checksum(), crc32(b"abcdef"));
    }
}
