// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! `index.dat` (§4.1, point 4): the durable list of file-segment ids that
//! make up the on-disk tier, atomically replaced on every checkpoint and
//! merge.

use crate::checksum;
use crate::coding::{Decode, DecodeError, Encode, EncodeError};
use crate::file::{self, INDEX_MAGIC_BYTES};
use crate::item::SegmentId;
use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use std::io::{Read, Write};
use std::path::Path;

/// The parsed contents of `index.dat`: every file segment currently
/// published, in ascending version order.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct IndexFile {
    pub segment_ids: Vec<SegmentId>,
}

impl Encode for IndexFile {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        let mut body = Vec::new();
        body.write_u32::<LE>(self.segment_ids.len() as u32)?;
        for id in &self.segment_ids {
            body.write_u64::<LE>(id.version)?;
            body.write_u64::<LE>(id.included_merges)?;
        }

        let crc = checksum::crc32(&body);

        writer.write_all(&INDEX_MAGIC_BYTES)?;
        writer.write_all(&body)?;
        writer.write_u32::<LE>(crc)?;

        Ok(())
    }
}

impl Decode for IndexFile {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != INDEX_MAGIC_BYTES {
            return Err(DecodeError::InvalidMagic("index.dat"));
        }

        let mut rest = Vec::new();
        reader.read_to_end(&mut rest)?;
        if rest.len() < 4 {
            return Err(DecodeError::InvalidMagic("index.dat (truncated)"));
        }

        let (body, crc_bytes) = rest.split_at(rest.len() - 4);
        let expected_crc = (&crc_bytes[..]).read_u32::<LE>()?;
        checksum::check(body, expected_crc)?;

        let mut cursor = std::io::Cursor::new(body);
        let count = cursor.read_u32::<LE>()?;

        let mut segment_ids = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let version = cursor.read_u64::<LE>()?;
            let included_merges = cursor.read_u64::<LE>()?;
            segment_ids.push(SegmentId { version, included_merges });
        }

        Ok(Self { segment_ids })
    }
}

impl IndexFile {
    /// Reads `index.dat` from `data_dir`, if present.
    pub fn load(data_dir: &Path) -> crate::Result<Option<Self>> {
        let path = data_dir.join(file::INDEX_FILE);
        if !path.exists() {
            return Ok(None);
        }

        let bytes = std::fs::read(&path)?;
        let parsed = Self::decode_from(&mut &bytes[..]).map_err(|e| crate::Error::Corruption {
            path: Some(path),
            reason: e.to_string(),
        })?;
        Ok(Some(parsed))
    }

    /// Atomically replaces `index.dat` in `data_dir` with this contents.
    pub fn save(&self, data_dir: &Path) -> crate::Result<()> {
        let path = data_dir.join(file::INDEX_FILE);
        file::rewrite_atomic(&path, &self.encode_into_vec())?;
        Ok(())
    }
}
