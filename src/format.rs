// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Segment file header and metadata block (§4.1, points 1-2). The block
//! region itself lives in [`crate::block`].

use crate::checksum;
use crate::coding::{Decode, DecodeError, Encode, EncodeError};
use crate::compression::CompressionType;
use crate::file::SEGMENT_MAGIC_BYTES;
use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use std::collections::BTreeMap;
use std::io::{Read, Write};

/// Codec version written into every segment header; bumped whenever the
/// block or metadata layout changes incompatibly.
pub const CODEC_VERSION: u8 = 1;

/// Fixed-size header at the start of every segment file.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SegmentHeader {
    pub block_size: u16,
}

impl Encode for SegmentHeader {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_all(&SEGMENT_MAGIC_BYTES)?;
        writer.write_u8(CODEC_VERSION)?;
        writer.write_u16::<LE>(self.block_size)?;
        Ok(())
    }
}

impl Decode for SegmentHeader {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != SEGMENT_MAGIC_BYTES {
            return Err(DecodeError::InvalidMagic("segment header"));
        }

        let version = reader.read_u8()?;
        if version > CODEC_VERSION {
            return Err(DecodeError::UnsupportedVersion(version));
        }

        let block_size = reader.read_u16::<LE>()?;
        Ok(Self { block_size })
    }
}

/// The metadata block of a segment file (§4.1, point 2): everything needed
/// to interpret the block region without scanning it.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Metadata {
    pub num_items: u64,
    pub num_blocks: u32,
    pub min_doc_id: u32,
    pub max_doc_id: u32,
    pub max_commit_id: u64,
    /// Block compression algorithm this segment's block region was written
    /// with (§4.1). Persisted rather than taken from the live `IndexConfig`
    /// so reopening an index after a config/feature-flag change still
    /// decodes this segment's blocks correctly.
    pub compression: CompressionType,
    pub attributes: BTreeMap<String, u64>,
    /// `true` = live document, `false` = tombstone.
    pub docs: BTreeMap<u32, bool>,
    /// First hash of each block, in block order.
    pub block_index: Vec<u32>,

    /// Byte length of each encoded (and, if enabled, compressed) block, in
    /// block order. Blocks are variable-length on disk, so this is what
    /// lets a reader seek directly to any block via a prefix sum instead
    /// of scanning the block region sequentially.
    pub block_lengths: Vec<u32>,
}

impl Encode for Metadata {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        let mut body = checksum::ChecksummedWriter::new(Vec::new());

        body.write_u64::<LE>(self.num_items)?;
        body.write_u32::<LE>(self.num_blocks)?;
        body.write_u32::<LE>(self.min_doc_id)?;
        body.write_u32::<LE>(self.max_doc_id)?;
        body.write_u64::<LE>(self.max_commit_id)?;
        self.compression.encode_into(&mut body)?;

        body.write_u32::<LE>(self.attributes.len() as u32)?;
        for (key, value) in &self.attributes {
            body.write_u16::<LE>(key.len() as u16)?;
            body.write_all(key.as_bytes())?;
            body.write_u64::<LE>(*value)?;
        }

        body.write_u32::<LE>(self.docs.len() as u32)?;
        for (id, live) in &self.docs {
            body.write_u32::<LE>(*id)?;
            body.write_u8(u8::from(*live))?;
        }

        body.write_u32::<LE>(self.block_index.len() as u32)?;
        for first_hash in &self.block_index {
            body.write_u32::<LE>(*first_hash)?;
        }

        body.write_u32::<LE>(self.block_lengths.len() as u32)?;
        for length in &self.block_lengths {
            body.write_u32::<LE>(*length)?;
        }

        let crc = body.checksum();
        let body = body.into_inner();

        writer.write_u32::<LE>(body.len() as u32)?;
        writer.write_all(&body)?;
        writer.write_u32::<LE>(crc)?;

        Ok(())
    }
}

impl Decode for Metadata {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let body_len = reader.read_u32::<LE>()? as usize;
        let mut body = vec![0u8; body_len];
        reader.read_exact(&mut body)?;

        let crc = reader.read_u32::<LE>()?;
        checksum::check(&body, crc)?;

        let mut cursor = std::io::Cursor::new(body);

        let num_items = cursor.read_u64::<LE>()?;
        let num_blocks = cursor.read_u32::<LE>()?;
        let min_doc_id = cursor.read_u32::<LE>()?;
        let max_doc_id = cursor.read_u32::<LE>()?;
        let max_commit_id = cursor.read_u64::<LE>()?;
        let compression = CompressionType::decode_from(&mut cursor)?;

        let num_attrs = cursor.read_u32::<LE>()?;
        let mut attributes = BTreeMap::new();
        for _ in 0..num_attrs {
            let key_len = cursor.read_u16::<LE>()? as usize;
            let mut key_bytes = vec![0u8; key_len];
            cursor.read_exact(&mut key_bytes)?;
            let key = String::from_utf8(key_bytes)
                .map_err(|_| DecodeError::InvalidMagic("attribute key (non-utf8)"))?;
            let value = cursor.read_u64::<LE>()?;
            attributes.insert(key, value);
        }

        let num_docs = cursor.read_u32::<LE>()?;
        let mut docs = BTreeMap::new();
        for _ in 0..num_docs {
            let id = cursor.read_u32::<LE>()?;
            let live = cursor.read_u8()? != 0;
            docs.insert(id, live);
        }

        let num_block_index = cursor.read_u32::<LE>()?;
        let mut block_index = Vec::with_capacity(num_block_index as usize);
        for _ in 0..num_block_index {
            block_index.push(cursor.read_u32::<LE>()?);
        }

        let num_block_lengths = cursor.read_u32::<LE>()?;
        let mut block_lengths = Vec::with_capacity(num_block_lengths as usize);
        for _ in 0..num_block_lengths {
            block_lengths.push(cursor.read_u32::<LE>()?);
        }

        Ok(Self {
            num_items,
            num_blocks,
            min_doc_id,
            max_doc_id,
            max_commit_id,
            compression,
            attributes,
            docs,
            block_index,
            block_lengths,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn header_roundtrip() {
        let header = SegmentHeader { block_size: 4096 };
        let encoded = header.encode_into_vec();
        let decoded = SegmentHeader::decode_from(&mut &encoded[..]).unwrap();
        assert_eq!(header, decoded);
    }

    #[test]
    fn header_rejects_bad_magic() {
        let mut bytes = SegmentHeader { block_size: 4096 }.encode_into_vec();
        bytes[0] = b'X';
        assert!(SegmentHeader::decode_from(&mut &bytes[..]).is_err());
    }

    #[test]
    fn metadata_roundtrip() {
        let mut metadata = Metadata {
            num_items: 10,
            num_blocks: 2,
            min_doc_id: 1,
            max_doc_id: 5,
            max_commit_id: 42,
            block_index: vec![0, 100],
            ..Default::default()
        };
        metadata.attributes.insert("min_document_id".into(), 1);
        metadata.docs.insert(1, true);
        metadata.docs.insert(2, false);

        let encoded = metadata.encode_into_vec();
        let decoded = Metadata::decode_from(&mut &encoded[..]).unwrap();
        assert_eq!(metadata, decoded);
    }

    #[cfg(feature = "lz4")]
    #[test]
    fn metadata_roundtrips_compression_algorithm() {
        let metadata = Metadata {
            num_items: 1,
            compression: CompressionType::Lz4,
            ..Default::default()
        };
        let encoded = metadata.encode_into_vec();
        let decoded = Metadata::decode_from(&mut &encoded[..]).unwrap();
        assert_eq!(CompressionType::Lz4, decoded.compression);
    }

    #[test]
    fn metadata_detects_corruption() {
        let metadata = Metadata {
            num_items: 1,
            ..Default::default()
        };
        let mut encoded = metadata.encode_into_vec();
        let last = encoded.len() - 1;
        encoded[last] ^= 0xFF;
        assert!(Metadata::decode_from(&mut &encoded[..]).is_err());
    }
}
