// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Encoding of the block region of a segment file (§4.1): fixed-budget
//! blocks of delta-varint `Item`s, CRC-checked individually so a single
//! corrupt block doesn't invalidate the whole segment.

use crate::checksum;
use crate::coding::DecodeError;
use crate::item::Item;
use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use std::io::Cursor;
use varint_rs::{VarintReader, VarintWriter};

/// Bytes of fixed overhead per block: `num_items: u16` + `min_hash: u32` +
/// trailing CRC32.
const FIXED_OVERHEAD: usize = 2 + 4 + 4;

fn item_cost(item: Item, prev_hash: u32) -> usize {
    varint_len(item.hash - prev_hash) + varint_len(item.id)
}

fn varint_len(mut value: u32) -> usize {
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}

/// Encodes a single block. `items` must be non-empty, sorted by
/// `(hash, id)`, and small enough to satisfy the block size budget (the
/// caller, [`build_blocks`], is responsible for that).
///
/// Streams through a [`checksum::ChecksummedWriter`] so the CRC32 is
/// accumulated as the body is written rather than computed in a second
/// pass over the finished buffer.
pub fn encode_block(items: &[Item]) -> Vec<u8> {
    assert!(!items.is_empty(), "a block must hold at least one item");

    #[allow(clippy::expect_used, reason = "Vec<u8> writes never fail")]
    let min_hash = items.first().expect("non-empty").hash;

    let mut body = checksum::ChecksummedWriter::new(Vec::new());
    body.write_u16::<LE>(items.len() as u16).expect("infallible");
    body.write_u32::<LE>(min_hash).expect("infallible");

    let mut prev_hash = min_hash;
    for item in items {
        body.write_u32_varint(item.hash - prev_hash).expect("infallible");
        body.write_u32_varint(item.id).expect("infallible");
        prev_hash = item.hash;
    }

    let crc = body.checksum();
    let mut body = body.into_inner();
    body.write_u32::<LE>(crc).expect("infallible");
    body
}

/// Decodes a single block, verifying its trailing CRC32 first.
pub fn decode_block(bytes: &[u8]) -> Result<Vec<Item>, DecodeError> {
    if bytes.len() < FIXED_OVERHEAD {
        return Err(DecodeError::InvalidMagic("block (too short)"));
    }

    let (payload, crc_bytes) = bytes.split_at(bytes.len() - 4);
    let expected_crc = (&crc_bytes[..]).read_u32::<LE>()?;
    checksum::check(payload, expected_crc)?;

    let mut cursor = Cursor::new(payload);
    let num_items = cursor.read_u16::<LE>()?;
    let mut prev_hash = cursor.read_u32::<LE>()?;

    let mut items = Vec::with_capacity(num_items as usize);
    for i in 0..num_items {
        let delta = cursor.read_u32_varint()?;
        let id = cursor.read_u32_varint()?;
        if i > 0 {
            prev_hash += delta;
        }
        items.push(Item::new(prev_hash, id));
    }
    Ok(items)
}

/// The encoded block region of a segment plus the block index (first hash
/// of each block) used to binary-search it.
pub struct BuiltBlocks {
    pub blocks: Vec<Vec<u8>>,
    pub block_index: Vec<u32>,
}

/// Packs a sorted item slice into blocks greedily filling `block_size`
/// bytes, never splitting a run of equal-hash items across a block
/// boundary unless the run alone exceeds the budget (§4.1).
#[must_use]
pub fn build_blocks(items: &[Item], block_size: u16) -> BuiltBlocks {
    let block_size = block_size as usize;
    let mut blocks = Vec::new();
    let mut block_index = Vec::new();

    let mut current: Vec<Item> = Vec::new();
    let mut current_len = FIXED_OVERHEAD;

    let mut i = 0;
    while i < items.len() {
        let hash = items[i].hash;
        let run_start = i;
        while i < items.len() && items[i].hash == hash {
            i += 1;
        }
        let run = &items[run_start..i];

        let prev_for_run = current.last().map_or(hash, |it| it.hash);
        let run_len: usize = run
            .iter()
            .scan(prev_for_run, |prev, item| {
                let cost = item_cost(*item, *prev);
                *prev = item.hash;
                Some(cost)
            })
            .sum();

        if !current.is_empty() && current_len + run_len > block_size {
            #[allow(clippy::expect_used)]
            block_index.push(current.first().expect("non-empty").hash);
            blocks.push(encode_block(&current));
            current = Vec::new();
            current_len = FIXED_OVERHEAD;
        }

        if current.is_empty() && FIXED_OVERHEAD + run_len > block_size {
            // Run alone overflows a fresh block; split it, each sub-block
            // still starting with `hash` as its first key.
            let mut start = 0;
            while start < run.len() {
                let mut len = FIXED_OVERHEAD;
                let mut prev = hash;
                let mut count = 0;
                for item in &run[start..] {
                    let cost = item_cost(*item, prev);
                    if count > 0 && len + cost > block_size {
                        break;
                    }
                    len += cost;
                    prev = item.hash;
                    count += 1;
                }
                let chunk = &run[start..start + count];
                block_index.push(hash);
                blocks.push(encode_block(chunk));
                start += count;
            }
        } else {
            current.extend_from_slice(run);
            current_len += run_len;
        }
    }

    if !current.is_empty() {
        #[allow(clippy::expect_used)]
        block_index.push(current.first().expect("non-empty").hash);
        blocks.push(encode_block(&current));
    }

    BuiltBlocks { blocks, block_index }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn block_roundtrip() {
        let items = vec![Item::new(1, 1), Item::new(1, 2), Item::new(5, 3), Item::new(9, 1)];
        let encoded = encode_block(&items);
        let decoded = decode_block(&encoded).unwrap();
        assert_eq!(items, decoded);
    }

    #[test]
    fn block_detects_corruption() {
        let items = vec![Item::new(1, 1)];
        let mut encoded = encode_block(&items);
        let last = encoded.len() - 1;
        encoded[last] ^= 0xFF;
        assert!(decode_block(&encoded).is_err());
    }

    #[test]
    fn build_blocks_fits_budget_and_preserves_order() {
        let items: Vec<Item> = (0..500).map(|i| Item::new(i / 3, i)).collect();
        let built = build_blocks(&items, 128);

        assert_eq!(built.blocks.len(), built.block_index.len());

        let mut reassembled = Vec::new();
        for block in &built.blocks {
            reassembled.extend(decode_block(block).unwrap());
        }
        assert_eq!(items, reassembled);

        for (block, &first_hash) in built.blocks.iter().zip(&built.block_index) {
            let decoded = decode_block(block).unwrap();
            assert_eq!(first_hash, decoded[0].hash);
        }
    }

    #[test]
    fn build_blocks_splits_oversized_run() {
        let items: Vec<Item> = (0..50).map(|i| Item::new(7, i)).collect();
        let built = build_blocks(&items, 32);
        assert!(built.blocks.len() > 1);
        assert!(built.block_index.iter().all(|&h| h == 7));
    }
}
