//! Byte packing for bulk memory transfers.
//!
//! A word occupies `ceil(width / 8)` bytes, least significant byte first.

use kiln_common::mask;
use kiln_ir::Memory;

use crate::error::SimError;

/// Splits `bytes` into words; a trailing partial word is zero-padded.
pub(crate) fn words_from_bytes(bytes: &[u8], memory: &Memory) -> Vec<u64> {
    let per_word = memory.bytes_per_word();
    let word_mask = mask(memory.width);
    bytes
        .chunks(per_word)
        .map(|chunk| {
            let word = chunk
                .iter()
                .enumerate()
                .fold(0u64, |acc, (i, b)| acc | (u64::from(*b) << (8 * i)));
            word & word_mask
        })
        .collect()
}

/// Packs words into bytes.
pub(crate) fn bytes_from_words(words: &[u64], memory: &Memory) -> Vec<u8> {
    let per_word = memory.bytes_per_word();
    let mut out = Vec::with_capacity(words.len() * per_word);
    for word in words {
        out.extend_from_slice(&word.to_le_bytes()[..per_word]);
    }
    out
}

/// Checks that words `offset..offset + count` lie inside the memory.
pub(crate) fn check_range(
    name: &str,
    memory: &Memory,
    offset: u64,
    count: u64,
) -> Result<(), SimError> {
    let depth = u64::from(memory.depth);
    let end = offset.checked_add(count).unwrap_or(u64::MAX);
    if offset > depth || end > depth {
        return Err(SimError::MemoryOutOfRange {
            name: name.to_string(),
            addr: depth.max(offset),
        });
    }
    Ok(())
}
