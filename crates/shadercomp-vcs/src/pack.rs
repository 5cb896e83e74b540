use std::io::Cursor;

use crate::error::VcsError;
use crate::io::WriteLeExt;
use crate::{BlockKind, Result, BLOCK_LEN_MASK, MAX_UNPACKED_BLOCK_SIZE};

/// Pack one static combo's dynamic variants into its archive region.
///
/// `combos` must be sorted ascending by dynamic id. Combos are batched into
/// an uncompressed staging buffer that is flushed as a length-tagged block
/// whenever the next combo would push it past [`MAX_UNPACKED_BLOCK_SIZE`];
/// each flush tries LZMA and keeps it only when it actually shrank the
/// bytes. The returned region carries no terminator of its own; the archive
/// writer appends the end-of-dynamic-combos marker.
pub fn pack_dynamic_combos<'a, I>(combos: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = (u64, &'a [u8])>,
{
    let mut region = Vec::new();
    let mut staging: Vec<u8> = Vec::new();

    for (dynamic_id, bytecode) in combos {
        let dynamic_id: u32 = dynamic_id
            .try_into()
            .map_err(|_| VcsError::narrowing("dynamic combo id", dynamic_id, "u32"))?;
        let code_len: u32 = u32::try_from(bytecode.len())
            .map_err(|_| VcsError::narrowing("bytecode length", bytecode.len() as u64, "u32"))?;

        if staging.len() + bytecode.len() + 16 >= MAX_UNPACKED_BLOCK_SIZE {
            flush_block(&mut staging, &mut region)?;
        }

        staging.write_u32_le(dynamic_id)?;
        staging.write_u32_le(code_len)?;
        staging.write_bytes(bytecode)?;
    }

    flush_block(&mut staging, &mut region)?;
    Ok(region)
}

/// Emit `staging` as one tagged block and clear it. No-op when empty.
fn flush_block(staging: &mut Vec<u8>, region: &mut Vec<u8>) -> Result<()> {
    if staging.is_empty() {
        return Ok(());
    }

    let stored_len = u32::try_from(staging.len())
        .ok()
        .filter(|len| (len & !BLOCK_LEN_MASK) == 0)
        .ok_or_else(|| VcsError::narrowing("block length", staging.len() as u64, "30 bits"))?;

    match try_compress(staging) {
        Some(compressed) => {
            // `compressed.len() < staging.len()` always fits the mask.
            region.write_u32_le(BlockKind::Lzma.tag(compressed.len() as u32))?;
            region.write_bytes(&compressed)?;
        }
        None => {
            region.write_u32_le(BlockKind::Uncompressed.tag(stored_len))?;
            region.write_bytes(staging)?;
        }
    }

    staging.clear();
    Ok(())
}

/// LZMA-compress `data`, returning `None` unless the result is strictly
/// smaller.
fn try_compress(data: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len());
    let mut input = Cursor::new(data);
    lzma_rs::lzma_compress(&mut input, &mut out).ok()?;
    (out.len() < data.len()).then_some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unpack_region;

    /// Deterministic pseudo-random bytes; poor LZMA fodder so tests exercise
    /// the uncompressed path too.
    fn noise(len: usize, mut seed: u32) -> Vec<u8> {
        let mut out = Vec::with_capacity(len);
        for _ in 0..len {
            seed = seed.wrapping_mul(1664525).wrapping_add(1013904223);
            out.push((seed >> 24) as u8);
        }
        out
    }

    #[test]
    fn empty_input_packs_to_empty_region() {
        let region = pack_dynamic_combos(std::iter::empty()).unwrap();
        assert!(region.is_empty());
    }

    #[test]
    fn single_combo_round_trips() {
        let region = pack_dynamic_combos([(0u64, &[0xAA, 0xBB][..])]).unwrap();
        let combos = unpack_region(&region).unwrap();
        assert_eq!(combos, vec![(0, vec![0xAA, 0xBB])]);
    }

    #[test]
    fn block_tags_are_lzma_or_uncompressed() {
        let code = vec![0u8; 4096];
        let region = pack_dynamic_combos([(0u64, code.as_slice())]).unwrap();
        let tag = u32::from_le_bytes(region[..4].try_into().unwrap());
        assert!(matches!(
            BlockKind::from_tag(tag),
            BlockKind::Lzma | BlockKind::Uncompressed
        ));
    }

    #[test]
    fn oversized_combos_split_into_multiple_blocks() {
        let a = noise(MAX_UNPACKED_BLOCK_SIZE / 2, 1);
        let b = noise(MAX_UNPACKED_BLOCK_SIZE / 2, 2);
        let c = noise(MAX_UNPACKED_BLOCK_SIZE / 2, 3);
        let region = pack_dynamic_combos([
            (0u64, a.as_slice()),
            (1u64, b.as_slice()),
            (2u64, c.as_slice()),
        ])
        .unwrap();

        // Count blocks by walking the tag words.
        let mut blocks = 0;
        let mut at = 0usize;
        while at < region.len() {
            let tag = u32::from_le_bytes(region[at..at + 4].try_into().unwrap());
            assert!(matches!(
                BlockKind::from_tag(tag),
                BlockKind::Lzma | BlockKind::Uncompressed
            ));
            at += 4 + (tag & BLOCK_LEN_MASK) as usize;
            blocks += 1;
        }
        assert_eq!(at, region.len());
        assert!(blocks >= 2, "expected a flush mid-stream, got {blocks} block(s)");

        let combos = unpack_region(&region).unwrap();
        assert_eq!(combos.len(), 3);
        assert_eq!(combos[0], (0, a));
        assert_eq!(combos[1], (1, b));
        assert_eq!(combos[2], (2, c));
    }

    #[test]
    fn dynamic_id_overflow_is_rejected() {
        let err = pack_dynamic_combos([(u64::from(u32::MAX) + 1, &[0u8][..])]).unwrap_err();
        assert!(matches!(err, VcsError::Narrowing { .. }));
    }
}
