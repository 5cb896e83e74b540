use std::io::{Seek, SeekFrom, Write};

use crate::error::VcsError;
use crate::io::WriteLeExt;
use crate::{Result, END_MARKER, STATIC_COMBO_HASH_SIZE, VCS_VERSION};

/// Header fields the caller resolves from the shader entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchiveInfo {
    pub total_combos: u64,
    pub dynamic_combos: u64,
    pub flags: u32,
    pub centroid_mask: u32,
    pub source_crc32: u32,
}

/// One static combo's packed region, ready for the archive.
#[derive(Debug, Clone)]
pub struct PackedStaticCombo {
    pub static_id: u64,
    pub packed: Vec<u8>,
}

struct CandidateRecord {
    static_id: u32,
    crc32: u32,
    combo_index: usize,
}

/// Write one shader's archive.
///
/// Combos with an empty packed region are dropped. Byte-identical regions
/// are stored once; later static ids become alias records pointing at the
/// first (lowest) id with that content. The dictionary is written twice:
/// zeroed up front, then rewritten with real offsets once every payload
/// position is known.
pub fn write_archive<W: Write + Seek>(
    w: &mut W,
    info: &ArchiveInfo,
    combos: &[PackedStaticCombo],
) -> Result<()> {
    let mut candidates = Vec::with_capacity(combos.len());
    for (index, combo) in combos.iter().enumerate() {
        if combo.packed.is_empty() {
            continue;
        }
        let static_id: u32 = combo
            .static_id
            .try_into()
            .map_err(|_| VcsError::narrowing("static combo id", combo.static_id, "u32"))?;
        if static_id == END_MARKER {
            return Err(VcsError::Corrupt("static combo id collides with sentinel"));
        }
        candidates.push(CandidateRecord {
            static_id,
            crc32: crc32fast::hash(&combo.packed),
            combo_index: index,
        });
    }

    candidates.sort_by_key(|candidate| candidate.static_id);
    if candidates
        .windows(2)
        .any(|pair| pair[0].static_id == pair[1].static_id)
    {
        return Err(VcsError::Corrupt("duplicate static combo id"));
    }

    // Content dedup: small fixed bucket table keyed by crc, full byte
    // comparison on candidate matches.
    let mut kept: Vec<CandidateRecord> = Vec::with_capacity(candidates.len());
    let mut aliases: Vec<(u32, u32)> = Vec::new();
    let mut buckets: Vec<Vec<usize>> = vec![Vec::new(); STATIC_COMBO_HASH_SIZE];

    for candidate in candidates {
        let bucket = &mut buckets[candidate.crc32 as usize % STATIC_COMBO_HASH_SIZE];
        let packed = &combos[candidate.combo_index].packed;

        let duplicate_of = bucket.iter().copied().find(|&kept_index| {
            let prior = &kept[kept_index];
            prior.crc32 == candidate.crc32 && combos[prior.combo_index].packed == *packed
        });

        match duplicate_of {
            Some(kept_index) => aliases.push((candidate.static_id, kept[kept_index].static_id)),
            None => {
                bucket.push(kept.len());
                kept.push(candidate);
            }
        }
    }

    let num_static_combos: u32 = u32::try_from(kept.len() + 1)
        .map_err(|_| VcsError::narrowing("static combo count", kept.len() as u64 + 1, "u32"))?;

    w.write_u32_le(VCS_VERSION)?;
    w.write_i32_le(
        i32::try_from(info.total_combos)
            .map_err(|_| VcsError::narrowing("total combo count", info.total_combos, "i32"))?,
    )?;
    w.write_i32_le(
        i32::try_from(info.dynamic_combos)
            .map_err(|_| VcsError::narrowing("dynamic combo count", info.dynamic_combos, "i32"))?,
    )?;
    w.write_u32_le(info.flags)?;
    w.write_u32_le(info.centroid_mask)?;
    w.write_u32_le(num_static_combos)?;
    w.write_u32_le(info.source_crc32)?;

    // Placeholder dictionary, rewritten below once offsets are known.
    let dictionary_pos = w.stream_position()?;
    for _ in 0..num_static_combos {
        w.write_u32_le(0)?;
        w.write_u32_le(0)?;
    }

    let num_aliases: u32 = u32::try_from(aliases.len())
        .map_err(|_| VcsError::narrowing("alias count", aliases.len() as u64, "u32"))?;
    w.write_u32_le(num_aliases)?;
    aliases.sort_by_key(|&(static_id, _)| static_id);
    for (static_id, alias_of) in &aliases {
        w.write_u32_le(*static_id)?;
        w.write_u32_le(*alias_of)?;
    }

    let mut offsets = Vec::with_capacity(kept.len() + 1);
    for record in &kept {
        offsets.push(file_offset_u32(w.stream_position()?)?);
        w.write_bytes(&combos[record.combo_index].packed)?;
        w.write_u32_le(END_MARKER)?;
    }
    // Sentinel offset: end of file, so readers can size the last region.
    offsets.push(file_offset_u32(w.stream_position()?)?);
    let end_pos = w.stream_position()?;

    w.seek(SeekFrom::Start(dictionary_pos))?;
    for (record, offset) in kept.iter().zip(&offsets) {
        w.write_u32_le(record.static_id)?;
        w.write_u32_le(*offset)?;
    }
    w.write_u32_le(END_MARKER)?;
    w.write_u32_le(offsets[kept.len()])?;
    w.seek(SeekFrom::Start(end_pos))?;

    Ok(())
}

fn file_offset_u32(pos: u64) -> Result<u32> {
    u32::try_from(pos).map_err(|_| VcsError::narrowing("file offset", pos, "u32"))
}
