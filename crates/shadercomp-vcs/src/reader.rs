use std::io::{Cursor, Read, Seek, SeekFrom};

use crate::error::VcsError;
use crate::io::ReadLeExt;
use crate::{BlockKind, Result, BLOCK_LEN_MASK, END_MARKER, VCS_VERSION};

/// Memory ceiling handed to the LZMA decoder so corrupt headers cannot force
/// unbounded allocation.
const DECOMPRESS_MEMLIMIT: usize = 256 * 1024 * 1024;

/// Decoded archive header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveHeader {
    pub version: u32,
    pub total_combos: i32,
    pub dynamic_combos: i32,
    pub flags: u32,
    pub centroid_mask: u32,
    pub num_static_combos: u32,
    pub source_crc32: u32,
}

/// Dictionary entry: a static combo and the absolute offset of its region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticComboRecord {
    pub static_id: u32,
    pub file_offset: u32,
}

/// Alias entry: a static combo whose bytes live under another id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticComboAlias {
    pub static_id: u32,
    pub alias_of: u32,
}

/// Header, dictionary, and alias table: everything before the payloads.
#[derive(Debug, Clone)]
pub struct ArchiveIndex {
    pub header: ArchiveHeader,
    /// Sorted ascending; the sentinel (id `0xFFFFFFFF`, offset = EOF) is last.
    pub records: Vec<StaticComboRecord>,
    pub aliases: Vec<StaticComboAlias>,
}

/// One static combo's fully decoded payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticComboPayload {
    pub static_id: u32,
    /// `(dynamic_id, bytecode)`, in stored (ascending) order.
    pub dynamic_combos: Vec<(u32, Vec<u8>)>,
}

pub fn read_header<R: Read>(r: &mut R) -> Result<ArchiveHeader> {
    let version = r.read_u32_le()?;
    if version != VCS_VERSION {
        return Err(VcsError::UnsupportedVersion(version));
    }
    Ok(ArchiveHeader {
        version,
        total_combos: r.read_i32_le()?,
        dynamic_combos: r.read_i32_le()?,
        flags: r.read_u32_le()?,
        centroid_mask: r.read_u32_le()?,
        num_static_combos: r.read_u32_le()?,
        source_crc32: r.read_u32_le()?,
    })
}

pub fn read_index<R: Read>(r: &mut R) -> Result<ArchiveIndex> {
    let header = read_header(r)?;
    if header.num_static_combos == 0 {
        return Err(VcsError::Corrupt("dictionary is missing its sentinel"));
    }

    let count = header.num_static_combos as usize;
    let mut records = Vec::with_capacity(count.min(4096));
    for _ in 0..count {
        records.push(StaticComboRecord {
            static_id: r.read_u32_le()?,
            file_offset: r.read_u32_le()?,
        });
    }
    if records[records.len() - 1].static_id != END_MARKER {
        return Err(VcsError::Corrupt("dictionary sentinel is not last"));
    }
    if records
        .windows(2)
        .any(|pair| pair[0].static_id >= pair[1].static_id)
    {
        return Err(VcsError::Corrupt("dictionary ids are not strictly ascending"));
    }

    let alias_count = r.read_u32_le()? as usize;
    let mut aliases = Vec::with_capacity(alias_count.min(4096));
    for _ in 0..alias_count {
        aliases.push(StaticComboAlias {
            static_id: r.read_u32_le()?,
            alias_of: r.read_u32_le()?,
        });
    }

    Ok(ArchiveIndex { header, records, aliases })
}

/// Walk the dictionary and decode every packed region.
pub fn read_archive<R: Read + Seek>(r: &mut R) -> Result<Vec<StaticComboPayload>> {
    let index = read_index(r)?;

    let mut payloads = Vec::with_capacity(index.records.len() - 1);
    for pair in index.records.windows(2) {
        let (record, next) = (pair[0], pair[1]);
        let region_end = next.file_offset;
        if region_end < record.file_offset {
            return Err(VcsError::Corrupt("region offsets are not monotonic"));
        }
        let region_len = (region_end - record.file_offset) as usize;
        if region_len < 4 {
            return Err(VcsError::Corrupt("region too short for its end marker"));
        }

        r.seek(SeekFrom::Start(u64::from(record.file_offset)))?;
        let bytes = r.read_exact_vec(region_len)?;
        let (region, marker) = bytes.split_at(region_len - 4);
        if marker != END_MARKER.to_le_bytes() {
            return Err(VcsError::Corrupt("missing end-of-dynamic-combos marker"));
        }

        payloads.push(StaticComboPayload {
            static_id: record.static_id,
            dynamic_combos: unpack_region(region)?,
        });
    }

    Ok(payloads)
}

/// Decode one packed region (without its end marker) into dynamic combos.
pub fn unpack_region(region: &[u8]) -> Result<Vec<(u32, Vec<u8>)>> {
    let mut combos = Vec::new();
    let mut at = 0usize;

    while at < region.len() {
        let tag_bytes = region
            .get(at..at + 4)
            .ok_or(VcsError::Corrupt("truncated block tag"))?;
        let tag = u32::from_le_bytes(tag_bytes.try_into().expect("4-byte slice"));
        at += 4;

        let stored_len = (tag & BLOCK_LEN_MASK) as usize;
        let stored = region
            .get(at..at + stored_len)
            .ok_or(VcsError::Corrupt("block overruns its region"))?;
        at += stored_len;

        let block = match BlockKind::from_tag(tag) {
            BlockKind::Lzma => decompress_lzma(stored)?,
            BlockKind::Uncompressed => stored.to_vec(),
            kind @ (BlockKind::Bzip2 | BlockKind::Reserved) => {
                return Err(VcsError::UnsupportedCompression(kind));
            }
        };

        let mut cursor = Cursor::new(block.as_slice());
        while (cursor.position() as usize) < block.len() {
            let dynamic_id = cursor.read_u32_le()?;
            let code_len = cursor.read_u32_le()? as usize;
            let bytecode = cursor.read_exact_vec(code_len)?;
            combos.push((dynamic_id, bytecode));
        }
    }

    Ok(combos)
}

fn decompress_lzma(stored: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let options = lzma_rs::decompress::Options {
        memlimit: Some(DECOMPRESS_MEMLIMIT),
        ..Default::default()
    };
    lzma_rs::lzma_decompress_with_options(&mut Cursor::new(stored), &mut out, &options)
        .map_err(|_| VcsError::Corrupt("invalid lzma block"))?;
    Ok(out)
}
