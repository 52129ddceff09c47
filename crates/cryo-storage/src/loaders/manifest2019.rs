//! Manifest2019 superbundles
//!
//! Big-endian binary TOC:
//!
//! ```text
//! u32 bundle_hash_map_offset   u32 bundle_data_offset   i32 bundle_count
//! u32 chunk_hash_map_offset    u32 chunk_guid_offset    i32 chunk_count
//! u32 reserved * 2
//! u32 names_offset             u32 chunk_data_offset    i32 data_count
//! u32 flags
//! u32 names_count  u32 table_count  u32 table_offset    compressed names only
//! ```
//!
//! Bundle records `{i32 name, u32 size, i64 offset}` point into the `.sb`
//! file, or into the TOC itself when the top bits of `size` are `01`. Each
//! bundle record starts with a 32-byte header followed by the binary bundle,
//! a flag byte per stored item and the items' CAS locators.

use std::io::Cursor;

use binrw::{BinRead, Endian};
use cryo_crypto::{ContentHash, Guid};
use cryo_formats::huffman::HuffmanDecoder;
use tracing::{debug, trace};

use super::{
    AssetLoader, LoadContext, StoredEntry, SuperBundleLoad, read_toc, toc_sources,
};
use crate::archive::{CasFileId, SuperBundleFiles};
use crate::assets::{AssetInfo, ChunkEntry, SuperBundleId};
use crate::file_info::{CasLocation, ResourceLocation};
use crate::install_chunk::SuperBundleInfo;
use crate::layout::{BundleFormat, Layer};
use crate::{Result, StorageError};

/// Base TOC holds bundles the patch TOC lacks
pub const HAS_BASE_BUNDLES: u32 = 1 << 0;
/// Base TOC holds chunks the patch TOC lacks
pub const HAS_BASE_CHUNKS: u32 = 1 << 1;
/// Bundle names are Huffman encoded
pub const HAS_COMPRESSED_NAMES: u32 = 1 << 2;

/// Bundle size bits selecting where the bundle record is stored
pub const PLACEMENT_MASK: u32 = 0xC000_0000;
/// Bundle record stored in the TOC
pub const PLACEMENT_TOC: u32 = 0x4000_0000;
const PLACEMENT_RESERVED: u32 = 0x8000_0000;

/// Locator flag of a narrow locator word
pub const LOCATOR_NARROW: u8 = 1;
/// Locator flag of a two-word locator
pub const LOCATOR_WIDE: u8 = 0x80;

const SB_HEADER_SIZE: u64 = 0x20;

/// Loader for Manifest2019 TOCs
#[derive(Debug, Clone, Copy, Default)]
pub struct Manifest2019Loader;

#[derive(Debug, Clone)]
struct TocBundle {
    name: String,
    /// TOC/sb file name the record lives in
    file: String,
    layer: Layer,
    /// Record offset as stored; `-1` records never get here
    offset: i64,
    size: u32,
}

struct TocHeader {
    bundle_data_offset: u32,
    bundle_count: i32,
    chunk_guid_offset: u32,
    chunk_count: i32,
    names_offset: u32,
    chunk_data_offset: u32,
    data_count: i32,
    flags: u32,
    names_count: u32,
    table_count: u32,
    table_offset: u32,
}

fn be_u32(cursor: &mut Cursor<&[u8]>) -> Result<u32> {
    Ok(u32::read_options(cursor, Endian::Big, ())?)
}

fn be_i32(cursor: &mut Cursor<&[u8]>) -> Result<i32> {
    Ok(i32::read_options(cursor, Endian::Big, ())?)
}

fn offset_add(base: u64, delta: u64, what: &str) -> Result<u64> {
    base.checked_add(delta)
        .ok_or_else(|| StorageError::corrupt(what, format!("offset {base} + {delta} overflows")))
}

fn tail<'d>(data: &'d [u8], offset: u64, what: &str) -> Result<&'d [u8]> {
    usize::try_from(offset)
        .ok()
        .and_then(|offset| data.get(offset..))
        .ok_or_else(|| StorageError::corrupt(what, format!("offset {offset} outside file")))
}

impl TocHeader {
    fn read(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        let _bundle_hash_map_offset = be_u32(cursor)?;
        let bundle_data_offset = be_u32(cursor)?;
        let bundle_count = be_i32(cursor)?;
        let _chunk_hash_map_offset = be_u32(cursor)?;
        let chunk_guid_offset = be_u32(cursor)?;
        let chunk_count = be_i32(cursor)?;
        be_u32(cursor)?;
        be_u32(cursor)?;
        let names_offset = be_u32(cursor)?;
        let chunk_data_offset = be_u32(cursor)?;
        let data_count = be_i32(cursor)?;
        let flags = be_u32(cursor)?;

        let (names_count, table_count, table_offset) = if flags & HAS_COMPRESSED_NAMES != 0 {
            (be_u32(cursor)?, be_u32(cursor)?, be_u32(cursor)?)
        } else {
            (0, 0, u32::MAX)
        };

        Ok(Self {
            bundle_data_offset,
            bundle_count,
            chunk_guid_offset,
            chunk_count,
            names_offset,
            chunk_data_offset,
            data_count,
            flags,
            names_count,
            table_count,
            table_offset,
        })
    }
}

/// Read one locator, or keep the previous file when the flag names none
fn read_locator(cursor: &mut Cursor<&[u8]>, flag: u8, previous: Option<CasFileId>) -> Result<Option<CasFileId>> {
    match flag {
        LOCATOR_NARROW => Ok(Some(CasFileId::from_locator(be_u32(cursor)?))),
        LOCATOR_WIDE => {
            let first = be_u32(cursor)?;
            Ok(Some(CasFileId::from_wide_locator(first, be_u32(cursor)?)))
        }
        _ => Ok(previous),
    }
}

impl AssetLoader for Manifest2019Loader {
    fn format(&self) -> BundleFormat {
        BundleFormat::Manifest2019
    }

    fn load_superbundle(
        &self,
        ctx: &LoadContext<'_>,
        superbundle: &SuperBundleInfo,
    ) -> Result<SuperBundleLoad> {
        let mut outcome = SuperBundleLoad::default();
        for source in toc_sources(ctx.fs, superbundle) {
            let sb_id = ctx.add_superbundle(&superbundle.name);
            let mut bundles = Vec::new();
            outcome.chunks += load_toc(ctx, &source.name, source.layer, sb_id, &mut bundles)?;
            load_bundles(ctx, &superbundle.name, sb_id, &bundles, &mut outcome)?;
            debug!(
                superbundle = %superbundle.name,
                toc = %source.name,
                layer = ?source.layer,
                bundles = bundles.len(),
                "loaded toc"
            );
        }
        Ok(outcome)
    }
}

/// Collect the bundle records of a TOC and add its chunks
///
/// A patch TOC flagged with base bundles or chunks loads the base TOC
/// first; its records with the same name replace the base ones.
fn load_toc(
    ctx: &LoadContext<'_>,
    file: &str,
    layer: Layer,
    sb_id: SuperBundleId,
    bundles: &mut Vec<TocBundle>,
) -> Result<usize> {
    let Some(data) = read_toc(ctx.fs, layer, file)? else {
        return Ok(0);
    };
    let mut cursor = Cursor::new(data.as_slice());
    let header = TocHeader::read(&mut cursor)?;

    let mut chunks = 0;
    if layer.is_patch() && header.flags & (HAS_BASE_BUNDLES | HAS_BASE_CHUNKS) != 0 {
        chunks += load_toc(ctx, file, Layer::Base, sb_id, bundles)?;
    }

    if header.bundle_count > 0 {
        read_bundle_records(&data, &header, file, layer, bundles)?;
    }
    if header.chunk_count > 0 {
        chunks += read_chunks(ctx, &data, &header, file, sb_id)?;
    }
    Ok(chunks)
}

fn read_bundle_records(
    data: &[u8],
    header: &TocHeader,
    file: &str,
    layer: Layer,
    bundles: &mut Vec<TocBundle>,
) -> Result<()> {
    let decoder = if header.flags & HAS_COMPRESSED_NAMES != 0 {
        Some(HuffmanDecoder::from_bytes(
            tail(data, u64::from(header.names_offset), file)?,
            header.names_count as usize,
            tail(data, u64::from(header.table_offset), file)?,
            header.table_count as usize,
            Endian::Big,
        )?)
    } else {
        None
    };

    let mut cursor = Cursor::new(data);
    cursor.set_position(u64::from(header.bundle_data_offset));
    for _ in 0..header.bundle_count {
        let name_offset = be_i32(&mut cursor)?;
        let size = be_u32(&mut cursor)?;
        let offset = i64::read_options(&mut cursor, Endian::Big, ())?;

        let name_offset = u64::try_from(name_offset)
            .map_err(|_| StorageError::corrupt(file, format!("negative name offset {name_offset}")))?;
        let name = match &decoder {
            Some(decoder) => decoder.decode(name_offset as usize)?,
            None => {
                let start = offset_add(u64::from(header.names_offset), name_offset, file)?;
                let bytes = tail(data, start, file)?;
                let len = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
                String::from_utf8_lossy(&bytes[..len]).into_owned()
            }
        };

        bundles.retain(|b| !b.name.eq_ignore_ascii_case(&name));
        if size == u32::MAX || offset == -1 {
            trace!(bundle = %name, "bundle removed by toc");
            continue;
        }
        bundles.push(TocBundle {
            name,
            file: file.to_string(),
            layer,
            offset,
            size,
        });
    }
    Ok(())
}

fn read_chunks(
    ctx: &LoadContext<'_>,
    data: &[u8],
    header: &TocHeader,
    file: &str,
    sb_id: SuperBundleId,
) -> Result<usize> {
    let mut cursor = Cursor::new(data);
    cursor.set_position(u64::from(header.chunk_data_offset));
    let words = (0..header.data_count.max(0))
        .map(|_| be_u32(&mut cursor))
        .collect::<Result<Vec<_>>>()?;
    let word = |index: usize| {
        words
            .get(index)
            .copied()
            .ok_or_else(|| StorageError::corrupt(file, format!("chunk data index {index} out of range")))
    };

    let mut added = 0;
    cursor.set_position(u64::from(header.chunk_guid_offset));
    for _ in 0..header.chunk_count {
        let raw = <[u8; 16]>::read_options(&mut cursor, Endian::Big, ())?;
        let id = Guid::from_reversed(raw);
        let index = be_i32(&mut cursor)?;
        if index == -1 {
            continue;
        }

        let flag = (index as u32 >> 24) as u8;
        let mut index = (index as u32 & 0x00FF_FFFF) as usize;
        let file_id = match flag {
            LOCATOR_NARROW => {
                index += 1;
                CasFileId::from_locator(word(index - 1)?)
            }
            LOCATOR_WIDE => {
                index += 2;
                CasFileId::from_wide_locator(word(index - 2)?, word(index - 1)?)
            }
            other => {
                return Err(StorageError::corrupt(
                    file,
                    format!("chunk {id} has unknown locator flag {other:#x}"),
                ));
            }
        };
        let offset = word(index)?;
        let size = word(index + 1)?;

        let location = ResourceLocation::Cas(CasLocation::new(file_id, offset, size));
        let asset = AssetInfo::new(ContentHash::ZERO, u64::from(size), 0).with_locations([location]);
        ctx.add_superbundle_chunk(ChunkEntry::new(id, 0, 0, asset), sb_id);
        added += 1;
    }
    Ok(added)
}

fn load_bundles(
    ctx: &LoadContext<'_>,
    sb_name: &str,
    sb_id: SuperBundleId,
    bundles: &[TocBundle],
    outcome: &mut SuperBundleLoad,
) -> Result<()> {
    let mut base_files = SuperBundleFiles::new(ctx.fs);
    let mut patch_files = SuperBundleFiles::new(ctx.fs);
    let mut toc: Option<(Layer, String, Vec<u8>)> = None;

    for bundle in bundles {
        let result = match bundle.size & PLACEMENT_MASK {
            PLACEMENT_TOC => {
                let cached = matches!(&toc, Some((l, f, _)) if *l == bundle.layer && *f == bundle.file);
                if !cached {
                    toc = read_toc(ctx.fs, bundle.layer, &bundle.file)?
                        .map(|data| (bundle.layer, bundle.file.clone(), data));
                }
                match &toc {
                    Some((_, _, data)) => load_bundle(ctx, data, sb_id, bundle),
                    None => Err(StorageError::NotFound(format!("{}.toc", bundle.file))),
                }
            }
            PLACEMENT_RESERVED => Err(StorageError::UnsupportedFeature(format!(
                "bundle placement {:#x}",
                bundle.size & PLACEMENT_MASK
            ))),
            _ => {
                let files = match bundle.layer {
                    Layer::Base => &mut base_files,
                    Layer::Patch => &mut patch_files,
                };
                match files.open(bundle.layer, &bundle.file)? {
                    Some(file) => load_bundle(ctx, file.data(), sb_id, bundle),
                    None => Err(StorageError::NotFound(format!(
                        "{}/{}.sb",
                        bundle.layer.prefix(),
                        bundle.file
                    ))),
                }
            }
        };
        outcome.finish_bundle(sb_name, &bundle.name, result)?;
    }
    Ok(())
}

/// Decode one bundle record starting at `bundle.offset` of `data`
fn load_bundle(ctx: &LoadContext<'_>, data: &[u8], sb_id: SuperBundleId, bundle: &TocBundle) -> Result<()> {
    let name = bundle.name.as_str();
    let start = u64::try_from(bundle.offset)
        .map_err(|_| StorageError::corrupt(name, format!("negative record offset {}", bundle.offset)))?;
    let end = offset_add(start, u64::from(bundle.size & !PLACEMENT_MASK), name)?;
    let mut cursor = Cursor::new(data);
    cursor.set_position(start);

    let bundle_offset = be_i32(&mut cursor)?;
    let bundle_size = be_i32(&mut cursor)?;
    let location_offset = be_u32(&mut cursor)?;
    let total_count = be_i32(&mut cursor)?;
    let data_offset = be_u32(&mut cursor)?;

    let flags_start = offset_add(start, u64::from(location_offset), name)?;
    let flags = tail(data, flags_start, name)?
        .get(..total_count.max(0) as usize)
        .ok_or_else(|| StorageError::corrupt(name, "flag array outside file"))?;
    let mut flags = flags.iter().copied();
    let mut next_flag = || {
        flags
            .next()
            .ok_or_else(|| StorageError::corrupt(name, "more stored items than flags"))
    };

    let mut file = None;
    cursor.set_position(offset_add(start, u64::from(data_offset), name)?);
    let parsed = if bundle_offset != 0 || bundle_size != 0 {
        if bundle_offset < 0 || (bundle_offset as u64) < SB_HEADER_SIZE {
            return Err(StorageError::corrupt(name, "bundle overlaps record header"));
        }
        ctx.parse_bundle(tail(data, offset_add(start, bundle_offset as u64, name)?, name)?)?
    } else {
        file = read_locator(&mut cursor, next_flag()?, file)?;
        let offset = be_u32(&mut cursor)?;
        let size = be_u32(&mut cursor)?;
        let file_id = file.ok_or_else(|| StorageError::corrupt(name, "bundle has no locator"))?;
        let stored = ctx.read.read_cas(&CasLocation::new(file_id, offset, size))?;
        ctx.parse_bundle(&stored)?
    };

    let logical_offsets = std::iter::repeat_n(0, parsed.ebx.len() + parsed.res.len())
        .chain(parsed.chunks.iter().map(|c| c.logical_offset))
        .collect::<Vec<_>>();

    let mut stored = Vec::with_capacity(logical_offsets.len());
    for logical_offset in logical_offsets {
        file = read_locator(&mut cursor, next_flag()?, file)?;
        let offset = be_u32(&mut cursor)?;
        let size = be_u32(&mut cursor)?;
        let file_id = file.ok_or_else(|| StorageError::corrupt(name, "entry has no locator"))?;
        let location = CasLocation::new(file_id, offset, size).with_logical_offset(logical_offset);
        stored.push(StoredEntry::at(u64::from(size), ResourceLocation::Cas(location)));
    }

    if next_flag().is_ok() {
        return Err(StorageError::corrupt(name, format!("{total_count} flags for fewer stored items")));
    }
    if cursor.position() != end {
        return Err(StorageError::corrupt(
            name,
            format!("locators end at {}, record ends at {end}", cursor.position()),
        ));
    }

    let bundle_id = ctx.add_bundle(name, sb_id);
    ctx.add_binary_bundle(name, bundle_id, parsed, stored)
}
