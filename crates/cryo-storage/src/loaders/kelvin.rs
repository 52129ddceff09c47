//! Kelvin superbundles
//!
//! Little-endian TOC:
//!
//! ```text
//! u32 magic  u32 bundles_offset  u32 chunks_offset
//! ```
//!
//! A `0xC3E5D5C3` magic means everything after these three words is AES-CBC
//! encrypted with `BundleEncryptionKey`. Either table offset is `0xFFFFFFFF`
//! when the table is absent.
//!
//! Bundle names are stored as reversed fragments: each fragment is a
//! C string at `offset - 1` followed by the offset of the next fragment, `0`
//! ending the chain. A bundle's bytes may span several archive files; its
//! entries continue in the next file once the current one is used up.

use std::io::Cursor;

use binrw::{BinRead, Endian};
use cryo_crypto::{BUNDLE_ENCRYPTION_KEY, ContentHash, Guid, Padding, decrypt_cbc};
use cryo_formats::bundle::bundle_len;
use cryo_formats::cas::measure_stream;
use tracing::{debug, trace};

use super::{
    AssetLoader, LoadContext, StoredEntry, SuperBundleLoad, chunk_stream_size, read_toc,
    toc_sources,
};
use crate::archive::{MappedFile, open_logical};
use crate::assets::{AssetInfo, ChunkEntry, SuperBundleId};
use crate::file_info::ResourceLocation;
use crate::install_chunk::SuperBundleInfo;
use crate::layout::BundleFormat;
use crate::{Result, StorageError};

/// Magic of an encrypted Kelvin TOC
pub const ENCRYPTED_TOC_MAGIC: u32 = 0xC3E5_D5C3;

const TOC_HEADER_SIZE: usize = 12;
const NO_TABLE: u32 = u32::MAX;
const MORE_FILES: u32 = 0x8000_0000;

/// Loader for Kelvin TOCs
#[derive(Debug, Clone, Copy, Default)]
pub struct KelvinLoader;

/// One piece of a bundle's data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FilePiece {
    index: u32,
    offset: u32,
    size: u32,
}

fn le_u32(cursor: &mut Cursor<&[u8]>) -> Result<u32> {
    Ok(u32::read_options(cursor, Endian::Little, ())?)
}

fn le_i32(cursor: &mut Cursor<&[u8]>) -> Result<i32> {
    Ok(i32::read_options(cursor, Endian::Little, ())?)
}

/// Follow a fragment chain starting at `offset` and reverse the result
fn read_name(data: &[u8], mut offset: i32, toc: &str) -> Result<String> {
    let mut reversed = Vec::new();
    // every fragment takes at least five bytes, so a longer chain loops
    for _ in 0..=data.len() / 5 {
        let start = offset
            .checked_sub(1)
            .and_then(|start| usize::try_from(start).ok())
            .filter(|start| *start < data.len())
            .ok_or_else(|| StorageError::corrupt(toc, format!("name fragment at {offset}")))?;
        let fragment = &data[start..];
        let len = fragment
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| StorageError::corrupt(toc, "unterminated name fragment"))?;
        reversed.extend_from_slice(&fragment[..len]);

        let mut cursor = Cursor::new(data);
        cursor.set_position((start + len + 1) as u64);
        offset = le_i32(&mut cursor)?;
        if offset == 0 {
            reversed.reverse();
            return Ok(String::from_utf8_lossy(&reversed).into_owned());
        }
    }
    Err(StorageError::corrupt(toc, "name fragments form a cycle"))
}

impl AssetLoader for KelvinLoader {
    fn format(&self) -> BundleFormat {
        BundleFormat::Kelvin
    }

    fn load_superbundle(
        &self,
        ctx: &LoadContext<'_>,
        superbundle: &SuperBundleInfo,
    ) -> Result<SuperBundleLoad> {
        let mut outcome = SuperBundleLoad::default();
        for source in toc_sources(ctx.fs, superbundle) {
            let Some(mut data) = read_toc(ctx.fs, source.layer, &source.name)? else {
                continue;
            };
            let sb_id = ctx.add_superbundle(&superbundle.name);

            let mut cursor = Cursor::new(data.as_slice());
            let magic = le_u32(&mut cursor)?;
            let bundles_offset = le_u32(&mut cursor)?;
            let chunks_offset = le_u32(&mut cursor)?;
            if magic == ENCRYPTED_TOC_MAGIC {
                let key = ctx.keys.require(BUNDLE_ENCRYPTION_KEY)?;
                decrypt_cbc(key, &mut data[TOC_HEADER_SIZE..], Padding::None)?;
                trace!(toc = %source.name, "decrypted toc");
            }

            if bundles_offset != NO_TABLE {
                load_bundles(ctx, &data, bundles_offset, &source.name, &superbundle.name, sb_id, &mut outcome)?;
            }
            if chunks_offset != NO_TABLE {
                outcome.chunks += load_chunks(ctx, &data, chunks_offset, sb_id)?;
            }
            debug!(
                superbundle = %superbundle.name,
                toc = %source.name,
                bundles = outcome.bundles,
                chunks = outcome.chunks,
                "loaded toc"
            );
        }
        Ok(outcome)
    }
}

fn load_bundles(
    ctx: &LoadContext<'_>,
    data: &[u8],
    table_offset: u32,
    toc: &str,
    sb_name: &str,
    sb_id: SuperBundleId,
    outcome: &mut SuperBundleLoad,
) -> Result<()> {
    let mut cursor = Cursor::new(data);
    cursor.set_position(u64::from(table_offset));
    let count = le_i32(&mut cursor)?.max(0);
    cursor.set_position(cursor.position() + 4 * count as u64);

    for _ in 0..count {
        let record_offset = le_u32(&mut cursor)?;
        let mut record = Cursor::new(data);
        record.set_position(u64::from(record_offset));

        let name = read_name(data, le_i32(&mut record)?, toc)?;
        let mut pieces = Vec::new();
        loop {
            let index = le_u32(&mut record)?;
            pieces.push(FilePiece {
                index: index & !MORE_FILES,
                offset: le_u32(&mut record)?,
                size: le_u32(&mut record)?,
            });
            if index & MORE_FILES == 0 {
                break;
            }
        }

        let result = load_bundle(ctx, &name, sb_id, &pieces);
        outcome.finish_bundle(sb_name, &name, result)?;
    }
    Ok(())
}

/// A piece of bundle data mapped for reading
struct OpenPiece {
    path: String,
    offset: u64,
    file: MappedFile,
    size: u64,
}

impl OpenPiece {
    fn open(ctx: &LoadContext<'_>, piece: FilePiece) -> Result<Self> {
        let path = ctx
            .fs
            .cas_file_by_index(piece.index as usize)
            .ok_or_else(|| StorageError::Invariant(format!("no CAS file with index {}", piece.index)))?
            .to_string();
        let file = open_logical(ctx.fs, &path)?.ok_or_else(|| StorageError::NotFound(path.clone()))?;
        Ok(Self {
            path,
            offset: u64::from(piece.offset),
            file,
            size: u64::from(piece.size),
        })
    }

    fn data(&self) -> Result<&[u8]> {
        self.file.slice(self.offset, self.size)
    }
}

fn load_bundle(ctx: &LoadContext<'_>, name: &str, sb_id: SuperBundleId, pieces: &[FilePiece]) -> Result<()> {
    let mut pieces = pieces.iter().copied();
    let mut next_piece = || {
        pieces
            .next()
            .ok_or_else(|| StorageError::corrupt(name, "bundle data ends before its entries"))
    };

    let mut current = OpenPiece::open(ctx, next_piece()?)?;
    let parsed = ctx.parse_bundle(current.data()?)?;
    let mut position = bundle_len(current.data()?)? as u64;

    let sizes = parsed
        .ebx
        .iter()
        .map(|e| (e.original_size, 0))
        .chain(parsed.res.iter().map(|r| (r.original_size, 0)))
        .chain(parsed.chunks.iter().map(|c| {
            (chunk_stream_size(c.logical_offset, c.logical_size), c.logical_offset)
        }))
        .collect::<Vec<_>>();

    let mut stored = Vec::with_capacity(sizes.len());
    for (original_size, logical_offset) in sizes {
        if position == current.size {
            current = OpenPiece::open(ctx, next_piece()?)?;
            position = 0;
            trace!(bundle = name, path = %current.path, "bundle continues in next file");
        }

        let mut cursor = Cursor::new(current.data()?);
        cursor.set_position(position);
        let size = measure_stream(&mut cursor, u64::from(original_size))?;
        let location = ResourceLocation::Path {
            path: current.path.clone(),
            offset: current.offset + position,
            size: size as u32,
            logical_offset,
        };
        stored.push(StoredEntry::at(size, location));
        position = cursor.position();
    }

    let bundle_id = ctx.add_bundle(name, sb_id);
    ctx.add_binary_bundle(name, bundle_id, parsed, stored)
}

fn load_chunks(ctx: &LoadContext<'_>, data: &[u8], table_offset: u32, sb_id: SuperBundleId) -> Result<usize> {
    let mut cursor = Cursor::new(data);
    cursor.set_position(u64::from(table_offset));
    let count = le_i32(&mut cursor)?.max(0);
    cursor.set_position(cursor.position() + 4 * count as u64);

    for _ in 0..count {
        let record_offset = le_i32(&mut cursor)?;
        let mut record = Cursor::new(data);
        record.set_position(record_offset as u64);

        let id = Guid::from_bytes(<[u8; 16]>::read_options(&mut record, Endian::Little, ())?);
        let file_index = le_i32(&mut record)?;
        let offset = le_u32(&mut record)?;
        let size = le_u32(&mut record)?;

        let path = ctx
            .fs
            .cas_file_by_index(file_index as usize)
            .ok_or_else(|| StorageError::Invariant(format!("no CAS file with index {file_index}")))?;
        let location = ResourceLocation::Path {
            path: path.to_string(),
            offset: u64::from(offset),
            size,
            logical_offset: 0,
        };
        let asset = AssetInfo::new(ContentHash::ZERO, u64::from(size), 0).with_locations([location]);
        ctx.add_superbundle_chunk(ChunkEntry::new(id, 0, 0, asset), sb_id);
    }
    Ok(count as usize)
}
