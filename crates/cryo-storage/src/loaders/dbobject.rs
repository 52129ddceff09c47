//! DbObject superbundles
//!
//! The TOC is a DbObject dict:
//!
//! ```text
//! cas      bool   bundle payloads live in CAS archives
//! das      bool   bundles are a dict of parallel name/offset/size lists
//! bundles  list   {id, offset, size, delta, base}
//! chunks   list   {id, sha1, offset, size}
//! ```
//!
//! A CAS superbundle stores one DbObject dict per bundle in the `.sb` file,
//! listing `ebx`, `res` and `chunks` with their hashes; locations come from
//! the catalogs. A non-CAS superbundle stores a binary bundle followed by the
//! block streams of its entries, in entry order. Delta bundles rebuild their
//! binary header against the base layer's bundle of the same name.

use std::collections::HashMap;
use std::io::Cursor;

use cryo_crypto::{ContentHash, Guid, hash_string};
use cryo_formats::bundle::{bundle_len, is_delta_bundle, rebuild_delta_bundle};
use cryo_formats::cas::measure_stream;
use cryo_formats::dbobject::{DbDict, DbReader, DbValue, read_dict};
use tracing::{debug, trace};

use super::{
    AssetLoader, LoadContext, StoredEntry, SuperBundleLoad, chunk_stream_size, find_toc,
    read_toc,
};
use crate::archive::SuperBundleFiles;
use crate::assets::{AssetInfo, BundleId, ChunkEntry, EbxEntry, ResEntry, SuperBundleId};
use crate::file_info::ResourceLocation;
use crate::install_chunk::SuperBundleInfo;
use crate::layout::{BundleFormat, Layer};
use crate::{Result, StorageError};

/// Loader for DbObject TOCs
#[derive(Debug, Clone, Copy, Default)]
pub struct DbObjectLoader;

#[derive(Debug, Clone)]
struct TocBundle {
    name: String,
    offset: u64,
    size: u64,
    layer: Layer,
    is_delta: bool,
    is_cas: bool,
}

impl AssetLoader for DbObjectLoader {
    fn format(&self) -> BundleFormat {
        BundleFormat::Dynamic2018
    }

    fn load_superbundle(
        &self,
        ctx: &LoadContext<'_>,
        superbundle: &SuperBundleInfo,
    ) -> Result<SuperBundleLoad> {
        let mut outcome = SuperBundleLoad::default();
        let sb_name = superbundle.name.as_str();
        let Some(source) = find_toc(ctx.fs, sb_name) else {
            trace!(superbundle = sb_name, "no toc");
            return Ok(outcome);
        };
        let Some(data) = read_toc(ctx.fs, source.layer, sb_name)? else {
            return Ok(outcome);
        };
        let toc = read_dict(&data)?;
        let sb_id = ctx.add_superbundle(sb_name);

        let is_cas = toc.get_or("cas", false)?;
        outcome.chunks = load_toc_chunks(ctx, &toc, sb_name, source.layer, is_cas, sb_id)?;

        let bundles = toc_bundles(&toc, sb_name, source.layer, is_cas)?;
        let base_bundles = if bundles.iter().any(|b| b.is_delta) {
            base_bundles(ctx, sb_name)?
        } else {
            HashMap::new()
        };

        let mut files = SuperBundleFiles::new(ctx.fs);
        let mut base_files = SuperBundleFiles::new(ctx.fs);
        for bundle in &bundles {
            let result = if bundle.is_delta {
                let base = base_bundles.get(&hash_string(&bundle.name, true));
                load_delta_bundle(ctx, &mut files, &mut base_files, sb_name, sb_id, bundle, base)
            } else if bundle.is_cas {
                load_cas_bundle(ctx, &mut files, sb_name, sb_id, bundle)
            } else {
                load_inline_bundle(ctx, &mut files, sb_name, sb_id, bundle)
            };
            outcome.finish_bundle(sb_name, &bundle.name, result)?;
        }

        debug!(
            superbundle = sb_name,
            layer = ?source.layer,
            bundles = outcome.bundles,
            chunks = outcome.chunks,
            skipped = outcome.skipped.len(),
            "loaded superbundle"
        );
        Ok(outcome)
    }
}

fn toc_bundles(toc: &DbDict, sb_name: &str, layer: Layer, is_cas: bool) -> Result<Vec<TocBundle>> {
    let mut bundles = Vec::new();
    let Some(value) = toc.get("bundles") else {
        return Ok(bundles);
    };

    if toc.get_or("das", false)? {
        let das = value.to::<&DbDict>("bundles")?;
        let names: &[DbValue] = das.require("names")?;
        let offsets: &[DbValue] = das.require("offsets")?;
        let sizes: &[DbValue] = das.require("sizes")?;
        if offsets.len() != names.len() || sizes.len() != names.len() {
            return Err(StorageError::corrupt(
                sb_name,
                "das bundle lists differ in length",
            ));
        }
        for ((name, offset), size) in names.iter().zip(offsets).zip(sizes) {
            bundles.push(TocBundle {
                name: name.to::<&str>("names")?.to_string(),
                offset: offset.to("offsets")?,
                size: size.to("sizes")?,
                layer,
                is_delta: false,
                is_cas,
            });
        }
        return Ok(bundles);
    }

    for entry in value.to::<&[DbValue]>("bundles")? {
        let info = entry.to::<&DbDict>("bundles")?;
        let is_base: bool = info.get_or("base", false)?;
        bundles.push(TocBundle {
            name: info.require::<&str>("id")?.to_string(),
            offset: info.require("offset")?,
            size: info.require("size")?,
            // a patch TOC can point back at bundles left in the base superbundle
            layer: if is_base { Layer::Base } else { layer },
            is_delta: info.get_or("delta", false)?,
            is_cas,
        });
    }
    Ok(bundles)
}

/// Bundles of the base-layer TOC by lowercase name hash
fn base_bundles(ctx: &LoadContext<'_>, sb_name: &str) -> Result<HashMap<i32, TocBundle>> {
    let Some(data) = read_toc(ctx.fs, Layer::Base, sb_name)? else {
        return Ok(HashMap::new());
    };
    let toc = read_dict(&data)?;
    let is_cas = toc.get_or("cas", false)?;
    Ok(toc_bundles(&toc, sb_name, Layer::Base, is_cas)?
        .into_iter()
        .map(|bundle| (hash_string(&bundle.name, true), bundle))
        .collect())
}

fn load_toc_chunks(
    ctx: &LoadContext<'_>,
    toc: &DbDict,
    sb_name: &str,
    layer: Layer,
    is_cas: bool,
    sb_id: SuperBundleId,
) -> Result<usize> {
    let Some(chunks) = toc.opt::<&[DbValue]>("chunks")? else {
        return Ok(0);
    };
    let path = format!("{}/{sb_name}.sb", layer.prefix());

    for value in chunks {
        let chunk = value.to::<&DbDict>("chunks")?;
        let id: Guid = chunk.require("id")?;
        let sha1 = chunk.get_or("sha1", ContentHash::ZERO)?;

        let (size, locations) = if is_cas {
            let size = ctx.resource_size(&sha1).unwrap_or(0);
            (u64::from(size), ctx.file_infos(&sha1))
        } else {
            let size: u32 = chunk.require("size")?;
            let location = ResourceLocation::Path {
                path: path.clone(),
                offset: u64::from(chunk.require::<u32>("offset")?),
                size,
                logical_offset: 0,
            };
            (u64::from(size), vec![location])
        };

        let asset = AssetInfo::new(sha1, size, 0).with_locations(locations);
        ctx.add_superbundle_chunk(ChunkEntry::new(id, 0, 0, asset), sb_id);
    }
    Ok(chunks.len())
}

fn open_tail<'f>(
    files: &'f mut SuperBundleFiles<'_>,
    layer: Layer,
    sb_name: &str,
    bundle: &TocBundle,
) -> Result<&'f [u8]> {
    let file = files.open(layer, sb_name)?.ok_or_else(|| {
        StorageError::NotFound(format!("{}/{sb_name}.sb", layer.prefix()))
    })?;
    file.tail(bundle.offset)
}

/// Binary bundle followed by its entries' block streams
fn load_inline_bundle(
    ctx: &LoadContext<'_>,
    files: &mut SuperBundleFiles<'_>,
    sb_name: &str,
    sb_id: SuperBundleId,
    bundle: &TocBundle,
) -> Result<()> {
    let data = open_tail(files, bundle.layer, sb_name, bundle)?;
    let parsed = ctx.parse_bundle(data)?;
    let path = format!("{}/{sb_name}.sb", bundle.layer.prefix());

    let mut cursor = Cursor::new(data);
    cursor.set_position(bundle_len(data)? as u64);

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
        let start = cursor.position();
        let size = measure_stream(&mut cursor, u64::from(original_size))?;
        let location = ResourceLocation::Path {
            path: path.clone(),
            offset: bundle.offset + start,
            size: size as u32,
            logical_offset,
        };
        stored.push(StoredEntry::at(size, location));
    }

    if cursor.position() != bundle.size {
        return Err(StorageError::corrupt(
            &bundle.name,
            format!(
                "entries end at {}, bundle size is {}",
                cursor.position(),
                bundle.size
            ),
        ));
    }

    let bundle_id = ctx.add_bundle(&bundle.name, sb_id);
    ctx.add_binary_bundle(&bundle.name, bundle_id, parsed, stored)
}

/// Bundle header rebuilt from a delta against the base layer
///
/// Entries of a delta bundle carry no locations.
fn load_delta_bundle(
    ctx: &LoadContext<'_>,
    files: &mut SuperBundleFiles<'_>,
    base_files: &mut SuperBundleFiles<'_>,
    sb_name: &str,
    sb_id: SuperBundleId,
    bundle: &TocBundle,
    base: Option<&TocBundle>,
) -> Result<()> {
    let delta = open_tail(files, bundle.layer, sb_name, bundle)?;
    if !is_delta_bundle(delta) {
        return Err(StorageError::corrupt(&bundle.name, "delta bundle magic missing"));
    }
    let base = match base {
        Some(base) => Some(open_tail(base_files, Layer::Base, sb_name, base)?),
        None => None,
    };

    let rebuilt = rebuild_delta_bundle(delta, base)?;
    let parsed = ctx.parse_bundle(&rebuilt)?;
    let stored = vec![StoredEntry::default(); parsed.entry_count()];

    let bundle_id = ctx.add_bundle(&bundle.name, sb_id);
    ctx.add_binary_bundle(&bundle.name, bundle_id, parsed, stored)
}

/// DbObject bundle whose payloads live in CAS archives
fn load_cas_bundle(
    ctx: &LoadContext<'_>,
    files: &mut SuperBundleFiles<'_>,
    sb_name: &str,
    sb_id: SuperBundleId,
    bundle: &TocBundle,
) -> Result<()> {
    let data = open_tail(files, bundle.layer, sb_name, bundle)?;
    let mut reader = DbReader::new(data);
    let document = reader.read_value()?;
    if reader.position() as u64 != bundle.size {
        return Err(StorageError::corrupt(
            &bundle.name,
            format!(
                "document ends at {}, bundle size is {}",
                reader.position(),
                bundle.size
            ),
        ));
    }
    let dict = document
        .as_dict()
        .ok_or_else(|| StorageError::corrupt(&bundle.name, "bundle is not a dict"))?;

    let bundle_id = ctx.add_bundle(&bundle.name, sb_id);
    add_cas_entries(ctx, dict, bundle_id)
}

fn entry_locations(ctx: &LoadContext<'_>, entry: &DbDict, sha1: &ContentHash) -> Result<Vec<ResourceLocation>> {
    if entry.get_or("casPatchType", 0i32)? == 2 {
        let base: ContentHash = entry.require("baseSha1")?;
        let delta: ContentHash = entry.require("deltaSha1")?;
        ctx.patch_file_infos(sha1, &delta, &base)
    } else {
        Ok(ctx.file_infos(sha1))
    }
}

fn asset_info(ctx: &LoadContext<'_>, entry: &DbDict, original_size: u64) -> Result<AssetInfo> {
    let sha1: ContentHash = entry.get_or("sha1", ContentHash::ZERO)?;
    let size: u64 = entry.get_or("size", 0)?;
    let locations = entry_locations(ctx, entry, &sha1)?;
    Ok(AssetInfo::new(sha1, size, original_size).with_locations(locations))
}

fn add_cas_entries(ctx: &LoadContext<'_>, bundle: &DbDict, bundle_id: BundleId) -> Result<()> {
    for value in bundle.opt::<&[DbValue]>("ebx")?.unwrap_or(&[]) {
        let ebx = value.to::<&DbDict>("ebx")?;
        let asset = asset_info(ctx, ebx, ebx.get_or("originalSize", 0)?)?;
        ctx.add_ebx(EbxEntry::new(ebx.require::<&str>("name")?, asset), bundle_id);
    }

    for value in bundle.opt::<&[DbValue]>("res")?.unwrap_or(&[]) {
        let res = value.to::<&DbDict>("res")?;
        let asset = asset_info(ctx, res, res.get_or("originalSize", 0)?)?;
        let res_type: u32 = res.get_or("resType", 0)?;
        let res_rid: u64 = res.get_or("resRid", 0)?;
        let res_meta: &[u8] = res.get_or("resMeta", &[][..])?;
        ctx.add_res(
            ResEntry::new(res.require::<&str>("name")?, res_type, res_rid, res_meta.to_vec(), asset),
            bundle_id,
        );
    }

    for value in bundle.opt::<&[DbValue]>("chunks")?.unwrap_or(&[]) {
        let chunk = value.to::<&DbDict>("chunks")?;
        let logical_offset: u32 = chunk.get_or("logicalOffset", 0)?;
        let logical_size: u32 = chunk.get_or("logicalSize", 0)?;
        let original_size = chunk_stream_size(logical_offset, logical_size);
        let asset = asset_info(ctx, chunk, u64::from(original_size))?;
        ctx.add_chunk(
            ChunkEntry::new(chunk.require("id")?, logical_offset, logical_size, asset),
            bundle_id,
        );
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::GameProfile;
    use crate::testing::{GameDir, Harness};
    use cryo_formats::bundle::{BinaryBundleBuilder, BundleDeltaOp, DELTA_BUNDLE_MAGIC, SALT_PECM};
    use cryo_formats::cas::{CompressionType, encode_stream};
    use cryo_formats::catalog::{CatalogBuilder, CatalogLayout};
    use cryo_formats::dbobject::DbWriter;
    use pretty_assertions::assert_eq;

    const SB: &str = "win32/ui";

    fn superbundle() -> SuperBundleInfo {
        SuperBundleInfo::new(SB)
    }

    fn bundle_entry(name: &str, offset: usize, size: usize) -> DbValue {
        DbValue::Dict(
            DbDict::new()
                .with("id", name)
                .with("offset", offset as i64)
                .with("size", size as i64),
        )
    }

    /// Binary bundle with one EBX and one chunk followed by their streams
    fn inline_bundle() -> (Vec<u8>, Vec<u8>, Vec<u8>) {
        let ebx = b"ebx payload bytes".to_vec();
        let chunk = vec![7u8; 40];
        let mut data = BinaryBundleBuilder::new(SALT_PECM)
            .add_ebx("ui/hud", ContentHash::from_data(&ebx), ebx.len() as u32)
            .add_chunk(Guid::from_bytes([3; 16]), ContentHash::from_data(&chunk), 0, chunk.len() as u32)
            .build(None)
            .unwrap();
        data.extend(encode_stream(&ebx, 8, CompressionType::None).unwrap());
        data.extend(encode_stream(&chunk, 64, CompressionType::None).unwrap());
        (data, ebx, chunk)
    }

    #[test]
    fn test_inline_bundles() {
        let game = GameDir::new(&[SB]);
        let (bundle, ebx, chunk) = inline_bundle();
        let mut sb = vec![0u8; 16];
        sb.extend_from_slice(&bundle);
        let toc = DbDict::new()
            .with("bundles", DbValue::List(vec![bundle_entry("ui/hud_bundle", 16, bundle.len())]))
            .with(
                "chunks",
                DbValue::List(vec![DbValue::Dict(
                    DbDict::new()
                        .with("id", Guid::from_bytes([9; 16]))
                        .with("offset", 0)
                        .with("size", 16),
                )]),
            );
        game.write_document("Data", "win32/ui.toc", &DbValue::Dict(toc));
        game.write("Data", "win32/ui.sb", &sb);

        let harness = Harness::new(&game, GameProfile::new("t", 2015));
        let outcome = DbObjectLoader
            .load_superbundle(&harness.context(), &superbundle())
            .unwrap();
        assert_eq!(outcome.bundles, 1);
        assert_eq!(outcome.chunks, 1);
        assert!(outcome.skipped.is_empty());

        let catalog = harness.catalog.lock();
        let entry = catalog.ebx("UI/HUD").unwrap();
        assert_eq!(entry.asset.original_size, ebx.len() as u64);
        let read = harness.context().read;
        assert_eq!(read.decompress(&entry.asset.locations[0], ebx.len()).unwrap(), ebx);

        let stored = catalog.chunk(Guid::from_bytes([3; 16])).unwrap();
        assert_eq!(read.decompress(&stored.asset.locations[0], chunk.len()).unwrap(), chunk);
        assert!(catalog.chunk(Guid::from_bytes([9; 16])).unwrap().superbundles.len() == 1);
    }

    #[test]
    fn test_size_mismatch_skips_bundle() {
        let game = GameDir::new(&[SB]);
        let (bundle, _, _) = inline_bundle();
        let toc = DbDict::new().with(
            "bundles",
            DbValue::List(vec![
                bundle_entry("bad", 0, bundle.len() + 4),
                bundle_entry("good", 0, bundle.len()),
            ]),
        );
        game.write_document("Data", "win32/ui.toc", &DbValue::Dict(toc));
        game.write("Data", "win32/ui.sb", &bundle);

        let harness = Harness::new(&game, GameProfile::new("t", 2015));
        let outcome = DbObjectLoader
            .load_superbundle(&harness.context(), &superbundle())
            .unwrap();
        assert_eq!(outcome.bundles, 1);
        assert_eq!(outcome.skipped.len(), 1);
        assert!(outcome.skipped[0].error.is_corruption());
        assert!(harness.catalog.lock().bundle_id("bad").is_none());
    }

    #[test]
    fn test_cas_bundle_with_catalog() {
        let game = GameDir::new(&[SB]);
        let payload = b"resource bytes".to_vec();
        let stream = encode_stream(&payload, 64, CompressionType::None).unwrap();
        let sha1 = ContentHash::from_data(&payload);
        let mut cas = vec![0u8; 32];
        cas.extend_from_slice(&stream);
        game.write("Data", "cas_01.cas", &cas);
        game.write(
            "Data",
            "cas.cat",
            &CatalogBuilder::new(CatalogLayout::Counted)
                .resource(sha1, 1, 32, stream.len() as u32)
                .build()
                .unwrap(),
        );

        let bundle = DbWriter::write_document(&DbValue::Dict(
            DbDict::new().with(
                "res",
                DbValue::List(vec![DbValue::Dict(
                    DbDict::new()
                        .with("name", "textures/logo")
                        .with("sha1", sha1)
                        .with("size", stream.len() as i64)
                        .with("originalSize", payload.len() as i64)
                        .with("resType", 0x5C4954A6_u32 as i32)
                        .with("resRid", 42i64)
                        .with("resMeta", vec![1u8; 16]),
                )]),
            ),
        ));
        let toc = DbDict::new()
            .with("cas", true)
            .with("bundles", DbValue::List(vec![bundle_entry("ui", 0, bundle.len())]));
        game.write_document("Data", "win32/ui.toc", &DbValue::Dict(toc));
        game.write("Data", "win32/ui.sb", &bundle);

        let harness = Harness::new(&game, GameProfile::new("t", 2017));
        DbObjectLoader
            .load_superbundle(&harness.context(), &superbundle())
            .unwrap();

        let catalog = harness.catalog.lock();
        let res = catalog.res_by_rid(42).unwrap();
        assert_eq!(res.res_type, 0x5C4954A6);
        let read = harness.context().read;
        assert_eq!(read.decompress(&res.asset.locations[0], payload.len()).unwrap(), payload);
    }

    #[test]
    fn test_delta_bundle() {
        let game = GameDir::new(&[SB]);
        game.add_patch(&[SB]);
        let base = BinaryBundleBuilder::new(SALT_PECM)
            .add_ebx("a", ContentHash::from_data(b"a"), 1)
            .build(None)
            .unwrap();
        let patched = BinaryBundleBuilder::new(SALT_PECM)
            .add_ebx("a", ContentHash::from_data(b"a"), 1)
            .add_ebx("b", ContentHash::from_data(b"b"), 2)
            .build(None)
            .unwrap();

        // replace the whole base body with the patched body
        let mut region = ((patched.len() - 4) as u32).to_be_bytes().to_vec();
        region.extend_from_slice(&BundleDeltaOp::SkipBase((base.len() - 4) as u32).encode().to_be_bytes());
        region.extend_from_slice(&BundleDeltaOp::CopyDelta((patched.len() - 4) as u32).encode().to_be_bytes());
        region.extend_from_slice(&patched[4..]);
        let mut delta = DELTA_BUNDLE_MAGIC.to_le_bytes().to_vec();
        delta.extend_from_slice(&(region.len() as u32).to_be_bytes());
        delta.extend_from_slice(&0u32.to_be_bytes());
        delta.extend_from_slice(&region);

        let base_toc = DbDict::new().with("bundles", DbValue::List(vec![bundle_entry("ui", 0, base.len())]));
        game.write_document("Data", "win32/ui.toc", &DbValue::Dict(base_toc));
        game.write("Data", "win32/ui.sb", &base);

        let patch_bundle = DbDict::new()
            .with("id", "ui")
            .with("offset", 0i64)
            .with("size", delta.len() as i64)
            .with("delta", true);
        let patch_toc = DbDict::new().with("bundles", DbValue::List(vec![DbValue::Dict(patch_bundle)]));
        game.write_document("Patch", "win32/ui.toc", &DbValue::Dict(patch_toc));
        game.write("Patch", "win32/ui.sb", &delta);

        let harness = Harness::new(&game, GameProfile::new("t", 2015));
        let outcome = DbObjectLoader
            .load_superbundle(&harness.context(), &superbundle())
            .unwrap();
        assert_eq!(outcome.bundles, 1, "{:?}", outcome.skipped);

        let catalog = harness.catalog.lock();
        assert_eq!(catalog.ebx_count(), 2);
        assert_eq!(catalog.ebx("b").unwrap().asset.original_size, 2);
        assert!(catalog.ebx("b").unwrap().asset.locations.is_empty());
    }

    #[test]
    fn test_das_bundles() {
        let toc = DbDict::new().with("das", true).with(
            "bundles",
            DbDict::new()
                .with("names", DbValue::List(vec!["a".into(), "b".into()]))
                .with("offsets", DbValue::List(vec![0.into(), 100.into()]))
                .with("sizes", DbValue::List(vec![100.into(), 50.into()])),
        );
        let bundles = toc_bundles(&toc, SB, Layer::Base, false).unwrap();
        assert_eq!(bundles.len(), 2);
        assert_eq!(bundles[1].offset, 100);
        assert_eq!(bundles[1].size, 50);

        let broken = DbDict::new().with("das", true).with(
            "bundles",
            DbDict::new()
                .with("names", DbValue::List(vec!["a".into()]))
                .with("offsets", DbValue::List(vec![]))
                .with("sizes", DbValue::List(vec![])),
        );
        assert!(toc_bundles(&broken, SB, Layer::Base, false).is_err());
    }

    #[test]
    fn test_missing_toc_is_empty() {
        let game = GameDir::new(&[SB]);
        let harness = Harness::new(&game, GameProfile::new("t", 2015));
        let outcome = DbObjectLoader
            .load_superbundle(&harness.context(), &superbundle())
            .unwrap();
        assert_eq!(outcome.bundles, 0);
        assert_eq!(harness.catalog.lock().superbundle_count(), 0);
    }
}
