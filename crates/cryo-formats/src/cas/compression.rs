//! Block payload codecs

use flate2::Compression;
use flate2::read::{ZlibDecoder, ZlibEncoder};
use std::io::Read;

use super::error::{CasError, CasResult};

/// Compression codec of a block, as tagged in its header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CompressionType {
    /// Stored verbatim
    None = 0x00,
    /// zlib stream
    ZLib = 0x02,
    /// Zstandard frame, optionally against a pretrained dictionary
    ZStd = 0x0F,
    /// LZ4 raw block
    LZ4 = 0x11,
    /// Oodle Kraken
    OodleKraken = 0x15,
    /// Oodle Selkie
    OodleSelkie = 0x19,
    /// Oodle Leviathan
    OodleLeviathan = 0x1D,
}

impl CompressionType {
    /// Parse a tag with the obfuscation bit already removed
    pub fn from_tag(tag: u8) -> CasResult<Self> {
        match tag {
            0x00 => Ok(Self::None),
            0x02 => Ok(Self::ZLib),
            0x0F => Ok(Self::ZStd),
            0x11 => Ok(Self::LZ4),
            0x15 => Ok(Self::OodleKraken),
            0x19 => Ok(Self::OodleSelkie),
            0x1D => Ok(Self::OodleLeviathan),
            other => Err(CasError::NotSupported(other)),
        }
    }

    /// Header tag value
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Short codec name for diagnostics
    pub fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::ZLib => "zlib",
            Self::ZStd => "zstd",
            Self::LZ4 => "lz4",
            Self::OodleKraken => "oodle-kraken",
            Self::OodleSelkie => "oodle-selkie",
            Self::OodleLeviathan => "oodle-leviathan",
        }
    }
}

fn codec_error(codec: CompressionType, reason: impl ToString) -> CasError {
    CasError::Compression {
        codec: codec.name(),
        reason: reason.to_string(),
    }
}

/// Decompress one payload into `out`, which has exactly the declared size
///
/// `zstd_dictionary` is used when `flags` is non-zero.
pub fn decompress_payload(
    compression: CompressionType,
    flags: u8,
    payload: &[u8],
    out: &mut [u8],
    zstd_dictionary: Option<&[u8]>,
) -> CasResult<()> {
    let written = match compression {
        CompressionType::None => {
            if payload.len() != out.len() {
                return Err(CasError::Corrupt(format!(
                    "stored block holds {} bytes, header declares {}",
                    payload.len(),
                    out.len()
                )));
            }
            out.copy_from_slice(payload);
            out.len()
        }
        CompressionType::ZLib => {
            let mut decoder = ZlibDecoder::new(payload);
            decoder
                .read_exact(out)
                .map_err(|e| codec_error(compression, e))?;
            out.len()
        }
        CompressionType::ZStd => {
            if flags == 0 {
                zstd::bulk::decompress_to_buffer(payload, out)
                    .map_err(|e| codec_error(compression, e))?
            } else {
                let dictionary = zstd_dictionary.ok_or_else(|| {
                    CasError::UnsupportedFeature(
                        "zstd block requires a dictionary but none is loaded".to_string(),
                    )
                })?;
                let mut decompressor = zstd::bulk::Decompressor::with_dictionary(dictionary)
                    .map_err(|e| codec_error(compression, e))?;
                decompressor
                    .decompress_to_buffer(payload, out)
                    .map_err(|e| codec_error(compression, e))?
            }
        }
        CompressionType::LZ4 => lz4_flex::block::decompress_into(payload, out)
            .map_err(|e| codec_error(compression, e))?,
        CompressionType::OodleKraken
        | CompressionType::OodleSelkie
        | CompressionType::OodleLeviathan => {
            let mut extractor = oozextract::Extractor::new();
            extractor
                .read_from_slice(payload, out)
                .map_err(|e| codec_error(compression, format!("{e:?}")))?;
            out.len()
        }
    };

    if written != out.len() {
        return Err(CasError::Corrupt(format!(
            "{} block produced {written} bytes, header declares {}",
            compression.name(),
            out.len()
        )));
    }
    Ok(())
}

/// Compress one payload
///
/// Oodle codecs are decode-only.
pub fn compress_payload(compression: CompressionType, data: &[u8]) -> CasResult<Vec<u8>> {
    match compression {
        CompressionType::None => Ok(data.to_vec()),
        CompressionType::ZLib => {
            let mut encoder = ZlibEncoder::new(data, Compression::default());
            let mut compressed = Vec::new();
            encoder
                .read_to_end(&mut compressed)
                .map_err(|e| codec_error(compression, e))?;
            Ok(compressed)
        }
        CompressionType::ZStd => {
            zstd::bulk::compress(data, 0).map_err(|e| codec_error(compression, e))
        }
        CompressionType::LZ4 => Ok(lz4_flex::block::compress(data)),
        CompressionType::OodleKraken
        | CompressionType::OodleSelkie
        | CompressionType::OodleLeviathan => Err(CasError::UnsupportedFeature(format!(
            "{} encoding",
            compression.name()
        ))),
    }
}
