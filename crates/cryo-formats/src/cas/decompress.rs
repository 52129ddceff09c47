//! Block stream decoding and encoding

use std::io::{self, Read, Seek, SeekFrom};

use cryo_crypto::{CAS_OBFUSCATION_KEY, CryptoError, deobfuscate};
use tracing::trace;

use super::compression::{CompressionType, compress_payload, decompress_payload};
use super::error::{CasError, CasResult};
use super::header::{
    BLOCK_HEADER_SIZE, BlockHeader, MAX_COMPRESSED_SIZE, MAX_DECOMPRESSED_SIZE, read_header,
};
use crate::block::ShiftBuffer;

/// Default amount of data per encoded block
pub const DEFAULT_BLOCK_SIZE: usize = 0x1_0000;

/// Title-dependent inputs to block decoding
#[derive(Debug, Clone, Copy, Default)]
pub struct DecodeOptions<'a> {
    allow_obfuscation: bool,
    obfuscation_key: Option<&'a [u8]>,
    zstd_dictionary: Option<&'a [u8]>,
}

impl<'a> DecodeOptions<'a> {
    /// Options for a title without obfuscation or dictionaries
    pub fn new() -> Self {
        Self::default()
    }

    /// Permit obfuscated blocks, deobfuscating them with `key` if present
    pub fn with_obfuscation(mut self, key: Option<&'a [u8]>) -> Self {
        self.allow_obfuscation = true;
        self.obfuscation_key = key;
        self
    }

    /// Dictionary for zstd blocks whose header flags are non-zero
    pub fn with_zstd_dictionary(mut self, dictionary: Option<&'a [u8]>) -> Self {
        self.zstd_dictionary = dictionary;
        self
    }

    fn obfuscation_key(&self) -> CasResult<&'a [u8]> {
        if !self.allow_obfuscation {
            return Err(CasError::UnsupportedFeature(
                "block obfuscation is not used by this title".to_string(),
            ));
        }
        self.obfuscation_key
            .ok_or_else(|| CryptoError::KeyNotFound(CAS_OBFUSCATION_KEY.to_string()).into())
    }
}

fn truncated(error: io::Error, produced: usize, expected: usize) -> CasError {
    if error.kind() == io::ErrorKind::UnexpectedEof {
        CasError::Corrupt(format!(
            "block stream ended after {produced} of {expected} bytes"
        ))
    } else {
        CasError::Io(error)
    }
}

/// Decode the payload of an already-read header into the window at the cursor
fn decode_payload<R: Read>(
    reader: &mut R,
    header: &BlockHeader,
    out: &mut ShiftBuffer,
    options: &DecodeOptions<'_>,
) -> CasResult<()> {
    let compression = header.compression()?;
    let payload_size = header.payload_size();
    let window = out.window_mut(header.decompressed_size as usize)?;

    if compression == CompressionType::None {
        // stored payloads are read straight into the output
        reader.read_exact(window)?;
        if header.is_obfuscated() {
            deobfuscate(window, options.obfuscation_key()?)?;
        }
    } else {
        let mut payload = vec![0u8; payload_size];
        reader.read_exact(&mut payload)?;
        if header.is_obfuscated() {
            deobfuscate(&mut payload, options.obfuscation_key()?)?;
        }
        decompress_payload(
            compression,
            header.flags,
            &payload,
            window,
            options.zstd_dictionary,
        )?;
    }

    out.shift(header.decompressed_size as usize)?;
    Ok(())
}

/// Read one block, appending it to `out` or discarding it when `out` is `None`
///
/// Returns the number of decompressed bytes the block describes.
pub(crate) fn read_block<R: Read>(
    reader: &mut R,
    out: Option<&mut ShiftBuffer>,
    options: &DecodeOptions<'_>,
) -> CasResult<usize> {
    let header = read_header(reader)?;
    trace!(
        tag = header.tag,
        flags = header.flags,
        decompressed = header.decompressed_size,
        compressed = header.compressed_size,
        "cas block"
    );

    match out {
        Some(out) => decode_payload(reader, &header, out, options)?,
        None => {
            let payload_size = header.payload_size() as u64;
            let skipped = io::copy(&mut reader.take(payload_size), &mut io::sink())?;
            if skipped != payload_size {
                return Err(CasError::Corrupt(format!(
                    "skipped block holds {skipped} of {payload_size} bytes"
                )));
            }
        }
    }

    Ok(header.decompressed_size as usize)
}

/// Read one block into a buffer of its own
pub(crate) fn read_block_owned<R: Read>(
    reader: &mut R,
    options: &DecodeOptions<'_>,
) -> CasResult<ShiftBuffer> {
    let header = read_header(reader)?;
    let mut block = ShiftBuffer::with_len(header.decompressed_size as usize);
    decode_payload(reader, &header, &mut block, options)?;
    block.reset_shift();
    Ok(block)
}

/// Decompress a block stream into exactly `original_size` bytes
///
/// Blocks are read until the output is full; any bytes after the final block
/// are left unread. A stream that ends early, or a block that would overrun
/// the output, is corrupt.
pub fn decompress_stream<R: Read>(
    reader: &mut R,
    original_size: usize,
    options: &DecodeOptions<'_>,
) -> CasResult<Vec<u8>> {
    let mut out = ShiftBuffer::with_len(original_size);
    let mut blocks = 0usize;

    while out.remaining() > 0 {
        let produced = out.shift_amount();
        read_block(reader, Some(&mut out), options)
            .map_err(|e| match e {
                CasError::Io(io) => truncated(io, produced, original_size),
                other => other,
            })?;
        blocks += 1;
    }

    trace!(blocks, original_size, "decompressed block stream");
    Ok(out.into_vec())
}

/// Decompress an in-memory block stream
pub fn decompress_slice(
    data: &[u8],
    original_size: usize,
    options: &DecodeOptions<'_>,
) -> CasResult<Vec<u8>> {
    let mut reader = data;
    decompress_stream(&mut reader, original_size, options)
}

/// Measure the stored size of a block stream producing `original_size` bytes
///
/// Walks block headers without decompressing, leaving the reader just past
/// the last block. The result counts headers and payloads.
pub fn measure_stream<R: Read + Seek>(reader: &mut R, original_size: u64) -> CasResult<u64> {
    let mut produced = 0u64;
    let mut stored = 0u64;

    while produced < original_size {
        let header = read_header(reader)?;
        let payload_size = header.payload_size() as u64;
        reader.seek(SeekFrom::Current(payload_size as i64))?;
        produced += u64::from(header.decompressed_size);
        stored += payload_size + BLOCK_HEADER_SIZE as u64;
    }

    if produced != original_size {
        return Err(CasError::Corrupt(format!(
            "block stream produces {produced} bytes, expected {original_size}"
        )));
    }
    Ok(stored)
}

/// Encode `data` as a single block
pub fn encode_block(data: &[u8], compression: CompressionType) -> CasResult<Vec<u8>> {
    if data.len() > MAX_DECOMPRESSED_SIZE as usize {
        return Err(CasError::Corrupt(format!(
            "block of {} bytes exceeds the header limit",
            data.len()
        )));
    }

    let payload = compress_payload(compression, data)?;
    if payload.len() > MAX_COMPRESSED_SIZE as usize {
        return Err(CasError::Corrupt(format!(
            "compressed block of {} bytes exceeds the header limit",
            payload.len()
        )));
    }

    let header = BlockHeader::new(compression, 0, data.len() as u32, payload.len() as u32);
    let mut block = Vec::with_capacity(BLOCK_HEADER_SIZE + payload.len());
    block.extend_from_slice(&header.to_packed().to_be_bytes());
    block.extend_from_slice(&payload);
    Ok(block)
}

/// Encode `data` as a stream of blocks of at most `block_size` bytes each
pub fn encode_stream(
    data: &[u8],
    block_size: usize,
    compression: CompressionType,
) -> CasResult<Vec<u8>> {
    let block_size = block_size.clamp(1, MAX_COMPRESSED_SIZE as usize);
    let mut stream = Vec::new();
    for chunk in data.chunks(block_size) {
        stream.extend_from_slice(&encode_block(chunk, compression)?);
    }
    Ok(stream)
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cas::header::OBFUSCATED_BIT;
    use cryo_crypto::OBFUSCATION_KEY_PERIOD;
    use proptest::prelude::*;
    use std::io::Cursor;

    fn obfuscated_block(data: &[u8], key: &[u8]) -> Vec<u8> {
        let header = BlockHeader {
            flags: 0,
            decompressed_size: data.len() as u32,
            tag: OBFUSCATED_BIT,
            compressed_size: data.len() as u32,
        };
        let mut payload = data.to_vec();
        deobfuscate(&mut payload, key).unwrap();
        let mut block = header.to_packed().to_be_bytes().to_vec();
        block.extend_from_slice(&payload);
        block
    }

    #[test]
    fn test_mixed_codecs_in_one_stream() {
        let first: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        let second = vec![0xAB; 700];
        let mut stream = encode_block(&first, CompressionType::ZLib).unwrap();
        stream.extend(encode_block(&second, CompressionType::LZ4).unwrap());
        stream.extend(encode_block(b"tail", CompressionType::None).unwrap());

        let out = decompress_slice(&stream, 1704, &DecodeOptions::new()).unwrap();
        assert_eq!(&out[..1000], &first[..]);
        assert_eq!(&out[1000..1700], &second[..]);
        assert_eq!(&out[1700..], b"tail");
    }

    #[test]
    fn test_truncated_stream_is_corrupt() {
        let stream = encode_block(b"abcdef", CompressionType::None).unwrap();
        let err = decompress_slice(&stream[..10], 6, &DecodeOptions::new()).unwrap_err();
        assert!(err.is_corruption(), "{err}");

        let err = decompress_slice(&stream, 12, &DecodeOptions::new()).unwrap_err();
        assert!(matches!(err, CasError::Corrupt(_)), "{err}");
    }

    #[test]
    fn test_block_overrunning_output_is_corrupt() {
        let stream = encode_block(b"abcdef", CompressionType::None).unwrap();
        let err = decompress_slice(&stream, 4, &DecodeOptions::new()).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_unknown_codec_not_supported() {
        let header = BlockHeader {
            flags: 0,
            decompressed_size: 4,
            tag: 0x07,
            compressed_size: 4,
        };
        let mut stream = header.to_packed().to_be_bytes().to_vec();
        stream.extend_from_slice(b"abcd");
        assert!(matches!(
            decompress_slice(&stream, 4, &DecodeOptions::new()),
            Err(CasError::NotSupported(0x07))
        ));
    }

    #[test]
    fn test_obfuscation_requires_profile_and_key() {
        let key: Vec<u8> = (0..OBFUSCATION_KEY_PERIOD).map(|i| (i * 13) as u8).collect();
        let data = b"obfuscated payload".to_vec();
        let stream = obfuscated_block(&data, &key);

        let err = decompress_slice(&stream, data.len(), &DecodeOptions::new()).unwrap_err();
        assert!(err.is_unsupported());

        let err = decompress_slice(
            &stream,
            data.len(),
            &DecodeOptions::new().with_obfuscation(None),
        )
        .unwrap_err();
        assert!(matches!(err, CasError::Crypto(CryptoError::KeyNotFound(_))));

        let out = decompress_slice(
            &stream,
            data.len(),
            &DecodeOptions::new().with_obfuscation(Some(&key)),
        )
        .unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_measure_stream() {
        let data = vec![7u8; 300];
        let mut stream = encode_stream(&data, 128, CompressionType::ZLib).unwrap();
        let stored = stream.len() as u64;
        stream.extend_from_slice(b"next entry");

        let mut cursor = Cursor::new(stream);
        assert_eq!(measure_stream(&mut cursor, 300).unwrap(), stored);
        assert_eq!(cursor.position(), stored);
    }

    #[test]
    fn test_zero_size_reads_nothing() {
        let out = decompress_slice(&[], 0, &DecodeOptions::new()).unwrap();
        assert!(out.is_empty());
    }

    proptest! {
        #[test]
        fn uncompressed_framing_round_trip(
            data in prop::collection::vec(any::<u8>(), 0..40_000),
            block_size in 1usize..20_000,
        ) {
            let stream = encode_stream(&data, block_size, CompressionType::None)
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            let out = decompress_slice(&stream, data.len(), &DecodeOptions::new())
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            prop_assert_eq!(out, data);
        }
    }
}
