//! CAS block payloads
//!
//! Every payload stored in a CAS archive (and every entry in a non-CAS
//! superbundle) is a stream of self-describing blocks. Each block carries a
//! packed header naming its codec and sizes, so a payload can be decoded
//! knowing only its final size.
//!
//! # Features
//!
//! - Block header codec with sentinel validation
//! - Codecs: none, zlib, zstd (with dictionary), LZ4, Oodle Kraken/Selkie/Leviathan
//! - XOR obfuscation for the titles that use it
//! - Delta decompression of patched payloads against their base
//! - Stored-size measurement without decompression
//! - Block and stream encoders for building archives

mod compression;
mod decompress;
mod delta;
mod error;
mod header;

pub use compression::{CompressionType, compress_payload, decompress_payload};
pub use decompress::{
    DEFAULT_BLOCK_SIZE, DecodeOptions, decompress_slice, decompress_stream, encode_block,
    encode_stream, measure_stream,
};
pub use delta::{DeltaOp, decompress_delta};
pub use error::{CasError, CasResult};
pub use header::{
    BLOCK_HEADER_SIZE, BLOCK_SENTINEL, BlockHeader, MAX_COMPRESSED_SIZE, MAX_DECOMPRESSED_SIZE,
    OBFUSCATED_BIT,
};
