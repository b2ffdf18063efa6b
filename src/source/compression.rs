//! Decompression codecs for input files.

use std::io::Read;

use crate::config::CompressionFormat;

/// A codec that turns a fetched object into raw JSON bytes.
pub trait CompressionCodec: Send + Sync {
    /// Decompress the whole object into memory.
    fn decompress(&self, data: &[u8]) -> std::io::Result<Vec<u8>>;

    /// Human-readable name of this codec (for logging).
    fn name(&self) -> &'static str;
}

/// Gzip compression codec using flate2.
#[derive(Debug, Clone, Copy, Default)]
pub struct GzipCodec;

impl CompressionCodec for GzipCodec {
    fn decompress(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        flate2::read::MultiGzDecoder::new(data).read_to_end(&mut buf)?;
        Ok(buf)
    }

    fn name(&self) -> &'static str {
        "gzip"
    }
}

/// Zstandard compression codec using zstd.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZstdCodec;

impl CompressionCodec for ZstdCodec {
    fn decompress(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        zstd::stream::decode_all(data)
    }

    fn name(&self) -> &'static str {
        "zstd"
    }
}

/// Pass-through codec for plain JSON files.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCodec;

impl CompressionCodec for NoopCodec {
    fn decompress(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn name(&self) -> &'static str {
        "none"
    }
}

impl CompressionFormat {
    /// The codec that reads files in this format.
    pub fn codec(&self) -> &'static dyn CompressionCodec {
        match self {
            CompressionFormat::None => &NoopCodec,
            CompressionFormat::Gzip => &GzipCodec,
            CompressionFormat::Zstd => &ZstdCodec,
        }
    }
}
