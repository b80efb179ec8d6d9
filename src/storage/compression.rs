//! Record compression for the container backend
//!
//! Each container record carries a one-byte codec id, so files written with
//! compression stay readable by any build that has the codec compiled in.
//! LZ4/ZSTD are only available with the `compression` feature.

use crate::{Error, Result};

/// Compression algorithm for container records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    /// Store records as-is (default)
    #[default]
    None,
    /// LZ4 - fast compression, good for frequent small appends
    Lz4,
    /// ZSTD - better ratio, slower
    Zstd,
}

impl Compression {
    /// Get algorithm name as string
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Lz4 => "lz4",
            Self::Zstd => "zstd",
        }
    }

    /// Codec id written in each record header.
    #[must_use]
    pub const fn codec_id(&self) -> u8 {
        match self {
            Self::None => 0,
            Self::Lz4 => 1,
            Self::Zstd => 2,
        }
    }

    /// Algorithm for a record's codec id.
    #[must_use]
    pub const fn from_codec_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Self::None),
            1 => Some(Self::Lz4),
            2 => Some(Self::Zstd),
            _ => None,
        }
    }

    /// Check whether this build can encode and decode the codec.
    #[must_use]
    pub const fn is_available(&self) -> bool {
        matches!(self, Self::None) || cfg!(feature = "compression")
    }

    /// Compress data using this algorithm
    ///
    /// # Errors
    /// Returns error if compression fails or the codec is not compiled in
    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.is_empty() || *self == Self::None {
            return Ok(data.to_vec());
        }
        self.encode(data)
    }

    /// Decompress data using this algorithm
    ///
    /// # Errors
    /// Returns error if decompression fails (e.g., corrupted data)
    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.is_empty() || *self == Self::None {
            return Ok(data.to_vec());
        }
        self.decode(data)
    }

    #[cfg(feature = "compression")]
    fn encode(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Self::None => Ok(data.to_vec()),
            Self::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
            Self::Zstd => zstd::encode_all(data, 3)
                .map_err(|e| Error::Storage(format!("ZSTD compression failed: {e}"))),
        }
    }

    #[cfg(feature = "compression")]
    fn decode(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Self::None => Ok(data.to_vec()),
            Self::Lz4 => lz4_flex::decompress_size_prepended(data)
                .map_err(|e| Error::Storage(format!("LZ4 decompression failed: {e}"))),
            Self::Zstd => zstd::decode_all(data)
                .map_err(|e| Error::Storage(format!("ZSTD decompression failed: {e}"))),
        }
    }

    #[cfg(not(feature = "compression"))]
    fn encode(&self, _data: &[u8]) -> Result<Vec<u8>> {
        Err(self.unavailable())
    }

    #[cfg(not(feature = "compression"))]
    fn decode(&self, _data: &[u8]) -> Result<Vec<u8>> {
        Err(self.unavailable())
    }

    #[cfg(not(feature = "compression"))]
    fn unavailable(&self) -> Error {
        Error::Storage(format!(
            "{} codec requires the `compression` feature",
            self.as_str()
        ))
    }
}
