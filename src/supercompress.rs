//! Supercompression decoding for level payloads
//!
//! Handles the generic compression layer applied before any
//! texture-format-specific decoding: pass-through for scheme `none`,
//! Zstandard for scheme `zstd`. The zstd decompressor is created once
//! on first use and reused for every subsequent level; the service is
//! constructed explicitly and owned by the decoder rather than living
//! in a hidden global.

use once_cell::sync::OnceCell;
use std::sync::Mutex;
use tracing::debug;
use zstd::bulk::Decompressor;

use crate::container::{Level, SupercompressionScheme};
use crate::error::DecodeError;

/// Reverses the supercompression layer on a level payload.
pub struct SupercompressionDecoder {
    zstd: OnceCell<Mutex<Decompressor<'static>>>,
}

impl SupercompressionDecoder {
    pub const fn new() -> Self {
        Self {
            zstd: OnceCell::new(),
        }
    }

    /// Decode one level according to the container's scheme.
    ///
    /// The output length must match the level's declared
    /// `uncompressed_byte_length`; anything else is data corruption.
    pub fn decode(
        &self,
        level: &Level,
        scheme: SupercompressionScheme,
    ) -> Result<Vec<u8>, DecodeError> {
        match scheme {
            SupercompressionScheme::None => Ok(level.data.clone()),
            SupercompressionScheme::Zstd => self.decode_zstd(level),
            SupercompressionScheme::BasisLz => Err(DecodeError::UnsupportedSupercompression(1)),
            SupercompressionScheme::Unknown(code) => {
                Err(DecodeError::UnsupportedSupercompression(code))
            }
        }
    }

    fn decode_zstd(&self, level: &Level) -> Result<Vec<u8>, DecodeError> {
        let decompressor = self.zstd.get_or_try_init(|| {
            debug!("creating shared zstd decompressor");
            Decompressor::new()
                .map(Mutex::new)
                .map_err(|e| DecodeError::Engine(format!("zstd init: {e}")))
        })?;

        let expected = level.uncompressed_byte_length;
        let out = decompressor
            .lock()
            .expect("zstd decompressor lock poisoned")
            .decompress(&level.data, expected as usize)
            .map_err(|e| DecodeError::TranscodeFailed(format!("zstd: {e}")))?;

        if out.len() as u64 != expected {
            return Err(DecodeError::DecompressionSizeMismatch {
                expected,
                actual: out.len() as u64,
            });
        }
        Ok(out)
    }

    /// Drop the decompressor so the next decode recreates it. Test hook.
    pub fn reset(&mut self) {
        self.zstd.take();
    }
}

impl Default for SupercompressionDecoder {
    fn default() -> Self {
        Self::new()
    }
}
