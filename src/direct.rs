//! Direct-format path
//!
//! For containers whose vkFormat is already GPU-native there is no
//! transcode: decompress level 0, reinterpret the bytes at the
//! format's element width, and hand back a single-level pixel buffer.
//! `pixel_depth > 0` selects a volumetric shape; that is the only
//! branch between 2D and 3D output.

use crate::container::{DirectContainer, ElementType, PixelFormat, TransferFunction};
use crate::error::DecodeError;
use crate::supercompress::SupercompressionDecoder;

/// Level-0 pixel data reinterpreted at the declared element width.
/// Half floats are carried as their raw bit patterns.
#[derive(Debug, Clone, PartialEq)]
pub enum PixelData {
    U8(Vec<u8>),
    F16(Vec<u16>),
    F32(Vec<f32>),
}

impl PixelData {
    pub fn element_count(&self) -> usize {
        match self {
            PixelData::U8(v) => v.len(),
            PixelData::F16(v) => v.len(),
            PixelData::F32(v) => v.len(),
        }
    }
}

/// A directly-usable single-level texture
#[derive(Debug, Clone)]
pub struct DataTexture {
    pub data: PixelData,
    pub width: u32,
    pub height: u32,
    /// `Some` only for volumetric textures
    pub depth: Option<u32>,
    pub format: PixelFormat,
    pub transfer_function: TransferFunction,
    pub premultiplied_alpha: bool,
}

/// Decode the direct path: level 0 only, supercompression reversed,
/// bytes reinterpreted per the pixel format.
pub fn decode(
    container: &DirectContainer,
    supercompress: &SupercompressionDecoder,
) -> Result<DataTexture, DecodeError> {
    let level = container
        .levels
        .first()
        .ok_or_else(|| DecodeError::TruncatedContainer("container has no levels".into()))?;

    let bytes = supercompress.decode(level, container.header.supercompression)?;
    let data = reinterpret(bytes, container.format.element_type())?;

    let header = &container.header;
    Ok(DataTexture {
        data,
        width: header.pixel_width,
        height: header.pixel_height,
        depth: (header.pixel_depth > 0).then_some(header.pixel_depth),
        format: container.format,
        // sRGB-ness of the direct path follows the pixel format itself
        transfer_function: if container.format.is_srgb() {
            TransferFunction::Srgb
        } else {
            TransferFunction::Linear
        },
        premultiplied_alpha: header.premultiplied_alpha,
    })
}

fn reinterpret(bytes: Vec<u8>, element: ElementType) -> Result<PixelData, DecodeError> {
    match element {
        ElementType::U8 => Ok(PixelData::U8(bytes)),
        ElementType::F16 => {
            if bytes.len() % 2 != 0 {
                return Err(DecodeError::TruncatedContainer(format!(
                    "{} bytes is not a whole number of 16-bit elements",
                    bytes.len()
                )));
            }
            Ok(PixelData::F16(
                bytes
                    .chunks_exact(2)
                    .map(|c| u16::from_le_bytes([c[0], c[1]]))
                    .collect(),
            ))
        }
        ElementType::F32 => {
            if bytes.len() % 4 != 0 {
                return Err(DecodeError::TruncatedContainer(format!(
                    "{} bytes is not a whole number of 32-bit elements",
                    bytes.len()
                )));
            }
            Ok(PixelData::F32(
                bytes
                    .chunks_exact(4)
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::fixtures::{build_ktx2, FixtureLevel, FixtureParams};
    use crate::container::{parse, Container};

    fn parse_direct(params: &FixtureParams) -> DirectContainer {
        match parse(&build_ktx2(params)).unwrap() {
            Container::Direct(direct) => direct,
            other => panic!("expected direct container, got {other:?}"),
        }
    }

    #[test]
    fn test_uncompressed_roundtrip_is_byte_identical() {
        let pixels: Vec<u8> = (0u8..64).collect();
        let params = FixtureParams {
            vk_format: 37, // R8G8B8A8_UNORM
            width: 4,
            height: 4,
            levels: vec![FixtureLevel {
                data: pixels.clone(),
                uncompressed_byte_length: 64,
            }],
            ..FixtureParams::default()
        };

        let texture = decode(&parse_direct(&params), &SupercompressionDecoder::new()).unwrap();
        assert_eq!(texture.data, PixelData::U8(pixels));
        assert_eq!(texture.depth, None);
        assert_eq!(texture.transfer_function, TransferFunction::Linear);
    }

    #[test]
    fn test_zero_depth_is_2d_positive_depth_is_volumetric() {
        let flat = FixtureParams::default();
        let texture = decode(&parse_direct(&flat), &SupercompressionDecoder::new()).unwrap();
        assert_eq!(texture.depth, None);

        let volume = FixtureParams {
            depth: 4,
            levels: vec![FixtureLevel {
                data: vec![0u8; 4 * 4 * 4 * 4],
                uncompressed_byte_length: (4 * 4 * 4 * 4) as u64,
            }],
            ..FixtureParams::default()
        };
        let texture = decode(&parse_direct(&volume), &SupercompressionDecoder::new()).unwrap();
        assert_eq!(texture.depth, Some(4));
    }

    #[test]
    fn test_f32_reinterpretation() {
        let values = [0.0f32, 1.5, -2.25, 1024.0];
        let mut data = Vec::new();
        for v in values {
            data.extend_from_slice(&v.to_le_bytes());
        }
        let params = FixtureParams {
            vk_format: 100, // R32_SFLOAT
            width: 2,
            height: 2,
            levels: vec![FixtureLevel {
                uncompressed_byte_length: data.len() as u64,
                data,
            }],
            ..FixtureParams::default()
        };

        let texture = decode(&parse_direct(&params), &SupercompressionDecoder::new()).unwrap();
        assert_eq!(texture.data, PixelData::F32(values.to_vec()));
        assert_eq!(texture.format, PixelFormat::R32Float);
    }

    #[test]
    fn test_f16_misaligned_payload_is_rejected() {
        let params = FixtureParams {
            vk_format: 76, // R16_SFLOAT
            width: 1,
            height: 1,
            levels: vec![FixtureLevel {
                data: vec![0u8; 3],
                uncompressed_byte_length: 3,
            }],
            ..FixtureParams::default()
        };

        let result = decode(&parse_direct(&params), &SupercompressionDecoder::new());
        assert!(matches!(result, Err(DecodeError::TruncatedContainer(_))));
    }

    #[test]
    fn test_zstd_supercompressed_level() {
        let pixels = vec![0xA5u8; 64];
        let compressed = zstd::bulk::compress(&pixels, 3).unwrap();
        let params = FixtureParams {
            supercompression: 2,
            levels: vec![FixtureLevel {
                data: compressed,
                uncompressed_byte_length: 64,
            }],
            ..FixtureParams::default()
        };

        let texture = decode(&parse_direct(&params), &SupercompressionDecoder::new()).unwrap();
        assert_eq!(texture.data, PixelData::U8(pixels));
    }

    #[test]
    fn test_srgb_format_reports_srgb_transfer() {
        let params = FixtureParams {
            vk_format: 43, // R8G8B8A8_SRGB
            ..FixtureParams::default()
        };
        let texture = decode(&parse_direct(&params), &SupercompressionDecoder::new()).unwrap();
        assert_eq!(texture.transfer_function, TransferFunction::Srgb);
    }
}
