//! KTX2 container parsing
//!
//! Decodes the fixed binary header, level index, and the pieces of the
//! data format descriptor we care about (transfer function and the
//! premultiplied-alpha flag). The vkFormat field decides, once, whether
//! the payload is directly usable (`Container::Direct`) or needs Basis
//! transcoding (`Container::Transcodable`).
//!
//! Reference: https://registry.khronos.org/KTX/specs/2.0/ktxspec.v2.html

use binrw::prelude::*;
use std::io::Cursor;

use crate::error::DecodeError;

/// KTX2 file identifier
pub const KTX2_MAGIC: [u8; 12] = [
    0xAB, 0x4B, 0x54, 0x58, 0x20, 0x32, 0x30, 0xBB, 0x0D, 0x0A, 0x1A, 0x0A,
];

/// Fixed header region: identifier + header fields + dfd/kvd/sgd index
const HEADER_SIZE: usize = 80;

/// Bytes per level index entry
const LEVEL_INDEX_SIZE: usize = 24;

/// KHR_DF transfer function codes
const KHR_DF_TRANSFER_SRGB: u8 = 2;

/// KHR_DF flag bit for premultiplied alpha
const KHR_DF_FLAG_ALPHA_PREMULTIPLIED: u8 = 1;

/// Header fields following the 12-byte identifier
#[derive(Debug, BinRead)]
#[br(little)]
struct RawHeader {
    vk_format: u32,
    type_size: u32,
    pixel_width: u32,
    pixel_height: u32,
    pixel_depth: u32,
    layer_count: u32,
    face_count: u32,
    level_count: u32,
    supercompression_scheme: u32,
    dfd_byte_offset: u32,
    dfd_byte_length: u32,
    kvd_byte_offset: u32,
    kvd_byte_length: u32,
    sgd_byte_offset: u64,
    sgd_byte_length: u64,
}

/// One level index entry: where the mip's data lives in the file
#[derive(Debug, BinRead)]
#[br(little)]
struct RawLevelIndex {
    byte_offset: u64,
    byte_length: u64,
    uncompressed_byte_length: u64,
}

/// Supercompression applied to level payloads before format-specific
/// decoding. BasisLZ only ever appears on transcodable containers and
/// is handled inside the transcoding engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupercompressionScheme {
    None,
    BasisLz,
    Zstd,
    Unknown(u32),
}

impl From<u32> for SupercompressionScheme {
    fn from(value: u32) -> Self {
        match value {
            0 => Self::None,
            1 => Self::BasisLz,
            2 => Self::Zstd,
            other => Self::Unknown(other),
        }
    }
}

/// Color transfer function declared by the data format descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferFunction {
    #[default]
    Linear,
    Srgb,
}

/// One mip level, largest first
#[derive(Debug, Clone)]
pub struct Level {
    /// Raw (possibly supercompressed) level payload
    pub data: Vec<u8>,
    /// Expected byte length after supercompression is reversed
    pub uncompressed_byte_length: u64,
}

/// Header metadata shared by both container kinds
#[derive(Debug, Clone)]
pub struct ContainerHeader {
    pub pixel_width: u32,
    pub pixel_height: u32,
    /// 0 for 2D textures, >0 for volumetric
    pub pixel_depth: u32,
    /// Raw layer count; 0 means "not an array texture"
    pub layer_count: u32,
    pub face_count: u32,
    pub level_count: u32,
    pub supercompression: SupercompressionScheme,
    pub transfer_function: TransferFunction,
    pub premultiplied_alpha: bool,
}

impl ContainerHeader {
    /// Array layer count, 1 if the texture is not an array
    pub fn layers(&self) -> u32 {
        self.layer_count.max(1)
    }
}

/// Directly-usable pixel formats (no transcoding needed).
///
/// The variant set mirrors the uncompressed vkFormats the pipeline
/// accepts; anything else is `UnsupportedPixelFormat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    R8Unorm,
    R8UnormSrgb,
    Rg8Unorm,
    Rg8UnormSrgb,
    Rgba8Unorm,
    Rgba8UnormSrgb,
    R16Float,
    Rg16Float,
    Rgba16Float,
    R32Float,
    Rg32Float,
    Rgba32Float,
}

/// Width in bytes of one element (one channel sample)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    /// Unsigned-normalized byte
    U8,
    /// Half float, carried as raw bits
    F16,
    F32,
}

impl PixelFormat {
    fn from_vk(vk_format: u32) -> Option<Self> {
        match vk_format {
            9 => Some(Self::R8Unorm),
            15 => Some(Self::R8UnormSrgb),
            16 => Some(Self::Rg8Unorm),
            22 => Some(Self::Rg8UnormSrgb),
            37 => Some(Self::Rgba8Unorm),
            43 => Some(Self::Rgba8UnormSrgb),
            76 => Some(Self::R16Float),
            83 => Some(Self::Rg16Float),
            97 => Some(Self::Rgba16Float),
            100 => Some(Self::R32Float),
            103 => Some(Self::Rg32Float),
            109 => Some(Self::Rgba32Float),
            _ => None,
        }
    }

    /// Number of color channels
    pub fn channels(&self) -> u32 {
        match self {
            Self::R8Unorm | Self::R8UnormSrgb | Self::R16Float | Self::R32Float => 1,
            Self::Rg8Unorm | Self::Rg8UnormSrgb | Self::Rg16Float | Self::Rg32Float => 2,
            Self::Rgba8Unorm | Self::Rgba8UnormSrgb | Self::Rgba16Float | Self::Rgba32Float => 4,
        }
    }

    pub fn element_type(&self) -> ElementType {
        match self {
            Self::R8Unorm
            | Self::R8UnormSrgb
            | Self::Rg8Unorm
            | Self::Rg8UnormSrgb
            | Self::Rgba8Unorm
            | Self::Rgba8UnormSrgb => ElementType::U8,
            Self::R16Float | Self::Rg16Float | Self::Rgba16Float => ElementType::F16,
            Self::R32Float | Self::Rg32Float | Self::Rgba32Float => ElementType::F32,
        }
    }

    /// Whether the format stores sRGB-encoded values
    pub fn is_srgb(&self) -> bool {
        matches!(
            self,
            Self::R8UnormSrgb | Self::Rg8UnormSrgb | Self::Rgba8UnormSrgb
        )
    }
}

/// A container whose pixel format is already GPU-native
#[derive(Debug, Clone)]
pub struct DirectContainer {
    pub header: ContainerHeader,
    pub format: PixelFormat,
    pub levels: Vec<Level>,
}

/// A container carrying Basis-supercompressed image data
#[derive(Debug, Clone)]
pub struct TranscodableContainer {
    pub header: ContainerHeader,
    pub levels: Vec<Level>,
}

/// Parsed container, branch decided once at parse time
#[derive(Debug, Clone)]
pub enum Container {
    Direct(DirectContainer),
    Transcodable(TranscodableContainer),
}

impl Container {
    pub fn header(&self) -> &ContainerHeader {
        match self {
            Container::Direct(c) => &c.header,
            Container::Transcodable(c) => &c.header,
        }
    }

    /// True when the pixel format is already GPU-native and no
    /// transcoding branch will be taken.
    pub fn internal_format_defined(&self) -> bool {
        matches!(self, Container::Direct(_))
    }
}

/// Parse a raw byte buffer into a [`Container`].
pub fn parse(bytes: &[u8]) -> Result<Container, DecodeError> {
    if bytes.len() < KTX2_MAGIC.len() {
        return Err(DecodeError::TruncatedContainer(format!(
            "{} bytes is shorter than the identifier",
            bytes.len()
        )));
    }
    if bytes[..KTX2_MAGIC.len()] != KTX2_MAGIC {
        return Err(DecodeError::MalformedContainer);
    }
    if bytes.len() < HEADER_SIZE {
        return Err(DecodeError::TruncatedContainer(format!(
            "{} bytes is shorter than the {} byte header",
            bytes.len(),
            HEADER_SIZE
        )));
    }

    let mut cursor = Cursor::new(&bytes[KTX2_MAGIC.len()..]);
    let raw = RawHeader::read(&mut cursor)
        .map_err(|e| DecodeError::TruncatedContainer(format!("header: {e}")))?;

    // levelCount 0 still carries exactly one level of data
    let level_entries = raw.level_count.max(1) as usize;
    let index_end = HEADER_SIZE + level_entries * LEVEL_INDEX_SIZE;
    if bytes.len() < index_end {
        return Err(DecodeError::TruncatedContainer(format!(
            "level index needs {} bytes, have {}",
            index_end,
            bytes.len()
        )));
    }

    let mut cursor = Cursor::new(&bytes[HEADER_SIZE..index_end]);
    let mut levels = Vec::with_capacity(level_entries);
    for i in 0..level_entries {
        let entry = RawLevelIndex::read(&mut cursor)
            .map_err(|e| DecodeError::TruncatedContainer(format!("level index {i}: {e}")))?;
        let start = usize::try_from(entry.byte_offset)
            .map_err(|_| DecodeError::TruncatedContainer(format!("level {i} offset out of range")))?;
        let length = usize::try_from(entry.byte_length)
            .map_err(|_| DecodeError::TruncatedContainer(format!("level {i} length out of range")))?;
        let end = start
            .checked_add(length)
            .ok_or_else(|| DecodeError::TruncatedContainer(format!("level {i} overflows")))?;
        if end > bytes.len() {
            return Err(DecodeError::TruncatedContainer(format!(
                "level {i} ends at {end}, buffer is {} bytes",
                bytes.len()
            )));
        }
        levels.push(Level {
            data: bytes[start..end].to_vec(),
            uncompressed_byte_length: entry.uncompressed_byte_length,
        });
    }

    let (transfer_function, premultiplied_alpha) = read_dfd(bytes, &raw);

    let header = ContainerHeader {
        pixel_width: raw.pixel_width,
        pixel_height: raw.pixel_height,
        pixel_depth: raw.pixel_depth,
        layer_count: raw.layer_count,
        face_count: raw.face_count,
        level_count: raw.level_count,
        supercompression: raw.supercompression_scheme.into(),
        transfer_function,
        premultiplied_alpha,
    };

    // typeSize is 1 for all block formats; nothing to check beyond parse
    let _ = raw.type_size;

    if raw.vk_format == 0 {
        // VK_FORMAT_UNDEFINED: Basis-encoded, needs transcoding
        Ok(Container::Transcodable(TranscodableContainer {
            header,
            levels,
        }))
    } else {
        let format = PixelFormat::from_vk(raw.vk_format)
            .ok_or(DecodeError::UnsupportedPixelFormat(raw.vk_format))?;
        Ok(Container::Direct(DirectContainer {
            header,
            format,
            levels,
        }))
    }
}

/// Pull transfer function and premultiplied flag out of the basic data
/// format descriptor block. A missing or short DFD reads as linear, not
/// premultiplied.
fn read_dfd(bytes: &[u8], raw: &RawHeader) -> (TransferFunction, bool) {
    let start = raw.dfd_byte_offset as usize;
    let len = raw.dfd_byte_length as usize;
    // 4 bytes dfdTotalSize + 12 bytes into the basic block for the
    // transferFunction / flags byte pair
    if len < 16 || start.checked_add(len).map_or(true, |end| end > bytes.len()) {
        return (TransferFunction::Linear, false);
    }
    let transfer = bytes[start + 14];
    let flags = bytes[start + 15];
    let tf = if transfer == KHR_DF_TRANSFER_SRGB {
        TransferFunction::Srgb
    } else {
        TransferFunction::Linear
    };
    (tf, flags & KHR_DF_FLAG_ALPHA_PREMULTIPLIED != 0)
}
