//! Per-task transcode execution
//!
//! Runs inside one pool worker: open the payload through the engine,
//! detect the encoding family from the payload itself, negotiate the
//! target format, then transcode every (mip, layer) image. Layer
//! images of one mip are concatenated layer-0-first into a single
//! buffer, matching how array-texture layers are packed for upload.
//! Any image failure aborts the whole task; the engine handle is
//! released on every exit path by its `Drop`.

use tracing::debug;

use crate::container::TransferFunction;
use crate::engine::TranscoderEngine;
use crate::error::DecodeError;
use crate::negotiate::{self, BasisFamily, Capabilities, OutputFormat};

/// One transcoded mip level, layers packed contiguously
#[derive(Debug, Clone)]
pub struct Mipmap {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Output of one transcode task
#[derive(Debug, Clone)]
pub struct TranscodedTexture {
    /// One entry per mip level, largest first
    pub mipmaps: Vec<Mipmap>,
    /// Base level dimensions
    pub width: u32,
    pub height: u32,
    pub format: OutputFormat,
    pub has_alpha: bool,
    pub transfer_function: TransferFunction,
    pub premultiplied_alpha: bool,
}

pub(crate) fn execute(
    engine: &dyn TranscoderEngine,
    input: &[u8],
    caps: &Capabilities,
) -> Result<TranscodedTexture, DecodeError> {
    let mut handle = engine.open(input);

    if !handle.is_valid() {
        return Err(DecodeError::InvalidTranscodeInput(
            "invalid or unsupported KTX2 payload".into(),
        ));
    }

    // The payload is authoritative for the family, not any caller hint
    let family = if handle.is_uastc() {
        BasisFamily::Uastc
    } else {
        BasisFamily::Etc1s
    };

    let width = handle.width();
    let height = handle.height();
    let layers = handle.layer_count().max(1);
    let levels = handle.level_count();
    let has_alpha = handle.has_alpha();
    let transfer_function = handle.transfer_function();
    let premultiplied_alpha = handle.premultiplied_alpha();

    if width == 0 || height == 0 || levels == 0 {
        return Err(DecodeError::InvalidTranscodeInput(
            "texture has zero width, height, or level count".into(),
        ));
    }

    let (transcoder_format, output_format) =
        negotiate::select_target(family, width, height, has_alpha, caps);
    debug!(
        ?family,
        ?transcoder_format,
        width,
        height,
        layers,
        levels,
        "transcoding container"
    );

    if !handle.start_transcoding() {
        return Err(DecodeError::TranscodeFailed(
            "start_transcoding failed".into(),
        ));
    }

    let mut mipmaps = Vec::with_capacity(levels as usize);
    for mip in 0..levels {
        let mut layer_images = Vec::with_capacity(layers as usize);
        let mut mip_width = 0;
        let mut mip_height = 0;

        for layer in 0..layers {
            let info = handle.level_info(mip, layer).ok_or_else(|| {
                DecodeError::TranscodeFailed(format!("no level info for mip {mip} layer {layer}"))
            })?;
            // Below the 4px block floor the true size is reported, not
            // the block-padded one
            mip_width = if info.orig_width < 4 {
                info.orig_width
            } else {
                info.width
            };
            mip_height = if info.orig_height < 4 {
                info.orig_height
            } else {
                info.height
            };

            let size = handle
                .transcoded_size(mip, layer, transcoder_format)
                .ok_or_else(|| {
                    DecodeError::TranscodeFailed(format!(
                        "no transcoded size for mip {mip} layer {layer}"
                    ))
                })?;
            let mut dst = vec![0u8; size];
            if !handle.transcode_image(&mut dst, mip, layer, transcoder_format) {
                return Err(DecodeError::TranscodeFailed(format!(
                    "transcode_image failed at mip {mip} layer {layer}"
                )));
            }
            layer_images.push(dst);
        }

        mipmaps.push(Mipmap {
            data: concat(layer_images),
            width: mip_width,
            height: mip_height,
        });
    }

    Ok(TranscodedTexture {
        mipmaps,
        width,
        height,
        format: output_format,
        has_alpha,
        transfer_function,
        premultiplied_alpha,
    })
}

/// Pack per-layer buffers into one contiguous mip buffer, layer 0 first
fn concat(buffers: Vec<Vec<u8>>) -> Vec<u8> {
    let total: usize = buffers.iter().map(|b| b.len()).sum();
    let mut out = Vec::with_capacity(total);
    for buffer in buffers {
        out.extend(buffer);
    }
    out
}
