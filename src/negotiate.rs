//! Target format negotiation
//!
//! Given the caller's declared hardware capabilities, the container's
//! Basis family, and whether alpha is needed, picks the best GPU-native
//! compressed format to transcode into. Negotiation is a pure function
//! over a fixed option table; two priority orderings (one per family)
//! are computed once and reused.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Intermediate encoding family the container was compressed with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BasisFamily {
    Etc1s,
    Uastc,
}

/// Format the transcoding engine is asked to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscoderFormat {
    Etc1,
    Etc2,
    Bc1,
    Bc3,
    Bc7M5,
    Pvrtc1Rgb4,
    Pvrtc1Rgba4,
    Astc4x4,
    Rgba32,
}

/// GPU-facing format of the transcoded output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Rgba8Unorm,
    Astc4x4Rgba,
    Bc7Rgba,
    Etc2RgbaEac,
    Pvrtc1Rgba4bpp,
    Bc3Rgba,
    Etc1Rgb,
    Etc2Rgb,
    Pvrtc1Rgb4bpp,
    Bc1Rgb,
}

/// Hardware compressed-format support declared by the caller.
///
/// The field names are the capability flags from the option table;
/// they are the only coupling point between the caller's renderer
/// layer and this pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Capabilities {
    pub astc_supported: bool,
    pub etc1_supported: bool,
    pub etc2_supported: bool,
    pub dxt_supported: bool,
    pub bptc_supported: bool,
    pub pvrtc_supported: bool,
}

/// Capability flag referenced by an option row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CapabilityFlag {
    Astc,
    Etc1,
    Etc2,
    Dxt,
    Bptc,
    Pvrtc,
}

impl Capabilities {
    fn has(&self, flag: CapabilityFlag) -> bool {
        match flag {
            CapabilityFlag::Astc => self.astc_supported,
            CapabilityFlag::Etc1 => self.etc1_supported,
            CapabilityFlag::Etc2 => self.etc2_supported,
            CapabilityFlag::Dxt => self.dxt_supported,
            CapabilityFlag::Bptc => self.bptc_supported,
            CapabilityFlag::Pvrtc => self.pvrtc_supported,
        }
    }
}

/// One capability-to-format mapping row.
///
/// `transcoder`/`output` hold the no-alpha target first and the
/// alpha-capable target second; a single-entry row has no distinct
/// alpha target and is skipped when alpha is required.
struct FormatOption {
    capability: CapabilityFlag,
    families: &'static [BasisFamily],
    transcoder: &'static [TranscoderFormat],
    output: &'static [OutputFormat],
    priority_etc1s: u32,
    priority_uastc: u32,
    needs_power_of_two: bool,
}

static FORMAT_OPTIONS: [FormatOption; 6] = [
    FormatOption {
        capability: CapabilityFlag::Astc,
        families: &[BasisFamily::Uastc],
        transcoder: &[TranscoderFormat::Astc4x4, TranscoderFormat::Astc4x4],
        output: &[OutputFormat::Astc4x4Rgba, OutputFormat::Astc4x4Rgba],
        priority_etc1s: u32::MAX,
        priority_uastc: 1,
        needs_power_of_two: false,
    },
    FormatOption {
        capability: CapabilityFlag::Bptc,
        families: &[BasisFamily::Etc1s, BasisFamily::Uastc],
        transcoder: &[TranscoderFormat::Bc7M5, TranscoderFormat::Bc7M5],
        output: &[OutputFormat::Bc7Rgba, OutputFormat::Bc7Rgba],
        priority_etc1s: 3,
        priority_uastc: 2,
        needs_power_of_two: false,
    },
    FormatOption {
        capability: CapabilityFlag::Dxt,
        families: &[BasisFamily::Etc1s, BasisFamily::Uastc],
        transcoder: &[TranscoderFormat::Bc1, TranscoderFormat::Bc3],
        output: &[OutputFormat::Bc1Rgb, OutputFormat::Bc3Rgba],
        priority_etc1s: 4,
        priority_uastc: 5,
        needs_power_of_two: false,
    },
    FormatOption {
        capability: CapabilityFlag::Etc2,
        families: &[BasisFamily::Etc1s, BasisFamily::Uastc],
        transcoder: &[TranscoderFormat::Etc1, TranscoderFormat::Etc2],
        output: &[OutputFormat::Etc2Rgb, OutputFormat::Etc2RgbaEac],
        priority_etc1s: 1,
        priority_uastc: 3,
        needs_power_of_two: false,
    },
    FormatOption {
        capability: CapabilityFlag::Etc1,
        families: &[BasisFamily::Etc1s, BasisFamily::Uastc],
        transcoder: &[TranscoderFormat::Etc1],
        output: &[OutputFormat::Etc1Rgb],
        priority_etc1s: 2,
        priority_uastc: 4,
        needs_power_of_two: false,
    },
    FormatOption {
        capability: CapabilityFlag::Pvrtc,
        families: &[BasisFamily::Etc1s, BasisFamily::Uastc],
        transcoder: &[TranscoderFormat::Pvrtc1Rgb4, TranscoderFormat::Pvrtc1Rgba4],
        output: &[OutputFormat::Pvrtc1Rgb4bpp, OutputFormat::Pvrtc1Rgba4bpp],
        priority_etc1s: 5,
        priority_uastc: 6,
        needs_power_of_two: true,
    },
];

fn sorted_by<F: Fn(&FormatOption) -> u32>(key: F) -> Vec<&'static FormatOption> {
    let mut options: Vec<&'static FormatOption> = FORMAT_OPTIONS.iter().collect();
    options.sort_by_key(|opt| key(opt));
    options
}

static ETC1S_ORDER: Lazy<Vec<&'static FormatOption>> =
    Lazy::new(|| sorted_by(|opt| opt.priority_etc1s));

static UASTC_ORDER: Lazy<Vec<&'static FormatOption>> =
    Lazy::new(|| sorted_by(|opt| opt.priority_uastc));

/// Dimension check for PVRTC-class targets. Values of 2 or less count
/// as power-of-two.
fn is_power_of_two(value: u32) -> bool {
    if value <= 2 {
        return true;
    }
    value & (value - 1) == 0
}

/// Pick the transcode target for a texture.
///
/// Scans the family's priority order and returns the first row whose
/// capability flag is set, whose family set includes `family`, that has
/// an alpha-capable target if `has_alpha`, and whose power-of-two
/// requirement (if any) the dimensions satisfy. When nothing matches,
/// falls back to uncompressed RGBA32 rather than failing.
pub fn select_target(
    family: BasisFamily,
    width: u32,
    height: u32,
    has_alpha: bool,
    caps: &Capabilities,
) -> (TranscoderFormat, OutputFormat) {
    let order = match family {
        BasisFamily::Etc1s => &*ETC1S_ORDER,
        BasisFamily::Uastc => &*UASTC_ORDER,
    };

    for opt in order {
        if !caps.has(opt.capability) {
            continue;
        }
        if !opt.families.contains(&family) {
            continue;
        }
        if has_alpha && opt.transcoder.len() < 2 {
            continue;
        }
        if opt.needs_power_of_two && !(is_power_of_two(width) && is_power_of_two(height)) {
            continue;
        }
        let idx = usize::from(has_alpha);
        return (opt.transcoder[idx], opt.output[idx]);
    }

    warn!("no suitable compressed texture format found, decoding to RGBA32");
    (TranscoderFormat::Rgba32, OutputFormat::Rgba8Unorm)
}
