//! Approximate RGB rendering of in-progress latents.
//!
//! Each family maps its latent channels to RGB with a fixed affine
//! projection. The tables are an approximation of a full VAE decode and are
//! only meant for progress display.

use image::{imageops, ImageBuffer, Rgba, RgbaImage};
use tracing::debug;

use crate::codec::{decode_samples, RawSamples};
use crate::{BridgeError, ModelFamily, Result};

/// Latent channel counts a preview can carry
pub const PREVIEW_CHANNELS: [u32; 4] = [3, 4, 16, 48];

/// Affine map from one latent pixel to RGB.
///
/// `rgb[k] = (sum_c v[c] * weights[c][k] + bias[k]) * scale + offset`
#[derive(Debug, Clone, Copy)]
pub struct LatentProjection {
    /// One row per latent channel
    pub weights: &'static [[f32; 3]],
    pub bias: [f32; 3],
    pub scale: f32,
    pub offset: f32,
}

impl LatentProjection {
    pub fn channels(&self) -> usize {
        self.weights.len()
    }

    pub fn apply(&self, latent: &[f32]) -> [u8; 4] {
        let mut rgb = self.bias;
        for (v, row) in latent.iter().zip(self.weights) {
            for k in 0..3 {
                rgb[k] += v * row[k];
            }
        }
        [
            to_channel(rgb[0] * self.scale + self.offset),
            to_channel(rgb[1] * self.scale + self.offset),
            to_channel(rgb[2] * self.scale + self.offset),
            255,
        ]
    }
}

fn to_channel(v: f32) -> u8 {
    if v.is_finite() {
        v.clamp(0.0, 255.0) as u8
    } else {
        0
    }
}

const PASSTHROUGH_3CH: LatentProjection = LatentProjection {
    weights: &[[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
    bias: [0.0, 0.0, 0.0],
    scale: 1.0,
    offset: 0.0,
};

const SD_V1_4CH: LatentProjection = LatentProjection {
    weights: &[
        [49.521, 41.1373, 40.2919],
        [29.0283, 42.4951, 18.9304],
        [-23.9673, 24.7349, 30.0236],
        [-39.4981, -50.8279, -81.9976],
    ],
    bias: [99.9368, 99.8421, 99.5384],
    scale: 1.0,
    offset: 0.0,
};

const SD3_16CH: LatentProjection = LatentProjection {
    weights: &[
        [-0.0922, -0.0175, 0.0749],
        [0.0311, 0.0633, 0.0954],
        [0.1994, 0.0927, 0.0458],
        [0.0856, 0.0339, 0.0902],
        [0.0587, 0.0272, -0.0496],
        [-0.0006, 0.1104, 0.0309],
        [0.0978, 0.0306, 0.0427],
        [-0.0042, 0.1038, 0.1358],
        [-0.0194, 0.002, 0.0669],
        [-0.0488, 0.013, -0.0268],
        [0.0922, 0.0988, 0.0951],
        [-0.0278, 0.0524, -0.0542],
        [0.0332, 0.0456, 0.0895],
        [-0.0069, -0.003, -0.081],
        [-0.0596, -0.0465, -0.0293],
        [-0.1448, -0.1463, -0.1189],
    ],
    bias: [0.2394, 0.2135, 0.1925],
    scale: 127.5,
    offset: 127.5,
};

const SDXL_4CH: LatentProjection = LatentProjection {
    weights: &[
        [47.195, 53.237, 58.182],
        [-29.114, -1.4623, 4.3734],
        [11.883, 12.991, -3.3735],
        [-38.063, -28.043, -26.722],
    ],
    bias: [141.64, 127.46, 114.5],
    scale: 1.0,
    offset: 0.0,
};

const FLUX_16CH: LatentProjection = LatentProjection {
    weights: &[
        [-0.0346, 0.0244, 0.0681],
        [0.0034, 0.021, 0.0687],
        [0.0275, -0.0668, -0.0433],
        [-0.0174, 0.016, 0.0617],
        [0.0859, 0.0721, 0.0329],
        [0.0004, 0.0383, 0.0115],
        [0.0405, 0.0861, 0.0915],
        [-0.0236, -0.0185, -0.0259],
        [-0.0245, 0.025, 0.118],
        [0.1008, 0.0755, -0.0421],
        [-0.0515, 0.0201, 0.0011],
        [0.0428, -0.0012, -0.0036],
        [0.0817, 0.0765, 0.0749],
        [-0.1264, -0.0522, -0.1103],
        [-0.028, -0.0881, -0.0499],
        [-0.1262, -0.0982, -0.0778],
    ],
    bias: [-0.0329, -0.0718, -0.0851],
    scale: 127.5,
    offset: 127.5,
};

const WAN21_16CH: LatentProjection = LatentProjection {
    weights: &[
        [-0.1299, -0.1692, 0.2932],
        [0.0671, 0.0406, 0.0442],
        [0.3568, 0.2548, 0.1747],
        [0.0372, 0.2344, 0.142],
        [0.0313, 0.0189, -0.0328],
        [0.0296, -0.0956, -0.0665],
        [-0.3477, -0.4059, -0.2925],
        [0.0166, 0.1902, 0.1975],
        [-0.0412, 0.0267, -0.1364],
        [-0.1293, 0.074, 0.1636],
        [0.068, 0.3019, 0.1128],
        [0.0032, 0.0581, 0.0639],
        [-0.1251, 0.0927, 0.1699],
        [0.006, -0.0633, 0.0005],
        [0.3477, 0.2275, 0.295],
        [0.1984, 0.0913, 0.1861],
    ],
    bias: [-0.1835, -0.0868, -0.336],
    scale: 127.5,
    offset: 127.5,
};

const WAN22_48CH: LatentProjection = LatentProjection {
    weights: &[
        [0.0119, 0.0103, 0.0046],
        [-0.1062, -0.0504, 0.0165],
        [0.014, 0.0409, 0.0491],
        [-0.0813, -0.0677, 0.0607],
        [0.0656, 0.0851, 0.0808],
        [0.0264, 0.0463, 0.0912],
        [0.0295, 0.0326, 0.059],
        [-0.0244, -0.027, 0.0025],
        [0.0443, -0.0102, 0.0288],
        [-0.0465, -0.009, -0.0205],
        [0.0359, 0.0236, 0.0082],
        [-0.0776, 0.0854, 0.1048],
        [0.0564, 0.0264, 0.0561],
        [0.0006, 0.0594, 0.0418],
        [-0.0319, -0.0542, -0.0637],
        [-0.0268, 0.0024, 0.026],
        [0.0539, 0.0265, 0.0358],
        [-0.0359, -0.0312, -0.0287],
        [-0.0285, -0.1032, -0.1237],
        [0.1041, 0.0537, 0.0622],
        [-0.0086, -0.0374, -0.0051],
        [0.039, 0.067, 0.2863],
        [0.0069, 0.0144, 0.0082],
        [0.0006, -0.0167, 0.0079],
        [0.0313, -0.0574, -0.0232],
        [-0.1454, -0.0902, -0.0481],
        [0.0714, 0.0827, 0.0447],
        [-0.0304, -0.0574, -0.0196],
        [0.0401, 0.0384, 0.0204],
        [-0.0758, -0.0297, -0.0014],
        [0.0568, 0.1307, 0.1372],
        [-0.0055, -0.031, -0.038],
        [0.0239, -0.0305, 0.0325],
        [-0.0663, -0.0673, -0.014],
        [-0.0416, -0.0047, -0.0023],
        [0.0166, 0.0112, -0.0093],
        [-0.0211, 0.0011, 0.0331],
        [0.1833, 0.1466, 0.225],
        [-0.0368, 0.037, 0.0295],
        [-0.3441, -0.3543, -0.2008],
        [-0.0479, -0.0489, -0.042],
        [-0.066, -0.0153, 0.08],
        [-0.0101, 0.0068, 0.0156],
        [-0.069, -0.0452, -0.0927],
        [-0.0145, 0.0041, 0.0015],
        [0.0421, 0.0451, 0.0373],
        [0.0504, -0.0483, -0.0356],
        [-0.0837, 0.0168, 0.0055],
    ],
    bias: [0.0, 0.0, 0.0],
    scale: 127.5,
    offset: 127.5,
};

const HUNYUAN_16CH: LatentProjection = LatentProjection {
    weights: &[
        [-0.0395, -0.0331, 0.0445],
        [0.0696, 0.0795, 0.0518],
        [0.0135, -0.0945, -0.0282],
        [0.0108, -0.025, -0.0765],
        [-0.0209, 0.0032, 0.0224],
        [-0.0804, -0.0254, -0.0639],
        [-0.0991, 0.0271, -0.0669],
        [-0.0646, -0.0422, -0.04],
        [-0.0696, -0.0595, -0.0894],
        [-0.0799, -0.0208, -0.0375],
        [0.1166, 0.1627, 0.0962],
        [0.1165, 0.0432, 0.0407],
        [-0.2315, -0.192, -0.1355],
        [-0.027, 0.0401, -0.0821],
        [-0.0616, -0.0997, -0.0727],
        [0.0249, -0.0469, -0.1703],
    ],
    bias: [0.0249, -0.0192, -0.0761],
    scale: 127.5,
    offset: 127.5,
};

const WURSTCHEN_4CH: LatentProjection = LatentProjection {
    weights: &[
        [10.175, 21.07, 7.8454],
        [-20.807, -4.3022, -2.3713],
        [-27.834, -11.258, -0.45565],
        [-2.0577, -18.8, -41.648],
    ],
    bias: [143.39, 131.53, 120.76],
    scale: 1.0,
    offset: 0.0,
};

/// Projection table for a family and channel count
pub fn projection_for(family: ModelFamily, channels: u32) -> Option<&'static LatentProjection> {
    use ModelFamily::*;
    let table = match family {
        V1 | V2 | SvdI2v => &SD_V1_4CH,
        SdxlBase | SdxlRefiner | Ssd1b | Pixart | Auraflow => &SDXL_4CH,
        Sd3 | Sd3Large => &SD3_16CH,
        Flux1 | Flux2 | Flux2_4b | Flux2_9b | HidreamI1 | ZImage => &FLUX_16CH,
        Wan21_1_3b | Wan21_14b | QwenImage => &WAN21_16CH,
        Wan22_5b => &WAN22_48CH,
        HunyuanVideo => &HUNYUAN_16CH,
        WurstchenStageC | WurstchenStageB if channels == 3 => &PASSTHROUGH_3CH,
        WurstchenStageC | WurstchenStageB => &WURSTCHEN_4CH,
        Kandinsky21 => return None,
    };
    (table.channels() == channels as usize).then_some(table)
}

/// Project a latent sample array to RGBA bytes.
///
/// `None` means no preview should be rendered for this frame.
pub fn project(
    samples: &[f32],
    height: u32,
    width: u32,
    channels: u32,
    family: ModelFamily,
) -> Option<Vec<u8>> {
    if !PREVIEW_CHANNELS.contains(&channels) {
        return None;
    }
    let table = projection_for(family, channels)?;

    let pixels = height as usize * width as usize;
    let stride = channels as usize;
    if samples.len() < pixels * stride {
        return None;
    }

    let mut rgba = Vec::with_capacity(pixels * 4);
    for latent in samples.chunks_exact(stride).take(pixels) {
        rgba.extend_from_slice(&table.apply(latent));
    }
    Some(rgba)
}

/// RGBA preview ready for display
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreviewImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl PreviewImage {
    /// Downscale so neither side exceeds `max_side`, keeping aspect ratio
    pub fn fit_within(self, max_side: u32) -> Self {
        if max_side == 0 || (self.width <= max_side && self.height <= max_side) {
            return self;
        }
        // A buffer shorter than its dimensions is passed through untouched.
        if (self.data.len() as u64) < self.width as u64 * self.height as u64 * 4 {
            return self;
        }

        let PreviewImage {
            width: src_w,
            height: src_h,
            data,
        } = self;
        let Some(buffer) = RgbaImage::from_raw(src_w, src_h, data) else {
            return PreviewImage {
                width: src_w,
                height: src_h,
                data: Vec::new(),
            };
        };

        let scale = max_side as f64 / src_w.max(src_h) as f64;
        let width = ((src_w as f64 * scale).round() as u32).max(1);
        let height = ((src_h as f64 * scale).round() as u32).max(1);
        let small: ImageBuffer<Rgba<u8>, Vec<u8>> = imageops::thumbnail(&buffer, width, height);

        PreviewImage {
            width,
            height,
            data: small.into_raw(),
        }
    }
}

/// Decode a preview tensor and project it for the given family
pub fn decode_preview(data: &[u8], family: Option<ModelFamily>) -> Result<PreviewImage> {
    let RawSamples { header, samples } = decode_samples(data)?;

    let unsupported = || BridgeError::UnsupportedPreview {
        family: family.map_or_else(|| "unknown".to_string(), |f| f.to_string()),
        channels: header.channels,
    };
    let family = family.ok_or_else(unsupported)?;
    let rgba = project(&samples, header.height, header.width, header.channels, family)
        .ok_or_else(unsupported)?;

    debug!(
        family = %family,
        width = header.width,
        height = header.height,
        "projected latent preview"
    );
    Ok(PreviewImage {
        width: header.width,
        height: header.height,
        data: rgba,
    })
}
