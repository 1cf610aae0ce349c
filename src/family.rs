//! Model families and the capabilities each one exposes.

use std::fmt;
use std::str::FromStr;

bitflags::bitflags! {
    /// Optional features a model family accepts
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Capabilities: u32 {
        const RES_DPT_SHIFT = 1 << 0;
        const VIDEO = 1 << 1;
        const TEA_CACHE = 1 << 2;
        const SPEED_UP = 1 << 3;
        const CLIP_L = 1 << 4;
        const OPEN_CLIP_G = 1 << 5;
        const SVD = 1 << 6;
        const CAUSAL_INFERENCE = 1 << 7;
        const SDXL = 1 << 8;
    }
}

/// Closed set of model architectures the engine serves
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ModelFamily {
    V1,
    V2,
    Kandinsky21,
    SdxlBase,
    SdxlRefiner,
    Ssd1b,
    SvdI2v,
    WurstchenStageC,
    WurstchenStageB,
    Sd3,
    Sd3Large,
    Pixart,
    Auraflow,
    Flux1,
    Flux2,
    Flux2_4b,
    Flux2_9b,
    HunyuanVideo,
    Wan21_1_3b,
    Wan21_14b,
    Wan22_5b,
    HidreamI1,
    QwenImage,
    ZImage,
}

const ALL_FAMILIES: [ModelFamily; 24] = [
    ModelFamily::V1,
    ModelFamily::V2,
    ModelFamily::Kandinsky21,
    ModelFamily::SdxlBase,
    ModelFamily::SdxlRefiner,
    ModelFamily::Ssd1b,
    ModelFamily::SvdI2v,
    ModelFamily::WurstchenStageC,
    ModelFamily::WurstchenStageB,
    ModelFamily::Sd3,
    ModelFamily::Sd3Large,
    ModelFamily::Pixart,
    ModelFamily::Auraflow,
    ModelFamily::Flux1,
    ModelFamily::Flux2,
    ModelFamily::Flux2_4b,
    ModelFamily::Flux2_9b,
    ModelFamily::HunyuanVideo,
    ModelFamily::Wan21_1_3b,
    ModelFamily::Wan21_14b,
    ModelFamily::Wan22_5b,
    ModelFamily::HidreamI1,
    ModelFamily::QwenImage,
    ModelFamily::ZImage,
];

impl ModelFamily {
    pub fn all() -> &'static [ModelFamily] {
        &ALL_FAMILIES
    }

    /// Version tag as the engine reports it
    pub fn tag(self) -> &'static str {
        match self {
            ModelFamily::V1 => "v1",
            ModelFamily::V2 => "v2",
            ModelFamily::Kandinsky21 => "kandinsky2.1",
            ModelFamily::SdxlBase => "sdxl_base_v0.9",
            ModelFamily::SdxlRefiner => "sdxl_refiner_v0.9",
            ModelFamily::Ssd1b => "ssd_1b",
            ModelFamily::SvdI2v => "svd_i2v",
            ModelFamily::WurstchenStageC => "wurstchen_v3.0_stage_c",
            ModelFamily::WurstchenStageB => "wurstchen_v3.0_stage_b",
            ModelFamily::Sd3 => "sd3",
            ModelFamily::Sd3Large => "sd3_large",
            ModelFamily::Pixart => "pixart",
            ModelFamily::Auraflow => "auraflow",
            ModelFamily::Flux1 => "flux1",
            ModelFamily::Flux2 => "flux2",
            ModelFamily::Flux2_4b => "flux2_4b",
            ModelFamily::Flux2_9b => "flux2_9b",
            ModelFamily::HunyuanVideo => "hunyuan_video",
            ModelFamily::Wan21_1_3b => "wan_v2.1_1.3b",
            ModelFamily::Wan21_14b => "wan_v2.1_14b",
            ModelFamily::Wan22_5b => "wan_v2.2_5b",
            ModelFamily::HidreamI1 => "hidream_i1",
            ModelFamily::QwenImage => "qwen_image",
            ModelFamily::ZImage => "z_image",
        }
    }

    /// Parse a version tag; `None` for tags outside the closed set
    pub fn from_tag(tag: &str) -> Option<Self> {
        let tag = tag.trim().to_ascii_lowercase();
        ALL_FAMILIES.iter().copied().find(|f| f.tag() == tag)
    }

    pub fn capabilities(self) -> Capabilities {
        use ModelFamily::*;
        match self {
            Flux1 | HidreamI1 => {
                Capabilities::RES_DPT_SHIFT
                    | Capabilities::TEA_CACHE
                    | Capabilities::SPEED_UP
                    | Capabilities::CLIP_L
            }
            Sd3 => Capabilities::RES_DPT_SHIFT | Capabilities::CLIP_L | Capabilities::OPEN_CLIP_G,
            QwenImage => Capabilities::RES_DPT_SHIFT | Capabilities::SPEED_UP,
            ZImage => Capabilities::RES_DPT_SHIFT,
            Flux2 | Flux2_4b | Flux2_9b => Capabilities::RES_DPT_SHIFT | Capabilities::SPEED_UP,
            HunyuanVideo => Capabilities::VIDEO | Capabilities::TEA_CACHE | Capabilities::SPEED_UP,
            Wan21_1_3b | Wan21_14b => {
                Capabilities::VIDEO | Capabilities::TEA_CACHE | Capabilities::CAUSAL_INFERENCE
            }
            SvdI2v => Capabilities::VIDEO | Capabilities::SVD,
            SdxlBase | SdxlRefiner => Capabilities::SDXL,
            _ => Capabilities::empty(),
        }
    }

    /// Upper bound on frames per clip for video families
    pub fn max_frames(self) -> Option<u32> {
        match self {
            ModelFamily::Wan21_1_3b | ModelFamily::Wan21_14b => Some(129),
            ModelFamily::HunyuanVideo => Some(201),
            ModelFamily::SvdI2v => Some(25),
            _ => None,
        }
    }

    /// Channels of the latent tensor streamed back as a preview
    pub fn latent_channels(self) -> u32 {
        use ModelFamily::*;
        match self {
            Sd3 | Sd3Large | Flux1 | Flux2 | Flux2_4b | Flux2_9b | HidreamI1 | ZImage
            | HunyuanVideo | Wan21_1_3b | Wan21_14b | QwenImage => 16,
            Wan22_5b => 48,
            _ => 4,
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for ModelFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModelFamily::from_tag(s).ok_or_else(|| format!("unknown model version: {}", s))
    }
}

/// Capability record looked up once per request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModelProfile {
    pub family: Option<ModelFamily>,
    pub capabilities: Capabilities,
    pub max_frames: Option<u32>,
}

impl ModelProfile {
    /// Profile for a version tag; unknown tags get no optional features
    pub fn for_version(tag: Option<&str>) -> Self {
        let family = tag.and_then(ModelFamily::from_tag);
        Self {
            family,
            capabilities: family.map(ModelFamily::capabilities).unwrap_or_default(),
            max_frames: family.and_then(ModelFamily::max_frames),
        }
    }

    pub fn supports(&self, capability: Capabilities) -> bool {
        self.capabilities.contains(capability)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_round_trip() {
        for &family in ModelFamily::all() {
            assert_eq!(ModelFamily::from_tag(family.tag()), Some(family));
            assert_eq!(family.to_string().parse::<ModelFamily>(), Ok(family));
        }
        assert_eq!(ModelFamily::from_tag("Flux1"), Some(ModelFamily::Flux1));
        assert_eq!(ModelFamily::from_tag("sd4"), None);
    }

    #[test]
    fn test_wan_profile() {
        let profile = ModelProfile::for_version(Some("wan_v2.1_14b"));
        assert_eq!(profile.family, Some(ModelFamily::Wan21_14b));
        assert!(profile.supports(Capabilities::CAUSAL_INFERENCE));
        assert!(profile.supports(Capabilities::TEA_CACHE | Capabilities::VIDEO));
        assert!(!profile.supports(Capabilities::RES_DPT_SHIFT));
        assert_eq!(profile.max_frames, Some(129));
    }

    #[test]
    fn test_unknown_version_has_no_capabilities() {
        let profile = ModelProfile::for_version(Some("mystery"));
        assert_eq!(profile.family, None);
        assert!(profile.capabilities.is_empty());

        let profile = ModelProfile::for_version(None);
        assert!(profile.capabilities.is_empty());
    }

    #[test]
    fn test_sdxl_refiner_is_sdxl() {
        assert!(ModelFamily::SdxlRefiner.capabilities().contains(Capabilities::SDXL));
        assert!(!ModelFamily::Ssd1b.capabilities().contains(Capabilities::SDXL));
    }

    #[test]
    fn test_latent_channels() {
        assert_eq!(ModelFamily::V1.latent_channels(), 4);
        assert_eq!(ModelFamily::Flux1.latent_channels(), 16);
        assert_eq!(ModelFamily::Wan22_5b.latent_channels(), 48);
    }
}
