//! Binary schema for everything that crosses the engine boundary.
//!
//! The generation configuration is a FlatBuffers table whose slot offsets
//! follow the engine's schema declaration order (`4 + 2 * field_id`); slots
//! this crate never sets are simply left out. The request/response envelope
//! is protobuf. Never renumber an existing slot or tag.

use flatbuffers::{FlatBufferBuilder, Push, TableFinishedWIPOffset, VOffsetT, WIPOffset};
use prost::Message;

fn slot<X: Push>(fbb: &mut FlatBufferBuilder<'_>, offset: VOffsetT, value: Option<X>) {
    if let Some(value) = value {
        fbb.push_slot_always(offset, value);
    }
}

fn ushort(v: u32) -> u16 {
    u16::try_from(v).unwrap_or(u16::MAX)
}

fn ubyte(v: u32) -> u8 {
    u8::try_from(v).unwrap_or(u8::MAX)
}

/// Canonical-list index as the engine's byte-sized enum
fn byte(v: u32) -> i8 {
    i8::try_from(v).unwrap_or(i8::MAX)
}

fn int(v: u32) -> i32 {
    i32::try_from(v).unwrap_or(i32::MAX)
}

/// Fully resolved generation configuration.
///
/// Spatial fields are in 64-pixel units except the SDXL image-size fields,
/// which carry raw pixels. `None` means the slot is left out of the table,
/// so the engine falls back to its own default.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GenerationConfiguration {
    pub model: Option<String>,
    pub start_width: Option<u32>,
    pub start_height: Option<u32>,
    pub seed: Option<u32>,
    pub seed_mode: Option<u32>,
    pub steps: Option<u32>,
    pub guidance_scale: Option<f32>,
    pub strength: Option<f32>,
    pub sampler: Option<u32>,
    pub batch_count: Option<u32>,
    pub batch_size: Option<u32>,
    pub clip_skip: Option<u32>,
    pub mask_blur: Option<f32>,
    pub mask_blur_outset: Option<i32>,
    pub sharpness: Option<f32>,
    pub shift: Option<f32>,
    pub preserve_original_after_inpaint: Option<bool>,

    pub cfg_zero_star: Option<bool>,
    pub cfg_zero_init_steps: Option<u32>,
    pub stochastic_sampling_gamma: Option<f32>,

    pub hires_fix: Option<bool>,
    pub hires_fix_start_width: Option<u32>,
    pub hires_fix_start_height: Option<u32>,
    pub hires_fix_strength: Option<f32>,

    pub tiled_decoding: Option<bool>,
    pub decoding_tile_width: Option<u32>,
    pub decoding_tile_height: Option<u32>,
    pub decoding_tile_overlap: Option<u32>,

    pub tiled_diffusion: Option<bool>,
    pub diffusion_tile_width: Option<u32>,
    pub diffusion_tile_height: Option<u32>,
    pub diffusion_tile_overlap: Option<u32>,

    pub resolution_dependent_shift: bool,

    pub separate_clip_l: Option<bool>,
    pub clip_l_text: Option<String>,
    pub separate_open_clip_g: Option<bool>,
    pub open_clip_g_text: Option<String>,

    pub speed_up_with_guidance_embed: Option<bool>,
    pub guidance_embed: Option<f32>,

    pub tea_cache: Option<bool>,
    pub tea_cache_start: Option<i32>,
    pub tea_cache_end: Option<i32>,
    pub tea_cache_threshold: Option<f32>,
    pub tea_cache_max_skip_steps: Option<u32>,

    pub num_frames: Option<u32>,
    pub fps_id: Option<u32>,
    pub motion_bucket_id: Option<u32>,
    pub cond_aug: Option<f32>,
    pub start_frame_cfg: Option<f32>,

    pub causal_inference_enabled: Option<bool>,
    pub causal_inference: Option<i32>,
    pub causal_inference_pad: Option<i32>,

    pub original_image_height: Option<u32>,
    pub original_image_width: Option<u32>,
    pub target_image_height: Option<u32>,
    pub target_image_width: Option<u32>,
    pub negative_original_image_height: Option<u32>,
    pub negative_original_image_width: Option<u32>,

    pub upscaler: Option<String>,
    pub upscaler_scale_factor: Option<u32>,
    pub refiner_model: Option<String>,
    pub refiner_start: Option<f32>,

    pub controls: Vec<Control>,
    pub loras: Vec<LoRa>,
}

impl GenerationConfiguration {
    pub const VT_START_WIDTH: VOffsetT = 6;
    pub const VT_START_HEIGHT: VOffsetT = 8;
    pub const VT_SEED: VOffsetT = 10;
    pub const VT_STEPS: VOffsetT = 12;
    pub const VT_GUIDANCE_SCALE: VOffsetT = 14;
    pub const VT_STRENGTH: VOffsetT = 16;
    pub const VT_MODEL: VOffsetT = 18;
    pub const VT_SAMPLER: VOffsetT = 20;
    pub const VT_BATCH_COUNT: VOffsetT = 22;
    pub const VT_BATCH_SIZE: VOffsetT = 24;
    pub const VT_HIRES_FIX: VOffsetT = 26;
    pub const VT_HIRES_FIX_START_WIDTH: VOffsetT = 28;
    pub const VT_HIRES_FIX_START_HEIGHT: VOffsetT = 30;
    pub const VT_HIRES_FIX_STRENGTH: VOffsetT = 32;
    pub const VT_UPSCALER: VOffsetT = 34;
    pub const VT_SEED_MODE: VOffsetT = 38;
    pub const VT_CLIP_SKIP: VOffsetT = 40;
    pub const VT_CONTROLS: VOffsetT = 42;
    pub const VT_LORAS: VOffsetT = 44;
    pub const VT_MASK_BLUR: VOffsetT = 46;
    pub const VT_REFINER_MODEL: VOffsetT = 60;
    pub const VT_ORIGINAL_IMAGE_HEIGHT: VOffsetT = 62;
    pub const VT_ORIGINAL_IMAGE_WIDTH: VOffsetT = 64;
    pub const VT_TARGET_IMAGE_HEIGHT: VOffsetT = 70;
    pub const VT_TARGET_IMAGE_WIDTH: VOffsetT = 72;
    pub const VT_REFINER_START: VOffsetT = 80;
    pub const VT_NEGATIVE_ORIGINAL_IMAGE_HEIGHT: VOffsetT = 82;
    pub const VT_NEGATIVE_ORIGINAL_IMAGE_WIDTH: VOffsetT = 84;
    pub const VT_FPS_ID: VOffsetT = 88;
    pub const VT_MOTION_BUCKET_ID: VOffsetT = 90;
    pub const VT_COND_AUG: VOffsetT = 92;
    pub const VT_START_FRAME_CFG: VOffsetT = 94;
    pub const VT_NUM_FRAMES: VOffsetT = 96;
    pub const VT_MASK_BLUR_OUTSET: VOffsetT = 98;
    pub const VT_SHARPNESS: VOffsetT = 100;
    pub const VT_SHIFT: VOffsetT = 102;
    pub const VT_TILED_DECODING: VOffsetT = 110;
    pub const VT_DECODING_TILE_WIDTH: VOffsetT = 112;
    pub const VT_DECODING_TILE_HEIGHT: VOffsetT = 114;
    pub const VT_DECODING_TILE_OVERLAP: VOffsetT = 116;
    pub const VT_STOCHASTIC_SAMPLING_GAMMA: VOffsetT = 118;
    pub const VT_PRESERVE_ORIGINAL_AFTER_INPAINT: VOffsetT = 120;
    pub const VT_TILED_DIFFUSION: VOffsetT = 122;
    pub const VT_DIFFUSION_TILE_WIDTH: VOffsetT = 124;
    pub const VT_DIFFUSION_TILE_HEIGHT: VOffsetT = 126;
    pub const VT_DIFFUSION_TILE_OVERLAP: VOffsetT = 128;
    pub const VT_UPSCALER_SCALE_FACTOR: VOffsetT = 130;
    pub const VT_SEPARATE_CLIP_L: VOffsetT = 134;
    pub const VT_CLIP_L_TEXT: VOffsetT = 136;
    pub const VT_SEPARATE_OPEN_CLIP_G: VOffsetT = 138;
    pub const VT_OPEN_CLIP_G_TEXT: VOffsetT = 140;
    pub const VT_SPEED_UP_WITH_GUIDANCE_EMBED: VOffsetT = 142;
    pub const VT_GUIDANCE_EMBED: VOffsetT = 144;
    pub const VT_RESOLUTION_DEPENDENT_SHIFT: VOffsetT = 146;
    pub const VT_TEA_CACHE_START: VOffsetT = 148;
    pub const VT_TEA_CACHE_END: VOffsetT = 150;
    pub const VT_TEA_CACHE_THRESHOLD: VOffsetT = 152;
    pub const VT_TEA_CACHE: VOffsetT = 154;
    pub const VT_TEA_CACHE_MAX_SKIP_STEPS: VOffsetT = 160;
    pub const VT_CAUSAL_INFERENCE_ENABLED: VOffsetT = 162;
    pub const VT_CAUSAL_INFERENCE: VOffsetT = 164;
    pub const VT_CAUSAL_INFERENCE_PAD: VOffsetT = 166;
    pub const VT_CFG_ZERO_STAR: VOffsetT = 168;
    pub const VT_CFG_ZERO_INIT_STEPS: VOffsetT = 170;

    /// Generation width in pixels
    pub fn width_px(&self) -> Option<u32> {
        self.start_width.map(|w| w * 64)
    }

    /// Generation height in pixels
    pub fn height_px(&self) -> Option<u32> {
        self.start_height.map(|h| h * 64)
    }

    pub fn hires_fix_enabled(&self) -> bool {
        self.hires_fix.unwrap_or(false)
    }

    /// Serialize as a finished FlatBuffers table, the form the request's
    /// `configuration` field carries
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut fbb = FlatBufferBuilder::new();
        let root = self.pack(&mut fbb);
        fbb.finish(root, None);
        fbb.finished_data().to_vec()
    }

    pub fn pack<'b>(&self, fbb: &mut FlatBufferBuilder<'b>) -> WIPOffset<TableFinishedWIPOffset> {
        let model = self.model.as_deref().map(|s| fbb.create_string(s));
        let upscaler = self.upscaler.as_deref().map(|s| fbb.create_string(s));
        let refiner_model = self.refiner_model.as_deref().map(|s| fbb.create_string(s));
        let clip_l_text = self.clip_l_text.as_deref().map(|s| fbb.create_string(s));
        let open_clip_g_text = self.open_clip_g_text.as_deref().map(|s| fbb.create_string(s));
        let controls: Vec<_> = self.controls.iter().map(|c| c.pack(fbb)).collect();
        let controls = (!controls.is_empty()).then(|| fbb.create_vector(&controls));
        let loras: Vec<_> = self.loras.iter().map(|l| l.pack(fbb)).collect();
        let loras = (!loras.is_empty()).then(|| fbb.create_vector(&loras));

        let start = fbb.start_table();
        slot(fbb, Self::VT_START_WIDTH, self.start_width.map(ushort));
        slot(fbb, Self::VT_START_HEIGHT, self.start_height.map(ushort));
        slot(fbb, Self::VT_SEED, self.seed);
        slot(fbb, Self::VT_STEPS, self.steps);
        slot(fbb, Self::VT_GUIDANCE_SCALE, self.guidance_scale);
        slot(fbb, Self::VT_STRENGTH, self.strength);
        slot(fbb, Self::VT_MODEL, model);
        slot(fbb, Self::VT_SAMPLER, self.sampler.map(byte));
        slot(fbb, Self::VT_BATCH_COUNT, self.batch_count);
        slot(fbb, Self::VT_BATCH_SIZE, self.batch_size);
        slot(fbb, Self::VT_HIRES_FIX, self.hires_fix);
        slot(fbb, Self::VT_HIRES_FIX_START_WIDTH, self.hires_fix_start_width.map(ushort));
        slot(fbb, Self::VT_HIRES_FIX_START_HEIGHT, self.hires_fix_start_height.map(ushort));
        slot(fbb, Self::VT_HIRES_FIX_STRENGTH, self.hires_fix_strength);
        slot(fbb, Self::VT_UPSCALER, upscaler);
        slot(fbb, Self::VT_SEED_MODE, self.seed_mode.map(byte));
        slot(fbb, Self::VT_CLIP_SKIP, self.clip_skip);
        slot(fbb, Self::VT_CONTROLS, controls);
        slot(fbb, Self::VT_LORAS, loras);
        slot(fbb, Self::VT_MASK_BLUR, self.mask_blur);
        slot(fbb, Self::VT_REFINER_MODEL, refiner_model);
        slot(fbb, Self::VT_ORIGINAL_IMAGE_HEIGHT, self.original_image_height);
        slot(fbb, Self::VT_ORIGINAL_IMAGE_WIDTH, self.original_image_width);
        slot(fbb, Self::VT_TARGET_IMAGE_HEIGHT, self.target_image_height);
        slot(fbb, Self::VT_TARGET_IMAGE_WIDTH, self.target_image_width);
        slot(fbb, Self::VT_REFINER_START, self.refiner_start);
        slot(fbb, Self::VT_NEGATIVE_ORIGINAL_IMAGE_HEIGHT, self.negative_original_image_height);
        slot(fbb, Self::VT_NEGATIVE_ORIGINAL_IMAGE_WIDTH, self.negative_original_image_width);
        slot(fbb, Self::VT_FPS_ID, self.fps_id);
        slot(fbb, Self::VT_MOTION_BUCKET_ID, self.motion_bucket_id);
        slot(fbb, Self::VT_COND_AUG, self.cond_aug);
        slot(fbb, Self::VT_START_FRAME_CFG, self.start_frame_cfg);
        slot(fbb, Self::VT_NUM_FRAMES, self.num_frames);
        slot(fbb, Self::VT_MASK_BLUR_OUTSET, self.mask_blur_outset);
        slot(fbb, Self::VT_SHARPNESS, self.sharpness);
        slot(fbb, Self::VT_SHIFT, self.shift);
        slot(fbb, Self::VT_TILED_DECODING, self.tiled_decoding);
        slot(fbb, Self::VT_DECODING_TILE_WIDTH, self.decoding_tile_width.map(ushort));
        slot(fbb, Self::VT_DECODING_TILE_HEIGHT, self.decoding_tile_height.map(ushort));
        slot(fbb, Self::VT_DECODING_TILE_OVERLAP, self.decoding_tile_overlap.map(ushort));
        slot(fbb, Self::VT_STOCHASTIC_SAMPLING_GAMMA, self.stochastic_sampling_gamma);
        slot(fbb, Self::VT_PRESERVE_ORIGINAL_AFTER_INPAINT, self.preserve_original_after_inpaint);
        slot(fbb, Self::VT_TILED_DIFFUSION, self.tiled_diffusion);
        slot(fbb, Self::VT_DIFFUSION_TILE_WIDTH, self.diffusion_tile_width.map(ushort));
        slot(fbb, Self::VT_DIFFUSION_TILE_HEIGHT, self.diffusion_tile_height.map(ushort));
        slot(fbb, Self::VT_DIFFUSION_TILE_OVERLAP, self.diffusion_tile_overlap.map(ushort));
        slot(fbb, Self::VT_UPSCALER_SCALE_FACTOR, self.upscaler_scale_factor.map(ubyte));
        slot(fbb, Self::VT_SEPARATE_CLIP_L, self.separate_clip_l);
        slot(fbb, Self::VT_CLIP_L_TEXT, clip_l_text);
        slot(fbb, Self::VT_SEPARATE_OPEN_CLIP_G, self.separate_open_clip_g);
        slot(fbb, Self::VT_OPEN_CLIP_G_TEXT, open_clip_g_text);
        slot(fbb, Self::VT_SPEED_UP_WITH_GUIDANCE_EMBED, self.speed_up_with_guidance_embed);
        slot(fbb, Self::VT_GUIDANCE_EMBED, self.guidance_embed);
        fbb.push_slot_always(Self::VT_RESOLUTION_DEPENDENT_SHIFT, self.resolution_dependent_shift);
        slot(fbb, Self::VT_TEA_CACHE_START, self.tea_cache_start);
        slot(fbb, Self::VT_TEA_CACHE_END, self.tea_cache_end);
        slot(fbb, Self::VT_TEA_CACHE_THRESHOLD, self.tea_cache_threshold);
        slot(fbb, Self::VT_TEA_CACHE, self.tea_cache);
        slot(fbb, Self::VT_TEA_CACHE_MAX_SKIP_STEPS, self.tea_cache_max_skip_steps.map(int));
        slot(fbb, Self::VT_CAUSAL_INFERENCE_ENABLED, self.causal_inference_enabled);
        slot(fbb, Self::VT_CAUSAL_INFERENCE, self.causal_inference);
        slot(fbb, Self::VT_CAUSAL_INFERENCE_PAD, self.causal_inference_pad);
        slot(fbb, Self::VT_CFG_ZERO_STAR, self.cfg_zero_star);
        slot(fbb, Self::VT_CFG_ZERO_INIT_STEPS, self.cfg_zero_init_steps.map(int));
        fbb.end_table(start)
    }
}

/// One control adapter entry
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Control {
    pub file: Option<String>,
    pub weight: Option<f32>,
    pub guidance_start: Option<f32>,
    pub guidance_end: Option<f32>,
    pub input_override: Option<u32>,
    pub control_mode: Option<u32>,
    pub down_sampling_rate: Option<f32>,
    pub global_average_pooling: Option<bool>,
    pub target_blocks: Vec<String>,
}

/// One LoRA entry
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LoRa {
    pub file: Option<String>,
    pub weight: Option<f32>,
    pub mode: u32,
}

impl Control {
    pub const VT_FILE: VOffsetT = 4;
    pub const VT_WEIGHT: VOffsetT = 6;
    pub const VT_GUIDANCE_START: VOffsetT = 8;
    pub const VT_GUIDANCE_END: VOffsetT = 10;
    pub const VT_GLOBAL_AVERAGE_POOLING: VOffsetT = 14;
    pub const VT_DOWN_SAMPLING_RATE: VOffsetT = 16;
    pub const VT_CONTROL_MODE: VOffsetT = 18;
    pub const VT_TARGET_BLOCKS: VOffsetT = 20;
    pub const VT_INPUT_OVERRIDE: VOffsetT = 22;

    pub fn pack<'b>(&self, fbb: &mut FlatBufferBuilder<'b>) -> WIPOffset<TableFinishedWIPOffset> {
        let file = self.file.as_deref().map(|s| fbb.create_string(s));
        let blocks: Vec<_> = self.target_blocks.iter().map(|b| fbb.create_string(b)).collect();
        let blocks = (!blocks.is_empty()).then(|| fbb.create_vector(&blocks));

        let start = fbb.start_table();
        slot(fbb, Self::VT_FILE, file);
        slot(fbb, Self::VT_WEIGHT, self.weight);
        slot(fbb, Self::VT_GUIDANCE_START, self.guidance_start);
        slot(fbb, Self::VT_GUIDANCE_END, self.guidance_end);
        slot(fbb, Self::VT_GLOBAL_AVERAGE_POOLING, self.global_average_pooling);
        slot(fbb, Self::VT_DOWN_SAMPLING_RATE, self.down_sampling_rate);
        slot(fbb, Self::VT_CONTROL_MODE, self.control_mode.map(byte));
        slot(fbb, Self::VT_TARGET_BLOCKS, blocks);
        slot(fbb, Self::VT_INPUT_OVERRIDE, self.input_override.map(byte));
        fbb.end_table(start)
    }
}

impl LoRa {
    pub const VT_FILE: VOffsetT = 4;
    pub const VT_WEIGHT: VOffsetT = 6;
    pub const VT_MODE: VOffsetT = 8;

    pub fn pack<'b>(&self, fbb: &mut FlatBufferBuilder<'b>) -> WIPOffset<TableFinishedWIPOffset> {
        let file = self.file.as_deref().map(|s| fbb.create_string(s));

        let start = fbb.start_table();
        slot(fbb, Self::VT_FILE, file);
        slot(fbb, Self::VT_WEIGHT, self.weight);
        fbb.push_slot_always(Self::VT_MODE, byte(self.mode));
        fbb.end_table(start)
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct TensorAndWeight {
    #[prost(bytes = "vec", tag = "1")]
    pub tensor: Vec<u8>,
    #[prost(float, tag = "2")]
    pub weight: f32,
}

/// All tensors sharing one hint type
#[derive(Clone, PartialEq, Message)]
pub struct HintProto {
    #[prost(string, tag = "1")]
    pub hint_type: String,
    #[prost(message, repeated, tag = "2")]
    pub tensors: Vec<TensorAndWeight>,
}

/// JSON descriptors for models the engine may not know about
#[derive(Clone, PartialEq, Message)]
pub struct MetadataOverride {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub models: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub control_nets: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub loras: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ImageGenerationRequest {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub image: Option<Vec<u8>>,
    #[prost(int32, tag = "2")]
    pub scale_factor: i32,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub mask: Option<Vec<u8>>,
    #[prost(message, repeated, tag = "4")]
    pub hints: Vec<HintProto>,
    #[prost(string, tag = "5")]
    pub prompt: String,
    #[prost(string, tag = "6")]
    pub negative_prompt: String,
    #[prost(bytes = "vec", tag = "7")]
    pub configuration: Vec<u8>,
    #[prost(message, optional, tag = "8")]
    pub metadata_override: Option<MetadataOverride>,
    #[prost(string, tag = "9")]
    pub user: String,
    #[prost(string, tag = "10")]
    pub device: String,
    #[prost(bytes = "vec", repeated, tag = "11")]
    pub contents: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SamplingStep {
    #[prost(int32, tag = "1")]
    pub step: i32,
}

#[derive(Clone, PartialEq, Message)]
pub struct Marker {}

/// Where in the pipeline the engine currently is
#[derive(Clone, PartialEq, Message)]
pub struct ImageGenerationSignpost {
    #[prost(oneof = "image_generation_signpost::Signpost", tags = "1, 2, 3, 4, 5, 6, 7, 8, 9")]
    pub signpost: Option<image_generation_signpost::Signpost>,
}

pub mod image_generation_signpost {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Signpost {
        #[prost(message, tag = "1")]
        TextEncoded(super::Marker),
        #[prost(message, tag = "2")]
        ImageEncoded(super::Marker),
        #[prost(message, tag = "3")]
        Sampling(super::SamplingStep),
        #[prost(message, tag = "4")]
        ImageDecoded(super::Marker),
        #[prost(message, tag = "5")]
        SecondPassImageUpscaled(super::Marker),
        #[prost(message, tag = "6")]
        SecondPassSampling(super::SamplingStep),
        #[prost(message, tag = "7")]
        SecondPassImageDecoded(super::Marker),
        #[prost(message, tag = "8")]
        FaceRestored(super::Marker),
        #[prost(message, tag = "9")]
        ImageUpscaled(super::Marker),
    }
}

/// One frame of the generation stream
#[derive(Clone, PartialEq, Message)]
pub struct ImageGenerationResponse {
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub generated_images: Vec<Vec<u8>>,
    #[prost(message, optional, tag = "2")]
    pub current_signpost: Option<ImageGenerationSignpost>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub preview_image: Option<Vec<u8>>,
    #[prost(int32, optional, tag = "4")]
    pub scale_factor: Option<i32>,
}

#[derive(Clone, PartialEq, Message)]
pub struct EchoRequest {
    #[prost(string, tag = "1")]
    pub name: String,
}

/// Capability discovery reply
#[derive(Clone, PartialEq, Message)]
pub struct EchoReply {
    #[prost(string, tag = "1")]
    pub message: String,
    #[prost(string, repeated, tag = "2")]
    pub files: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use flatbuffers::{ForwardsUOffset, Table, Vector};

    fn root(bytes: &[u8]) -> Table<'_> {
        let loc = u32::from_le_bytes(bytes[..4].try_into().unwrap()) as usize;
        unsafe { Table::new(bytes, loc) }
    }

    fn field<'a, T: flatbuffers::Follow<'a> + 'a>(table: &Table<'a>, slot: VOffsetT) -> Option<T::Inner> {
        unsafe { table.get::<T>(slot, None) }
    }

    #[test]
    fn test_configuration_is_a_flatbuffers_table() {
        let config = GenerationConfiguration {
            model: Some("sd_v1.5_f16.ckpt".into()),
            start_width: Some(8),
            start_height: Some(12),
            seed: Some(4_000_000_000),
            sampler: Some(10),
            steps: Some(20),
            guidance_scale: Some(4.5),
            mask_blur_outset: Some(-3),
            upscaler_scale_factor: Some(2),
            resolution_dependent_shift: true,
            ..Default::default()
        };

        let bytes = config.to_bytes();
        let table = root(&bytes);
        type C = GenerationConfiguration;
        assert_eq!(field::<ForwardsUOffset<&str>>(&table, C::VT_MODEL), Some("sd_v1.5_f16.ckpt"));
        assert_eq!(field::<u16>(&table, C::VT_START_WIDTH), Some(8));
        assert_eq!(field::<u16>(&table, C::VT_START_HEIGHT), Some(12));
        assert_eq!(field::<u32>(&table, C::VT_SEED), Some(4_000_000_000));
        assert_eq!(field::<i8>(&table, C::VT_SAMPLER), Some(10));
        assert_eq!(field::<u32>(&table, C::VT_STEPS), Some(20));
        assert_eq!(field::<f32>(&table, C::VT_GUIDANCE_SCALE), Some(4.5));
        assert_eq!(field::<i32>(&table, C::VT_MASK_BLUR_OUTSET), Some(-3));
        assert_eq!(field::<u8>(&table, C::VT_UPSCALER_SCALE_FACTOR), Some(2));
        assert_eq!(field::<bool>(&table, C::VT_RESOLUTION_DEPENDENT_SHIFT), Some(true));
        assert_eq!(config.width_px(), Some(512));
    }

    #[test]
    fn test_omitted_fields_stay_omitted() {
        let config = GenerationConfiguration {
            start_width: Some(8),
            ..Default::default()
        };
        let bytes = config.to_bytes();
        let table = root(&bytes);
        type C = GenerationConfiguration;

        assert_eq!(field::<bool>(&table, C::VT_TEA_CACHE), None);
        assert_eq!(field::<bool>(&table, C::VT_CAUSAL_INFERENCE_ENABLED), None);
        assert_eq!(field::<u32>(&table, C::VT_SEED), None);
        assert_eq!(field::<ForwardsUOffset<&str>>(&table, C::VT_MODEL), None);
        assert!(field::<ForwardsUOffset<Vector<ForwardsUOffset<Table>>>>(&table, C::VT_CONTROLS).is_none());
        // disabled shift is still written explicitly
        assert_eq!(field::<bool>(&table, C::VT_RESOLUTION_DEPENDENT_SHIFT), Some(false));
    }

    #[test]
    fn test_explicit_false_is_distinct_from_absent() {
        let disabled = GenerationConfiguration {
            causal_inference_enabled: Some(false),
            ..Default::default()
        };
        let bytes = disabled.to_bytes();
        let table = root(&bytes);
        assert_eq!(
            field::<bool>(&table, GenerationConfiguration::VT_CAUSAL_INFERENCE_ENABLED),
            Some(false)
        );
        assert_ne!(bytes, GenerationConfiguration::default().to_bytes());
    }

    #[test]
    fn test_adapter_tables() {
        let config = GenerationConfiguration {
            controls: vec![Control {
                file: Some("canny.ckpt".into()),
                weight: Some(0.8),
                control_mode: Some(2),
                target_blocks: vec!["up_blocks.1".into(), "up_blocks.2".into()],
                ..Default::default()
            }],
            loras: vec![LoRa {
                file: Some("style.safetensors".into()),
                weight: Some(0.6),
                mode: 1,
            }],
            ..Default::default()
        };
        let bytes = config.to_bytes();
        let table = root(&bytes);

        let controls =
            field::<ForwardsUOffset<Vector<ForwardsUOffset<Table>>>>(&table, GenerationConfiguration::VT_CONTROLS)
                .unwrap();
        assert_eq!(controls.len(), 1);
        let control = controls.get(0);
        assert_eq!(field::<ForwardsUOffset<&str>>(&control, Control::VT_FILE), Some("canny.ckpt"));
        assert_eq!(field::<f32>(&control, Control::VT_WEIGHT), Some(0.8));
        assert_eq!(field::<i8>(&control, Control::VT_CONTROL_MODE), Some(2));
        assert_eq!(field::<f32>(&control, Control::VT_DOWN_SAMPLING_RATE), None);
        let blocks =
            field::<ForwardsUOffset<Vector<ForwardsUOffset<&str>>>>(&control, Control::VT_TARGET_BLOCKS).unwrap();
        assert_eq!(blocks.iter().collect::<Vec<_>>(), vec!["up_blocks.1", "up_blocks.2"]);

        let loras =
            field::<ForwardsUOffset<Vector<ForwardsUOffset<Table>>>>(&table, GenerationConfiguration::VT_LORAS)
                .unwrap();
        let lora = loras.get(0);
        assert_eq!(field::<ForwardsUOffset<&str>>(&lora, LoRa::VT_FILE), Some("style.safetensors"));
        assert_eq!(field::<i8>(&lora, LoRa::VT_MODE), Some(1));
    }

    #[test]
    fn test_wide_values_saturate_to_slot_width() {
        let config = GenerationConfiguration {
            start_width: Some(70_000),
            ..Default::default()
        };
        let bytes = config.to_bytes();
        let table = root(&bytes);
        assert_eq!(field::<u16>(&table, GenerationConfiguration::VT_START_WIDTH), Some(u16::MAX));
    }

    #[test]
    fn test_envelope_round_trip() {
        let request = ImageGenerationRequest {
            prompt: "a lighthouse".into(),
            configuration: GenerationConfiguration::default().to_bytes(),
            ..Default::default()
        };
        let decoded = ImageGenerationRequest::decode(request.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded, request);
    }
}
