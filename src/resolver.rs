//! Parameter set -> [`GenerationConfiguration`].
//!
//! Resolution runs in fixed order: unconditional fields, capability-gated
//! feature blocks, upscaler/refiner extras, then the adapter stacks.

use serde_json::Value;
use tracing::{debug, warn};

use crate::adapters::{build_controls, build_loras};
use crate::params::{lookup, SAMPLERS, SEED_MODES};
use crate::{Capabilities, GenerationConfiguration, ModelProfile, ParamSet};

/// Engine seeds live in [0, 4294967295)
const SEED_MODULUS: i128 = 4_294_967_295;

const DEFAULT_REFINER_START: f32 = 0.7;

/// Pixels -> engine units of 64 pixels, truncating
pub fn to_units(px: i64) -> u32 {
    px.div_euclid(64).clamp(0, u32::MAX as i64) as u32
}

fn clamp_unit(v: f32) -> f32 {
    v.clamp(0.0, 1.0)
}

fn non_negative(v: i64) -> u32 {
    v.clamp(0, u32::MAX as i64) as u32
}

fn to_i32(v: i64) -> i32 {
    v.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

/// Index of a named entry, logging names outside the canonical list
fn list_index(list: &[&str], params: &ParamSet, key: &str) -> Option<u32> {
    let name = params.text(key)?;
    match lookup(list, name) {
        Some(index) => Some(index as u32),
        None => {
            warn!(key, name, "name not in canonical list, leaving field unset");
            None
        }
    }
}

/// Resolve a parameter set for the model identified by `version`
pub fn resolve(params: &ParamSet, version: Option<&str>) -> GenerationConfiguration {
    let profile = ModelProfile::for_version(version);
    if profile.family.is_none() {
        debug!(version, "unrecognized model version, no optional features apply");
    }

    let mut config = GenerationConfiguration::default();
    apply_common(params, &mut config);
    apply_conditional(params, &profile, &mut config);
    apply_extra(params, &mut config);
    config.controls = build_controls(&params.control_stack());
    config.loras = build_loras(&params.lora_stack());

    debug!(
        family = ?profile.family,
        controls = config.controls.len(),
        loras = config.loras.len(),
        "resolved generation configuration"
    );
    config
}

fn apply_common(params: &ParamSet, config: &mut GenerationConfiguration) {
    config.model = params.text("model").map(String::from);
    config.start_width = params.int("width").map(to_units);
    config.start_height = params.int("height").map(to_units);
    config.seed = params
        .wide_int("seed")
        .map(|seed| seed.rem_euclid(SEED_MODULUS) as u32);
    config.seed_mode = list_index(SEED_MODES, params, "seed_mode");
    config.steps = params.uint("steps");
    config.guidance_scale = params.float("cfg");
    config.strength = params.float("strength").map(clamp_unit);
    config.sampler = list_index(SAMPLERS, params, "sampler_name");
    config.batch_count = params.uint("batch_count");
    config.batch_size = params.uint("batch_size");
    config.clip_skip = params.uint("clip_skip");
    config.mask_blur = params.float("mask_blur");
    config.mask_blur_outset = params.int("mask_blur_outset").map(to_i32);
    config.sharpness = params.float("sharpness");
    config.shift = params.float("shift");
    if params.contains("preserve_original") {
        config.preserve_original_after_inpaint = Some(params.flag("preserve_original"));
    }
}

fn apply_conditional(params: &ParamSet, profile: &ModelProfile, config: &mut GenerationConfiguration) {
    // Every family accepts CFG-Zero*.
    if params.flag("cfg_zero_star") {
        config.cfg_zero_star = Some(true);
        config.cfg_zero_init_steps = params.uint("cfg_zero_star_init_steps");
    }

    if params.text("sampler_name") == Some("TCD") {
        config.stochastic_sampling_gamma = params.float("stochastic_sampling_gamma").map(clamp_unit);
    }

    if params.flag("high_res_fix") {
        config.hires_fix = Some(true);
        config.hires_fix_start_width = params.int("high_res_fix_start_width").map(to_units);
        config.hires_fix_start_height = params.int("high_res_fix_start_height").map(to_units);
        config.hires_fix_strength = params.float("high_res_fix_strength").map(clamp_unit);
    }

    if params.flag("tiled_decoding") {
        config.tiled_decoding = Some(true);
        config.decoding_tile_width = params.int("decoding_tile_width").map(to_units);
        config.decoding_tile_height = params.int("decoding_tile_height").map(to_units);
        config.decoding_tile_overlap = params.int("decoding_tile_overlap").map(to_units);
    }

    if params.flag("tiled_diffusion") {
        config.tiled_diffusion = Some(true);
        config.diffusion_tile_width = params.int("diffusion_tile_width").map(to_units);
        config.diffusion_tile_height = params.int("diffusion_tile_height").map(to_units);
        config.diffusion_tile_overlap = params.int("diffusion_tile_overlap").map(to_units);
    }

    config.resolution_dependent_shift =
        profile.supports(Capabilities::RES_DPT_SHIFT) && params.flag("res_dpt_shift");

    if profile.supports(Capabilities::CLIP_L) && params.flag("separate_clip_l") {
        config.separate_clip_l = Some(true);
        config.clip_l_text = params.text("clip_l_text").map(String::from);
    }

    if profile.supports(Capabilities::OPEN_CLIP_G) && params.flag("separate_open_clip_g") {
        config.separate_open_clip_g = Some(true);
        config.open_clip_g_text = params.text("open_clip_g_text").map(String::from);
    }

    // Only an explicit `speed_up: false` switches to a guidance embed
    if profile.supports(Capabilities::SPEED_UP)
        && params.contains("speed_up")
        && !params.flag("speed_up")
    {
        config.speed_up_with_guidance_embed = Some(false);
        config.guidance_embed = params.float("guidance_embed");
    }

    if profile.supports(Capabilities::TEA_CACHE) && params.flag("tea_cache") {
        config.tea_cache = Some(true);
        config.tea_cache_start = params.int("tea_cache_start").map(to_i32);
        config.tea_cache_end = params.int("tea_cache_end").map(to_i32);
        config.tea_cache_threshold = params.float("tea_cache_threshold").map(clamp_unit);
        config.tea_cache_max_skip_steps = params.uint("tea_cache_max_skip_steps");
    }

    if profile.supports(Capabilities::VIDEO) {
        let max = profile.max_frames.unwrap_or(u32::MAX);
        config.num_frames = params.int("num_frames").map(|n| non_negative(n).clamp(1, max));
    }

    if profile.supports(Capabilities::SVD) {
        config.fps_id = params.uint("fps");
        config.motion_bucket_id = params.uint("motion_scale").map(|m| m.min(255));
        config.cond_aug = params.float("guiding_frame_noise").map(clamp_unit);
        config.start_frame_cfg = params.float("start_frame_guidance");
    }

    if profile.supports(Capabilities::CAUSAL_INFERENCE) {
        if let Some(window) = params.int("causal_inference") {
            if window > 0 {
                config.causal_inference_enabled = Some(true);
                config.causal_inference = Some(to_i32((window + 3).div_euclid(4)));
                config.causal_inference_pad = params
                    .int("causal_inference_pad")
                    .map(|pad| to_i32(pad.div_euclid(4)));
            } else {
                config.causal_inference_enabled = Some(false);
            }
        }
    }

    if profile.supports(Capabilities::SDXL) {
        if let Some(height) = params.int("height").map(non_negative) {
            config.original_image_height = Some(height);
            config.target_image_height = Some(height);
            config.negative_original_image_height = Some(height / 2);
        }
        if let Some(width) = params.int("width").map(non_negative) {
            config.original_image_width = Some(width);
            config.target_image_width = Some(width);
            config.negative_original_image_width = Some(width / 2);
        }
    }
}

/// `{"value": {"file": ...}}` or a bare file name
fn model_file(value: &Value) -> Option<String> {
    match value {
        Value::String(file) => Some(file.clone()),
        Value::Object(map) => map
            .get("value")
            .and_then(|v| v.get("file"))
            .and_then(Value::as_str)
            .map(String::from),
        _ => None,
    }
}

fn apply_extra(params: &ParamSet, config: &mut GenerationConfiguration) {
    if let Some(upscaler) = params.get("upscaler").and_then(Value::as_object) {
        let upscaler = ParamSet::from(upscaler.clone());
        if let Some(model) = upscaler.get("upscaler_model") {
            config.upscaler = model_file(model);
            config.upscaler_scale_factor = Some(upscaler.uint("upscaler_scale_factor").unwrap_or(0));
        }
    }

    if let Some(refiner) = params.get("refiner").and_then(Value::as_object) {
        let refiner = ParamSet::from(refiner.clone());
        let file = refiner
            .get("refiner_model")
            .filter(|v| v.is_object())
            .and_then(model_file);
        if let Some(file) = file {
            config.refiner_model = Some(file);
            config.refiner_start = Some(
                refiner
                    .float("refiner_start")
                    .filter(|v| *v != 0.0)
                    .unwrap_or(DEFAULT_REFINER_START),
            );
        }
    }
}
