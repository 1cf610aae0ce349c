//! Control and LoRA stack building.
//!
//! Optional adapter fields pass through [`gate`]: a field is emitted only
//! when the adapter declares support for it and the caller supplied it.

use tracing::{debug, warn};

use crate::params::{
    capitalize, lookup, ControlNetInfo, ControlStackItem, LoraStackItem, CONTROL_INPUT_TYPES,
    CONTROL_MODES, LORA_MODES, TARGET_BLOCK_PRESETS,
};
use crate::schema::{Control, LoRa};
use crate::ModelFamily;

const DOWN_SAMPLING_MODIFIERS: &[&str] = &["tile", "blur", "lowquality"];

const SDXL_STYLE_BLOCKS: &[&str] = &["up_blocks.0.attentions.1"];
const SDXL_STYLE_LAYOUT_BLOCKS: &[&str] = &["down_blocks.2.attentions.1", "up_blocks.0.attentions.1"];
const V1_STYLE_BLOCKS: &[&str] = &["up_blocks.1"];
const V1_STYLE_LAYOUT_BLOCKS: &[&str] = &["down_blocks.2", "mid_block", "up_blocks.1"];

/// Keep `requested` only when the adapter supports the field
pub fn gate<T>(supported: bool, requested: Option<T>) -> Option<T> {
    if supported {
        requested
    } else {
        None
    }
}

/// What a single control adapter declares it can accept
#[derive(Debug, Clone, Copy)]
pub struct ControlTraits<'a> {
    info: &'a ControlNetInfo,
    input_type: Option<&'a str>,
}

impl<'a> ControlTraits<'a> {
    pub fn new(info: &'a ControlNetInfo, input_type: Option<&'a str>) -> Self {
        Self { info, input_type }
    }

    fn modifier(&self) -> Option<&str> {
        self.info.modifier.as_deref()
    }

    fn family(&self) -> Option<ModelFamily> {
        self.info.version.as_deref().and_then(ModelFamily::from_tag)
    }

    pub fn supports_down_sampling(&self) -> bool {
        let declared = self.modifier().is_some_and(|m| DOWN_SAMPLING_MODIFIERS.contains(&m));
        let selected = self
            .input_type
            .map(str::to_lowercase)
            .is_some_and(|t| DOWN_SAMPLING_MODIFIERS.contains(&t.as_str()));
        declared || selected
    }

    pub fn supports_global_average_pooling(&self) -> bool {
        self.info.global_average_pooling.unwrap_or(false)
    }

    pub fn supports_target_blocks(&self) -> bool {
        self.modifier() == Some("shuffle")
            && matches!(self.family(), Some(ModelFamily::V1 | ModelFamily::SdxlBase))
    }

    /// Block names for a preset; `None` for unknown presets
    pub fn target_blocks(&self, preset: &str) -> Option<Vec<String>> {
        let blocks: &[&str] = match (self.family(), preset) {
            (_, "All") => &[],
            (Some(ModelFamily::SdxlBase), "Style") => SDXL_STYLE_BLOCKS,
            (Some(ModelFamily::SdxlBase), "Style and Layout") => SDXL_STYLE_LAYOUT_BLOCKS,
            (Some(ModelFamily::V1), "Style") => V1_STYLE_BLOCKS,
            (Some(ModelFamily::V1), "Style and Layout") => V1_STYLE_LAYOUT_BLOCKS,
            _ => return None,
        };
        Some(blocks.iter().map(|b| b.to_string()).collect())
    }
}

/// Build one control entry, or `None` when it has no file
pub fn build_control(item: &ControlStackItem) -> Option<Control> {
    let info = item.model.as_ref()?;
    let file = info.file.clone()?;
    let traits = ControlTraits::new(info, item.input_type.as_deref());

    let input_override = item.input_type.as_deref().and_then(|t| {
        let index = lookup(CONTROL_INPUT_TYPES, &capitalize(t));
        if index.is_none() {
            warn!(input_type = t, file = %file, "unknown control input type");
        }
        index
    });
    let control_mode = item.mode.as_deref().and_then(|m| {
        let index = lookup(CONTROL_MODES, m);
        if index.is_none() {
            warn!(mode = m, file = %file, "unknown control mode");
        }
        index
    });

    let target_blocks = gate(traits.supports_target_blocks(), item.target_blocks.as_deref())
        .and_then(|preset| {
            if lookup(TARGET_BLOCK_PRESETS, preset).is_none() {
                warn!(preset, file = %file, "unknown target block preset");
            }
            traits.target_blocks(preset)
        })
        .unwrap_or_default();

    Some(Control {
        weight: item.weight,
        guidance_start: item.start,
        guidance_end: item.end,
        input_override: input_override.map(|i| i as u32),
        control_mode: control_mode.map(|i| i as u32),
        down_sampling_rate: gate(traits.supports_down_sampling(), item.down_sampling_rate),
        global_average_pooling: gate(
            traits.supports_global_average_pooling(),
            item.global_average_pooling,
        ),
        target_blocks,
        file: Some(file),
    })
}

pub fn build_controls(items: &[ControlStackItem]) -> Vec<Control> {
    items
        .iter()
        .enumerate()
        .filter_map(|(idx, item)| {
            let control = build_control(item);
            if control.is_none() {
                debug!(idx, "dropping control entry without a model file");
            }
            control
        })
        .collect()
}

/// Build one LoRA entry; needs both a file and a weight
pub fn build_lora(item: &LoraStackItem) -> Option<LoRa> {
    let file = item.model.as_ref()?.file.clone()?;
    let weight = item.weight?;

    let mode = match item.mode.as_deref() {
        None => 0,
        Some(name) => lookup(LORA_MODES, name).unwrap_or_else(|| {
            warn!(mode = name, file = %file, "unknown LoRA mode, applying everywhere");
            0
        }),
    };

    Some(LoRa {
        file: Some(file),
        weight: Some(weight),
        mode: mode as u32,
    })
}

pub fn build_loras(items: &[LoraStackItem]) -> Vec<LoRa> {
    items
        .iter()
        .enumerate()
        .filter_map(|(idx, item)| {
            let lora = build_lora(item);
            if lora.is_none() {
                debug!(idx, "dropping LoRA entry without file or weight");
            }
            lora
        })
        .collect()
}
