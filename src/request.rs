//! Assembly of the generation request sent to the engine.

use serde_json::Value;
use tracing::{debug, info};

use crate::codec::{encode_image, encode_mask};
use crate::params::{ControlStackItem, HINT_TYPES};
use crate::schema::{HintProto, ImageGenerationRequest, MetadataOverride, TensorAndWeight};
use crate::{BridgeError, GenerationConfiguration, HostImage, HostMask, ParamSet, Result};

pub const REQUEST_USER: &str = "ComfyUI";
pub const REQUEST_DEVICE: &str = "LAPTOP";

/// One guidance image with the hint type it feeds
#[derive(Clone, Debug)]
pub struct HintInput {
    pub hint_type: String,
    pub image: HostImage,
    pub weight: f32,
}

impl HintInput {
    pub fn new(hint_type: impl Into<String>, image: HostImage, weight: f32) -> Self {
        Self {
            hint_type: hint_type.into().to_lowercase(),
            image,
            weight,
        }
    }
}

/// Everything a single generation request is built from
#[derive(Clone, Debug, Default)]
pub struct GenerationInputs {
    pub params: ParamSet,
    pub prompt: String,
    pub negative_prompt: String,
    pub image: Option<HostImage>,
    pub mask: Option<HostMask>,
    pub hints: Vec<HintInput>,
    /// Images attached to control stack entries, by stack position
    pub control_images: Vec<Option<HostImage>>,
}

/// Hints contributed by control entries carrying both an image and a hint type
pub fn control_hints(items: &[ControlStackItem], images: &[Option<HostImage>]) -> Vec<HintInput> {
    items
        .iter()
        .zip(images)
        .filter_map(|(item, image)| {
            let hint_type = item.hint_type.as_deref()?;
            let image = image.as_ref()?;
            Some(HintInput::new(hint_type, image.clone(), 1.0))
        })
        .collect()
}

fn generation_size(config: &GenerationConfiguration) -> Result<(u32, u32)> {
    match (config.width_px(), config.height_px()) {
        (Some(width), Some(height)) if width > 0 && height > 0 => Ok((width, height)),
        _ => Err(BridgeError::Image(
            "configuration has no generation size".into(),
        )),
    }
}

/// Group hints by type in engine order, encoding every frame of each hint
pub fn build_hints(hints: &[HintInput], config: &GenerationConfiguration) -> Result<Vec<HintProto>> {
    let (width, height) = generation_size(config)?;
    let hires = config.hires_fix_enabled().then(|| {
        (
            config.hires_fix_start_width.map_or(width, |w| w * 64),
            config.hires_fix_start_height.map_or(height, |h| h * 64),
        )
    });

    let mut protos = Vec::new();
    for &hint_type in HINT_TYPES {
        let mut tensors = Vec::new();
        for hint in hints.iter().filter(|h| h.hint_type == hint_type) {
            for idx in 0..hint.image.batch {
                if let Some((hires_width, hires_height)) = hires {
                    let tensor = encode_image(&hint.image, idx, hires_width, hires_height, Some(hint_type))?;
                    tensors.push(TensorAndWeight {
                        tensor: tensor.encode()?,
                        weight: 1.0,
                    });
                }
                let tensor = encode_image(&hint.image, idx, width, height, Some(hint_type))?;
                tensors.push(TensorAndWeight {
                    tensor: tensor.encode()?,
                    weight: hint.weight,
                });
            }
        }
        if !tensors.is_empty() {
            debug!(hint_type, count = tensors.len(), "encoded hint group");
            protos.push(HintProto {
                hint_type: hint_type.to_string(),
                tensors,
            });
        }
    }
    Ok(protos)
}

fn is_official(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|descriptor| descriptor.contains_key("official"))
}

fn descriptor_json(descriptors: Vec<Value>) -> Result<Option<Vec<u8>>> {
    let custom: Vec<Value> = descriptors.into_iter().filter(|d| !is_official(d)).collect();
    if custom.is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::to_vec(&custom)?))
}

fn stack_models(params: &ParamSet, key: &str) -> Vec<Value> {
    params
        .get(key)
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(|item| item.get("model").cloned()).collect())
        .unwrap_or_default()
}

/// Descriptors for non-official models, so the engine can load them
pub fn build_override(params: &ParamSet) -> Result<MetadataOverride> {
    let mut models: Vec<Value> = params.get("model_info").cloned().into_iter().collect();
    if let Some(refiner) = params.get("refiner").and_then(|r| r.get("refiner_model")) {
        models.push(refiner.clone());
    }

    Ok(MetadataOverride {
        models: descriptor_json(models)?,
        control_nets: descriptor_json(stack_models(params, "control_net"))?,
        loras: descriptor_json(stack_models(params, "lora"))?,
    })
}

/// Build the request for an already resolved configuration
pub fn build_request(inputs: &GenerationInputs, config: &GenerationConfiguration) -> Result<ImageGenerationRequest> {
    let (width, height) = generation_size(config)?;

    let image = inputs
        .image
        .as_ref()
        .map(|image| encode_image(image, 0, width, height, None)?.encode())
        .transpose()?;
    let mask = inputs
        .mask
        .as_ref()
        .map(|mask| encode_mask(mask, 0, width, height)?.encode())
        .transpose()?;

    let mut hints = inputs.hints.clone();
    hints.extend(control_hints(&inputs.params.control_stack(), &inputs.control_images));
    let hints = build_hints(&hints, config)?;

    info!(
        width,
        height,
        img2img = image.is_some(),
        inpaint = mask.is_some(),
        hint_groups = hints.len(),
        "built generation request"
    );

    Ok(ImageGenerationRequest {
        image,
        scale_factor: 1,
        mask,
        hints,
        prompt: inputs.prompt.clone(),
        negative_prompt: inputs.negative_prompt.clone(),
        configuration: config.to_bytes(),
        metadata_override: Some(build_override(&inputs.params)?),
        user: REQUEST_USER.to_string(),
        device: REQUEST_DEVICE.to_string(),
        contents: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{resolve, SampleRange, WireTensorHeader};
    use serde_json::json;

    fn config(width: u32, height: u32) -> GenerationConfiguration {
        GenerationConfiguration {
            start_width: Some(width),
            start_height: Some(height),
            ..Default::default()
        }
    }

    fn gray(height: usize, width: usize) -> HostImage {
        HostImage::filled(height, width, &[0.5, 0.5, 0.5], SampleRange::Unit)
    }

    #[test]
    fn test_hints_grouped_in_engine_order() {
        let hints = vec![
            HintInput::new("shuffle", gray(64, 64), 0.4),
            HintInput::new("Depth", gray(64, 64), 0.9),
            HintInput::new("unknown", gray(64, 64), 1.0),
            HintInput::new("shuffle", gray(64, 64), 0.6),
        ];
        let protos = build_hints(&hints, &config(1, 1)).unwrap();

        assert_eq!(protos.len(), 2);
        assert_eq!(protos[0].hint_type, "depth");
        assert_eq!(protos[0].tensors.len(), 1);
        assert_eq!(protos[0].tensors[0].weight, 0.9);
        assert_eq!(protos[1].hint_type, "shuffle");
        assert_eq!(protos[1].tensors.len(), 2);
        assert_eq!(protos[1].tensors[1].weight, 0.6);

        let depth = WireTensorHeader::read(&protos[0].tensors[0].tensor).unwrap();
        assert_eq!(depth.channels, 1);
        let shuffle = WireTensorHeader::read(&protos[1].tensors[0].tensor).unwrap();
        assert_eq!(shuffle.channels, 3);
    }

    #[test]
    fn test_hires_copy_precedes_full_size() {
        let mut config = config(2, 2);
        config.hires_fix = Some(true);
        config.hires_fix_start_width = Some(1);
        config.hires_fix_start_height = Some(1);

        let image = HostImage::new(2, 32, 32, 3, SampleRange::Unit, vec![0.25; 2 * 32 * 32 * 3]).unwrap();
        let protos = build_hints(&[HintInput::new("color", image, 0.5)], &config).unwrap();

        let tensors = &protos[0].tensors;
        assert_eq!(tensors.len(), 4);
        let sizes: Vec<(u32, f32)> = tensors
            .iter()
            .map(|t| (WireTensorHeader::read(&t.tensor).unwrap().width, t.weight))
            .collect();
        assert_eq!(sizes, vec![(64, 1.0), (128, 0.5), (64, 1.0), (128, 0.5)]);
    }

    #[test]
    fn test_control_hints_need_image_and_type() {
        let items = vec![
            ControlStackItem {
                hint_type: Some("pose".into()),
                ..Default::default()
            },
            ControlStackItem::default(),
            ControlStackItem {
                hint_type: Some("pose".into()),
                ..Default::default()
            },
        ];
        let images = vec![Some(gray(8, 8)), Some(gray(8, 8)), None];
        let hints = control_hints(&items, &images);
        assert_eq!(hints.len(), 1);
        assert_eq!(hints[0].hint_type, "pose");
        assert_eq!(hints[0].weight, 1.0);
    }

    #[test]
    fn test_override_skips_official_models() {
        let params = ParamSet::from_json_str(
            &json!({
                "model_info": {"file": "custom.ckpt", "version": "v1"},
                "refiner": {"refiner_model": {"file": "refiner.ckpt", "official": true}},
                "control_net": [
                    {"model": {"file": "cn_official.ckpt", "official": true}},
                ],
                "lora": [
                    {"model": {"file": "mine.safetensors"}},
                    {"weight": 1.0},
                ],
            })
            .to_string(),
        )
        .unwrap();

        let meta = build_override(&params).unwrap();
        let models: Value = serde_json::from_slice(&meta.models.unwrap()).unwrap();
        assert_eq!(models, json!([{"file": "custom.ckpt", "version": "v1"}]));
        assert_eq!(meta.control_nets, None);
        let loras: Value = serde_json::from_slice(&meta.loras.unwrap()).unwrap();
        assert_eq!(loras, json!([{"file": "mine.safetensors"}]));
    }

    #[test]
    fn test_build_request() {
        let params = ParamSet::new()
            .with("width", 128)
            .with("height", 64)
            .with("model_info", json!({"file": "sd_v1.5.ckpt", "official": true}));
        let config = resolve(&params, Some("v1"));

        let inputs = GenerationInputs {
            params,
            prompt: "a lighthouse".into(),
            image: Some(gray(32, 32)),
            mask: Some(HostMask::new(1, 32, 32, vec![1.0; 32 * 32]).unwrap()),
            ..Default::default()
        };
        let request = build_request(&inputs, &config).unwrap();

        assert_eq!(request.user, "ComfyUI");
        assert_eq!(request.device, "LAPTOP");
        assert_eq!(request.scale_factor, 1);
        assert_eq!(request.prompt, "a lighthouse");
        assert!(request.hints.is_empty());
        assert_eq!(request.metadata_override.as_ref().unwrap().models, None);

        let image = WireTensorHeader::read(request.image.as_ref().unwrap()).unwrap();
        assert_eq!((image.width, image.height), (128, 64));
        let mask = WireTensorHeader::read(request.mask.as_ref().unwrap()).unwrap();
        assert_eq!((mask.width, mask.height, mask.channels), (128, 64, 1));

        assert_eq!(request.configuration, config.to_bytes());
    }

    #[test]
    fn test_request_without_size_fails() {
        let inputs = GenerationInputs::default();
        assert!(build_request(&inputs, &GenerationConfiguration::default()).is_err());
    }
}
