//! Open-ended generation parameters as supplied by the host.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::{BridgeError, Result};

pub const SAMPLERS: &[&str] = &[
    "DPM++ 2M Karras",
    "Euler A",
    "DDIM",
    "PLMS",
    "DPM++ SDE Karras",
    "UniPC",
    "LCM",
    "Euler A Substep",
    "DPM++ SDE Substep",
    "TCD",
    "Euler A Trailing",
    "DPM++ SDE Trailing",
    "DPM++ 2M AYS",
    "Euler A AYS",
    "DPM++ SDE AYS",
    "DPM++ 2M Trailing",
    "DDIM Trailing",
    "UniPC Trailing",
    "UniPC AYS",
];

pub const SEED_MODES: &[&str] = &["Legacy", "TorchCpuCompatible", "ScaleAlike", "NvidiaGpuCompatible"];

pub const CONTROL_MODES: &[&str] = &["Balanced", "Prompt", "Control"];

pub const CONTROL_INPUT_TYPES: &[&str] = &[
    "Unspecified",
    "Custom",
    "Depth",
    "Canny",
    "Scribble",
    "Pose",
    "Normalbae",
    "Color",
    "Lineart",
    "Softedge",
    "Seg",
    "Inpaint",
    "Ip2p",
    "Shuffle",
    "Mlsd",
    "Tile",
    "Blur",
    "Lowquality",
    "Gray",
];

pub const LORA_MODES: &[&str] = &["All", "Base", "Refiner"];

pub const TARGET_BLOCK_PRESETS: &[&str] = &["All", "Style", "Style and Layout"];

/// Hint types in the order the engine receives them
pub const HINT_TYPES: &[&str] = &["depth", "pose", "scribble", "color", "shuffle", "custom"];

/// Position of `name` in a canonical list
pub fn lookup(list: &[&str], name: &str) -> Option<usize> {
    list.iter().position(|entry| *entry == name)
}

/// Upper-case the first character and lower-case the rest
pub fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// Loosely typed parameter map.
///
/// Numeric getters treat anything that does not parse as a finite number
/// as zero; a key holding `null` counts as absent.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamSet(Map<String, Value>);

impl ParamSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(json).map_err(|e| BridgeError::Settings(e.to_string()))?;
        match value {
            Value::Object(map) => Ok(ParamSet(map)),
            other => Err(BridgeError::Settings(format!(
                "parameters must be an object, got {}",
                other
            ))),
        }
    }

    /// Builder-style insert
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn number(&self, key: &str) -> Option<f64> {
        self.get(key).map(finite_or_zero)
    }

    pub fn float(&self, key: &str) -> Option<f32> {
        self.number(key).map(|v| v as f32)
    }

    /// Integer value, floored. Integral JSON numbers are read exactly,
    /// without a detour through `f64`.
    pub fn wide_int(&self, key: &str) -> Option<i128> {
        let value = self.get(key)?;
        let exact = match value {
            Value::Number(n) => n.as_i64().map(i128::from).or_else(|| n.as_u64().map(i128::from)),
            Value::String(s) => s.trim().parse::<i128>().ok(),
            _ => None,
        };
        Some(exact.unwrap_or_else(|| finite_or_zero(value).floor() as i128))
    }

    /// Integer value, floored and saturating at the i64 range
    pub fn int(&self, key: &str) -> Option<i64> {
        self.wide_int(key)
            .map(|v| v.clamp(i64::MIN as i128, i64::MAX as i128) as i64)
    }

    /// Non-negative integer, saturating at the u32 range
    pub fn uint(&self, key: &str) -> Option<u32> {
        self.int(key).map(|v| v.clamp(0, u32::MAX as i64) as u32)
    }

    /// Truthiness of a value; absent keys are false
    pub fn flag(&self, key: &str) -> bool {
        match self.get(key) {
            None => false,
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Array(a)) => !a.is_empty(),
            Some(Value::Object(o)) => !o.is_empty(),
            Some(Value::Null) => false,
        }
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn control_stack(&self) -> Vec<ControlStackItem> {
        self.stack("control_net")
    }

    pub fn lora_stack(&self) -> Vec<LoraStackItem> {
        self.stack("lora")
    }

    fn stack<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Vec<T> {
        let Some(Value::Array(items)) = self.get(key) else {
            return Vec::new();
        };
        items
            .iter()
            .enumerate()
            .filter_map(|(idx, item)| match serde_json::from_value(item.clone()) {
                Ok(parsed) => Some(parsed),
                Err(e) => {
                    warn!(key, idx, error = %e, "skipping malformed adapter entry");
                    None
                }
            })
            .collect()
    }
}

impl From<Map<String, Value>> for ParamSet {
    fn from(map: Map<String, Value>) -> Self {
        ParamSet(map)
    }
}

fn finite_or_zero(value: &Value) -> f64 {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    };
    parsed.filter(|v| v.is_finite()).unwrap_or(0.0)
}

/// Control adapter descriptor as reported by the engine's model listing
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlNetInfo {
    pub file: Option<String>,
    pub name: Option<String>,
    pub version: Option<String>,
    pub modifier: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub global_average_pooling: Option<bool>,
}

/// One entry of the control adapter stack
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlStackItem {
    pub model: Option<ControlNetInfo>,
    pub input_type: Option<String>,
    pub mode: Option<String>,
    pub weight: Option<f32>,
    pub start: Option<f32>,
    pub end: Option<f32>,
    pub global_average_pooling: Option<bool>,
    pub down_sampling_rate: Option<f32>,
    pub target_blocks: Option<String>,
    pub hint_type: Option<String>,
}

/// LoRA descriptor as reported by the engine's model listing
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LoraInfo {
    pub file: Option<String>,
    pub name: Option<String>,
    pub version: Option<String>,
    pub prefix: Option<String>,
    pub mode: Option<String>,
}

/// One entry of the LoRA stack
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LoraStackItem {
    pub model: Option<LoraInfo>,
    pub weight: Option<f32>,
    pub mode: Option<String>,
}
