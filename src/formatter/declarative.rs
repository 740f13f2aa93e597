use image::imageops::FilterType;
use image::DynamicImage;
use ndarray::Array4;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use super::strategy::{FormatError, Formatter, RawInput, TensorPayload};
use crate::tensor::{flatten_json, Tensor};

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PreProcess {
    /// Pass numeric JSON through unchanged
    Identity,
    /// Divide every numeric value by `divisor`
    Scale { divisor: f64 },
    /// Resize an RGB image and divide channel values by `divisor`
    Image {
        width: Option<u32>,
        height: Option<u32>,
        #[serde(default = "default_divisor")]
        divisor: f64,
    },
}

fn default_divisor() -> f64 {
    1.0
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Select {
    First,
    Argmax,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PostProcess {
    /// Map one output value to a class label
    Label {
        key: String,
        #[serde(default)]
        output: usize,
        select: Select,
        #[serde(default)]
        offset: i64,
        #[serde(default)]
        labels: HashMap<String, String>,
        labels_file: Option<String>,
    },
    /// Return every output's values under `key`
    Raw { key: String },
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct FormatterDefinition {
    pub pre_process: PreProcess,
    pub post_process: PostProcess,
}

/// [`Formatter`] described by a `formatter.json` document.
#[derive(Debug, Clone)]
pub struct DeclarativeFormatter {
    definition: FormatterDefinition,
}

/// Reads a labels file: either `{"0": "cat", ...}` or `["cat", ...]`
fn read_labels(path: &Path) -> Result<HashMap<String, String>, FormatError> {
    let content = fs::read_to_string(path)
        .map_err(|e| FormatError::Load(format!("{}: {}", path.display(), e)))?;
    let value: Value = serde_json::from_str(&content)
        .map_err(|e| FormatError::Load(format!("{}: {}", path.display(), e)))?;

    let text = |v: &Value| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string());
    match value {
        Value::Object(map) => Ok(map.iter().map(|(k, v)| (k.clone(), text(v))).collect()),
        Value::Array(items) => Ok(items.iter().enumerate().map(|(i, v)| (i.to_string(), text(v))).collect()),
        _ => Err(FormatError::Load(format!("{}: labels must be an object or array", path.display()))),
    }
}

impl DeclarativeFormatter {
    pub fn new(definition: FormatterDefinition) -> Self {
        Self { definition }
    }

    /// Loads `formatter.json`, resolving any labels file against its folder.
    pub fn load(path: &Path) -> Result<Self, FormatError> {
        let content = fs::read_to_string(path)
            .map_err(|e| FormatError::Load(format!("{}: {}", path.display(), e)))?;
        let mut definition: FormatterDefinition = serde_json::from_str(&content)
            .map_err(|e| FormatError::Load(format!("{}: {}", path.display(), e)))?;

        if let PostProcess::Label { labels, labels_file: Some(file), .. } = &mut definition.post_process {
            let folder = path.parent().unwrap_or_else(|| Path::new("."));
            labels.extend(read_labels(&folder.join(file.as_str()))?);
        }

        Ok(Self { definition })
    }

    fn image_payload(image: DynamicImage, width: Option<u32>, height: Option<u32>, divisor: f64) -> TensorPayload {
        let image = match (width, height) {
            (Some(w), Some(h)) => image.resize_exact(w, h, FilterType::Triangle),
            _ => image,
        };
        let rgb = image.to_rgb8();
        let (w, h) = rgb.dimensions();

        let array = Array4::from_shape_fn((1, h as usize, w as usize, 3), |(_, y, x, c)| {
            rgb.get_pixel(x as u32, y as u32)[c] as f64 / divisor
        });

        TensorPayload {
            shape: array.shape().to_vec(),
            values: array.iter().copied().collect(),
        }
    }
}

impl Formatter for DeclarativeFormatter {
    fn pre_process(&self, input: RawInput) -> Result<TensorPayload, FormatError> {
        match (&self.definition.pre_process, input) {
            (PreProcess::Image { width, height, divisor }, RawInput::Image(image)) => {
                Ok(Self::image_payload(image, *width, *height, *divisor))
            }
            (PreProcess::Image { .. }, RawInput::Json(_)) => Err(FormatError::InvalidTensorType(
                "image pre-processing requires an image input".to_string(),
            )),
            (_, RawInput::Image(image)) => Ok(Self::image_payload(image, None, None, 1.0)),
            (PreProcess::Identity, RawInput::Json(value)) => {
                let (shape, values) = flatten_json(&value)?;
                Ok(TensorPayload { shape, values })
            }
            (PreProcess::Scale { divisor }, RawInput::Json(value)) => {
                let (shape, values) = flatten_json(&value)?;
                Ok(TensorPayload {
                    shape,
                    values: values.into_iter().map(|v| v / divisor).collect(),
                })
            }
        }
    }

    fn post_process(&self, outputs: &[Tensor]) -> Result<Value, FormatError> {
        match &self.definition.post_process {
            PostProcess::Label { key, output, select, offset, labels, .. } => {
                let tensor = outputs.get(*output).ok_or_else(|| {
                    FormatError::InvalidOutputIndex(format!(
                        "output {} requested but the model produced {}",
                        output,
                        outputs.len()
                    ))
                })?;

                let raw = match select {
                    Select::First => tensor.values.first().map(|v| *v as i64),
                    Select::Argmax => tensor.argmax().map(|i| i as i64),
                }
                .ok_or_else(|| FormatError::InvalidOutputIndex(format!("output {} is empty", output)))?;

                let index = raw + offset;
                let label = labels.get(&index.to_string()).ok_or_else(|| {
                    FormatError::InvalidOutputIndex(format!("no label for class {}", index))
                })?;

                let mut map = Map::new();
                map.insert(key.clone(), Value::String(label.clone()));
                Ok(Value::Object(map))
            }
            PostProcess::Raw { key } => {
                let values: Vec<Value> = outputs.iter().map(|t| json!(t.values)).collect();
                let mut map = Map::new();
                map.insert(key.clone(), Value::Array(values));
                Ok(Value::Object(map))
            }
        }
    }
}
