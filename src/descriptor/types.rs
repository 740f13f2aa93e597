use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// File that every script folder must provide
pub const FORMATTER_ENTRY_POINT: &str = "formatter.json";

/// Backend a model artifact was produced with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    Tensorflow,
    Spark,
    Sklearn,
    Pytorch,
    Onnx,
}

impl BackendType {
    /// Extension of the artifact file inside the version directory
    pub fn artifact_extension(&self) -> &'static str {
        match self {
            BackendType::Tensorflow => "pb",
            BackendType::Spark | BackendType::Sklearn | BackendType::Onnx => "onnx",
            BackendType::Pytorch => "pt",
        }
    }

    /// Backend encoding the store expects at registration
    pub fn store_backend(&self) -> &'static str {
        match self {
            BackendType::Tensorflow => "TF",
            BackendType::Pytorch => "TORCH",
            BackendType::Spark | BackendType::Sklearn | BackendType::Onnx => "ONNX",
        }
    }

    /// Whether the store accepts images as input for this backend
    pub fn supports_image_input(&self) -> bool {
        matches!(self, BackendType::Tensorflow)
    }
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendType::Tensorflow => "tensorflow",
            BackendType::Spark => "spark",
            BackendType::Sklearn => "sklearn",
            BackendType::Pytorch => "pytorch",
            BackendType::Onnx => "onnx",
        };
        f.write_str(name)
    }
}

/// Kind of payload a model consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    Image,
    Number,
    Text,
}

/// Input parameters; tensorflow models name their tensors, the rest declare dtype and shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputParameters {
    Labeled {
        #[serde(rename = "type")]
        kind: InputKind,
        labels: Vec<String>,
    },
    Shaped {
        #[serde(rename = "type")]
        kind: InputKind,
        dtype: String,
        shape: Vec<i64>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutputParameters {
    Labeled { labels: Vec<String> },
    Shaped { shape: Vec<i64> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendParameters {
    pub input: InputParameters,
    pub output: OutputParameters,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backend {
    #[serde(rename = "type")]
    pub kind: BackendType,
    pub parameters: BackendParameters,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    pub folder: String,
}

/// The `model` object of a descriptor file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub name: String,
    pub version: u32,
    pub backend: Backend,
    pub script: Script,
}

/// Top-level shape of `<name>.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptorFile {
    pub model: ModelDescriptor,
}

impl ModelDescriptor {
    pub fn input_kind(&self) -> InputKind {
        match &self.backend.parameters.input {
            InputParameters::Labeled { kind, .. } | InputParameters::Shaped { kind, .. } => *kind,
        }
    }

    /// Named input tensors (tensorflow only)
    pub fn input_labels(&self) -> &[String] {
        match &self.backend.parameters.input {
            InputParameters::Labeled { labels, .. } => labels,
            InputParameters::Shaped { .. } => &[],
        }
    }

    /// Named output tensors (tensorflow only)
    pub fn output_labels(&self) -> &[String] {
        match &self.backend.parameters.output {
            OutputParameters::Labeled { labels } => labels,
            OutputParameters::Shaped { .. } => &[],
        }
    }

    /// Number of output tensors a run produces.
    ///
    /// Labeled outputs yield one tensor per label; shaped outputs are `[1, n]`
    /// and yield `n` tensors.
    pub fn output_count(&self) -> usize {
        match &self.backend.parameters.output {
            OutputParameters::Labeled { labels } => labels.len(),
            OutputParameters::Shaped { shape } => {
                shape.get(1).copied().unwrap_or(1).max(0) as usize
            }
        }
    }

    /// Store key of this model, `<name>/<version>`
    pub fn store_key(&self) -> String {
        format!("{}/{}", self.name, self.version)
    }
}

/// Whether `segment` can name a direct child of a directory.
///
/// Model names, versions and archive ids all end up as path components.
pub fn is_plain_segment(segment: &str) -> bool {
    !segment.is_empty() && segment != "." && segment != ".." && !segment.contains(['/', '\\'])
}

/// Paths that make up one model version on disk.
#[derive(Debug, Clone)]
pub struct ModelLayout {
    pub version_dir: PathBuf,
    name: String,
}

impl ModelLayout {
    pub fn new(root: &Path, name: &str, version: &str) -> Self {
        Self {
            version_dir: root.join(name).join(version),
            name: name.to_string(),
        }
    }

    pub fn descriptor_path(&self) -> PathBuf {
        self.version_dir.join(format!("{}.json", self.name))
    }

    pub fn artifact_path(&self, backend: BackendType) -> PathBuf {
        self.version_dir
            .join(format!("{}.{}", self.name, backend.artifact_extension()))
    }

    pub fn script_dir(&self, folder: &str) -> PathBuf {
        self.version_dir.join(folder)
    }

    pub fn formatter_path(&self, folder: &str) -> PathBuf {
        self.script_dir(folder).join(FORMATTER_ENTRY_POINT)
    }
}
