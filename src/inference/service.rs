use futures::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::error::Error;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::labels::TensorLabels;
use crate::descriptor::{is_plain_segment, load_descriptor, DescriptorError, InputKind, InputParameters, ModelDescriptor, ModelLayout};
use crate::formatter::{FormatError, Formatter, FormatterCache, RawInput, TensorPayload};
use crate::queue::QueueNames;
use crate::store::{ModelStore, StoreError};
use crate::tensor::{DType, Tensor};

/// A file part of a multipart request
#[derive(Debug, Clone)]
pub struct UploadedFile {
    /// Form field the file was attached under
    pub field: String,
    pub bytes: Vec<u8>,
}

/// Payload of an inference request
#[derive(Debug, Clone)]
pub enum InferenceRequest {
    /// `multipart/form-data` file parts
    Files(Vec<UploadedFile>),
    /// Raw body, expected to be JSON with an `input` field
    Body(Vec<u8>),
}

/// Failure categories of an inference call
#[derive(Debug)]
pub enum InferenceError {
    /// The descriptor could not be read from disk
    ModelNotOnDisk { key: String, details: String },
    /// The request does not carry what the model needs
    BadRequest(String),
    /// Post-processing referenced an output that does not exist
    InvalidOutputIndex { key: String, details: String },
    /// The payload does not fit the declared tensor type or shape
    InvalidTensorType { key: String, details: String },
    /// The store has no model under the key
    NotRegistered { key: String },
    /// The store failed while running the model
    Execution { key: String, details: String },
    /// Post-processing produced something other than a mapping
    NotAMapping,
    /// Anything else
    Internal { key: String, details: String },
}

impl InferenceError {
    /// Extra detail for the caller, if any
    pub fn details(&self) -> Option<String> {
        match self {
            InferenceError::InvalidOutputIndex { details, .. }
            | InferenceError::InvalidTensorType { details, .. }
            | InferenceError::Execution { details, .. }
            | InferenceError::Internal { details, .. } => Some(details.clone()),
            _ => None,
        }
    }
}

impl fmt::Display for InferenceError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            InferenceError::ModelNotOnDisk { .. } => write!(f, "Model not loaded"),
            InferenceError::BadRequest(msg) => write!(f, "{}", msg),
            InferenceError::InvalidOutputIndex { key, .. } => write!(
                f,
                "Index selected inside 'post_process' for model '{}' is invalid.",
                key
            ),
            InferenceError::InvalidTensorType { key, .. } => {
                write!(f, "Tensor type for model '{}' is invalid", key)
            }
            InferenceError::NotRegistered { key } => write!(f, "Model '{}' is not loaded", key),
            InferenceError::Execution { key, .. } => write!(f, "Error inferencing model '{}'", key),
            InferenceError::NotAMapping => write!(f, "'post_process' did not return a valid mapping"),
            InferenceError::Internal { key, .. } => write!(f, "Inference failed for model '{}'", key),
        }
    }
}

impl Error for InferenceError {}

fn format_error(key: &str, err: FormatError) -> InferenceError {
    match err {
        FormatError::InvalidOutputIndex(details) => InferenceError::InvalidOutputIndex { key: key.to_string(), details },
        FormatError::InvalidTensorType(details) => InferenceError::InvalidTensorType { key: key.to_string(), details },
        FormatError::Load(details) => InferenceError::Internal { key: key.to_string(), details },
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "inference panicked".to_string())
}

fn store_error(key: &str, err: StoreError) -> InferenceError {
    match err {
        StoreError::ModelNotFound(_) => InferenceError::NotRegistered { key: key.to_string() },
        StoreError::Tensor(e) => InferenceError::InvalidTensorType {
            key: key.to_string(),
            details: e.to_string(),
        },
        other => InferenceError::Execution {
            key: key.to_string(),
            details: other.to_string(),
        },
    }
}

/// Runs inference requests against the store.
pub struct InferenceService {
    root: PathBuf,
    store: Arc<dyn ModelStore>,
    queues: QueueNames,
    formatters: FormatterCache,
}

impl InferenceService {
    /// Creates a service reading models under `root`.
    ///
    /// # Arguments
    ///
    /// * `root` - Directory holding `<name>/<version>/` trees
    /// * `store` - Store used for tensors, execution and the tensor queue
    /// * `queues` - Queue names; generated labels go to `delete_tensor`
    pub fn new(root: PathBuf, store: Arc<dyn ModelStore>, queues: QueueNames) -> Self {
        Self {
            root,
            store,
            queues,
            formatters: FormatterCache::new(),
        }
    }

    /// Formatters loaded so far, keyed by `<name>/<version>`
    pub fn formatters(&self) -> &FormatterCache {
        &self.formatters
    }

    /// Runs `<name>/<version>` on the request payload.
    ///
    /// # Returns
    ///
    /// The post-processed mapping. Every tensor label generated for the call
    /// has been queued for removal by the time this returns.
    pub async fn infer(&self, name: &str, version: &str, request: InferenceRequest) -> Result<Value, InferenceError> {
        let key = format!("{}/{}", name, version);
        if let Some(segment) = [name, version].into_iter().find(|s| !is_plain_segment(s)) {
            return Err(InferenceError::BadRequest(format!("Invalid path segment '{}'", segment)));
        }

        let descriptor = load_descriptor(&self.root, name, version).map_err(|e| {
            let details = e.to_string();
            match e {
                DescriptorError::ModelNotFound { .. } | DescriptorError::DescriptorNotFound { .. } | DescriptorError::Io(_) => {
                    error!("Model '{}' not found: {}", key, details);
                    if self.formatters.invalidate(&key) {
                        debug!("Dropped cached formatter of model '{}'", key);
                    }
                    InferenceError::ModelNotOnDisk { key: key.clone(), details }
                }
                _ => InferenceError::Internal { key: key.clone(), details },
            }
        })?;
        debug!("Descriptor for model '{}' loaded", key);

        let labels = TensorLabels::generate(name, version, descriptor.output_count());
        let result = AssertUnwindSafe(self.run(&key, name, version, &descriptor, &labels, request))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(InferenceError::Internal {
                    key: key.clone(),
                    details: panic_message(&*panic),
                })
            });
        self.release(&labels).await;

        match &result {
            Ok(_) => info!("Inference for model '{}' succeeded", key),
            Err(e) => error!("Inference for model '{}' failed: {}", key, e),
        }
        result
    }

    async fn run(
        &self,
        key: &str,
        name: &str,
        version: &str,
        descriptor: &ModelDescriptor,
        labels: &TensorLabels,
        request: InferenceRequest,
    ) -> Result<Value, InferenceError> {
        let layout = ModelLayout::new(&self.root, name, version);
        let formatter = self
            .formatters
            .get_or_load(key, &layout.formatter_path(&descriptor.script.folder))
            .map_err(|e| format_error(key, e))?;

        let input = self.input_tensor(key, descriptor, formatter.as_ref(), request)?;
        self.store
            .set_tensor(&labels.input, &input)
            .await
            .map_err(|e| store_error(key, e))?;
        debug!("Input tensor '{}' set", labels.input);

        self.store
            .run_model(key, std::slice::from_ref(&labels.input), &labels.outputs)
            .await
            .map_err(|e| store_error(key, e))?;

        let outputs = self.collect_outputs(key, &labels.outputs).await?;

        info!("Post-processing output of model '{}'", key);
        let value = formatter.post_process(&outputs).map_err(|e| format_error(key, e))?;
        if !value.is_object() {
            return Err(InferenceError::NotAMapping);
        }
        Ok(value)
    }

    /// Pre-processes the request into the input tensor
    fn input_tensor(
        &self,
        key: &str,
        descriptor: &ModelDescriptor,
        formatter: &dyn Formatter,
        request: InferenceRequest,
    ) -> Result<Tensor, InferenceError> {
        let invalid_tensor = |details: String| InferenceError::InvalidTensorType { key: key.to_string(), details };

        if descriptor.input_kind() == InputKind::Image {
            if !descriptor.backend.kind.supports_image_input() {
                return Err(InferenceError::BadRequest(
                    "Sorry, but only tensorflow models support images as input".to_string(),
                ));
            }

            let files = match request {
                InferenceRequest::Files(files) if !files.is_empty() => files,
                _ => {
                    return Err(InferenceError::BadRequest(
                        "No input file provided. This request must be a 'multipart/form-data' request with the image under a field named 'image'"
                            .to_string(),
                    ))
                }
            };
            let Some(file) = files.iter().find(|f| f.field == "image") else {
                return Err(InferenceError::BadRequest(format!(
                    "Image for inference must be placed under a field named 'image'. Field name was '{}'",
                    files[0].field
                )));
            };

            let image = image::load_from_memory(&file.bytes)
                .map_err(|e| InferenceError::BadRequest(format!("Input image could not be decoded: {}", e)))?;
            info!("Input image for model '{}' decoded", key);

            let payload = formatter.pre_process(RawInput::Image(image)).map_err(|e| format_error(key, e))?;
            return Tensor::new(DType::Float, payload.shape, payload.values).map_err(|e| invalid_tensor(e.to_string()));
        }

        let body = match request {
            InferenceRequest::Body(body) => body,
            InferenceRequest::Files(_) => {
                return Err(InferenceError::BadRequest(
                    "Expected a JSON body with an 'input' field".to_string(),
                ))
            }
        };
        let mut document: Value = serde_json::from_slice(&body)
            .map_err(|e| InferenceError::BadRequest(format!("Request body is not valid JSON: {}", e)))?;
        let input = document
            .get_mut("input")
            .map(Value::take)
            .ok_or_else(|| InferenceError::BadRequest("Request body must contain an 'input' field".to_string()))?;

        let TensorPayload { shape, values } = formatter
            .pre_process(RawInput::Json(input))
            .map_err(|e| format_error(key, e))?;

        match &descriptor.backend.parameters.input {
            InputParameters::Shaped { dtype, shape: declared, .. } => {
                let dtype = DType::parse(dtype).ok_or_else(|| invalid_tensor(format!("Unknown dtype '{}'", dtype)))?;
                let declared = declared
                    .iter()
                    .map(|&d| usize::try_from(d).map_err(|_| invalid_tensor(format!("Invalid dimension {}", d))))
                    .collect::<Result<Vec<_>, _>>()?;
                Tensor::new(dtype, declared, values).map_err(|e| invalid_tensor(e.to_string()))
            }
            InputParameters::Labeled { .. } => {
                Tensor::new(DType::Float, shape, values).map_err(|e| invalid_tensor(e.to_string()))
            }
        }
    }

    /// Reads the output tensors in label order, stopping at the first one
    /// the run did not produce.
    async fn collect_outputs(&self, key: &str, labels: &[String]) -> Result<Vec<Tensor>, InferenceError> {
        let mut outputs = Vec::with_capacity(labels.len());
        for label in labels {
            match self.store.get_tensor(label).await {
                Ok(tensor) => outputs.push(tensor),
                Err(StoreError::TensorNotFound(_)) => {
                    warn!("Output tensor '{}' of model '{}' missing", label, key);
                    break;
                }
                Err(e) => return Err(store_error(key, e)),
            }
        }
        Ok(outputs)
    }

    /// Queues every label of the call for removal
    async fn release(&self, labels: &TensorLabels) {
        for label in labels.all() {
            if let Err(e) = self.store.push(&self.queues.delete_tensor, label).await {
                error!("Could not queue tensor '{}' for removal: {}", label, e);
            }
        }
    }
}
