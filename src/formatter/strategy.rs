use image::DynamicImage;
use serde_json::Value;
use std::error::Error;
use std::fmt;

use crate::tensor::{Tensor, TensorError};

/// Request payload handed to pre-processing
pub enum RawInput {
    /// Decoded image from a multipart upload
    Image(DynamicImage),
    /// The `input` field of a JSON body
    Json(Value),
}

/// Pre-processed values ready to be stored as a tensor
#[derive(Debug, Clone, PartialEq)]
pub struct TensorPayload {
    /// Shape inferred from the payload
    pub shape: Vec<usize>,
    /// Row-major values
    pub values: Vec<f64>,
}

/// Errors raised by formatter loading or execution
#[derive(Debug)]
pub enum FormatError {
    /// Post-processing referenced an output or label that does not exist
    InvalidOutputIndex(String),
    /// The payload cannot be turned into a tensor of the expected type
    InvalidTensorType(String),
    /// The formatter definition could not be loaded
    Load(String),
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FormatError::InvalidOutputIndex(msg) => write!(f, "Invalid output index: {}", msg),
            FormatError::InvalidTensorType(msg) => write!(f, "Invalid tensor type: {}", msg),
            FormatError::Load(msg) => write!(f, "Formatter could not be loaded: {}", msg),
        }
    }
}

impl Error for FormatError {}

impl From<TensorError> for FormatError {
    fn from(err: TensorError) -> Self {
        FormatError::InvalidTensorType(err.to_string())
    }
}

/// Per-model conversion between application payloads and tensors.
pub trait Formatter: Send + Sync {
    /// Turns the request payload into tensor values
    fn pre_process(&self, input: RawInput) -> Result<TensorPayload, FormatError>;

    /// Turns the model's output tensors, in output order, into a response value
    fn post_process(&self, outputs: &[Tensor]) -> Result<Value, FormatError>;
}
