use async_trait::async_trait;
use std::error::Error;
use std::fmt;
use std::time::Duration;

use crate::tensor::{Tensor, TensorError};

/// Everything the store needs to register a model
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRegistration {
    /// Store key, `<name>/<version>`
    pub key: String,
    /// Backend encoding, e.g. `TF` or `ONNX`
    pub backend: String,
    /// Execution device, e.g. `CPU`
    pub device: String,
    /// Named input tensors; empty unless the backend needs them
    pub inputs: Vec<String>,
    /// Named output tensors; empty unless the backend needs them
    pub outputs: Vec<String>,
    /// Serialized model artifact
    pub blob: Vec<u8>,
}

/// Errors raised by a [`ModelStore`]
#[derive(Debug)]
pub enum StoreError {
    /// No model is registered under the key
    ModelNotFound(String),
    /// No tensor is stored under the label
    TensorNotFound(String),
    /// The store could not be reached
    Connection(String),
    /// The store rejected a command
    Command(String),
    /// A reply could not be decoded into a tensor
    Tensor(TensorError),
}

impl StoreError {
    /// Whether retrying after a pause might succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Connection(_))
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StoreError::ModelNotFound(key) => write!(f, "Model '{}' is not loaded", key),
            StoreError::TensorNotFound(label) => write!(f, "Tensor '{}' does not exist", label),
            StoreError::Connection(msg) => write!(f, "Store connection error: {}", msg),
            StoreError::Command(msg) => write!(f, "Store command failed: {}", msg),
            StoreError::Tensor(e) => write!(f, "Invalid tensor reply: {}", e),
        }
    }
}

impl Error for StoreError {}

impl From<TensorError> for StoreError {
    fn from(err: TensorError) -> Self {
        StoreError::Tensor(err)
    }
}

/// The external tensor/model store and its queue primitive.
///
/// Every process role talks to the store through this trait; the Redis
/// implementation speaks the RedisAI command set.
#[async_trait]
pub trait ModelStore: Send + Sync {
    /// Stores (or replaces) a model under `registration.key`
    async fn register_model(&self, registration: ModelRegistration) -> Result<(), StoreError>;

    /// Deletes one key; returns whether it existed
    async fn delete_key(&self, key: &str) -> Result<bool, StoreError>;

    /// Lists keys matching a glob pattern
    async fn scan(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    async fn set_tensor(&self, label: &str, tensor: &Tensor) -> Result<(), StoreError>;

    async fn get_tensor(&self, label: &str) -> Result<Tensor, StoreError>;

    /// Executes model `key`, reading `inputs` and writing `outputs`
    async fn run_model(&self, key: &str, inputs: &[String], outputs: &[String]) -> Result<(), StoreError>;

    /// Appends a value to the tail of a queue
    async fn push(&self, queue: &str, value: &str) -> Result<(), StoreError>;

    /// Pops the head of a queue, waiting up to `timeout` for a value
    async fn blocking_pop(&self, queue: &str, timeout: Duration) -> Result<Option<String>, StoreError>;
}
