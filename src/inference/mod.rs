//! # Inference Module
//!
//! Runs one model version per request against the store.
//!
//! ## Key Components
//!
//! - `InferenceService`: resolves the descriptor and formatter, stores the
//!   input tensor, runs the model and post-processes the outputs
//! - `TensorLabels`: per-call input/output tensor labels
//! - `router`: the `/inference/{name}/{version}/` HTTP surface
//!
//! ## Cleanup
//!
//! Every label generated for a call is pushed once onto the tensor queue
//! before the call returns, whatever the outcome, so the tensor removal
//! worker can drop the ephemeral tensors.

mod labels;
mod routes;
mod service;

pub use labels::{next_timestamp, TensorLabels};
pub use routes::router;
pub use service::{InferenceError, InferenceRequest, InferenceService, UploadedFile};
