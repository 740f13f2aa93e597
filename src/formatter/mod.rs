//! Per-model pre/post-processing.
//!
//! Each model's script folder carries a `formatter.json` describing how
//! request payloads become tensors and how output tensors become a response.
//! Loaded formatters are cached per model version.

mod cache;
mod declarative;
mod strategy;

pub use cache::FormatterCache;
pub use declarative::{DeclarativeFormatter, FormatterDefinition, PostProcess, PreProcess, Select};
pub use strategy::{FormatError, Formatter, RawInput, TensorPayload};
