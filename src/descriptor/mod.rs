//! Model descriptors and the on-disk layout they live in.
//!
//! A model version is a directory `root/<name>/<version>/` holding
//! `<name>.json`, the backend artifact and a script folder. The descriptor is
//! validated against a JSON schema before anything else touches the version.

mod schema;
mod types;
mod validator;

pub use schema::{validate_create_request, validate_descriptor, SchemaViolation};
pub use types::{
    is_plain_segment, Backend, BackendParameters, BackendType, DescriptorFile, InputKind, InputParameters,
    ModelDescriptor, ModelLayout, OutputParameters, Script, FORMATTER_ENTRY_POINT,
};
pub use validator::{load_descriptor, validate_model_files, DescriptorError};
