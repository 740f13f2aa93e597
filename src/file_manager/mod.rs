//! File-management HTTP service.
//!
//! Owns the `<root>/<name>/<version>/` tree: downloads and extracts model
//! archives, validates them, and announces additions and removals on the
//! command queues so the workers can update the store.

mod manager;
mod routes;
mod types;

pub use manager::{snake_case, FileManager, FileManagerError};
pub use routes::router;
pub use types::{CreateModelRequest, CreateOutcome, ModelDetails};
