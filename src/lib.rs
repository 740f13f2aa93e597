//! modelhub: file management, inference and queue workers around a
//! RedisAI-style tensor/model store.

pub mod archive;
pub mod config;
pub mod descriptor;
pub mod file_manager;
pub mod formatter;
pub mod inference;
pub mod queue;
pub mod server;
pub mod store;
pub mod tensor;
pub mod workers;
