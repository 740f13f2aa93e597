mod memory;
mod redisai;
mod store;

pub use redisai::RedisStore;
pub use memory::{MemoryStore, ModelRunner};
pub use store::{ModelRegistration, ModelStore, StoreError};
