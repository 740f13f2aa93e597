use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use super::supervisor::{QueueWorker, WorkerError};
use crate::store::ModelStore;

/// Deletes single tensors queued after inference
pub struct TensorRemoveWorker {
    store: Arc<dyn ModelStore>,
}

impl TensorRemoveWorker {
    pub fn new(store: Arc<dyn ModelStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl QueueWorker for TensorRemoveWorker {
    fn name(&self) -> &'static str {
        "tensor-remove"
    }

    async fn handle(&self, entry: &str) -> Result<(), WorkerError> {
        if self.store.delete_key(entry).await? {
            info!("Tensor '{}' removed from store", entry);
        } else {
            debug!("Tensor '{}' was already gone", entry);
        }
        Ok(())
    }
}
