use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use super::supervisor::{QueueWorker, WorkerError};
use crate::queue::ModelCommand;
use crate::store::ModelStore;

/// Removes every store key matching a queued `<name>/<version>` or `<name>/*`
pub struct ModelRemoveWorker {
    store: Arc<dyn ModelStore>,
}

impl ModelRemoveWorker {
    pub fn new(store: Arc<dyn ModelStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl QueueWorker for ModelRemoveWorker {
    fn name(&self) -> &'static str {
        "model-remove"
    }

    async fn handle(&self, entry: &str) -> Result<(), WorkerError> {
        let command = ModelCommand::parse(entry)?;
        let keys = self.store.scan(&command.scan_pattern()).await?;
        debug!("Keys matching '{}': {:?}", command, keys);

        for key in &keys {
            if self.store.delete_key(key).await? {
                info!("Model '{}' removed from store", key);
            }
        }

        if keys.is_empty() {
            info!("No store keys matched '{}'", command);
        }
        Ok(())
    }
}
