use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use super::supervisor::{QueueWorker, WorkerError};
use crate::descriptor::{load_descriptor, BackendType, ModelLayout};
use crate::queue::{ModelCommand, VersionSelector};
use crate::store::{ModelRegistration, ModelStore};

/// Registers queued model versions with the store
pub struct ModelAddWorker {
    root: PathBuf,
    store: Arc<dyn ModelStore>,
    device: String,
}

impl ModelAddWorker {
    pub fn new(root: PathBuf, store: Arc<dyn ModelStore>, device: String) -> Self {
        Self { root, store, device }
    }
}

#[async_trait]
impl QueueWorker for ModelAddWorker {
    fn name(&self) -> &'static str {
        "model-add"
    }

    async fn handle(&self, entry: &str) -> Result<(), WorkerError> {
        let command = ModelCommand::parse(entry)?;
        let VersionSelector::Exact(version) = &command.version else {
            return Err(WorkerError::Wildcard(entry.to_string()));
        };

        let descriptor = load_descriptor(&self.root, &command.name, version)?;
        let backend = descriptor.backend.kind;
        let artifact = ModelLayout::new(&self.root, &command.name, version).artifact_path(backend);

        info!("Loading model '{}' from {}", command, artifact.display());
        let blob = tokio::fs::read(&artifact).await?;

        // Only graph-based backends need their tensors named at registration
        let (inputs, outputs) = match backend {
            BackendType::Tensorflow => (descriptor.input_labels().to_vec(), descriptor.output_labels().to_vec()),
            _ => (Vec::new(), Vec::new()),
        };

        self.store
            .register_model(ModelRegistration {
                key: command.entry(),
                backend: backend.store_backend().to_string(),
                device: self.device.clone(),
                inputs,
                outputs,
                blob,
            })
            .await?;

        info!("Model '{}' registered with backend {}", command, backend.store_backend());
        Ok(())
    }
}
