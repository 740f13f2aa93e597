mod common;

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use common::*;
use modelhub::store::{MemoryStore, ModelRegistration, ModelStore};
use modelhub::tensor::{DType, Tensor};
use modelhub::workers::{
    ModelAddWorker, ModelRemoveWorker, Outcome, QueueWorker, Supervisor, TensorRemoveWorker, WorkerError,
};

fn registration(key: &str) -> ModelRegistration {
    ModelRegistration {
        key: key.to_string(),
        backend: "ONNX".to_string(),
        device: "CPU".to_string(),
        inputs: vec![],
        outputs: vec![],
        blob: vec![0],
    }
}

fn add_worker(dir: &TempDir, store: &Arc<MemoryStore>) -> ModelAddWorker {
    ModelAddWorker::new(dir.path().to_path_buf(), store.clone(), "CPU".to_string())
}

#[tokio::test]
async fn test_add_registers_onnx_model_without_tensor_names() {
    let dir = TempDir::new().unwrap();
    write_model(dir.path(), "iris_model", "1", &iris_descriptor("iris_model", 1), &iris_formatter());
    let store = Arc::new(MemoryStore::new());

    add_worker(&dir, &store).handle("iris_model/1").await.unwrap();

    let model = store.model("iris_model/1").unwrap();
    assert_eq!(model.backend, "ONNX");
    assert_eq!(model.device, "CPU");
    assert!(model.inputs.is_empty());
    assert!(model.outputs.is_empty());
    assert_eq!(model.blob, b"model-bytes");
}

#[tokio::test]
async fn test_add_registers_tensorflow_model_with_tensor_names() {
    let dir = TempDir::new().unwrap();
    write_model(
        dir.path(),
        "classifier",
        "2",
        &image_descriptor("classifier", 2, "tensorflow"),
        &json!({}),
    );
    let store = Arc::new(MemoryStore::new());

    add_worker(&dir, &store).handle("classifier/2").await.unwrap();

    let model = store.model("classifier/2").unwrap();
    assert_eq!(model.backend, "TF");
    assert_eq!(model.inputs, vec!["images"]);
    assert_eq!(model.outputs, vec!["scores"]);
}

#[tokio::test]
async fn test_add_rejects_bad_entries() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    let worker = add_worker(&dir, &store);

    assert!(matches!(worker.handle("iris_model/*").await, Err(WorkerError::Wildcard(_))));
    assert!(matches!(worker.handle("iris_model").await, Err(WorkerError::Entry(_))));
    assert!(matches!(worker.handle("ghost/1").await, Err(WorkerError::Descriptor(_))));
    assert!(store.keys().is_empty());
}

#[tokio::test]
async fn test_add_missing_artifact_is_io_error() {
    let dir = TempDir::new().unwrap();
    write_model(dir.path(), "iris_model", "1", &iris_descriptor("iris_model", 1), &iris_formatter());
    std::fs::remove_file(dir.path().join("iris_model/1/iris_model.onnx")).unwrap();
    let store = Arc::new(MemoryStore::new());

    let result = add_worker(&dir, &store).handle("iris_model/1").await;
    assert!(matches!(result, Err(WorkerError::Io(_))));
}

#[tokio::test]
async fn test_remove_single_version() {
    let store = Arc::new(MemoryStore::new());
    for key in ["m/1", "m/2"] {
        store.register_model(registration(key)).await.unwrap();
    }

    ModelRemoveWorker::new(store.clone()).handle("m/1").await.unwrap();
    assert_eq!(store.keys(), vec!["m/2"]);
}

#[tokio::test]
async fn test_remove_all_versions_spares_other_models() {
    let store = Arc::new(MemoryStore::new());
    for key in ["m/1", "m/2", "mm/1"] {
        store.register_model(registration(key)).await.unwrap();
    }

    let worker = ModelRemoveWorker::new(store.clone());
    worker.handle("m/*").await.unwrap();
    assert_eq!(store.keys(), vec!["mm/1"]);

    // A repeated delivery finds nothing and still succeeds
    worker.handle("m/*").await.unwrap();
    assert_eq!(store.keys(), vec!["mm/1"]);
}

#[tokio::test]
async fn test_remove_treats_glob_characters_literally() {
    let store = Arc::new(MemoryStore::new());
    for key in ["a?b/1", "axb/1", "a?b_v2/1"] {
        store.register_model(registration(key)).await.unwrap();
    }

    ModelRemoveWorker::new(store.clone()).handle("a?b/*").await.unwrap();
    assert_eq!(store.keys(), vec!["a?b_v2/1", "axb/1"]);
}

#[tokio::test]
async fn test_tensor_remove_is_idempotent() {
    let store = Arc::new(MemoryStore::new());
    let tensor = Tensor::new(DType::Float, vec![1], vec![1.0]).unwrap();
    store.set_tensor("m_1_input_1.000001", &tensor).await.unwrap();

    let worker = TensorRemoveWorker::new(store.clone());
    worker.handle("m_1_input_1.000001").await.unwrap();
    assert!(!store.has_tensor("m_1_input_1.000001"));
    worker.handle("m_1_input_1.000001").await.unwrap();
}

#[tokio::test]
async fn test_supervised_add_parks_failures() {
    let dir = TempDir::new().unwrap();
    write_model(dir.path(), "iris_model", "1", &iris_descriptor("iris_model", 1), &iris_formatter());
    let store = Arc::new(MemoryStore::new());
    store.push("models_to_add", "ghost/1").await.unwrap();
    store.push("models_to_add", "iris_model/1").await.unwrap();

    let supervisor = Supervisor::new(
        store.clone(),
        "models_to_add".to_string(),
        Some("models_to_add:failed".to_string()),
        Duration::from_millis(20),
    );
    let worker = Arc::new(add_worker(&dir, &store));

    assert_eq!(
        supervisor.process_next(&worker).await.unwrap(),
        Some(Outcome::Failed { entry: "ghost/1".to_string(), parked: true })
    );
    assert_eq!(
        supervisor.process_next(&worker).await.unwrap(),
        Some(Outcome::Done("iris_model/1".to_string()))
    );
    assert_eq!(supervisor.process_next(&worker).await.unwrap(), None);

    assert!(store.model("iris_model/1").is_some());
    assert_eq!(store.queue_contents("models_to_add:failed"), vec!["ghost/1"]);
}

#[tokio::test]
async fn test_supervisor_run_drains_queue() {
    let store = Arc::new(MemoryStore::new());
    let supervisor = Supervisor::new(
        store.clone(),
        "tensors_to_delete".to_string(),
        None,
        Duration::from_millis(20),
    );
    let worker = Arc::new(TensorRemoveWorker::new(store.clone()));
    let running = tokio::spawn(async move { supervisor.run(worker).await });

    let tensor = Tensor::new(DType::Float, vec![1], vec![1.0]).unwrap();
    for label in ["a", "b", "c"] {
        store.set_tensor(label, &tensor).await.unwrap();
        store.push("tensors_to_delete", label).await.unwrap();
    }

    assert!(eventually(|| store.keys().is_empty()).await);
    running.abort();
}
