mod common;

use axum::http::StatusCode;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use common::*;
use modelhub::file_manager::{self, FileManager};
use modelhub::inference::{self, InferenceService};
use modelhub::queue::QueueNames;
use modelhub::store::MemoryStore;
use modelhub::tensor::{DType, Tensor};
use modelhub::workers::{ModelAddWorker, ModelRemoveWorker, Outcome, Supervisor, TensorRemoveWorker};

fn supervisor(store: &Arc<MemoryStore>, queue: &str) -> Supervisor {
    Supervisor::new(store.clone(), queue.to_string(), None, Duration::from_millis(20))
}

/// Upload, registration, inference and cleanup across all three processes
#[tokio::test]
async fn test_model_lifecycle() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().to_path_buf();
    let store = Arc::new(MemoryStore::new());
    let queues = QueueNames::default();

    let archive = archive_with(
        "iris-id",
        model_files("iris_model", &iris_descriptor("iris_model", 1), &iris_formatter()),
    );
    let files = file_manager::router(FileManager::new(root.clone(), store.clone(), queues.clone(), Arc::new(archive)));
    let inference = inference::router(InferenceService::new(root.clone(), store.clone(), queues.clone()));

    let body = json!({"name": "iris_model", "version": 1, "id": "iris-id", "async_request": false});
    let (status, _) = send(&files, json_request("POST", "/models/", &body)).await;
    assert_eq!(status, StatusCode::OK);

    let adder = Arc::new(ModelAddWorker::new(root.clone(), store.clone(), "CPU".to_string()));
    let outcome = supervisor(&store, &queues.add_model).process_next(&adder).await.unwrap();
    assert_eq!(outcome, Some(Outcome::Done("iris_model/1".to_string())));

    store.set_runner(
        "iris_model/1",
        Arc::new(|_: &[Tensor]| -> Result<Vec<Tensor>, String> {
            Ok(vec![Tensor::new(DType::Int64, vec![1], vec![0.0]).unwrap()])
        }),
    );
    let request = json_request("POST", "/inference/iris_model/1/", &json!({"input": [[5.1, 3.5, 1.4, 0.2]]}));
    let (status, response) = send(&inference, request).await;
    assert_eq!(status, StatusCode::OK, "{}", response);
    assert_eq!(response["data"]["iris"], "Iris Setosa");

    let tensor_supervisor = supervisor(&store, &queues.delete_tensor);
    let remover = Arc::new(TensorRemoveWorker::new(store.clone()));
    while tensor_supervisor.process_next(&remover).await.unwrap().is_some() {}
    assert_eq!(store.keys(), vec!["iris_model/1"]);

    let (status, _) = send(&files, empty_request("DELETE", "/models/iris_model")).await;
    assert_eq!(status, StatusCode::OK);
    let model_remover = Arc::new(ModelRemoveWorker::new(store.clone()));
    let outcome = supervisor(&store, &queues.delete_model).process_next(&model_remover).await.unwrap();
    assert_eq!(outcome, Some(Outcome::Done("iris_model/*".to_string())));
    assert!(store.keys().is_empty());

    let request = json_request("POST", "/inference/iris_model/1/", &json!({"input": [[5.1, 3.5, 1.4, 0.2]]}));
    let (status, _) = send(&inference, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
