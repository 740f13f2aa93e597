mod common;

use axum::http::StatusCode;
use axum::Router;
use serde_json::json;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;

use async_trait::async_trait;
use common::*;
use modelhub::archive::{ArchiveError, ArchiveSource};
use modelhub::file_manager::{router, FileManager};
use modelhub::queue::QueueNames;
use modelhub::store::MemoryStore;

struct Harness {
    dir: TempDir,
    store: Arc<MemoryStore>,
    router: Router,
}

impl Harness {
    fn new(archive: FakeArchive) -> Self {
        Self::with_source(Arc::new(archive))
    }

    fn with_source(archive: Arc<dyn ArchiveSource>) -> Self {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let manager = FileManager::new(dir.path().to_path_buf(), store.clone(), QueueNames::default(), archive);
        Self { router: router(manager), dir, store }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn added(&self) -> Vec<String> {
        self.store.queue_contents("models_to_add")
    }

    fn deleted(&self) -> Vec<String> {
        self.store.queue_contents("models_to_delete")
    }
}

fn iris_archive(id: &str, declared_name: &str, declared_version: u32) -> FakeArchive {
    archive_with(
        id,
        model_files("iris_model", &iris_descriptor(declared_name, declared_version), &iris_formatter()),
    )
}

#[tokio::test]
async fn test_sync_create_then_list() {
    let h = Harness::new(iris_archive("iris-id", "iris_model", 1));

    let body = json!({"name": "iris_model", "version": 1, "id": "iris-id", "async_request": false});
    let (status, response) = send(&h.router, json_request("POST", "/models/", &body)).await;
    assert_eq!(status, StatusCode::OK, "{}", response);
    assert_eq!(response["message"], "Model 'iris_model/1' is valid and ready to go");
    assert_eq!(h.added(), vec!["iris_model/1"]);

    let (status, response) = send(&h.router, empty_request("GET", "/models/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["data"], json!(["iris_model"]));
}

#[tokio::test]
async fn test_create_normalizes_name() {
    let h = Harness::new(iris_archive("iris-id", "iris_model", 1));

    let body = json!({"name": "IrisModel", "version": 1, "id": "iris-id", "async_request": false});
    let (status, _) = send(&h.router, json_request("POST", "/models/", &body)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(h.root().join("iris_model/1/iris_model.onnx").is_file());
}

#[tokio::test]
async fn test_async_create_accepts_then_registers() {
    let h = Harness::new(iris_archive("iris-id", "iris_model", 1));

    // async_request defaults to true
    let body = json!({"name": "iris_model", "version": 1, "id": "iris-id"});
    let (status, _) = send(&h.router, json_request("POST", "/models/", &body)).await;
    assert_eq!(status, StatusCode::CREATED);

    assert!(eventually(|| h.added() == vec!["iris_model/1"]).await);
}

#[tokio::test]
async fn test_create_with_name_conflict_cleans_up() {
    let h = Harness::new(iris_archive("iris-id", "other_model", 1));

    let body = json!({"name": "iris_model", "version": 1, "id": "iris-id", "async_request": false});
    let (status, response) = send(&h.router, json_request("POST", "/models/", &body)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(response["error"], "Conflict");

    assert!(eventually(|| !h.root().join("iris_model").exists()).await);
    assert_eq!(h.deleted(), vec!["iris_model/1"]);
    assert!(h.added().is_empty());
}

#[tokio::test]
async fn test_create_with_failed_download_cleans_up() {
    let h = Harness::new(FakeArchive::new());

    let body = json!({"name": "iris_model", "version": 1, "id": "missing", "async_request": false});
    let (status, _) = send(&h.router, json_request("POST", "/models/", &body)).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(eventually(|| !h.root().join("iris_model").exists()).await);
}

/// Holds every download until the gate opens
struct GatedArchive {
    inner: FakeArchive,
    gate: Arc<Notify>,
}

#[async_trait]
impl ArchiveSource for GatedArchive {
    async fn download_and_extract(&self, id: &str, destination: &Path) -> Result<(), ArchiveError> {
        self.gate.notified().await;
        self.inner.download_and_extract(id, destination).await
    }
}

#[tokio::test]
async fn test_sync_create_finishes_after_client_leaves() {
    let gate = Arc::new(Notify::new());
    let h = Harness::with_source(Arc::new(GatedArchive {
        inner: iris_archive("iris-id", "iris_model", 1),
        gate: gate.clone(),
    }));

    let body = json!({"name": "iris_model", "version": 1, "id": "iris-id", "async_request": false});
    let request = send(&h.router, json_request("POST", "/models/", &body));
    assert!(tokio::time::timeout(Duration::from_millis(50), request).await.is_err());

    gate.notify_one();
    assert!(eventually(|| h.added() == vec!["iris_model/1"]).await);
    assert!(h.root().join("iris_model/1/iris_model.onnx").is_file());
}

#[tokio::test]
async fn test_abandoned_sync_create_still_cleans_up() {
    let gate = Arc::new(Notify::new());
    let h = Harness::with_source(Arc::new(GatedArchive {
        inner: iris_archive("iris-id", "other_model", 1),
        gate: gate.clone(),
    }));

    let body = json!({"name": "iris_model", "version": 1, "id": "iris-id", "async_request": false});
    let request = send(&h.router, json_request("POST", "/models/", &body));
    assert!(tokio::time::timeout(Duration::from_millis(50), request).await.is_err());

    gate.notify_one();
    assert!(eventually(|| !h.root().join("iris_model").exists() && h.deleted() == vec!["iris_model/1"]).await);
    assert!(h.added().is_empty());
}

#[tokio::test]
async fn test_create_rejects_invalid_body() {
    let h = Harness::new(FakeArchive::new());

    let body = json!({"name": "iris_model", "version": 0, "id": "x"});
    let (status, response) = send(&h.router, json_request("POST", "/models/", &body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["error"], "Validation Error");

    let body = json!({"name": "iris_model", "version": 1, "id": "x", "extra": true});
    let (status, _) = send(&h.router, json_request("POST", "/models/", &body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(fs::read_dir(h.root()).unwrap().next().is_none());
}

#[tokio::test]
async fn test_create_existing_version_fails() {
    let h = Harness::new(iris_archive("iris-id", "iris_model", 1));
    write_model(h.root(), "iris_model", "1", &iris_descriptor("iris_model", 1), &iris_formatter());

    let body = json!({"name": "iris_model", "version": 1, "id": "iris-id", "async_request": false});
    let (status, _) = send(&h.router, json_request("POST", "/models/", &body)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(h.root().join("iris_model/1/iris_model.json").is_file());
}

#[tokio::test]
async fn test_check_valid_model_keeps_files() {
    let h = Harness::new(FakeArchive::new());
    write_model(h.root(), "iris_model", "1", &iris_descriptor("iris_model", 1), &iris_formatter());

    let (status, _) = send(&h.router, empty_request("GET", "/models/check/iris_model/1/")).await;
    assert_eq!(status, StatusCode::OK);

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(h.root().join("iris_model/1").is_dir());
    assert!(h.deleted().is_empty());
}

#[tokio::test]
async fn test_check_version_conflict_removes_version() {
    let h = Harness::new(FakeArchive::new());
    write_model(h.root(), "iris_model", "2", &iris_descriptor("iris_model", 1), &iris_formatter());

    let (status, response) = send(&h.router, empty_request("GET", "/models/check/iris_model/2/")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(response["message"].as_str().unwrap().contains("version '1'"));

    assert!(eventually(|| !h.root().join("iris_model").exists()).await);
    assert_eq!(h.deleted(), vec!["iris_model/2"]);
}

#[tokio::test]
async fn test_check_missing_script_is_not_found() {
    let h = Harness::new(FakeArchive::new());
    write_model(h.root(), "iris_model", "1", &iris_descriptor("iris_model", 1), &iris_formatter());
    fs::remove_file(h.root().join("iris_model/1/resources/formatter.json")).unwrap();

    let (status, _) = send(&h.router, empty_request("GET", "/models/check/iris_model/1/")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(eventually(|| !h.root().join("iris_model/1").exists()).await);
}

#[tokio::test]
async fn test_delete_one_of_two_versions() {
    let h = Harness::new(FakeArchive::new());
    write_model(h.root(), "m", "1", &iris_descriptor("m", 1), &iris_formatter());
    write_model(h.root(), "m", "2", &iris_descriptor("m", 2), &iris_formatter());

    let (status, _) = send(&h.router, empty_request("DELETE", "/models/m/1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.deleted(), vec!["m/1"]);

    let (status, response) = send(&h.router, empty_request("GET", "/models/m")).await;
    assert_eq!(status, StatusCode::OK);
    let versions = response["data"]["versions"].as_object().unwrap();
    assert_eq!(versions.keys().collect::<Vec<_>>(), vec!["2"]);
    assert_eq!(versions["2"], json!(["m.json", "m.onnx", "resources"]));
}

#[tokio::test]
async fn test_delete_last_version_removes_model() {
    let h = Harness::new(FakeArchive::new());
    write_model(h.root(), "m", "1", &iris_descriptor("m", 1), &iris_formatter());

    let (status, _) = send(&h.router, empty_request("DELETE", "/models/m/1")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!h.root().join("m").exists());

    let (status, response) = send(&h.router, empty_request("GET", "/models/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["message"], "No models are available");
}

#[tokio::test]
async fn test_delete_model_removes_all_versions() {
    let h = Harness::new(FakeArchive::new());
    write_model(h.root(), "m", "1", &iris_descriptor("m", 1), &iris_formatter());
    write_model(h.root(), "m", "2", &iris_descriptor("m", 2), &iris_formatter());

    let (status, _) = send(&h.router, empty_request("DELETE", "/models/m")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!h.root().join("m").exists());
    assert_eq!(h.deleted(), vec!["m/*"]);
}

#[tokio::test]
async fn test_delete_absent_model_has_no_side_effects() {
    let h = Harness::new(FakeArchive::new());

    for _ in 0..2 {
        let (status, response) = send(&h.router, empty_request("DELETE", "/models/ghost")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(response["error"], "Not Found");
    }
    let (status, _) = send(&h.router, empty_request("DELETE", "/models/ghost/1")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(h.deleted().is_empty());
}

#[tokio::test]
async fn test_details_of_absent_model() {
    let h = Harness::new(FakeArchive::new());
    let (status, _) = send(&h.router, empty_request("GET", "/models/ghost")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_update_replaces_version() {
    let h = Harness::new(iris_archive("iris-id", "iris_model", 1));
    write_model(h.root(), "iris_model", "1", &iris_descriptor("iris_model", 1), &iris_formatter());
    fs::write(h.root().join("iris_model/1/stale.txt"), b"old").unwrap();

    let body = json!({"name": "iris_model", "version": 1, "id": "iris-id", "async_request": false});
    let (status, response) = send(&h.router, json_request("PUT", "/models/", &body)).await;
    assert_eq!(status, StatusCode::OK, "{}", response);
    assert_eq!(response["message"], "Model 'iris_model' version '1' is updated and ready to go");
    assert!(!h.root().join("iris_model/1/stale.txt").exists());
    assert_eq!(h.added(), vec!["iris_model/1"]);
}

#[tokio::test]
async fn test_update_missing_version_is_not_found() {
    let h = Harness::new(iris_archive("iris-id", "iris_model", 1));

    let body = json!({"name": "iris_model", "version": 1, "id": "iris-id"});
    let (status, _) = send(&h.router, json_request("PUT", "/models/", &body)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_update_with_failing_archive() {
    let h = Harness::new(iris_archive("iris-id", "wrong_name", 1));
    write_model(h.root(), "iris_model", "1", &iris_descriptor("iris_model", 1), &iris_formatter());

    let body = json!({"name": "iris_model", "version": 1, "id": "iris-id", "async_request": false});
    let (status, response) = send(&h.router, json_request("PUT", "/models/", &body)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response["message"], "Model update failed");
}
