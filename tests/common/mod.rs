#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tower::ServiceExt;

use modelhub::archive::{ArchiveError, ArchiveSource};

/// Archive source serving canned file trees by id
#[derive(Default)]
pub struct FakeArchive {
    archives: HashMap<String, Vec<(PathBuf, Vec<u8>)>>,
}

impl FakeArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, id: &str, files: Vec<(&str, Vec<u8>)>) -> Self {
        self.archives.insert(
            id.to_string(),
            files.into_iter().map(|(p, b)| (PathBuf::from(p), b)).collect(),
        );
        self
    }
}

#[async_trait]
impl ArchiveSource for FakeArchive {
    async fn download_and_extract(&self, id: &str, destination: &Path) -> Result<(), ArchiveError> {
        let files = self
            .archives
            .get(id)
            .ok_or_else(|| ArchiveError::Download(format!("no archive with id '{}'", id)))?;
        for (path, bytes) in files {
            let target = destination.join(path);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(target, bytes)?;
        }
        Ok(())
    }
}

pub fn iris_descriptor(name: &str, version: u32) -> Value {
    json!({
        "model": {
            "name": name,
            "version": version,
            "backend": {
                "type": "sklearn",
                "parameters": {
                    "input": {"type": "number", "dtype": "float32", "shape": [1, 4]},
                    "output": {"shape": [1, 1]}
                }
            },
            "script": {"folder": "resources"}
        }
    })
}

pub fn image_descriptor(name: &str, version: u32, backend: &str) -> Value {
    let parameters = if backend == "tensorflow" {
        json!({
            "input": {"type": "image", "labels": ["images"]},
            "output": {"labels": ["scores"]}
        })
    } else {
        json!({
            "input": {"type": "image", "dtype": "float32", "shape": [1, 2, 2, 3]},
            "output": {"shape": [1, 1]}
        })
    };
    json!({
        "model": {
            "name": name,
            "version": version,
            "backend": {"type": backend, "parameters": parameters},
            "script": {"folder": "utils"}
        }
    })
}

pub fn iris_formatter() -> Value {
    json!({
        "pre_process": {"type": "identity"},
        "post_process": {
            "type": "label",
            "key": "iris",
            "select": "first",
            "labels": {"0": "Iris Setosa", "1": "Iris Virginica", "2": "Iris Versicolor"}
        }
    })
}

/// Files of a model archive, laid out as they land in the version directory
pub fn model_files(name: &str, descriptor: &Value, formatter: &Value) -> Vec<(String, Vec<u8>)> {
    let model = &descriptor["model"];
    let extension = match model["backend"]["type"].as_str() {
        Some("tensorflow") => "pb",
        Some("pytorch") => "pt",
        _ => "onnx",
    };
    let folder = model["script"]["folder"].as_str().unwrap_or("resources");
    vec![
        (format!("{}.json", name), serde_json::to_vec(descriptor).unwrap()),
        (format!("{}.{}", name, extension), b"model-bytes".to_vec()),
        (format!("{}/formatter.json", folder), serde_json::to_vec(formatter).unwrap()),
    ]
}

/// Writes a model version straight into `root`
pub fn write_model(root: &Path, name: &str, version: &str, descriptor: &Value, formatter: &Value) {
    let version_dir = root.join(name).join(version);
    for (path, bytes) in model_files(name, descriptor, formatter) {
        let target = version_dir.join(path);
        fs::create_dir_all(target.parent().unwrap()).unwrap();
        fs::write(target, bytes).unwrap();
    }
}

pub fn archive_with(id: &str, files: Vec<(String, Vec<u8>)>) -> FakeArchive {
    FakeArchive::new().with(id, files.iter().map(|(p, b)| (p.as_str(), b.clone())).collect())
}

/// Sends one request through the router and decodes the JSON answer
pub async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

pub fn json_request(method: &str, uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

pub fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder().method(method).uri(uri).body(Body::empty()).unwrap()
}

/// Builds a `multipart/form-data` request with one file part
pub fn multipart_request(uri: &str, field: &str, file_name: &str, bytes: &[u8]) -> Request<Body> {
    let boundary = "modelhub-test-boundary";
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            field, file_name
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", format!("multipart/form-data; boundary={}", boundary))
        .body(Body::from(body))
        .unwrap()
}

/// Polls `check` until it holds or two seconds pass
pub async fn eventually<F: FnMut() -> bool>(mut check: F) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
