use async_trait::async_trait;
use regex::Regex;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::store::{ModelRegistration, ModelStore, StoreError};
use crate::tensor::Tensor;

/// Computes output tensors from input tensors for a registered model
pub type ModelRunner = Arc<dyn Fn(&[Tensor]) -> Result<Vec<Tensor>, String> + Send + Sync>;

#[derive(Default)]
struct MemoryState {
    models: HashMap<String, ModelRegistration>,
    runners: HashMap<String, ModelRunner>,
    tensors: HashMap<String, Tensor>,
    queues: HashMap<String, VecDeque<String>>,
}

/// In-process [`ModelStore`].
///
/// Models "execute" through a [`ModelRunner`] registered per key; without
/// one, every output receives a copy of the first input.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    pushed: Notify,
}

/// Matches `text` against a store scan pattern: `*` is a wildcard and
/// `\` escapes the next character
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    let mut translated = String::from("^");
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => translated.push_str(".*"),
            '\\' => {
                if let Some(escaped) = chars.next() {
                    translated.push_str(&regex::escape(&escaped.to_string()));
                }
            }
            other => translated.push_str(&regex::escape(&other.to_string())),
        }
    }
    translated.push('$');
    Regex::new(&translated).is_ok_and(|re| re.is_match(text))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.state.lock().map_err(|e| StoreError::Connection(e.to_string()))
    }

    /// Installs the function used when `key` is executed
    pub fn set_runner(&self, key: &str, runner: ModelRunner) {
        if let Ok(mut state) = self.state.lock() {
            state.runners.insert(key.to_string(), runner);
        }
    }

    pub fn model(&self, key: &str) -> Option<ModelRegistration> {
        self.state.lock().ok()?.models.get(key).cloned()
    }

    pub fn has_tensor(&self, label: &str) -> bool {
        self.state.lock().map(|s| s.tensors.contains_key(label)).unwrap_or(false)
    }

    /// Current contents of a queue, head first
    pub fn queue_contents(&self, queue: &str) -> Vec<String> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.queues.get(queue).map(|q| q.iter().cloned().collect()))
            .unwrap_or_default()
    }

    /// All model and tensor keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = match self.state.lock() {
            Ok(state) => state.models.keys().chain(state.tensors.keys()).cloned().collect(),
            Err(_) => Vec::new(),
        };
        keys.sort();
        keys
    }

    fn try_pop(&self, queue: &str) -> Result<Option<String>, StoreError> {
        Ok(self.lock()?.queues.get_mut(queue).and_then(|q| q.pop_front()))
    }
}

#[async_trait]
impl ModelStore for MemoryStore {
    async fn register_model(&self, registration: ModelRegistration) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        state.models.insert(registration.key.clone(), registration);
        Ok(())
    }

    async fn delete_key(&self, key: &str) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        let model = state.models.remove(key).is_some();
        let tensor = state.tensors.remove(key).is_some();
        Ok(model || tensor)
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let state = self.lock()?;
        let mut keys: Vec<String> = state
            .models
            .keys()
            .chain(state.tensors.keys())
            .filter(|k| glob_match(pattern, k))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn set_tensor(&self, label: &str, tensor: &Tensor) -> Result<(), StoreError> {
        self.lock()?.tensors.insert(label.to_string(), tensor.clone());
        Ok(())
    }

    async fn get_tensor(&self, label: &str) -> Result<Tensor, StoreError> {
        self.lock()?
            .tensors
            .get(label)
            .cloned()
            .ok_or_else(|| StoreError::TensorNotFound(label.to_string()))
    }

    async fn run_model(&self, key: &str, inputs: &[String], outputs: &[String]) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        if !state.models.contains_key(key) {
            return Err(StoreError::ModelNotFound(key.to_string()));
        }

        let input_tensors = inputs
            .iter()
            .map(|label| {
                state
                    .tensors
                    .get(label)
                    .cloned()
                    .ok_or_else(|| StoreError::TensorNotFound(label.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let results = match state.runners.get(key) {
            Some(runner) => runner(&input_tensors).map_err(StoreError::Command)?,
            None => {
                let first = input_tensors
                    .first()
                    .ok_or_else(|| StoreError::Command(format!("Model '{}' run without inputs", key)))?;
                outputs.iter().map(|_| first.clone()).collect()
            }
        };
        if results.len() < outputs.len() {
            return Err(StoreError::Command(format!(
                "Model '{}' produced {} outputs, {} requested",
                key,
                results.len(),
                outputs.len()
            )));
        }

        for (label, tensor) in outputs.iter().zip(results) {
            state.tensors.insert(label.clone(), tensor);
        }
        Ok(())
    }

    async fn push(&self, queue: &str, value: &str) -> Result<(), StoreError> {
        self.lock()?
            .queues
            .entry(queue.to_string())
            .or_default()
            .push_back(value.to_string());
        self.pushed.notify_waiters();
        Ok(())
    }

    async fn blocking_pop(&self, queue: &str, timeout: Duration) -> Result<Option<String>, StoreError> {
        let deadline = Instant::now() + timeout;
        loop {
            let pushed = self.pushed.notified();
            if let Some(value) = self.try_pop(queue)? {
                return Ok(Some(value));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            let _ = tokio::time::timeout(remaining, pushed).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::DType;

    #[test]
    fn test_glob_match() {
        assert!(glob_match("iris/*", "iris/1"));
        assert!(glob_match("iris/1", "iris/1"));
        assert!(!glob_match("iris/1", "iris/10"));
        assert!(!glob_match("iris/*", "iris_v2/1"));
        assert!(glob_match("*_input_*", "m_1_input_17.5"));
        assert!(glob_match("a\\?b/*", "a?b/1"));
        assert!(!glob_match("a\\?b/*", "axb/1"));
    }

    #[tokio::test]
    async fn test_queue_is_fifo() {
        let store = MemoryStore::new();
        store.push("q", "a").await.unwrap();
        store.push("q", "b").await.unwrap();
        let timeout = Duration::from_millis(10);
        assert_eq!(store.blocking_pop("q", timeout).await.unwrap().as_deref(), Some("a"));
        assert_eq!(store.blocking_pop("q", timeout).await.unwrap().as_deref(), Some("b"));
        assert_eq!(store.blocking_pop("q", timeout).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_blocking_pop_wakes_on_push() {
        let store = Arc::new(MemoryStore::new());
        let waiter = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.blocking_pop("q", Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        store.push("q", "late").await.unwrap();
        let value = waiter.await.unwrap().unwrap();
        assert_eq!(value.as_deref(), Some("late"));
    }

    #[tokio::test]
    async fn test_run_unknown_model() {
        let store = MemoryStore::new();
        let err = store.run_model("nope/1", &[], &[]).await.unwrap_err();
        assert!(matches!(err, StoreError::ModelNotFound(_)));
    }

    #[tokio::test]
    async fn test_run_with_runner() {
        let store = MemoryStore::new();
        store
            .register_model(ModelRegistration {
                key: "m/1".to_string(),
                backend: "ONNX".to_string(),
                device: "CPU".to_string(),
                inputs: vec![],
                outputs: vec![],
                blob: vec![1, 2, 3],
            })
            .await
            .unwrap();
        store.set_runner(
            "m/1",
            Arc::new(|inputs: &[Tensor]| -> Result<Vec<Tensor>, String> {
                let sum: f64 = inputs[0].values.iter().sum();
                Tensor::new(DType::Float, vec![1], vec![sum])
                    .map(|t| vec![t])
                    .map_err(|e| e.to_string())
            }),
        );

        let input = Tensor::new(DType::Float, vec![1, 3], vec![1.0, 2.0, 3.0]).unwrap();
        store.set_tensor("in", &input).await.unwrap();
        store
            .run_model("m/1", &["in".to_string()], &["out".to_string()])
            .await
            .unwrap();
        assert_eq!(store.get_tensor("out").await.unwrap().values, vec![6.0]);
    }
}
