use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{RedisError, Value};
use std::time::Duration;
use tracing::{debug, info};

use super::store::{ModelRegistration, ModelStore, StoreError};
use crate::tensor::{DType, Tensor, TensorError};

/// [`ModelStore`] backed by a Redis server with the RedisAI module.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connects to `redis://host:port`.
    pub async fn connect(host: &str, port: u16) -> Result<Self, StoreError> {
        let url = format!("redis://{}:{}/", host, port);
        let client = redis::Client::open(url.as_str()).map_err(classify)?;
        let conn = ConnectionManager::new(client).await.map_err(classify)?;
        info!("Connected to store at {}:{}", host, port);
        Ok(Self { conn })
    }
}

/// Maps RedisAI replies onto store error categories
fn classify(err: RedisError) -> StoreError {
    let message = err.to_string();
    if message.contains("model key is empty") {
        StoreError::ModelNotFound(message)
    } else if message.contains("tensor key is empty") {
        StoreError::TensorNotFound(message)
    } else if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
        StoreError::Connection(message)
    } else {
        StoreError::Command(message)
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::SimpleString(s) => Some(s.clone()),
        Value::BulkString(bytes) => String::from_utf8(bytes.clone()).ok(),
        _ => None,
    }
}

/// Decodes the reply of `AI.TENSORGET <label> META BLOB`
fn decode_tensor(reply: Value) -> Result<Tensor, StoreError> {
    let pairs: Vec<(Value, Value)> = match reply {
        Value::Array(items) => {
            let mut items = items.into_iter();
            let mut pairs = Vec::new();
            while let (Some(k), Some(v)) = (items.next(), items.next()) {
                pairs.push((k, v));
            }
            pairs
        }
        Value::Map(pairs) => pairs,
        other => return Err(StoreError::Command(format!("Unexpected tensor reply: {:?}", other))),
    };

    let mut dtype = None;
    let mut shape = None;
    let mut blob = None;
    for (key, value) in pairs {
        match as_text(&key).as_deref() {
            Some("dtype") => {
                let name = as_text(&value).unwrap_or_default();
                dtype = Some(DType::parse(&name).ok_or(TensorError::UnknownDType(name))?);
            }
            Some("shape") => {
                if let Value::Array(dims) = value {
                    shape = Some(
                        dims.iter()
                            .map(|d| match d {
                                Value::Int(n) => Ok(*n as usize),
                                other => Err(StoreError::Command(format!("Bad shape entry {:?}", other))),
                            })
                            .collect::<Result<Vec<_>, _>>()?,
                    );
                }
            }
            Some("blob") => {
                if let Value::BulkString(bytes) = value {
                    blob = Some(bytes);
                }
            }
            _ => {}
        }
    }

    match (dtype, shape, blob) {
        (Some(dtype), Some(shape), Some(blob)) => Ok(Tensor::from_blob(dtype, shape, &blob)?),
        _ => Err(StoreError::Command("Tensor reply is missing dtype, shape or blob".to_string())),
    }
}

#[async_trait]
impl ModelStore for RedisStore {
    async fn register_model(&self, registration: ModelRegistration) -> Result<(), StoreError> {
        let mut cmd = redis::cmd("AI.MODELSTORE");
        cmd.arg(&registration.key)
            .arg(&registration.backend)
            .arg(&registration.device);
        if !registration.inputs.is_empty() {
            cmd.arg("INPUTS").arg(registration.inputs.len()).arg(&registration.inputs);
        }
        if !registration.outputs.is_empty() {
            cmd.arg("OUTPUTS").arg(registration.outputs.len()).arg(&registration.outputs);
        }
        cmd.arg("BLOB").arg(registration.blob.as_slice());

        let mut conn = self.conn.clone();
        let _: () = cmd.query_async(&mut conn).await.map_err(classify)?;
        debug!("AI.MODELSTORE {} ({})", registration.key, registration.backend);
        Ok(())
    }

    async fn delete_key(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let removed: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await.map_err(classify)?;
        Ok(removed > 0)
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .map_err(classify)?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn set_tensor(&self, label: &str, tensor: &Tensor) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("AI.TENSORSET")
            .arg(label)
            .arg(tensor.dtype.store_name())
            .arg(&tensor.shape)
            .arg("BLOB")
            .arg(tensor.to_blob())
            .query_async(&mut conn)
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn get_tensor(&self, label: &str) -> Result<Tensor, StoreError> {
        let mut conn = self.conn.clone();
        let reply: Value = redis::cmd("AI.TENSORGET")
            .arg(label)
            .arg("META")
            .arg("BLOB")
            .query_async(&mut conn)
            .await
            .map_err(classify)?;
        decode_tensor(reply)
    }

    async fn run_model(&self, key: &str, inputs: &[String], outputs: &[String]) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("AI.MODELEXECUTE")
            .arg(key)
            .arg("INPUTS")
            .arg(inputs.len())
            .arg(inputs)
            .arg("OUTPUTS")
            .arg(outputs.len())
            .arg(outputs)
            .query_async(&mut conn)
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn push(&self, queue: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("RPUSH")
            .arg(queue)
            .arg(value)
            .query_async(&mut conn)
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn blocking_pop(&self, queue: &str, timeout: Duration) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        let reply: Option<(String, String)> = redis::cmd("BLPOP")
            .arg(queue)
            .arg(timeout.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(classify)?;
        Ok(reply.map(|(_, value)| value))
    }
}
