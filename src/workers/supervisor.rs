use async_trait::async_trait;
use std::error::Error;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::descriptor::DescriptorError;
use crate::queue::EntryError;
use crate::store::{ModelStore, StoreError};

/// Errors a worker can hit while handling one entry
#[derive(Debug)]
pub enum WorkerError {
    /// The entry is not `<name>/<version>`
    Entry(EntryError),
    /// The entry names every version where one is required
    Wildcard(String),
    /// The model's descriptor is missing or invalid
    Descriptor(DescriptorError),
    /// A store command failed
    Store(StoreError),
    /// Reading the artifact failed
    Io(io::Error),
    /// The handler panicked
    Panicked(String),
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            WorkerError::Entry(e) => write!(f, "{}", e),
            WorkerError::Wildcard(entry) => write!(f, "Entry '{}' must name a single version", entry),
            WorkerError::Descriptor(e) => write!(f, "Descriptor error: {}", e),
            WorkerError::Store(e) => write!(f, "{}", e),
            WorkerError::Io(e) => write!(f, "I/O error: {}", e),
            WorkerError::Panicked(msg) => write!(f, "Handler panicked: {}", msg),
        }
    }
}

impl Error for WorkerError {}

impl From<EntryError> for WorkerError {
    fn from(err: EntryError) -> Self {
        WorkerError::Entry(err)
    }
}

impl From<DescriptorError> for WorkerError {
    fn from(err: DescriptorError) -> Self {
        WorkerError::Descriptor(err)
    }
}

impl From<StoreError> for WorkerError {
    fn from(err: StoreError) -> Self {
        WorkerError::Store(err)
    }
}

impl From<io::Error> for WorkerError {
    fn from(err: io::Error) -> Self {
        WorkerError::Io(err)
    }
}

/// Handles the entries of one queue
#[async_trait]
pub trait QueueWorker: Send + Sync + 'static {
    /// Name used in logs
    fn name(&self) -> &'static str;

    /// Applies one queue entry to the store
    async fn handle(&self, entry: &str) -> Result<(), WorkerError>;
}

/// Exponential delay between reconnection attempts
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max, current: initial }
    }

    /// Delay to wait now; doubles the next one up to the maximum
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(30))
    }
}

/// What happened to a popped entry
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The worker applied the entry
    Done(String),
    /// The worker failed; `parked` tells whether it went to the dead-letter queue
    Failed { entry: String, parked: bool },
}

/// Drives a [`QueueWorker`] over one queue.
pub struct Supervisor {
    store: Arc<dyn ModelStore>,
    queue: String,
    dead_letter: Option<String>,
    pop_timeout: Duration,
}

impl Supervisor {
    /// # Arguments
    ///
    /// * `store` - Store holding the queue
    /// * `queue` - Queue to drain
    /// * `dead_letter` - Queue failed entries are parked on, if any
    /// * `pop_timeout` - Longest single wait on an empty queue
    pub fn new(store: Arc<dyn ModelStore>, queue: String, dead_letter: Option<String>, pop_timeout: Duration) -> Self {
        Self { store, queue, dead_letter, pop_timeout }
    }

    /// Pops and handles at most one entry.
    ///
    /// Returns `Ok(None)` when the queue stayed empty for the pop timeout.
    /// Only failures to reach the queue itself are errors; a failing or
    /// panicking handler yields [`Outcome::Failed`].
    pub async fn process_next<W: QueueWorker>(&self, worker: &Arc<W>) -> Result<Option<Outcome>, StoreError> {
        let Some(entry) = self.store.blocking_pop(&self.queue, self.pop_timeout).await? else {
            return Ok(None);
        };
        info!("{}: new entry '{}'", worker.name(), entry);

        // Run on its own task so a panic stays with this entry
        let task_worker = Arc::clone(worker);
        let task_entry = entry.clone();
        let result = tokio::spawn(async move { task_worker.handle(&task_entry).await })
            .await
            .unwrap_or_else(|e| Err(WorkerError::Panicked(e.to_string())));

        match result {
            Ok(()) => {
                info!("{}: entry '{}' done", worker.name(), entry);
                Ok(Some(Outcome::Done(entry)))
            }
            Err(e) => {
                error!("{}: entry '{}' failed: {}", worker.name(), entry, e);
                let parked = self.park(&entry).await;
                Ok(Some(Outcome::Failed { entry, parked }))
            }
        }
    }

    async fn park(&self, entry: &str) -> bool {
        let Some(dead_letter) = &self.dead_letter else {
            return false;
        };
        match self.store.push(dead_letter, entry).await {
            Ok(()) => {
                warn!("Entry '{}' parked on '{}'", entry, dead_letter);
                true
            }
            Err(e) => {
                error!("Entry '{}' could not be parked on '{}': {}", entry, dead_letter, e);
                false
            }
        }
    }

    /// Drains the queue forever, backing off while the store is unreachable.
    pub async fn run<W: QueueWorker>(&self, worker: Arc<W>) {
        let mut backoff = Backoff::default();
        info!("{} waiting on queue '{}'", worker.name(), self.queue);

        loop {
            match self.process_next(&worker).await {
                Ok(outcome) => {
                    if outcome.is_none() {
                        debug!("{}: queue '{}' idle", worker.name(), self.queue);
                    }
                    backoff.reset();
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    if e.is_transient() {
                        warn!("{}: store unavailable ({}), retrying in {:?}", worker.name(), e, delay);
                    } else {
                        error!("{}: could not pop from '{}' ({}), retrying in {:?}", worker.name(), self.queue, e, delay);
                    }
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
