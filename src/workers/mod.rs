//! Queue workers.
//!
//! Each worker drains one command queue into the store. A [`Supervisor`]
//! owns the loop: it pops entries, hands them to the worker, contains
//! failures and backs off while the store is unreachable.

mod model_add;
mod model_remove;
mod supervisor;
mod tensor_remove;

pub use model_add::ModelAddWorker;
pub use model_remove::ModelRemoveWorker;
pub use supervisor::{Backoff, Outcome, QueueWorker, Supervisor, WorkerError};
pub use tensor_remove::TensorRemoveWorker;
