pub mod config;
pub mod error;
pub mod job;
pub mod queue;
pub mod retry;
pub mod runner;
pub mod shutdown;
pub mod worker;

pub use config::WorkerConfig;
pub use error::{QueueError, Result, UploadError, WorkerError};
pub use job::TaskContext;
pub use queue::{Credentials, Queue, TaskRef};
pub use runner::{TaskRunner, TaskSummary};
