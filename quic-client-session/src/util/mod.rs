//! Utilities that do not belong to the session itself
// (c) 2025 Ross Younger

mod task;
pub use task::{LocalTaskQueue, Task, TaskRunner, TokioTaskRunner};

mod tracing;
pub use tracing::{
    LogOptions, TimeFormat, is_initialized as tracing_is_initialised, setup as setup_tracing,
};
