use thiserror::Error;

use crate::config::ConfigError;
use crate::counter::StoreError;
use crate::index::IndexError;
use crate::queue::QueueError;

/// Errors that stop the pipeline from starting
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Cannot reach the queue at startup: {0}")]
    Queue(#[from] QueueError),

    #[error("Cannot reach the counter store at startup: {0}")]
    CounterStore(#[from] StoreError),

    #[error("Cannot reach the index at startup: {0}")]
    Index(#[from] IndexError),
}
