pub mod alerting;
pub mod config;
pub mod counter;
pub mod detection;
pub mod error;
pub mod index;
pub mod input;
pub mod models;
pub mod output;
pub mod pipeline;
pub mod processor;
pub mod queue;

// Re-export commonly used types
pub use models::{Alert, EventRecord, LogLevel};
pub use detection::{DetectionRule, SecurityDetector};
pub use counter::{WindowCounterStore, MemoryCounterStore, RedisCounterStore};
pub use queue::{QueueTransport, MemoryQueue, RedisQueue, publish_record};
pub use index::{IndexSink, ElasticsearchSink, SqliteIndexSink};
pub use processor::{Processor, ProcessorSettings};
pub use alerting::{AlertDispatcher, AlertQueue};
pub use error::PipelineError;
