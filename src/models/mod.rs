pub mod alert;
pub mod event;

pub use alert::Alert;
pub use event::{EventRecord, LogLevel, ValidationError};
