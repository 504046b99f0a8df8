pub mod engines;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod port;

pub use engines::{EchoEngine, EngineContext, Transport};
pub use error::{EchoError, Result};
pub use events::{EngineEvent, EventSink, EventStream, LogEvent};
pub use lifecycle::{EchoTask, TaskState};

// Re-export for engine implementors
pub use async_trait::async_trait;
