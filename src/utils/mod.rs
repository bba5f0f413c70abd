//! Shared utilities

pub mod error;
pub mod log_sink;

pub use error::{ErrorResponse, RecorderError, RecorderResult};
pub use log_sink::{LogSink, MemoryLogSink, TracingLogSink};
