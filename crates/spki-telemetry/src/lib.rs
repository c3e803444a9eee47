//! Structured logging for the spki binaries, see [`Tracing`].
pub mod tracing;

pub use tracing::{TelemetryOptions, Tracing};
