//! Destinations for emission events.
//!
//! `MetricSink` abstracts the aggregation backend so the poll loop can be
//! driven against a real DogStatsD agent or an in-memory recorder.

pub mod mock;
pub mod statsd;

pub use mock::{RecordedCall, RecordingSink};
pub use statsd::StatsdSink;

use crate::event::{EmissionEvent, EventValue};

/// Sample rate used for every emission: always sample.
pub const SAMPLE_RATE: f64 = 1.0;

/// Error type for sink failures.
#[derive(Debug)]
pub enum SinkError {
    /// Socket or address error.
    Io(std::io::Error),
    /// Sink was already closed.
    Closed,
    /// Failure reported by a non-network sink.
    Rejected(String),
}

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkError::Io(e) => write!(f, "I/O error: {}", e),
            SinkError::Closed => write!(f, "sink is closed"),
            SinkError::Rejected(msg) => write!(f, "rejected: {}", msg),
        }
    }
}

impl std::error::Error for SinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SinkError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SinkError {
    fn from(e: std::io::Error) -> Self {
        SinkError::Io(e)
    }
}

/// Push-based metrics backend.
pub trait MetricSink: Send {
    fn emit_count(
        &mut self,
        name: &str,
        value: i64,
        tags: &[String],
        sample_rate: f64,
    ) -> Result<(), SinkError>;

    fn emit_gauge(
        &mut self,
        name: &str,
        value: f64,
        tags: &[String],
        sample_rate: f64,
    ) -> Result<(), SinkError>;

    /// Sends anything buffered.
    fn flush(&mut self) -> Result<(), SinkError>;

    /// Flushes and releases the connection.
    fn close(&mut self) -> Result<(), SinkError>;

    /// Dispatches one event to `emit_count` or `emit_gauge`.
    fn emit(&mut self, event: &EmissionEvent) -> Result<(), SinkError> {
        match event.value {
            EventValue::Count(v) => self.emit_count(&event.name, v, &event.tags, SAMPLE_RATE),
            EventValue::Gauge(v) => self.emit_gauge(&event.name, v, &event.tags, SAMPLE_RATE),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_dispatches_by_kind() {
        let mut sink = RecordingSink::new();
        sink.emit(&EmissionEvent::count("hits", 2, vec!["a:b".into()]))
            .unwrap();
        sink.emit(&EmissionEvent::gauge("temp", 1.5, vec![])).unwrap();

        assert_eq!(
            sink.calls(),
            [
                RecordedCall::Count {
                    name: "hits".into(),
                    value: 2,
                    tags: vec!["a:b".into()],
                    sample_rate: 1.0,
                },
                RecordedCall::Gauge {
                    name: "temp".into(),
                    value: 1.5,
                    tags: vec![],
                    sample_rate: 1.0,
                },
            ]
        );
    }

    #[test]
    fn test_sink_error_display() {
        assert_eq!(SinkError::Closed.to_string(), "sink is closed");
        let io: SinkError = std::io::Error::other("boom").into();
        assert!(io.to_string().contains("boom"));
    }
}
