//! Sources of metric snapshots.
//!
//! The `MetricSource` trait lets the poll loop work against a real HTTP
//! endpoint in production and against scripted snapshots in tests.
//!
//! ```
//! use prom2statsd::source::{MetricSource, ScriptedSource};
//! use prom2statsd::source::text::parse_text;
//!
//! let snapshot = parse_text("# TYPE up gauge\nup 1\n").unwrap();
//! let mut source = ScriptedSource::new().then_ok(snapshot);
//! assert!(source.fetch("http://localhost:2112/metrics").is_ok());
//! ```

pub mod http;
pub mod mock;
pub mod text;

pub use http::HttpSource;
pub use mock::ScriptedSource;
pub use text::ParseError;

use crate::model::MetricSnapshot;

/// Error type for fetch failures.
#[derive(Debug)]
pub enum FetchError {
    /// Endpoint unreachable or request failed.
    Http(String),
    /// Endpoint answered with a non-success status.
    Status(u16),
    /// Response body could not be read.
    Body(String),
    /// Payload is not valid exposition text.
    Parse(ParseError),
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::Http(msg) => write!(f, "request failed: {}", msg),
            FetchError::Status(code) => write!(f, "unexpected HTTP status {}", code),
            FetchError::Body(msg) => write!(f, "failed to read body: {}", msg),
            FetchError::Parse(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FetchError::Parse(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ParseError> for FetchError {
    fn from(e: ParseError) -> Self {
        FetchError::Parse(e)
    }
}

/// Produces a fresh snapshot on every call.
pub trait MetricSource: Send {
    /// Fetches and parses the metrics exposed at `endpoint`.
    fn fetch(&mut self, endpoint: &str) -> Result<MetricSnapshot, FetchError>;
}
