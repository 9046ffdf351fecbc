//! HTTP scraper for text exposition endpoints.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::ACCEPT;
use tracing::trace;

use super::text::parse_text;
use super::{FetchError, MetricSource};
use crate::model::MetricSnapshot;

/// Content type advertised when scraping.
const ACCEPT_TEXT_FORMAT: &str = "text/plain;version=0.0.4;q=1,*/*;q=0.1";

/// Blocking HTTP source.
pub struct HttpSource {
    client: Client,
}

impl HttpSource {
    /// Creates a source with the given request timeout.
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("prom2statsd/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Http(e.to_string()))?;
        Ok(Self { client })
    }
}

impl MetricSource for HttpSource {
    fn fetch(&mut self, endpoint: &str) -> Result<MetricSnapshot, FetchError> {
        let response = self
            .client
            .get(endpoint)
            .header(ACCEPT, ACCEPT_TEXT_FORMAT)
            .send()
            .map_err(|e| FetchError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response
            .text()
            .map_err(|e| FetchError::Body(e.to_string()))?;
        trace!(bytes = body.len(), "scrape body received");

        Ok(parse_text(&body)?)
    }
}
