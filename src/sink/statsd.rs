//! DogStatsD client over UDP.
//!
//! Wire format, one metric per line:
//!
//! ```text
//! http_requests_total:7|c|#method:post,code:200
//! go_goroutines:42|g
//! ```
//!
//! Lines are buffered and packed into datagrams no larger than
//! [`MAX_UDP_PAYLOAD`] bytes. A datagram is sent when the next line would not
//! fit, and on [`flush`](MetricSink::flush).

use std::fmt::Write as _;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use tracing::{debug, trace};

use super::{MetricSink, SinkError};

/// Largest datagram payload, chosen to fit a 1500-byte MTU.
pub const MAX_UDP_PAYLOAD: usize = 1432;

pub struct StatsdSink {
    socket: UdpSocket,
    target: SocketAddr,
    buffer: String,
    max_payload: usize,
    closed: bool,
    datagrams_sent: u64,
}

impl StatsdSink {
    /// Resolves `addr` (e.g. `localhost:8125`) and connects a UDP socket to it.
    pub fn connect(addr: &str) -> Result<Self, SinkError> {
        let target = addr.to_socket_addrs()?.next().ok_or_else(|| {
            SinkError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("address {} did not resolve", addr),
            ))
        })?;

        let bind: SocketAddr = if target.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(bind)?;
        socket.connect(target)?;
        debug!(%target, "statsd socket connected");

        Ok(Self {
            socket,
            target,
            buffer: String::with_capacity(MAX_UDP_PAYLOAD),
            max_payload: MAX_UDP_PAYLOAD,
            closed: false,
            datagrams_sent: 0,
        })
    }

    /// Overrides the datagram size limit.
    pub fn with_max_payload(mut self, max_payload: usize) -> Self {
        self.max_payload = max_payload.max(1);
        self
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    pub fn datagrams_sent(&self) -> u64 {
        self.datagrams_sent
    }

    fn ensure_open(&self) -> Result<(), SinkError> {
        if self.closed {
            Err(SinkError::Closed)
        } else {
            Ok(())
        }
    }

    fn push_line(&mut self, line: String) -> Result<(), SinkError> {
        let needed = if self.buffer.is_empty() {
            line.len()
        } else {
            self.buffer.len() + 1 + line.len()
        };
        if needed > self.max_payload && !self.buffer.is_empty() {
            self.send_buffer()?;
        }

        if !self.buffer.is_empty() {
            self.buffer.push('\n');
        }
        self.buffer.push_str(&line);

        // Oversized single lines go out on their own.
        if self.buffer.len() >= self.max_payload {
            self.send_buffer()?;
        }
        Ok(())
    }

    /// Sends the pending datagram. The buffer is cleared even on failure.
    fn send_buffer(&mut self) -> Result<(), SinkError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let result = self.socket.send(self.buffer.as_bytes());
        trace!(bytes = self.buffer.len(), "statsd datagram");
        self.buffer.clear();
        result?;
        self.datagrams_sent += 1;
        Ok(())
    }
}

impl MetricSink for StatsdSink {
    fn emit_count(
        &mut self,
        name: &str,
        value: i64,
        tags: &[String],
        sample_rate: f64,
    ) -> Result<(), SinkError> {
        self.ensure_open()?;
        self.push_line(format_line(name, &value.to_string(), "c", tags, sample_rate))
    }

    fn emit_gauge(
        &mut self,
        name: &str,
        value: f64,
        tags: &[String],
        sample_rate: f64,
    ) -> Result<(), SinkError> {
        self.ensure_open()?;
        self.push_line(format_line(name, &format_float(value), "g", tags, sample_rate))
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.ensure_open()?;
        self.send_buffer()
    }

    fn close(&mut self) -> Result<(), SinkError> {
        self.ensure_open()?;
        let result = self.send_buffer();
        self.closed = true;
        debug!(datagrams = self.datagrams_sent, "statsd sink closed");
        result
    }
}

/// Renders one DogStatsD line.
///
/// Line breaks are stripped from the name and tags. `|` and `,` inside a tag
/// become `_` so a label value cannot end the tag list or the line.
pub fn format_line(
    name: &str,
    value: &str,
    metric_type: &str,
    tags: &[String],
    sample_rate: f64,
) -> String {
    let mut line = String::with_capacity(name.len() + value.len() + 16);
    line.extend(name.chars().filter(|c| !matches!(c, '\n' | '\r')));
    line.push(':');
    line.push_str(value);
    line.push('|');
    line.push_str(metric_type);
    if sample_rate < 1.0 {
        let _ = write!(line, "|@{}", sample_rate);
    }
    if !tags.is_empty() {
        line.push_str("|#");
        for (i, tag) in tags.iter().enumerate() {
            if i > 0 {
                line.push(',');
            }
            push_tag(&mut line, tag);
        }
    }
    line
}

fn push_tag(line: &mut String, tag: &str) {
    for c in tag.chars() {
        match c {
            '\n' | '\r' => {}
            '|' | ',' => line.push('_'),
            c => line.push(c),
        }
    }
}

/// Formats a gauge value; non-finite values use the agent's spellings.
pub fn format_float(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value == f64::INFINITY {
        "+Inf".to_string()
    } else if value == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        value.to_string()
    }
}
