//! In-memory sink recording every call, for tests.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{MetricSink, SinkError};

#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    Count {
        name: String,
        value: i64,
        tags: Vec<String>,
        sample_rate: f64,
    },
    Gauge {
        name: String,
        value: f64,
        tags: Vec<String>,
        sample_rate: f64,
    },
    Flush,
    Close,
}

#[derive(Debug, Default)]
struct Recorder {
    calls: Vec<RecordedCall>,
    failing_names: HashSet<String>,
    fail_flush: bool,
    fail_close: bool,
}

/// Sink that records calls; clones share the same log.
///
/// Emissions for names registered with [`fail_on`](Self::fail_on) are recorded
/// and then rejected.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    inner: Arc<Mutex<Recorder>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(self, name: impl Into<String>) -> Self {
        self.lock().failing_names.insert(name.into());
        self
    }

    pub fn fail_flush(self) -> Self {
        self.lock().fail_flush = true;
        self
    }

    pub fn fail_close(self) -> Self {
        self.lock().fail_close = true;
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    /// Emission calls only, without flush/close markers.
    pub fn emissions(&self) -> Vec<RecordedCall> {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c, RecordedCall::Count { .. } | RecordedCall::Gauge { .. }))
            .cloned()
            .collect()
    }

    pub fn flush_count(&self) -> usize {
        self.count_of(|c| matches!(c, RecordedCall::Flush))
    }

    pub fn close_count(&self) -> usize {
        self.count_of(|c| matches!(c, RecordedCall::Close))
    }

    fn count_of(&self, pred: impl Fn(&RecordedCall) -> bool) -> usize {
        self.lock().calls.iter().filter(|&c| pred(c)).count()
    }

    fn lock(&self) -> MutexGuard<'_, Recorder> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record_emission(&self, name: &str, call: RecordedCall) -> Result<(), SinkError> {
        let mut recorder = self.lock();
        recorder.calls.push(call);
        if recorder.failing_names.contains(name) {
            return Err(SinkError::Rejected(format!("emission of {} refused", name)));
        }
        Ok(())
    }
}

impl MetricSink for RecordingSink {
    fn emit_count(
        &mut self,
        name: &str,
        value: i64,
        tags: &[String],
        sample_rate: f64,
    ) -> Result<(), SinkError> {
        self.record_emission(
            name,
            RecordedCall::Count {
                name: name.to_string(),
                value,
                tags: tags.to_vec(),
                sample_rate,
            },
        )
    }

    fn emit_gauge(
        &mut self,
        name: &str,
        value: f64,
        tags: &[String],
        sample_rate: f64,
    ) -> Result<(), SinkError> {
        self.record_emission(
            name,
            RecordedCall::Gauge {
                name: name.to_string(),
                value,
                tags: tags.to_vec(),
                sample_rate,
            },
        )
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        let mut recorder = self.lock();
        recorder.calls.push(RecordedCall::Flush);
        if recorder.fail_flush {
            return Err(SinkError::Rejected("flush refused".to_string()));
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        let mut recorder = self.lock();
        recorder.calls.push(RecordedCall::Close);
        if recorder.fail_close {
            return Err(SinkError::Rejected("close refused".to_string()));
        }
        Ok(())
    }
}
