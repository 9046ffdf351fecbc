//! Scripted source for exercising the poll loop without a network.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::{FetchError, MetricSource};
use crate::model::MetricSnapshot;

type Script = VecDeque<Result<MetricSnapshot, FetchError>>;

/// Source returning queued results in order.
///
/// Once the queue is drained every fetch returns a clone of the fallback
/// snapshot, or an `Http` error when none is set. Fetch instants are recorded
/// and shared between clones so a test can inspect them while the source is
/// owned by a running worker.
#[derive(Clone, Default)]
pub struct ScriptedSource {
    script: Arc<Mutex<Script>>,
    fallback: Option<MetricSnapshot>,
    fetches: Arc<Mutex<Vec<Instant>>>,
    delay: Duration,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then_ok(self, snapshot: MetricSnapshot) -> Self {
        self.push(Ok(snapshot));
        self
    }

    pub fn then_err(self, error: FetchError) -> Self {
        self.push(Err(error));
        self
    }

    /// Snapshot returned once the script is exhausted.
    pub fn with_fallback(mut self, snapshot: MetricSnapshot) -> Self {
        self.fallback = Some(snapshot);
        self
    }

    /// Makes every fetch block for `delay`, simulating a slow endpoint.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn push(&self, result: Result<MetricSnapshot, FetchError>) {
        lock(&self.script).push_back(result);
    }

    /// Instants at which fetches started.
    pub fn fetch_times(&self) -> Vec<Instant> {
        lock(&self.fetches).clone()
    }

    pub fn fetch_count(&self) -> usize {
        lock(&self.fetches).len()
    }
}

impl MetricSource for ScriptedSource {
    fn fetch(&mut self, endpoint: &str) -> Result<MetricSnapshot, FetchError> {
        lock(&self.fetches).push(Instant::now());
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }

        if let Some(result) = lock(&self.script).pop_front() {
            return result;
        }
        match &self.fallback {
            Some(snapshot) => Ok(snapshot.clone()),
            None => Err(FetchError::Http(format!("{}: script exhausted", endpoint))),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
