//! Poll loop: scrape, convert, emit, flush, sleep.
//!
//! # Lifecycle
//!
//! ```text
//!  Idle ─► Polling ─► Converting ─► Flushing ─► Sleeping ─┐
//!            ▲   │ fetch failed                            │
//!            │   └──────────────────────────────► Sleeping │
//!            └─────────────────────────────────────────────┘
//!                 stop raised at a cycle boundary
//!                          │
//!                          ▼
//!                      Draining ─► (confirmation) ─► Closed
//! ```
//!
//! The loop runs on its own thread ([`Worker`]). The lifecycle controller
//! raises a [`StopSignal`]; the loop notices it between cycles, never in the
//! middle of one, and hands the sink back over a one-shot channel. That
//! hand-off is the drain confirmation: [`Worker::close`] blocks on it and only
//! then closes the sink.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, trace, warn};

use crate::converter::convert;
use crate::delta::DeltaTracker;
use crate::event::EventValue;
use crate::filter::ExclusionRules;
use crate::model::describe_snapshot;
use crate::sink::MetricSink;
use crate::source::MetricSource;

/// One-shot, idempotent stop request shared between threads.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    fn flag(&self) -> MutexGuard<'_, bool> {
        self.inner
            .0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Raises the signal. Returns `true` only for the call that raised it.
    pub fn raise(&self) -> bool {
        let mut raised = self.flag();
        if *raised {
            return false;
        }
        *raised = true;
        self.inner.1.notify_all();
        true
    }

    pub fn is_raised(&self) -> bool {
        *self.flag()
    }

    /// Blocks until the signal is raised.
    pub fn wait(&self) {
        let mut raised = self.flag();
        while !*raised {
            raised = self
                .inner
                .1
                .wait(raised)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// Sleeps up to `timeout`, waking early if the signal is raised.
    /// Returns whether the signal is raised.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut raised = self.flag();
        while !*raised {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            raised = self
                .inner
                .1
                .wait_timeout(raised, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
        *raised
    }
}

/// Where the poll loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Polling,
    Converting,
    Flushing,
    Sleeping,
    Draining,
    Closed,
}

/// What happened during one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleOutcome {
    /// Whether the scrape succeeded.
    pub fetched: bool,
    /// Events produced by conversion.
    pub events: usize,
    /// Emissions rejected by the sink.
    pub emit_failures: usize,
    pub flush_failed: bool,
}

/// Owns everything one cycle needs, including the counter delta state.
pub struct Poller<S: MetricSource, K: MetricSink> {
    source: S,
    sink: K,
    endpoint: String,
    rules: ExclusionRules,
    tracker: DeltaTracker,
    state: PollState,
    cycles: u64,
}

impl<S: MetricSource, K: MetricSink> Poller<S, K> {
    pub fn new(source: S, sink: K, endpoint: impl Into<String>, rules: ExclusionRules) -> Self {
        Self {
            source,
            sink,
            endpoint: endpoint.into(),
            rules,
            tracker: DeltaTracker::new(),
            state: PollState::Idle,
            cycles: 0,
        }
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    pub fn tracker(&self) -> &DeltaTracker {
        &self.tracker
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    fn transition(&mut self, next: PollState) {
        trace!(from = ?self.state, to = ?next, "poll state");
        self.state = next;
    }

    /// Runs one scrape-convert-emit-flush cycle.
    ///
    /// A failed scrape skips conversion and flush. Rejected emissions are
    /// logged and the remaining events are still sent.
    pub fn run_cycle(&mut self) -> CycleOutcome {
        self.cycles += 1;
        let mut outcome = CycleOutcome::default();

        self.transition(PollState::Polling);
        info!(endpoint = %self.endpoint, cycle = self.cycles, "scraping");
        let t0 = Instant::now();
        let snapshot = match self.source.fetch(&self.endpoint) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(error = %e, endpoint = %self.endpoint, "scraping failed");
                return outcome;
            }
        };
        outcome.fetched = true;
        debug!(
            duration_ms = t0.elapsed().as_millis() as u64,
            "scraped {}",
            describe_snapshot(&snapshot)
        );

        self.transition(PollState::Converting);
        let events = convert(&snapshot, &self.rules, &mut self.tracker);
        drop(snapshot);
        outcome.events = events.len();

        for event in &events {
            if let Err(e) = self.sink.emit(event) {
                outcome.emit_failures += 1;
                let kind = match event.value {
                    EventValue::Count(_) => "count",
                    EventValue::Gauge(_) => "gauge",
                };
                error!(error = %e, metric = %event.name, kind, "failed to send metric");
            }
        }

        self.transition(PollState::Flushing);
        match self.sink.flush() {
            Ok(()) => debug!(
                events = outcome.events,
                failed = outcome.emit_failures,
                "metrics flushed"
            ),
            Err(e) => {
                outcome.flush_failed = true;
                error!(error = %e, "failed to flush metrics");
            }
        }

        outcome
    }

    /// Runs cycles until `stop` is raised, then returns the sink for closing.
    ///
    /// The signal is checked after every cycle, including failed ones, and
    /// interrupts the sleep between cycles.
    pub fn run(mut self, interval: Duration, stop: &StopSignal) -> Drained<K> {
        loop {
            self.run_cycle();

            if stop.is_raised() {
                break;
            }
            self.transition(PollState::Sleeping);
            debug!(interval_secs = interval.as_secs_f64(), "waiting for next round of scraping");
            if stop.wait_timeout(interval) {
                break;
            }
        }

        self.transition(PollState::Draining);
        info!(cycles = self.cycles, "poll loop stopped");
        Drained {
            sink: self.sink,
            cycles: self.cycles,
        }
    }
}

/// Sink handed back by a finished poll loop.
pub struct Drained<K> {
    pub sink: K,
    pub cycles: u64,
}

/// Error type for shutdown failures.
#[derive(Debug, Clone, PartialEq)]
pub enum ShutdownError {
    /// The loop did not confirm within the allowed time.
    Timeout(Duration),
    /// The loop thread ended without confirming (it panicked).
    WorkerLost,
}

impl std::fmt::Display for ShutdownError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownError::Timeout(d) => {
                write!(f, "poll loop did not finish within {:.1}s", d.as_secs_f64())
            }
            ShutdownError::WorkerLost => write!(f, "poll loop terminated unexpectedly"),
        }
    }
}

impl std::error::Error for ShutdownError {}

/// Summary of a completed shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub cycles: u64,
    /// `false` if closing the sink failed; the failure has been logged.
    pub sink_closed: bool,
    pub final_state: PollState,
}

/// Poll loop running on a background thread.
pub struct Worker<K: MetricSink> {
    done: Receiver<Drained<K>>,
    handle: Option<JoinHandle<()>>,
    stop: StopSignal,
}

impl<K: MetricSink + 'static> Worker<K> {
    /// Spawns the loop. It runs until `stop` is raised.
    pub fn start<S: MetricSource + 'static>(
        poller: Poller<S, K>,
        interval: Duration,
        stop: StopSignal,
    ) -> std::io::Result<Self> {
        let (tx, done) = mpsc::sync_channel(1);
        let thread_stop = stop.clone();

        let handle = thread::Builder::new()
            .name("poller".to_string())
            .spawn(move || {
                let drained = poller.run(interval, &thread_stop);
                // Confirmation; the receiver may be gone if close timed out.
                let _ = tx.send(drained);
            })?;

        Ok(Self {
            done,
            handle: Some(handle),
            stop,
        })
    }

    /// Raises the stop signal and closes once the loop has drained.
    pub fn stop(self) -> Result<ShutdownReport, ShutdownError> {
        self.stop.raise();
        self.close()
    }

    /// Blocks until the loop confirms it has finished, then closes the sink.
    ///
    /// Does not raise the stop signal itself. A sink close failure is logged
    /// and reported in [`ShutdownReport::sink_closed`].
    pub fn close(mut self) -> Result<ShutdownReport, ShutdownError> {
        info!("waiting for job to finish");
        let drained = self.done.recv().map_err(|_| ShutdownError::WorkerLost)?;
        Ok(self.finish(drained))
    }

    /// Like [`close`](Self::close) but gives up after `timeout`.
    ///
    /// On [`ShutdownError::Timeout`] the worker is left intact, so the caller
    /// can keep waiting with [`close`](Self::close).
    pub fn close_timeout(&mut self, timeout: Duration) -> Result<ShutdownReport, ShutdownError> {
        info!(timeout_secs = timeout.as_secs_f64(), "waiting for job to finish");
        let drained = self.done.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => ShutdownError::Timeout(timeout),
            RecvTimeoutError::Disconnected => ShutdownError::WorkerLost,
        })?;
        Ok(self.finish(drained))
    }

    fn finish(&mut self, drained: Drained<K>) -> ShutdownReport {
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            warn!("poll thread panicked after confirming shutdown");
        }

        let Drained { mut sink, cycles } = drained;
        info!("closing connection with statsd");
        let sink_closed = match sink.close() {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "failed to close sink");
                false
            }
        };

        ShutdownReport {
            cycles,
            sink_closed,
            final_state: PollState::Closed,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        Bucket, HistogramValue, MetricFamily, MetricInstance, MetricKind, MetricSnapshot,
        MetricValue,
    };
    use crate::sink::{RecordedCall, RecordingSink};
    use crate::source::{FetchError, ScriptedSource};

    fn snapshot(counter_value: f64) -> MetricSnapshot {
        let mut snapshot = MetricSnapshot::new();
        snapshot.insert(
            "requests_total".to_string(),
            MetricFamily::new("requests_total", MetricKind::Counter)
                .with_instance(MetricInstance::bare(MetricValue::Scalar(counter_value))),
        );
        snapshot.insert(
            "latency".to_string(),
            MetricFamily::new("latency", MetricKind::Histogram).with_instance(
                MetricInstance::bare(MetricValue::Histogram(HistogramValue {
                    sample_count: 2,
                    sample_sum: 0.7,
                    buckets: vec![Bucket {
                        upper_bound: 1.0,
                        cumulative_count: 2,
                    }],
                })),
            ),
        );
        snapshot
    }

    fn wait_until(timeout: Duration, cond: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    fn count(name: &str, value: i64) -> RecordedCall {
        RecordedCall::Count {
            name: name.to_string(),
            value,
            tags: vec![],
            sample_rate: 1.0,
        }
    }

    #[test]
    fn test_stop_signal_is_idempotent() {
        let stop = StopSignal::new();
        assert!(!stop.is_raised());
        assert!(stop.raise());
        assert!(!stop.raise());
        assert!(stop.is_raised());
        assert!(stop.wait_timeout(Duration::from_secs(5)));
        stop.wait();
    }

    #[test]
    fn test_stop_signal_wait_timeout_elapses() {
        let stop = StopSignal::new();
        let t0 = Instant::now();
        assert!(!stop.wait_timeout(Duration::from_millis(30)));
        assert!(t0.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_stop_signal_wakes_waiter() {
        let stop = StopSignal::new();
        let remote = stop.clone();
        let waiter = thread::spawn(move || remote.wait_timeout(Duration::from_secs(10)));
        thread::sleep(Duration::from_millis(20));
        stop.raise();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_cycle_emits_then_flushes() {
        let source = ScriptedSource::new()
            .then_ok(snapshot(10.0))
            .then_ok(snapshot(14.0));
        let sink = RecordingSink::new();
        let mut poller = Poller::new(source, sink.clone(), "http://test", ExclusionRules::default());

        let outcome = poller.run_cycle();
        assert_eq!(
            outcome,
            CycleOutcome {
                fetched: true,
                events: 4,
                emit_failures: 0,
                flush_failed: false,
            }
        );
        assert_eq!(poller.state(), PollState::Flushing);
        assert_eq!(
            sink.calls(),
            [
                count("latency.count", 2),
                count("latency.sum", 0),
                count("latency.bucket", 2),
                count("requests_total", 10),
                RecordedCall::Flush,
            ]
        );

        poller.run_cycle();
        assert_eq!(poller.cycles(), 2);
        assert_eq!(sink.emissions()[7], count("requests_total", 4));
        assert_eq!(poller.tracker().last("requests_total"), Some(14));
        assert_eq!(sink.flush_count(), 2);
    }

    #[test]
    fn test_emission_failure_does_not_abort_cycle() {
        let source = ScriptedSource::new().then_ok(snapshot(3.0));
        let sink = RecordingSink::new().fail_on("latency.count");
        let mut poller = Poller::new(source, sink.clone(), "http://test", ExclusionRules::default());

        let outcome = poller.run_cycle();
        assert_eq!(outcome.emit_failures, 1);
        assert_eq!(sink.emissions().len(), 4);
        assert_eq!(sink.flush_count(), 1);
    }

    #[test]
    fn test_flush_failure_is_reported() {
        let source = ScriptedSource::new().then_ok(snapshot(3.0));
        let sink = RecordingSink::new().fail_flush();
        let mut poller = Poller::new(source, sink, "http://test", ExclusionRules::default());
        assert!(poller.run_cycle().flush_failed);
    }

    #[test]
    fn test_fetch_failure_skips_conversion_and_flush() {
        let source = ScriptedSource::new().then_err(FetchError::Status(503));
        let sink = RecordingSink::new();
        let mut poller = Poller::new(source, sink.clone(), "http://test", ExclusionRules::default());

        let outcome = poller.run_cycle();
        assert!(!outcome.fetched);
        assert!(sink.calls().is_empty());
        assert!(poller.tracker().is_empty());
        assert_eq!(poller.state(), PollState::Polling);
    }

    #[test]
    fn test_excluded_families_are_not_sent() {
        let source = ScriptedSource::new().then_ok(snapshot(3.0));
        let sink = RecordingSink::new();
        let mut poller = Poller::new(
            source,
            sink.clone(),
            "http://test",
            ExclusionRules::new(["latency"]),
        );

        poller.run_cycle();
        assert_eq!(sink.emissions(), [count("requests_total", 3)]);
    }

    #[test]
    fn test_failed_fetch_still_sleeps_full_interval() {
        let interval = Duration::from_millis(150);
        let source = ScriptedSource::new()
            .then_err(FetchError::Http("connection refused".to_string()))
            .with_fallback(snapshot(1.0));
        let sink = RecordingSink::new();
        let poller = Poller::new(
            source.clone(),
            sink.clone(),
            "http://test",
            ExclusionRules::default(),
        );

        let stop = StopSignal::new();
        let mut worker = Worker::start(poller, interval, stop.clone()).unwrap();
        assert!(wait_until(Duration::from_secs(5), || source.fetch_count() >= 2));
        stop.raise();
        let report = worker.close_timeout(Duration::from_secs(5)).unwrap();

        let times = source.fetch_times();
        assert!(times[1] - times[0] >= interval);
        // Only the second cycle emitted anything.
        assert_eq!(sink.flush_count(), report.cycles as usize - 1);
        assert_eq!(sink.close_count(), 1);
    }

    #[test]
    fn test_stop_mid_cycle_lets_cycle_finish() {
        let source = ScriptedSource::new()
            .with_fallback(snapshot(5.0))
            .with_delay(Duration::from_millis(200));
        let sink = RecordingSink::new();
        let poller = Poller::new(
            source.clone(),
            sink.clone(),
            "http://test",
            ExclusionRules::default(),
        );

        let stop = StopSignal::new();
        let worker = Worker::start(poller, Duration::from_secs(60), stop.clone()).unwrap();
        assert!(wait_until(Duration::from_secs(5), || source.fetch_count() == 1));
        // The fetch is still blocked in its delay.
        stop.raise();
        let report = worker.close().unwrap();

        assert_eq!(
            report,
            ShutdownReport {
                cycles: 1,
                sink_closed: true,
                final_state: PollState::Closed,
            }
        );
        assert_eq!(source.fetch_count(), 1);
        assert_eq!(sink.emissions().len(), 4);
        assert_eq!(sink.flush_count(), 1);
        assert_eq!(sink.close_count(), 1);
        assert_eq!(sink.calls().last(), Some(&RecordedCall::Close));
    }

    #[test]
    fn test_stop_interrupts_sleep() {
        let source = ScriptedSource::new().with_fallback(snapshot(1.0));
        let sink = RecordingSink::new();
        let poller = Poller::new(
            source.clone(),
            sink.clone(),
            "http://test",
            ExclusionRules::default(),
        );

        let stop = StopSignal::new();
        let worker = Worker::start(poller, Duration::from_secs(3600), stop.clone()).unwrap();
        assert!(wait_until(Duration::from_secs(5), || sink.flush_count() == 1));
        let report = worker.stop().unwrap();
        assert_eq!(report.cycles, 1);
        assert_eq!(sink.close_count(), 1);
    }

    #[test]
    fn test_close_failure_is_logged_not_fatal() {
        let source = ScriptedSource::new().with_fallback(snapshot(1.0));
        let sink = RecordingSink::new().fail_close();
        let poller = Poller::new(source, sink.clone(), "http://test", ExclusionRules::default());

        let stop = StopSignal::new();
        stop.raise();
        let worker = Worker::start(poller, Duration::from_secs(60), stop).unwrap();
        let report = worker.close().unwrap();
        assert!(!report.sink_closed);
        assert_eq!(sink.close_count(), 1);
    }

    #[test]
    fn test_close_timeout_expires_on_stuck_cycle() {
        let source = ScriptedSource::new()
            .with_fallback(snapshot(1.0))
            .with_delay(Duration::from_millis(500));
        let sink = RecordingSink::new();
        let poller = Poller::new(source, sink.clone(), "http://test", ExclusionRules::default());

        let stop = StopSignal::new();
        let mut worker = Worker::start(poller, Duration::from_secs(60), stop.clone()).unwrap();
        stop.raise();
        let result = worker.close_timeout(Duration::from_millis(50));
        assert_eq!(result, Err(ShutdownError::Timeout(Duration::from_millis(50))));
        assert!(!worker.is_finished());
        assert_eq!(sink.close_count(), 0);

        // Waiting on past the timeout still drains the cycle and closes the sink.
        let report = worker.close().unwrap();
        assert_eq!(report.cycles, 1);
        assert!(report.sink_closed);
        assert_eq!(sink.flush_count(), 1);
        assert_eq!(sink.close_count(), 1);
    }
}
