//! Per-counter delta tracking across polls.
//!
//! Scraped counters are cumulative; the aggregation backend expects the
//! increment observed during one reporting interval. The tracker remembers the
//! last raw value per metric name and turns each new reading into a
//! non-negative increment.
//!
//! Zero doubles as the "no history" sentinel: a raw value of exactly 0 is never
//! diffed, and after a counter legitimately drops to 0 the next reading is
//! passed through as-is. This approximation is intentional.

use std::collections::HashMap;

/// Last observed raw counter value per metric name.
///
/// Owned by the poll loop and mutated only from the converter; it needs no
/// internal locking.
#[derive(Debug, Default)]
pub struct DeltaTracker {
    previous: HashMap<String, i64>,
}

impl DeltaTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `raw` for `name` and returns the increment to report.
    ///
    /// The stored value is always overwritten with `raw`, even when the
    /// returned increment is clamped.
    pub fn delta(&mut self, name: &str, raw: i64) -> i64 {
        let previous = match self.previous.get_mut(name) {
            Some(slot) => std::mem::replace(slot, raw),
            None => {
                self.previous.insert(name.to_string(), raw);
                0
            }
        };

        if previous == 0 || raw == 0 {
            // Counters are never negative; a bogus negative reading reports nothing.
            return raw.max(0);
        }

        // Regressions (restarts, resets) clamp to zero.
        raw.saturating_sub(previous).max(0)
    }

    /// Last raw value recorded for `name`, if any.
    pub fn last(&self, name: &str) -> Option<i64> {
        self.previous.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.previous.len()
    }

    pub fn is_empty(&self) -> bool {
        self.previous.is_empty()
    }
}
