//! Push-format emission events handed to a sink.

use crate::model::Label;

/// Value of an emission event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EventValue {
    /// Increment observed during the reporting interval.
    Count(i64),
    /// Instantaneous reading.
    Gauge(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmissionEvent {
    pub name: String,
    pub value: EventValue,
    /// Tags in `key:value` form.
    pub tags: Vec<String>,
}

impl EmissionEvent {
    pub fn count(name: impl Into<String>, value: i64, tags: Vec<String>) -> Self {
        Self {
            name: name.into(),
            value: EventValue::Count(value),
            tags,
        }
    }

    pub fn gauge(name: impl Into<String>, value: f64, tags: Vec<String>) -> Self {
        Self {
            name: name.into(),
            value: EventValue::Gauge(value),
            tags,
        }
    }

    pub fn is_count(&self) -> bool {
        matches!(self.value, EventValue::Count(_))
    }
}

/// Converts labels to `key:value` tags, keeping label order and duplicates.
pub fn tags(labels: &[Label]) -> Vec<String> {
    labels
        .iter()
        .map(|l| format!("{}:{}", l.name, l.value))
        .collect()
}
