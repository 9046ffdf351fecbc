//! Translation of a scraped snapshot into emission events.
//!
//! Mapping per family kind:
//!
//! | kind      | events per instance                                              |
//! |-----------|------------------------------------------------------------------|
//! | counter   | `name` count (delta against the previous poll)                   |
//! | gauge     | `name` gauge, verbatim                                           |
//! | histogram | `name.count`, `name.sum`, one `name.bucket` count per bucket     |
//! | summary   | `name.count`, `name.sum` counts, one `name.quantile` gauge each  |
//!
//! Summary quantile gauges carry the quantile rank (0.5, 0.99, ...), not the
//! observed value at that rank. Histogram bucket counts are all emitted under
//! one name; the bucket bound is not tagged.

use tracing::{debug, trace};

use crate::delta::DeltaTracker;
use crate::event::{EmissionEvent, tags};
use crate::filter::ExclusionRules;
use crate::model::{MetricFamily, MetricKind, MetricSnapshot};

/// Converts `snapshot` into emission events.
///
/// Excluded families produce nothing and leave the tracker untouched. Only
/// counter families mutate `tracker`.
pub fn convert(
    snapshot: &MetricSnapshot,
    rules: &ExclusionRules,
    tracker: &mut DeltaTracker,
) -> Vec<EmissionEvent> {
    let mut events = Vec::new();

    for (name, family) in snapshot {
        if let Some(rule) = rules.matching_rule(name) {
            debug!(metric = %name, rule, "skipping excluded metric");
            continue;
        }

        debug!(metric = %name, kind = %family.kind, "sending metric");
        match family.kind {
            MetricKind::Counter => convert_counter(name, family, tracker, &mut events),
            MetricKind::Gauge => convert_gauge(name, family, &mut events),
            MetricKind::Histogram => convert_histogram(name, family, &mut events),
            MetricKind::Summary => convert_summary(name, family, &mut events),
        }
    }

    events
}

fn convert_counter(
    name: &str,
    family: &MetricFamily,
    tracker: &mut DeltaTracker,
    events: &mut Vec<EmissionEvent>,
) {
    for instance in &family.instances {
        let Some(value) = instance.value.as_scalar() else {
            mismatched(name, family.kind);
            continue;
        };
        if !value.is_finite() {
            trace!(metric = %name, value, "dropping non-finite counter value");
            continue;
        }

        // Saturating float-to-int cast truncates toward zero.
        let delta = tracker.delta(name, value as i64);
        events.push(EmissionEvent::count(name, delta, tags(&instance.labels)));
    }
}

fn convert_gauge(name: &str, family: &MetricFamily, events: &mut Vec<EmissionEvent>) {
    for instance in &family.instances {
        let Some(value) = instance.value.as_scalar() else {
            mismatched(name, family.kind);
            continue;
        };
        events.push(EmissionEvent::gauge(name, value, tags(&instance.labels)));
    }
}

fn convert_histogram(name: &str, family: &MetricFamily, events: &mut Vec<EmissionEvent>) {
    let count_name = format!("{}.count", name);
    let sum_name = format!("{}.sum", name);
    let bucket_name = format!("{}.bucket", name);

    for instance in &family.instances {
        let Some(histogram) = instance.value.as_histogram() else {
            mismatched(name, family.kind);
            continue;
        };
        let tags = tags(&instance.labels);

        events.push(EmissionEvent::count(
            count_name.as_str(),
            histogram.sample_count as i64,
            tags.clone(),
        ));
        events.push(EmissionEvent::count(
            sum_name.as_str(),
            histogram.sample_sum as i64,
            tags.clone(),
        ));
        for bucket in &histogram.buckets {
            events.push(EmissionEvent::count(
                bucket_name.as_str(),
                bucket.cumulative_count as i64,
                tags.clone(),
            ));
        }
    }
}

fn convert_summary(name: &str, family: &MetricFamily, events: &mut Vec<EmissionEvent>) {
    let count_name = format!("{}.count", name);
    let sum_name = format!("{}.sum", name);
    let quantile_name = format!("{}.quantile", name);

    for instance in &family.instances {
        let Some(summary) = instance.value.as_summary() else {
            mismatched(name, family.kind);
            continue;
        };
        let tags = tags(&instance.labels);

        events.push(EmissionEvent::count(
            count_name.as_str(),
            summary.sample_count as i64,
            tags.clone(),
        ));
        events.push(EmissionEvent::count(
            sum_name.as_str(),
            summary.sample_sum as i64,
            tags.clone(),
        ));
        for q in &summary.quantiles {
            events.push(EmissionEvent::gauge(
                quantile_name.as_str(),
                q.quantile,
                tags.clone(),
            ));
        }
    }
}

fn mismatched(name: &str, kind: MetricKind) {
    debug!(metric = %name, %kind, "instance value does not match family kind, skipping");
}
