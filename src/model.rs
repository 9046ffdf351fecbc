//! Semantic model of a scraped metrics snapshot.
//!
//! A snapshot is produced fresh by a [`MetricSource`](crate::source::MetricSource)
//! on every poll and is discarded once converted into emission events.

use std::collections::BTreeMap;

/// All metric families of one scrape, keyed by family name.
pub type MetricSnapshot = BTreeMap<String, MetricFamily>;

/// Shape of a metric family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
    Summary,
}

impl MetricKind {
    /// Parses the type token used in a `# TYPE` line.
    pub fn from_type_token(token: &str) -> Option<Self> {
        match token {
            "counter" => Some(MetricKind::Counter),
            "gauge" => Some(MetricKind::Gauge),
            "histogram" => Some(MetricKind::Histogram),
            "summary" => Some(MetricKind::Summary),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
            MetricKind::Summary => "summary",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named group of metric instances sharing one kind.
///
/// `instances` may be empty when the family was declared but carried no samples.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricFamily {
    pub name: String,
    pub kind: MetricKind,
    pub instances: Vec<MetricInstance>,
}

impl MetricFamily {
    pub fn new(name: impl Into<String>, kind: MetricKind) -> Self {
        Self {
            name: name.into(),
            kind,
            instances: Vec::new(),
        }
    }

    /// Appends an instance, builder style.
    pub fn with_instance(mut self, instance: MetricInstance) -> Self {
        self.instances.push(instance);
        self
    }
}

/// Single label pair attached to an instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label {
    pub name: String,
    pub value: String,
}

impl Label {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// One labelled sample (or sample group, for histograms and summaries).
#[derive(Debug, Clone, PartialEq)]
pub struct MetricInstance {
    pub labels: Vec<Label>,
    pub value: MetricValue,
}

impl MetricInstance {
    pub fn new(labels: Vec<Label>, value: MetricValue) -> Self {
        Self { labels, value }
    }

    /// Unlabelled instance.
    pub fn bare(value: MetricValue) -> Self {
        Self::new(Vec::new(), value)
    }
}

/// Value carried by an instance; the variant matches the family kind.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    /// Counter or gauge reading. May be NaN or infinite.
    Scalar(f64),
    Histogram(HistogramValue),
    Summary(SummaryValue),
}

impl MetricValue {
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            MetricValue::Scalar(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_histogram(&self) -> Option<&HistogramValue> {
        match self {
            MetricValue::Histogram(h) => Some(h),
            _ => None,
        }
    }

    pub fn as_summary(&self) -> Option<&SummaryValue> {
        match self {
            MetricValue::Summary(s) => Some(s),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistogramValue {
    pub sample_count: u64,
    pub sample_sum: f64,
    /// Buckets in exposition order; counts are cumulative.
    pub buckets: Vec<Bucket>,
}

/// Histogram bucket. The upper bound is kept for diagnostics only.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bucket {
    pub upper_bound: f64,
    pub cumulative_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SummaryValue {
    pub sample_count: u64,
    pub sample_sum: f64,
    pub quantiles: Vec<Quantile>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quantile {
    /// Quantile rank, e.g. 0.99.
    pub quantile: f64,
    /// Observed value at that rank.
    pub value: f64,
}

/// Short human-readable description of a snapshot for logging.
pub fn describe_snapshot(snapshot: &MetricSnapshot) -> String {
    let mut counts = [0usize; 4];
    let mut instances = 0usize;

    for family in snapshot.values() {
        let idx = match family.kind {
            MetricKind::Counter => 0,
            MetricKind::Gauge => 1,
            MetricKind::Histogram => 2,
            MetricKind::Summary => 3,
        };
        counts[idx] += 1;
        instances += family.instances.len();
    }

    format!(
        "{} families ({} counters, {} gauges, {} histograms, {} summaries), {} instances",
        snapshot.len(),
        counts[0],
        counts[1],
        counts[2],
        counts[3],
        instances
    )
}
