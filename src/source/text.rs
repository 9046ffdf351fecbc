//! Parser for the Prometheus text exposition format (version 0.0.4).
//!
//! Pure functions over string input so they can be tested without a server.
//!
//! ```text
//! # HELP http_requests_total Total requests.
//! # TYPE http_requests_total counter
//! http_requests_total{method="post",code="200"} 1027 1395066363000
//! # TYPE latency_seconds histogram
//! latency_seconds_bucket{le="0.5"} 2
//! latency_seconds_bucket{le="+Inf"} 5
//! latency_seconds_sum 12.5
//! latency_seconds_count 5
//! ```
//!
//! Families without a `# TYPE` line (untyped) are dropped from the snapshot.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::model::{
    Bucket, HistogramValue, Label, MetricFamily, MetricInstance, MetricKind, MetricSnapshot,
    MetricValue, Quantile, SummaryValue,
};

/// Error type for parsing failures.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    /// 1-based line number.
    pub line: usize,
    pub message: String,
}

impl ParseError {
    pub fn new(line: usize, msg: impl Into<String>) -> Self {
        Self {
            line,
            message: msg.into(),
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Parse error at line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for ParseError {}

/// One sample line, before it is folded into a family.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub name: String,
    pub labels: Vec<Label>,
    pub value: f64,
    pub timestamp_ms: Option<i64>,
}

/// Declared type of a family, including the untyped one we do not forward.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Declared {
    Known(MetricKind),
    Untyped,
}

/// Which part of a histogram/summary a sample belongs to.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Part {
    Value,
    Bucket,
    Sum,
    Count,
}

#[derive(Debug, Default)]
struct InstanceBuilder {
    labels: Vec<Label>,
    scalar: f64,
    sample_count: u64,
    sample_sum: f64,
    buckets: Vec<Bucket>,
    quantiles: Vec<Quantile>,
}

#[derive(Debug)]
struct FamilyBuilder {
    kind: MetricKind,
    instances: Vec<InstanceBuilder>,
    /// Sorted label set -> position in `instances`.
    index: HashMap<Vec<Label>, usize>,
}

impl FamilyBuilder {
    fn new(kind: MetricKind) -> Self {
        Self {
            kind,
            instances: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Instance with the same label set regardless of order, created on first
    /// use. The instance keeps the label order it was first seen with.
    fn instance(&mut self, labels: Vec<Label>) -> &mut InstanceBuilder {
        let mut key = labels.clone();
        key.sort();
        let idx = match self.index.get(&key) {
            Some(&idx) => idx,
            None => {
                let idx = self.instances.len();
                self.instances.push(InstanceBuilder {
                    labels,
                    ..InstanceBuilder::default()
                });
                self.index.insert(key, idx);
                idx
            }
        };
        &mut self.instances[idx]
    }

    fn build(self, name: String) -> MetricFamily {
        let kind = self.kind;
        let instances = self
            .instances
            .into_iter()
            .map(|i| {
                let value = match kind {
                    MetricKind::Counter | MetricKind::Gauge => MetricValue::Scalar(i.scalar),
                    MetricKind::Histogram => MetricValue::Histogram(HistogramValue {
                        sample_count: i.sample_count,
                        sample_sum: i.sample_sum,
                        buckets: i.buckets,
                    }),
                    MetricKind::Summary => MetricValue::Summary(SummaryValue {
                        sample_count: i.sample_count,
                        sample_sum: i.sample_sum,
                        quantiles: i.quantiles,
                    }),
                };
                MetricInstance::new(i.labels, value)
            })
            .collect();

        MetricFamily {
            name,
            kind,
            instances,
        }
    }
}

/// Parses a full exposition payload into a snapshot.
pub fn parse_text(content: &str) -> Result<MetricSnapshot, ParseError> {
    let mut declared: HashMap<String, Declared> = HashMap::new();
    let mut families: BTreeMap<String, FamilyBuilder> = BTreeMap::new();
    let mut sampled: HashSet<String> = HashSet::new();

    for (idx, raw_line) in content.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(comment) = line.strip_prefix('#') {
            let mut tokens = comment.split_whitespace();
            if tokens.next() != Some("TYPE") {
                // HELP and free-form comments carry nothing we forward.
                continue;
            }
            let name = tokens
                .next()
                .ok_or_else(|| ParseError::new(line_no, "TYPE line without metric name"))?;
            let token = tokens
                .next()
                .ok_or_else(|| ParseError::new(line_no, format!("TYPE line for {} without type", name)))?;
            let kind = match token {
                "untyped" => Declared::Untyped,
                other => Declared::Known(MetricKind::from_type_token(other).ok_or_else(|| {
                    ParseError::new(line_no, format!("unknown metric type '{}'", other))
                })?),
            };

            if declared.contains_key(name) || sampled.contains(name) {
                return Err(ParseError::new(
                    line_no,
                    format!(
                        "second TYPE line for metric {}, or TYPE reported after samples",
                        name
                    ),
                ));
            }
            declared.insert(name.to_string(), kind);
            if let Declared::Known(kind) = kind {
                families.insert(name.to_string(), FamilyBuilder::new(kind));
            }
            continue;
        }

        let sample = parse_sample_line(line).map_err(|msg| ParseError::new(line_no, msg))?;
        let (family_name, part) = resolve_family(&sample.name, &declared);
        sampled.insert(family_name.to_string());

        let Some(Declared::Known(kind)) = declared.get(family_name).copied() else {
            continue;
        };
        let family_name = family_name.to_string();
        let Some(family) = families.get_mut(&family_name) else {
            continue;
        };

        add_sample(family, kind, part, sample).map_err(|msg| ParseError::new(line_no, msg))?;
    }

    Ok(families
        .into_iter()
        .map(|(name, builder)| (name.clone(), builder.build(name)))
        .collect())
}

/// Maps a sample name to its family and the part of the family it carries.
fn resolve_family<'a>(name: &'a str, declared: &HashMap<String, Declared>) -> (&'a str, Part) {
    if declared.contains_key(name) {
        return (name, Part::Value);
    }

    let suffixes = [
        ("_bucket", Part::Bucket),
        ("_sum", Part::Sum),
        ("_count", Part::Count),
    ];
    for (suffix, part) in suffixes {
        let Some(base) = name.strip_suffix(suffix) else {
            continue;
        };
        match declared.get(base) {
            Some(Declared::Known(MetricKind::Histogram)) => return (base, part),
            Some(Declared::Known(MetricKind::Summary)) if part != Part::Bucket => {
                return (base, part);
            }
            _ => {}
        }
    }

    (name, Part::Value)
}

fn add_sample(
    family: &mut FamilyBuilder,
    kind: MetricKind,
    part: Part,
    sample: Sample,
) -> Result<(), String> {
    match (kind, part) {
        (MetricKind::Counter | MetricKind::Gauge, _) => {
            family.instances.push(InstanceBuilder {
                labels: sample.labels,
                scalar: sample.value,
                ..InstanceBuilder::default()
            });
        }
        (MetricKind::Histogram, Part::Bucket) => {
            let (labels, le) = take_label(sample.labels, "le");
            let le = le.ok_or_else(|| format!("{} bucket without 'le' label", sample.name))?;
            let upper_bound = parse_value(&le)
                .ok_or_else(|| format!("invalid 'le' value '{}' for {}", le, sample.name))?;
            family.instance(labels).buckets.push(Bucket {
                upper_bound,
                cumulative_count: sample.value as u64,
            });
        }
        (MetricKind::Histogram, Part::Value) => {
            return Err(format!(
                "histogram sample {} without _bucket, _sum or _count suffix",
                sample.name
            ));
        }
        (MetricKind::Summary, Part::Value) => {
            let (labels, quantile) = take_label(sample.labels, "quantile");
            let quantile =
                quantile.ok_or_else(|| format!("{} sample without 'quantile' label", sample.name))?;
            let quantile = parse_value(&quantile).ok_or_else(|| {
                format!("invalid 'quantile' value '{}' for {}", quantile, sample.name)
            })?;
            family.instance(labels).quantiles.push(Quantile {
                quantile,
                value: sample.value,
            });
        }
        (MetricKind::Histogram | MetricKind::Summary, Part::Sum) => {
            family.instance(sample.labels).sample_sum = sample.value;
        }
        (MetricKind::Histogram | MetricKind::Summary, Part::Count) => {
            family.instance(sample.labels).sample_count = sample.value as u64;
        }
        (MetricKind::Summary, Part::Bucket) => {
            return Err(format!("unexpected bucket sample {} for summary", sample.name));
        }
    }
    Ok(())
}

/// Removes the label named `key`, returning the remaining labels and its value.
fn take_label(labels: Vec<Label>, key: &str) -> (Vec<Label>, Option<String>) {
    let mut rest = Vec::with_capacity(labels.len());
    let mut found = None;
    for label in labels {
        if found.is_none() && label.name == key {
            found = Some(label.value);
        } else {
            rest.push(label);
        }
    }
    (rest, found)
}

/// Parses a sample value; accepts `NaN`, `+Inf`, `-Inf` besides decimals.
pub fn parse_value(s: &str) -> Option<f64> {
    match s {
        "NaN" => Some(f64::NAN),
        "+Inf" | "Inf" => Some(f64::INFINITY),
        "-Inf" => Some(f64::NEG_INFINITY),
        other => other.parse().ok(),
    }
}

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == ':'
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == ':'
}

/// Parses one sample line: `name{labels} value [timestamp]`.
pub fn parse_sample_line(line: &str) -> Result<Sample, String> {
    let line = line.trim();
    let name_end = line
        .char_indices()
        .find(|&(i, c)| if i == 0 { !is_name_start(c) } else { !is_name_char(c) })
        .map(|(i, _)| i)
        .unwrap_or(line.len());
    if name_end == 0 {
        return Err(format!("invalid metric name in line '{}'", line));
    }
    let name = &line[..name_end];
    let mut rest = &line[name_end..];

    let labels = if let Some(after_brace) = rest.strip_prefix('{') {
        let (labels, consumed) = parse_labels(after_brace)?;
        rest = &after_brace[consumed..];
        labels
    } else {
        Vec::new()
    };

    let mut fields = rest.split_whitespace();
    let value_str = fields
        .next()
        .ok_or_else(|| format!("missing value for {}", name))?;
    let value = parse_value(value_str)
        .ok_or_else(|| format!("invalid value '{}' for {}", value_str, name))?;

    let timestamp_ms = match fields.next() {
        Some(ts) => Some(
            ts.parse::<i64>()
                .map_err(|_| format!("invalid timestamp '{}' for {}", ts, name))?,
        ),
        None => None,
    };

    if let Some(extra) = fields.next() {
        return Err(format!("unexpected token '{}' after sample {}", extra, name));
    }

    Ok(Sample {
        name: name.to_string(),
        labels,
        value,
        timestamp_ms,
    })
}

/// Parses the label set after the opening `{`.
///
/// Returns the labels and the number of bytes consumed, including the closing `}`.
fn parse_labels(input: &str) -> Result<(Vec<Label>, usize), String> {
    let mut labels = Vec::new();
    let mut chars = input.char_indices().peekable();

    loop {
        while chars.next_if(|&(_, c)| c.is_whitespace()).is_some() {}

        let Some(&(start, c)) = chars.peek() else {
            return Err("unterminated label set".to_string());
        };
        if c == '}' {
            return Ok((labels, start + 1));
        }
        if !is_name_start(c) || c == ':' {
            return Err(format!("invalid label name starting at '{}'", c));
        }

        let mut end = start;
        while let Some(&(i, c)) = chars.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                end = i + c.len_utf8();
                chars.next();
            } else {
                break;
            }
        }
        let key = &input[start..end];

        while chars.next_if(|&(_, c)| c.is_whitespace()).is_some() {}
        if chars.next().map(|(_, c)| c) != Some('=') {
            return Err(format!("expected '=' after label name {}", key));
        }
        while chars.next_if(|&(_, c)| c.is_whitespace()).is_some() {}
        if chars.next().map(|(_, c)| c) != Some('"') {
            return Err(format!("expected '\"' to open value of label {}", key));
        }

        let mut value = String::new();
        loop {
            match chars.next() {
                Some((_, '"')) => break,
                Some((_, '\\')) => match chars.next() {
                    Some((_, '\\')) => value.push('\\'),
                    Some((_, '"')) => value.push('"'),
                    Some((_, 'n')) => value.push('\n'),
                    Some((_, other)) => {
                        return Err(format!("invalid escape '\\{}' in label {}", other, key));
                    }
                    None => return Err(format!("unterminated value of label {}", key)),
                },
                Some((_, c)) => value.push(c),
                None => return Err(format!("unterminated value of label {}", key)),
            }
        }
        labels.push(Label::new(key, value));

        while chars.next_if(|&(_, c)| c.is_whitespace()).is_some() {}
        match chars.peek() {
            Some(&(_, ',')) => {
                chars.next();
            }
            Some(&(_, '}')) => {}
            Some(&(_, c)) => return Err(format!("unexpected '{}' after label {}", c, key)),
            None => return Err("unterminated label set".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXPOSITION: &str = r#"
# HELP http_requests_total The total number of HTTP requests.
# TYPE http_requests_total counter
http_requests_total{method="post",code="200"} 1027 1395066363000
http_requests_total{method="post",code="400"}    3 1395066363000

# A free-form comment
# TYPE go_goroutines gauge
go_goroutines 42

# HELP http_request_duration_seconds A histogram of the request duration.
# TYPE http_request_duration_seconds histogram
http_request_duration_seconds_bucket{le="0.05"} 24054
http_request_duration_seconds_bucket{le="0.1"} 33444
http_request_duration_seconds_bucket{le="+Inf"} 144320
http_request_duration_seconds_sum 53423
http_request_duration_seconds_count 144320

# HELP rpc_duration_seconds A summary of the RPC duration in seconds.
# TYPE rpc_duration_seconds summary
rpc_duration_seconds{quantile="0.01"} 3102
rpc_duration_seconds{quantile="0.5"} 4773
rpc_duration_seconds{quantile="0.99"} 76656
rpc_duration_seconds_sum 1.7560473e+07
rpc_duration_seconds_count 2693

metric_without_type 12
"#;

    #[test]
    fn test_parse_full_exposition() {
        let snapshot = parse_text(EXPOSITION).unwrap();
        assert_eq!(snapshot.len(), 4);
        assert!(!snapshot.contains_key("metric_without_type"));

        let requests = &snapshot["http_requests_total"];
        assert_eq!(requests.kind, MetricKind::Counter);
        assert_eq!(requests.instances.len(), 2);
        assert_eq!(
            requests.instances[0].labels,
            [Label::new("method", "post"), Label::new("code", "200")]
        );
        assert_eq!(requests.instances[1].value, MetricValue::Scalar(3.0));

        let goroutines = &snapshot["go_goroutines"];
        assert_eq!(goroutines.kind, MetricKind::Gauge);
        assert_eq!(goroutines.instances[0].value, MetricValue::Scalar(42.0));
    }

    #[test]
    fn test_parse_histogram_folds_samples() {
        let snapshot = parse_text(EXPOSITION).unwrap();
        let family = &snapshot["http_request_duration_seconds"];
        assert_eq!(family.kind, MetricKind::Histogram);
        assert_eq!(family.instances.len(), 1);

        let hist = family.instances[0].value.as_histogram().unwrap();
        assert_eq!(hist.sample_count, 144320);
        assert_eq!(hist.sample_sum, 53423.0);
        let counts: Vec<u64> = hist.buckets.iter().map(|b| b.cumulative_count).collect();
        assert_eq!(counts, [24054, 33444, 144320]);
        assert_eq!(hist.buckets[2].upper_bound, f64::INFINITY);
        assert!(family.instances[0].labels.is_empty());
    }

    #[test]
    fn test_parse_summary_folds_samples() {
        let snapshot = parse_text(EXPOSITION).unwrap();
        let family = &snapshot["rpc_duration_seconds"];
        assert_eq!(family.kind, MetricKind::Summary);

        let summary = family.instances[0].value.as_summary().unwrap();
        assert_eq!(summary.sample_count, 2693);
        assert_eq!(summary.sample_sum, 1.7560473e7);
        let ranks: Vec<f64> = summary.quantiles.iter().map(|q| q.quantile).collect();
        assert_eq!(ranks, [0.01, 0.5, 0.99]);
        assert_eq!(summary.quantiles[1].value, 4773.0);
    }

    #[test]
    fn test_histogram_instances_split_by_labels() {
        let text = r#"
# TYPE latency histogram
latency_bucket{path="/a",le="1"} 1
latency_bucket{path="/b",le="1"} 4
latency_bucket{path="/a",le="+Inf"} 2
latency_sum{path="/a"} 1.5
latency_count{path="/a"} 2
latency_count{path="/b"} 4
"#;
        let snapshot = parse_text(text).unwrap();
        let family = &snapshot["latency"];
        assert_eq!(family.instances.len(), 2);
        assert_eq!(family.instances[0].labels, [Label::new("path", "/a")]);

        let a = family.instances[0].value.as_histogram().unwrap();
        assert_eq!(a.buckets.len(), 2);
        assert_eq!(a.sample_count, 2);

        let b = family.instances[1].value.as_histogram().unwrap();
        assert_eq!(b.buckets.len(), 1);
        assert_eq!(b.sample_sum, 0.0);
    }

    #[test]
    fn test_label_order_does_not_split_instances() {
        let text = r#"
# TYPE h histogram
h_bucket{a="1",b="2",le="+Inf"} 3
h_sum{b="2",a="1"} 4
h_count{b="2",a="1"} 3
"#;
        let snapshot = parse_text(text).unwrap();
        let family = &snapshot["h"];
        assert_eq!(family.instances.len(), 1);
        assert_eq!(
            family.instances[0].labels,
            [Label::new("a", "1"), Label::new("b", "2")]
        );

        let h = family.instances[0].value.as_histogram().unwrap();
        assert_eq!(h.buckets.len(), 1);
        assert_eq!(h.sample_sum, 4.0);
        assert_eq!(h.sample_count, 3);
    }

    #[test]
    fn test_special_values() {
        let text = "# TYPE a gauge\na NaN\na +Inf\na -Inf\n";
        let snapshot = parse_text(text).unwrap();
        let values: Vec<f64> = snapshot["a"]
            .instances
            .iter()
            .map(|i| i.value.as_scalar().unwrap())
            .collect();
        assert!(values[0].is_nan());
        assert_eq!(values[1], f64::INFINITY);
        assert_eq!(values[2], f64::NEG_INFINITY);
    }

    #[test]
    fn test_declared_family_without_samples_is_kept() {
        let snapshot = parse_text("# TYPE idle_total counter\n").unwrap();
        assert!(snapshot["idle_total"].instances.is_empty());
    }

    #[test]
    fn test_gauge_named_like_suffix_is_not_folded() {
        let text = "# TYPE jobs histogram\n# TYPE jobs_count gauge\njobs_count 7\n";
        let snapshot = parse_text(text).unwrap();
        assert_eq!(snapshot["jobs_count"].instances.len(), 1);
        assert!(snapshot["jobs"].instances.is_empty());
    }

    #[test]
    fn test_label_escapes() {
        let sample = parse_sample_line(r#"msg{text="a \"quoted\" \\ line\nnext",} 1"#).unwrap();
        assert_eq!(sample.labels, [Label::new("text", "a \"quoted\" \\ line\nnext")]);
        assert_eq!(sample.value, 1.0);
        assert_eq!(sample.timestamp_ms, None);
    }

    #[test]
    fn test_sample_with_timestamp() {
        let sample = parse_sample_line("up 1 1395066363000").unwrap();
        assert_eq!(sample.name, "up");
        assert_eq!(sample.timestamp_ms, Some(1395066363000));
    }

    #[test]
    fn test_errors() {
        let err = parse_text("# TYPE a counter\na abc\n").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("invalid value"));

        let err = parse_text("# TYPE a rainbow\n").unwrap_err();
        assert!(err.message.contains("unknown metric type"));

        let err = parse_text("# TYPE a counter\n# TYPE a gauge\n").unwrap_err();
        assert_eq!(err.line, 2);

        let err = parse_text("a 1\n# TYPE a counter\n").unwrap_err();
        assert!(err.message.contains("after samples"));

        let err = parse_text("# TYPE h histogram\nh_bucket 1\n").unwrap_err();
        assert!(err.message.contains("'le'"));

        let err = parse_text("# TYPE s summary\ns 1\n").unwrap_err();
        assert!(err.message.contains("'quantile'"));

        assert!(parse_text("# TYPE a counter\na{x=\"1\" 1\n").is_err());
        assert!(parse_text("{x=\"1\"} 1\n").is_err());
        assert!(parse_text("# TYPE a counter\na 1 2 3\n").is_err());
    }

    #[test]
    fn test_error_display() {
        let err = ParseError::new(3, "bad");
        assert_eq!(err.to_string(), "Parse error at line 3: bad");
    }
}
