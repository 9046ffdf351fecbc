//! Name-based exclusion of metric families.

use tracing::warn;

/// Ordered list of metric name prefixes to suppress.
///
/// Matching is case-sensitive and exact-prefix. An empty prefix matches every
/// name, so [`ExclusionRules::parse_list`] drops blank entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExclusionRules {
    prefixes: Vec<String>,
}

impl ExclusionRules {
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prefixes: prefixes.into_iter().map(Into::into).collect(),
        }
    }

    /// Parses a comma separated list such as `test_,go_,process_`.
    pub fn parse_list(list: &str) -> Self {
        let mut prefixes = Vec::new();
        let mut dropped_blank = false;

        for entry in list.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                dropped_blank = true;
                continue;
            }
            prefixes.push(entry.to_string());
        }

        if dropped_blank && !list.trim().is_empty() {
            warn!(list, "ignoring blank entry in exclusion list");
        }

        Self { prefixes }
    }

    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    /// Returns the first rule matching `name`, if any.
    pub fn matching_rule(&self, name: &str) -> Option<&str> {
        self.prefixes
            .iter()
            .find(|prefix| name.starts_with(prefix.as_str()))
            .map(String::as_str)
    }

    pub fn should_exclude(&self, name: &str) -> bool {
        self.matching_rule(name).is_some()
    }
}
