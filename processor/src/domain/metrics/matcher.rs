//! Metric filters
//!
//! A filter selects metrics by name (strict equality or regular expression)
//! and data points by attribute predicates.

use std::borrow::Cow;

use opentelemetry_proto::tonic::common::v1::KeyValue;
use opentelemetry_proto::tonic::metrics::v1::Metric;
use regex::Regex;

use super::points;
use crate::utils::otlp::get_attribute_string;

/// Matches a single string, either exactly or by regular expression
#[derive(Debug, Clone)]
pub enum StringMatcher {
    Strict(String),
    Regexp(Regex),
}

impl StringMatcher {
    pub fn regexp(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(Self::Regexp)
    }

    pub fn matches(&self, value: &str) -> bool {
        match self {
            Self::Strict(expected) => expected == value,
            Self::Regexp(re) => re.is_match(value),
        }
    }
}

/// Metric name matcher plus per-attribute predicates
#[derive(Debug, Clone)]
pub struct MetricFilter {
    name: StringMatcher,
    attributes: Vec<(String, StringMatcher)>,
}

impl MetricFilter {
    pub fn strict(name: &str) -> Self {
        Self {
            name: StringMatcher::Strict(name.to_string()),
            attributes: Vec::new(),
        }
    }

    pub fn regexp(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            name: StringMatcher::regexp(pattern)?,
            attributes: Vec::new(),
        })
    }

    /// Add an attribute predicate. A missing attribute is matched as the empty string.
    pub fn with_attribute(mut self, key: &str, matcher: StringMatcher) -> Self {
        self.attributes.push((key.to_string(), matcher));
        self
    }

    pub fn is_regexp(&self) -> bool {
        matches!(self.name, StringMatcher::Regexp(_))
    }

    pub fn matches_name(&self, name: &str) -> bool {
        self.name.matches(name)
    }

    /// Name matches and at least one data point (or none at all) satisfies the predicates
    pub fn matches(&self, metric: &Metric) -> bool {
        self.matches_name(&metric.name) && points::match_any(metric, self)
    }

    /// Every predicate holds for the given attribute list
    pub fn attributes_match(&self, attrs: &[KeyValue]) -> bool {
        self.attributes.iter().all(|(key, matcher)| {
            let value = get_attribute_string(attrs, key).unwrap_or_default();
            matcher.matches(&value)
        })
    }

    /// Byte offsets of the first match and its capture groups against `name`.
    /// Index 0 is the whole match; non-participating groups are `None`.
    /// Strict filters have no submatches.
    pub fn submatches(&self, name: &str) -> Option<Vec<Option<(usize, usize)>>> {
        let StringMatcher::Regexp(re) = &self.name else {
            return None;
        };
        let caps = re.captures(name)?;
        Some(
            (0..caps.len())
                .map(|i| caps.get(i).map(|m| (m.start(), m.end())))
                .collect(),
        )
    }

    /// Attribute keys for capture groups, aligned with `submatches` indexes.
    /// Unnamed groups are keyed `$N`; index 0 is unused.
    pub fn capture_keys(&self) -> Vec<String> {
        let StringMatcher::Regexp(re) = &self.name else {
            return Vec::new();
        };
        re.capture_names()
            .enumerate()
            .map(|(i, name)| match name {
                _ if i == 0 => String::new(),
                Some(name) => name.to_string(),
                None => format!("${i}"),
            })
            .collect()
    }

    /// Expand `$1` / `$name` references in `template` against `name`.
    /// Empty when the filter is strict or the pattern does not match.
    pub fn expand(&self, template: &str, name: &str) -> String {
        let StringMatcher::Regexp(re) = &self.name else {
            return String::new();
        };
        let mut expanded = String::new();
        if let Some(caps) = re.captures(name) {
            caps.expand(template, &mut expanded);
        }
        expanded
    }

    /// Matching part of `metric`, see [`points::extract`]
    pub fn extract<'a>(&self, metric: &'a Metric) -> Option<Cow<'a, Metric>> {
        if !self.matches_name(&metric.name) {
            return None;
        }
        points::extract(metric, self)
    }
}
