//! Per-operation request statistics with mergeable latency histograms

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use hdrhistogram::serialization::{Deserializer, Serializer as _, V2Serializer};
use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::operation::Operation;
use super::timeline::now_millis;

/// Highest trackable latency in microseconds (60s)
const MAX_LATENCY_US: u64 = 60_000_000;

fn new_histogram() -> Histogram<u64> {
    Histogram::new_with_bounds(1, MAX_LATENCY_US, 3).expect("valid histogram bounds")
}

/// Counters and latency distribution of a single operation
#[derive(Debug, Clone, PartialEq)]
pub struct OperationStats {
    pub requests: u64,
    pub errors: u64,
    /// Sum of successful response times in nanoseconds
    pub response_time_sum: u64,
    /// Successful response times in microseconds
    histogram: Histogram<u64>,
}

impl Default for OperationStats {
    fn default() -> Self {
        Self {
            requests: 0,
            errors: 0,
            response_time_sum: 0,
            histogram: new_histogram(),
        }
    }
}

impl OperationStats {
    pub fn record_request(&mut self, elapsed: Duration) {
        self.requests += 1;
        self.response_time_sum = self
            .response_time_sum
            .saturating_add(elapsed.as_nanos() as u64);
        self.histogram
            .saturating_record((elapsed.as_micros() as u64).max(1));
    }

    pub fn record_error(&mut self) {
        self.errors += 1;
    }

    /// Add another entry into this one; histograms merge bucket-wise
    pub fn merge(&mut self, other: &OperationStats) {
        self.requests += other.requests;
        self.errors += other.errors;
        self.response_time_sum = self.response_time_sum.saturating_add(other.response_time_sum);
        if let Err(e) = self.histogram.add(&other.histogram) {
            warn!(error = %e, "Failed to merge latency histograms");
        }
    }

    pub fn histogram(&self) -> &Histogram<u64> {
        &self.histogram
    }

    /// Mean successful response time
    pub fn mean(&self) -> Duration {
        if self.requests == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(self.response_time_sum / self.requests)
    }

    /// Response time at `quantile` (0.0..=1.0), microsecond resolution
    pub fn percentile(&self, quantile: f64) -> Duration {
        if self.histogram.is_empty() {
            return Duration::ZERO;
        }
        Duration::from_micros(self.histogram.value_at_quantile(quantile))
    }
}

#[derive(Serialize, Deserialize)]
struct OperationStatsRepr {
    requests: u64,
    errors: u64,
    response_time_sum: u64,
    histogram: Vec<u8>,
}

impl Serialize for OperationStats {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut histogram = Vec::new();
        V2Serializer::new()
            .serialize(&self.histogram, &mut histogram)
            .map_err(serde::ser::Error::custom)?;
        OperationStatsRepr {
            requests: self.requests,
            errors: self.errors,
            response_time_sum: self.response_time_sum,
            histogram,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for OperationStats {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let repr = OperationStatsRepr::deserialize(deserializer)?;
        let decoded: Histogram<u64> = Deserializer::new()
            .deserialize(&mut repr.histogram.as_slice())
            .map_err(serde::de::Error::custom)?;
        // Keep the common bounds so later merges never need to resize
        let mut histogram = new_histogram();
        histogram.add(&decoded).map_err(serde::de::Error::custom)?;
        Ok(Self {
            requests: repr.requests,
            errors: repr.errors,
            response_time_sum: repr.response_time_sum,
            histogram,
        })
    }
}

/// Printable digest of one operation (or group)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationSummary {
    pub requests: u64,
    pub errors: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
    /// Successful requests per second over the measured window
    pub throughput: f64,
}

/// Statistics of one stressor, one worker, or a whole stage
///
/// Merging is additive: counters add up, histograms merge bucket-wise and
/// the measured window widens to cover both sides. The result does not
/// depend on merge order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    begin_ms: Option<u64>,
    end_ms: Option<u64>,
    operations: BTreeMap<String, OperationStats>,
    groups: BTreeMap<String, BTreeSet<String>>,
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the start of the measured window (wall clock)
    pub fn begin(&mut self) {
        self.begin_ms = Some(now_millis());
    }

    /// Mark the end of the measured window (wall clock)
    pub fn end(&mut self) {
        self.end_ms = Some(now_millis());
    }

    pub fn record_request(&mut self, operation: Operation, elapsed: Duration) {
        self.entry(operation).record_request(elapsed);
    }

    pub fn record_error(&mut self, operation: Operation) {
        self.entry(operation).record_error();
    }

    fn entry(&mut self, operation: Operation) -> &mut OperationStats {
        self.operations
            .entry(operation.name().to_string())
            .or_default()
    }

    /// Declare a named group summing the given operations
    pub fn register_group<'a>(&mut self, group: &str, operations: impl IntoIterator<Item = &'a Operation>) {
        let members = self.groups.entry(group.to_string()).or_default();
        members.extend(operations.into_iter().map(|op| op.name().to_string()));
    }

    pub fn merge(&mut self, other: &Statistics) {
        self.begin_ms = match (self.begin_ms, other.begin_ms) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.end_ms = match (self.end_ms, other.end_ms) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        for (name, stats) in &other.operations {
            self.operations.entry(name.clone()).or_default().merge(stats);
        }
        for (group, members) in &other.groups {
            self.groups
                .entry(group.clone())
                .or_default()
                .extend(members.iter().cloned());
        }
    }

    pub fn operation(&self, name: &str) -> Option<&OperationStats> {
        self.operations.get(name)
    }

    pub fn operations(&self) -> impl Iterator<Item = (&str, &OperationStats)> {
        self.operations.iter().map(|(name, stats)| (name.as_str(), stats))
    }

    pub fn groups(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    /// Sum of all member operations of `group`
    pub fn group_total(&self, group: &str) -> Option<OperationStats> {
        let members = self.groups.get(group)?;
        let mut total = OperationStats::default();
        for name in members {
            if let Some(stats) = self.operations.get(name) {
                total.merge(stats);
            }
        }
        Some(total)
    }

    pub fn total_requests(&self) -> u64 {
        self.operations.values().map(|s| s.requests).sum()
    }

    pub fn total_errors(&self) -> u64 {
        self.operations.values().map(|s| s.errors).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Measured window, if both ends were marked
    pub fn duration(&self) -> Option<Duration> {
        match (self.begin_ms, self.end_ms) {
            (Some(begin), Some(end)) => Some(Duration::from_millis(end.saturating_sub(begin))),
            _ => None,
        }
    }

    pub fn summarize(&self, stats: &OperationStats) -> OperationSummary {
        let throughput = match self.duration() {
            Some(d) if !d.is_zero() => stats.requests as f64 / d.as_secs_f64(),
            _ => 0.0,
        };
        OperationSummary {
            requests: stats.requests,
            errors: stats.errors,
            mean_us: stats.mean().as_micros() as u64,
            p50_us: stats.percentile(0.5).as_micros() as u64,
            p99_us: stats.percentile(0.99).as_micros() as u64,
            max_us: stats.histogram.max(),
            throughput,
        }
    }

    /// Summaries of every operation followed by every group
    pub fn summaries(&self) -> BTreeMap<String, OperationSummary> {
        let mut out: BTreeMap<String, OperationSummary> = self
            .operations
            .iter()
            .map(|(name, stats)| (name.clone(), self.summarize(stats)))
            .collect();
        for group in self.groups.keys() {
            if let Some(total) = self.group_total(group) {
                out.insert(group.clone(), self.summarize(&total));
            }
        }
        out
    }
}
