//! Traffic Metrics Engine
//!
//! Derives volume, throughput, inter-arrival timing and flow statistics from
//! an ordered sequence of IP records in a single forward pass.
//!
//! # Derived values
//!
//! - `total_packets` / `total_bytes` - record count and summed frame length
//! - `duration_seconds` - last minus first timestamp, floored to
//!   [`MIN_DURATION_SECONDS`] when it is not positive
//! - `throughput_bits_per_second` - `total_bytes * 8 / duration_seconds`
//! - `inter_arrival_series` - consecutive timestamp differences, in capture
//!   order (negative when the capture is out of order)
//! - `cumulative_bytes_series` - running byte total, one entry per packet
//! - `flows` - distinct source/destination pairs, sorted by address text

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use statrs::statistics::{Data, Distribution, Max, Min, OrderStatistics};
use tracing::debug;

use crate::decoder::{FlowKey, IpRecord};

/// Duration used when a capture spans no measurable time.
pub const MIN_DURATION_SECONDS: f64 = 1e-9;

/// Statistical summary for a set of intervals.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntervalStatistics {
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub median: f64,
}

/// Calculates summary statistics for a non-empty set of intervals.
pub fn calculate_statistics(intervals: &[f64]) -> IntervalStatistics {
    let mut data = Data::new(intervals.to_vec());

    let mean = data.mean().unwrap_or(0.0);
    let std_dev = data.std_dev().unwrap_or(0.0);
    let min = data.min();
    let max = data.max();
    let median = data.median();

    IntervalStatistics {
        mean,
        std_dev,
        min,
        max,
        median,
    }
}

/// Aggregate statistics for one capture.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub total_packets: u64,
    pub total_bytes: u64,
    pub duration_seconds: f64,
    pub throughput_bits_per_second: f64,
    pub mean_inter_arrival_seconds: f64,
    /// Distinct flows, sorted by the text of source then destination.
    pub flows: Vec<FlowKey>,
    pub cumulative_bytes_series: Vec<u64>,
    pub inter_arrival_series: Vec<f64>,
    /// Seconds since the first packet, one per packet.
    pub relative_times: Vec<f64>,
    pub first_timestamp: Option<f64>,
    pub last_timestamp: Option<f64>,
    pub inter_arrival_stats: Option<IntervalStatistics>,
}

impl Report {
    pub fn throughput_kbps(&self) -> f64 {
        self.throughput_bits_per_second / 1000.0
    }

    pub fn mean_inter_arrival_ms(&self) -> f64 {
        self.mean_inter_arrival_seconds * 1000.0
    }

    pub fn is_empty(&self) -> bool {
        self.total_packets == 0
    }

    /// Wall-clock time of the first packet.
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.first_timestamp.and_then(seconds_to_datetime)
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.last_timestamp.and_then(seconds_to_datetime)
    }
}

fn seconds_to_datetime(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() {
        return None;
    }
    let whole = seconds.floor();
    let nanos = (((seconds - whole) * 1e9).round() as u32).min(999_999_999);
    DateTime::from_timestamp(whole as i64, nanos)
}

/// Single-pass accumulator producing a [`Report`].
#[derive(Debug, Default)]
pub struct MetricsEngine {
    total_bytes: u64,
    first_timestamp: Option<f64>,
    last_timestamp: Option<f64>,
    flows: HashSet<FlowKey>,
    cumulative_bytes: Vec<u64>,
    inter_arrivals: Vec<f64>,
    relative_times: Vec<f64>,
}

impl MetricsEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Computes a report over a complete record sequence.
    pub fn compute<I>(records: I) -> Report
    where
        I: IntoIterator<Item = IpRecord>,
    {
        let mut engine = Self::new();
        for record in records {
            engine.push(&record);
        }
        engine.finish()
    }

    /// Accounts for the next record in capture order.
    pub fn push(&mut self, record: &IpRecord) {
        self.total_bytes += u64::from(record.total_length);
        self.cumulative_bytes.push(self.total_bytes);

        let first = *self.first_timestamp.get_or_insert(record.timestamp);
        self.relative_times.push(record.timestamp - first);

        if let Some(previous) = self.last_timestamp {
            self.inter_arrivals.push(record.timestamp - previous);
        }
        self.last_timestamp = Some(record.timestamp);

        self.flows.insert(record.flow_key());
    }

    pub fn packet_count(&self) -> u64 {
        self.cumulative_bytes.len() as u64
    }

    pub fn finish(self) -> Report {
        let total_packets = self.packet_count();

        let duration_seconds = match (self.first_timestamp, self.last_timestamp) {
            (Some(first), Some(last)) if total_packets >= 2 && last - first > 0.0 => last - first,
            _ => MIN_DURATION_SECONDS,
        };

        let throughput_bits_per_second = self.total_bytes as f64 * 8.0 / duration_seconds;

        let mean_inter_arrival_seconds = if self.inter_arrivals.is_empty() {
            0.0
        } else {
            self.inter_arrivals.iter().sum::<f64>() / self.inter_arrivals.len() as f64
        };

        let inter_arrival_stats = if self.inter_arrivals.is_empty() {
            None
        } else {
            Some(calculate_statistics(&self.inter_arrivals))
        };

        debug!(
            "Metrics: {} packets, {} bytes, {} flows over {:.6}s",
            total_packets,
            self.total_bytes,
            self.flows.len(),
            duration_seconds
        );

        let mut flows: Vec<FlowKey> = self.flows.into_iter().collect();
        flows.sort_by_cached_key(FlowKey::sort_key);

        Report {
            total_packets,
            total_bytes: self.total_bytes,
            duration_seconds,
            throughput_bits_per_second,
            mean_inter_arrival_seconds,
            flows,
            cumulative_bytes_series: self.cumulative_bytes,
            inter_arrival_series: self.inter_arrivals,
            relative_times: self.relative_times,
            first_timestamp: self.first_timestamp,
            last_timestamp: self.last_timestamp,
            inter_arrival_stats,
        }
    }
}
