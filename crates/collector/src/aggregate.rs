use crate::{error::AggregationError, observation::Observation};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::cmp::Ordering;

/// Rollup of one bucket (or, at query time, of a window of buckets).
///
/// Latency fields are in seconds, `uptime` in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub uptime: f64,
    pub mean: f64,
    pub stddev: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Aggregate a bucket's observations.
///
/// Percentiles use the nearest-rank method: the value at rank
/// `ceil(p * n / 100)` of the sorted latencies.
pub fn aggregate(observations: &[Observation]) -> Result<Summary, AggregationError> {
    if observations.is_empty() {
        return Err(AggregationError::Empty);
    }

    let mut latencies = Vec::with_capacity(observations.len());
    for obs in observations {
        let secs = obs.latency_secs();
        if !secs.is_finite() {
            return Err(AggregationError::NonFinite(secs));
        }
        latencies.push(secs);
    }

    let up = observations.iter().filter(|obs| obs.up).count();
    let count = observations.len();

    let mean = latencies.iter().mean();
    // unbiased estimator is undefined for a single sample
    let stddev = if count > 1 { latencies.iter().std_dev() } else { 0.0 };

    latencies.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));

    Ok(Summary {
        uptime: up as f64 * 100.0 / count as f64,
        mean,
        stddev,
        p90: nearest_rank(&latencies, 90),
        p95: nearest_rank(&latencies, 95),
        p99: nearest_rank(&latencies, 99),
    })
}

/// `sorted` must be non-empty and ascending.
fn nearest_rank(sorted: &[f64], percent: usize) -> f64 {
    let len = sorted.len();
    let rank = (percent * len).div_ceil(100).clamp(1, len);
    sorted[rank - 1]
}

/// Field-wise mean of the summaries in a window (mean of means).
pub fn rollup(summaries: &[Summary]) -> Option<Summary> {
    if summaries.is_empty() {
        return None;
    }

    let n = summaries.len() as f64;
    let field_mean = |f: fn(&Summary) -> f64| summaries.iter().map(f).sum::<f64>() / n;

    Some(Summary {
        uptime: field_mean(|s| s.uptime),
        mean: field_mean(|s| s.mean),
        stddev: field_mean(|s| s.stddev),
        p90: field_mean(|s| s.p90),
        p95: field_mean(|s| s.p95),
        p99: field_mean(|s| s.p99),
    })
}
