use crate::{
    aggregate::Summary,
    error::Result,
    link::LinkId,
    store::{Record, SummaryStore},
};
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use std::{sync::Arc, time::Duration};

/// One row of the latency/uptime graph a dashboard draws per link.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GraphPoint {
    pub at: DateTime<Utc>,
    pub uptime: f64,
    /// Milliseconds.
    pub mean_ms: f64,
    /// Milliseconds.
    pub p99_ms: f64,
}

impl From<&Record> for GraphPoint {
    fn from((at, summary): &Record) -> Self {
        Self {
            at: *at,
            uptime: summary.uptime,
            mean_ms: summary.mean * 1000.0,
            p99_ms: summary.p99 * 1000.0,
        }
    }
}

/// Reads persisted summaries over a trailing window.
pub struct RangeReader<S: SummaryStore + ?Sized> {
    store: Arc<S>,
}

impl<S: SummaryStore + ?Sized> RangeReader<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Every summary of `link` whose bucket started within `lookback` of now.
    pub fn read(&self, link: LinkId, lookback: Duration) -> Result<Vec<Record>> {
        self.read_at(link, lookback, Utc::now())
    }

    /// As [`read`](Self::read) with an explicit reference time. The window is
    /// `[now - lookback, now]`, inclusive on both ends.
    pub fn read_at(
        &self,
        link: LinkId,
        lookback: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<Record>> {
        // lookbacks reaching past the representable range read from the start
        let from = TimeDelta::from_std(lookback)
            .ok()
            .and_then(|lookback| now.checked_sub_signed(lookback))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        self.store.scan(link, from, Some(now))?.collect()
    }

    pub fn summaries(&self, link: LinkId, lookback: Duration) -> Result<Vec<Summary>> {
        Ok(self
            .read(link, lookback)?
            .into_iter()
            .map(|(_, summary)| summary)
            .collect())
    }

    pub fn points(&self, link: LinkId, lookback: Duration) -> Result<Vec<GraphPoint>> {
        Ok(self
            .read(link, lookback)?
            .iter()
            .map(GraphPoint::from)
            .collect())
    }
}
