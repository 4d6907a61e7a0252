use crate::{
    aggregate::aggregate,
    buffer::{ObservationBuffer, SealedBucket},
    error::{Error, Result},
    link::LinkId,
    store::SummaryStore,
};
use chrono::{DateTime, TimeDelta, Utc};
use std::{sync::Arc, time::Duration};
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What one pass over the buffer did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    /// Buckets persisted and evicted.
    pub flushed: usize,
    /// Observations covered by the flushed buckets.
    pub observations: usize,
    /// Buckets left buffered for the next cycle.
    pub failed: usize,
    pub skipped_empty: usize,
}

impl FlushReport {
    fn merge(&mut self, other: FlushReport) {
        self.flushed += other.flushed;
        self.observations += other.observations;
        self.failed += other.failed;
        self.skipped_empty += other.skipped_empty;
    }
}

/// Periodically moves closed buckets from the buffer into the store.
pub struct FlushCycle<S: SummaryStore + ?Sized> {
    buffer: Arc<ObservationBuffer>,
    store: Arc<S>,
    interval: Duration,
    eligibility: TimeDelta,
}

impl<S: SummaryStore + ?Sized> FlushCycle<S> {
    /// `eligibility` is raised to the buffer's bucket width if shorter, so a
    /// bucket is never flushed before its whole window has passed.
    pub fn new(
        buffer: Arc<ObservationBuffer>,
        store: Arc<S>,
        interval: Duration,
        eligibility: Duration,
    ) -> Self {
        let width = buffer.bucketing().width();
        let eligibility = TimeDelta::from_std(eligibility).unwrap_or(TimeDelta::MAX);
        if eligibility < width {
            warn!(
                eligibility_ms = eligibility.num_milliseconds(),
                width_ms = width.num_milliseconds(),
                "flush eligibility shorter than the bucket width; using the width"
            );
        }

        Self {
            buffer,
            store,
            interval,
            eligibility: eligibility.max(width),
        }
    }

    /// Flush every bucket whose window closed more than `eligibility` before `now`.
    pub fn tick(&self, now: DateTime<Utc>) -> FlushReport {
        let mut report = FlushReport::default();
        for link in LinkId::ALL {
            report.merge(self.flush_link(link, now));
        }

        metrics::gauge!("checker_buffered_buckets").set(self.buffer.bucket_count() as f64);
        if report.flushed > 0 || report.failed > 0 {
            debug!(?report, "flush cycle complete");
        }
        report
    }

    fn flush_link(&self, link: LinkId, now: DateTime<Utc>) -> FlushReport {
        let mut report = FlushReport::default();

        for bucket in self.buffer.seal_closed(link, now, self.eligibility) {
            if bucket.observations.is_empty() {
                self.buffer.evict(link, bucket.start);
                report.skipped_empty += 1;
                continue;
            }

            match self.flush_bucket(&bucket) {
                Ok(observations) => {
                    report.flushed += 1;
                    report.observations += observations;
                }
                Err(err) => {
                    let stage = match &err {
                        Error::Aggregation(_) => "aggregate",
                        _ => "persist",
                    };
                    error!(%link, start = %bucket.start, stage, ?err, "failed to flush bucket; will retry on next cycle");
                    metrics::counter!("checker_flush_failures", "link" => link.as_str(), "stage" => stage)
                        .increment(1);
                    report.failed += 1;
                }
            }
        }

        report
    }

    fn flush_bucket(&self, bucket: &SealedBucket) -> Result<usize> {
        let link = bucket.link;
        let start = bucket.start;

        let summary = aggregate(&bucket.observations)?;
        self.store.put(link, start, &summary)?;

        let evicted = self.buffer.evict(link, start);
        metrics::counter!("checker_buckets_flushed", "link" => link.as_str()).increment(1);
        debug!(%link, %start, observations = evicted, uptime = summary.uptime, "flushed bucket");
        Ok(evicted)
    }

    /// Tick on the configured interval until `shutdown` fires, then run one
    /// last pass. Buckets still open at that point are not persisted.
    pub async fn run(&self, shutdown: CancellationToken) -> FlushReport {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut total = FlushReport::default();

        info!(
            interval = ?self.interval,
            eligibility_secs = self.eligibility.num_milliseconds() as f64 / 1000.0,
            "flush cycle started"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("shutdown signal received");
                    break;
                }
                _ = ticker.tick() => {
                    total.merge(self.tick(Utc::now()));
                }
            }
        }

        total.merge(self.tick(Utc::now()));

        let dropped: usize = LinkId::ALL.iter().map(|link| self.buffer.pending(*link)).sum();
        if dropped > 0 {
            warn!(observations = dropped, "stopping with unflushed observations");
        }
        info!(flushed = total.flushed, failed = total.failed, "flush cycle stopped");
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        aggregate::Summary,
        error::{Error, Result},
        observation::Observation,
        store::{Record, ScanIter},
    };
    use chrono::TimeZone;
    use parking_lot::Mutex;
    use std::collections::BTreeMap;

    /// In-memory store that can be told to fail writes for one link.
    #[derive(Default)]
    struct MemoryStore {
        records: Mutex<BTreeMap<(LinkId, DateTime<Utc>), Summary>>,
        puts: Mutex<Vec<(LinkId, DateTime<Utc>)>>,
        failing: Mutex<Option<LinkId>>,
    }

    impl SummaryStore for MemoryStore {
        fn put(&self, link: LinkId, bucket_start: DateTime<Utc>, summary: &Summary) -> Result<()> {
            if *self.failing.lock() == Some(link) {
                return Err(Error::LockTimeout(Duration::from_millis(1)));
            }
            self.puts.lock().push((link, bucket_start));
            self.records.lock().insert((link, bucket_start), *summary);
            Ok(())
        }

        fn scan(
            &self,
            link: LinkId,
            from: DateTime<Utc>,
            to: Option<DateTime<Utc>>,
        ) -> Result<ScanIter<'_>> {
            let records: Vec<Result<Record>> = self
                .records
                .lock()
                .iter()
                .filter(|((l, at), _)| *l == link && *at >= from && to.is_none_or(|to| *at <= to))
                .map(|((_, at), s)| Ok((*at, *s)))
                .collect();
            Ok(Box::new(records.into_iter()))
        }

        fn last_bucket(&self, link: LinkId) -> Result<Option<DateTime<Utc>>> {
            Ok(self
                .records
                .lock()
                .keys()
                .filter(|(l, _)| *l == link)
                .map(|(_, at)| *at)
                .max())
        }
    }

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 8, 1, 0, 0, 0).unwrap() + TimeDelta::seconds(secs)
    }

    fn obs(link: LinkId, at: DateTime<Utc>, up: bool) -> Observation {
        Observation {
            link,
            observed_at: at,
            up,
            latency: Duration::from_millis(10),
        }
    }

    fn cycle(store: Arc<MemoryStore>) -> (Arc<ObservationBuffer>, FlushCycle<MemoryStore>) {
        let buffer = Arc::new(ObservationBuffer::default());
        let cycle = FlushCycle::new(
            buffer.clone(),
            store,
            Duration::from_secs(5),
            Duration::from_secs(5),
        );
        (buffer, cycle)
    }

    #[test]
    fn leaves_open_buckets_alone() {
        let store = Arc::new(MemoryStore::default());
        let (buffer, cycle) = cycle(store.clone());
        buffer.record(obs(LinkId::Wifi, t(0), true));
        buffer.record(obs(LinkId::Wifi, t(3), true));

        let report = cycle.tick(t(5) + TimeDelta::milliseconds(500));
        assert_eq!(report.flushed, 1);
        assert_eq!(buffer.pending(LinkId::Wifi), 1);
        assert_eq!(store.puts.lock().as_slice(), &[(LinkId::Wifi, t(0))]);
    }

    #[test]
    fn flushes_each_bucket_once() {
        let store = Arc::new(MemoryStore::default());
        let (buffer, cycle) = cycle(store.clone());
        for _ in 0..4 {
            buffer.record(obs(LinkId::Lan, t(0), true));
        }

        assert_eq!(cycle.tick(t(10)).flushed, 1);
        // a late observation for the flushed bucket is refused
        assert_eq!(
            buffer.record(obs(LinkId::Lan, t(0), false)),
            crate::buffer::Admission::Late
        );
        assert_eq!(cycle.tick(t(20)), FlushReport::default());

        assert_eq!(store.puts.lock().len(), 1);
        assert_eq!(store.records.lock()[&(LinkId::Lan, t(0))].uptime, 100.0);
    }

    #[test]
    fn failing_link_does_not_block_others() {
        let store = Arc::new(MemoryStore::default());
        *store.failing.lock() = Some(LinkId::Wifi);
        let (buffer, cycle) = cycle(store.clone());

        buffer.record(obs(LinkId::Wifi, t(0), true));
        buffer.record(obs(LinkId::Lan, t(0), false));
        buffer.record(obs(LinkId::Lan, t(0), true));

        let report = cycle.tick(t(10));
        assert_eq!(report.flushed, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.observations, 2);
        assert_eq!(buffer.pending(LinkId::Wifi), 1);
        assert_eq!(buffer.pending(LinkId::Lan), 0);

        *store.failing.lock() = None;
        let retry = cycle.tick(t(15));
        assert_eq!(retry.flushed, 1);
        assert_eq!(retry.observations, 1);
        assert_eq!(store.records.lock()[&(LinkId::Lan, t(0))].uptime, 50.0);
        assert_eq!(store.records.lock()[&(LinkId::Wifi, t(0))].uptime, 100.0);
    }

    #[tokio::test]
    async fn run_stops_on_cancellation() {
        let store = Arc::new(MemoryStore::default());
        let buffer = Arc::new(ObservationBuffer::default());
        let cycle = FlushCycle::new(
            buffer.clone(),
            store.clone(),
            Duration::from_millis(10),
            Duration::from_secs(5),
        );

        // old enough to be flushed by the first tick
        buffer.record(obs(LinkId::Wifi, Utc::now() - TimeDelta::seconds(60), true));

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { cycle.run(shutdown).await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();
        let total = handle.await.unwrap();

        assert_eq!(total.flushed, 1);
        assert_eq!(buffer.pending(LinkId::Wifi), 0);
        assert_eq!(store.puts.lock().len(), 1);
    }

    #[test]
    fn eligibility_never_shorter_than_bucket_width() {
        let store = Arc::new(MemoryStore::default());
        let buffer = Arc::new(ObservationBuffer::default());
        let cycle = FlushCycle::new(buffer.clone(), store.clone(), Duration::from_secs(5), Duration::ZERO);

        buffer.record(obs(LinkId::Wifi, t(0), true));
        assert_eq!(cycle.tick(t(0) + TimeDelta::milliseconds(400)), FlushReport::default());

        // the window is still open, so this joins the same bucket
        assert_eq!(
            buffer.record(obs(LinkId::Wifi, t(0) + TimeDelta::milliseconds(700), false)),
            crate::buffer::Admission::Buffered
        );
        assert_eq!(buffer.pending(LinkId::Wifi), 2);

        let report = cycle.tick(t(1) + TimeDelta::milliseconds(1));
        assert_eq!(report.flushed, 1);
        assert_eq!(report.observations, 2);
        assert_eq!(store.records.lock()[&(LinkId::Wifi, t(0))].uptime, 50.0);
    }
}
