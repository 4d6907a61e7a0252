#![allow(dead_code)]

use checker_collector::{
    Collector, CollectorOptions, Error, LinkId, Result, Summary,
    settings::Settings,
    store::{ScanIter, Store, SummaryStore},
};
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use std::{
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

/// Create test settings with the store under `dir`
pub fn create_test_settings(dir: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.log_level = "debug".to_string();
    settings.store.path = dir.join("summaries").to_string_lossy().into_owned();
    settings.store.transaction_timeout_ms = 250;
    settings
}

/// A fixed reference instant plus an offset.
pub fn at(secs: i64, millis: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
        + TimeDelta::seconds(secs)
        + TimeDelta::milliseconds(millis)
}

pub fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

pub fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}

/// Store wrapper whose next `n` writes fail as if the disk were unavailable.
pub struct FlakyStore {
    inner: Store,
    failures_left: AtomicUsize,
    attempts: AtomicUsize,
}

impl FlakyStore {
    pub fn open(dir: &Path) -> Self {
        Self {
            inner: Store::open(dir.join("summaries"), Duration::from_millis(250)).unwrap(),
            failures_left: AtomicUsize::new(0),
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl SummaryStore for FlakyStore {
    fn put(&self, link: LinkId, bucket_start: DateTime<Utc>, summary: &Summary) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::LockTimeout(Duration::from_millis(250)));
        }
        self.inner.put(link, bucket_start, summary)
    }

    fn scan(
        &self,
        link: LinkId,
        from: DateTime<Utc>,
        to: Option<DateTime<Utc>>,
    ) -> Result<ScanIter<'_>> {
        self.inner.scan(link, from, to)
    }

    fn last_bucket(&self, link: LinkId) -> Result<Option<DateTime<Utc>>> {
        self.inner.last_bucket(link)
    }
}

pub fn flaky_collector(dir: &Path) -> (Arc<FlakyStore>, Collector<FlakyStore>) {
    let store = Arc::new(FlakyStore::open(dir));
    let collector = Collector::with_store(store.clone(), CollectorOptions::default()).unwrap();
    (store, collector)
}
