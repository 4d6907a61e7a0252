use crate::{bucket::Bucketing, link::LinkId, observation::Observation};
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

/// Outcome of offering an observation to the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Buffered,
    /// The target bucket was already sealed for flushing or has been flushed.
    Late,
}

/// A closed bucket's contents, copied out under the buffer lock.
#[derive(Debug, Clone)]
pub struct SealedBucket {
    pub link: LinkId,
    pub start: DateTime<Utc>,
    pub observations: Vec<Observation>,
}

#[derive(Debug, Default)]
struct Bucket {
    observations: Vec<Observation>,
    sealed: bool,
}

#[derive(Debug, Default)]
struct LinkBuffer {
    buckets: BTreeMap<DateTime<Utc>, Bucket>,
    // newest bucket start known to be persisted
    watermark: Option<DateTime<Utc>>,
}

impl LinkBuffer {
    fn advance_watermark(&mut self, start: DateTime<Utc>) {
        if self.watermark.is_none_or(|w| start > w) {
            self.watermark = Some(start);
        }
    }
}

/// Open buckets per link, behind one mutex shared by ingest and flush.
#[derive(Debug)]
pub struct ObservationBuffer {
    bucketing: Bucketing,
    links: Mutex<HashMap<LinkId, LinkBuffer>>,
}

impl ObservationBuffer {
    pub fn new(bucketing: Bucketing) -> Self {
        Self {
            bucketing,
            links: Mutex::new(HashMap::new()),
        }
    }

    pub fn bucketing(&self) -> Bucketing {
        self.bucketing
    }

    pub fn record(&self, obs: Observation) -> Admission {
        let start = self.bucketing.bucket_of(obs.observed_at);
        let mut links = self.links.lock();
        let buffer = links.entry(obs.link).or_default();

        match buffer.buckets.get_mut(&start) {
            Some(bucket) if bucket.sealed => Admission::Late,
            Some(bucket) => {
                bucket.observations.push(obs);
                Admission::Buffered
            }
            None if buffer.watermark.is_some_and(|w| start <= w) => Admission::Late,
            None => {
                buffer.buckets.insert(
                    start,
                    Bucket {
                        observations: vec![obs],
                        sealed: false,
                    },
                );
                Admission::Buffered
            }
        }
    }

    /// Seal every bucket of `link` whose window closed before `now` and return
    /// copies of their contents, oldest first. Sealed buckets stay buffered
    /// until evicted, so a failed persist can be retried with the same data.
    pub fn seal_closed(
        &self,
        link: LinkId,
        now: DateTime<Utc>,
        eligibility: TimeDelta,
    ) -> Vec<SealedBucket> {
        let mut links = self.links.lock();
        let Some(buffer) = links.get_mut(&link) else {
            return Vec::new();
        };

        buffer
            .buckets
            .iter_mut()
            .take_while(|(start, _)| self.bucketing.is_closed(**start, now, eligibility))
            .map(|(start, bucket)| {
                bucket.sealed = true;
                SealedBucket {
                    link,
                    start: *start,
                    observations: bucket.observations.clone(),
                }
            })
            .collect()
    }

    /// Drop a persisted bucket and move the link's watermark past it.
    /// Returns the number of observations discarded.
    pub fn evict(&self, link: LinkId, start: DateTime<Utc>) -> usize {
        let mut links = self.links.lock();
        let buffer = links.entry(link).or_default();
        buffer.advance_watermark(start);
        buffer
            .buckets
            .remove(&start)
            .map_or(0, |bucket| bucket.observations.len())
    }

    /// Treat everything up to `start` as already persisted.
    pub fn seed_watermark(&self, link: LinkId, start: DateTime<Utc>) {
        self.links.lock().entry(link).or_default().advance_watermark(start);
    }

    pub fn watermark(&self, link: LinkId) -> Option<DateTime<Utc>> {
        self.links.lock().get(&link).and_then(|b| b.watermark)
    }

    /// Buffered observation count for `link`.
    pub fn pending(&self, link: LinkId) -> usize {
        self.links.lock().get(&link).map_or(0, |b| {
            b.buckets.values().map(|bucket| bucket.observations.len()).sum()
        })
    }

    pub fn bucket_count(&self) -> usize {
        self.links.lock().values().map(|b| b.buckets.len()).sum()
    }
}

impl Default for ObservationBuffer {
    fn default() -> Self {
        Self::new(Bucketing::default())
    }
}
