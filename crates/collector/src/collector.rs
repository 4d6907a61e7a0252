use crate::{
    aggregate::{Summary, rollup},
    bucket::Bucketing,
    buffer::{Admission, ObservationBuffer},
    error::{Error, Result},
    flush::{FlushCycle, FlushReport},
    link::LinkId,
    observation::{Observation, RawObservation},
    reader::{GraphPoint, RangeReader},
    settings::Settings,
    store::{Record, Store, SummaryStore},
};
use chrono::{DateTime, Utc};
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Timing knobs for a [`Collector`].
#[derive(Debug, Clone, Copy)]
pub struct CollectorOptions {
    pub bucket_width: Duration,
    pub flush_interval: Duration,
    pub flush_eligibility: Duration,
}

impl Default for CollectorOptions {
    fn default() -> Self {
        Self {
            bucket_width: Duration::from_secs(1),
            flush_interval: Duration::from_secs(5),
            flush_eligibility: Duration::from_secs(5),
        }
    }
}

impl From<&Settings> for CollectorOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            bucket_width: settings.buffer.bucket_width(),
            flush_interval: settings.flush.interval(),
            flush_eligibility: settings.flush.eligibility(),
        }
    }
}

/// Ingest buffer, flush cycle and range reader wired to one store.
pub struct Collector<S: SummaryStore + ?Sized = Store> {
    buffer: Arc<ObservationBuffer>,
    store: Arc<S>,
    reader: RangeReader<S>,
    options: CollectorOptions,
}

impl Collector<Store> {
    /// Open the configured store and build a collector on top of it.
    pub fn open(settings: &Settings) -> Result<Self> {
        let store = Store::open(&settings.store.path, settings.store.transaction_timeout())?;
        Self::with_store(Arc::new(store), settings.into())
    }

    /// Close the underlying store. Observations still buffered are lost.
    pub fn close(&self) -> Result<()> {
        let pending: usize = LinkId::ALL.iter().map(|link| self.buffer.pending(*link)).sum();
        if pending > 0 {
            warn!(observations = pending, "closing with unflushed observations");
        }
        self.store.close()
    }
}

impl<S: SummaryStore + ?Sized> Collector<S> {
    /// Build a collector over an already opened store. Each link's newest
    /// persisted bucket becomes its watermark, so buckets flushed before a
    /// restart are never written again.
    pub fn with_store(store: Arc<S>, options: CollectorOptions) -> Result<Self> {
        if options.flush_eligibility < options.bucket_width {
            return Err(Error::InvalidInput(format!(
                "flush eligibility {:?} is shorter than the bucket width {:?}",
                options.flush_eligibility, options.bucket_width
            )));
        }

        let buffer = Arc::new(ObservationBuffer::new(Bucketing::new(options.bucket_width)));

        for link in LinkId::ALL {
            if let Some(last) = store.last_bucket(link)? {
                info!(%link, watermark = %last, "resuming after persisted buckets");
                buffer.seed_watermark(link, last);
            }
        }

        Ok(Self {
            buffer,
            reader: RangeReader::new(store.clone()),
            store,
            options,
        })
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn buffer(&self) -> &Arc<ObservationBuffer> {
        &self.buffer
    }

    /// Buffer one observation. Errors only when the observation itself is
    /// unusable; a late observation is reported, not rejected.
    pub fn ingest(
        &self,
        link: LinkId,
        up: bool,
        latency: Duration,
        observed_at: DateTime<Utc>,
    ) -> Result<Admission> {
        let obs = Observation::new(link, up, latency, observed_at)?;
        Ok(self.admit(obs))
    }

    /// Parse and buffer an observation in the agent's string form.
    pub fn ingest_raw(&self, raw: &RawObservation) -> Result<Admission> {
        let obs = Observation::try_from(raw)?;
        Ok(self.admit(obs))
    }

    fn admit(&self, obs: Observation) -> Admission {
        let link = obs.link;
        let observed_at = obs.observed_at;

        let admission = self.buffer.record(obs);
        match admission {
            Admission::Buffered => {
                metrics::counter!("checker_observations_ingested", "link" => link.as_str())
                    .increment(1);
            }
            Admission::Late => {
                metrics::counter!("checker_observations_late", "link" => link.as_str())
                    .increment(1);
                warn!(%link, %observed_at, "dropping observation for an already flushed bucket");
            }
        }
        admission
    }

    pub fn flush_cycle(&self) -> FlushCycle<S> {
        FlushCycle::new(
            self.buffer.clone(),
            self.store.clone(),
            self.options.flush_interval,
            self.options.flush_eligibility,
        )
    }

    /// Run a single flush pass as of `now`.
    pub fn flush_at(&self, now: DateTime<Utc>) -> FlushReport {
        self.flush_cycle().tick(now)
    }

    /// Run the flush cycle in the background until `shutdown` is cancelled.
    pub fn spawn_flush(&self, shutdown: CancellationToken) -> JoinHandle<FlushReport>
    where
        S: 'static,
    {
        let cycle = self.flush_cycle();
        tokio::spawn(async move { cycle.run(shutdown).await })
    }

    /// Persisted summaries of `link` over the trailing `lookback`, oldest first.
    pub fn query(&self, link: LinkId, lookback: Duration) -> Result<Vec<Record>> {
        self.reader.read(link, lookback)
    }

    pub fn query_at(
        &self,
        link: LinkId,
        lookback: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<Record>> {
        self.reader.read_at(link, lookback, now)
    }

    /// Mean of the per-bucket summaries in the window; `None` when nothing
    /// was persisted in it.
    pub fn status(&self, link: LinkId, lookback: Duration) -> Result<Option<Summary>> {
        Ok(rollup(&self.reader.summaries(link, lookback)?))
    }

    pub fn points(&self, link: LinkId, lookback: Duration) -> Result<Vec<GraphPoint>> {
        self.reader.points(link, lookback)
    }
}
