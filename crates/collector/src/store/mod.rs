pub mod key;

use crate::{
    aggregate::Summary,
    error::{Error, Result},
    link::LinkId,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DB, DBIteratorWithThreadMode, Direction, IteratorMode,
    Options, WriteOptions,
};
use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};
use tracing::{debug, info};

/// Namespace suffix for bucket summaries; one column family per link.
pub const SUMMARY_KIND: &str = "summary";

/// bincode writes six f64 fields with fixed-width encoding.
const SUMMARY_LEN: usize = 6 * 8;

pub type Record = (DateTime<Utc>, Summary);
pub type ScanIter<'a> = Box<dyn Iterator<Item = Result<Record>> + 'a>;

/// Durable per-link summaries keyed by bucket start.
pub trait SummaryStore: Send + Sync {
    fn put(&self, link: LinkId, bucket_start: DateTime<Utc>, summary: &Summary) -> Result<()>;

    /// Lazily yield records with `from <= start <= to` in ascending order.
    /// `to = None` scans to the end of the link's namespace.
    fn scan(
        &self,
        link: LinkId,
        from: DateTime<Utc>,
        to: Option<DateTime<Utc>>,
    ) -> Result<ScanIter<'_>>;

    /// Start of the newest stored bucket, if any.
    fn last_bucket(&self, link: LinkId) -> Result<Option<DateTime<Utc>>>;
}

pub fn namespace(link: LinkId) -> String {
    format!("{link}.{SUMMARY_KIND}")
}

pub fn encode_summary(summary: &Summary) -> Result<Vec<u8>> {
    Ok(bincode::serialize(summary)?)
}

pub fn decode_summary(link: LinkId, key: &[u8], value: &[u8]) -> Result<Record> {
    let corrupt = |reason: String| Error::Decode {
        link,
        key: String::from_utf8_lossy(key).into_owned(),
        reason,
    };

    let start = key::decode(key).ok_or_else(|| corrupt("malformed timestamp key".to_string()))?;
    if value.len() != SUMMARY_LEN {
        return Err(corrupt(format!(
            "expected {SUMMARY_LEN} bytes, found {}",
            value.len()
        )));
    }
    let summary = bincode::deserialize(value).map_err(|e| corrupt(e.to_string()))?;
    Ok((start, summary))
}

/// RocksDB-backed store. The directory's LOCK file keeps a second collector out.
pub struct Store {
    db: DB,
    path: PathBuf,
    writer: Mutex<()>,
    transaction_timeout: Duration,
    open: AtomicBool,
    read_only: bool,
}

impl Store {
    pub fn open<P: AsRef<Path>>(path: P, transaction_timeout: Duration) -> Result<Self> {
        let path = path.as_ref();
        let open_err = |source| Error::StoreOpen {
            path: path.display().to_string(),
            source,
        };

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        // every existing column family has to be named on open
        let mut names = DB::list_cf(&opts, path).unwrap_or_default();
        for link in LinkId::ALL {
            let name = namespace(link);
            if !names.contains(&name) {
                names.push(name);
            }
        }
        let descriptors = names
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()));

        let db = DB::open_cf_descriptors(&opts, path, descriptors).map_err(open_err)?;
        info!(path = %path.display(), namespaces = ?names, "opened summary store");

        Ok(Self {
            db,
            path: path.to_path_buf(),
            writer: Mutex::new(()),
            transaction_timeout,
            open: AtomicBool::new(true),
            read_only: false,
        })
    }

    /// Open an existing store for reading alongside the process that owns it.
    /// Sees the data as of the moment it was opened; writes fail.
    pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let open_err = |source| Error::StoreOpen {
            path: path.display().to_string(),
            source,
        };

        let opts = Options::default();
        let names = DB::list_cf(&opts, path).map_err(open_err)?;
        let db = DB::open_cf_for_read_only(&opts, path, &names, false).map_err(open_err)?;
        debug!(path = %path.display(), namespaces = ?names, "opened summary store read-only");

        Ok(Self {
            db,
            path: path.to_path_buf(),
            writer: Mutex::new(()),
            transaction_timeout: Duration::ZERO,
            open: AtomicBool::new(true),
            read_only: true,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Flush memtables and reject all further operations.
    ///
    /// The directory lock is released once the last handle is dropped.
    pub fn close(&self) -> Result<()> {
        let _guard = self
            .writer
            .try_lock_for(self.transaction_timeout)
            .ok_or(Error::LockTimeout(self.transaction_timeout))?;
        if !self.open.swap(false, Ordering::AcqRel) || self.read_only {
            return Ok(());
        }

        for link in LinkId::ALL {
            let cf = self.cf(link)?;
            self.db
                .flush_cf(cf)
                .map_err(|source| Error::StoreWrite { link, source })?;
        }
        info!(path = %self.path.display(), "closed summary store");
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(Error::StoreClosed)
        }
    }

    fn cf(&self, link: LinkId) -> Result<&ColumnFamily> {
        let name = namespace(link);
        self.db
            .cf_handle(&name)
            .ok_or(Error::UnknownNamespace(name))
    }
}

impl SummaryStore for Store {
    fn put(&self, link: LinkId, bucket_start: DateTime<Utc>, summary: &Summary) -> Result<()> {
        self.ensure_open()?;
        let _guard = self
            .writer
            .try_lock_for(self.transaction_timeout)
            .ok_or(Error::LockTimeout(self.transaction_timeout))?;
        // close() may have won the race for the writer lock
        self.ensure_open()?;

        let cf = self.cf(link)?;
        let key = key::encode(&bucket_start);
        let value = encode_summary(summary)?;

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(true);
        self.db
            .put_cf_opt(cf, key.as_bytes(), value, &write_opts)
            .map_err(|source| Error::StoreWrite { link, source })?;

        debug!(%link, %key, "stored bucket summary");
        Ok(())
    }

    fn scan(
        &self,
        link: LinkId,
        from: DateTime<Utc>,
        to: Option<DateTime<Utc>>,
    ) -> Result<ScanIter<'_>> {
        self.ensure_open()?;
        let cf = self.cf(link)?;

        let from_key = key::encode_bound(&from);
        let inner = self
            .db
            .iterator_cf(cf, IteratorMode::From(from_key.as_bytes(), Direction::Forward));

        Ok(Box::new(Scan {
            link,
            inner,
            to_key: to.map(|t| key::encode_bound(&t)),
            done: false,
        }))
    }

    fn last_bucket(&self, link: LinkId) -> Result<Option<DateTime<Utc>>> {
        self.ensure_open()?;
        let cf = self.cf(link)?;

        match self.db.iterator_cf(cf, IteratorMode::End).next() {
            None => Ok(None),
            Some(Err(source)) => Err(Error::StoreRead { link, source }),
            Some(Ok((key, value))) => decode_summary(link, &key, &value).map(|(start, _)| Some(start)),
        }
    }
}

/// Forward cursor over one link's namespace. Stops at the upper bound or at
/// the first read/decode error.
struct Scan<'a> {
    link: LinkId,
    inner: DBIteratorWithThreadMode<'a, DB>,
    to_key: Option<String>,
    done: bool,
}

impl Iterator for Scan<'_> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let item = match self.inner.next()? {
            Err(source) => Err(Error::StoreRead {
                link: self.link,
                source,
            }),
            Ok((key, value)) => {
                if let Some(to_key) = &self.to_key {
                    if key.as_ref() > to_key.as_bytes() {
                        self.done = true;
                        return None;
                    }
                }
                decode_summary(self.link, &key, &value)
            }
        };

        if item.is_err() {
            self.done = true;
        }
        Some(item)
    }
}
