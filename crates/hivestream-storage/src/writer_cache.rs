//! Multi-Writer Cache
//!
//! Path-keyed cache of open blob writers. Streaming sinks write records
//! to many paths concurrently (one per partition and bucket); opening a
//! blob writer per record would be absurd, and keeping every writer
//! open forever leaks handles. The cache holds one writer per logical
//! path, reaps writers idle past a TTL, optionally rolls them after a
//! byte cap, and gzip-wraps paths ending in `.gz`.
//!
//! ## Path templating
//!
//! A logical path may contain the token `{suffix}`. On every physical
//! open the token is replaced by `<writers_created>_<unix_seconds>`:
//! a monotonic counter makes every open land on a distinct physical
//! blob, so an idle-reaped path that gets written again starts a fresh
//! blob instead of clobbering the finished one.
//!
//! ## The reap race
//!
//! A writer can self-close between the cache handing out its handle and
//! the caller's write landing. The cache absorbs exactly that case:
//! a write failing with `AlreadyClosed` is retried once against a
//! freshly opened writer. Callers never observe the churn.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_compression::tokio::write::GzipEncoder;
use hivestream_core::MultiError;

use crate::error::{Error, Result};
use crate::hooked_writer::{BoxWriter, HookedWriter, SelfDestructOptions, SelfDestructWriter};
use crate::writer_factory::WriterFactory;

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

struct Entry {
    /// The open counter value this writer was created under; eviction
    /// hooks compare it so a replacement writer is never evicted by its
    /// predecessor's close.
    generation: u64,
    writer: SelfDestructWriter,
}

struct CacheInner {
    factory: Arc<dyn WriterFactory>,
    ttl: Duration,
    max_bytes_per_writer: Option<usize>,
    entries: Mutex<HashMap<String, Entry>>,
    writers_created: AtomicU64,
}

/// Bounded cache of self-destructing writers, keyed by logical path.
pub struct WriterCache {
    inner: Arc<CacheInner>,
}

impl WriterCache {
    pub fn new(
        factory: Arc<dyn WriterFactory>,
        ttl: Duration,
        max_bytes_per_writer: Option<usize>,
    ) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                factory,
                ttl,
                max_bytes_per_writer,
                entries: Mutex::new(HashMap::new()),
                writers_created: AtomicU64::new(0),
            }),
        }
    }

    /// Write `bytes` to the writer for `path`, opening one if needed.
    ///
    /// Retries exactly once when the writer turns out to have
    /// self-closed between lookup and write.
    pub async fn write(&self, path: &str, bytes: &[u8]) -> Result<usize> {
        let writer = self.get_writer(path).await?;
        match writer.write(bytes).await {
            Err(Error::AlreadyClosed) => {
                tracing::debug!(path, "cached writer closed under us, retrying once");
                // The closer's eviction hook normally removed the entry
                // already; drop it ourselves if it is still ours.
                {
                    let mut entries = self.inner.entries.lock().unwrap();
                    if entries
                        .get(path)
                        .map(|e| e.writer.id() == writer.id())
                        .unwrap_or(false)
                    {
                        entries.remove(path);
                    }
                }
                let writer = self.get_writer(path).await?;
                writer.write(bytes).await
            }
            other => other,
        }
    }

    /// Number of currently open writers.
    pub fn open_writers(&self) -> usize {
        self.inner.entries.lock().unwrap().len()
    }

    pub(crate) async fn get_writer(&self, path: &str) -> Result<SelfDestructWriter> {
        if let Some(entry) = self.inner.entries.lock().unwrap().get(path) {
            return Ok(entry.writer.clone());
        }

        // Miss: open outside the lock (the factory does store I/O).
        let generation = self.inner.writers_created.fetch_add(1, Ordering::SeqCst);
        let suffix = format!("{}_{}", generation, unix_now());
        let physical = path.replace("{suffix}", &suffix);

        tracing::debug!(path, physical = %physical, "opening new cached writer");
        let raw = self.inner.factory.open(&physical).await?;
        let sink: BoxWriter = if physical.ends_with(".gz") {
            Box::new(GzipEncoder::new(raw))
        } else {
            raw
        };

        let mut hooked = HookedWriter::new(sink);
        let weak: Weak<CacheInner> = Arc::downgrade(&self.inner);
        let key = path.to_string();
        hooked.add_pre_close_hook(Box::new(move || {
            if let Some(cache) = weak.upgrade() {
                let mut entries = cache.entries.lock().unwrap();
                if entries
                    .get(&key)
                    .map(|e| e.generation == generation)
                    .unwrap_or(false)
                {
                    entries.remove(&key);
                }
            }
        }));

        let writer = SelfDestructWriter::new(
            hooked,
            SelfDestructOptions {
                max_idle: Some(self.inner.ttl),
                max_bytes: self.inner.max_bytes_per_writer,
            },
        );

        let mut entries = self.inner.entries.lock().unwrap();
        if let Some(existing) = entries.get(path) {
            // Lost a creation race; keep theirs, close ours off-path.
            let ours = writer;
            tokio::spawn(async move {
                let _ = ours.close().await;
            });
            return Ok(existing.writer.clone());
        }
        entries.insert(
            path.to_string(),
            Entry {
                generation,
                writer: writer.clone(),
            },
        );
        Ok(writer)
    }

    /// Close and evict the writer for one logical path. A writer that
    /// already self-closed counts as success.
    pub async fn close_path(&self, path: &str) -> Result<()> {
        let removed = self.inner.entries.lock().unwrap().remove(path);
        match removed {
            None => Ok(()),
            Some(entry) => match entry.writer.close().await {
                Ok(()) | Err(Error::AlreadyClosed) => Ok(()),
                Err(e) => Err(e),
            },
        }
    }

    /// Close every open writer. `AlreadyClosed` children are tolerated;
    /// other failures are aggregated in order.
    pub async fn close(&self) -> Result<()> {
        let writers: Vec<(String, SelfDestructWriter)> = {
            let mut entries = self.inner.entries.lock().unwrap();
            entries
                .drain()
                .map(|(path, entry)| (path, entry.writer))
                .collect()
        };

        let mut failures = MultiError::new();
        for (path, writer) in writers {
            match writer.close().await {
                Ok(()) | Err(Error::AlreadyClosed) => {}
                Err(e) => {
                    tracing::error!(path = %path, error = %e, "failed to close cached writer");
                    failures.push(e);
                }
            }
        }
        failures.into_result().map_err(Error::from)
    }
}
