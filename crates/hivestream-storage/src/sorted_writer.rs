//! Sorted Record Writer: Clustered Spill Buffers
//!
//! The heart of the sink. Records arrive only *mostly* sorted, but each
//! output blob must be sorted on disk. Instead of one big sort, records
//! are routed into **buckets**: bounded in-memory ordered buffers that,
//! once full, spill their minimum to the write callback on every
//! further admit. The rule that keeps each bucket's spill stream
//! non-decreasing:
//!
//! A record `r` may enter a bucket iff
//! 1. the bucket is empty, or
//! 2. the bucket's current minimum is `< r` (so `r` can never be
//!    spilled before something already spilled), or
//! 3. the bucket still holds fewer than `capacity − 2` records; the
//!    free-build phase: nothing has been spilled yet, so out-of-order
//!    admits are harmless and keep the bucket count low.
//!
//! Otherwise a new bucket is opened. Every record ever spilled from a
//! bucket is ≤ every record still in it or admitted later.
//!
//! Buckets also drain on idle (no admit for `cache_max_idle`) and on
//! `flush`/`close`. A drain emits the bucket's remaining records in
//! sorted order through the same callback and removes the bucket.
//!
//! Equal records are all retained: a bucket is a heap, not a set, so
//! writing the same record twice spills it twice.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use hivestream_core::{ByLess, Lesser};

use crate::config::SortedWriterConfig;
use crate::error::{Error, Result};
use crate::timeout::IdleTimeout;

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

/// Receives `(bucket_id, record)` for every spilled record.
pub type SpillCallback<R> =
    Arc<dyn Fn(String, R) -> BoxFuture<'static, Result<()>> + Send + Sync>;

struct Bucket<R> {
    heap: BinaryHeap<Reverse<ByLess<R>>>,
    idle: IdleTimeout,
}

struct State<R> {
    buckets: HashMap<String, Bucket<R>>,
    buckets_created: u64,
}

struct Inner<R> {
    callback: SpillCallback<R>,
    config: SortedWriterConfig,
    cancel: CancellationToken,
    state: Mutex<State<R>>,
}

impl<R> Inner<R>
where
    R: Lesser + Send + 'static,
{
    /// Drain one bucket through the callback, in order, and remove it.
    /// Idempotent: a bucket drained by the idle timer and again by
    /// `flush` is only drained once.
    async fn close_bucket(inner: &Arc<Self>, bucket_id: &str) -> Result<()> {
        let mut state = inner.state.lock().await;
        let Some(mut bucket) = state.buckets.remove(bucket_id) else {
            return Ok(());
        };
        tracing::debug!(bucket = %bucket_id, records = bucket.heap.len(), "draining sort bucket");
        while let Some(Reverse(ByLess(record))) = bucket.heap.pop() {
            (inner.callback)(bucket_id.to_string(), record).await?;
        }
        Ok(())
    }
}

/// Clonable handle to a clustered sorted writer.
pub struct SortedRecordWriter<R> {
    inner: Arc<Inner<R>>,
}

impl<R> Clone for SortedRecordWriter<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R> SortedRecordWriter<R>
where
    R: Lesser + Send + 'static,
{
    pub fn new(
        cancel: CancellationToken,
        config: SortedWriterConfig,
        callback: SpillCallback<R>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                callback,
                config,
                cancel: cancel.child_token(),
                state: Mutex::new(State {
                    buckets: HashMap::new(),
                    buckets_created: 0,
                }),
            }),
        }
    }

    /// Admit one record, spilling a bucket minimum if the admit
    /// overflows its bucket. Fails with [`Error::WriterClosed`] after
    /// `close` (or an ancestor cancellation).
    pub async fn write_record(&self, record: R) -> Result<()> {
        if self.inner.cancel.is_cancelled() {
            return Err(Error::WriterClosed);
        }
        let mut state = self.inner.state.lock().await;
        let bucket_id = self.admit(&mut state, record);

        let overflow = {
            let bucket = state.buckets.get_mut(&bucket_id).unwrap();
            if bucket.heap.len() > self.inner.config.cache_size_per_cluster {
                bucket.heap.pop()
            } else {
                None
            }
        };
        if let Some(Reverse(ByLess(min))) = overflow {
            (self.inner.callback)(bucket_id.clone(), min).await?;
            if let Some(bucket) = state.buckets.get(&bucket_id) {
                bucket.idle.ping();
            }
        }
        Ok(())
    }

    /// First bucket the record fits per the admission rule, else a new
    /// bucket. Returns the bucket id the record landed in.
    fn admit(&self, state: &mut State<R>, record: R) -> String {
        let cap = self.inner.config.cache_size_per_cluster;

        for (id, bucket) in state.buckets.iter_mut() {
            let admit = match bucket.heap.peek() {
                None => true,
                Some(Reverse(ByLess(min))) => {
                    min.less(&record) || bucket.heap.len() < cap.saturating_sub(2)
                }
            };
            if admit {
                bucket.heap.push(Reverse(ByLess(record)));
                bucket.idle.ping();
                return id.clone();
            }
        }

        state.buckets_created += 1;
        let id = format!("i{:06}_t{}", state.buckets_created, unix_now());
        tracing::debug!(bucket = %id, "opening sort bucket");

        let weak: Weak<Inner<R>> = Arc::downgrade(&self.inner);
        let drain_id = id.clone();
        let idle = IdleTimeout::arm(
            self.inner.cancel.child_token(),
            self.inner.config.cache_max_idle,
            true,
            vec![Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    tokio::spawn(async move {
                        if let Err(e) = Inner::close_bucket(&inner, &drain_id).await {
                            tracing::warn!(bucket = %drain_id, error = %e, "idle bucket drain failed");
                        }
                    });
                }
            })],
        );

        let mut bucket = Bucket {
            heap: BinaryHeap::new(),
            idle,
        };
        bucket.heap.push(Reverse(ByLess(record)));
        state.buckets.insert(id.clone(), bucket);
        id
    }

    /// Drain every bucket through the callback. Writing after a flush
    /// is fine; new buckets simply form.
    pub async fn flush(&self) -> Result<()> {
        let keys: Vec<String> = {
            let state = self.inner.state.lock().await;
            state.buckets.keys().cloned().collect()
        };
        for key in keys {
            Inner::close_bucket(&self.inner, &key).await?;
        }
        Ok(())
    }

    /// Stop accepting records, then flush what is buffered.
    pub async fn close(&self) -> Result<()> {
        self.inner.cancel.cancel();
        self.flush().await
    }

    /// Number of open buckets (diagnostics).
    pub async fn bucket_count(&self) -> usize {
        self.inner.state.lock().await.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    struct Row(i64);

    impl Lesser for Row {
        fn less(&self, other: &Self) -> bool {
            self.0 < other.0
        }
    }

    type Spills = Arc<StdMutex<Vec<(String, i64)>>>;

    fn collecting_callback(spills: &Spills) -> SpillCallback<Row> {
        let spills = Arc::clone(spills);
        Arc::new(move |bucket_id, record: Row| {
            let spills = Arc::clone(&spills);
            Box::pin(async move {
                spills.lock().unwrap().push((bucket_id, record.0));
                Ok(())
            })
        })
    }

    fn writer(cap: usize, spills: &Spills) -> SortedRecordWriter<Row> {
        SortedRecordWriter::new(
            CancellationToken::new(),
            SortedWriterConfig {
                cache_size_per_cluster: cap,
                cache_max_idle: Duration::from_secs(600),
            },
            collecting_callback(spills),
        )
    }

    fn per_bucket(spills: &Spills) -> HashMap<String, Vec<i64>> {
        let mut by_bucket: HashMap<String, Vec<i64>> = HashMap::new();
        for (bucket, v) in spills.lock().unwrap().iter() {
            by_bucket.entry(bucket.clone()).or_default().push(*v);
        }
        by_bucket
    }

    #[tokio::test]
    async fn test_no_write_after_close() {
        let spills: Spills = Default::default();
        let w = writer(1000, &spills);
        w.close().await.unwrap();
        assert!(matches!(w.write_record(Row(1)).await, Err(Error::WriterClosed)));
    }

    #[tokio::test]
    async fn test_records_cached_until_close() {
        let spills: Spills = Default::default();
        let w = writer(1000, &spills);
        for v in [1, 4, 2, 20, 6, 7, 9, 3, 12, 11] {
            w.write_record(Row(v)).await.unwrap();
        }
        assert!(spills.lock().unwrap().is_empty(), "nothing should spill below the cap");
        w.close().await.unwrap();
        assert_eq!(spills.lock().unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_tiny_cap_clusters_and_keeps_each_bucket_sorted() {
        let spills: Spills = Default::default();
        let w = writer(1, &spills);
        for v in [1, 4, 2, 20, 6, 7, 9, 3, 12, 11] {
            w.write_record(Row(v)).await.unwrap();
        }
        w.close().await.unwrap();

        let by_bucket = per_bucket(&spills);
        assert_eq!(by_bucket.len(), 3, "sequence is known to need 3 buckets");
        let total: usize = by_bucket.values().map(Vec::len).sum();
        assert_eq!(total, 10);
        for (bucket, values) in by_bucket {
            for pair in values.windows(2) {
                assert!(
                    pair[0] < pair[1],
                    "bucket {} spilled out of order: {:?}",
                    bucket,
                    pair
                );
            }
        }
    }

    #[tokio::test]
    async fn test_spill_stream_is_never_decreasing_per_bucket() {
        let spills: Spills = Default::default();
        let w = writer(4, &spills);
        // Pseudo-random but deterministic input.
        let mut v: i64 = 7;
        for _ in 0..200 {
            v = (v * 31 + 17) % 1000;
            w.write_record(Row(v)).await.unwrap();
        }
        w.close().await.unwrap();

        let by_bucket = per_bucket(&spills);
        let total: usize = by_bucket.values().map(Vec::len).sum();
        assert_eq!(total, 200);
        for values in by_bucket.values() {
            for pair in values.windows(2) {
                assert!(pair[0] <= pair[1]);
            }
        }
    }

    #[tokio::test]
    async fn test_duplicates_are_retained() {
        let spills: Spills = Default::default();
        let w = writer(2, &spills);
        for v in [5, 5, 5, 5] {
            w.write_record(Row(v)).await.unwrap();
        }
        w.close().await.unwrap();
        assert_eq!(spills.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_idle_bucket_drains_itself() {
        let spills: Spills = Default::default();
        let w = SortedRecordWriter::new(
            CancellationToken::new(),
            SortedWriterConfig {
                cache_size_per_cluster: 1000,
                cache_max_idle: Duration::from_millis(30),
            },
            collecting_callback(&spills),
        );
        w.write_record(Row(3)).await.unwrap();
        w.write_record(Row(1)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        let drained: Vec<i64> = spills.lock().unwrap().iter().map(|(_, v)| *v).collect();
        assert_eq!(drained, vec![1, 3]);
        assert_eq!(w.bucket_count().await, 0);
    }

    #[tokio::test]
    async fn test_flush_then_write_again() {
        let spills: Spills = Default::default();
        let w = writer(1000, &spills);
        w.write_record(Row(2)).await.unwrap();
        w.flush().await.unwrap();
        assert_eq!(spills.lock().unwrap().len(), 1);

        w.write_record(Row(1)).await.unwrap();
        w.close().await.unwrap();
        assert_eq!(spills.lock().unwrap().len(), 2);
    }
}
