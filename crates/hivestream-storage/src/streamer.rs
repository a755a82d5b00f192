//! Partitioned Record Streamer
//!
//! The public face of the sink. Callers push records; the streamer
//! routes each one by its partition key into a per-partition sorted
//! writer, whose spills land, gzip-framed and NLJSON-encoded, in the
//! writer cache under Hadoop-style partition paths:
//!
//! ```text
//! write_record(r)
//!     ↓ partitions() → "k1=v1/k2=v2/"
//! SortedRecordWriter for that partition
//!     ↓ spill (bucket_id, record)
//! WriterCache path "k1=v1/k2=v2/data_<host>_b<bucket>_{suffix}.json.gz"
//!     ↓ gzip → blob
//! ```
//!
//! Records that carry no ordering go through [`RecordStreamer::write_unordered`]
//! straight to the cache (bucket id `0`), skipping the sort machinery.
//!
//! The streamer opens at most `max_partitions` partitions; an admit that
//! would cross the cap fails with `TooManyPartitions` rather than
//! evicting (eviction strategies remain a policy hook).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use hivestream_core::{encode_line, Lesser, MultiError, PartitionGetter};

use crate::config::StreamerConfig;
use crate::error::{Error, Result};
use crate::sorted_writer::{SortedRecordWriter, SpillCallback};
use crate::writer_cache::WriterCache;
use crate::writer_factory::WriterFactory;

/// Streams partitioned records into sorted, gzip-framed NLJSON blobs.
pub struct RecordStreamer<R> {
    cache: Arc<WriterCache>,
    sorters: Mutex<HashMap<String, SortedRecordWriter<R>>>,
    host: String,
    config: StreamerConfig,
    cancel: CancellationToken,
}

impl<R> RecordStreamer<R>
where
    R: Serialize + PartitionGetter + Send + 'static,
{
    /// Build a streamer on top of a writer factory. The host tag is
    /// resolved once, here.
    pub fn new(factory: Arc<dyn WriterFactory>, config: StreamerConfig) -> Self {
        let host = config.host.clone().unwrap_or_else(|| {
            hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "unknown-host".to_string())
        });

        let cache = Arc::new(WriterCache::new(
            factory,
            config.writer_ttl,
            config.max_bytes_per_writer,
        ));

        Self {
            cache,
            sorters: Mutex::new(HashMap::new()),
            host,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Route one ordered record into its partition's sorted writer.
    pub async fn write_record(&self, record: R) -> Result<()>
    where
        R: Lesser,
    {
        if self.cancel.is_cancelled() {
            return Err(Error::WriterClosed);
        }
        let prefix = record.partitions().partition_prefix();
        let sorter = self.sorter_for(&prefix)?;
        sorter.write_record(record).await
    }

    /// Write a record with no ordering guarantee: straight to the
    /// partition's bucket-`0` blob, no clustering.
    pub async fn write_unordered(&self, record: R) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::WriterClosed);
        }
        let prefix = record.partitions().partition_prefix();
        let line = encode_line(&record)?;
        let path = format!("{}data_{}_b0_{{suffix}}.json.gz", prefix, self.host);
        self.cache.write(&path, &line).await?;
        Ok(())
    }

    fn sorter_for(&self, prefix: &str) -> Result<SortedRecordWriter<R>>
    where
        R: Lesser,
    {
        let mut sorters = self.sorters.lock().unwrap();
        if let Some(sorter) = sorters.get(prefix) {
            return Ok(sorter.clone());
        }

        if sorters.len() >= self.config.max_partitions {
            tracing::warn!(
                partition = %prefix,
                limit = self.config.max_partitions,
                "refusing new partition"
            );
            return Err(Error::TooManyPartitions {
                limit: self.config.max_partitions,
            });
        }

        tracing::debug!(partition = %prefix, "opening partition");
        let cache = Arc::clone(&self.cache);
        let host = self.host.clone();
        let part = prefix.to_string();
        let callback: SpillCallback<R> = Arc::new(move |bucket_id: String, record: R| {
            let cache = Arc::clone(&cache);
            let path = format!("{}data_{}_b{}_{{suffix}}.json.gz", part, host, bucket_id);
            Box::pin(async move {
                let line = encode_line(&record)?;
                cache.write(&path, &line).await?;
                Ok(())
            })
        });

        let sorter = SortedRecordWriter::new(
            self.cancel.clone(),
            self.config.sorted_writer.clone(),
            callback,
        );
        sorters.insert(prefix.to_string(), sorter.clone());
        Ok(sorter)
    }

    /// Number of open partitions (diagnostics).
    pub fn partition_count(&self) -> usize {
        self.sorters.lock().unwrap().len()
    }

    /// Flush every partition's sorted writer, then close the writer
    /// cache. Child failures are aggregated in order.
    pub async fn close(&self) -> Result<()>
    where
        R: Lesser,
    {
        self.cancel.cancel();
        let sorters: Vec<(String, SortedRecordWriter<R>)> =
            { self.sorters.lock().unwrap().drain().collect() };

        let mut failures = MultiError::new();
        for (partition, sorter) in sorters {
            if let Err(e) = sorter.flush().await {
                tracing::error!(partition = %partition, error = %e, "failed to flush partition");
                failures.push(e);
            }
        }
        if let Err(e) = self.cache.close().await {
            failures.push(e);
        }
        failures.into_result().map_err(Error::from)
    }
}
