//! Generation-Fenced Folder Compaction
//!
//! Folders written by the streamer hold many small sorted blobs. This
//! module merges each folder into a single sorted destination blob,
//! without locks, using the store's generation numbers as an optimistic
//! compare-and-swap:
//!
//! 1. Merge-read the folder's sorted blobs and spill them through the
//!    caller's buffers.
//! 2. Ensure the destination exists (`touch_file`) and note its
//!    generation.
//! 3. Read the destination's *existing* records pinned to that
//!    generation.
//! 4. K-way merge buffered + existing (optionally collapsing adjacent
//!    duplicates) and write the result back conditioned on the same
//!    generation.
//! 5. A precondition failure means a concurrent compactor won: back
//!    off, re-read at the new generation, try again; bounded by the
//!    configured backoff.
//!
//! Concurrent compactors therefore only collide at the final write,
//! and exactly one of them retries. Source blobs are deleted (when
//! requested) only after the destination write committed.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::{StreamExt, TryStreamExt};
use object_store::path::Path;
use object_store::{GetOptions, ObjectMeta, ObjectStore, PutMode, PutPayload, UpdateVersion};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio_util::io::StreamReader;

use hivestream_core::{
    write_nljson, Backoff, BoxRecordIterator, Dedup, Lesser, NlJsonReader, SortedMergeIterator,
    SortedSpill, SpillBuffer,
};

use crate::error::Result;
use crate::filter::{accept_all, is_virtual_folder, ObjectFilter};
use crate::folders::folder_of;
use crate::maintenance::touch_file;
use crate::reader::{gzip_reader, BoxReader, ObjectReaders};

/// Configuration for folder compaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionConfig {
    /// Destination blob name, relative to each folder (e.g.
    /// `sorted.json.gz`). A `.gz` suffix makes the output gzip-framed.
    pub destination: String,

    /// Collapse adjacent equal records while merging.
    #[serde(default)]
    pub remove_duplicates: bool,

    /// Delete the source blobs of a folder once its destination write
    /// committed. The destination itself is never deleted.
    #[serde(default)]
    pub remove_src_on_success: bool,

    /// Retry schedule for generation conflicts.
    #[serde(default)]
    pub backoff: Backoff,
}

impl CompactionConfig {
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            remove_duplicates: false,
            remove_src_on_success: false,
            backoff: Backoff::default(),
        }
    }
}

/// Aggregate result of a compaction run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompactionSummary {
    /// Folders that had sources and were rewritten.
    pub folders_compacted: usize,
    /// Records written across all destinations (existing + new).
    pub records_written: u64,
    /// Source blobs deleted after successful writes.
    pub sources_removed: usize,
    /// Generation conflicts that were retried.
    pub conflicts_retried: u32,
}

struct FolderOutcome {
    records: u64,
    removed: usize,
}

/// Compact every folder under `prefix` whose blobs pass `filter`.
///
/// `buffer_factory` supplies the spill buffers backing the per-folder
/// external sort; `Vec::new` is the in-memory choice.
pub async fn compact_folders<R, B, F>(
    store: Arc<dyn ObjectStore>,
    prefix: &str,
    filter: Option<ObjectFilter>,
    buffer_factory: F,
    config: &CompactionConfig,
) -> Result<CompactionSummary>
where
    R: Lesser + Serialize + DeserializeOwned + Clone + Send + 'static,
    B: SpillBuffer + 'static,
    F: Fn() -> B + Clone + Send,
{
    let filter = filter.unwrap_or_else(accept_all);
    let folders = discover_folders(&store, prefix, &filter).await?;
    tracing::info!(prefix, folders = folders.len(), "starting compaction");

    let mut summary = CompactionSummary::default();
    for folder in folders {
        let mut attempt = 0u32;
        loop {
            match compact_one_folder::<R, B, F>(
                &store,
                &folder,
                &filter,
                buffer_factory.clone(),
                config,
            )
            .await
            {
                Ok(None) => break,
                Ok(Some(outcome)) => {
                    summary.folders_compacted += 1;
                    summary.records_written += outcome.records;
                    summary.sources_removed += outcome.removed;
                    break;
                }
                Err(e) if e.is_generation_conflict() => {
                    tracing::warn!(
                        folder = %folder,
                        attempt,
                        "lost the generation race, backing off"
                    );
                    config.backoff.sleep(attempt).await?;
                    attempt += 1;
                    summary.conflicts_retried += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
    Ok(summary)
}

/// Distinct folders under the prefix, in listing order.
async fn discover_folders(
    store: &Arc<dyn ObjectStore>,
    prefix: &str,
    filter: &ObjectFilter,
) -> Result<Vec<String>> {
    let prefix_path = (!prefix.is_empty()).then(|| Path::from(prefix));
    let mut entries = store.list(prefix_path.as_ref());

    let mut folders = BTreeSet::new();
    while let Some(meta) = entries.try_next().await? {
        if is_virtual_folder(&meta) || !filter(&meta) {
            continue;
        }
        folders.insert(folder_of(meta.location.as_ref()).to_string());
    }
    Ok(folders.into_iter().collect())
}

/// One optimistic compaction attempt for one folder. `Ok(None)` when
/// the folder has no source blobs (nothing to do).
async fn compact_one_folder<R, B, F>(
    store: &Arc<dyn ObjectStore>,
    folder: &str,
    filter: &ObjectFilter,
    buffer_factory: F,
    config: &CompactionConfig,
) -> Result<Option<FolderOutcome>>
where
    R: Lesser + Serialize + DeserializeOwned + Clone + Send + 'static,
    B: SpillBuffer + 'static,
    F: FnMut() -> B,
{
    let dst_path = if folder.is_empty() {
        config.destination.clone()
    } else {
        format!("{}/{}", folder, config.destination)
    };

    // Sources: blobs of exactly this folder, never the destination.
    let src_filter: ObjectFilter = {
        let folder = folder.to_string();
        let dst_path = dst_path.clone();
        let caller = Arc::clone(filter);
        Arc::new(move |meta| {
            let name = meta.location.as_ref();
            folder_of(name) == folder && name != dst_path && caller(meta)
        })
    };

    let mut objects = ObjectReaders::new(Arc::clone(store), folder, Some(src_filter));
    let mut sources: Vec<String> = Vec::new();
    let mut inputs: Vec<BoxRecordIterator<R>> = Vec::new();
    while let Some((name, reader)) = objects.next().await? {
        sources.push(name);
        inputs.push(Box::new(NlJsonReader::new(tokio::io::BufReader::new(reader))));
    }
    if inputs.is_empty() {
        return Ok(None);
    }
    tracing::info!(folder, blobs = sources.len(), "compacting folder");

    // External-sort the folder through the caller's buffers.
    let mut spill = SortedSpill::new(buffer_factory);
    let mut merged_sources = SortedMergeIterator::new(inputs);
    spill.load(&mut merged_sources).await?;
    let buffered = spill.into_sorted_iter();

    // Fence: destination generation before we read it.
    let dst_meta = touch_file(store, &dst_path).await?;
    let existing = open_at_generation::<R>(store, &dst_meta).await?;

    let mut merged: BoxRecordIterator<R> = Box::new(SortedMergeIterator::new(vec![
        Box::new(buffered) as BoxRecordIterator<R>,
        existing,
    ]));
    if config.remove_duplicates {
        merged = Box::new(Dedup::new(merged));
    }

    let (body, records) = encode_destination(&mut merged, dst_path.ends_with(".gz")).await?;

    // The write commits only if nobody moved the generation under us.
    let fence = PutMode::Update(UpdateVersion {
        e_tag: dst_meta.e_tag.clone(),
        version: dst_meta.version.clone(),
    });
    store
        .put_opts(
            &Path::from(dst_path.as_str()),
            PutPayload::from(body),
            fence.into(),
        )
        .await?;
    tracing::info!(folder, records, destination = %dst_path, "folder compacted");

    let mut removed = 0usize;
    if config.remove_src_on_success {
        for name in &sources {
            store.delete(&Path::from(name.as_str())).await?;
            removed += 1;
        }
        tracing::debug!(folder, removed, "removed compacted sources");
    }

    Ok(Some(FolderOutcome { records, removed }))
}

/// NLJSON reader over the destination pinned to the fenced generation.
async fn open_at_generation<R>(
    store: &Arc<dyn ObjectStore>,
    meta: &ObjectMeta,
) -> Result<BoxRecordIterator<R>>
where
    R: DeserializeOwned + Send + 'static,
{
    let options = GetOptions {
        version: meta.version.clone(),
        ..Default::default()
    };
    let result = store.get_opts(&meta.location, options).await?;
    let stream = result
        .into_stream()
        .map(|chunk| chunk.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)));
    let mut reader: BoxReader = Box::new(StreamReader::new(stream));
    if meta.location.as_ref().ends_with(".gz") {
        reader = gzip_reader(reader);
    }
    Ok(Box::new(NlJsonReader::new(tokio::io::BufReader::new(reader))))
}

/// Serialize the merged stream, gzip-framed when the destination asks
/// for it. Returns the body and the record count.
async fn encode_destination<R: Serialize>(
    records: &mut BoxRecordIterator<R>,
    gzip: bool,
) -> Result<(Vec<u8>, u64)> {
    if gzip {
        let mut encoder = async_compression::tokio::write::GzipEncoder::new(Vec::new());
        let count = write_nljson(records, &mut encoder).await?;
        encoder.shutdown().await?;
        Ok((encoder.into_inner(), count))
    } else {
        let mut body = Vec::new();
        let count = write_nljson(records, &mut body).await?;
        Ok((body, count))
    }
}
