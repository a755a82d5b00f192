//! Sorted Folder Reader
//!
//! Composes the read pipeline: object iterator → folder batches →
//! per-blob NLJSON decode → K-way merge. Provided every blob inside a
//! folder is internally sorted, each folder comes out as one globally
//! sorted record sequence.
//!
//! ```text
//! list(prefix) ──► folder batch ──► NLJSON reader per blob
//!                                        │
//!                                        ▼
//!                              SortedMergeIterator
//!                                        │
//!                        (folder, record) pulls, folder by folder
//! ```
//!
//! Folders are independent: no ordering is defined across folders, and
//! each folder is surfaced exactly once with all of its records
//! consecutive.
//!
//! Two consumption styles:
//! - [`SortedFolderReader::next`]: `(folder, record)` pulls that move
//!   through folders transparently;
//! - [`SortedFolderReader::next_folder`]: hands out the per-folder
//!   merged iterator itself, for callers (like compaction) that work a
//!   folder at a time.

use std::sync::Arc;

use object_store::ObjectStore;
use serde::de::DeserializeOwned;

use hivestream_core::{
    BoxRecordIterator, Lesser, NlJsonReader, RecordIterator, SortedMergeIterator,
};

use crate::error::Result;
use crate::filter::ObjectFilter;
use crate::folders::FolderReaders;
use crate::reader::BoxReader;

/// Build the merged sorted iterator for one folder's blob readers.
pub fn merge_folder_readers<R>(readers: Vec<BoxReader>) -> SortedMergeIterator<R>
where
    R: Lesser + DeserializeOwned + Send + 'static,
{
    let inputs: Vec<BoxRecordIterator<R>> = readers
        .into_iter()
        .map(|reader| {
            Box::new(NlJsonReader::new(tokio::io::BufReader::new(reader))) as BoxRecordIterator<R>
        })
        .collect();
    SortedMergeIterator::new(inputs)
}

/// Per-folder sorted record reader over a prefix.
pub struct SortedFolderReader<R> {
    folders: FolderReaders,
    current: Option<(String, SortedMergeIterator<R>)>,
}

impl<R> SortedFolderReader<R>
where
    R: Lesser + DeserializeOwned + Send + 'static,
{
    pub fn new(store: Arc<dyn ObjectStore>, prefix: &str, filter: Option<ObjectFilter>) -> Self {
        Self {
            folders: FolderReaders::new(store, prefix, filter),
            current: None,
        }
    }

    /// The next folder's merged iterator. Any half-consumed current
    /// folder is abandoned.
    pub async fn next_folder(&mut self) -> Result<Option<(String, SortedMergeIterator<R>)>> {
        self.current = None;
        match self.folders.next_folder().await? {
            None => Ok(None),
            Some((folder, readers)) => {
                tracing::debug!(folder = %folder, blobs = readers.len(), "merging folder");
                Ok(Some((folder, merge_folder_readers(readers))))
            }
        }
    }

    /// The next `(folder, record)` pair, advancing into the next folder
    /// when the current one is exhausted. `Ok(None)` after the last
    /// folder.
    pub async fn next(&mut self) -> Result<Option<(String, R)>> {
        loop {
            if let Some((folder, merged)) = &mut self.current {
                if let Some(record) = merged.next_record().await? {
                    return Ok(Some((folder.clone(), record)));
                }
                self.current = None;
            }

            match self.folders.next_folder().await? {
                None => return Ok(None),
                Some((folder, readers)) => {
                    self.current = Some((folder, merge_folder_readers(readers)));
                }
            }
        }
    }
}
