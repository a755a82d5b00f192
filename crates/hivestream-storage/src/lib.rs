//! hivestream-storage
//!
//! Streaming record-oriented data in and out of a cloud object store
//! organized as Hadoop-style partition paths (`key1=val1/key2=val2/…`).
//!
//! ## Reading: sorted folder merges
//!
//! Each *folder* (blob names sharing the prefix up to the last `/`)
//! holds NLJSON blobs that are individually sorted. The read pipeline
//! turns a folder into one globally sorted lazy sequence:
//!
//! ```text
//! ┌──────────────┐   ┌───────────────┐   ┌──────────────────┐
//! │ list(prefix) │ → │ folder batches │ → │ NLJSON per blob  │
//! └──────────────┘   └───────────────┘   └────────┬─────────┘
//!        gzip auto-unwrap per blob                │
//!                                                 ▼
//!                                      ┌────────────────────┐
//!                                      │   K-way merge      │ → caller
//!                                      └────────────────────┘
//! ```
//!
//! Entry points: [`SortedFolderReader`] for records, [`FolderStreams`] /
//! [`read_all_by_prefix`] for raw concatenated bytes.
//!
//! ## Writing: the partitioned sorted sink
//!
//! [`RecordStreamer`] accepts an endless, only-partially-sorted record
//! stream and keeps every output blob sorted on disk by clustering
//! records into spill buckets:
//!
//! ```text
//! caller ─► RecordStreamer ─► SortedRecordWriter (per partition)
//!                                   │ spill minima
//!                                   ▼
//!                            WriterCache (idle-reaped, {suffix}-templated)
//!                                   │ gzip
//!                                   ▼
//!                    k1=v1/…/data_<host>_b<bucket>_<n>_<ts>.json.gz
//! ```
//!
//! ## Compaction
//!
//! [`compact_folders`] folds a folder's many small sorted blobs into
//! one destination blob, using the store's generation numbers as an
//! optimistic compare-and-swap; concurrent compactors collide only at
//! the final write and one of them retries with backoff.

pub mod compaction;
pub mod config;
pub mod error;
pub mod filter;
pub mod folders;
pub mod hooked_writer;
pub mod maintenance;
pub mod reader;
pub mod sorted_reader;
pub mod sorted_writer;
pub mod streamer;
pub mod timeout;
pub mod writer_cache;
pub mod writer_factory;

pub use compaction::{compact_folders, CompactionConfig, CompactionSummary};
pub use config::{SortedWriterConfig, StreamerConfig};
pub use error::{Error, Result};
pub use filter::{
    accept_all, combine_filters, is_virtual_folder, not_virtual_folder, partition_filter,
    ObjectFilter, PLACEHOLDER_MD5,
};
pub use folders::{folder_of, read_all_by_prefix, FolderReaders, FolderStreams};
pub use hooked_writer::{BoxWriter, HookedWriter, SelfDestructOptions, SelfDestructWriter};
pub use maintenance::{remove_folder, touch_file};
pub use reader::{BoxReader, ObjectReaders};
pub use sorted_reader::SortedFolderReader;
pub use sorted_writer::{SortedRecordWriter, SpillCallback};
pub use streamer::RecordStreamer;
pub use timeout::IdleTimeout;
pub use writer_cache::WriterCache;
pub use writer_factory::{ObjectStoreWriterFactory, WriterFactory};
