//! hivestream-core
//!
//! Record machinery shared by the hivestream crates: the capability
//! traits records opt into, the Hadoop-style partition key model, the
//! pull-based record iterator with its K-way merge, the NLJSON codec,
//! and the spill-buffer external sort used by compaction.
//!
//! ## The record model
//!
//! Records are caller-defined serde values. Pipelines ask for exactly
//! the capabilities they need:
//!
//! - [`Lesser`]: strict total order between two records of the same
//!   kind; everything "sorted" in hivestream is sorted under this.
//! - [`PartitionGetter`]: the ordered `key=value` pairs naming the
//!   partition a record belongs to.
//!
//! ## Lazy sequences
//!
//! Every lazy sequence is a [`RecordIterator`]: `next_record()` yields
//! `Ok(Some(record))`, `Ok(None)` on clean end, `Err` on failure. End of
//! sequence is success, never an error.
//!
//! ## Sorted merging
//!
//! [`SortedMergeIterator`] merges N individually sorted inputs into one
//! sorted stream using a one-record peek slot per input (stable: ties go
//! to the earliest input). [`Dedup`] collapses adjacent equals of a
//! sorted stream. [`SortedSpill`] turns a not-quite-sorted stream into
//! clustered sorted NLJSON buffers that merge back into a total order.

pub mod backoff;
pub mod error;
pub mod iterator;
pub mod keyvalue;
pub mod nljson;
pub mod record;
pub mod spill;

pub use backoff::Backoff;
pub use error::{Error, MultiError, Result};
pub use iterator::{BoxRecordIterator, Dedup, RecordIterator, SortedMergeIterator, VecIterator};
pub use keyvalue::{KeyValue, KeyValues};
pub use nljson::{encode_line, write_nljson, NlJsonReader, SyncNlJsonReader};
pub use record::{ByLess, Lesser, PartitionGetter};
pub use spill::{SortedSpill, SpillBuffer};
