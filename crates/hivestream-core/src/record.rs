//! Record Capabilities
//!
//! Records are caller-defined values; the library only asks for the
//! capabilities a given pipeline needs, expressed as traits:
//!
//! - [`Lesser`]: the record can be strictly ordered against another of
//!   its kind. Required by every sorted pipeline (merge readers, sorted
//!   writer, compaction).
//! - [`PartitionGetter`]: the record names the partition it belongs to,
//!   as an ordered key-value list.
//!
//! Decoding always produces a fresh owned value (records are
//! `DeserializeOwned` at the call sites that decode), so two records
//! handed out by an iterator never alias the same buffer. This matters
//! for the merge machinery, which holds on to a previously yielded
//! record as its peek value.
//!
//! ## Ordering contract
//!
//! `less` must be a total strict order: for any `a` and `b`, exactly one
//! of `less(a, b)`, `less(b, a)` or "equal" holds, and the answer must
//! not change while both values are alive. `!less(a, b) && !less(b, a)`
//! is how the library detects equality (used by duplicate removal).

use std::cmp::Ordering;

use crate::keyvalue::KeyValues;

/// A record that can be strictly ordered against another of its kind.
pub trait Lesser {
    /// True iff `self` sorts strictly before `other`.
    fn less(&self, other: &Self) -> bool;
}

/// A record that knows the partition it should be written to.
pub trait PartitionGetter {
    /// Ordered partition pairs; empty means "no partitioning".
    fn partitions(&self) -> KeyValues;
}

/// Adapter giving any [`Lesser`] record a total [`Ord`], so records can
/// live in ordered collections (binary heaps, sorted vecs).
///
/// Two records compare `Equal` when neither is less than the other.
#[derive(Debug, Clone)]
pub struct ByLess<R>(pub R);

impl<R: Lesser> PartialEq for ByLess<R> {
    fn eq(&self, other: &Self) -> bool {
        !self.0.less(&other.0) && !other.0.less(&self.0)
    }
}

impl<R: Lesser> Eq for ByLess<R> {}

impl<R: Lesser> PartialOrd for ByLess<R> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<R: Lesser> Ord for ByLess<R> {
    fn cmp(&self, other: &Self) -> Ordering {
        if self.0.less(&other.0) {
            Ordering::Less
        } else if other.0.less(&self.0) {
            Ordering::Greater
        } else {
            Ordering::Equal
        }
    }
}

/// True iff `a` and `b` are equal under the [`Lesser`] order.
pub fn lesser_eq<R: Lesser>(a: &R, b: &R) -> bool {
    !a.less(b) && !b.less(a)
}
