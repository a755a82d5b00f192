//! Record Iterators and the K-way Merge
//!
//! The pull abstraction everything in hivestream is built on:
//!
//! ```ignore
//! #[async_trait]
//! pub trait RecordIterator<R>: Send {
//!     async fn next_record(&mut self) -> Result<Option<R>>;
//! }
//! ```
//!
//! `Ok(None)` is the end-of-sequence sentinel and is always success;
//! errors are real failures. This mirrors how the rest of the crate
//! treats lazy sequences: a consumer loops `while let Some(r) =
//! it.next_record().await?`.
//!
//! ## K-way merge
//!
//! [`SortedMergeIterator`] merges N inputs that each yield records in
//! non-decreasing [`Lesser`] order into one stream with the same
//! guarantee. It keeps a one-record peek slot per input; each pull scans
//! the slots, yields the smallest (ties go to the lowest input index, so
//! the merge is stable), and refills that slot.
//!
//! **Input contract**: because yielded records sit in the peek cache
//! until they win the scan, an input that mutates records after yielding
//! them (a reused buffer) silently corrupts the merge. Inputs must hand
//! out independently owned records.

use async_trait::async_trait;

use crate::error::Result;
use crate::record::{lesser_eq, Lesser};

/// Asynchronous pull-based record sequence. `Ok(None)` means a clean
/// end of the sequence.
#[async_trait]
pub trait RecordIterator<R>: Send {
    async fn next_record(&mut self) -> Result<Option<R>>;
}

/// Type alias for boxed iterator inputs.
pub type BoxRecordIterator<R> = Box<dyn RecordIterator<R> + Send>;

#[async_trait]
impl<R> RecordIterator<R> for BoxRecordIterator<R> {
    async fn next_record(&mut self) -> Result<Option<R>> {
        (**self).next_record().await
    }
}

/// An iterator over an in-memory batch of records. Mostly useful in
/// tests and as the trivial case of merge inputs.
pub struct VecIterator<R> {
    records: std::vec::IntoIter<R>,
}

impl<R> VecIterator<R> {
    pub fn new(records: Vec<R>) -> Self {
        Self {
            records: records.into_iter(),
        }
    }
}

#[async_trait]
impl<R: Send> RecordIterator<R> for VecIterator<R> {
    async fn next_record(&mut self) -> Result<Option<R>> {
        Ok(self.records.next())
    }
}

/// Merges N individually sorted record iterators into one sorted stream.
pub struct SortedMergeIterator<R> {
    inputs: Vec<BoxRecordIterator<R>>,
    peek: Vec<Option<R>>,
    primed: bool,
}

impl<R: Lesser + Send> SortedMergeIterator<R> {
    pub fn new(inputs: Vec<BoxRecordIterator<R>>) -> Self {
        let peek = inputs.iter().map(|_| None).collect();
        Self {
            inputs,
            peek,
            primed: false,
        }
    }

    async fn prime(&mut self) -> Result<()> {
        for i in 0..self.inputs.len() {
            self.peek[i] = self.inputs[i].next_record().await?;
        }
        self.primed = true;
        Ok(())
    }

    /// Index of the smallest peeked record; ties break to the lowest
    /// index. `None` when every slot is empty.
    fn best_index(&self) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (i, candidate) in self.peek.iter().enumerate() {
            let Some(candidate) = candidate else { continue };
            match best {
                None => best = Some(i),
                Some(b) => {
                    // Strictly-less only: on ties the earlier input wins.
                    if candidate.less(self.peek[b].as_ref().unwrap()) {
                        best = Some(i);
                    }
                }
            }
        }
        best
    }
}

#[async_trait]
impl<R: Lesser + Send> RecordIterator<R> for SortedMergeIterator<R> {
    async fn next_record(&mut self) -> Result<Option<R>> {
        if !self.primed {
            self.prime().await?;
        }

        let Some(best) = self.best_index() else {
            return Ok(None);
        };

        let record = self.peek[best].take();
        match self.inputs[best].next_record().await {
            Ok(next) => self.peek[best] = next,
            Err(e) => {
                // Slot stays empty; the failed input is out of the merge.
                return Err(e);
            }
        }
        Ok(record)
    }
}

/// Collapses adjacent equal records of a sorted stream.
///
/// Equality is `!less(a, b) && !less(b, a)`. On an unsorted input this
/// only removes *adjacent* duplicates, which is all compaction needs
/// since its input is already merged.
pub struct Dedup<R, I> {
    inner: I,
    last: Option<R>,
}

impl<R, I> Dedup<R, I> {
    pub fn new(inner: I) -> Self {
        Self { inner, last: None }
    }
}

#[async_trait]
impl<R, I> RecordIterator<R> for Dedup<R, I>
where
    R: Lesser + Clone + Send,
    I: RecordIterator<R> + Send,
{
    async fn next_record(&mut self) -> Result<Option<R>> {
        loop {
            let Some(record) = self.inner.next_record().await? else {
                return Ok(None);
            };
            if let Some(last) = &self.last {
                if lesser_eq(last, &record) {
                    continue;
                }
            }
            self.last = Some(record.clone());
            return Ok(Some(record));
        }
    }
}
