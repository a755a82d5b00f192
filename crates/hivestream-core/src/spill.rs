//! Spill Buffers: the External-Sort Primitive Behind Compaction
//!
//! Compaction re-reads whole folders, which may not fit in memory as
//! records. [`SortedSpill`] bounds that cost by spilling records as
//! NLJSON *bytes* into caller-supplied [`SpillBuffer`]s, clustered so
//! that every buffer is internally sorted:
//!
//! - a record is appended to the first buffer whose last-written record
//!   is not greater than it (append keeps the buffer sorted);
//! - otherwise a new buffer is started.
//!
//! A mostly-sorted input therefore lands in very few buffers, and
//! [`SortedSpill::into_sorted_iter`] recovers a totally sorted stream by
//! K-way merging the buffers back through the NLJSON decoder.
//!
//! The buffer itself is a boundary: `Vec<u8>` works for in-memory use,
//! and a file-backed implementation can be dropped in without touching
//! compaction.

use std::io::BufReader;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;
use crate::iterator::{BoxRecordIterator, RecordIterator, SortedMergeIterator};
use crate::nljson::{encode_line, SyncNlJsonReader};
use crate::record::Lesser;

/// A byte sink that can later be re-read from the start.
pub trait SpillBuffer: std::io::Write + Send {
    type Reader: std::io::Read + Send + 'static;

    /// Consume the buffer and return a reader over everything written.
    fn into_reader(self) -> Self::Reader;
}

impl SpillBuffer for Vec<u8> {
    type Reader = std::io::Cursor<Vec<u8>>;

    fn into_reader(self) -> Self::Reader {
        std::io::Cursor::new(self)
    }
}

/// Clustered, sorted spill of a record stream into NLJSON buffers.
pub struct SortedSpill<R, B, F> {
    factory: F,
    buffers: Vec<(R, B)>,
    records: u64,
}

impl<R, B, F> SortedSpill<R, B, F>
where
    R: Lesser + Serialize + Send,
    B: SpillBuffer,
    F: FnMut() -> B,
{
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            buffers: Vec::new(),
            records: 0,
        }
    }

    /// Number of records spilled so far.
    pub fn record_count(&self) -> u64 {
        self.records
    }

    /// Number of clustered buffers allocated so far.
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Append one record, keeping every buffer internally sorted.
    pub fn push(&mut self, record: R) -> Result<()> {
        let line = encode_line(&record)?;

        for (last, buffer) in self.buffers.iter_mut() {
            // Appendable iff the buffer's tail is <= record.
            if !record.less(last) {
                buffer.write_all(&line)?;
                *last = record;
                self.records += 1;
                return Ok(());
            }
        }

        let mut buffer = (self.factory)();
        buffer.write_all(&line)?;
        self.buffers.push((record, buffer));
        self.records += 1;
        Ok(())
    }

    /// Drain a record iterator into the spill. Returns the number of
    /// records consumed.
    pub async fn load<I>(&mut self, records: &mut I) -> Result<u64>
    where
        I: RecordIterator<R>,
    {
        let mut loaded = 0u64;
        while let Some(record) = records.next_record().await? {
            self.push(record)?;
            loaded += 1;
        }
        Ok(loaded)
    }
}

impl<R, B, F> SortedSpill<R, B, F>
where
    R: Lesser + DeserializeOwned + Send + 'static,
    B: SpillBuffer,
{
    /// Re-read every buffer and merge them into one sorted stream.
    pub fn into_sorted_iter(self) -> SortedMergeIterator<R> {
        let inputs: Vec<BoxRecordIterator<R>> = self
            .buffers
            .into_iter()
            .map(|(_, buffer)| {
                Box::new(SyncNlJsonReader::new(BufReader::new(buffer.into_reader())))
                    as BoxRecordIterator<R>
            })
            .collect();
        SortedMergeIterator::new(inputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Row(i64);

    impl Lesser for Row {
        fn less(&self, other: &Self) -> bool {
            self.0 < other.0
        }
    }

    async fn sorted_back(spill: SortedSpill<Row, Vec<u8>, fn() -> Vec<u8>>) -> Vec<i64> {
        let mut it = spill.into_sorted_iter();
        let mut out = Vec::new();
        while let Some(r) = it.next_record().await.unwrap() {
            out.push(r.0);
        }
        out
    }

    fn new_spill() -> SortedSpill<Row, Vec<u8>, fn() -> Vec<u8>> {
        SortedSpill::new(Vec::new)
    }

    #[tokio::test]
    async fn test_sorted_input_uses_one_buffer() {
        let mut spill = new_spill();
        for v in 1..=10 {
            spill.push(Row(v)).unwrap();
        }
        assert_eq!(spill.buffer_count(), 1);
        assert_eq!(spill.record_count(), 10);
        assert_eq!(sorted_back(spill).await, (1..=10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_unsorted_input_clusters_and_sorts() {
        let mut spill = new_spill();
        for v in [1, 4, 2, 20, 6, 7, 9, 3, 12, 11] {
            spill.push(Row(v)).unwrap();
        }
        assert!(spill.buffer_count() > 1);
        assert_eq!(sorted_back(spill).await, vec![1, 2, 3, 4, 6, 7, 9, 11, 12, 20]);
    }

    #[tokio::test]
    async fn test_duplicates_survive_the_spill() {
        let mut spill = new_spill();
        for v in [2, 2, 1, 2] {
            spill.push(Row(v)).unwrap();
        }
        assert_eq!(sorted_back(spill).await, vec![1, 2, 2, 2]);
    }

    #[tokio::test]
    async fn test_load_from_iterator() {
        use crate::iterator::VecIterator;
        let mut spill = new_spill();
        let mut it = VecIterator::new(vec![Row(3), Row(1), Row(2)]);
        assert_eq!(spill.load(&mut it).await.unwrap(), 3);
        assert_eq!(sorted_back(spill).await, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_empty_spill() {
        let spill = new_spill();
        assert_eq!(spill.buffer_count(), 0);
        assert_eq!(sorted_back(spill).await, Vec::<i64>::new());
    }
}
