//! Newline-Delimited JSON Codec
//!
//! Blobs in hivestream are NLJSON streams: one JSON document per line.
//! This module provides both directions:
//!
//! - [`NlJsonReader`]: decode records from any `AsyncBufRead` (object
//!   store bodies, gzip decoders, pipes)
//! - [`SyncNlJsonReader`]: the same decode over a blocking `BufRead`,
//!   used for re-reading in-memory spill buffers
//! - [`write_nljson`]: drain a record iterator into an `AsyncWrite`
//!
//! Decode rules: blank lines are skipped; EOF is a clean end
//! (`Ok(None)`); a line that fails to parse is an error, never an end:
//! a truncated or corrupt blob must not masquerade as a short one.

use std::io::BufRead;
use std::marker::PhantomData;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, Lines};

use crate::error::Result;
use crate::iterator::RecordIterator;

/// Streaming NLJSON decoder over an async reader.
pub struct NlJsonReader<R, B> {
    lines: Lines<B>,
    _record: PhantomData<fn() -> R>,
}

impl<R, B: AsyncBufRead + Unpin> NlJsonReader<R, B> {
    pub fn new(reader: B) -> Self {
        Self {
            lines: reader.lines(),
            _record: PhantomData,
        }
    }
}

#[async_trait]
impl<R, B> RecordIterator<R> for NlJsonReader<R, B>
where
    R: DeserializeOwned + Send,
    B: AsyncBufRead + Unpin + Send,
{
    async fn next_record(&mut self) -> Result<Option<R>> {
        loop {
            match self.lines.next_line().await? {
                None => return Ok(None),
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => return Ok(Some(serde_json::from_str(&line)?)),
            }
        }
    }
}

/// Blocking twin of [`NlJsonReader`] for in-memory buffers.
pub struct SyncNlJsonReader<R, B> {
    reader: B,
    line: String,
    _record: PhantomData<fn() -> R>,
}

impl<R, B: BufRead> SyncNlJsonReader<R, B> {
    pub fn new(reader: B) -> Self {
        Self {
            reader,
            line: String::new(),
            _record: PhantomData,
        }
    }
}

#[async_trait]
impl<R, B> RecordIterator<R> for SyncNlJsonReader<R, B>
where
    R: DeserializeOwned + Send,
    B: BufRead + Send,
{
    async fn next_record(&mut self) -> Result<Option<R>> {
        loop {
            self.line.clear();
            if self.reader.read_line(&mut self.line)? == 0 {
                return Ok(None);
            }
            if self.line.trim().is_empty() {
                continue;
            }
            return Ok(Some(serde_json::from_str(&self.line)?));
        }
    }
}

/// Encode one record as a single NLJSON line.
pub fn encode_line<R: Serialize>(record: &R) -> Result<Vec<u8>> {
    let mut line = serde_json::to_vec(record)?;
    line.push(b'\n');
    Ok(line)
}

/// Drain `records` into `writer` as NLJSON. Returns the number of
/// records written. The writer is flushed but not shut down; closing
/// stays with the caller.
pub async fn write_nljson<R, I, W>(records: &mut I, writer: &mut W) -> Result<u64>
where
    R: Serialize,
    I: RecordIterator<R>,
    W: AsyncWrite + Unpin,
{
    let mut written = 0u64;
    while let Some(record) = records.next_record().await? {
        writer.write_all(&encode_line(&record)?).await?;
        written += 1;
    }
    writer.flush().await?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iterator::VecIterator;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Row {
        id: i64,
        name: String,
    }

    #[tokio::test]
    async fn test_decode_stream() {
        let data = b"{\"id\":1,\"name\":\"a\"}\n{\"id\":2,\"name\":\"b\"}\n";
        let mut it: NlJsonReader<Row, _> = NlJsonReader::new(&data[..]);
        assert_eq!(it.next_record().await.unwrap().unwrap().id, 1);
        assert_eq!(it.next_record().await.unwrap().unwrap().id, 2);
        assert!(it.next_record().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_blank_lines_are_skipped() {
        let data = b"\n{\"id\":1,\"name\":\"a\"}\n\n\n{\"id\":2,\"name\":\"b\"}\n";
        let mut it: NlJsonReader<Row, _> = NlJsonReader::new(&data[..]);
        assert_eq!(it.next_record().await.unwrap().unwrap().id, 1);
        assert_eq!(it.next_record().await.unwrap().unwrap().id, 2);
        assert!(it.next_record().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_line_is_an_error_not_eof() {
        let data = b"{\"id\":1,\"name\":\"a\"}\n{\"id\":oops}\n";
        let mut it: NlJsonReader<Row, _> = NlJsonReader::new(&data[..]);
        assert!(it.next_record().await.unwrap().is_some());
        assert!(it.next_record().await.is_err());
    }

    #[tokio::test]
    async fn test_empty_input() {
        let mut it: NlJsonReader<Row, _> = NlJsonReader::new(&b""[..]);
        assert!(it.next_record().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sync_reader_matches_async() {
        let data = b"{\"id\":1,\"name\":\"a\"}\n\n{\"id\":2,\"name\":\"b\"}\n";
        let mut it: SyncNlJsonReader<Row, _> = SyncNlJsonReader::new(&data[..]);
        assert_eq!(it.next_record().await.unwrap().unwrap().id, 1);
        assert_eq!(it.next_record().await.unwrap().unwrap().id, 2);
        assert!(it.next_record().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_write_then_read_round_trip() {
        let rows = vec![
            Row { id: 1, name: "a".to_string() },
            Row { id: 2, name: "ö".to_string() },
        ];
        let mut buf = Vec::new();
        let mut it = VecIterator::new(rows.clone());
        let written = write_nljson(&mut it, &mut buf).await.unwrap();
        assert_eq!(written, 2);

        let mut back: NlJsonReader<Row, _> = NlJsonReader::new(&buf[..]);
        assert_eq!(back.next_record().await.unwrap().unwrap(), rows[0]);
        assert_eq!(back.next_record().await.unwrap().unwrap(), rows[1]);
        assert!(back.next_record().await.unwrap().is_none());
    }
}
