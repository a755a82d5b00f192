//! Folder Grouping
//!
//! A *folder* is a blob name up to its last `/`. Because listings come
//! back in lexicographic order, all blobs of a folder are consecutive,
//! and grouping is a single forward pass. Two shapes are offered:
//!
//! - [`FolderReaders`]: per folder, the list of open per-blob readers
//!   (what the sorted merge needs: one reader per sorted blob);
//! - [`FolderStreams`]: per folder, one reader over the concatenated
//!   blob contents, produced by a background task pumping blobs through
//!   a bounded pipe (5 MiB of buffered chunks).
//!
//! [`read_all_by_prefix`] is the degenerate form: every accepted blob
//! under the prefix as one concatenated stream, folders ignored.
//!
//! Errors on the producing side of a concatenated stream are injected
//! into the open folder's pipe, so the consumer observes them on its
//! next read rather than as a silent truncation.

use std::sync::Arc;

use bytes::Bytes;
use object_store::ObjectStore;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_util::io::StreamReader;

use crate::error::{Error, Result};
use crate::filter::ObjectFilter;
use crate::reader::{BoxReader, ObjectReaders};

/// Total bytes a concatenated folder pipe may buffer ahead.
const PIPE_BUFFER_BYTES: usize = 5 * 1024 * 1024;
const CHUNK_BYTES: usize = 64 * 1024;
const PIPE_CHUNKS: usize = PIPE_BUFFER_BYTES / CHUNK_BYTES;

/// The folder of a blob name: everything before the last `/`, or `""`
/// for top-level names.
pub fn folder_of(name: &str) -> &str {
    name.rfind('/').map(|i| &name[..i]).unwrap_or("")
}

/// Channel-backed byte stream, adapted into `AsyncRead` below.
struct ByteRx(mpsc::Receiver<std::io::Result<Bytes>>);

impl futures::Stream for ByteRx {
    type Item = std::io::Result<Bytes>;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        self.0.poll_recv(cx)
    }
}

fn pipe() -> (mpsc::Sender<std::io::Result<Bytes>>, BoxReader) {
    let (tx, rx) = mpsc::channel(PIPE_CHUNKS);
    (tx, Box::new(StreamReader::new(ByteRx(rx))))
}

fn to_io_error(err: Error) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, err.to_string())
}

/// Pump every chunk of `reader` into `tx`. Returns `false` when the
/// stream must end (receiver gone or read error already delivered).
async fn pump(reader: &mut BoxReader, tx: &mpsc::Sender<std::io::Result<Bytes>>) -> bool {
    let mut buf = vec![0u8; CHUNK_BYTES];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => return true,
            Ok(n) => {
                if tx.send(Ok(Bytes::copy_from_slice(&buf[..n]))).await.is_err() {
                    return false;
                }
            }
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                return false;
            }
        }
    }
}

/// Batches the object iterator into `(folder, readers)` tuples.
pub struct FolderReaders {
    objects: ObjectReaders,
    pending: Option<(String, BoxReader)>,
}

impl FolderReaders {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: &str, filter: Option<ObjectFilter>) -> Self {
        Self {
            objects: ObjectReaders::new(store, prefix, filter),
            pending: None,
        }
    }

    /// Readers for the next folder, in listing order. A blob belonging
    /// to the following folder is carried over to the next call.
    pub async fn next_folder(&mut self) -> Result<Option<(String, Vec<BoxReader>)>> {
        let mut current: Option<String> = None;
        let mut batch: Vec<BoxReader> = Vec::new();

        if let Some((name, reader)) = self.pending.take() {
            current = Some(folder_of(&name).to_string());
            batch.push(reader);
        }

        loop {
            match self.objects.next().await? {
                None => {
                    return Ok(current.map(|folder| (folder, batch)));
                }
                Some((name, reader)) => {
                    let folder = folder_of(&name).to_string();
                    match &current {
                        None => {
                            current = Some(folder);
                            batch.push(reader);
                        }
                        Some(c) if *c == folder => batch.push(reader),
                        Some(_) => {
                            self.pending = Some((name, reader));
                            return Ok(current.map(|folder| (folder, batch)));
                        }
                    }
                }
            }
        }
    }
}

/// Per-folder concatenated streams, fed by one background producer.
pub struct FolderStreams {
    folders: mpsc::Receiver<Result<(String, BoxReader)>>,
}

impl FolderStreams {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: &str, filter: Option<ObjectFilter>) -> Self {
        let mut objects = ObjectReaders::new(store, prefix, filter);
        let (folders_tx, folders) = mpsc::channel::<Result<(String, BoxReader)>>(1);

        tokio::spawn(async move {
            let mut current: Option<(String, mpsc::Sender<std::io::Result<Bytes>>)> = None;

            loop {
                match objects.next().await {
                    Ok(None) => {
                        // Dropping the sender is the folder's clean EOF.
                        drop(current.take());
                        return;
                    }
                    Err(e) => {
                        match current.take() {
                            // Deliver on the open folder so the consumer
                            // sees the failure mid-read.
                            Some((_, tx)) => {
                                let _ = tx.send(Err(to_io_error(e))).await;
                            }
                            None => {
                                let _ = folders_tx.send(Err(e)).await;
                            }
                        }
                        return;
                    }
                    Ok(Some((name, mut reader))) => {
                        let folder = folder_of(&name).to_string();
                        let fresh = current
                            .as_ref()
                            .map(|(open, _)| *open != folder)
                            .unwrap_or(true);
                        if fresh {
                            drop(current.take());
                            let (tx, folder_reader) = pipe();
                            if folders_tx.send(Ok((folder.clone(), folder_reader))).await.is_err() {
                                return;
                            }
                            current = Some((folder, tx));
                        }

                        let (_, tx) = current.as_ref().unwrap();
                        if !pump(&mut reader, tx).await {
                            return;
                        }
                    }
                }
            }
        });

        Self { folders }
    }

    /// The next folder and its concatenated reader.
    pub async fn next(&mut self) -> Result<Option<(String, BoxReader)>> {
        match self.folders.recv().await {
            None => Ok(None),
            Some(Err(e)) => Err(e),
            Some(Ok(pair)) => Ok(Some(pair)),
        }
    }
}

/// Every accepted blob under `prefix` as one concatenated stream,
/// gzip-unwrapped per blob, folder boundaries ignored.
pub fn read_all_by_prefix(
    store: Arc<dyn ObjectStore>,
    prefix: &str,
    filter: Option<ObjectFilter>,
) -> BoxReader {
    let mut objects = ObjectReaders::new(store, prefix, filter);
    let (tx, reader) = pipe();

    tokio::spawn(async move {
        loop {
            match objects.next().await {
                Ok(None) => return,
                Err(e) => {
                    let _ = tx.send(Err(to_io_error(e))).await;
                    return;
                }
                Ok(Some((_, mut blob_reader))) => {
                    if !pump(&mut blob_reader, &tx).await {
                        return;
                    }
                }
            }
        }
    });

    reader
}
