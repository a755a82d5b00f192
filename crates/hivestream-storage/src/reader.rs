//! Object → Reader Iterator
//!
//! The entry stage of every read pipeline: walk an object-store prefix
//! and turn each accepted object into an open byte reader.
//!
//! ```text
//! list(prefix)
//!     ↓ ObjectMeta           (lazy: a background task feeds a
//!     ↓                       bounded channel, nothing is collected)
//! caller filter + virtual-folder filter
//!     ↓
//! get(location) → byte stream → AsyncRead
//!     ↓
//! name ends ".gz"? → streaming gzip decode (multi-member)
//!     ↓
//! (name, reader)
//! ```
//!
//! Listing order is the store's order (lexicographic for every backend
//! this crate targets), which is what lets the folder grouper downstream
//! batch consecutive names. Prefixes follow `object_store` semantics:
//! they are path-segment aligned.

use std::sync::Arc;

use async_compression::tokio::bufread::GzipDecoder;
use futures::StreamExt;
use object_store::path::Path;
use object_store::{ObjectMeta, ObjectStore};
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::io::StreamReader;

use crate::error::Result;
use crate::filter::{combine_filters, not_virtual_folder, ObjectFilter};

/// Boxed byte reader over one (possibly gzip-compressed) object.
pub type BoxReader = Box<dyn AsyncRead + Send + Unpin>;

/// How many listing entries may sit decoded ahead of the consumer.
const LISTING_CHANNEL_DEPTH: usize = 64;

/// Pull-based iterator over `(name, reader)` pairs for a prefix.
pub struct ObjectReaders {
    store: Arc<dyn ObjectStore>,
    listing: mpsc::Receiver<object_store::Result<ObjectMeta>>,
    filter: ObjectFilter,
}

impl ObjectReaders {
    /// Start listing `prefix`. `filter` may be `None` to accept every
    /// object; virtual-folder placeholders are always dropped.
    pub fn new(store: Arc<dyn ObjectStore>, prefix: &str, filter: Option<ObjectFilter>) -> Self {
        let filter = match filter {
            Some(f) => combine_filters(vec![f, not_virtual_folder()]),
            None => not_virtual_folder(),
        };

        let (tx, listing) = mpsc::channel(LISTING_CHANNEL_DEPTH);
        let prefix = (!prefix.is_empty()).then(|| Path::from(prefix));
        let list_store = Arc::clone(&store);
        tokio::spawn(async move {
            let mut entries = list_store.list(prefix.as_ref());
            while let Some(entry) = entries.next().await {
                if tx.send(entry).await.is_err() {
                    // Consumer is gone; stop listing.
                    return;
                }
            }
        });

        Self {
            store,
            listing,
            filter,
        }
    }

    /// Next accepted object, opened for reading. `Ok(None)` when the
    /// listing is exhausted.
    pub async fn next(&mut self) -> Result<Option<(String, BoxReader)>> {
        loop {
            let meta = match self.listing.recv().await {
                None => return Ok(None),
                Some(entry) => entry?,
            };
            if !(self.filter)(&meta) {
                continue;
            }

            let name = meta.location.to_string();
            tracing::debug!(name = %name, size = meta.size, "opening object reader");

            let result = self.store.get(&meta.location).await?;
            let stream = result
                .into_stream()
                .map(|chunk| chunk.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)));
            let reader: BoxReader = Box::new(StreamReader::new(stream));

            let reader = if name.ends_with(".gz") {
                gzip_reader(reader)
            } else {
                reader
            };
            return Ok(Some((name, reader)));
        }
    }
}

/// Wrap a reader in a streaming gzip decoder. Multi-member streams
/// (concatenated gzip files) decode as one continuous stream.
pub fn gzip_reader(reader: BoxReader) -> BoxReader {
    let mut decoder = GzipDecoder::new(tokio::io::BufReader::new(reader));
    decoder.multiple_members(true);
    Box::new(decoder)
}
