//! Store Maintenance Operations
//!
//! Small direct-to-store operations shared by compaction and exposed on
//! their own: ensuring a blob exists (to obtain a generation to fence
//! on) and deleting everything under a prefix.

use std::sync::Arc;

use futures::TryStreamExt;
use object_store::path::Path;
use object_store::{ObjectMeta, ObjectStore, PutMode, PutPayload};
use tokio::io::AsyncWriteExt;

use crate::error::Result;
use crate::filter::ObjectFilter;

/// Ensure `path` exists and return its current metadata (including the
/// e_tag/version pair used as a generation fence).
///
/// Creation is conditional (`PutMode::Create`): when the blob already
/// exists the conflict is expected and swallowed, and the existing
/// blob's metadata is returned; its content is never touched. A `.gz`
/// path is created as a valid empty gzip stream so readers can open it
/// before anything was compacted into it.
pub async fn touch_file(store: &Arc<dyn ObjectStore>, path: &str) -> Result<ObjectMeta> {
    let location = Path::from(path);

    let body: Vec<u8> = if path.ends_with(".gz") {
        empty_gzip().await?
    } else {
        Vec::new()
    };

    match store
        .put_opts(&location, PutPayload::from(body), PutMode::Create.into())
        .await
    {
        Ok(_) => {
            tracing::debug!(path, "created blob");
        }
        Err(object_store::Error::AlreadyExists { .. })
        | Err(object_store::Error::Precondition { .. }) => {
            // Expected when the blob exists.
        }
        Err(e) => return Err(e.into()),
    }

    Ok(store.head(&location).await?)
}

/// A complete, empty gzip stream.
async fn empty_gzip() -> Result<Vec<u8>> {
    let mut encoder = async_compression::tokio::write::GzipEncoder::new(Vec::new());
    encoder.shutdown().await?;
    Ok(encoder.into_inner())
}

/// Delete every object under `prefix` accepted by `filter` (all of
/// them when `filter` is `None`). Stops at the first failure.
pub async fn remove_folder(
    store: &Arc<dyn ObjectStore>,
    prefix: &str,
    filter: Option<ObjectFilter>,
) -> Result<usize> {
    let prefix_path = (!prefix.is_empty()).then(|| Path::from(prefix));
    let mut entries = store.list(prefix_path.as_ref());
    let mut removed = 0usize;

    while let Some(meta) = entries.try_next().await? {
        if let Some(filter) = &filter {
            if !filter(&meta) {
                continue;
            }
        }
        store.delete(&meta.location).await?;
        removed += 1;
    }

    tracing::debug!(prefix, removed, "removed folder contents");
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;

    async fn put(store: &Arc<dyn ObjectStore>, path: &str, body: &[u8]) {
        store
            .put(&Path::from(path), PutPayload::from(body.to_vec()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_touch_creates_when_absent() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let meta = touch_file(&store, "a/b/file.json").await.unwrap();
        assert_eq!(meta.location.as_ref(), "a/b/file.json");
        assert_eq!(meta.size, 0);
    }

    #[tokio::test]
    async fn test_touch_existing_preserves_content() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        put(&store, "a/file.json", b"precious").await;

        let meta = touch_file(&store, "a/file.json").await.unwrap();
        assert_eq!(meta.size, 8);

        let body = store
            .get(&Path::from("a/file.json"))
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();
        assert_eq!(body.as_ref(), b"precious");
    }

    #[tokio::test]
    async fn test_touch_gz_writes_valid_empty_gzip() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let meta = touch_file(&store, "a/file.json.gz").await.unwrap();
        assert!(meta.size > 0);

        let body = store
            .get(&Path::from("a/file.json.gz"))
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();
        assert_eq!(&body[..2], &[0x1f, 0x8b]);
    }

    #[tokio::test]
    async fn test_touch_twice_is_stable() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let first = touch_file(&store, "t/file.json").await.unwrap();
        let second = touch_file(&store, "t/file.json").await.unwrap();
        assert_eq!(first.e_tag, second.e_tag, "touch must not bump the generation");
    }

    #[tokio::test]
    async fn test_remove_folder_with_filter() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        put(&store, "f/a.json", b"1").await;
        put(&store, "f/b.tmp", b"2").await;
        put(&store, "g/c.json", b"3").await;

        let only_json: ObjectFilter = Arc::new(|m| m.location.as_ref().ends_with(".json"));
        let removed = remove_folder(&store, "f", Some(only_json)).await.unwrap();
        assert_eq!(removed, 1);

        assert!(store.get(&Path::from("f/a.json")).await.is_err());
        assert!(store.get(&Path::from("f/b.tmp")).await.is_ok());
        assert!(store.get(&Path::from("g/c.json")).await.is_ok());
    }

    #[tokio::test]
    async fn test_remove_folder_unfiltered() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        put(&store, "f/a.json", b"1").await;
        put(&store, "f/b.json", b"2").await;
        let removed = remove_folder(&store, "f", None).await.unwrap();
        assert_eq!(removed, 2);
    }
}
