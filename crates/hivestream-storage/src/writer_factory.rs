//! Writer Factory Boundary
//!
//! The sink pipelines only know how to ask for "a byte sink at this
//! path"; where those bytes land is behind [`WriterFactory`]. The
//! production implementation streams into the object store through
//! [`object_store::buffered::BufWriter`]; tests plug in factories that
//! write to memory.

use std::sync::Arc;

use async_trait::async_trait;
use object_store::buffered::BufWriter;
use object_store::path::Path;
use object_store::ObjectStore;

use crate::error::Result;
use crate::hooked_writer::BoxWriter;

/// Opens a raw byte sink for a path.
#[async_trait]
pub trait WriterFactory: Send + Sync {
    async fn open(&self, path: &str) -> Result<BoxWriter>;
}

/// Factory producing streaming writers against an object store.
pub struct ObjectStoreWriterFactory {
    store: Arc<dyn ObjectStore>,
    prefix: Option<String>,
}

impl ObjectStoreWriterFactory {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            prefix: None,
        }
    }

    /// Prepend a fixed prefix to every opened path.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    fn full_path(&self, path: &str) -> Path {
        match &self.prefix {
            Some(prefix) => Path::from(format!("{}/{}", prefix.trim_end_matches('/'), path)),
            None => Path::from(path),
        }
    }
}

#[async_trait]
impl WriterFactory for ObjectStoreWriterFactory {
    async fn open(&self, path: &str) -> Result<BoxWriter> {
        let location = self.full_path(path);
        tracing::debug!(path = %location, "opening object store writer");
        Ok(Box::new(BufWriter::new(
            Arc::clone(&self.store),
            location,
        )))
    }
}
