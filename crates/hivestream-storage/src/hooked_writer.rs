//! Hooked and Self-Destructing Writers
//!
//! Two layers around a raw byte sink:
//!
//! - [`HookedWriter`] adds pre/post hooks to write and close, plus an
//!   idempotent-close guard (a second close is [`Error::AlreadyClosed`],
//!   the underlying sink is only shut down once).
//! - [`SelfDestructWriter`] is a cheaply clonable handle that can close
//!   *itself*: after `max_idle` without a write (the idle watch is
//!   pinged before and after every write), or once `max_bytes` have been
//!   written. The writer cache leans on this to reap blob handles
//!   nobody streams to anymore.
//!
//! ## Ownership shape
//!
//! The idle watch task holds only a `Weak` reference back to the writer
//! and a one-shot cancel token ends it when the writer closes first, so
//! there is no reference cycle: the task observes either a ping, the
//! expiry, or the cancel.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::timeout::IdleTimeout;

/// Boxed raw byte sink.
pub type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

type Hook = Box<dyn FnMut() + Send>;
type PostWriteHook = Box<dyn FnMut(usize) + Send>;
type PostCloseHook = Box<dyn FnMut(&Result<()>) + Send>;

/// A write-closer with pre/post hooks around both operations.
///
/// Hooks registered after close still attach but never fire, because a
/// closed writer rejects both operations up front.
pub struct HookedWriter {
    inner: BoxWriter,
    closed: bool,

    pre_write_hooks: Vec<Hook>,
    post_write_hooks: Vec<PostWriteHook>,
    pre_close_hooks: Vec<Hook>,
    post_close_hooks: Vec<PostCloseHook>,
}

impl HookedWriter {
    pub fn new(inner: BoxWriter) -> Self {
        Self {
            inner,
            closed: false,
            pre_write_hooks: Vec::new(),
            post_write_hooks: Vec::new(),
            pre_close_hooks: Vec::new(),
            post_close_hooks: Vec::new(),
        }
    }

    pub fn add_pre_write_hook(&mut self, hook: Hook) {
        self.pre_write_hooks.push(hook);
    }

    pub fn add_post_write_hook(&mut self, hook: PostWriteHook) {
        self.post_write_hooks.push(hook);
    }

    pub fn add_pre_close_hook(&mut self, hook: Hook) {
        self.pre_close_hooks.push(hook);
    }

    pub fn add_post_close_hook(&mut self, hook: PostCloseHook) {
        self.post_close_hooks.push(hook);
    }

    /// Write the whole buffer. Pre-hooks run first, post-hooks run with
    /// the byte count (0 when the write failed).
    pub async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if self.closed {
            return Err(Error::AlreadyClosed);
        }
        for hook in &mut self.pre_write_hooks {
            hook();
        }
        let res = self.inner.write_all(buf).await;
        let written = if res.is_ok() { buf.len() } else { 0 };
        for hook in &mut self.post_write_hooks {
            hook(written);
        }
        res?;
        Ok(written)
    }

    /// Close once: pre-hooks, shutdown, post-hooks with the outcome.
    /// A second close returns [`Error::AlreadyClosed`] without touching
    /// the underlying sink or any hook.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::AlreadyClosed);
        }
        for hook in &mut self.pre_close_hooks {
            hook();
        }
        let res = self.inner.shutdown().await.map_err(Error::from);
        self.closed = true;
        for hook in &mut self.post_close_hooks {
            hook(&res);
        }
        res
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Options for [`SelfDestructWriter`].
#[derive(Default)]
pub struct SelfDestructOptions {
    /// Close automatically after this long without a write.
    pub max_idle: Option<Duration>,
    /// Close automatically once this many bytes have been written.
    pub max_bytes: Option<usize>,
}

struct SelfDestructShared {
    writer: Mutex<HookedWriter>,
    timer_cancel: CancellationToken,
    bytes_written: AtomicUsize,
    byte_cap_hit: AtomicBool,
}

/// Clonable handle to a hooked writer that closes itself on idle or on
/// a byte cap.
#[derive(Clone)]
pub struct SelfDestructWriter {
    shared: Arc<SelfDestructShared>,
}

impl SelfDestructWriter {
    /// Wrap an already-hooked writer. Use this when extra hooks (e.g.
    /// a cache-eviction pre-close hook) must be attached before the
    /// writer becomes shared.
    pub fn new(mut hooked: HookedWriter, options: SelfDestructOptions) -> Self {
        let timer_cancel = CancellationToken::new();
        let max_bytes = options.max_bytes;

        let shared = Arc::new_cyclic(|weak: &Weak<SelfDestructShared>| {
            if let Some(cap) = max_bytes {
                let w = weak.clone();
                hooked.add_post_write_hook(Box::new(move |written| {
                    if let Some(shared) = w.upgrade() {
                        let total = shared.bytes_written.fetch_add(written, Ordering::SeqCst) + written;
                        if total >= cap {
                            shared.byte_cap_hit.store(true, Ordering::SeqCst);
                        }
                    }
                }));
            }

            if let Some(max_idle) = options.max_idle {
                let w = weak.clone();
                let timeout = IdleTimeout::arm(
                    timer_cancel.clone(),
                    max_idle,
                    false,
                    vec![Box::new(move || {
                        if let Some(shared) = w.upgrade() {
                            tokio::spawn(async move {
                                let mut writer = shared.writer.lock().await;
                                match Self::close_locked(&mut writer, &shared).await {
                                    Ok(()) | Err(Error::AlreadyClosed) => {}
                                    Err(e) => {
                                        tracing::warn!(error = %e, "idle self-close failed");
                                    }
                                }
                            });
                        }
                    })],
                );
                let ping = timeout.clone();
                hooked.add_pre_write_hook(Box::new(move || ping.ping()));
                let ping = timeout;
                hooked.add_post_write_hook(Box::new(move |_| ping.ping()));
            }

            SelfDestructShared {
                writer: Mutex::new(hooked),
                timer_cancel,
                bytes_written: AtomicUsize::new(0),
                byte_cap_hit: AtomicBool::new(false),
            }
        });

        Self { shared }
    }

    /// Wrap a raw sink with no extra hooks.
    pub fn from_raw(inner: BoxWriter, options: SelfDestructOptions) -> Self {
        Self::new(HookedWriter::new(inner), options)
    }

    /// Stable identity of this writer across clones, used by caches to
    /// evict exactly the entry that closed.
    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.shared) as usize
    }

    pub async fn write(&self, buf: &[u8]) -> Result<usize> {
        let mut writer = self.shared.writer.lock().await;
        let res = writer.write(buf).await;

        // Byte cap crossed during this write: close behind it. The write
        // itself already succeeded and reports normally.
        if res.is_ok() && self.shared.byte_cap_hit.load(Ordering::SeqCst) {
            match Self::close_locked(&mut writer, &self.shared).await {
                Ok(()) | Err(Error::AlreadyClosed) => {}
                Err(e) => tracing::warn!(error = %e, "byte-cap self-close failed"),
            }
        }
        res
    }

    pub async fn close(&self) -> Result<()> {
        let mut writer = self.shared.writer.lock().await;
        Self::close_locked(&mut writer, &self.shared).await
    }

    async fn close_locked(
        writer: &mut HookedWriter,
        shared: &SelfDestructShared,
    ) -> Result<()> {
        let res = writer.close().await;
        shared.timer_cancel.cancel();
        res
    }
}
