// Shared data buffers
//
// A DataBuffer is a named, optionally size-bounded sequence of f64 shared
// between producers (sensor feeds, network ingestion, user controls) and
// the analysis pipeline. Reads return a snapshot copy so the pipeline sees
// a stable view even while producers keep appending. Static buffers accept
// a single write generation and then ignore mutation, which is how fixed
// lookup tables are wired into a pipeline.

use crate::error::{Result, SensaError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Signal raised when a user-facing control writes into a buffer. The
/// scheduler holds the same signal to implement on-user-input gating.
#[derive(Default)]
pub struct UserInputSignal {
    pending: AtomicBool,
    notify: Notify,
}

impl UserInputSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.pending.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Consumes the pending flag, returning whether it was set.
    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::SeqCst)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    pub async fn wait(&self) {
        loop {
            if self.is_pending() {
                return;
            }
            let notified = self.notify.notified();
            // Re-check after registering: a raise between the check and
            // the registration must not be lost.
            if self.is_pending() {
                return;
            }
            notified.await;
        }
    }
}

struct BufferInner {
    contents: Vec<f64>,
    written: bool,
}

pub struct DataBuffer {
    name: String,
    /// Maximum element count; 0 means unbounded.
    size: usize,
    static_buffer: bool,
    base_contents: Vec<f64>,
    inner: RwLock<BufferInner>,
    user_input: RwLock<Option<Arc<UserInputSignal>>>,
}

impl DataBuffer {
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        Self::with_base(name, size, Vec::new(), false)
    }

    pub fn with_base(
        name: impl Into<String>,
        size: usize,
        base_contents: Vec<f64>,
        static_buffer: bool,
    ) -> Self {
        let buffer = Self {
            name: name.into(),
            size,
            static_buffer,
            base_contents: base_contents.clone(),
            inner: RwLock::new(BufferInner {
                contents: Vec::new(),
                written: false,
            }),
            user_input: RwLock::new(None),
        };
        buffer.append_slice(&base_contents);
        buffer
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configured capacity; 0 means unbounded.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_static(&self) -> bool {
        self.static_buffer
    }

    fn effective_size(&self) -> usize {
        if self.size == 0 {
            usize::MAX
        } else {
            self.size
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().contents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().contents.is_empty()
    }

    /// Snapshot copy of the contents.
    pub fn to_vec(&self) -> Vec<f64> {
        self.inner.read().contents.clone()
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        self.inner.read().contents.get(index).copied()
    }

    pub fn first(&self) -> Option<f64> {
        self.inner.read().contents.first().copied()
    }

    pub fn last(&self) -> Option<f64> {
        self.inner.read().contents.last().copied()
    }

    pub fn append(&self, value: f64) {
        let mut inner = self.inner.write();
        if self.static_buffer && inner.written {
            return;
        }
        inner.written = true;
        inner.contents.push(value);
        if inner.contents.len() > self.effective_size() {
            inner.contents.remove(0);
        }
    }

    pub fn append_slice(&self, values: &[f64]) {
        if values.is_empty() {
            return;
        }
        let mut inner = self.inner.write();
        if self.static_buffer && inner.written {
            return;
        }
        inner.written = true;
        inner.contents.extend_from_slice(values);
        let max = self.effective_size();
        if inner.contents.len() > max {
            let cut = inner.contents.len() - max;
            inner.contents.drain(..cut);
        }
    }

    /// Replaces the whole contents, keeping only the newest `size` values.
    pub fn replace(&self, values: &[f64]) {
        let mut inner = self.inner.write();
        if self.static_buffer && inner.written {
            return;
        }
        inner.written = true;
        let max = self.effective_size();
        let skip = values.len().saturating_sub(max);
        inner.contents.clear();
        inner.contents.extend_from_slice(&values[skip..]);
    }

    /// Restores the base contents. Ignored for a static buffer that has
    /// already been written.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        if self.static_buffer && inner.written {
            return;
        }
        inner.contents.clear();
        inner.contents.extend_from_slice(&self.base_contents);
    }

    /// Binds this buffer to a user-input signal; `trigger_user_input` will
    /// raise it.
    pub fn bind_user_input(&self, signal: Arc<UserInputSignal>) {
        *self.user_input.write() = Some(signal);
    }

    /// Called by user-facing controls after writing an edited value.
    pub fn trigger_user_input(&self) {
        if let Some(signal) = self.user_input.read().as_ref() {
            signal.raise();
        }
    }
}

/// Name -> buffer map owned by an experiment session. Module construction
/// resolves buffer references against it; a miss is a construction error.
#[derive(Default)]
pub struct BufferRegistry {
    buffers: HashMap<String, Arc<DataBuffer>>,
}

impl BufferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, buffer: DataBuffer) -> Result<Arc<DataBuffer>> {
        let name = buffer.name().to_string();
        if self.buffers.contains_key(&name) {
            return Err(SensaError::DuplicateBuffer(name));
        }
        let buffer = Arc::new(buffer);
        self.buffers.insert(name, buffer.clone());
        Ok(buffer)
    }

    pub fn get(&self, name: &str) -> Result<Arc<DataBuffer>> {
        self.buffers
            .get(name)
            .cloned()
            .ok_or_else(|| SensaError::UnknownBuffer(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.buffers.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.buffers.keys().map(|k| k.as_str())
    }

    /// Clears every non-static buffer back to its base contents.
    pub fn clear_dynamic(&self) {
        for buffer in self.buffers.values() {
            if !buffer.is_static() {
                buffer.clear();
            }
        }
    }
}
