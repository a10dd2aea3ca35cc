// Module input/output bindings
//
// Inputs resolve to a buffer (with a keep/consume flag), a literal value,
// or an empty placeholder. Outputs resolve to a buffer that is either
// cleared before each write (default) or appended to. Buffer reads go
// through snapshot copies; modules never hold a lock across their update.

use crate::buffer::DataBuffer;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub enum InputSource {
    Buffer {
        buffer: Arc<DataBuffer>,
        /// When false the buffer is consumed (cleared) after the owning
        /// module's update.
        keep: bool,
    },
    Value(f64),
    Empty,
}

pub struct InputBinding {
    role: Option<String>,
    source: InputSource,
}

impl InputBinding {
    pub fn new(role: Option<String>, source: InputSource) -> Self {
        Self { role, source }
    }

    pub fn role(&self) -> Option<&str> {
        self.role.as_deref()
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.role.as_deref() == Some(role)
    }

    pub fn is_buffer(&self) -> bool {
        matches!(self.source, InputSource::Buffer { .. })
    }

    pub fn buffer(&self) -> Option<&Arc<DataBuffer>> {
        match &self.source {
            InputSource::Buffer { buffer, .. } => Some(buffer),
            _ => None,
        }
    }

    /// Snapshot of the input as a vector. Literal values become a
    /// one-element vector, the empty placeholder an empty one.
    pub fn values(&self) -> Vec<f64> {
        match &self.source {
            InputSource::Buffer { buffer, .. } => buffer.to_vec(),
            InputSource::Value(value) => vec![*value],
            InputSource::Empty => Vec::new(),
        }
    }

    /// Latest value of a buffer input, the literal for a value input.
    pub fn single_value(&self) -> Option<f64> {
        match &self.source {
            InputSource::Buffer { buffer, .. } => buffer.last(),
            InputSource::Value(value) => Some(*value),
            InputSource::Empty => None,
        }
    }

    pub fn single_value_as_int(&self) -> Option<i64> {
        self.single_value().and_then(|v| {
            if v.is_finite() && v > i64::MIN as f64 && v < i64::MAX as f64 {
                Some(v as i64)
            } else {
                None
            }
        })
    }

    /// Clears a consumed (keep == false) buffer input. Called by the
    /// harness after the owning module's update.
    pub(crate) fn consume(&self) {
        if let InputSource::Buffer { buffer, keep: false } = &self.source {
            buffer.clear();
        }
    }
}

/// Whether an output buffer is wiped before each write or appended to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputMode {
    Clear,
    Append,
}

impl Default for OutputMode {
    fn default() -> Self {
        Self::Clear
    }
}

pub struct OutputBinding {
    role: Option<String>,
    buffer: Arc<DataBuffer>,
    mode: OutputMode,
}

impl OutputBinding {
    pub fn new(role: Option<String>, buffer: Arc<DataBuffer>, mode: OutputMode) -> Self {
        Self { role, buffer, mode }
    }

    pub fn role(&self) -> Option<&str> {
        self.role.as_deref()
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.role.as_deref() == Some(role)
    }

    pub fn buffer(&self) -> &Arc<DataBuffer> {
        &self.buffer
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    /// Capacity of the underlying buffer (0 = unbounded); generators use
    /// this as their default length.
    pub fn capacity(&self) -> usize {
        self.buffer.size()
    }

    pub fn append(&self, value: f64) {
        self.buffer.append(value);
    }

    pub fn append_slice(&self, values: &[f64]) {
        self.buffer.append_slice(values);
    }

    /// Wipes clear-mode outputs ahead of the owning module's update.
    pub(crate) fn prepare(&self) {
        if self.mode == OutputMode::Clear {
            self.buffer.clear();
        }
    }
}
