//! Kernel attach and table capabilities.
//!
//! The exporter core never talks to libbpf directly. It loads programs through
//! an [`Attacher`], attaches probes and opens tables through the resulting
//! [`ProbeModule`], and enumerates [`Table`]s as text key/value pairs. The
//! libbpf implementation lives in [`libbpf`] behind the `ebpf` feature.

pub mod layout;
#[cfg(feature = "ebpf")]
pub mod libbpf;

pub use layout::{KeyLayout, LayoutError};

use std::path::PathBuf;
use thiserror::Error;

use crate::config::Program;

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("failed to read object file {path}: {source}")]
    ReadObject {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("probe function {0:?} not found in object")]
    ProbeNotFound(String),

    #[error("table {0:?} not found in object")]
    TableNotFound(String),

    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[cfg(feature = "ebpf")]
    #[error(transparent)]
    Libbpf(#[from] libbpf_rs::Error),

    #[error("{0}")]
    Backend(String),
}

/// A probe function resolved inside a loaded module, ready to attach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    name: String,
}

impl ProbeTarget {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// One table row as text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    pub key: String,
    pub value: String,
}

impl RawEntry {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Read-only view of a kernel table.
pub trait Table {
    /// Enumerates the current contents. Every call is a fresh read.
    fn entries(&self) -> Result<Vec<RawEntry>, KernelError>;
}

/// A program loaded into the kernel.
pub trait ProbeModule: Send + Sync {
    fn resolve_probe(&mut self, name: &str) -> Result<ProbeTarget, KernelError>;

    /// Attaches `target` at entry of kernel function `symbol` (kprobe).
    fn attach_entry(&mut self, symbol: &str, target: &ProbeTarget) -> Result<(), KernelError>;

    /// Attaches `target` at return of kernel function `symbol` (kretprobe).
    fn attach_return(&mut self, symbol: &str, target: &ProbeTarget) -> Result<(), KernelError>;

    /// Opens table `name`; `layout` describes how its binary keys split into fields.
    fn open_table<'a>(
        &'a self,
        name: &str,
        layout: &KeyLayout,
    ) -> Result<Box<dyn Table + 'a>, KernelError>;
}

/// Loads program bytecode into the kernel.
pub trait Attacher {
    fn load_program(&self, program: &Program) -> Result<Box<dyn ProbeModule>, KernelError>;
}
