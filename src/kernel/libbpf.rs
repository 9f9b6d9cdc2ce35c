//! libbpf-backed attacher.
//!
//! Loads a compiled BPF object per program, attaches its kprobe/kretprobe
//! functions by name and reads its maps with `keys()` + `lookup()`.

use std::fs;
use std::sync::{Mutex, MutexGuard};

use libbpf_rs::{Link, MapCore, MapFlags, Object, ObjectBuilder};
use tracing::{debug, info};

use super::layout::render_value;
use super::{Attacher, KernelError, KeyLayout, ProbeModule, ProbeTarget, RawEntry, Table};
use crate::config::Program;

/// Attacher loading BPF objects from the paths in program configuration.
#[derive(Debug, Default)]
pub struct LibbpfAttacher;

impl LibbpfAttacher {
    pub fn new() -> Self {
        Self
    }
}

impl Attacher for LibbpfAttacher {
    fn load_program(&self, program: &Program) -> Result<Box<dyn ProbeModule>, KernelError> {
        let bytes = fs::read(&program.object).map_err(|source| KernelError::ReadObject {
            path: program.object.clone(),
            source,
        })?;

        let mut builder = ObjectBuilder::default();
        builder.debug(cfg!(debug_assertions));

        let open_obj = builder.open_memory(&bytes)?;
        let object = open_obj.load()?;

        info!(
            "Loaded BPF object {} for program {}",
            program.object.display(),
            program.name
        );

        Ok(Box::new(LibbpfModule {
            inner: Mutex::new(LibbpfInner {
                object,
                links: Vec::new(),
            }),
        }))
    }
}

struct LibbpfInner {
    object: Object,
    #[allow(dead_code)] // CRITICAL: Must be kept alive to prevent probe detachment
    links: Vec<Link>,
}

// SAFETY: LibbpfInner is only accessed through a Mutex, ensuring exclusive access.
// The Object and Link types from libbpf-rs are safe to send between threads when
// properly synchronized, which the Mutex provides.
unsafe impl Send for LibbpfInner {}

/// One loaded BPF object and the links attached from it.
pub struct LibbpfModule {
    inner: Mutex<LibbpfInner>,
}

impl LibbpfModule {
    fn lock(&self) -> Result<MutexGuard<'_, LibbpfInner>, KernelError> {
        self.inner
            .lock()
            .map_err(|_| KernelError::Backend("BPF object lock poisoned".to_string()))
    }

    fn attach(
        &mut self,
        symbol: &str,
        target: &ProbeTarget,
        retprobe: bool,
    ) -> Result<(), KernelError> {
        let inner = self
            .inner
            .get_mut()
            .map_err(|_| KernelError::Backend("BPF object lock poisoned".to_string()))?;

        let prog = inner
            .object
            .progs_mut()
            .find(|p| p.name().to_str() == Some(target.name()))
            .ok_or_else(|| KernelError::ProbeNotFound(target.name().to_string()))?;

        let link = prog.attach_kprobe(retprobe, symbol)?;
        inner.links.push(link);

        debug!(
            "Attached {} {} to {}",
            if retprobe { "kretprobe" } else { "kprobe" },
            target.name(),
            symbol
        );
        Ok(())
    }
}

impl ProbeModule for LibbpfModule {
    fn resolve_probe(&mut self, name: &str) -> Result<ProbeTarget, KernelError> {
        let inner = self.lock()?;
        if inner.object.progs().any(|p| p.name().to_str() == Some(name)) {
            Ok(ProbeTarget::new(name))
        } else {
            Err(KernelError::ProbeNotFound(name.to_string()))
        }
    }

    fn attach_entry(&mut self, symbol: &str, target: &ProbeTarget) -> Result<(), KernelError> {
        self.attach(symbol, target, false)
    }

    fn attach_return(&mut self, symbol: &str, target: &ProbeTarget) -> Result<(), KernelError> {
        self.attach(symbol, target, true)
    }

    fn open_table<'a>(
        &'a self,
        name: &str,
        layout: &KeyLayout,
    ) -> Result<Box<dyn Table + 'a>, KernelError> {
        layout.validate()?;
        {
            let inner = self.lock()?;
            if !inner.object.maps().any(|m| m.name().to_str() == Some(name)) {
                return Err(KernelError::TableNotFound(name.to_string()));
            }
        }

        Ok(Box::new(LibbpfTable {
            module: self,
            name: name.to_string(),
            layout: layout.clone(),
        }))
    }
}

struct LibbpfTable<'a> {
    module: &'a LibbpfModule,
    name: String,
    layout: KeyLayout,
}

impl Table for LibbpfTable<'_> {
    fn entries(&self) -> Result<Vec<RawEntry>, KernelError> {
        let inner = self.module.lock()?;
        let map = inner
            .object
            .maps()
            .find(|m| m.name().to_str() == Some(self.name.as_str()))
            .ok_or_else(|| KernelError::TableNotFound(self.name.clone()))?;

        let mut entries = Vec::new();
        for key in map.keys() {
            // Keys deleted between keys() and lookup() are simply gone.
            if let Some(value) = map.lookup(&key, MapFlags::ANY)? {
                entries.push(RawEntry {
                    key: self.layout.render_key(&key)?,
                    value: render_value(&value)?,
                });
            }
        }

        Ok(entries)
    }
}
