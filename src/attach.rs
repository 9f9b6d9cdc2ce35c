//! Program attachment.
//!
//! Loads every configured program once and attaches its kprobes and
//! kretprobes in configured order. Attachment is all-or-nothing from the
//! caller's point of view: the first failure is returned and the exporter
//! must not start serving. Programs attached before the failure are left as
//! they are.

use ahash::AHashMap as HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{ProbeDirective, Program};
use crate::kernel::{Attacher, KernelError, ProbeModule};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    Kprobe,
    Kretprobe,
}

impl ProbeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeKind::Kprobe => "kprobe",
            ProbeKind::Kretprobe => "kretprobe",
        }
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum AttachError {
    #[error("multiple programs with name {0:?}")]
    DuplicateProgram(String),

    #[error("error loading module for program {program:?}: {source}")]
    Load {
        program: String,
        #[source]
        source: KernelError,
    },

    #[error("failed to load target {probe:?} for {kind} {symbol:?} in program {program:?}: {source}")]
    Resolve {
        program: String,
        kind: ProbeKind,
        symbol: String,
        probe: String,
        #[source]
        source: KernelError,
    },

    #[error("failed to attach {kind} {probe:?} to {symbol:?} in program {program:?}: {source}")]
    Attach {
        program: String,
        kind: ProbeKind,
        symbol: String,
        probe: String,
        #[source]
        source: KernelError,
    },
}

struct AttachedProgram {
    module: Box<dyn ProbeModule>,
    kprobes: usize,
    kretprobes: usize,
}

/// Loaded modules by program name, kept for the process lifetime.
#[derive(Default)]
pub struct Attachments {
    programs: HashMap<String, AttachedProgram>,
}

impl Attachments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches all programs in order, stopping at the first error.
    pub fn attach_all(
        &mut self,
        attacher: &dyn Attacher,
        programs: &[Program],
    ) -> Result<(), AttachError> {
        for program in programs {
            self.attach(attacher, program)?;
        }
        info!("Attached {} program(s)", self.programs.len());
        Ok(())
    }

    /// Loads one program and attaches its probes.
    pub fn attach(&mut self, attacher: &dyn Attacher, program: &Program) -> Result<(), AttachError> {
        if self.programs.contains_key(&program.name) {
            return Err(AttachError::DuplicateProgram(program.name.clone()));
        }

        let mut module = attacher
            .load_program(program)
            .map_err(|source| AttachError::Load {
                program: program.name.clone(),
                source,
            })?;

        for directive in &program.kprobes {
            attach_probe(module.as_mut(), program, directive, ProbeKind::Kprobe)?;
        }
        for directive in &program.kretprobes {
            attach_probe(module.as_mut(), program, directive, ProbeKind::Kretprobe)?;
        }

        info!(
            "Program {}: {} kprobe(s), {} kretprobe(s) attached",
            program.name,
            program.kprobes.len(),
            program.kretprobes.len()
        );

        self.programs.insert(
            program.name.clone(),
            AttachedProgram {
                module,
                kprobes: program.kprobes.len(),
                kretprobes: program.kretprobes.len(),
            },
        );
        Ok(())
    }

    /// Module attached for `program`, if any.
    pub fn module(&self, program: &str) -> Option<&dyn ProbeModule> {
        self.programs.get(program).map(|p| p.module.as_ref())
    }

    /// Number of probes of `kind` attached for `program`.
    pub fn probe_count(&self, program: &str, kind: ProbeKind) -> usize {
        self.programs.get(program).map_or(0, |p| match kind {
            ProbeKind::Kprobe => p.kprobes,
            ProbeKind::Kretprobe => p.kretprobes,
        })
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }
}

fn attach_probe(
    module: &mut dyn ProbeModule,
    program: &Program,
    directive: &ProbeDirective,
    kind: ProbeKind,
) -> Result<(), AttachError> {
    let target = module
        .resolve_probe(&directive.probe)
        .map_err(|source| AttachError::Resolve {
            program: program.name.clone(),
            kind,
            symbol: directive.symbol.clone(),
            probe: directive.probe.clone(),
            source,
        })?;

    let result = match kind {
        ProbeKind::Kprobe => module.attach_entry(&directive.symbol, &target),
        ProbeKind::Kretprobe => module.attach_return(&directive.symbol, &target),
    };
    result.map_err(|source| AttachError::Attach {
        program: program.name.clone(),
        kind,
        symbol: directive.symbol.clone(),
        probe: directive.probe.clone(),
        source,
    })?;

    debug!(
        "Program {}: {} {} -> {}",
        program.name, kind, directive.symbol, directive.probe
    );
    Ok(())
}
