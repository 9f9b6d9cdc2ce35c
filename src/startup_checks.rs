//! Startup requirement validation for ebpf-exporter.
//!
//! Checks that the host can load BPF objects and attach kprobes before any
//! program is loaded, so failures come with a hint instead of a bare errno.

use nix::unistd::geteuid;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use ebpf_exporter::config::Config;

const BTF_VMLINUX: &str = "/sys/kernel/btf/vmlinux";
const KPROBE_EVENTS: &[&str] = &[
    "/sys/kernel/tracing/kprobe_events",
    "/sys/kernel/debug/tracing/kprobe_events",
];

/// Validate all runtime requirements
pub fn validate_requirements(config: &Config) -> Result<(), ValidationError> {
    info!("🔍 Validating runtime requirements...");

    check_user_privileges()?;
    check_kprobe_support()?;
    check_btf_support();
    check_objects(config)?;

    info!("✅ All runtime requirements validated");
    Ok(())
}

/// Loading BPF programs needs root (or CAP_BPF + CAP_PERFMON).
fn check_user_privileges() -> Result<(), ValidationError> {
    if !geteuid().is_root() {
        warn!("⚠️  Not running as root - loading BPF programs will likely fail");
        warn!("   Recommendation: run as root or grant CAP_BPF and CAP_PERFMON");
    } else {
        info!("✅ Running as root (uid=0)");
    }
    Ok(())
}

fn check_kprobe_support() -> Result<(), ValidationError> {
    match KPROBE_EVENTS.iter().find(|p| Path::new(p).exists()) {
        Some(path) => {
            debug!("kprobe events available at {}", path);
            info!("✅ Kernel kprobe support available");
            Ok(())
        }
        None => {
            error!("❌ No kprobe_events file found - is tracefs mounted?");
            error!("   Solution: mount -t tracefs nodev /sys/kernel/tracing");
            Err(ValidationError::KprobesUnavailable)
        }
    }
}

fn check_btf_support() {
    if !Path::new(BTF_VMLINUX).exists() {
        warn!("⚠️  {} not found - BTF support missing", BTF_VMLINUX);
        warn!("   CO-RE objects will fail to load. Enable CONFIG_DEBUG_INFO_BTF");
    } else {
        info!("✅ BTF support available");
    }

    if let Ok(version) = fs::read_to_string("/proc/version") {
        debug!("Kernel version: {}", version.lines().next().unwrap_or("unknown"));
    }
}

/// Every configured object file must be readable.
fn check_objects(config: &Config) -> Result<(), ValidationError> {
    for program in &config.programs {
        if let Err(e) = fs::metadata(&program.object) {
            error!(
                "❌ Object {} for program {} is not accessible: {}",
                program.object.display(),
                program.name,
                e
            );
            return Err(ValidationError::ObjectMissing(program.object.clone()));
        }
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("kernel kprobe events interface not available")]
    KprobesUnavailable,

    #[error("BPF object file not accessible: {0}")]
    ObjectMissing(PathBuf),
}
