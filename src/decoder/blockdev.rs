//! Block device name resolution for the `majorminor` decoder.

use dashmap::DashMap;
use std::fs;
use std::path::{Path, PathBuf};

const SYS_DEV_BLOCK: &str = "/sys/dev/block";

// Kernel-internal dev_t layout (MINORBITS = 20).
const MINOR_BITS: u64 = 20;
const MINOR_MASK: u64 = (1 << MINOR_BITS) - 1;

/// Resolves major:minor device numbers to names like "sda" or "nvme0n1".
pub struct BlockDevices {
    root: PathBuf,
    names: DashMap<(u32, u32), String>,
}

impl Default for BlockDevices {
    fn default() -> Self {
        Self::new(SYS_DEV_BLOCK)
    }
}

impl BlockDevices {
    /// Uses `root` in place of /sys/dev/block.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            names: DashMap::new(),
        }
    }

    /// Resolves a kernel dev_t value.
    pub fn resolve_dev(&self, dev: u64) -> String {
        let major = (dev >> MINOR_BITS) as u32;
        let minor = (dev & MINOR_MASK) as u32;
        self.resolve(major, minor)
    }

    /// Resolves a device name from major:minor numbers, falling back to
    /// `major:minor` notation. Only successful lookups are cached.
    pub fn resolve(&self, major: u32, minor: u32) -> String {
        if let Some(name) = self.names.get(&(major, minor)) {
            return name.clone();
        }

        let path = self.root.join(format!("{}:{}", major, minor)).join("uevent");
        if let Ok(content) = fs::read_to_string(&path) {
            if let Some(name) = content.lines().find_map(|l| l.strip_prefix("DEVNAME=")) {
                let name = name.to_string();
                self.names.insert((major, minor), name.clone());
                return name;
            }
        }

        format!("{}:{}", major, minor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolves_devname_from_uevent() {
        let dir = tempfile::tempdir().unwrap();
        let dev_dir = dir.path().join("259:0");
        fs::create_dir_all(&dev_dir).unwrap();
        fs::write(
            dev_dir.join("uevent"),
            "MAJOR=259\nMINOR=0\nDEVNAME=nvme0n1\nDEVTYPE=disk\n",
        )
        .unwrap();

        let devices = BlockDevices::new(dir.path());
        assert_eq!(devices.resolve(259, 0), "nvme0n1");
        assert_eq!(devices.resolve_dev(259 << 20), "nvme0n1");
    }

    #[test]
    fn test_fallback_notation() {
        let dir = tempfile::tempdir().unwrap();
        let devices = BlockDevices::new(dir.path());
        assert_eq!(devices.resolve_dev((8 << 20) | 16), "8:16");
    }
}
