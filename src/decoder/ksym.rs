//! Kernel symbol resolution for the `ksym` decoder.

use ahash::AHashMap as HashMap;
use once_cell::sync::OnceCell;
use std::fs;
use std::path::PathBuf;
use tracing::debug;

use super::DecodeError;

const KALLSYMS_PATH: &str = "/proc/kallsyms";

/// Address to symbol name table, loaded from kallsyms on first use.
pub struct KernelSymbols {
    path: PathBuf,
    table: OnceCell<HashMap<u64, String>>,
}

impl Default for KernelSymbols {
    fn default() -> Self {
        Self {
            path: PathBuf::from(KALLSYMS_PATH),
            table: OnceCell::new(),
        }
    }
}

impl KernelSymbols {
    /// Builds the table from kallsyms-formatted text.
    pub fn from_kallsyms(content: &str) -> Self {
        Self {
            path: PathBuf::from(KALLSYMS_PATH),
            table: OnceCell::with_value(parse_kallsyms(content)),
        }
    }

    /// Returns the symbol at `addr`, or `unknown_addr:0x..` if there is none.
    pub fn resolve(&self, addr: u64) -> Result<String, DecodeError> {
        let table = self.table.get_or_try_init(|| {
            let content =
                fs::read_to_string(&self.path).map_err(|source| DecodeError::KernelSymbols {
                    path: self.path.display().to_string(),
                    source,
                })?;
            let table = parse_kallsyms(&content);
            debug!("Loaded {} kernel symbols from {}", table.len(), self.path.display());
            Ok::<_, DecodeError>(table)
        })?;

        Ok(table
            .get(&addr)
            .cloned()
            .unwrap_or_else(|| format!("unknown_addr:{:#x}", addr)))
    }
}

/// Parses `<addr> <type> <name> [module]` lines; the first name seen for an
/// address wins.
fn parse_kallsyms(content: &str) -> HashMap<u64, String> {
    let mut table = HashMap::new();
    for line in content.lines() {
        let mut parts = line.split_whitespace();
        let (Some(addr), Some(_kind), Some(name)) = (parts.next(), parts.next(), parts.next())
        else {
            continue;
        };
        if let Ok(addr) = u64::from_str_radix(addr, 16) {
            table.entry(addr).or_insert_with(|| name.to_string());
        }
    }
    table
}
