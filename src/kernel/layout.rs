//! Text rendering of binary map keys and values.
//!
//! Keys render as `{ f1 f2 ... }`: integer fields (1, 2, 4 or 8 bytes) as
//! native-endian `0x..` hex, any other width as a quoted NUL-terminated
//! string. Values render as decimal integers.
//!
//! Fields sit where a C compiler puts them: integers on their natural
//! alignment, char arrays on any byte, and the key padded at the end to its
//! widest integer.

use thiserror::Error;

use crate::config::Label;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LayoutError {
    #[error("label {0:?} has no size, cannot split binary keys")]
    MissingSize(String),

    #[error("key is {actual} bytes, but the label layout needs {expected}")]
    KeySize { expected: usize, actual: usize },

    #[error("unsupported value size {0} (expected 4 or 8 bytes)")]
    ValueSize(usize),
}

/// Field widths of a compound key, taken from the labels describing it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyLayout {
    fields: Vec<(String, Option<usize>)>,
}

impl KeyLayout {
    pub fn from_labels(labels: &[Label]) -> Self {
        Self {
            fields: labels.iter().map(|l| (l.name.clone(), l.size)).collect(),
        }
    }

    fn sizes(&self) -> Result<Vec<usize>, LayoutError> {
        self.fields
            .iter()
            .map(|(name, size)| size.ok_or_else(|| LayoutError::MissingSize(name.clone())))
            .collect()
    }

    /// Checks that every field has a width.
    pub fn validate(&self) -> Result<(), LayoutError> {
        self.sizes().map(|_| ())
    }

    /// Byte ranges of each field plus the padded key length.
    fn offsets(&self) -> Result<(Vec<(usize, usize)>, usize), LayoutError> {
        let mut ranges = Vec::with_capacity(self.fields.len());
        let mut offset = 0;
        let mut struct_align = 1;
        for size in self.sizes()? {
            let align = field_align(size);
            struct_align = struct_align.max(align);
            offset = align_up(offset, align);
            ranges.push((offset, offset + size));
            offset += size;
        }
        Ok((ranges, align_up(offset, struct_align)))
    }

    pub fn render_key(&self, key: &[u8]) -> Result<String, LayoutError> {
        let (ranges, expected) = self.offsets()?;
        if expected != key.len() {
            return Err(LayoutError::KeySize {
                expected,
                actual: key.len(),
            });
        }

        let mut out = String::from("{");
        for (start, end) in ranges {
            out.push(' ');
            out.push_str(&render_field(&key[start..end]));
        }
        out.push_str(" }");
        Ok(out)
    }
}

fn field_align(size: usize) -> usize {
    match size {
        1 | 2 | 4 | 8 => size,
        _ => 1,
    }
}

fn align_up(offset: usize, align: usize) -> usize {
    offset.div_ceil(align) * align
}

fn render_field(bytes: &[u8]) -> String {
    let n = match bytes.len() {
        1 => u64::from(bytes[0]),
        2 => u64::from(u16::from_ne_bytes([bytes[0], bytes[1]])),
        4 => u64::from(u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
        8 => {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(bytes);
            u64::from_ne_bytes(buf)
        }
        _ => {
            let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
            return format!("\"{}\"", String::from_utf8_lossy(&bytes[..end]));
        }
    };
    format!("{:#x}", n)
}

/// Renders a 4 or 8 byte counter value in decimal.
pub fn render_value(value: &[u8]) -> Result<String, LayoutError> {
    let n = match value.len() {
        8 => {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(value);
            u64::from_ne_bytes(buf)
        }
        4 => u64::from(u32::from_ne_bytes([value[0], value[1], value[2], value[3]])),
        other => return Err(LayoutError::ValueSize(other)),
    };
    Ok(n.to_string())
}
