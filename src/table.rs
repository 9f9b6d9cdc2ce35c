//! Kernel table reading.
//!
//! Turns the text rows of a kernel table into [`MetricValue`]s: the key is
//! split into positional fields, every field is decoded through its label,
//! and the value is parsed as an unsigned integer.

use thiserror::Error;

use crate::config::Label;
use crate::decoder::{DecodeError, Decoded, LabelDecoder};
use crate::kernel::{KernelError, KeyLayout, ProbeModule};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid unsigned integer literal {0:?}")]
pub struct InvalidLiteral(pub String);

/// Parses an unsigned 64-bit integer, detecting the base from its prefix:
/// `0x` hex, `0o` or a bare leading `0` octal, `0b` binary, decimal otherwise.
pub fn parse_u64_literal(s: &str) -> Result<u64, InvalidLiteral> {
    let invalid = || InvalidLiteral(s.to_string());

    let (digits, radix) = if let Some(rest) = strip_prefix_ci(s, "0x") {
        (rest, 16)
    } else if let Some(rest) = strip_prefix_ci(s, "0o") {
        (rest, 8)
    } else if let Some(rest) = strip_prefix_ci(s, "0b") {
        (rest, 2)
    } else if s.len() > 1 && s.starts_with('0') {
        (&s[1..], 8)
    } else {
        (s, 10)
    };

    // from_str_radix tolerates a leading '+', literals don't.
    if digits.is_empty() || digits.starts_with('+') {
        return Err(invalid());
    }
    u64::from_str_radix(digits, radix).map_err(|_| invalid())
}

fn strip_prefix_ci<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    match s.get(..prefix.len()) {
        Some(head) if head.eq_ignore_ascii_case(prefix) => Some(&s[prefix.len()..]),
        _ => None,
    }
}

/// One decoded table row.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricValue {
    /// Key exactly as the table rendered it.
    pub raw: String,
    /// Decoded label values, in label order.
    pub labels: Vec<String>,
    pub value: f64,
}

#[derive(Debug, Error)]
pub enum TableReadError {
    #[error("failed to open table {table:?}: {source}")]
    Open {
        table: String,
        #[source]
        source: KernelError,
    },

    #[error("failed to read table {table:?}: {source}")]
    Enumerate {
        table: String,
        #[source]
        source: KernelError,
    },

    #[error("key {key:?} has {actual} elements, but we expect {expected}")]
    FieldCount {
        key: String,
        actual: usize,
        expected: usize,
    },

    #[error("error decoding {field:?} for label {label:?}: {source}")]
    Decode {
        field: String,
        label: String,
        #[source]
        source: DecodeError,
    },

    #[error("value {value:?} for key {labels:?} cannot be parsed as uint64: {source}")]
    Value {
        value: String,
        labels: Vec<String>,
        #[source]
        source: InvalidLiteral,
    },
}

/// Splits a rendered key like `{ sda 0x1 }` into its fields and checks the
/// field count against the number of labels.
pub fn split_key(raw: &str, expected: usize) -> Result<Vec<&str>, TableReadError> {
    let fields: Vec<&str> = raw
        .trim_matches(|c| matches!(c, '{' | '}' | ' '))
        .split_whitespace()
        .collect();

    if fields.len() != expected {
        return Err(TableReadError::FieldCount {
            key: raw.to_string(),
            actual: fields.len(),
            expected,
        });
    }
    Ok(fields)
}

/// Reads every row of `table`, decoding key fields through `labels`.
///
/// Rows with a skipped field are dropped. Any other failure fails the whole
/// table. Rows come back in enumeration order.
pub fn read_table(
    module: &dyn ProbeModule,
    table: &str,
    labels: &[Label],
    decoder: &dyn LabelDecoder,
) -> Result<Vec<MetricValue>, TableReadError> {
    let handle = module
        .open_table(table, &KeyLayout::from_labels(labels))
        .map_err(|source| TableReadError::Open {
            table: table.to_string(),
            source,
        })?;

    let entries = handle
        .entries()
        .map_err(|source| TableReadError::Enumerate {
            table: table.to_string(),
            source,
        })?;

    let mut values = Vec::with_capacity(entries.len());

    'rows: for entry in entries {
        let fields = split_key(&entry.key, labels.len())?;

        let mut decoded = Vec::with_capacity(labels.len());
        for (field, label) in fields.iter().zip(labels) {
            let result = decoder
                .decode(field, label)
                .map_err(|source| TableReadError::Decode {
                    field: field.to_string(),
                    label: label.name.clone(),
                    source,
                })?;

            match result {
                Decoded::Value(v) => decoded.push(v),
                Decoded::Skip => continue 'rows,
            }
        }

        let value = parse_u64_literal(&entry.value).map_err(|source| TableReadError::Value {
            value: entry.value.clone(),
            labels: decoded.clone(),
            source,
        })?;

        values.push(MetricValue {
            raw: entry.key,
            labels: decoded,
            value: value as f64,
        });
    }

    Ok(values)
}
