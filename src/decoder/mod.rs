//! Label decoders.
//!
//! A label's decoders turn one raw key field (as rendered from the kernel
//! table) into the exported label value. Decoders run in configured order,
//! each one consuming the previous output. A decoder may also ask for the
//! whole row to be dropped by returning [`Decoded::Skip`]; that is not an
//! error.

mod blockdev;
mod ksym;

pub use blockdev::BlockDevices;
pub use ksym::KernelSymbols;

use dashmap::DashMap;
use regex::Regex;
use thiserror::Error;

use crate::config::{DecoderConfig, Label};
use crate::table::{parse_u64_literal, InvalidLiteral};

/// Decoder names accepted in configuration.
pub const KNOWN_DECODERS: &[&str] = &["string", "uint", "static_map", "regexp", "ksym", "majorminor"];

/// Outcome of a successful decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Value(String),
    /// Drop the whole row this field belongs to.
    Skip,
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unknown decoder {0:?}")]
    UnknownDecoder(String),

    #[error(transparent)]
    InvalidUint(#[from] InvalidLiteral),

    #[error("invalid regexp {pattern:?}: {source}")]
    InvalidRegexp {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("failed to read kernel symbols from {path}: {source}")]
    KernelSymbols {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Capability used by the table reader to decode one key field.
pub trait LabelDecoder: Send + Sync {
    fn decode(&self, raw: &str, label: &Label) -> Result<Decoded, DecodeError>;
}

/// Built-in decoders, with the caches they need.
pub struct DecoderSet {
    regexps: DashMap<String, Regex>,
    ksyms: KernelSymbols,
    block_devices: BlockDevices,
}

impl Default for DecoderSet {
    fn default() -> Self {
        Self::new()
    }
}

impl DecoderSet {
    pub fn new() -> Self {
        Self::with_sources(KernelSymbols::default(), BlockDevices::default())
    }

    /// Uses the given symbol and block device sources instead of the system ones.
    pub fn with_sources(ksyms: KernelSymbols, block_devices: BlockDevices) -> Self {
        Self {
            regexps: DashMap::new(),
            ksyms,
            block_devices,
        }
    }

    fn apply(&self, input: &str, decoder: &DecoderConfig) -> Result<Decoded, DecodeError> {
        match decoder.name.as_str() {
            "string" => Ok(Decoded::Value(decode_string(input))),
            "uint" => Ok(Decoded::Value(parse_u64_literal(input)?.to_string())),
            "static_map" => Ok(Decoded::Value(
                decoder
                    .static_map
                    .get(input)
                    .cloned()
                    .unwrap_or_else(|| format!("unknown:{}", input)),
            )),
            "regexp" => self.decode_regexp(input, &decoder.regexps),
            "ksym" => {
                let addr = parse_u64_literal(input)?;
                Ok(Decoded::Value(self.ksyms.resolve(addr)?))
            }
            "majorminor" => {
                let dev = parse_u64_literal(input)?;
                Ok(Decoded::Value(self.block_devices.resolve_dev(dev)))
            }
            other => Err(DecodeError::UnknownDecoder(other.to_string())),
        }
    }

    fn decode_regexp(&self, input: &str, patterns: &[String]) -> Result<Decoded, DecodeError> {
        for pattern in patterns {
            if self.compiled(pattern)?.is_match(input) {
                return Ok(Decoded::Value(input.to_string()));
            }
        }
        Ok(Decoded::Skip)
    }

    fn compiled(&self, pattern: &str) -> Result<Regex, DecodeError> {
        if let Some(re) = self.regexps.get(pattern) {
            return Ok(re.clone());
        }
        let re = Regex::new(pattern).map_err(|source| DecodeError::InvalidRegexp {
            pattern: pattern.to_string(),
            source,
        })?;
        self.regexps.insert(pattern.to_string(), re.clone());
        Ok(re)
    }
}

impl LabelDecoder for DecoderSet {
    fn decode(&self, raw: &str, label: &Label) -> Result<Decoded, DecodeError> {
        let mut value = raw.to_string();
        for decoder in &label.decoders {
            match self.apply(&value, decoder)? {
                Decoded::Value(next) => value = next,
                Decoded::Skip => return Ok(Decoded::Skip),
            }
        }
        Ok(Decoded::Value(value))
    }
}

/// Strips the double quotes char arrays are rendered with.
fn decode_string(input: &str) -> String {
    input
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(input)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn label(decoders: Vec<DecoderConfig>) -> Label {
        Label {
            name: "field".into(),
            size: None,
            decoders,
        }
    }

    fn static_map(pairs: &[(&str, &str)]) -> DecoderConfig {
        DecoderConfig {
            name: "static_map".into(),
            static_map: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
            ..Default::default()
        }
    }

    fn value(s: &str) -> Decoded {
        Decoded::Value(s.to_string())
    }

    #[test]
    fn test_no_decoders_passes_through() {
        let set = DecoderSet::new();
        assert_eq!(set.decode("sda", &label(vec![])).unwrap(), value("sda"));
    }

    #[test]
    fn test_string_decoder_strips_quotes() {
        let set = DecoderSet::new();
        let l = label(vec![DecoderConfig::named("string")]);
        assert_eq!(set.decode("\"kworker\"", &l).unwrap(), value("kworker"));
        assert_eq!(set.decode("bare", &l).unwrap(), value("bare"));
    }

    #[test]
    fn test_uint_decoder_handles_prefixes() {
        let set = DecoderSet::new();
        let l = label(vec![DecoderConfig::named("uint")]);
        assert_eq!(set.decode("0x10", &l).unwrap(), value("16"));
        assert_eq!(set.decode("42", &l).unwrap(), value("42"));
        assert!(matches!(
            set.decode("nope", &l),
            Err(DecodeError::InvalidUint(_))
        ));
    }

    #[test]
    fn test_uint_then_static_map_chain() {
        let set = DecoderSet::new();
        let l = label(vec![
            DecoderConfig::named("uint"),
            static_map(&[("1", "read"), ("2", "write")]),
        ]);
        assert_eq!(set.decode("0x1", &l).unwrap(), value("read"));
        assert_eq!(set.decode("0x2", &l).unwrap(), value("write"));
        assert_eq!(set.decode("0x7", &l).unwrap(), value("unknown:7"));
    }

    #[test]
    fn test_regexp_skips_non_matching() {
        let set = DecoderSet::new();
        let mut re = DecoderConfig::named("regexp");
        re.regexps = vec!["^sd".into(), "^nvme".into()];
        let l = label(vec![re]);

        assert_eq!(set.decode("sda", &l).unwrap(), value("sda"));
        assert_eq!(set.decode("nvme0n1", &l).unwrap(), value("nvme0n1"));
        assert_eq!(set.decode("loop0", &l).unwrap(), Decoded::Skip);
    }

    #[test]
    fn test_skip_short_circuits_chain() {
        let set = DecoderSet::new();
        let mut re = DecoderConfig::named("regexp");
        re.regexps = vec!["^keep$".into()];
        // The unknown decoder after the skip is never reached.
        let l = label(vec![re, DecoderConfig::named("bogus")]);
        assert_eq!(set.decode("drop", &l).unwrap(), Decoded::Skip);
    }

    #[test]
    fn test_invalid_regexp_is_an_error() {
        let set = DecoderSet::new();
        let mut re = DecoderConfig::named("regexp");
        re.regexps = vec!["(".into()];
        assert!(matches!(
            set.decode("x", &label(vec![re])),
            Err(DecodeError::InvalidRegexp { .. })
        ));
    }

    #[test]
    fn test_unknown_decoder_is_an_error() {
        let set = DecoderSet::new();
        let err = set
            .decode("x", &label(vec![DecoderConfig::named("bogus")]))
            .unwrap_err();
        assert_eq!(err.to_string(), "unknown decoder \"bogus\"");
    }

    #[test]
    fn test_ksym_and_majorminor_use_sources() {
        let ksyms = KernelSymbols::from_kallsyms("ffffffff81000000 T _text\nffffffff81234560 t blk_mq_start_request\n");
        let dir = tempfile::tempdir().unwrap();
        let set = DecoderSet::with_sources(ksyms, BlockDevices::new(dir.path()));

        let l = label(vec![DecoderConfig::named("ksym")]);
        assert_eq!(
            set.decode("0xffffffff81234560", &l).unwrap(),
            value("blk_mq_start_request")
        );

        let l = label(vec![DecoderConfig::named("majorminor")]);
        assert_eq!(set.decode("0x800001", &l).unwrap(), value("8:1"));
    }
}
