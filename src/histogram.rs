//! Histogram assembly.
//!
//! Histogram tables hold one row per (group labels..., bucket boundary) with
//! the raw count of that bucket:
//!
//! ```text
//! [sda, read, 1] -> 10
//! [sda, read, 2] -> 2
//! [sda, read, 4] -> 5
//! ```
//!
//! [`group_rows`] folds these into `[sda, read] -> {1: 10, 2: 2, 4: 5}` and
//! [`cumulative`] turns each group into Prometheus buckets
//! `{1: 10, 2: 12, 4: 17}`. The kernel only reports bucket counts, so the sum
//! is always zero and there is no `+Inf` bucket: programs must cap the
//! boundary themselves.

use ahash::AHashMap as HashMap;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::table::{parse_u64_literal, InvalidLiteral, MetricValue};

/// Rows sharing the same group labels, by bucket boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramGroup {
    pub labels: Vec<String>,
    pub buckets: BTreeMap<u64, u64>,
}

#[derive(Debug, Error)]
pub enum BucketError {
    #[error("row {raw:?} has no bucket label")]
    MissingBucket { raw: String },

    #[error("error parsing bucket boundary for {labels:?}: {source}")]
    Boundary {
        labels: Vec<String>,
        #[source]
        source: InvalidLiteral,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HistogramError {
    #[error("histogram has no buckets")]
    Empty,

    #[error("cumulative count overflows at bucket {boundary}")]
    Overflow { boundary: u64 },
}

/// Groups rows by every label but the last, which is parsed as the bucket
/// boundary. Groups keep first-seen order; a repeated boundary within a group
/// keeps the last count. One unparsable boundary fails the whole table.
pub fn group_rows(rows: &[MetricValue]) -> Result<Vec<HistogramGroup>, BucketError> {
    let mut groups: Vec<HistogramGroup> = Vec::new();
    let mut index: HashMap<Vec<String>, usize> = HashMap::new();

    for row in rows {
        let (bucket, labels) = row
            .labels
            .split_last()
            .ok_or_else(|| BucketError::MissingBucket {
                raw: row.raw.clone(),
            })?;

        let boundary = parse_u64_literal(bucket).map_err(|source| BucketError::Boundary {
            labels: row.labels.clone(),
            source,
        })?;

        let slot = match index.get(labels) {
            Some(&i) => i,
            None => {
                index.insert(labels.to_vec(), groups.len());
                groups.push(HistogramGroup {
                    labels: labels.to_vec(),
                    buckets: BTreeMap::new(),
                });
                groups.len() - 1
            }
        };

        groups[slot].buckets.insert(boundary, row.value as u64);
    }

    Ok(groups)
}

/// Cumulative buckets of one histogram group.
#[derive(Debug, Clone, PartialEq)]
pub struct CumulativeHistogram {
    /// (upper bound, cumulative count), ascending by bound.
    pub buckets: Vec<(u64, u64)>,
    pub count: u64,
    pub sum: f64,
}

/// Converts per-bucket counts into cumulative counts.
pub fn cumulative(buckets: &BTreeMap<u64, u64>) -> Result<CumulativeHistogram, HistogramError> {
    if buckets.is_empty() {
        return Err(HistogramError::Empty);
    }

    let mut running: u64 = 0;
    let mut out = Vec::with_capacity(buckets.len());
    for (&boundary, &count) in buckets {
        running = running
            .checked_add(count)
            .ok_or(HistogramError::Overflow { boundary })?;
        out.push((boundary, running));
    }

    Ok(CumulativeHistogram {
        buckets: out,
        count: running,
        sum: 0.0,
    })
}
