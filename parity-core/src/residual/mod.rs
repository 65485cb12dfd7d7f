//! ResidualComparator: positional reconciliation of two artifacts
//!
//! ```text
//!  GPU artifact ─┐                ┌─► per-sample |a-b|, |a-b|/max(|a|,|b|)
//!                ├─► align ───────┼─► per-field / global summary
//!  CPU artifact ─┘   (counts)     └─► flagged non-finite samples
//! ```
//!
//! The comparator knows nothing about plotting; rendering happens behind
//! [`crate::sink::ReportSink`].

mod records;
mod report;

pub use records::{is_record_line, ArtifactRecords, RawRecord};
pub use report::{
    FieldSummary, FlagKind, FlaggedSample, ResidualReport, ResidualSummary, SampleResidual, Tolerance,
    Verdict,
};

use tracing::{debug, warn};

use crate::error::{HarnessError, HarnessResult};
use crate::runner::RunArtifact;

/// Compares simulator artifacts record by record
#[derive(Debug, Clone, Default)]
pub struct ResidualComparator {
    drop_samples: bool,
}

impl ResidualComparator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep only the aggregates, not the per-sample differences
    pub fn summary_only(mut self) -> Self {
        self.drop_samples = true;
        self
    }

    /// Loads and compares two run artifacts
    pub fn compare(&self, left: &RunArtifact, right: &RunArtifact) -> HarnessResult<ResidualReport> {
        let left = ArtifactRecords::load(left)?;
        let right = ArtifactRecords::load(right)?;
        self.compare_records(&left, &right)
    }

    /// Compares already loaded records.
    ///
    /// Record counts are checked before anything else is parsed.
    pub fn compare_records(
        &self,
        left: &ArtifactRecords,
        right: &ArtifactRecords,
    ) -> HarnessResult<ResidualReport> {
        if left.len() != right.len() {
            return Err(HarnessError::RecordCountMismatch {
                left_label: left.label.clone(),
                right_label: right.label.clone(),
                left: left.len(),
                right: right.len(),
            });
        }

        let mut acc = Accumulator::default();
        let mut samples = Vec::new();
        let mut flagged = Vec::new();

        for (index, (l, r)) in left.records.iter().zip(&right.records).enumerate() {
            if l.field_count() != r.field_count() {
                return Err(HarnessError::FieldCountMismatch {
                    index,
                    left: l.field_count(),
                    right: r.field_count(),
                });
            }
            let lv = l.values(&left.path)?;
            let rv = r.values(&right.path)?;

            let abs: Vec<f64> = lv.iter().zip(&rv).map(|(a, b)| (a - b).abs()).collect();
            let rel: Vec<f64> = lv
                .iter()
                .zip(&rv)
                .zip(&abs)
                .map(|((a, b), d)| relative(*a, *b, *d))
                .collect();

            if let Some((kind, fields)) = non_finite_fields(&lv, &rv, &abs, &rel) {
                warn!(
                    sample = index,
                    left_line = l.line,
                    right_line = r.line,
                    ?kind,
                    fields = ?fields,
                    "non-finite sample excluded from aggregates"
                );
                flagged.push(FlaggedSample {
                    index,
                    left_line: l.line,
                    right_line: r.line,
                    kind,
                    fields,
                });
                continue;
            }

            acc.push(index, &abs, &rel);

            if !self.drop_samples {
                samples.push(SampleResidual {
                    index,
                    left_line: l.line,
                    right_line: r.line,
                    abs,
                    rel,
                });
            }
        }

        let field_count = left.records.iter().map(RawRecord::field_count).max().unwrap_or(0);
        let (summary, fields) = acc.finish(flagged.len());
        debug!(
            left = %left.label,
            right = %right.label,
            max_abs = summary.max_abs,
            mean_abs = summary.mean_abs,
            excluded = summary.excluded_samples,
            "comparison finished"
        );

        Ok(ResidualReport {
            left_label: left.label.clone(),
            right_label: right.label.clone(),
            record_count: left.len(),
            field_count,
            samples,
            fields,
            flagged,
            summary,
        })
    }
}

/// Fields that cannot enter the aggregates, and why.
///
/// Non-finite inputs take precedence over differences that overflowed.
fn non_finite_fields(
    left: &[f64],
    right: &[f64],
    abs: &[f64],
    rel: &[f64],
) -> Option<(FlagKind, Vec<usize>)> {
    let inputs: Vec<usize> = (0..left.len())
        .filter(|&i| !left[i].is_finite() || !right[i].is_finite())
        .collect();
    if !inputs.is_empty() {
        return Some((FlagKind::NonFiniteInput, inputs));
    }
    let overflowed: Vec<usize> = (0..abs.len())
        .filter(|&i| !abs[i].is_finite() || !rel[i].is_finite())
        .collect();
    if overflowed.is_empty() {
        None
    } else {
        Some((FlagKind::Overflow, overflowed))
    }
}

/// Symmetric relative difference; 0 when both values are 0.
fn relative(a: f64, b: f64, abs: f64) -> f64 {
    let scale = a.abs().max(b.abs());
    if scale == 0.0 { 0.0 } else { abs / scale }
}

#[derive(Debug, Default)]
struct FieldAcc {
    count: usize,
    sum_abs: f64,
    max_abs: f64,
    max_rel: f64,
}

#[derive(Debug, Default)]
struct Accumulator {
    samples: usize,
    values: usize,
    sum_abs: f64,
    sum_sq: f64,
    sum_rel: f64,
    max_abs: f64,
    max_abs_at: Option<(usize, usize)>,
    max_rel: f64,
    fields: Vec<FieldAcc>,
}

impl Accumulator {
    fn push(&mut self, index: usize, abs: &[f64], rel: &[f64]) {
        if self.fields.len() < abs.len() {
            self.fields.resize_with(abs.len(), FieldAcc::default);
        }
        self.samples += 1;
        for (field, (&d, &r)) in abs.iter().zip(rel).enumerate() {
            self.values += 1;
            self.sum_abs += d;
            self.sum_sq += d * d;
            self.sum_rel += r;
            if d > self.max_abs || self.max_abs_at.is_none() {
                self.max_abs = self.max_abs.max(d);
                self.max_abs_at = Some((index, field));
            }
            self.max_rel = self.max_rel.max(r);

            let f = &mut self.fields[field];
            f.count += 1;
            f.sum_abs += d;
            f.max_abs = f.max_abs.max(d);
            f.max_rel = f.max_rel.max(r);
        }
    }

    fn finish(self, excluded: usize) -> (ResidualSummary, Vec<FieldSummary>) {
        let n = self.values as f64;
        let mean = |sum: f64| if self.values == 0 { 0.0 } else { sum / n };
        let summary = ResidualSummary {
            max_abs: self.max_abs,
            mean_abs: mean(self.sum_abs),
            rms_abs: mean(self.sum_sq).sqrt(),
            max_rel: self.max_rel,
            mean_rel: mean(self.sum_rel),
            max_abs_at: self.max_abs_at,
            compared_samples: self.samples,
            compared_values: self.values,
            excluded_samples: excluded,
        };
        let fields = self
            .fields
            .into_iter()
            .enumerate()
            .map(|(field, f)| FieldSummary {
                field,
                count: f.count,
                max_abs: f.max_abs,
                mean_abs: if f.count == 0 { 0.0 } else { f.sum_abs / f.count as f64 },
                max_rel: f.max_rel,
            })
            .collect();
        (summary, fields)
    }
}
