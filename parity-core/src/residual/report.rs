//! Residual report produced by one comparison

use serde::{Deserialize, Serialize};

/// Differences of one aligned, finite sample pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleResidual {
    /// 0-based sample index
    pub index: usize,
    pub left_line: usize,
    pub right_line: usize,
    /// `|a - b|` per field
    pub abs: Vec<f64>,
    /// `|a - b| / max(|a|, |b|)` per field
    pub rel: Vec<f64>,
}

impl SampleResidual {
    pub fn max_abs(&self) -> f64 {
        self.abs.iter().copied().fold(0.0, f64::max)
    }
}

/// Why a sample was left out of the aggregates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagKind {
    /// A value read from either artifact was NaN or infinite
    NonFiniteInput,
    /// Both values were finite but their difference was not
    Overflow,
}

/// Sample excluded from the aggregates because a value or its difference
/// was NaN or infinite
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlaggedSample {
    pub index: usize,
    pub left_line: usize,
    pub right_line: usize,
    pub kind: FlagKind,
    /// Field positions that were non-finite
    pub fields: Vec<usize>,
}

/// Aggregates for one field position
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldSummary {
    pub field: usize,
    pub count: usize,
    pub max_abs: f64,
    pub mean_abs: f64,
    pub max_rel: f64,
}

/// Aggregates over every finite sample pair
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResidualSummary {
    pub max_abs: f64,
    pub mean_abs: f64,
    pub rms_abs: f64,
    pub max_rel: f64,
    pub mean_rel: f64,
    /// Sample index and field of `max_abs`
    pub max_abs_at: Option<(usize, usize)>,
    pub compared_samples: usize,
    pub compared_values: usize,
    pub excluded_samples: usize,
}

/// Acceptance bounds for a comparison
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Tolerance {
    pub max_abs: Option<f64>,
    pub max_rel: Option<f64>,
}

impl Tolerance {
    pub fn is_unbounded(&self) -> bool {
        self.max_abs.is_none() && self.max_rel.is_none()
    }
}

/// Result of checking a report against a [`Tolerance`]
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub violations: Vec<String>,
}

impl Verdict {
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Quantitative comparison of two artifacts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResidualReport {
    pub left_label: String,
    pub right_label: String,
    pub record_count: usize,
    /// Widest record seen
    pub field_count: usize,
    pub samples: Vec<SampleResidual>,
    pub fields: Vec<FieldSummary>,
    pub flagged: Vec<FlaggedSample>,
    pub summary: ResidualSummary,
}

impl ResidualReport {
    /// Zero residual and nothing flagged
    pub fn is_identical(&self) -> bool {
        self.summary.max_abs == 0.0 && self.flagged.is_empty()
    }

    pub fn flagged_count(&self) -> usize {
        self.flagged.len()
    }

    pub fn verdict(&self, tolerance: &Tolerance) -> Verdict {
        let mut violations = Vec::new();
        if let Some(limit) = tolerance.max_abs {
            if self.summary.max_abs > limit {
                violations.push(format!(
                    "max absolute error {:e} exceeds {:e}",
                    self.summary.max_abs, limit
                ));
            }
        }
        if let Some(limit) = tolerance.max_rel {
            if self.summary.max_rel > limit {
                violations.push(format!(
                    "max relative error {:e} exceeds {:e}",
                    self.summary.max_rel, limit
                ));
            }
        }
        Verdict { violations }
    }
}
