//! Artifact record parsing
//!
//! The simulator owns the field layout; here a record is one line of
//! numeric tokens separated by whitespace and/or commas. Blank lines, `#`
//! comments, `<tag>` lines and `key = value` headers are not records.

use std::path::{Path, PathBuf};

use crate::error::{HarnessError, HarnessResult, Stage};
use crate::runner::RunArtifact;

/// One record line, tokenized but not yet parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// 1-based line number in the artifact
    pub line: usize,
    pub tokens: Vec<String>,
}

impl RawRecord {
    pub fn field_count(&self) -> usize {
        self.tokens.len()
    }

    /// Parses every token as `f64`. `nan` and `inf` are accepted.
    pub fn values(&self, path: &Path) -> HarnessResult<Vec<f64>> {
        self.tokens
            .iter()
            .map(|token| {
                token.parse::<f64>().map_err(|_| HarnessError::MalformedRecord {
                    path: path.to_path_buf(),
                    line: self.line,
                    token: token.clone(),
                })
            })
            .collect()
    }
}

/// All records of one artifact
#[derive(Debug, Clone)]
pub struct ArtifactRecords {
    pub path: PathBuf,
    pub label: String,
    pub records: Vec<RawRecord>,
}

impl ArtifactRecords {
    /// Reads the artifact's output file, labeled by its backend
    pub fn load(artifact: &RunArtifact) -> HarnessResult<Self> {
        Self::from_path(artifact.path(), artifact.backend.label())
    }

    pub fn from_path(path: &Path, label: impl Into<String>) -> HarnessResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| HarnessError::io(Stage::Compare, path, e))?;
        Ok(Self::parse(&text, path, label))
    }

    pub fn parse(text: &str, path: impl Into<PathBuf>, label: impl Into<String>) -> Self {
        let records = text
            .lines()
            .enumerate()
            .filter(|(_, line)| is_record_line(line))
            .map(|(idx, line)| RawRecord {
                line: idx + 1,
                tokens: tokenize(line),
            })
            .collect();

        Self {
            path: path.into(),
            label: label.into(),
            records,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// True when `line` carries a sample rather than metadata
pub fn is_record_line(line: &str) -> bool {
    let trimmed = line.trim();
    !(trimmed.is_empty()
        || trimmed.starts_with('#')
        || trimmed.starts_with('<')
        || trimmed.contains('='))
}

fn tokenize(line: &str) -> Vec<String> {
    line.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}
