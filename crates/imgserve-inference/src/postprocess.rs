//! Mapping raw model output to labelled per-item results

use candle_core::{DType, Tensor};
use imgserve_core::{ClassificationResult, Error, Result};
use std::path::Path;

/// Label vocabulary: class index → label
#[derive(Debug, Clone, PartialEq)]
pub struct LabelMap {
    labels: Vec<String>,
}

impl LabelMap {
    /// Create from labels ordered by class index
    pub fn from_labels<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            labels: labels.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse `N LABEL` lines (index starting at 0, every index present once)
    pub fn parse(content: &str) -> Result<Self> {
        let mut entries: Vec<(usize, String)> = Vec::new();

        for (line_no, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let (index, label) = line
                .split_once(char::is_whitespace)
                .ok_or_else(|| {
                    Error::config(format!("line {}: expected 'N LABEL', got: {}", line_no + 1, line))
                })?;
            let index: usize = index.parse().map_err(|_| {
                Error::config(format!("line {}: invalid class index: {}", line_no + 1, index))
            })?;
            entries.push((index, label.trim().to_string()));
        }

        entries.sort_by_key(|(index, _)| *index);
        for (expected, (index, _)) in entries.iter().enumerate() {
            if *index != expected {
                return Err(Error::config(format!(
                    "class indices must be contiguous from 0, missing or duplicate index near {}",
                    expected
                )));
            }
        }

        let mut labels: Vec<String> = Vec::with_capacity(entries.len());
        for (_, label) in entries {
            if labels.contains(&label) {
                return Err(Error::config(format!("duplicate label: {}", label)));
            }
            labels.push(label);
        }

        Ok(Self { labels })
    }

    /// Load a class-id map file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("failed to read class id map {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }
}

/// Turns an unwrapped `[n, classes]` batch output into `n` results
#[derive(Debug, Clone, Default)]
pub struct Postprocessor {
    labels: Option<LabelMap>,
}

impl Postprocessor {
    /// Without a vocabulary, labels are the class indices as strings
    pub fn new(labels: Option<LabelMap>) -> Self {
        Self { labels }
    }

    pub fn with_labels(labels: LabelMap) -> Self {
        Self::new(Some(labels))
    }

    pub fn labels(&self) -> Option<&LabelMap> {
        self.labels.as_ref()
    }

    /// One result per row, scores copied verbatim
    pub fn process(&self, raw: &Tensor) -> Result<Vec<ClassificationResult>> {
        let as_rows = |e: candle_core::Error| {
            Error::postprocess(format!("failed to read model output: {}", e))
        };

        let rows: Vec<Vec<f32>> = match raw.rank() {
            1 => vec![raw.to_dtype(DType::F32).and_then(|t| t.to_vec1::<f32>()).map_err(as_rows)?],
            2 => raw.to_dtype(DType::F32).and_then(|t| t.to_vec2::<f32>()).map_err(as_rows)?,
            _ => {
                return Err(Error::postprocess(format!(
                    "expected a [batch, classes] output, got shape {:?}",
                    raw.dims()
                )))
            }
        };

        rows.into_iter().map(|row| self.label_row(row)).collect()
    }

    fn label_row(&self, row: Vec<f32>) -> Result<ClassificationResult> {
        match &self.labels {
            Some(labels) => {
                if row.len() != labels.len() {
                    return Err(Error::postprocess(format!(
                        "model produced {} scores but the vocabulary has {} labels",
                        row.len(),
                        labels.len()
                    )));
                }
                Ok(ClassificationResult::from_pairs(
                    labels.labels().iter().map(String::as_str).zip(row),
                ))
            }
            None => Ok(ClassificationResult::from_pairs(
                row.into_iter().enumerate().map(|(i, s)| (i.to_string(), s)),
            )),
        }
    }
}
