//! Sample metadata: ordered categorical columns keyed by sample

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{DgeError, Result};

/// One experimental group and how many consecutive matrix columns belong to it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSpec {
    pub name: String,
    pub size: usize,
}

impl GroupSpec {
    pub fn new(name: &str, size: usize) -> Self {
        Self {
            name: name.to_string(),
            size,
        }
    }
}

/// Sample annotations. Column order is preserved so exports keep the
/// layout of the source record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleMetadata {
    sample_ids: Vec<String>,
    columns: Vec<(String, Vec<String>)>,
}

impl SampleMetadata {
    pub fn new(sample_ids: Vec<String>) -> Self {
        let mut seen = HashSet::new();
        for id in &sample_ids {
            if !seen.insert(id) {
                log::warn!("Duplicate sample ID detected: '{}'. Sample IDs should be unique.", id);
            }
        }
        Self {
            sample_ids,
            columns: Vec::new(),
        }
    }

    /// Positional group assignment: the first `groups[0].size` samples get
    /// `groups[0].name`, the next block the second name and so on.
    pub fn from_group_sizes(sample_ids: &[String], variable: &str, groups: &[GroupSpec]) -> Result<Self> {
        let total: usize = groups.iter().map(|g| g.size).sum();
        if total != sample_ids.len() {
            return Err(DgeError::DimensionMismatch {
                expected: format!("{} samples in the matrix", sample_ids.len()),
                got: format!(
                    "{} samples across groups ({})",
                    total,
                    groups
                        .iter()
                        .map(|g| format!("{}={}", g.name, g.size))
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            });
        }
        let values: Vec<String> = groups
            .iter()
            .flat_map(|g| std::iter::repeat(g.name.clone()).take(g.size))
            .collect();
        let mut meta = Self::new(sample_ids.to_vec());
        meta.add_condition(variable, values)?;
        Ok(meta)
    }

    /// Add (or replace) a categorical column
    pub fn add_condition(&mut self, name: &str, values: Vec<String>) -> Result<()> {
        if values.len() != self.sample_ids.len() {
            return Err(DgeError::DimensionMismatch {
                expected: format!("{} values", self.sample_ids.len()),
                got: format!("{} values", values.len()),
            });
        }
        match self.columns.iter_mut().find(|(n, _)| n == name) {
            Some((_, existing)) => *existing = values,
            None => self.columns.push((name.to_string(), values)),
        }
        Ok(())
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }

    pub fn condition(&self, name: &str) -> Option<&[String]> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Sorted unique levels of a column
    pub fn levels(&self, name: &str) -> Option<Vec<String>> {
        self.condition(name).map(|values| {
            let mut unique = values.to_vec();
            unique.sort();
            unique.dedup();
            unique
        })
    }

    pub fn samples_with_level(&self, name: &str, level: &str) -> Vec<usize> {
        self.condition(name)
            .map(|values| {
                values
                    .iter()
                    .enumerate()
                    .filter(|(_, v)| v.as_str() == level)
                    .map(|(i, _)| i)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Keep a single column under a new name
    pub fn select_column(&self, name: &str, label: &str) -> Result<Self> {
        let values = self.condition(name).ok_or_else(|| DgeError::InvalidMetadata {
            reason: format!(
                "column '{}' not found; available columns: {}",
                name,
                self.column_names().join(", ")
            ),
        })?;
        let mut selected = Self {
            sample_ids: self.sample_ids.clone(),
            columns: Vec::new(),
        };
        selected.add_condition(label, values.to_vec())?;
        Ok(selected)
    }

    /// Require metadata rows to name the same samples, in the same order,
    /// as the matrix columns. Nothing is reordered.
    pub fn check_alignment(&self, matrix_sample_ids: &[String]) -> Result<()> {
        if self.sample_ids.len() != matrix_sample_ids.len() {
            return Err(DgeError::SampleOrderMismatch {
                reason: format!(
                    "metadata describes {} samples but the matrix has {} columns",
                    self.sample_ids.len(),
                    matrix_sample_ids.len()
                ),
            });
        }
        if let Some(pos) = self
            .sample_ids
            .iter()
            .zip(matrix_sample_ids)
            .position(|(a, b)| a != b)
        {
            let same_set = {
                let a: HashSet<&String> = self.sample_ids.iter().collect();
                let b: HashSet<&String> = matrix_sample_ids.iter().collect();
                a == b
            };
            return Err(DgeError::SampleOrderMismatch {
                reason: format!(
                    "position {}: metadata has '{}', matrix has '{}'{}",
                    pos + 1,
                    self.sample_ids[pos],
                    matrix_sample_ids[pos],
                    if same_set { " (same samples in a different order)" } else { "" }
                ),
            });
        }
        Ok(())
    }
}
