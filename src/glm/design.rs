//! Design matrices for single-factor comparisons

use ndarray::Array2;
use std::collections::HashSet;

use crate::error::{DgeError, Result};
use crate::linalg::{cholesky, weighted_cross_product};

/// Layout of a treatment-coded design
#[derive(Debug, Clone)]
pub struct DesignInfo {
    /// Metadata column the design was built from
    pub variable: String,
    /// Names of the coefficients, intercept first
    pub coef_names: Vec<String>,
    pub reference_level: String,
    /// Levels with the reference first, the rest sorted
    pub levels: Vec<String>,
}

fn sorted_levels(values: &[String]) -> Vec<String> {
    let mut levels = values.to_vec();
    levels.sort();
    levels.dedup();
    levels
}

/// Intercept plus one indicator per non-reference level.
pub fn treatment_design(values: &[String], variable: &str, reference: &str) -> Result<(Array2<f64>, DesignInfo)> {
    let mut levels = sorted_levels(values);
    let ref_pos = levels.iter().position(|l| l == reference).ok_or_else(|| {
        DgeError::InvalidDesignMatrix {
            reason: format!(
                "reference level '{}' does not occur in '{}' (levels: {})",
                reference,
                variable,
                levels.join(", ")
            ),
        }
    })?;
    if levels.len() < 2 {
        return Err(DgeError::InvalidDesignMatrix {
            reason: format!("'{}' needs at least two levels, found only '{}'", variable, reference),
        });
    }
    let reference_level = levels.remove(ref_pos);
    levels.insert(0, reference_level.clone());

    let n_samples = values.len();
    let mut design = Array2::zeros((n_samples, levels.len()));
    for (i, value) in values.iter().enumerate() {
        design[[i, 0]] = 1.0;
        for (j, level) in levels.iter().enumerate().skip(1) {
            if value == level {
                design[[i, j]] = 1.0;
            }
        }
    }

    let mut coef_names = vec!["Intercept".to_string()];
    for level in levels.iter().skip(1) {
        coef_names.push(format!("{}_{}_vs_{}", variable, level, reference_level));
    }

    check_full_rank(&design)?;
    Ok((
        design,
        DesignInfo {
            variable: variable.to_string(),
            coef_names,
            reference_level,
            levels,
        },
    ))
}

/// One indicator column per level and no intercept, so each coefficient
/// is a group mean. Columns follow sorted level order and carry
/// syntactically valid names.
pub fn group_means_design(values: &[String]) -> Result<(Array2<f64>, Vec<String>)> {
    let levels = sorted_levels(values);
    if levels.len() < 2 {
        return Err(DgeError::InvalidDesignMatrix {
            reason: format!("need at least two groups, found {}", levels.len()),
        });
    }
    let mut design = Array2::zeros((values.len(), levels.len()));
    for (i, value) in values.iter().enumerate() {
        for (j, level) in levels.iter().enumerate() {
            if value == level {
                design[[i, j]] = 1.0;
            }
        }
    }
    check_full_rank(&design)?;
    Ok((design, unique_syntactic_names(&levels)))
}

/// Column index of the coefficient that compares `numerator` against
/// `denominator`, with the sign to apply to it.
pub fn contrast_coefficient(info: &DesignInfo, numerator: &str, denominator: &str) -> Result<(usize, f64)> {
    let find = |level: &str| {
        let suffix = format!("_{}_vs_{}", level, info.reference_level);
        info.coef_names.iter().position(|n| n.ends_with(&suffix))
    };
    if denominator == info.reference_level {
        if let Some(idx) = find(numerator) {
            return Ok((idx, 1.0));
        }
    } else if numerator == info.reference_level {
        if let Some(idx) = find(denominator) {
            return Ok((idx, -1.0));
        }
    }
    Err(DgeError::InvalidContrast {
        reason: format!(
            "contrast '{} vs {}' must involve the reference level '{}' and a level of '{}' ({})",
            numerator,
            denominator,
            info.reference_level,
            info.variable,
            info.levels.join(", ")
        ),
    })
}

/// Reject designs whose columns are empty or linearly dependent
pub fn check_full_rank(design: &Array2<f64>) -> Result<()> {
    if design.nrows() == 0 || design.ncols() == 0 {
        return Err(DgeError::InvalidDesignMatrix {
            reason: "Design matrix has zero rows or columns".to_string(),
        });
    }
    if (0..design.ncols()).any(|j| design.column(j).iter().all(|&v| v == 0.0)) {
        return Err(DgeError::InvalidDesignMatrix {
            reason: "the model matrix is not full rank: a level has no samples".to_string(),
        });
    }
    let xtx = weighted_cross_product(design, &vec![1.0; design.nrows()]);
    if cholesky(&xtx).is_none() {
        return Err(DgeError::InvalidDesignMatrix {
            reason: "the model matrix is not full rank: columns are linear combinations of each other"
                .to_string(),
        });
    }
    Ok(())
}

/// True when the design has exactly as many distinct rows as columns,
/// i.e. every sample belongs to one cell of a one-way layout.
pub fn is_group_design(design: &Array2<f64>) -> bool {
    let rows: HashSet<Vec<u64>> = design
        .outer_iter()
        .map(|r| r.iter().map(|v| v.to_bits()).collect())
        .collect();
    rows.len() == design.ncols()
}

/// Row index of each sample's cell among the distinct design rows
pub fn design_cells(design: &Array2<f64>) -> Vec<usize> {
    let mut seen: Vec<Vec<u64>> = Vec::new();
    design
        .outer_iter()
        .map(|r| {
            let key: Vec<u64> = r.iter().map(|v| v.to_bits()).collect();
            match seen.iter().position(|s| *s == key) {
                Some(pos) => pos,
                None => {
                    seen.push(key);
                    seen.len() - 1
                }
            }
        })
        .collect()
}

/// Turn an arbitrary label into a valid identifier: letters, digits,
/// dots and underscores, starting with a letter or a dot not followed
/// by a digit.
pub fn syntactic_name(label: &str) -> String {
    let mut name: String = label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '_' { c } else { '.' })
        .collect();
    let mut chars = name.chars();
    let needs_prefix = match (chars.next(), chars.next()) {
        (None, _) => true,
        (Some(c), _) if c.is_ascii_alphabetic() => false,
        (Some('.'), Some(d)) if d.is_ascii_digit() => true,
        (Some('.'), _) => false,
        _ => true,
    };
    if needs_prefix {
        name.insert(0, 'X');
    }
    name
}

/// [`syntactic_name`] with `.1`, `.2` suffixes on collisions
pub fn unique_syntactic_names(labels: &[String]) -> Vec<String> {
    let mut used: HashSet<String> = HashSet::new();
    labels
        .iter()
        .map(|l| {
            let base = syntactic_name(l);
            let mut candidate = base.clone();
            let mut k = 1;
            while used.contains(&candidate) {
                candidate = format!("{}.{}", base, k);
                k += 1;
            }
            used.insert(candidate.clone());
            candidate
        })
        .collect()
}
