//! Ranked table of moderated statistics for one coefficient

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::ebayes::EbayesFit;
use super::lm_fit::LinearModelFit;
use crate::error::{DgeError, Result};
use crate::io::{Cell, Sheet};
use crate::testing::benjamini_hochberg;

/// Ordering of the rows of a [`TopTable`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortBy {
    /// Log-odds, largest first
    #[default]
    B,
    /// P-value, smallest first
    P,
    /// Absolute log fold change, largest first
    LogFc,
    None,
}

#[derive(Debug, Clone)]
pub struct TopTable {
    pub ids: Vec<String>,
    /// Extra per-feature text columns placed after the ID
    pub annotation: Vec<(String, Vec<String>)>,
    /// Group names and per-feature group coefficients
    pub group_names: Vec<String>,
    pub group_coefficients: Vec<Vec<f64>>,
    pub log_fc: Vec<f64>,
    pub ave_expr: Vec<f64>,
    pub t: Vec<f64>,
    pub p_value: Vec<f64>,
    pub adj_p_value: Vec<f64>,
    pub b: Vec<f64>,
}

/// All features for coefficient `coef` of `eb`, BH-adjusted and sorted.
/// `groups`, when given, adds its coefficients (the group means of a
/// no-intercept fit) as columns.
pub fn top_table(eb: &EbayesFit, coef: usize, groups: Option<&LinearModelFit>, sort_by: SortBy) -> Result<TopTable> {
    let fit = &eb.fit;
    if coef >= fit.n_coefs() {
        return Err(DgeError::InvalidContrast {
            reason: format!("coefficient {} out of range ({} fitted)", coef, fit.n_coefs()),
        });
    }
    if let Some(g) = groups {
        if g.feature_ids != fit.feature_ids {
            return Err(DgeError::DimensionMismatch {
                expected: format!("{} features in group fit", fit.n_features()),
                got: format!("{}", g.n_features()),
            });
        }
    }

    let n = fit.n_features();
    let log_fc = fit.coefficients.column(coef).to_vec();
    let t = eb.t.column(coef).to_vec();
    let p_value = eb.p_value.column(coef).to_vec();
    let b = eb.lods.column(coef).to_vec();
    let adj_p_value = benjamini_hochberg(&p_value);

    let mut order: Vec<usize> = (0..n).collect();
    let nan_last = |a: f64, b: f64| match (a.is_nan(), b.is_nan()) {
        (true, true) => std::cmp::Ordering::Equal,
        (true, false) => std::cmp::Ordering::Greater,
        (false, true) => std::cmp::Ordering::Less,
        (false, false) => a.total_cmp(&b),
    };
    match sort_by {
        SortBy::B => order.sort_by(|&i, &j| nan_last(-b[i], -b[j])),
        SortBy::P => order.sort_by(|&i, &j| nan_last(p_value[i], p_value[j])),
        SortBy::LogFc => order.sort_by(|&i, &j| nan_last(-log_fc[i].abs(), -log_fc[j].abs())),
        SortBy::None => {}
    }

    let pick = |v: &[f64]| order.iter().map(|&i| v[i]).collect::<Vec<f64>>();
    let (group_names, group_coefficients) = match groups {
        Some(g) => (
            g.coef_names.clone(),
            order.iter().map(|&i| g.coefficients.row(i).to_vec()).collect(),
        ),
        None => (Vec::new(), Vec::new()),
    };

    Ok(TopTable {
        ids: order.iter().map(|&i| fit.feature_ids[i].clone()).collect(),
        annotation: Vec::new(),
        group_names,
        group_coefficients,
        log_fc: pick(&log_fc),
        ave_expr: pick(&fit.amean),
        t: pick(&t),
        p_value: pick(&p_value),
        adj_p_value: pick(&adj_p_value),
        b: pick(&b),
    })
}

impl TopTable {
    pub fn n_rows(&self) -> usize {
        self.ids.len()
    }

    /// Add a text column looked up by row ID; IDs without an entry get ""
    pub fn attach_annotation(&mut self, header: &str, values: &HashMap<String, String>) {
        let column = self
            .ids
            .iter()
            .map(|id| values.get(id).cloned().unwrap_or_default())
            .collect();
        self.annotation.push((header.to_string(), column));
    }

    pub fn to_sheet(&self, name: &str) -> Sheet {
        let mut header = vec!["ID".to_string()];
        header.extend(self.annotation.iter().map(|(h, _)| h.clone()));
        header.extend(self.group_names.iter().cloned());
        header.extend(
            ["logFC", "AveExpr", "t", "P.Value", "adj.P.Val", "B"]
                .iter()
                .map(|s| s.to_string()),
        );

        let rows = (0..self.n_rows())
            .map(|r| {
                let mut row = vec![Cell::text(self.ids[r].as_str())];
                row.extend(self.annotation.iter().map(|(_, v)| Cell::text(v[r].as_str())));
                if let Some(groups) = self.group_coefficients.get(r) {
                    row.extend(groups.iter().map(|&g| Cell::Number(g)));
                }
                row.extend(
                    [self.log_fc[r], self.ave_expr[r], self.t[r], self.p_value[r], self.adj_p_value[r], self.b[r]]
                        .into_iter()
                        .map(Cell::Number),
                );
                row
            })
            .collect();
        Sheet {
            name: name.to_string(),
            header,
            rows,
        }
    }
}
