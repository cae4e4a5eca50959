//! Contrasts between fitted coefficients

use ndarray::Array2;

use super::lm_fit::LinearModelFit;
use crate::error::{DgeError, Result};

/// Weights on the fitted coefficients, named by the expression they came from
#[derive(Debug, Clone, PartialEq)]
pub struct ContrastVector {
    pub name: String,
    pub weights: Vec<f64>,
}

/// Parse a linear combination of coefficient names such as `B-A`,
/// `treated - 0.5*ctrl` or `(A+B)/2-C` into weights over `coef_names`.
pub fn make_contrast(expression: &str, coef_names: &[String]) -> Result<ContrastVector> {
    let compact: String = expression.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return Err(DgeError::InvalidContrast {
            reason: "empty contrast expression".to_string(),
        });
    }
    let mut weights = vec![0.0; coef_names.len()];
    let mut parser = Parser {
        chars: compact.chars().collect(),
        pos: 0,
        coef_names,
    };
    parser.expression(1.0, &mut weights)?;
    if parser.pos != parser.chars.len() {
        return Err(parser.error("unexpected character"));
    }
    if weights.iter().all(|&w| w == 0.0) {
        return Err(DgeError::InvalidContrast {
            reason: format!("contrast '{}' has no non-zero weights", compact),
        });
    }
    Ok(ContrastVector { name: compact, weights })
}

/// Recursive-descent parser for sums of scaled terms
struct Parser<'a> {
    chars: Vec<char>,
    pos: usize,
    coef_names: &'a [String],
}

impl Parser<'_> {
    fn error(&self, what: &str) -> DgeError {
        DgeError::InvalidContrast {
            reason: format!(
                "{} at position {} of '{}'",
                what,
                self.pos,
                self.chars.iter().collect::<String>()
            ),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn expression(&mut self, scale: f64, weights: &mut [f64]) -> Result<()> {
        let mut sign = 1.0;
        if let Some(c @ ('+' | '-')) = self.peek() {
            sign = if c == '-' { -1.0 } else { 1.0 };
            self.pos += 1;
        }
        self.term(scale * sign, weights)?;
        while let Some(c @ ('+' | '-')) = self.peek() {
            self.pos += 1;
            let sign = if c == '-' { -1.0 } else { 1.0 };
            self.term(scale * sign, weights)?;
        }
        Ok(())
    }

    /// factor (('*' | '/') number)*, where a leading number may multiply
    fn term(&mut self, scale: f64, weights: &mut [f64]) -> Result<()> {
        let mut local = vec![0.0; weights.len()];
        let mut multiplier = 1.0;
        if self.peek().map_or(false, |c| c.is_ascii_digit() || c == '.') && self.number_then_star() {
            multiplier = self.number()?;
            self.pos += 1;
        }
        self.factor(&mut local)?;
        while let Some(op @ ('*' | '/')) = self.peek() {
            self.pos += 1;
            let value = self.number()?;
            if op == '*' {
                multiplier *= value;
            } else if value == 0.0 {
                return Err(self.error("division by zero"));
            } else {
                multiplier /= value;
            }
        }
        for (w, l) in weights.iter_mut().zip(local) {
            *w += scale * multiplier * l;
        }
        Ok(())
    }

    fn number_then_star(&self) -> bool {
        let mut p = self.pos;
        while p < self.chars.len() && (self.chars[p].is_ascii_digit() || self.chars[p] == '.') {
            p += 1;
        }
        self.chars.get(p) == Some(&'*')
    }

    fn factor(&mut self, weights: &mut [f64]) -> Result<()> {
        if self.peek() == Some('(') {
            self.pos += 1;
            self.expression(1.0, weights)?;
            if self.peek() != Some(')') {
                return Err(self.error("missing ')'"));
            }
            self.pos += 1;
            return Ok(());
        }
        let start = self.pos;
        while self
            .peek()
            .map_or(false, |c| c.is_alphanumeric() || c == '_' || c == '.')
        {
            self.pos += 1;
        }
        let name: String = self.chars[start..self.pos].iter().collect();
        if name.is_empty() {
            return Err(self.error("expected a coefficient name"));
        }
        match self.coef_names.iter().position(|c| *c == name) {
            Some(idx) => {
                weights[idx] += 1.0;
                Ok(())
            }
            None => Err(DgeError::InvalidContrast {
                reason: format!(
                    "'{}' is not a coefficient; available: {}",
                    name,
                    self.coef_names.join(", ")
                ),
            }),
        }
    }

    fn number(&mut self) -> Result<f64> {
        let start = self.pos;
        while self.peek().map_or(false, |c| c.is_ascii_digit() || c == '.') {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        text.parse::<f64>().map_err(|_| self.error("expected a number"))
    }
}

/// Re-express a fit in terms of one contrast. Standard errors use the
/// correlation of the coefficients from the full design.
pub fn contrasts_fit(fit: &LinearModelFit, contrast: &ContrastVector) -> Result<LinearModelFit> {
    let p = fit.n_coefs();
    if contrast.weights.len() != p {
        return Err(DgeError::DimensionMismatch {
            expected: format!("{} contrast weights", p),
            got: format!("{}", contrast.weights.len()),
        });
    }
    let cov = &fit.cov_coefficients;
    let correlation = Array2::from_shape_fn((p, p), |(j, k)| cov[[j, k]] / (cov[[j, j]] * cov[[k, k]]).sqrt());
    let active: Vec<usize> = (0..p).filter(|&j| contrast.weights[j] != 0.0).collect();
    let c = &contrast.weights;

    let n = fit.n_features();
    let mut coefficients = Array2::zeros((n, 1));
    let mut stdev_unscaled = Array2::zeros((n, 1));
    for i in 0..n {
        let mut estimate = 0.0;
        let mut variance = 0.0;
        for &j in &active {
            estimate += c[j] * fit.coefficients[[i, j]];
            for &k in &active {
                variance += c[j] * c[k] * fit.stdev_unscaled[[i, j]] * fit.stdev_unscaled[[i, k]] * correlation[[j, k]];
            }
        }
        coefficients[[i, 0]] = estimate;
        stdev_unscaled[[i, 0]] = variance.sqrt();
    }

    let mut contrast_cov = 0.0;
    for &j in &active {
        for &k in &active {
            contrast_cov += c[j] * c[k] * cov[[j, k]];
        }
    }

    Ok(LinearModelFit {
        feature_ids: fit.feature_ids.clone(),
        coef_names: vec![contrast.name.clone()],
        coefficients,
        stdev_unscaled,
        sigma: fit.sigma.clone(),
        df_residual: fit.df_residual.clone(),
        amean: fit.amean.clone(),
        cov_coefficients: Array2::from_elem((1, 1), contrast_cov),
    })
}
