//! Matrices and sample annotation

mod count_matrix;
mod dataset;
mod expression_matrix;
mod metadata;

pub use count_matrix::CountMatrix;
pub use dataset::CountDataSet;
pub use expression_matrix::ExpressionMatrix;
pub use metadata::{GroupSpec, SampleMetadata};

use std::collections::HashMap;

/// Make names unique by appending `_1`, `_2` to repeats
pub(crate) fn deduplicate_names(names: Vec<String>, what: &str) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for name in &names {
        *counts.entry(name.as_str()).or_insert(0) += 1;
    }
    if counts.values().all(|&c| c == 1) {
        return names;
    }

    let mut seen: HashMap<String, usize> = HashMap::new();
    names
        .into_iter()
        .map(|name| {
            let k = seen.entry(name.clone()).or_insert(0);
            *k += 1;
            if *k == 1 {
                name
            } else {
                let renamed = format!("{}_{}", name, *k - 1);
                log::warn!("Duplicate {} name '{}' renamed to '{}'", what, name, renamed);
                renamed
            }
        })
        .collect()
}
