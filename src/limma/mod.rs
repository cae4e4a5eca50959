//! Linear models with empirical Bayes moderation for log-scale intensities

mod contrasts;
mod ebayes;
mod lm_fit;
mod top_table;

pub use contrasts::{contrasts_fit, make_contrast, ContrastVector};
pub use ebayes::{ebayes, fit_f_dist, squeeze_var, tmixture, EbayesFit, EbayesParams};
pub use lm_fit::{lm_fit, LinearModelFit};
pub use top_table::{top_table, SortBy, TopTable};
