//! Outlier handling, independent filtering and result selection

mod cooks;
mod independent;
mod significance;

pub use cooks::{
    cooks_cutoff, cooks_distance, filter_by_cooks, max_cooks, replace_outliers, replaceable_samples,
    robust_method_of_moments_disp, samples_for_cooks,
};
pub use independent::{independent_filtering, FilterThreshold};
pub use significance::{split_significant, RegulationSplit};
