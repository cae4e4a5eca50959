//! Generalized linear models for negative binomial count data

mod design;
mod fitting;
mod negative_binomial;

pub use design::{
    check_full_rank, contrast_coefficient, design_cells, group_means_design, is_group_design, syntactic_name,
    treatment_design, unique_syntactic_names, DesignInfo,
};
pub use fitting::{fit_glm, fit_single_gene, refit_glm, GlmFitParams, GlmFitResult};
pub use negative_binomial::{nb_deviance, nb_log_likelihood, nb_mean, nb_variance, nb_weight, MAX_LFC_BETA, MIN_MU};
