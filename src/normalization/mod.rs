//! Normalization of count and intensity data

mod log_transform;
mod size_factors;

pub use log_transform::{log2_fill, looks_unlogged, LogTransformMode, LogTransformed};
pub use size_factors::{estimate_size_factors, SizeFactorMethod};
