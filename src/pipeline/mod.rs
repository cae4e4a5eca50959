//! The two end-to-end analyses

mod counts;
mod microarray;

pub use counts::{run_counts_pipeline, CountsOutputs};
pub use microarray::{run_microarray_from_series, run_microarray_pipeline, MicroarrayOutputs};
