//! NCBI GEO series matrices and platform annotation

mod client;
mod platform;
mod series_matrix;

pub use client::{matrix_files_in_listing, platform_url, series_matrix_url, series_stub, GeoClient};
pub use platform::{parse_platform_soft, PlatformTable};
pub use series_matrix::{parse_series_matrix, read_series_matrix, SeriesMatrix};
