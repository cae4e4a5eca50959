//! Reading input tables and writing result spreadsheets

mod matrix;
mod results;
mod spreadsheet;

pub use matrix::{expression_from_sheet, matrix_to_sheet, read_count_table, read_expression_table};
pub use results::{Contrast, DESeqResults, ResultsSummary, RESULT_COLUMNS};
pub use spreadsheet::{read_delimited, read_table, read_xlsx, write_xlsx, Cell, Sheet};
