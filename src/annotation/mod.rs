//! Gene identifier mapping and gene-set enrichment

mod enrichment;
mod id_map;

pub use enrichment::{enrichment_sheet, over_representation, read_gmt, EnrichmentParams, EnrichmentResult, GeneSet};
pub use id_map::{GeneIdMap, IdMapping, HUMAN_GENE_INFO_URL};
