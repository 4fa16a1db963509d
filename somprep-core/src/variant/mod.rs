//! Variant call sets and the somatic filter

pub mod filter;
pub mod record;
pub mod vcf;

pub use filter::{FilterPolicy, FilterSummary, filter, filter_with};
pub use record::{SnpOrigin, VariantKey, VariantRecord};
pub use vcf::{CallSet, CancerDatabase, SnpDatabase};
