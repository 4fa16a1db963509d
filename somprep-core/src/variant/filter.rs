//! Somatic filter
//!
//! Removes two kinds of records from a call set:
//! - SNP-database hits whose database entry carries a somatic origin code
//!   (`SAO` 2 or 3); such entries were observed in somatic samples and are
//!   unfit as a germline background
//! - cancer-mutation-database hits, i.e. known recurrent cancer variants
//!
//! Matching is exact on chromosome, position, reference and any alternate
//! allele. The filter is a pure function of its inputs.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::variant::record::{SnpOrigin, VariantRecord};
use crate::variant::vcf::{CallSet, CancerDatabase, SnpDatabase};

/// Which exclusions apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterPolicy {
    pub exclude_somatic_origin: bool,
    pub exclude_cancer_hits: bool,
}

impl Default for FilterPolicy {
    fn default() -> Self {
        Self {
            exclude_somatic_origin: true,
            exclude_cancer_hits: true,
        }
    }
}

/// Database evidence for one record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Annotation {
    /// Origin code of the matching SNP-database entry, if any
    pub snp: Option<SnpOrigin>,
    pub cancer: bool,
}

/// Decision for one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Retain,
    ExcludeSomaticOrigin,
    ExcludeCancerHit,
}

/// Counts of a filter pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSummary {
    pub total: usize,
    pub retained: usize,
    pub somatic_origin: usize,
    pub cancer_hits: usize,
}

pub fn annotate(
    record: &VariantRecord,
    snp_db: &SnpDatabase,
    cancer_db: Option<&CancerDatabase>,
) -> Annotation {
    Annotation {
        snp: snp_db.lookup(record),
        cancer: cancer_db.is_some_and(|db| db.contains(record)),
    }
}

pub fn verdict(annotation: &Annotation, policy: &FilterPolicy) -> Verdict {
    if policy.exclude_somatic_origin && annotation.snp.is_some_and(|origin| origin.is_somatic()) {
        return Verdict::ExcludeSomaticOrigin;
    }
    if policy.exclude_cancer_hits && annotation.cancer {
        return Verdict::ExcludeCancerHit;
    }
    Verdict::Retain
}

/// Filters with the default policy (both exclusions on)
pub fn filter(call_set: &CallSet, snp_db: &SnpDatabase, cancer_db: Option<&CancerDatabase>) -> CallSet {
    filter_with(call_set, snp_db, cancer_db, &FilterPolicy::default()).0
}

/// Filters with an explicit policy and reports what was removed
pub fn filter_with(
    call_set: &CallSet,
    snp_db: &SnpDatabase,
    cancer_db: Option<&CancerDatabase>,
    policy: &FilterPolicy,
) -> (CallSet, FilterSummary) {
    let mut summary = FilterSummary {
        total: call_set.len(),
        ..FilterSummary::default()
    };

    let records = call_set
        .records
        .iter()
        .filter(|record| {
            let annotation = annotate(record, snp_db, cancer_db);
            match verdict(&annotation, policy) {
                Verdict::Retain => true,
                Verdict::ExcludeSomaticOrigin => {
                    debug!("{}:{} excluded: somatic-origin SNP entry", record.chrom, record.pos);
                    summary.somatic_origin += 1;
                    false
                }
                Verdict::ExcludeCancerHit => {
                    debug!("{}:{} excluded: cancer database hit", record.chrom, record.pos);
                    summary.cancer_hits += 1;
                    false
                }
            }
        })
        .cloned()
        .collect::<Vec<_>>();

    summary.retained = records.len();

    (
        CallSet {
            header: call_set.header.clone(),
            records,
        },
        summary,
    )
}
