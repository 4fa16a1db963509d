//! Filter command handler
//!
//! Reads a call set, loads only the database entries at its loci, and
//! writes the surviving records (unchanged, in input order) to a file or
//! stdout. The summary goes to stderr so stdout stays a valid VCF.

use anyhow::{Context, Result};
use clap::Args;
use colored::*;
use somprep_core::FilterError;
use somprep_core::variant::{CallSet, CancerDatabase, FilterPolicy, FilterSummary, SnpDatabase, filter_with};
use std::path::PathBuf;
use tracing::info;

/// Somatic filter inputs
#[derive(Args, Debug, Clone)]
pub struct FilterArgs {
    /// Call set to filter (VCF, optionally gzip-compressed)
    #[arg(long)]
    pub calls: PathBuf,

    /// SNP database with SAO origin codes (e.g. dbSNP)
    #[arg(long)]
    pub snp_db: PathBuf,

    /// Cancer-mutation database (e.g. COSMIC)
    #[arg(long)]
    pub cancer_db: Option<PathBuf>,

    /// Output file (stdout when omitted)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Keep records whose SNP-database entry has a somatic origin
    #[arg(long)]
    pub keep_somatic_origin: bool,

    /// Keep records found in the cancer database
    #[arg(long)]
    pub keep_cancer_hits: bool,
}

impl FilterArgs {
    fn policy(&self) -> FilterPolicy {
        FilterPolicy {
            exclude_somatic_origin: !self.keep_somatic_origin,
            exclude_cancer_hits: !self.keep_cancer_hits,
        }
    }
}

pub async fn handle_filter(args: FilterArgs) -> Result<()> {
    let summary = tokio::task::spawn_blocking(move || run_filter(&args))
        .await
        .context("Filter task failed")??;

    info!(
        "Filtered {} record(s): {} retained, {} somatic-origin, {} cancer hit(s)",
        summary.total, summary.retained, summary.somatic_origin, summary.cancer_hits
    );
    eprintln!(
        "{} {} of {} record(s) retained ({} somatic-origin, {} cancer-database hit(s) removed)",
        "✓".green(),
        summary.retained.to_string().bold(),
        summary.total,
        summary.somatic_origin,
        summary.cancer_hits
    );

    Ok(())
}

fn run_filter(args: &FilterArgs) -> Result<FilterSummary, FilterError> {
    let calls = CallSet::from_path(&args.calls)?;
    let loci = calls.loci();
    let snp_db = SnpDatabase::from_path(&args.snp_db, Some(&loci))?;
    let cancer_db = args
        .cancer_db
        .as_deref()
        .map(|path| CancerDatabase::from_path(path, Some(&loci)))
        .transpose()?;

    let (filtered, summary) = filter_with(&calls, &snp_db, cancer_db.as_ref(), &args.policy());

    match &args.output {
        Some(path) => filtered.write_path(path)?,
        None => filtered
            .write(std::io::stdout().lock())
            .map_err(|source| FilterError::Write {
                path: PathBuf::from("<stdout>"),
                source,
            })?,
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CALLS: &str = "##fileformat=VCFv4.2\n\
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n\
chr1\t100\t.\tA\tG\t60\tPASS\tDP=10\n\
chr1\t200\t.\tC\tT\t60\tPASS\tDP=12\n\
chr2\t300\t.\tT\tC\t60\tPASS\tDP=13\n";

    const DB_HEADER: &str = "##fileformat=VCFv4.2\n\
##INFO=<ID=SAO,Number=1,Type=Integer,Description=\"Variant Allele Origin\">\n\
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n";

    fn args(dir: &std::path::Path) -> FilterArgs {
        let calls = dir.join("calls.vcf");
        std::fs::write(&calls, CALLS).unwrap();
        let snp_db = dir.join("dbsnp.vcf");
        std::fs::write(&snp_db, format!("{DB_HEADER}chr1\t100\trs1\tA\tG\t.\t.\tSAO=2\n")).unwrap();
        let cancer_db = dir.join("cosmic.vcf");
        std::fs::write(&cancer_db, format!("{DB_HEADER}chr2\t300\tCOSM1\tT\tC\t.\t.\t.\n")).unwrap();

        FilterArgs {
            calls,
            snp_db,
            cancer_db: Some(cancer_db),
            output: Some(dir.join("filtered.vcf")),
            keep_somatic_origin: false,
            keep_cancer_hits: false,
        }
    }

    #[test]
    fn test_filter_writes_survivors() {
        let dir = tempfile::tempdir().unwrap();
        let args = args(dir.path());

        let summary = run_filter(&args).unwrap();
        assert_eq!(summary.retained, 1);

        let written = std::fs::read_to_string(dir.path().join("filtered.vcf")).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[2], "chr1\t200\t.\tC\tT\t60\tPASS\tDP=12");
    }

    #[test]
    fn test_keep_flags() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = args(dir.path());
        args.keep_cancer_hits = true;

        let summary = run_filter(&args).unwrap();
        assert_eq!(summary.retained, 2);
        assert_eq!(summary.somatic_origin, 1);
        assert_eq!(summary.cancer_hits, 0);
    }

    #[test]
    fn test_malformed_calls_is_filter_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = args(dir.path());
        std::fs::write(&args.calls, "chr1\tnot-a-position\t.\tA\tG\t.\t.\t.\n").unwrap();
        args.output = None;

        assert!(matches!(run_filter(&args), Err(FilterError::Malformed { .. })));
    }
}
