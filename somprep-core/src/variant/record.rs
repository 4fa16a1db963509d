//! Variant records
//!
//! Data lines are parsed with noodles against the file's VCF header. Only the
//! fields needed for matching are kept; the original line is kept too so
//! surviving records are written back byte-for-byte.

use noodles::vcf;
use noodles::vcf::variant::RecordBuf;
use noodles::vcf::variant::record_buf::info::field::Value;
use serde::{Deserialize, Serialize};

use crate::error::{FilterError, FilterResult};

/// INFO key carrying the dbSNP variant allele origin
pub const ORIGIN_KEY: &str = "SAO";

/// Origin of a SNP-database entry, from the dbSNP `SAO` INFO field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnpOrigin {
    Unspecified = 0,
    Germline = 1,
    Somatic = 2,
    Both = 3,
}

impl SnpOrigin {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(SnpOrigin::Unspecified),
            1 => Some(SnpOrigin::Germline),
            2 => Some(SnpOrigin::Somatic),
            3 => Some(SnpOrigin::Both),
            _ => None,
        }
    }

    /// The entry was itself observed in a somatic sample (codes 2 and 3)
    pub fn is_somatic(&self) -> bool {
        matches!(self, SnpOrigin::Somatic | SnpOrigin::Both)
    }
}

/// Exact match key: one per alternate allele
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VariantKey {
    pub chrom: String,
    pub pos: u64,
    pub reference: String,
    pub alternate: String,
}

/// One called variant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantRecord {
    pub chrom: String,
    /// 1-based position
    pub pos: u64,
    pub reference: String,
    pub alternates: Vec<String>,
    /// Raw `SAO` code, when the record carries one
    origin_code: Option<i32>,
    raw: String,
}

impl VariantRecord {
    /// Parses one VCF data line against `header`
    ///
    /// `origin` and `line_no` only label errors.
    pub fn parse(
        line: &str,
        header: &vcf::Header,
        origin: &str,
        line_no: usize,
    ) -> FilterResult<Self> {
        let malformed = |reason: String| FilterError::malformed(origin, line_no, reason);

        let mut reader = vcf::io::Reader::new(line.as_bytes());
        let mut buf = RecordBuf::default();
        reader
            .read_record_buf(header, &mut buf)
            .map_err(|e| malformed(e.to_string()))?;

        let chrom = buf.reference_sequence_name();
        if chrom.is_empty() {
            return Err(malformed("empty chromosome".to_string()));
        }

        let pos = buf
            .variant_start()
            .map(usize::from)
            .ok_or_else(|| malformed("missing position".to_string()))?;

        let reference = buf.reference_bases();
        if reference.is_empty() || reference == "." {
            return Err(malformed("missing reference allele".to_string()));
        }

        let alternates = buf
            .alternate_bases()
            .as_ref()
            .iter()
            .filter(|allele| allele.as_str() != ".")
            .map(|allele| allele.to_ascii_uppercase())
            .collect();

        let origin_code = match buf.info().get(ORIGIN_KEY) {
            None | Some(None) => None,
            Some(Some(Value::Integer(code))) => Some(*code),
            Some(Some(Value::String(text))) => Some(text.trim().parse::<i32>().map_err(|_| {
                malformed(format!("invalid {} value '{}'", ORIGIN_KEY, text))
            })?),
            Some(Some(other)) => {
                return Err(malformed(format!(
                    "invalid {} value {:?}",
                    ORIGIN_KEY, other
                )));
            }
        };

        Ok(Self {
            chrom: chrom.to_string(),
            pos: pos as u64,
            reference: reference.to_ascii_uppercase(),
            alternates,
            origin_code,
            raw: line.to_string(),
        })
    }

    /// The line this record was parsed from
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Allele origin from the `SAO` INFO field.
    ///
    /// Absent means unspecified.
    pub fn snp_origin(&self, origin: &str, line_no: usize) -> FilterResult<SnpOrigin> {
        let Some(code) = self.origin_code else {
            return Ok(SnpOrigin::Unspecified);
        };

        SnpOrigin::from_code(code).ok_or_else(|| {
            FilterError::malformed(
                origin,
                line_no,
                format!("invalid {} value '{}'", ORIGIN_KEY, code),
            )
        })
    }

    /// One key per alternate allele
    pub fn keys(&self) -> impl Iterator<Item = VariantKey> + '_ {
        self.alternates.iter().map(move |alternate| VariantKey {
            chrom: self.chrom.clone(),
            pos: self.pos,
            reference: self.reference.clone(),
            alternate: alternate.clone(),
        })
    }
}
