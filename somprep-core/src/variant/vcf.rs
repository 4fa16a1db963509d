//! Call-set and annotation-database I/O
//!
//! VCF text, optionally gzip/bgzip compressed (detected from the gzip magic
//! bytes). The header is parsed with noodles and its lines are kept verbatim
//! for output.

use flate2::read::MultiGzDecoder;
use noodles::vcf;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use tracing::debug;

use crate::error::{FilterError, FilterResult};
use crate::variant::record::{SnpOrigin, VariantKey, VariantRecord};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Ordered variant records plus their header
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallSet {
    pub header: Vec<String>,
    pub records: Vec<VariantRecord>,
}

impl CallSet {
    pub fn from_path(path: &Path) -> FilterResult<Self> {
        let reader = open(path)?;
        Self::from_reader(reader, &path.display().to_string())
    }

    pub fn from_reader<R: BufRead>(reader: R, origin: &str) -> FilterResult<Self> {
        let mut records = Vec::new();
        let header = for_each_record(reader, origin, |record, _| {
            records.push(record);
            Ok(())
        })?;

        debug!(
            "Read {} header line(s) and {} record(s) from {}",
            header.len(),
            records.len(),
            origin
        );
        Ok(CallSet { header, records })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Writes header and records exactly as they were read
    pub fn write<W: Write>(&self, mut writer: W) -> std::io::Result<()> {
        for line in &self.header {
            writeln!(writer, "{}", line)?;
        }
        for record in &self.records {
            writeln!(writer, "{}", record.raw())?;
        }
        writer.flush()
    }

    pub fn write_path(&self, path: &Path) -> FilterResult<()> {
        let write_err = |source| FilterError::Write {
            path: path.to_path_buf(),
            source,
        };
        let file = File::create(path).map_err(write_err)?;
        self.write(BufWriter::new(file)).map_err(write_err)
    }

    /// Positions present in this call set, used to restrict database loading
    pub fn loci(&self) -> HashSet<(String, u64)> {
        self.records
            .iter()
            .map(|record| (record.chrom.clone(), record.pos))
            .collect()
    }
}

/// SNP database entries keyed by exact allele, with their origin code
#[derive(Debug, Clone, Default)]
pub struct SnpDatabase {
    entries: HashMap<VariantKey, SnpOrigin>,
}

impl SnpDatabase {
    /// Loads the entries at the given loci (all entries when `loci` is `None`)
    pub fn from_path(path: &Path, loci: Option<&HashSet<(String, u64)>>) -> FilterResult<Self> {
        let reader = open(path)?;
        Self::from_reader(reader, &path.display().to_string(), loci)
    }

    pub fn from_reader<R: BufRead>(
        reader: R,
        origin: &str,
        loci: Option<&HashSet<(String, u64)>>,
    ) -> FilterResult<Self> {
        let mut db = SnpDatabase::default();

        for_each_record(reader, origin, |record, line_no| {
            if !at_loci(&record, loci) {
                return Ok(());
            }
            let snp_origin = record.snp_origin(origin, line_no)?;
            for key in record.keys() {
                db.insert(key, snp_origin);
            }
            Ok(())
        })?;

        debug!("Loaded {} SNP database allele(s) from {}", db.len(), origin);
        Ok(db)
    }

    /// Adds an entry. When an allele is listed more than once, a somatic
    /// origin wins over any other code.
    pub fn insert(&mut self, key: VariantKey, origin: SnpOrigin) {
        self.entries
            .entry(key)
            .and_modify(|existing| {
                if !existing.is_somatic() && origin.is_somatic() {
                    *existing = origin;
                }
            })
            .or_insert(origin);
    }

    /// Origin code of the first matching alternate allele of `record`
    pub fn lookup(&self, record: &VariantRecord) -> Option<SnpOrigin> {
        let mut hit: Option<SnpOrigin> = None;
        for key in record.keys() {
            if let Some(&origin) = self.entries.get(&key) {
                if origin.is_somatic() {
                    return Some(origin);
                }
                hit.get_or_insert(origin);
            }
        }
        hit
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Cancer-mutation database entries keyed by exact allele
#[derive(Debug, Clone, Default)]
pub struct CancerDatabase {
    entries: HashSet<VariantKey>,
}

impl CancerDatabase {
    pub fn from_path(path: &Path, loci: Option<&HashSet<(String, u64)>>) -> FilterResult<Self> {
        let reader = open(path)?;
        Self::from_reader(reader, &path.display().to_string(), loci)
    }

    pub fn from_reader<R: BufRead>(
        reader: R,
        origin: &str,
        loci: Option<&HashSet<(String, u64)>>,
    ) -> FilterResult<Self> {
        let mut db = CancerDatabase::default();

        for_each_record(reader, origin, |record, _| {
            if at_loci(&record, loci) {
                db.entries.extend(record.keys());
            }
            Ok(())
        })?;

        debug!("Loaded {} cancer database allele(s) from {}", db.len(), origin);
        Ok(db)
    }

    pub fn insert(&mut self, key: VariantKey) {
        self.entries.insert(key);
    }

    pub fn contains(&self, record: &VariantRecord) -> bool {
        record.keys().any(|key| self.entries.contains(&key))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn at_loci(record: &VariantRecord, loci: Option<&HashSet<(String, u64)>>) -> bool {
    loci.is_none_or(|loci| loci.contains(&(record.chrom.clone(), record.pos)))
}

fn open(path: &Path) -> FilterResult<Box<dyn BufRead>> {
    let read_err = |source| FilterError::Read {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = BufReader::new(File::open(path).map_err(read_err)?);

    let compressed = reader.fill_buf().map_err(read_err)?.starts_with(&GZIP_MAGIC);
    if compressed {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(reader))))
    } else {
        Ok(Box::new(reader))
    }
}

/// Parses the collected `#` lines as a VCF header
pub fn parse_header(lines: &[String], origin: &str) -> FilterResult<vcf::Header> {
    if lines.is_empty() {
        return Err(FilterError::malformed(origin, 1, "missing VCF header"));
    }

    let mut text = lines.join("\n");
    text.push('\n');
    text.parse::<vcf::Header>()
        .map_err(|e| FilterError::malformed(origin, 1, format!("invalid VCF header: {}", e)))
}

/// Feeds every data record with its 1-based line number and returns the
/// header lines
fn for_each_record<R, F>(reader: R, origin: &str, mut f: F) -> FilterResult<Vec<String>>
where
    R: BufRead,
    F: FnMut(VariantRecord, usize) -> FilterResult<()>,
{
    let mut header_lines = Vec::new();
    let mut header: Option<vcf::Header> = None;

    for (idx, line) in reader.lines().enumerate() {
        let line_no = idx + 1;
        let line = line.map_err(|source| FilterError::Read {
            path: origin.into(),
            source,
        })?;
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }

        if header.is_none() {
            if line.starts_with('#') {
                header_lines.push(line.to_string());
                continue;
            }
            header = Some(parse_header(&header_lines, origin)?);
        }
        let Some(parsed) = header.as_ref() else {
            continue;
        };

        f(VariantRecord::parse(line, parsed, origin, line_no)?, line_no)?;
    }

    Ok(header_lines)
}
