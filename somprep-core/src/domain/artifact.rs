//! Artifacts: files exchanged between stages
//!
//! An artifact is identified by its role in the pipeline plus a concrete path.
//! Probing goes through [`ArtifactProbe`] so planning can be tested against an
//! in-memory view of the filesystem.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::ArtifactError;

/// The 28-byte empty BGZF block every well-formed BAM file ends with
pub const BGZF_EOF: [u8; 28] = [
    0x1f, 0x8b, 0x08, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff, 0x06, 0x00, 0x42, 0x43, 0x02, 0x00,
    0x1b, 0x00, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// Role an artifact plays in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ArtifactRole {
    InputAlignment,
    Reference,
    TargetRegions,
    KnownVariants,
    MateFixed,
    Deduplicated,
    DuplicateMetrics,
    /// Realigner output before coordinate sorting
    RealignedUnsorted,
    Realigned,
    RecalibrationTable,
    Recalibrated,
    IndelQualAnnotated,
}

impl ArtifactRole {
    /// Whether artifacts of this role are read alignments
    pub fn is_alignment(&self) -> bool {
        matches!(
            self,
            ArtifactRole::InputAlignment
                | ArtifactRole::MateFixed
                | ArtifactRole::Deduplicated
                | ArtifactRole::RealignedUnsorted
                | ArtifactRole::Realigned
                | ArtifactRole::Recalibrated
                | ArtifactRole::IndelQualAnnotated
        )
    }

    pub fn format(&self) -> ArtifactFormat {
        if self.is_alignment() {
            ArtifactFormat::Bam
        } else {
            ArtifactFormat::Text
        }
    }
}

impl std::fmt::Display for ArtifactRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ArtifactRole::InputAlignment => "input alignment",
            ArtifactRole::Reference => "reference genome",
            ArtifactRole::TargetRegions => "target regions",
            ArtifactRole::KnownVariants => "known-variant database",
            ArtifactRole::MateFixed => "mate-fixed alignment",
            ArtifactRole::Deduplicated => "duplicate-marked alignment",
            ArtifactRole::DuplicateMetrics => "duplicate metrics",
            ArtifactRole::RealignedUnsorted => "unsorted realigned alignment",
            ArtifactRole::Realigned => "realigned alignment",
            ArtifactRole::RecalibrationTable => "recalibration table",
            ArtifactRole::Recalibrated => "recalibrated alignment",
            ArtifactRole::IndelQualAnnotated => "indel-quality annotated alignment",
        };
        write!(f, "{}", name)
    }
}

/// On-disk format, used to validate produced outputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArtifactFormat {
    /// BGZF-compressed alignment, must end with the BGZF EOF block
    Bam,
    /// Any non-empty file
    Text,
}

/// A file with a role in the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub role: ArtifactRole,
    pub path: PathBuf,
}

impl Artifact {
    pub fn new(role: ArtifactRole, path: impl Into<PathBuf>) -> Self {
        Self {
            role,
            path: path.into(),
        }
    }
}

/// Observed state of an existing file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArtifactState {
    pub size: u64,
    pub modified: SystemTime,
}

/// Read-only view of existing artifacts, consulted at planning time
pub trait ArtifactProbe: Send + Sync {
    /// Returns the state of the file at `path`, or `None` if it does not exist
    fn probe(&self, path: &Path) -> Option<ArtifactState>;
}

/// Probe backed by the real filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct FsProbe;

impl ArtifactProbe for FsProbe {
    fn probe(&self, path: &Path) -> Option<ArtifactState> {
        let metadata = std::fs::metadata(path).ok()?;
        if !metadata.is_file() {
            return None;
        }
        Some(ArtifactState {
            size: metadata.len(),
            modified: metadata.modified().ok()?,
        })
    }
}

/// Checks that a produced output exists and is well formed
pub fn validate_output(path: &Path, format: ArtifactFormat) -> Result<(), ArtifactError> {
    let metadata = std::fs::metadata(path).map_err(|_| ArtifactError::Missing(path.to_path_buf()))?;

    if metadata.len() == 0 {
        return Err(ArtifactError::Empty(path.to_path_buf()));
    }

    if format == ArtifactFormat::Bam {
        if metadata.len() < BGZF_EOF.len() as u64 {
            return Err(ArtifactError::Truncated(path.to_path_buf()));
        }

        let io_err = |source| ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut file = File::open(path).map_err(io_err)?;
        file.seek(SeekFrom::End(-(BGZF_EOF.len() as i64)))
            .map_err(io_err)?;
        let mut tail = [0u8; 28];
        file.read_exact(&mut tail).map_err(io_err)?;

        if tail != BGZF_EOF {
            return Err(ArtifactError::Truncated(path.to_path_buf()));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_role_formats() {
        assert_eq!(ArtifactRole::Realigned.format(), ArtifactFormat::Bam);
        assert_eq!(ArtifactRole::DuplicateMetrics.format(), ArtifactFormat::Text);
        assert!(!ArtifactRole::Reference.is_alignment());
    }

    #[test]
    fn test_fs_probe() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");

        assert!(FsProbe.probe(&path).is_none());
        std::fs::write(&path, b"abc").unwrap();
        assert_eq!(FsProbe.probe(&path).unwrap().size, 3);
        assert!(FsProbe.probe(dir.path()).is_none());
    }

    #[test]
    fn test_validate_bam_requires_eof_block() {
        let dir = tempfile::tempdir().unwrap();

        let good = dir.path().join("good.bam");
        let mut file = File::create(&good).unwrap();
        file.write_all(b"BAM-ish payload").unwrap();
        file.write_all(&BGZF_EOF).unwrap();
        drop(file);
        assert!(validate_output(&good, ArtifactFormat::Bam).is_ok());

        let truncated = dir.path().join("truncated.bam");
        std::fs::write(&truncated, vec![0x1f; 64]).unwrap();
        assert!(matches!(
            validate_output(&truncated, ArtifactFormat::Bam),
            Err(ArtifactError::Truncated(_))
        ));
        // Text validation only cares about content
        assert!(validate_output(&truncated, ArtifactFormat::Text).is_ok());
    }

    #[test]
    fn test_validate_missing_and_empty() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.txt");
        assert!(matches!(
            validate_output(&missing, ArtifactFormat::Text),
            Err(ArtifactError::Missing(_))
        ));

        let empty = dir.path().join("empty.txt");
        std::fs::write(&empty, b"").unwrap();
        assert!(matches!(
            validate_output(&empty, ArtifactFormat::Text),
            Err(ArtifactError::Empty(_))
        ));
    }
}
