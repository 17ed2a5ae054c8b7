//! Archive validation and extraction.
//!
//! [`validate_archive`] reads only the ZIP central directory and enforces the
//! configured limits (upload size, total extracted size, per-entry
//! compression ratio, entry count). Nothing touches the disk until it passes.
//! [`extract_archive`] then unpacks into a [`ScratchDir`] that removes itself
//! when dropped, so every exit path of a run cleans up.

use chrono::Utc;
use std::fs;
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::config::LimitsConfig;
use crate::error::{PipelineError, ValidationError};
use crate::models::{ArchiveReport, ArchiveSource};

/// Local file header, central directory header, data descriptor, and end of
/// central directory (an empty archive starts with it).
const ZIP_SIGNATURES: [[u8; 4]; 4] = [
    *b"PK\x03\x04",
    *b"PK\x01\x02",
    *b"PK\x07\x08",
    *b"PK\x05\x06",
];

/// macOS resource-fork folder some zip tools add next to the real content.
const RESOURCE_FORK_DIR: &str = "__MACOSX";

/// Check `source` against `limits` without extracting anything.
pub fn validate_archive(
    source: &ArchiveSource,
    limits: &LimitsConfig,
) -> Result<ArchiveReport, ValidationError> {
    let declared_size = source
        .declared_size()
        .map_err(|e| ValidationError::Unreadable(e.to_string()))?;
    if declared_size > limits.max_upload_size {
        return Err(ValidationError::UploadTooLarge {
            size: declared_size,
            limit: limits.max_upload_size,
        });
    }

    match source {
        ArchiveSource::Path(path) => {
            let file =
                fs::File::open(path).map_err(|e| ValidationError::Unreadable(e.to_string()))?;
            validate_reader(file, declared_size, limits)
        }
        ArchiveSource::Bytes(bytes) => {
            validate_reader(Cursor::new(bytes.as_slice()), declared_size, limits)
        }
    }
}

fn validate_reader<R: Read + Seek>(
    mut reader: R,
    declared_size: u64,
    limits: &LimitsConfig,
) -> Result<ArchiveReport, ValidationError> {
    let mut magic = Vec::with_capacity(4);
    (&mut reader)
        .take(4)
        .read_to_end(&mut magic)
        .map_err(|e| ValidationError::Unreadable(e.to_string()))?;
    if !ZIP_SIGNATURES.iter().any(|sig| magic == sig) {
        return Err(ValidationError::BadSignature { found: magic });
    }
    reader
        .seek(SeekFrom::Start(0))
        .map_err(|e| ValidationError::Unreadable(e.to_string()))?;

    let mut archive =
        zip::ZipArchive::new(reader).map_err(|e| ValidationError::Unreadable(e.to_string()))?;

    // Total uncompressed size
    let mut total: u64 = 0;
    for i in 0..archive.len() {
        let entry = archive
            .by_index_raw(i)
            .map_err(|e| ValidationError::Unreadable(e.to_string()))?;
        total = total.saturating_add(entry.size());
    }
    if total > limits.max_extracted_size {
        return Err(ValidationError::ExtractedTooLarge {
            total,
            limit: limits.max_extracted_size,
        });
    }

    // Per-entry compression ratio
    let mut max_ratio: f64 = 0.0;
    for i in 0..archive.len() {
        let entry = archive
            .by_index_raw(i)
            .map_err(|e| ValidationError::Unreadable(e.to_string()))?;
        if entry.is_dir() || entry.size() == 0 {
            continue;
        }
        let ratio = if entry.compressed_size() == 0 {
            f64::INFINITY
        } else {
            entry.size() as f64 / entry.compressed_size() as f64
        };
        if ratio > limits.max_compression_ratio as f64 {
            return Err(ValidationError::CompressionRatio {
                entry: entry.name().to_string(),
                ratio,
                limit: limits.max_compression_ratio,
            });
        }
        max_ratio = max_ratio.max(ratio);
    }

    // Entry count
    if archive.len() > limits.max_files_in_zip {
        return Err(ValidationError::TooManyFiles {
            count: archive.len(),
            limit: limits.max_files_in_zip,
        });
    }

    debug!(
        "archive ok: {} entries, {} bytes uncompressed, max ratio {:.1}",
        archive.len(),
        total,
        max_ratio
    );

    Ok(ArchiveReport {
        declared_size,
        extracted_size: total,
        file_count: archive.len(),
        max_ratio,
    })
}

/// A per-run scratch directory, removed when dropped.
///
/// Named `extract-<UTC timestamp>-<random>` so concurrent runs sharing a
/// scratch root never collide.
#[derive(Debug)]
pub struct ScratchDir {
    dir: TempDir,
}

impl ScratchDir {
    pub fn create(scratch_root: &Path) -> io::Result<Self> {
        fs::create_dir_all(scratch_root)?;
        let prefix = format!("extract-{}-", Utc::now().format("%Y%m%dT%H%M%S"));
        let dir = tempfile::Builder::new()
            .prefix(&prefix)
            .rand_bytes(8)
            .tempdir_in(scratch_root)?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Remove the directory now, reporting failures instead of ignoring them.
    pub fn close(self) -> io::Result<()> {
        self.dir.close()
    }
}

/// Counts from one extraction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionSummary {
    pub files_extracted: usize,
    pub bytes_written: u64,
    /// Entries with unsafe names or resource-fork entries.
    pub skipped_entries: usize,
}

/// Unpack `source` into `dest`.
///
/// Entry data is read through a reader bounded by what is left of
/// `limits.max_extracted_size`, so a central directory that understates
/// entry sizes still cannot overrun the limit.
pub fn extract_archive(
    source: &ArchiveSource,
    dest: &Path,
    limits: &LimitsConfig,
) -> Result<ExtractionSummary, PipelineError> {
    match source {
        ArchiveSource::Path(path) => {
            let file =
                fs::File::open(path).map_err(|e| PipelineError::extraction("open archive", e))?;
            extract_from(file, dest, limits)
        }
        ArchiveSource::Bytes(bytes) => extract_from(Cursor::new(bytes.as_slice()), dest, limits),
    }
}

fn extract_from<R: Read + Seek>(
    reader: R,
    dest: &Path,
    limits: &LimitsConfig,
) -> Result<ExtractionSummary, PipelineError> {
    let mut archive =
        zip::ZipArchive::new(reader).map_err(|e| PipelineError::extraction("open archive", e))?;

    let mut summary = ExtractionSummary::default();
    let mut budget = limits.max_extracted_size;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| PipelineError::extraction(&format!("read entry {}", i), e))?;

        let relative: PathBuf = match entry.enclosed_name() {
            Some(p) => p.to_path_buf(),
            None => {
                warn!("skipping unsafe archive entry: {}", entry.name());
                summary.skipped_entries += 1;
                continue;
            }
        };
        if is_resource_fork(&relative) {
            summary.skipped_entries += 1;
            continue;
        }

        let out_path = dest.join(&relative);
        if entry.is_dir() {
            fs::create_dir_all(&out_path)
                .map_err(|e| PipelineError::extraction("create directory", e))?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| PipelineError::extraction("create directory", e))?;
        }

        let mut outfile = fs::File::create(&out_path)
            .map_err(|e| PipelineError::extraction(&format!("create {}", relative.display()), e))?;
        let written = io::copy(
            &mut (&mut entry).take(budget.saturating_add(1)),
            &mut outfile,
        )
        .map_err(|e| PipelineError::extraction(&format!("write {}", relative.display()), e))?;

        if written > budget {
            return Err(PipelineError::Extraction(format!(
                "entry '{}' pushes extracted size past MAX_EXTRACTED_SIZE of {} bytes",
                relative.display(),
                limits.max_extracted_size
            )));
        }
        budget -= written;
        summary.files_extracted += 1;
        summary.bytes_written += written;
    }

    Ok(summary)
}

fn is_resource_fork(path: &Path) -> bool {
    matches!(
        path.components().next(),
        Some(Component::Normal(first)) if first == RESOURCE_FORK_DIR
    )
}
