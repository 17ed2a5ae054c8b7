//! Error taxonomy for the ingestion pipeline.
//!
//! Stage-level failures are [`PipelineError`]s and abort the run. Record-level
//! problems (one malformed conversation, one uncopiable media file, one
//! unresolvable pointer) never show up here; they are counted and returned
//! alongside a successful result.

use std::path::PathBuf;
use thiserror::Error;

/// An archive failed one of the pre-extraction security limits.
///
/// Raised before a single byte is written to disk.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("archive is {size} bytes, exceeds MAX_UPLOAD_SIZE of {limit} bytes")]
    UploadTooLarge { size: u64, limit: u64 },

    #[error("not a ZIP archive (leading bytes {found:02x?})")]
    BadSignature { found: Vec<u8> },

    #[error("archive expands to {total} bytes, exceeds MAX_EXTRACTED_SIZE of {limit} bytes")]
    ExtractedTooLarge { total: u64, limit: u64 },

    #[error(
        "entry '{entry}' has compression ratio {ratio:.1}:1, exceeds MAX_COMPRESSION_RATIO of {limit}:1"
    )]
    CompressionRatio { entry: String, ratio: f64, limit: u64 },

    #[error("archive holds {count} entries, exceeds MAX_FILES_IN_ZIP of {limit}")]
    TooManyFiles { count: usize, limit: usize },

    #[error("unreadable ZIP archive: {0}")]
    Unreadable(String),
}

/// One of the three things the layout detector looks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutPart {
    Conversations,
    AssetIndex,
    MediaRoot,
}

impl std::fmt::Display for LayoutPart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LayoutPart::Conversations => write!(f, "conversations file"),
            LayoutPart::AssetIndex => write!(f, "asset index HTML"),
            LayoutPart::MediaRoot => write!(f, "media folder"),
        }
    }
}

fn join_parts(parts: &[LayoutPart]) -> String {
    parts
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Fatal, stage-level pipeline failure.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("archive validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("unrecognized archive layout, could not locate: {}", join_parts(.missing))]
    LayoutDetection { missing: Vec<LayoutPart> },

    #[error("conversations file {}: {reason}", .path.display())]
    Format { path: PathBuf, reason: String },

    #[error("dumpster failed validation: {}", .errors.join("; "))]
    DumpsterValidation { errors: Vec<String> },

    #[error("dumpster already exists: {} (pass --overwrite to replace)", .0.display())]
    DumpsterExists(PathBuf),

    #[error("invalid dumpster name: '{0}'")]
    InvalidName(String),

    #[error("invalid media pattern: {0}")]
    Pattern(#[from] globset::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn extraction(context: &str, err: impl std::fmt::Display) -> Self {
        PipelineError::Extraction(format!("{}: {}", context, err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_messages_name_the_limit() {
        let err = ValidationError::TooManyFiles {
            count: 12,
            limit: 10,
        };
        assert!(err.to_string().contains("MAX_FILES_IN_ZIP"));

        let err = ValidationError::CompressionRatio {
            entry: "bomb.bin".into(),
            ratio: 1000.0,
            limit: 100,
        };
        let msg = err.to_string();
        assert!(msg.contains("MAX_COMPRESSION_RATIO"));
        assert!(msg.contains("bomb.bin"));
    }

    #[test]
    fn layout_error_lists_every_missing_part() {
        let err = PipelineError::LayoutDetection {
            missing: vec![LayoutPart::Conversations, LayoutPart::MediaRoot],
        };
        let msg = err.to_string();
        assert!(msg.contains("conversations file"));
        assert!(msg.contains("media folder"));
        assert!(!msg.contains("asset index"));
    }

    #[test]
    fn validation_converts_into_pipeline_error() {
        let err: PipelineError = ValidationError::Unreadable("eof".into()).into();
        assert!(matches!(err, PipelineError::Validation(_)));
    }
}
