//! Ingest progress reporting.
//!
//! The pipeline reports each stage transition so users see where a long
//! import is. Progress is emitted on **stderr** so stdout remains parseable
//! for scripts.

use serde::Serialize;
use std::fmt;
use std::io::Write;

/// Stage of the ingest pipeline.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineStage {
    Initializing,
    ValidatingArchive,
    Extracting,
    DetectingLayout,
    DumpingConversations,
    ResolvingAssets,
    OrganizingMedia,
    ValidatingDumpster,
    Completed,
    Failed,
}

impl PipelineStage {
    /// Progress checkpoint at which this stage begins. `Failed` has none of
    /// its own; it is reported at the last checkpoint reached.
    pub fn percent(self) -> u8 {
        match self {
            PipelineStage::Initializing | PipelineStage::ValidatingArchive => 0,
            PipelineStage::Extracting => 10,
            PipelineStage::DetectingLayout => 30,
            PipelineStage::DumpingConversations => 40,
            PipelineStage::ResolvingAssets => 70,
            PipelineStage::OrganizingMedia => 85,
            PipelineStage::ValidatingDumpster => 95,
            PipelineStage::Completed => 100,
            PipelineStage::Failed => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PipelineStage::Initializing => "initializing",
            PipelineStage::ValidatingArchive => "validating-archive",
            PipelineStage::Extracting => "extracting",
            PipelineStage::DetectingLayout => "detecting-layout",
            PipelineStage::DumpingConversations => "dumping-conversations",
            PipelineStage::ResolvingAssets => "resolving-assets",
            PipelineStage::OrganizingMedia => "organizing-media",
            PipelineStage::ValidatingDumpster => "validating-dumpster",
            PipelineStage::Completed => "completed",
            PipelineStage::Failed => "failed",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single progress event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub stage: PipelineStage,
    pub progress: u8,
    pub message: String,
}

/// Reports ingest progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: `[ 40%] dumping-conversations  Dumping 12 conversations`.
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = format!(
            "[{:>3}%] {}  {}\n",
            event.progress, event.stage, event.message
        );
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(line.as_bytes());
        let _ = err.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = serde_json::json!({
            "event": "progress",
            "stage": event.stage,
            "progress": event.progress,
            "message": event.message,
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
            let _ = err.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

/// Collects events in memory.
#[derive(Default)]
pub struct RecordingProgress {
    events: std::sync::Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgress {
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl ProgressReporter for RecordingProgress {
    fn report(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
