//! # Ingest Pipeline
//!
//! Turns one export archive into a dumpster. Stages run strictly in order:
//!
//! ```text
//! initializing → validating-archive → extracting → detecting-layout →
//! dumping-conversations → resolving-assets → organizing-media →
//! validating-dumpster → completed
//! ```
//!
//! Each transition is reported to the [`ProgressReporter`]. A stage-level
//! error moves the run to `failed` at the last checkpoint reached and is
//! returned to the caller. The scratch directory is dropped on every exit
//! path; on success it is closed explicitly so a removal failure is logged.
//!
//! Nothing is written under the dumpster root until the archive has been
//! validated, extracted and recognized. A dumpster directory created by a
//! run that then fails is removed again, so the name stays free for a retry.

use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::archive::{extract_archive, validate_archive, ScratchDir};
use crate::assets::{
    collect_asset_parts, resolve_all, AssetIndex, AssetResolver, LookupCache, MissingAsset,
    ASSETS_FILE,
};
use crate::config::Config;
use crate::dump::{dump_conversations, DumpOptions, DumpStats};
use crate::error::PipelineError;
use crate::layout::detect_layout;
use crate::media::{organize_media, MediaFailure};
use crate::models::ArchiveSource;
use crate::progress::{PipelineStage, ProgressEvent, ProgressReporter};
use crate::stats::DumpsterSummary;
use crate::validate::{validate_dumpster, CHATS_DIR, MEDIA_DIR};

#[derive(Debug, Clone, Copy, Default)]
pub struct IngestOptions {
    /// Allow ingesting into an existing dumpster.
    pub overwrite: bool,
    /// Log per-stage details at `info` instead of `debug`.
    pub verbose: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingStats {
    pub attempted: usize,
    pub processed: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestStats {
    pub chats: usize,
    pub assets: usize,
    pub media_files: usize,
    pub processing_stats: ProcessingStats,
}

/// Summary of a successful run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResult {
    pub success: bool,
    pub dumpster_name: String,
    pub dumpster_dir: PathBuf,
    pub stats: IngestStats,
    pub dump: DumpStats,
    pub missing_assets: Vec<MissingAsset>,
    pub media_failures: Vec<MediaFailure>,
    pub warnings: Vec<String>,
}

/// One ingest run. The lookup cache lives exactly as long as the pipeline.
pub struct Pipeline<'a> {
    config: &'a Config,
    reporter: &'a dyn ProgressReporter,
    cache: LookupCache,
    last_percent: u8,
    verbose: bool,
    /// Set once this run has created the dumpster directory itself.
    created_dir: Option<PathBuf>,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a Config, reporter: &'a dyn ProgressReporter) -> Self {
        Self {
            config,
            reporter,
            cache: LookupCache::new(config.assets.cache_capacity),
            last_percent: 0,
            verbose: false,
            created_dir: None,
        }
    }

    /// Ingest `source` into the dumpster called `name`.
    pub async fn run(
        &mut self,
        source: ArchiveSource,
        name: &str,
        options: &IngestOptions,
    ) -> Result<IngestResult, PipelineError> {
        self.verbose = options.verbose;
        self.created_dir = None;
        let outcome = self.run_stages(&source, name, options).await;
        let created = self.created_dir.take();
        match outcome {
            Ok(result) => Ok(result),
            Err(e) => {
                warn!("ingest of '{}' failed: {}", name, e);
                if let Some(dir) = created {
                    if let Err(rm) = tokio::fs::remove_dir_all(&dir).await {
                        warn!("could not remove partial dumpster {}: {}", dir.display(), rm);
                    }
                }
                self.reporter.report(ProgressEvent {
                    stage: PipelineStage::Failed,
                    progress: self.last_percent,
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn enter(&mut self, stage: PipelineStage, message: impl Into<String>) {
        let message = message.into();
        if self.verbose {
            info!("{}: {}", stage, message);
        } else {
            debug!("{}: {}", stage, message);
        }
        self.last_percent = stage.percent();
        self.reporter.report(ProgressEvent {
            stage,
            progress: self.last_percent,
            message,
        });
    }

    async fn run_stages(
        &mut self,
        source: &ArchiveSource,
        name: &str,
        options: &IngestOptions,
    ) -> Result<IngestResult, PipelineError> {
        let config = self.config;
        let mut warnings = Vec::new();

        self.enter(PipelineStage::Initializing, format!("Preparing dumpster '{}'", name));
        let dumpster_name = sanitize_dumpster_name(name)?;
        let dumpster_dir = config.dumpster.dumpster_dir(&dumpster_name);
        if !options.overwrite && tokio::fs::try_exists(&dumpster_dir).await? {
            return Err(PipelineError::DumpsterExists(dumpster_dir));
        }

        self.enter(PipelineStage::ValidatingArchive, "Checking archive limits");
        let report = validate_archive(source, &config.limits)?;
        debug!(
            "archive ok: {} bytes, {} entries, max ratio {:.1}",
            report.declared_size, report.file_count, report.max_ratio
        );

        self.enter(
            PipelineStage::Extracting,
            format!("Extracting {} entries", report.file_count),
        );
        let scratch = ScratchDir::create(&config.dumpster.scratch_root())?;
        let extraction = extract_archive(source, scratch.path(), &config.limits)?;
        if extraction.skipped_entries > 0 {
            warnings.push(format!(
                "skipped {} archive entries with unsafe or resource-fork paths",
                extraction.skipped_entries
            ));
        }

        self.enter(PipelineStage::DetectingLayout, "Locating conversations and media");
        let layout = detect_layout(scratch.path(), &config.layout)?;
        if !layout.media_detected {
            warnings.push(format!(
                "no media folder found; searching next to {}",
                layout.conversations.display()
            ));
        }

        self.enter(PipelineStage::DumpingConversations, "Writing chat files");
        let chats_dir = dumpster_dir.join(CHATS_DIR);
        let media_dir = dumpster_dir.join(MEDIA_DIR);
        if !tokio::fs::try_exists(&dumpster_dir).await? {
            self.created_dir = Some(dumpster_dir.clone());
        }
        tokio::fs::create_dir_all(&chats_dir).await?;
        tokio::fs::create_dir_all(&media_dir).await?;
        let dump = dump_conversations(
            &layout.conversations,
            &chats_dir,
            DumpOptions {
                overwrite: options.overwrite,
                preserve_original: config.dumpster.preserve_original,
            },
        )
        .await?;
        if dump.stats.errors > 0 {
            warnings.push(format!(
                "{} conversation records could not be dumped",
                dump.stats.errors
            ));
        }

        self.enter(
            PipelineStage::ResolvingAssets,
            format!("Resolving assets for {} chats", dump.stats.total),
        );
        let index = match &layout.asset_html {
            Some(html) => load_index(html, &mut warnings).await,
            None => AssetIndex::new(),
        };
        let parts = collect_asset_parts(&chats_dir).await?;
        let resolution = {
            let mut resolver = AssetResolver::new(&layout.media_root, &index, &mut self.cache);
            resolve_all(&parts, &mut resolver)
        };
        debug!(
            "resolved {} pointers, {} missing ({} cache hits)",
            resolution.resolved.len(),
            resolution.missing.len(),
            self.cache.hits()
        );

        self.enter(
            PipelineStage::OrganizingMedia,
            format!("Transferring {} media files", resolution.resolved.len()),
        );
        let media = organize_media(
            resolution.resolved.values(),
            &layout.media_root,
            &media_dir,
            config.dumpster.media_transfer,
        )
        .await?;
        let assets_path = dumpster_dir.join(ASSETS_FILE);
        let mut assets = existing_assets(&assets_path, &mut warnings).await;
        for (pointer, path) in resolution.to_index().iter() {
            let failed = media.failures.iter().any(|f| f.path == Path::new(path));
            if !failed {
                assets.insert(pointer.clone(), path.clone());
            }
        }
        assets.save(&assets_path).await?;

        self.enter(PipelineStage::ValidatingDumpster, "Validating dumpster");
        let check = validate_dumpster(&dumpster_dir).await;
        if !check.is_valid {
            return Err(PipelineError::DumpsterValidation {
                errors: check.errors,
            });
        }
        warnings.extend(check.warnings);

        let summary = DumpsterSummary::collect(&dumpster_dir)?;
        let result = IngestResult {
            success: true,
            dumpster_name,
            dumpster_dir,
            stats: IngestStats {
                chats: summary.chats,
                assets: assets.len(),
                media_files: summary.media_files,
                processing_stats: ProcessingStats {
                    attempted: dump.stats.total,
                    processed: dump.stats.processed,
                    errors: dump.stats.errors,
                },
            },
            dump: dump.stats,
            missing_assets: resolution.missing,
            media_failures: media.failures,
            warnings,
        };

        self.enter(
            PipelineStage::Completed,
            format!(
                "{} chats, {} media files, {} missing assets",
                result.stats.chats,
                result.stats.media_files,
                result.missing_assets.len()
            ),
        );
        if let Err(e) = scratch.close() {
            warn!("failed to remove scratch directory: {}", e);
        }
        Ok(result)
    }
}

async fn load_index(html: &Path, warnings: &mut Vec<String>) -> AssetIndex {
    match AssetIndex::load_html(html).await {
        Ok(index) => index,
        Err(e) => {
            warnings.push(format!("asset index {} unreadable: {}", html.display(), e));
            AssetIndex::new()
        }
    }
}

/// The pointer map already persisted by an earlier run, if any.
async fn existing_assets(path: &Path, warnings: &mut Vec<String>) -> AssetIndex {
    match AssetIndex::load(path).await {
        Ok(index) => index,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => AssetIndex::new(),
        Err(e) => {
            warnings.push(format!("replacing unreadable {}: {}", path.display(), e));
            AssetIndex::new()
        }
    }
}

/// Reduce a user-supplied name to a single safe path component.
pub fn sanitize_dumpster_name(name: &str) -> Result<String, PipelineError> {
    let cleaned = sanitize_filename::sanitize(name.trim());
    let cleaned = cleaned.trim();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        return Err(PipelineError::InvalidName(name.to_string()));
    }
    Ok(cleaned.to_string())
}
