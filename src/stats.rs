//! Dumpster statistics.
//!
//! A quick summary of what a dumpster holds: chat count, media files and
//! their size, and how many pointers `assets.json` maps. Used by
//! `dumpster stats` and for the counts in an ingest result.

use anyhow::{bail, Result};
use std::collections::BTreeMap;
use std::path::Path;
use walkdir::WalkDir;

use crate::assets::ASSETS_FILE;
use crate::config::Config;
use crate::validate::{CHATS_DIR, MEDIA_DIR};

/// Media counts for one top-level folder of `media/` (`.` for files at the root).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FolderStats {
    pub files: usize,
    pub bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DumpsterSummary {
    pub chats: usize,
    pub media_files: usize,
    pub media_bytes: u64,
    pub assets: usize,
    /// Unix time of the most recently written chat.
    pub last_write_ts: Option<i64>,
    pub folders: BTreeMap<String, FolderStats>,
}

impl DumpsterSummary {
    /// Walk `dir` and count what it holds. Missing parts count as zero.
    pub fn collect(dir: &Path) -> std::io::Result<Self> {
        let mut summary = DumpsterSummary::default();

        let chats = dir.join(CHATS_DIR);
        if chats.is_dir() {
            for entry in std::fs::read_dir(&chats)?.filter_map(|e| e.ok()) {
                let path = entry.path();
                if !path.is_file() || !path.extension().is_some_and(|e| e == "json") {
                    continue;
                }
                summary.chats += 1;
                let modified = entry
                    .metadata()
                    .and_then(|m| m.modified())
                    .ok()
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|d| d.as_secs() as i64);
                summary.last_write_ts = summary.last_write_ts.max(modified);
            }
        }

        let media = dir.join(MEDIA_DIR);
        for entry in WalkDir::new(&media)
            .min_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);
            let rel = entry.path().strip_prefix(&media).unwrap_or(entry.path());
            let folder = if rel.components().count() > 1 {
                rel.components()
                    .next()
                    .map(|c| c.as_os_str().to_string_lossy().to_string())
                    .unwrap_or_else(|| ".".to_string())
            } else {
                ".".to_string()
            };
            let stats = summary.folders.entry(folder).or_default();
            stats.files += 1;
            stats.bytes += bytes;
            summary.media_files += 1;
            summary.media_bytes += bytes;
        }

        if let Ok(bytes) = std::fs::read(dir.join(ASSETS_FILE)) {
            if let Ok(serde_json::Value::Object(map)) = serde_json::from_slice(&bytes) {
                summary.assets = map.len();
            }
        }

        Ok(summary)
    }
}

/// Run the stats command: summarize one dumpster and print it.
pub fn run_stats(config: &Config, name: &str) -> Result<()> {
    let dir = config.dumpster.dumpster_dir(name);
    if !dir.is_dir() {
        bail!("no dumpster named '{}' under {}", name, config.dumpster.root.display());
    }
    let summary = DumpsterSummary::collect(&dir)?;

    println!("Dumpster: {}", name);
    println!("================================");
    println!();
    println!("  Location:    {}", dir.display());
    println!("  Chats:       {}", summary.chats);
    println!(
        "  Media:       {} files ({})",
        summary.media_files,
        format_bytes(summary.media_bytes)
    );
    println!("  Assets:      {}", summary.assets);
    println!(
        "  Last write:  {}",
        summary
            .last_write_ts
            .map(format_ts_relative)
            .unwrap_or_else(|| "never".to_string())
    );

    if !summary.folders.is_empty() {
        println!();
        println!("  By folder:");
        println!("  {:<32} {:>8} {:>12}", "FOLDER", "FILES", "SIZE");
        println!("  {}", "-".repeat(54));
        for (folder, stats) in &summary.folders {
            println!(
                "  {:<32} {:>8} {:>12}",
                folder,
                stats.files,
                format_bytes(stats.bytes)
            );
        }
    }

    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
