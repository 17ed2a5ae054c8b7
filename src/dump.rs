//! Split an aggregate conversations file into one JSON file per conversation.
//!
//! Files are named `<YYYY-MM-DD>_<sanitized title>.json` after the UTC date
//! of the conversation's update (or create) time. When that name is taken,
//! the existing file and its numbered siblings (`<base>_<n>.json`) are
//! compared by identity: a match is a duplicate and is skipped, otherwise
//! the conversation is written under the next number after the highest one
//! in use. With `overwrite`, a file left by an earlier run is replaced:
//! the variant holding the same conversation if there is one, else the
//! unnumbered file.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::models::{conversation_id, ConversationIdentity, ConversationMeta};

const MAX_TITLE_CHARS: usize = 100;
const UNTITLED: &str = "Untitled";

#[derive(Debug, Clone, Copy, Default)]
pub struct DumpOptions {
    /// Replace chat files that existed before this run instead of comparing
    /// against them.
    pub overwrite: bool,
    /// Keep the source file after a successful dump.
    pub preserve_original: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DumpStats {
    /// Files written, including collision-resolved ones.
    pub processed: usize,
    pub skipped_duplicates: usize,
    pub collisions_resolved: usize,
    pub errors: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Default)]
pub struct DumpOutcome {
    pub stats: DumpStats,
    pub written: Vec<PathBuf>,
}

/// Why a single record could not be dumped. Never fatal to the batch.
#[derive(Debug, Error)]
enum RecordError {
    #[error("record is not a JSON object")]
    NotAnObject,
    #[error("serialize: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("check {}: {source}", .path.display())]
    Stat {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("scan output directory: {0}")]
    Scan(std::io::Error),
}

enum DumpAction {
    Written { path: PathBuf, collision: bool },
    Duplicate(PathBuf),
}

/// Dump every conversation in `source` into `out_dir`.
pub async fn dump_conversations(
    source: &Path,
    out_dir: &Path,
    options: DumpOptions,
) -> Result<DumpOutcome, PipelineError> {
    let bytes = tokio::fs::read(source).await?;
    let value: Value = serde_json::from_slice(&bytes).map_err(|e| PipelineError::Format {
        path: source.to_path_buf(),
        reason: format!("invalid JSON: {}", e),
    })?;
    drop(bytes);
    let Value::Array(mut records) = value else {
        return Err(PipelineError::Format {
            path: source.to_path_buf(),
            reason: "top-level value is not an array".to_string(),
        });
    };

    // Newest first; stable, so equal timestamps keep export order.
    records.sort_by(|a, b| sort_time(b).total_cmp(&sort_time(a)));

    tokio::fs::create_dir_all(out_dir).await?;

    let mut outcome = DumpOutcome {
        stats: DumpStats {
            total: records.len(),
            ..DumpStats::default()
        },
        written: Vec::new(),
    };
    let mut written_this_run: HashSet<PathBuf> = HashSet::new();

    for (idx, record) in records.iter().enumerate() {
        match dump_one(record, out_dir, options, &written_this_run).await {
            Ok(DumpAction::Written { path, collision }) => {
                debug!("wrote {}", path.display());
                outcome.stats.processed += 1;
                if collision {
                    outcome.stats.collisions_resolved += 1;
                }
                written_this_run.insert(path.clone());
                outcome.written.push(path);
            }
            Ok(DumpAction::Duplicate(existing)) => {
                debug!("duplicate of {}, skipped", existing.display());
                outcome.stats.skipped_duplicates += 1;
            }
            Err(e) => {
                let label = conversation_id(record).unwrap_or_else(|| format!("#{}", idx));
                warn!("conversation {} not dumped: {}", label, e);
                outcome.stats.errors += 1;
            }
        }
    }

    if !options.preserve_original && outcome.stats.processed > 0 {
        if let Err(e) = tokio::fs::remove_file(source).await {
            warn!("could not remove {}: {}", source.display(), e);
        }
    }

    info!(
        "dumped {} of {} conversations ({} duplicates, {} collisions, {} errors)",
        outcome.stats.processed,
        outcome.stats.total,
        outcome.stats.skipped_duplicates,
        outcome.stats.collisions_resolved,
        outcome.stats.errors
    );
    Ok(outcome)
}

async fn dump_one(
    record: &Value,
    out_dir: &Path,
    options: DumpOptions,
    written_this_run: &HashSet<PathBuf>,
) -> Result<DumpAction, RecordError> {
    let meta = ConversationMeta::from_value(record).ok_or(RecordError::NotAnObject)?;
    let base = base_filename(&meta);
    let primary = out_dir.join(format!("{}.json", base));
    let body = serde_json::to_vec_pretty(record)?;

    let exists = tokio::fs::try_exists(&primary)
        .await
        .map_err(|source| RecordError::Stat {
            path: primary.clone(),
            source,
        })?;
    if !exists {
        write_chat(&primary, &body).await?;
        return Ok(DumpAction::Written {
            path: primary,
            collision: false,
        });
    }

    let replaceable = |path: &Path| options.overwrite && !written_this_run.contains(path);
    let identity = ConversationIdentity::from_value(record);
    let variants = existing_variants(out_dir, &base)
        .await
        .map_err(RecordError::Scan)?;
    for (n, path) in &variants {
        if load_identity(path).await.is_some_and(|id| Some(id) == identity) {
            if !replaceable(path.as_path()) {
                return Ok(DumpAction::Duplicate(path.clone()));
            }
            write_chat(path, &body).await?;
            return Ok(DumpAction::Written {
                path: path.clone(),
                collision: *n > 0,
            });
        }
    }

    if replaceable(primary.as_path()) {
        write_chat(&primary, &body).await?;
        return Ok(DumpAction::Written {
            path: primary,
            collision: false,
        });
    }

    let next = variants.iter().map(|(n, _)| *n).max().unwrap_or(0) + 1;
    let path = out_dir.join(format!("{}_{}.json", base, next));
    write_chat(&path, &body).await?;
    Ok(DumpAction::Written {
        path,
        collision: true,
    })
}

async fn write_chat(path: &Path, body: &[u8]) -> Result<(), RecordError> {
    tokio::fs::write(path, body)
        .await
        .map_err(|source| RecordError::Write {
            path: path.to_path_buf(),
            source,
        })
}

/// `<base>.json` (as 0) and every `<base>_<n>.json` in `dir`, sorted by n.
async fn existing_variants(dir: &Path, base: &str) -> std::io::Result<Vec<(u32, PathBuf)>> {
    let primary = format!("{}.json", base);
    let prefix = format!("{}_", base);
    let mut variants = Vec::new();

    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        if name == primary {
            variants.push((0, entry.path()));
        } else if let Some(n) = name
            .strip_prefix(&prefix)
            .and_then(|rest| rest.strip_suffix(".json"))
            .and_then(|n| n.parse::<u32>().ok())
        {
            variants.push((n, entry.path()));
        }
    }
    variants.sort();
    Ok(variants)
}

async fn load_identity(path: &Path) -> Option<ConversationIdentity> {
    let bytes = tokio::fs::read(path).await.ok()?;
    let value: Value = serde_json::from_slice(&bytes).ok()?;
    ConversationIdentity::from_value(&value)
}

fn sort_time(record: &Value) -> f64 {
    ConversationMeta::from_value(record)
        .map(|m| m.sort_time())
        .unwrap_or(0.0)
}

/// `<YYYY-MM-DD>_<sanitized title>` without extension.
pub fn base_filename(meta: &ConversationMeta) -> String {
    format!(
        "{}_{}",
        utc_date(meta.sort_time()),
        sanitize_title(meta.title.as_deref().unwrap_or_default())
    )
}

fn utc_date(epoch_secs: f64) -> String {
    chrono::DateTime::from_timestamp(epoch_secs.floor() as i64, 0)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "1970-01-01".to_string())
}

/// Make a conversation title safe to use as a file name.
pub fn sanitize_title(title: &str) -> String {
    let cleaned = sanitize_filename::sanitize(title);
    let joined = cleaned.split_whitespace().collect::<Vec<_>>().join("_");
    let is_edge = |c: char| c == '.' || c == '_' || c == '-';
    let truncated: String = joined
        .trim_matches(is_edge)
        .chars()
        .take(MAX_TITLE_CHARS)
        .collect();
    let trimmed = truncated.trim_end_matches(is_edge);
    if trimmed.is_empty() {
        UNTITLED.to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    // 2024-03-01T12:00:00Z
    const MARCH_1: f64 = 1_709_294_400.0;

    fn conv(title: &str, update_time: f64, keys: &[&str]) -> Value {
        let mapping: serde_json::Map<String, Value> = keys
            .iter()
            .map(|k| (k.to_string(), json!({"id": k, "parent": null, "children": []})))
            .collect();
        json!({
            "title": title,
            "create_time": update_time - 60.0,
            "update_time": update_time,
            "mapping": mapping,
        })
    }

    fn write_source(dir: &Path, records: &[Value]) -> PathBuf {
        let path = dir.join("conversations.json");
        fs::write(&path, serde_json::to_vec(records).unwrap()).unwrap();
        path
    }

    fn keep() -> DumpOptions {
        DumpOptions {
            overwrite: false,
            preserve_original: true,
        }
    }

    fn json_files(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn writes_one_file_per_conversation_newest_first() {
        let tmp = TempDir::new().unwrap();
        let source = write_source(
            tmp.path(),
            &[
                conv("Old chat", MARCH_1 - 86_400.0 * 30.0, &["a"]),
                conv("New chat", MARCH_1, &["b"]),
            ],
        );
        let out = tmp.path().join("chats");

        let outcome = dump_conversations(&source, &out, keep()).await.unwrap();
        assert_eq!(outcome.stats.processed, 2);
        assert_eq!(outcome.stats.total, 2);
        assert_eq!(outcome.written[0], out.join("2024-03-01_New_chat.json"));
        assert_eq!(outcome.written[1], out.join("2024-01-31_Old_chat.json"));
    }

    #[tokio::test]
    async fn second_dump_skips_everything() {
        let tmp = TempDir::new().unwrap();
        let records = vec![
            conv("One", MARCH_1, &["a"]),
            conv("Two", MARCH_1 + 10.0, &["b"]),
            conv("Three", MARCH_1 + 20.0, &["c"]),
        ];
        let source = write_source(tmp.path(), &records);
        let out = tmp.path().join("chats");

        dump_conversations(&source, &out, keep()).await.unwrap();
        let second = dump_conversations(&source, &out, keep()).await.unwrap();
        assert_eq!(second.stats.processed, 0);
        assert_eq!(second.stats.skipped_duplicates, 3);
        assert_eq!(json_files(&out).len(), 3);
    }

    #[tokio::test]
    async fn previously_dumped_conversation_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("chats");
        let second = conv("Second", MARCH_1, &["s1", "s2"]);

        let first_source = tmp.path().join("first.json");
        fs::write(&first_source, serde_json::to_vec(&[second.clone()]).unwrap()).unwrap();
        dump_conversations(&first_source, &out, keep())
            .await
            .unwrap();

        let source = write_source(
            tmp.path(),
            &[
                conv("First", MARCH_1 + 100.0, &["f"]),
                second,
                conv("Third", MARCH_1 - 100.0, &["t"]),
            ],
        );
        let outcome = dump_conversations(&source, &out, keep()).await.unwrap();
        assert_eq!(outcome.stats.processed, 2);
        assert_eq!(outcome.stats.skipped_duplicates, 1);
        assert_eq!(outcome.stats.collisions_resolved, 0);
    }

    #[tokio::test]
    async fn same_name_different_mapping_gets_suffix() {
        let tmp = TempDir::new().unwrap();
        let source = write_source(
            tmp.path(),
            &[
                conv("Same", MARCH_1, &["a"]),
                conv("Same", MARCH_1, &["b"]),
            ],
        );
        let out = tmp.path().join("chats");

        let outcome = dump_conversations(&source, &out, keep()).await.unwrap();
        assert_eq!(outcome.stats.processed, 2);
        assert_eq!(outcome.stats.collisions_resolved, 1);
        assert_eq!(
            json_files(&out),
            vec!["2024-03-01_Same.json", "2024-03-01_Same_1.json"]
        );

        // Running again finds both, including the suffixed one.
        let again = dump_conversations(&source, &out, keep()).await.unwrap();
        assert_eq!(again.stats.skipped_duplicates, 2);
        assert_eq!(again.stats.processed, 0);
    }

    #[tokio::test]
    async fn suffix_follows_highest_existing_number() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("chats");
        fs::create_dir_all(&out).unwrap();
        for (name, key) in [
            ("2024-03-01_Gap.json", "x0"),
            ("2024-03-01_Gap_1.json", "x1"),
            ("2024-03-01_Gap_3.json", "x3"),
        ] {
            fs::write(
                out.join(name),
                serde_json::to_vec(&conv("Gap", MARCH_1, &[key])).unwrap(),
            )
            .unwrap();
        }
        let source = write_source(tmp.path(), &[conv("Gap", MARCH_1, &["new"])]);

        let outcome = dump_conversations(&source, &out, keep()).await.unwrap();
        assert_eq!(outcome.written, vec![out.join("2024-03-01_Gap_4.json")]);
        assert_eq!(outcome.stats.collisions_resolved, 1);
    }

    #[tokio::test]
    async fn bad_records_are_counted_not_fatal() {
        let tmp = TempDir::new().unwrap();
        let source = write_source(
            tmp.path(),
            &[json!(42), conv("Good", MARCH_1, &["a"]), json!("text")],
        );
        let out = tmp.path().join("chats");

        let outcome = dump_conversations(&source, &out, keep()).await.unwrap();
        assert_eq!(outcome.stats.processed, 1);
        assert_eq!(outcome.stats.errors, 2);
        assert_eq!(outcome.stats.total, 3);
    }

    #[tokio::test]
    async fn non_array_is_a_format_error() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("conversations.json");
        fs::write(&source, r#"{"title": "not a list"}"#).unwrap();
        let err = dump_conversations(&source, &tmp.path().join("chats"), keep())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Format { .. }));

        fs::write(&source, "[{broken").unwrap();
        let err = dump_conversations(&source, &tmp.path().join("chats"), keep())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Format { .. }));
    }

    #[tokio::test]
    async fn source_removed_unless_preserved() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("chats");
        let source = write_source(tmp.path(), &[conv("A", MARCH_1, &["a"])]);
        dump_conversations(&source, &out, keep()).await.unwrap();
        assert!(source.exists());

        let source = write_source(tmp.path(), &[conv("B", MARCH_1, &["b"])]);
        dump_conversations(&source, &out, DumpOptions::default())
            .await
            .unwrap();
        assert!(!source.exists());
    }

    #[tokio::test]
    async fn overwrite_replaces_files_from_earlier_runs() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("chats");
        let source = write_source(tmp.path(), &[conv("Edit", MARCH_1, &["a"])]);
        dump_conversations(&source, &out, keep()).await.unwrap();

        let source = write_source(tmp.path(), &[conv("Edit", MARCH_1, &["a", "b"])]);
        let options = DumpOptions {
            overwrite: true,
            preserve_original: true,
        };
        let outcome = dump_conversations(&source, &out, options).await.unwrap();
        assert_eq!(outcome.stats.processed, 1);
        assert_eq!(outcome.stats.collisions_resolved, 0);
        assert_eq!(json_files(&out), vec!["2024-03-01_Edit.json"]);
        let stored: Value =
            serde_json::from_slice(&fs::read(out.join("2024-03-01_Edit.json")).unwrap()).unwrap();
        assert_eq!(stored["mapping"].as_object().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn overwrite_replaces_the_matching_variant_when_order_changes() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("chats");
        let source = write_source(
            tmp.path(),
            &[
                conv("Same", MARCH_1 + 100.0, &["a"]),
                conv("Same", MARCH_1, &["b"]),
            ],
        );
        dump_conversations(&source, &out, keep()).await.unwrap();
        assert_eq!(json_files(&out), vec!["2024-03-01_Same.json", "2024-03-01_Same_1.json"]);

        // "a" was edited and now sorts after "b"
        let source = write_source(
            tmp.path(),
            &[
                conv("Same", MARCH_1 - 100.0, &["a"]),
                conv("Same", MARCH_1, &["b"]),
                conv("Same", MARCH_1 - 200.0, &["c"]),
            ],
        );
        let options = DumpOptions {
            overwrite: true,
            preserve_original: true,
        };
        let outcome = dump_conversations(&source, &out, options).await.unwrap();
        assert_eq!(outcome.stats.processed, 3);
        assert_eq!(outcome.stats.skipped_duplicates, 0);

        let files = json_files(&out);
        assert_eq!(files.len(), 3);
        let mut keys: Vec<String> = files
            .iter()
            .flat_map(|name| {
                let stored: Value = serde_json::from_slice(&fs::read(out.join(name)).unwrap()).unwrap();
                stored["mapping"].as_object().unwrap().keys().cloned().collect::<Vec<_>>()
            })
            .collect();
        keys.sort();
        assert_eq!(keys, vec!["a", "b", "c"]);

        let stored: Value =
            serde_json::from_slice(&fs::read(out.join("2024-03-01_Same_1.json")).unwrap()).unwrap();
        assert!(stored["mapping"].get("b").is_some());
    }

    #[tokio::test]
    async fn unreadable_output_path_is_a_record_error() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("not-a-dir");
        fs::write(&blocker, "file").unwrap();

        let result = dump_one(&conv("Blocked", MARCH_1, &["a"]), &blocker, keep(), &HashSet::new()).await;
        assert!(matches!(result, Err(RecordError::Stat { .. })));
        assert_eq!(fs::read(&blocker).unwrap(), b"file");
    }

    #[test]
    fn titles_are_sanitized() {
        assert_eq!(sanitize_title("Hello World"), "Hello_World");
        assert_eq!(sanitize_title("a/b\\c:d*e?"), "abcde");
        assert_eq!(sanitize_title("  ...  "), UNTITLED);
        assert_eq!(sanitize_title(""), UNTITLED);
        assert_eq!(sanitize_title(&"x".repeat(300)).len(), MAX_TITLE_CHARS);
    }

    #[test]
    fn undated_conversations_use_epoch() {
        let meta = ConversationMeta::from_value(&json!({"title": "t"})).unwrap();
        assert_eq!(base_filename(&meta), "1970-01-01_t");
    }
}
