//! Structural checks on a finished dumpster.

use serde::Serialize;
use serde_json::Value;
use std::path::Path;

use crate::assets::ASSETS_FILE;

pub const CHATS_DIR: &str = "chats";
pub const MEDIA_DIR: &str = "media";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DumpsterReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Check that `dir` has `chats/` with at least one chat, `media/`, and a
/// well-formed `assets.json` if one is present.
pub async fn validate_dumpster(dir: &Path) -> DumpsterReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let chats = dir.join(CHATS_DIR);
    match count_chat_files(&chats).await {
        Ok(0) => errors.push(format!("{} contains no chat files", chats.display())),
        Ok(_) => {}
        Err(e) => errors.push(format!("{} is not readable: {}", chats.display(), e)),
    }

    let media = dir.join(MEDIA_DIR);
    if !tokio::fs::metadata(&media)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
    {
        errors.push(format!("{} is missing", media.display()));
    }

    let assets = dir.join(ASSETS_FILE);
    match tokio::fs::read(&assets).await {
        Ok(bytes) => match serde_json::from_slice::<Value>(&bytes) {
            Ok(Value::Object(_)) => {}
            Ok(_) => errors.push(format!("{} is not a JSON object", assets.display())),
            Err(e) => errors.push(format!("{} is not valid JSON: {}", assets.display(), e)),
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warnings.push(format!("{} not found", assets.display()));
        }
        Err(e) => errors.push(format!("{} is not readable: {}", assets.display(), e)),
    }

    DumpsterReport {
        is_valid: errors.is_empty(),
        errors,
        warnings,
    }
}

async fn count_chat_files(chats: &Path) -> std::io::Result<usize> {
    let mut count = 0;
    let mut entries = tokio::fs::read_dir(chats).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|e| e == "json") && entry.file_type().await?.is_file() {
            count += 1;
        }
    }
    Ok(count)
}
