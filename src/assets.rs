//! Asset-pointer resolution.
//!
//! Conversation JSON references media through opaque pointers
//! (`file-service://…`, `sediment://…`). [`AssetResolver`] turns a pointer
//! into a file under the extracted media root:
//!
//! 1. the export's own asset index (from `chat.html`) when it has the pointer,
//! 2. the bare key and the key plus each image extension,
//! 3. any file whose name starts with the key.
//!
//! Each step searches the media root and its immediate subdirectories.
//! Directory lookups go through a [`LookupCache`] owned by the caller for
//! the length of one run.

use lru::LruCache;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::num::NonZeroUsize;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::models::{AssetPart, AssetPointer};

/// File name of the persisted pointer map inside a dumpster.
pub const ASSETS_FILE: &str = "assets.json";

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp"];
const HTML_INDEX_MARKER: &str = "assetsJson";

/// Pointer → file name map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetIndex {
    entries: BTreeMap<String, String>,
}

impl AssetIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, pointer: &str) -> Option<&str> {
        self.entries.get(pointer).map(String::as_str)
    }

    pub fn insert(&mut self, pointer: impl Into<String>, file_name: impl Into<String>) {
        self.entries.insert(pointer.into(), file_name.into());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.entries.iter()
    }

    pub async fn load_html(path: &Path) -> io::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        Ok(parse_asset_index_html(&String::from_utf8_lossy(&bytes)))
    }

    /// Load a persisted `assets.json`.
    pub async fn load(path: &Path) -> io::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        serde_json::from_slice(&bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    pub async fn save(&self, path: &Path) -> io::Result<()> {
        let body = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(path, body).await
    }
}

/// Read the `assetsJson = {...}` literal embedded in an export's HTML.
///
/// Returns an empty index when the literal is absent or malformed.
pub fn parse_asset_index_html(html: &str) -> AssetIndex {
    let mut index = AssetIndex::new();
    let Some(start) = html.find(HTML_INDEX_MARKER) else {
        return index;
    };
    let rest = &html[start + HTML_INDEX_MARKER.len()..];
    let Some(eq) = rest.find('=') else {
        return index;
    };
    let parsed = serde_json::Deserializer::from_str(&rest[eq + 1..])
        .into_iter::<Value>()
        .next();
    if let Some(Ok(Value::Object(map))) = parsed {
        for (pointer, name) in map {
            if let Some(name) = name.as_str() {
                index.insert(pointer, name);
            }
        }
    }
    index
}

/// What a directory contains, as seen once.
#[derive(Debug, Default)]
struct DirListing {
    files: Vec<String>,
    subdirs: Vec<PathBuf>,
}

/// Bounded memo of directory lookups for one pipeline run.
///
/// Least recently used entries are evicted once `capacity` is reached.
pub struct LookupCache {
    files: LruCache<(PathBuf, String), bool>,
    listings: LruCache<PathBuf, Arc<DirListing>>,
    hits: u64,
    misses: u64,
}

impl LookupCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            files: LruCache::new(capacity),
            listings: LruCache::new(capacity),
            hits: 0,
            misses: 0,
        }
    }

    /// Cached `dir/name` is-a-file check.
    pub fn file_exists(&mut self, dir: &Path, name: &str) -> bool {
        let key = (dir.to_path_buf(), name.to_string());
        if let Some(&exists) = self.files.get(&key) {
            self.hits += 1;
            return exists;
        }
        self.misses += 1;
        let exists = dir.join(name).is_file();
        self.files.put(key, exists);
        exists
    }

    fn listing(&mut self, dir: &Path) -> Arc<DirListing> {
        if let Some(listing) = self.listings.get(dir) {
            self.hits += 1;
            return Arc::clone(listing);
        }
        self.misses += 1;
        let listing = Arc::new(read_listing(dir));
        self.listings.put(dir.to_path_buf(), Arc::clone(&listing));
        listing
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn len(&self) -> usize {
        self.files.len() + self.listings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn read_listing(dir: &Path) -> DirListing {
    let mut listing = DirListing::default();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return listing;
    };
    for entry in entries.filter_map(|e| e.ok()) {
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            listing.subdirs.push(entry.path());
        } else if file_type.is_file() {
            listing
                .files
                .push(entry.file_name().to_string_lossy().to_string());
        }
    }
    listing.files.sort();
    listing.subdirs.sort();
    listing
}

/// A pointer that could not be matched to any file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingAsset {
    pub pointer: String,
    pub content_type: String,
}

/// Outcome of resolving one pointer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetLookup {
    /// Path relative to the media root.
    Found(PathBuf),
    Missing(MissingAsset),
}

pub struct AssetResolver<'a> {
    media_root: &'a Path,
    index: &'a AssetIndex,
    cache: &'a mut LookupCache,
}

impl<'a> AssetResolver<'a> {
    pub fn new(media_root: &'a Path, index: &'a AssetIndex, cache: &'a mut LookupCache) -> Self {
        Self {
            media_root,
            index,
            cache,
        }
    }

    pub fn resolve(&mut self, pointer: &AssetPointer, content_type: &str) -> AssetLookup {
        let key = pointer.raw_key().to_string();

        // Index first: it beats any heuristic match.
        if let Some(indexed) = self.index.get(&pointer.to_string()) {
            if let Some(found) = self.find_indexed(indexed) {
                debug!("{} -> {} (index)", pointer, found.display());
                return AssetLookup::Found(found);
            }
            debug!("{} indexed as {} but not on disk", pointer, indexed);
        }

        let mut candidates = vec![key.clone()];
        candidates.extend(IMAGE_EXTENSIONS.iter().map(|ext| format!("{}.{}", key, ext)));
        for candidate in &candidates {
            if let Some(found) = self.find_named(candidate) {
                debug!("{} -> {} (candidate)", pointer, found.display());
                return AssetLookup::Found(found);
            }
        }

        if let Some(found) = self.find_prefixed(&key) {
            debug!("{} -> {} (prefix)", pointer, found.display());
            return AssetLookup::Found(found);
        }

        AssetLookup::Missing(MissingAsset {
            pointer: pointer.to_string(),
            content_type: content_type.to_string(),
        })
    }

    /// The media root followed by its immediate subdirectories.
    fn search_dirs(&mut self) -> Vec<PathBuf> {
        let mut dirs = vec![self.media_root.to_path_buf()];
        dirs.extend(self.cache.listing(self.media_root).subdirs.iter().cloned());
        dirs
    }

    fn relative(&self, path: &Path) -> PathBuf {
        path.strip_prefix(self.media_root)
            .unwrap_or(path)
            .to_path_buf()
    }

    fn find_indexed(&mut self, indexed: &str) -> Option<PathBuf> {
        let indexed_path = Path::new(indexed);
        let is_safe = indexed_path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if is_safe && indexed_path.components().count() > 1 {
            let (dir, name) = (
                self.media_root.join(indexed_path.parent()?),
                indexed_path.file_name()?.to_str()?,
            );
            if self.cache.file_exists(&dir, name) {
                return Some(indexed_path.to_path_buf());
            }
        }
        let name = indexed_path.file_name()?.to_str()?;
        self.find_named(name)
    }

    fn find_named(&mut self, name: &str) -> Option<PathBuf> {
        for dir in self.search_dirs() {
            if self.cache.file_exists(&dir, name) {
                return Some(self.relative(&dir.join(name)));
            }
        }
        None
    }

    fn find_prefixed(&mut self, key: &str) -> Option<PathBuf> {
        for dir in self.search_dirs() {
            let listing = self.cache.listing(&dir);
            if let Some(name) = listing.files.iter().find(|f| f.starts_with(key)) {
                return Some(self.relative(&dir.join(name)));
            }
        }
        None
    }
}

/// Classify every content part in one conversation's message mapping.
pub fn asset_parts(conversation: &Value) -> Vec<AssetPart> {
    let Some(mapping) = conversation.get("mapping").and_then(Value::as_object) else {
        return Vec::new();
    };
    let mut parts = Vec::new();
    for node in mapping.values() {
        let Some(content_parts) = node
            .pointer("/message/content/parts")
            .and_then(Value::as_array)
        else {
            continue;
        };
        for part in content_parts {
            parts.extend(AssetPart::from_part(part));
        }
    }
    parts
}

/// Read every `*.json` chat file in `chats_dir` and collect their asset
/// parts, in file-name order.
///
/// Unreadable files are logged and skipped.
pub async fn collect_asset_parts(chats_dir: &Path) -> io::Result<Vec<AssetPart>> {
    let mut paths = Vec::new();
    let mut entries = tokio::fs::read_dir(chats_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|e| e == "json") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut out = Vec::new();
    for path in paths {
        let parsed = tokio::fs::read(&path)
            .await
            .map_err(|e| e.to_string())
            .and_then(|b| serde_json::from_slice::<Value>(&b).map_err(|e| e.to_string()));
        match parsed {
            Ok(value) => out.extend(asset_parts(&value)),
            Err(e) => warn!("skipping unreadable chat {}: {}", path.display(), e),
        }
    }
    Ok(out)
}

/// Every distinct pointer found, resolved once.
#[derive(Debug, Clone, Default)]
pub struct ResolutionReport {
    /// Pointer URI → path relative to the media root.
    pub resolved: BTreeMap<String, PathBuf>,
    pub missing: Vec<MissingAsset>,
}

impl ResolutionReport {
    /// The pointer map persisted as `assets.json`.
    pub fn to_index(&self) -> AssetIndex {
        let mut index = AssetIndex::new();
        for (pointer, path) in &self.resolved {
            let name = path
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            index.insert(pointer.clone(), name);
        }
        index
    }
}

/// Resolve each distinct pointer in `parts` once. Parts that carried no
/// usable pointer are reported as missing.
pub fn resolve_all(parts: &[AssetPart], resolver: &mut AssetResolver<'_>) -> ResolutionReport {
    let mut report = ResolutionReport::default();
    let mut seen = BTreeSet::new();

    for part in parts {
        match part {
            AssetPart::Missing {
                content_type,
                pointer,
            } => {
                report.missing.push(MissingAsset {
                    pointer: pointer.clone().unwrap_or_default(),
                    content_type: content_type.clone(),
                });
            }
            _ => {
                let Some(pointer) = part.pointer() else {
                    continue;
                };
                let uri = pointer.to_string();
                if !seen.insert(uri.clone()) {
                    continue;
                }
                match resolver.resolve(pointer, part.content_type()) {
                    AssetLookup::Found(path) => {
                        report.resolved.insert(uri, path);
                    }
                    AssetLookup::Missing(missing) => report.missing.push(missing),
                }
            }
        }
    }
    report
}
