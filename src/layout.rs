//! Locate the conversations file, the asset-index HTML and the media folder
//! inside an extracted export.
//!
//! Export tools have moved these around between versions, so detection is a
//! set of structural predicates rather than a fixed path table. Each layout
//! part has an ordered list of [`LayoutStrategy`] values; the first one that
//! accepts a candidate wins. Candidates are ranked so that paths under the
//! conversations file's directory come first, then shallower paths, which
//! keeps the three results consistent with each other.

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use crate::config::LayoutConfig;
use crate::error::{LayoutPart, PipelineError};

const CONVERSATIONS_FILE: &str = "conversations.json";
const CHAT_HTML: &str = "chat.html";
const MEDIA_SUBFOLDERS: &[&str] = &["dalle-generations", "audio"];
const HTML_MARKERS: &[&str] = &["assetsJson", "file-service://", "sediment://"];
const MEDIA_PATTERNS: &[&str] = &[
    "file-*",
    "file_*",
    "*.{png,jpg,jpeg,gif,webp,wav,mp3,m4a,ogg,webm,mp4,mov}",
];

/// Where the three parts of an export live inside the scratch tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveLayout {
    pub conversations: PathBuf,
    pub asset_html: Option<PathBuf>,
    pub media_root: PathBuf,
    /// False when no media folder was found and `media_root` fell back to the
    /// conversations file's directory.
    pub media_detected: bool,
}

/// One path in the extracted tree.
#[derive(Debug, Clone)]
pub struct TreeEntry {
    pub path: PathBuf,
    pub depth: usize,
    pub is_dir: bool,
}

impl TreeEntry {
    fn file_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }

    fn has_extension(&self, exts: &[&str]) -> bool {
        self.path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| exts.iter().any(|x| e.eq_ignore_ascii_case(x)))
            .unwrap_or(false)
    }
}

/// A depth-limited snapshot of the extracted tree, walked once.
pub struct ExtractedTree {
    entries: Vec<TreeEntry>,
    children: BTreeMap<PathBuf, Vec<usize>>,
    media_matcher: GlobSet,
}

impl ExtractedTree {
    pub fn scan(root: &Path, max_depth: usize) -> Result<Self, PipelineError> {
        let mut entries = Vec::new();
        let walker = WalkDir::new(root)
            .max_depth(max_depth)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.file_name() != "__MACOSX");
        for entry in walker.filter_map(|e| e.ok()) {
            entries.push(TreeEntry {
                path: entry.path().to_path_buf(),
                depth: entry.depth(),
                is_dir: entry.file_type().is_dir(),
            });
        }

        let mut children: BTreeMap<PathBuf, Vec<usize>> = BTreeMap::new();
        for (idx, entry) in entries.iter().enumerate() {
            if entry.depth == 0 {
                continue;
            }
            if let Some(parent) = entry.path.parent() {
                children.entry(parent.to_path_buf()).or_default().push(idx);
            }
        }

        Ok(Self {
            entries,
            children,
            media_matcher: media_matcher()?,
        })
    }

    fn children_of(&self, dir: &Path) -> impl Iterator<Item = &TreeEntry> {
        self.children
            .get(dir)
            .into_iter()
            .flatten()
            .map(move |&i| &self.entries[i])
    }

    /// Entries ordered by preference: under `anchor` first, then shallower,
    /// then by path.
    fn ranked(&self, anchor: Option<&Path>) -> Vec<&TreeEntry> {
        let mut ranked: Vec<&TreeEntry> = self.entries.iter().collect();
        ranked.sort_by(|a, b| {
            let a_key = (!is_under(&a.path, anchor), a.depth, &a.path);
            let b_key = (!is_under(&b.path, anchor), b.depth, &b.path);
            a_key.cmp(&b_key)
        });
        ranked
    }

    fn is_media_file(&self, entry: &TreeEntry) -> bool {
        !entry.is_dir && self.media_matcher.is_match(entry.file_name())
    }
}

fn is_under(path: &Path, anchor: Option<&Path>) -> bool {
    anchor.is_some_and(|a| path.starts_with(a))
}

fn media_matcher() -> Result<GlobSet, globset::Error> {
    let mut builder = GlobSetBuilder::new();
    for pattern in MEDIA_PATTERNS {
        builder.add(GlobBuilder::new(pattern).case_insensitive(true).build()?);
    }
    builder.build()
}

/// A structural predicate that recognizes one layout part.
pub trait LayoutStrategy {
    fn name(&self) -> &'static str;
    fn accepts(&self, entry: &TreeEntry, tree: &ExtractedTree) -> bool;
}

/// `conversations.json` holding an array of conversations (possibly empty).
pub struct NamedConversationsFile;

impl LayoutStrategy for NamedConversationsFile {
    fn name(&self) -> &'static str {
        "named conversations.json"
    }

    fn accepts(&self, entry: &TreeEntry, _tree: &ExtractedTree) -> bool {
        !entry.is_dir
            && entry.file_name().eq_ignore_ascii_case(CONVERSATIONS_FILE)
            && is_conversation_array(&entry.path, true)
    }
}

/// Any JSON file holding a non-empty array of conversation-shaped objects.
pub struct ConversationShapedJson;

impl LayoutStrategy for ConversationShapedJson {
    fn name(&self) -> &'static str {
        "conversation-shaped JSON"
    }

    fn accepts(&self, entry: &TreeEntry, _tree: &ExtractedTree) -> bool {
        !entry.is_dir && entry.has_extension(&["json"]) && is_conversation_array(&entry.path, false)
    }
}

/// `chat.html` with embedded asset references.
pub struct NamedChatHtml;

impl LayoutStrategy for NamedChatHtml {
    fn name(&self) -> &'static str {
        "named chat.html"
    }

    fn accepts(&self, entry: &TreeEntry, _tree: &ExtractedTree) -> bool {
        !entry.is_dir
            && entry.file_name().eq_ignore_ascii_case(CHAT_HTML)
            && html_has_asset_references(&entry.path)
    }
}

/// Any HTML file with embedded asset references.
pub struct HtmlWithAssetReferences;

impl LayoutStrategy for HtmlWithAssetReferences {
    fn name(&self) -> &'static str {
        "HTML with asset references"
    }

    fn accepts(&self, entry: &TreeEntry, _tree: &ExtractedTree) -> bool {
        !entry.is_dir
            && entry.has_extension(&["html", "htm"])
            && html_has_asset_references(&entry.path)
    }
}

/// A directory holding `dalle-generations/` or `audio/`.
pub struct MediaSubfolders;

impl LayoutStrategy for MediaSubfolders {
    fn name(&self) -> &'static str {
        "media subfolders"
    }

    fn accepts(&self, entry: &TreeEntry, tree: &ExtractedTree) -> bool {
        entry.is_dir
            && tree.children_of(&entry.path).any(|child| {
                child.is_dir
                    && MEDIA_SUBFOLDERS
                        .iter()
                        .any(|m| child.file_name().eq_ignore_ascii_case(m))
            })
    }
}

/// A directory holding files that look like exported media.
pub struct MediaFilePatterns;

impl LayoutStrategy for MediaFilePatterns {
    fn name(&self) -> &'static str {
        "media file patterns"
    }

    fn accepts(&self, entry: &TreeEntry, tree: &ExtractedTree) -> bool {
        entry.is_dir
            && tree
                .children_of(&entry.path)
                .any(|child| tree.is_media_file(child))
    }
}

pub fn conversation_strategies() -> Vec<Box<dyn LayoutStrategy>> {
    vec![Box::new(NamedConversationsFile), Box::new(ConversationShapedJson)]
}

pub fn asset_index_strategies() -> Vec<Box<dyn LayoutStrategy>> {
    vec![Box::new(NamedChatHtml), Box::new(HtmlWithAssetReferences)]
}

pub fn media_strategies() -> Vec<Box<dyn LayoutStrategy>> {
    vec![Box::new(MediaSubfolders), Box::new(MediaFilePatterns)]
}

/// First strategy with an accepted candidate wins; within a strategy the
/// best-ranked candidate wins.
fn locate(
    tree: &ExtractedTree,
    strategies: &[Box<dyn LayoutStrategy>],
    anchor: Option<&Path>,
) -> Option<PathBuf> {
    let ranked = tree.ranked(anchor);
    for strategy in strategies {
        if let Some(hit) = ranked.iter().find(|e| strategy.accepts(e, tree)) {
            debug!("layout: {} matched {}", strategy.name(), hit.path.display());
            return Some(hit.path.clone());
        }
    }
    None
}

/// Detect the layout of the export extracted under `root`.
pub fn detect_layout(root: &Path, config: &LayoutConfig) -> Result<ArchiveLayout, PipelineError> {
    let tree = ExtractedTree::scan(root, config.max_depth)?;

    let conversations = locate(&tree, &conversation_strategies(), None);
    let anchor = conversations.as_deref().and_then(Path::parent);
    let asset_html = locate(&tree, &asset_index_strategies(), anchor);
    let media = locate(&tree, &media_strategies(), anchor);

    let mut missing = Vec::new();
    if conversations.is_none() {
        missing.push(LayoutPart::Conversations);
    }
    if asset_html.is_none() && config.require_asset_index {
        missing.push(LayoutPart::AssetIndex);
    }
    if media.is_none() && config.require_media {
        missing.push(LayoutPart::MediaRoot);
    }

    match conversations {
        Some(conversations) if missing.is_empty() => {
            let media_detected = media.is_some();
            let media_root = media
                .or_else(|| conversations.parent().map(Path::to_path_buf))
                .unwrap_or_else(|| root.to_path_buf());
            Ok(ArchiveLayout {
                conversations,
                asset_html,
                media_root,
                media_detected,
            })
        }
        _ => Err(PipelineError::LayoutDetection { missing }),
    }
}

fn is_conversation_array(path: &Path, allow_empty: bool) -> bool {
    let Ok(bytes) = std::fs::read(path) else {
        return false;
    };
    if bytes.iter().find(|b| !b.is_ascii_whitespace()) != Some(&b'[') {
        return false;
    }
    let Ok(Value::Array(items)) = serde_json::from_slice::<Value>(&bytes) else {
        return false;
    };
    if items.is_empty() {
        return allow_empty;
    }
    items.iter().take(3).all(is_conversation_shaped)
}

/// An object with a message mapping, or with both a title and a creation
/// time.
pub fn is_conversation_shaped(value: &Value) -> bool {
    match value.as_object() {
        Some(obj) => {
            obj.contains_key("mapping")
                || (obj.contains_key("title") && obj.contains_key("create_time"))
        }
        None => false,
    }
}

fn html_has_asset_references(path: &Path) -> bool {
    match std::fs::read(path) {
        Ok(bytes) => {
            let text = String::from_utf8_lossy(&bytes);
            HTML_MARKERS.iter().any(|m| text.contains(m))
        }
        Err(_) => false,
    }
}
