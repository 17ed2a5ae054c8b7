//! Core data models used throughout the dumpster pipeline.
//!
//! Conversations are kept as raw [`serde_json::Value`]s so that each chat
//! file is written back exactly as exported; the types here are read-only
//! views over that JSON.

use serde::{Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;

/// An archive handed to the pipeline, either on disk or already in memory.
#[derive(Debug, Clone)]
pub enum ArchiveSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl ArchiveSource {
    /// Declared byte length (file size or buffer length).
    pub fn declared_size(&self) -> std::io::Result<u64> {
        match self {
            ArchiveSource::Path(p) => Ok(std::fs::metadata(p)?.len()),
            ArchiveSource::Bytes(b) => Ok(b.len() as u64),
        }
    }
}

/// What validation learned about an archive from its central directory.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveReport {
    pub declared_size: u64,
    pub extracted_size: u64,
    pub file_count: usize,
    pub max_ratio: f64,
}

/// Metadata view over one exported conversation.
#[derive(Debug, Clone)]
pub struct ConversationMeta {
    pub title: Option<String>,
    pub create_time: Option<f64>,
    pub update_time: Option<f64>,
}

impl ConversationMeta {
    /// Returns `None` when the record is not a JSON object.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        Some(Self {
            title: obj.get("title").and_then(Value::as_str).map(str::to_string),
            create_time: obj.get("create_time").and_then(Value::as_f64),
            update_time: obj.get("update_time").and_then(Value::as_f64),
        })
    }

    /// Timestamp used for ordering and for the filename date.
    pub fn sort_time(&self) -> f64 {
        self.update_time.or(self.create_time).unwrap_or(0.0)
    }
}

/// Identifies a conversation by the first node of its message mapping.
///
/// The root node (no parent) wins; ties and graphs without a root fall back
/// to the smallest key, and records without a mapping use their `id` or
/// `conversation_id` field.
pub fn conversation_id(value: &Value) -> Option<String> {
    if let Some(mapping) = value.get("mapping").and_then(Value::as_object) {
        let root = mapping
            .iter()
            .filter(|(_, node)| node.get("parent").map_or(true, Value::is_null))
            .map(|(k, _)| k)
            .min();
        if let Some(id) = root.or_else(|| mapping.keys().min()) {
            return Some(id.clone());
        }
    }
    ["id", "conversation_id"]
        .iter()
        .find_map(|k| value.get(*k).and_then(Value::as_str))
        .map(str::to_string)
}

/// The fields two conversations must share to count as the same record.
///
/// Message text is not part of the identity.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationIdentity {
    pub title: Option<String>,
    pub create_time: Option<f64>,
    pub update_time: Option<f64>,
    pub mapping_keys: Vec<String>,
}

impl ConversationIdentity {
    pub fn from_value(value: &Value) -> Option<Self> {
        let meta = ConversationMeta::from_value(value)?;
        let mut mapping_keys: Vec<String> = value
            .get("mapping")
            .and_then(Value::as_object)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        mapping_keys.sort();
        Some(Self {
            title: meta.title,
            create_time: meta.create_time,
            update_time: meta.update_time,
            mapping_keys,
        })
    }
}

pub const FILE_SERVICE_PREFIX: &str = "file-service://";
pub const SEDIMENT_PREFIX: &str = "sediment://";

/// Extensions the sediment address space leaves off its keys.
pub const MEDIA_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "webp", "wav", "mp3", "m4a", "ogg", "webm", "mp4", "mov",
];

fn is_plain_key(key: &str) -> bool {
    !key.is_empty() && !key.contains(['/', '\\']) && !key.contains("..")
}

/// An opaque reference to a media object embedded in conversation JSON.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AssetPointer {
    FileService(String),
    Sediment(String),
}

impl AssetPointer {
    /// Parse a `file-service://` or `sediment://` URI. Other strings are
    /// rejected, as are keys that are empty or could name a path (`/`, `\`
    /// or `..`), since keys end up joined onto the media root.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if let Some(key) = raw.strip_prefix(FILE_SERVICE_PREFIX) {
            is_plain_key(key).then(|| AssetPointer::FileService(key.to_string()))
        } else if let Some(key) = raw.strip_prefix(SEDIMENT_PREFIX) {
            is_plain_key(key).then(|| AssetPointer::Sediment(key.to_string()))
        } else {
            None
        }
    }

    /// The lookup key: the suffix after the prefix, minus a trailing media
    /// extension in the sediment space.
    pub fn raw_key(&self) -> &str {
        match self {
            AssetPointer::FileService(key) => key,
            AssetPointer::Sediment(key) => strip_media_extension(key),
        }
    }
}

fn strip_media_extension(key: &str) -> &str {
    match key.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty() && MEDIA_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) =>
        {
            stem
        }
        _ => key,
    }
}

impl fmt::Display for AssetPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetPointer::FileService(key) => write!(f, "{}{}", FILE_SERVICE_PREFIX, key),
            AssetPointer::Sediment(key) => write!(f, "{}{}", SEDIMENT_PREFIX, key),
        }
    }
}

impl Serialize for AssetPointer {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub const CT_IMAGE: &str = "image_asset_pointer";
pub const CT_AUDIO: &str = "audio_asset_pointer";
pub const CT_REALTIME: &str = "real_time_user_audio_video_asset_pointer";
pub const CT_VIDEO: &str = "video_container_asset_pointer";
pub const CT_TRANSCRIPT: &str = "audio_transcription";

/// A message content part, classified once when it is read.
#[derive(Debug, Clone, PartialEq)]
pub enum AssetPart {
    Image {
        pointer: AssetPointer,
        width: Option<u64>,
        height: Option<u64>,
        size_bytes: Option<u64>,
    },
    Audio {
        pointer: AssetPointer,
        format: Option<String>,
    },
    Video {
        pointer: AssetPointer,
    },
    Transcript {
        text: String,
    },
    /// A pointer-typed part whose pointer is absent or not a known URI.
    Missing {
        content_type: String,
        pointer: Option<String>,
    },
    Unknown {
        content_type: String,
    },
}

impl AssetPart {
    /// Classify one element of `message.content.parts`.
    ///
    /// Plain text parts yield nothing. A realtime audio/video part yields
    /// one entry per embedded pointer.
    pub fn from_part(part: &Value) -> Vec<AssetPart> {
        let Some(obj) = part.as_object() else {
            return Vec::new();
        };
        let content_type = obj
            .get("content_type")
            .and_then(Value::as_str)
            .unwrap_or_default();

        match content_type {
            CT_IMAGE => vec![pointer_part(part, CT_IMAGE, |pointer| AssetPart::Image {
                pointer,
                width: part.get("width").and_then(Value::as_u64),
                height: part.get("height").and_then(Value::as_u64),
                size_bytes: part.get("size_bytes").and_then(Value::as_u64),
            })],
            CT_AUDIO => vec![pointer_part(part, CT_AUDIO, |pointer| AssetPart::Audio {
                pointer,
                format: part
                    .get("format")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            })],
            CT_VIDEO => vec![pointer_part(part, CT_VIDEO, |pointer| {
                AssetPart::Video { pointer }
            })],
            CT_REALTIME => {
                let mut out = Vec::new();
                for key in [CT_AUDIO, CT_VIDEO] {
                    if let Some(nested) = obj.get(key).filter(|v| v.is_object()) {
                        let mut nested = nested.clone();
                        if let Some(map) = nested.as_object_mut() {
                            map.entry("content_type")
                                .or_insert_with(|| Value::String(key.to_string()));
                        }
                        out.extend(AssetPart::from_part(&nested));
                    }
                }
                if out.is_empty() {
                    out.push(AssetPart::Missing {
                        content_type: CT_REALTIME.to_string(),
                        pointer: None,
                    });
                }
                out
            }
            CT_TRANSCRIPT => vec![AssetPart::Transcript {
                text: part
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            }],
            other => vec![AssetPart::Unknown {
                content_type: other.to_string(),
            }],
        }
    }

    pub fn pointer(&self) -> Option<&AssetPointer> {
        match self {
            AssetPart::Image { pointer, .. }
            | AssetPart::Audio { pointer, .. }
            | AssetPart::Video { pointer } => Some(pointer),
            _ => None,
        }
    }

    pub fn content_type(&self) -> &str {
        match self {
            AssetPart::Image { .. } => CT_IMAGE,
            AssetPart::Audio { .. } => CT_AUDIO,
            AssetPart::Video { .. } => CT_VIDEO,
            AssetPart::Transcript { .. } => CT_TRANSCRIPT,
            AssetPart::Missing { content_type, .. } | AssetPart::Unknown { content_type } => {
                content_type
            }
        }
    }
}

fn pointer_part(
    part: &Value,
    content_type: &str,
    build: impl FnOnce(AssetPointer) -> AssetPart,
) -> AssetPart {
    let raw = part.get("asset_pointer").and_then(Value::as_str);
    match raw.and_then(AssetPointer::parse) {
        Some(pointer) => build(pointer),
        None => AssetPart::Missing {
            content_type: content_type.to_string(),
            pointer: raw.map(str::to_string),
        },
    }
}
