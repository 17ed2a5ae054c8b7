//! # Chat Dumpster
//!
//! Ingests chat-export ZIP archives into a normalized on-disk "dumpster":
//! one JSON file per conversation, the media those conversations reference,
//! and a pointer map tying the two together.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌──────────┐   ┌──────────────────┐
//! │ Archive  │──▶│  Scratch  │──▶│  Layout  │──▶│ Dump / Resolve / │
//! │ validate │   │  extract  │   │  detect  │   │ Organize media   │
//! └──────────┘   └───────────┘   └──────────┘   └────────┬─────────┘
//!                                                        ▼
//!                                          <root>/<name>/chats/*.json
//!                                                        media/...
//!                                                        assets.json
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! dumpster ingest export.zip --name 2024-export
//! dumpster validate 2024-export
//! dumpster stats 2024-export
//! dumpster resolve 2024-export file-service://file-abc123
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`archive`] | ZIP limit checks, scratch directories, safe extraction |
//! | [`layout`] | Locating conversations, asset index and media in an export |
//! | [`dump`] | Per-conversation chat files with dedup and collision suffixes |
//! | [`assets`] | Asset-pointer resolution and the lookup cache |
//! | [`media`] | Copying or moving resolved media into the dumpster |
//! | [`validate`] | Structural checks on a finished dumpster |
//! | [`pipeline`] | Stage orchestration and the ingest result |
//! | [`progress`] | Progress reporting on stderr |
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Error taxonomy |
//! | [`stats`] | Dumpster statistics |

pub mod archive;
pub mod assets;
pub mod config;
pub mod dump;
pub mod error;
pub mod layout;
pub mod media;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod stats;
pub mod validate;
