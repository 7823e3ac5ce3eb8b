//! # vanced-ng
//!
//! Content suppression and stream extraction engine for video platform
//! pages.
//!
//! ## Features
//!
//! - Multi-strategy short-form content classification over a live page
//!   snapshot, with idempotent element markers
//! - Advertisement container removal with layout-aware promotion
//! - Signature and n-parameter cipher extraction from the platform's
//!   rotating delivery script, with a QuickJS fallback tier
//! - Stream URL reconstruction from the embedded player manifest
//! - Sponsor-segment skipping, ad playback bypass and auto-repeat
//! - Debounced reclassification under heavy DOM churn
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vanced_ng::{Engine, MediaKind, MemorySettingsStore};
//!
//! let config = vanced_ng::config::Config::default();
//! let store = Arc::new(MemorySettingsStore::default());
//! let mut engine = Engine::new(config, store);
//!
//! engine.load_page("https://www.youtube.com/watch?v=VIDEO", "<html>...</html>");
//! let streams = engine.resolve_streams(MediaKind::Video);
//! ```

pub mod classifier;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod core;
pub mod extractors;
pub mod playback;
pub mod storage;
pub mod utils;

pub use crate::core::{Engine, MediaKind, Statistics, StreamDescriptor};
pub use crate::storage::{MemorySettingsStore, Settings, SettingsStore};
