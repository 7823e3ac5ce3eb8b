use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;

use crate::config::Config;
use crate::core::{Engine, MediaKind};
use crate::storage::MemorySettingsStore;

#[derive(Parser)]
#[command(name = "vanced-ng")]
#[command(about = "Short-form content blocker and stream extraction toolkit")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to a TOML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Classify a saved page and report what would be hidden
    Classify {
        /// Path to the saved page HTML
        page: PathBuf,

        /// URL the snapshot was taken from
        #[arg(long, default_value = "https://www.youtube.com/")]
        url: String,
    },
    /// Resolve downloadable stream URLs from a saved watch page
    Streams {
        /// Path to the saved page HTML
        page: PathBuf,

        /// URL the snapshot was taken from
        #[arg(long, default_value = "https://www.youtube.com/watch?v=unknown")]
        url: String,

        /// Saved delivery script; fetched from the network when omitted
        #[arg(long)]
        player_js: Option<PathBuf>,

        /// Media kind to list: video or audio
        #[arg(short, long, default_value = "video")]
        kind: String,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    pub async fn run(&self) -> Result<()> {
        if self.verbose {
            println!("Verbose mode enabled");
        }

        let config = match &self.config {
            Some(path) => Config::load(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => Config::default(),
        };

        match &self.command {
            Command::Classify { page, url } => self.run_classify(config, page, url),
            Command::Streams {
                page,
                url,
                player_js,
                kind,
                json,
            } => {
                self.run_streams(config, page, url, player_js.as_deref(), kind, *json)
                    .await
            }
        }
    }

    fn run_classify(&self, config: Config, page: &PathBuf, url: &str) -> Result<()> {
        let html = std::fs::read_to_string(page)
            .with_context(|| format!("failed to read {}", page.display()))?;

        let store = Arc::new(MemorySettingsStore::default());
        let mut engine = Engine::new(config, store);
        engine.load_page(url, &html);

        let hidden = engine.classify_now(Instant::now());
        let statistics = engine.statistics();

        println!("Page: {}", page.display());
        println!("Hidden elements: {}", hidden);
        println!("Blocked total: {}", statistics.blocked_count);
        if let Some(redirect) = engine.shorts_redirect() {
            println!("Short-form route, would redirect to: {}", redirect);
        }

        Ok(())
    }

    async fn run_streams(
        &self,
        config: Config,
        page: &PathBuf,
        url: &str,
        player_js: Option<&std::path::Path>,
        kind: &str,
        as_json: bool,
    ) -> Result<()> {
        let kind = match kind {
            "video" => MediaKind::Video,
            "audio" => MediaKind::Audio,
            other => anyhow::bail!("unknown media kind: {}", other),
        };

        let html = std::fs::read_to_string(page)
            .with_context(|| format!("failed to read {}", page.display()))?;

        let store = Arc::new(MemorySettingsStore::default());
        let mut engine = Engine::new(config, store);
        engine.load_page(url, &html);

        match player_js {
            Some(path) => {
                let source = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                if !engine.install_player_source(&source) {
                    println!("Warning: no signature transform extracted; protected streams will be skipped");
                }
            }
            None => {
                if !engine.ensure_cipher().await {
                    println!("Warning: cipher not ready; protected streams will be skipped");
                }
            }
        }

        let streams = engine
            .resolve_streams(kind)
            .context("stream resolution failed")?;

        if as_json {
            println!("{}", serde_json::to_string_pretty(&json!({ "streams": streams }))?);
            return Ok(());
        }

        println!("Resolved {} stream(s):", streams.len());
        for (i, stream) in streams.iter().enumerate() {
            println!(
                "  {}: {} {} {} - {}",
                i + 1,
                stream.quality_label.as_deref().unwrap_or("-"),
                stream.container,
                stream
                    .bitrate
                    .map(|b| format!("{}bps", b))
                    .unwrap_or_else(|| "-".to_string()),
                stream.url
            );
        }

        Ok(())
    }
}
