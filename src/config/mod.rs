use serde::{Deserialize, Serialize};
use std::path::Path;

/// Engine tunables. Everything time-based is a plain integer so the config
/// file stays obvious.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub user_agent: String,
    pub http_timeout_secs: u64,

    // reclassification scheduling
    pub debounce_base_ms: u64,
    pub debounce_per_record_ms: u64,
    pub debounce_max_ms: u64,
    pub min_pass_interval_ms: u64,
    pub nav_immediate_pass_ms: u64,
    pub nav_followup_pass_ms: u64,
    /// Safety-net sweep between mutation batches; 0 disables it.
    pub periodic_sweep_secs: u64,
    /// Location polling fallback for hosts with no navigation events.
    pub location_poll_ms: u64,

    // playback enhancement
    pub sponsor_api_base: String,
    pub sponsor_min_fetch_interval_secs: u64,
    pub sponsor_skip_guard_secs: f64,
    pub ad_boost_rate: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36"
                .to_string(),
            http_timeout_secs: 30,
            debounce_base_ms: 100,
            debounce_per_record_ms: 10,
            debounce_max_ms: 500,
            min_pass_interval_ms: 250,
            nav_immediate_pass_ms: 100,
            nav_followup_pass_ms: 1_000,
            periodic_sweep_secs: 5,
            location_poll_ms: 1_000,
            sponsor_api_base: "https://sponsor.ajay.app/api/skipSegments".to_string(),
            sponsor_min_fetch_interval_secs: 10,
            sponsor_skip_guard_secs: 0.3,
            ad_boost_rate: 8.0,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }
}
