//! Page-session wiring: one `Engine` owns the classifier, the scheduler and
//! the playback state for the page the embedding is currently showing, plus
//! the once-per-page cipher extraction and manifest cache.

use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

use crate::classifier::dom::PageDom;
use crate::classifier::ContentClassifier;
use crate::config::Config;
use crate::coordinator::{DebouncePolicy, MutationCoordinator, UrlWatcher};
use crate::core::messages::{self, Request};
use crate::core::metadata::{MediaKind, Statistics, StreamDescriptor};
use crate::extractors::cipher::{self, CipherPrograms};
use crate::extractors::manifest::{self, ManifestError};
use crate::playback::sponsor::{SegmentProvider, SponsorClient};
use crate::playback::{MediaSnapshot, PlaybackAction, PlaybackEnhancer};
use crate::storage::SettingsStore;
use crate::utils;

struct PageSession {
    url: String,
    dom: PageDom,
    raw_html: String,
    manifest: OnceLock<Option<Value>>,
    cipher: Arc<OnceLock<CipherPrograms>>,
    extraction: Option<JoinHandle<()>>,
}

impl Drop for PageSession {
    fn drop(&mut self) {
        // nothing may outlive the page
        if let Some(task) = self.extraction.take() {
            task.abort();
        }
    }
}

pub struct Engine {
    config: Config,
    store: Arc<dyn SettingsStore>,
    http: reqwest::Client,
    classifier: ContentClassifier,
    coordinator: MutationCoordinator,
    playback: PlaybackEnhancer,
    sponsor: Arc<dyn SegmentProvider>,
    location: UrlWatcher,
    session: Option<PageSession>,
}

impl Engine {
    pub fn new(config: Config, store: Arc<dyn SettingsStore>) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .cookie_store(true)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .expect("Failed to create HTTP client");

        let sponsor = Arc::new(SponsorClient::new(
            http.clone(),
            config.sponsor_api_base.clone(),
            Duration::from_secs(config.sponsor_min_fetch_interval_secs),
        ));

        Self {
            coordinator: MutationCoordinator::new(DebouncePolicy::from_config(&config)),
            playback: PlaybackEnhancer::new(config.sponsor_skip_guard_secs, config.ad_boost_rate),
            classifier: ContentClassifier::new(),
            sponsor,
            location: UrlWatcher::new(""),
            session: None,
            store,
            http,
            config,
        }
    }

    /// Swaps the sponsor-segment source, mainly for tests and embeddings
    /// with their own lookup.
    pub fn with_segment_provider(mut self, provider: Arc<dyn SegmentProvider>) -> Self {
        self.sponsor = provider;
        self
    }

    pub fn store(&self) -> &Arc<dyn SettingsStore> {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Replaces the whole page: a full load, not a single-page navigation.
    /// All per-document state (markers, memo, schedules, manifest cache,
    /// cipher programs) starts over; the previous extraction task is
    /// aborted.
    pub fn load_page(&mut self, url: &str, html: &str) {
        self.session = None; // drop first so the old task is aborted
        self.classifier.reset();
        self.coordinator = MutationCoordinator::new(DebouncePolicy::from_config(&self.config));
        self.location = UrlWatcher::new(url);

        self.session = Some(PageSession {
            url: url.to_string(),
            dom: PageDom::parse(html),
            raw_html: html.to_string(),
            manifest: OnceLock::new(),
            cipher: Arc::new(OnceLock::new()),
            extraction: None,
        });
        debug!(url, "page loaded");
    }

    /// Starts the once-per-page background cipher extraction. A page with no
    /// delivery-script reference leaves the transform permanently "not
    /// ready", which only drops cipher-protected entries.
    pub fn begin_cipher_extraction(&mut self) {
        let Some(session) = &mut self.session else {
            return;
        };
        if session.extraction.is_some() || session.cipher.get().is_some() {
            return;
        }
        let origin = origin_of(&session.url);
        let Some(player_url) = manifest::find_player_js_url(&session.raw_html, &origin) else {
            debug!("page references no delivery script");
            return;
        };

        let cell = session.cipher.clone();
        let http = self.http.clone();
        session.extraction = Some(tokio::spawn(async move {
            if let Some(source) = fetch_player_source(&http, &player_url).await {
                let programs = cipher::extract(&source);
                if cell.set(programs).is_ok() {
                    debug!("cipher programs ready");
                }
            }
        }));
    }

    /// Fetches and extracts inline instead of in the background. Used by the
    /// CLI; returns whether the signature transform came out usable.
    pub async fn ensure_cipher(&mut self) -> bool {
        let (player_url, cell) = {
            let Some(session) = &self.session else {
                return false;
            };
            if let Some(programs) = session.cipher.get() {
                return programs.is_ready();
            }
            let origin = origin_of(&session.url);
            match manifest::find_player_js_url(&session.raw_html, &origin) {
                Some(player_url) => (player_url, session.cipher.clone()),
                None => {
                    debug!("page references no delivery script");
                    return false;
                }
            }
        };

        match fetch_player_source(&self.http, &player_url).await {
            Some(source) => {
                let programs = cipher::extract(&source);
                let ready = programs.is_ready();
                let _ = cell.set(programs);
                ready
            }
            None => false,
        }
    }

    /// Feeds an already-obtained delivery script, e.g. from disk.
    pub fn install_player_source(&mut self, source: &str) -> bool {
        let Some(session) = &self.session else {
            return false;
        };
        let programs = cipher::extract(source);
        let ready = programs.is_ready();
        let _ = session.cipher.set(programs);
        ready
    }

    pub fn cipher_ready(&self) -> bool {
        self.session
            .as_ref()
            .and_then(|session| session.cipher.get())
            .map(CipherPrograms::is_ready)
            .unwrap_or(false)
    }

    /// Injects an already-materialized manifest value, taking precedence
    /// over scanning the page text. Must happen before the first resolve.
    pub fn set_manifest_value(&mut self, manifest: Value) {
        if let Some(session) = &self.session {
            let _ = session.manifest.set(Some(manifest));
        }
    }

    /// Appends dynamic content under the first match of `parent_selector`
    /// and records the mutation batch for the scheduler. Returns the number
    /// of nodes added.
    pub fn append_content(&mut self, parent_selector: &str, fragment: &str, now: Instant) -> usize {
        let Some(session) = &mut self.session else {
            return 0;
        };
        let Some(parent) = session
            .dom
            .find_first(parent_selector)
            .map(|el| el.id())
        else {
            debug!(parent_selector, "mutation parent not found");
            return 0;
        };
        let added = session.dom.append_fragment(parent, fragment);
        self.coordinator.record(added, now);
        added
    }

    /// Reports the current location. A change schedules the immediate and
    /// the delayed post-navigation passes.
    pub fn observe_location(&mut self, url: &str, now: Instant) -> bool {
        let changed = self.location.observe(url);
        if changed {
            debug!(url, "location changed");
            self.coordinator.on_navigation(now);
        }
        changed
    }

    /// When the current location is a short-form route, the watch URL to
    /// send the embedding to instead.
    pub fn shorts_redirect(&self) -> Option<String> {
        utils::shorts_redirect_target(self.location.current())
    }

    /// Runs a classification pass if the scheduler says one is due.
    pub fn pump(&mut self, now: Instant) -> usize {
        if self.coordinator.poll(now) {
            self.classify_now(now)
        } else {
            0
        }
    }

    /// Earliest instant `pump` could have work, for timer arming.
    pub fn next_wakeup(&self) -> Option<Instant> {
        self.coordinator.next_deadline()
    }

    /// Runs a classification pass immediately and folds the newly hidden
    /// count into the persisted statistics.
    pub fn classify_now(&mut self, now: Instant) -> usize {
        let flags = self.store.snapshot();
        let Some(session) = &self.session else {
            return 0;
        };
        let newly = self.classifier.classify(&session.dom, &flags);
        if newly > 0 {
            self.store.add_blocked(newly as u64);
        }
        self.coordinator.note_pass(now);
        newly
    }

    /// Re-applies the current settings: classify when anything is on,
    /// otherwise clear every marker so the embedding can restore display.
    pub fn on_settings_changed(&mut self, now: Instant) -> usize {
        let flags = self.store.snapshot();
        if flags.any_hiding_active() {
            self.classify_now(now)
        } else {
            let restored = self.classifier.unblock_all();
            if restored > 0 {
                debug!(restored, "all features off, markers cleared");
            }
            0
        }
    }

    pub fn unblock_all(&mut self) -> usize {
        self.classifier.unblock_all()
    }

    pub fn hidden_count(&self) -> usize {
        self.classifier.hidden_count()
    }

    /// Reconstructs the fetchable streams of `kind` for the current page.
    pub fn resolve_streams(&self, kind: MediaKind) -> Result<Vec<StreamDescriptor>, ManifestError> {
        let session = self.session.as_ref().ok_or(ManifestError::NotWatchPage)?;
        if utils::watch_video_id(&session.url).is_none() {
            return Err(ManifestError::NotWatchPage);
        }

        let manifest = session.manifest.get_or_init(|| {
            let located = manifest::locate_manifest(&session.raw_html);
            if located.is_none() {
                debug!("no player manifest located in page");
            }
            located
        });
        let Some(manifest) = manifest else {
            return Err(ManifestError::ManifestUnavailable);
        };

        Ok(manifest::resolve_streams(manifest, session.cipher.get(), kind))
    }

    pub fn statistics(&self) -> Statistics {
        let settings = self.store.snapshot();
        Statistics {
            blocked_count: settings.blocked_shorts_count,
            session_count: settings.session_count,
        }
    }

    /// One playback tick over the reported media state.
    pub fn playback_tick(&mut self, media: &MediaSnapshot) -> Vec<PlaybackAction> {
        let flags = self.store.snapshot();
        self.playback.tick(media, &flags)
    }

    /// Fetches sponsor segments for the current video when it changed.
    /// Results for a since-abandoned video are discarded.
    pub async fn refresh_sponsor_segments(&mut self) {
        if !self.store.snapshot().sponsor_block_enabled {
            return;
        }
        let Some(video_id) = utils::watch_video_id(self.location.current()) else {
            return;
        };
        if self.playback.video_id() == Some(video_id.as_str()) {
            return;
        }

        let segments = self.sponsor.fetch(&video_id).await;
        let still_current =
            utils::watch_video_id(self.location.current()).as_deref() == Some(video_id.as_str());
        if still_current {
            self.playback.set_segments(&video_id, segments);
        } else {
            debug!(video_id, "discarding stale sponsor segments");
        }
    }

    /// Protocol entry point. Never errors; every failure mode is a
    /// `{success:false, message}` response.
    pub fn handle_message(&mut self, raw: Value) -> Value {
        let request = match messages::parse_request(raw) {
            Ok(request) => request,
            Err(response) => return response,
        };

        match request {
            Request::Reinitialize { settings } => match self.store.set(&settings) {
                Ok(_) => {
                    self.on_settings_changed(Instant::now());
                    messages::success()
                }
                Err(e) => messages::failure(e.to_string()),
            },
            Request::GetVideoFormats => self.formats_response(MediaKind::Video),
            Request::GetAudioFormats => self.formats_response(MediaKind::Audio),
            Request::UpdateBlockedCount { count } => {
                let new_count = self.store.add_blocked(count);
                json!({ "success": true, "newCount": new_count })
            }
            Request::GetStatistics => {
                let statistics = self.statistics();
                json!({
                    "blockedCount": statistics.blocked_count,
                    "sessionCount": statistics.session_count,
                })
            }
            Request::IncrementSession => {
                let new_count = self.store.bump_session();
                json!({ "success": true, "newCount": new_count })
            }
            Request::BatchUpdate { updates } => match self.store.set(&updates) {
                Ok(_) => messages::success(),
                Err(e) => messages::failure(e.to_string()),
            },
        }
    }

    fn formats_response(&self, kind: MediaKind) -> Value {
        match self.resolve_streams(kind) {
            Ok(streams) => json!({ "success": true, "streams": streams }),
            Err(e) => messages::failure(e.to_string()),
        }
    }
}

fn origin_of(url: &str) -> String {
    let Ok(parsed) = Url::parse(url) else {
        return String::new();
    };
    let Some(host) = parsed.host_str() else {
        return String::new();
    };
    let mut origin = format!("{}://{}", parsed.scheme(), host);
    if let Some(port) = parsed.port() {
        origin.push_str(&format!(":{}", port));
    }
    origin
}

async fn fetch_player_source(http: &reqwest::Client, player_url: &str) -> Option<String> {
    let response = match http.get(player_url).send().await {
        Ok(response) => response,
        Err(e) => {
            warn!(player_url, "delivery script fetch failed: {}", e);
            return None;
        }
    };
    if !response.status().is_success() {
        warn!(player_url, status = %response.status(), "delivery script fetch rejected");
        return None;
    }
    match response.text().await {
        Ok(source) => Some(source),
        Err(e) => {
            warn!(player_url, "delivery script body unreadable: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemorySettingsStore;

    fn engine() -> Engine {
        Engine::new(Config::default(), Arc::new(MemorySettingsStore::default()))
    }

    #[test]
    fn test_resolve_off_watch_route() {
        let mut engine = engine();
        engine.load_page("https://www.youtube.com/feed/trending", "<html></html>");
        assert_eq!(
            engine.resolve_streams(MediaKind::Video),
            Err(ManifestError::NotWatchPage)
        );
    }

    #[test]
    fn test_resolve_without_manifest() {
        let mut engine = engine();
        engine.load_page(
            "https://www.youtube.com/watch?v=abc",
            "<html><body>no manifest here</body></html>",
        );
        assert_eq!(
            engine.resolve_streams(MediaKind::Video),
            Err(ManifestError::ManifestUnavailable)
        );
    }

    #[test]
    fn test_injected_manifest_takes_precedence() {
        let mut engine = engine();
        engine.load_page("https://www.youtube.com/watch?v=abc", "<html></html>");
        engine.set_manifest_value(json!({
            "streamingData": { "formats": [{
                "url": "https://cdn.example.com/v",
                "mimeType": "video/mp4",
                "qualityLabel": "720p"
            }]}
        }));
        let streams = engine.resolve_streams(MediaKind::Video).unwrap();
        assert_eq!(streams.len(), 1);
    }

    #[test]
    fn test_shorts_redirect_follows_location() {
        let mut engine = engine();
        engine.load_page("https://www.youtube.com/shorts/aaabbbccc11", "<html></html>");
        assert_eq!(
            engine.shorts_redirect(),
            Some("https://www.youtube.com/watch?v=aaabbbccc11".to_string())
        );

        engine.observe_location("https://www.youtube.com/watch?v=x", Instant::now());
        assert_eq!(engine.shorts_redirect(), None);
    }

    #[test]
    fn test_unknown_message_action() {
        let mut engine = engine();
        let response = engine.handle_message(json!({ "action": "doesNotExist" }));
        assert_eq!(response["success"], json!(false));
    }
}
