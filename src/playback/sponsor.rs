//! Sponsor-segment lookup keyed by video id.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use super::SponsorSegment;

/// Seam for the segment source so playback logic is testable without a
/// network.
#[async_trait]
pub trait SegmentProvider: Send + Sync {
    /// Fetches the segments for one video. Every failure mode degrades to an
    /// empty list.
    async fn fetch(&self, video_id: &str) -> Vec<SponsorSegment>;
}

#[derive(Debug, Deserialize)]
struct SegmentRecord {
    segment: Vec<f64>,
}

/// HTTP client for the public segment API, rate limited by a minimum
/// interval between fetches.
pub struct SponsorClient {
    http: Client,
    api_base: String,
    min_interval: Duration,
    last_fetch: Mutex<Option<Instant>>,
}

impl SponsorClient {
    pub fn new(http: Client, api_base: String, min_interval: Duration) -> Self {
        Self {
            http,
            api_base,
            min_interval,
            last_fetch: Mutex::new(None),
        }
    }

    fn rate_limited(&self) -> bool {
        let mut last = match self.last_fetch.lock() {
            Ok(guard) => guard,
            Err(_) => return false,
        };
        if let Some(at) = *last {
            if at.elapsed() < self.min_interval {
                return true;
            }
        }
        *last = Some(Instant::now());
        false
    }
}

#[async_trait]
impl SegmentProvider for SponsorClient {
    async fn fetch(&self, video_id: &str) -> Vec<SponsorSegment> {
        if self.rate_limited() {
            debug!(video_id, "segment fetch suppressed by rate limit");
            return Vec::new();
        }

        let url = format!(
            "{}?videoID={}&category=sponsor",
            self.api_base,
            urlencoding::encode(video_id)
        );
        let response = match self.http.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(video_id, "segment fetch failed: {}", e);
                return Vec::new();
            }
        };
        if !response.status().is_success() {
            debug!(video_id, status = %response.status(), "no segments available");
            return Vec::new();
        }

        match response.json::<Vec<SegmentRecord>>().await {
            Ok(records) => records
                .into_iter()
                .filter_map(|record| match record.segment.as_slice() {
                    [start, end, ..] if end > start => Some(SponsorSegment {
                        start: *start,
                        end: *end,
                    }),
                    _ => None,
                })
                .collect(),
            Err(e) => {
                warn!(video_id, "segment response did not parse: {}", e);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_record_shape() {
        let records: Vec<SegmentRecord> =
            serde_json::from_str(r#"[{"segment":[12.5,48.0]},{"segment":[90.0,90.0]}]"#).unwrap();
        let segments: Vec<SponsorSegment> = records
            .into_iter()
            .filter_map(|record| match record.segment.as_slice() {
                [start, end, ..] if end > start => Some(SponsorSegment {
                    start: *start,
                    end: *end,
                }),
                _ => None,
            })
            .collect();
        // the degenerate zero-length segment is discarded
        assert_eq!(segments, vec![SponsorSegment { start: 12.5, end: 48.0 }]);
    }

    #[tokio::test]
    async fn test_rate_limit_suppresses_back_to_back_fetches() {
        let client = SponsorClient::new(
            Client::new(),
            // unroutable; the first call fails fast and still counts
            "http://127.0.0.1:1/api/skipSegments".to_string(),
            Duration::from_secs(60),
        );
        let first = client.fetch("abc").await;
        assert!(first.is_empty());
        assert!(client.rate_limited());
    }
}
