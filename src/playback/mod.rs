//! Playback enhancement: sponsor-segment skipping, in-stream ad bypass, and
//! auto-repeat, expressed as a pure state machine over media snapshots.

pub mod sponsor;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::storage::Settings;

/// A time range to skip, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SponsorSegment {
    pub start: f64,
    pub end: f64,
}

impl SponsorSegment {
    /// Containment with a trailing guard: positions within `guard` of the
    /// end are treated as already past it, so a seek to the boundary cannot
    /// re-trigger.
    pub fn contains(&self, position: f64, guard: f64) -> bool {
        position >= self.start && position < self.end - guard
    }
}

/// What the embedding reports about the active media element on every
/// playback-position update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MediaSnapshot {
    pub position: f64,
    pub duration: f64,
    pub playback_rate: f64,
    pub ended: bool,
    /// The player container signals an ad is showing.
    pub ad_showing: bool,
    /// The host page's own skip control is present.
    pub skip_control_visible: bool,
}

/// Actions for the embedding to apply to the media element.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackAction {
    Seek(f64),
    SetRate(f64),
    ClickSkipControl,
    Restart,
}

pub struct PlaybackEnhancer {
    segments: Vec<SponsorSegment>,
    video_id: Option<String>,
    rate_boosted: bool,
    skip_guard: f64,
    boost_rate: f64,
}

impl PlaybackEnhancer {
    pub fn new(skip_guard: f64, boost_rate: f64) -> Self {
        Self {
            segments: Vec::new(),
            video_id: None,
            rate_boosted: false,
            skip_guard,
            boost_rate,
        }
    }

    pub fn video_id(&self) -> Option<&str> {
        self.video_id.as_deref()
    }

    pub fn segments(&self) -> &[SponsorSegment] {
        &self.segments
    }

    /// Replaces the segment list wholesale for a new video. Segments for a
    /// different id never mix.
    pub fn set_segments(&mut self, video_id: &str, segments: Vec<SponsorSegment>) {
        debug!(video_id, count = segments.len(), "sponsor segments replaced");
        self.video_id = Some(video_id.to_string());
        self.segments = segments;
    }

    /// One scheduler tick. Ad handling wins over everything else while an ad
    /// is showing; the boosted playback rate is restored as soon as the ad
    /// condition clears.
    pub fn tick(&mut self, media: &MediaSnapshot, flags: &Settings) -> Vec<PlaybackAction> {
        let mut actions = Vec::new();

        if flags.ad_blocker_enabled && media.ad_showing {
            if media.skip_control_visible {
                actions.push(PlaybackAction::ClickSkipControl);
            } else {
                if media.duration.is_finite() && media.position < media.duration {
                    actions.push(PlaybackAction::Seek(media.duration));
                }
                if !self.rate_boosted {
                    actions.push(PlaybackAction::SetRate(self.boost_rate));
                    self.rate_boosted = true;
                }
            }
            return actions;
        }

        if self.rate_boosted {
            actions.push(PlaybackAction::SetRate(1.0));
            self.rate_boosted = false;
        }

        if flags.sponsor_block_enabled {
            if let Some(segment) = self
                .segments
                .iter()
                .find(|s| s.contains(media.position, self.skip_guard))
            {
                actions.push(PlaybackAction::Seek(segment.end));
            }
        }

        if flags.auto_repeat_enabled && media.ended {
            actions.push(PlaybackAction::Restart);
        }

        actions
    }
}
