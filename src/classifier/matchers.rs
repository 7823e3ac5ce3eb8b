//! Ordered short-form matcher registry.
//!
//! Each matcher is a pure scan over the page: it reports which nodes it
//! would hide, after applying the shared exclusion filter and its own
//! promote-to-ancestor rule. New heuristics append to the registry; nothing
//! here mutates the page or the marker table.

use std::collections::{HashMap, HashSet};

use ego_tree::NodeId;
use scraper::{ElementRef, Selector};

use crate::classifier::dom::{closest_named, PageDom};
use crate::utils;

/// Card elements that wrap a single piece of feed content. Matches inside a
/// card are promoted to the card so hiding does not leave partial tiles.
pub const CARD_NAMES: &[&str] = &[
    "ytd-video-renderer",
    "ytd-grid-video-renderer",
    "ytd-compact-video-renderer",
    "ytd-rich-item-renderer",
];

/// Shelf/reel/page-type containers. Matching one usually means the whole
/// surface is short-form content.
pub const PRIMARY_SELECTORS: &[&str] = &[
    "ytd-rich-shelf-renderer[is-shorts]",
    "ytd-reel-shelf-renderer",
    "[page-subtype=\"shorts\"]",
    "ytd-shorts",
];

/// Element-level short-form markers. The `:has()` entries mirror the page
/// markup but the selector engine rejects them; they are skipped like any
/// other unsupported selector.
pub const SECONDARY_SELECTORS: &[&str] = &[
    "ytd-video-renderer[is-shorts]",
    "ytd-grid-video-renderer[is-shorts]",
    "ytd-compact-video-renderer[is-shorts]",
    ".ytd-reel-video-renderer",
    "[is-shorts]",
    "[shorts]",
    "ytd-video-renderer:has([aria-label*=\"Shorts\"])",
    "ytd-rich-item-renderer:has([href*=\"/shorts/\"])",
];

const SHORT_FORM_CLASS_TOKENS: &[&str] = &["shorts", "reel", "vertical-video", "short-form"];

const SHORTS_LINK_SELECTOR: &str = "a[href*=\"/shorts/\"]";
const BADGE_SELECTOR: &str = ".badge-shape-wiz__text, .ytd-badge-supported-renderer";
const DURATION_SELECTOR: &str =
    "#time-status .badge-shape-wiz__text, ytd-thumbnail-overlay-time-status-renderer span";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Primary,
    Secondary,
    Heuristic,
}

/// Shared scan state: the marker table (read-only here) and the per-node
/// memo for the aspect/class heuristic.
pub struct MatchCtx<'a> {
    pub hidden: &'a HashSet<NodeId>,
    pub memo: &'a mut HashMap<NodeId, bool>,
}

impl MatchCtx<'_> {
    /// Marked nodes and anything inside them are excluded from every stage.
    pub fn excluded(&self, el: &ElementRef) -> bool {
        if self.hidden.contains(&el.id()) {
            return true;
        }
        el.ancestors().any(|node| self.hidden.contains(&node.id()))
    }
}

/// Scan result: `raw` counts selector hits before exclusion so tier
/// short-circuiting stays stable across repeated passes; `targets` is what
/// would actually be hidden.
#[derive(Debug, Default)]
pub struct Matches {
    pub raw: usize,
    pub targets: Vec<NodeId>,
}

pub trait ShortsMatcher: Send + Sync {
    fn name(&self) -> &'static str;
    fn tier(&self) -> Tier;
    fn scan(&self, page: &PageDom, ctx: &mut MatchCtx<'_>) -> Matches;
}

/// The default pipeline, in evaluation order.
pub fn default_matchers() -> Vec<Box<dyn ShortsMatcher>> {
    vec![
        Box::new(SelectorListMatcher::new(
            "structural-primary",
            Tier::Primary,
            PRIMARY_SELECTORS,
        )),
        Box::new(SelectorListMatcher::new(
            "structural-secondary",
            Tier::Secondary,
            SECONDARY_SELECTORS,
        )),
        Box::new(ShortsLinkMatcher::new()),
        Box::new(BadgeDurationMatcher::new()),
        Box::new(AspectRatioMatcher::new()),
    ]
}

pub struct SelectorListMatcher {
    name: &'static str,
    tier: Tier,
    selectors: Vec<Selector>,
}

impl SelectorListMatcher {
    pub fn new(name: &'static str, tier: Tier, raw: &[&str]) -> Self {
        Self {
            name,
            tier,
            selectors: raw.iter().filter_map(|s| PageDom::compile(s)).collect(),
        }
    }
}

impl ShortsMatcher for SelectorListMatcher {
    fn name(&self) -> &'static str {
        self.name
    }

    fn tier(&self) -> Tier {
        self.tier
    }

    fn scan(&self, page: &PageDom, ctx: &mut MatchCtx<'_>) -> Matches {
        let mut matches = Matches::default();
        let mut seen = HashSet::new();
        for selector in &self.selectors {
            for el in page.select_all(selector) {
                matches.raw += 1;
                if ctx.excluded(&el) || !seen.insert(el.id()) {
                    continue;
                }
                matches.targets.push(el.id());
            }
        }
        matches
    }
}

/// Any card containing a short-form route link is a whole-card match; bare
/// links outside a card are hidden on their own.
pub struct ShortsLinkMatcher {
    link: Option<Selector>,
}

impl ShortsLinkMatcher {
    pub fn new() -> Self {
        Self {
            link: PageDom::compile(SHORTS_LINK_SELECTOR),
        }
    }
}

impl Default for ShortsLinkMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ShortsMatcher for ShortsLinkMatcher {
    fn name(&self) -> &'static str {
        "shorts-link"
    }

    fn tier(&self) -> Tier {
        Tier::Heuristic
    }

    fn scan(&self, page: &PageDom, ctx: &mut MatchCtx<'_>) -> Matches {
        let mut matches = Matches::default();
        let Some(link_selector) = &self.link else {
            return matches;
        };
        let mut seen = HashSet::new();
        for link in page.select_all(link_selector) {
            matches.raw += 1;
            if ctx.excluded(&link) {
                continue;
            }
            let target = closest_named(link, CARD_NAMES).unwrap_or(link);
            if !ctx.excluded(&target) && seen.insert(target.id()) {
                matches.targets.push(target.id());
            }
        }
        matches
    }
}

/// Cards flagged by a badge, or by an under-a-minute duration combined with
/// a short-form link or the aspect/class heuristic.
pub struct BadgeDurationMatcher {
    cards: Vec<Selector>,
    badge: Option<Selector>,
    duration: Option<Selector>,
    shorts_link: Option<Selector>,
}

impl BadgeDurationMatcher {
    pub fn new() -> Self {
        Self {
            cards: CARD_NAMES.iter().filter_map(|s| PageDom::compile(s)).collect(),
            badge: PageDom::compile(BADGE_SELECTOR),
            duration: PageDom::compile(DURATION_SELECTOR),
            shorts_link: PageDom::compile(SHORTS_LINK_SELECTOR),
        }
    }
}

impl Default for BadgeDurationMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ShortsMatcher for BadgeDurationMatcher {
    fn name(&self) -> &'static str {
        "badge-duration"
    }

    fn tier(&self) -> Tier {
        Tier::Heuristic
    }

    fn scan(&self, page: &PageDom, ctx: &mut MatchCtx<'_>) -> Matches {
        let mut matches = Matches::default();
        for card_selector in &self.cards {
            for card in page.select_all(card_selector) {
                if ctx.excluded(&card) {
                    continue;
                }

                let badge_hit = self.badge.as_ref().is_some_and(|badge| {
                    card.select(badge).any(|el| {
                        el.text().collect::<String>().to_lowercase().contains("short")
                    })
                });
                if badge_hit {
                    matches.raw += 1;
                    matches.targets.push(card.id());
                    continue;
                }

                let duration_hit = self.duration.as_ref().is_some_and(|duration| {
                    card.select(duration)
                        .any(|el| utils::is_short_duration(&el.text().collect::<String>()))
                });
                if !duration_hit {
                    continue;
                }

                let shorts_link = self
                    .shorts_link
                    .as_ref()
                    .is_some_and(|link| card.select(link).next().is_some());
                if shorts_link || is_likely_short_form(card, ctx.memo) {
                    matches.raw += 1;
                    matches.targets.push(card.id());
                }
            }
        }
        matches
    }
}

/// Last-resort card scan using only the memoized aspect/class heuristic.
pub struct AspectRatioMatcher {
    cards: Vec<Selector>,
}

impl AspectRatioMatcher {
    pub fn new() -> Self {
        Self {
            cards: CARD_NAMES.iter().filter_map(|s| PageDom::compile(s)).collect(),
        }
    }
}

impl Default for AspectRatioMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ShortsMatcher for AspectRatioMatcher {
    fn name(&self) -> &'static str {
        "aspect-ratio"
    }

    fn tier(&self) -> Tier {
        Tier::Heuristic
    }

    fn scan(&self, page: &PageDom, ctx: &mut MatchCtx<'_>) -> Matches {
        let mut matches = Matches::default();
        for card_selector in &self.cards {
            for card in page.select_all(card_selector) {
                if ctx.excluded(&card) {
                    continue;
                }
                if is_likely_short_form(card, ctx.memo) {
                    matches.raw += 1;
                    matches.targets.push(card.id());
                }
            }
        }
        matches
    }
}

/// True when the element looks like short-form content: a thumbnail taller
/// than it is wide, or a short-form class token on the element or any
/// descendant. Memoized per node — the answer cannot change while the node
/// exists.
pub fn is_likely_short_form(el: ElementRef<'_>, memo: &mut HashMap<NodeId, bool>) -> bool {
    if let Some(&known) = memo.get(&el.id()) {
        return known;
    }

    let verdict = portrait_thumbnail(el) || has_short_form_class(el);
    memo.insert(el.id(), verdict);
    verdict
}

fn portrait_thumbnail(el: ElementRef<'_>) -> bool {
    for node in el.descendants() {
        let Some(img) = ElementRef::wrap(node) else {
            continue;
        };
        if img.value().name() != "img" {
            continue;
        }
        let width = img.value().attr("width").and_then(|v| v.parse::<u32>().ok());
        let height = img.value().attr("height").and_then(|v| v.parse::<u32>().ok());
        if let (Some(width), Some(height)) = (width, height) {
            if height > width {
                return true;
            }
        }
    }
    false
}

fn has_short_form_class(el: ElementRef<'_>) -> bool {
    let class_matches = |candidate: ElementRef<'_>| {
        candidate
            .value()
            .attr("class")
            .map(|classes| {
                let classes = classes.to_lowercase();
                SHORT_FORM_CLASS_TOKENS
                    .iter()
                    .any(|token| classes.contains(token))
            })
            .unwrap_or(false)
    };

    if class_matches(el) {
        return true;
    }
    el.descendants()
        .filter_map(ElementRef::wrap)
        .any(class_matches)
}
