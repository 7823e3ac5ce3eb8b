//! Content classification: ordered short-form matching, advertisement
//! containers, and flag-gated layout elements, with an idempotent marker
//! table owned here and nowhere else.

pub mod dom;
pub mod matchers;

use std::collections::{HashMap, HashSet};

use ego_tree::NodeId;
use scraper::Selector;
use tracing::debug;

use crate::classifier::dom::{closest_named, PageDom};
use crate::classifier::matchers::{default_matchers, MatchCtx, ShortsMatcher, Tier};
use crate::storage::Settings;

/// Fixed advertisement container selectors. Each match is climbed to its
/// nearest layout ancestor so removal does not leave a hole in the feed.
const AD_SELECTORS: &[&str] = &[
    "ytd-display-ad-renderer",
    "ytd-ad-slot-renderer",
    "ytd-in-feed-ad-layout-renderer",
    "ytd-promoted-sparkles-web-renderer",
    "ytd-promoted-video-renderer",
    "ytd-search-pyv-renderer",
    ".ytd-companion-slot-renderer",
    "#masthead-ad",
    "#player-ads",
    ".ytp-ad-overlay-container",
];

const LAYOUT_ANCESTOR_NAMES: &[&str] = &[
    "ytd-rich-item-renderer",
    "ytd-rich-section-renderer",
    "ytd-item-section-renderer",
];

const END_SCREEN_SELECTORS: &[&str] = &[".ytp-ce-element"];
const INFO_CARD_SELECTORS: &[&str] = &[".ytp-cards-teaser", ".iv-branding"];
const WATERMARK_SELECTORS: &[&str] = &[".ytp-watermark"];
const STORIES_SELECTORS: &[&str] = &[
    "ytd-rich-section-renderer[is-stories]",
    "ytd-reel-shelf-renderer[is-stories]",
];

pub struct ContentClassifier {
    matchers: Vec<Box<dyn ShortsMatcher>>,
    ad_selectors: Vec<Selector>,
    end_screen: Vec<Selector>,
    info_card: Vec<Selector>,
    watermark: Vec<Selector>,
    stories: Vec<Selector>,
    hidden: HashSet<NodeId>,
    memo: HashMap<NodeId, bool>,
}

fn compile_all(raw: &[&str]) -> Vec<Selector> {
    raw.iter().filter_map(|s| PageDom::compile(s)).collect()
}

impl ContentClassifier {
    pub fn new() -> Self {
        Self::with_matchers(default_matchers())
    }

    /// Builds a classifier over a custom matcher pipeline. Matchers run in
    /// the given order.
    pub fn with_matchers(matchers: Vec<Box<dyn ShortsMatcher>>) -> Self {
        Self {
            matchers,
            ad_selectors: compile_all(AD_SELECTORS),
            end_screen: compile_all(END_SCREEN_SELECTORS),
            info_card: compile_all(INFO_CARD_SELECTORS),
            watermark: compile_all(WATERMARK_SELECTORS),
            stories: compile_all(STORIES_SELECTORS),
            hidden: HashSet::new(),
            memo: HashMap::new(),
        }
    }

    /// Runs one classification pass and returns the number of elements newly
    /// hidden. Repeating the call over an unchanged page hides nothing new.
    pub fn classify(&mut self, page: &PageDom, flags: &Settings) -> usize {
        let mut newly = 0;

        if flags.blocking_active() {
            newly += self.shorts_pass(page);
        }
        if flags.ad_blocker_enabled {
            newly += self.ad_pass(page);
        }
        newly += self.layout_pass(page, flags);

        if newly > 0 {
            debug!(newly, total = self.hidden.len(), "classification pass hid elements");
        }
        newly
    }

    fn shorts_pass(&mut self, page: &PageDom) -> usize {
        let mut newly = 0;
        let mut primary_hit = false;

        for matcher in &self.matchers {
            if matcher.tier() == Tier::Secondary && primary_hit {
                continue;
            }
            let matches = {
                let mut ctx = MatchCtx {
                    hidden: &self.hidden,
                    memo: &mut self.memo,
                };
                matcher.scan(page, &mut ctx)
            };
            if matcher.tier() == Tier::Primary && matches.raw > 0 {
                primary_hit = true;
            }
            for id in matches.targets {
                if self.hidden.insert(id) {
                    newly += 1;
                }
            }
        }
        newly
    }

    fn ad_pass(&mut self, page: &PageDom) -> usize {
        let mut targets = Vec::new();
        for selector in &self.ad_selectors {
            for el in page.select_all(selector) {
                if self.covered(&el.id()) || el.ancestors().any(|n| self.covered(&n.id())) {
                    continue;
                }
                let target = closest_named(el, LAYOUT_ANCESTOR_NAMES).unwrap_or(el);
                targets.push(target.id());
            }
        }

        let mut newly = 0;
        for id in targets {
            if self.hidden.insert(id) {
                newly += 1;
            }
        }
        newly
    }

    fn layout_pass(&mut self, page: &PageDom, flags: &Settings) -> usize {
        let mut newly = 0;
        let groups: [(bool, &[Selector]); 4] = [
            (flags.hide_end_screen_enabled, &self.end_screen),
            (flags.hide_info_card_enabled, &self.info_card),
            (flags.hide_watermark_enabled, &self.watermark),
            (flags.hide_stories_enabled, &self.stories),
        ];

        let mut targets = Vec::new();
        for (enabled, selectors) in groups {
            if !enabled {
                continue;
            }
            for selector in selectors {
                for el in page.select_all(selector) {
                    if self.covered(&el.id()) || el.ancestors().any(|n| self.covered(&n.id())) {
                        continue;
                    }
                    targets.push(el.id());
                }
            }
        }
        for id in targets {
            if self.hidden.insert(id) {
                newly += 1;
            }
        }
        newly
    }

    fn covered(&self, id: &NodeId) -> bool {
        self.hidden.contains(id)
    }

    pub fn is_hidden(&self, id: NodeId) -> bool {
        self.hidden.contains(&id)
    }

    pub fn hidden_count(&self) -> usize {
        self.hidden.len()
    }

    /// Clears every marker; the embedding restores the elements' display.
    /// Returns how many were cleared.
    pub fn unblock_all(&mut self) -> usize {
        let cleared = self.hidden.len();
        self.hidden.clear();
        cleared
    }

    /// Forgets all per-document state. Required when the page document is
    /// replaced, since node ids do not survive a reparse.
    pub fn reset(&mut self) {
        self.hidden.clear();
        self.memo.clear();
    }
}

impl Default for ContentClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags() -> Settings {
        Settings::default()
    }

    const FEED_PAGE: &str = "<html><body>\
        <ytd-rich-item-renderer id=\"short-card\"><a href=\"/shorts/aaabbbccc11\">s</a></ytd-rich-item-renderer>\
        <ytd-video-renderer id=\"badged\"><span class=\"badge-shape-wiz__text\">Shorts</span></ytd-video-renderer>\
        <ytd-video-renderer id=\"normal\"><a href=\"/watch?v=x\">n</a></ytd-video-renderer>\
        </body></html>";

    #[test]
    fn test_classify_is_idempotent() {
        let page = PageDom::parse(FEED_PAGE);
        let mut classifier = ContentClassifier::new();

        let first = classifier.classify(&page, &flags());
        assert_eq!(first, 2);
        let second = classifier.classify(&page, &flags());
        assert_eq!(second, 0);

        let normal = page.find_first("#normal").unwrap().id();
        assert!(!classifier.is_hidden(normal));
    }

    #[test]
    fn test_primary_match_short_circuits_secondary() {
        let page = PageDom::parse(
            "<html><body>\
             <ytd-reel-shelf-renderer id=\"shelf\"></ytd-reel-shelf-renderer>\
             <ytd-video-renderer is-shorts id=\"marked\"></ytd-video-renderer>\
             </body></html>",
        );
        let mut classifier = ContentClassifier::new();

        let first = classifier.classify(&page, &flags());
        assert_eq!(first, 1);
        let shelf = page.find_first("#shelf").unwrap().id();
        assert!(classifier.is_hidden(shelf));

        // the primary container still matches structurally, so the
        // secondary tier stays skipped and nothing is double counted
        let second = classifier.classify(&page, &flags());
        assert_eq!(second, 0);
    }

    #[test]
    fn test_ad_pass_promotes_to_layout_ancestor() {
        let page = PageDom::parse(
            "<html><body>\
             <ytd-rich-item-renderer id=\"wrapper\"><ytd-ad-slot-renderer></ytd-ad-slot-renderer></ytd-rich-item-renderer>\
             <ytd-display-ad-renderer id=\"standalone\"></ytd-display-ad-renderer>\
             </body></html>",
        );
        let mut classifier = ContentClassifier::new();
        let hidden = classifier.classify(&page, &flags());
        assert_eq!(hidden, 2);

        let wrapper = page.find_first("#wrapper").unwrap().id();
        let standalone = page.find_first("#standalone").unwrap().id();
        assert!(classifier.is_hidden(wrapper));
        assert!(classifier.is_hidden(standalone));
    }

    #[test]
    fn test_ad_pass_respects_flag() {
        let page = PageDom::parse(
            "<html><body><ytd-ad-slot-renderer></ytd-ad-slot-renderer></body></html>",
        );
        let mut classifier = ContentClassifier::new();
        let mut settings = flags();
        settings.ad_blocker_enabled = false;
        assert_eq!(classifier.classify(&page, &settings), 0);
    }

    #[test]
    fn test_layout_groups_follow_flags() {
        let page = PageDom::parse(
            "<html><body><div class=\"ytp-watermark\"></div><div class=\"ytp-ce-element\"></div></body></html>",
        );
        let mut classifier = ContentClassifier::new();
        let mut settings = flags();
        settings.hide_watermark_enabled = true;
        assert_eq!(classifier.classify(&page, &settings), 1);

        settings.hide_end_screen_enabled = true;
        assert_eq!(classifier.classify(&page, &settings), 1);
    }

    #[test]
    fn test_unblock_all_allows_reclassification() {
        let page = PageDom::parse(FEED_PAGE);
        let mut classifier = ContentClassifier::new();

        let first = classifier.classify(&page, &flags());
        assert_eq!(classifier.unblock_all(), first);
        assert_eq!(classifier.hidden_count(), 0);

        // after an explicit unblock the same elements classify again
        assert_eq!(classifier.classify(&page, &flags()), first);
    }

    #[test]
    fn test_blocking_disabled_hides_nothing() {
        let page = PageDom::parse(FEED_PAGE);
        let mut classifier = ContentClassifier::new();
        let mut settings = flags();
        settings.shorts_blocker_enabled = false;
        settings.shorts_only_mode = false;
        settings.ad_blocker_enabled = false;
        assert_eq!(classifier.classify(&page, &settings), 0);
    }
}
