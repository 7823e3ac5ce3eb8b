//! Scheduling of reclassification passes: volume-scaled debounce for DOM
//! churn, a minimum-interval guard against thrash, immediate-plus-delayed
//! passes on navigation, and an optional periodic sweep.
//!
//! Everything here is clock-fed and deterministic; the engine owns the
//! actual timers.

use std::time::{Duration, Instant};

use tracing::trace;

use crate::config::Config;

#[derive(Debug, Clone, Copy)]
pub struct DebouncePolicy {
    pub base: Duration,
    pub per_record: Duration,
    pub max: Duration,
    pub min_interval: Duration,
    pub nav_immediate: Duration,
    pub nav_followup: Duration,
    /// `None` disables the sweep.
    pub sweep: Option<Duration>,
}

impl DebouncePolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            base: Duration::from_millis(config.debounce_base_ms),
            per_record: Duration::from_millis(config.debounce_per_record_ms),
            max: Duration::from_millis(config.debounce_max_ms),
            min_interval: Duration::from_millis(config.min_pass_interval_ms),
            nav_immediate: Duration::from_millis(config.nav_immediate_pass_ms),
            nav_followup: Duration::from_millis(config.nav_followup_pass_ms),
            sweep: match config.periodic_sweep_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        }
    }

    /// Delay for one mutation batch: grows with batch volume, capped.
    pub fn delay_for(&self, records: usize) -> Duration {
        let scaled = self.base + self.per_record * records.min(u32::MAX as usize) as u32;
        scaled.min(self.max)
    }
}

impl Default for DebouncePolicy {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

pub struct MutationCoordinator {
    policy: DebouncePolicy,
    deadline: Option<Instant>,
    nav_deadlines: Vec<Instant>,
    next_sweep: Option<Instant>,
    last_pass: Option<Instant>,
}

impl MutationCoordinator {
    pub fn new(policy: DebouncePolicy) -> Self {
        Self {
            policy,
            deadline: None,
            nav_deadlines: Vec::new(),
            next_sweep: None,
            last_pass: None,
        }
    }

    pub fn policy(&self) -> &DebouncePolicy {
        &self.policy
    }

    /// Records one mutation batch. Every batch re-arms the single deadline,
    /// so only the trailing edge of a burst fires.
    pub fn record(&mut self, records: usize, now: Instant) {
        if records == 0 {
            return;
        }
        let delay = self.policy.delay_for(records);
        self.deadline = Some(now + delay);
        trace!(records, ?delay, "mutation batch recorded");
    }

    /// Schedules the immediate and the delayed post-navigation passes.
    pub fn on_navigation(&mut self, now: Instant) {
        self.nav_deadlines = vec![
            now + self.policy.nav_immediate,
            now + self.policy.nav_followup,
        ];
    }

    /// The next instant at which `poll` could fire, for timer arming.
    pub fn next_deadline(&self) -> Option<Instant> {
        let mut next = self.deadline;
        for candidate in self
            .nav_deadlines
            .iter()
            .copied()
            .chain(self.next_sweep.into_iter())
        {
            next = Some(match next {
                Some(current) => current.min(candidate),
                None => candidate,
            });
        }
        next
    }

    /// True when a classification pass should run now. Consumes whatever
    /// trigger fired. Navigation passes ignore the minimum-interval guard;
    /// debounced passes are deferred by it, not dropped.
    pub fn poll(&mut self, now: Instant) -> bool {
        let before = self.nav_deadlines.len();
        self.nav_deadlines.retain(|deadline| *deadline > now);
        if self.nav_deadlines.len() != before {
            // navigation subsumes any pending debounced work
            self.deadline = None;
            return true;
        }

        if let Some(deadline) = self.deadline {
            if now >= deadline {
                if let Some(last) = self.last_pass {
                    if now.duration_since(last) < self.policy.min_interval {
                        self.deadline = Some(last + self.policy.min_interval);
                        return false;
                    }
                }
                self.deadline = None;
                return true;
            }
        }

        match (self.policy.sweep, self.next_sweep) {
            (Some(every), None) => {
                self.next_sweep = Some(now + every);
            }
            (Some(every), Some(at)) => {
                if now >= at {
                    self.next_sweep = Some(now + every);
                    return true;
                }
            }
            (None, _) => {}
        }

        false
    }

    /// Notes that a classification pass just completed.
    pub fn note_pass(&mut self, now: Instant) {
        self.last_pass = Some(now);
    }
}

/// Tracks the reported location so single-page navigations are observable
/// even without a native navigation event.
pub struct UrlWatcher {
    current: String,
}

impl UrlWatcher {
    pub fn new(initial: impl Into<String>) -> Self {
        Self {
            current: initial.into(),
        }
    }

    pub fn current(&self) -> &str {
        &self.current
    }

    /// Returns true when the observed location differs from the last one.
    pub fn observe(&mut self, url: &str) -> bool {
        if url != self.current {
            self.current = url.to_string();
            true
        } else {
            false
        }
    }
}
