//! Session accounting for the current window.
//!
//! The tracker keeps two independent clocks:
//!  - A single boundary timestamp (`last_activity_time`) splitting the window into flushed
//!    active/idle totals and one open span attributed to the current classification.
//!  - Per-domain intervals. Only the current domain can have an open interval, and only while the
//!    user is not idle.

pub mod domain;
pub mod snapshot;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use domain::domain_of;
use serde::{Deserialize, Serialize};
use snapshot::{SessionSnapshot, TopSite};
use tracing::{debug, info};

use crate::utils::{clock::Clock, time::elapsed_ms};

/// Maximum amount of domains reported in a snapshot.
pub const TOP_SITES_LIMIT: usize = 10;

/// User presence as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdleState {
    Active,
    Idle,
    Locked,
}

impl IdleState {
    pub fn is_idle(self) -> bool {
        !matches!(self, IdleState::Active)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainStats {
    pub accumulated_ms: u64,
    pub visit_count: u32,
    /// Present only while this domain is the current one and the user is active.
    pub open_since: Option<DateTime<Utc>>,
    first_seen: u64,
}

impl DomainStats {
    fn effective_ms(&self, now: DateTime<Utc>) -> u64 {
        self.accumulated_ms + self.open_since.map_or(0, |start| elapsed_ms(start, now))
    }
}

/// What an upload was built from. See [SessionTracker::commit].
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub snapshot: SessionSnapshot,
    domains: HashMap<String, (u64, u32)>,
}

pub struct SessionTracker {
    clock: Box<dyn Clock>,
    session_start: DateTime<Utc>,
    tab_switches: u32,
    active_time_ms: u64,
    idle_time_ms: u64,
    is_idle: bool,
    last_activity_time: DateTime<Utc>,
    current_domain: Option<String>,
    domain_stats: HashMap<String, DomainStats>,
    insertions: u64,
}

impl SessionTracker {
    pub fn new(clock: Box<dyn Clock>) -> Self {
        let now = clock.time();
        Self {
            clock,
            session_start: now,
            tab_switches: 0,
            active_time_ms: 0,
            idle_time_ms: 0,
            is_idle: false,
            last_activity_time: now,
            current_domain: None,
            domain_stats: HashMap::new(),
            insertions: 0,
        }
    }

    /// Foreground tab changed, either by activation or by a finished navigation. Every call
    /// counts as a switch, including the first one of the window.
    pub fn on_tab_switch(&mut self, url: &str) {
        self.tab_switches = self.tab_switches.saturating_add(1);
        self.move_to(url);
    }

    /// Starts tracking the tab that was already in front when the engine came up. This isn't a
    /// switch, so the counter stays untouched.
    pub fn track_initial_tab(&mut self, url: &str) {
        self.move_to(url);
    }

    pub fn on_idle_state_changed(&mut self, state: IdleState) {
        if state.is_idle() == self.is_idle {
            return;
        }

        let now = self.clock.time();
        let span = elapsed_ms(self.last_activity_time, now);

        if state.is_idle() {
            self.close_interval(now);
            self.active_time_ms += span;
            debug!("User went {state:?} after {span}ms of activity");
        } else {
            self.idle_time_ms += span;
            debug!("User returned after {span}ms idle");
        }

        self.last_activity_time = now;
        self.is_idle = state.is_idle();

        if !self.is_idle {
            self.open_interval(now);
        }
    }

    /// Reads effective totals without committing the open spans.
    pub fn snapshot(&self) -> SessionSnapshot {
        let now = self.clock.time();
        let open_span = elapsed_ms(self.last_activity_time, now);
        let (active_time_ms, idle_time_ms) = if self.is_idle {
            (self.active_time_ms, self.idle_time_ms + open_span)
        } else {
            (self.active_time_ms + open_span, self.idle_time_ms)
        };

        let mut ranked = self
            .domain_stats
            .iter()
            .map(|(domain, stats)| (stats.first_seen, stats.effective_ms(now), domain, stats))
            .filter(|(_, time_spent_ms, _, stats)| stats.visit_count > 0 || *time_spent_ms > 0)
            .collect::<Vec<_>>();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        let top_sites = ranked
            .into_iter()
            .take(TOP_SITES_LIMIT)
            .map(|(_, time_spent_ms, domain, stats)| TopSite {
                domain: domain.clone(),
                time_spent_ms,
                visit_count: stats.visit_count,
            })
            .collect();

        SessionSnapshot {
            session_duration_ms: elapsed_ms(self.session_start, now),
            tab_switches: self.tab_switches,
            active_time_ms,
            idle_time_ms,
            top_sites,
            timestamp: now,
        }
    }

    /// Starts a new window. Only call this once the previous window was confirmed by the server.
    /// The tab still in front keeps being tracked, without counting a new visit.
    pub fn reset(&mut self) {
        let now = self.clock.time();
        self.session_start = now;
        self.last_activity_time = now;
        self.tab_switches = 0;
        self.active_time_ms = 0;
        self.idle_time_ms = 0;
        self.domain_stats.clear();
        self.insertions = 0;
        if !self.is_idle {
            if let Some(stats) = self.current_entry() {
                stats.open_since = Some(now);
            }
        }
        info!("Session window reset");
    }

    /// Snapshot for an upload, together with the per-domain totals it was built from.
    pub fn checkpoint(&self) -> Checkpoint {
        let snapshot = self.snapshot();
        let domains = self
            .domain_stats
            .iter()
            .map(|(domain, stats)| {
                (
                    domain.clone(),
                    (stats.effective_ms(snapshot.timestamp), stats.visit_count),
                )
            })
            .collect();
        Checkpoint { snapshot, domains }
    }

    /// Removes everything `checkpoint` covered from the window. Whatever was recorded after the
    /// checkpoint stays and becomes the start of the next window.
    pub fn commit(&mut self, checkpoint: &Checkpoint) {
        let now = self.clock.time();
        self.flush(now);

        let uploaded = &checkpoint.snapshot;
        self.session_start = uploaded.timestamp.min(now);
        self.tab_switches = self.tab_switches.saturating_sub(uploaded.tab_switches);
        self.active_time_ms = self.active_time_ms.saturating_sub(uploaded.active_time_ms);
        self.idle_time_ms = self.idle_time_ms.saturating_sub(uploaded.idle_time_ms);

        for (domain, stats) in self.domain_stats.iter_mut() {
            if let Some((time_spent_ms, visit_count)) = checkpoint.domains.get(domain) {
                stats.accumulated_ms = stats.accumulated_ms.saturating_sub(*time_spent_ms);
                stats.visit_count = stats.visit_count.saturating_sub(*visit_count);
            }
        }
        self.domain_stats.retain(|_, stats| {
            stats.visit_count > 0 || stats.accumulated_ms > 0 || stats.open_since.is_some()
        });
        info!(
            "Session window committed, {} switches carried over",
            self.tab_switches
        );
    }

    pub fn is_idle(&self) -> bool {
        self.is_idle
    }

    pub fn current_domain(&self) -> Option<&str> {
        self.current_domain.as_deref()
    }

    pub fn domain_stats(&self, domain: &str) -> Option<&DomainStats> {
        self.domain_stats.get(domain)
    }

    fn move_to(&mut self, url: &str) {
        let now = self.clock.time();
        self.close_interval(now);
        let domain = domain_of(url);
        debug!("Tracking {domain}");
        self.current_domain = Some(domain);
        if !self.is_idle {
            self.open_interval(now);
        }
    }

    fn current_entry(&mut self) -> Option<&mut DomainStats> {
        let domain = self.current_domain.as_ref()?;
        let insertions = &mut self.insertions;
        Some(
            self.domain_stats
                .entry(domain.clone())
                .or_insert_with(|| {
                    *insertions += 1;
                    DomainStats {
                        accumulated_ms: 0,
                        visit_count: 0,
                        open_since: None,
                        first_seen: *insertions,
                    }
                }),
        )
    }

    fn open_interval(&mut self, now: DateTime<Utc>) {
        if let Some(stats) = self.current_entry() {
            stats.visit_count = stats.visit_count.saturating_add(1);
            stats.open_since = Some(now);
        }
    }

    /// Moves the open spans into the totals, leaving them open from `now`.
    fn flush(&mut self, now: DateTime<Utc>) {
        let span = elapsed_ms(self.last_activity_time, now);
        if self.is_idle {
            self.idle_time_ms += span;
        } else {
            self.active_time_ms += span;
        }
        self.last_activity_time = now;

        let Some(stats) = self
            .current_domain
            .as_ref()
            .and_then(|domain| self.domain_stats.get_mut(domain))
        else {
            return;
        };
        if let Some(start) = stats.open_since {
            stats.accumulated_ms += elapsed_ms(start, now);
            stats.open_since = Some(now);
        }
    }

    fn close_interval(&mut self, now: DateTime<Utc>) {
        let Some(stats) = self
            .current_domain
            .as_ref()
            .and_then(|domain| self.domain_stats.get_mut(domain))
        else {
            return;
        };
        if let Some(start) = stats.open_since.take() {
            stats.accumulated_ms += elapsed_ms(start, now);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::utils::clock::ManualClock;

    use super::{IdleState, SessionTracker, TOP_SITES_LIMIT};

    fn tracker() -> (SessionTracker, ManualClock) {
        let clock = ManualClock::new();
        (SessionTracker::new(Box::new(clock.clone())), clock)
    }

    fn assert_window_covered(tracker: &SessionTracker) {
        let snapshot = tracker.snapshot();
        assert_eq!(
            snapshot.active_time_ms + snapshot.idle_time_ms,
            snapshot.session_duration_ms
        );
    }

    #[test]
    fn switching_closes_previous_domain() {
        let (mut tracker, clock) = tracker();
        tracker.on_tab_switch("https://example.com/");
        clock.advance_ms(1000);
        tracker.on_tab_switch("https://other.com/page");

        let example = tracker.domain_stats("example.com").unwrap();
        assert!(example.accumulated_ms >= 1000);
        assert_eq!(example.open_since, None);

        let other = tracker.domain_stats("other.com").unwrap();
        assert_eq!(other.visit_count, 1);
        assert!(other.open_since.is_some());

        // The first switch of the window counts too.
        assert_eq!(tracker.snapshot().tab_switches, 2);
    }

    #[test]
    fn initial_tab_is_not_a_switch() {
        let (mut tracker, clock) = tracker();
        tracker.track_initial_tab("https://example.com/");
        clock.advance_ms(1000);
        tracker.on_tab_switch("https://other.com/");

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.tab_switches, 1);
        assert_eq!(snapshot.top_sites[0].domain, "example.com");
        assert_eq!(snapshot.top_sites[0].time_spent_ms, 1000);
    }

    #[test]
    fn idle_span_is_not_attributed_to_domain() {
        let (mut tracker, clock) = tracker();
        tracker.on_tab_switch("https://a.com/");
        clock.advance_ms(500);
        tracker.on_idle_state_changed(IdleState::Idle);
        clock.advance_ms(2000);
        tracker.on_idle_state_changed(IdleState::Active);

        let snapshot = tracker.snapshot();
        assert!(snapshot.idle_time_ms >= 2000);
        assert_eq!(snapshot.active_time_ms, 500);

        let stats = tracker.domain_stats("a.com").unwrap();
        assert_eq!(stats.accumulated_ms, 500);
        assert_eq!(stats.visit_count, 2);
        assert!(stats.open_since.is_some());
        assert_window_covered(&tracker);
    }

    #[test]
    fn repeated_idle_signals_are_ignored() {
        let (mut tracker, clock) = tracker();
        tracker.on_tab_switch("https://a.com/");
        clock.advance_ms(100);
        tracker.on_idle_state_changed(IdleState::Idle);
        clock.advance_ms(100);
        tracker.on_idle_state_changed(IdleState::Locked);
        clock.advance_ms(100);
        tracker.on_idle_state_changed(IdleState::Idle);
        clock.advance_ms(100);
        tracker.on_idle_state_changed(IdleState::Active);
        tracker.on_idle_state_changed(IdleState::Active);

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.active_time_ms, 100);
        assert_eq!(snapshot.idle_time_ms, 300);
        assert_eq!(tracker.domain_stats("a.com").unwrap().visit_count, 2);
    }

    #[test]
    fn switching_while_idle_does_not_open_interval() {
        let (mut tracker, clock) = tracker();
        tracker.on_idle_state_changed(IdleState::Idle);
        tracker.on_tab_switch("https://b.com/");
        clock.advance_ms(1000);

        assert_eq!(tracker.current_domain(), Some("b.com"));
        assert!(tracker.domain_stats("b.com").is_none());
        assert!(tracker.snapshot().top_sites.is_empty());

        tracker.on_idle_state_changed(IdleState::Active);
        clock.advance_ms(300);
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.top_sites[0].domain, "b.com");
        assert_eq!(snapshot.top_sites[0].time_spent_ms, 300);
        assert_eq!(snapshot.top_sites[0].visit_count, 1);
    }

    #[test]
    fn snapshot_does_not_commit_open_interval() {
        let (mut tracker, clock) = tracker();
        tracker.on_tab_switch("https://a.com/");
        clock.advance_ms(700);

        let first = tracker.snapshot();
        let second = tracker.snapshot();
        assert_eq!(first, second);
        assert_eq!(first.top_sites[0].time_spent_ms, 700);
        assert_eq!(first.top_sites[0].visit_count, 1);

        let stats = tracker.domain_stats("a.com").unwrap();
        assert_eq!(stats.accumulated_ms, 0);
        assert!(stats.open_since.is_some());

        clock.advance_ms(300);
        let later = tracker.snapshot();
        assert_eq!(later.tab_switches, first.tab_switches);
        assert_eq!(later.active_time_ms - first.active_time_ms, 300);
    }

    #[test]
    fn window_is_always_covered() {
        let (mut tracker, clock) = tracker();
        let steps: [(&str, i64); 8] = [
            ("https://a.com", 120),
            ("idle", 340),
            ("https://b.com", 10),
            ("locked", 55),
            ("active", 900),
            ("https://c.com/x", 1),
            ("idle", 2500),
            ("active", 42),
        ];
        for (step, wait) in steps {
            match step {
                "idle" => tracker.on_idle_state_changed(IdleState::Idle),
                "locked" => tracker.on_idle_state_changed(IdleState::Locked),
                "active" => tracker.on_idle_state_changed(IdleState::Active),
                url => tracker.on_tab_switch(url),
            }
            clock.advance_ms(wait);
            assert_window_covered(&tracker);
        }
    }

    #[test]
    fn top_sites_are_ranked_and_limited() {
        let (mut tracker, clock) = tracker();
        for i in 0..(TOP_SITES_LIMIT + 3) {
            tracker.on_tab_switch(&format!("https://site{i}.com/"));
            clock.advance_ms(100 * (i as i64 % 4));
        }
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.top_sites.len(), TOP_SITES_LIMIT);
        assert!(snapshot
            .top_sites
            .windows(2)
            .all(|pair| pair[0].time_spent_ms >= pair[1].time_spent_ms));
        assert!(snapshot.top_sites.iter().all(|site| site.visit_count > 0));

        // Equal totals keep the order domains were first seen in.
        assert_eq!(snapshot.top_sites[0].domain, "site3.com");
        assert_eq!(snapshot.top_sites[1].domain, "site7.com");
        assert_eq!(snapshot.top_sites[2].domain, "site11.com");
    }

    #[test]
    fn unparsable_url_uses_raw_value() {
        let (mut tracker, clock) = tracker();
        tracker.on_tab_switch("definitely not a url");
        clock.advance_ms(10);
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.top_sites[0].domain, "definitely not a url");
    }

    #[test]
    fn reset_clears_window_but_keeps_idle_state() {
        let (mut tracker, clock) = tracker();
        tracker.on_tab_switch("https://a.com/");
        clock.advance_ms(1000);
        tracker.on_idle_state_changed(IdleState::Idle);
        clock.advance_ms(1000);

        tracker.reset();

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.tab_switches, 0);
        assert_eq!(snapshot.active_time_ms, 0);
        assert_eq!(snapshot.idle_time_ms, 0);
        assert_eq!(snapshot.session_duration_ms, 0);
        assert!(snapshot.top_sites.is_empty());
        assert!(tracker.is_idle());

        clock.advance_ms(400);
        tracker.on_idle_state_changed(IdleState::Active);
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.idle_time_ms, 400);
        assert_window_covered(&tracker);
    }

    #[test]
    fn reset_keeps_tracking_tab_in_front() {
        let (mut tracker, clock) = tracker();
        tracker.on_tab_switch("https://a.com/");
        clock.advance_ms(1000);

        tracker.reset();
        assert!(tracker.snapshot().top_sites.is_empty());

        clock.advance_ms(600_000);
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.active_time_ms, 600_000);
        assert_eq!(snapshot.top_sites.len(), 1);
        assert_eq!(snapshot.top_sites[0].domain, "a.com");
        assert_eq!(snapshot.top_sites[0].time_spent_ms, 600_000);
        // The view started in the previous window.
        assert_eq!(snapshot.top_sites[0].visit_count, 0);
        assert_window_covered(&tracker);

        tracker.on_tab_switch("https://a.com/other");
        assert_eq!(tracker.snapshot().top_sites[0].visit_count, 1);
    }

    #[test]
    fn commit_keeps_activity_after_checkpoint() {
        let (mut tracker, clock) = tracker();
        tracker.on_tab_switch("https://a.com/");
        clock.advance_ms(1000);
        let checkpoint = tracker.checkpoint();
        assert_eq!(checkpoint.snapshot.top_sites[0].time_spent_ms, 1000);

        clock.advance_ms(300);
        tracker.on_tab_switch("https://b.com/");
        clock.advance_ms(200);
        tracker.on_idle_state_changed(IdleState::Idle);
        clock.advance_ms(100);

        tracker.commit(&checkpoint);

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.tab_switches, 1);
        assert_eq!(snapshot.session_duration_ms, 600);
        assert_eq!(snapshot.active_time_ms, 500);
        assert_eq!(snapshot.idle_time_ms, 100);
        let sites = snapshot
            .top_sites
            .iter()
            .map(|site| (site.domain.as_str(), site.time_spent_ms, site.visit_count))
            .collect::<Vec<_>>();
        assert_eq!(sites, vec![("a.com", 300, 0), ("b.com", 200, 1)]);
        assert!(tracker.is_idle());
        assert_window_covered(&tracker);
    }

    #[test]
    fn commit_without_new_activity_matches_reset() {
        let (mut tracker, clock) = tracker();
        tracker.on_tab_switch("https://a.com/");
        clock.advance_ms(1000);
        tracker.on_tab_switch("https://b.com/");
        clock.advance_ms(500);

        let checkpoint = tracker.checkpoint();
        tracker.commit(&checkpoint);

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.tab_switches, 0);
        assert_eq!(snapshot.session_duration_ms, 0);
        assert!(snapshot.top_sites.is_empty());
        assert!(tracker.domain_stats("a.com").is_none());

        clock.advance_ms(250);
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.top_sites[0].domain, "b.com");
        assert_eq!(snapshot.top_sites[0].time_spent_ms, 250);
        assert_window_covered(&tracker);
    }

    #[test]
    fn clock_going_backwards_does_not_underflow() {
        let (mut tracker, clock) = tracker();
        tracker.on_tab_switch("https://a.com/");
        clock.rewind_ms(5000);
        tracker.on_tab_switch("https://b.com/");

        let snapshot = tracker.snapshot();
        assert_eq!(tracker.domain_stats("a.com").unwrap().accumulated_ms, 0);
        assert_eq!(snapshot.active_time_ms, 0);
        assert_eq!(snapshot.session_duration_ms, 0);
    }
}
