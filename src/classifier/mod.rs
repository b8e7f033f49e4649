//! Streaming status classifier.
//!
//! Watches the agent's output through a bounded rolling window and decides
//! whether the agent is working, done, or waiting for an approval. The
//! classifier is best effort: it never fails, it just may be wrong.

mod matchers;
mod window;

pub use matchers::{default_matchers, Matcher};
pub use window::RollingWindow;

use std::time::{Duration, Instant};

use crate::agents::AgentProfile;
use crate::config::Tuning;
use crate::status::Status;

/// Input bytes that answer a prompt (Enter, y/n, numbered choices)
const RESPONSE_KEYS: &[u8] = b"\r\nyYnN1234";

pub struct Classifier {
    window: RollingWindow,
    matchers: Vec<Box<dyn Matcher>>,
    current: Status,
    idle_threshold: Duration,
    last_output: Instant,
    /// Set when silence, not a prompt, moved the agent to done
    idle_since: Option<Instant>,
    title_overwritten: bool,
}

impl Classifier {
    pub fn new(profile: &AgentProfile, tuning: &Tuning, now: Instant) -> Self {
        Self::with_matchers(default_matchers(profile), tuning, now)
    }

    pub fn with_matchers(matchers: Vec<Box<dyn Matcher>>, tuning: &Tuning, now: Instant) -> Self {
        Self {
            window: RollingWindow::new(tuning.window_bytes),
            matchers,
            current: Status::Working,
            idle_threshold: tuning.idle_threshold,
            last_output: now,
            idle_since: None,
            title_overwritten: false,
        }
    }

    pub fn current(&self) -> Status {
        self.current
    }

    /// Feed one chunk of agent output. Returns the new status only when it
    /// differs from the current one.
    ///
    /// An approval stays latched until the user answers it, whatever the
    /// agent prints meanwhile. After an idle timeout, output no matcher
    /// recognises only counts as work again once another idle period has
    /// passed, so a slow trickle of log lines cannot flap the status.
    pub fn observe(&mut self, chunk: &[u8], now: Instant) -> Option<Status> {
        self.last_output = now;
        let fed = self.window.feed(chunk);
        if fed.title_set {
            self.title_overwritten = true;
        }
        if self.current == Status::Approval || !fed.text_added {
            return None;
        }

        let matched = self.matchers.iter().find_map(|matcher| {
            let status = matcher.matches(&self.window)?;
            tracing::trace!(matcher = matcher.name(), ?status, "matched");
            Some(status)
        });
        match matched {
            Some(status) => self.transition(status),
            None => {
                if let Some(since) = self.idle_since {
                    if now.saturating_duration_since(since) < self.idle_threshold {
                        return None;
                    }
                }
                self.transition(Status::Working)
            }
        }
    }

    /// Feed one chunk of user input. A response key releases a pending
    /// approval and starts classification afresh.
    pub fn note_input(&mut self, keys: &[u8]) -> Option<Status> {
        if self.current != Status::Approval || !keys.iter().any(|k| RESPONSE_KEYS.contains(k)) {
            return None;
        }
        self.window.clear();
        self.transition(Status::Working)
    }

    /// Time-based transitions: a working agent that has been silent for
    /// the idle threshold is taken to be done.
    pub fn tick(&mut self, now: Instant) -> Option<Status> {
        if self.current == Status::Working
            && now.saturating_duration_since(self.last_output) >= self.idle_threshold
        {
            let next = self.transition(Status::Done);
            self.idle_since = Some(now);
            return next;
        }
        None
    }

    /// Whether the agent set its own title since the last call.
    pub fn take_title_overwritten(&mut self) -> bool {
        std::mem::take(&mut self.title_overwritten)
    }

    fn transition(&mut self, next: Status) -> Option<Status> {
        if next == self.current {
            return None;
        }
        tracing::debug!(from = ?self.current, to = ?next, "status changed");
        self.current = next;
        self.idle_since = None;
        Some(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentTable;

    fn tuning() -> Tuning {
        Tuning {
            idle_threshold: Duration::from_millis(1400),
            ..Tuning::default()
        }
    }

    fn classifier(start: Instant) -> Classifier {
        let table = AgentTable::builtin();
        Classifier::new(table.resolve("claude").unwrap(), &tuning(), start)
    }

    #[test]
    fn test_unknown_output_stays_working() {
        let start = Instant::now();
        let mut c = classifier(start);
        for i in 0..50u64 {
            let now = start + Duration::from_millis(i * 100);
            assert_eq!(c.observe(format!("compiling crate {i}\n").as_bytes(), now), None);
            assert_eq!(c.tick(now), None);
        }
        assert_eq!(c.current(), Status::Working);
    }

    #[test]
    fn test_silence_becomes_done() {
        let start = Instant::now();
        let mut c = classifier(start);
        c.observe(b"starting up\n", start);
        assert_eq!(c.tick(start + Duration::from_millis(1000)), None);
        assert_eq!(c.tick(start + Duration::from_millis(1400)), Some(Status::Done));
        assert_eq!(c.tick(start + Duration::from_millis(5000)), None);

        // New output without a prompt means work resumed
        assert_eq!(
            c.observe(b"reading files\n", start + Duration::from_millis(6000)),
            Some(Status::Working)
        );
    }

    #[test]
    fn test_idle_prompt_is_done() {
        let start = Instant::now();
        let mut c = classifier(start);
        assert_eq!(c.observe(b"Finished.\n\n> ", start), Some(Status::Done));
        // Same prompt again: no new report
        assert_eq!(c.observe(b"\r\n> ", start), None);
    }

    #[test]
    fn test_approval_latches_until_answered() {
        let start = Instant::now();
        let mut c = classifier(start);
        assert_eq!(c.observe(b"Proceed? (y/n) ", start), Some(Status::Approval));

        // More output and long silence keep the approval
        assert_eq!(c.observe(b"\x1b[?25h", start), None);
        assert_eq!(c.observe(b"still here\n> ", start), None);
        assert_eq!(c.tick(start + Duration::from_secs(60)), None);

        // Ordinary typing does not release it
        assert_eq!(c.note_input(b"x"), None);
        assert_eq!(c.note_input(b"y"), Some(Status::Working));

        // Window was cleared, so the old prompt does not re-trigger
        assert_eq!(c.observe(b"applying change\n", start), None);
        assert_eq!(c.current(), Status::Working);
    }

    #[test]
    fn test_input_outside_approval_is_ignored() {
        let start = Instant::now();
        let mut c = classifier(start);
        assert_eq!(c.note_input(b"\r"), None);
        assert_eq!(c.current(), Status::Working);
    }

    #[test]
    fn test_prompt_split_across_chunks() {
        let start = Instant::now();
        let mut c = classifier(start);
        assert_eq!(c.observe(b"Do you want to pro", start), None);
        assert_eq!(c.observe(b"ceed?\r\n\x1b[1m 1. Yes\x1b[0m", start), Some(Status::Approval));
    }

    #[test]
    fn test_agent_title_is_noticed() {
        let start = Instant::now();
        let mut c = classifier(start);
        c.observe(b"\x1b]0;\xe2\x9c\xb3 Claude Code\x07", start);
        assert!(c.take_title_overwritten());
        assert!(!c.take_title_overwritten());
    }

    #[test]
    fn test_slow_trickle_does_not_flap() {
        let start = Instant::now();
        let mut c = classifier(start);
        let mut changes = Vec::new();
        for ms in (0..=9000u64).step_by(100) {
            let now = start + Duration::from_millis(ms);
            if ms % 1500 == 0 {
                changes.extend(c.observe(b"compiling crate\n", now).map(|s| (ms, s)));
            }
            changes.extend(c.tick(now).map(|s| (ms, s)));
        }

        assert_eq!(changes.first(), Some(&(1400, Status::Done)));
        for pair in changes.windows(2) {
            assert!(pair[1].0 - pair[0].0 >= 1400, "{changes:?}");
        }
    }

    #[test]
    fn test_recognised_output_ends_idle_immediately() {
        let start = Instant::now();
        let mut c = classifier(start);
        assert_eq!(c.tick(start + Duration::from_millis(1400)), Some(Status::Done));
        assert_eq!(
            c.observe(b"Proceed? (y/n)", start + Duration::from_millis(1500)),
            Some(Status::Approval)
        );
    }

    struct Always(Status);

    impl Matcher for Always {
        fn name(&self) -> &'static str {
            "always"
        }

        fn matches(&self, _window: &RollingWindow) -> Option<Status> {
            Some(self.0)
        }
    }

    #[test]
    fn test_matchers_evaluated_in_order() {
        let start = Instant::now();
        let mut c = Classifier::with_matchers(
            vec![Box::new(Always(Status::Done)), Box::new(Always(Status::Approval))],
            &tuning(),
            start,
        );
        assert_eq!(c.observe(b"anything", start), Some(Status::Done));
    }
}
