use once_cell::sync::Lazy;
use regex::Regex;

use super::window::RollingWindow;
use crate::agents::AgentProfile;
use crate::status::Status;

/// Tokens that show the agent is offering the user a choice
const INTERACTION_HINTS: &[&str] = &[
    " yes",
    " no",
    "y/n",
    "allow once",
    "allow always",
    "accept",
    "reject",
    "deny",
    "decline",
    "continue",
];

/// Explicit yes/no questions, recognised for any agent
static RE_YES_NO: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[(\[]\s*y(?:es)?\s*/\s*no?\s*[)\]]|\bproceed\s*\?|\by/n\b").unwrap()
});

/// Markers an agent shows while it sits at its input prompt
static RE_IDLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)(\? for shortcuts|⏎ send|ctrl\+j newline|claude>|^[│|\s]*[>❯›][│|\s]*$)")
        .unwrap()
});

/// Spinners and progress hints that mean the agent is still busy
static RE_BUSY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏]|esc to interrupt|thinking…|thinking\.{3}|working\.{3})")
        .unwrap()
});

/// One independent heuristic over the rolling window.
///
/// Matchers are evaluated in priority order; the first one that returns
/// a status wins.
pub trait Matcher: Send {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    fn matches(&self, window: &RollingWindow) -> Option<Status>;
}

/// Confirmation prompts: "Proceed? (y/n)", "Allow once / Deny", ...
#[derive(Debug, Clone)]
pub struct ApprovalMatcher {
    hints: Vec<String>,
}

impl ApprovalMatcher {
    pub fn new(hints: Vec<String>) -> Self {
        Self { hints }
    }
}

impl Matcher for ApprovalMatcher {
    fn name(&self) -> &'static str {
        "approval"
    }

    fn matches(&self, window: &RollingWindow) -> Option<Status> {
        let text = window.flattened();
        if RE_YES_NO.is_match(&text) {
            return Some(Status::Approval);
        }

        let asks = self.hints.iter().any(|hint| text.contains(hint.as_str()));
        let offers = INTERACTION_HINTS.iter().any(|token| text.contains(token));
        (asks && offers).then_some(Status::Approval)
    }
}

/// The agent's idle input prompt, with no spinner next to it.
#[derive(Debug, Clone)]
pub struct IdlePromptMatcher {
    tail_lines: usize,
}

impl IdlePromptMatcher {
    pub fn new(tail_lines: usize) -> Self {
        Self { tail_lines }
    }
}

impl Default for IdlePromptMatcher {
    fn default() -> Self {
        Self::new(8)
    }
}

impl Matcher for IdlePromptMatcher {
    fn name(&self) -> &'static str {
        "idle-prompt"
    }

    fn matches(&self, window: &RollingWindow) -> Option<Status> {
        let tail = window.tail_lines(self.tail_lines);
        if RE_BUSY.is_match(tail) {
            return None;
        }
        RE_IDLE.is_match(tail).then_some(Status::Done)
    }
}

/// Matchers for `profile`, most specific first.
pub fn default_matchers(profile: &AgentProfile) -> Vec<Box<dyn Matcher>> {
    vec![
        Box::new(ApprovalMatcher::new(profile.all_approval_hints())),
        Box::new(IdlePromptMatcher::default()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window_with(text: &str) -> RollingWindow {
        let mut window = RollingWindow::new(4000);
        window.feed(text.as_bytes());
        window
    }

    fn claude() -> ApprovalMatcher {
        let table = crate::agents::AgentTable::builtin();
        ApprovalMatcher::new(table.resolve("claude").unwrap().all_approval_hints())
    }

    #[test]
    fn test_detect_yes_no_question() {
        let matcher = ApprovalMatcher::new(Vec::new());
        for prompt in ["Proceed? (y/n)", "Overwrite file? [Y/n]", "continue (yes/no)"] {
            assert_eq!(
                matcher.matches(&window_with(prompt)),
                Some(Status::Approval),
                "{prompt}"
            );
        }
    }

    #[test]
    fn test_detect_agent_permission_prompt() {
        let prompt = "╭─────╮\n│ Bash command │\n│ rm -rf target │\n│ Do you want to proceed? │\n│ ❯ 1. Yes │\n│ 2. No │";
        assert_eq!(claude().matches(&window_with(prompt)), Some(Status::Approval));
    }

    #[test]
    fn test_hint_without_choice_is_not_approval() {
        assert_eq!(claude().matches(&window_with("Editing file src/main.rs")), None);
        assert_eq!(
            ApprovalMatcher::new(Vec::new()).matches(&window_with("compiling crates...")),
            None
        );
    }

    #[test]
    fn test_hint_word_alone_is_not_approval() {
        let window = window_with("I will confirm the tests pass before editing.");
        assert_eq!(claude().matches(&window), None);
        let window = window_with("Please confirm: continue with the migration");
        assert_eq!(claude().matches(&window), Some(Status::Approval));
    }

    #[test]
    fn test_detect_idle_prompt() {
        let matcher = IdlePromptMatcher::default();
        assert_eq!(matcher.matches(&window_with("All done.\n\n> ")), Some(Status::Done));
        assert_eq!(
            matcher.matches(&window_with("│ > │\n  ? for shortcuts")),
            Some(Status::Done)
        );
        assert_eq!(matcher.matches(&window_with("claude> ")), Some(Status::Done));
    }

    #[test]
    fn test_spinner_suppresses_idle_prompt() {
        let matcher = IdlePromptMatcher::default();
        let busy = "⠙ Thinking… (esc to interrupt)\n│ > │\n? for shortcuts";
        assert_eq!(matcher.matches(&window_with(busy)), None);
    }

    #[test]
    fn test_prompt_scrolled_out_of_tail() {
        let matcher = IdlePromptMatcher::new(2);
        let text = "> \nline one\nline two\nline three";
        assert_eq!(matcher.matches(&window_with(text)), None);
    }
}
