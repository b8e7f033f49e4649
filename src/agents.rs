use std::path::Path;

/// Approval phrases shared by every agent.
pub const COMMON_APPROVAL_HINTS: &[&str] = &["approval", "approve", "confirm", "allow this"];

const CLAUDE_APPROVAL_HINTS: &[&str] = &[
    // Permission prompts
    "do you want to proceed",
    "yes, and don't ask again",
    "tell claude what to do",
    "bash command",
    "edit file",
    "write to file",
    "allow tool",
    // Older prompt wording
    "permission mode",
    "bypass permissions",
    "allow dangerously skip permissions",
    "allow this action",
    "allow this command",
    "trust this directory",
];

const CODEX_APPROVAL_HINTS: &[&str] = &[
    "allow codex to",
    "apply proposed code changes",
    "enable full access",
    "allow writes under this root",
    "yes, continue anyway",
    "go back without enabling full access",
    "acceptforsession",
];

const OPENCODE_APPROVAL_HINTS: &[&str] = &[
    "permission denied",
    "continue anyway",
    "security warnings found",
    "cannot prompt for confirmation",
];

/// A wrapped agent the proxy knows how to classify
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentProfile {
    /// Name shown in the title
    pub label: String,
    /// Command basenames that resolve to this profile
    pub commands: Vec<String>,
    /// Agent-specific approval phrases, lower case
    pub approval_hints: Vec<String>,
}

impl AgentProfile {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            commands: Vec::new(),
            approval_hints: Vec::new(),
        }
    }

    pub fn commands<I, S>(mut self, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.commands.extend(commands.into_iter().map(Into::into));
        self
    }

    pub fn approval_hints<I, S>(mut self, hints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.approval_hints
            .extend(hints.into_iter().map(|hint| hint.into().to_lowercase()));
        self
    }

    /// Common hints followed by this agent's own.
    pub fn all_approval_hints(&self) -> Vec<String> {
        COMMON_APPROVAL_HINTS
            .iter()
            .map(|hint| hint.to_string())
            .chain(self.approval_hints.iter().cloned())
            .collect()
    }
}

/// Immutable lookup table from wrapped command to agent profile.
#[derive(Debug, Clone, Default)]
pub struct AgentTable {
    profiles: Vec<AgentProfile>,
}

impl AgentTable {
    pub fn new(profiles: Vec<AgentProfile>) -> Self {
        Self { profiles }
    }

    /// The agents shipped with the proxy.
    pub fn builtin() -> Self {
        Self::new(vec![
            AgentProfile::new("claude-code")
                .commands(["claude", "claude-code"])
                .approval_hints(CLAUDE_APPROVAL_HINTS.iter().copied()),
            AgentProfile::new("codex")
                .commands(["codex"])
                .approval_hints(CODEX_APPROVAL_HINTS.iter().copied()),
            AgentProfile::new("opencode")
                .commands(["opencode"])
                .approval_hints(OPENCODE_APPROVAL_HINTS.iter().copied()),
        ])
    }

    /// Find the profile for `command`, matching on its basename.
    pub fn resolve(&self, command: &str) -> Option<&AgentProfile> {
        let base = Path::new(command)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(command);
        self.profiles
            .iter()
            .find(|profile| profile.commands.iter().any(|c| c == base))
    }
}
