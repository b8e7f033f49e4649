use std::fmt;

/// Activity state of the wrapped agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Status {
    /// Agent is actively producing output
    #[default]
    Working,
    /// Agent is idle, waiting at its input prompt
    Done,
    /// Agent is blocked on a confirmation prompt
    Approval,
}

impl Status {
    pub fn glyph(self) -> &'static str {
        match self {
            Status::Working => "\u{1F7E1}",
            Status::Done => "\u{1F7E2}",
            Status::Approval => "\u{1F534}",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Status::Working => "working",
            Status::Done => "done",
            Status::Approval => "approval",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.glyph(), self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_is_glyph_and_label() {
        assert_eq!(Status::Working.to_string(), "🟡 working");
        assert_eq!(Status::Done.to_string(), "🟢 done");
        assert_eq!(Status::Approval.to_string(), "🔴 approval");
    }

    #[test]
    fn test_initial_status_is_working() {
        assert_eq!(Status::default(), Status::Working);
    }
}
