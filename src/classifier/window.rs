use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::ansi;

/// OSC strings (titles, hyperlinks, clipboard)
static RE_OSC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)?").unwrap());

/// DCS, APC and PM strings
static RE_STRING_CMD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b[P_^][^\x1b]*(?:\x1b\\)?").unwrap());

static RE_CSI: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b\[[0-?]*[ -/]*([@-~])").unwrap());

static RE_ESC: Lazy<Regex> = Lazy::new(|| Regex::new(r"\x1b[ -/]*[0-~]?").unwrap());

/// A sequence that sets the window title (OSC 0 or OSC 2)
static RE_TITLE: Lazy<regex::bytes::Regex> =
    Lazy::new(|| regex::bytes::Regex::new(r"\x1b\][02];").unwrap());

/// What one chunk contributed to the window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Fed {
    /// Visible text was appended
    pub text_added: bool,
    /// The chunk set the terminal title itself
    pub title_set: bool,
}

/// Bounded, normalised view of the most recent agent output.
///
/// Text is lower-cased and stripped of escape sequences. Line breaks are
/// kept (one per line, no blank lines) so prompt markers can be matched
/// against the last few lines; any other run of whitespace or control
/// characters collapses to a single space.
#[derive(Debug)]
pub struct RollingWindow {
    text: String,
    carry: Vec<u8>,
    capacity: usize,
    pending_space: bool,
}

impl RollingWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            text: String::with_capacity(capacity),
            carry: Vec::new(),
            capacity,
            pending_space: false,
        }
    }

    /// Append a raw output chunk. Unfinished escape sequences and split
    /// characters at the end are held back until the next chunk.
    pub fn feed(&mut self, chunk: &[u8]) -> Fed {
        let mut bytes = std::mem::take(&mut self.carry);
        bytes.extend_from_slice(chunk);

        let cut = ansi::incomplete_tail(&bytes).unwrap_or(bytes.len());
        self.carry = bytes.split_off(cut);

        let title_set = RE_TITLE.is_match(&bytes);
        let added = self.push_text(&normalize(&bytes));
        self.trim();

        Fed {
            text_added: added > 0,
            title_set,
        }
    }

    #[cfg(test)]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The window with line breaks turned into spaces.
    pub fn flattened(&self) -> String {
        self.text.replace('\n', " ")
    }

    /// The last `lines` lines of the window.
    pub fn tail_lines(&self, lines: usize) -> &str {
        let trimmed = self.text.trim_end_matches('\n');
        if lines == 0 {
            return &trimmed[trimmed.len()..];
        }
        match trimmed.rmatch_indices('\n').nth(lines - 1) {
            Some((i, _)) => &trimmed[i + 1..],
            None => trimmed,
        }
    }

    /// Forget the text seen so far. Held-back bytes are kept.
    pub fn clear(&mut self) {
        self.text.clear();
        self.pending_space = false;
    }

    fn push_text(&mut self, text: &str) -> usize {
        let mut added = 0;
        for ch in text.chars() {
            match ch {
                '\n' | '\r' => self.push_break(),
                c if c.is_whitespace() || c.is_control() => self.pending_space = true,
                c => {
                    if self.pending_space && !self.text.is_empty() && !self.text.ends_with('\n') {
                        self.text.push(' ');
                    }
                    self.pending_space = false;
                    self.text.push(c);
                    added += 1;
                }
            }
        }
        added
    }

    fn push_break(&mut self) {
        self.pending_space = false;
        while self.text.ends_with(' ') {
            self.text.pop();
        }
        if !self.text.is_empty() && !self.text.ends_with('\n') {
            self.text.push('\n');
        }
    }

    fn trim(&mut self) {
        if self.text.len() <= self.capacity {
            return;
        }
        let mut cut = self.text.len() - self.capacity;
        while !self.text.is_char_boundary(cut) {
            cut += 1;
        }
        self.text.drain(..cut);
    }
}

/// Strip escape sequences and lower-case.
///
/// Cursor-forward becomes a space and vertical cursor movement a line
/// break, since full-screen agents lay out words and lines that way
/// instead of printing whitespace.
pub fn normalize(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    let text = RE_OSC.replace_all(&text, "");
    let text = RE_STRING_CMD.replace_all(&text, "");
    let text = RE_CSI.replace_all(&text, |caps: &Captures| match &caps[1] {
        "C" => " ",
        "A" | "B" | "E" | "F" | "H" | "f" | "d" => "\n",
        _ => "",
    });
    let text = RE_ESC.replace_all(&text, "");
    text.to_lowercase()
}
