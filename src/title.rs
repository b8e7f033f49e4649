use std::io;
use std::time::{Duration, Instant};

use crate::status::Status;

/// Where title sequences are written.
pub trait TitleSink: Send {
    /// Write a complete title sequence. `Ok(false)` means the sequence
    /// cannot be placed right now and should be retried later.
    fn put_title(&mut self, sequence: &[u8]) -> io::Result<bool>;
}

impl TitleSink for Vec<u8> {
    fn put_title(&mut self, sequence: &[u8]) -> io::Result<bool> {
        self.extend_from_slice(sequence);
        Ok(true)
    }
}

/// `<project> - <agent> - <glyph> <status>`
pub fn format_title(project: &str, label: &str, status: Status) -> String {
    format!("{project} - {label} - {status}")
}

/// OSC 2 window-title sequence, BEL terminated.
pub fn title_sequence(title: &str) -> String {
    format!("\x1b]2;{title}\x07")
}

/// Drop control characters so the text cannot end the OSC string early.
pub fn sanitize(text: &str) -> String {
    text.chars().filter(|c| !c.is_control()).collect()
}

/// Writes the tab title when the status changes.
///
/// A status equal to the one on screen is never written again. A change is
/// held for `debounce` from the first request before it is written, and
/// requests arriving meanwhile replace it, so a burst collapses to its
/// latest status. Writes are always at least `debounce` apart.
pub struct TitleEmitter<S> {
    sink: S,
    project: String,
    label: String,
    debounce: Duration,
    displayed: Option<Status>,
    pending: Option<Status>,
    pending_since: Option<Instant>,
    last_emit: Option<Instant>,
}

impl<S: TitleSink> TitleEmitter<S> {
    pub fn new(project: &str, label: &str, debounce: Duration, sink: S) -> Self {
        Self {
            sink,
            project: sanitize(project),
            label: sanitize(label),
            debounce,
            displayed: None,
            pending: None,
            pending_since: None,
            last_emit: None,
        }
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    /// Request `status` be shown. Returns whether a title was written now.
    pub fn emit(&mut self, status: Status, now: Instant) -> io::Result<bool> {
        if self.displayed == Some(status) {
            self.pending = None;
            self.pending_since = None;
        } else {
            self.pending = Some(status);
            self.pending_since.get_or_insert(now);
        }
        self.flush(now)
    }

    /// Write the pending status once it has waited out the debounce window.
    pub fn flush(&mut self, now: Instant) -> io::Result<bool> {
        let (Some(status), Some(since)) = (self.pending, self.pending_since) else {
            return Ok(false);
        };
        if now.saturating_duration_since(since) < self.debounce || !self.spaced(now) {
            return Ok(false);
        }
        self.write(status, now)
    }

    /// Show `status` as soon as the spacing to the previous write allows,
    /// without a debounce window of its own. For the first and the last
    /// title of a session, which nothing can supersede.
    ///
    /// Returns whether `status` is now on screen.
    pub fn settle(&mut self, status: Status, now: Instant) -> io::Result<bool> {
        if self.displayed == Some(status) {
            self.pending = None;
            self.pending_since = None;
            return Ok(true);
        }
        self.pending = Some(status);
        self.pending_since.get_or_insert(now);
        if !self.spaced(now) {
            return Ok(false);
        }
        self.write(status, now)
    }

    /// Something else changed the title; whatever we showed is gone.
    pub fn invalidate(&mut self, now: Instant) {
        if let Some(status) = self.displayed.take() {
            self.pending.get_or_insert(status);
            self.pending_since.get_or_insert(now);
        }
    }

    fn spaced(&self, now: Instant) -> bool {
        self.last_emit
            .map_or(true, |last| now.saturating_duration_since(last) >= self.debounce)
    }

    fn write(&mut self, status: Status, now: Instant) -> io::Result<bool> {
        let title = format_title(&self.project, &self.label, status);
        if !self.sink.put_title(title_sequence(&title).as_bytes())? {
            return Ok(false);
        }
        tracing::debug!(%title, "title written");
        self.displayed = Some(status);
        self.pending = None;
        self.pending_since = None;
        self.last_emit = Some(now);
        Ok(true)
    }

    #[cfg(test)]
    pub fn displayed(&self) -> Option<Status> {
        self.displayed
    }

    #[cfg(test)]
    pub fn pending(&self) -> Option<Status> {
        self.pending
    }

    #[cfg(test)]
    pub fn sink(&self) -> &S {
        &self.sink
    }
}
