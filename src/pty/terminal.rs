use crossterm::terminal;
use crossterm::tty::IsTty;
use portable_pty::PtySize;

use crate::error::{ProxyError, Result};

const FALLBACK_COLS: u16 = 80;
const FALLBACK_ROWS: u16 = 24;

/// Keeps the controlling terminal in raw mode while alive.
///
/// Dropping the guard restores the original mode, so every way out of
/// the session (return, `?`, unwinding panic) puts the terminal back.
#[derive(Debug)]
pub struct RawModeGuard {
    _private: (),
}

impl RawModeGuard {
    pub fn enable() -> Result<Self> {
        terminal::enable_raw_mode().map_err(ProxyError::Terminal)?;
        Ok(Self { _private: () })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(e) = terminal::disable_raw_mode() {
            tracing::warn!(error = %e, "failed to restore terminal mode");
        }
    }
}

/// Both stdin and stdout are attached to a terminal.
pub fn is_interactive() -> bool {
    std::io::stdin().is_tty() && std::io::stdout().is_tty()
}

/// Current size of the controlling terminal, 80x24 if it cannot be read.
pub fn window_size() -> PtySize {
    let (cols, rows) = terminal::size().unwrap_or((FALLBACK_COLS, FALLBACK_ROWS));
    PtySize {
        rows: if rows == 0 { FALLBACK_ROWS } else { rows },
        cols: if cols == 0 { FALLBACK_COLS } else { cols },
        pixel_width: 0,
        pixel_height: 0,
    }
}

/// Log panics to the log file instead of the agent's screen.
///
/// Relay and status threads may panic without ending the session. A panic
/// on the main thread is fatal: the terminal is restored first so the
/// report is readable.
pub fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let thread = std::thread::current();
        let name = thread.name().unwrap_or("unnamed");
        tracing::error!(thread = name, "panic: {}", info);

        if name == "main" {
            let _ = terminal::disable_raw_mode();
            default_hook(info);
        }
    }));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_size_is_never_zero() {
        let size = window_size();
        assert!(size.rows > 0);
        assert!(size.cols > 0);
    }
}
