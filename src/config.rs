use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ProxyError, Result};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);
pub const DEFAULT_IDLE_THRESHOLD: Duration = Duration::from_millis(1400);
pub const DEFAULT_WINDOW_BYTES: usize = 4000;
pub const DEFAULT_TICK: Duration = Duration::from_millis(100);
pub const DEFAULT_TERMINATION_GRACE: Duration = Duration::from_secs(2);

const MIN_WINDOW_BYTES: usize = 256;
const MIN_TICK: Duration = Duration::from_millis(10);

/// Heuristic tuning for classification and title emission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tuning {
    /// Minimum spacing between two title writes
    pub debounce: Duration,
    /// Silence after which a working agent is considered done
    pub idle_threshold: Duration,
    /// Size of the classifier's rolling window
    pub window_bytes: usize,
    /// Cadence of the status task's timer
    pub tick: Duration,
    /// How long a forwarded terminate signal may take before the child is killed
    pub termination_grace: Duration,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            idle_threshold: DEFAULT_IDLE_THRESHOLD,
            window_bytes: DEFAULT_WINDOW_BYTES,
            tick: DEFAULT_TICK,
            termination_grace: DEFAULT_TERMINATION_GRACE,
        }
    }
}

/// On-disk tuning, every field optional.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TuningFile {
    pub debounce_ms: Option<u64>,
    pub idle_ms: Option<u64>,
    pub window_bytes: Option<usize>,
    pub tick_ms: Option<u64>,
    pub termination_grace_ms: Option<u64>,
}

impl TuningFile {
    /// Load the file at `path`. A missing file is not an error.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ProxyError::Config {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })
            }
        };
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| ProxyError::Config {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
    }

    fn apply(&self, tuning: &mut Tuning) {
        if let Some(ms) = self.debounce_ms {
            tuning.debounce = Duration::from_millis(ms);
        }
        if let Some(ms) = self.idle_ms {
            tuning.idle_threshold = Duration::from_millis(ms);
        }
        if let Some(bytes) = self.window_bytes {
            tuning.window_bytes = bytes;
        }
        if let Some(ms) = self.tick_ms {
            tuning.tick = Duration::from_millis(ms);
        }
        if let Some(ms) = self.termination_grace_ms {
            tuning.termination_grace = Duration::from_millis(ms);
        }
    }
}

/// Values given on the command line or through the environment.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TuningOverrides {
    pub debounce_ms: Option<u64>,
    pub idle_ms: Option<u64>,
    pub window_bytes: Option<usize>,
}

impl Tuning {
    /// Defaults, then the config file, then explicit overrides.
    ///
    /// A config file that cannot be read is logged and skipped; the proxy
    /// never refuses to wrap an agent over a tuning problem.
    pub fn resolve(config_file: Option<&Path>, overrides: &TuningOverrides) -> Self {
        let mut tuning = Tuning::default();

        if let Some(path) = config_file {
            match TuningFile::load(path) {
                Ok(Some(file)) => {
                    tracing::debug!(path = %path.display(), "loaded tuning file");
                    file.apply(&mut tuning);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!("{}", e),
            }
        }

        if let Some(ms) = overrides.debounce_ms {
            tuning.debounce = Duration::from_millis(ms);
        }
        if let Some(ms) = overrides.idle_ms {
            tuning.idle_threshold = Duration::from_millis(ms);
        }
        if let Some(bytes) = overrides.window_bytes {
            tuning.window_bytes = bytes;
        }

        tuning.clamped()
    }

    fn clamped(mut self) -> Self {
        self.window_bytes = self.window_bytes.max(MIN_WINDOW_BYTES);
        self.tick = self.tick.max(MIN_TICK);
        self
    }
}

/// Default location of the tuning file.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("agent-title").join("config.json"))
}
