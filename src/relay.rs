//! Byte relays between the real terminal and the PTY master.
//!
//! Each direction runs on its own blocking thread. The output direction
//! writes every chunk to the terminal first and only then offers a copy to
//! the classifier, with `try_send`, so a slow or dead classifier can never
//! hold back what the user sees.

use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc::{self, error::TrySendError};

use crate::ansi;
use crate::title::TitleSink;

pub type Chunk = Vec<u8>;

const BUF_SIZE: usize = 64 * 1024;

/// How a relay direction ended
#[derive(Debug)]
pub struct RelayEnd {
    /// Bytes passed through before the end
    pub bytes: u64,
    /// The error that ended the relay, if it was not a clean end of stream
    pub error: Option<io::Error>,
}

impl RelayEnd {
    /// The relay broke before anything got through.
    pub fn failed_early(&self) -> bool {
        self.bytes == 0 && self.error.is_some()
    }
}

struct TerminalOutput<W> {
    writer: W,
    /// Unfinished escape sequence at the end of the last passthrough write
    open_escape: Vec<u8>,
}

/// The real terminal's output, shared by the output relay and the title
/// emitter. Each write holds the lock for the whole chunk, so a title can
/// only land between chunks, and never inside an escape sequence.
pub struct SharedOutput<W>(Arc<Mutex<TerminalOutput<W>>>);

impl<W> Clone for SharedOutput<W> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<W: Write> SharedOutput<W> {
    pub fn new(writer: W) -> Self {
        Self(Arc::new(Mutex::new(TerminalOutput {
            writer,
            open_escape: Vec::new(),
        })))
    }

    /// Write agent output unchanged.
    pub fn passthrough(&self, chunk: &[u8]) -> io::Result<()> {
        let mut out = self.lock();
        out.writer.write_all(chunk)?;
        out.writer.flush()?;

        let mut tail = std::mem::take(&mut out.open_escape);
        tail.extend_from_slice(chunk);
        if let Some(start) = ansi::unterminated_escape(&tail) {
            out.open_escape = tail.split_off(start);
        }
        Ok(())
    }

    /// Write bytes of our own between two passthrough chunks. Returns
    /// `false`, writing nothing, while the agent is in mid escape sequence.
    pub fn insert(&self, bytes: &[u8]) -> io::Result<bool> {
        let mut out = self.lock();
        if !out.open_escape.is_empty() {
            return Ok(false);
        }
        out.writer.write_all(bytes)?;
        out.writer.flush()?;
        Ok(true)
    }

    #[cfg(test)]
    pub fn inspect<T>(&self, f: impl FnOnce(&W) -> T) -> T {
        f(&self.lock().writer)
    }

    fn lock(&self) -> MutexGuard<'_, TerminalOutput<W>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send> TitleSink for SharedOutput<W> {
    fn put_title(&mut self, sequence: &[u8]) -> io::Result<bool> {
        self.insert(sequence)
    }
}

/// PTY master → terminal. Runs until end of stream or a write failure.
///
/// `tee` is `None` for pure passthrough; it is also dropped, without
/// disturbing the relay, once the receiving side goes away.
pub fn pump_output<R: Read, W: Write>(
    mut reader: R,
    output: &SharedOutput<W>,
    mut tee: Option<mpsc::Sender<Chunk>>,
) -> RelayEnd {
    let mut buf = vec![0u8; BUF_SIZE];
    let mut bytes = 0u64;

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => return RelayEnd { bytes, error: None },
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if is_hangup(&e) => return RelayEnd { bytes, error: None },
            Err(e) => return RelayEnd { bytes, error: Some(e) },
        };
        let chunk = &buf[..n];

        if let Err(e) = output.passthrough(chunk) {
            return RelayEnd { bytes, error: Some(e) };
        }
        bytes += n as u64;

        if let Some(tx) = &tee {
            match tx.try_send(chunk.to_vec()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    tracing::trace!(len = n, "classifier busy, chunk not observed");
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::warn!("status monitor stopped, continuing as plain passthrough");
                    tee = None;
                }
            }
        }
    }
}

/// Terminal → PTY master. Keystrokes are forwarded first, then offered to
/// `keys` the same way output is offered to the classifier.
pub fn pump_input<R: Read, W: Write>(
    mut reader: R,
    mut writer: W,
    mut keys: Option<mpsc::Sender<Chunk>>,
) -> RelayEnd {
    let mut buf = vec![0u8; BUF_SIZE];
    let mut bytes = 0u64;

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => return RelayEnd { bytes, error: None },
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return RelayEnd { bytes, error: Some(e) },
        };
        let chunk = &buf[..n];

        if let Err(e) = writer.write_all(chunk).and_then(|()| writer.flush()) {
            if is_hangup(&e) {
                return RelayEnd { bytes, error: None };
            }
            return RelayEnd { bytes, error: Some(e) };
        }
        bytes += n as u64;

        if let Some(tx) = &keys {
            if let Err(TrySendError::Closed(_)) = tx.try_send(chunk.to_vec()) {
                keys = None;
            }
        }
    }
}

/// Linux reports a PTY whose other side is gone as EIO rather than EOF.
fn is_hangup(e: &io::Error) -> bool {
    e.raw_os_error() == Some(libc::EIO)
}
