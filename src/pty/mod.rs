//! Pseudo-terminal session management.
//!
//! Spawns the wrapped agent on the slave side of a fresh PTY so it believes
//! it owns an interactive terminal, and gives the orchestrator the master
//! side for relaying, resizing and signalling.

mod resolve;
mod terminal;

pub use resolve::resolve_executable;
pub use terminal::{install_panic_hook, is_interactive, window_size, RawModeGuard};

use std::io::{Read, Write};
use std::path::Path;

use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};

use crate::error::{ProxyError, Result};

/// How the wrapped process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildExit {
    /// Exited on its own with this code
    Code(i32),
    /// Killed by this signal
    Signal(i32),
    /// The wait itself failed
    Unknown,
}

impl ChildExit {
    /// Shell-style exit code: the child's own code, or 128 + signal.
    pub fn exit_code(self) -> i32 {
        match self {
            ChildExit::Code(code) => code,
            ChildExit::Signal(signal) => 128 + signal,
            ChildExit::Unknown => crate::error::EXIT_INTERNAL,
        }
    }
}

impl From<&portable_pty::ExitStatus> for ChildExit {
    fn from(status: &portable_pty::ExitStatus) -> Self {
        if let Some(signal) = status.signal().and_then(signal_number) {
            return ChildExit::Signal(signal);
        }
        ChildExit::Code(i32::try_from(status.exit_code()).unwrap_or(crate::error::EXIT_INTERNAL))
    }
}

/// `strsignal` descriptions of the signals an agent is likely to die from
const SIGNAL_NAMES: &[(libc::c_int, &str)] = &[
    (libc::SIGHUP, "Hangup"),
    (libc::SIGINT, "Interrupt"),
    (libc::SIGQUIT, "Quit"),
    (libc::SIGILL, "Illegal instruction"),
    (libc::SIGTRAP, "Trace/breakpoint trap"),
    (libc::SIGABRT, "Aborted"),
    (libc::SIGBUS, "Bus error"),
    (libc::SIGFPE, "Floating point exception"),
    (libc::SIGKILL, "Killed"),
    (libc::SIGUSR1, "User defined signal 1"),
    (libc::SIGSEGV, "Segmentation fault"),
    (libc::SIGUSR2, "User defined signal 2"),
    (libc::SIGPIPE, "Broken pipe"),
    (libc::SIGALRM, "Alarm clock"),
    (libc::SIGTERM, "Terminated"),
    (libc::SIGXCPU, "CPU time limit exceeded"),
    (libc::SIGXFSZ, "File size limit exceeded"),
    (libc::SIGSYS, "Bad system call"),
];

/// portable-pty reports a signal death by its `strsignal` description,
/// e.g. "Terminated", or "Terminated: 15" on the BSDs.
fn signal_number(name: &str) -> Option<i32> {
    if let Some(n) = name.strip_prefix("Signal ") {
        return n.trim().parse().ok();
    }
    let description = name.split(':').next().unwrap_or(name).trim();
    SIGNAL_NAMES
        .iter()
        .find(|(_, known)| known.eq_ignore_ascii_case(description))
        .map(|&(signal, _)| signal)
}

/// The wrapped agent running on a PTY.
pub struct PtySession {
    master: Box<dyn MasterPty + Send>,
    child: Option<Box<dyn Child + Send + Sync>>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    pid: Option<u32>,
}

impl PtySession {
    /// Resolve `command` on the search path and start it on a new PTY of
    /// the given size, in the current working directory.
    pub fn start(command: &str, args: &[String], size: PtySize) -> Result<Self> {
        let cwd = std::env::current_dir().map_err(|e| ProxyError::Spawn {
            command: command.to_string(),
            reason: format!("no working directory: {e}"),
        })?;
        let program = resolve_executable(command, std::env::var_os("PATH").as_deref(), &cwd)?;
        Self::spawn(command, &program, args, &cwd, size)
    }

    fn spawn(command: &str, program: &Path, args: &[String], cwd: &Path, size: PtySize) -> Result<Self> {
        let pair = native_pty_system()
            .openpty(size)
            .map_err(|e| ProxyError::PtyAllocation(format!("{e:#}")))?;

        let mut cmd = CommandBuilder::new(program);
        cmd.args(args);
        cmd.cwd(cwd);

        let child = pair.slave.spawn_command(cmd).map_err(|e| ProxyError::Spawn {
            command: command.to_string(),
            reason: format!("{e:#}"),
        })?;
        // Only the child may hold the slave, or the master never sees EOF
        drop(pair.slave);

        let pid = child.process_id();
        let killer = child.clone_killer();
        tracing::info!(command, pid, rows = size.rows, cols = size.cols, "agent started");

        Ok(Self {
            master: pair.master,
            child: Some(child),
            killer,
            pid,
        })
    }

    /// A reader for the agent's output.
    pub fn reader(&self) -> Result<Box<dyn Read + Send>> {
        self.master
            .try_clone_reader()
            .map_err(|e| ProxyError::PtyAllocation(format!("failed to clone reader: {e:#}")))
    }

    /// The writer for the agent's input. Can only be taken once.
    pub fn writer(&self) -> Result<Box<dyn Write + Send>> {
        self.master
            .take_writer()
            .map_err(|e| ProxyError::PtyAllocation(format!("failed to take writer: {e:#}")))
    }

    /// Hand the child over to whoever waits for it.
    pub fn take_child(&mut self) -> Option<Box<dyn Child + Send + Sync>> {
        self.child.take()
    }

    /// Set the PTY's window size; the kernel notifies the agent.
    pub fn resize(&self, size: PtySize) -> Result<()> {
        self.master
            .resize(size)
            .map_err(|e| ProxyError::Terminal(std::io::Error::other(format!("{e:#}"))))
    }

    #[cfg(test)]
    pub fn size(&self) -> Option<PtySize> {
        self.master.get_size().ok()
    }

    /// Deliver `signal` to the agent's process group.
    pub fn signal(&self, signal: i32) {
        let Some(pid) = self.pid.and_then(|pid| libc::pid_t::try_from(pid).ok()) else {
            return;
        };
        // SAFETY: plain syscalls on a pid we spawned; failures are reported
        // through errno and only logged.
        let rc = unsafe { libc::killpg(pid, signal) };
        if rc != 0 {
            let rc = unsafe { libc::kill(pid, signal) };
            if rc != 0 {
                tracing::debug!(pid, signal, error = %std::io::Error::last_os_error(), "signal not delivered");
            }
        }
    }

    /// Kill the agent outright.
    pub fn kill(&mut self) {
        if let Err(e) = self.killer.kill() {
            tracing::debug!(error = %e, "kill failed");
        }
    }
}

/// Block until `child` exits.
pub fn wait_child(mut child: Box<dyn Child + Send + Sync>) -> ChildExit {
    match child.wait() {
        Ok(status) => ChildExit::from(&status),
        Err(e) => {
            tracing::warn!(error = %e, "waiting for agent failed");
            ChildExit::Unknown
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn size(cols: u16, rows: u16) -> PtySize {
        PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        }
    }

    fn read_until(reader: &mut dyn Read, needle: &str) -> String {
        let mut output = Vec::new();
        let mut buf = [0u8; 4096];
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            match reader.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    output.extend_from_slice(&buf[..n]);
                    if String::from_utf8_lossy(&output).contains(needle) {
                        break;
                    }
                }
            }
        }
        String::from_utf8_lossy(&output).into_owned()
    }

    #[test]
    fn test_spawn_echo_and_exit_code() {
        let mut session = PtySession::start("echo", &["hello pty".to_string()], size(80, 24)).unwrap();
        let mut reader = session.reader().unwrap();
        let text = read_until(&mut reader, "hello pty");
        assert!(text.contains("hello pty"), "got: {text:?}");

        let child = session.take_child().unwrap();
        assert_eq!(wait_child(child), ChildExit::Code(0));
    }

    #[test]
    fn test_exit_code_is_propagated() {
        let mut session =
            PtySession::start("sh", &["-c".to_string(), "exit 7".to_string()], size(80, 24)).unwrap();
        let child = session.take_child().unwrap();
        assert_eq!(wait_child(child).exit_code(), 7);
    }

    #[test]
    fn test_signal_reaches_process_group() {
        let mut session =
            PtySession::start("sh", &["-c".to_string(), "sleep 30".to_string()], size(80, 24)).unwrap();
        std::thread::sleep(Duration::from_millis(100));
        session.signal(libc::SIGTERM);

        let exit = wait_child(session.take_child().unwrap());
        assert_eq!(exit, ChildExit::Signal(libc::SIGTERM));
        assert_eq!(exit.exit_code(), 128 + libc::SIGTERM);
    }

    #[test]
    fn test_resize_updates_pty_size() {
        let session = PtySession::start("cat", &[], size(80, 24)).unwrap();
        session.resize(size(132, 43)).unwrap();
        let reported = session.size().unwrap();
        assert_eq!((reported.cols, reported.rows), (132, 43));
    }

    #[test]
    fn test_agent_sees_resize() {
        let session = PtySession::start(
            "sh",
            &["-c".to_string(), "sleep 0.3; stty size".to_string()],
            size(80, 24),
        )
        .unwrap();
        let mut reader = session.reader().unwrap();
        session.resize(size(100, 30)).unwrap();
        let text = read_until(&mut reader, "30 100");
        assert!(text.contains("30 100"), "got: {text:?}");
    }

    #[test]
    fn test_missing_command() {
        let err = PtySession::start("definitely-not-an-agent-xyz", &[], size(80, 24))
            .err()
            .unwrap();
        assert!(matches!(err, ProxyError::CommandNotFound(_)));
    }

    #[test]
    fn test_signal_number_lookup() {
        assert_eq!(signal_number("Signal 9"), Some(9));
        assert_eq!(signal_number("Interrupt"), Some(libc::SIGINT));
        assert_eq!(signal_number("Killed"), Some(libc::SIGKILL));
        assert_eq!(signal_number("Terminated: 15"), Some(libc::SIGTERM));
        assert_eq!(signal_number("no such signal"), None);
    }
}
