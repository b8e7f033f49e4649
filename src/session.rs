//! Session orchestration: wires the PTY, the relays and the status task
//! together and turns the agent's fate into the proxy's exit code.

use std::io::{self, Read, Write};
use std::path::Path;
use std::time::Duration;

use portable_pty::PtySize;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::agents::{AgentProfile, AgentTable};
use crate::classifier::Classifier;
use crate::config::Tuning;
use crate::error::{ProxyError, Result};
use crate::events::SessionEvent;
use crate::monitor::{self, MonitorHandle, StatusMonitor};
use crate::pty::{self, ChildExit, PtySession, RawModeGuard};
use crate::relay::{self, SharedOutput};
use crate::status::Status;
use crate::title::{self, TitleEmitter};

/// Output still arriving after the agent exits is relayed for this long
const DRAIN_TIMEOUT: Duration = Duration::from_millis(250);
const MONITOR_SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(500);

/// The command line to wrap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub command: String,
    pub args: Vec<String>,
    /// Used instead of the working directory's name in the title
    pub project: Option<String>,
}

/// The terminal a session runs against
pub struct TerminalIo<R, W> {
    pub input: R,
    pub output: W,
    pub size: PtySize,
    /// Put the controlling terminal into raw mode for the session
    pub raw_mode: bool,
}

/// One wrapped agent run
pub struct Session {
    pub project_name: String,
    /// `None` when the command has no agent profile: plain passthrough
    pub agent_label: Option<String>,
    pty: PtySession,
    status: Option<watch::Receiver<Status>>,
    child_exited: bool,
}

impl Session {
    fn start(
        invocation: &Invocation,
        project_name: String,
        profile: Option<&AgentProfile>,
        size: PtySize,
    ) -> Result<Self> {
        let pty = PtySession::start(&invocation.command, &invocation.args, size)?;
        Ok(Self {
            project_name,
            agent_label: profile.map(|p| p.label.clone()),
            pty,
            status: None,
            child_exited: false,
        })
    }

    /// Status last reported by the status task.
    pub fn current_status(&self) -> Option<Status> {
        self.status.as_ref().map(|rx| *rx.borrow())
    }

    fn resize(&self, size: PtySize) {
        match self.pty.resize(size) {
            Ok(()) => tracing::debug!(rows = size.rows, cols = size.cols, "resized"),
            Err(e) => tracing::warn!("{e}"),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Never leave the agent running behind us
        if !self.child_exited {
            self.pty.kill();
        }
    }
}

/// Result of a session that got as far as starting the agent
struct Outcome {
    exit: ChildExit,
    relay_error: Option<ProxyError>,
}

/// Signals relayed to the agent's process group
struct ForwardedSignals {
    interrupt: Signal,
    terminate: Signal,
    hangup: Signal,
    quit: Signal,
}

impl ForwardedSignals {
    fn new() -> io::Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            hangup: signal(SignalKind::hangup())?,
            quit: signal(SignalKind::quit())?,
        })
    }

    async fn recv(&mut self) -> i32 {
        tokio::select! {
            _ = self.interrupt.recv() => libc::SIGINT,
            _ = self.terminate.recv() => libc::SIGTERM,
            _ = self.hangup.recv() => libc::SIGHUP,
            _ = self.quit.recv() => libc::SIGQUIT,
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn spawn_named(name: &str, f: impl FnOnce() + Send + 'static) -> Result<()> {
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .map(drop)
        .map_err(ProxyError::Relay)
}

/// Name shown as the project part of the title.
pub fn project_name(cwd: &Path) -> String {
    let name = cwd
        .file_name()
        .map(|name| title::sanitize(&name.to_string_lossy()))
        .unwrap_or_default();
    if name.is_empty() {
        "/".to_string()
    } else {
        name
    }
}

fn current_project_name() -> String {
    std::env::current_dir()
        .map(|cwd| project_name(&cwd))
        .unwrap_or_else(|_| "/".to_string())
}

pub struct Orchestrator {
    agents: AgentTable,
    tuning: Tuning,
}

impl Orchestrator {
    pub fn new(agents: AgentTable, tuning: Tuning) -> Self {
        Self { agents, tuning }
    }

    /// Wrap the agent on the real terminal. Returns the exit code for the
    /// invoking shell.
    pub async fn run(&self, invocation: Invocation) -> i32 {
        if !pty::is_interactive() {
            return exec_direct(&invocation);
        }
        let io = TerminalIo {
            input: io::stdin(),
            output: io::stdout(),
            size: pty::window_size(),
            raw_mode: true,
        };
        self.run_with(invocation, io).await
    }

    /// Wrap the agent with explicit terminal endpoints.
    pub async fn run_with<R, W>(&self, invocation: Invocation, io: TerminalIo<R, W>) -> i32
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        match self.drive(invocation, io).await {
            Ok(outcome) => {
                if let Some(e) = outcome.relay_error {
                    tracing::error!("{e}");
                    eprintln!("agent-title: {e}");
                }
                outcome.exit.exit_code()
            }
            Err(e) => {
                tracing::error!("{e}");
                eprintln!("agent-title: {e}");
                e.exit_code()
            }
        }
    }

    async fn drive<R, W>(&self, invocation: Invocation, io: TerminalIo<R, W>) -> Result<Outcome>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let project = invocation.project.clone().unwrap_or_else(current_project_name);
        let profile = self.agents.resolve(&invocation.command);
        match profile {
            Some(profile) => tracing::info!(agent = %profile.label, %project, "wrapping agent"),
            None => tracing::info!(command = %invocation.command, "no agent profile, plain passthrough"),
        }

        // Registered before the child exists so no signal slips past us
        let mut forwarded = ForwardedSignals::new().map_err(ProxyError::Terminal)?;
        let mut window_change =
            signal(SignalKind::window_change()).map_err(ProxyError::Terminal)?;

        let mut session = Session::start(&invocation, project, profile, io.size)?;
        let _raw = if io.raw_mode { Some(RawModeGuard::enable()?) } else { None };

        let output = SharedOutput::new(io.output);
        let monitor = profile.map(|profile| self.start_monitor(&mut session, profile, output.clone()));

        let (events_tx, mut events) = mpsc::unbounded_channel::<SessionEvent>();

        let reader = session.pty.reader()?;
        let tee = monitor.as_ref().map(|m| m.output.clone());
        let tx = events_tx.clone();
        spawn_named("pty-output", move || {
            let end = relay::pump_output(reader, &output, tee);
            let _ = tx.send(SessionEvent::OutputClosed(end));
        })?;

        let writer = session.pty.writer()?;
        let keys = monitor.as_ref().map(|m| m.input.clone());
        let input = io.input;
        let tx = events_tx.clone();
        spawn_named("pty-input", move || {
            let end = relay::pump_input(input, writer, keys);
            let _ = tx.send(SessionEvent::InputClosed(end));
        })?;

        if let Some(child) = session.pty.take_child() {
            spawn_named("agent-wait", move || {
                let _ = events_tx.send(SessionEvent::ChildExited(pty::wait_child(child)));
            })?;
        }

        let grace = self.tuning.termination_grace;
        let mut exit = None;
        let mut output_open = true;
        let mut relay_error = None;
        let mut deadline: Option<Instant> = None;
        let mut killed = false;

        while exit.is_none() || output_open {
            tokio::select! {
                Some(event) = events.recv() => match event {
                    SessionEvent::ChildExited(status) => {
                        tracing::info!(?status, "agent exited");
                        session.child_exited = true;
                        exit = Some(status);
                        deadline = Some(Instant::now() + DRAIN_TIMEOUT);
                    }
                    SessionEvent::OutputClosed(end) => {
                        tracing::debug!(bytes = end.bytes, "agent output closed");
                        output_open = false;
                        if end.failed_early() {
                            relay_error = end.error.map(ProxyError::Relay);
                        }
                        if exit.is_none() {
                            deadline.get_or_insert(Instant::now() + grace);
                        }
                    }
                    SessionEvent::InputClosed(end) => {
                        if let Some(e) = &end.error {
                            tracing::warn!(error = %e, "terminal input failed");
                        }
                        if exit.is_none() {
                            tracing::info!("terminal input closed, hanging up agent");
                            session.pty.signal(libc::SIGHUP);
                            deadline.get_or_insert(Instant::now() + grace);
                        }
                    }
                },
                _ = window_change.recv() => session.resize(pty::window_size()),
                sig = forwarded.recv() => {
                    tracing::info!(signal = sig, "forwarding signal to agent");
                    session.pty.signal(sig);
                    if sig == libc::SIGTERM || sig == libc::SIGHUP {
                        deadline.get_or_insert(Instant::now() + grace);
                    }
                }
                _ = sleep_until(deadline) => {
                    if exit.is_some() {
                        tracing::debug!("stopped waiting for late agent output");
                        break;
                    }
                    if killed {
                        tracing::warn!("agent survived kill, giving up on it");
                        break;
                    }
                    tracing::warn!("agent did not exit in time, killing it");
                    session.pty.kill();
                    killed = true;
                    deadline = Some(Instant::now() + grace);
                }
            }
        }

        if let Some(monitor) = monitor {
            monitor.shutdown(self.tuning.debounce + MONITOR_SHUTDOWN_TIMEOUT).await;
        }
        tracing::debug!(
            project = %session.project_name,
            agent = ?session.agent_label,
            status = ?session.current_status(),
            "session over"
        );

        Ok(Outcome {
            exit: exit.unwrap_or(ChildExit::Unknown),
            relay_error,
        })
    }

    fn start_monitor<W: Write + Send + 'static>(
        &self,
        session: &mut Session,
        profile: &AgentProfile,
        output: SharedOutput<W>,
    ) -> MonitorHandle {
        let classifier = Classifier::new(profile, &self.tuning, std::time::Instant::now());
        let emitter = TitleEmitter::new(&session.project_name, &profile.label, self.tuning.debounce, output);
        let (monitor, status) = StatusMonitor::new(classifier, emitter);
        session.status = Some(status);
        monitor::spawn(monitor, self.tuning.tick)
    }
}

/// Without a terminal there is nothing to title: become the agent.
fn exec_direct(invocation: &Invocation) -> i32 {
    use std::os::unix::process::CommandExt;

    tracing::info!(command = %invocation.command, "not attached to a terminal, running agent directly");
    let cwd = std::env::current_dir().unwrap_or_else(|_| "/".into());
    let program = match pty::resolve_executable(
        &invocation.command,
        std::env::var_os("PATH").as_deref(),
        &cwd,
    ) {
        Ok(program) => program,
        Err(e) => {
            eprintln!("agent-title: {e}");
            return e.exit_code();
        }
    };

    // Only returns on failure
    let e = std::process::Command::new(program).args(&invocation.args).exec();
    let e = ProxyError::Spawn {
        command: invocation.command.clone(),
        reason: e.to_string(),
    };
    tracing::error!("{e}");
    eprintln!("agent-title: {e}");
    e.exit_code()
}
