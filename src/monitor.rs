//! The status task: owns the classifier and the title emitter.
//!
//! Output and input chunks arrive over bounded channels fed by the relays;
//! a timer drives idle detection and debounced flushes. If classification
//! panics or a title cannot be written, the task stops. The relays notice
//! the closed channels and carry on as plain passthrough.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::classifier::Classifier;
use crate::error::ProxyError;
use crate::relay::Chunk;
use crate::status::Status;
use crate::title::{TitleEmitter, TitleSink};

const OUTPUT_QUEUE: usize = 1024;
const INPUT_QUEUE: usize = 64;
/// Extra time, past the debounce spacing, to get the final title out
const FINAL_TITLE_SLACK: Duration = Duration::from_millis(200);

pub struct StatusMonitor<S> {
    engine: Option<Classifier>,
    emitter: TitleEmitter<S>,
    status: watch::Sender<Status>,
}

impl<S: TitleSink> StatusMonitor<S> {
    pub fn new(classifier: Classifier, emitter: TitleEmitter<S>) -> (Self, watch::Receiver<Status>) {
        let (status, rx) = watch::channel(classifier.current());
        let monitor = Self {
            engine: Some(classifier),
            emitter,
            status,
        };
        (monitor, rx)
    }

    /// False once title updates have been given up for this session.
    pub fn is_active(&self) -> bool {
        self.engine.is_some()
    }

    /// Show the initial status.
    pub fn start(&mut self, now: Instant) {
        let Some(initial) = self.engine.as_ref().map(Classifier::current) else {
            return;
        };
        let result = self.emitter.settle(initial, now);
        self.check(result);
    }

    pub fn on_output(&mut self, chunk: &[u8], now: Instant) {
        let Some((status, overwritten)) = self.with_engine(|engine| {
            let status = engine.observe(chunk, now);
            (status, engine.take_title_overwritten())
        }) else {
            return;
        };
        if overwritten {
            self.emitter.invalidate(now);
        }
        self.show(status, now);
    }

    pub fn on_input(&mut self, keys: &[u8], now: Instant) {
        let status = self.with_engine(|engine| engine.note_input(keys)).flatten();
        self.show(status, now);
    }

    pub fn on_tick(&mut self, now: Instant) {
        let status = self.with_engine(|engine| engine.tick(now)).flatten();
        self.show(status, now);
    }

    /// The agent is gone: leave the title at done. Returns false while the
    /// final title still has to wait for the spacing to the previous one,
    /// or for the agent's last escape sequence to end.
    pub fn finish(&mut self, now: Instant) -> bool {
        if !self.is_active() {
            return true;
        }
        self.status.send_replace(Status::Done);
        match self.emitter.settle(Status::Done, now) {
            Ok(shown) => shown,
            Err(e) => {
                self.check(Err(e));
                true
            }
        }
    }

    #[cfg(test)]
    pub fn emitter(&self) -> &TitleEmitter<S> {
        &self.emitter
    }

    fn show(&mut self, status: Option<Status>, now: Instant) {
        if !self.is_active() {
            return;
        }
        let result = match status {
            Some(status) => {
                self.status.send_replace(status);
                self.emitter.emit(status, now)
            }
            None => self.emitter.flush(now),
        };
        self.check(result);
    }

    fn check(&mut self, result: io::Result<bool>) {
        if let Err(e) = result {
            tracing::warn!(error = %e, "title write failed, title updates paused");
            self.engine = None;
        }
    }

    fn with_engine<T>(&mut self, f: impl FnOnce(&mut Classifier) -> T) -> Option<T> {
        let engine = self.engine.as_mut()?;
        match panic::catch_unwind(AssertUnwindSafe(|| f(engine))) {
            Ok(value) => Some(value),
            Err(payload) => {
                let fault = ProxyError::ClassificationFault(panic_message(payload.as_ref()));
                tracing::warn!("{fault}, title updates paused");
                self.engine = None;
                None
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Channels into a running status task
#[derive(Debug)]
pub struct MonitorHandle {
    /// Agent output, teed by the output relay
    pub output: mpsc::Sender<Chunk>,
    /// User keystrokes, teed by the input relay
    pub input: mpsc::Sender<Chunk>,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Show the final title and wait (bounded) for the task to end. The
    /// final title is best effort: it is dropped if the agent's output
    /// ended inside an escape sequence.
    pub async fn shutdown(self, timeout: Duration) {
        let _ = self.shutdown.send(());
        match tokio::time::timeout(timeout, self.task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "status task failed"),
            Err(_) => tracing::warn!("status task did not stop in time"),
        }
    }
}

/// Run `monitor` on the tokio runtime.
pub fn spawn<S: TitleSink + 'static>(mut monitor: StatusMonitor<S>, tick: Duration) -> MonitorHandle {
    let (output, mut output_rx) = mpsc::channel::<Chunk>(OUTPUT_QUEUE);
    let (input, mut input_rx) = mpsc::channel::<Chunk>(INPUT_QUEUE);
    let (shutdown, mut shutdown_rx) = oneshot::channel::<()>();
    let final_wait = monitor.emitter.debounce() + FINAL_TITLE_SLACK;

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        monitor.start(Instant::now());
        while monitor.is_active() {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    let give_up = Instant::now() + final_wait;
                    while !monitor.finish(Instant::now()) {
                        if Instant::now() >= give_up {
                            tracing::debug!("final title not written");
                            break;
                        }
                        tokio::time::sleep(tick).await;
                    }
                    break;
                }
                Some(chunk) = output_rx.recv() => monitor.on_output(&chunk, Instant::now()),
                Some(keys) = input_rx.recv() => monitor.on_input(&keys, Instant::now()),
                _ = ticker.tick() => monitor.on_tick(Instant::now()),
            }
        }
        tracing::debug!("status task stopped");
    });

    MonitorHandle {
        output,
        input,
        shutdown,
        task,
    }
}
