//! Interrupts and deadlines.
//!
//! The [`InterruptHandler`] owns the only process wide mutable state of a
//! run: the [`InterruptStatus`]. Every interrupt source (a signal, the suite
//! timeout, an abort raised by another process, or a manual call) goes
//! through [`InterruptHandler::interrupt`], which escalates the level and
//! closes the current channel. Readers only ever get snapshots.

use std::{
    fmt,
    sync::{
        Arc, Mutex, OnceLock, Weak,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};

use crate::{error::SuiteError, parallel::SyncClient, util::lock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterruptCause {
    Signal,
    Timeout,
    AbortByOtherProcess,
}

impl fmt::Display for InterruptCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InterruptCause::Signal => "User",
            InterruptCause::Timeout => "Timeout",
            InterruptCause::AbortByOtherProcess => "Other Process",
        })
    }
}

/// How far an interrupt has escalated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum InterruptLevel {
    Uninterrupted,
    /// First interrupt: cancel, run teardown and report.
    CleanupAndReport,
    /// Second interrupt: skip everything but report nodes.
    ReportOnly,
    /// Third interrupt: skip report nodes too and abandon the node in flight.
    BailOut,
}

impl InterruptLevel {
    fn escalate(self) -> Self {
        match self {
            InterruptLevel::Uninterrupted => InterruptLevel::CleanupAndReport,
            InterruptLevel::CleanupAndReport => InterruptLevel::ReportOnly,
            InterruptLevel::ReportOnly | InterruptLevel::BailOut => InterruptLevel::BailOut,
        }
    }
}

/// A snapshot of the interrupt state.
#[derive(Debug, Clone)]
pub struct InterruptStatus {
    pub cause: Option<InterruptCause>,
    pub level: InterruptLevel,
    channel: Receiver<()>,
}

impl InterruptStatus {
    pub fn interrupted(&self) -> bool {
        self.level > InterruptLevel::Uninterrupted
    }

    /// Disconnects when the next interrupt arrives.
    pub fn channel(&self) -> &Receiver<()> {
        &self.channel
    }

    pub fn skip_non_report_nodes(&self) -> bool {
        self.level >= InterruptLevel::ReportOnly
    }

    pub fn bail_out(&self) -> bool {
        self.level >= InterruptLevel::BailOut
    }

    pub fn message(&self) -> String {
        match self.cause {
            Some(cause) => format!("Interrupted by {cause}"),
            None => String::from("Not interrupted"),
        }
    }
}

#[derive(Debug)]
struct InterruptState {
    cause: Option<InterruptCause>,
    level: InterruptLevel,
    closer: Option<Sender<()>>,
    channel: Receiver<()>,
}

#[derive(Debug)]
pub struct InterruptHandler {
    state: Mutex<InterruptState>,
    suite_deadline: Mutex<Option<Instant>>,
    stop_tx: Mutex<Option<Sender<()>>>,
    stop_rx: Receiver<()>,
    local_abort: AtomicBool,
}

static SIGNAL_TARGET: Mutex<Weak<InterruptHandler>> = Mutex::new(Weak::new());

impl Default for InterruptHandler {
    fn default() -> Self {
        let (closer, channel) = crossbeam_channel::bounded(0);
        let (stop_tx, stop_rx) = crossbeam_channel::bounded(0);
        Self {
            state: Mutex::new(InterruptState {
                cause: None,
                level: InterruptLevel::Uninterrupted,
                closer: Some(closer),
                channel,
            }),
            suite_deadline: Mutex::new(None),
            stop_tx: Mutex::new(Some(stop_tx)),
            stop_rx,
            local_abort: AtomicBool::new(false),
        }
    }
}

impl InterruptHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn status(&self) -> InterruptStatus {
        let state = lock(&self.state);
        InterruptStatus {
            cause: state.cause,
            level: state.level,
            channel: state.channel.clone(),
        }
    }

    /// Raise an interrupt. The first cause is kept; every call escalates the level.
    pub fn interrupt(&self, cause: InterruptCause) {
        let mut state = lock(&self.state);
        state.cause.get_or_insert(cause);
        state.level = state.level.escalate();

        let (closer, channel) = crossbeam_channel::bounded(0);
        state.closer = Some(closer);
        state.channel = channel;
        tracing::warn!(%cause, level = ?state.level, "interrupt received");
    }

    /// Route SIGINT/SIGTERM to this handler.
    ///
    /// The OS handler is installed once per process; later calls only
    /// retarget it.
    pub fn install_signal_handler(self: &Arc<Self>) -> Result<(), SuiteError> {
        static INSTALLED: OnceLock<Result<(), String>> = OnceLock::new();

        *lock(&SIGNAL_TARGET) = Arc::downgrade(self);
        let result = INSTALLED.get_or_init(|| {
            ctrlc::set_handler(|| {
                let target = lock(&SIGNAL_TARGET).upgrade();
                if let Some(handler) = target {
                    handler.interrupt(InterruptCause::Signal);
                }
            })
            .map_err(|e| e.to_string())
        });

        match result {
            Ok(()) => Ok(()),
            Err(msg) => Err(SuiteError::Signal(msg.clone())),
        }
    }

    /// Arm the suite timeout. When it elapses the run is interrupted with
    /// [`InterruptCause::Timeout`].
    pub fn start_suite_timeout(self: &Arc<Self>, timeout: Duration) {
        *lock(&self.suite_deadline) = Some(Instant::now() + timeout);

        let handler = Arc::downgrade(self);
        let stop = self.stop_rx.clone();
        thread::spawn(move || {
            if let Err(RecvTimeoutError::Timeout) = stop.recv_timeout(timeout) {
                if let Some(handler) = handler.upgrade() {
                    handler.interrupt(InterruptCause::Timeout);
                }
            }
        });
    }

    pub fn suite_deadline(&self) -> Option<Instant> {
        *lock(&self.suite_deadline)
    }

    /// Poll `client` for aborts raised by other processes.
    pub fn watch_for_abort(self: &Arc<Self>, client: Arc<dyn SyncClient>, interval: Duration) {
        let handler = Arc::downgrade(self);
        let stop = self.stop_rx.clone();
        thread::spawn(move || {
            loop {
                match stop.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    _ => return,
                }
                let Some(handler) = handler.upgrade() else {
                    return;
                };
                match client.should_abort() {
                    Ok(true) if !handler.local_abort.load(Ordering::SeqCst) => {
                        handler.interrupt(InterruptCause::AbortByOtherProcess);
                        return;
                    }
                    Ok(true) => return,
                    Ok(false) => {}
                    Err(err) => {
                        tracing::debug!(error = %err, label = err.as_label(), "abort poll failed");
                    }
                }
            }
        });
    }

    /// This process raised the abort itself; the watcher must not turn it into an interrupt.
    pub fn note_local_abort(&self) {
        self.local_abort.store(true, Ordering::SeqCst);
    }

    /// Stop the suite timer and abort watcher.
    pub fn stop(&self) {
        lock(&self.stop_tx).take();
    }
}

/// Which timeout a deadline comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeoutScope {
    Node,
    Spec,
    Suite,
}

impl TimeoutScope {
    pub fn message(self) -> &'static str {
        match self {
            TimeoutScope::Node => "A node timeout occurred",
            TimeoutScope::Spec => "A spec timeout occurred",
            TimeoutScope::Suite => "A suite timeout occurred",
        }
    }
}

/// The effective deadline of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    pub at: Instant,
    pub scope: TimeoutScope,
}

impl Deadline {
    /// The shortest of the configured deadlines wins. On a tie the narrower
    /// scope wins: node over spec over suite.
    pub fn resolve(
        node: Option<Instant>,
        spec: Option<Instant>,
        suite: Option<Instant>,
    ) -> Option<Deadline> {
        [
            (node, TimeoutScope::Node),
            (spec, TimeoutScope::Spec),
            (suite, TimeoutScope::Suite),
        ]
        .into_iter()
        .filter_map(|(at, scope)| at.map(|at| Deadline { at, scope }))
        .fold(None, |best: Option<Deadline>, candidate| match best {
            Some(best) if best.at <= candidate.at => Some(best),
            _ => Some(candidate),
        })
    }
}
