//! The cancellation-aware context handed to node bodies.
//!
//! A [`SpecContext`] is cancelled by the engine when the node's timeout, the
//! spec's timeout or the suite's timeout elapses, or when the process is
//! interrupted. Cancellation is cooperative: a body should watch
//! [`SpecContext::done`] (or use [`SpecContext::sleep`]) and return promptly.
//!
//! The context is also the way a running body talks back to the engine:
//! registering cleanups, recording steps and report entries, and writing
//! captured output.

use std::{
    fmt::Display,
    io,
    sync::{Arc, Mutex},
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::{
    capture::SpecWriter,
    cleanup::{CleanupScope, CleanupStack},
    interrupt::TimeoutScope,
    node::{Body, CodeLocation, NodeResult},
    table::Args,
    util::lock,
};

/// Why a context was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelCause {
    Timeout(TimeoutScope),
    Interrupted,
}

/// Returned by [`SpecContext::sleep`] when the context is cancelled first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

/// Messages a body sends back to the runner while it executes.
#[derive(Debug, Clone)]
pub(crate) enum ContextEvent {
    Step {
        text: String,
        location: CodeLocation,
    },
    ReportEntry {
        name: String,
        value: String,
        location: CodeLocation,
    },
}

#[derive(Debug)]
struct ContextInner {
    cancel: Receiver<()>,
    cause: Mutex<Option<CancelCause>>,
    spec_text: String,
    nesting_level: usize,
    cleanup_scope: CleanupScope,
    cleanup: Arc<CleanupStack>,
    events: Sender<ContextEvent>,
    current_step: Mutex<Option<String>>,
    writer: SpecWriter,
    /// Set once the node finished or was abandoned; later cleanups are dropped.
    sealed: Mutex<bool>,
}

#[derive(Debug, Clone)]
pub struct SpecContext {
    inner: Arc<ContextInner>,
}

/// The engine side of a context: cancelling drops the only sender.
#[derive(Debug)]
pub(crate) struct Canceller {
    tx: Mutex<Option<Sender<()>>>,
    ctx: SpecContext,
}

impl Canceller {
    pub fn cancel(&self, cause: CancelCause) {
        let mut cause_slot = lock(&self.ctx.inner.cause);
        if cause_slot.is_none() {
            *cause_slot = Some(cause);
        }
        lock(&self.tx).take();
    }

    /// Stop accepting cleanup registrations from the node's body.
    pub fn seal(&self) {
        *lock(&self.ctx.inner.sealed) = true;
    }
}

pub(crate) struct ContextParts {
    pub spec_text: String,
    pub nesting_level: usize,
    pub cleanup_scope: CleanupScope,
    pub cleanup: Arc<CleanupStack>,
    pub events: Sender<ContextEvent>,
    pub writer: SpecWriter,
}

impl SpecContext {
    pub(crate) fn new(parts: ContextParts) -> (Self, Canceller) {
        let (tx, rx) = crossbeam_channel::bounded(0);
        let ctx = SpecContext {
            inner: Arc::new(ContextInner {
                cancel: rx,
                cause: Mutex::new(None),
                spec_text: parts.spec_text,
                nesting_level: parts.nesting_level,
                cleanup_scope: parts.cleanup_scope,
                cleanup: parts.cleanup,
                events: parts.events,
                current_step: Mutex::new(None),
                writer: parts.writer,
                sealed: Mutex::new(false),
            }),
        };
        let canceller = Canceller {
            tx: Mutex::new(Some(tx)),
            ctx: ctx.clone(),
        };
        (ctx, canceller)
    }

    /// A channel that becomes ready (disconnected) once the context is cancelled.
    ///
    /// Suitable for `crossbeam_channel::select!`.
    pub fn done(&self) -> &Receiver<()> {
        &self.inner.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self.inner.cancel.try_recv(),
            Err(crossbeam_channel::TryRecvError::Disconnected)
        )
    }

    pub fn cancel_cause(&self) -> Option<CancelCause> {
        *lock(&self.inner.cause)
    }

    /// Sleep for `duration` unless the context is cancelled first.
    pub fn sleep(&self, duration: Duration) -> Result<(), Cancelled> {
        match self.inner.cancel.recv_timeout(duration) {
            Err(RecvTimeoutError::Timeout) => Ok(()),
            _ => Err(Cancelled),
        }
    }

    /// Full text of the spec (or suite node) this context belongs to.
    pub fn spec_text(&self) -> &str {
        &self.inner.spec_text
    }

    /// Output written here is captured into the spec's report.
    pub fn writer(&self) -> SpecWriter {
        self.inner.writer.clone()
    }

    /// Record a step in the spec's timeline.
    #[track_caller]
    pub fn by(&self, text: impl Into<String>) {
        let text = text.into();
        *lock(&self.inner.current_step) = Some(text.clone());
        let _ = self.inner.events.send(ContextEvent::Step {
            text,
            location: CodeLocation::caller(),
        });
    }

    #[track_caller]
    pub fn add_report_entry(&self, name: impl Into<String>, value: impl Display) {
        let _ = self.inner.events.send(ContextEvent::ReportEntry {
            name: name.into(),
            value: value.to_string(),
            location: CodeLocation::caller(),
        });
    }

    pub(crate) fn current_step(&self) -> Option<String> {
        lock(&self.inner.current_step).clone()
    }

    /// Register a cleanup that runs when the registering node's scope is torn
    /// down: after the spec for `It`/`*Each` nodes, after the `AfterAll` of the
    /// container for `BeforeAll`/`AfterAll`, after `AfterSuite` for suite nodes.
    #[track_caller]
    pub fn defer_cleanup<F, T>(&self, f: F)
    where
        F: Fn() -> T + Send + Sync + 'static,
        T: Into<NodeResult>,
    {
        self.push_cleanup(Body::new(f), CodeLocation::caller());
    }

    /// Like [`defer_cleanup`](Self::defer_cleanup), but the cleanup receives its own
    /// cancellable context.
    #[track_caller]
    pub fn defer_cleanup_with_context<F, T>(&self, f: F)
    where
        F: Fn(&SpecContext) -> T + Send + Sync + 'static,
        T: Into<NodeResult>,
    {
        self.push_cleanup(Body::with_context(f), CodeLocation::caller());
    }

    /// Register a cleanup invoked with arguments bound now.
    #[track_caller]
    pub fn defer_cleanup_args<F, T>(&self, args: Args, f: F)
    where
        F: Fn(&Args) -> T + Send + Sync + 'static,
        T: Into<NodeResult>,
    {
        self.push_cleanup(Body::new(move || f(&args)), CodeLocation::caller());
    }

    /// Register a cleanup that receives both its own context and arguments bound now.
    #[track_caller]
    pub fn defer_cleanup_with_context_and_args<F, T>(&self, args: Args, f: F)
    where
        F: Fn(&SpecContext, &Args) -> T + Send + Sync + 'static,
        T: Into<NodeResult>,
    {
        self.push_cleanup(
            Body::with_context(move |ctx| f(ctx, &args)),
            CodeLocation::caller(),
        );
    }

    fn push_cleanup(&self, body: Body, location: CodeLocation) {
        let sealed = lock(&self.inner.sealed);
        if *sealed {
            tracing::warn!(
                spec = %self.inner.spec_text,
                %location,
                "dropping cleanup registered after its node finished"
            );
            return;
        }
        self.inner.cleanup.push(
            body,
            self.inner.cleanup_scope,
            self.inner.nesting_level,
            location,
        );
    }
}

impl io::Write for SpecContext {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.writer.clone().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Completion handle for [`Body::with_done`] bodies.
///
/// The node finishes when [`Done::done`] is called or the handle is dropped,
/// which may happen on another thread after the body returned.
#[derive(Debug)]
pub struct Done {
    _tx: Option<Sender<()>>,
}

impl Done {
    pub(crate) fn pair() -> (Self, Receiver<()>) {
        let (tx, rx) = crossbeam_channel::bounded(0);
        (Self { _tx: Some(tx) }, rx)
    }

    pub(crate) fn completed() -> Self {
        Self { _tx: None }
    }

    pub fn done(self) {}
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn context() -> (SpecContext, Canceller, crossbeam_channel::Receiver<ContextEvent>) {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let (ctx, canceller) = SpecContext::new(ContextParts {
            spec_text: "spec".into(),
            nesting_level: 2,
            cleanup_scope: CleanupScope::Each,
            cleanup: Arc::new(CleanupStack::default()),
            events: events_tx,
            writer: SpecWriter::default(),
        });
        (ctx, canceller, events_rx)
    }

    #[test]
    fn cancellation_closes_done_channel() {
        let (ctx, canceller, _) = context();
        assert!(!ctx.is_cancelled());
        assert_eq!(ctx.sleep(Duration::from_millis(1)), Ok(()));

        canceller.cancel(CancelCause::Timeout(TimeoutScope::Node));
        assert!(ctx.is_cancelled());
        assert!(ctx.done().recv().is_err());
        assert_eq!(ctx.sleep(Duration::from_secs(10)), Err(Cancelled));

        canceller.cancel(CancelCause::Interrupted);
        assert_eq!(
            ctx.cancel_cause(),
            Some(CancelCause::Timeout(TimeoutScope::Node))
        );
    }

    #[test]
    fn steps_and_entries_are_sent_to_the_runner() {
        let (ctx, _canceller, events) = context();
        ctx.by("first step");
        ctx.add_report_entry("answer", 42);

        let events: Vec<_> = events.try_iter().collect();
        assert!(matches!(&events[0], ContextEvent::Step { text, .. } if text == "first step"));
        assert!(matches!(
            &events[1],
            ContextEvent::ReportEntry { name, value, .. } if name == "answer" && value == "42"
        ));
        assert_eq!(ctx.current_step().as_deref(), Some("first step"));
    }

    #[test]
    fn cleanups_register_at_the_context_level() {
        let (mut ctx, _canceller, _) = context();
        ctx.defer_cleanup(|| ());
        ctx.defer_cleanup_args(crate::args![1, "two"], |args| {
            assert_eq!(args.len(), 2);
        });
        assert_eq!(ctx.inner.cleanup.len(), 2);

        write!(ctx, "hello").unwrap();
        assert_eq!(ctx.writer().contents(), "hello");
    }
}
