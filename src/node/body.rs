use std::{
    fmt::{self, Debug},
    sync::Arc,
};

use crate::{
    context::{Done, SpecContext},
    node::CodeLocation,
    report::{Report, SpecReport},
};

/// What a node body reports back to the engine.
///
/// Bodies signal failure, skipping and aborting through their return value
/// rather than by unwinding. A panic is still caught, but it is reported as
/// [`SpecState::Panicked`](crate::report::SpecState::Panicked), distinct from
/// an intentional failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeOutcome {
    Passed,
    Failed(String),
    Skipped(String),
    /// A failure that also stops the rest of the suite, on every process.
    Aborted(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeResult {
    pub outcome: NodeOutcome,
    /// Where the outcome was produced; the node's own location is used when absent.
    pub location: Option<CodeLocation>,
    /// Data produced by the process #1 half of a `SynchronizedBeforeSuite`.
    pub payload: Option<Vec<u8>>,
}

impl NodeResult {
    pub fn passed() -> Self {
        NodeOutcome::Passed.into()
    }

    #[track_caller]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::located(NodeOutcome::Failed(message.into()))
    }

    #[track_caller]
    pub fn skipped(message: impl Into<String>) -> Self {
        Self::located(NodeOutcome::Skipped(message.into()))
    }

    #[track_caller]
    pub fn aborted(message: impl Into<String>) -> Self {
        Self::located(NodeOutcome::Aborted(message.into()))
    }

    pub fn with_payload(self, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: Some(payload.into()),
            ..self
        }
    }

    #[track_caller]
    fn located(outcome: NodeOutcome) -> Self {
        Self {
            outcome,
            location: Some(CodeLocation::caller()),
            payload: None,
        }
    }
}

/// Fail the current node.
#[track_caller]
pub fn fail(message: impl Into<String>) -> NodeResult {
    NodeResult::failed(message)
}

/// Skip the current spec; teardown still runs.
#[track_caller]
pub fn skip(message: impl Into<String>) -> NodeResult {
    NodeResult::skipped(message)
}

/// Fail the current node and stop the suite.
#[track_caller]
pub fn abort(message: impl Into<String>) -> NodeResult {
    NodeResult::aborted(message)
}

impl From<NodeOutcome> for NodeResult {
    fn from(outcome: NodeOutcome) -> Self {
        Self {
            outcome,
            location: None,
            payload: None,
        }
    }
}

impl From<()> for NodeResult {
    fn from(_: ()) -> Self {
        NodeOutcome::Passed.into()
    }
}

impl From<Vec<u8>> for NodeResult {
    fn from(payload: Vec<u8>) -> Self {
        NodeResult::passed().with_payload(payload)
    }
}

impl<E: Debug> From<Result<(), E>> for NodeResult {
    fn from(v: Result<(), E>) -> Self {
        match v {
            Ok(()) => NodeResult::passed(),
            Err(e) => NodeOutcome::Failed(format!("{e:#?}")).into(),
        }
    }
}

impl<E: Debug> From<Result<Vec<u8>, E>> for NodeResult {
    fn from(v: Result<Vec<u8>, E>) -> Self {
        match v {
            Ok(payload) => payload.into(),
            Err(e) => NodeOutcome::Failed(format!("{e:#?}")).into(),
        }
    }
}

/// The arguments a body may be given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyShape {
    /// Takes nothing; cannot be cancelled.
    Plain,
    /// Takes a [`SpecContext`] and should exit when it is cancelled.
    Context,
    /// Takes a [`Done`] handle; the node completes once the handle is
    /// signalled or dropped.
    Done,
}

pub(crate) struct NodeCall<'a> {
    pub ctx: &'a SpecContext,
    pub done: Option<Done>,
    pub spec_report: Option<&'a SpecReport>,
    pub report: Option<&'a Report>,
    pub payload: Option<&'a [u8]>,
}

type BodyFn = dyn Fn(NodeCall<'_>) -> NodeResult + Send + Sync;

fn erase<F>(f: F) -> Arc<BodyFn>
where
    F: Fn(NodeCall<'_>) -> NodeResult + Send + Sync + 'static,
{
    Arc::new(f)
}

/// A node body.
///
/// Bodies may return anything convertible into a [`NodeResult`]: `()`,
/// `Result<(), E>`, a `NodeResult` produced by [`fail`]/[`skip`]/[`abort`],
/// or a byte payload for synchronized suite setup.
#[derive(Clone)]
pub struct Body {
    shape: BodyShape,
    call: Arc<BodyFn>,
}

impl Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Body").field(&self.shape).finish()
    }
}

impl Body {
    pub fn new<F, T>(f: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
        T: Into<NodeResult>,
    {
        Self {
            shape: BodyShape::Plain,
            call: erase(move |_| f().into()),
        }
    }

    pub fn with_context<F, T>(f: F) -> Self
    where
        F: Fn(&SpecContext) -> T + Send + Sync + 'static,
        T: Into<NodeResult>,
    {
        Self {
            shape: BodyShape::Context,
            call: erase(move |call| f(call.ctx).into()),
        }
    }

    pub fn with_done<F, T>(f: F) -> Self
    where
        F: Fn(Done) -> T + Send + Sync + 'static,
        T: Into<NodeResult>,
    {
        Self {
            shape: BodyShape::Done,
            call: erase(move |call| f(call.done.unwrap_or_else(Done::completed)).into()),
        }
    }

    /// The all-process half of a `SynchronizedBeforeSuite`, receiving process #1's payload.
    pub fn with_payload<F, T>(f: F) -> Self
    where
        F: Fn(&[u8]) -> T + Send + Sync + 'static,
        T: Into<NodeResult>,
    {
        Self {
            shape: BodyShape::Plain,
            call: erase(move |call| f(call.payload.unwrap_or_default()).into()),
        }
    }

    pub fn with_context_and_payload<F, T>(f: F) -> Self
    where
        F: Fn(&SpecContext, &[u8]) -> T + Send + Sync + 'static,
        T: Into<NodeResult>,
    {
        Self {
            shape: BodyShape::Context,
            call: erase(move |call| f(call.ctx, call.payload.unwrap_or_default()).into()),
        }
    }

    /// A `ReportBeforeEach`/`ReportAfterEach` body.
    pub fn for_spec_report<F, T>(f: F) -> Self
    where
        F: Fn(&SpecReport) -> T + Send + Sync + 'static,
        T: Into<NodeResult>,
    {
        Self {
            shape: BodyShape::Plain,
            call: erase(move |call| match call.spec_report {
                Some(report) => f(report).into(),
                None => NodeResult::failed("report node ran without a spec report"),
            }),
        }
    }

    pub fn for_spec_report_with_context<F, T>(f: F) -> Self
    where
        F: Fn(&SpecContext, &SpecReport) -> T + Send + Sync + 'static,
        T: Into<NodeResult>,
    {
        Self {
            shape: BodyShape::Context,
            call: erase(move |call| match call.spec_report {
                Some(report) => f(call.ctx, report).into(),
                None => NodeResult::failed("report node ran without a spec report"),
            }),
        }
    }

    /// A `ReportBeforeSuite`/`ReportAfterSuite` body.
    pub fn for_suite_report<F, T>(f: F) -> Self
    where
        F: Fn(&Report) -> T + Send + Sync + 'static,
        T: Into<NodeResult>,
    {
        Self {
            shape: BodyShape::Plain,
            call: erase(move |call| match call.report {
                Some(report) => f(report).into(),
                None => NodeResult::failed("report node ran without a suite report"),
            }),
        }
    }

    pub fn for_suite_report_with_context<F, T>(f: F) -> Self
    where
        F: Fn(&SpecContext, &Report) -> T + Send + Sync + 'static,
        T: Into<NodeResult>,
    {
        Self {
            shape: BodyShape::Context,
            call: erase(move |call| match call.report {
                Some(report) => f(call.ctx, report).into(),
                None => NodeResult::failed("report node ran without a suite report"),
            }),
        }
    }

    pub(crate) fn from_parts(shape: BodyShape, call: Arc<BodyFn>) -> Self {
        Self { shape, call }
    }

    pub fn shape(&self) -> BodyShape {
        self.shape
    }

    pub(crate) fn invoke(&self, call: NodeCall<'_>) -> NodeResult {
        (self.call)(call)
    }
}

/// Turns closures into a [`Body`], picking the shape from the closure's signature.
///
/// Context closures need their parameter annotated: `|ctx: &SpecContext| ...`.
pub trait IntoBody<Marker> {
    fn into_body(self) -> Body;
}

impl IntoBody<Body> for Body {
    fn into_body(self) -> Body {
        self
    }
}

impl<F, T> IntoBody<fn() -> T> for F
where
    F: Fn() -> T + Send + Sync + 'static,
    T: Into<NodeResult>,
{
    fn into_body(self) -> Body {
        Body::new(self)
    }
}

impl<F, T> IntoBody<fn(&SpecContext) -> T> for F
where
    F: Fn(&SpecContext) -> T + Send + Sync + 'static,
    T: Into<NodeResult>,
{
    fn into_body(self) -> Body {
        Body::with_context(self)
    }
}

impl<F, T> IntoBody<fn(Done) -> T> for F
where
    F: Fn(Done) -> T + Send + Sync + 'static,
    T: Into<NodeResult>,
{
    fn into_body(self) -> Body {
        Body::with_done(self)
    }
}

pub(crate) fn erase_call<F>(f: F) -> Arc<BodyFn>
where
    F: Fn(NodeCall<'_>) -> NodeResult + Send + Sync + 'static,
{
    erase(f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn results_convert_from_common_return_types() {
        assert_eq!(NodeResult::from(()).outcome, NodeOutcome::Passed);
        assert_eq!(
            NodeResult::from(Err::<(), _>("boom")).outcome,
            NodeOutcome::Failed("\"boom\"".into())
        );
        let with_payload = NodeResult::from(b"X".to_vec());
        assert_eq!(with_payload.outcome, NodeOutcome::Passed);
        assert_eq!(with_payload.payload.as_deref(), Some(&b"X"[..]));
    }

    #[test]
    fn helpers_capture_the_call_site() {
        let result = fail("nope");
        let location = result.location.expect("location recorded");
        assert!(location.file.ends_with("body.rs"));
        assert_eq!(location.line, line!() - 3);
    }
}
