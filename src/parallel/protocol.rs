//! Messages exchanged with the synchronization server.
//!
//! Every request gets exactly one response. Blocking operations are built
//! on the client side by polling, so the server never holds a request open.

use serde::{Deserialize, Serialize};

use crate::report::{Report, SpecState};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "endpoint", content = "body")]
pub enum Request {
    SuiteWillBegin { process: usize, report: Box<Report> },
    Heartbeat { process: usize },
    /// Process #1 finished the primary half of its BeforeSuite node.
    BeforeSuiteCompleted { state: SpecState, data: Vec<u8> },
    BeforeSuiteState,
    ReportBeforeSuiteCompleted { state: SpecState },
    ReportBeforeSuiteState,
    HaveNonprimaryProcsFinished,
    SuiteDidEnd { process: usize, report: Box<Report> },
    AggregatedNonprimaryReports,
    Abort { process: usize },
    ShouldAbort,
}

impl Request {
    pub fn endpoint(&self) -> &'static str {
        match self {
            Request::SuiteWillBegin { .. } => "SuiteWillBegin",
            Request::Heartbeat { .. } => "Heartbeat",
            Request::BeforeSuiteCompleted { .. } => "BeforeSuiteCompleted",
            Request::BeforeSuiteState => "BeforeSuiteState",
            Request::ReportBeforeSuiteCompleted { .. } => "ReportBeforeSuiteCompleted",
            Request::ReportBeforeSuiteState => "ReportBeforeSuiteState",
            Request::HaveNonprimaryProcsFinished => "HaveNonprimaryProcsFinished",
            Request::SuiteDidEnd { .. } => "SuiteDidEnd",
            Request::AggregatedNonprimaryReports => "AggregatedNonprimaryReports",
            Request::Abort { .. } => "Abort",
            Request::ShouldAbort => "ShouldAbort",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "response", content = "body")]
pub enum Response {
    Ack,
    /// `state` is `None` until process #1 has posted its result.
    BeforeSuiteState {
        state: Option<SpecState>,
        data: Vec<u8>,
        primary_alive: bool,
    },
    ReportBeforeSuiteState {
        state: Option<SpecState>,
        primary_alive: bool,
    },
    NonprimaryProcsFinished(bool),
    /// `reports` is only complete once `missing` is empty. Processes listed
    /// in `gone` will never report.
    AggregatedNonprimaryReports {
        reports: Vec<Report>,
        missing: Vec<usize>,
        gone: Vec<usize>,
    },
    ShouldAbort(bool),
    Error(String),
}
