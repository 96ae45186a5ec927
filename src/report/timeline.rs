use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::{
    node::{CodeLocation, NodeType},
    report::{Failure, SpecState},
};

/// A value attached to a spec report by `SpecContext::add_report_entry`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub name: String,
    pub value: String,
    pub location: CodeLocation,
    pub time: SystemTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecEvent {
    pub at: SystemTime,
    /// 1 based attempt the event belongs to.
    pub attempt: u32,
    pub kind: SpecEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum SpecEventKind {
    NodeStarted {
        node_type: NodeType,
        text: String,
        location: CodeLocation,
    },
    NodeEnded {
        node_type: NodeType,
        text: String,
        location: CodeLocation,
        duration: Duration,
    },
    Step {
        text: String,
        location: CodeLocation,
    },
    ReportEntry {
        name: String,
    },
    ProgressReport {
        message: String,
    },
    /// A failed attempt that was retried.
    AttemptFailed {
        state: SpecState,
        failure: Box<Failure>,
    },
    TaskLeaked {
        task: u64,
        node_type: NodeType,
        text: String,
    },
}

impl SpecEvent {
    pub fn new(attempt: u32, kind: SpecEventKind) -> Self {
        Self {
            at: SystemTime::now(),
            attempt,
            kind,
        }
    }
}
