use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::{
    node::{CodeLocation, NodeType},
    progress::ProgressReport,
    report::{ReportEntry, SpecEvent},
};

/// The terminal state of a spec (or of a suite node).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[non_exhaustive]
pub enum SpecState {
    #[default]
    Pending,
    Passed,
    Skipped,
    Failed,
    Aborted,
    Panicked,
    Interrupted,
    TimedOut,
}

impl SpecState {
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            SpecState::Failed
                | SpecState::Aborted
                | SpecState::Panicked
                | SpecState::Interrupted
                | SpecState::TimedOut
        )
    }

    pub fn passed(self) -> bool {
        matches!(self, SpecState::Passed)
    }

    pub fn skipped(self) -> bool {
        matches!(self, SpecState::Skipped)
    }

    pub fn pending(self) -> bool {
        matches!(self, SpecState::Pending)
    }
}

/// Where the failing node sits relative to the spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureNodeContext {
    /// The leaf `It` (or the suite node itself) failed.
    LeafNode,
    /// A node declared at the top level, outside every container.
    TopLevel,
    InContainer { container_text: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub state: SpecState,
    pub message: String,
    /// Where the failure was raised (the panic site or the `fail` call).
    pub location: CodeLocation,
    pub node_type: NodeType,
    pub node_text: String,
    pub node_location: CodeLocation,
    pub node_context: FailureNodeContext,
    pub nesting_level: usize,
    pub progress_report: Option<ProgressReport>,
}

/// The outcome and timeline of one spec across all of its attempts.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SpecReport {
    pub container_texts: Vec<String>,
    pub container_locations: Vec<CodeLocation>,
    pub leaf_node_type: Option<NodeType>,
    pub leaf_text: String,
    pub leaf_location: CodeLocation,
    pub labels: Vec<String>,
    pub state: SpecState,
    pub failure: Option<Failure>,
    pub additional_failures: Vec<Failure>,
    pub num_attempts: u32,
    pub max_flake_attempts: u32,
    pub max_must_pass_repeatedly: u32,
    pub start_time: Option<SystemTime>,
    pub end_time: Option<SystemTime>,
    pub run_time: Duration,
    pub parallel_process: usize,
    pub captured_output: String,
    pub timeline: Vec<SpecEvent>,
    pub report_entries: Vec<ReportEntry>,
    pub progress_reports: Vec<ProgressReport>,
    pub is_serial: bool,
    pub is_in_ordered_container: bool,
}

impl SpecReport {
    /// Container texts and the leaf text joined by spaces.
    pub fn full_text(&self) -> String {
        self.container_texts
            .iter()
            .map(String::as_str)
            .chain((!self.leaf_text.is_empty()).then_some(self.leaf_text.as_str()))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn is_spec(&self) -> bool {
        self.leaf_node_type == Some(NodeType::It)
    }

    pub fn failed(&self) -> bool {
        self.state.is_failure()
    }

    pub fn failure_message(&self) -> Option<&str> {
        self.failure.as_ref().map(|failure| failure.message.as_str())
    }
}
