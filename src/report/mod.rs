//! The report data model handed to reporters and exchanged between processes.

use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::node::NodeType;

mod spec;
pub use spec::*;

mod timeline;
pub use timeline::*;

pub const AGGREGATION_UNAVAILABLE: &str = "aggregation unavailable";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PreRunStats {
    pub total_specs: usize,
    pub specs_that_will_run: usize,
}

/// The report of one process (or, after aggregation, of the whole suite).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub suite_description: String,
    pub suite_succeeded: bool,
    pub suite_has_programmatic_focus: bool,
    pub special_suite_failure_reasons: Vec<String>,
    pub pre_run_stats: PreRunStats,
    pub random_seed: u64,
    pub parallel_process: usize,
    pub parallel_total: usize,
    pub start_time: SystemTime,
    pub end_time: Option<SystemTime>,
    pub run_time: Duration,
    pub spec_reports: Vec<SpecReport>,
}

impl Report {
    pub(crate) fn new(description: impl Into<String>, random_seed: u64) -> Self {
        Self {
            suite_description: description.into(),
            suite_succeeded: true,
            suite_has_programmatic_focus: false,
            special_suite_failure_reasons: Vec::new(),
            pre_run_stats: PreRunStats::default(),
            random_seed,
            parallel_process: 1,
            parallel_total: 1,
            start_time: SystemTime::now(),
            end_time: None,
            run_time: Duration::ZERO,
            spec_reports: Vec::new(),
        }
    }

    /// Reports of `It` specs, without suite node reports.
    pub fn specs(&self) -> impl Iterator<Item = &SpecReport> {
        self.spec_reports.iter().filter(|report| report.is_spec())
    }

    pub fn count(&self, state: SpecState) -> usize {
        self.specs().filter(|report| report.state == state).count()
    }

    pub fn find(&self, leaf_text: &str) -> Option<&SpecReport> {
        self.specs().find(|report| report.leaf_text == leaf_text)
    }

    pub fn add_failure_reason(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        if !self.special_suite_failure_reasons.contains(&reason) {
            self.special_suite_failure_reasons.push(reason);
        }
        self.suite_succeeded = false;
    }

    /// Fold another process' report into this one.
    pub fn merge(&mut self, other: Report) {
        self.suite_succeeded &= other.suite_succeeded;
        self.suite_has_programmatic_focus |= other.suite_has_programmatic_focus;
        for reason in other.special_suite_failure_reasons {
            self.add_failure_reason(reason);
        }
        self.pre_run_stats.specs_that_will_run = self
            .pre_run_stats
            .specs_that_will_run
            .max(other.pre_run_stats.specs_that_will_run);
        self.start_time = self.start_time.min(other.start_time);
        self.end_time = match (self.end_time, other.end_time) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        self.run_time = self.run_time.max(other.run_time);
        self.spec_reports.extend(other.spec_reports);
    }

    /// Stand-in for a process that disappeared before delivering its report.
    pub fn unavailable(like: &Report, process: usize) -> Report {
        let mut report = Report {
            parallel_process: process,
            spec_reports: Vec::new(),
            end_time: Some(SystemTime::now()),
            ..like.clone()
        };
        report.add_failure_reason(format!("{AGGREGATION_UNAVAILABLE}: process #{process} did not report"));
        report.spec_reports.push(SpecReport {
            leaf_node_type: Some(NodeType::ReportAfterSuite),
            leaf_text: AGGREGATION_UNAVAILABLE.to_string(),
            state: SpecState::Failed,
            parallel_process: process,
            failure: Some(Failure {
                state: SpecState::Failed,
                message: format!(
                    "{AGGREGATION_UNAVAILABLE}: process #{process} disappeared before reporting"
                ),
                location: Default::default(),
                node_type: NodeType::ReportAfterSuite,
                node_text: String::new(),
                node_location: Default::default(),
                node_context: FailureNodeContext::LeafNode,
                nesting_level: 0,
                progress_report: None,
            }),
            ..SpecReport::default()
        });
        report
    }
}
