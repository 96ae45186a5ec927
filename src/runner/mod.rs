//! The execution state machine.
//!
//! A [`Runner`] executes the specs and suite nodes of one process in the
//! order it is given, one node at a time. Node bodies run on supervised
//! threads ([`crate::task`]) so that timeouts, interrupts and leaked bodies
//! never block the runner itself.

use std::{
    sync::Arc,
    time::{Instant, SystemTime},
};

use crate::{
    capture::SpecWriter,
    cleanup::{CleanupScope, CleanupStack},
    config::SuiteConfig,
    interrupt::{InterruptCause, InterruptHandler, InterruptStatus, TimeoutScope},
    node::{Body, Node},
    parallel::SyncClient,
    report::{Failure, Report, SpecReport, SpecState},
    reporter::Reporter,
    task::TaskSupervisor,
};

mod node;
mod spec;

pub(crate) use node::{NodeInput, NodeRun};
pub(crate) use spec::OrderedState;

pub(crate) struct Runner<'r> {
    config: &'r SuiteConfig,
    process: usize,
    interrupts: Arc<InterruptHandler>,
    client: Option<Arc<dyn SyncClient>>,
    reporter: &'r mut dyn Reporter,
    tasks: TaskSupervisor,
    cleanup: Arc<CleanupStack>,
    /// Why every remaining spec is skipped, once the suite was aborted.
    skip_all: Option<String>,
}

impl<'r> Runner<'r> {
    pub fn new(
        config: &'r SuiteConfig,
        interrupts: Arc<InterruptHandler>,
        client: Option<Arc<dyn SyncClient>>,
        reporter: &'r mut dyn Reporter,
    ) -> Self {
        Self {
            config,
            process: config.parallel_process,
            interrupts,
            client,
            reporter,
            tasks: TaskSupervisor::default(),
            cleanup: Arc::new(CleanupStack::default()),
            skip_all: None,
        }
    }

    pub fn reporter(&mut self) -> &mut dyn Reporter {
        &mut *self.reporter
    }

    /// Skip every spec that has not started yet.
    pub fn skip_remaining(&mut self, reason: impl Into<String>) {
        self.skip_all.get_or_insert_with(|| reason.into());
    }

    pub fn skip_reason(&self) -> Option<&str> {
        self.skip_all.as_deref()
    }

    /// Stop the suite on this and every other process.
    fn abort_suite(&mut self, reason: &str) {
        if self.skip_all.is_some() {
            return;
        }
        tracing::warn!(process = self.process, reason, "aborting the suite");
        self.skip_remaining(reason);
        self.interrupts.note_local_abort();
        if let Some(client) = &self.client {
            if let Err(err) = client.post_abort(self.process) {
                tracing::warn!(error = %err, label = err.as_label(), "failed to tell the other processes to abort");
            }
        }
    }

    /// The report of a suite node before it ran.
    pub fn begin_suite_node(&mut self, node: &Node) -> SpecReport {
        let report = SpecReport {
            leaf_node_type: Some(node.node_type),
            leaf_text: node.display_text().to_string(),
            leaf_location: node.location.clone(),
            labels: node.decorations.labels.clone(),
            state: SpecState::Passed,
            num_attempts: 1,
            parallel_process: self.process,
            ..SpecReport::default()
        };
        self.reporter.will_run(&report);
        report
    }

    /// Run one body of a suite node, folding its outcome into `spec_report`.
    ///
    /// Returns the payload the body produced, which is how the first half of
    /// a synchronized node hands data to the second.
    pub fn run_suite_body(
        &mut self,
        spec_report: &mut SpecReport,
        node: &Arc<Node>,
        body: &Body,
        payload: Option<Vec<u8>>,
        report: Option<Report>,
        writer: &SpecWriter,
    ) -> Option<Vec<u8>> {
        let status = self.interrupts.status();
        if status.bail_out() || (!node.node_type.is_report() && status.skip_non_report_nodes()) {
            return None;
        }
        if spec_report.start_time.is_none() {
            spec_report.start_time = Some(SystemTime::now());
        }
        let started = Instant::now();
        let input = NodeInput {
            node,
            body,
            spec: None,
            spec_text: node.display_text(),
            spec_started: started,
            spec_deadline: None,
            cleanup_scope: CleanupScope::Suite,
            writer,
            attempt: 1,
            spec_report: None,
            report,
            payload,
        };
        let mut run = self.run_node(input, spec_report);
        spec_report.run_time += started.elapsed();
        let payload = run.payload.take();
        absorb(spec_report, run);
        payload
    }

    pub fn finish_suite_node(&mut self, mut spec_report: SpecReport, writer: &SpecWriter) -> SpecReport {
        if spec_report.start_time.is_none() {
            spec_report.state = SpecState::Skipped;
            spec_report.num_attempts = 0;
        }
        spec_report.end_time = Some(SystemTime::now());
        spec_report.captured_output = writer.contents();
        if spec_report.state == SpecState::Aborted {
            self.abort_suite("Spec skipped because a suite node aborted the suite");
        }
        self.reporter.did_run(&spec_report);
        spec_report
    }

    /// Run the cleanups registered by suite nodes, as a report of their own.
    pub fn run_suite_cleanups(&mut self) -> Option<SpecReport> {
        let mut cleanups = self.cleanup.drain(|scope, _| scope == CleanupScope::Suite);
        let first = cleanups.first().map(Arc::clone)?;
        let writer = SpecWriter::new();
        let mut spec_report = self.begin_suite_node(&first);
        while !cleanups.is_empty() {
            for node in &cleanups {
                if let Some(body) = node.body() {
                    self.run_suite_body(&mut spec_report, node, body, None, None, &writer);
                }
            }
            cleanups = self.cleanup.drain(|scope, _| scope == CleanupScope::Suite);
        }
        Some(self.finish_suite_node(spec_report, &writer))
    }
}

/// Fold a node's outcome into the report of the spec it belongs to.
///
/// The first failure decides the state; a real failure also replaces an
/// earlier skip. Everything after that lands in `additional_failures`.
pub(crate) fn absorb(report: &mut SpecReport, run: NodeRun) {
    let NodeRun {
        state,
        failure,
        late_failure,
        ..
    } = run;
    if state != SpecState::Passed {
        let first = matches!(report.state, SpecState::Passed | SpecState::Pending)
            || (report.state == SpecState::Skipped && state.is_failure());
        if first {
            report.state = state;
            if let Some(previous) = std::mem::replace(&mut report.failure, failure) {
                push_failure(report, previous);
            }
        } else if let Some(failure) = failure {
            push_failure(report, failure);
        }
    }
    if let Some(late) = late_failure {
        push_failure(report, late);
    }
}

/// The state and message of a node or spec cut short by an interrupt.
pub(crate) fn interrupt_outcome(status: &InterruptStatus) -> (SpecState, String) {
    match status.cause {
        Some(InterruptCause::Timeout) => (
            SpecState::TimedOut,
            TimeoutScope::Suite.message().to_string(),
        ),
        _ => (SpecState::Interrupted, status.message()),
    }
}

fn push_failure(report: &mut SpecReport, failure: Failure) {
    if failure.state.is_failure() {
        report.additional_failures.push(failure);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        node::{CodeLocation, NodeType},
        report::FailureNodeContext,
    };

    fn failure(state: SpecState, message: &str) -> Failure {
        Failure {
            state,
            message: message.into(),
            location: CodeLocation::default(),
            node_type: NodeType::AfterEach,
            node_text: String::new(),
            node_location: CodeLocation::default(),
            node_context: FailureNodeContext::TopLevel,
            nesting_level: 0,
            progress_report: None,
        }
    }

    fn run(state: SpecState, message: &str) -> NodeRun {
        NodeRun {
            state,
            failure: Some(failure(state, message)),
            ..NodeRun::default()
        }
    }

    #[test]
    fn first_failure_wins_and_later_ones_are_kept() {
        let mut report = SpecReport {
            state: SpecState::Passed,
            ..SpecReport::default()
        };
        absorb(
            &mut report,
            NodeRun {
                state: SpecState::Passed,
                ..NodeRun::default()
            },
        );
        assert_eq!(report.state, SpecState::Passed);

        absorb(&mut report, run(SpecState::Skipped, "skip"));
        absorb(&mut report, run(SpecState::Failed, "teardown"));
        absorb(&mut report, run(SpecState::Panicked, "cleanup"));

        assert_eq!(report.state, SpecState::Failed);
        assert_eq!(report.failure_message(), Some("teardown"));
        let additional: Vec<_> = report
            .additional_failures
            .iter()
            .map(|f| f.message.as_str())
            .collect();
        assert_eq!(additional, vec!["cleanup"]);
    }
}
