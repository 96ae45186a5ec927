//! The lifecycle of one spec: report hooks, attempts, setup, teardown and
//! the bookkeeping of Ordered containers.

use std::{
    cmp::Reverse,
    collections::{HashMap, HashSet},
    sync::Arc,
    time::{Instant, SystemTime},
};

use crate::{
    capture::SpecWriter,
    cleanup::CleanupScope,
    node::{Node, NodeId, NodeType},
    report::{SpecEvent, SpecEventKind, SpecReport, SpecState},
    runner::{NodeInput, NodeRun, Runner, absorb, interrupt_outcome},
    spec::Spec,
};

const ORDERED_FAILURE_SKIP: &str =
    "Spec skipped because an earlier spec in an ordered container failed";
const INTERRUPTED_SKIP: &str = "Spec skipped because the suite was interrupted";
const ABORT_SKIP: &str = "Spec skipped because an earlier spec aborted the suite";
const FAIL_FAST_SKIP: &str = "Spec skipped because fail-fast is set and an earlier spec failed";

/// Progress through the Ordered containers of one process.
#[derive(Debug, Default)]
pub(crate) struct OrderedState {
    /// Runnable specs left per container.
    remaining: HashMap<NodeId, usize>,
    /// Containers whose `BeforeAll` nodes passed.
    setup_done: HashSet<NodeId>,
    /// Containers a spec ran in whose `AfterAll` has not run yet.
    entered: HashSet<NodeId>,
    /// Ordered containers whose remaining specs are skipped.
    failed: HashSet<NodeId>,
}

fn is_runnable(spec: &Spec) -> bool {
    !spec.skip && !spec.is_pending() && spec.is_in_ordered_container()
}

impl OrderedState {
    /// `specs` are the specs this process is going to run.
    pub fn new<'a>(specs: impl IntoIterator<Item = &'a Spec>) -> Self {
        let mut state = Self::default();
        for spec in specs.into_iter().filter(|spec| is_runnable(spec)) {
            for container in spec.containers() {
                *state.remaining.entry(container.id).or_default() += 1;
            }
        }
        state
    }

    fn is_last(&self, container: NodeId) -> bool {
        self.remaining.get(&container).copied().unwrap_or_default() <= 1
    }

    fn finished(&mut self, spec: &Spec) {
        if !is_runnable(spec) {
            return;
        }
        for container in spec.containers() {
            if let Some(remaining) = self.remaining.get_mut(&container.id) {
                *remaining = remaining.saturating_sub(1);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetryKind {
    Flake,
    Repeat,
}

#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    max: u32,
    kind: RetryKind,
}

impl RetryPolicy {
    fn wants_another(self, attempt: u32, state: SpecState) -> bool {
        attempt < self.max
            && match self.kind {
                RetryKind::Flake => {
                    state.is_failure()
                        && !matches!(state, SpecState::Interrupted | SpecState::Aborted)
                }
                RetryKind::Repeat => state == SpecState::Passed,
            }
    }
}

enum Verdict {
    Run,
    DryRun,
    Pending,
    Skip(Option<String>),
}

struct Attempt<'a> {
    number: u32,
    text: &'a str,
    started: Instant,
    deadline: Option<Instant>,
    writer: &'a SpecWriter,
}

#[derive(Debug, Default)]
struct AttemptOutcome {
    /// Some container's `AfterAll` teardown ran, so the attempt cannot be retried.
    torn_down: bool,
    before_all_failed: bool,
}

impl Runner<'_> {
    pub(crate) fn run_spec(&mut self, spec: &Spec, ordered: &mut OrderedState) -> SpecReport {
        let mut report = self.initial_report(spec);
        self.reporter.will_run(&report);
        report.start_time = Some(SystemTime::now());
        let started = Instant::now();
        let writer = SpecWriter::new();
        let text = spec.text();

        let verdict = self.verdict(spec, ordered);
        match &verdict {
            Verdict::Pending => report.state = SpecState::Pending,
            Verdict::Skip(reason) => {
                report.state = SpecState::Skipped;
                report.failure = reason.as_ref().map(|reason| {
                    self.failure(spec.leaf(), Some(spec), SpecState::Skipped, reason.clone(), None, None)
                });
            }
            Verdict::Run | Verdict::DryRun => {}
        }

        if !self.config.dry_run {
            self.run_report_nodes(spec, &mut report, &writer, NodeType::ReportBeforeEach);
        }

        let mut before_all_failed = false;
        match verdict {
            Verdict::Run if report.state == SpecState::Pending => {
                before_all_failed = self.run_attempts(spec, ordered, &mut report, &writer, &text);
            }
            Verdict::DryRun => {
                report.state = SpecState::Passed;
                report.num_attempts = 1;
            }
            _ => {}
        }

        report.end_time = Some(SystemTime::now());
        report.run_time = started.elapsed();
        if !self.config.dry_run {
            self.run_report_nodes(spec, &mut report, &writer, NodeType::ReportAfterEach);
        }
        report.captured_output = writer.contents();

        if report.state.is_failure() {
            if let Some(container) = spec.ordered_container() {
                if before_all_failed || !spec.continue_on_failure() {
                    ordered.failed.insert(container);
                }
            }
        }
        ordered.finished(spec);

        if report.state == SpecState::Aborted {
            self.abort_suite(ABORT_SKIP);
        } else if self.config.fail_fast && report.state.is_failure() {
            self.abort_suite(FAIL_FAST_SKIP);
        }

        tracing::debug!(
            spec = %text,
            state = ?report.state,
            attempts = report.num_attempts,
            run_time = ?report.run_time,
            "spec finished"
        );
        self.reporter.did_run(&report);
        report
    }

    fn initial_report(&self, spec: &Spec) -> SpecReport {
        let leaf = spec.leaf();
        SpecReport {
            container_texts: spec.containers().map(|c| c.text.clone()).collect(),
            container_locations: spec.containers().map(|c| c.location.clone()).collect(),
            leaf_node_type: Some(NodeType::It),
            leaf_text: leaf.text.clone(),
            leaf_location: leaf.location.clone(),
            labels: spec.labels(),
            state: SpecState::Pending,
            parallel_process: self.process,
            is_serial: spec.is_serial(),
            is_in_ordered_container: spec.is_in_ordered_container(),
            ..SpecReport::default()
        }
    }

    fn verdict(&self, spec: &Spec, ordered: &OrderedState) -> Verdict {
        if spec.is_pending() {
            return Verdict::Pending;
        }
        if spec.skip {
            return Verdict::Skip(None);
        }
        if let Some(reason) = &self.skip_all {
            return Verdict::Skip(Some(reason.clone()));
        }
        if self.interrupts.status().interrupted() {
            return Verdict::Skip(Some(INTERRUPTED_SKIP.to_string()));
        }
        if spec
            .ordered_container()
            .is_some_and(|container| ordered.failed.contains(&container))
        {
            return Verdict::Skip(Some(ORDERED_FAILURE_SKIP.to_string()));
        }
        if self.config.dry_run {
            return Verdict::DryRun;
        }
        Verdict::Run
    }

    fn retry_policy(&self, spec: &Spec) -> RetryPolicy {
        let policy = match (spec.must_pass_repeatedly(), spec.flake_attempts()) {
            (Some(max), _) => Some((max, RetryKind::Repeat)),
            (None, Some(max)) => Some((max, RetryKind::Flake)),
            (None, None) => None,
        }
        .or_else(|| {
            self.config
                .must_pass_repeatedly
                .map(|max| (max, RetryKind::Repeat))
        })
        .or_else(|| self.config.flake_attempts.map(|max| (max, RetryKind::Flake)));

        match policy {
            Some((max, kind)) => RetryPolicy {
                max: max.max(1),
                kind,
            },
            None => RetryPolicy {
                max: 1,
                kind: RetryKind::Flake,
            },
        }
    }

    fn would_retry(&self, policy: RetryPolicy, attempt: u32, state: SpecState) -> bool {
        policy.wants_another(attempt, state)
            && self.skip_all.is_none()
            && !self.interrupts.status().interrupted()
    }

    /// Returns whether a `BeforeAll` failed in the final attempt.
    fn run_attempts(
        &mut self,
        spec: &Spec,
        ordered: &mut OrderedState,
        report: &mut SpecReport,
        writer: &SpecWriter,
        text: &str,
    ) -> bool {
        let policy = self.retry_policy(spec);
        match policy.kind {
            RetryKind::Flake => report.max_flake_attempts = policy.max,
            RetryKind::Repeat => report.max_must_pass_repeatedly = policy.max,
        }

        let mut number = 1;
        loop {
            report.num_attempts = number;
            report.state = SpecState::Passed;
            report.failure = None;
            report.additional_failures.clear();

            let started = Instant::now();
            let attempt = Attempt {
                number,
                text,
                started,
                deadline: spec.spec_timeout().map(|timeout| started + timeout),
                writer,
            };
            let outcome = self.run_attempt(spec, ordered, report, &attempt, policy);

            if outcome.torn_down || !self.would_retry(policy, number, report.state) {
                return outcome.before_all_failed;
            }
            if let Some(failure) = report.failure.clone().filter(|_| report.state.is_failure()) {
                report.timeline.push(SpecEvent::new(
                    number,
                    SpecEventKind::AttemptFailed {
                        state: report.state,
                        failure: Box::new(failure),
                    },
                ));
            }
            tracing::debug!(spec = %text, attempt = number, state = ?report.state, "retrying spec");
            number += 1;
        }
    }

    fn run_attempt(
        &mut self,
        spec: &Spec,
        ordered: &mut OrderedState,
        report: &mut SpecReport,
        attempt: &Attempt<'_>,
        policy: RetryPolicy,
    ) -> AttemptOutcome {
        let mut outcome = AttemptOutcome::default();

        let mut setup: Vec<&Arc<Node>> = spec
            .nodes()
            .iter()
            .filter(|node| match node.node_type {
                NodeType::BeforeEach => true,
                NodeType::BeforeAll => spec
                    .parent_container(node)
                    .is_some_and(|container| !ordered.setup_done.contains(&container)),
                _ => false,
            })
            .collect();
        setup.sort_by_key(|node| (node.nesting_level, node.node_type != NodeType::BeforeAll));
        setup.extend(spec.nodes_of(NodeType::JustBeforeEach));
        setup.push(spec.leaf());

        let mut level = spec.leaf().nesting_level;
        for node in setup {
            let status = self.interrupts.status();
            if status.interrupted() {
                let (state, message) = interrupt_outcome(&status);
                let failure = self.failure(node, Some(spec), state, message, None, None);
                absorb(
                    report,
                    NodeRun {
                        state,
                        failure: Some(failure),
                        ..NodeRun::default()
                    },
                );
                level = node.nesting_level;
                break;
            }

            let before_all = match node.node_type {
                NodeType::BeforeAll => spec.parent_container(node),
                _ => None,
            };
            if let Some(container) = before_all {
                ordered.entered.insert(container);
            }
            let run = self.run_spec_node(spec, node, report, attempt);
            let passed = run.state == SpecState::Passed;
            absorb(report, run);
            if let Some(container) = before_all {
                if passed {
                    ordered.setup_done.insert(container);
                } else {
                    ordered.setup_done.remove(&container);
                    outcome.before_all_failed = true;
                }
            }
            if !passed {
                level = node.nesting_level;
                break;
            }
        }
        for container in spec.containers().filter(|c| c.nesting_level < level) {
            ordered.entered.insert(container.id);
        }

        let retry_pending = self.would_retry(policy, attempt.number, report.state);
        let ordered_failure = report.state.is_failure()
            && spec.is_in_ordered_container()
            && (outcome.before_all_failed || !spec.continue_on_failure());
        let ends_suite = report.state == SpecState::Aborted
            || (self.config.fail_fast && report.state.is_failure());
        let closing = ordered_failure
            || ends_suite
            || self.skip_all.is_some()
            || self.interrupts.status().interrupted();
        let torn_down: Vec<NodeId> = spec
            .containers()
            .map(|container| container.id)
            .filter(|&id| {
                spec.is_in_ordered_container()
                    && !retry_pending
                    && ordered.entered.contains(&id)
                    && (closing || ordered.is_last(id))
            })
            .collect();

        let mut just_after: Vec<&Arc<Node>> = spec
            .nodes_of(NodeType::JustAfterEach)
            .filter(|node| node.nesting_level <= level)
            .collect();
        just_after.sort_by_key(|node| Reverse(node.nesting_level));
        let mut after: Vec<&Arc<Node>> = spec
            .nodes()
            .iter()
            .filter(|node| match node.node_type {
                NodeType::AfterEach => node.nesting_level <= level,
                NodeType::AfterAll => spec
                    .parent_container(node)
                    .is_some_and(|container| torn_down.contains(&container)),
                _ => false,
            })
            .collect();
        after.sort_by_key(|node| (Reverse(node.nesting_level), node.node_type == NodeType::AfterAll));

        for node in just_after.into_iter().chain(after) {
            if self.interrupts.status().skip_non_report_nodes() {
                break;
            }
            let run = self.run_spec_node(spec, node, report, attempt);
            absorb(report, run);
        }
        for container in &torn_down {
            ordered.entered.remove(container);
        }

        self.run_cleanups(spec, report, attempt, |scope| scope == CleanupScope::Each);
        if !torn_down.is_empty() {
            self.run_cleanups(spec, report, attempt, |scope| {
                matches!(scope, CleanupScope::All(container) if torn_down.contains(&container))
            });
            outcome.torn_down = true;
        }
        outcome
    }

    fn run_cleanups(
        &mut self,
        spec: &Spec,
        report: &mut SpecReport,
        attempt: &Attempt<'_>,
        pred: impl Fn(CleanupScope) -> bool,
    ) {
        loop {
            let cleanups = self.cleanup.drain(|scope, _| pred(scope));
            if cleanups.is_empty() {
                return;
            }
            for node in &cleanups {
                if self.interrupts.status().skip_non_report_nodes() {
                    continue;
                }
                let run = self.run_spec_node(spec, node, report, attempt);
                absorb(report, run);
            }
        }
    }

    fn run_spec_node(
        &mut self,
        spec: &Spec,
        node: &Arc<Node>,
        report: &mut SpecReport,
        attempt: &Attempt<'_>,
    ) -> NodeRun {
        let Some(body) = node.body() else {
            return NodeRun::passed(None);
        };
        let cleanup_scope = match node.node_type {
            NodeType::BeforeAll | NodeType::AfterAll => {
                CleanupScope::All(spec.parent_container(node).unwrap_or(node.id))
            }
            _ => CleanupScope::Each,
        };
        let input = NodeInput {
            node,
            body,
            spec: Some(spec),
            spec_text: attempt.text,
            spec_started: attempt.started,
            spec_deadline: attempt.deadline,
            cleanup_scope,
            writer: attempt.writer,
            attempt: attempt.number,
            spec_report: None,
            report: None,
            payload: None,
        };
        self.run_node(input, report)
    }

    /// `ReportBeforeEach` nodes run outer to inner, `ReportAfterEach` inner to outer.
    fn run_report_nodes(
        &mut self,
        spec: &Spec,
        report: &mut SpecReport,
        writer: &SpecWriter,
        node_type: NodeType,
    ) {
        let mut nodes: Vec<Arc<Node>> = spec.nodes_of(node_type).cloned().collect();
        if node_type == NodeType::ReportAfterEach {
            nodes.reverse();
        }
        let text = spec.text();
        let started = Instant::now();
        for node in &nodes {
            if self.interrupts.status().bail_out() {
                return;
            }
            let Some(body) = node.body() else {
                continue;
            };
            let input = NodeInput {
                node,
                body,
                spec: Some(spec),
                spec_text: &text,
                spec_started: started,
                spec_deadline: None,
                cleanup_scope: CleanupScope::Each,
                writer,
                attempt: report.num_attempts.max(1),
                spec_report: Some(report.clone()),
                report: None,
                payload: None,
            };
            let run = self.run_node(input, report);
            absorb(report, run);
        }
    }
}
