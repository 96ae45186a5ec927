//! The top level entry point: build a [`Suite`] from a tree and run it.

use std::{sync::Arc, time::SystemTime};

use crate::{
    capture::SpecWriter,
    config::SuiteConfig,
    distribute::{self, ExecutionPlan},
    error::{ConfigError, SuiteError},
    filter::SpecFilter,
    interrupt::InterruptHandler,
    node::{Node, NodeType},
    order,
    parallel::{HeartbeatGuard, SyncClient, TcpClient},
    report::{PreRunStats, Report, SpecReport, SpecState},
    reporter::Reporter,
    runner::{OrderedState, Runner},
    spec::{self, Spec, SuiteNodes},
    tree::{Tree, TreeBuilder},
};

const PENDING_REASON: &str = "Detected pending specs and --fail-on-pending is set";
const EMPTY_REASON: &str = "Detected no specs to run and --fail-on-empty is set";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// The tree is assembled and the specs are planned; nothing ran yet.
    BuildTree,
    Running,
    Completed,
}

/// One process' view of a suite.
///
/// Every process of a parallel run builds the same tree with the same
/// configuration (apart from `parallel_process`), so they all derive the
/// same spec order and plan. The processes coordinate through a
/// [`SyncClient`].
pub struct Suite {
    config: SuiteConfig,
    tree: Tree,
    specs: Vec<Spec>,
    suite_nodes: SuiteNodes,
    order: Vec<usize>,
    plan: ExecutionPlan,
    has_programmatic_focus: bool,
    phase: Phase,
    interrupts: Arc<InterruptHandler>,
    client: Option<Arc<dyn SyncClient>>,
    handle_signals: bool,
}

impl Suite {
    /// Generate, filter, order and distribute the specs of `tree`.
    pub fn new(tree: Tree, config: SuiteConfig) -> Result<Self, SuiteError> {
        config.validate()?;
        let (mut specs, suite_nodes) = spec::generate(&tree);
        let outcome = SpecFilter::new(&config.filter)?.apply(&mut specs);
        let order = order::order_specs(&specs, &config.order());
        let plan = distribute::plan(&specs, &order, config.parallel_total());

        Ok(Self {
            config,
            tree,
            specs,
            suite_nodes,
            order,
            plan,
            has_programmatic_focus: outcome.has_programmatic_focus,
            phase: Phase::BuildTree,
            interrupts: InterruptHandler::new(),
            client: None,
            handle_signals: false,
        })
    }

    /// Assemble the tree and create the suite in one step.
    ///
    /// ```
    /// use kispec::{NoReporter, Suite, SuiteConfig};
    ///
    /// let mut suite = Suite::build(SuiteConfig::new().with_seed(1), |b| {
    ///     b.describe("math", |b| {
    ///         b.it("adds", || assert_eq!(1 + 1, 2));
    ///     });
    /// })
    /// .unwrap();
    /// let report = suite.run(&mut NoReporter).unwrap();
    /// assert!(report.suite_succeeded);
    /// ```
    pub fn build(
        config: SuiteConfig,
        f: impl FnOnce(&mut TreeBuilder),
    ) -> Result<Self, SuiteError> {
        Self::new(Tree::build(f)?, config)
    }

    pub fn with_sync_client(self, client: Arc<dyn SyncClient>) -> Self {
        Self {
            client: Some(client),
            ..self
        }
    }

    /// Share an interrupt handler, for example to interrupt the run from another thread.
    pub fn with_interrupt_handler(self, interrupts: Arc<InterruptHandler>) -> Self {
        Self { interrupts, ..self }
    }

    /// Route SIGINT/SIGTERM to this suite while it runs.
    pub fn with_signal_handling(self) -> Self {
        Self {
            handle_signals: true,
            ..self
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn config(&self) -> &SuiteConfig {
        &self.config
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    /// Specs in declaration order.
    pub fn specs(&self) -> &[Spec] {
        &self.specs
    }

    /// Specs in the order the whole suite executes them.
    pub fn ordered_specs(&self) -> impl Iterator<Item = &Spec> {
        self.order.iter().map(|&index| &self.specs[index])
    }

    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    pub fn interrupt_handler(&self) -> &Arc<InterruptHandler> {
        &self.interrupts
    }

    pub fn run<R: Reporter>(&mut self, reporter: &mut R) -> Result<Report, SuiteError> {
        if self.phase != Phase::BuildTree {
            return Err(SuiteError::AlreadyRan);
        }
        self.phase = Phase::Running;
        let result = self.execute(reporter);
        self.interrupts.stop();
        self.phase = Phase::Completed;
        result
    }

    fn connect(&self) -> Result<Option<Arc<dyn SyncClient>>, SuiteError> {
        if let Some(client) = &self.client {
            return Ok(Some(Arc::clone(client)));
        }
        if self.config.parallel_total == 1 {
            return Ok(None);
        }
        match self.config.sync_server_address {
            Some(address) => {
                let client = TcpClient::connect(address)?.with_poll_interval(self.config.sync_poll_interval);
                Ok(Some(Arc::new(client)))
            }
            None => Err(ConfigError::MissingSyncServer {
                total: self.config.parallel_total,
            }
            .into()),
        }
    }

    fn execute(&self, reporter: &mut dyn Reporter) -> Result<Report, SuiteError> {
        let config = &self.config;
        let process = config.parallel_process;
        let parallel = config.parallel_total > 1;
        let client = self.connect()?;
        if self.handle_signals {
            self.interrupts.install_signal_handler()?;
        }

        let mut report = Report::new(config.description.clone(), config.random_seed);
        report.parallel_process = process;
        report.parallel_total = config.parallel_total;
        report.suite_has_programmatic_focus = self.has_programmatic_focus;
        report.pre_run_stats = PreRunStats {
            total_specs: self.specs.len(),
            specs_that_will_run: self
                .specs
                .iter()
                .filter(|spec| !spec.skip && !spec.is_pending())
                .count(),
        };
        tracing::info!(
            suite = %config.description,
            seed = config.random_seed,
            process,
            specs = report.pre_run_stats.total_specs,
            will_run = report.pre_run_stats.specs_that_will_run,
            "suite starting"
        );
        reporter.suite_will_begin(&report);

        if let Some(client) = &client {
            client.post_suite_will_begin(process, &report)?;
        }
        let _heartbeat = client
            .as_ref()
            .map(|client| HeartbeatGuard::start(Arc::clone(client), process, config.heartbeat_interval));
        if let (Some(client), true) = (&client, parallel) {
            self.interrupts
                .watch_for_abort(Arc::clone(client), config.sync_poll_interval);
        }
        if let Some(timeout) = config.timeout {
            self.interrupts.start_suite_timeout(timeout);
        }

        let mut runner = Runner::new(config, Arc::clone(&self.interrupts), client.clone(), reporter);
        let client = client.filter(|_| parallel);

        if !config.dry_run {
            self.report_before_suite(&mut runner, client.as_deref(), &mut report);
            self.before_suite(&mut runner, client.as_deref(), &mut report);
        }

        let mut work: Vec<usize> = self.plan.for_process(process).to_vec();
        if process == 1 {
            work.extend(&self.plan.serial);
        }
        let mut ordered = OrderedState::new(work.iter().map(|&index| &self.specs[index]));
        for &index in self.plan.for_process(process) {
            report
                .spec_reports
                .push(runner.run_spec(&self.specs[index], &mut ordered));
        }
        if process == 1 && !self.plan.serial.is_empty() {
            if let Some(client) = &client {
                if let Err(err) = client.block_until_nonprimary_procs_have_finished(&self.interrupts) {
                    tracing::warn!(error = %err, label = err.as_label(), "could not wait for the other processes before the serial specs");
                }
            }
            for &index in &self.plan.serial {
                report
                    .spec_reports
                    .push(runner.run_spec(&self.specs[index], &mut ordered));
            }
        }

        if !config.dry_run {
            self.after_suite(&mut runner, client.as_deref(), &mut report);
            if let Some(cleanups) = runner.run_suite_cleanups() {
                report.spec_reports.push(cleanups);
            }
        }

        self.finalize(&mut report);
        if process != 1 {
            if let Some(client) = &client {
                client.post_suite_did_end(process, &report)?;
            }
        } else if !config.dry_run && !self.suite_nodes.report_after_suite.is_empty() {
            self.report_after_suite(&mut runner, client.as_deref(), &mut report);
            self.finalize(&mut report);
        }

        tracing::info!(
            suite = %config.description,
            process,
            succeeded = report.suite_succeeded,
            passed = report.count(SpecState::Passed),
            failed = report.specs().filter(|spec| spec.failed()).count(),
            run_time = ?report.run_time,
            "suite finished"
        );
        runner.reporter().suite_did_end(&report);
        Ok(report)
    }

    fn report_before_suite(
        &self,
        runner: &mut Runner<'_>,
        client: Option<&dyn SyncClient>,
        report: &mut Report,
    ) {
        let nodes = &self.suite_nodes.report_before_suite;
        if nodes.is_empty() {
            return;
        }

        if self.config.parallel_process == 1 {
            let mut state = SpecState::Passed;
            for node in nodes {
                let spec_report = run_suite_node(runner, node, Some(report.clone()));
                if spec_report.failed() {
                    state = spec_report.state;
                }
                report.spec_reports.push(spec_report);
            }
            if let Some(client) = client {
                if let Err(err) = client.post_report_before_suite_completed(state) {
                    tracing::warn!(error = %err, label = err.as_label(), "could not publish the ReportBeforeSuite state");
                }
            }
            if state.is_failure() {
                runner.skip_remaining("Spec skipped because a ReportBeforeSuite node failed");
            }
        } else if let Some(client) = client {
            if let Err(err) = client.block_until_report_before_suite_completed(&self.interrupts) {
                tracing::warn!(error = %err, label = err.as_label(), "ReportBeforeSuite did not complete on process #1");
                runner.skip_remaining(format!("Spec skipped because {err}"));
                report.add_failure_reason(err.to_string());
            }
        }
    }

    fn before_suite(&self, runner: &mut Runner<'_>, client: Option<&dyn SyncClient>, report: &mut Report) {
        let Some(node) = &self.suite_nodes.before_suite else {
            return;
        };
        let writer = SpecWriter::new();
        let mut spec_report = runner.begin_suite_node(node);

        if runner.skip_reason().is_some() {
            report
                .spec_reports
                .push(runner.finish_suite_node(spec_report, &writer));
            return;
        }
        if node.node_type == NodeType::SynchronizedBeforeSuite {
            let mut data = Some(Vec::new());
            if self.config.parallel_process == 1 {
                if let Some(primary) = node.primary_body() {
                    data = runner.run_suite_body(&mut spec_report, node, primary, None, None, &writer);
                }
                let state = match spec_report.start_time {
                    Some(_) => spec_report.state,
                    None => SpecState::Skipped,
                };
                data = match state {
                    SpecState::Passed => Some(data.unwrap_or_default()),
                    _ => None,
                };
                if let Some(client) = client {
                    let payload = data.clone().unwrap_or_default();
                    if let Err(err) = client.post_before_suite_completed(state, payload) {
                        tracing::warn!(error = %err, label = err.as_label(), "could not publish the BeforeSuite state");
                    }
                }
            } else if let Some(client) = client {
                match client.block_until_before_suite_data(&self.interrupts) {
                    Ok(payload) => data = Some(payload),
                    Err(err) => {
                        spec_report.start_time = Some(SystemTime::now());
                        spec_report.state = SpecState::Failed;
                        spec_report.failure = Some(runner.failure(
                            node,
                            None,
                            SpecState::Failed,
                            err.to_string(),
                            None,
                            None,
                        ));
                        data = None;
                    }
                }
            }
            if let (Some(data), Some(all)) = (data, node.body()) {
                runner.run_suite_body(&mut spec_report, node, all, Some(data), None, &writer);
            }
        } else if let Some(body) = node.body() {
            runner.run_suite_body(&mut spec_report, node, body, None, None, &writer);
        }

        let spec_report = runner.finish_suite_node(spec_report, &writer);
        if spec_report.state != SpecState::Passed {
            runner.skip_remaining(format!("Spec skipped because {} did not pass", node.node_type));
        }
        report.spec_reports.push(spec_report);
    }

    fn after_suite(&self, runner: &mut Runner<'_>, client: Option<&dyn SyncClient>, report: &mut Report) {
        let Some(node) = &self.suite_nodes.after_suite else {
            return;
        };
        let writer = SpecWriter::new();
        let mut spec_report = runner.begin_suite_node(node);
        if let Some(all) = node.body() {
            runner.run_suite_body(&mut spec_report, node, all, None, None, &writer);
        }
        if node.node_type == NodeType::SynchronizedAfterSuite && self.config.parallel_process == 1 {
            if let Some(client) = client {
                if let Err(err) = client.block_until_nonprimary_procs_have_finished(&self.interrupts) {
                    tracing::warn!(error = %err, label = err.as_label(), "could not wait for the other processes before SynchronizedAfterSuite");
                }
            }
            if let Some(primary) = node.primary_body() {
                runner.run_suite_body(&mut spec_report, node, primary, None, None, &writer);
            }
        }
        report
            .spec_reports
            .push(runner.finish_suite_node(spec_report, &writer));
    }

    /// Runs on process #1 with the reports of every process merged in.
    fn report_after_suite(
        &self,
        runner: &mut Runner<'_>,
        client: Option<&dyn SyncClient>,
        report: &mut Report,
    ) {
        let mut merged = report.clone();
        if let Some(client) = client {
            match client.block_until_aggregated_nonprimary_reports(&self.interrupts) {
                Ok(aggregated) => {
                    for other in aggregated.reports {
                        merged.merge(other);
                    }
                    for process in aggregated.gone {
                        merged.merge(Report::unavailable(report, process));
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, label = err.as_label(), "could not aggregate the other processes' reports");
                    for process in 2..=self.config.parallel_total {
                        merged.merge(Report::unavailable(report, process));
                    }
                }
            }
        }

        for node in &self.suite_nodes.report_after_suite {
            let spec_report = run_suite_node(runner, node, Some(merged.clone()));
            report.spec_reports.push(spec_report);
        }
    }

    fn finalize(&self, report: &mut Report) {
        let status = self.interrupts.status();
        if status.interrupted() {
            report.add_failure_reason(status.message());
        }
        if self.config.fail_on_pending && report.count(SpecState::Pending) > 0 {
            report.add_failure_reason(PENDING_REASON);
        }
        if self.config.fail_on_empty && report.pre_run_stats.specs_that_will_run == 0 {
            report.add_failure_reason(EMPTY_REASON);
        }
        report.end_time = Some(SystemTime::now());
        report.run_time = report
            .end_time
            .and_then(|end| end.duration_since(report.start_time).ok())
            .unwrap_or_default();
        report.suite_succeeded = report.special_suite_failure_reasons.is_empty()
            && !report.spec_reports.iter().any(SpecReport::failed);
    }
}

/// Run a report suite node, or a suite node with a single body.
fn run_suite_node(runner: &mut Runner<'_>, node: &Arc<Node>, report: Option<Report>) -> SpecReport {
    let writer = SpecWriter::new();
    let mut spec_report = runner.begin_suite_node(node);
    if let Some(body) = node.body() {
        runner.run_suite_body(&mut spec_report, node, body, None, report, &writer);
    }
    runner.finish_suite_node(spec_report, &writer)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        context::SpecContext,
        filter::FilterConfig,
        node::{Decorations, fail},
        reporter::NoReporter,
        test_support::{CollectingReporter, Trace, run},
    };

    fn config() -> SuiteConfig {
        SuiteConfig::new().with_seed(42)
    }

    #[test]
    fn setup_and_teardown_wrap_every_spec() {
        let trace = Trace::default();
        let t = trace.clone();
        let report = run(config(), move |b| {
            b.describe("container", |b| {
                b.before_each(t.record("b1"));
                b.it("A", t.record("A"));
                b.it("B", t.record("B"));
                b.after_each(t.record("a1"));
            });
        });

        assert!(report.suite_succeeded);
        assert_eq!(trace.events(), vec!["b1", "A", "a1", "b1", "B", "a1"]);
    }

    #[test]
    fn a_suite_runs_once() {
        let mut suite = Suite::build(config(), |b| {
            b.it("a", || ());
        })
        .unwrap();
        assert_eq!(suite.phase(), Phase::BuildTree);

        suite.run(&mut NoReporter).unwrap();
        assert_eq!(suite.phase(), Phase::Completed);
        assert!(matches!(suite.run(&mut NoReporter), Err(SuiteError::AlreadyRan)));
    }

    #[test]
    fn failing_before_suite_skips_specs_but_runs_after_suite() {
        let trace = Trace::default();
        let t = trace.clone();
        let report = run(config(), move |b| {
            b.before_suite(|| fail("database unreachable"));
            b.after_suite(t.record("after suite"));
            b.it("a", t.record("a"));
        });

        assert!(!report.suite_succeeded);
        assert_eq!(trace.events(), vec!["after suite"]);
        let spec = report.find("a").unwrap();
        assert_eq!(spec.state, SpecState::Skipped);
        let before = report
            .spec_reports
            .iter()
            .find(|r| r.leaf_node_type == Some(NodeType::BeforeSuite))
            .unwrap();
        assert_eq!(before.state, SpecState::Failed);
        assert_eq!(before.failure_message(), Some("database unreachable"));
    }

    #[test]
    fn synchronized_before_suite_passes_the_payload_on() {
        let trace = Trace::default();
        let t = trace.clone();
        let report = run(config(), move |b| {
            let t2 = t.clone();
            b.synchronized_before_suite(
                || b"X".to_vec(),
                move |data: &[u8]| t2.push(String::from_utf8_lossy(data)),
            );
            b.it("a", t.record("a"));
        });

        assert!(report.suite_succeeded);
        assert_eq!(trace.events(), vec!["X", "a"]);
    }

    #[test]
    fn suite_cleanups_run_after_after_suite() {
        let trace = Trace::default();
        let t = trace.clone();
        let report = run(config(), move |b| {
            let t2 = t.clone();
            b.before_suite(move |ctx: &SpecContext| {
                t2.push("before suite");
                let t3 = t2.clone();
                ctx.defer_cleanup(move || t3.push("cleanup"));
            });
            b.after_suite(t.record("after suite"));
            b.it("a", t.record("a"));
        });

        assert!(report.suite_succeeded);
        assert_eq!(
            trace.events(),
            vec!["before suite", "a", "after suite", "cleanup"]
        );
    }

    #[test]
    fn pending_specs_fail_the_suite_when_asked_to() {
        let build = |b: &mut TreeBuilder| {
            b.it_with("later", Decorations::new().pending(), || ());
            b.it("now", || ());
        };

        let lenient = run(config(), build);
        assert!(lenient.suite_succeeded);
        assert_eq!(lenient.find("later").unwrap().state, SpecState::Pending);

        let strict = run(config().with_fail_on_pending(true), build);
        assert!(!strict.suite_succeeded);
        assert_eq!(strict.special_suite_failure_reasons, vec![PENDING_REASON]);
    }

    #[test]
    fn an_empty_run_fails_when_asked_to() {
        let filter = FilterConfig::new().with_skip("only");
        let report = run(
            config().with_filter(filter).with_fail_on_empty(true),
            |b| {
                b.it("only", || ());
            },
        );

        assert_eq!(report.pre_run_stats.total_specs, 1);
        assert_eq!(report.pre_run_stats.specs_that_will_run, 0);
        assert!(!report.suite_succeeded);
        assert_eq!(report.special_suite_failure_reasons, vec![EMPTY_REASON]);
    }

    #[test]
    fn dry_run_runs_no_bodies() {
        let trace = Trace::default();
        let t = trace.clone();
        let report = run(config().with_dry_run(true), move |b| {
            b.before_suite(t.record("before suite"));
            b.describe("container", |b| {
                b.before_each(t.record("before each"));
                b.it("a", t.record("a"));
            });
            b.report_after_each({
                let t = t.clone();
                move |_: &SpecReport| t.push("report")
            });
        });

        assert!(trace.events().is_empty());
        assert!(report.suite_succeeded);
        assert_eq!(report.find("a").unwrap().state, SpecState::Passed);
    }

    #[test]
    fn report_after_suite_sees_every_spec() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let report = run(config(), move |b| {
            b.it("a", || ());
            b.it("b", || fail("nope"));
            b.report_after_suite(move |report: &Report| {
                let mut states: Vec<_> = report
                    .specs()
                    .map(|spec| (spec.leaf_text.clone(), spec.state))
                    .collect();
                states.sort_by(|x, y| x.0.cmp(&y.0));
                s.lock().unwrap().extend(states);
            });
        });

        assert!(!report.suite_succeeded);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ("a".to_string(), SpecState::Passed),
                ("b".to_string(), SpecState::Failed)
            ]
        );
    }

    #[test]
    fn reporter_sees_the_whole_lifecycle() {
        let mut reporter = CollectingReporter::default();
        let mut suite = Suite::build(config().with_description("lifecycle"), |b| {
            b.it("a", || ());
        })
        .unwrap();
        let report = suite.run(&mut reporter).unwrap();

        assert_eq!(
            reporter.events,
            vec!["suite_will_begin", "will_run a", "did_run a", "suite_did_end"]
        );
        assert_eq!(reporter.will_run[0].state, SpecState::Pending);
        assert_eq!(reporter.did_run[0].state, SpecState::Passed);
        assert!(reporter.progress.is_empty());
        assert_eq!(reporter.began.unwrap().suite_description, "lifecycle");
        assert_eq!(reporter.ended, Some(report));
    }

    #[test]
    fn parallel_runs_need_a_way_to_synchronize() {
        let mut suite = Suite::build(config().with_parallel(1, 2), |b| {
            b.it("a", || ());
        })
        .unwrap();

        let err = suite.run(&mut NoReporter).unwrap_err();
        assert!(matches!(
            err,
            SuiteError::Config(ConfigError::MissingSyncServer { total: 2 })
        ));
    }
}
