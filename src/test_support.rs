use std::sync::{Arc, Mutex};

use crate::{
    config::SuiteConfig,
    progress::ProgressReport,
    report::{Report, SpecReport},
    reporter::Reporter,
    suite::Suite,
    tree::TreeBuilder,
    util::lock,
};

/// Records which node bodies ran, in order.
#[derive(Debug, Default, Clone)]
pub struct Trace(Arc<Mutex<Vec<String>>>);

impl Trace {
    pub fn push(&self, event: impl Into<String>) {
        lock(&self.0).push(event.into());
    }

    /// A plain body that records `event`.
    pub fn record(&self, event: &'static str) -> impl Fn() + Send + Sync + 'static {
        let trace = self.clone();
        move || trace.push(event)
    }

    pub fn events(&self) -> Vec<String> {
        lock(&self.0).clone()
    }
}

/// A reporter keeping every event it was handed.
#[derive(Debug, Default)]
pub struct CollectingReporter {
    pub events: Vec<String>,
    pub will_run: Vec<SpecReport>,
    pub did_run: Vec<SpecReport>,
    pub progress: Vec<ProgressReport>,
    pub began: Option<Report>,
    pub ended: Option<Report>,
}

impl Reporter for CollectingReporter {
    fn suite_will_begin(&mut self, report: &Report) {
        self.events.push("suite_will_begin".into());
        self.began = Some(report.clone());
    }

    fn will_run(&mut self, report: &SpecReport) {
        self.events.push(format!("will_run {}", report.leaf_text));
        self.will_run.push(report.clone());
    }

    fn did_run(&mut self, report: &SpecReport) {
        self.events.push(format!("did_run {}", report.leaf_text));
        self.did_run.push(report.clone());
    }

    fn suite_did_end(&mut self, report: &Report) {
        self.events.push("suite_did_end".into());
        self.ended = Some(report.clone());
    }

    fn emit_progress_report(&mut self, report: &ProgressReport) {
        self.events.push("progress".into());
        self.progress.push(report.clone());
    }
}

/// Build and run a single-process suite, discarding reporter events.
pub fn run(config: SuiteConfig, f: impl FnOnce(&mut TreeBuilder)) -> Report {
    let mut suite = Suite::build(config, f).expect("suite builds");
    suite.run(&mut crate::reporter::NoReporter).expect("suite runs")
}
