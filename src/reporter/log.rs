use crate::{
    progress::ProgressReport,
    report::{Report, SpecReport, SpecState},
    reporter::Reporter,
};

/// Logs lifecycle events through `tracing`.
///
/// Passing specs are logged at debug level, failures at warn, and the
/// suite summary at info.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl LogReporter {
    pub fn new() -> Self {
        Self
    }
}

impl Reporter for LogReporter {
    fn suite_will_begin(&mut self, report: &Report) {
        tracing::info!(
            suite = %report.suite_description,
            seed = report.random_seed,
            process = report.parallel_process,
            total = report.pre_run_stats.total_specs,
            will_run = report.pre_run_stats.specs_that_will_run,
            "suite starting"
        );
    }

    fn will_run(&mut self, report: &SpecReport) {
        tracing::trace!(spec = %report.full_text(), "spec starting");
    }

    fn did_run(&mut self, report: &SpecReport) {
        let spec = report.full_text();
        match report.state {
            state if state.is_failure() => {
                let message = report.failure_message().unwrap_or_default();
                let location = report
                    .failure
                    .as_ref()
                    .map(|failure| failure.location.to_string())
                    .unwrap_or_default();
                tracing::warn!(
                    %spec,
                    ?state,
                    attempts = report.num_attempts,
                    %location,
                    failure = message,
                    "spec failed"
                );
            }
            SpecState::Skipped | SpecState::Pending => {
                tracing::debug!(%spec, state = ?report.state, "spec did not run");
            }
            state => {
                tracing::debug!(%spec, ?state, run_time = ?report.run_time, "spec finished");
            }
        }
    }

    fn suite_did_end(&mut self, report: &Report) {
        tracing::info!(
            suite = %report.suite_description,
            succeeded = report.suite_succeeded,
            passed = report.count(SpecState::Passed),
            failed = report.specs().filter(|spec| spec.failed()).count(),
            skipped = report.count(SpecState::Skipped),
            pending = report.count(SpecState::Pending),
            run_time = ?report.run_time,
            reasons = ?report.special_suite_failure_reasons,
            "suite finished"
        );
    }

    fn emit_progress_report(&mut self, report: &ProgressReport) {
        tracing::info!(
            process = report.parallel_process,
            spec = %report.spec_text,
            node = %report.current_node_text,
            step = report.current_step.as_deref().unwrap_or_default(),
            in_node = ?report.time_in_node,
            live_tasks = report.live_tasks.len(),
            abandoned_tasks = report.abandoned_tasks.len(),
            "{}",
            report.message
        );
    }
}
