//! The seam between the engine and whatever renders its results.
//!
//! The engine never formats output itself. Everything it wants to tell the
//! outside world goes through a [`Reporter`].

use crate::{
    progress::ProgressReport,
    report::{Report, SpecReport},
};

mod log;
pub use log::LogReporter;

/// Receives lifecycle events of one process' run.
///
/// All methods have empty defaults, so implementors only pick the events
/// they care about.
pub trait Reporter {
    /// Called once the specs are generated, filtered and ordered.
    fn suite_will_begin(&mut self, report: &Report) {
        let _ = report;
    }

    /// Called before a spec or a suite node runs. The report carries the
    /// spec's identity but no outcome yet.
    fn will_run(&mut self, report: &SpecReport) {
        let _ = report;
    }

    fn did_run(&mut self, report: &SpecReport) {
        let _ = report;
    }

    fn suite_did_end(&mut self, report: &Report) {
        let _ = report;
    }

    fn emit_progress_report(&mut self, report: &ProgressReport) {
        let _ = report;
    }
}

/// A reporter that discards every event.
///
/// Useful when the caller only cares about the [`Report`] returned by
/// [`Suite::run`](crate::Suite::run).
#[derive(Debug, Default, Clone, Copy)]
pub struct NoReporter;

impl Reporter for NoReporter {}

impl<R: Reporter + ?Sized> Reporter for &mut R {
    fn suite_will_begin(&mut self, report: &Report) {
        (**self).suite_will_begin(report)
    }

    fn will_run(&mut self, report: &SpecReport) {
        (**self).will_run(report)
    }

    fn did_run(&mut self, report: &SpecReport) {
        (**self).did_run(report)
    }

    fn suite_did_end(&mut self, report: &Report) {
        (**self).suite_did_end(report)
    }

    fn emit_progress_report(&mut self, report: &ProgressReport) {
        (**self).emit_progress_report(report)
    }
}

impl<R: Reporter + ?Sized> Reporter for Box<R> {
    fn suite_will_begin(&mut self, report: &Report) {
        (**self).suite_will_begin(report)
    }

    fn will_run(&mut self, report: &SpecReport) {
        (**self).will_run(report)
    }

    fn did_run(&mut self, report: &SpecReport) {
        (**self).did_run(report)
    }

    fn suite_did_end(&mut self, report: &Report) {
        (**self).suite_did_end(report)
    }

    fn emit_progress_report(&mut self, report: &ProgressReport) {
        (**self).emit_progress_report(report)
    }
}
