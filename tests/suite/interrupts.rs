use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use kispec::{
    Decorations, InterruptCause, InterruptHandler, NoReporter, SpecContext, SpecReport, SpecState,
    Suite, SuiteConfig,
};
use pretty_assertions::assert_eq;

use crate::{Log, init_tracing};

#[test]
fn an_interrupt_cancels_the_running_spec_and_skips_the_rest() {
    init_tracing();
    let log = Log::default();
    let l = log.clone();
    let (started_tx, started_rx) = crossbeam_channel::bounded(1);
    let interrupts = InterruptHandler::new();

    let mut suite = Suite::build(SuiteConfig::new().with_seed(1), move |b| {
        b.describe("c", move |b| {
            b.after_each(l.record("teardown"));
            b.it("slow", move |ctx: &SpecContext| {
                let _ = started_tx.send(());
                ctx.sleep(Duration::from_secs(30))
            });
            b.it("next", l.record("next"));
        });
    })
    .unwrap()
    .with_interrupt_handler(Arc::clone(&interrupts));

    let interrupter = thread::spawn(move || {
        started_rx.recv().unwrap();
        interrupts.interrupt(InterruptCause::Signal);
    });
    let started = Instant::now();
    let report = suite.run(&mut NoReporter).unwrap();
    interrupter.join().unwrap();

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(report.find("slow").unwrap().state, SpecState::Interrupted);
    assert_eq!(report.find("next").unwrap().state, SpecState::Skipped);
    assert_eq!(log.events(), vec!["teardown"]);
    assert!(!report.suite_succeeded);
    assert_eq!(
        report.special_suite_failure_reasons,
        vec!["Interrupted by User"]
    );
}

#[test]
fn a_second_interrupt_during_teardown_leaves_only_report_nodes() {
    init_tracing();
    let log = Log::default();
    let (started_tx, started_rx) = crossbeam_channel::bounded(1);
    let interrupts = InterruptHandler::new();

    let (l, again) = (log.clone(), Arc::clone(&interrupts));
    let mut suite = Suite::build(SuiteConfig::new().with_seed(1), move |b| {
        b.describe("outer", move |b| {
            b.after_each(l.record("outer after each"));
            b.describe("inner", move |b| {
                let teardown = l.clone();
                b.after_each(move || {
                    teardown.push("after each started");
                    again.interrupt(InterruptCause::Signal);
                });
                let reporter = l.clone();
                b.report_after_each(move |_: &SpecReport| reporter.push("report after each"));
                b.it("slow", move |ctx: &SpecContext| {
                    ctx.defer_cleanup(l.record("deferred cleanup"));
                    let _ = started_tx.send(());
                    ctx.sleep(Duration::from_secs(30))
                });
            });
        });
    })
    .unwrap()
    .with_interrupt_handler(Arc::clone(&interrupts));

    let interrupter = thread::spawn(move || {
        started_rx.recv().unwrap();
        interrupts.interrupt(InterruptCause::Signal);
    });
    let report = suite.run(&mut NoReporter).unwrap();
    interrupter.join().unwrap();

    assert_eq!(log.events(), vec!["after each started", "report after each"]);
    assert_eq!(report.find("slow").unwrap().state, SpecState::Interrupted);
}

#[test]
fn a_node_timeout_fails_only_that_spec() {
    init_tracing();
    let mut suite = Suite::build(SuiteConfig::new().with_seed(1), |b| {
        b.describe("c", |b| {
            b.it_with(
                "stuck",
                Decorations::new().with_node_timeout(Duration::from_millis(50)),
                |ctx: &SpecContext| ctx.sleep(Duration::from_secs(30)),
            );
            b.it("fine", || ());
        });
    })
    .unwrap();

    let report = suite.run(&mut NoReporter).unwrap();
    let stuck = report.find("stuck").unwrap();
    assert_eq!(stuck.state, SpecState::TimedOut);
    assert!(!stuck.progress_reports.is_empty());
    assert_eq!(report.find("fine").unwrap().state, SpecState::Passed);
    assert!(report.special_suite_failure_reasons.is_empty());
}
