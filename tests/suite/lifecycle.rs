use std::io::Write as _;

use kispec::{Decorations, SpecContext, SpecState, SuiteConfig, fail};
use pretty_assertions::assert_eq;

use crate::{Log, run};

#[test]
fn hooks_nest_around_specs() {
    let log = Log::default();
    let l = log.clone();
    let report = run(SuiteConfig::new().with_seed(1), move |b| {
        b.before_each(l.record("outer before"));
        b.after_each(l.record("outer after"));
        b.describe("inner", |b| {
            b.before_each(l.record("inner before"));
            b.just_before_each(l.record("just before"));
            b.just_after_each(l.record("just after"));
            b.after_each(l.record("inner after"));
            b.it("spec", l.record("spec"));
        });
    });

    assert!(report.suite_succeeded);
    assert_eq!(
        log.events(),
        vec![
            "outer before",
            "inner before",
            "just before",
            "spec",
            "just after",
            "inner after",
            "outer after",
        ]
    );
}

#[test]
fn teardown_runs_after_a_failing_spec() {
    let log = Log::default();
    let l = log.clone();
    let report = run(SuiteConfig::new().with_seed(1), move |b| {
        b.describe("c", |b| {
            b.after_each(l.record("after"));
            b.it("fails", || fail("broken"));
        });
    });

    let spec = report.find("fails").unwrap();
    assert_eq!(spec.state, SpecState::Failed);
    assert_eq!(spec.failure_message(), Some("broken"));
    assert_eq!(log.events(), vec!["after"]);
}

#[test]
fn ordered_containers_share_before_all_and_stop_after_a_failure() {
    let log = Log::default();
    let l = log.clone();
    let report = run(SuiteConfig::new().with_seed(9), move |b| {
        b.describe_with("db", Decorations::new().ordered(), |b| {
            b.before_all(l.record("connect"));
            b.after_all(l.record("disconnect"));
            b.it("first", l.record("first"));
            b.it("second", || fail("lost connection"));
            b.it("third", l.record("third"));
        });
    });

    assert_eq!(log.events(), vec!["connect", "first", "disconnect"]);
    assert_eq!(report.find("first").unwrap().state, SpecState::Passed);
    assert_eq!(report.find("second").unwrap().state, SpecState::Failed);
    assert_eq!(report.find("third").unwrap().state, SpecState::Skipped);
}

#[test]
fn deferred_cleanups_run_in_reverse_after_teardown() {
    let log = Log::default();
    let l = log.clone();
    let report = run(SuiteConfig::new().with_seed(1), move |b| {
        b.describe("c", |b| {
            b.after_each(l.record("after each"));
            let l = l.clone();
            b.it("spec", move |ctx: &SpecContext| {
                let first = l.clone();
                ctx.defer_cleanup(move || first.push("cleanup 1"));
                let second = l.clone();
                ctx.defer_cleanup(move || second.push("cleanup 2"));
            });
        });
    });

    assert!(report.suite_succeeded);
    assert_eq!(log.events(), vec!["after each", "cleanup 2", "cleanup 1"]);
}

#[test]
fn report_entries_and_steps_land_in_the_report() {
    let report = run(SuiteConfig::new().with_seed(1), |b| {
        b.it("spec", |ctx: &SpecContext| {
            ctx.by("warming up");
            ctx.add_report_entry("rows", 3);
            writeln!(ctx.writer(), "hello").unwrap();
        });
    });

    let spec = report.find("spec").unwrap();
    assert_eq!(spec.report_entries.len(), 1);
    assert_eq!(spec.report_entries[0].name, "rows");
    assert_eq!(spec.captured_output, "hello\n");
}
