use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};

use kispec::{
    Decorations, NodeResult, SpecState, SuiteConfig, fail,
    report::{SpecEvent, SpecEventKind},
};
use pretty_assertions::assert_eq;

use crate::{Log, run};

fn failed_attempts(events: &[SpecEvent]) -> usize {
    events
        .iter()
        .filter(|event| matches!(event.kind, SpecEventKind::AttemptFailed { .. }))
        .count()
}

/// A body that fails on the attempts listed in `failing` (1 based).
fn fails_on(failing: &'static [u32]) -> impl Fn() -> NodeResult + Send + Sync + 'static {
    let calls = Arc::new(AtomicU32::new(0));
    move || {
        let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
        match failing.contains(&attempt) {
            true => fail(format!("attempt {attempt} failed")),
            false => NodeResult::passed(),
        }
    }
}

#[test]
fn flaky_specs_are_retried_until_they_pass() {
    let log = Log::default();
    let l = log.clone();
    let report = run(SuiteConfig::new().with_seed(1), move |b| {
        b.describe("c", |b| {
            b.before_each(l.record("setup"));
            b.it_with("flaky", Decorations::new().with_flake_attempts(5), fails_on(&[1, 2]));
        });
    });

    let spec = report.find("flaky").unwrap();
    assert_eq!(spec.state, SpecState::Passed);
    assert_eq!(spec.num_attempts, 3);
    assert_eq!(spec.max_flake_attempts, 5);
    assert_eq!(failed_attempts(&spec.timeline), 2);
    assert_eq!(spec.failure, None);
    assert_eq!(log.events(), vec!["setup", "setup", "setup"]);
    assert!(report.suite_succeeded);
}

#[test]
fn flaky_specs_give_up_after_their_attempts() {
    let report = run(SuiteConfig::new().with_seed(1), |b| {
        b.it_with("broken", Decorations::new().with_flake_attempts(2), || fail("always"));
    });

    let spec = report.find("broken").unwrap();
    assert_eq!(spec.state, SpecState::Failed);
    assert_eq!(spec.num_attempts, 2);
    assert_eq!(spec.failure_message(), Some("always"));
}

#[test]
fn repeated_specs_stop_at_the_first_failure() {
    let report = run(SuiteConfig::new().with_seed(1), |b| {
        b.it_with(
            "repeated",
            Decorations::new().with_must_pass_repeatedly(5),
            fails_on(&[3]),
        );
    });

    let spec = report.find("repeated").unwrap();
    assert_eq!(spec.state, SpecState::Failed);
    assert_eq!(spec.num_attempts, 3);
    assert_eq!(spec.failure_message(), Some("attempt 3 failed"));
}

#[test]
fn repeated_specs_run_every_attempt_when_they_keep_passing() {
    let report = run(SuiteConfig::new().with_seed(1).with_must_pass_repeatedly(4), |b| {
        b.it("steady", || ());
    });

    let spec = report.find("steady").unwrap();
    assert_eq!(spec.state, SpecState::Passed);
    assert_eq!(spec.num_attempts, 4);
    assert_eq!(spec.max_must_pass_repeatedly, 4);
}
