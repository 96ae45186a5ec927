use std::{collections::BTreeSet, sync::Arc, thread, time::Duration};

use kispec::{
    Decorations, NoReporter, Report, SpecContext, SpecState, Suite, SuiteConfig, TreeBuilder,
    parallel::{LocalClient, SyncServer, TcpSyncServer},
    report::AGGREGATION_UNAVAILABLE,
};
use pretty_assertions::assert_eq;

use crate::{Log, init_tracing};

const TOTAL: usize = 2;

fn tree(b: &mut TreeBuilder, log: Log, aggregated: Log) {
    let data_log = log.clone();
    b.synchronized_before_suite(
        || b"X".to_vec(),
        move |data: &[u8]| data_log.push(format!("payload {}", String::from_utf8_lossy(data))),
    );
    for name in ["p1", "p2", "p3", "p4", "p5", "p6"] {
        b.it(name, log.record(name));
    }
    b.it_with("s1", Decorations::new().serial(), log.record("s1"));
    b.it_with("s2", Decorations::new().serial(), log.record("s2"));
    b.report_after_suite(move |report: &Report| {
        aggregated.push(format!("{} specs", report.specs().count()));
    });
}

fn config(process: usize) -> SuiteConfig {
    SuiteConfig::new()
        .with_seed(5)
        .with_parallel(process, TOTAL)
        .with_sync_poll_interval(Duration::from_millis(5))
        .with_heartbeat_interval(Duration::from_millis(50))
}

struct Process {
    report: Report,
    log: Log,
    aggregated: Log,
}

fn run_processes(suite_for: impl Fn(usize, Log, Log) -> Suite + Sync) -> Vec<Process> {
    init_tracing();
    thread::scope(|scope| {
        let handles: Vec<_> = (1..=TOTAL)
            .map(|process| {
                let suite_for = &suite_for;
                scope.spawn(move || {
                    let log = Log::default();
                    let aggregated = Log::default();
                    let mut suite = suite_for(process, log.clone(), aggregated.clone());
                    let report = suite.run(&mut NoReporter).unwrap();
                    Process {
                        report,
                        log,
                        aggregated,
                    }
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect()
    })
}

fn names(report: &Report) -> BTreeSet<String> {
    report
        .specs()
        .map(|spec| spec.leaf_text.clone())
        .collect()
}

fn check(processes: &[Process]) {
    let [primary, secondary] = processes else {
        panic!("expected two processes");
    };

    for process in processes {
        assert!(process.report.suite_succeeded);
        assert_eq!(process.log.events()[0], "payload X");
    }

    let primary_specs = names(&primary.report);
    let secondary_specs = names(&secondary.report);
    assert!(primary_specs.contains("s1") && primary_specs.contains("s2"));
    assert!(!secondary_specs.contains("s1") && !secondary_specs.contains("s2"));
    assert!(primary_specs.is_disjoint(&secondary_specs));
    let all: BTreeSet<_> = primary_specs.union(&secondary_specs).cloned().collect();
    assert_eq!(all.len(), 8);
    assert!(!secondary_specs.is_empty());

    let serial_at = |name: &str| primary.log.events().iter().position(|event| event == name);
    let last_parallel = primary
        .log
        .events()
        .iter()
        .rposition(|event| event.starts_with('p') && !event.starts_with("payload"));
    assert!(serial_at("s1") > last_parallel);
    assert!(serial_at("s2") > last_parallel);

    let secondary_end = secondary.report.end_time.unwrap();
    for name in ["s1", "s2"] {
        let started = primary.report.find(name).unwrap().start_time.unwrap();
        assert!(secondary_end <= started, "{name} started before process #2 finished");
    }

    assert_eq!(primary.aggregated.events(), vec!["8 specs"]);
    assert!(secondary.aggregated.events().is_empty());
    assert_eq!(secondary.report.parallel_process, 2);
}

#[test]
fn processes_share_one_suite_through_a_local_server() {
    let server = Arc::new(SyncServer::new(TOTAL, Duration::from_secs(5)));
    let processes = run_processes(|process, log, aggregated| {
        let client = LocalClient::new(Arc::clone(&server)).with_poll_interval(Duration::from_millis(5));
        Suite::build(config(process), |b| tree(b, log, aggregated))
            .unwrap()
            .with_sync_client(Arc::new(client))
    });
    check(&processes);
}

#[test]
fn processes_share_one_suite_over_tcp() {
    let server = Arc::new(SyncServer::new(TOTAL, Duration::from_secs(5)));
    let listener = TcpSyncServer::bind("127.0.0.1:0", server).unwrap();
    let address = listener.local_addr();
    let processes = run_processes(|process, log, aggregated| {
        Suite::build(config(process).with_sync_server_address(address), |b| {
            tree(b, log, aggregated)
        })
        .unwrap()
    });
    check(&processes);
}

fn local_suite(server: &Arc<SyncServer>, process: usize, f: impl FnOnce(&mut TreeBuilder)) -> Suite {
    let client = LocalClient::new(Arc::clone(server)).with_poll_interval(Duration::from_millis(5));
    Suite::build(config(process), f)
        .unwrap()
        .with_sync_client(Arc::new(client))
}

#[test]
fn an_abort_on_one_process_interrupts_the_others() {
    let server = Arc::new(SyncServer::new(TOTAL, Duration::from_secs(5)));
    let processes = run_processes(|process, _, _| {
        local_suite(&server, process, |b| {
            for name in ["a", "b", "c", "d", "e", "f"] {
                if process == 2 {
                    b.it(name, || {
                        thread::sleep(Duration::from_millis(100));
                        kispec::abort("giving up")
                    });
                } else {
                    b.it(name, |ctx: &SpecContext| ctx.sleep(Duration::from_secs(30)));
                }
            }
        })
    });
    let [primary, secondary] = processes.as_slice() else {
        panic!("expected two processes");
    };

    let ran = secondary.report.specs().count();
    assert_eq!(secondary.report.count(SpecState::Aborted), 1);
    assert_eq!(secondary.report.count(SpecState::Skipped), ran - 1);

    let ran = primary.report.specs().count();
    assert_eq!(primary.report.count(SpecState::Interrupted), 1);
    assert_eq!(primary.report.count(SpecState::Skipped), ran - 1);
    assert!(
        primary
            .report
            .special_suite_failure_reasons
            .contains(&"Interrupted by Other Process".to_string())
    );
}

#[test]
fn a_vanished_process_is_reported_as_unavailable() {
    init_tracing();
    let server = Arc::new(SyncServer::new(TOTAL, Duration::from_millis(150)));
    let seen = Log::default();
    let s = seen.clone();
    let mut suite = local_suite(&server, 1, move |b| {
        for name in ["p1", "p2", "p3", "p4"] {
            b.it(name, || ());
        }
        b.report_after_suite(move |report: &Report| {
            for spec in &report.spec_reports {
                if spec.leaf_text == AGGREGATION_UNAVAILABLE {
                    s.push(format!("placeholder for #{}", spec.parallel_process));
                }
            }
            if !report.suite_succeeded {
                s.push("suite failed");
            }
        });
    });

    let report = suite.run(&mut NoReporter).unwrap();

    assert_eq!(seen.events(), vec!["placeholder for #2", "suite failed"]);
    assert!(report.specs().all(|spec| spec.state == SpecState::Passed));
}
