use std::{
    collections::{BTreeMap, HashMap},
    sync::Mutex,
    time::{Duration, Instant},
};

use crate::{
    parallel::protocol::{Request, Response},
    report::{Report, SpecState},
    util::lock,
};

#[derive(Debug)]
struct ServerState {
    last_seen: HashMap<usize, Instant>,
    before_suite: Option<(SpecState, Vec<u8>)>,
    report_before_suite: Option<SpecState>,
    finished: BTreeMap<usize, Report>,
    aborted: bool,
}

/// Coordinates the processes of one parallel run.
///
/// Process #1 hosts the server (or talks to it first); every process talks
/// to it through a [`SyncClient`](crate::parallel::SyncClient). Requests are
/// answered immediately from the shared state.
#[derive(Debug)]
pub struct SyncServer {
    total: usize,
    liveness_timeout: Duration,
    started: Instant,
    state: Mutex<ServerState>,
}

impl SyncServer {
    pub fn new(total: usize, liveness_timeout: Duration) -> Self {
        Self {
            total,
            liveness_timeout,
            started: Instant::now(),
            state: Mutex::new(ServerState {
                last_seen: HashMap::new(),
                before_suite: None,
                report_before_suite: None,
                finished: BTreeMap::new(),
                aborted: false,
            }),
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// A process is alive until it posts `SuiteDidEnd` or stops sending
    /// heartbeats for longer than the liveness timeout. Processes that never
    /// checked in count from the server's start.
    fn is_alive(&self, state: &ServerState, process: usize, now: Instant) -> bool {
        if state.finished.contains_key(&process) {
            return false;
        }
        let seen = state.last_seen.get(&process).copied().unwrap_or(self.started);
        now.saturating_duration_since(seen) < self.liveness_timeout
    }

    pub fn handle(&self, request: Request) -> Response {
        let now = Instant::now();
        let mut state = lock(&self.state);
        tracing::trace!(endpoint = request.endpoint(), "sync request");

        match request {
            Request::SuiteWillBegin { process, .. } | Request::Heartbeat { process } => {
                if process == 0 || process > self.total {
                    return Response::Error(format!(
                        "process {process} is outside 1..={}",
                        self.total
                    ));
                }
                state.last_seen.insert(process, now);
                Response::Ack
            }
            Request::BeforeSuiteCompleted { state: spec_state, data } => {
                state.last_seen.insert(1, now);
                state.before_suite = Some((spec_state, data));
                Response::Ack
            }
            Request::BeforeSuiteState => {
                let primary_alive = self.is_alive(&state, 1, now);
                match &state.before_suite {
                    Some((spec_state, data)) => Response::BeforeSuiteState {
                        state: Some(*spec_state),
                        data: data.clone(),
                        primary_alive,
                    },
                    None => Response::BeforeSuiteState {
                        state: None,
                        data: Vec::new(),
                        primary_alive,
                    },
                }
            }
            Request::ReportBeforeSuiteCompleted { state: spec_state } => {
                state.last_seen.insert(1, now);
                state.report_before_suite = Some(spec_state);
                Response::Ack
            }
            Request::ReportBeforeSuiteState => Response::ReportBeforeSuiteState {
                state: state.report_before_suite,
                primary_alive: self.is_alive(&state, 1, now),
            },
            Request::HaveNonprimaryProcsFinished => Response::NonprimaryProcsFinished(
                (2..=self.total).all(|process| !self.is_alive(&state, process, now)),
            ),
            Request::SuiteDidEnd { process, report } => {
                if process < 2 || process > self.total {
                    return Response::Error(format!(
                        "only processes 2..={} post their reports",
                        self.total
                    ));
                }
                tracing::debug!(process, "process finished");
                state.finished.insert(process, *report);
                Response::Ack
            }
            Request::AggregatedNonprimaryReports => {
                let mut missing = Vec::new();
                let mut gone = Vec::new();
                for process in 2..=self.total {
                    if state.finished.contains_key(&process) {
                        continue;
                    }
                    match self.is_alive(&state, process, now) {
                        true => missing.push(process),
                        false => gone.push(process),
                    }
                }
                Response::AggregatedNonprimaryReports {
                    reports: state.finished.values().cloned().collect(),
                    missing,
                    gone,
                }
            }
            Request::Abort { process } => {
                if !state.aborted {
                    tracing::warn!(process, "suite aborted");
                }
                state.aborted = true;
                Response::Ack
            }
            Request::ShouldAbort => Response::ShouldAbort(state.aborted),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    fn report(process: usize) -> Box<Report> {
        let mut report = Report::new("suite", 1);
        report.parallel_process = process;
        Box::new(report)
    }

    #[test]
    fn before_suite_state_is_published_once_posted() {
        let server = SyncServer::new(2, Duration::from_secs(60));
        assert_eq!(
            server.handle(Request::BeforeSuiteState),
            Response::BeforeSuiteState {
                state: None,
                data: Vec::new(),
                primary_alive: true
            }
        );
        server.handle(Request::BeforeSuiteCompleted {
            state: SpecState::Passed,
            data: b"dsn".to_vec(),
        });
        assert_eq!(
            server.handle(Request::BeforeSuiteState),
            Response::BeforeSuiteState {
                state: Some(SpecState::Passed),
                data: b"dsn".to_vec(),
                primary_alive: true
            }
        );
    }

    #[test]
    fn finished_and_vanished_processes_count_as_done() {
        let server = SyncServer::new(3, Duration::from_millis(30));
        server.handle(Request::SuiteWillBegin {
            process: 2,
            report: report(2),
        });
        server.handle(Request::SuiteDidEnd {
            process: 2,
            report: report(2),
        });
        assert_eq!(
            server.handle(Request::HaveNonprimaryProcsFinished),
            Response::NonprimaryProcsFinished(false)
        );

        thread::sleep(Duration::from_millis(60));
        assert_eq!(
            server.handle(Request::HaveNonprimaryProcsFinished),
            Response::NonprimaryProcsFinished(true)
        );
        match server.handle(Request::AggregatedNonprimaryReports) {
            Response::AggregatedNonprimaryReports {
                reports,
                missing,
                gone,
            } => {
                assert_eq!(reports.len(), 1);
                assert!(missing.is_empty());
                assert_eq!(gone, vec![3]);
            }
            other => panic!("unexpected response {other:?}"),
        }
    }

    #[test]
    fn abort_is_sticky_and_identity_is_checked() {
        let server = SyncServer::new(2, Duration::from_secs(60));
        assert_eq!(server.handle(Request::ShouldAbort), Response::ShouldAbort(false));
        server.handle(Request::Abort { process: 2 });
        assert_eq!(server.handle(Request::ShouldAbort), Response::ShouldAbort(true));
        assert!(matches!(
            server.handle(Request::Heartbeat { process: 5 }),
            Response::Error(_)
        ));
        assert!(matches!(
            server.handle(Request::SuiteDidEnd {
                process: 1,
                report: report(1)
            }),
            Response::Error(_)
        ));
    }
}
