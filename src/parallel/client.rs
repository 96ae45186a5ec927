use std::{
    sync::Arc,
    thread,
    time::Duration,
};

use crossbeam_channel::{RecvTimeoutError, Sender};

use crate::{
    error::SyncError,
    interrupt::{InterruptHandler, InterruptStatus},
    parallel::{
        protocol::{Request, Response},
        server::SyncServer,
    },
    report::{Report, SpecState},
};

/// Outcome of waiting for the other processes' reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatedReports {
    pub reports: Vec<Report>,
    /// Processes that vanished without reporting.
    pub gone: Vec<usize>,
}

fn unexpected(endpoint: &'static str, response: Response) -> SyncError {
    match response {
        Response::Error(message) => SyncError::Server(message),
        other => SyncError::UnexpectedResponse {
            endpoint,
            response: format!("{other:?}"),
        },
    }
}

/// Sleep one poll interval, waking early on an interrupt. Fails once
/// `give_up` holds for the current interrupt status.
fn pause<C: SyncClient + ?Sized>(
    client: &C,
    interrupts: &InterruptHandler,
    give_up: fn(&InterruptStatus) -> bool,
) -> Result<(), SyncError> {
    let status = interrupts.status();
    if give_up(&status) {
        return Err(SyncError::Interrupted);
    }
    let _ = status.channel().recv_timeout(client.poll_interval());
    if give_up(&interrupts.status()) {
        return Err(SyncError::Interrupted);
    }
    Ok(())
}

/// A connection to the [`SyncServer`].
///
/// The transport only implements [`call`](SyncClient::call); every endpoint
/// and the blocking waits are provided on top of it.
pub trait SyncClient: Send + Sync {
    fn call(&self, request: Request) -> Result<Response, SyncError>;

    /// How long the blocking helpers sleep between polls.
    fn poll_interval(&self) -> Duration {
        Duration::from_millis(50)
    }

    fn ack(&self, request: Request) -> Result<(), SyncError> {
        let endpoint = request.endpoint();
        match self.call(request)? {
            Response::Ack => Ok(()),
            other => Err(unexpected(endpoint, other)),
        }
    }

    fn post_suite_will_begin(&self, process: usize, report: &Report) -> Result<(), SyncError> {
        self.ack(Request::SuiteWillBegin {
            process,
            report: Box::new(report.clone()),
        })
    }

    fn heartbeat(&self, process: usize) -> Result<(), SyncError> {
        self.ack(Request::Heartbeat { process })
    }

    fn post_before_suite_completed(&self, state: SpecState, data: Vec<u8>) -> Result<(), SyncError> {
        self.ack(Request::BeforeSuiteCompleted { state, data })
    }

    fn post_report_before_suite_completed(&self, state: SpecState) -> Result<(), SyncError> {
        self.ack(Request::ReportBeforeSuiteCompleted { state })
    }

    fn post_suite_did_end(&self, process: usize, report: &Report) -> Result<(), SyncError> {
        self.ack(Request::SuiteDidEnd {
            process,
            report: Box::new(report.clone()),
        })
    }

    fn post_abort(&self, process: usize) -> Result<(), SyncError> {
        self.ack(Request::Abort { process })
    }

    fn should_abort(&self) -> Result<bool, SyncError> {
        match self.call(Request::ShouldAbort)? {
            Response::ShouldAbort(abort) => Ok(abort),
            other => Err(unexpected("ShouldAbort", other)),
        }
    }

    /// Wait for process #1's BeforeSuite result and return its payload.
    ///
    /// Setup waits give up on the first interrupt.
    fn block_until_before_suite_data(&self, interrupts: &InterruptHandler) -> Result<Vec<u8>, SyncError> {
        loop {
            match self.call(Request::BeforeSuiteState)? {
                Response::BeforeSuiteState {
                    state: Some(SpecState::Passed),
                    data,
                    ..
                } => return Ok(data),
                Response::BeforeSuiteState { state: Some(_), .. } => {
                    return Err(SyncError::BeforeSuiteFailed);
                }
                Response::BeforeSuiteState {
                    primary_alive: false,
                    ..
                } => return Err(SyncError::PrimaryProcessGone),
                Response::BeforeSuiteState { .. } => pause(self, interrupts, InterruptStatus::interrupted)?,
                other => return Err(unexpected("BeforeSuiteState", other)),
            }
        }
    }

    fn block_until_report_before_suite_completed(&self, interrupts: &InterruptHandler) -> Result<(), SyncError> {
        loop {
            match self.call(Request::ReportBeforeSuiteState)? {
                Response::ReportBeforeSuiteState {
                    state: Some(SpecState::Passed),
                    ..
                } => return Ok(()),
                Response::ReportBeforeSuiteState { state: Some(_), .. } => {
                    return Err(SyncError::ReportBeforeSuiteFailed);
                }
                Response::ReportBeforeSuiteState {
                    primary_alive: false,
                    ..
                } => return Err(SyncError::PrimaryProcessGone),
                Response::ReportBeforeSuiteState { .. } => {
                    pause(self, interrupts, InterruptStatus::interrupted)?
                }
                other => return Err(unexpected("ReportBeforeSuiteState", other)),
            }
        }
    }

    /// Teardown and reporting waits keep going until the run bails out.
    fn block_until_nonprimary_procs_have_finished(&self, interrupts: &InterruptHandler) -> Result<(), SyncError> {
        loop {
            match self.call(Request::HaveNonprimaryProcsFinished)? {
                Response::NonprimaryProcsFinished(true) => return Ok(()),
                Response::NonprimaryProcsFinished(false) => pause(self, interrupts, InterruptStatus::bail_out)?,
                other => return Err(unexpected("HaveNonprimaryProcsFinished", other)),
            }
        }
    }

    fn block_until_aggregated_nonprimary_reports(
        &self,
        interrupts: &InterruptHandler,
    ) -> Result<AggregatedReports, SyncError> {
        loop {
            match self.call(Request::AggregatedNonprimaryReports)? {
                Response::AggregatedNonprimaryReports {
                    reports,
                    missing,
                    gone,
                } if missing.is_empty() => return Ok(AggregatedReports { reports, gone }),
                Response::AggregatedNonprimaryReports { .. } => {
                    pause(self, interrupts, InterruptStatus::bail_out)?
                }
                other => return Err(unexpected("AggregatedNonprimaryReports", other)),
            }
        }
    }
}

/// Talks to a [`SyncServer`] living in the same process.
#[derive(Debug, Clone)]
pub struct LocalClient {
    server: Arc<SyncServer>,
    poll_interval: Duration,
}

impl LocalClient {
    pub fn new(server: Arc<SyncServer>) -> Self {
        Self {
            server,
            poll_interval: Duration::from_millis(10),
        }
    }

    pub fn with_poll_interval(self, poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            ..self
        }
    }
}

impl SyncClient for LocalClient {
    fn call(&self, request: Request) -> Result<Response, SyncError> {
        Ok(self.server.handle(request))
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

/// Sends heartbeats on a background thread until dropped.
#[derive(Debug)]
pub struct HeartbeatGuard {
    _stop: Sender<()>,
}

impl HeartbeatGuard {
    pub fn start(client: Arc<dyn SyncClient>, process: usize, interval: Duration) -> Self {
        let (stop, stopped) = crossbeam_channel::bounded::<()>(0);
        thread::spawn(move || {
            loop {
                if let Err(err) = client.heartbeat(process) {
                    tracing::debug!(process, error = %err, label = err.as_label(), "heartbeat failed");
                }
                match stopped.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    _ => return,
                }
            }
        });
        Self { _stop: stop }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interrupt::InterruptCause;

    fn pair(total: usize) -> (Arc<SyncServer>, LocalClient) {
        let server = Arc::new(SyncServer::new(total, Duration::from_secs(60)));
        let client = LocalClient::new(Arc::clone(&server)).with_poll_interval(Duration::from_millis(1));
        (server, client)
    }

    #[test]
    fn before_suite_data_reaches_waiting_processes() {
        let (server, primary) = pair(2);
        let secondary = LocalClient::new(server);

        let waiter = thread::spawn(move || secondary.block_until_before_suite_data(&InterruptHandler::new()));
        thread::sleep(Duration::from_millis(20));
        primary
            .post_before_suite_completed(SpecState::Passed, b"payload".to_vec())
            .unwrap();
        assert_eq!(waiter.join().unwrap().unwrap(), b"payload".to_vec());
    }

    #[test]
    fn failed_or_vanished_primary_is_reported() {
        let interrupts = InterruptHandler::new();
        let (_, client) = pair(2);
        client
            .post_before_suite_completed(SpecState::Failed, Vec::new())
            .unwrap();
        assert!(matches!(
            client.block_until_before_suite_data(&interrupts),
            Err(SyncError::BeforeSuiteFailed)
        ));

        let server = Arc::new(SyncServer::new(2, Duration::from_millis(10)));
        let client = LocalClient::new(server).with_poll_interval(Duration::from_millis(1));
        assert!(matches!(
            client.block_until_report_before_suite_completed(&interrupts),
            Err(SyncError::PrimaryProcessGone)
        ));
    }

    #[test]
    fn an_interrupt_ends_the_wait_for_a_hung_primary() {
        let (server, client) = pair(2);
        let interrupts = InterruptHandler::new();
        let waiting = Arc::clone(&interrupts);
        let waiter = thread::spawn(move || client.block_until_before_suite_data(&waiting));

        thread::sleep(Duration::from_millis(20));
        server.handle(Request::Heartbeat { process: 1 });
        interrupts.interrupt(InterruptCause::Signal);

        assert!(matches!(waiter.join().unwrap(), Err(SyncError::Interrupted)));
    }

    #[test]
    fn teardown_waits_outlast_the_first_interrupt() {
        let (_server, client) = pair(2);
        let interrupts = InterruptHandler::new();
        interrupts.interrupt(InterruptCause::Signal);
        let waiting = Arc::clone(&interrupts);
        let waiter = thread::spawn(move || client.block_until_nonprimary_procs_have_finished(&waiting));

        thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());
        interrupts.interrupt(InterruptCause::Signal);
        interrupts.interrupt(InterruptCause::Signal);

        assert!(matches!(waiter.join().unwrap(), Err(SyncError::Interrupted)));
    }

    #[test]
    fn heartbeats_keep_a_process_alive() {
        let server = Arc::new(SyncServer::new(2, Duration::from_millis(40)));
        let client: Arc<dyn SyncClient> = Arc::new(LocalClient::new(Arc::clone(&server)));
        let guard = HeartbeatGuard::start(Arc::clone(&client), 2, Duration::from_millis(5));
        thread::sleep(Duration::from_millis(80));
        assert_eq!(
            server.handle(Request::HaveNonprimaryProcsFinished),
            Response::NonprimaryProcsFinished(false)
        );
        drop(guard);
        thread::sleep(Duration::from_millis(80));
        assert_eq!(
            server.handle(Request::HaveNonprimaryProcsFinished),
            Response::NonprimaryProcsFinished(true)
        );
    }
}
