//! Running a single node body under supervision.

use std::{
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    time::{Instant, SystemTime},
};

use crossbeam_channel::{Receiver, select};

use crate::{
    capture::{CapturedPanic, NodeThreadGuard, SpecWriter, payload_as_string, take_last_panic},
    cleanup::CleanupScope,
    context::{CancelCause, ContextEvent, ContextParts, Done, SpecContext},
    interrupt::Deadline,
    node::{Body, BodyShape, CodeLocation, Node, NodeCall, NodeOutcome, NodeResult, NodeType},
    progress::{ProgressPoller, ProgressReport},
    report::{Failure, FailureNodeContext, Report, ReportEntry, SpecEvent, SpecEventKind, SpecReport, SpecState},
    runner::{Runner, interrupt_outcome},
    spec::Spec,
};

/// Everything a node needs besides the node itself.
pub(crate) struct NodeInput<'a> {
    pub node: &'a Arc<Node>,
    pub body: &'a Body,
    pub spec: Option<&'a Spec>,
    pub spec_text: &'a str,
    pub spec_started: Instant,
    pub spec_deadline: Option<Instant>,
    pub cleanup_scope: CleanupScope,
    pub writer: &'a SpecWriter,
    pub attempt: u32,
    pub spec_report: Option<SpecReport>,
    pub report: Option<Report>,
    pub payload: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
pub(crate) struct NodeRun {
    pub state: SpecState,
    pub failure: Option<Failure>,
    /// A failure the body produced after it was already timed out or interrupted.
    pub late_failure: Option<Failure>,
    pub payload: Option<Vec<u8>>,
}

impl NodeRun {
    pub(crate) fn passed(payload: Option<Vec<u8>>) -> Self {
        Self {
            state: SpecState::Passed,
            payload,
            ..Self::default()
        }
    }
}

type TaskOutput = Result<NodeResult, CapturedPanic>;

enum Wake {
    Finished(Option<TaskOutput>),
    Interrupt,
    Timer,
}

/// A state decided by the runner while the body is still running.
struct Preset {
    state: SpecState,
    message: String,
    progress: ProgressReport,
}

impl Runner<'_> {
    pub(crate) fn run_node(&mut self, input: NodeInput<'_>, report: &mut SpecReport) -> NodeRun {
        let node = Arc::clone(input.node);
        let attempt = input.attempt;
        let started = Instant::now();
        report.timeline.push(SpecEvent::new(
            attempt,
            SpecEventKind::NodeStarted {
                node_type: node.node_type,
                text: node.display_text().to_string(),
                location: node.location.clone(),
            },
        ));
        tracing::trace!(node = node.display_text(), node_type = %node.node_type, attempt, "running node");

        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let (ctx, canceller) = SpecContext::new(ContextParts {
            spec_text: input.spec_text.to_string(),
            nesting_level: node.nesting_level,
            cleanup_scope: input.cleanup_scope,
            cleanup: Arc::clone(&self.cleanup),
            events: events_tx,
            writer: input.writer.clone(),
        });

        let body = input.body.clone();
        let shape = body.shape();
        let task_ctx = ctx.clone();
        let spec_report = input.spec_report;
        let suite_report = input.report;
        let payload = input.payload;
        let spawned = self.tasks.spawn(
            format!("{} {}", node.node_type, node.display_text()),
            move || -> TaskOutput {
                let _guard = NodeThreadGuard::enter();
                let (done, done_rx) = match shape {
                    BodyShape::Done => {
                        let (done, rx) = Done::pair();
                        (Some(done), Some(rx))
                    }
                    _ => (None, None),
                };
                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    body.invoke(NodeCall {
                        ctx: &task_ctx,
                        done,
                        spec_report: spec_report.as_ref(),
                        report: suite_report.as_ref(),
                        payload: payload.as_deref(),
                    })
                }));
                match result {
                    Ok(result) => {
                        if let Some(rx) = done_rx {
                            let _ = rx.recv();
                        }
                        Ok(result)
                    }
                    Err(payload) => Err(take_last_panic().unwrap_or_else(|| CapturedPanic {
                        message: payload_as_string(payload.as_ref()),
                        location: None,
                    })),
                }
            },
        );
        let handle = match spawned {
            Ok(handle) => handle,
            Err(err) => {
                let failure = self.failure(
                    &node,
                    input.spec,
                    SpecState::Failed,
                    format!("could not start a thread for the node: {err}"),
                    None,
                    None,
                );
                return self.finish_node(&node, attempt, started, &events_rx, report, NodeRun {
                    state: SpecState::Failed,
                    failure: Some(failure),
                    ..NodeRun::default()
                });
            }
        };

        let grace = input
            .spec
            .and_then(|spec| spec.grace_period_for(&node))
            .or(node.decorations.grace_period)
            .unwrap_or(self.config.grace_period);
        let (after, interval) = match input.spec {
            Some(spec) => spec.poll_progress_for(&node),
            None => (
                node.decorations.poll_progress_after,
                node.decorations.poll_progress_interval,
            ),
        };
        let mut poller = ProgressPoller::new(
            started,
            after.or(self.config.poll_progress_after),
            interval.or(self.config.poll_progress_interval),
        );
        let mut deadline = match shape {
            BodyShape::Context => Deadline::resolve(
                node.decorations.node_timeout.map(|timeout| started + timeout),
                input.spec_deadline,
                self.interrupts.suite_deadline(),
            ),
            _ => None,
        };
        let mut status = self.interrupts.status();
        let mut preset: Option<Preset> = None;
        let mut grace_until: Option<Instant> = None;

        let snapshot = |runner: &Runner<'_>, message: String| {
            runner.progress_report(
                message,
                &node,
                input.spec_text,
                input.spec_started,
                started,
                ctx.current_step(),
            )
        };

        let output = loop {
            let timer = [deadline.map(|d| d.at), grace_until, poller.next_at()]
                .into_iter()
                .flatten()
                .min();
            let timer_rx: Receiver<Instant> = match timer {
                Some(at) => crossbeam_channel::at(at),
                None => crossbeam_channel::never(),
            };
            let interrupt_rx = status.channel().clone();

            let wake = select! {
                recv(handle.result) -> output => Wake::Finished(output.ok()),
                recv(interrupt_rx) -> _ => Wake::Interrupt,
                recv(timer_rx) -> _ => Wake::Timer,
            };

            match wake {
                Wake::Finished(output) => break output,
                Wake::Interrupt => {
                    status = self.interrupts.status();
                    if status.bail_out() {
                        self.tasks.abandon(handle.id);
                        let progress = snapshot(self, status.message());
                        preset.get_or_insert(Preset {
                            state: SpecState::Interrupted,
                            message: status.message(),
                            progress,
                        });
                        self.note_leak(&node, handle.id, attempt, report);
                        break None;
                    }
                    if preset.is_none() {
                        let (state, message) = interrupt_outcome(&status);
                        let progress = snapshot(self, message.clone());
                        self.emit_progress(&progress, attempt, report);
                        canceller.cancel(CancelCause::Interrupted);
                        deadline = None;
                        grace_until = Some(Instant::now() + grace);
                        preset = Some(Preset {
                            state,
                            message,
                            progress,
                        });
                    }
                }
                Wake::Timer => {
                    let now = Instant::now();
                    if grace_until.is_some_and(|until| until <= now) {
                        self.tasks.abandon(handle.id);
                        self.note_leak(&node, handle.id, attempt, report);
                        break None;
                    }
                    if let Some(hit) = deadline.filter(|d| d.at <= now) {
                        deadline = None;
                        let message = hit.scope.message().to_string();
                        let progress = snapshot(self, message.clone());
                        self.emit_progress(&progress, attempt, report);
                        canceller.cancel(CancelCause::Timeout(hit.scope));
                        grace_until = Some(now + grace);
                        preset = Some(Preset {
                            state: SpecState::TimedOut,
                            message,
                            progress,
                        });
                    }
                    if poller.tick(now) {
                        let progress = snapshot(
                            self,
                            format!("{} has been running for {:?}", node.display_text(), now - started),
                        );
                        self.emit_progress(&progress, attempt, report);
                    }
                }
            }
        };

        canceller.seal();
        let run = self.resolve(&node, input.spec, preset, output);
        self.finish_node(&node, attempt, started, &events_rx, report, run)
    }

    /// Combine what the body returned with what the runner decided while it ran.
    fn resolve(
        &self,
        node: &Node,
        spec: Option<&Spec>,
        preset: Option<Preset>,
        output: Option<TaskOutput>,
    ) -> NodeRun {
        let own = match output {
            None => None,
            Some(Ok(result)) => {
                let location = result.location;
                match result.outcome {
                    NodeOutcome::Passed => {
                        if preset.is_none() {
                            return NodeRun::passed(result.payload);
                        }
                        None
                    }
                    NodeOutcome::Failed(message) => Some((SpecState::Failed, message, location)),
                    NodeOutcome::Skipped(message) => Some((SpecState::Skipped, message, location)),
                    NodeOutcome::Aborted(message) => Some((SpecState::Aborted, message, location)),
                }
            }
            Some(Err(panicked)) => Some((SpecState::Panicked, panicked.message, panicked.location)),
        };

        match (preset, own) {
            (Some(preset), own) => NodeRun {
                state: preset.state,
                failure: Some(self.failure(
                    node,
                    spec,
                    preset.state,
                    preset.message,
                    None,
                    Some(preset.progress),
                )),
                late_failure: own.map(|(state, message, location)| {
                    self.failure(node, spec, state, message, location, None)
                }),
                payload: None,
            },
            (None, Some((state, message, location))) => NodeRun {
                state,
                failure: Some(self.failure(node, spec, state, message, location, None)),
                ..NodeRun::default()
            },
            (None, None) => {
                // The task vanished without producing a result.
                let message = String::from("the node's thread exited without reporting a result");
                NodeRun {
                    state: SpecState::Panicked,
                    failure: Some(self.failure(node, spec, SpecState::Panicked, message, None, None)),
                    ..NodeRun::default()
                }
            }
        }
    }

    fn finish_node(
        &mut self,
        node: &Node,
        attempt: u32,
        started: Instant,
        events: &Receiver<ContextEvent>,
        report: &mut SpecReport,
        run: NodeRun,
    ) -> NodeRun {
        for event in events.try_iter() {
            match event {
                ContextEvent::Step { text, location } => report
                    .timeline
                    .push(SpecEvent::new(attempt, SpecEventKind::Step { text, location })),
                ContextEvent::ReportEntry {
                    name,
                    value,
                    location,
                } => {
                    report.timeline.push(SpecEvent::new(
                        attempt,
                        SpecEventKind::ReportEntry { name: name.clone() },
                    ));
                    report.report_entries.push(ReportEntry {
                        name,
                        value,
                        location,
                        time: SystemTime::now(),
                    });
                }
            }
        }

        let duration = started.elapsed();
        report.timeline.push(SpecEvent::new(
            attempt,
            SpecEventKind::NodeEnded {
                node_type: node.node_type,
                text: node.display_text().to_string(),
                location: node.location.clone(),
                duration,
            },
        ));
        if run.state != SpecState::Passed {
            tracing::debug!(
                node = node.display_text(),
                node_type = %node.node_type,
                state = ?run.state,
                ?duration,
                "node did not pass"
            );
        }
        run
    }

    fn note_leak(&mut self, node: &Node, task: u64, attempt: u32, report: &mut SpecReport) {
        report.timeline.push(SpecEvent::new(
            attempt,
            SpecEventKind::TaskLeaked {
                task,
                node_type: node.node_type,
                text: node.display_text().to_string(),
            },
        ));
        let progress = ProgressReport {
            message: format!(
                "{} did not exit within its grace period and was abandoned",
                node.display_text()
            ),
            parallel_process: self.process,
            spec_text: report.full_text(),
            current_node_type: Some(node.node_type),
            current_node_text: node.display_text().to_string(),
            current_node_location: Some(node.location.clone()),
            live_tasks: self.tasks.live(),
            abandoned_tasks: self.tasks.abandoned(),
            ..ProgressReport::default()
        };
        self.emit_progress(&progress, attempt, report);
    }

    pub(crate) fn emit_progress(&mut self, progress: &ProgressReport, attempt: u32, report: &mut SpecReport) {
        report.timeline.push(SpecEvent::new(
            attempt,
            SpecEventKind::ProgressReport {
                message: progress.message.clone(),
            },
        ));
        report.progress_reports.push(progress.clone());
        self.reporter.emit_progress_report(progress);
    }

    fn progress_report(
        &self,
        message: String,
        node: &Node,
        spec_text: &str,
        spec_started: Instant,
        node_started: Instant,
        current_step: Option<String>,
    ) -> ProgressReport {
        ProgressReport {
            message,
            parallel_process: self.process,
            spec_text: spec_text.to_string(),
            current_node_type: Some(node.node_type),
            current_node_text: node.display_text().to_string(),
            current_node_location: Some(node.location.clone()),
            time_in_spec: spec_started.elapsed(),
            time_in_node: node_started.elapsed(),
            current_step,
            live_tasks: self.tasks.live(),
            abandoned_tasks: self.tasks.abandoned(),
        }
    }

    pub(crate) fn failure(
        &self,
        node: &Node,
        spec: Option<&Spec>,
        state: SpecState,
        message: String,
        location: Option<CodeLocation>,
        progress_report: Option<ProgressReport>,
    ) -> Failure {
        let node_context = if node.node_type == NodeType::It || node.node_type.is_suite_level() {
            FailureNodeContext::LeafNode
        } else if node.nesting_level == 0 {
            FailureNodeContext::TopLevel
        } else {
            let container_text = spec
                .and_then(|spec| {
                    spec.containers()
                        .find(|container| container.nesting_level + 1 == node.nesting_level)
                })
                .map(|container| container.text.clone())
                .unwrap_or_default();
            FailureNodeContext::InContainer { container_text }
        };
        Failure {
            state,
            message,
            location: location.unwrap_or_else(|| node.location.clone()),
            node_type: node.node_type,
            node_text: node.display_text().to_string(),
            node_location: node.location.clone(),
            node_context,
            nesting_level: node.nesting_level,
            progress_report,
        }
    }
}
