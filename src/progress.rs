use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::{
    node::{CodeLocation, NodeType},
    task::TaskSummary,
};

/// A snapshot of what the process is doing, taken on interrupts, timeouts,
/// leaks and poll-progress ticks.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProgressReport {
    pub message: String,
    pub parallel_process: usize,
    pub spec_text: String,
    pub current_node_type: Option<NodeType>,
    pub current_node_text: String,
    pub current_node_location: Option<CodeLocation>,
    pub time_in_spec: Duration,
    pub time_in_node: Duration,
    pub current_step: Option<String>,
    pub live_tasks: Vec<TaskSummary>,
    pub abandoned_tasks: Vec<TaskSummary>,
}

/// Schedules the diagnostic poll-progress reports of one node.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ProgressPoller {
    interval: Option<Duration>,
    next: Option<Instant>,
}

impl ProgressPoller {
    pub fn new(started: Instant, after: Option<Duration>, interval: Option<Duration>) -> Self {
        Self {
            interval: interval.or(after),
            next: after.map(|after| started + after),
        }
    }

    pub fn next_at(&self) -> Option<Instant> {
        self.next
    }

    /// Advance past `now`, returning whether a report is due.
    pub fn tick(&mut self, now: Instant) -> bool {
        match self.next {
            Some(next) if next <= now => {
                self.next = self.interval.map(|interval| now + interval);
                true
            }
            _ => false,
        }
    }
}
