//! Supervised execution of node bodies.
//!
//! Every body runs on its own named thread. The engine cannot kill a thread,
//! so a body that ignores cancellation past its grace period is marked
//! [`TaskState::Abandoned`] and the runner moves on without it. The record
//! stays visible in progress reports until the thread eventually returns.

use std::{
    io,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::Receiver;
use serde::{Deserialize, Serialize};

use crate::util::lock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Running,
    Finished,
    /// The engine stopped waiting for the task; it leaked.
    Abandoned,
}

/// A task as seen from a progress report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub id: u64,
    pub name: String,
    pub state: TaskState,
    pub running_for: Duration,
}

#[derive(Debug)]
struct TaskRecord {
    id: u64,
    name: String,
    state: TaskState,
    started: Instant,
}

#[derive(Debug, Default)]
pub(crate) struct TaskSupervisor {
    tasks: Arc<Mutex<Vec<TaskRecord>>>,
    next_id: AtomicU64,
}

/// The runner side of a spawned task.
#[derive(Debug)]
pub(crate) struct TaskHandle<T> {
    pub id: u64,
    pub result: Receiver<T>,
}

impl TaskSupervisor {
    pub fn spawn<F, T>(&self, name: impl Into<String>, f: F) -> io::Result<TaskHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let name = name.into();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = crossbeam_channel::bounded(1);

        {
            let mut tasks = lock(&self.tasks);
            tasks.retain(|task| task.state != TaskState::Finished);
            tasks.push(TaskRecord {
                id,
                name: name.clone(),
                state: TaskState::Running,
                started: Instant::now(),
            });
        }

        let tasks = Arc::clone(&self.tasks);
        let spawned = thread::Builder::new()
            .name(format!("kispec-{id}"))
            .spawn(move || {
                let out = f();
                set_state(&tasks, id, TaskState::Finished);
                // The runner may have given up on us already.
                let _ = tx.send(out);
            });

        if let Err(err) = spawned {
            lock(&self.tasks).retain(|task| task.id != id);
            return Err(err);
        }

        tracing::trace!(task = id, %name, "spawned task");
        Ok(TaskHandle { id, result: rx })
    }

    pub fn abandon(&self, id: u64) {
        let mut tasks = lock(&self.tasks);
        if let Some(task) = tasks
            .iter_mut()
            .find(|task| task.id == id && task.state == TaskState::Running)
        {
            task.state = TaskState::Abandoned;
            tracing::warn!(task = id, name = %task.name, "abandoned task that did not exit within its grace period");
        }
    }

    pub fn live(&self) -> Vec<TaskSummary> {
        self.summaries(TaskState::Running)
    }

    pub fn abandoned(&self) -> Vec<TaskSummary> {
        self.summaries(TaskState::Abandoned)
    }

    fn summaries(&self, state: TaskState) -> Vec<TaskSummary> {
        lock(&self.tasks)
            .iter()
            .filter(|task| task.state == state)
            .map(|task| TaskSummary {
                id: task.id,
                name: task.name.clone(),
                state: task.state,
                running_for: task.started.elapsed(),
            })
            .collect()
    }
}

fn set_state(tasks: &Mutex<Vec<TaskRecord>>, id: u64, state: TaskState) {
    if let Some(task) = lock(tasks).iter_mut().find(|task| task.id == id) {
        task.state = state;
    }
}
