//! Task records and the lifecycle state machine.
//!
//! Every mutation of a task's status or history happens under one store-wide
//! mutex. The guard is scoped to each method, so it is released on every exit
//! path; callers never hold it across retrieval or persistence work.
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

use triage_core::types::{Message, Task, TaskState};
use triage_core::{Error, Result};

/// History length recorded when a run starts; a failed run rolls back to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunCheckpoint {
    history_len: usize,
}

#[derive(Default)]
pub struct TaskStore {
    tasks: Mutex<HashMap<String, Task>>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Existing task for `id`, or a new one in `Submitted`. Concurrent callers
    /// for the same id all observe the same task.
    pub fn upsert_task(&self, id: &str) -> Task {
        self.lock()
            .entry(id.to_string())
            .or_insert_with(|| {
                debug!(task_id = id, "task created");
                Task::submitted(id)
            })
            .clone()
    }

    pub fn get(&self, id: &str) -> Option<Task> {
        self.lock().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `Submitted -> Working`, recording the request message.
    pub fn begin_run(&self, id: &str, request: Message) -> Result<RunCheckpoint> {
        let mut tasks = self.lock();
        let task = tasks.get_mut(id).ok_or_else(|| Error::NotFound(format!("task {id}")))?;
        transition(task, TaskState::Working)?;
        task.history.push(request);
        Ok(RunCheckpoint { history_len: task.history.len() })
    }

    /// Append to the history of a running task.
    pub fn append_message(&self, id: &str, message: Message) -> Result<()> {
        let mut tasks = self.lock();
        let task = tasks.get_mut(id).ok_or_else(|| Error::NotFound(format!("task {id}")))?;
        if task.status != TaskState::Working {
            return Err(Error::InvalidTransition { task_id: id.to_string(), from: task.status, to: TaskState::Working });
        }
        task.history.push(message);
        task.updated_at = Utc::now();
        Ok(())
    }

    /// `Working -> Completed` with the result message.
    pub fn complete(&self, id: &str, result: Message) -> Result<Task> {
        let mut tasks = self.lock();
        let task = tasks.get_mut(id).ok_or_else(|| Error::NotFound(format!("task {id}")))?;
        transition(task, TaskState::Completed)?;
        task.history.push(result);
        Ok(task.clone())
    }

    /// `Working -> Failed`. Messages appended after `checkpoint` are dropped
    /// before the failure is recorded.
    pub fn fail(&self, id: &str, checkpoint: RunCheckpoint, reason: &str) -> Result<Task> {
        let mut tasks = self.lock();
        let task = tasks.get_mut(id).ok_or_else(|| Error::NotFound(format!("task {id}")))?;
        transition(task, TaskState::Failed)?;
        task.history.truncate(checkpoint.history_len);
        task.history.push(Message::agent(format!("Triage failed: {reason}")));
        task.error = Some(reason.to_string());
        Ok(task.clone())
    }

    pub fn counts_by_state(&self) -> BTreeMap<TaskState, usize> {
        let mut counts = BTreeMap::new();
        for task in self.lock().values() {
            *counts.entry(task.status).or_insert(0) += 1;
        }
        counts
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Task>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn transition(task: &mut Task, next: TaskState) -> Result<()> {
    if !task.status.can_transition_to(next) {
        return Err(Error::InvalidTransition { task_id: task.id.clone(), from: task.status, to: next });
    }
    debug!(task_id = %task.id, from = %task.status, to = %next, "task transition");
    task.status = next;
    task.updated_at = Utc::now();
    Ok(())
}
