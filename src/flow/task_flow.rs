// src/flow/task_flow.rs

//! Ordered list of tasks with per-task enable state.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::flow::task::{ParamValue, TaskId, TaskSpec};

/// Kind that opens a game session.
pub const SESSION_START_KIND: &str = "startup";
/// Kind that closes a game session.
pub const SESSION_END_KIND: &str = "closedown";
/// Parameter shared by both session kinds (client/channel identifier).
pub const SESSION_PARAM: &str = "client_type";

/// An ordered sequence of [`TaskSpec`]s.
///
/// Insertion order is execution order. Disabled tasks stay in place and are
/// skipped at run time. Kinds may repeat.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskFlow {
    tasks: Vec<TaskSpec>,
}

impl TaskFlow {
    pub fn new(tasks: Vec<TaskSpec>) -> Self {
        Self { tasks }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn tasks(&self) -> &[TaskSpec] {
        &self.tasks
    }

    pub fn at(&self, index: usize) -> Option<&TaskSpec> {
        self.tasks.get(index)
    }

    pub fn get(&self, id: &TaskId) -> Option<&TaskSpec> {
        self.tasks.iter().find(|t| t.id() == id)
    }

    pub fn position(&self, id: &TaskId) -> Option<usize> {
        self.tasks.iter().position(|t| t.id() == id)
    }

    pub fn push(&mut self, task: TaskSpec) {
        self.tasks.push(task);
    }

    /// Insert at `index`, clamped to the end of the list.
    pub fn insert(&mut self, index: usize, task: TaskSpec) {
        let index = index.min(self.tasks.len());
        self.tasks.insert(index, task);
    }

    pub fn remove(&mut self, id: &TaskId) -> Option<TaskSpec> {
        let idx = self.position(id)?;
        Some(self.tasks.remove(idx))
    }

    /// Move a task to a new position. The task keeps its id and content.
    pub fn move_to(&mut self, id: &TaskId, index: usize) -> bool {
        let Some(from) = self.position(id) else {
            return false;
        };
        let task = self.tasks.remove(from);
        let index = index.min(self.tasks.len());
        self.tasks.insert(index, task);
        true
    }

    pub fn set_enabled(&mut self, id: &TaskId, enabled: bool) -> bool {
        match self.tasks.iter_mut().find(|t| t.id() == id) {
            Some(task) => {
                task.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Set one parameter on a task.
    ///
    /// Editing the session parameter on a `startup` or `closedown` task also
    /// rewrites it on every task of the complementary kind, so the session is
    /// always closed on the client it was opened on.
    pub fn set_param(&mut self, id: &TaskId, name: &str, value: ParamValue) -> bool {
        let Some(task) = self.tasks.iter_mut().find(|t| t.id() == id) else {
            return false;
        };
        task.params.insert(name.to_string(), value.clone());

        if name != SESSION_PARAM {
            return true;
        }

        let complement = match task.kind() {
            SESSION_START_KIND => SESSION_END_KIND,
            SESSION_END_KIND => SESSION_START_KIND,
            _ => return true,
        };

        for other in self.tasks.iter_mut().filter(|t| t.kind() == complement) {
            debug!(
                task = %other.id(),
                kind = complement,
                "syncing session parameter from edited task"
            );
            other.params.insert(name.to_string(), value.clone());
        }
        true
    }

    pub fn enabled_tasks(&self) -> impl Iterator<Item = &TaskSpec> {
        self.tasks.iter().filter(|t| t.enabled)
    }

    /// Index of the first enabled task.
    pub fn first_enabled(&self) -> Option<usize> {
        self.tasks.iter().position(|t| t.enabled)
    }

    /// Index of the next enabled task strictly after `cursor`.
    pub fn next_enabled_after(&self, cursor: usize) -> Option<usize> {
        self.tasks
            .iter()
            .enumerate()
            .skip(cursor.saturating_add(1))
            .find(|(_, t)| t.enabled)
            .map(|(i, _)| i)
    }
}

impl FromIterator<TaskSpec> for TaskFlow {
    fn from_iter<I: IntoIterator<Item = TaskSpec>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
