//! Task records and the set of tasks still being polled.

use crate::model::{StatusResponse, Task, TaskId};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug)]
struct Entry {
    task: Task,
    // Sequence number of the newest poll response applied to `task`.
    last_seq: u64,
}

/// Single source of truth mapping task id to its latest record.
///
/// Entries are never removed; they live for the whole session.
#[derive(Debug, Default)]
pub struct TaskStore {
    tasks: BTreeMap<TaskId, Entry>,
}

/// What happened to a poll response handed to [`TaskStore::apply_status`].
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    Applied(Task),
    /// A newer response for the same task was already applied.
    Stale { last_seq: u64 },
    UnknownTask,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or wholesale-replace the record for `task.task_id`.
    pub fn upsert(&mut self, task: Task) {
        match self.tasks.get_mut(&task.task_id) {
            Some(entry) => entry.task = task,
            None => {
                self.tasks
                    .insert(task.task_id.clone(), Entry { task, last_seq: 0 });
            }
        }
    }

    /// Apply a poll response issued with sequence number `seq`.
    ///
    /// Responses that arrive after a newer one for the same task are dropped, as is
    /// any non-terminal answer for a task that already finished. Neither a slow
    /// request nor a late one can roll a record back.
    pub fn apply_status(&mut self, seq: u64, update: StatusResponse) -> ApplyOutcome {
        let Some(entry) = self.tasks.get_mut(&update.task_id) else {
            return ApplyOutcome::UnknownTask;
        };
        // A finished task never goes back to queued or processing.
        let regresses = entry.task.status.is_terminal() && !update.status.is_terminal();
        if seq <= entry.last_seq || regresses {
            return ApplyOutcome::Stale {
                last_seq: entry.last_seq,
            };
        }
        entry.last_seq = seq;
        entry.task.replace_with(update);
        ApplyOutcome::Applied(entry.task.clone())
    }

    pub fn get(&self, task_id: &str) -> Option<&Task> {
        self.tasks.get(task_id).map(|e| &e.task)
    }

    /// Owned copy of every record, for presentation.
    pub fn get_all(&self) -> BTreeMap<TaskId, Task> {
        self.tasks
            .iter()
            .map(|(id, e)| (id.clone(), e.task.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }
}

/// Task ids that have not reached a terminal status.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ActiveSet {
    ids: BTreeSet<TaskId>,
}

impl ActiveSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, task_id: TaskId) -> bool {
        self.ids.insert(task_id)
    }

    /// Drop every id whose record is terminal (or missing) and return the removed ids.
    ///
    /// This is the only way ids leave the set.
    pub fn recompute(&mut self, store: &TaskStore) -> Vec<TaskId> {
        let mut removed = Vec::new();
        self.ids.retain(|id| {
            let keep = store
                .get(id)
                .is_some_and(|task| !task.status.is_terminal());
            if !keep {
                removed.push(id.clone());
            }
            keep
        });
        removed
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaskId> {
        self.ids.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[cfg(test)]
impl ActiveSet {
    pub(crate) fn contains(&self, task_id: &str) -> bool {
        self.ids.contains(task_id)
    }
}
