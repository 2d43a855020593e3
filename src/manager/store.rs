use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use log::{error, warn};

use crate::models::task::{Task, TaskParams, TaskStatus};

/// Arrival-ordered queue of pending task ids plus the history table that owns
/// every task record. Callers serialize access through one lock.
#[derive(Debug, Default)]
pub struct TaskStore {
    queue: VecDeque<u64>,
    history: HashMap<u64, Task>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the task to the queue and records it as Waiting at the back.
    pub fn push(&mut self, id: u64, params: TaskParams, now: DateTime<Utc>) {
        self.queue.push_back(id);
        let mut task = Task::new(id, params, now);
        task.queue_position = self.queue.len();
        self.history.insert(id, task);
    }

    pub fn dequeue(&mut self, id: u64) {
        if let Some(index) = self.queue.iter().position(|queued| *queued == id) {
            self.queue.remove(index);
        }
        if let Some(task) = self.history.get_mut(&id) {
            task.queue_position = 0;
        }
    }

    pub fn sync_queue_position(&mut self) {
        let mut position = 1;
        for id in &self.queue {
            match self.history.get_mut(id) {
                Some(task) => {
                    task.queue_position = position;
                    position += 1;
                }
                None => error!("Task '{}' is queued but missing from history.", id),
            }
        }
    }

    pub fn remove_history(&mut self, id: u64) -> Option<Task> {
        self.history.remove(&id)
    }

    /// Marks the task Processing and hands back its parameters.
    pub fn start(&mut self, id: u64, now: DateTime<Utc>) -> Option<TaskParams> {
        let task = self.history.get_mut(&id)?;
        if !task.start(now) {
            warn!("Task '{}' can't start from status {:?}.", id, task.status);
            return None;
        }
        Some(task.params.clone())
    }

    pub fn progress(&mut self, id: u64, iteration: u64) {
        if let Some(task) = self.history.get_mut(&id) {
            if task.status == TaskStatus::Processing {
                task.current_iteration = iteration;
            }
        }
    }

    /// Marks the task Done, removes it from the queue and resyncs positions.
    pub fn finish(&mut self, id: u64, now: DateTime<Utc>, outcome: Result<f64, String>) -> bool {
        let finished = match self.history.get_mut(&id) {
            Some(task) => task.finish(now, outcome),
            None => false,
        };
        if !finished {
            warn!("Task '{}' can't be finished.", id);
        }
        self.dequeue(id);
        self.sync_queue_position();
        finished
    }

    pub fn get(&self, id: u64) -> Option<&Task> {
        self.history.get(&id)
    }

    pub fn queue_ids(&self) -> Vec<u64> {
        self.queue.iter().copied().collect()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Pending tasks by queue position, then finished tasks by enqueue time.
    pub fn snapshot(&self) -> Vec<Task> {
        let (mut done, mut pending): (Vec<Task>, Vec<Task>) = self
            .history
            .values()
            .cloned()
            .partition(|task| task.status == TaskStatus::Done);

        pending.sort_by_key(|task| (task.queue_position, task.id));
        done.sort_by_key(|task| (task.enqueue_time, task.id));
        pending.extend(done);
        pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> TaskParams {
        TaskParams::new(10, 1.25, 2.11, 0.1, 50.0)
    }

    fn store_with(ids: &[u64]) -> TaskStore {
        let mut store = TaskStore::new();
        for id in ids {
            store.push(*id, params(), Utc::now());
        }
        store
    }

    fn positions(store: &TaskStore) -> Vec<usize> {
        store
            .queue_ids()
            .iter()
            .map(|id| store.get(*id).unwrap().queue_position)
            .collect()
    }

    #[test]
    fn push_sets_waiting_and_position() {
        let store = store_with(&[1, 2, 3]);
        let task = store.get(3).unwrap();
        assert_eq!(task.status, TaskStatus::Waiting);
        assert_eq!(task.queue_position, 3);
        assert_eq!(store.queue_len(), 3);
    }

    #[test]
    fn dequeue_removes_only_matching_entry() {
        let mut store = store_with(&[1, 2, 3]);
        store.dequeue(2);

        assert_eq!(store.queue_ids(), vec![1, 3]);
        assert_eq!(store.get(2).unwrap().queue_position, 0);
        assert_eq!(store.history_len(), 3);
    }

    #[test]
    fn dequeue_of_absent_id_is_a_noop() {
        let mut store = store_with(&[1]);
        store.dequeue(42);
        assert_eq!(store.queue_ids(), vec![1]);
    }

    #[test]
    fn sync_yields_dense_positions_after_any_removal() {
        for removed in 1..=5 {
            let mut store = store_with(&[1, 2, 3, 4, 5]);
            store.dequeue(removed);
            store.sync_queue_position();
            assert_eq!(positions(&store), vec![1, 2, 3, 4]);
        }
    }

    #[test]
    fn sync_skips_ids_missing_from_history() {
        let mut store = store_with(&[1, 2, 3]);
        store.remove_history(1);
        store.sync_queue_position();

        assert_eq!(store.get(2).unwrap().queue_position, 1);
        assert_eq!(store.get(3).unwrap().queue_position, 2);
    }

    #[test]
    fn remove_history_is_idempotent() {
        let mut store = store_with(&[1]);
        store.dequeue(1);
        assert!(store.remove_history(1).is_some());
        assert!(store.remove_history(1).is_none());
        assert!(store.get(1).is_none());
    }

    #[test]
    fn finish_dequeues_and_resyncs() {
        let mut store = store_with(&[1, 2, 3]);
        let now = Utc::now();
        assert!(store.start(2, now).is_some());
        store.progress(2, 5);
        assert_eq!(store.get(2).unwrap().current_iteration, 5);

        assert!(store.finish(2, now, Ok(3.0)));

        let task = store.get(2).unwrap();
        assert_eq!(task.status, TaskStatus::Done);
        assert_eq!(task.queue_position, 0);
        assert_eq!(task.current_iteration, 0);
        assert_eq!(store.queue_ids(), vec![1, 3]);
        assert_eq!(positions(&store), vec![1, 2]);
    }

    #[test]
    fn start_refuses_non_waiting_tasks() {
        let mut store = store_with(&[1]);
        let now = Utc::now();
        assert!(store.start(1, now).is_some());
        assert!(store.start(1, now).is_none());
        assert!(store.start(99, now).is_none());
    }

    #[test]
    fn snapshot_orders_pending_then_done() {
        let mut store = store_with(&[1, 2, 3, 4]);
        let now = Utc::now();
        for id in [3, 1] {
            store.start(id, now);
            store.finish(id, now, Ok(0.0));
        }

        let ids: Vec<u64> = store.snapshot().iter().map(|task| task.id).collect();
        assert_eq!(ids, vec![2, 4, 1, 3]);
    }
}
