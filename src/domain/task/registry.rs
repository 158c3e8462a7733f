//! Task Registry
//!
//! In-memory store of tasks plus an ordered index of pending tasks.
//! The registry itself is not synchronized; the scheduler owns it behind a
//! single mutex so every mutation happens in one critical section.

use super::model::{ReadyKey, TaskId, TaskNode, TaskOutcome, TaskStatus, WorkDescriptor};
use crate::domain::priority::Priority;
use crate::error::{TaskError, TaskResult};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

/// Task counts by status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskStatistics {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

impl TaskStatistics {
    /// Tasks that reached a terminal state
    #[must_use]
    pub fn finished(&self) -> usize {
        self.completed + self.failed
    }
}

/// Why a pending task can never become ready
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StuckTask {
    pub task_id: TaskId,
    pub reason: TaskError,
}

/// Task registry
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: HashMap<TaskId, TaskNode>,
    /// Every pending task, ordered by (priority, submission order)
    pending: BTreeSet<ReadyKey>,
    running: HashSet<TaskId>,
    next_sequence: u64,
}

impl TaskRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pending task. Dependencies that already finished are dropped.
    pub fn insert(
        &mut self,
        descriptor: WorkDescriptor,
        priority: Priority,
        dependencies: impl IntoIterator<Item = TaskId>,
    ) -> TaskId {
        let sequence = self.next_sequence();
        let task = TaskNode::new(descriptor, priority, sequence);
        self.insert_node(task, dependencies)
    }

    /// Add a pending task under a caller-chosen id.
    ///
    /// Dependencies may name ids that are only inserted later, which is the
    /// only way mutually dependent tasks can be expressed.
    pub fn insert_with_id(
        &mut self,
        id: TaskId,
        descriptor: WorkDescriptor,
        priority: Priority,
        dependencies: impl IntoIterator<Item = TaskId>,
    ) -> TaskResult<TaskId> {
        if self.tasks.contains_key(&id) {
            return Err(TaskError::AlreadyExists { id });
        }
        let sequence = self.next_sequence();
        let task = TaskNode::new(descriptor, priority, sequence).with_id(id);
        Ok(self.insert_node(task, dependencies))
    }

    fn next_sequence(&mut self) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        sequence
    }

    fn insert_node(
        &mut self,
        task: TaskNode,
        dependencies: impl IntoIterator<Item = TaskId>,
    ) -> TaskId {
        let dependencies = dependencies.into_iter().filter(|dep| {
            !self
                .tasks
                .get(dep)
                .is_some_and(|task| task.status.is_terminal())
        });
        let task = task.with_dependencies(dependencies);
        let id = task.id;

        self.pending.insert(task.ready_key());
        self.tasks.insert(id, task);
        id
    }

    /// Get a reference to a task
    #[must_use]
    pub fn get(&self, task_id: &TaskId) -> Option<&TaskNode> {
        self.tasks.get(task_id)
    }

    #[must_use]
    pub fn contains(&self, task_id: &TaskId) -> bool {
        self.tasks.contains_key(task_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    /// No task pending or running
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.running.is_empty()
    }

    /// Pick the most urgent dispatchable task and mark it running.
    ///
    /// Returns `None` when `max_concurrent` tasks are already running or no
    /// pending task has an empty dependency set.
    pub fn next_ready(&mut self, max_concurrent: usize) -> Option<TaskNode> {
        if self.running.len() >= max_concurrent {
            return None;
        }

        let key = self
            .pending
            .iter()
            .find(|key| self.tasks.get(&key.id).is_some_and(TaskNode::is_ready))
            .copied()?;

        self.pending.remove(&key);
        self.running.insert(key.id);
        let task = self.tasks.get_mut(&key.id)?;
        task.start();
        Some(task.clone())
    }

    /// Record the outcome of a running task and release its dependents.
    pub fn complete(&mut self, task_id: TaskId, outcome: TaskOutcome) -> TaskResult<TaskStatus> {
        let task = self
            .tasks
            .get_mut(&task_id)
            .ok_or(TaskError::NotFound { id: task_id })?;

        if task.status != TaskStatus::Running {
            return Err(TaskError::InvalidStateTransition {
                id: task_id,
                from: task.status.to_string(),
                to: terminal_name(&outcome).to_string(),
            });
        }

        task.complete(outcome);
        let status = task.status;
        self.running.remove(&task_id);
        self.release_dependents(task_id);
        Ok(status)
    }

    /// Fail a task that was never dispatched and release its dependents.
    pub fn fail_pending(&mut self, task_id: TaskId, outcome: TaskOutcome) -> TaskResult<()> {
        let task = self
            .tasks
            .get_mut(&task_id)
            .ok_or(TaskError::NotFound { id: task_id })?;

        if task.status != TaskStatus::Pending {
            return Err(TaskError::InvalidStateTransition {
                id: task_id,
                from: task.status.to_string(),
                to: TaskStatus::Failed.to_string(),
            });
        }

        self.pending.remove(&task.ready_key());
        task.complete(outcome);
        self.release_dependents(task_id);
        Ok(())
    }

    /// Remove `task_id` from every pending task's dependency set
    fn release_dependents(&mut self, task_id: TaskId) {
        for task in self.tasks.values_mut() {
            if task.status == TaskStatus::Pending {
                task.dependencies.remove(&task_id);
            }
        }
    }

    /// Pending tasks that can never run: nothing is running and none of them
    /// has an empty dependency set. Empty when the queue can still progress.
    #[must_use]
    pub fn stuck_tasks(&self) -> Vec<StuckTask> {
        if !self.running.is_empty() {
            return Vec::new();
        }

        let pending: Vec<&TaskNode> = self
            .pending
            .iter()
            .filter_map(|key| self.tasks.get(&key.id))
            .collect();

        if pending.is_empty() || pending.iter().any(|task| task.dependencies.is_empty()) {
            return Vec::new();
        }

        let order: Vec<TaskId> = pending.iter().map(|task| task.id).collect();
        let reach: HashMap<TaskId, Vec<TaskId>> = order
            .iter()
            .map(|id| (*id, self.reachable_pending(id)))
            .collect();
        let cycle_of = |id: &TaskId| -> Vec<TaskId> {
            order
                .iter()
                .filter(|other| reach[*other].contains(id) && reach[id].contains(*other))
                .copied()
                .collect()
        };

        pending
            .iter()
            .map(|task| {
                let reason = if let Some(dep_id) = self.missing_dependency(task) {
                    TaskError::MissingDependency {
                        task_id: task.id,
                        dep_id,
                    }
                } else if reach[&task.id].contains(&task.id) {
                    TaskError::DependencyCycle {
                        tasks: cycle_of(&task.id),
                    }
                } else if let Some((via, dep_id)) = reach[&task.id].iter().find_map(|via| {
                    let upstream = self.tasks.get(via)?;
                    self.missing_dependency(upstream).map(|dep_id| (*via, dep_id))
                }) {
                    TaskError::UnresolvableDependency {
                        task_id: task.id,
                        via,
                        dep_id,
                    }
                } else {
                    // only waits on a cycle it is not part of
                    let member = reach[&task.id]
                        .iter()
                        .find(|id| reach[*id].contains(*id))
                        .copied();
                    TaskError::DependencyCycle {
                        tasks: member.map(|id| cycle_of(&id)).unwrap_or_else(|| order.clone()),
                    }
                };
                StuckTask {
                    task_id: task.id,
                    reason,
                }
            })
            .collect()
    }

    fn missing_dependency(&self, task: &TaskNode) -> Option<TaskId> {
        let mut missing: Vec<TaskId> = task
            .dependencies
            .iter()
            .filter(|dep| !self.tasks.contains_key(dep))
            .copied()
            .collect();
        missing.sort();
        missing.into_iter().next()
    }

    /// Pending tasks reachable through unresolved dependencies, nearest first
    fn reachable_pending(&self, from: &TaskId) -> Vec<TaskId> {
        let mut seen = HashSet::new();
        let mut order = Vec::new();
        let mut queue = VecDeque::from([*from]);

        while let Some(current) = queue.pop_front() {
            let Some(task) = self.tasks.get(&current) else {
                continue;
            };
            let mut deps: Vec<&TaskNode> = task
                .dependencies
                .iter()
                .filter_map(|dep| self.tasks.get(dep))
                .filter(|dep| dep.status == TaskStatus::Pending)
                .collect();
            deps.sort_by_key(|dep| dep.ready_key());
            for dep in deps {
                if seen.insert(dep.id) {
                    order.push(dep.id);
                    queue.push_back(dep.id);
                }
            }
        }
        order
    }

    /// Task counts
    #[must_use]
    pub fn statistics(&self) -> TaskStatistics {
        let mut stats = TaskStatistics {
            total: self.tasks.len(),
            ..Default::default()
        };
        for task in self.tasks.values() {
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }
}

fn terminal_name(outcome: &TaskOutcome) -> &'static str {
    if outcome.is_success() {
        "completed"
    } else {
        "failed"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::retry::{AgentResult, ErrorCategory};
    use serde_json::json;
    use uuid::Uuid;

    fn work(name: &str) -> WorkDescriptor {
        WorkDescriptor::handler(name)
    }

    #[test]
    fn test_priority_then_submission_order() {
        let mut registry = TaskRegistry::new();
        let low = registry.insert(work("low"), Priority::Low, []);
        let high_a = registry.insert(work("high-a"), Priority::High, []);
        let high_b = registry.insert(work("high-b"), Priority::High, []);

        let order: Vec<TaskId> = std::iter::from_fn(|| registry.next_ready(10))
            .map(|task| task.id)
            .collect();
        assert_eq!(order, vec![high_a, high_b, low]);
    }

    #[test]
    fn test_concurrency_cap() {
        let mut registry = TaskRegistry::new();
        for i in 0..5 {
            registry.insert(work(&format!("t{i}")), Priority::Medium, []);
        }

        assert!(registry.next_ready(2).is_some());
        assert!(registry.next_ready(2).is_some());
        assert!(registry.next_ready(2).is_none());
        assert_eq!(registry.running_count(), 2);
        assert_eq!(registry.pending_count(), 3);
    }

    #[test]
    fn test_completion_releases_dependents() {
        let mut registry = TaskRegistry::new();
        let first = registry.insert(work("first"), Priority::Low, []);
        let second = registry.insert(work("second"), Priority::Critical, [first]);

        let task = registry.next_ready(4).unwrap();
        assert_eq!(task.id, first);
        assert!(registry.next_ready(4).is_none());

        registry.complete(first, AgentResult::success(json!(1))).unwrap();
        assert!(registry.get(&second).unwrap().dependencies.is_empty());
        assert_eq!(registry.next_ready(4).unwrap().id, second);
    }

    #[test]
    fn test_failed_dependency_still_releases() {
        let mut registry = TaskRegistry::new();
        let first = registry.insert(work("first"), Priority::Medium, []);
        let second = registry.insert(work("second"), Priority::Medium, [first]);

        registry.next_ready(1).unwrap();
        let status = registry
            .complete(first, AgentResult::failure("x", ErrorCategory::Unknown, 0))
            .unwrap();
        assert_eq!(status, TaskStatus::Failed);
        assert_eq!(registry.next_ready(1).unwrap().id, second);
    }

    #[test]
    fn test_finished_dependencies_dropped_on_insert() {
        let mut registry = TaskRegistry::new();
        let first = registry.insert(work("first"), Priority::Medium, []);
        registry.next_ready(1).unwrap();
        registry.complete(first, AgentResult::success(json!(null))).unwrap();

        let second = registry.insert(work("second"), Priority::Medium, [first]);
        assert!(registry.get(&second).unwrap().dependencies.is_empty());
    }

    #[test]
    fn test_complete_requires_running() {
        let mut registry = TaskRegistry::new();
        let id = registry.insert(work("t"), Priority::Medium, []);

        let err = registry
            .complete(id, AgentResult::success(json!(null)))
            .unwrap_err();
        assert!(matches!(err, TaskError::InvalidStateTransition { .. }));

        let unknown = Uuid::new_v4();
        let err = registry
            .complete(unknown, AgentResult::success(json!(null)))
            .unwrap_err();
        assert_eq!(err, TaskError::NotFound { id: unknown });
    }

    #[test]
    fn test_complete_is_once_only() {
        let mut registry = TaskRegistry::new();
        let id = registry.insert(work("t"), Priority::Medium, []);
        registry.next_ready(1).unwrap();
        registry.complete(id, AgentResult::success(json!(1))).unwrap();
        assert!(registry.complete(id, AgentResult::success(json!(2))).is_err());
    }

    #[test]
    fn test_stuck_cycle_detected() {
        let mut registry = TaskRegistry::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        registry
            .insert_with_id(a, work("a"), Priority::Medium, [b])
            .unwrap();
        registry
            .insert_with_id(b, work("b"), Priority::Medium, [a])
            .unwrap();

        assert!(registry.next_ready(4).is_none());
        let stuck = registry.stuck_tasks();
        assert_eq!(stuck.len(), 2);
        assert!(stuck
            .iter()
            .all(|s| matches!(s.reason, TaskError::DependencyCycle { .. })));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut registry = TaskRegistry::new();
        let id = Uuid::new_v4();
        registry.insert_with_id(id, work("a"), Priority::Medium, []).unwrap();
        assert_eq!(
            registry.insert_with_id(id, work("b"), Priority::Medium, []),
            Err(TaskError::AlreadyExists { id })
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_stuck_missing_dependency() {
        let mut registry = TaskRegistry::new();
        let ghost = Uuid::new_v4();
        let id = registry.insert(work("orphan"), Priority::Medium, [ghost]);

        let stuck = registry.stuck_tasks();
        assert_eq!(
            stuck,
            vec![StuckTask {
                task_id: id,
                reason: TaskError::MissingDependency {
                    task_id: id,
                    dep_id: ghost
                },
            }]
        );
    }

    #[test]
    fn test_chain_behind_missing_dependency_is_not_a_cycle() {
        let mut registry = TaskRegistry::new();
        let ghost = Uuid::new_v4();
        let a = registry.insert(work("a"), Priority::Medium, [ghost]);
        let b = registry.insert(work("b"), Priority::Medium, [a]);
        let c = registry.insert(work("c"), Priority::Medium, [b]);

        let stuck: HashMap<TaskId, TaskError> = registry
            .stuck_tasks()
            .into_iter()
            .map(|entry| (entry.task_id, entry.reason))
            .collect();

        assert_eq!(stuck.len(), 3);
        assert_eq!(
            stuck[&a],
            TaskError::MissingDependency {
                task_id: a,
                dep_id: ghost
            }
        );
        for id in [b, c] {
            assert_eq!(
                stuck[&id],
                TaskError::UnresolvableDependency {
                    task_id: id,
                    via: a,
                    dep_id: ghost
                }
            );
        }
    }

    #[test]
    fn test_cycle_members_named_for_waiting_task() {
        let mut registry = TaskRegistry::new();
        let x = Uuid::new_v4();
        let y = Uuid::new_v4();
        registry
            .insert_with_id(x, work("x"), Priority::High, [y])
            .unwrap();
        registry
            .insert_with_id(y, work("y"), Priority::High, [x])
            .unwrap();
        let z = registry.insert(work("z"), Priority::Low, [x]);

        let stuck: HashMap<TaskId, TaskError> = registry
            .stuck_tasks()
            .into_iter()
            .map(|entry| (entry.task_id, entry.reason))
            .collect();

        for id in [x, y, z] {
            assert_eq!(stuck[&id], TaskError::DependencyCycle { tasks: vec![x, y] });
        }
    }

    #[test]
    fn test_not_stuck_while_running() {
        let mut registry = TaskRegistry::new();
        let a = registry.insert(work("a"), Priority::Medium, []);
        registry.insert(work("b"), Priority::Medium, [a]);
        registry.next_ready(1).unwrap();
        assert!(registry.stuck_tasks().is_empty());
    }

    #[test]
    fn test_fail_pending() {
        let mut registry = TaskRegistry::new();
        let a = registry.insert(work("a"), Priority::Medium, []);
        let b = registry.insert(work("b"), Priority::Medium, [a]);

        registry
            .fail_pending(a, AgentResult::failure("cancelled", ErrorCategory::Unknown, 0))
            .unwrap();
        assert_eq!(registry.get(&a).unwrap().status, TaskStatus::Failed);
        assert_eq!(registry.next_ready(1).unwrap().id, b);

        let stats = registry.statistics();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.running, 1);
    }
}
