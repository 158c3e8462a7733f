//! Task Scheduler
//!
//! Priority- and dependency-aware scheduler that runs ready tasks through an
//! external executor under a concurrency cap.
//!
//! All registry mutations go through one async mutex. Executor calls run
//! outside it, multiplexed on the driving task with `FuturesUnordered`, so a
//! slow task never blocks scheduling decisions.

use super::aggregator::ResultAggregator;
use super::model::{TaskId, TaskNode, TaskOutcome, TaskStatus, WorkDescriptor};
use super::registry::{TaskRegistry, TaskStatistics};
use crate::domain::priority::Priority;
use crate::domain::retry::{AgentResult, ErrorCategory, RetryPolicy};
use crate::error::{BoxError, TaskError, TaskResult};
use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Notify};

/// Runs a unit of work. The scheduler knows nothing about what the
/// descriptor means.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, descriptor: WorkDescriptor) -> Result<serde_json::Value, BoxError>;
}

#[async_trait]
impl<F, Fut> TaskExecutor for F
where
    F: Fn(WorkDescriptor) -> Fut + Send + Sync,
    Fut: Future<Output = Result<serde_json::Value, BoxError>> + Send + 'static,
{
    async fn execute(&self, descriptor: WorkDescriptor) -> Result<serde_json::Value, BoxError> {
        (self)(descriptor).await
    }
}

/// Events that the scheduler can produce
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    /// A task was dispatched
    TaskStarted { task_id: TaskId, handler: String },
    /// A task has completed
    TaskCompleted { task_id: TaskId, outcome: TaskOutcome },
    /// A task has failed
    TaskFailed {
        task_id: TaskId,
        error: String,
        category: ErrorCategory,
    },
    /// Progress update
    Progress {
        completed: usize,
        total: usize,
        running: usize,
    },
    /// A drive loop ran out of work
    AllComplete { stats: TaskStatistics },
}

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum number of concurrently running tasks
    pub max_concurrent: usize,
    /// Retry policy applied to every executor call; `None` means one attempt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            retry: None,
        }
    }
}

/// What a drive loop should do when it has nothing in flight
enum Progress {
    Idle,
    Stuck,
    Waiting,
}

/// Task Scheduler
///
/// Construct one per workload and share it by reference or `Arc`.
pub struct TaskScheduler {
    registry: Mutex<TaskRegistry>,
    results: ResultAggregator,
    executor: Arc<dyn TaskExecutor>,
    config: SchedulerConfig,
    /// Signalled on every registry change
    changed: Notify,
    closed: AtomicBool,
    event_tx: Option<mpsc::UnboundedSender<SchedulerEvent>>,
}

impl std::fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("config", &self.config)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl TaskScheduler {
    /// Create a new scheduler
    pub fn new(executor: impl TaskExecutor + 'static, config: SchedulerConfig) -> Self {
        Self::from_arc(Arc::new(executor), config)
    }

    /// Create a scheduler sharing an existing executor
    pub fn from_arc(executor: Arc<dyn TaskExecutor>, mut config: SchedulerConfig) -> Self {
        if config.max_concurrent == 0 {
            tracing::warn!("max_concurrent of 0 would never dispatch, using 1");
            config.max_concurrent = 1;
        }
        Self {
            registry: Mutex::new(TaskRegistry::new()),
            results: ResultAggregator::new(),
            executor,
            config,
            changed: Notify::new(),
            closed: AtomicBool::new(false),
            event_tx: None,
        }
    }

    /// Create a scheduler with an event channel
    pub fn with_events(
        executor: impl TaskExecutor + 'static,
        config: SchedulerConfig,
    ) -> (Self, mpsc::UnboundedReceiver<SchedulerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut scheduler = Self::new(executor, config);
        scheduler.event_tx = Some(tx);
        (scheduler, rx)
    }

    /// Get the scheduler configuration
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Get the result store
    pub fn results(&self) -> &ResultAggregator {
        &self.results
    }

    /// Send event if channel is set
    fn send_event(&self, event: SchedulerEvent) {
        if let Some(ref tx) = self.event_tx {
            let _ = tx.send(event);
        }
    }

    /// Queue a task. It starts `pending` and runs once every dependency has
    /// finished (successfully or not).
    pub async fn submit(
        &self,
        descriptor: WorkDescriptor,
        priority: Priority,
        dependencies: impl IntoIterator<Item = TaskId>,
    ) -> TaskResult<TaskId> {
        if self.is_closed() {
            return Err(TaskError::SchedulerClosed);
        }

        let handler = descriptor.handler.clone();
        let task_id = self
            .registry
            .lock()
            .await
            .insert(descriptor, priority, dependencies);

        self.submitted(task_id, &handler, priority);
        Ok(task_id)
    }

    /// Like [`submit`](Self::submit) with a caller-chosen id. Dependencies
    /// may name ids that are submitted later.
    pub async fn submit_with_id(
        &self,
        task_id: TaskId,
        descriptor: WorkDescriptor,
        priority: Priority,
        dependencies: impl IntoIterator<Item = TaskId>,
    ) -> TaskResult<TaskId> {
        if self.is_closed() {
            return Err(TaskError::SchedulerClosed);
        }

        let handler = descriptor.handler.clone();
        self.registry
            .lock()
            .await
            .insert_with_id(task_id, descriptor, priority, dependencies)?;

        self.submitted(task_id, &handler, priority);
        Ok(task_id)
    }

    fn submitted(&self, task_id: TaskId, handler: &str, priority: Priority) {
        tracing::debug!(task_id = %task_id, handler = %handler, priority = %priority, "Task submitted");
        self.changed.notify_waiters();
    }

    /// Take the most urgent ready task and mark it running.
    ///
    /// Ties are broken strictly by (priority, submission order). Returns
    /// `None` when the concurrency cap is reached or nothing is ready.
    pub async fn next_ready(&self) -> Option<TaskNode> {
        let task = self
            .registry
            .lock()
            .await
            .next_ready(self.config.max_concurrent)?;

        tracing::info!(task_id = %task.id, handler = %task.descriptor.handler, "Task dispatched");
        self.send_event(SchedulerEvent::TaskStarted {
            task_id: task.id,
            handler: task.descriptor.handler.clone(),
        });
        Some(task)
    }

    /// Record the outcome of a running task, store it in the aggregator and
    /// release every task waiting on it.
    pub async fn mark_complete(&self, task_id: TaskId, outcome: TaskOutcome) -> TaskResult<()> {
        let stats = {
            let mut registry = self.registry.lock().await;
            registry.complete(task_id, outcome.clone())?;
            // recorded inside the critical section so an idle registry
            // always has every outcome in the aggregator
            self.results.record(task_id, outcome.clone()).await?;
            registry.statistics()
        };

        if outcome.is_success() {
            tracing::info!(task_id = %task_id, "Task completed");
            self.send_event(SchedulerEvent::TaskCompleted { task_id, outcome });
        } else {
            let error = outcome.error_message().unwrap_or_default().to_string();
            let category = outcome.error_category().unwrap_or(ErrorCategory::Unknown);
            tracing::warn!(task_id = %task_id, category = %category, error = %error, "Task failed");
            self.send_event(SchedulerEvent::TaskFailed {
                task_id,
                error,
                category,
            });
        }
        self.send_event(SchedulerEvent::Progress {
            completed: stats.finished(),
            total: stats.total,
            running: stats.running,
        });

        self.changed.notify_waiters();
        Ok(())
    }

    /// Fail a task that has not been dispatched yet. Running tasks cannot be
    /// cancelled.
    pub async fn cancel(&self, task_id: TaskId) -> TaskResult<()> {
        self.fail_pending(
            task_id,
            AgentResult::failure("task cancelled before dispatch", ErrorCategory::Unknown, 0),
        )
        .await
    }

    async fn fail_pending(&self, task_id: TaskId, outcome: TaskOutcome) -> TaskResult<()> {
        {
            let mut registry = self.registry.lock().await;
            registry.fail_pending(task_id, outcome.clone())?;
            self.results.record(task_id, outcome.clone()).await?;
        }

        self.send_event(SchedulerEvent::TaskFailed {
            task_id,
            error: outcome.error_message().unwrap_or_default().to_string(),
            category: outcome.error_category().unwrap_or(ErrorCategory::Unknown),
        });
        self.changed.notify_waiters();
        Ok(())
    }

    /// Run tasks until nothing is pending or running.
    ///
    /// Individual task failures are recorded and never stop the loop. If the
    /// remaining pending tasks can never become ready (a dependency cycle or
    /// a dependency that was never submitted), they are all failed with a
    /// `dependency_cycle` outcome and the loop ends.
    pub async fn drive(&self) -> TaskStatistics {
        let mut in_flight = FuturesUnordered::new();

        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            while let Some(task) = self.next_ready().await {
                in_flight.push(self.run_task(task));
            }

            if in_flight.is_empty() {
                match self.progress().await {
                    Progress::Idle => break,
                    Progress::Stuck => {
                        self.fail_stuck().await;
                        continue;
                    }
                    // tasks dispatched by another caller are still running
                    Progress::Waiting => {
                        notified.await;
                        continue;
                    }
                }
            }

            tokio::select! {
                Some((task_id, outcome)) = in_flight.next() => {
                    if let Err(e) = self.mark_complete(task_id, outcome).await {
                        tracing::warn!(task_id = %task_id, error = %e, "Could not record task outcome");
                    }
                }
                _ = &mut notified => {}
            }
        }

        let stats = self.statistics().await;
        tracing::info!(
            total = stats.total,
            completed = stats.completed,
            failed = stats.failed,
            "Scheduler drained"
        );
        self.send_event(SchedulerEvent::AllComplete { stats });
        stats
    }

    /// Drive to completion and return every recorded outcome.
    pub async fn await_all(&self) -> HashMap<TaskId, TaskOutcome> {
        self.drive().await;
        self.results.snapshot().await
    }

    async fn run_task(&self, task: TaskNode) -> (TaskId, TaskOutcome) {
        let task_id = task.id;
        let descriptor = task.descriptor;
        let outcome = match self.config.retry {
            Some(ref policy) => {
                policy
                    .run(|| self.executor.execute(descriptor.clone()))
                    .await
            }
            None => {
                RetryPolicy::no_retry()
                    .run(|| self.executor.execute(descriptor.clone()))
                    .await
            }
        };
        (task_id, outcome)
    }

    async fn progress(&self) -> Progress {
        let registry = self.registry.lock().await;
        if registry.is_idle() {
            Progress::Idle
        } else if registry.running_count() == 0 {
            Progress::Stuck
        } else {
            Progress::Waiting
        }
    }

    async fn fail_stuck(&self) {
        let stuck = self.registry.lock().await.stuck_tasks();
        if stuck.is_empty() {
            return;
        }

        tracing::error!(count = stuck.len(), "Pending tasks can never run, failing them");
        for entry in stuck {
            let message = format!("dependency cycle or missing dependency: {}", entry.reason);
            let outcome = AgentResult::failure(message, ErrorCategory::DependencyCycle, 0);
            if let Err(e) = self.fail_pending(entry.task_id, outcome).await {
                tracing::debug!(task_id = %entry.task_id, error = %e, "Stuck task already resolved");
            }
        }
    }

    /// Outcome of a finished task
    pub async fn get_result(&self, task_id: &TaskId) -> Option<TaskOutcome> {
        self.results.get(task_id).await
    }

    /// Human-readable summary of every recorded outcome
    pub async fn summary(&self) -> String {
        self.results.summary().await
    }

    /// Copy of a task's current state
    pub async fn task(&self, task_id: &TaskId) -> Option<TaskNode> {
        self.registry.lock().await.get(task_id).cloned()
    }

    /// Current status of a task
    pub async fn status(&self, task_id: &TaskId) -> Option<TaskStatus> {
        self.registry.lock().await.get(task_id).map(|task| task.status)
    }

    /// Get the number of currently running tasks
    pub async fn running_count(&self) -> usize {
        self.registry.lock().await.running_count()
    }

    /// Get scheduler statistics
    pub async fn statistics(&self) -> TaskStatistics {
        self.registry.lock().await.statistics()
    }

    /// Stop accepting submissions. Queued work still runs.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        tracing::debug!("Scheduler closed to new submissions");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
