//! Per-schedule coordinator (§3 `Job`, §4.4).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::clock::Clock;
use crate::config::{ConfigKey, Configuration};
use crate::crontab::CrontabRow;
use crate::proctree::ProcessTree;

use super::running_task::{self, RunningTask};
use super::task_log::{TaskLog, TaskLogEntry, TaskLogStatus};

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_ENTRY_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub u64);

/// Identity for reconciliation: `(row, configuration)`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct JobIdentity {
    row_key: (String, bool),
    config_key: Vec<(String, String)>,
}

impl JobIdentity {
    pub fn new(row: &CrontabRow, configuration: &Configuration) -> JobIdentity {
        let config_key = crate::config::ConfigKey::ALL
            .iter()
            .map(|k| (k.canonical().to_string(), configuration.get_string(*k).to_string()))
            .collect();
        JobIdentity {
            row_key: row.identity_key(),
            config_key,
        }
    }
}

struct Inner {
    running_tasks: VecDeque<Arc<RunningTask>>,
    task_log: TaskLog,
}

/// `{ jobId, row, schedule, command, executingUser, configuration,
/// runningTasks (newest-first), taskLog (bounded, 500), active,
/// scheduledRunCount }`.
pub struct Job {
    pub job_id: JobId,
    pub row: CrontabRow,
    pub command: String,
    pub configuration: Configuration,
    pub active: std::sync::atomic::AtomicBool,
    pub scheduled_run_count: AtomicU64,
    pub next_execution_timestamp: Mutex<Option<DateTime<Utc>>>,
    inner: Mutex<Inner>,
}

impl Job {
    pub fn new(row: CrontabRow, command: String, configuration: Configuration) -> Job {
        Job {
            job_id: JobId(NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed)),
            row,
            command,
            configuration,
            active: std::sync::atomic::AtomicBool::new(true),
            scheduled_run_count: AtomicU64::new(0),
            next_execution_timestamp: Mutex::new(None),
            inner: Mutex::new(Inner {
                running_tasks: VecDeque::new(),
                task_log: TaskLog::default(),
            }),
        }
    }

    pub fn identity(&self) -> JobIdentity {
        JobIdentity::new(&self.row, &self.configuration)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    pub fn running_task_count(&self) -> usize {
        self.inner.lock().running_tasks.len()
    }

    pub fn has_running_tasks(&self) -> bool {
        self.running_task_count() > 0
    }

    pub fn task_log_len(&self) -> usize {
        self.inner.lock().task_log.len()
    }

    /// Runs the per-minute operation described in §4.4. Returns whether a
    /// task was launched this tick.
    pub fn run(
        &self,
        clock: &Arc<dyn Clock>,
        process_tree: &Arc<dyn ProcessTree>,
    ) -> bool {
        let now_local = match self.local_now(clock) {
            Some(t) => t,
            None => return false,
        };

        // Step 1: sweep completed tasks into the log.
        self.sweep(clock.now());

        // Step 2: schedule check.
        let satisfied = match &self.row.schedule {
            Some(schedule) => schedule.contains(&now_local),
            None => false,
        };
        if !satisfied {
            return false;
        }

        // Step 3.
        let run_count = self.scheduled_run_count.fetch_add(1, Ordering::AcqRel) + 1;

        // Step 4: runnability / concurrency-cap / active checks.
        let max_instances = self.configuration.get_int(ConfigKey::TaskMaxInstanceCount).max(0) as usize;
        let over_cap = self.running_task_count() >= max_instances;
        if !self.is_active() || over_cap || !self.row.is_runnable() {
            self.log_skip(run_count, clock.now());
            return false;
        }

        // Step 5: launch. The task id is scheduledRunCount, the same id
        // log_skip uses for a skipped tick, so the task log stays in one
        // id space.
        let task_id = run_count;
        let su_path = self.configuration.get_string(ConfigKey::CommandPathSu).to_string();
        let kill_path = self.configuration.get_string(ConfigKey::CommandPathKill).to_string();
        let timeout_minutes = self.configuration.get_int(ConfigKey::TaskTimeoutMinutes);

        let task = running_task::launch(
            task_id,
            self.command.clone(),
            self.row.executing_user.clone(),
            timeout_minutes,
            su_path,
            kill_path,
            Arc::clone(clock),
            Arc::clone(process_tree),
        );

        {
            let mut inner = self.inner.lock();
            inner.running_tasks.push_front(Arc::clone(&task));
            inner.task_log.push(TaskLogEntry {
                entry_id: NEXT_ENTRY_ID.fetch_add(1, Ordering::Relaxed),
                timestamp_millis: task.launch_time_millis,
                task_id,
                status: TaskLogStatus::Started,
            });
        }

        // Step 6: next execution timestamp.
        *self.next_execution_timestamp.lock() = self.next_whitelisted_after(clock);

        true
    }

    fn local_now(&self, clock: &Arc<dyn Clock>) -> Option<DateTime<chrono_tz::Tz>> {
        let tz = self.configuration.get_timezone().ok()?;
        Some(clock.now().with_timezone(&tz))
    }

    fn next_whitelisted_after(&self, clock: &Arc<dyn Clock>) -> Option<DateTime<Utc>> {
        // Minute-granularity search, bounded to four years so a malformed
        // or vacuous schedule cannot spin forever. Candidates are built in
        // the configured timezone, matching the schedule check in run(),
        // since minute/hour/weekday fields are tz-relative.
        let schedule = self.row.schedule.as_ref()?;
        let tz = self.configuration.get_timezone().ok()?;
        let start = clock.now().with_timezone(&tz);
        let mut candidate = start + chrono::Duration::minutes(1);
        for _ in 0..(4 * 365 * 24 * 60) {
            if schedule.contains(&candidate) {
                return Some(candidate.with_timezone(&Utc));
            }
            candidate += chrono::Duration::minutes(1);
        }
        None
    }

    fn log_skip(&self, run_count: u64, now: DateTime<Utc>) {
        let mut inner = self.inner.lock();
        inner.task_log.push(TaskLogEntry {
            entry_id: NEXT_ENTRY_ID.fetch_add(1, Ordering::Relaxed),
            timestamp_millis: now.timestamp_millis(),
            task_id: run_count,
            status: TaskLogStatus::Skipped,
        });
    }

    fn sweep(&self, now: DateTime<Utc>) {
        let mut inner = self.inner.lock();
        let mut still_running = VecDeque::new();
        let mut finished = Vec::new();
        while let Some(task) = inner.running_tasks.pop_back() {
            if task.is_done() {
                finished.push(task);
            } else {
                still_running.push_front(task);
            }
        }
        inner.running_tasks = still_running;
        for task in finished {
            inner.task_log.push(TaskLogEntry {
                entry_id: NEXT_ENTRY_ID.fetch_add(1, Ordering::Relaxed),
                timestamp_millis: if task.end_time_millis() >= 0 {
                    task.end_time_millis()
                } else {
                    now.timestamp_millis()
                },
                task_id: task.task_id,
                status: task.status().into(),
            });
        }
    }

    pub fn with_task_log<R>(&self, f: impl FnOnce(&TaskLog) -> R) -> R {
        let inner = self.inner.lock();
        f(&inner.task_log)
    }

    /// Test-only fixture hook: pushes a scripted log entry directly,
    /// bypassing `run()`/`sweep()`, so policy tests can script a task-log
    /// history without driving a real `RunningTask`.
    #[cfg(test)]
    pub fn push_log_entry_for_test(&self, entry: TaskLogEntry) {
        self.inner.lock().task_log.push(entry);
    }
}
