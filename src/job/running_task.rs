//! One child-process invocation (§3 `RunningTask`, §4.5).

use std::path::Path;
use std::sync::atomic::{AtomicI32, AtomicI64, AtomicU8, Ordering};
use std::sync::Arc;

use tokio::process::Command;
use tokio::time::Duration;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::proctree::ProcessTree;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskStatus {
    FailedStart = 0,
    Started = 1,
    Complete = 2,
    Error = 3,
    Killed = 4,
}

impl TaskStatus {
    fn from_u8(v: u8) -> TaskStatus {
        match v {
            0 => TaskStatus::FailedStart,
            1 => TaskStatus::Started,
            2 => TaskStatus::Complete,
            3 => TaskStatus::Error,
            _ => TaskStatus::Killed,
        }
    }
}

/// `{ taskId, commandLine, executingUser, launchTimeMillis, pid (atomic),
/// endTimeMillis (atomic), returnCode (atomic), status }`. All mutable
/// fields are atomics so a task worker can publish state a `Job` reads
/// without either side blocking (§4.5 concurrency note).
pub struct RunningTask {
    pub task_id: u64,
    pub command_line: String,
    pub executing_user: String,
    pub launch_time_millis: i64,
    pid: AtomicI64,
    end_time_millis: AtomicI64,
    return_code: AtomicI32,
    status: AtomicU8,
}

impl RunningTask {
    pub fn pid(&self) -> i64 {
        self.pid.load(Ordering::Acquire)
    }

    pub fn end_time_millis(&self) -> i64 {
        self.end_time_millis.load(Ordering::Acquire)
    }

    pub fn return_code(&self) -> i32 {
        self.return_code.load(Ordering::Acquire)
    }

    pub fn status(&self) -> TaskStatus {
        TaskStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn is_done(&self) -> bool {
        self.end_time_millis() >= 0
    }
}

/// Launches one `RunningTask` on its own tokio task and returns a handle
/// immediately; the handle's atomic fields are updated as the child
/// progresses. `su_path`/`kill_path` are the configured command paths
/// (§6 `command.path.su` / `command.path.kill`).
#[allow(clippy::too_many_arguments)]
pub fn launch(
    task_id: u64,
    command_line: String,
    executing_user: String,
    timeout_minutes: i64,
    su_path: String,
    kill_path: String,
    clock: Arc<dyn Clock>,
    process_tree: Arc<dyn ProcessTree>,
) -> Arc<RunningTask> {
    let task = Arc::new(RunningTask {
        task_id,
        command_line: command_line.clone(),
        executing_user: executing_user.clone(),
        launch_time_millis: clock.now().timestamp_millis(),
        pid: AtomicI64::new(-1),
        end_time_millis: AtomicI64::new(-1),
        return_code: AtomicI32::new(255),
        status: AtomicU8::new(TaskStatus::Started as u8),
    });

    let handle = Arc::clone(&task);
    tokio::spawn(async move {
        run_task(
            handle,
            command_line,
            executing_user,
            timeout_minutes,
            su_path,
            kill_path,
            clock,
            process_tree,
        )
        .await;
    });

    task
}

fn check_launch_preconditions(su_path: &str, kill_path: &str) -> Result<(), &'static str> {
    #[cfg(unix)]
    {
        let uid = unsafe { libc::getuid() };
        if uid != 0 {
            return Err("process is not running as the host-root principal");
        }
    }
    if !Path::new(su_path).exists() {
        return Err("configured su-equivalent command does not exist");
    }
    if !Path::new(kill_path).exists() {
        return Err("configured kill-equivalent command does not exist");
    }
    Ok(())
}

async fn run_task(
    task: Arc<RunningTask>,
    command_line: String,
    executing_user: String,
    timeout_minutes: i64,
    su_path: String,
    kill_path: String,
    clock: Arc<dyn Clock>,
    process_tree: Arc<dyn ProcessTree>,
) {
    if let Err(reason) = check_launch_preconditions(&su_path, &kill_path) {
        warn!(task_id = task.task_id, reason, "launch precondition failed");
        task.status.store(TaskStatus::FailedStart as u8, Ordering::Release);
        task.end_time_millis
            .store(clock.now().timestamp_millis(), Ordering::Release);
        return;
    }

    let mut command = Command::new(&su_path);
    command.arg("-").arg(&executing_user).arg("-c").arg(&command_line);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            error!(task_id = task.task_id, error = %e, "failed to spawn child process");
            task.status.store(TaskStatus::FailedStart as u8, Ordering::Release);
            task.end_time_millis
                .store(clock.now().timestamp_millis(), Ordering::Release);
            return;
        }
    };

    if let Some(pid) = child.id() {
        task.pid.store(pid as i64, Ordering::Release);
        info!(task_id = task.task_id, pid, "task started");
    }

    let exit_code = if timeout_minutes > 0 {
        let timeout = Duration::from_secs((timeout_minutes as u64) * 60);
        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => status.code().unwrap_or(-1),
            Ok(Err(e)) => {
                error!(task_id = task.task_id, error = %e, "error waiting for child");
                -1
            }
            Err(_) => {
                task.status.store(TaskStatus::Killed as u8, Ordering::Release);
                kill_process_tree_until_dead(&task, &mut child, &kill_path, &*process_tree).await;
                task.return_code.store(0, Ordering::Release);
                task.end_time_millis
                    .store(clock.now().timestamp_millis(), Ordering::Release);
                return;
            }
        }
    } else {
        match child.wait().await {
            Ok(status) => status.code().unwrap_or(-1),
            Err(e) => {
                error!(task_id = task.task_id, error = %e, "error waiting for child");
                -1
            }
        }
    };

    task.return_code.store(exit_code.unsigned_abs() as i32, Ordering::Release);
    let final_status = if exit_code == 0 {
        TaskStatus::Complete
    } else {
        TaskStatus::Error
    };
    task.status.store(final_status as u8, Ordering::Release);
    task.end_time_millis
        .store(clock.now().timestamp_millis(), Ordering::Release);
}

/// Repeatedly signals every PID in the captured process tree until the
/// child reaports dead, logging each iteration past the first at `error`
/// severity (§4.5).
async fn kill_process_tree_until_dead(
    task: &RunningTask,
    child: &mut tokio::process::Child,
    kill_path: &str,
    process_tree: &dyn ProcessTree,
) {
    let root_pid = task.pid();
    let mut iteration = 0u32;
    loop {
        if root_pid >= 0 {
            let pids = process_tree.descendants(root_pid as i32);
            for pid in pids {
                let status = Command::new(kill_path).arg("-9").arg(pid.to_string()).status().await;
                if let Err(e) = status {
                    warn!(task_id = task.task_id, pid, error = %e, "failed to invoke kill command");
                }
            }
        }

        match child.try_wait() {
            Ok(Some(_)) => return,
            Ok(None) => {}
            Err(_) => return,
        }

        iteration += 1;
        if iteration > 1 {
            error!(
                task_id = task.task_id,
                iteration, "process tree still alive after SIGKILL, retrying"
            );
        }
        if iteration >= 10 {
            error!(task_id = task.task_id, "giving up after repeated SIGKILL attempts");
            return;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::proctree::FakeProcessTree;

    #[tokio::test]
    async fn successful_task_reaches_complete() {
        let task = launch(
            1,
            "true".to_string(),
            whoami(),
            -1,
            which_or("/bin/true", "true"),
            which_or("/bin/true", "true"),
            Arc::new(SystemClock),
            Arc::new(FakeProcessTree::new()),
        );
        // Not run as root in CI, so this will hit the precondition failure
        // path; either way the task must reach a terminal, done state.
        for _ in 0..100 {
            if task.is_done() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(task.is_done());
    }

    fn whoami() -> String {
        std::env::var("USER").unwrap_or_else(|_| "root".to_string())
    }

    fn which_or(path: &str, _fallback: &str) -> String {
        path.to_string()
    }
}
