//! Reconciles jobs against a reloaded crontab, drives per-minute evaluation
//! (§4.6 `JobManager`).

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::{error, warn};

use crate::alert::AlertManager;
use crate::clock::Clock;
use crate::config::Configuration;
use crate::crontab::{substitute_variables, Crontab};
use crate::proctree::ProcessTree;

use super::job::{Job, JobIdentity};

pub struct JobManager {
    /// Currently active jobs, keyed by identity. Replaced atomically on
    /// reload so a concurrent reader always sees a consistent whole set.
    jobs: ArcSwap<HashMap<JobIdentity, Arc<Job>>>,
    /// Jobs removed by a reload but still draining running tasks.
    retired: parking_lot::Mutex<Vec<Arc<Job>>>,
    clock: Arc<dyn Clock>,
    process_tree: Arc<dyn ProcessTree>,
    alert_manager: AlertManager,
}

impl JobManager {
    pub fn new(clock: Arc<dyn Clock>, process_tree: Arc<dyn ProcessTree>, alert_manager: AlertManager) -> JobManager {
        JobManager {
            jobs: ArcSwap::from_pointee(HashMap::new()),
            retired: parking_lot::Mutex::new(Vec::new()),
            clock,
            process_tree,
            alert_manager,
        }
    }

    pub fn jobs_snapshot(&self) -> Arc<HashMap<JobIdentity, Arc<Job>>> {
        self.jobs.load_full()
    }

    /// Rebuilds the job set from a freshly-loaded crontab and reconciles it
    /// against the currently-loaded set (§4.6 step 1-2), then hands the new
    /// configuration to the alert manager (step 3).
    pub fn update_configuration(&self, new_config: &Configuration, new_crontab: &Crontab) {
        let mut fresh: HashMap<JobIdentity, Arc<Job>> = HashMap::new();
        for row in &new_crontab.rows {
            let config = new_crontab.configuration_for(row, new_config).clone();
            let command = substitute_variables(&row.command, &new_crontab.variables);
            let job = Job::new(row.clone(), command, config);
            fresh.insert(job.identity(), Arc::new(job));
        }

        let previous = self.jobs.load_full();
        let mut reconciled: HashMap<JobIdentity, Arc<Job>> = HashMap::new();
        let mut newly_retired = Vec::new();
        let mut retired = self.retired.lock();

        for (identity, new_job) in fresh {
            if let Some(existing) = previous.get(&identity) {
                existing.set_active(true);
                reconciled.insert(identity, Arc::clone(existing));
                continue;
            }
            // §4.6 step 2 / §9 open question (c): a row that was retired but
            // is still draining keeps its instance (and scheduledRunCount)
            // if it reappears under the same identity, instead of starting
            // over as a brand-new Job.
            if let Some(pos) = retired.iter().position(|job| job.identity() == identity) {
                let existing = retired.remove(pos);
                existing.set_active(true);
                reconciled.insert(identity, existing);
                continue;
            }
            reconciled.insert(identity, new_job);
        }

        for (identity, old_job) in previous.iter() {
            if reconciled.contains_key(identity) {
                continue;
            }
            if old_job.has_running_tasks() {
                old_job.set_active(false);
                newly_retired.push(Arc::clone(old_job));
            }
        }

        self.jobs.store(Arc::new(reconciled));
        self.retired.lock().extend(newly_retired);
        self.alert_manager.update_configuration(new_config.clone());
    }

    /// Per-minute evaluation (§4.6 `run()`). Every Job runs
    /// exception-isolated; drained retired jobs are then dropped; alerts
    /// are evaluated last, over the current job set (active + still-draining retired).
    pub fn run(&self) {
        let jobs = self.jobs.load_full();
        for job in jobs.values() {
            self.run_job_isolated(job);
        }

        let retired_snapshot: Vec<Arc<Job>> = self.retired.lock().clone();
        for job in &retired_snapshot {
            self.run_job_isolated(job);
        }
        self.retire_old_tasks();

        let mut all_jobs: Vec<Arc<Job>> = jobs.values().cloned().collect();
        all_jobs.extend(self.retired.lock().iter().cloned());
        self.alert_manager.send_alerts(&all_jobs);
    }

    fn run_job_isolated(&self, job: &Arc<Job>) {
        let job_id = job.job_id;
        let clock = &self.clock;
        let process_tree = &self.process_tree;
        let result = catch_unwind(AssertUnwindSafe(|| job.run(clock, process_tree)));
        if let Err(panic) = result {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "<non-string panic payload>".to_string());
            error!(job_id = job_id.0, message, "job panicked during run(); other jobs unaffected");
        }
    }

    fn retire_old_tasks(&self) {
        let mut retired = self.retired.lock();
        let before = retired.len();
        retired.retain(|job| job.has_running_tasks());
        let drained = before - retired.len();
        if drained > 0 {
            warn!(drained, "removed fully-drained retired jobs");
        }
    }
}
