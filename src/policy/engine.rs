//! Shared evaluation harness for SLA policies (§4.7 `Policy.evaluate`, §9:
//! "model as tagged variants with a shared evaluation harness... per-policy
//! state held outside the policy function, owned by the engine").

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::info;

use crate::config::ConfigKey;
use crate::job::{Job, JobId};

use super::{Alert, AlertLogEntry, AlertStatus, Policy};

/// Wraps one `Policy` together with the `{ jobId -> last emitted }`
/// de-duplication state it needs across ticks.
pub struct PolicyEngine {
    policy: Box<dyn Policy>,
    last_emitted: Mutex<HashMap<JobId, AlertLogEntry>>,
}

impl PolicyEngine {
    pub fn new(policy: Box<dyn Policy>) -> PolicyEngine {
        PolicyEngine {
            policy,
            last_emitted: Mutex::new(HashMap::new()),
        }
    }

    /// Runs this policy over every job, applying the de-duplication rules
    /// from §4.7 and returning the alerts to emit this tick. Entries for
    /// jobs no longer present in `jobs` are purged afterwards.
    pub fn evaluate(&self, jobs: &[Arc<Job>], now: DateTime<Utc>) -> Vec<Alert> {
        let mut last_emitted = self.last_emitted.lock();
        let mut outbox = Vec::new();
        let mut seen = HashSet::with_capacity(jobs.len());

        for job in jobs {
            seen.insert(job.job_id);

            if !job.is_active() {
                continue;
            }
            if self.policy.is_disabled(job) {
                info!(
                    job_id = job.job_id.0,
                    policy = self.policy.name(),
                    "policy disabled for job, skipping"
                );
                continue;
            }
            if in_downtime(job, now) {
                continue;
            }

            let (status, message) = self.policy.evaluate(job, now);
            if status == AlertStatus::NotApplicable {
                continue;
            }

            let previous = last_emitted.get(&job.job_id).copied();
            if !should_emit(status, previous, job, now) {
                continue;
            }

            last_emitted.insert(
                job.job_id,
                AlertLogEntry {
                    status,
                    timestamp: now,
                },
            );
            outbox.push(Alert {
                job_id: job.job_id,
                raw_expression: job.row.raw_expression.clone(),
                message,
                status,
            });
        }

        last_emitted.retain(|id, _| seen.contains(id));
        outbox
    }
}

fn in_downtime(job: &Job, now: DateTime<Utc>) -> bool {
    let Some(window) = job.configuration.get_downtime() else {
        return false;
    };
    let Ok(tz) = job.configuration.get_timezone() else {
        return false;
    };
    window.contains(now.with_timezone(&tz).time())
}

/// Applies the de-duplication rules (§4.7): no repeated Success, a Failure
/// must be separated from the last emission by `AlertMinutesDelayRepeat`,
/// and a job with no emission history at all never bootstraps on a Success
/// (avoids "everything is fine" noise on first sight of a job).
fn should_emit(
    status: AlertStatus,
    previous: Option<AlertLogEntry>,
    job: &Job,
    now: DateTime<Utc>,
) -> bool {
    match previous {
        None => status == AlertStatus::Failure,
        Some(prev) => {
            if status == AlertStatus::Success && prev.status == AlertStatus::Success {
                return false;
            }
            if status == AlertStatus::Failure {
                let delay_minutes = job
                    .configuration
                    .get_int(ConfigKey::AlertMinutesDelayRepeat)
                    .max(0);
                if now - prev.timestamp < chrono::Duration::minutes(delay_minutes) {
                    return false;
                }
            }
            true
        }
    }
}
