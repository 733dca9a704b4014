//! "Time since last success" SLA policy (§4.7 table, row 1).

use chrono::{DateTime, Utc};

use crate::config::ConfigKey;
use crate::job::{Job, TaskLogStatus};

use super::{AlertStatus, Policy};

pub struct TimeSinceLastSuccessPolicy;

impl Policy for TimeSinceLastSuccessPolicy {
    fn name(&self) -> &'static str {
        "TimeSinceLastSuccess"
    }

    fn is_disabled(&self, job: &Job) -> bool {
        job.configuration.get_int(ConfigKey::SlaMinutesSinceSuccess) == -1
    }

    fn evaluate(&self, job: &Job, now: DateTime<Utc>) -> (AlertStatus, String) {
        if !job.row.is_runnable() {
            return (AlertStatus::NotApplicable, String::new());
        }

        let threshold_minutes = job
            .configuration
            .get_int(ConfigKey::SlaMinutesSinceSuccess)
            .max(0);
        let threshold = chrono::Duration::minutes(threshold_minutes);

        job.with_task_log(|log| {
            let Some(most_recent) = log.most_recent() else {
                return (AlertStatus::NotApplicable, String::new());
            };
            let most_recent_complete = log.most_recent_complete();

            // Ambiguous: still running, but a recent success already covers
            // the window (§4.7, "most recent status is Started and a
            // Complete exists recently").
            if most_recent.status == TaskLogStatus::Started {
                if let Some(complete) = most_recent_complete {
                    if now - millis_to_dt(complete.timestamp_millis) <= threshold {
                        return (AlertStatus::NotApplicable, String::new());
                    }
                }
            }

            if most_recent.status == TaskLogStatus::Complete {
                return (
                    AlertStatus::Success,
                    format!(
                        "job '{}' completed successfully",
                        job.row.raw_expression
                    ),
                );
            }

            if let Some(complete) = most_recent_complete {
                let elapsed = now - millis_to_dt(complete.timestamp_millis);
                if elapsed <= threshold {
                    return (
                        AlertStatus::Success,
                        format!(
                            "job '{}' last completed successfully {} minute(s) ago, within the {}-minute threshold",
                            job.row.raw_expression,
                            elapsed.num_minutes(),
                            threshold_minutes
                        ),
                    );
                }
                return (
                    AlertStatus::Failure,
                    format!(
                        "job '{}' has not completed successfully in {} minute(s), exceeding the {}-minute threshold",
                        job.row.raw_expression,
                        elapsed.num_minutes(),
                        threshold_minutes
                    ),
                );
            }

            // Never completed. Anchor the window on the earliest retained
            // entry, i.e. the first time this job was ever observed.
            let earliest = log.earliest().expect("log is non-empty");
            let elapsed = now - millis_to_dt(earliest.timestamp_millis);
            if elapsed > threshold {
                (
                    AlertStatus::Failure,
                    format!(
                        "job '{}' has never completed successfully in the {} minute(s) since it was first observed",
                        job.row.raw_expression,
                        elapsed.num_minutes()
                    ),
                )
            } else {
                // Not yet overdue; too early to call this a failure.
                (AlertStatus::NotApplicable, String::new())
            }
        })
    }
}

fn millis_to_dt(millis: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use crate::crontab::CrontabRow;
    use crate::job::{Job, TaskLogEntry};
    use chrono::TimeZone;
    use std::collections::HashMap;

    fn runnable_job(threshold_minutes: i64) -> Job {
        let row = CrontabRow::parse_expression(1, "* * * * * root echo hi", false, 0).unwrap();
        let mut overrides = HashMap::new();
        overrides.insert(
            ConfigKey::SlaMinutesSinceSuccess,
            threshold_minutes.to_string(),
        );
        let config = Configuration::defaults().with_overrides(&overrides);
        Job::new(row, "echo hi".to_string(), config)
    }

    fn entry(id: u64, millis: i64, status: TaskLogStatus) -> TaskLogEntry {
        TaskLogEntry {
            entry_id: id,
            timestamp_millis: millis,
            task_id: id,
            status,
        }
    }

    #[test]
    fn empty_log_is_not_applicable() {
        let job = runnable_job(60);
        let policy = TimeSinceLastSuccessPolicy;
        let (status, _) = policy.evaluate(&job, Utc::now());
        assert_eq!(status, AlertStatus::NotApplicable);
    }

    #[test]
    fn most_recent_complete_is_success() {
        let job = runnable_job(60);
        job.push_log_entry_for_test(entry(1, 0, TaskLogStatus::Complete));
        let policy = TimeSinceLastSuccessPolicy;
        let (status, _) = policy.evaluate(&job, Utc.timestamp_millis_opt(1000).unwrap());
        assert_eq!(status, AlertStatus::Success);
    }

    #[test]
    fn stale_failure_then_complete_within_window_is_success() {
        let job = runnable_job(60);
        job.push_log_entry_for_test(entry(1, 0, TaskLogStatus::Complete));
        job.push_log_entry_for_test(entry(2, 10 * 60_000, TaskLogStatus::Error));
        let now = Utc.timestamp_millis_opt(20 * 60_000).unwrap();
        let policy = TimeSinceLastSuccessPolicy;
        let (status, _) = policy.evaluate(&job, now);
        assert_eq!(status, AlertStatus::Success);
    }

    #[test]
    fn complete_outside_window_is_failure() {
        let job = runnable_job(60);
        job.push_log_entry_for_test(entry(1, 0, TaskLogStatus::Complete));
        job.push_log_entry_for_test(entry(2, 10 * 60_000, TaskLogStatus::Error));
        let now = Utc.timestamp_millis_opt(120 * 60_000).unwrap();
        let policy = TimeSinceLastSuccessPolicy;
        let (status, _) = policy.evaluate(&job, now);
        assert_eq!(status, AlertStatus::Failure);
    }

    #[test]
    fn never_completed_and_overdue_is_failure() {
        let job = runnable_job(60);
        job.push_log_entry_for_test(entry(1, 0, TaskLogStatus::Error));
        let now = Utc.timestamp_millis_opt(120 * 60_000).unwrap();
        let policy = TimeSinceLastSuccessPolicy;
        let (status, _) = policy.evaluate(&job, now);
        assert_eq!(status, AlertStatus::Failure);
    }

    #[test]
    fn never_completed_but_not_yet_overdue_is_not_applicable() {
        let job = runnable_job(60);
        job.push_log_entry_for_test(entry(1, 0, TaskLogStatus::Error));
        let now = Utc.timestamp_millis_opt(5 * 60_000).unwrap();
        let policy = TimeSinceLastSuccessPolicy;
        let (status, _) = policy.evaluate(&job, now);
        assert_eq!(status, AlertStatus::NotApplicable);
    }

    #[test]
    fn disabled_when_threshold_is_negative_one() {
        let job = runnable_job(-1);
        let policy = TimeSinceLastSuccessPolicy;
        assert!(policy.is_disabled(&job));
    }

    #[test]
    fn not_runnable_row_is_not_applicable() {
        let row = CrontabRow::parse_expression(1, "* * * * root echo hi", false, 0).unwrap();
        assert!(row.malformed);
        let job = Job::new(row, "echo hi".to_string(), Configuration::defaults());
        job.push_log_entry_for_test(entry(1, 0, TaskLogStatus::Error));
        let policy = TimeSinceLastSuccessPolicy;
        let (status, _) = policy.evaluate(&job, Utc::now());
        assert_eq!(status, AlertStatus::NotApplicable);
    }
}
