//! "Commented for too long" SLA policy (§4.7 table, row 2).

use chrono::{DateTime, Utc};

use crate::config::ConfigKey;
use crate::job::Job;

use super::{AlertStatus, Policy};

pub struct CommentedExpressionPolicy;

impl Policy for CommentedExpressionPolicy {
    fn name(&self) -> &'static str {
        "Commented_Expression"
    }

    fn is_disabled(&self, job: &Job) -> bool {
        job.configuration
            .get_int(ConfigKey::SlaCommentedExpressionAlertDelayMinutes)
            == -1
    }

    fn evaluate(&self, job: &Job, now: DateTime<Utc>) -> (AlertStatus, String) {
        if !job.row.commented {
            return (AlertStatus::NotApplicable, String::new());
        }

        let threshold_minutes = job
            .configuration
            .get_int(ConfigKey::SlaCommentedExpressionAlertDelayMinutes)
            .max(0);
        let read_at = DateTime::<Utc>::from_timestamp_millis(job.row.read_timestamp_millis)
            .unwrap_or(now);
        let elapsed = now - read_at;

        if elapsed > chrono::Duration::minutes(threshold_minutes) {
            (
                AlertStatus::Failure,
                format!(
                    "row '{}' has been commented out for {} minute(s), exceeding the {}-minute threshold",
                    job.row.raw_expression,
                    elapsed.num_minutes(),
                    threshold_minutes
                ),
            )
        } else {
            (
                AlertStatus::Success,
                format!(
                    "row '{}' has been commented out for {} minute(s), within the {}-minute threshold",
                    job.row.raw_expression,
                    elapsed.num_minutes(),
                    threshold_minutes
                ),
            )
        }
    }
}
