//! "Malformed for too long" SLA policy (§4.7 table, row 3).

use chrono::{DateTime, Utc};

use crate::config::ConfigKey;
use crate::job::Job;

use super::{AlertStatus, Policy};

pub struct MalformedExpressionPolicy;

impl Policy for MalformedExpressionPolicy {
    fn name(&self) -> &'static str {
        "Malformed_Expression"
    }

    fn is_disabled(&self, job: &Job) -> bool {
        job.configuration
            .get_int(ConfigKey::SlaMalformedExpressionAlertDelayMinutes)
            == -1
    }

    fn evaluate(&self, job: &Job, now: DateTime<Utc>) -> (AlertStatus, String) {
        if !job.row.malformed {
            return (AlertStatus::NotApplicable, String::new());
        }

        let threshold_minutes = job
            .configuration
            .get_int(ConfigKey::SlaMalformedExpressionAlertDelayMinutes)
            .max(0);
        let read_at = DateTime::<Utc>::from_timestamp_millis(job.row.read_timestamp_millis)
            .unwrap_or(now);
        let elapsed = now - read_at;

        if elapsed > chrono::Duration::minutes(threshold_minutes) {
            (
                AlertStatus::Failure,
                format!(
                    "row '{}' has been malformed for {} minute(s), exceeding the {}-minute threshold",
                    job.row.raw_expression,
                    elapsed.num_minutes(),
                    threshold_minutes
                ),
            )
        } else {
            (
                AlertStatus::Success,
                format!(
                    "row '{}' has been malformed for {} minute(s), within the {}-minute threshold",
                    job.row.raw_expression,
                    elapsed.num_minutes(),
                    threshold_minutes
                ),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use crate::crontab::CrontabRow;
    use crate::job::Job;
    use chrono::TimeZone;
    use std::collections::HashMap;

    fn malformed_job(threshold_minutes: i64, read_at_millis: i64) -> Job {
        // Five fields only: malformed per §4.1.
        let row =
            CrontabRow::parse_expression(1, "* * * * root echo hi", false, read_at_millis)
                .unwrap();
        assert!(row.malformed);
        let mut overrides = HashMap::new();
        overrides.insert(
            ConfigKey::SlaMalformedExpressionAlertDelayMinutes,
            threshold_minutes.to_string(),
        );
        let config = Configuration::defaults().with_overrides(&overrides);
        Job::new(row, "echo hi".to_string(), config)
    }

    #[test]
    fn past_threshold_is_failure() {
        let job = malformed_job(0, 0);
        let now = Utc.timestamp_millis_opt(60_000).unwrap();
        let (status, message) = MalformedExpressionPolicy.evaluate(&job, now);
        assert_eq!(status, AlertStatus::Failure);
        assert!(message.contains("malformed"));
    }

    #[test]
    fn within_threshold_is_success() {
        let job = malformed_job(60, 0);
        let now = Utc.timestamp_millis_opt(60_000).unwrap();
        let (status, _) = MalformedExpressionPolicy.evaluate(&job, now);
        assert_eq!(status, AlertStatus::Success);
    }

    #[test]
    fn well_formed_row_is_not_applicable() {
        let row = CrontabRow::parse_expression(1, "* * * * * root echo hi", false, 0).unwrap();
        let job = Job::new(row, "echo hi".to_string(), Configuration::defaults());
        let (status, _) = MalformedExpressionPolicy.evaluate(&job, Utc::now());
        assert_eq!(status, AlertStatus::NotApplicable);
    }

    #[test]
    fn disabled_when_threshold_is_negative_one() {
        let job = malformed_job(-1, 0);
        assert!(MalformedExpressionPolicy.is_disabled(&job));
    }
}
