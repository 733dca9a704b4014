//! The calendar-minute ticking loop (§4.2): drives `JobManager.run()` exactly
//! once per minute and owns reload detection for the config and crontab
//! files.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::config::Configuration;
use crate::crontab::Crontab;
use crate::job::JobManager;

pub struct SchedulerLoop {
    clock: Arc<dyn Clock>,
    manager: Arc<JobManager>,
    config_path: PathBuf,
    crontab_path: PathBuf,
    config_mtime: Mutex<Option<SystemTime>>,
    crontab_mtime: Mutex<Option<SystemTime>>,
}

impl SchedulerLoop {
    pub fn new(
        clock: Arc<dyn Clock>,
        manager: Arc<JobManager>,
        config_path: PathBuf,
        crontab_path: PathBuf,
        initial_config_mtime: Option<SystemTime>,
        initial_crontab_mtime: Option<SystemTime>,
    ) -> SchedulerLoop {
        SchedulerLoop {
            clock,
            manager,
            config_path,
            crontab_path,
            config_mtime: Mutex::new(initial_config_mtime),
            crontab_mtime: Mutex::new(initial_crontab_mtime),
        }
    }

    /// Runs forever, evaluating `JobManager` exactly once per calendar
    /// minute (§4.2). The only clean exits are signal-based; this function
    /// itself never returns under normal operation.
    pub async fn run(&self) {
        let mut target = ceil_to_next_minute(self.clock.now());

        loop {
            while self.clock.now() < target {
                self.maybe_reload();
                tokio::time::sleep(Duration::from_secs(1)).await;
            }

            let now = self.clock.now();
            if now > target {
                warn!(target = %target, now = %now, "scheduler tick skipped, not caught up");
            }

            target = ceil_to_next_minute(now + chrono::Duration::milliseconds(1));

            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                self.manager.run();
            }));
            if let Err(panic) = result {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "<non-string panic payload>".to_string());
                warn!(message, "scheduler loop body panicked; loop continues");
            }
        }
    }

    /// Reloads configuration and/or crontab if either file's mtime has
    /// advanced since the last load (§4.2). Reload never interrupts an
    /// in-flight `JobManager.run()`, since this is only ever called between
    /// ticks.
    fn maybe_reload(&self) {
        let config_changed = file_mtime(&self.config_path) > *self.config_mtime.lock();
        let crontab_changed = file_mtime(&self.crontab_path) > *self.crontab_mtime.lock();
        if !config_changed && !crontab_changed {
            return;
        }

        let new_config = match Configuration::load(&self.config_path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "failed to reload configuration, keeping previous");
                return;
            }
        };
        let now_millis = self.clock.now().timestamp_millis();
        let new_crontab = match Crontab::load(&self.crontab_path, &new_config, now_millis) {
            Ok(crontab) => crontab,
            Err(e) => {
                warn!(error = %e, "failed to reload crontab, keeping previous");
                return;
            }
        };

        info!("configuration and/or crontab changed, reloading");
        *self.config_mtime.lock() = new_config.file_mtime();
        *self.crontab_mtime.lock() = new_crontab.file_mtime;
        self.manager.update_configuration(&new_config, &new_crontab);
    }
}

fn file_mtime(path: &std::path::Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// The next whole UTC minute strictly after `t` (ms resolution). Used both
/// for the initial tick target and for recomputing "strictly the next
/// minute" after each evaluation (§4.2): flooring to the minute and adding
/// one always lands strictly after `t`, whether or not `t` sits exactly on a
/// boundary.
fn ceil_to_next_minute(t: DateTime<Utc>) -> DateTime<Utc> {
    let next_minute_epoch_secs = (t.timestamp().div_euclid(60) + 1) * 60;
    Utc.timestamp_opt(next_minute_epoch_secs, 0).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceil_rounds_up_from_mid_minute() {
        let t = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 30).unwrap();
        let rounded = ceil_to_next_minute(t);
        assert_eq!(rounded, Utc.with_ymd_and_hms(2026, 1, 1, 0, 1, 0).unwrap());
    }

    #[test]
    fn ceil_strictly_advances_from_an_exact_boundary() {
        let t = Utc.with_ymd_and_hms(2026, 1, 1, 0, 1, 0).unwrap();
        let rounded = ceil_to_next_minute(t);
        assert_eq!(rounded, Utc.with_ymd_and_hms(2026, 1, 1, 0, 2, 0).unwrap());
    }
}
