//! Keyed option store (§4.3, §6). A fixed, closed set of recognised keys,
//! each with a default and an `allow_override` flag, backing typed views
//! (string, int, bool, time zone, downtime interval) that are pure functions
//! of the stored string values.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::NaiveTime;
use chrono_tz::Tz;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed downtime spec {raw:?}: {reason}")]
    MalformedDowntime { raw: String, reason: &'static str },
    #[error("unknown time zone {0:?}")]
    UnknownTimeZone(String),
}

/// The closed set of recognised configuration keys. Ordering here is
/// cosmetic; `canonical()` is the wire representation used in both the main
/// config file and `#override:` lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    CrontabPath,
    Timezone,
    AlertEmailEnabled,
    AlertEmailAddressTo,
    AlertEmailAddressFrom,
    AlertEmailSmtpHost,
    AlertEmailSmtpPort,
    AlertMinutesDelayRepeat,
    AlertDowntime,
    TaskMaxInstanceCount,
    TaskCriticalReturnCode,
    TaskTimeoutMinutes,
    SlaMinutesSinceSuccess,
    SlaCommentedExpressionAlertDelayMinutes,
    SlaMalformedExpressionAlertDelayMinutes,
    CommandPathSu,
    CommandPathKill,
}

impl ConfigKey {
    pub const ALL: &'static [ConfigKey] = &[
        ConfigKey::CrontabPath,
        ConfigKey::Timezone,
        ConfigKey::AlertEmailEnabled,
        ConfigKey::AlertEmailAddressTo,
        ConfigKey::AlertEmailAddressFrom,
        ConfigKey::AlertEmailSmtpHost,
        ConfigKey::AlertEmailSmtpPort,
        ConfigKey::AlertMinutesDelayRepeat,
        ConfigKey::AlertDowntime,
        ConfigKey::TaskMaxInstanceCount,
        ConfigKey::TaskCriticalReturnCode,
        ConfigKey::TaskTimeoutMinutes,
        ConfigKey::SlaMinutesSinceSuccess,
        ConfigKey::SlaCommentedExpressionAlertDelayMinutes,
        ConfigKey::SlaMalformedExpressionAlertDelayMinutes,
        ConfigKey::CommandPathSu,
        ConfigKey::CommandPathKill,
    ];

    pub fn canonical(self) -> &'static str {
        match self {
            ConfigKey::CrontabPath => "crontab.path",
            ConfigKey::Timezone => "timezone",
            ConfigKey::AlertEmailEnabled => "alert.email.enabled",
            ConfigKey::AlertEmailAddressTo => "alert.email.address.to",
            ConfigKey::AlertEmailAddressFrom => "alert.email.address.from",
            ConfigKey::AlertEmailSmtpHost => "alert.email.smtp.host",
            ConfigKey::AlertEmailSmtpPort => "alert.email.smtp.port",
            ConfigKey::AlertMinutesDelayRepeat => "alert.minutes.delay.repeat",
            ConfigKey::AlertDowntime => "alert.downtime",
            ConfigKey::TaskMaxInstanceCount => "task.max.instance.count",
            ConfigKey::TaskCriticalReturnCode => "task.critical.return.code",
            ConfigKey::TaskTimeoutMinutes => "task.timeout.minutes",
            ConfigKey::SlaMinutesSinceSuccess => "sla.minutes.since.success",
            ConfigKey::SlaCommentedExpressionAlertDelayMinutes => {
                "sla.commented.expression.alert.delay.minutes"
            }
            ConfigKey::SlaMalformedExpressionAlertDelayMinutes => {
                "sla.malformed.expression.alert.delay.minutes"
            }
            ConfigKey::CommandPathSu => "command.path.su",
            ConfigKey::CommandPathKill => "command.path.kill",
        }
    }

    pub fn default_value(self) -> &'static str {
        match self {
            ConfigKey::CrontabPath => "/etc/crontab",
            ConfigKey::Timezone => "UTC",
            ConfigKey::AlertEmailEnabled => "false",
            ConfigKey::AlertEmailAddressTo => "someone@example.com",
            ConfigKey::AlertEmailAddressFrom => "someone@example.com",
            ConfigKey::AlertEmailSmtpHost => "localhost",
            ConfigKey::AlertEmailSmtpPort => "25",
            ConfigKey::AlertMinutesDelayRepeat => "20",
            ConfigKey::AlertDowntime => "",
            ConfigKey::TaskMaxInstanceCount => "1",
            ConfigKey::TaskCriticalReturnCode => "100",
            ConfigKey::TaskTimeoutMinutes => "-1",
            ConfigKey::SlaMinutesSinceSuccess => "60",
            ConfigKey::SlaCommentedExpressionAlertDelayMinutes => "-1",
            ConfigKey::SlaMalformedExpressionAlertDelayMinutes => "-1",
            ConfigKey::CommandPathSu => "/usr/bin/su",
            ConfigKey::CommandPathKill => "/usr/bin/kill",
        }
    }

    /// Whether an `#override:` line on a crontab row may change this key.
    pub fn allow_override(self) -> bool {
        matches!(
            self,
            ConfigKey::AlertEmailEnabled
                | ConfigKey::AlertMinutesDelayRepeat
                | ConfigKey::AlertDowntime
                | ConfigKey::TaskMaxInstanceCount
                | ConfigKey::TaskCriticalReturnCode
                | ConfigKey::TaskTimeoutMinutes
                | ConfigKey::SlaMinutesSinceSuccess
                | ConfigKey::SlaCommentedExpressionAlertDelayMinutes
                | ConfigKey::SlaMalformedExpressionAlertDelayMinutes
        )
    }

    fn from_canonical(s: &str) -> Option<ConfigKey> {
        let lower = s.to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.canonical() == lower)
    }
}

/// A local start time plus a positive whole-hour duration (`HH:mm+H`),
/// inclusive at both ends (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DowntimeWindow {
    pub start: NaiveTime,
    pub duration_hours: u32,
}

impl DowntimeWindow {
    pub fn parse(raw: &str) -> Result<DowntimeWindow, ConfigError> {
        let (time_part, hours_part) = raw.split_once('+').ok_or(ConfigError::MalformedDowntime {
            raw: raw.to_string(),
            reason: "missing '+' separator",
        })?;
        let start = NaiveTime::parse_from_str(time_part, "%H:%M").map_err(|_| {
            ConfigError::MalformedDowntime {
                raw: raw.to_string(),
                reason: "start time is not HH:mm",
            }
        })?;
        let duration_hours: u32 = hours_part
            .parse()
            .map_err(|_| ConfigError::MalformedDowntime {
                raw: raw.to_string(),
                reason: "duration is not a whole number of hours",
            })?;
        if duration_hours == 0 {
            return Err(ConfigError::MalformedDowntime {
                raw: raw.to_string(),
                reason: "duration must be positive",
            });
        }
        Ok(DowntimeWindow {
            start,
            duration_hours,
        })
    }

    /// Whether `t` (a local wall-clock time) falls within the window,
    /// inclusive at both ends, with wraparound past midnight handled.
    pub fn contains(&self, t: NaiveTime) -> bool {
        let start_secs = self.start.num_seconds_from_midnight() as i64;
        let end_secs = start_secs + (self.duration_hours as i64) * 3600;
        let t_secs = t.num_seconds_from_midnight() as i64;
        let day = 86_400i64;
        if end_secs <= day {
            (start_secs..=end_secs).contains(&t_secs)
        } else {
            // Wraps past midnight: either in [start, 24:00) or [00:00, end-24h].
            t_secs >= start_secs || t_secs <= end_secs - day
        }
    }
}

use chrono::Timelike;

/// A loaded, fully-resolved configuration. Two instances are interchangeable
/// for Job identity iff `==` (all values plus the source file's mtime).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    values: HashMap<&'static str, String>,
    source_path: Option<PathBuf>,
    file_mtime: Option<SystemTime>,
}

impl Configuration {
    /// All keys at their default value, no backing file.
    pub fn defaults() -> Configuration {
        let values = ConfigKey::ALL
            .iter()
            .map(|k| (k.canonical(), k.default_value().to_string()))
            .collect();
        Configuration {
            values,
            source_path: None,
            file_mtime: None,
        }
    }

    /// Loads `path` as `key=value` lines (`#`-prefixed and blank lines
    /// ignored, unknown keys warned and dropped), layered over defaults.
    pub fn load(path: &Path) -> Result<Configuration, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mtime = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .ok();

        let mut config = Configuration::defaults();
        for line in text.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let Some((key_str, value)) = trimmed.split_once('=') else {
                tracing::warn!(line = trimmed, "ignoring config line with no '='");
                continue;
            };
            match ConfigKey::from_canonical(key_str.trim()) {
                Some(key) => {
                    config.values.insert(key.canonical(), value.trim().to_string());
                }
                None => {
                    tracing::warn!(key = key_str.trim(), "unknown config key, dropping");
                }
            }
        }
        config.source_path = Some(path.to_path_buf());
        config.file_mtime = mtime;
        Ok(config)
    }

    /// Re-reads from the original path. Only valid if this instance was
    /// produced by `load`.
    pub fn reload(&self) -> Result<Configuration, ConfigError> {
        match &self.source_path {
            Some(path) => Configuration::load(path),
            None => Ok(self.clone()),
        }
    }

    pub fn file_mtime(&self) -> Option<SystemTime> {
        self.file_mtime
    }

    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }

    pub fn get_string(&self, key: ConfigKey) -> &str {
        self.values
            .get(key.canonical())
            .map(String::as_str)
            .unwrap_or_else(|| key.default_value())
    }

    pub fn get_int(&self, key: ConfigKey) -> i64 {
        self.get_string(key)
            .parse()
            .unwrap_or_else(|_| key.default_value().parse().unwrap_or(0))
    }

    pub fn get_bool(&self, key: ConfigKey) -> bool {
        self.get_string(key).eq_ignore_ascii_case("true")
    }

    pub fn get_timezone(&self) -> Result<Tz, ConfigError> {
        let raw = self.get_string(ConfigKey::Timezone);
        raw.parse()
            .map_err(|_| ConfigError::UnknownTimeZone(raw.to_string()))
    }

    pub fn get_downtime(&self) -> Option<DowntimeWindow> {
        let raw = self.get_string(ConfigKey::AlertDowntime);
        if raw.trim().is_empty() {
            return None;
        }
        DowntimeWindow::parse(raw).ok()
    }

    /// Merges `overrides` on top of this configuration, dropping any key
    /// whose `allow_override()` is false.
    pub fn with_overrides(&self, overrides: &HashMap<ConfigKey, String>) -> Configuration {
        let mut next = self.clone();
        for (key, value) in overrides {
            if key.allow_override() {
                next.values.insert(key.canonical(), value.clone());
            } else {
                tracing::warn!(key = key.canonical(), "key is not overridable, ignoring");
            }
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_table() {
        let config = Configuration::defaults();
        assert_eq!(config.get_string(ConfigKey::CrontabPath), "/etc/crontab");
        assert_eq!(config.get_int(ConfigKey::TaskTimeoutMinutes), -1);
        assert!(!config.get_bool(ConfigKey::AlertEmailEnabled));
    }

    #[test]
    fn load_parses_known_keys_and_drops_unknown() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# a comment").unwrap();
        writeln!(file, "crontab.path=/tmp/crontab").unwrap();
        writeln!(file, "not.a.real.key=123").unwrap();
        writeln!(file, "task.timeout.minutes=5").unwrap();
        let config = Configuration::load(file.path()).unwrap();
        assert_eq!(config.get_string(ConfigKey::CrontabPath), "/tmp/crontab");
        assert_eq!(config.get_int(ConfigKey::TaskTimeoutMinutes), 5);
    }

    #[test]
    fn overrides_ignore_non_overridable_keys() {
        let base = Configuration::defaults();
        let mut overrides = HashMap::new();
        overrides.insert(ConfigKey::CrontabPath, "/should/not/apply".to_string());
        overrides.insert(ConfigKey::TaskMaxInstanceCount, "4".to_string());
        let merged = base.with_overrides(&overrides);
        assert_eq!(merged.get_string(ConfigKey::CrontabPath), "/etc/crontab");
        assert_eq!(merged.get_int(ConfigKey::TaskMaxInstanceCount), 4);
    }

    #[test]
    fn downtime_window_parses_and_contains() {
        let window = DowntimeWindow::parse("22:00+4").unwrap();
        assert!(window.contains(NaiveTime::from_hms_opt(23, 0, 0).unwrap()));
        assert!(window.contains(NaiveTime::from_hms_opt(1, 0, 0).unwrap()));
        assert!(window.contains(NaiveTime::from_hms_opt(2, 0, 0).unwrap()));
        assert!(!window.contains(NaiveTime::from_hms_opt(3, 0, 0).unwrap()));
        assert!(!window.contains(NaiveTime::from_hms_opt(21, 59, 0).unwrap()));
    }

    #[test]
    fn downtime_window_rejects_malformed() {
        assert!(DowntimeWindow::parse("bogus").is_err());
        assert!(DowntimeWindow::parse("22:00+0").is_err());
        assert!(DowntimeWindow::parse("22:00+-1").is_err());
    }

    #[test]
    fn equality_is_value_by_value() {
        let a = Configuration::defaults();
        let b = Configuration::defaults();
        assert_eq!(a, b);
    }
}
