//! Whole-file crontab parsing (§4.1 `Crontab`).

pub mod row;
pub mod schedule;

pub use row::{substitute_variables, CronVariable, CrontabRow};
pub use schedule::{Schedule, ScheduleParseError};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use thiserror::Error;

use crate::config::{ConfigKey, Configuration};

#[derive(Debug, Error)]
pub enum CrontabError {
    #[error("could not read crontab file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The result of parsing one whole crontab file (§4.1 contract).
#[derive(Debug, Clone)]
pub struct Crontab {
    pub rows: Vec<CrontabRow>,
    pub variables: Vec<CronVariable>,
    /// Per-row-line-number configuration produced by applying that line's
    /// pending `#override:` directive over `base_config`.
    pub overrides: HashMap<usize, Configuration>,
    pub bad_row_count: usize,
    pub file_mtime: Option<SystemTime>,
}

impl Crontab {
    pub fn load(path: &Path, base_config: &Configuration, now_millis: i64) -> Result<Crontab, CrontabError> {
        let text = std::fs::read_to_string(path).map_err(|source| CrontabError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file_mtime = std::fs::metadata(path).and_then(|m| m.modified()).ok();

        let mut rows_by_identity: HashMap<(String, bool), CrontabRow> = HashMap::new();
        let mut row_order: Vec<(String, bool)> = Vec::new();
        let mut variables: Vec<CronVariable> = Vec::new();
        let mut pending_override: Option<HashMap<ConfigKey, String>> = None;
        let mut overrides: HashMap<usize, Configuration> = HashMap::new();
        let mut bad_row_count = 0usize;

        for (idx, raw_line) in text.lines().enumerate() {
            let line_number = idx + 1;
            let trimmed = raw_line.trim();
            if trimmed.is_empty() {
                continue;
            }

            if let Some(rest) = trimmed.strip_prefix("#override:") {
                pending_override = Some(parse_override_line(rest));
                continue;
            }

            if let Some(var) = try_parse_variable(trimmed) {
                variables.push(var);
                // Pending override is retained across variable lines (§4.1 step 3).
                continue;
            }

            let (commented, expression_text) = collapse_comment_prefix(trimmed);

            let row = if commented {
                match expression_text {
                    Some(expr) => CrontabRow::parse_expression(line_number, expr, true, now_millis),
                    None => None,
                }
            } else {
                CrontabRow::parse_expression(line_number, trimmed, false, now_millis)
            };

            match row {
                // §4.1 step 4: a commented line that also fails to parse as
                // a schedule is just prose, not a malformed row — discard it
                // like any other general comment.
                Some(row) if row.commented && row.malformed => {
                    if pending_override.take().is_some() {
                        tracing::warn!(
                            line_number,
                            "pending #override: was never attached to a row, dropping"
                        );
                    }
                }
                Some(row) => {
                    if row.malformed {
                        bad_row_count += 1;
                    }
                    if let Some(map) = pending_override.take() {
                        overrides.insert(
                            line_number,
                            base_config.with_overrides(&map),
                        );
                    }
                    let key = row.identity_key();
                    if !rows_by_identity.contains_key(&key) {
                        row_order.push(key.clone());
                    }
                    rows_by_identity.insert(key, row);
                }
                None => {
                    // General comment, or a commented line whose remainder
                    // didn't even look like an expression: discarded.
                    if pending_override.take().is_some() {
                        tracing::warn!(
                            line_number,
                            "pending #override: was never attached to a row, dropping"
                        );
                    }
                }
            }
        }

        let rows = row_order
            .into_iter()
            .map(|key| rows_by_identity.remove(&key).expect("key was just inserted"))
            .collect();

        Ok(Crontab {
            rows,
            variables,
            overrides,
            bad_row_count,
            file_mtime,
        })
    }

    /// The effective configuration for a given row: its line's override
    /// configuration if one was attached, else `base_config`.
    pub fn configuration_for<'a>(&'a self, row: &CrontabRow, base_config: &'a Configuration) -> &'a Configuration {
        self.overrides.get(&row.line_number).unwrap_or(base_config)
    }
}

fn parse_override_line(rest: &str) -> HashMap<ConfigKey, String> {
    let mut map = HashMap::new();
    for pair in rest.split(',') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let Some((key_str, value)) = pair.split_once('=') else {
            tracing::warn!(pair, "ignoring malformed override entry");
            continue;
        };
        let key_str = key_str.trim();
        match ConfigKey::ALL.iter().find(|k| k.canonical().eq_ignore_ascii_case(key_str)) {
            Some(key) if key.allow_override() => {
                map.insert(*key, value.trim().to_string());
            }
            Some(_) => {
                tracing::warn!(key = key_str, "key is not overridable, dropping");
            }
            None => {
                tracing::warn!(key = key_str, "unknown override key, dropping");
            }
        }
    }
    map
}

/// A line is a candidate variable assignment when it has the `NAME=VALUE`
/// shape and `NAME` contains no whitespace. `#override:` lines are handled
/// separately before this is tried.
fn try_parse_variable(trimmed: &str) -> Option<CronVariable> {
    if trimmed.starts_with('#') {
        return None;
    }
    CronVariable::parse(trimmed)
}

/// Collapses a leading run of `#` characters and following whitespace into a
/// single `#`, per §4.1 step 4 and the open question on `## foo` -> `# foo`.
/// Returns `(is_commented, remainder)`, where `remainder` is `None` if the
/// line is not commented at all (caller should treat it as a plain line).
fn collapse_comment_prefix(trimmed: &str) -> (bool, Option<&str>) {
    if !trimmed.starts_with('#') {
        return (false, None);
    }
    let after_hashes = trimmed.trim_start_matches('#');
    let remainder = after_hashes.trim_start();
    if remainder.is_empty() {
        (true, None)
    } else {
        (true, Some(remainder))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_crontab(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{contents}").unwrap();
        file
    }

    #[test]
    fn parses_simple_row() {
        let file = write_crontab("*/2 * * * * root echo hi\n");
        let base = Configuration::defaults();
        let crontab = Crontab::load(file.path(), &base, 0).unwrap();
        assert_eq!(crontab.rows.len(), 1);
        assert_eq!(crontab.bad_row_count, 0);
        assert!(!crontab.rows[0].commented);
    }

    #[test]
    fn blank_and_plain_comment_lines_are_skipped() {
        let file = write_crontab("\n# just a comment\n\n");
        let base = Configuration::defaults();
        let crontab = Crontab::load(file.path(), &base, 0).unwrap();
        assert!(crontab.rows.is_empty());
    }

    #[test]
    fn commented_expression_is_retained() {
        let file = write_crontab("# * * * * * root echo hi\n");
        let base = Configuration::defaults();
        let crontab = Crontab::load(file.path(), &base, 0).unwrap();
        assert_eq!(crontab.rows.len(), 1);
        assert!(crontab.rows[0].commented);
        assert!(!crontab.rows[0].malformed);
    }

    #[test]
    fn double_hash_collapses_to_single() {
        let file = write_crontab("## * * * * * root echo hi\n");
        let base = Configuration::defaults();
        let crontab = Crontab::load(file.path(), &base, 0).unwrap();
        assert_eq!(crontab.rows.len(), 1);
        assert!(crontab.rows[0].commented);
    }

    #[test]
    fn malformed_row_is_retained_and_counted() {
        let file = write_crontab("* * * * root echo hi\n");
        let base = Configuration::defaults();
        let crontab = Crontab::load(file.path(), &base, 0).unwrap();
        assert_eq!(crontab.rows.len(), 1);
        assert!(crontab.rows[0].malformed);
        assert_eq!(crontab.bad_row_count, 1);
    }

    #[test]
    fn variable_assignment_is_captured() {
        let file = write_crontab("GREETING=hello\n* * * * * root echo $GREETING\n");
        let base = Configuration::defaults();
        let crontab = Crontab::load(file.path(), &base, 0).unwrap();
        assert_eq!(crontab.variables.len(), 1);
        assert_eq!(crontab.variables[0].name, "GREETING");
        assert_eq!(crontab.rows.len(), 1);
    }

    #[test]
    fn override_attaches_to_following_row_only() {
        let file = write_crontab(
            "#override: task.timeout.minutes=5\n*/2 * * * * root sleep 300\n*/2 * * * * root echo hi\n",
        );
        let base = Configuration::defaults();
        let crontab = Crontab::load(file.path(), &base, 0).unwrap();
        assert_eq!(crontab.rows.len(), 2);
        let sleep_row = &crontab.rows[0];
        let echo_row = &crontab.rows[1];
        let sleep_config = crontab.configuration_for(sleep_row, &base);
        let echo_config = crontab.configuration_for(echo_row, &base);
        assert_eq!(sleep_config.get_int(ConfigKey::TaskTimeoutMinutes), 5);
        assert_eq!(echo_config.get_int(ConfigKey::TaskTimeoutMinutes), -1);
    }

    #[test]
    fn duplicate_rows_merge_by_identity() {
        let file = write_crontab(
            "* * * * * root echo hi\n* * * * * ROOT echo hi\n",
        );
        let base = Configuration::defaults();
        let crontab = Crontab::load(file.path(), &base, 0).unwrap();
        assert_eq!(crontab.rows.len(), 1);
    }
}
