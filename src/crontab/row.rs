//! A single parsed crontab line (§3 `CrontabRow`) and variable assignments
//! (§3 `CronVariable`).

use regex::Regex;

use super::schedule::Schedule;

/// `{ lineNumber>0, rawExpression, executingUser, command, commented,
/// malformed, readTimestampMillis }`.
#[derive(Debug, Clone)]
pub struct CrontabRow {
    pub line_number: usize,
    /// The textual expression this row was parsed from (six fields, user,
    /// command), used for identity and for the Commented/Malformed alerts.
    pub raw_expression: String,
    pub executing_user: String,
    /// Raw command text, before `CronVariable` substitution.
    pub command: String,
    pub schedule: Option<Schedule>,
    pub commented: bool,
    pub malformed: bool,
    pub read_timestamp_millis: i64,
}

impl CrontabRow {
    pub fn identity_key(&self) -> (String, bool) {
        (self.raw_expression.to_ascii_lowercase(), self.commented)
    }

    /// A row is runnable when it parsed as a real expression: neither
    /// commented nor malformed.
    pub fn is_runnable(&self) -> bool {
        !self.commented && !self.malformed
    }

    /// Parses a non-comment crontab line: six whitespace-separated fields
    /// (minute, hour, day-of-month, month, day-of-week, user) followed by a
    /// command with collapsed internal whitespace. Returns `None` if the
    /// line does not have the shape of an expression at all (fewer than
    /// seven tokens); otherwise always returns a row, flagging `malformed`
    /// when the fields fail to parse as a `Schedule`.
    pub fn parse_expression(
        line_number: usize,
        raw_expression: &str,
        commented: bool,
        now_millis: i64,
    ) -> Option<CrontabRow> {
        let tokens: Vec<&str> = raw_expression.split_whitespace().collect();
        if tokens.len() < 7 {
            return None;
        }
        let (minute, hour, dom, month, dow, user) =
            (tokens[0], tokens[1], tokens[2], tokens[3], tokens[4], tokens[5]);
        let command = tokens[6..].join(" ");

        let schedule = Schedule::parse(minute, hour, dom, month, dow).ok();
        let malformed = schedule.is_none();

        Some(CrontabRow {
            line_number,
            raw_expression: raw_expression.to_string(),
            executing_user: user.to_string(),
            command,
            schedule,
            commented,
            malformed,
            read_timestamp_millis: now_millis,
        })
    }
}

/// `{ name, value, pattern = "(\$<name>)(?=\s+|$)" }`. Substitution is
/// whole-token only.
#[derive(Debug, Clone)]
pub struct CronVariable {
    pub name: String,
    pub value: String,
}

impl CronVariable {
    /// Parses a `NAME=VALUE` line. `VALUE` may be double-quoted, in which
    /// case the value is the content between the first and last quote.
    /// Returns `None` if `NAME` contains whitespace.
    pub fn parse(line: &str) -> Option<CronVariable> {
        let (name, raw_value) = line.split_once('=')?;
        if name.is_empty() || name.chars().any(char::is_whitespace) {
            return None;
        }
        let value = if raw_value.starts_with('"') && raw_value.ends_with('"') && raw_value.len() >= 2
        {
            raw_value[1..raw_value.len() - 1].to_string()
        } else {
            raw_value.to_string()
        };
        Some(CronVariable {
            name: name.to_string(),
            value,
        })
    }

    /// The whole-token substitution pattern for this variable:
    /// `$NAME` not immediately followed by another identifier character.
    fn pattern(&self) -> Regex {
        let escaped = regex::escape(&self.name);
        Regex::new(&format!(r"\${escaped}(?:\s|$)")).expect("static pattern is always valid")
    }

    /// Replaces every whole-token occurrence of `$NAME` in `command` with
    /// this variable's value, preserving the trailing whitespace/end the
    /// lookahead matched on.
    fn substitute_into(&self, command: &str) -> String {
        let re = self.pattern();
        let mut result = String::with_capacity(command.len());
        let mut last_end = 0;
        for m in re.find_iter(command) {
            result.push_str(&command[last_end..m.start()]);
            result.push_str(&self.value);
            // Re-emit whatever followed (the whitespace or end the
            // lookahead consumed) since the match includes it.
            result.push_str(&m.as_str()[1 + self.name.len()..]);
            last_end = m.end();
        }
        result.push_str(&command[last_end..]);
        result
    }
}

/// Applies every variable's substitution, longest name first, so that a
/// variable whose name is a prefix of another's cannot shadow it (§9).
pub fn substitute_variables(command: &str, variables: &[CronVariable]) -> String {
    let mut ordered: Vec<&CronVariable> = variables.iter().collect();
    ordered.sort_by_key(|v| std::cmp::Reverse(v.name.len()));
    let mut result = command.to_string();
    for var in ordered {
        result = var.substitute_into(&result);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_expression() {
        let row = CrontabRow::parse_expression(1, "* * * * * root echo hi", false, 1000).unwrap();
        assert!(!row.malformed);
        assert!(!row.commented);
        assert_eq!(row.executing_user, "root");
        assert_eq!(row.command, "echo hi");
    }

    #[test]
    fn collapses_internal_command_whitespace() {
        let row =
            CrontabRow::parse_expression(1, "* * * * * root echo   hi   there", false, 1000)
                .unwrap();
        assert_eq!(row.command, "echo hi there");
    }

    #[test]
    fn five_field_row_is_malformed() {
        // Missing one field: "root" lands in the day-of-week slot and fails
        // to parse as a number or weekday name.
        let row = CrontabRow::parse_expression(1, "* * * * root echo hi", false, 1000).unwrap();
        assert!(row.malformed);
    }

    #[test]
    fn too_few_tokens_is_not_an_expression_at_all() {
        assert!(CrontabRow::parse_expression(1, "* * * *", false, 1000).is_none());
    }

    #[test]
    fn identity_key_is_case_insensitive_on_expression() {
        let a = CrontabRow::parse_expression(1, "* * * * * ROOT echo hi", false, 0).unwrap();
        let b = CrontabRow::parse_expression(2, "* * * * * root echo hi", false, 0).unwrap();
        assert_eq!(a.identity_key(), b.identity_key());
    }

    #[test]
    fn variable_parses_quoted_value() {
        let var = CronVariable::parse(r#"NAME="hello world""#).unwrap();
        assert_eq!(var.name, "NAME");
        assert_eq!(var.value, "hello world");
    }

    #[test]
    fn variable_rejects_whitespace_in_name() {
        assert!(CronVariable::parse("NA ME=value").is_none());
    }

    #[test]
    fn substitution_is_whole_token_only() {
        let vars = vec![
            CronVariable {
                name: "VAR".to_string(),
                value: "short".to_string(),
            },
            CronVariable {
                name: "VAR1".to_string(),
                value: "long".to_string(),
            },
        ];
        assert_eq!(substitute_variables("echo $VAR1", &vars), "echo long");
        assert_eq!(substitute_variables("echo $VAR", &vars), "echo short");
        assert_eq!(substitute_variables("echo $VAR and $VAR1", &vars), "echo short and long");
    }

    #[test]
    fn substitution_identity_when_no_tokens_present() {
        let vars = vec![CronVariable {
            name: "VAR".to_string(),
            value: "x".to_string(),
        }];
        assert_eq!(substitute_variables("echo hello", &vars), "echo hello");
    }
}
