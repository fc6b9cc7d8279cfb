// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Crontab schedule model.
//!
//! Carbon schedules sessions by writing entries into the current user's
//! crontab. This module models that crontab from the bottom up:
//!
//! - A __field__ is one of the five schedule dimensions: minute, hour, day of
//!   month, month, and day of week. Each field is a fixed-range bitset that
//!   can be parsed from, and exported back to, the cron token grammar.
//! - A __task__ bundles the five fields with a command, a comment, and an
//!   enabled flag. The special `@reboot` task ignores its fields entirely.
//! - A __crontab__ is the ordered table of tasks and environment variables
//!   belonging to one user.
//! - The __host__ locates the current user's crontab, checks whether that
//!   user may use cron at all, and saves changes back.
//!
//! # Day of Week Folding
//!
//! Cron accepts both 0 and 7 for Sunday. The day of week field always stores
//! Sunday as 7. Value 0 is folded into 7 whenever the field is parsed or
//! mutated, so the two can never be enabled at the same time.
//!
//! # See Also
//!
//! - [crontab(5)](https://man7.org/linux/man-pages/man5/crontab.5.html)

pub mod field;
pub mod host;
pub mod minutes;
pub mod table;
pub mod task;

pub use field::{
    CronField, CronUnit, DayOfMonth, DayOfWeek, DaysOfMonth, DaysOfWeek, FieldError, Hour, Hours,
    Minute, Minutes, Month, Months,
};
pub use host::{AccessFiles, CronHost};
pub use minutes::{can_reduce, toggle_minute, MinuteDisplay, MinutePreselection, REDUCED_MINUTE_STEP};
pub use table::{CommandBackend, CronVariable, Crontab, CrontabBackend, FileBackend};
pub use task::{CronTask, ScheduleError, TaskError};

use std::path::PathBuf;

/// Placeholder written in place of an empty comment.
pub(crate) const NO_COMMENT: &str = "No comment";

/// Export comment as crontab comment lines.
///
/// Every line of the comment is prefixed with `#`. An empty comment is
/// written as [`NO_COMMENT`] so every entry carries a comment line.
pub(crate) fn export_comment(comment: &str) -> String {
    if comment.is_empty() {
        return format!("#{NO_COMMENT}\n");
    }

    comment.lines().map(|line| format!("#{line}\n")).collect()
}

/// Import comment lines collected above a crontab entry.
///
/// Inverse of [`export_comment`]: the lines are joined back together, and
/// the [`NO_COMMENT`] placeholder becomes an empty comment.
pub(crate) fn import_comment(lines: &[String]) -> String {
    let comment = lines.join("\n");
    if comment == NO_COMMENT {
        String::new()
    } else {
        comment
    }
}

/// Join items into a readable list.
///
/// Produces "a", "a and b", or "a, b, and c".
pub(crate) fn list_join(items: impl IntoIterator<Item = impl AsRef<str>>) -> String {
    let items = items
        .into_iter()
        .map(|item| item.as_ref().to_owned())
        .collect::<Vec<_>>();

    match items.as_slice() {
        [] => String::new(),
        [only] => only.clone(),
        [first, second] => format!("{first} and {second}"),
        [rest @ .., last] => format!("{}, and {last}", rest.join(", ")),
    }
}

/// Crontab access error types.
#[derive(Debug, thiserror::Error)]
pub enum CronError {
    /// User is listed in cron.deny, or missing from cron.allow.
    #[error(
        "user {user:?} is blocked from scheduling synchronisations by either \
         /etc/cron.allow or /etc/cron.deny, check crontab(1) for details"
    )]
    Blocked { user: String },

    /// No login name could be determined for the current user.
    #[error("cannot determine login name for uid {uid}")]
    UnknownUser { uid: u32 },

    /// Current user has no loaded crontab.
    #[error("current user crontab is not loaded")]
    NoCurrentUserCrontab,

    /// Crontab binary could not be executed.
    #[error("failed to execute {:?}", binary.display())]
    Spawn {
        #[source]
        source: std::io::Error,
        binary: PathBuf,
    },

    /// Crontab binary returned failure.
    #[error("command {:?} failed: {stderr}", binary.display())]
    Command { binary: PathBuf, stderr: String },

    /// Crontab file cannot be read.
    #[error("failed to read crontab at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Crontab file cannot be written.
    #[error("failed to write crontab at {:?}", path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use simple_test_case::test_case;

    #[test_case(vec![], ""; "empty")]
    #[test_case(vec!["Mon"], "Mon"; "single")]
    #[test_case(vec!["Mon", "Tue"], "Mon and Tue"; "pair")]
    #[test_case(vec!["Mon", "Tue", "Wed"], "Mon, Tue, and Wed"; "triple")]
    #[test]
    fn list_join_formats(items: Vec<&str>, expect: &str) {
        assert_eq!(list_join(items), expect);
    }

    #[test]
    fn export_comment_per_line() {
        assert_eq!(export_comment(""), "#No comment\n");
        assert_eq!(export_comment("nightly\nbackup"), "#nightly\n#backup\n");
    }

    #[test]
    fn import_comment_drops_placeholder() {
        assert_eq!(import_comment(&["No comment".into()]), "");
        assert_eq!(import_comment(&[]), "");
        assert_eq!(
            import_comment(&["nightly".into(), "backup".into()]),
            "nightly\nbackup"
        );
    }
}
