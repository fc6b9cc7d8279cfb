// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Scheduled crontab tasks.
//!
//! A [`CronTask`] is one command line of a crontab: five schedule fields, the
//! command to execute, and the comment lines written above it.

use crate::cron::{
    export_comment,
    field::{DayOfWeek, DaysOfMonth, DaysOfWeek, FieldError, Hours, Minutes, Months},
    list_join,
};

/// Marker prefixed to crontab lines that are disabled.
pub(crate) const DISABLED_MARKER: &str = "#\\";

/// Split disabled marker off of a crontab line.
///
/// Returns whether the line is enabled along with the rest of the line.
pub(crate) fn split_disabled(line: &str) -> (bool, &str) {
    match line.strip_prefix(DISABLED_MARKER) {
        Some(rest) => (false, rest.trim_start()),
        None => (true, line),
    }
}

/// Split next whitespace separated token off of text.
pub(crate) fn next_token(text: &str) -> Option<(&str, &str)> {
    let text = text.trim_start();
    if text.is_empty() {
        return None;
    }

    match text.find(char::is_whitespace) {
        Some(index) => Some((&text[..index], text[index..].trim_start())),
        None => Some((text, "")),
    }
}

/// Scheduled command of a crontab.
///
/// Tasks with `reboot` set run once at system startup, and ignore their five
/// schedule fields entirely.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CronTask {
    pub minute: Minutes,
    pub hour: Hours,
    pub day_of_month: DaysOfMonth,
    pub month: Months,
    pub day_of_week: DaysOfWeek,
    pub reboot: bool,
    pub command: String,
    pub comment: String,
    pub enabled: bool,

    /// Login of the user the task runs as.
    pub user_login: String,

    /// Task belongs to a system crontab with a user column.
    pub system: bool,
}

impl Default for CronTask {
    fn default() -> Self {
        Self {
            minute: Minutes::new(),
            hour: Hours::new(),
            day_of_month: DaysOfMonth::new(),
            month: Months::new(),
            day_of_week: DaysOfWeek::new(),
            reboot: false,
            command: String::new(),
            comment: String::new(),
            enabled: true,
            user_login: String::new(),
            system: false,
        }
    }
}

impl CronTask {
    /// Construct blank task for a command.
    ///
    /// Every schedule field starts out empty, so the task is invalid until a
    /// schedule is set.
    pub fn new(command: impl Into<String>, user_login: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            user_login: user_login.into(),
            ..Default::default()
        }
    }

    /// Parse crontab line into task.
    ///
    /// The line may start with the `#\` disabled marker. System crontab lines
    /// carry the user to run as between the schedule and the command, which
    /// takes precedence over `user_login`.
    ///
    /// # Errors
    ///
    /// - Return [`TaskError::Field`] if a schedule field is malformed.
    /// - Return [`TaskError::MissingField`] if the schedule is incomplete.
    /// - Return [`TaskError::UnknownShorthand`] for unrecognized `@` schedules.
    /// - Return [`TaskError::MissingUser`] if a system line lacks a user.
    /// - Return [`TaskError::MissingCommand`] if no command follows.
    pub fn parse_line(line: &str, user_login: &str, system: bool) -> Result<Self> {
        let (enabled, line) = split_disabled(line.trim());
        let mut task = Self {
            enabled,
            system,
            user_login: user_login.into(),
            ..Default::default()
        };

        let mut rest = task.parse_schedule(line)?;
        if system {
            let (user, remainder) =
                next_token(rest).ok_or_else(|| TaskError::MissingUser { line: line.into() })?;
            task.user_login = user.into();
            rest = remainder;
        }

        let command = rest.trim();
        if command.is_empty() {
            return Err(TaskError::MissingCommand { line: line.into() });
        }
        task.command = command.into();

        Ok(task)
    }

    /// Schedule expression of task, e.g., `*/15 0 * * 1-5` or `@reboot`.
    pub fn schedule(&self) -> String {
        if self.reboot {
            return "@reboot".into();
        }

        format!(
            "{} {} {} {} {}",
            self.minute, self.hour, self.day_of_month, self.month, self.day_of_week
        )
    }

    /// Replace schedule of task with expression.
    ///
    /// # Errors
    ///
    /// - Return [`TaskError`] if the expression is malformed, incomplete, or
    ///   followed by anything other than whitespace.
    pub fn set_schedule(&mut self, expr: &str) -> Result<()> {
        let mut task = self.clone();
        let rest = task.parse_schedule(expr)?;
        if !rest.trim().is_empty() {
            return Err(TaskError::TrailingText { text: rest.into() });
        }

        *self = task;
        Ok(())
    }

    fn parse_schedule<'a>(&mut self, line: &'a str) -> Result<&'a str> {
        let missing = || TaskError::MissingField { line: line.into() };
        let (first, rest) = next_token(line).ok_or_else(missing)?;

        if let Some(name) = first.strip_prefix('@') {
            self.reboot = false;
            let tokens = match name.to_ascii_lowercase().as_str() {
                "reboot" => {
                    self.reboot = true;
                    return Ok(rest);
                }
                "yearly" | "annually" => ["0", "0", "1", "1", "*"],
                "monthly" => ["0", "0", "1", "*", "*"],
                "weekly" => ["0", "0", "*", "*", "0"],
                "daily" | "midnight" => ["0", "0", "*", "*", "*"],
                "hourly" => ["0", "*", "*", "*", "*"],
                _ => return Err(TaskError::UnknownShorthand { name: first.into() }),
            };
            self.parse_fields(tokens)?;
            return Ok(rest);
        }

        let mut tokens = [first, "", "", "", ""];
        let mut rest = rest;
        for slot in tokens.iter_mut().skip(1) {
            let (token, remainder) = next_token(rest).ok_or_else(missing)?;
            *slot = token;
            rest = remainder;
        }

        self.reboot = false;
        self.parse_fields(tokens)?;
        Ok(rest)
    }

    fn parse_fields(&mut self, tokens: [&str; 5]) -> Result<()> {
        let [minute, hour, day_of_month, month, day_of_week] = tokens;
        self.minute = minute.parse()?;
        self.hour = hour.parse()?;
        self.day_of_month = day_of_month.parse()?;
        self.month = month.parse()?;
        self.day_of_week = day_of_week.parse()?;

        Ok(())
    }

    /// Export task as crontab lines.
    ///
    /// Comment lines come first, followed by the schedule, the user column
    /// for system crontabs, and the command. Disabled tasks are written with
    /// the `#\` marker so cron skips them.
    pub fn export(&self) -> String {
        let mut text = export_comment(&self.comment);
        if !self.enabled {
            text.push_str(DISABLED_MARKER);
        }

        text.push_str(&self.schedule());
        text.push('\t');
        if self.system {
            text.push_str(&self.user_login);
            text.push('\t');
        }
        text.push_str(&self.command);
        text.push('\n');

        text
    }

    /// Describe when task runs in human readable form.
    pub fn describe(&self) -> String {
        if self.reboot {
            return "At system startup".into();
        }

        format!("{}, {}", self.describe_time(), self.describe_date())
    }

    fn describe_time(&self) -> String {
        if self.hour.is_all() {
            if self.minute.is_all() {
                return "every minute".into();
            }

            if let (Some(step), true) = (self.minute.stride(), self.minute.enabled_count() > 1) {
                return format!("every {step} minutes");
            }

            let label = if self.minute.enabled_count() == 1 {
                "minute"
            } else {
                "minutes"
            };
            return format!("every hour at {label} {}", self.minute.describe());
        }

        let times = self
            .hour
            .values()
            .flat_map(|hour| {
                self.minute
                    .values()
                    .map(move |minute| format!("{hour:02}:{minute:02}"))
            })
            .collect::<Vec<_>>();

        format!("at {}", list_join(times))
    }

    fn describe_date(&self) -> String {
        let months = if self.month.is_all() {
            None
        } else {
            Some(self.month.describe())
        };

        let days_of_month = (!self.day_of_month.is_all()).then(|| self.day_of_month.describe());
        let days_of_week = (!self.day_of_week.is_all()).then(|| {
            list_join(self.day_of_week.values().map(DayOfWeek::long_name))
        });

        match (days_of_month, days_of_week) {
            (None, None) => match months {
                Some(months) => format!("every day in {months}"),
                None => "every day".into(),
            },
            (Some(dom), None) => format!(
                "on the {dom} of {}",
                months.as_deref().unwrap_or("every month")
            ),
            (None, Some(dow)) => match months {
                Some(months) => format!("on {dow} in {months}"),
                None => format!("on {dow}"),
            },
            (Some(dom), Some(dow)) => match months {
                Some(months) => format!("on the {dom} and on {dow} in {months}"),
                None => format!("on the {dom} and on {dow}"),
            },
        }
    }

    /// Validate that schedule can be saved.
    ///
    /// Reboot tasks are always valid. Otherwise months, days, hours, and
    /// minutes are checked in that order, and the first empty selection is
    /// reported. Days may come from either the day of month or day of week
    /// field.
    ///
    /// # Errors
    ///
    /// - Return [`ScheduleError`] naming the first section without selection.
    pub fn validate(&self) -> Result<(), ScheduleError> {
        if self.reboot {
            return Ok(());
        }

        if self.month.is_empty() {
            return Err(ScheduleError::NoMonth);
        }

        if self.day_of_month.is_empty() && self.day_of_week.is_empty() {
            return Err(ScheduleError::NoDay);
        }

        if self.hour.is_empty() {
            return Err(ScheduleError::NoHour);
        }

        if self.minute.is_empty() {
            return Err(ScheduleError::NoMinute);
        }

        Ok(())
    }

    /// Check if schedule can be saved.
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Complete the day selection before saving.
    ///
    /// Cron runs a task when either day field matches, so a task with only
    /// week days chosen must have every day of month enabled, and vice versa.
    pub fn fill_unselected_days(&mut self) {
        if self.day_of_month.is_empty() && !self.day_of_week.is_empty() {
            self.day_of_month.enable_all();
        }

        if self.day_of_week.is_empty() && !self.day_of_month.is_empty() {
            self.day_of_week.enable_all();
        }
    }

    /// Check if task runs every day of every month.
    pub fn is_every_day(&self) -> bool {
        self.day_of_month.is_all() && self.day_of_week.is_all() && self.month.is_all()
    }
}

/// Task parsing error types.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    /// Schedule field is malformed.
    #[error(transparent)]
    Field(#[from] FieldError),

    /// Schedule has fewer than five fields.
    #[error("incomplete schedule in crontab line {line:?}")]
    MissingField { line: String },

    /// No command follows the schedule.
    #[error("no command in crontab line {line:?}")]
    MissingCommand { line: String },

    /// System crontab line lacks a user column.
    #[error("no user in system crontab line {line:?}")]
    MissingUser { line: String },

    /// Unrecognized `@` schedule.
    #[error("unknown schedule shorthand {name:?}")]
    UnknownShorthand { name: String },

    /// Schedule expression followed by extra text.
    #[error("unexpected text {text:?} after schedule")]
    TrailingText { text: String },
}

/// Schedule validation error types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("Please select from the 'Months' section.")]
    NoMonth,

    #[error("Please select from either the 'Days of Month' or the 'Days of Week' section.")]
    NoDay,

    #[error("Please select from the 'Hours' section.")]
    NoHour,

    #[error("Please select from the 'Minutes' section.")]
    NoMinute,
}

/// Friendly result alias :3
type Result<T, E = TaskError> = std::result::Result<T, E>;
