// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Session settings.
//!
//! A __session__ is a named synchronization job: a source, a destination,
//! the rsync options to transfer with, and an optional schedule. Settings are
//! persisted as a small INI file with a single `[Settings]` section that the
//! external rsync wrapper reads when it runs the session.
//!
//! # Format
//!
//! Each setting is written as `key=value` on its own line. Booleans are the
//! literal `true` or `false`, and everything after the first `=` is the
//! value. Unknown keys are ignored, and missing or unparseable values fall
//! back to their defaults.
//!
//! ```text
//! [Settings]
//! src=/home/awkless
//! dest=/media/backup
//! archive=true
//! ...
//! maxBackupAge=7
//! maxFileSize=0
//! customOptions="--bwlimit=1000"
//! scheduleType=1
//! cronStr=
//! ```

pub mod exclude;

pub use exclude::{ExcludeFile, ExcludePattern};

use crate::path::home_dir;

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::PathBuf,
    str::FromStr,
};

/// Largest backup retention age in days.
pub const MAX_BACKUP_AGE: u16 = 365;

/// Largest file size limit in megabytes.
pub const MAX_FILE_SIZE: u32 = 65535;

const SECTION: &str = "[Settings]";

/// Kinds of session schedule.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleKind {
    #[default]
    None,
    Daily,
    Weekly,
    Monthly,
    Cron,
}

impl ScheduleKind {
    /// Convert stored index into schedule kind.
    ///
    /// Unknown indices mean no schedule.
    pub fn from_index(index: i64) -> Self {
        match index {
            1 => Self::Daily,
            2 => Self::Weekly,
            3 => Self::Monthly,
            4 => Self::Cron,
            _ => Self::None,
        }
    }

    pub fn index(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Daily => 1,
            Self::Weekly => 2,
            Self::Monthly => 3,
            Self::Cron => 4,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Daily => "Daily",
            Self::Weekly => "Weekly",
            Self::Monthly => "Monthly",
            Self::Cron => "Custom",
        }
    }
}

impl FromStr for ScheduleKind {
    type Err = SessionError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            "cron" | "custom" => Ok(Self::Cron),
            _ => Err(SessionError::UnknownSchedule { name: name.into() }),
        }
    }
}

impl Display for ScheduleKind {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.label())
    }
}

/// Persisted settings of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub src: String,
    pub dest: String,
    pub archive: bool,
    pub recursive: bool,
    pub skip_files_on_size_match: bool,
    pub skip_receiver_newer_files: bool,
    pub keep_partial: bool,
    pub only_update: bool,
    pub use_compression: bool,
    pub checksum: bool,
    pub windows_compat: bool,
    pub ignore_existing: bool,
    pub make_backups: bool,
    pub delete_extra_files_on_receiver: bool,
    pub copy_symlinks_as_symlinks: bool,
    pub preserve_permissions: bool,
    pub preserve_special_files: bool,
    pub preserve_owner: bool,
    pub dont_leave_file_system: bool,
    pub preserve_group: bool,
    pub modification_times: bool,
    pub cvs_exclude: bool,

    /// Days to keep backups for, at most [`MAX_BACKUP_AGE`].
    pub max_backup_age: u16,

    /// Largest file to transfer in megabytes, at most [`MAX_FILE_SIZE`].
    /// Zero means no limit.
    pub max_file_size: u32,

    /// Extra rsync options passed through verbatim.
    pub custom_options: String,

    pub schedule: ScheduleKind,

    /// Schedule expression used with [`ScheduleKind::Cron`].
    pub cron_schedule: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            src: home_dir()
                .map(|path| path.to_string_lossy().into_owned())
                .unwrap_or_default(),
            dest: "/tmp".into(),
            archive: true,
            recursive: true,
            skip_files_on_size_match: false,
            skip_receiver_newer_files: true,
            keep_partial: false,
            only_update: false,
            use_compression: false,
            checksum: false,
            windows_compat: false,
            ignore_existing: false,
            make_backups: false,
            delete_extra_files_on_receiver: true,
            copy_symlinks_as_symlinks: true,
            preserve_permissions: true,
            preserve_special_files: true,
            preserve_owner: true,
            dont_leave_file_system: false,
            preserve_group: true,
            modification_times: true,
            cvs_exclude: true,
            max_backup_age: 7,
            max_file_size: 0,
            custom_options: String::new(),
            schedule: ScheduleKind::None,
            cron_schedule: String::new(),
        }
    }
}

impl SessionSettings {
    fn flags(&self) -> [(&'static str, bool); 20] {
        [
            ("archive", self.archive),
            ("recursive", self.recursive),
            ("skipFilesOnSizeMatch", self.skip_files_on_size_match),
            ("skipReceiverNewerFiles", self.skip_receiver_newer_files),
            ("keepPartial", self.keep_partial),
            ("onlyUpdate", self.only_update),
            ("useCompression", self.use_compression),
            ("checksum", self.checksum),
            ("windowsCompat", self.windows_compat),
            ("ignoreExisting", self.ignore_existing),
            ("makeBackups", self.make_backups),
            ("deleteExtraFilesOnReceiver", self.delete_extra_files_on_receiver),
            ("copySymlinksAsSymlinks", self.copy_symlinks_as_symlinks),
            ("preservePermissions", self.preserve_permissions),
            ("preserveSpecialFiles", self.preserve_special_files),
            ("preserveOwner", self.preserve_owner),
            ("dontLeaveFileSystem", self.dont_leave_file_system),
            ("preserveGroup", self.preserve_group),
            ("modificationTimes", self.modification_times),
            ("cvsExclude", self.cvs_exclude),
        ]
    }

    fn flag_mut(&mut self, key: &str) -> Option<&mut bool> {
        let flag = match key {
            "archive" => &mut self.archive,
            "recursive" => &mut self.recursive,
            "skipFilesOnSizeMatch" => &mut self.skip_files_on_size_match,
            "skipReceiverNewerFiles" => &mut self.skip_receiver_newer_files,
            "keepPartial" => &mut self.keep_partial,
            "onlyUpdate" => &mut self.only_update,
            "useCompression" => &mut self.use_compression,
            "checksum" => &mut self.checksum,
            "windowsCompat" => &mut self.windows_compat,
            "ignoreExisting" => &mut self.ignore_existing,
            "makeBackups" => &mut self.make_backups,
            "deleteExtraFilesOnReceiver" => &mut self.delete_extra_files_on_receiver,
            "copySymlinksAsSymlinks" => &mut self.copy_symlinks_as_symlinks,
            "preservePermissions" => &mut self.preserve_permissions,
            "preserveSpecialFiles" => &mut self.preserve_special_files,
            "preserveOwner" => &mut self.preserve_owner,
            "dontLeaveFileSystem" => &mut self.dont_leave_file_system,
            "preserveGroup" => &mut self.preserve_group,
            "modificationTimes" => &mut self.modification_times,
            "cvsExclude" => &mut self.cvs_exclude,
            _ => return None,
        };

        Some(flag)
    }

    /// Set a setting by its file key.
    ///
    /// Values that fail to parse leave the setting at its current value.
    ///
    /// # Errors
    ///
    /// - Return [`SessionError::UnknownKey`] if no setting has the key.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        if let Some(flag) = self.flag_mut(key) {
            *flag = value == "true";
            return Ok(());
        }

        match key {
            "src" => self.src = value.into(),
            "dest" => self.dest = value.into(),
            "maxBackupAge" => {
                if let Ok(age) = value.trim().parse::<i64>() {
                    self.max_backup_age = clamp(age, MAX_BACKUP_AGE.into()) as u16;
                }
            }
            "maxFileSize" => {
                if let Ok(size) = value.trim().parse::<i64>() {
                    self.max_file_size = clamp(size, MAX_FILE_SIZE.into()) as u32;
                }
            }
            "customOptions" => self.custom_options = unquote(value),
            "scheduleType" => {
                if let Ok(index) = value.trim().parse::<i64>() {
                    self.schedule = ScheduleKind::from_index(index);
                }
            }
            "cronStr" => self.cron_schedule = value.trim().into(),
            _ => return Err(SessionError::UnknownKey { key: key.into() }),
        }

        Ok(())
    }

    /// Apply invariants between settings.
    ///
    /// Archive mode implies preservation of symlinks, permissions, special
    /// files, owner, and group. Numeric limits are clamped into range.
    pub fn normalize(&mut self) {
        if self.archive {
            self.copy_symlinks_as_symlinks = true;
            self.preserve_permissions = true;
            self.preserve_special_files = true;
            self.preserve_owner = true;
            self.preserve_group = true;
        }

        self.max_backup_age = self.max_backup_age.min(MAX_BACKUP_AGE);
        self.max_file_size = self.max_file_size.min(MAX_FILE_SIZE);
    }

    /// Human readable kind of session.
    pub fn kind_label(&self) -> &'static str {
        if self.make_backups {
            "Backup"
        } else {
            "Synchronisation"
        }
    }

    /// Cron schedule expression for configured schedule.
    ///
    /// Returns `None` when the session is not scheduled.
    pub fn schedule_expression(&self) -> Option<String> {
        match self.schedule {
            ScheduleKind::None => None,
            ScheduleKind::Daily => Some("0 0 * * *".into()),
            ScheduleKind::Weekly => Some("0 0 * * 7".into()),
            ScheduleKind::Monthly => Some("0 0 1 * *".into()),
            ScheduleKind::Cron => Some(self.cron_schedule.clone()),
        }
    }

    /// Source path of session.
    pub fn source_path(&self) -> PathBuf {
        PathBuf::from(&self.src)
    }
}

fn clamp(value: i64, max: i64) -> i64 {
    value.clamp(0, max)
}

fn unquote(value: &str) -> String {
    let value = value.strip_prefix('"').unwrap_or(value);
    let value = value.strip_suffix('"').unwrap_or(value);
    value.replace("\\\"", "\"").replace("\\'", "'")
}

fn quote(value: &str) -> String {
    if value.is_empty() {
        return String::new();
    }

    format!(
        "\"{}\"",
        value.replace('"', "\\\"").replace('\'', "\\'")
    )
}

impl From<&str> for SessionSettings {
    fn from(content: &str) -> Self {
        let mut settings = Self::default();
        for line in content.lines() {
            if line.starts_with('#') || line.starts_with('[') {
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                // INVARIANT: Unknown keys from newer versions are ignored.
                let _ = settings.set(key.trim(), value);
            }
        }

        settings.normalize();
        settings
    }
}

impl From<String> for SessionSettings {
    fn from(content: String) -> Self {
        Self::from(content.as_str())
    }
}

impl Display for SessionSettings {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        writeln!(fmt, "{SECTION}")?;
        writeln!(fmt, "src={}", self.src)?;
        writeln!(fmt, "dest={}", self.dest)?;
        for (key, value) in self.flags() {
            writeln!(fmt, "{key}={value}")?;
        }
        writeln!(fmt, "maxBackupAge={}", self.max_backup_age.min(MAX_BACKUP_AGE))?;
        writeln!(fmt, "maxFileSize={}", self.max_file_size.min(MAX_FILE_SIZE))?;
        writeln!(fmt, "customOptions={}", quote(&self.custom_options))?;
        writeln!(fmt, "scheduleType={}", self.schedule.index())?;
        writeln!(fmt, "cronStr={}", self.cron_schedule)
    }
}

/// Session settings error types.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Setting key does not exist.
    #[error("unknown session setting {key:?}")]
    UnknownKey { key: String },

    /// Schedule name does not exist.
    #[error("unknown schedule {name:?}, expected none, daily, weekly, monthly, or cron")]
    UnknownSchedule { name: String },

    /// Exclude file cannot be read.
    #[error("failed to read exclude file at {:?}", path.display())]
    ReadExclude {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Exclude file cannot be written.
    #[error("failed to write exclude file at {:?}", path.display())]
    WriteExclude {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Exclude file cannot be removed.
    #[error("failed to remove exclude file at {:?}", path.display())]
    RemoveExclude {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Exclude pattern cannot be compiled.
    #[error("invalid exclude pattern {pattern:?}")]
    Pattern {
        #[source]
        source: ignore::Error,
        pattern: String,
    },
}

/// Friendly result alias :3
pub type Result<T, E = SessionError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use simple_test_case::test_case;

    #[test]
    fn parse_settings_file() {
        let result = SessionSettings::from(indoc! {r#"
            [Settings]
            src=/home/awkless/docs
            dest=/media/backup
            archive=false
            recursive=true
            preserveOwner=false
            useCompression=true
            maxBackupAge=30
            maxFileSize=512
            customOptions="--bwlimit=1000 --filter=\"- *.o\""
            scheduleType=4
            cronStr=*/30 2 * * 1-5
        "#});

        let expect = SessionSettings {
            src: "/home/awkless/docs".into(),
            dest: "/media/backup".into(),
            archive: false,
            preserve_owner: false,
            use_compression: true,
            max_backup_age: 30,
            max_file_size: 512,
            custom_options: "--bwlimit=1000 --filter=\"- *.o\"".into(),
            schedule: ScheduleKind::Cron,
            cron_schedule: "*/30 2 * * 1-5".into(),
            ..SessionSettings::default()
        };

        assert_eq!(result, expect);
    }

    #[test]
    fn archive_forces_preservation() {
        let result = SessionSettings::from(indoc! {r#"
            [Settings]
            archive=true
            preserveOwner=false
            preserveGroup=false
            copySymlinksAsSymlinks=false
        "#});

        assert!(result.preserve_owner);
        assert!(result.preserve_group);
        assert!(result.copy_symlinks_as_symlinks);
    }

    #[test_case("maxBackupAge=999", 365, 0; "age above range")]
    #[test_case("maxBackupAge=-5", 0, 0; "age below range")]
    #[test_case("maxFileSize=100000", 7, 65535; "size above range")]
    #[test_case("maxFileSize=abc", 7, 0; "size garbage")]
    #[test]
    fn numeric_settings_are_clamped(line: &str, age: u16, size: u32) {
        let result = SessionSettings::from(format!("[Settings]\n{line}\n"));
        assert_eq!(result.max_backup_age, age);
        assert_eq!(result.max_file_size, size);
    }

    #[test]
    fn clamp_is_idempotent_across_save() {
        let first = SessionSettings::from("[Settings]\nmaxBackupAge=999\n");
        assert_eq!(first.max_backup_age, 365);

        let second = SessionSettings::from(first.to_string());
        assert_eq!(second.max_backup_age, 365);
        assert_eq!(second, first);
    }

    #[test]
    fn value_keeps_later_equals_signs() {
        let result = SessionSettings::from("[Settings]\ndest=user@host:/srv/a=b\n");
        assert_eq!(result.dest, "user@host:/srv/a=b");
    }

    #[test]
    fn serialize_settings_file() {
        let settings = SessionSettings {
            src: "/home/awkless".into(),
            dest: "/media/backup".into(),
            custom_options: "--exclude='*.tmp'".into(),
            schedule: ScheduleKind::Weekly,
            ..SessionSettings::default()
        };

        let expect = indoc! {r#"
            [Settings]
            src=/home/awkless
            dest=/media/backup
            archive=true
            recursive=true
            skipFilesOnSizeMatch=false
            skipReceiverNewerFiles=true
            keepPartial=false
            onlyUpdate=false
            useCompression=false
            checksum=false
            windowsCompat=false
            ignoreExisting=false
            makeBackups=false
            deleteExtraFilesOnReceiver=true
            copySymlinksAsSymlinks=true
            preservePermissions=true
            preserveSpecialFiles=true
            preserveOwner=true
            dontLeaveFileSystem=false
            preserveGroup=true
            modificationTimes=true
            cvsExclude=true
            maxBackupAge=7
            maxFileSize=0
            customOptions="--exclude=\'*.tmp\'"
            scheduleType=2
            cronStr=
        "#};

        assert_eq!(settings.to_string(), expect);
        assert_eq!(SessionSettings::from(expect), settings);
    }

    #[test_case(ScheduleKind::None, None; "none")]
    #[test_case(ScheduleKind::Daily, Some("0 0 * * *"); "daily")]
    #[test_case(ScheduleKind::Weekly, Some("0 0 * * 7"); "weekly")]
    #[test_case(ScheduleKind::Monthly, Some("0 0 1 * *"); "monthly")]
    #[test_case(ScheduleKind::Cron, Some("5 4 * * *"); "cron")]
    #[test]
    fn schedule_expressions(kind: ScheduleKind, expect: Option<&str>) {
        let settings = SessionSettings {
            schedule: kind,
            cron_schedule: "5 4 * * *".into(),
            ..SessionSettings::default()
        };

        assert_eq!(settings.schedule_expression().as_deref(), expect);
    }

    #[test]
    fn kind_label_follows_backups() {
        let mut settings = SessionSettings::default();
        assert_eq!(settings.kind_label(), "Synchronisation");
        settings.make_backups = true;
        assert_eq!(settings.kind_label(), "Backup");
    }

    #[test]
    fn unknown_key_is_rejected() {
        let mut settings = SessionSettings::default();
        let result = settings.set("bogus", "true");
        assert!(matches!(result, Err(SessionError::UnknownKey { .. })));
    }
}
