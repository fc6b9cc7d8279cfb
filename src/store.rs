// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Session store management and manipulation.
//!
//! Carbon groups sessions together into one place called the __session
//! store__. The session store houses every session the user can run or
//! schedule.
//!
//! # Session Store Layout
//!
//! The session store can generally be placed anywhere on the user's file
//! system. However, the default location is `$XDG_DATA_HOME/carbon`. Each
//! session is identified by its unique name, and owns a __file set__ named
//! after it:
//!
//! | File                   | Contents                                    |
//! |------------------------|---------------------------------------------|
//! | `<name>.carbon`        | Session settings.                           |
//! | `<name>.carbon.exclude`| Exclude patterns, absent when there are none.|
//! | `<name>.carbon.log`    | Output of the last run.                     |
//! | `<name>.carbon.info`   | Run information kept by the rsync wrapper.  |
//! | `<name>.carbon.lock`   | Present while the session is running.       |
//!
//! Only the top-level of the session store is evaluated. The modification
//! time of the log file doubles as the time of the last run.
//!
//! # Schedules
//!
//! Scheduled sessions are installed into the current user's crontab as a task
//! that invokes the rsync wrapper with the session settings file. The task is
//! tagged with the comment `carbon session <name>` so it can be found again
//! when the schedule changes or the session goes away.

use crate::{
    cron::{CronError, CronHost, CronTask, CrontabBackend, ScheduleError, TaskError},
    session::{ExcludeFile, SessionError, SessionSettings},
};

use chrono::{DateTime, Local};
use std::{
    fs::{read_to_string, remove_file, rename, write},
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};

/// Extension of session settings files.
pub const SESSION_EXTENSION: &str = "carbon";

/// Paths of every file belonging to one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFiles {
    dir: PathBuf,
    name: String,
}

impl SessionFiles {
    pub fn new(dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> PathBuf {
        self.dir.join(format!("{}.{SESSION_EXTENSION}", self.name))
    }

    pub fn log(&self) -> PathBuf {
        self.sibling("log")
    }

    pub fn info(&self) -> PathBuf {
        self.sibling("info")
    }

    pub fn lock(&self) -> PathBuf {
        self.sibling("lock")
    }

    pub fn exclude(&self) -> PathBuf {
        self.sibling("exclude")
    }

    /// Every file of the set, settings file last.
    pub fn all(&self) -> [PathBuf; 5] {
        [
            self.log(),
            self.info(),
            self.lock(),
            self.exclude(),
            self.settings(),
        ]
    }

    fn sibling(&self, extension: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{SESSION_EXTENSION}.{extension}", self.name))
    }
}

/// Comment tagging the crontab task of a session.
pub fn schedule_comment(name: &str) -> String {
    format!("carbon session {name}")
}

/// Session loaded from the session store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    files: SessionFiles,
    pub settings: SessionSettings,
    pub exclude: ExcludeFile,
}

impl Session {
    pub fn name(&self) -> &str {
        self.files.name()
    }

    pub fn files(&self) -> &SessionFiles {
        &self.files
    }

    /// Human readable kind of session.
    pub fn kind_label(&self) -> &'static str {
        self.settings.kind_label()
    }

    /// Time session was last run.
    ///
    /// Returns `None` if the session never ran.
    pub fn last_run(&self) -> Option<DateTime<Local>> {
        let modified = self.files.log().metadata().ok()?.modified().ok()?;
        Some(DateTime::<Local>::from(modified))
    }

    /// Check if the rsync wrapper holds the session lock.
    pub fn is_running(&self) -> bool {
        self.files.lock().exists()
    }

    /// Check if session source exists locally.
    pub fn source_exists(&self) -> bool {
        self.settings.source_path().exists()
    }

    /// Remove session lock file if present.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Remove`] if lock file cannot be removed.
    pub fn remove_lock_file(&self) -> Result<()> {
        remove_if_exists(&self.files.lock())
    }

    /// Read log of last run.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::ReadLog`] if log exists but cannot be read.
    pub fn read_log(&self) -> Result<Option<String>> {
        let path = self.files.log();
        match read_to_string(&path) {
            Ok(log) => Ok(Some(log)),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::ReadLog { source, path }),
        }
    }

    /// Build crontab task that runs session on its schedule.
    ///
    /// Returns `None` if the session is not scheduled.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::InvalidSchedule`] if custom schedule is
    ///   malformed.
    /// - Return [`StoreError::IncompleteSchedule`] if custom schedule leaves
    ///   a section without selection.
    pub fn scheduled_task(&self, runner: &Path) -> Result<Option<CronTask>> {
        let Some(expr) = self.settings.schedule_expression() else {
            return Ok(None);
        };

        let command = format!(
            "{} {}",
            cron_word(&runner.to_string_lossy()),
            cron_word(&self.files.settings().to_string_lossy())
        );
        let mut task = CronTask::new(command, "");
        task.set_schedule(&expr)
            .map_err(|source| StoreError::InvalidSchedule {
                name: self.name().into(),
                source,
            })?;
        task.validate()
            .map_err(|source| StoreError::IncompleteSchedule {
                name: self.name().into(),
                source,
            })?;
        task.fill_unselected_days();
        task.comment = schedule_comment(self.name());

        Ok(Some(task))
    }

    /// Describe session schedule in human readable form.
    pub fn schedule_description(&self) -> String {
        let Some(expr) = self.settings.schedule_expression() else {
            return "Not scheduled".into();
        };

        let mut task = CronTask::default();
        match task.set_schedule(&expr) {
            Ok(()) => task.describe(),
            Err(error) => format!("Invalid schedule: {error}"),
        }
    }
}

/// Directory of session file sets.
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
    defaults_file: PathBuf,
}

impl SessionStore {
    /// Open session store, creating its directory if needed.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::CreateDir`] if directory cannot be created.
    #[instrument(skip(dir, defaults_file), level = "debug")]
    pub fn open(dir: impl Into<PathBuf>, defaults_file: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        mkdirp::mkdirp(&dir).map_err(|source| StoreError::CreateDir {
            source,
            path: dir.clone(),
        })?;
        debug!("open session store: {:?}", dir.display());

        Ok(Self {
            dir,
            defaults_file: defaults_file.into(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Names of every session in the store, sorted.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Glob`] if store path cannot form a pattern.
    pub fn names(&self) -> Result<Vec<String>> {
        let pattern = format!(
            "{}/*.{SESSION_EXTENSION}",
            glob::Pattern::escape(self.dir.to_string_lossy().as_ref())
        );
        debug!("list sessions matching {pattern:?}");

        let mut names = glob::glob(&pattern)?
            .filter_map(|entry| match entry {
                Ok(path) => Some(path),
                Err(error) => {
                    warn!("skipping unreadable session entry: {error}");
                    None
                }
            })
            .filter(|path| path.is_file())
            .filter_map(|path| {
                path.file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
            })
            .collect::<Vec<_>>();
        names.sort();

        Ok(names)
    }

    /// Load every session in the store.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError`] if any session cannot be loaded.
    pub fn sessions(&self) -> Result<Vec<Session>> {
        self.names()?
            .iter()
            .map(|name| self.open_session(name))
            .collect()
    }

    pub fn files(&self, name: &str) -> SessionFiles {
        SessionFiles::new(&self.dir, name)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.files(name).settings().is_file()
    }

    /// Load session by name.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::NotFound`] if no session has the name.
    /// - Return [`StoreError`] if session files cannot be read.
    #[instrument(skip(self), level = "debug")]
    pub fn open_session(&self, name: &str) -> Result<Session> {
        let files = self.files(name);
        let path = files.settings();
        let content = match read_to_string(&path) {
            Ok(content) => content,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound { name: name.into() })
            }
            Err(source) => return Err(StoreError::ReadSettings { source, path }),
        };
        let exclude = ExcludeFile::load(files.exclude())?;

        Ok(Session {
            files,
            settings: SessionSettings::from(content),
            exclude,
        })
    }

    /// Create new session from the defaults template.
    ///
    /// The session is not written to disk until saved.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::InvalidName`] if name cannot be a file name.
    /// - Return [`StoreError::AlreadyExists`] if name is taken.
    /// - Return [`StoreError`] if defaults cannot be read.
    pub fn new_session(&self, name: &str) -> Result<Session> {
        validate_name(name)?;
        if self.exists(name) {
            return Err(StoreError::AlreadyExists { name: name.into() });
        }

        let files = self.files(name);
        let (settings, defaults_exclude) = self.load_defaults()?;
        let mut exclude = ExcludeFile::new(files.exclude());
        exclude.set_patterns(defaults_exclude.patterns().iter().cloned());

        Ok(Session {
            files,
            settings,
            exclude,
        })
    }

    /// Write session settings and exclude patterns.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::WriteSettings`] if settings cannot be written.
    /// - Return [`StoreError::Session`] if exclude file cannot be saved.
    #[instrument(skip(self, session), level = "debug")]
    pub fn save(&self, session: &mut Session) -> Result<()> {
        session.settings.normalize();
        let path = session.files.settings();
        write(&path, session.settings.to_string())
            .map_err(|source| StoreError::WriteSettings { source, path })?;
        session.exclude.save_as(session.files.exclude())?;
        info!("saved session {:?}", session.name());

        Ok(())
    }

    /// Rename session, moving its whole file set.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::InvalidName`] if name cannot be a file name.
    /// - Return [`StoreError::AlreadyExists`] if name is taken.
    /// - Return [`StoreError::Running`] if session is locked.
    /// - Return [`StoreError::Rename`] if a file cannot be moved.
    #[instrument(skip(self, session), level = "debug")]
    pub fn rename(&self, session: &mut Session, new_name: &str) -> Result<()> {
        if session.name() == new_name {
            return Ok(());
        }

        validate_name(new_name)?;
        if self.exists(new_name) {
            return Err(StoreError::AlreadyExists {
                name: new_name.into(),
            });
        }

        if session.is_running() {
            return Err(StoreError::Running {
                name: session.name().into(),
            });
        }

        let old = session.files.clone();
        let new = self.files(new_name);
        for (from, to) in [
            (old.settings(), new.settings()),
            (old.exclude(), new.exclude()),
            (old.log(), new.log()),
            (old.info(), new.info()),
        ] {
            if !from.exists() {
                continue;
            }

            rename(&from, &to).map_err(|source| StoreError::Rename { source, from, to })?;
        }

        info!("renamed session {:?} to {new_name:?}", old.name());
        session.exclude = ExcludeFile::load(new.exclude())?;
        session.files = new;

        Ok(())
    }

    /// Remove every file of session.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Remove`] if a file cannot be removed.
    #[instrument(skip(self, session), level = "debug")]
    pub fn erase(&self, session: Session) -> Result<()> {
        for path in session.files.all() {
            remove_if_exists(&path)?;
        }
        info!("erased session {:?}", session.name());

        Ok(())
    }

    /// Load defaults template for new sessions.
    ///
    /// Built-in defaults are used when the template does not exist.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::ReadSettings`] if template exists but cannot be
    ///   read.
    pub fn load_defaults(&self) -> Result<(SessionSettings, ExcludeFile)> {
        let settings = match read_to_string(&self.defaults_file) {
            Ok(content) => SessionSettings::from(content),
            Err(error) if error.kind() == ErrorKind::NotFound => SessionSettings::default(),
            Err(source) => {
                return Err(StoreError::ReadSettings {
                    source,
                    path: self.defaults_file.clone(),
                })
            }
        };
        let exclude = ExcludeFile::load(self.defaults_exclude_file())?;

        Ok((settings, exclude))
    }

    /// Write defaults template for new sessions.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError`] if template cannot be written.
    pub fn save_defaults(&self, settings: &SessionSettings, exclude: &ExcludeFile) -> Result<()> {
        if let Some(parent) = self.defaults_file.parent() {
            mkdirp::mkdirp(parent).map_err(|source| StoreError::CreateDir {
                source,
                path: parent.into(),
            })?;
        }

        let mut settings = settings.clone();
        settings.normalize();
        write(&self.defaults_file, settings.to_string()).map_err(|source| {
            StoreError::WriteSettings {
                source,
                path: self.defaults_file.clone(),
            }
        })?;

        let mut template = ExcludeFile::new(self.defaults_exclude_file());
        template.set_patterns(exclude.patterns().iter().cloned());
        template.save()?;

        Ok(())
    }

    fn defaults_exclude_file(&self) -> PathBuf {
        let mut path = self.defaults_file.clone().into_os_string();
        path.push(".exclude");
        PathBuf::from(path)
    }

    /// Install session schedule into current user's crontab.
    ///
    /// Any task previously installed for the session is replaced. Sessions
    /// without a schedule simply have their task removed.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError`] if schedule is invalid.
    /// - Return [`StoreError::Cron`] if crontab cannot be updated.
    #[instrument(skip(self, session, host, runner), level = "debug")]
    pub fn apply_schedule<B: CrontabBackend>(
        &self,
        session: &Session,
        host: &mut CronHost<B>,
        runner: &Path,
    ) -> Result<()> {
        let task = session.scheduled_task(runner)?;
        let comment = schedule_comment(session.name());
        let crontab = host.current_user_cron_mut()?;
        let removed = crontab.retain_tasks(|task| task.comment != comment);
        debug!("removed {removed} stale task(s) of {:?}", session.name());

        if let Some(task) = task {
            info!(
                "schedule session {:?}: {}",
                session.name(),
                task.describe()
            );
            crontab.add_task(task);
        }

        host.save()?;
        Ok(())
    }

    /// Remove session task from current user's crontab.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Cron`] if crontab cannot be updated.
    pub fn remove_schedule<B: CrontabBackend>(
        &self,
        name: &str,
        host: &mut CronHost<B>,
    ) -> Result<()> {
        let comment = schedule_comment(name);
        host.current_user_cron_mut()?
            .retain_tasks(|task| task.comment != comment);
        host.save()?;

        Ok(())
    }
}

fn validate_name(name: &str) -> Result<()> {
    let invalid = name.trim().is_empty()
        || name.starts_with('.')
        || name.contains(['/', '\0', '\n']);
    if invalid {
        return Err(StoreError::InvalidName { name: name.into() });
    }

    Ok(())
}

/// Quote text as one shell word of a crontab command.
///
/// Cron runs commands through `sh` and turns bare `%` into newlines.
fn cron_word(text: &str) -> String {
    format!("'{}'", text.replace('\'', r"'\''").replace('%', r"\%"))
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match remove_file(path) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
        Err(source) => Err(StoreError::Remove {
            source,
            path: path.into(),
        }),
    }
}

/// All possible error types for session store interaction.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Session store directory cannot be created.
    #[error("failed to create directory at {:?}", path.display())]
    CreateDir {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Session store path cannot be turned into a pattern.
    #[error(transparent)]
    Glob(#[from] glob::PatternError),

    /// Session name cannot be used as a file name.
    #[error("invalid session name {name:?}")]
    InvalidName { name: String },

    /// No session has the name.
    #[error("session {name:?} does not exist")]
    NotFound { name: String },

    /// Session name is taken.
    #[error("session {name:?} already exists")]
    AlreadyExists { name: String },

    /// Session is locked by a running wrapper.
    #[error("session {name:?} is already running")]
    Running { name: String },

    /// Custom schedule is malformed.
    #[error("invalid schedule for session {name:?}")]
    InvalidSchedule {
        #[source]
        source: TaskError,
        name: String,
    },

    /// Custom schedule is missing a selection.
    #[error("incomplete schedule for session {name:?}")]
    IncompleteSchedule {
        #[source]
        source: ScheduleError,
        name: String,
    },

    /// Settings file cannot be read.
    #[error("failed to read session settings at {:?}", path.display())]
    ReadSettings {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Settings file cannot be written.
    #[error("failed to write session settings at {:?}", path.display())]
    WriteSettings {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Log file cannot be read.
    #[error("failed to read session log at {:?}", path.display())]
    ReadLog {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Session file cannot be removed.
    #[error("failed to remove {:?}", path.display())]
    Remove {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Session file cannot be moved.
    #[error("failed to move {:?} to {:?}", from.display(), to.display())]
    Rename {
        #[source]
        source: std::io::Error,
        from: PathBuf,
        to: PathBuf,
    },

    /// Exclude file handling fails.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Crontab handling fails.
    #[error(transparent)]
    Cron(#[from] CronError),
}

/// Friendly result alias :3
type Result<T, E = StoreError> = std::result::Result<T, E>;
