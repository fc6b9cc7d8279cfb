// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Crontab host.
//!
//! Locates the crontab of the user running Carbon. The user is looked up in
//! the passwd database by uid, and must pass the cron.allow and cron.deny
//! checks of crontab(1) before any crontab is loaded.

use crate::cron::{
    table::{CommandBackend, CronVariable, Crontab, CrontabBackend},
    task::CronTask,
    CronError,
};

use nix::unistd::{getuid, Uid, User};
use std::{
    fs::read_to_string,
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument};

/// Locations of user database and cron access lists.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessFiles {
    pub passwd: PathBuf,
    pub allow: PathBuf,
    pub deny: PathBuf,
}

impl Default for AccessFiles {
    fn default() -> Self {
        Self {
            passwd: PathBuf::from("/etc/passwd"),
            allow: PathBuf::from("/etc/cron.allow"),
            deny: PathBuf::from("/etc/cron.deny"),
        }
    }
}

impl AccessFiles {
    /// Look up login name of uid in passwd file.
    ///
    /// # Errors
    ///
    /// - Return [`CronError::Read`] if passwd file exists but cannot be read.
    pub fn login_for_uid(&self, uid: u32) -> Result<Option<String>> {
        let Some(passwd) = read_optional(&self.passwd)? else {
            return Ok(None);
        };

        let login = passwd
            .lines()
            .filter(|line| !line.trim().is_empty() && !line.starts_with('#'))
            .find_map(|line| {
                let mut fields = line.split(':');
                let name = fields.next()?;
                let entry_uid = fields.nth(1)?.parse::<u32>().ok()?;
                (entry_uid == uid).then(|| name.to_string())
            });

        Ok(login)
    }

    /// Check if user may use cron.
    ///
    /// When cron.allow exists the user must be listed in it. Otherwise, when
    /// cron.deny exists the user must not be listed in it. Without either
    /// file every user is allowed.
    ///
    /// # Errors
    ///
    /// - Return [`CronError::Read`] if an access file cannot be read.
    pub fn is_allowed(&self, user_login: &str) -> Result<bool> {
        if let Some(allow) = read_optional(&self.allow)? {
            return Ok(lists_user(&allow, user_login));
        }

        if let Some(deny) = read_optional(&self.deny)? {
            return Ok(!lists_user(&deny, user_login));
        }

        Ok(true)
    }
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
        Err(source) => Err(CronError::Read {
            source,
            path: path.into(),
        }),
    }
}

fn lists_user(text: &str, user_login: &str) -> bool {
    text.lines().map(str::trim).any(|line| line == user_login)
}

/// Collection of crontabs visible to the current user.
///
/// Only the current user's crontab is ever loaded.
#[derive(Debug)]
pub struct CronHost<B: CrontabBackend = CommandBackend> {
    backend: B,
    crontabs: Vec<Crontab>,
    current_user: String,
    root: bool,
}

impl CronHost<CommandBackend> {
    /// Open host for the invoking user through the crontab binary.
    ///
    /// # Errors
    ///
    /// - Return [`CronError`] if user cannot be found, is blocked, or their
    ///   crontab cannot be read.
    pub fn open_default(binary: impl Into<PathBuf>) -> Result<Self> {
        let access = AccessFiles::default();
        let uid = getuid().as_raw();
        let login = resolve_login(&access, uid)?;
        let backend = CommandBackend::new(binary).with_current_user(login);
        Self::open_as(backend, &access, uid)
    }
}

impl<B: CrontabBackend> CronHost<B> {
    /// Open host for the invoking user.
    ///
    /// # Errors
    ///
    /// - Return [`CronError`] if user cannot be found, is blocked, or their
    ///   crontab cannot be read.
    pub fn open(backend: B, access: &AccessFiles) -> Result<Self> {
        Self::open_as(backend, access, getuid().as_raw())
    }

    /// Open host on behalf of user with uid.
    ///
    /// # Errors
    ///
    /// - Return [`CronError::UnknownUser`] if uid has no login name.
    /// - Return [`CronError::Blocked`] if access lists forbid the user.
    /// - Return [`CronError`] if crontab cannot be read.
    #[instrument(skip(backend, access), level = "debug")]
    pub fn open_as(backend: B, access: &AccessFiles, uid: u32) -> Result<Self> {
        let login = resolve_login(access, uid)?;
        if !access.is_allowed(&login)? {
            return Err(CronError::Blocked { user: login });
        }

        let crontab = Crontab::load(&backend, &login, false)?;
        info!(
            "loaded crontab of {login:?} with {} task(s)",
            crontab.tasks().len()
        );

        Ok(Self {
            backend,
            crontabs: vec![crontab],
            current_user: login,
            root: uid == 0,
        })
    }

    pub fn current_user(&self) -> &str {
        &self.current_user
    }

    pub fn is_root_user(&self) -> bool {
        self.root
    }

    pub fn crontabs(&self) -> &[Crontab] {
        &self.crontabs
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Crontab of the invoking user.
    ///
    /// # Errors
    ///
    /// - Return [`CronError::NoCurrentUserCrontab`] if it was never loaded.
    pub fn current_user_cron(&self) -> Result<&Crontab> {
        self.find_user_cron(&self.current_user)
            .ok_or(CronError::NoCurrentUserCrontab)
    }

    /// Mutable crontab of the invoking user.
    ///
    /// # Errors
    ///
    /// - Return [`CronError::NoCurrentUserCrontab`] if it was never loaded.
    pub fn current_user_cron_mut(&mut self) -> Result<&mut Crontab> {
        let current = self.current_user.clone();
        self.crontabs
            .iter_mut()
            .find(|crontab| !crontab.is_system() && crontab.user_login() == current)
            .ok_or(CronError::NoCurrentUserCrontab)
    }

    pub fn find_user_cron(&self, user_login: &str) -> Option<&Crontab> {
        self.crontabs
            .iter()
            .find(|crontab| !crontab.is_system() && crontab.user_login() == user_login)
    }

    pub fn find_cron_containing_task(&self, task: &CronTask) -> Option<&Crontab> {
        self.crontabs
            .iter()
            .find(|crontab| crontab.contains_task(task))
    }

    pub fn find_cron_containing_variable(&self, variable: &CronVariable) -> Option<&Crontab> {
        self.crontabs
            .iter()
            .find(|crontab| crontab.contains_variable(variable))
    }

    pub fn is_dirty(&self) -> bool {
        self.crontabs.iter().any(Crontab::is_dirty)
    }

    /// Save every changed crontab.
    ///
    /// # Errors
    ///
    /// - Return [`CronError`] if a crontab cannot be written.
    #[instrument(skip(self), level = "debug")]
    pub fn save(&mut self) -> Result<()> {
        for crontab in self.crontabs.iter_mut().filter(|crontab| crontab.is_dirty()) {
            crontab.save(&self.backend)?;
        }

        debug!("crontabs saved");
        Ok(())
    }
}

fn resolve_login(access: &AccessFiles, uid: u32) -> Result<String> {
    if let Some(login) = access.login_for_uid(uid)? {
        return Ok(login);
    }

    // INVARIANT: Fall back to NSS for users outside of the passwd file.
    User::from_uid(Uid::from_raw(uid))
        .ok()
        .flatten()
        .map(|user| user.name)
        .ok_or(CronError::UnknownUser { uid })
}

/// Friendly result alias :3
type Result<T, E = CronError> = std::result::Result<T, E>;
