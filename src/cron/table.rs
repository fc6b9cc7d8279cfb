// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Per-user crontab tables.
//!
//! A [`Crontab`] holds the environment variables and tasks of one user. It is
//! loaded and saved as a whole through a [`CrontabBackend`]. Lines that cannot
//! be understood are kept verbatim so saving never drops them.

use crate::cron::{
    export_comment, import_comment,
    task::{split_disabled, CronTask, DISABLED_MARKER},
    CronError,
};

use std::{
    ffi::OsStr,
    io::Write,
    path::{Path, PathBuf},
    process::Command,
};
use tempfile::{Builder, NamedTempFile};
use tracing::{debug, instrument, warn};

/// Header lines that crontab(1) prepends to listings.
const HEADER_PREFIXES: [&str; 2] = ["# DO NOT EDIT THIS FILE", "# ("];

/// Environment variable assignment in a crontab.
#[derive(Default, Clone, Debug, PartialEq, Eq)]
pub struct CronVariable {
    pub name: String,
    pub value: String,
    pub comment: String,
    pub enabled: bool,
    pub user_login: String,
}

impl CronVariable {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            enabled: true,
            ..Default::default()
        }
    }

    /// Check if line is a variable assignment.
    ///
    /// A line is an assignment when an equals sign appears before any
    /// whitespace.
    pub fn is_assignment(line: &str) -> bool {
        match (line.find('='), line.find(char::is_whitespace)) {
            (Some(equals), Some(space)) => equals < space,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    /// Parse assignment line into variable.
    ///
    /// Returns `None` if the line is not an assignment.
    pub fn parse_line(line: &str, user_login: &str) -> Option<Self> {
        let (enabled, line) = split_disabled(line.trim());
        if !Self::is_assignment(line) {
            return None;
        }

        let (name, value) = line.split_once('=')?;
        Some(Self {
            name: name.into(),
            value: value.trim().into(),
            comment: String::new(),
            enabled,
            user_login: user_login.into(),
        })
    }

    pub fn export(&self) -> String {
        let mut text = export_comment(&self.comment);
        if !self.enabled {
            text.push_str(DISABLED_MARKER);
        }
        text.push_str(&format!("{}={}\n", self.name, self.value));
        text
    }
}

/// Crontab of one user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Crontab {
    user_login: String,
    system: bool,
    variables: Vec<CronVariable>,
    tasks: Vec<CronTask>,
    unparsed: Vec<String>,
    snapshot: String,
}

impl Crontab {
    /// Construct empty crontab for user.
    pub fn new(user_login: impl Into<String>, system: bool) -> Self {
        Self {
            user_login: user_login.into(),
            system,
            variables: Vec::new(),
            tasks: Vec::new(),
            unparsed: Vec::new(),
            snapshot: String::new(),
        }
    }

    /// Parse crontab text.
    ///
    /// Comment lines are collected and attached to the next variable or
    /// task. Lines that fail to parse are kept as-is together with their
    /// comment lines. The parsed crontab starts out clean.
    pub fn parse(text: &str, user_login: impl Into<String>, system: bool) -> Self {
        let mut crontab = Self::new(user_login, system);
        let mut comment: Vec<String> = Vec::new();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if HEADER_PREFIXES.iter().any(|prefix| line.starts_with(prefix)) {
                continue;
            }

            if !line.starts_with(DISABLED_MARKER) {
                if let Some(text) = line.strip_prefix('#') {
                    comment.push(text.into());
                    continue;
                }
            }

            if let Some(mut variable) = CronVariable::parse_line(line, &crontab.user_login) {
                variable.comment = import_comment(&comment);
                crontab.variables.push(variable);
            } else {
                match CronTask::parse_line(line, &crontab.user_login, system) {
                    Ok(mut task) => {
                        task.comment = import_comment(&comment);
                        crontab.tasks.push(task);
                    }
                    Err(error) => {
                        warn!("keeping unparsed crontab line: {error}");
                        crontab
                            .unparsed
                            .extend(comment.iter().map(|text| format!("#{text}")));
                        crontab.unparsed.push(line.into());
                    }
                }
            }
            comment.clear();
        }

        crontab.snapshot = crontab.export();
        crontab
    }

    /// Export crontab text.
    ///
    /// Variables are written first, then tasks, then any lines that could not
    /// be parsed. Line order of the parsed text is not kept, so a variable
    /// assigned between tasks ends up applying to every task of the table.
    pub fn export(&self) -> String {
        let mut text = String::new();
        for variable in &self.variables {
            text.push_str(&variable.export());
        }

        for task in &self.tasks {
            text.push_str(&task.export());
        }

        for line in &self.unparsed {
            text.push_str(line);
            text.push('\n');
        }

        text
    }

    pub fn user_login(&self) -> &str {
        &self.user_login
    }

    pub fn is_system(&self) -> bool {
        self.system
    }

    pub fn tasks(&self) -> &[CronTask] {
        &self.tasks
    }

    pub fn tasks_mut(&mut self) -> &mut [CronTask] {
        &mut self.tasks
    }

    pub fn variables(&self) -> &[CronVariable] {
        &self.variables
    }

    pub fn variables_mut(&mut self) -> &mut [CronVariable] {
        &mut self.variables
    }

    /// Add task to end of crontab.
    ///
    /// Task ownership is set to this crontab's user.
    pub fn add_task(&mut self, mut task: CronTask) {
        task.user_login.clone_from(&self.user_login);
        task.system = self.system;
        self.tasks.push(task);
    }

    /// Add variable to end of crontab.
    pub fn add_variable(&mut self, mut variable: CronVariable) {
        variable.user_login.clone_from(&self.user_login);
        self.variables.push(variable);
    }

    /// Keep only tasks matching predicate.
    ///
    /// Returns number of tasks removed.
    pub fn retain_tasks(&mut self, keep: impl FnMut(&CronTask) -> bool) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(keep);
        before - self.tasks.len()
    }

    /// Keep only variables matching predicate.
    ///
    /// Returns number of variables removed.
    pub fn retain_variables(&mut self, keep: impl FnMut(&CronVariable) -> bool) -> usize {
        let before = self.variables.len();
        self.variables.retain(keep);
        before - self.variables.len()
    }

    pub fn contains_task(&self, task: &CronTask) -> bool {
        self.tasks.contains(task)
    }

    pub fn contains_variable(&self, variable: &CronVariable) -> bool {
        self.variables.contains(variable)
    }

    /// Check if crontab changed since it was loaded or saved.
    pub fn is_dirty(&self) -> bool {
        self.export() != self.snapshot
    }

    /// Load crontab of user through backend.
    ///
    /// # Errors
    ///
    /// - Return [`CronError`] if backend fails to read crontab.
    #[instrument(skip(backend), level = "debug")]
    pub fn load(
        backend: &impl CrontabBackend,
        user_login: &str,
        system: bool,
    ) -> Result<Self, CronError> {
        let text = backend.read(user_login)?;
        Ok(Self::parse(&text, user_login, system))
    }

    /// Save crontab through backend.
    ///
    /// # Errors
    ///
    /// - Return [`CronError`] if backend fails to write crontab.
    #[instrument(skip(self, backend), level = "debug")]
    pub fn save(&mut self, backend: &impl CrontabBackend) -> Result<(), CronError> {
        let text = self.export();
        backend.write(&self.user_login, &text)?;
        debug!("saved crontab of {:?}", self.user_login);
        self.snapshot = text;
        Ok(())
    }
}

/// Storage of crontab text.
pub trait CrontabBackend {
    /// Read crontab text of user.
    ///
    /// # Errors
    ///
    /// - Return [`CronError`] if crontab cannot be read.
    fn read(&self, user_login: &str) -> Result<String, CronError>;

    /// Replace crontab text of user.
    ///
    /// # Errors
    ///
    /// - Return [`CronError`] if crontab cannot be written.
    fn write(&self, user_login: &str, text: &str) -> Result<(), CronError>;
}

/// Crontab access through the crontab(1) binary.
///
/// Reads with `crontab -l`, and installs a new table by writing it to a
/// scratch file then running `crontab <file>`. The `-u` option is only passed
/// when acting on behalf of another user.
#[derive(Clone, Debug)]
pub struct CommandBackend {
    binary: PathBuf,
    scratch_dir: PathBuf,
    current_user: Option<String>,
}

impl CommandBackend {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            scratch_dir: std::env::temp_dir(),
            current_user: None,
        }
    }

    /// Treat `user_login` as the invoking user, omitting `-u` for it.
    pub fn with_current_user(mut self, user_login: impl Into<String>) -> Self {
        self.current_user = Some(user_login.into());
        self
    }

    pub fn with_scratch_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.scratch_dir = path.into();
        self
    }

    fn user_args<'a>(&'a self, user_login: &'a str) -> Vec<&'a OsStr> {
        match &self.current_user {
            Some(current) if current == user_login => Vec::new(),
            _ => vec![OsStr::new("-u"), OsStr::new(user_login)],
        }
    }

    fn syscall(&self, args: Vec<&OsStr>) -> Result<(String, String, bool), CronError> {
        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .map_err(|source| CronError::Spawn {
                source,
                binary: self.binary.clone(),
            })?;
        let stdout = String::from_utf8_lossy(output.stdout.as_slice()).into_owned();
        let stderr = String::from_utf8_lossy(output.stderr.as_slice()).into_owned();

        Ok((stdout, stderr, output.status.success()))
    }
}

impl Default for CommandBackend {
    fn default() -> Self {
        Self::new("crontab")
    }
}

impl CrontabBackend for CommandBackend {
    fn read(&self, user_login: &str) -> Result<String, CronError> {
        let mut args = self.user_args(user_login);
        args.push(OsStr::new("-l"));
        let (stdout, stderr, success) = self.syscall(args)?;

        if success {
            return Ok(stdout);
        }

        // INVARIANT: A user without a crontab has an empty table.
        if stderr.contains("no crontab") {
            debug!("no crontab for {user_login:?}");
            return Ok(String::new());
        }

        Err(CronError::Command {
            binary: self.binary.clone(),
            stderr: stderr.trim_end().into(),
        })
    }

    fn write(&self, user_login: &str, text: &str) -> Result<(), CronError> {
        let scratch_error = |source| CronError::Write {
            source,
            path: self.scratch_dir.clone(),
        };
        let mut scratch = Builder::new()
            .prefix("carbon-crontab-")
            .tempfile_in(&self.scratch_dir)
            .map_err(scratch_error)?;
        scratch
            .write_all(text.as_bytes())
            .and_then(|()| scratch.flush())
            .map_err(scratch_error)?;

        let mut args = self.user_args(user_login);
        args.push(scratch.path().as_os_str());
        let result = self.syscall(args);
        if let Err(error) = scratch.close() {
            warn!("failed to remove crontab scratch file: {error}");
        }

        let (_, stderr, success) = result?;
        if !success {
            return Err(CronError::Command {
                binary: self.binary.clone(),
                stderr: stderr.trim_end().into(),
            });
        }

        Ok(())
    }
}

/// Crontab stored in a plain file.
///
/// Every user maps to the same file. Writes go to a uniquely named sibling
/// temporary file which is then renamed over the original.
#[derive(Clone, Debug)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CrontabBackend for FileBackend {
    fn read(&self, _: &str) -> Result<String, CronError> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => Ok(text),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(source) => Err(CronError::Read {
                source,
                path: self.path.clone(),
            }),
        }
    }

    fn write(&self, _: &str, text: &str) -> Result<(), CronError> {
        let write_error = |source| CronError::Write {
            source,
            path: self.path.clone(),
        };
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let mut temp = NamedTempFile::new_in(dir).map_err(write_error)?;
        temp.write_all(text.as_bytes()).map_err(write_error)?;
        temp.persist(&self.path)
            .map_err(|error| write_error(error.error))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use sealed_test::prelude::*;
    use simple_test_case::test_case;

    #[test_case("PATH=/usr/bin", true; "plain")]
    #[test_case("MAILTO=\"a b\"", true; "spaces in value")]
    #[test_case("* * * * * FOO=1 run", false; "task with assignment")]
    #[test_case("@reboot run", false; "reboot task")]
    #[test_case("NAME", false; "no equals")]
    #[test]
    fn variable_assignment_detection(line: &str, expect: bool) {
        assert_eq!(CronVariable::is_assignment(line), expect);
    }

    #[test]
    fn parse_attaches_comments() {
        let text = indoc! {r#"
            # DO NOT EDIT THIS FILE - edit the master and reinstall.
            # (/tmp/crontab.XXXX installed on Thu Jan  1 00:00:00 2025)
            #mail me
            MAILTO=awkless

            #carbon session home
            0 0 * * *	carbon_runner /home/awkless/.local/share/carbon/home.carbon
            #No comment
            #\@reboot	echo disabled
        "#};

        let crontab = Crontab::parse(text, "awkless", false);
        assert_eq!(crontab.variables().len(), 1);
        assert_eq!(crontab.variables()[0].name, "MAILTO");
        assert_eq!(crontab.variables()[0].comment, "mail me");

        assert_eq!(crontab.tasks().len(), 2);
        assert_eq!(crontab.tasks()[0].comment, "carbon session home");
        assert_eq!(crontab.tasks()[1].comment, "");
        assert!(!crontab.tasks()[1].enabled);
        assert!(crontab.tasks()[1].reboot);
        assert!(!crontab.is_dirty());
    }

    #[test]
    fn export_round_trip() {
        let text = indoc! {r#"
            #mail me
            MAILTO=awkless
            #nightly
            30 2 * * 1-5	backup --all
            #No comment
            #\@reboot	echo disabled
        "#};

        let crontab = Crontab::parse(text, "awkless", false);
        assert_eq!(crontab.export(), text);
    }

    #[test]
    fn unparsed_lines_are_kept() {
        let text = indoc! {r#"
            #broken
            99 * * * * nope
            0 1 * * *	ok
        "#};

        let crontab = Crontab::parse(text, "awkless", false);
        assert_eq!(crontab.tasks().len(), 1);
        assert_eq!(
            crontab.export(),
            "#No comment\n0 1 * * *\tok\n#broken\n99 * * * * nope\n"
        );
    }

    #[test]
    fn mutations_mark_dirty() -> anyhow::Result<()> {
        let mut crontab = Crontab::parse("0 1 * * *\tok\n", "awkless", false);
        let mut task = CronTask::new("sync", "somebody");
        task.set_schedule("0 0 * * *")?;
        crontab.add_task(task);
        assert!(crontab.is_dirty());
        assert_eq!(crontab.tasks()[1].user_login, "awkless");

        let removed = crontab.retain_tasks(|task| task.command != "sync");
        assert_eq!(removed, 1);
        assert!(!crontab.is_dirty());

        Ok(())
    }

    #[sealed_test]
    fn file_backend_load_and_save() -> anyhow::Result<()> {
        let backend = FileBackend::new("crontab");
        let mut crontab = Crontab::load(&backend, "awkless", false)?;
        assert!(crontab.tasks().is_empty());

        crontab.add_variable(CronVariable::new("SHELL", "/bin/sh"));
        crontab.save(&backend)?;
        assert!(!crontab.is_dirty());

        let result = std::fs::read_to_string("crontab")?;
        assert_eq!(result, "#No comment\nSHELL=/bin/sh\n");

        let reloaded = Crontab::load(&backend, "awkless", false)?;
        assert_eq!(reloaded.variables()[0].value, "/bin/sh");

        Ok(())
    }

    #[sealed_test]
    fn file_backend_leaves_similar_names_alone() -> anyhow::Result<()> {
        std::fs::write("table.tmp", "keep\n")?;
        FileBackend::new("table.a").write("awkless", "0 0 * * *\ta\n")?;
        FileBackend::new("table.b").write("awkless", "0 0 * * *\tb\n")?;

        assert_eq!(std::fs::read_to_string("table.tmp")?, "keep\n");
        assert_eq!(std::fs::read_to_string("table.a")?, "0 0 * * *\ta\n");
        assert_eq!(std::fs::read_to_string("table.b")?, "0 0 * * *\tb\n");
        assert_eq!(std::fs::read_dir(".")?.count(), 3);

        Ok(())
    }

    #[sealed_test]
    fn command_backend_installs_through_private_scratch_file() -> anyhow::Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let root = std::env::current_dir()?;
        std::fs::create_dir("scratch")?;
        let script = root.join("fake-crontab");
        std::fs::write(
            &script,
            "#!/bin/sh\necho \"$1\" > used\ncp \"$1\" installed\n",
        )?;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))?;

        let backend = CommandBackend::new(&script)
            .with_current_user("awkless")
            .with_scratch_dir(root.join("scratch"));
        backend.write("awkless", "0 0 * * *\tsync\n")?;

        assert_eq!(std::fs::read_to_string("installed")?, "0 0 * * *\tsync\n");
        let used = std::fs::read_to_string("used")?;
        let used = Path::new(used.trim_end());
        assert!(used.starts_with(root.join("scratch")));
        let name = used
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default();
        assert!(name.starts_with("carbon-crontab-"));
        assert_ne!(name, format!("carbon-crontab-{}", std::process::id()));
        assert!(!used.exists());

        Ok(())
    }
}
