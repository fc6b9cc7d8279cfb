// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Session runner.
//!
//! Sessions are run one at a time through the external rsync wrapper. The
//! wrapper receives the session settings file and an optional dry run flag,
//! and reports back through its output streams. Standard output is parsed
//! into progress updates through [`RunnerState`], while standard error is
//! accumulated for display. Both streams are written to the session log with
//! wrapper markers removed.
//!
//! The caller follows a run through a [`RunObserver`], and may abort it at
//! any time through a [`watch`] channel of [`Abort`] requests. Aborting
//! [`Abort::Now`] terminates the wrapper and removes the session lock left
//! behind. Aborting [`Abort::AfterCurrent`] lets the running session finish
//! first.
//!
//! When a session fails and more sessions remain, the observer decides
//! whether the run should go on.

pub mod display;
pub mod exit;
pub mod line;
pub mod process;

pub use display::ConsoleObserver;
pub use exit::ExitCode;
pub use line::{files_found_status, strip_markers, Line, LineSplitter, Phase, Progress, RunnerState};
pub use process::{Chunk, SyncProcess};

use crate::store::{Session, StoreError};

use std::{io, path::PathBuf};
use tokio::{
    fs::File,
    io::{AsyncWriteExt, BufWriter},
    sync::watch,
};
use tracing::{debug, info, instrument, warn};

/// How sessions get run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Rsync wrapper binary.
    pub runner: PathBuf,

    /// Ask the wrapper to only pretend.
    pub dry_run: bool,
}

/// Abort request for a run in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Abort {
    /// Terminate the running session immediately.
    Now,

    /// Stop once the running session finishes.
    AfterCurrent,
}

/// Output stream a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Session that exited with a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub session: String,
    pub exit: ExitCode,
}

/// Result of a whole run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every session ran.
    Finished { failures: Vec<Failure> },

    /// Run stopped between sessions.
    Stopped {
        failures: Vec<Failure>,
        remaining: Vec<String>,
    },

    /// Running session was terminated.
    Cancelled {
        session: String,
        failures: Vec<Failure>,
        remaining: Vec<String>,
    },
}

impl RunOutcome {
    pub fn failures(&self) -> &[Failure] {
        match self {
            Self::Finished { failures }
            | Self::Stopped { failures, .. }
            | Self::Cancelled { failures, .. } => failures,
        }
    }

    /// Check if every session ran without failure.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Finished { failures } if failures.is_empty())
    }
}

/// Observe progress of a run.
pub trait RunObserver {
    /// Session at `index` is about to start.
    fn session_started(&mut self, session: &Session, index: usize, state: &RunnerState);

    /// Progress update parsed from wrapper output.
    fn progress(&mut self, update: &Progress, state: &RunnerState);

    /// Raw line of wrapper output.
    fn output(&mut self, _stream: OutputStream, _line: &str) {}

    /// Session exited.
    fn session_finished(&mut self, session: &Session, exit: ExitCode, state: &RunnerState);

    /// Decide whether to continue with the next session after a failure.
    fn continue_after_failure(
        &mut self,
        session: &Session,
        exit: ExitCode,
        state: &RunnerState,
    ) -> bool;
}

/// Sequential session runner.
#[derive(Debug, Clone)]
pub struct Runner {
    options: RunOptions,
}

impl Runner {
    pub fn new(options: RunOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Run sessions one after the other.
    ///
    /// # Errors
    ///
    /// - Return [`RunnerError::Spawn`] if wrapper cannot be started.
    /// - Return [`RunnerError::Log`] if session log cannot be written.
    /// - Return [`RunnerError::Store`] if lock file cannot be removed after
    ///   cancellation.
    #[instrument(skip(self, sessions, observer, abort), level = "debug")]
    pub async fn run<O: RunObserver>(
        &self,
        sessions: &[Session],
        observer: &mut O,
        mut abort: watch::Receiver<Option<Abort>>,
    ) -> Result<RunOutcome> {
        let mut state = RunnerState::new(sessions.len() as u32);
        let mut failures = Vec::new();

        for (index, session) in sessions.iter().enumerate() {
            if abort.borrow_and_update().is_some() {
                info!("run stopped before session {:?}", session.name());
                return Ok(RunOutcome::Stopped {
                    failures,
                    remaining: names(&sessions[index..]),
                });
            }

            state.begin_session();
            observer.session_started(session, index, &state);
            info!("run session {:?}", session.name());

            let exit = match self.run_session(session, &mut state, observer, &mut abort).await? {
                SessionExit::Exited(exit) => exit,
                SessionExit::Cancelled => {
                    warn!("session {:?} cancelled", session.name());
                    session.remove_lock_file()?;
                    return Ok(RunOutcome::Cancelled {
                        session: session.name().into(),
                        failures,
                        remaining: names(&sessions[index + 1..]),
                    });
                }
            };

            let update = state.finish_session();
            observer.progress(&update, &state);
            observer.session_finished(session, exit, &state);
            if exit.is_success() {
                continue;
            }

            warn!("session {:?} failed: {exit}", session.name());
            failures.push(Failure {
                session: session.name().into(),
                exit,
            });

            let is_last = index + 1 == sessions.len();
            if !is_last && !observer.continue_after_failure(session, exit, &state) {
                return Ok(RunOutcome::Stopped {
                    failures,
                    remaining: names(&sessions[index + 1..]),
                });
            }
        }

        Ok(RunOutcome::Finished { failures })
    }

    async fn run_session<O: RunObserver>(
        &self,
        session: &Session,
        state: &mut RunnerState,
        observer: &mut O,
        abort: &mut watch::Receiver<Option<Abort>>,
    ) -> Result<SessionExit> {
        let settings = session.files().settings();
        let log_path = session.files().log();
        let file = File::create(&log_path)
            .await
            .map_err(|source| RunnerError::Log {
                source,
                path: log_path.clone(),
            })?;
        let mut log = SessionLog {
            writer: BufWriter::new(file),
            path: log_path,
        };

        let mut process = SyncProcess::spawn(&self.options.runner, &settings, self.options.dry_run)?;
        let mut stdout = LineSplitter::new();
        let mut stderr = LineSplitter::new();
        let mut abort_open = true;

        loop {
            tokio::select! {
                chunk = process.next_chunk() => match chunk {
                    Some(Ok(Chunk::Stdout(data))) => {
                        for line in stdout.push(&data) {
                            handle_stdout(&line, state, observer, &mut log).await?;
                        }
                    }
                    Some(Ok(Chunk::Stderr(data))) => {
                        for line in stderr.push(&data) {
                            handle_stderr(&line, state, observer, &mut log).await?;
                        }
                    }
                    Some(Err(error)) => {
                        warn!("failed to read wrapper output: {error}");
                        break;
                    }
                    None => break,
                },
                changed = abort.changed(), if abort_open => {
                    if is_abort_now(changed.is_ok(), abort, &mut abort_open) {
                        return cancel(&mut process, &mut log).await;
                    }
                }
            }
        }

        if let Some(line) = stdout.finish() {
            handle_stdout(&line, state, observer, &mut log).await?;
        }
        if let Some(line) = stderr.finish() {
            handle_stderr(&line, state, observer, &mut log).await?;
        }

        // Output may close before the wrapper exits.
        let exit = loop {
            tokio::select! {
                exit = process.wait() => break exit?,
                changed = abort.changed(), if abort_open => {
                    if is_abort_now(changed.is_ok(), abort, &mut abort_open) {
                        return cancel(&mut process, &mut log).await;
                    }
                }
            }
        };
        log.flush().await?;
        debug!("wrapper exited: {exit:?}");

        Ok(SessionExit::Exited(exit))
    }
}

enum SessionExit {
    Exited(ExitCode),
    Cancelled,
}

struct SessionLog {
    writer: BufWriter<File>,
    path: PathBuf,
}

impl SessionLog {
    async fn write_line(&mut self, line: &str) -> Result<()> {
        let mut text = strip_markers(line);
        text.push('\n');
        let result = self.writer.write_all(text.as_bytes()).await;
        result.map_err(|source| self.error(source))
    }

    async fn flush(&mut self) -> Result<()> {
        let result = self.writer.flush().await;
        result.map_err(|source| self.error(source))
    }

    fn error(&self, source: io::Error) -> RunnerError {
        RunnerError::Log {
            source,
            path: self.path.clone(),
        }
    }
}

async fn handle_stdout<O: RunObserver>(
    line: &str,
    state: &mut RunnerState,
    observer: &mut O,
    log: &mut SessionLog,
) -> Result<()> {
    log.write_line(line).await?;
    observer.output(OutputStream::Stdout, line);
    for update in state.process_line(line) {
        observer.progress(&update, state);
    }

    Ok(())
}

async fn handle_stderr<O: RunObserver>(
    line: &str,
    state: &mut RunnerState,
    observer: &mut O,
    log: &mut SessionLog,
) -> Result<()> {
    log.write_line(line).await?;
    observer.output(OutputStream::Stderr, line);
    state.record_stderr(line);

    Ok(())
}

/// Check if an abort notification asks for termination right away.
///
/// A closed channel can never abort, so it is no longer watched.
fn is_abort_now(
    changed: bool,
    abort: &mut watch::Receiver<Option<Abort>>,
    abort_open: &mut bool,
) -> bool {
    if !changed {
        *abort_open = false;
        return false;
    }

    *abort.borrow_and_update() == Some(Abort::Now)
}

async fn cancel(process: &mut SyncProcess, log: &mut SessionLog) -> Result<SessionExit> {
    let exit = process.terminate().await?;
    debug!("terminated wrapper: {exit:?}");
    log.flush().await?;

    Ok(SessionExit::Cancelled)
}

fn names(sessions: &[Session]) -> Vec<String> {
    sessions.iter().map(|session| session.name().into()).collect()
}

/// All possible error types for running sessions.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// Wrapper cannot be executed.
    #[error("failed to run {binary:?}")]
    Spawn {
        #[source]
        source: io::Error,
        binary: PathBuf,
    },

    /// Wrapper output pipes were not captured.
    #[error("wrapper output is not piped")]
    MissingPipe,

    /// Wrapper exit status cannot be collected.
    #[error("failed to wait for wrapper")]
    Wait(#[source] io::Error),

    /// Session log cannot be written.
    #[error("failed to write session log {path:?}")]
    Log {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// Session files cannot be managed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Style template cannot be set for progress bars.
    #[error(transparent)]
    Style(#[from] indicatif::style::TemplateError),
}

/// Friendly result alias :3
pub type Result<T, E = RunnerError> = std::result::Result<T, E>;
