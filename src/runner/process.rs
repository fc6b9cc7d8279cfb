// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Rsync wrapper child process.

use crate::runner::{exit::ExitCode, Result, RunnerError};

use futures::stream::{self, BoxStream, StreamExt};
use nix::{
    errno::Errno,
    sys::signal::{killpg, Signal},
    unistd::Pid,
};
use std::{io, path::Path, process::Stdio, time::Duration};
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::{Child, Command},
    time::sleep,
};
use tracing::{debug, instrument, warn};

/// Environment variable telling the wrapper it runs under a front end.
pub const PARENT_ENV: &str = "CARBON_GUI_PARENT";

/// Wrapper flag requesting a dry run.
pub const DRY_RUN_FLAG: &str = "-d";

const TERMINATE_POLLS: u32 = 50;
const TERMINATE_POLL_INTERVAL: Duration = Duration::from_millis(10);
const READ_SIZE: usize = 4096;

/// Raw output read from the wrapper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
}

/// Running rsync wrapper.
///
/// The wrapper is placed in its own process group so that termination reaches
/// the rsync processes it spawns as well.
pub struct SyncProcess {
    child: Child,
    pid: Option<Pid>,
    output: BoxStream<'static, io::Result<Chunk>>,
}

impl SyncProcess {
    /// Spawn wrapper on session settings file.
    ///
    /// # Errors
    ///
    /// - Return [`RunnerError::Spawn`] if the wrapper cannot be executed.
    #[instrument(skip(runner, settings), level = "debug")]
    pub fn spawn(runner: &Path, settings: &Path, dry_run: bool) -> Result<Self> {
        let mut command = Command::new(runner);
        command.arg(settings);
        if dry_run {
            command.arg(DRY_RUN_FLAG);
        }

        command
            .env(PARENT_ENV, "true")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        debug!("spawn {} {}", runner.display(), settings.display());
        let mut child = command.spawn().map_err(|source| RunnerError::Spawn {
            source,
            binary: runner.into(),
        })?;

        let stdout = child.stdout.take().ok_or(RunnerError::MissingPipe)?;
        let stderr = child.stderr.take().ok_or(RunnerError::MissingPipe)?;
        let output = stream::select(chunks(stdout, Chunk::Stdout), chunks(stderr, Chunk::Stderr)).boxed();
        let pid = child.id().map(|id| Pid::from_raw(id as i32));

        Ok(Self { child, pid, output })
    }

    /// Next chunk of output from either stream.
    ///
    /// Returns `None` once both streams are closed.
    pub async fn next_chunk(&mut self) -> Option<io::Result<Chunk>> {
        self.output.next().await
    }

    /// Wait for wrapper to exit on its own.
    ///
    /// # Errors
    ///
    /// - Return [`RunnerError::Wait`] if exit status cannot be collected.
    pub async fn wait(&mut self) -> Result<ExitCode> {
        let status = self.child.wait().await.map_err(RunnerError::Wait)?;
        Ok(ExitCode::from_status(status))
    }

    /// Terminate wrapper and its process group.
    ///
    /// Sends `SIGTERM` and polls for a short while before resorting to
    /// `SIGKILL`.
    ///
    /// # Errors
    ///
    /// - Return [`RunnerError::Wait`] if exit status cannot be collected.
    #[instrument(skip(self), level = "debug")]
    pub async fn terminate(&mut self) -> Result<ExitCode> {
        self.signal(Signal::SIGTERM);
        for _ in 0..TERMINATE_POLLS {
            if let Some(status) = self.child.try_wait().map_err(RunnerError::Wait)? {
                return Ok(ExitCode::from_status(status));
            }
            sleep(TERMINATE_POLL_INTERVAL).await;
        }

        warn!("wrapper ignored SIGTERM, killing it");
        self.signal(Signal::SIGKILL);
        self.wait().await
    }

    fn signal(&self, signal: Signal) {
        let Some(pid) = self.pid else {
            return;
        };

        match killpg(pid, signal) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(error) => warn!("failed to send {signal} to process group {pid}: {error}"),
        }
    }
}

fn chunks<R>(reader: R, wrap: fn(Vec<u8>) -> Chunk) -> BoxStream<'static, io::Result<Chunk>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    stream::unfold(Some(reader), move |reader| async move {
        let mut reader = reader?;
        let mut buffer = vec![0; READ_SIZE];
        match reader.read(&mut buffer).await {
            Ok(0) => None,
            Ok(size) => {
                buffer.truncate(size);
                Some((Ok(wrap(buffer)), Some(reader)))
            }
            Err(error) => Some((Err(error), None)),
        }
    })
    .boxed()
}
