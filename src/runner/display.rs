// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Terminal front end of the session runner.

use crate::{
    runner::{
        exit::ExitCode,
        line::{files_found_status, Progress, RunnerState, SESSION_SCALE},
        OutputStream, Result, RunObserver,
    },
    store::Session,
};

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use inquire::Confirm;
use tracing::{error, info, warn};

const TEMPLATE: &str = "{elapsed_precise:.green}  {msg:<50}  [{wide_bar:.yellow/blue}]";
const PROGRESS_CHARS: &str = "-Cco.";

/// Progress bars for file, session, and overall progress.
///
/// Prompts are shown with the bars suspended.
#[derive(Debug, Clone)]
pub struct ConsoleObserver {
    bars: MultiProgress,
    file: ProgressBar,
    session: ProgressBar,
    overall: ProgressBar,
    verbose: bool,
    on_failure: Option<bool>,
}

impl ConsoleObserver {
    /// Construct new console observer for a run over `session_count`
    /// sessions.
    ///
    /// # Errors
    ///
    /// - Return [`RunnerError::Style`](crate::runner::RunnerError::Style)
    ///   if the progress bar template is invalid.
    pub fn new(session_count: usize) -> Result<Self> {
        let style = ProgressStyle::with_template(TEMPLATE)?.progress_chars(PROGRESS_CHARS);
        let bars = MultiProgress::new();
        let file = bars.add(ProgressBar::new(100).with_style(style.clone()));
        let session = bars.add(ProgressBar::new(u64::from(SESSION_SCALE)).with_style(style.clone()));
        let overall = bars.add(
            ProgressBar::new(u64::from(SESSION_SCALE) * session_count as u64).with_style(style),
        );
        overall.set_message("Overall");

        Ok(Self {
            bars,
            file,
            session,
            overall,
            verbose: false,
            on_failure: None,
        })
    }

    /// Echo every line of wrapper output.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Answer the "continue with next session?" question without asking.
    pub fn with_failure_answer(mut self, answer: Option<bool>) -> Self {
        self.on_failure = answer;
        self
    }

    /// Remove bars from the terminal.
    pub fn finish(&self) {
        self.file.finish_and_clear();
        self.session.finish_and_clear();
        self.overall.finish_and_clear();
    }
}

impl RunObserver for ConsoleObserver {
    fn session_started(&mut self, session: &Session, index: usize, state: &RunnerState) {
        self.file.set_position(0);
        self.file.set_message(state.status().to_string());
        self.session.set_position(0);
        self.session.set_message(format!(
            "{} ({}/{})",
            session.name(),
            index + 1,
            state.session_count()
        ));
        self.overall.set_position(u64::from(state.overall()));
    }

    fn progress(&mut self, update: &Progress, _state: &RunnerState) {
        match update {
            Progress::Status(text) => self.file.set_message(text.clone()),
            Progress::ErrorStatus(text) => {
                self.file.set_message(text.clone());
                self.bars.suspend(|| error!("{text}"));
            }
            Progress::FilesFound(count) => self.file.set_message(files_found_status(*count)),
            Progress::File(percent) => self.file.set_position(u64::from(*percent)),
            Progress::Session { session, overall } => {
                self.session.set_position(u64::from(*session));
                self.overall.set_position(u64::from(*overall));
            }
        }
    }

    fn output(&mut self, stream: OutputStream, line: &str) {
        if self.verbose || stream == OutputStream::Stderr {
            let _ = self.bars.println(line);
        }
    }

    fn session_finished(&mut self, session: &Session, exit: ExitCode, _state: &RunnerState) {
        match exit.message() {
            None => self
                .bars
                .suspend(|| info!("session {:?} finished", session.name())),
            Some(message) => self
                .bars
                .suspend(|| warn!("session {:?} failed: {message}", session.name())),
        }
    }

    fn continue_after_failure(
        &mut self,
        _session: &Session,
        _exit: ExitCode,
        _state: &RunnerState,
    ) -> bool {
        if let Some(answer) = self.on_failure {
            return answer;
        }

        self.bars.suspend(|| {
            Confirm::new("Continue with next session?")
                .with_default(false)
                .prompt()
                .unwrap_or(false)
        })
    }
}
