// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Wrapper output grammar.
//!
//! The rsync wrapper speaks in plain lines. Most of them are rsync's own
//! `--progress` output, but the wrapper injects lines of its own tagged by a
//! fixed marker at the front:
//!
//! | Marker           | Meaning                                       |
//! |------------------|-----------------------------------------------|
//! | `CARBON: `       | New phase of the run, text becomes the status.|
//! | `CARBON_MSG: `   | Informational message.                        |
//! | `CARBON_ERROR: ` | Error message.                                |
//!
//! [`RunnerState`] folds classified lines into progress updates for a run of
//! one or more sessions. Progress is fixed point: every session is worth
//! [`SESSION_SCALE`] units.

/// Marker of phase change lines.
pub const PHASE_MARKER: &str = "CARBON: ";

/// Marker of informational message lines.
pub const MESSAGE_MARKER: &str = "CARBON_MSG: ";

/// Marker of error message lines.
pub const ERROR_MARKER: &str = "CARBON_ERROR: ";

/// Progress units of one complete session.
pub const SESSION_SCALE: u32 = 1000;

const FILES_FOUND: &str = " files...";
const TO_CHECK_PREFIXES: [&str; 2] = ["to-check=", "to-chk="];

/// One classified line of wrapper output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Line<'a> {
    Phase(&'a str),
    Message(&'a str),
    Error(&'a str),

    /// Unmarked line, usually rsync progress output.
    Output(&'a str),
}

impl<'a> Line<'a> {
    pub fn classify(line: &'a str) -> Self {
        // INVARIANT: No marker is a prefix of another.
        if let Some(text) = line.strip_prefix(ERROR_MARKER) {
            Self::Error(text)
        } else if let Some(text) = line.strip_prefix(MESSAGE_MARKER) {
            Self::Message(text)
        } else if let Some(text) = line.strip_prefix(PHASE_MARKER) {
            Self::Phase(text)
        } else {
            Self::Output(line)
        }
    }

    /// Text of line without its marker.
    pub fn text(&self) -> &'a str {
        match *self {
            Self::Phase(text) | Self::Message(text) | Self::Error(text) | Self::Output(text) => {
                text
            }
        }
    }
}

/// Remove every wrapper marker from text.
pub fn strip_markers(text: &str) -> String {
    text.replace(ERROR_MARKER, "")
        .replace(MESSAGE_MARKER, "")
        .replace(PHASE_MARKER, "")
}

/// Status shown while the wrapper scans for files to transfer.
pub fn files_found_status(count: u64) -> String {
    match count {
        0 => "Checking for updated files...".into(),
        count => format!("Checking for updated files...{count}"),
    }
}

/// Phase of the current session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Wrapper is still preparing, rsync is counting files.
    #[default]
    Startup,

    /// Files are being transferred.
    Syncing,
}

/// Progress update derived from one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// Replace status text.
    Status(String),

    /// Replace status text with an error.
    ErrorStatus(String),

    /// Number of files found so far while scanning.
    FilesFound(u64),

    /// Percentage of the file currently transferred.
    File(u8),

    /// Progress of current session and of the whole run.
    Session { session: u32, overall: u32 },
}

/// Split raw output chunks into lines.
///
/// Lines end at either `\n` or `\r`, since rsync redraws its progress line
/// with carriage returns. Empty lines are dropped. A trailing partial line is
/// carried over into the next chunk.
#[derive(Debug, Default, Clone)]
pub struct LineSplitter {
    partial: Vec<u8>,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed chunk, returning every line it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.partial.extend_from_slice(chunk);
        let Some(end) = self.partial.iter().rposition(|byte| is_line_end(*byte)) else {
            return Vec::new();
        };

        let rest = self.partial.split_off(end + 1);
        let complete = std::mem::replace(&mut self.partial, rest);
        complete
            .split(|byte| is_line_end(*byte))
            .filter(|line| !line.is_empty())
            .map(|line| String::from_utf8_lossy(line).into_owned())
            .collect()
    }

    /// Flush partial line left over at end of stream.
    pub fn finish(&mut self) -> Option<String> {
        let partial = std::mem::take(&mut self.partial);
        (!partial.is_empty()).then(|| String::from_utf8_lossy(&partial).into_owned())
    }
}

fn is_line_end(byte: u8) -> bool {
    matches!(byte, b'\n' | b'\r')
}

/// Progress state of a run over several sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerState {
    session_count: u32,
    completed: u32,
    phase: Phase,
    session_progress: u32,
    overall: u32,
    file_progress: u8,
    stderr: String,
    status: String,
}

impl RunnerState {
    pub fn new(session_count: u32) -> Self {
        Self {
            session_count,
            completed: 0,
            phase: Phase::Startup,
            session_progress: 0,
            overall: 0,
            file_progress: 0,
            stderr: String::new(),
            status: String::new(),
        }
    }

    /// Reset per-session state before the next session starts.
    pub fn begin_session(&mut self) {
        self.phase = Phase::Startup;
        self.session_progress = 0;
        self.file_progress = 0;
        self.overall = SESSION_SCALE * self.completed;
        self.stderr.clear();
        self.status = files_found_status(0);
    }

    /// Fold one stdout line into state.
    ///
    /// Lines that carry no progress produce no updates.
    pub fn process_line(&mut self, line: &str) -> Vec<Progress> {
        match Line::classify(line) {
            Line::Phase(text) => {
                self.phase = Phase::Syncing;
                self.file_progress = 0;
                self.status = text.into();
                vec![Progress::Status(text.into()), Progress::File(0)]
            }
            Line::Message(text) => {
                self.phase = Phase::Syncing;
                self.status = text.into();
                vec![Progress::Status(text.into())]
            }
            Line::Error(text) => {
                self.phase = Phase::Syncing;
                self.status = text.into();
                vec![Progress::ErrorStatus(text.into())]
            }
            Line::Output(text) => self.process_output(text),
        }
    }

    fn process_output(&mut self, text: &str) -> Vec<Progress> {
        if self.phase == Phase::Startup && text.contains(FILES_FOUND) {
            let count = text
                .split_whitespace()
                .next()
                .and_then(|token| token.parse::<u64>().ok());
            let Some(count) = count else {
                return Vec::new();
            };

            self.status = files_found_status(count);
            return vec![Progress::FilesFound(count)];
        }

        if !text.contains('%') {
            return Vec::new();
        }

        let tokens: Vec<&str> = text.split_whitespace().collect();
        if tokens.len() <= 2 {
            return Vec::new();
        }

        let mut updates = Vec::new();
        if let Some(percent) = parse_percent(tokens[1]) {
            self.phase = Phase::Syncing;
            self.file_progress = percent;
            updates.push(Progress::File(percent));
        }

        for token in &tokens {
            let Some(counts) = TO_CHECK_PREFIXES
                .iter()
                .find_map(|prefix| token.strip_prefix(prefix))
            else {
                continue;
            };

            if let Some(session) = parse_to_check(counts) {
                self.session_progress = session;
                self.overall = SESSION_SCALE * self.completed + session;
                updates.push(Progress::Session {
                    session,
                    overall: self.overall,
                });
            }
            break;
        }

        updates
    }

    /// Accumulate error output of current session.
    pub fn record_stderr(&mut self, line: &str) {
        self.stderr.push_str(line);
        self.stderr.push('\n');
    }

    /// Mark current session as done.
    pub fn finish_session(&mut self) -> Progress {
        self.completed += 1;
        self.session_progress = SESSION_SCALE;
        self.overall = SESSION_SCALE * self.completed;
        Progress::Session {
            session: self.session_progress,
            overall: self.overall,
        }
    }

    pub fn overall_maximum(&self) -> u32 {
        SESSION_SCALE * self.session_count
    }

    pub fn session_count(&self) -> u32 {
        self.session_count
    }

    pub fn completed(&self) -> u32 {
        self.completed
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn session_progress(&self) -> u32 {
        self.session_progress
    }

    pub fn overall(&self) -> u32 {
        self.overall
    }

    pub fn file_progress(&self) -> u8 {
        self.file_progress
    }

    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    pub fn status(&self) -> &str {
        &self.status
    }
}

fn parse_percent(token: &str) -> Option<u8> {
    let digits = token.strip_suffix('%')?;
    let percent: u32 = digits.parse().ok()?;
    Some(percent.min(100) as u8)
}

/// Parse `left/total` of a `to-check=` token into session progress units.
fn parse_to_check(counts: &str) -> Option<u32> {
    let (left, total) = counts.split_once('/')?;
    let left: u64 = left.parse().ok()?;
    let total: u64 = total.trim_end_matches(')').parse().ok()?;
    if total == 0 || left > total {
        return None;
    }

    if left == 0 {
        return Some(SESSION_SCALE);
    }

    let done = (total - left) as f64 * f64::from(SESSION_SCALE) / total as f64;
    Some((done + 0.5) as u32)
}
