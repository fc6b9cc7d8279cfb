// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Exit code taxonomy of the rsync wrapper.
//!
//! The wrapper passes rsync's own exit status through unchanged, and adds a
//! range of codes starting at 101 for failures that happen before rsync ever
//! runs.
//!
//! # See Also
//!
//! - [rsync(1) exit values](https://download.samba.org/pub/rsync/rsync.1#EXIT_VALUES)

use std::{
    borrow::Cow,
    fmt::{Display, Formatter, Result as FmtResult},
    process::ExitStatus,
};

/// Exit status of one wrapper run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExitCode {
    Success,

    // rsync codes.
    Syntax,
    Protocol,
    FileSelect,
    Unsupported,
    StartClient,
    LogFileAppend,
    SocketIo,
    FileIo,
    StreamIo,
    MessageIo,
    Ipc,
    Signal,
    WaitChild,
    Malloc,
    PartialTransfer,
    Vanished,
    DeleteLimit,
    Timeout,
    DaemonTimeout,

    // Wrapper codes.
    Usage,
    SessionFile,
    CreateDestination,
    DestinationIsFile,
    Mount,
    Unmount,
    MountpointExists,
    RemoteUser,
    NoSource,
    NoDestination,
    DestinationParent,
    SourceMissing,
    AlreadyRunning,

    /// Code without a known meaning.
    Unknown(i32),
}

impl ExitCode {
    pub fn from_i32(code: i32) -> Self {
        match code {
            0 => Self::Success,
            1 => Self::Syntax,
            2 => Self::Protocol,
            3 => Self::FileSelect,
            4 => Self::Unsupported,
            5 => Self::StartClient,
            6 => Self::LogFileAppend,
            10 => Self::SocketIo,
            11 => Self::FileIo,
            12 => Self::StreamIo,
            13 => Self::MessageIo,
            14 => Self::Ipc,
            20 => Self::Signal,
            21 => Self::WaitChild,
            22 => Self::Malloc,
            23 => Self::PartialTransfer,
            24 => Self::Vanished,
            25 => Self::DeleteLimit,
            30 => Self::Timeout,
            35 => Self::DaemonTimeout,
            101 => Self::Usage,
            102 => Self::SessionFile,
            103 => Self::CreateDestination,
            104 => Self::DestinationIsFile,
            105 => Self::Mount,
            106 => Self::Unmount,
            107 => Self::MountpointExists,
            108 => Self::RemoteUser,
            109 => Self::NoSource,
            110 => Self::NoDestination,
            111 => Self::DestinationParent,
            112 => Self::SourceMissing,
            113 => Self::AlreadyRunning,
            other => Self::Unknown(other),
        }
    }

    /// Convert process exit status.
    ///
    /// A process killed by a signal is reported as `128 + signal`, the way a
    /// shell would.
    pub fn from_status(status: ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;

        match (status.code(), status.signal()) {
            (Some(code), _) => Self::from_i32(code),
            (None, Some(signal)) => Self::from_i32(128 + signal),
            (None, None) => Self::Unknown(-1),
        }
    }

    pub fn as_i32(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Syntax => 1,
            Self::Protocol => 2,
            Self::FileSelect => 3,
            Self::Unsupported => 4,
            Self::StartClient => 5,
            Self::LogFileAppend => 6,
            Self::SocketIo => 10,
            Self::FileIo => 11,
            Self::StreamIo => 12,
            Self::MessageIo => 13,
            Self::Ipc => 14,
            Self::Signal => 20,
            Self::WaitChild => 21,
            Self::Malloc => 22,
            Self::PartialTransfer => 23,
            Self::Vanished => 24,
            Self::DeleteLimit => 25,
            Self::Timeout => 30,
            Self::DaemonTimeout => 35,
            Self::Usage => 101,
            Self::SessionFile => 102,
            Self::CreateDestination => 103,
            Self::DestinationIsFile => 104,
            Self::Mount => 105,
            Self::Unmount => 106,
            Self::MountpointExists => 107,
            Self::RemoteUser => 108,
            Self::NoSource => 109,
            Self::NoDestination => 110,
            Self::DestinationParent => 111,
            Self::SourceMissing => 112,
            Self::AlreadyRunning => 113,
            Self::Unknown(code) => code,
        }
    }

    pub fn is_success(self) -> bool {
        self == Self::Success
    }

    /// Check if code comes from the wrapper rather than rsync.
    pub fn is_wrapper_error(self) -> bool {
        (101..=113).contains(&self.as_i32())
    }

    /// Human readable explanation of failure.
    ///
    /// Returns `None` for success.
    pub fn message(self) -> Option<Cow<'static, str>> {
        let message = match self {
            Self::Success => return None,
            Self::Syntax => "Syntax or usage error.",
            Self::Protocol => "Protocol incompatibility.",
            Self::FileSelect => "Errors selecting input/output files/folders.",
            Self::Unsupported => {
                "Requested action not supported: an attempt was made to manipulate 64-bit \
                 files on a platform that cannot support them; or an option was specified \
                 that is supported by the client and not by the server."
            }
            Self::StartClient => "Error starting client-server protocol.",
            Self::LogFileAppend => "Daemon unable to append to log-file.",
            Self::SocketIo => "Error in socket I/O.",
            Self::FileIo => "Error in file I/O.",
            Self::StreamIo => "Error in rsync protocol data stream.",
            Self::MessageIo => "Errors with program diagnostics.",
            Self::Ipc => "Error in IPC code.",
            Self::Signal => "Received SIGUSR1 or SIGINT.",
            Self::WaitChild => "Some error returned by waitpid().",
            Self::Malloc => "Error allocating core memory buffers.",
            Self::PartialTransfer => "Partial transfer due to error.",
            Self::Vanished => "Partial transfer due to vanished source files.",
            Self::DeleteLimit => "The --max-delete limit stopped deletions.",
            Self::Timeout => "Timeout in data send/receive.",
            Self::DaemonTimeout => "Timeout waiting for daemon connection.",
            Self::Usage => "Usage error.",
            Self::SessionFile => "Could not read session file.",
            Self::CreateDestination => "Destination folder does not exist, and could not be created.",
            Self::DestinationIsFile => "Destination exists as a file.",
            Self::Mount => "Failed to mount destination folder.",
            Self::Unmount => "Failed to unmount destination folder.",
            Self::MountpointExists => "Mountpoint already exists.",
            Self::RemoteUser => "Destination requires user@host",
            Self::NoSource => "No source supplied.",
            Self::NoDestination => "No destination supplied.",
            Self::DestinationParent => "Destination parent folder does not exist.",
            Self::SourceMissing => "Source does not exist.",
            Self::AlreadyRunning => "Session is already running.",
            Self::Unknown(code) => return Some(Cow::Owned(format!("Unknown error code {code}."))),
        };

        Some(Cow::Borrowed(message))
    }
}

impl From<i32> for ExitCode {
    fn from(code: i32) -> Self {
        Self::from_i32(code)
    }
}

impl Display for ExitCode {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self.message() {
            Some(message) => write!(fmt, "{message} (exit code {})", self.as_i32()),
            None => fmt.write_str("Finished"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simple_test_case::test_case;

    #[test_case(1, "Syntax or usage error."; "syntax")]
    #[test_case(23, "Partial transfer due to error."; "partial")]
    #[test_case(35, "Timeout waiting for daemon connection."; "daemon timeout")]
    #[test_case(101, "Usage error."; "usage")]
    #[test_case(108, "Destination requires user@host"; "remote user")]
    #[test_case(113, "Session is already running."; "already running")]
    #[test_case(7, "Unknown error code 7."; "gap in rsync range")]
    #[test_case(250, "Unknown error code 250."; "far out of range")]
    #[test]
    fn messages(code: i32, expect: &str) {
        assert_eq!(ExitCode::from_i32(code).message().as_deref(), Some(expect));
    }

    #[test]
    fn success_has_no_message() {
        assert_eq!(ExitCode::from_i32(0), ExitCode::Success);
        assert!(ExitCode::Success.is_success());
        assert_eq!(ExitCode::Success.message(), None);
    }

    #[test]
    fn codes_round_trip() {
        for code in (0..=40).chain(100..=115) {
            assert_eq!(ExitCode::from_i32(code).as_i32(), code);
        }
    }

    #[test]
    fn wrapper_range() {
        assert!(ExitCode::Usage.is_wrapper_error());
        assert!(ExitCode::AlreadyRunning.is_wrapper_error());
        assert!(!ExitCode::PartialTransfer.is_wrapper_error());
        assert!(!ExitCode::Unknown(114).is_wrapper_error());
    }

    #[test]
    fn display_includes_code() {
        assert_eq!(
            ExitCode::AlreadyRunning.to_string(),
            "Session is already running. (exit code 113)"
        );
    }
}
