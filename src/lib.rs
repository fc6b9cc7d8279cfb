// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Scheduled rsync synchronization sessions.
//!
//! Carbon manages named __sessions__: persisted bundles of rsync flags, a
//! source, a destination, exclude patterns, and an optional schedule. A
//! session can be run through an external rsync wrapper process whose output
//! is parsed into progress updates, or scheduled through the user's crontab.
//!
//! # Layout
//!
//! - [`cron`] models crontab schedules, tasks, and the per-user crontab.
//! - [`session`] holds the session settings file format and exclude files.
//! - [`store`] groups session file sets together in one directory.
//! - [`runner`] drives the wrapper process and parses its output stream.
//! - [`config`] and [`path`] describe where everything lives.

pub mod config;
pub mod cron;
pub mod path;
pub mod runner;
pub mod session;
pub mod store;
