// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Session exclude patterns.
//!
//! Every session may carry an exclude file that the rsync wrapper hands to
//! rsync through `--exclude-from`. The file holds one pattern per line. A
//! line starting with `#` or `;` is a comment describing the pattern that
//! follows it. When several comment lines precede a pattern, only the last
//! one is kept.
//!
//! ```text
//! # Build artifacts
//! target/
//! ; Editor swap files
//! *.swp
//! ```
//!
//! Saving an empty pattern list removes the exclude file entirely.

use crate::session::{Result, SessionError};

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs::{read_to_string, remove_file, write},
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tracing::{debug, instrument};

/// Exclude pattern with optional comment.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExcludePattern {
    pub value: String,
    pub comment: String,
}

impl ExcludePattern {
    pub fn new(value: impl Into<String>, comment: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            comment: comment.into(),
        }
    }
}

impl Display for ExcludePattern {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        if self.comment.is_empty() {
            fmt.write_str(&self.value)
        } else {
            write!(fmt, "{} # {}", self.value, self.comment)
        }
    }
}

/// Exclude pattern file of a session.
///
/// # Invariant
///
/// - Pattern order is preserved.
/// - Pattern values are never empty.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExcludeFile {
    path: PathBuf,
    patterns: Vec<ExcludePattern>,
}

impl ExcludeFile {
    /// Construct empty exclude file at path without touching the disk.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            patterns: Vec::new(),
        }
    }

    /// Load exclude file.
    ///
    /// A missing file is treated as an empty pattern list.
    ///
    /// # Errors
    ///
    /// - Return [`SessionError::ReadExclude`] if file exists but cannot be
    ///   read.
    #[instrument(skip(path), level = "debug")]
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = match read_to_string(&path) {
            Ok(content) => content,
            Err(error) if error.kind() == ErrorKind::NotFound => String::new(),
            Err(source) => return Err(SessionError::ReadExclude { source, path }),
        };

        Ok(Self {
            patterns: Self::parse(&content),
            path,
        })
    }

    /// Parse exclude patterns from text.
    pub fn parse(content: &str) -> Vec<ExcludePattern> {
        let mut patterns = Vec::new();
        let mut comment = String::new();

        for line in content.lines().map(str::trim) {
            if line.is_empty() {
                continue;
            }

            match line.strip_prefix('#').or_else(|| line.strip_prefix(';')) {
                Some(text) => comment = text.trim().into(),
                None => patterns.push(ExcludePattern::new(line, std::mem::take(&mut comment))),
            }
        }

        patterns
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn patterns(&self) -> &[ExcludePattern] {
        &self.patterns
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Replace every pattern.
    pub fn set_patterns(&mut self, patterns: impl IntoIterator<Item = ExcludePattern>) {
        self.patterns = patterns
            .into_iter()
            .filter(|pattern| !pattern.value.trim().is_empty())
            .collect();
    }

    /// Append pattern unless an identical value already exists.
    ///
    /// Returns `true` if the pattern was added.
    pub fn add(&mut self, pattern: ExcludePattern) -> bool {
        let value = pattern.value.trim();
        if value.is_empty() || self.patterns.iter().any(|p| p.value == value) {
            return false;
        }

        self.patterns.push(ExcludePattern::new(value, pattern.comment));
        true
    }

    /// Remove pattern by value.
    ///
    /// Returns `true` if the pattern was present.
    pub fn remove(&mut self, value: &str) -> bool {
        let before = self.patterns.len();
        self.patterns.retain(|pattern| pattern.value != value);
        before != self.patterns.len()
    }

    /// Save patterns to exclude file.
    ///
    /// An empty pattern list erases the file instead.
    ///
    /// # Errors
    ///
    /// - Return [`SessionError::WriteExclude`] if file cannot be written.
    /// - Return [`SessionError::RemoveExclude`] if file cannot be erased.
    #[instrument(skip(self), level = "debug")]
    pub fn save(&self) -> Result<()> {
        if self.patterns.is_empty() {
            return self.erase();
        }

        write(&self.path, self.to_string()).map_err(|source| SessionError::WriteExclude {
            source,
            path: self.path.clone(),
        })?;
        debug!("saved {} exclude pattern(s)", self.patterns.len());

        Ok(())
    }

    /// Save patterns to another path, erasing the old file.
    ///
    /// The old file is only erased once the new one is saved. On failure the
    /// exclude file keeps its old path.
    ///
    /// # Errors
    ///
    /// - Return [`SessionError`] if the new file cannot be saved, or the old
    ///   one cannot be removed.
    pub fn save_as(&mut self, path: impl Into<PathBuf>) -> Result<()> {
        let path = path.into();
        if path == self.path {
            return self.save();
        }

        let old = std::mem::replace(&mut self.path, path);
        if let Err(error) = self.save() {
            self.path = old;
            return Err(error);
        }

        erase_file(&old)
    }

    /// Remove exclude file if it exists.
    ///
    /// # Errors
    ///
    /// - Return [`SessionError::RemoveExclude`] if file cannot be removed.
    pub fn erase(&self) -> Result<()> {
        erase_file(&self.path)
    }

    /// Build matcher for patterns relative to root directory.
    ///
    /// Patterns follow rsync's exclude rules closely enough to be matched
    /// with gitignore semantics: a leading `/` anchors to the root, a
    /// trailing `/` matches only directories, and `!` re-includes.
    ///
    /// # Errors
    ///
    /// - Return [`SessionError::Pattern`] if a pattern is invalid.
    pub fn matcher(&self, root: impl AsRef<Path>) -> Result<Gitignore> {
        let mut builder = GitignoreBuilder::new(root.as_ref());
        for pattern in &self.patterns {
            builder
                .add_line(None, &pattern.value)
                .map_err(|source| SessionError::Pattern {
                    source,
                    pattern: pattern.value.clone(),
                })?;
        }

        builder.build().map_err(|source| SessionError::Pattern {
            source,
            pattern: String::new(),
        })
    }

    /// Check if path under root would be excluded from transfer.
    ///
    /// A path is excluded when it, or any of its parents, matches.
    ///
    /// # Errors
    ///
    /// - Return [`SessionError::Pattern`] if a pattern is invalid.
    pub fn is_excluded(&self, root: impl AsRef<Path>, path: impl AsRef<Path>) -> Result<bool> {
        let root = root.as_ref();
        let path = path.as_ref();
        let full = if path.is_absolute() {
            path.to_path_buf()
        } else {
            root.join(path)
        };

        if !full.starts_with(root) {
            return Ok(false);
        }

        let matcher = self.matcher(root)?;
        Ok(matcher
            .matched_path_or_any_parents(&full, full.is_dir())
            .is_ignore())
    }

    /// List entries under root that patterns exclude directly.
    ///
    /// # Errors
    ///
    /// - Return [`SessionError::Pattern`] if a pattern is invalid.
    pub fn preview(&self, root: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
        let root = root.as_ref();
        let matcher = self.matcher(root)?;
        let excluded = ignore::WalkBuilder::new(root)
            .standard_filters(false)
            .build()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.depth() > 0)
            .filter(|entry| {
                let is_dir = entry.file_type().is_some_and(|kind| kind.is_dir());
                matcher.matched(entry.path(), is_dir).is_ignore()
            })
            .map(|entry| entry.into_path())
            .collect::<Vec<_>>();

        Ok(excluded)
    }
}

fn erase_file(path: &Path) -> Result<()> {
    match remove_file(path) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
        Err(source) => Err(SessionError::RemoveExclude {
            source,
            path: path.into(),
        }),
    }
}

impl Display for ExcludeFile {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        for pattern in &self.patterns {
            if !pattern.comment.is_empty() {
                writeln!(fmt, "# {}", pattern.comment)?;
            }
            writeln!(fmt, "{}", pattern.value)?;
        }

        Ok(())
    }
}
