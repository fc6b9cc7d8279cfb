// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of the application configuration file that Carbon uses
//! to simplify the process of serialization and deserialization. File I/O is
//! left to the caller to figure out.

use crate::path::{default_defaults_file, default_session_dir, NoWayHome};

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    str::FromStr,
};

/// Application configuration layout.
///
/// # General Layout
///
/// The configuration is composed of two optional tables. The binaries table
/// names the external programs Carbon invokes: the rsync wrapper that runs a
/// session, and crontab(1). The paths table relocates the session store and
/// the template new sessions are created from.
///
/// Every path is shell expanded on load, so `~` and environment variables
/// may be used freely.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    /// External programs to execute.
    pub binaries: Binaries,

    /// Storage locations.
    pub paths: Paths,
}

impl AppConfig {
    /// Directory holding session file sets.
    ///
    /// # Errors
    ///
    /// - Return [`NoWayHome`] if no directory is configured and the default
    ///   cannot be determined.
    pub fn session_dir(&self) -> Result<PathBuf, NoWayHome> {
        match &self.paths.sessions {
            Some(path) => Ok(path.clone()),
            None => default_session_dir(),
        }
    }

    /// Session settings template new sessions start from.
    ///
    /// # Errors
    ///
    /// - Return [`NoWayHome`] if no file is configured and the default
    ///   cannot be determined.
    pub fn defaults_file(&self) -> Result<PathBuf, NoWayHome> {
        match &self.paths.defaults {
            Some(path) => Ok(path.clone()),
            None => default_defaults_file(),
        }
    }
}

impl FromStr for AppConfig {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut config: AppConfig = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on every path field.
        config.binaries.runner = expand(&config.binaries.runner)?;
        config.binaries.crontab = expand(&config.binaries.crontab)?;
        if let Some(sessions) = &config.paths.sessions {
            config.paths.sessions = Some(expand(sessions)?);
        }
        if let Some(defaults) = &config.paths.defaults {
            config.paths.defaults = Some(expand(defaults)?);
        }

        Ok(config)
    }
}

impl Display for AppConfig {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

fn expand(path: &Path) -> Result<PathBuf> {
    let expanded = shellexpand::full(path.to_string_lossy().as_ref())
        .map_err(ConfigError::ShellExpansion)?
        .into_owned();

    Ok(PathBuf::from(expanded))
}

/// External programs Carbon executes.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Binaries {
    /// Rsync wrapper that runs one session file.
    pub runner: PathBuf,

    /// Crontab binary used to read and install schedules.
    pub crontab: PathBuf,
}

impl Default for Binaries {
    fn default() -> Self {
        Self {
            runner: PathBuf::from("carbon_runner"),
            crontab: PathBuf::from("crontab"),
        }
    }
}

/// Storage locations.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Paths {
    /// Session store directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sessions: Option<PathBuf>,

    /// Session settings template.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub defaults: Option<PathBuf>,
}

/// Configuration error types.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    #[sealed_test(env = [("BLAH", "/home/blah/blah")])]
    fn deserialize_app_config() -> anyhow::Result<()> {
        let result: AppConfig = r#"
            [binaries]
            runner = "$BLAH/bin/carbon_runner"

            [paths]
            sessions = "$BLAH/sessions"
        "#
        .parse()?;

        let expect = AppConfig {
            binaries: Binaries {
                runner: "/home/blah/blah/bin/carbon_runner".into(),
                crontab: "crontab".into(),
            },
            paths: Paths {
                sessions: Some("/home/blah/blah/sessions".into()),
                defaults: None,
            },
        };

        assert_eq!(result, expect);
        assert_eq!(
            result.session_dir()?,
            PathBuf::from("/home/blah/blah/sessions")
        );

        Ok(())
    }

    #[test]
    fn deserialize_empty_app_config() -> anyhow::Result<()> {
        let result: AppConfig = "".parse()?;
        assert_eq!(result, AppConfig::default());
        assert_eq!(result.binaries.runner, PathBuf::from("carbon_runner"));

        Ok(())
    }

    #[sealed_test]
    fn deserialize_undefined_variable() {
        let result = r#"
            [paths]
            sessions = "$CARBON_UNDEFINED_VARIABLE/sessions"
        "#
        .parse::<AppConfig>();

        assert!(matches!(result, Err(ConfigError::ShellExpansion(_))));
    }

    #[test]
    fn serialize_app_config() {
        let result = AppConfig {
            binaries: Binaries {
                runner: "/usr/bin/carbon_runner".into(),
                crontab: "crontab".into(),
            },
            paths: Paths {
                sessions: Some("/home/blah/sessions".into()),
                defaults: Some("/home/blah/default.carbon".into()),
            },
        }
        .to_string();

        let expect = indoc! {r#"
            [binaries]
            runner = "/usr/bin/carbon_runner"
            crontab = "crontab"

            [paths]
            sessions = "/home/blah/sessions"
            defaults = "/home/blah/default.carbon"
        "#};

        assert_eq!(result, expect);
    }
}
