//! Configuration file support for starsh.
//!
//! Settings are layered: defaults < config file < command-line arguments. Unknown
//! keys are ignored.

use etcetera::BaseStrategy;
use std::path::{Path, PathBuf};

use crate::args::CommandLineArgs;

/// Root configuration structure.
#[derive(Debug, Default, Clone, serde::Deserialize)]
#[serde(default)]
pub struct Config {
    /// Shell behavior options.
    pub shell: ShellSection,
}

/// The `[shell]` table.
#[derive(Debug, Default, Clone, serde::Deserialize)]
#[serde(default)]
pub struct ShellSection {
    /// Line terminator written by builtins.
    #[serde(rename = "line-separator")]
    pub line_separator: Option<String>,

    /// Whether channel 2 defaults to channel 1's sink.
    #[serde(rename = "error-follows-output")]
    pub error_follows_output: Option<bool>,

    /// Whether `>` refuses to overwrite existing files.
    #[serde(rename = "no-clobber")]
    pub no_clobber: Option<bool>,
}

impl Config {
    /// Builds the engine configuration from this file's settings and the command
    /// line. Flags given on the command line win.
    pub fn to_shell_config(&self, args: &CommandLineArgs) -> starsh_core::ShellConfig {
        let defaults = starsh_core::ShellConfig::default();

        let line_separator = args
            .line_separator
            .clone()
            .or_else(|| self.shell.line_separator.clone())
            .unwrap_or_else(|| defaults.line_separator.clone());

        let shell_name = if args.command.is_some() {
            args.script_path.clone().or_else(|| Some("starsh".to_owned()))
        } else {
            Some("starsh".to_owned())
        };

        starsh_core::ShellConfig {
            line_separator,
            inherit_environment: !args.do_not_inherit_env,
            error_follows_output: merge_bool_setting(
                args.error_follows_output,
                self.shell.error_follows_output,
            ),
            no_clobber: merge_bool_setting(args.no_clobber, self.shell.no_clobber),
            shell_name,
            positional_parameters: if args.command.is_some() {
                args.script_args.clone()
            } else {
                vec![]
            },
            ..defaults
        }
    }
}

/// Merges an off-by-default flag with a config file value. A flag given on the
/// command line always wins.
const fn merge_bool_setting(cli_value: bool, config_value: Option<bool>) -> bool {
    if cli_value {
        true
    } else if let Some(config) = config_value {
        config
    } else {
        false
    }
}

/// Result of attempting to load a configuration file.
#[derive(Debug)]
pub struct ConfigLoadResult {
    /// The loaded configuration, or the default if loading failed.
    pub config: Config,

    /// The path that was used (or attempted).
    pub path: Option<PathBuf>,

    /// Any error that occurred during loading.
    pub error: Option<ConfigLoadError>,

    /// Whether the path came from `--config`; errors are then fatal.
    pub explicit_path: bool,
}

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse the TOML content.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Returns the default configuration file path for the current platform, if one
/// can be determined.
pub fn default_config_path() -> Option<PathBuf> {
    let strategy = etcetera::choose_base_strategy().ok()?;
    Some(strategy.config_dir().join("starsh").join("config.toml"))
}

/// Loads configuration from the given path.
pub fn load_from_path(path: &Path) -> ConfigLoadResult {
    let loaded = std::fs::read_to_string(path)
        .map_err(ConfigLoadError::from)
        .and_then(|content| toml::from_str(&content).map_err(ConfigLoadError::from));

    let (config, error) = match loaded {
        Ok(config) => (config, None),
        Err(err) => (Config::default(), Some(err)),
    };

    ConfigLoadResult {
        config,
        path: Some(path.to_path_buf()),
        error,
        explicit_path: false,
    }
}

/// Loads configuration.
///
/// # Arguments
///
/// * `disabled` - If true, skip loading and return defaults.
/// * `explicit_path` - If provided, use this path instead of the default.
pub fn load_config(disabled: bool, explicit_path: Option<&Path>) -> ConfigLoadResult {
    let nothing = |path| ConfigLoadResult {
        config: Config::default(),
        path,
        error: None,
        explicit_path: false,
    };

    if disabled {
        return nothing(None);
    }

    let path = match explicit_path {
        Some(p) => p.to_path_buf(),
        None => match default_config_path() {
            Some(p) => p,
            None => return nothing(None),
        },
    };

    if explicit_path.is_none() && !path.exists() {
        return nothing(Some(path));
    }

    let mut result = load_from_path(&path);
    result.explicit_path = explicit_path.is_some();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use clap::Parser;
    use pretty_assertions::assert_eq;

    fn parse_args(args: &[&str]) -> Result<CommandLineArgs> {
        Ok(CommandLineArgs::try_parse_from(
            std::iter::once("starsh").chain(args.iter().copied()),
        )?)
    }

    #[test]
    fn unknown_fields_ignored() -> Result<()> {
        let config: Config = toml::from_str(
            r#"
            [shell]
            no-clobber = true
            future-option = 3

            [elsewhere]
            foo = "bar"
        "#,
        )?;
        assert_eq!(config.shell.no_clobber, Some(true));
        assert_eq!(config.shell.line_separator, None);
        Ok(())
    }

    #[test]
    fn layering() -> Result<()> {
        let config: Config = toml::from_str(
            r#"
            [shell]
            line-separator = "\r\n"
            error-follows-output = true
        "#,
        )?;

        let from_file = config.to_shell_config(&parse_args(&[])?);
        assert_eq!(from_file.line_separator, "\r\n");
        assert!(from_file.error_follows_output);
        assert!(!from_file.no_clobber);

        let from_cli =
            config.to_shell_config(&parse_args(&["--line-separator", ";", "--noclobber"])?);
        assert_eq!(from_cli.line_separator, ";");
        assert!(from_cli.no_clobber);
        Ok(())
    }

    #[test]
    fn command_string_parameters() -> Result<()> {
        let config = Config::default()
            .to_shell_config(&parse_args(&["-c", "echo", "name", "a", "b"])?);
        assert_eq!(config.shell_name.as_deref(), Some("name"));
        assert_eq!(config.positional_parameters, vec!["a", "b"]);
        Ok(())
    }

    #[test]
    fn load_errors() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let broken = dir.path().join("broken.toml");
        std::fs::write(&broken, "[shell\n")?;

        let result = load_config(false, Some(&broken));
        assert!(result.explicit_path);
        assert!(matches!(result.error, Some(ConfigLoadError::Parse(_))));

        let result = load_config(false, Some(&dir.path().join("absent.toml")));
        assert!(matches!(result.error, Some(ConfigLoadError::Io(_))));

        assert!(load_config(true, Some(&broken)).error.is_none());
        Ok(())
    }
}
