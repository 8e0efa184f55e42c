//! Explicit configuration threaded into every execution context.

use std::path::PathBuf;

/// Variable that, when set, overrides the line separator used by builtin output.
pub const LINE_SEPARATOR: &str = "LINE_SEPARATOR";

/// The platform's native line terminator.
#[cfg(windows)]
pub const NATIVE_LINE_SEPARATOR: &str = "\r\n";
/// The platform's native line terminator.
#[cfg(not(windows))]
pub const NATIVE_LINE_SEPARATOR: &str = "\n";

/// Options for creating a shell.
#[derive(Clone, Debug)]
pub struct ShellConfig {
    /// Line terminator used by builtins when `LINE_SEPARATOR` is not set.
    pub line_separator: String,
    /// Whether to import the host process's environment variables.
    pub inherit_environment: bool,
    /// Initial working directory; the host's current directory when `None`.
    pub working_dir: Option<PathBuf>,
    /// Whether channel 2 defaults to the same sink as channel 1 instead of the
    /// host's standard error.
    pub error_follows_output: bool,
    /// Whether `>` refuses to overwrite existing files (`>|` always may).
    pub no_clobber: bool,
    /// The shell's name, reported as positional parameter 0.
    pub shell_name: Option<String>,
    /// Initial positional parameters (not including the name).
    pub positional_parameters: Vec<String>,
    /// Whether the default builtins are registered.
    pub register_builtins: bool,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            line_separator: NATIVE_LINE_SEPARATOR.to_owned(),
            inherit_environment: true,
            working_dir: None,
            error_follows_output: false,
            no_clobber: false,
            shell_name: None,
            positional_parameters: vec![],
            register_builtins: true,
        }
    }
}

impl ShellConfig {
    /// Returns a configuration that reads nothing from the host process: no inherited
    /// variables and the given working directory.
    ///
    /// # Arguments
    ///
    /// * `working_dir` - The working directory.
    pub fn hermetic(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            inherit_environment: false,
            working_dir: Some(working_dir.into()),
            ..Self::default()
        }
    }
}
