use clap::{Parser, builder::styling};
use std::path::PathBuf;

use crate::events;

const SHORT_DESCRIPTION: &str = "Runs starsh command-language scripts";

const LONG_DESCRIPTION: &str = r"
starsh runs scripts written in a small POSIX-flavored command language: simple
commands, pipelines, redirections, here-documents, && / || chains, groups and
subshells.

With no script and no -c, commands are read from standard input.
";

/// Parsed command-line arguments for starsh.
#[derive(Debug, Parser)]
#[clap(name = "starsh",
       version,
       about = SHORT_DESCRIPTION,
       long_about = LONG_DESCRIPTION,
       styles = help_styles())]
#[allow(clippy::module_name_repetitions)]
pub struct CommandLineArgs {
    /// Execute the provided command and then exit.
    #[arg(short = 'c', value_name = "COMMAND")]
    pub command: Option<String>,

    /// Read commands from standard input.
    #[clap(short = 's')]
    pub read_commands_from_stdin: bool,

    /// Path to a configuration file to use instead of the default.
    #[clap(long = "config", value_name = "FILE", conflicts_with = "no_config")]
    pub config_file: Option<PathBuf>,

    /// Do not load any configuration file.
    #[clap(long = "no-config")]
    pub no_config: bool,

    /// Don't inherit environment variables from the calling process.
    #[clap(long = "noenv")]
    pub do_not_inherit_env: bool,

    /// Line terminator written by builtins.
    #[clap(long = "line-separator", value_name = "TEXT")]
    pub line_separator: Option<String>,

    /// Send channel 2 to the same place as channel 1 by default.
    #[clap(long = "error-follows-output")]
    pub error_follows_output: bool,

    /// Refuse to overwrite existing files with `>`.
    #[clap(long = "noclobber")]
    pub no_clobber: bool,

    /// Enable debug logging for classes of tracing events.
    #[clap(long = "log-enable", value_name = "EVENT")]
    pub enabled_log_events: Vec<events::TraceEvent>,

    /// Path to script to execute.
    #[clap(allow_hyphen_values = true)]
    pub script_path: Option<String>,

    /// Arguments for script.
    #[clap(trailing_var_arg = true, allow_hyphen_values = true)]
    pub script_args: Vec<String>,
}

impl CommandLineArgs {
    /// Returns true when commands come from standard input.
    pub const fn reads_stdin(&self) -> bool {
        self.command.is_none() && (self.read_commands_from_stdin || self.script_path.is_none())
    }
}

fn help_styles() -> clap::builder::Styles {
    styling::Styles::styled()
        .header(styling::AnsiColor::Yellow.on_default() | styling::Effects::BOLD)
        .usage(styling::AnsiColor::Green.on_default() | styling::Effects::BOLD)
        .literal(styling::AnsiColor::Magenta.on_default() | styling::Effects::BOLD)
        .placeholder(styling::AnsiColor::Cyan.on_default())
}
