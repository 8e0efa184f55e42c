//! Implements the command-line interface for `starsh`.

mod args;
mod config;
mod events;

use clap::Parser;
use crate::args::CommandLineArgs;

/// Errors that end a `starsh` run before the last status is known.
#[derive(Debug, thiserror::Error)]
enum CliError {
    /// The engine failed.
    #[error(transparent)]
    Shell(#[from] starsh_core::Error),

    /// An explicitly requested configuration file could not be used.
    #[error("{path}: {source}")]
    Config {
        path: String,
        source: config::ConfigLoadError,
    },

    /// Commands could not be read from standard input.
    #[error("failed to read commands: {0}")]
    Input(std::io::Error),
}

impl CliError {
    const fn exit_status(&self) -> u8 {
        match self {
            Self::Shell(err) => err.exit_status(),
            Self::Config { .. } => 2,
            Self::Input(_) => 1,
        }
    }
}

/// Main entry point for `starsh`.
fn main() {
    human_panic::setup_panic!(
        human_panic::Metadata::new(env!("CARGO_BIN_NAME"), env!("CARGO_PKG_VERSION"))
            .homepage(env!("CARGO_PKG_REPOSITORY"))
    );

    let args = CommandLineArgs::parse();

    let exit_code = match run(args) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("starsh: {err}");
            err.exit_status()
        }
    };

    std::process::exit(i32::from(exit_code));
}

/// Runs starsh. Returns the exit code.
fn run(args: CommandLineArgs) -> Result<u8, CliError> {
    events::TraceEventConfig::new(&args.enabled_log_events).init();

    let loaded = config::load_config(args.no_config, args.config_file.as_deref());
    if let Some(err) = loaded.error {
        let path = loaded
            .path
            .as_deref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();

        if loaded.explicit_path {
            return Err(CliError::Config { path, source: err });
        }
        tracing::warn!("ignoring configuration in {path}: {err}");
    }

    let mut shell = starsh_core::Shell::new(loaded.config.to_shell_config(&args))?;

    if let Some(command) = &args.command {
        shell.run_string(command, "-c")?;
    } else if args.reads_stdin() {
        run_stdin(&mut shell, |line| std::io::stdin().read_line(line))?;
    } else if let Some(script_path) = &args.script_path {
        shell.run_script(script_path, args.script_args.iter().cloned())?;
    }

    let background = shell.wait_background()?;
    tracing::debug!(target: "commands", "background statuses: {background:?}");

    Ok(shell.last_status())
}

/// Reads commands line by line, running each statement once it is complete.
///
/// `read_line` appends one line and returns the bytes read. No input lock is held
/// while statements run, so commands may read the remaining input themselves.
fn run_stdin(
    shell: &mut starsh_core::Shell,
    mut read_line: impl FnMut(&mut String) -> std::io::Result<usize>,
) -> Result<(), CliError> {
    let mut pending = String::new();

    loop {
        let read = read_line(&mut pending).map_err(CliError::Input)?;
        if read == 0 {
            break;
        }

        match starsh_parser::parse_program("stdin", &pending) {
            Err(err) if err.is_incomplete() => continue,
            _ => {
                shell.run_string(&pending, "stdin")?;
                pending.clear();
            }
        }
    }

    if !pending.trim().is_empty() {
        shell.run_string(&pending, "stdin")?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::io::BufRead;
    use pretty_assertions::assert_eq;

    #[test]
    fn stdin_statements_wait_for_completion() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut shell = starsh_core::Shell::new(starsh_core::ShellConfig::hermetic(dir.path()))?;

        let mut input = "A=one &&\nB=two\nfalse\nC='multi\nline'\n".as_bytes();
        run_stdin(&mut shell, |line| input.read_line(line))?;

        assert_eq!(shell.env().get_str("A"), Some("one"));
        assert_eq!(shell.env().get_str("B"), Some("two"));
        assert_eq!(shell.env().get_str("C"), Some("multi\nline"));
        assert_eq!(shell.last_status(), 0);
        Ok(())
    }

    #[test]
    fn config_errors_use_status_2() {
        let err = CliError::Config {
            path: "x".into(),
            source: config::ConfigLoadError::Io(std::io::Error::other("nope")),
        };
        assert_eq!(err.exit_status(), 2);
        assert_eq!(err.to_string(), "x: failed to read config file: nope");
    }
}
