use clap::Parser;
use std::io::Write;

use crate::builtins;
use crate::functions::FunctionCall;

/// Display the current working directory.
#[derive(Parser)]
pub(crate) struct PwdCommand {}

impl builtins::BuiltinCommand for PwdCommand {
    fn execute(&self, call: &mut FunctionCall) -> Result<u8, crate::error::Error> {
        let cwd = call
            .context()
            .environment()
            .working_dir()
            .to_string_lossy()
            .into_owned();

        write!(call.stdout()?, "{cwd}{}", call.line_separator())?;
        Ok(0)
    }
}
