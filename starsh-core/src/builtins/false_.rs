use clap::Parser;

use crate::builtins;
use crate::functions::FunctionCall;

/// Return a non-zero exit code.
#[derive(Parser)]
pub(crate) struct FalseCommand {
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, hide = true)]
    _ignored: Vec<String>,
}

impl builtins::BuiltinCommand for FalseCommand {
    fn execute(&self, _call: &mut FunctionCall) -> Result<u8, crate::error::Error> {
        Ok(1)
    }
}
