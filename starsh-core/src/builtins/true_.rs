use clap::Parser;

use crate::builtins;
use crate::functions::FunctionCall;

/// Return 0.
#[derive(Parser)]
pub(crate) struct TrueCommand {
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, hide = true)]
    _ignored: Vec<String>,
}

impl builtins::BuiltinCommand for TrueCommand {
    fn execute(&self, _call: &mut FunctionCall) -> Result<u8, crate::error::Error> {
        Ok(0)
    }
}
