use clap::Parser;
use std::io::{Read, Write};

use crate::builtins;
use crate::functions::FunctionCall;

/// Concatenate files (or standard input) to standard output.
#[derive(Parser)]
#[clap(disable_help_flag = true, disable_version_flag = true)]
pub(crate) struct CatCommand {
    /// Files to read; `-` reads standard input.
    #[arg(allow_hyphen_values = true)]
    files: Vec<String>,
}

impl CatCommand {
    fn copy(call: &FunctionCall, mut input: impl Read) -> Result<(), crate::error::Error> {
        let mut output = call.stdout()?;
        let mut buffer = [0; 8192];
        loop {
            if call.is_interrupted() {
                return Ok(());
            }

            let count = match input.read(&mut buffer) {
                Ok(0) => return Ok(()),
                Ok(count) => count,
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            };

            match output.write_all(&buffer[..count]) {
                Ok(()) => (),
                // The reader went away; nothing more to do.
                Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => return Ok(()),
                Err(err) => return Err(err.into()),
            }
        }
    }
}

impl builtins::BuiltinCommand for CatCommand {
    fn execute(&self, call: &mut FunctionCall) -> Result<u8, crate::error::Error> {
        if self.files.is_empty() {
            Self::copy(call, call.stdin()?)?;
            return Ok(0);
        }

        let mut status = 0;
        for file in &self.files {
            if file == "-" {
                Self::copy(call, call.stdin()?)?;
                continue;
            }

            let path = call.context().environment().resolve_path(file);
            match std::fs::File::open(&path) {
                Ok(f) => Self::copy(call, f)?,
                Err(err) => {
                    writeln!(call.stderr()?, "cat: {file}: {err}")?;
                    status = 1;
                }
            }
        }

        Ok(status)
    }
}
