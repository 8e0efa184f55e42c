//! Commands built into the shell. They are ordinary functions and run behind the
//! same executive contract as external programs.

use std::io::Write;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::context::ExecutionContext;
use crate::error;
use crate::functions::{Function, FunctionCall, FunctionFactory};

mod cat;
mod echo;
mod false_;
mod pwd;
mod true_;

/// A built-in command whose arguments are parsed with clap.
pub trait BuiltinCommand: clap::Parser + Send + 'static {
    /// Runs the command.
    ///
    /// # Arguments
    ///
    /// * `call` - Streams and context for this invocation.
    fn execute(&self, call: &mut FunctionCall) -> Result<u8, error::Error>;
}

/// Factory for a [`BuiltinCommand`].
pub struct Builtin<T> {
    name: String,
    _command: PhantomData<fn() -> T>,
}

struct BuiltinInstance<T>(PhantomData<fn() -> T>);

impl<T: BuiltinCommand> FunctionFactory for Builtin<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn create(
        &self,
        _context: &Arc<ExecutionContext>,
        _locals: &[(String, String)],
    ) -> Result<Box<dyn Function>, error::Error> {
        Ok(Box::new(BuiltinInstance::<T>(PhantomData)))
    }
}

impl<T: BuiltinCommand> Function for BuiltinInstance<T> {
    fn main(&mut self, call: &mut FunctionCall) -> Result<u8, error::Error> {
        match T::try_parse_from(call.args()) {
            Ok(command) => command.execute(call),
            Err(err) => {
                // Help and version requests are successful output.
                let rendered = err.render().to_string();
                if err.use_stderr() {
                    write!(call.stderr()?, "{rendered}")?;
                    Ok(2)
                } else {
                    write!(call.stdout()?, "{rendered}")?;
                    Ok(0)
                }
            }
        }
    }
}

/// Returns a factory registering `T` under the given name.
pub fn builtin<T: BuiltinCommand>(name: impl Into<String>) -> Arc<dyn FunctionFactory> {
    Arc::new(Builtin::<T> {
        name: name.into(),
        _command: PhantomData,
    })
}

/// Returns the builtins registered by default.
pub fn default_builtins() -> Vec<Arc<dyn FunctionFactory>> {
    vec![
        builtin::<cat::CatCommand>("cat"),
        builtin::<echo::EchoCommand>("echo"),
        builtin::<false_::FalseCommand>("false"),
        builtin::<pwd::PwdCommand>("pwd"),
        builtin::<true_::TrueCommand>("true"),
    ]
}
