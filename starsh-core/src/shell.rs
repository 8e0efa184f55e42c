//! The embedding entry point: a top-level scope with its interpreter, plus
//! helpers for running text, scripts and captured commands.

use std::path::Path;
use std::sync::{Arc, RwLockReadGuard};

use starsh_parser::{Parser, ProgramParser};

use crate::config::ShellConfig;
use crate::context::{ContextKind, ExecutionContext};
use crate::env::Environment;
use crate::error;
use crate::executive::{Executive, Invocation, StreamSpec, Target};
use crate::functions::{FunctionFactory, FunctionTable};
use crate::interp::Interpreter;
use crate::pipeline::{start_pipeline, RunningPipeline, StagePlan};
use crate::streams::{OutputBuffer, Stream, StreamTable};
use crate::trace_categories;
use crate::variables::Variable;

/// Output collected by [`Shell::capture`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Captured {
    /// Status of the last statement.
    pub status: u8,
    /// Bytes written to channel 1.
    pub stdout: Vec<u8>,
    /// Bytes written to channel 2.
    pub stderr: Vec<u8>,
}

impl Captured {
    /// Returns channel 1's output as text, replacing invalid UTF-8.
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Returns channel 2's output as text, replacing invalid UTF-8.
    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// A shell instance: a top-level execution context plus the interpreter that runs
/// commands in it.
#[derive(Debug)]
pub struct Shell {
    context: Arc<ExecutionContext>,
    interpreter: Interpreter,
}

impl Shell {
    /// Returns a new shell with the given configuration.
    ///
    /// # Arguments
    ///
    /// * `config` - The configuration to use.
    pub fn new(config: ShellConfig) -> Result<Self, error::Error> {
        let working_dir = match &config.working_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir()?,
        };

        let mut environment = if config.inherit_environment {
            let vars = std::env::vars_os().filter_map(|(name, value)| {
                Some((name.into_string().ok()?, value.into_string().ok()?))
            });
            Environment::from_host(vars, working_dir.clone())
        } else {
            Environment::new(working_dir.clone())
        };
        environment.set_working_dir(&working_dir)?;

        let mut functions = FunctionTable::default();
        if config.register_builtins {
            for factory in crate::builtins::default_builtins() {
                functions.register(factory);
            }
        }

        tracing::debug!(
            target: trace_categories::COMMANDS,
            "created shell in {}",
            working_dir.display()
        );

        Ok(Self {
            context: ExecutionContext::top_level(Arc::new(config), environment, functions),
            interpreter: Interpreter::default(),
        })
    }

    /// Registers a function, replacing any with the same name.
    ///
    /// # Arguments
    ///
    /// * `factory` - The function's factory.
    pub fn register(&mut self, factory: Arc<dyn FunctionFactory>) {
        self.context.functions_mut().register(factory);
    }

    /// Parses and runs the given text in the shell's top-level scope, returning the
    /// status of the last statement run.
    ///
    /// # Arguments
    ///
    /// * `text` - The commands to run.
    /// * `origin` - Name of the input, used in diagnostics.
    pub fn run_string(&mut self, text: &str, origin: &str) -> Result<u8, error::Error> {
        let mut parser = ProgramParser::new(Parser::for_text(origin, text));
        self.interpreter.run_parser(&self.context, &mut parser)
    }

    /// Runs a script file in a `Source` scope sharing the shell's variables, with
    /// its own positional parameters.
    ///
    /// # Arguments
    ///
    /// * `path` - The script to run.
    /// * `args` - The script's positional parameters (not including its name).
    pub fn run_script<S: Into<String>, I: IntoIterator<Item = S>>(
        &mut self,
        path: impl AsRef<Path>,
        args: I,
    ) -> Result<u8, error::Error> {
        let path = self.context.environment().resolve_path(path);
        let text = std::fs::read_to_string(&path)?;
        let origin = path.to_string_lossy().into_owned();

        let scope = ExecutionContext::child(&self.context, ContextKind::Source)?;
        let mut parameters = vec![origin.clone()];
        parameters.extend(args.into_iter().map(Into::into));
        scope.set_positional_parameters(parameters);

        scope.begin()?;
        let mut parser = ProgramParser::new(Parser::for_text(&origin, &text));
        let result = self.interpreter.run_parser(&scope, &mut parser);
        scope.finish(*result.as_ref().unwrap_or(&1))?;

        let status = result?;
        self.context.set_exit_status(status);
        Ok(status)
    }

    /// Runs the given text in a subshell scope with empty input, collecting what it
    /// writes to channels 1 and 2. Variable changes do not reach the shell.
    ///
    /// # Arguments
    ///
    /// * `text` - The commands to run.
    pub fn capture(&mut self, text: &str) -> Result<Captured, error::Error> {
        let scope = ExecutionContext::child(&self.context, ContextKind::Main)?;
        let (stdout, stderr) = (OutputBuffer::new(), OutputBuffer::new());
        {
            let mut streams = scope.streams();
            streams.set(StreamTable::STDIN, Stream::document(""));
            streams.set(StreamTable::STDOUT, stdout.clone().into());
            streams.set(StreamTable::STDERR, stderr.clone().into());
        }

        scope.begin()?;
        let mut parser = ProgramParser::new(Parser::for_text("capture", text));
        let result = self.interpreter.run_parser(&scope, &mut parser);
        scope.finish(*result.as_ref().unwrap_or(&1))?;
        drop(scope);

        Ok(Captured {
            status: result?,
            stdout: stdout.take(),
            stderr: stderr.take(),
        })
    }

    /// Starts a single command with all three standard channels piped to the caller.
    ///
    /// # Arguments
    ///
    /// * `argv` - The command name and arguments.
    /// * `locals` - Assignments visible only to the command.
    pub fn spawn(
        &self,
        argv: Vec<String>,
        locals: Vec<(String, String)>,
    ) -> Result<Executive, error::Error> {
        let name = argv.first().cloned().unwrap_or_default();
        let target = Target::resolve(&self.context, &name)?;
        let invocation = Invocation::new(argv)
            .locals(locals)
            .stdin(StreamSpec::Piped)
            .stdout(StreamSpec::Piped)
            .stderr(StreamSpec::Piped);

        Executive::launch(&self.context, &target, invocation)
    }

    /// Starts the given commands as a pipeline connected to the shell's streams.
    ///
    /// # Arguments
    ///
    /// * `commands` - Each stage's name and arguments, in data-flow order.
    /// * `locals` - Assignments visible to every stage.
    pub fn pipeline(
        &self,
        commands: &[Vec<String>],
        locals: &[(String, String)],
    ) -> Result<RunningPipeline, error::Error> {
        let stages = commands
            .iter()
            .map(|argv| {
                let name = argv.first().map(String::as_str).unwrap_or_default();
                let mut plan = StagePlan::new(Target::resolve(&self.context, name)?, argv.clone());
                plan.locals = locals.to_vec();
                Ok(plan)
            })
            .collect::<Result<Vec<_>, error::Error>>()?;

        start_pipeline(&self.context, stages)
    }

    /// Returns the status of the last statement run at top level.
    pub fn last_status(&self) -> u8 {
        self.context.exit_status()
    }

    /// Returns the shell's variables.
    pub fn env(&self) -> RwLockReadGuard<'_, Environment> {
        self.context.environment()
    }

    /// Sets a variable, keeping its export flag if it already exists.
    pub fn set_var(&mut self, name: &str, value: impl Into<String>) -> Result<(), error::Error> {
        self.context.environment_mut().set(name, value, false)
    }

    /// Sets a variable and marks it exported.
    pub fn export_var(&mut self, name: &str, value: impl Into<String>) -> Result<(), error::Error> {
        self.context.environment_mut().set(name, value, true)
    }

    /// Marks a variable read-only, creating it empty if needed.
    pub fn set_readonly(&mut self, name: &str) {
        self.context.environment_mut().set_readonly(name);
    }

    /// Removes a variable, returning it if it existed.
    pub fn unset_var(&mut self, name: &str) -> Result<Option<Variable>, error::Error> {
        self.context.environment_mut().unset(name)
    }

    /// Changes the shell's working directory.
    ///
    /// # Arguments
    ///
    /// * `path` - The new directory, absolute or relative to the current one.
    pub fn set_working_dir(&mut self, path: impl AsRef<Path>) -> Result<(), error::Error> {
        self.context.environment_mut().set_working_dir(path)
    }

    /// Returns the n-th positional parameter; 0 is the shell's name.
    pub fn positional_parameter(&self, n: usize) -> Option<String> {
        self.context.positional_parameter(n)
    }

    /// Waits for every pipeline started with `&` and returns their statuses.
    pub fn wait_background(&self) -> Result<Vec<u8>, error::Error> {
        self.interpreter.wait_background()
    }

    /// Returns the shell's top-level execution context.
    pub const fn context(&self) -> &Arc<ExecutionContext> {
        &self.context
    }
}
