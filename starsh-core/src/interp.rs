//! Executes parsed programs.

use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};

use starsh_parser::ast::{AssignmentOperator, EnvironmentAssignment};
use starsh_parser::program::{Block, Connector, Pipeline, SimpleCommand, Stage, Statement};
use starsh_parser::ProgramParser;

use crate::context::{ContextKind, ExecutionContext};
use crate::error;
use crate::executive::Target;
use crate::functions::{Function, FunctionCall, FunctionFactory};
use crate::pipeline::{start_pipeline, RunningPipeline, StagePlan};
use crate::redirects::apply_redirects;
use crate::streams::StreamTable;
use crate::trace_categories;

/// Runs statements in execution contexts. Clones share the list of background
/// pipelines.
#[derive(Clone, Debug, Default)]
pub struct Interpreter {
    background: Arc<Mutex<Vec<RunningPipeline>>>,
}

/// Decides whether a statement runs, given the connector before it and the
/// status so far.
const fn should_run(previous: Option<Connector>, status: u8) -> bool {
    match previous {
        Some(Connector::And) => status == 0,
        Some(Connector::Or) => status != 0,
        Some(Connector::Sequence | Connector::Background) | None => true,
    }
}

/// Writes a diagnostic to the scope's channel 2.
pub(crate) fn report(context: &ExecutionContext, err: &error::Error) {
    tracing::debug!(target: trace_categories::COMMANDS, "reporting: {err}");

    let name = context
        .positional_parameter(0)
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "starsh".to_owned());

    let mut streams = context.streams();
    if let Some(stderr) = streams.get_mut(StreamTable::STDERR) {
        let _ = writeln!(stderr, "{name}: {err}");
        let _ = stderr.flush();
    }
}

impl Interpreter {
    /// Parses and runs statements one at a time until input ends. A syntax error
    /// is reported and stops execution with status 2.
    ///
    /// # Arguments
    ///
    /// * `context` - The scope to run in.
    /// * `parser` - The statement source.
    pub fn run_parser(
        &self,
        context: &Arc<ExecutionContext>,
        parser: &mut ProgramParser,
    ) -> Result<u8, error::Error> {
        let mut previous = None;
        loop {
            let statement = match parser.next_statement() {
                Ok(Some(statement)) => statement,
                Ok(None) => break,
                Err(err) => {
                    tracing::debug!(target: trace_categories::PARSE, "syntax error: {err}");
                    let err = error::Error::from(err);
                    report(context, &err);
                    context.set_exit_status(err.exit_status());
                    return Ok(err.exit_status());
                }
            };

            if should_run(previous, context.exit_status()) {
                let status = self.execute_statement(context, &statement)?;
                context.set_exit_status(status);
            }
            previous = Some(statement.connector);
        }

        Ok(context.exit_status())
    }

    /// Runs already-parsed statements with and-or short-circuiting.
    ///
    /// # Arguments
    ///
    /// * `context` - The scope to run in.
    /// * `statements` - The statements.
    pub fn execute_statements(
        &self,
        context: &Arc<ExecutionContext>,
        statements: &[Statement],
    ) -> Result<u8, error::Error> {
        let mut previous = None;
        for statement in statements {
            if should_run(previous, context.exit_status()) {
                let status = self.execute_statement(context, statement)?;
                context.set_exit_status(status);
            }
            previous = Some(statement.connector);
        }

        Ok(context.exit_status())
    }

    fn execute_statement(
        &self,
        context: &Arc<ExecutionContext>,
        statement: &Statement,
    ) -> Result<u8, error::Error> {
        let background = statement.connector == Connector::Background;
        match self.execute_pipeline(context, &statement.pipeline, background) {
            Ok(status) => Ok(status),
            Err(err @ error::Error::ReadOnlyViolation(..)) => {
                report(context, &err);
                Ok(err.exit_status())
            }
            Err(err) if err.is_programmer_error() => Err(err),
            Err(err) => {
                report(context, &err);
                Ok(err.exit_status())
            }
        }
    }

    fn execute_pipeline(
        &self,
        context: &Arc<ExecutionContext>,
        pipeline: &Pipeline,
        background: bool,
    ) -> Result<u8, error::Error> {
        if let [stage] = pipeline.stages.as_slice() {
            if !background {
                match stage {
                    Stage::Simple(command) if command.parameters.is_empty() => {
                        return Self::execute_bare(context, command);
                    }
                    Stage::Group(block) => {
                        return self.execute_block(context, block, ContextKind::CommandGroup);
                    }
                    Stage::Subshell(block) => {
                        return self.execute_block(context, block, ContextKind::Main);
                    }
                    Stage::Simple(_) => (),
                }
            }
        }

        let plans = pipeline
            .stages
            .iter()
            .map(|stage| self.plan_stage(context, stage))
            .collect::<Result<Vec<_>, _>>()?;

        let mut running = start_pipeline(context, plans)?;
        if background {
            tracing::debug!(target: trace_categories::PIPELINE, "running pipeline in background");
            self.background
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(running);
            return Ok(0);
        }

        running.wait()
    }

    /// Runs a word-less command: assignments go to the scope, redirections are
    /// performed for their side effects.
    fn execute_bare(
        context: &Arc<ExecutionContext>,
        command: &SimpleCommand,
    ) -> Result<u8, error::Error> {
        {
            let mut env = context.environment_mut();
            for assignment in &command.assignments {
                let value = assignment.value_text();
                match assignment.operator {
                    AssignmentOperator::Assign => env.set(&assignment.name, value, false)?,
                    AssignmentOperator::Append => env.append(&assignment.name, &value, false)?,
                }
            }
        }

        if !command.redirects.is_empty() {
            let table = context.streams().try_clone()?;
            let env = context.environment();
            drop(apply_redirects(
                &table,
                &command.redirects,
                &env,
                context.config().no_clobber,
            )?);
        }

        Ok(0)
    }

    fn execute_block(
        &self,
        context: &Arc<ExecutionContext>,
        block: &Block,
        kind: ContextKind,
    ) -> Result<u8, error::Error> {
        let child = ExecutionContext::child(context, kind)?;

        if !block.redirects.is_empty() {
            let table = {
                let base = context.streams();
                let env = context.environment();
                apply_redirects(&base, &block.redirects, &env, context.config().no_clobber)?
            };
            *child.streams() = table;
        }

        child.begin()?;
        let result = self.execute_statements(&child, &block.statements);
        child.finish(*result.as_ref().unwrap_or(&1))?;
        result
    }

    fn plan_stage(
        &self,
        context: &Arc<ExecutionContext>,
        stage: &Stage,
    ) -> Result<StagePlan, error::Error> {
        match stage {
            Stage::Simple(command) => self.plan_simple(context, command),
            Stage::Group(block) | Stage::Subshell(block) => {
                let name = if matches!(stage, Stage::Group(_)) { "{" } else { "(" };
                let factory = Arc::new(BlockStage {
                    name,
                    interpreter: self.clone(),
                    scope: context.clone(),
                    statements: Arc::new(block.statements.clone()),
                });

                Ok(StagePlan {
                    target: Target::Function(factory),
                    argv: vec![name.to_owned()],
                    locals: vec![],
                    redirects: block.redirects.clone(),
                })
            }
        }
    }

    fn plan_simple(
        &self,
        context: &Arc<ExecutionContext>,
        command: &SimpleCommand,
    ) -> Result<StagePlan, error::Error> {
        let argv = command.argv();
        let locals = command_locals(context, &command.assignments);

        let target = match argv.first() {
            Some(name) => Target::resolve(context, name)?,
            None => Target::Function(Arc::new(BlockStage {
                name: "",
                interpreter: self.clone(),
                scope: context.clone(),
                statements: Arc::new(vec![]),
            })),
        };

        Ok(StagePlan {
            target,
            argv,
            locals,
            redirects: command.redirects.clone(),
        })
    }

    /// Waits for every background pipeline started so far and returns their
    /// statuses in start order.
    pub fn wait_background(&self) -> Result<Vec<u8>, error::Error> {
        let jobs = std::mem::take(
            &mut *self
                .background
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );

        let mut statuses = vec![];
        for mut job in jobs {
            statuses.push(job.wait()?);
        }
        Ok(statuses)
    }

    /// Returns the number of background pipelines not yet awaited.
    pub fn background_count(&self) -> usize {
        self.background
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Evaluates command-scoped assignments. `+=` appends to the scope's value or an
/// earlier assignment on the same command.
fn command_locals(
    context: &ExecutionContext,
    assignments: &[EnvironmentAssignment],
) -> Vec<(String, String)> {
    let env = context.environment();
    let mut locals: Vec<(String, String)> = vec![];

    for assignment in assignments {
        let mut value = assignment.value_text().into_owned();
        if assignment.operator == AssignmentOperator::Append {
            let existing = locals
                .iter()
                .rev()
                .find(|(name, _)| *name == assignment.name)
                .map(|(_, value)| value.as_str())
                .or_else(|| env.get_str(&assignment.name))
                .unwrap_or_default();
            value.insert_str(0, existing);
        }
        locals.push((assignment.name.clone(), value));
    }

    locals
}

/// A `{ ... }` or `( ... )` block running as one stage of a larger pipeline, or in
/// the background. It runs on its own worker thread with a private copy of the
/// scope's variables.
struct BlockStage {
    name: &'static str,
    interpreter: Interpreter,
    scope: Arc<ExecutionContext>,
    statements: Arc<Vec<Statement>>,
}

struct BlockRun {
    interpreter: Interpreter,
    scope: Arc<ExecutionContext>,
    statements: Arc<Vec<Statement>>,
}

impl FunctionFactory for BlockStage {
    fn name(&self) -> &str {
        self.name
    }

    fn create(
        &self,
        _context: &Arc<ExecutionContext>,
        _locals: &[(String, String)],
    ) -> Result<Box<dyn Function>, error::Error> {
        Ok(Box::new(BlockRun {
            interpreter: self.interpreter.clone(),
            scope: self.scope.clone(),
            statements: self.statements.clone(),
        }))
    }
}

impl Function for BlockRun {
    fn main(&mut self, call: &mut FunctionCall) -> Result<u8, error::Error> {
        let context = ExecutionContext::child(&self.scope, ContextKind::Main)?;
        *context.streams() = std::mem::take(&mut *call.context().streams());

        context.begin()?;
        let result = self.interpreter.execute_statements(&context, &self.statements);
        context.finish(*result.as_ref().unwrap_or(&1))?;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ShellConfig;
    use crate::env::Environment;
    use crate::functions::{simple_function, FunctionTable};
    use crate::streams::{OutputBuffer, Stream};
    use anyhow::Result;
    use pretty_assertions::assert_eq;

    struct Fixture {
        context: Arc<ExecutionContext>,
        interpreter: Interpreter,
        out: OutputBuffer,
        err: OutputBuffer,
    }

    impl Fixture {
        fn new() -> Self {
            let mut functions = FunctionTable::default();
            for factory in crate::builtins::default_builtins() {
                functions.register(factory);
            }
            functions.register(simple_function("status", |call| {
                Ok(call.args().get(1).and_then(|s| s.parse().ok()).unwrap_or(0))
            }));

            let context = ExecutionContext::top_level(
                Arc::new(ShellConfig::hermetic(".")),
                Environment::new("."),
                functions,
            );

            let (out, err) = (OutputBuffer::new(), OutputBuffer::new());
            {
                let mut streams = context.streams();
                streams.set(StreamTable::STDIN, Stream::document(""));
                streams.set(StreamTable::STDOUT, out.clone().into());
                streams.set(StreamTable::STDERR, err.clone().into());
            }

            Self {
                context,
                interpreter: Interpreter::default(),
                out,
                err,
            }
        }

        fn run(&self, text: &str) -> Result<u8> {
            let mut parser = ProgramParser::new(starsh_parser::Parser::for_text("test", text));
            Ok(self.interpreter.run_parser(&self.context, &mut parser)?)
        }
    }

    #[test]
    fn and_or_short_circuits() -> Result<()> {
        let fixture = Fixture::new();
        fixture.run("false && echo skipped || echo recovered")?;
        fixture.run("true || echo skipped && echo chained")?;
        assert_eq!(fixture.out.to_string_lossy(), "recovered\nchained\n");
        Ok(())
    }

    #[test]
    fn pipeline_status_is_last_stage() -> Result<()> {
        let fixture = Fixture::new();
        assert_eq!(fixture.run("status 3 | status 0")?, 0);
        assert_eq!(fixture.run("status 0 | status 5")?, 5);
        assert_eq!(fixture.run("echo hi | cat | cat")?, 0);
        assert_eq!(fixture.out.to_string_lossy(), "hi\n");
        Ok(())
    }

    #[test]
    fn groups_share_environment_and_subshells_do_not() -> Result<()> {
        let fixture = Fixture::new();
        fixture.run("{ A=group; }\n( B=subshell )")?;

        let env = fixture.context.environment();
        assert_eq!(env.get_str("A"), Some("group"));
        assert_eq!(env.get_str("B"), None);
        Ok(())
    }

    #[test]
    fn assignments_and_appends() -> Result<()> {
        let fixture = Fixture::new();
        fixture.run("GREETING=hello\nGREETING+=' world'")?;
        assert_eq!(fixture.context.environment().get_str("GREETING"), Some("hello world"));
        assert!(!fixture.context.environment().is_exported("GREETING"));
        Ok(())
    }

    #[test]
    fn unknown_command_reports_127() -> Result<()> {
        let fixture = Fixture::new();
        assert_eq!(fixture.run("no-such-command-starsh arg")?, 127);
        assert!(fixture
            .err
            .to_string_lossy()
            .contains("command not found: no-such-command-starsh"));
        Ok(())
    }

    #[test]
    fn syntax_error_stops_with_status_2() -> Result<()> {
        let fixture = Fixture::new();
        assert_eq!(fixture.run("echo before\necho 'unterminated\necho after")?, 2);
        assert_eq!(fixture.out.to_string_lossy(), "before\n");
        assert!(fixture.err.to_string_lossy().contains("unterminated single quote"));
        Ok(())
    }

    #[test]
    fn here_document_feeds_stage() -> Result<()> {
        let fixture = Fixture::new();
        fixture.run("cat <<EOF | cat\nline1\nline2\nEOF\necho done")?;
        assert_eq!(fixture.out.to_string_lossy(), "line1\nline2\ndone\n");
        Ok(())
    }

    #[test]
    fn group_output_redirect_and_pipe() -> Result<()> {
        let fixture = Fixture::new();
        fixture.run("{ echo a; echo b; } | cat")?;
        fixture.run("{ echo hidden; } >&-")?;
        fixture.run("( echo c ) 2>&1 | cat")?;
        assert_eq!(fixture.out.to_string_lossy(), "a\nb\nc\n");
        Ok(())
    }

    #[test]
    fn background_jobs_are_collected() -> Result<()> {
        let fixture = Fixture::new();
        assert_eq!(fixture.run("status 4 &")?, 0);
        assert_eq!(fixture.interpreter.background_count(), 1);
        assert_eq!(fixture.interpreter.wait_background()?, vec![4]);
        assert_eq!(fixture.interpreter.background_count(), 0);
        Ok(())
    }

    #[test]
    fn wordless_stage_applies_redirects() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let target = dir.path().join("touched");
        let fixture = Fixture::new();
        let status = fixture.run(&format!("A=1 >'{}' | echo next", target.display()))?;
        assert_eq!(status, 0);
        assert!(target.exists());
        assert_eq!(fixture.out.to_string_lossy(), "next\n");
        assert_eq!(fixture.context.environment().get_str("A"), None);
        assert_eq!(fixture.interpreter.background_count(), 0);
        Ok(())
    }

    #[test]
    fn readonly_assignment_fails_the_command() -> Result<()> {
        let fixture = Fixture::new();
        fixture.context.environment_mut().set_readonly("LOCKED");
        assert_eq!(fixture.run("LOCKED=1")?, 1);
        assert!(fixture.err.to_string_lossy().contains("LOCKED: readonly variable"));
        Ok(())
    }

    #[test]
    fn command_locals_append_in_order() -> Result<()> {
        let fixture = Fixture::new();
        fixture.context.environment_mut().set("P", "a", false)?;
        let commands = starsh_parser::parse_commands("test", "P+=b P+=c Q=1 cmd")?;
        let locals = command_locals(&fixture.context, &commands[0].assignments);
        assert_eq!(
            locals,
            vec![
                ("P".to_owned(), "ab".to_owned()),
                ("P".to_owned(), "abc".to_owned()),
                ("Q".to_owned(), "1".to_owned()),
            ]
        );
        Ok(())
    }
}
