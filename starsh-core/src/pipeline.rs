//! Builds pipelines of executives connected stage-to-stage by pumps.

use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use starsh_parser::ast::Redirect;

use crate::context::ExecutionContext;
use crate::error;
use crate::executive::{Executive, Invocation, Target};
use crate::pump::{spawn_pump, Pump};
use crate::redirects::apply_redirects;
use crate::streams::{self, Stream, StreamTable};
use crate::trace_categories;

/// One resolved stage, ready to launch.
#[derive(Debug)]
pub struct StagePlan {
    /// What to run.
    pub target: Target,
    /// Arguments, starting with the command name.
    pub argv: Vec<String>,
    /// Command-scoped assignments.
    pub locals: Vec<(String, String)>,
    /// Redirections for this stage, applied on top of the pipe endpoints.
    pub redirects: Vec<Redirect>,
}

impl StagePlan {
    /// Returns a plan running `argv` with no assignments or redirections.
    pub fn new(target: Target, argv: Vec<String>) -> Self {
        Self {
            target,
            argv,
            locals: vec![],
            redirects: vec![],
        }
    }
}

struct Link {
    upstream: Stream,
    downstream: Stream,
}

/// Starts the given stages as a pipeline in `context`.
///
/// The first stage reads the scope's channel 0 and the last writes the scope's
/// channel 1; every stage shares the scope's channel 2. Each adjacent pair is
/// joined by its own pump. A stage's redirections take precedence over its pipe
/// endpoints.
///
/// All stream tables are prepared before anything starts, so a redirection failure
/// starts nothing. Function stages are held until every stage has launched. If a
/// stage fails to start, held functions never run their bodies, and the stages
/// already started are destroyed and awaited before the error is returned.
///
/// # Arguments
///
/// * `context` - The scope the pipeline runs in.
/// * `stages` - The stages, in data-flow order.
pub fn start_pipeline(
    context: &Arc<ExecutionContext>,
    stages: Vec<StagePlan>,
) -> Result<RunningPipeline, error::Error> {
    let count = stages.len();
    let names: Vec<String> = stages
        .iter()
        .map(|s| s.argv.first().cloned().unwrap_or_default())
        .collect();
    tracing::debug!(target: trace_categories::PIPELINE, "starting pipeline {names:?}");

    let mut tables = Vec::with_capacity(count);
    for _ in 0..count {
        tables.push(context.streams().try_clone()?);
    }

    let mut links = Vec::with_capacity(count.saturating_sub(1));
    for i in 1..count {
        let (upstream, stage_out) = streams::pipe()?;
        let (stage_in, downstream) = streams::pipe()?;
        tables[i - 1].set(StreamTable::STDOUT, stage_out);
        tables[i].set(StreamTable::STDIN, stage_in);
        links.push(Link {
            upstream,
            downstream,
        });
    }

    let mut prepared = Vec::with_capacity(count);
    let mut releases = Vec::with_capacity(count);
    {
        let env = context.environment();
        let no_clobber = context.config().no_clobber;
        for (stage, table) in stages.into_iter().zip(tables) {
            let table = apply_redirects(&table, &stage.redirects, &env, no_clobber)?;
            let mut invocation = Invocation::new(stage.argv)
                .locals(stage.locals)
                .streams(table);
            if matches!(stage.target, Target::Function(_)) {
                let (release, gate) = mpsc::channel();
                releases.push(release);
                invocation = invocation.start_gate(gate);
            }
            prepared.push((stage.target, invocation));
        }
    }

    let mut running: Vec<Executive> = Vec::with_capacity(count);
    for (target, invocation) in prepared {
        match Executive::launch(context, &target, invocation) {
            Ok(executive) => running.push(executive),
            Err(err) => {
                tracing::debug!(target: trace_categories::PIPELINE, "stage failed to start: {err}");
                drop(releases);
                drop(links);
                for mut started in running {
                    let _ = started.destroy();
                    let _ = started.wait();
                }
                return Err(err);
            }
        }
    }

    for release in releases {
        // A closed receiver means the worker already ended.
        let _ = release.send(());
    }

    let mut pumps = Vec::with_capacity(links.len());
    for (i, link) in links.into_iter().enumerate() {
        pumps.push(spawn_pump(
            format!("{}|{}", names[i], names[i + 1]),
            StreamTable::STDOUT,
            link.upstream,
            link.downstream,
        )?);
    }

    Ok(RunningPipeline {
        stages: running,
        pumps,
    })
}

/// A started pipeline.
#[derive(Debug)]
pub struct RunningPipeline {
    stages: Vec<Executive>,
    pumps: Vec<Pump>,
}

impl RunningPipeline {
    /// Returns the stages, in data-flow order.
    pub fn stages(&self) -> &[Executive] {
        &self.stages
    }

    /// Returns the stages for mutation, in data-flow order.
    pub fn stages_mut(&mut self) -> &mut [Executive] {
        &mut self.stages
    }

    fn join_pumps(&mut self) {
        for pump in self.pumps.drain(..) {
            let name = pump.name().to_owned();
            if let Err(err) = pump.join() {
                tracing::debug!(target: trace_categories::PIPELINE, "{name}: {err}");
            }
        }
    }

    /// Waits for every stage and returns all exit statuses. Every stage is awaited
    /// even when one fails; the first failure is returned.
    pub fn wait_all(&mut self) -> Result<Vec<u8>, error::Error> {
        let mut statuses = Vec::with_capacity(self.stages.len());
        let mut first_error = None;

        for stage in &mut self.stages {
            match stage.exit_code() {
                Ok(status) => statuses.push(status),
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }

        self.join_pumps();

        match first_error {
            Some(err) => Err(err),
            None => Ok(statuses),
        }
    }

    /// Waits for every stage and returns the last stage's exit status.
    pub fn wait(&mut self) -> Result<u8, error::Error> {
        let statuses = self.wait_all()?;
        let status = statuses.last().copied().unwrap_or(0);
        tracing::debug!(target: trace_categories::PIPELINE, "pipeline statuses: {statuses:?}");
        Ok(status)
    }

    /// Waits up to `timeout` for every stage. Returns the last stage's status if
    /// all finished.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Result<Option<u8>, error::Error> {
        let deadline = Instant::now() + timeout;
        for stage in &mut self.stages {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !stage.wait_timeout(remaining)? {
                return Ok(None);
            }
        }

        self.wait().map(Some)
    }

    /// Returns the last stage's status if every stage has finished.
    pub fn try_wait(&mut self) -> Result<Option<u8>, error::Error> {
        for stage in &mut self.stages {
            if stage.try_exit_code()?.is_none() {
                return Ok(None);
            }
        }

        self.wait().map(Some)
    }

    /// Destroys every stage. Does not wait.
    pub fn destroy(&mut self) -> Result<(), error::Error> {
        for stage in &mut self.stages {
            stage.destroy()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ShellConfig;
    use crate::env::Environment;
    use crate::functions::{simple_function, FunctionTable};
    use crate::streams::OutputBuffer;
    use anyhow::Result;
    use pretty_assertions::assert_eq;
    use std::io::{BufRead, BufReader, Read, Write};

    fn scope(out: &OutputBuffer) -> Arc<ExecutionContext> {
        let mut env = Environment::default();
        if let Ok(path) = std::env::var("PATH") {
            let _ = env.set("PATH", path, true);
        }
        let context = ExecutionContext::top_level(
            Arc::new(ShellConfig::hermetic(".")),
            env,
            FunctionTable::default(),
        );
        {
            let mut streams = context.streams();
            streams.set(StreamTable::STDIN, Stream::document(""));
            streams.set(StreamTable::STDOUT, out.clone().into());
            streams.set(StreamTable::STDERR, out.clone().into());
        }
        context
    }

    fn plan(factory: Arc<dyn crate::functions::FunctionFactory>) -> StagePlan {
        let name = factory.name().to_owned();
        StagePlan::new(Target::Function(factory), vec![name])
    }

    fn emit(name: &str, text: &'static str, status: u8) -> StagePlan {
        plan(simple_function(name, move |call| {
            write!(call.stdout()?, "{text}")?;
            Ok(status)
        }))
    }

    fn number_lines() -> StagePlan {
        plan(simple_function("number", |call| {
            let mut out = call.stdout()?;
            for (i, line) in BufReader::new(call.stdin()?).lines().enumerate() {
                writeln!(out, "{}:{}", i + 1, line?)?;
            }
            Ok(0)
        }))
    }

    fn count_bytes(status: u8) -> StagePlan {
        plan(simple_function("count", move |call| {
            let mut data = vec![];
            call.stdin()?.read_to_end(&mut data)?;
            write!(call.stdout()?, "{}", data.len())?;
            Ok(status)
        }))
    }

    #[test]
    fn data_flows_through_stages() -> Result<()> {
        let out = OutputBuffer::new();
        let context = scope(&out);

        let mut pipeline = start_pipeline(
            &context,
            vec![emit("emit", "a\nb\n", 1), number_lines(), count_bytes(0)],
        )?;
        assert_eq!(pipeline.stages().len(), 3);
        assert_eq!(pipeline.wait()?, 0);
        assert_eq!(out.to_string_lossy(), "8");
        Ok(())
    }

    #[test]
    fn last_stage_status_wins() -> Result<()> {
        let out = OutputBuffer::new();
        let context = scope(&out);

        let mut pipeline = start_pipeline(&context, vec![emit("ok", "x", 0), count_bytes(4)])?;
        assert_eq!(pipeline.wait()?, 4);

        let mut pipeline = start_pipeline(&context, vec![emit("fail", "", 9), count_bytes(0)])?;
        assert_eq!(pipeline.wait_all()?, vec![9, 0]);
        Ok(())
    }

    #[test]
    fn redirect_overrides_pipe() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let out = OutputBuffer::new();
        let context = scope(&out);
        context.environment_mut().set_working_dir(dir.path())?;

        let mut first = emit("emit", "to file", 0);
        first.redirects = starsh_parser::parse_commands("test", "emit > captured")?
            .remove(0)
            .redirects;

        let mut pipeline = start_pipeline(&context, vec![first, count_bytes(0)])?;
        assert_eq!(pipeline.wait_timeout(Duration::from_secs(10))?, Some(0));
        assert_eq!(out.to_string_lossy(), "0");
        assert_eq!(std::fs::read_to_string(dir.path().join("captured"))?, "to file");
        Ok(())
    }

    #[test]
    fn failed_redirect_starts_nothing() -> Result<()> {
        let out = OutputBuffer::new();
        let context = scope(&out);

        let mut second = count_bytes(0);
        second.redirects = starsh_parser::parse_commands("test", "count < /nonexistent/input")?
            .remove(0)
            .redirects;

        let result = start_pipeline(&context, vec![emit("emit", "x", 0), second]);
        assert!(matches!(result, Err(error::Error::Redirection(..))));
        assert!(out.contents().is_empty());
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn failing_head_does_not_hang() -> Result<()> {
        let out = OutputBuffer::new();
        let context = scope(&out);
        let resolve = |argv: &[&str]| -> Result<StagePlan> {
            let argv: Vec<String> = argv.iter().map(|s| (*s).to_owned()).collect();
            Ok(StagePlan::new(Target::resolve(&context, &argv[0])?, argv))
        };

        let mut pipeline = start_pipeline(
            &context,
            vec![resolve(&["false"])?, resolve(&["cat"])?, resolve(&["true"])?],
        )?;
        assert_eq!(pipeline.wait_timeout(Duration::from_secs(10))?, Some(0));

        let mut pipeline = start_pipeline(
            &context,
            vec![resolve(&["yes"])?, resolve(&["head", "-n", "2"])?],
        )?;
        assert_eq!(pipeline.wait_timeout(Duration::from_secs(10))?, Some(0));
        assert_eq!(out.to_string_lossy(), "y\ny\n");
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn spawn_failure_cleans_up() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let not_executable = dir.path().join("plain");
        std::fs::write(&not_executable, "")?;

        let out = OutputBuffer::new();
        let context = scope(&out);
        let sleeper = StagePlan::new(
            Target::resolve(&context, "sleep")?,
            vec!["sleep".into(), "30".into()],
        );
        let broken = StagePlan::new(Target::Process(not_executable), vec!["plain".into()]);

        let started = Instant::now();
        let result = start_pipeline(&context, vec![sleeper, broken]);
        assert!(matches!(result, Err(error::Error::SpawnFailure { .. })));
        assert!(started.elapsed() < Duration::from_secs(20));
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn spawn_failure_cancels_waiting_functions() -> Result<()> {
        use std::sync::atomic::{AtomicBool, Ordering};

        let dir = tempfile::tempdir()?;
        let not_executable = dir.path().join("plain");
        std::fs::write(&not_executable, "")?;

        let out = OutputBuffer::new();
        let context = scope(&out);
        let (input, writer) = streams::pipe()?;
        context.streams().set(StreamTable::STDIN, input);

        let ran = Arc::new(AtomicBool::new(false));
        let body_ran = Arc::clone(&ran);
        let reader = plan(simple_function("reader", move |call| {
            body_ran.store(true, Ordering::SeqCst);
            let mut data = vec![];
            call.stdin()?.read_to_end(&mut data)?;
            Ok(0)
        }));
        let broken = StagePlan::new(Target::Process(not_executable), vec!["plain".into()]);

        let started = Instant::now();
        let result = start_pipeline(&context, vec![reader, broken]);
        assert!(matches!(result, Err(error::Error::SpawnFailure { .. })));
        assert!(started.elapsed() < Duration::from_secs(20));
        assert!(!ran.load(Ordering::SeqCst));

        drop(writer);
        Ok(())
    }
}
