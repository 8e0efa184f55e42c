//! A uniform handle over one running unit of work: a spawned OS process or an
//! in-process function on its worker thread.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Stdio};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::context::{ContextKind, ExecutionContext};
use crate::error;
use crate::functions::{Function, FunctionCall, FunctionFactory, FunctionMonitor};
use crate::pathsearch;
use crate::pump::{spawn_pump, Pump};
use crate::streams::{self, Stream, StreamTable};
use crate::sys;
use crate::trace_categories;

/// How one of a unit's standard channels is provided when it is launched.
#[derive(Debug)]
pub enum StreamSpec {
    /// Use the given endpoint.
    Stream(Stream),
    /// Connect a new pipe; the caller's end is available from the [`Executive`].
    Piped,
    /// Leave the channel unbound.
    Closed,
}

/// What a command name resolved to.
#[derive(Clone)]
pub enum Target {
    /// A registered in-process function.
    Function(Arc<dyn FunctionFactory>),
    /// An external program.
    Process(PathBuf),
}

impl std::fmt::Debug for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Function(factory) => write!(f, "Function({})", factory.name()),
            Self::Process(path) => write!(f, "Process({})", path.display()),
        }
    }
}

impl Target {
    /// Resolves a command name against the scope's function table, then against
    /// `PATH`.
    ///
    /// # Arguments
    ///
    /// * `context` - The scope the command runs in.
    /// * `name` - The command name.
    pub fn resolve(context: &ExecutionContext, name: &str) -> Result<Self, error::Error> {
        if let Some(factory) = context.functions().lookup(name) {
            return Ok(Self::Function(factory));
        }

        let env = context.environment();
        pathsearch::find_executable(name, env.get_str("PATH"), env.working_dir())
            .map(Self::Process)
            .ok_or_else(|| error::Error::UnknownCommand(name.to_owned()))
    }
}

/// Everything needed to launch one unit besides its target.
#[derive(Debug, Default)]
pub struct Invocation {
    /// Arguments, starting with the command name.
    pub argv: Vec<String>,
    /// Command-scoped assignments.
    pub locals: Vec<(String, String)>,
    /// Channel bindings. Channels 0 to 2 are used unless overridden below.
    pub streams: StreamTable,
    /// Overrides channel 0.
    pub stdin: Option<StreamSpec>,
    /// Overrides channel 1.
    pub stdout: Option<StreamSpec>,
    /// Overrides channel 2.
    pub stderr: Option<StreamSpec>,
    /// Holds a function's body until a value arrives; a closed channel cancels it.
    pub(crate) start_gate: Option<mpsc::Receiver<()>>,
}

impl Invocation {
    /// Returns an invocation of the given arguments with no streams bound.
    pub fn new(argv: Vec<String>) -> Self {
        Self {
            argv,
            ..Self::default()
        }
    }

    /// Sets the command-scoped assignments.
    #[must_use]
    pub fn locals(mut self, locals: Vec<(String, String)>) -> Self {
        self.locals = locals;
        self
    }

    /// Sets the channel bindings.
    #[must_use]
    pub fn streams(mut self, streams: StreamTable) -> Self {
        self.streams = streams;
        self
    }

    /// Overrides channel 0.
    #[must_use]
    pub fn stdin(mut self, spec: StreamSpec) -> Self {
        self.stdin = Some(spec);
        self
    }

    /// Overrides channel 1.
    #[must_use]
    pub fn stdout(mut self, spec: StreamSpec) -> Self {
        self.stdout = Some(spec);
        self
    }

    /// Overrides channel 2.
    #[must_use]
    pub fn stderr(mut self, spec: StreamSpec) -> Self {
        self.stderr = Some(spec);
        self
    }

    /// Holds a function body until `gate` receives; processes ignore it.
    #[must_use]
    pub(crate) fn start_gate(mut self, gate: mpsc::Receiver<()>) -> Self {
        self.start_gate = Some(gate);
        self
    }

    fn name(&self) -> String {
        self.argv.first().cloned().unwrap_or_default()
    }

    fn take_spec(&mut self, channel: u32) -> StreamSpec {
        let explicit = match channel {
            StreamTable::STDIN => self.stdin.take(),
            StreamTable::STDOUT => self.stdout.take(),
            _ => self.stderr.take(),
        };

        explicit.unwrap_or_else(|| {
            self.streams
                .remove(channel)
                .map_or(StreamSpec::Closed, StreamSpec::Stream)
        })
    }
}

/// Returns the unit's end and the caller's end for one standard channel.
fn open_spec(
    spec: StreamSpec,
    channel: u32,
) -> Result<(Option<Stream>, Option<Stream>), error::Error> {
    match spec {
        StreamSpec::Stream(stream) => Ok((Some(stream), None)),
        StreamSpec::Closed => Ok((None, None)),
        StreamSpec::Piped => {
            let (reader, writer) = streams::pipe()?;
            if channel == StreamTable::STDIN {
                Ok((Some(reader), Some(writer)))
            } else {
                Ok((Some(writer), Some(reader)))
            }
        }
    }
}

#[derive(Debug)]
struct ProcessUnit {
    child: Child,
    status: Option<u8>,
}

impl ProcessUnit {
    fn wait(&mut self) -> Result<u8, error::Error> {
        if let Some(status) = self.status {
            return Ok(status);
        }

        let status = sys::platform::exit_status_code(self.child.wait()?);
        self.status = Some(status);
        Ok(status)
    }

    fn try_wait(&mut self) -> Result<Option<u8>, error::Error> {
        if self.status.is_none() {
            self.status = self
                .child
                .try_wait()?
                .map(sys::platform::exit_status_code);
        }
        Ok(self.status)
    }
}

#[derive(Debug)]
struct FunctionUnit {
    monitor: FunctionMonitor,
    worker: Option<JoinHandle<()>>,
}

impl FunctionUnit {
    fn join_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::debug!(target: trace_categories::FUNCTIONS, "function worker panicked");
            }
        }
    }

    fn wait(&mut self) -> Result<u8, error::Error> {
        let status = self.monitor.exit_code()?;
        self.join_worker();
        Ok(status)
    }

    fn try_wait(&mut self) -> Result<Option<u8>, error::Error> {
        let status = self.monitor.try_exit_code()?;
        if status.is_some() {
            self.join_worker();
        }
        Ok(status)
    }
}

#[derive(Debug)]
enum Unit {
    Process(ProcessUnit),
    Function(FunctionUnit),
}

/// A running process or function, with the same stream, status and lifecycle
/// contract for both. Modeled after [`std::process::Child`].
#[derive(Debug)]
pub struct Executive {
    name: String,
    stdin: Option<Stream>,
    stdout: Option<Stream>,
    stderr: Option<Stream>,
    unit: Unit,
    pumps: Vec<Pump>,
}

impl Executive {
    /// Starts a unit of work.
    ///
    /// # Arguments
    ///
    /// * `context` - The scope launching the unit.
    /// * `target` - What to run.
    /// * `invocation` - Arguments, assignments and streams.
    pub fn launch(
        context: &Arc<ExecutionContext>,
        target: &Target,
        invocation: Invocation,
    ) -> Result<Self, error::Error> {
        tracing::debug!(
            target: trace_categories::COMMANDS,
            "launching {:?} as {target:?}",
            invocation.argv
        );

        match target {
            Target::Function(factory) => Self::launch_function(context, factory, invocation),
            Target::Process(path) => Self::launch_process(context, path, invocation),
        }
    }

    fn launch_process(
        context: &ExecutionContext,
        path: &Path,
        mut invocation: Invocation,
    ) -> Result<Self, error::Error> {
        let name = invocation.name();
        let mut cmd = std::process::Command::new(path);
        cmd.args(invocation.argv.iter().skip(1));

        {
            let env = context.environment();
            cmd.env_clear()
                .envs(env.exported_with(&invocation.locals))
                .current_dir(env.working_dir());
        }

        let mut pumps = vec![];
        let mut caller_ends: [Option<Stream>; 3] = [None, None, None];

        for channel in [StreamTable::STDIN, StreamTable::STDOUT, StreamTable::STDERR] {
            let (unit_end, caller_end) = open_spec(invocation.take_spec(channel), channel)?;

            let stdio = match unit_end.map(Stream::into_stdio) {
                None => Stdio::null(),
                Some(Ok(stdio)) => stdio,
                // In-memory endpoints are bridged through a pipe served by a pump.
                Some(Err(memory)) => {
                    let (reader, writer) = os_pipe::pipe()?;
                    if channel == StreamTable::STDIN {
                        pumps.push(spawn_pump(format!("{name}:feed"), channel, memory, writer)?);
                        Stdio::from(reader)
                    } else {
                        pumps.push(spawn_pump(
                            format!("{name}:drain{channel}"),
                            channel,
                            reader,
                            memory,
                        )?);
                        Stdio::from(writer)
                    }
                }
            };

            match channel {
                StreamTable::STDIN => cmd.stdin(stdio),
                StreamTable::STDOUT => cmd.stdout(stdio),
                _ => cmd.stderr(stdio),
            };

            caller_ends[channel as usize] = caller_end;
        }

        let extra = std::mem::take(&mut invocation.streams);
        sys::platform::inject_streams(&mut cmd, extra.into_iter().filter(|(c, _)| *c > 2))?;

        let child = cmd.spawn().map_err(|source| error::Error::SpawnFailure {
            command: name.clone(),
            source,
        })?;

        // Release our copies of the child's endpoints so readers see end-of-stream.
        drop(cmd);

        tracing::debug!(
            target: trace_categories::COMMANDS,
            "{name}: started process {}",
            child.id()
        );

        let [stdin, stdout, stderr] = caller_ends;
        Ok(Self {
            name,
            stdin,
            stdout,
            stderr,
            unit: Unit::Process(ProcessUnit {
                child,
                status: None,
            }),
            pumps,
        })
    }

    fn launch_function(
        parent: &Arc<ExecutionContext>,
        factory: &Arc<dyn FunctionFactory>,
        mut invocation: Invocation,
    ) -> Result<Self, error::Error> {
        let name = invocation.name();

        let mut context = ExecutionContext::new(ContextKind::Command, parent.config_handle());
        context.import(parent)?;

        {
            let mut env = context.environment_mut();
            for (local, value) in &invocation.locals {
                env.set(local, value.as_str(), true)?;
            }
        }

        let mut caller_ends: [Option<Stream>; 3] = [None, None, None];
        for channel in [StreamTable::STDIN, StreamTable::STDOUT, StreamTable::STDERR] {
            let (unit_end, caller_end) = open_spec(invocation.take_spec(channel), channel)?;
            match unit_end {
                Some(stream) => invocation.streams.set(channel, stream),
                None => invocation.streams.remove(channel),
            };
            caller_ends[channel as usize] = caller_end;
        }

        *context.streams() = std::mem::take(&mut invocation.streams);

        let function = factory.create(parent, &invocation.locals)?;
        let monitor = FunctionMonitor::default();
        let call = FunctionCall::new(invocation.argv, Arc::new(context), monitor.clone());

        let worker_monitor = monitor.clone();
        let gate = invocation.start_gate.take();
        let worker = std::thread::Builder::new()
            .name(format!("fn:{name}"))
            .spawn(move || run_function(function, call, worker_monitor, gate))
            .map_err(|source| error::Error::SpawnFailure {
                command: name.clone(),
                source,
            })?;

        let [stdin, stdout, stderr] = caller_ends;
        Ok(Self {
            name,
            stdin,
            stdout,
            stderr,
            unit: Unit::Function(FunctionUnit {
                monitor,
                worker: Some(worker),
            }),
            pumps: vec![],
        })
    }

    /// Returns the command name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the OS process id, for processes.
    pub fn pid(&self) -> Option<u32> {
        match &self.unit {
            Unit::Process(process) => Some(process.child.id()),
            Unit::Function(_) => None,
        }
    }

    /// Returns the caller-side handle of a function.
    pub const fn function_monitor(&self) -> Option<&FunctionMonitor> {
        match &self.unit {
            Unit::Function(function) => Some(&function.monitor),
            Unit::Process(_) => None,
        }
    }

    /// Takes the writable end of a piped standard input.
    pub const fn take_stdin(&mut self) -> Option<Stream> {
        self.stdin.take()
    }

    /// Takes the readable end of a piped standard output.
    pub const fn take_stdout(&mut self) -> Option<Stream> {
        self.stdout.take()
    }

    /// Takes the readable end of a piped standard error.
    pub const fn take_stderr(&mut self) -> Option<Stream> {
        self.stderr.take()
    }

    fn join_pumps(&mut self) {
        for pump in self.pumps.drain(..) {
            let name = pump.name().to_owned();
            if let Err(err) = pump.join() {
                tracing::debug!(target: trace_categories::STREAMS, "{name}: {err}");
            }
        }
    }

    /// Blocks until the unit terminates. A piped standard input still held by the
    /// executive is closed first.
    pub fn wait(&mut self) -> Result<(), error::Error> {
        self.exit_code().map(|_| ())
    }

    /// Blocks until the unit terminates and returns its exit status.
    pub fn exit_code(&mut self) -> Result<u8, error::Error> {
        drop(self.stdin.take());

        let status = match &mut self.unit {
            Unit::Process(process) => process.wait()?,
            Unit::Function(function) => function.wait()?,
        };

        self.join_pumps();
        Ok(status)
    }

    /// Returns the exit status if the unit has terminated, without blocking.
    pub fn try_exit_code(&mut self) -> Result<Option<u8>, error::Error> {
        let status = match &mut self.unit {
            Unit::Process(process) => process.try_wait()?,
            Unit::Function(function) => function.try_wait()?,
        };

        if status.is_some() {
            self.join_pumps();
        }
        Ok(status)
    }

    /// Blocks until the unit terminates or the timeout elapses. Returns whether it
    /// terminated.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Result<bool, error::Error> {
        if let Unit::Function(function) = &self.unit {
            if !function.monitor.wait_timeout(timeout)? {
                return Ok(false);
            }
            return self.try_exit_code().map(|status| status.is_some());
        }

        let deadline = Instant::now() + timeout;
        loop {
            if self.try_exit_code()?.is_some() {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    /// Returns whether the unit is still running.
    pub fn is_alive(&mut self) -> Result<bool, error::Error> {
        Ok(self.try_exit_code()?.is_none())
    }

    /// Closes the caller's stream endpoints and stops the unit: a process is killed,
    /// a function is interrupted. Does not wait.
    pub fn destroy(&mut self) -> Result<(), error::Error> {
        tracing::debug!(target: trace_categories::COMMANDS, "destroying {}", self.name);

        drop(self.stdin.take());
        drop(self.stdout.take());
        drop(self.stderr.take());

        match &mut self.unit {
            Unit::Process(process) => {
                if process.try_wait()?.is_none() {
                    match process.child.kill() {
                        Ok(()) => (),
                        Err(err) if err.kind() == std::io::ErrorKind::InvalidInput => (),
                        Err(err) => return Err(err.into()),
                    }
                }
            }
            Unit::Function(function) => function.monitor.interrupt(),
        }

        Ok(())
    }
}

/// Reports a function's status when dropped, so that a panicking body still
/// completes with status 1.
struct Completion {
    monitor: FunctionMonitor,
    status: u8,
}

impl Drop for Completion {
    fn drop(&mut self) {
        self.monitor.complete(self.status);
    }
}

fn run_function(
    function: Box<dyn Function>,
    call: FunctionCall,
    monitor: FunctionMonitor,
    gate: Option<mpsc::Receiver<()>>,
) {
    monitor.register_worker();

    // Declared first so it drops last, after the call has released its streams.
    let mut completion = Completion { monitor, status: 1 };
    let mut function = function;
    let mut call = call;

    if let Some(gate) = gate {
        if gate.recv().is_err() {
            tracing::debug!(
                target: trace_categories::FUNCTIONS,
                "{} cancelled before start",
                call.name()
            );
            return;
        }
    }

    match function.main(&mut call) {
        Ok(status) => completion.status = status,
        Err(err) => {
            if err.is_programmer_error() {
                tracing::error!(target: trace_categories::FUNCTIONS, "{}: {err}", call.name());
            }

            if let Ok(mut stderr) = call.stderr() {
                let _ = writeln!(stderr, "{}: {err}", call.name());
            }
            completion.status = err.exit_status();
        }
    }

    tracing::debug!(
        target: trace_categories::FUNCTIONS,
        "{} finished with status {}",
        call.name(),
        completion.status
    );
}
