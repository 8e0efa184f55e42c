//! In-process commands that run on worker threads behind the same contract as
//! external processes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock, PoisonError};
use std::thread::ThreadId;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use starsh_parser::ArgumentReader;

use crate::config::LINE_SEPARATOR;
use crate::context::ExecutionContext;
use crate::error;
use crate::streams::{Stream, StreamTable};

/// Creates runnable instances of a named in-process command.
pub trait FunctionFactory: Send + Sync {
    /// Returns the name the factory is registered under.
    fn name(&self) -> &str;

    /// Returns whether the factory handles the given command name. Defaults to
    /// comparing against [`Self::name`].
    fn matches(&self, name: &str) -> bool {
        name == self.name()
    }

    /// Instantiates the command.
    ///
    /// # Arguments
    ///
    /// * `context` - The scope the command is being launched from.
    /// * `locals` - Command-scoped assignments.
    fn create(
        &self,
        context: &Arc<ExecutionContext>,
        locals: &[(String, String)],
    ) -> Result<Box<dyn Function>, error::Error>;
}

/// The body of an in-process command.
pub trait Function: Send {
    /// Runs the command on its worker thread, returning its exit status.
    ///
    /// # Arguments
    ///
    /// * `call` - Arguments, streams and context for this invocation.
    fn main(&mut self, call: &mut FunctionCall) -> Result<u8, error::Error>;
}

/// What a running function sees: its arguments, its own `Command` scope and
/// duplicated handles to that scope's streams.
pub struct FunctionCall {
    args: Vec<String>,
    context: Arc<ExecutionContext>,
    monitor: FunctionMonitor,
}

impl FunctionCall {
    pub(crate) const fn new(
        args: Vec<String>,
        context: Arc<ExecutionContext>,
        monitor: FunctionMonitor,
    ) -> Self {
        Self {
            args,
            context,
            monitor,
        }
    }

    /// Returns the arguments, starting with the command name.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Returns the name the command was invoked as.
    pub fn name(&self) -> &str {
        self.args.first().map_or("", String::as_str)
    }

    /// Returns the command's own scope.
    pub const fn context(&self) -> &Arc<ExecutionContext> {
        &self.context
    }

    /// Returns a reader over the arguments following the name.
    pub fn switches(&self) -> ArgumentReader<'_> {
        ArgumentReader::new(self.args.get(1..).unwrap_or_default())
    }

    /// Duplicates the stream bound to the given channel.
    pub fn stream(&self, channel: u32) -> Result<Stream, error::Error> {
        self.context.streams().duplicate(channel)
    }

    /// Returns standard input; usable with `read!` et al.
    pub fn stdin(&self) -> Result<Stream, error::Error> {
        self.stream(StreamTable::STDIN)
    }

    /// Returns standard output; usable with `write!` et al.
    pub fn stdout(&self) -> Result<Stream, error::Error> {
        self.stream(StreamTable::STDOUT)
    }

    /// Returns standard error; usable with `write!` et al.
    pub fn stderr(&self) -> Result<Stream, error::Error> {
        self.stream(StreamTable::STDERR)
    }

    /// Returns the line separator for output: `LINE_SEPARATOR` from the command's
    /// own assignments or its caller's scope, else the configured separator.
    pub fn line_separator(&self) -> String {
        if let Some(sep) = self.context.environment().get_str(LINE_SEPARATOR) {
            return sep.to_owned();
        }

        match self.context.parent() {
            Some(parent) => parent.line_separator(),
            None => self.context.line_separator(),
        }
    }

    /// Returns whether the caller has asked the command to stop.
    pub fn is_interrupted(&self) -> bool {
        self.monitor.is_interrupted()
    }

    /// Returns the caller-side handle for this invocation. Its blocking operations
    /// fail when used from the command's own thread.
    pub const fn monitor(&self) -> &FunctionMonitor {
        &self.monitor
    }
}

#[derive(Debug, Default)]
struct FunctionStatus {
    status: Mutex<Option<u8>>,
    done: Condvar,
    worker: OnceLock<ThreadId>,
}

/// Caller-side view of a function's completion.
#[derive(Clone, Debug, Default)]
pub struct FunctionMonitor {
    status: Arc<FunctionStatus>,
    interrupted: Arc<AtomicBool>,
}

impl FunctionMonitor {
    pub(crate) fn register_worker(&self) {
        let _ = self.status.worker.set(std::thread::current().id());
    }

    fn check_caller(&self, operation: &'static str) -> Result<(), error::Error> {
        if self.status.worker.get() == Some(&std::thread::current().id()) {
            return Err(error::Error::AccessDiscipline(operation));
        }
        Ok(())
    }

    pub(crate) fn complete(&self, status: u8) {
        let mut slot = self
            .status
            .status
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(status);
        }
        self.status.done.notify_all();
    }

    /// Blocks until the function finishes and returns its exit status.
    pub fn exit_code(&self) -> Result<u8, error::Error> {
        self.check_caller("exit_code")?;

        let slot = self
            .status
            .status
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let slot = self
            .status
            .done
            .wait_while(slot, |status| status.is_none())
            .unwrap_or_else(PoisonError::into_inner);

        Ok(slot.unwrap_or(1))
    }

    /// Returns the exit status if the function has finished.
    pub fn try_exit_code(&self) -> Result<Option<u8>, error::Error> {
        self.check_caller("try_exit_code")?;
        Ok(*self
            .status
            .status
            .lock()
            .unwrap_or_else(PoisonError::into_inner))
    }

    /// Blocks until the function finishes or the timeout elapses. Returns whether
    /// it finished.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<bool, error::Error> {
        self.check_caller("wait_timeout")?;

        let deadline = Instant::now() + timeout;
        let mut slot = self
            .status
            .status
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while slot.is_none() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(false);
            }
            slot = self
                .status
                .done
                .wait_timeout(slot, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }

        Ok(true)
    }

    /// Asks the function to stop. The body observes this through
    /// [`FunctionCall::is_interrupted`].
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::Release);
    }

    /// Returns whether [`Self::interrupt`] has been called.
    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Acquire)
    }
}

/// A factory running a closure.
pub struct SimpleFunction<F> {
    name: String,
    body: Arc<F>,
}

struct SimpleFunctionInstance<F>(Arc<F>);

impl<F> FunctionFactory for SimpleFunction<F>
where
    F: Fn(&mut FunctionCall) -> Result<u8, error::Error> + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn create(
        &self,
        _context: &Arc<ExecutionContext>,
        _locals: &[(String, String)],
    ) -> Result<Box<dyn Function>, error::Error> {
        Ok(Box::new(SimpleFunctionInstance(self.body.clone())))
    }
}

impl<F> Function for SimpleFunctionInstance<F>
where
    F: Fn(&mut FunctionCall) -> Result<u8, error::Error> + Send + Sync + 'static,
{
    fn main(&mut self, call: &mut FunctionCall) -> Result<u8, error::Error> {
        (self.0)(call)
    }
}

/// Returns a factory for a function whose body is the given closure.
///
/// # Arguments
///
/// * `name` - The command name.
/// * `body` - The function body.
pub fn simple_function<F>(name: impl Into<String>, body: F) -> Arc<dyn FunctionFactory>
where
    F: Fn(&mut FunctionCall) -> Result<u8, error::Error> + Send + Sync + 'static,
{
    Arc::new(SimpleFunction {
        name: name.into(),
        body: Arc::new(body),
    })
}

/// Registered functions, looked up by exact name first and then by each factory's
/// [`FunctionFactory::matches`], most recent registration first.
#[derive(Clone, Default)]
pub struct FunctionTable {
    factories: IndexMap<String, Arc<dyn FunctionFactory>>,
}

impl std::fmt::Debug for FunctionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.factories.keys()).finish()
    }
}

impl FunctionTable {
    /// Registers a factory, replacing any registered under the same name.
    pub fn register(
        &mut self,
        factory: Arc<dyn FunctionFactory>,
    ) -> Option<Arc<dyn FunctionFactory>> {
        let name = factory.name().to_owned();
        let previous = self.factories.shift_remove(&name);
        self.factories.insert(name, factory);
        previous
    }

    /// Removes the factory registered under the given name.
    pub fn unregister(&mut self, name: &str) -> Option<Arc<dyn FunctionFactory>> {
        self.factories.shift_remove(name)
    }

    /// Finds the factory handling the given command name.
    pub fn lookup(&self, name: &str) -> Option<Arc<dyn FunctionFactory>> {
        if let Some(factory) = self.factories.get(name) {
            return Some(factory.clone());
        }

        self.factories
            .values()
            .rev()
            .find(|factory| factory.matches(name))
            .cloned()
    }

    /// Returns the registered names, in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use pretty_assertions::assert_eq;

    struct Suffix;

    impl FunctionFactory for Suffix {
        fn name(&self) -> &str {
            "*.task"
        }

        fn matches(&self, name: &str) -> bool {
            name.ends_with(".task")
        }

        fn create(
            &self,
            _context: &Arc<ExecutionContext>,
            _locals: &[(String, String)],
        ) -> Result<Box<dyn Function>, error::Error> {
            Ok(Box::new(SimpleFunctionInstance(Arc::new(
                |_: &mut FunctionCall| Ok(0),
            ))))
        }
    }

    #[test]
    fn lookup_prefers_exact_names() {
        let mut table = FunctionTable::default();
        table.register(Arc::new(Suffix));
        table.register(simple_function("build.task", |_| Ok(3)));

        assert_eq!(
            table.lookup("build.task").map(|f| f.name().to_owned()),
            Some("build.task".to_owned())
        );
        assert_eq!(
            table.lookup("deploy.task").map(|f| f.name().to_owned()),
            Some("*.task".to_owned())
        );
        assert!(table.lookup("deploy").is_none());
        assert_eq!(table.names().collect::<Vec<_>>(), vec!["*.task", "build.task"]);
    }

    #[test]
    fn register_replaces() {
        let mut table = FunctionTable::default();
        assert!(table.register(simple_function("x", |_| Ok(0))).is_none());
        assert!(table.register(simple_function("x", |_| Ok(1))).is_some());
        assert!(table.unregister("x").is_some());
        assert!(table.lookup("x").is_none());
    }

    #[test]
    fn monitor_waits_for_completion() -> Result<()> {
        let monitor = FunctionMonitor::default();
        assert_eq!(monitor.try_exit_code()?, None);
        assert!(!monitor.wait_timeout(Duration::from_millis(10))?);

        let worker = monitor.clone();
        let handle = std::thread::spawn(move || {
            worker.register_worker();
            let own = worker.exit_code();
            worker.complete(7);
            own
        });

        assert_eq!(monitor.exit_code()?, 7);
        assert!(matches!(
            handle.join(),
            Ok(Err(error::Error::AccessDiscipline("exit_code")))
        ));
        Ok(())
    }

    #[test]
    fn first_completion_wins() -> Result<()> {
        let monitor = FunctionMonitor::default();
        monitor.complete(4);
        monitor.complete(9);
        assert_eq!(monitor.exit_code()?, 4);
        assert!(monitor.wait_timeout(Duration::ZERO)?);
        Ok(())
    }
}
