//! Execution contexts: the nested scopes commands run in.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::config::ShellConfig;
use crate::env::Environment;
use crate::error;
use crate::functions::FunctionTable;
use crate::streams::StreamTable;

/// The kinds of scope a context can represent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum_macros::Display)]
pub enum ContextKind {
    /// The top level, or a `( ... )` subshell. Owns a private copy of its parent's
    /// environment and its own positional parameters.
    Main,
    /// A `{ ... }` group. Shares its parent's environment.
    CommandGroup,
    /// A sourced script. Shares its parent's environment and owns its own
    /// positional parameters.
    Source,
    /// A single pipeline stage. Sees a copy of its parent's exported variables.
    Command,
}

/// Lifecycle of a context.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, strum_macros::Display, strum_macros::IntoStaticStr,
)]
pub enum ContextState {
    /// Constructed but not yet linked to a parent.
    Created,
    /// Parent imported; environment and streams resolved.
    Ready,
    /// Executing.
    Running,
    /// Finished; the exit status is final.
    Exited,
}

/// A scope owning (or aliasing) an environment, a stream table and, for `Main` and
/// `Source` scopes, a positional parameter stack.
#[derive(Debug)]
pub struct ExecutionContext {
    kind: ContextKind,
    parent: Option<Arc<ExecutionContext>>,
    environment: Arc<RwLock<Environment>>,
    functions: Arc<RwLock<FunctionTable>>,
    streams: Mutex<StreamTable>,
    parameters: Option<Mutex<Vec<String>>>,
    shell_level: u32,
    exit_status: AtomicU8,
    state: Mutex<ContextState>,
    config: Arc<ShellConfig>,
}

impl ExecutionContext {
    /// Returns a context in the `Created` state. It must import a parent with
    /// [`Self::import`] before use.
    ///
    /// # Arguments
    ///
    /// * `kind` - The kind of scope.
    /// * `config` - The shell configuration.
    pub fn new(kind: ContextKind, config: Arc<ShellConfig>) -> Self {
        let parameters = matches!(kind, ContextKind::Main | ContextKind::Source)
            .then(|| Mutex::new(vec![]));

        Self {
            kind,
            parent: None,
            environment: Arc::new(RwLock::new(Environment::default())),
            functions: Arc::new(RwLock::new(FunctionTable::default())),
            streams: Mutex::new(StreamTable::default()),
            parameters,
            shell_level: 0,
            exit_status: AtomicU8::new(0),
            state: Mutex::new(ContextState::Created),
            config,
        }
    }

    /// Returns a ready top-level context bound to the host's standard streams.
    ///
    /// # Arguments
    ///
    /// * `config` - The shell configuration.
    /// * `environment` - The initial environment.
    /// * `functions` - The function table shared by every scope.
    pub fn top_level(
        config: Arc<ShellConfig>,
        environment: Environment,
        functions: FunctionTable,
    ) -> Arc<Self> {
        let mut parameters = vec![config.shell_name.clone().unwrap_or_default()];
        parameters.extend(config.positional_parameters.iter().cloned());

        Arc::new(Self {
            kind: ContextKind::Main,
            parent: None,
            environment: Arc::new(RwLock::new(environment)),
            functions: Arc::new(RwLock::new(functions)),
            streams: Mutex::new(StreamTable::with_defaults(config.error_follows_output)),
            parameters: Some(Mutex::new(parameters)),
            shell_level: 1,
            exit_status: AtomicU8::new(0),
            state: Mutex::new(ContextState::Ready),
            config,
        })
    }

    /// Creates and readies a child context of `parent`.
    ///
    /// # Arguments
    ///
    /// * `parent` - The enclosing scope.
    /// * `kind` - The kind of scope to create.
    pub fn child(parent: &Arc<Self>, kind: ContextKind) -> Result<Arc<Self>, error::Error> {
        let mut context = Self::new(kind, parent.config.clone());
        context.import(parent)?;
        Ok(Arc::new(context))
    }

    /// Links this context to its parent and resolves its environment, functions
    /// and streams according to its kind. May only happen once.
    ///
    /// # Arguments
    ///
    /// * `parent` - The enclosing scope.
    pub fn import(&mut self, parent: &Arc<Self>) -> Result<(), error::Error> {
        if self.parent.is_some() || *self.lock_state() != ContextState::Created {
            return Err(error::Error::ContextAlreadyImported);
        }

        self.environment = match self.kind {
            ContextKind::CommandGroup | ContextKind::Source => parent.environment.clone(),
            ContextKind::Main => Arc::new(RwLock::new(parent.environment().fork(false))),
            ContextKind::Command => Arc::new(RwLock::new(parent.environment().fork(true))),
        };

        self.functions = match self.kind {
            ContextKind::Main => Arc::new(RwLock::new(parent.functions().clone())),
            _ => parent.functions.clone(),
        };

        *self.streams.get_mut().unwrap_or_else(PoisonError::into_inner) =
            parent.streams().try_clone()?;

        if let Some(parameters) = &mut self.parameters {
            *parameters.get_mut().unwrap_or_else(PoisonError::into_inner) =
                parent.positional_parameters();
        }

        self.shell_level = match self.kind {
            ContextKind::Main => parent.shell_level + 1,
            _ => parent.shell_level,
        };

        self.parent = Some(parent.clone());
        *self.lock_state() = ContextState::Ready;
        Ok(())
    }

    /// Returns the kind of scope.
    pub const fn kind(&self) -> ContextKind {
        self.kind
    }

    /// Returns the enclosing scope.
    pub const fn parent(&self) -> Option<&Arc<Self>> {
        self.parent.as_ref()
    }

    /// Returns the shell configuration.
    pub fn config(&self) -> &ShellConfig {
        &self.config
    }

    /// Returns the shared handle to the shell configuration.
    pub fn config_handle(&self) -> Arc<ShellConfig> {
        self.config.clone()
    }

    /// Returns the nesting depth of `Main` scopes, starting at 1.
    pub const fn shell_level(&self) -> u32 {
        self.shell_level
    }

    /// Locks the environment for reading.
    pub fn environment(&self) -> RwLockReadGuard<'_, Environment> {
        self.environment
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Locks the environment for writing.
    pub fn environment_mut(&self) -> RwLockWriteGuard<'_, Environment> {
        self.environment
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns whether this context and `other` share one environment object.
    pub fn shares_environment_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.environment, &other.environment)
    }

    /// Locks the function table for reading.
    pub fn functions(&self) -> RwLockReadGuard<'_, FunctionTable> {
        self.functions.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Locks the function table for writing.
    pub fn functions_mut(&self) -> RwLockWriteGuard<'_, FunctionTable> {
        self.functions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Locks the stream table.
    pub fn streams(&self) -> MutexGuard<'_, StreamTable> {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the exit status of the last command run in this scope.
    pub fn exit_status(&self) -> u8 {
        self.exit_status.load(Ordering::Acquire)
    }

    /// Records the exit status of the last command run in this scope.
    pub fn set_exit_status(&self, status: u8) {
        self.exit_status.store(status, Ordering::Release);
    }

    fn lock_state(&self) -> MutexGuard<'_, ContextState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the lifecycle state.
    pub fn state(&self) -> ContextState {
        *self.lock_state()
    }

    fn transition(&self, from: ContextState, to: ContextState) -> Result<(), error::Error> {
        let mut state = self.lock_state();
        if *state != from {
            return Err(error::Error::ContextState {
                from: (*state).into(),
                to: to.into(),
            });
        }
        *state = to;
        Ok(())
    }

    /// Moves a ready context to `Running`.
    pub fn begin(&self) -> Result<(), error::Error> {
        self.transition(ContextState::Ready, ContextState::Running)
    }

    /// Moves a running context to `Exited`, recording its final status.
    pub fn finish(&self, status: u8) -> Result<(), error::Error> {
        self.set_exit_status(status);
        self.transition(ContextState::Running, ContextState::Exited)
    }

    fn parameter_owner(&self) -> Option<&Mutex<Vec<String>>> {
        let mut current = Some(self);
        while let Some(context) = current {
            if let Some(parameters) = &context.parameters {
                return Some(parameters);
            }
            current = context.parent.as_deref();
        }
        None
    }

    /// Returns positional parameter `n`; `0` is the shell or script name.
    ///
    /// `Command` and `CommandGroup` scopes delegate to the nearest enclosing `Main`
    /// or `Source` scope.
    pub fn positional_parameter(&self, n: usize) -> Option<String> {
        self.parameter_owner()?
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(n)
            .cloned()
    }

    /// Returns all positional parameters, starting with the name.
    pub fn positional_parameters(&self) -> Vec<String> {
        self.parameter_owner()
            .map(|p| p.lock().unwrap_or_else(PoisonError::into_inner).clone())
            .unwrap_or_default()
    }

    /// Replaces the positional parameters of the nearest scope owning them.
    ///
    /// # Arguments
    ///
    /// * `parameters` - The new parameters, starting with the name.
    pub fn set_positional_parameters(&self, parameters: Vec<String>) {
        if let Some(owner) = self.parameter_owner() {
            *owner.lock().unwrap_or_else(PoisonError::into_inner) = parameters;
        }
    }

    /// Returns the effective line separator: the `LINE_SEPARATOR` variable when set,
    /// else the configured one.
    pub fn line_separator(&self) -> String {
        self.environment()
            .get_str(crate::config::LINE_SEPARATOR)
            .map_or_else(|| self.config.line_separator.clone(), str::to_owned)
    }
}
