use std::path::PathBuf;

/// Monolithic error type for the engine.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Text failed to parse.
    #[error(transparent)]
    Syntax(#[from] starsh_parser::SyntaxError),

    /// A command name resolved to neither a function nor an executable.
    #[error("command not found: {0}")]
    UnknownCommand(String),

    /// An attempt was made to modify a read-only variable.
    #[error("{0}: readonly variable")]
    ReadOnlyViolation(String),

    /// An operation was invoked from the wrong side of a function's thread boundary.
    #[error("{0} may not be called from the function's own thread")]
    AccessDiscipline(&'static str),

    /// An external process could not be created.
    #[error("{command}: {source}")]
    SpawnFailure {
        /// The command that failed to start.
        command: String,
        /// The underlying error.
        source: std::io::Error,
    },

    /// An I/O error occurred while copying a stream.
    #[error("stream failure on channel {channel}: {source}")]
    StreamFailure {
        /// The channel being copied.
        channel: u32,
        /// The underlying error.
        source: std::io::Error,
    },

    /// A channel that is not open was referenced.
    #[error("{0}: bad channel")]
    BadChannel(u32),

    /// A channel was used in a direction it does not support.
    #[error("{0} is not {1}")]
    WrongDirection(&'static str, &'static str),

    /// An error occurred while redirecting input or output with the given file.
    #[error("failed to redirect to {0}: {1}")]
    Redirection(String, std::io::Error),

    /// A context's parent was imported more than once.
    #[error("execution context has already imported its parent")]
    ContextAlreadyImported,

    /// A context was asked to make a lifecycle transition it is not ready for.
    #[error("execution context cannot move from {from} to {to}")]
    ContextState {
        /// The current state.
        from: &'static str,
        /// The requested state.
        to: &'static str,
    },

    /// The given path is not a directory.
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    /// Invalid arguments were given to a function.
    #[error(transparent)]
    Argument(#[from] starsh_parser::ArgumentError),

    /// An I/O error occurred.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns true for failures that indicate misuse of the engine's API rather than
    /// a problem with the commands being run.
    pub const fn is_programmer_error(&self) -> bool {
        matches!(
            self,
            Self::ReadOnlyViolation(..)
                | Self::AccessDiscipline(..)
                | Self::ContextAlreadyImported
                | Self::ContextState { .. }
        )
    }

    /// Returns the exit status a command reports when it fails with this error.
    pub const fn exit_status(&self) -> u8 {
        match self {
            Self::Syntax(..) => 2,
            Self::UnknownCommand(..) => 127,
            Self::SpawnFailure { .. } => 126,
            _ => 1,
        }
    }
}
