use std::sync::Arc;

use crate::SourcePosition;

/// Kind of syntax error encountered while parsing.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SyntaxErrorKind {
    /// A single-quoted run was not closed before the end of input.
    #[error("unterminated single quote")]
    UnterminatedSingleQuote,

    /// A double-quoted run was not closed before the end of input.
    #[error("unterminated double quote")]
    UnterminatedDoubleQuote,

    /// A backslash appeared at the very end of the input.
    #[error("unterminated escape sequence")]
    UnterminatedEscape,

    /// The input ended before the here-document's tag line was found.
    #[error("unterminated here document; expected tag '{0}'")]
    UnterminatedHereDocument(String),

    /// A here-document operator was not followed by a tag.
    #[error("missing here document tag")]
    MissingHereTag,

    /// A redirection operator was not followed by a target.
    #[error("missing target for redirection '{0}'")]
    MissingRedirectTarget(String),

    /// A redirection operator or its duplicate target could not be recognized.
    #[error("unrecognized redirection '{0}'")]
    UnrecognizedRedirection(String),

    /// A connective was not followed by a command.
    #[error("expected command after '{0}'")]
    MissingCommand(String),

    /// A token appeared where it is not allowed.
    #[error("unexpected '{0}'")]
    UnexpectedToken(String),

    /// A group or subshell was still open at the end of input.
    #[error("unterminated group; expected '{0}'")]
    UnterminatedGroup(String),
}

/// A syntax error, with the origin and location of the character that triggered it.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{origin}: line {}, column {}: {kind}", .position.line, .position.column)]
pub struct SyntaxError {
    /// Name of the input the error was found in (a file path, or a label such as `-c`).
    pub origin: Arc<str>,
    /// Position of the triggering character.
    pub position: SourcePosition,
    /// The partial token already scanned when the error was raised.
    pub token: String,
    /// What went wrong.
    pub kind: SyntaxErrorKind,
}

impl SyntaxError {
    /// Returns true if the error could be resolved by appending more input.
    pub const fn is_incomplete(&self) -> bool {
        matches!(
            self.kind,
            SyntaxErrorKind::UnterminatedSingleQuote
                | SyntaxErrorKind::UnterminatedDoubleQuote
                | SyntaxErrorKind::UnterminatedEscape
                | SyntaxErrorKind::UnterminatedHereDocument(..)
                | SyntaxErrorKind::UnterminatedGroup(..)
                | SyntaxErrorKind::MissingCommand(..)
        )
    }
}

/// Represents an error that occurred while reading flag/value arguments.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ArgumentError {
    /// A switch that requires a value had none, inline or following.
    #[error("option '{0}' requires a value")]
    MissingValue(String),
}
