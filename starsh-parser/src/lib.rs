//! Implements a scanner and parsers for the starsh command language.
//!
//! The [`Parser`] turns text into [`ast::Command`] records one at a time; the
//! [`ProgramParser`] assembles those records into statements, pipelines and nested
//! blocks.

pub mod arguments;
pub mod ast;
pub mod program;

mod error;
mod parser;
mod scanner;
mod source;

pub use arguments::{ArgumentReader, Switch};
pub use error::{ArgumentError, SyntaxError, SyntaxErrorKind};
pub use parser::{is_command_terminator, is_parameter_terminator, parse_commands, Parser};
pub use program::{parse_program, ProgramParser};
pub use scanner::{Mark, Scanner};
pub use source::SourcePosition;
