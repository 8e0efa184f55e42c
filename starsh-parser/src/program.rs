//! Assembles parsed commands into statements, pipelines and nested blocks.

use std::borrow::Cow;

use crate::ast::{
    Command, EnvironmentAssignment, Parameter, Redirect, Terminator,
};
use crate::{Parser, SourcePosition, SyntaxError, SyntaxErrorKind};

/// How a statement connects to the statement after it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Connector {
    /// `;`, a newline, or end of input: run the next statement unconditionally.
    Sequence,
    /// `&&`: run the next statement only if this one succeeded.
    And,
    /// `||`: run the next statement only if this one failed.
    Or,
    /// `&`: do not wait for this statement.
    Background,
}

/// A single command stage, detached from its pipe link.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SimpleCommand {
    /// Assignments applying only to this command.
    pub assignments: Vec<EnvironmentAssignment>,
    /// The command's words.
    pub parameters: Vec<Parameter>,
    /// Redirections, in source order.
    pub redirects: Vec<Redirect>,
    /// Where the command starts.
    pub position: SourcePosition,
}

impl SimpleCommand {
    /// Returns the command's name, if it has any words.
    pub fn name(&self) -> Option<Cow<'_, str>> {
        self.parameters.first().map(Parameter::text)
    }

    /// Returns the words with quoting removed.
    pub fn argv(&self) -> Vec<String> {
        self.parameters.iter().map(|p| p.text().into_owned()).collect()
    }
}

impl From<Command> for SimpleCommand {
    fn from(command: Command) -> Self {
        Self {
            assignments: command.assignments,
            parameters: command.parameters,
            redirects: command.redirects,
            position: command.position,
        }
    }
}

/// A `{ ... }` or `( ... )` body.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Block {
    /// Statements in the body.
    pub statements: Vec<Statement>,
    /// Redirections applied to the whole body.
    pub redirects: Vec<Redirect>,
}

/// One stage of a pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Stage {
    /// A simple command.
    Simple(SimpleCommand),
    /// A brace group sharing its parent's environment.
    Group(Block),
    /// A parenthesized subshell with a private environment.
    Subshell(Block),
}

/// Stages connected by pipes.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Pipeline {
    /// The stages, in data-flow order.
    pub stages: Vec<Stage>,
}

/// A pipeline plus the connective that follows it.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Statement {
    /// The pipeline to run.
    pub pipeline: Pipeline,
    /// How the pipeline connects to the next statement.
    pub connector: Connector,
    /// Where the statement starts.
    pub position: SourcePosition,
}

/// A complete parsed program.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Program {
    /// Top-level statements.
    pub statements: Vec<Statement>,
}

enum Step {
    Statement(Statement, bool),
    Blank(Terminator),
    Closed(Terminator, SourcePosition),
    End(SourcePosition),
}

/// Pulls statements out of a [`Parser`].
pub struct ProgramParser {
    parser: Parser,
    awaiting: Option<(Connector, SourcePosition)>,
}

impl ProgramParser {
    /// Returns a program parser over the given command parser.
    pub const fn new(parser: Parser) -> Self {
        Self {
            parser,
            awaiting: None,
        }
    }

    /// Parses the next top-level statement; `None` at end of input.
    pub fn next_statement(&mut self) -> Result<Option<Statement>, SyntaxError> {
        let mut awaiting = self.awaiting.take();
        let result = self.next_in(None, &mut awaiting);
        self.awaiting = awaiting;
        Ok(result?.map(|(statement, _)| statement))
    }

    /// Parses all remaining input.
    pub fn parse_program(&mut self) -> Result<Program, SyntaxError> {
        let mut statements = vec![];
        while let Some(statement) = self.next_statement()? {
            statements.push(statement);
        }
        Ok(Program { statements })
    }

    /// Skips to the start of the next line, for recovery after a syntax error.
    pub fn skip_line(&mut self) {
        self.awaiting = None;
        self.parser.skip_line();
    }

    fn next_in(
        &mut self,
        closer: Option<Terminator>,
        awaiting: &mut Option<(Connector, SourcePosition)>,
    ) -> Result<Option<(Statement, bool)>, SyntaxError> {
        loop {
            let command = self.parser.parse_command()?;
            let step = self.parse_statement(command, closer)?;

            let missing = |position: SourcePosition, connector: Connector| SyntaxError {
                origin: self.parser.scanner().origin().clone(),
                position,
                token: String::new(),
                kind: SyntaxErrorKind::MissingCommand(
                    match connector {
                        Connector::And => "&&",
                        _ => "||",
                    }
                    .to_string(),
                ),
            };

            match step {
                Step::Statement(statement, closed) => {
                    *awaiting = match statement.connector {
                        Connector::And | Connector::Or => {
                            Some((statement.connector, statement.position))
                        }
                        _ => None,
                    };
                    if closed {
                        if let Some((connector, position)) = awaiting.take() {
                            return Err(missing(position, connector));
                        }
                    }
                    return Ok(Some((statement, closed)));
                }
                Step::Blank(Terminator::NewLine) => {}
                Step::Blank(_) | Step::Closed(..) | Step::End(_) if awaiting.is_some() => {
                    if let Some((connector, position)) = awaiting.take() {
                        return Err(missing(position, connector));
                    }
                }
                Step::Blank(_) => {}
                Step::Closed(terminator, position) => {
                    return if closer == Some(terminator) {
                        Ok(None)
                    } else {
                        Err(self.unexpected(position, terminator))
                    };
                }
                Step::End(position) => {
                    return match closer {
                        None => Ok(None),
                        Some(closer) => Err(SyntaxError {
                            origin: self.parser.scanner().origin().clone(),
                            position,
                            token: String::new(),
                            kind: SyntaxErrorKind::UnterminatedGroup(closer.to_string()),
                        }),
                    };
                }
            }
        }
    }

    fn parse_block(&mut self, closer: Terminator) -> Result<Vec<Statement>, SyntaxError> {
        let mut statements = vec![];
        let mut awaiting = None;
        while let Some((statement, closed)) = self.next_in(Some(closer), &mut awaiting)? {
            statements.push(statement);
            if closed {
                break;
            }
        }
        Ok(statements)
    }

    fn parse_statement(
        &mut self,
        first: Command,
        closer: Option<Terminator>,
    ) -> Result<Step, SyntaxError> {
        let position = first.position;
        let mut stages = vec![];
        let mut current = first;

        let terminator = loop {
            let (stage, terminator, next, at) = match current.terminator {
                Terminator::OpenGroup | Terminator::OpenSubshell if current.is_blank() => {
                    let (matching, group) = if current.terminator == Terminator::OpenGroup {
                        (Terminator::CloseGroup, true)
                    } else {
                        (Terminator::CloseSubshell, false)
                    };

                    let statements = self.parse_block(matching)?;
                    let tail = self.parser.parse_command()?;
                    if let Some(word) = tail.parameters.first() {
                        return Err(self.unexpected_word(word));
                    }
                    if !tail.assignments.is_empty() {
                        return Err(self.unexpected(tail.position, matching));
                    }

                    let block = Block {
                        statements,
                        redirects: tail.redirects,
                    };
                    let stage = if group {
                        Stage::Group(block)
                    } else {
                        Stage::Subshell(block)
                    };
                    (stage, tail.terminator, tail.next, tail.position)
                }
                Terminator::OpenGroup | Terminator::OpenSubshell => {
                    return Err(self.unexpected(current.position, current.terminator));
                }
                terminator if current.is_blank() && stages.is_empty() => {
                    return match terminator {
                        Terminator::EndOfInput => Ok(Step::End(current.position)),
                        Terminator::NewLine | Terminator::Semicolon => Ok(Step::Blank(terminator)),
                        Terminator::CloseGroup | Terminator::CloseSubshell => {
                            Ok(Step::Closed(terminator, current.position))
                        }
                        _ => Err(self.unexpected(current.position, terminator)),
                    };
                }
                terminator => {
                    let next = current.next.take();
                    let at = current.position;
                    (Stage::Simple(SimpleCommand::from(current)), terminator, next, at)
                }
            };

            stages.push(stage);

            if terminator == Terminator::Pipe {
                match next {
                    Some(next) => current = *next,
                    None => {
                        return Err(SyntaxError {
                            origin: self.parser.scanner().origin().clone(),
                            position: at,
                            token: String::new(),
                            kind: SyntaxErrorKind::MissingCommand(terminator.to_string()),
                        });
                    }
                }
            } else {
                break (terminator, at);
            }
        };

        let (terminator, at) = terminator;
        let (connector, closed) = match terminator {
            Terminator::EndOfInput | Terminator::NewLine | Terminator::Semicolon => {
                (Connector::Sequence, false)
            }
            Terminator::And => (Connector::And, false),
            Terminator::Or => (Connector::Or, false),
            Terminator::Background => (Connector::Background, false),
            Terminator::CloseGroup | Terminator::CloseSubshell if closer == Some(terminator) => {
                (Connector::Sequence, true)
            }
            _ => return Err(self.unexpected(at, terminator)),
        };

        Ok(Step::Statement(
            Statement {
                pipeline: Pipeline { stages },
                connector,
                position,
            },
            closed,
        ))
    }

    fn unexpected(&self, position: SourcePosition, terminator: Terminator) -> SyntaxError {
        SyntaxError {
            origin: self.parser.scanner().origin().clone(),
            position,
            token: terminator.to_string(),
            kind: SyntaxErrorKind::UnexpectedToken(terminator.to_string()),
        }
    }

    fn unexpected_word(&self, word: &Parameter) -> SyntaxError {
        SyntaxError {
            origin: self.parser.scanner().origin().clone(),
            position: word.position,
            token: word.text().into_owned(),
            kind: SyntaxErrorKind::UnexpectedToken(word.text().into_owned()),
        }
    }
}

/// Parses a complete program from text.
///
/// # Arguments
///
/// * `origin` - Name of the input, reported in syntax errors.
/// * `text` - The program text.
pub fn parse_program(origin: &str, text: &str) -> Result<Program, SyntaxError> {
    ProgramParser::new(Parser::for_text(origin, text)).parse_program()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use pretty_assertions::assert_eq;

    fn expect_error<T: std::fmt::Debug, E>(result: std::result::Result<T, E>) -> Result<E> {
        match result {
            Ok(value) => Err(anyhow::anyhow!("expected an error, got {value:?}")),
            Err(err) => Ok(err),
        }
    }

    fn names(pipeline: &Pipeline) -> Vec<String> {
        pipeline
            .stages
            .iter()
            .map(|stage| match stage {
                Stage::Simple(command) => command.argv().join(" "),
                Stage::Group(_) => "{}".to_string(),
                Stage::Subshell(_) => "()".to_string(),
            })
            .collect()
    }

    #[test]
    fn statements_and_connectors() -> Result<()> {
        let program = parse_program("test", "a && b || c; d &\n\ne")?;
        let connectors: Vec<_> = program.statements.iter().map(|s| s.connector).collect();
        assert_eq!(
            connectors,
            vec![
                Connector::And,
                Connector::Or,
                Connector::Sequence,
                Connector::Background,
                Connector::Sequence
            ]
        );
        Ok(())
    }

    #[test]
    fn pipeline_stages() -> Result<()> {
        let program = parse_program("test", "a x | b | c y\n")?;
        assert_eq!(program.statements.len(), 1);
        assert_eq!(names(&program.statements[0].pipeline), vec!["a x", "b", "c y"]);
        Ok(())
    }

    #[test]
    fn group_with_redirect_into_pipe() -> Result<()> {
        let program = parse_program("test", "{ echo a; echo b; } > out | cat\n")?;
        let pipeline = &program.statements[0].pipeline;
        assert_eq!(names(pipeline), vec!["{}", "cat"]);
        let Stage::Group(block) = &pipeline.stages[0] else {
            anyhow::bail!("expected group");
        };
        assert_eq!(block.statements.len(), 2);
        assert_eq!(block.redirects.len(), 1);
        Ok(())
    }

    #[test]
    fn nested_subshell_in_pipe() -> Result<()> {
        let program = parse_program("test", "echo x | (read; { cat; })\nafter")?;
        assert_eq!(program.statements.len(), 2);
        let Stage::Subshell(block) = &program.statements[0].pipeline.stages[1] else {
            anyhow::bail!("expected subshell");
        };
        assert_eq!(block.statements.len(), 2);
        assert!(matches!(block.statements[1].pipeline.stages[0], Stage::Group(_)));
        Ok(())
    }

    #[test]
    fn connector_continues_over_newlines() -> Result<()> {
        let program = parse_program("test", "a &&\n\n b")?;
        assert_eq!(program.statements.len(), 2);
        Ok(())
    }

    #[test]
    fn dangling_connector() -> Result<()> {
        let err = expect_error(parse_program("test", "a &&"))?;
        assert_eq!(err.kind, SyntaxErrorKind::MissingCommand("&&".into()));
        assert!(err.is_incomplete());
        Ok(())
    }

    #[test]
    fn unterminated_group() -> Result<()> {
        let err = expect_error(parse_program("test", "{ a; b"))?;
        assert_eq!(err.kind, SyntaxErrorKind::UnterminatedGroup("}".into()));
        Ok(())
    }

    #[test]
    fn mismatched_closer() -> Result<()> {
        let err = expect_error(parse_program("test", "( a; }"))?;
        assert_eq!(err.kind, SyntaxErrorKind::UnexpectedToken("}".into()));
        Ok(())
    }

    #[test]
    fn double_semicolon_is_rejected() -> Result<()> {
        let err = expect_error(parse_program("test", "a ;; b"))?;
        assert_eq!(err.kind, SyntaxErrorKind::UnexpectedToken(";;".into()));
        Ok(())
    }

    #[test]
    fn word_after_group_is_rejected() -> Result<()> {
        let err = expect_error(parse_program("test", "{ a; } b"))?;
        assert_eq!(err.kind, SyntaxErrorKind::UnexpectedToken("b".into()));
        Ok(())
    }

    #[test]
    fn incremental_statements() -> Result<()> {
        let mut parser = ProgramParser::new(Parser::for_text("test", "a\nb 'oops"));
        assert!(parser.next_statement()?.is_some());
        assert!(parser.next_statement().is_err());
        Ok(())
    }
}
