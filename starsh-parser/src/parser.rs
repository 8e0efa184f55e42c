use crate::ast::{
    AssignmentOperator, Command, EnvironmentAssignment, HereDocument, Parameter,
    ParameterSegment, Redirect, RedirectOperation, RedirectTarget, SegmentKind, Terminator,
};
use crate::{Scanner, SyntaxError, SyntaxErrorKind};

/// Returns true for characters that end a command.
pub const fn is_command_terminator(c: char) -> bool {
    matches!(
        c,
        '\0' | '\n' | ';' | '&' | '(' | ')' | '{' | '}' | '#'
    )
}

/// Returns true for characters that end a parameter token.
pub const fn is_parameter_terminator(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r' | '|' | '<' | '>') || is_command_terminator(c)
}

/// Parses commands from a scanner, one at a time.
pub struct Parser {
    scanner: Scanner,
}

impl Parser {
    /// Returns a new parser over the given scanner.
    pub const fn new(scanner: Scanner) -> Self {
        Self { scanner }
    }

    /// Returns a new parser over the given text.
    ///
    /// # Arguments
    ///
    /// * `origin` - Name of the input, reported in syntax errors.
    /// * `text` - The text to parse.
    pub fn for_text(origin: &str, text: &str) -> Self {
        Self::new(Scanner::new(origin, text))
    }

    /// Returns true once all input has been consumed.
    pub fn at_end(&self) -> bool {
        self.scanner.at_end()
    }

    /// Returns the underlying scanner.
    pub const fn scanner(&self) -> &Scanner {
        &self.scanner
    }

    /// Parses the next command, including any commands linked to it by pipes.
    ///
    /// At end of input this yields a blank command terminated by
    /// [`Terminator::EndOfInput`].
    pub fn parse_command(&mut self) -> Result<Command, SyntaxError> {
        self.scanner.skip_inline_whitespace();
        let position = self.scanner.position();

        let assignments = self.parse_assignments()?;
        let mut parameters = vec![];
        let mut redirects = vec![];

        loop {
            self.scanner.skip_inline_whitespace();
            match self.scanner.peek() {
                None => break,
                Some('|') => break,
                Some(c) if is_command_terminator(c) => break,
                Some('<' | '>') => redirects.push(self.parse_redirect()?),
                Some(c) if c.is_ascii_digit() && self.at_channel_prefix() => {
                    redirects.push(self.parse_redirect()?);
                }
                Some(_) => parameters.push(self.parse_parameter()?),
            }
        }

        let (terminator, comment) = self.parse_terminator();
        let next = if terminator == Terminator::Pipe {
            self.scanner.skip_whitespace();
            let next = self.parse_command()?;
            if next.is_blank()
                && !matches!(
                    next.terminator,
                    Terminator::OpenGroup | Terminator::OpenSubshell
                )
            {
                return Err(self.scanner.error_at(
                    next.position,
                    SyntaxErrorKind::MissingCommand(Terminator::Pipe.to_string()),
                    "",
                ));
            }
            Some(Box::new(next))
        } else {
            None
        };

        let command = Command {
            assignments,
            parameters,
            redirects,
            terminator,
            next,
            comment,
            position,
        };

        tracing::debug!(target: "parse", "parsed command: {command}");

        Ok(command)
    }

    /// Skips input up to and including the next newline, for recovery after a
    /// syntax error.
    pub fn skip_line(&mut self) {
        self.scanner.read_to_line_end();
        self.scanner.next();
    }

    fn parse_assignments(&mut self) -> Result<Vec<EnvironmentAssignment>, SyntaxError> {
        let mut assignments = vec![];

        loop {
            self.scanner.skip_inline_whitespace();
            let mark = self.scanner.mark();

            let mut name = String::new();
            while let Some(c) = self.scanner.peek() {
                let allowed = c == '_'
                    || c.is_ascii_alphabetic()
                    || (!name.is_empty() && c.is_ascii_digit());
                if !allowed {
                    break;
                }
                name.push(c);
                self.scanner.next();
            }

            let operator = if name.is_empty() {
                None
            } else if self.scanner.consume("=") {
                Some(AssignmentOperator::Assign)
            } else if self.scanner.consume("+=") {
                Some(AssignmentOperator::Append)
            } else {
                None
            };

            let Some(operator) = operator else {
                self.scanner.restore(mark);
                return Ok(assignments);
            };

            let value = match self.scanner.peek() {
                Some(c) if !is_parameter_terminator(c) => Some(self.parse_parameter()?),
                _ => None,
            };

            assignments.push(EnvironmentAssignment {
                name,
                operator,
                value,
            });
        }
    }

    fn at_channel_prefix(&self) -> bool {
        let mut offset = 0;
        while self
            .scanner
            .peek_nth(offset)
            .is_some_and(|c| c.is_ascii_digit())
        {
            offset += 1;
        }
        matches!(self.scanner.peek_nth(offset), Some('<' | '>'))
    }

    fn parse_parameter(&mut self) -> Result<Parameter, SyntaxError> {
        let position = self.scanner.position();
        let mut segments: Vec<ParameterSegment> = vec![];
        let mut literal = String::new();
        let mut has_literal = false;

        let partial = |segments: &[ParameterSegment], extra: &str| -> String {
            segments
                .iter()
                .map(|s| s.text.as_str())
                .chain(std::iter::once(extra))
                .collect()
        };

        while let Some(c) = self.scanner.peek() {
            match c {
                '\'' => {
                    flush_literal(&mut segments, &mut literal, &mut has_literal);
                    let quote_position = self.scanner.position();
                    self.scanner.next();
                    let mut text = String::new();
                    loop {
                        match self.scanner.next() {
                            Some('\'') => break,
                            Some(c) => text.push(c),
                            None => {
                                return Err(self.scanner.error_at(
                                    quote_position,
                                    SyntaxErrorKind::UnterminatedSingleQuote,
                                    partial(&segments, &text),
                                ));
                            }
                        }
                    }
                    segments.push(ParameterSegment {
                        kind: SegmentKind::SingleQuoted,
                        text,
                    });
                }
                '"' => {
                    flush_literal(&mut segments, &mut literal, &mut has_literal);
                    let quote_position = self.scanner.position();
                    self.scanner.next();
                    let mut text = String::new();
                    loop {
                        match self.scanner.next() {
                            Some('"') => break,
                            Some('\\') => match self.scanner.next() {
                                Some('\n') => {}
                                Some(c) => text.push(c),
                                None => {
                                    return Err(self.scanner.error_at(
                                        quote_position,
                                        SyntaxErrorKind::UnterminatedDoubleQuote,
                                        partial(&segments, &text),
                                    ));
                                }
                            },
                            Some(c) => text.push(c),
                            None => {
                                return Err(self.scanner.error_at(
                                    quote_position,
                                    SyntaxErrorKind::UnterminatedDoubleQuote,
                                    partial(&segments, &text),
                                ));
                            }
                        }
                    }
                    segments.push(ParameterSegment {
                        kind: SegmentKind::DoubleQuoted,
                        text,
                    });
                }
                '\\' => {
                    self.scanner.next();
                    match self.scanner.next() {
                        Some('\n') => {}
                        Some(c) => {
                            literal.push(c);
                            has_literal = true;
                        }
                        None => {
                            return Err(self.scanner.error(
                                SyntaxErrorKind::UnterminatedEscape,
                                partial(&segments, &literal),
                            ));
                        }
                    }
                }
                c if is_parameter_terminator(c) => break,
                c => {
                    literal.push(c);
                    has_literal = true;
                    self.scanner.next();
                }
            }
        }

        flush_literal(&mut segments, &mut literal, &mut has_literal);

        Ok(Parameter { segments, position })
    }

    fn parse_redirect(&mut self) -> Result<Redirect, SyntaxError> {
        let position = self.scanner.position();

        let mut digits = String::new();
        while let Some(c) = self.scanner.peek().filter(char::is_ascii_digit) {
            digits.push(c);
            self.scanner.next();
        }

        let Some(operation) = RedirectOperation::TABLE
            .into_iter()
            .find(|op| self.scanner.starts_with(op.symbol()))
        else {
            return Err(self.scanner.error(
                SyntaxErrorKind::UnrecognizedRedirection(digits.clone()),
                digits,
            ));
        };
        self.scanner.consume(operation.symbol());

        let channel = if digits.is_empty() {
            operation.default_channel()
        } else {
            digits.parse().map_err(|_| {
                self.scanner.error_at(
                    position,
                    SyntaxErrorKind::UnrecognizedRedirection(format!("{digits}{operation}")),
                    digits.clone(),
                )
            })?
        };

        let target = if operation.is_close() {
            RedirectTarget::Close
        } else {
            self.scanner.skip_inline_whitespace();
            let target_position = self.scanner.position();
            let target = self.parse_parameter()?;
            if target.is_empty() {
                let kind = if operation.is_here_document() {
                    SyntaxErrorKind::MissingHereTag
                } else {
                    SyntaxErrorKind::MissingRedirectTarget(operation.to_string())
                };
                return Err(self.scanner.error(kind, ""));
            }

            if operation.is_duplicate() {
                parse_duplicate_target(&target.text()).ok_or_else(|| {
                    self.scanner.error_at(
                        target_position,
                        SyntaxErrorKind::UnrecognizedRedirection(format!(
                            "{operation}{}",
                            target.text()
                        )),
                        target.text(),
                    )
                })?
            } else if operation.is_here_document() {
                let tag = target.text().into_owned();
                let strip_tabs = operation == RedirectOperation::HereDocumentIndented;
                let body = self
                    .scanner
                    .read_here_document(&tag, strip_tabs)
                    .ok_or_else(|| {
                        self.scanner.error_at(
                            position,
                            SyntaxErrorKind::UnterminatedHereDocument(tag.clone()),
                            tag.clone(),
                        )
                    })?;

                RedirectTarget::HereDocument(HereDocument {
                    quoted: target.is_quoted(),
                    tag,
                    strip_tabs,
                    body,
                })
            } else {
                RedirectTarget::File(target)
            }
        };

        Ok(Redirect {
            channel,
            operation,
            target,
            position,
        })
    }

    fn parse_terminator(&mut self) -> (Terminator, Option<String>) {
        let terminator = match self.scanner.next() {
            None | Some('\0') => Terminator::EndOfInput,
            Some('\n') => Terminator::NewLine,
            Some(';') => {
                if self.scanner.consume(";") {
                    Terminator::DoubleSemicolon
                } else {
                    Terminator::Semicolon
                }
            }
            Some('&') => {
                if self.scanner.consume("&") {
                    Terminator::And
                } else {
                    Terminator::Background
                }
            }
            Some('|') => {
                if self.scanner.consume("|") {
                    Terminator::Or
                } else {
                    Terminator::Pipe
                }
            }
            Some('{') => Terminator::OpenGroup,
            Some('}') => Terminator::CloseGroup,
            Some('(') => Terminator::OpenSubshell,
            Some(')') => Terminator::CloseSubshell,
            Some('#') => {
                let comment = self.scanner.read_to_line_end();
                let terminator = match self.scanner.next() {
                    Some(_) => Terminator::NewLine,
                    None => Terminator::EndOfInput,
                };
                return (terminator, Some(comment));
            }
            // Only terminator characters are left unconsumed by the word loop.
            Some(_) => Terminator::EndOfInput,
        };

        (terminator, None)
    }
}

fn flush_literal(
    segments: &mut Vec<ParameterSegment>,
    literal: &mut String,
    has_literal: &mut bool,
) {
    if *has_literal {
        segments.push(ParameterSegment {
            kind: SegmentKind::Literal,
            text: std::mem::take(literal),
        });
        *has_literal = false;
    }
}

fn parse_duplicate_target(text: &str) -> Option<RedirectTarget> {
    if text == "-" {
        return Some(RedirectTarget::Close);
    }

    let digits = text.strip_prefix("/dev/fd/").unwrap_or(text);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    digits.parse().ok().map(RedirectTarget::Channel)
}

/// Parses every command in the given text.
///
/// # Arguments
///
/// * `origin` - Name of the input, reported in syntax errors.
/// * `text` - The text to parse.
pub fn parse_commands(origin: &str, text: &str) -> Result<Vec<Command>, SyntaxError> {
    let mut parser = Parser::for_text(origin, text);
    let mut commands = vec![];

    loop {
        let command = parser.parse_command()?;
        let done = command.terminator == Terminator::EndOfInput;
        if !command.is_blank() || command.next.is_some() || !done {
            commands.push(command);
        }
        if done {
            break;
        }
    }

    Ok(commands)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::QuoteKind;
    use anyhow::Result;
    use pretty_assertions::assert_eq;

    fn expect_error<T: std::fmt::Debug, E>(result: std::result::Result<T, E>) -> Result<E> {
        match result {
            Ok(value) => Err(anyhow::anyhow!("expected an error, got {value:?}")),
            Err(err) => Ok(err),
        }
    }

    fn parse_one(text: &str) -> Result<Command> {
        Ok(Parser::for_text("test", text).parse_command()?)
    }

    #[test]
    fn parse_simple_command() -> Result<()> {
        let command = parse_one("echo hello world\n")?;
        assert_eq!(command.argv(), vec!["echo", "hello", "world"]);
        assert_eq!(command.terminator, Terminator::NewLine);
        assert!(command.next.is_none());
        Ok(())
    }

    #[test]
    fn single_quotes_are_verbatim() -> Result<()> {
        let command = parse_one(r"echo 'a\nb'")?;
        assert_eq!(command.parameters[1].text(), r"a\nb");
        assert_eq!(command.parameters[1].quoting(), QuoteKind::SingleQuoted);
        Ok(())
    }

    #[test]
    fn double_quotes_escape_next_character() -> Result<()> {
        let command = parse_one(r#"echo "a\"b""#)?;
        assert_eq!(command.parameters[1].text(), r#"a"b"#);
        assert_eq!(command.parameters[1].quoting(), QuoteKind::DoubleQuoted);
        Ok(())
    }

    #[test]
    fn runs_concatenate() -> Result<()> {
        let command = parse_one(r#"echo pre'mid dle'"post""#)?;
        assert_eq!(command.parameters.len(), 2);
        assert_eq!(command.parameters[1].text(), "premid dlepost");
        assert_eq!(command.parameters[1].quoting(), QuoteKind::Compound);
        Ok(())
    }

    #[test]
    fn unquoted_backslash_and_continuation() -> Result<()> {
        let command = parse_one("echo a\\ b \\\n c")?;
        assert_eq!(command.argv(), vec!["echo", "a b", "c"]);
        Ok(())
    }

    #[test]
    fn append_is_not_two_truncates() -> Result<()> {
        let command = parse_one("cmd >> out")?;
        assert_eq!(command.redirects.len(), 1);
        assert_eq!(
            command.redirects[0].operation,
            RedirectOperation::OpenWriteAppend
        );
        assert_eq!(command.redirects[0].channel, 1);
        assert_eq!(command.redirects[0].file().as_deref(), Some("out"));
        Ok(())
    }

    #[test]
    fn every_operator_parses_longest() -> Result<()> {
        let cases = [
            ("cmd <> f", RedirectOperation::OpenReadWrite, 0),
            ("cmd <&-", RedirectOperation::CloseRead, 0),
            ("cmd >&-", RedirectOperation::CloseWrite, 1),
            ("cmd <&3", RedirectOperation::DuplicateRead, 0),
            ("cmd 2>&1", RedirectOperation::DuplicateWrite, 2),
            ("cmd >| f", RedirectOperation::OpenWriteClobber, 1),
            ("cmd < f", RedirectOperation::OpenRead, 0),
            ("cmd 3> f", RedirectOperation::OpenWriteTruncate, 3),
        ];

        for (text, operation, channel) in cases {
            let command = parse_one(text)?;
            assert_eq!(command.redirects.len(), 1, "{text}");
            assert_eq!(command.redirects[0].operation, operation, "{text}");
            assert_eq!(command.redirects[0].channel, channel, "{text}");
        }
        Ok(())
    }

    #[test]
    fn close_and_duplicate_have_no_path() -> Result<()> {
        let command = parse_one("cmd 2>&1 >&- 3<&/dev/fd/4 5</dev/fd/6")?;
        assert_eq!(command.redirects[0].target, RedirectTarget::Channel(1));
        assert_eq!(command.redirects[1].target, RedirectTarget::Close);
        assert_eq!(command.redirects[2].target, RedirectTarget::Channel(4));
        assert_eq!(command.redirects[2].channel, 3);
        assert!(matches!(command.redirects[3].target, RedirectTarget::File(_)));
        Ok(())
    }

    #[test]
    fn digits_without_operator_are_a_word() -> Result<()> {
        let command = parse_one("echo 12 3>x")?;
        assert_eq!(command.argv(), vec!["echo", "12"]);
        assert_eq!(command.redirects[0].channel, 3);
        Ok(())
    }

    #[test]
    fn here_document_body() -> Result<()> {
        let command = parse_one("cmd <<EOF\nline1\nline2\nEOF\n")?;
        let RedirectTarget::HereDocument(doc) = &command.redirects[0].target else {
            anyhow::bail!("expected here-document");
        };
        assert_eq!(doc.body, "line1\nline2\n");
        assert_eq!(command.redirects[0].file().as_deref(), Some("EOF"));
        assert_eq!(command.terminator, Terminator::NewLine);
        Ok(())
    }

    #[test]
    fn indented_here_document_strips_tabs() -> Result<()> {
        let mut parser = Parser::for_text(
            "test",
            "cat <<-END | wc\n\tone\n\t\ttwo\n\tEND\necho after\n",
        );
        let command = parser.parse_command()?;
        let RedirectTarget::HereDocument(doc) = &command.redirects[0].target else {
            anyhow::bail!("expected here-document");
        };
        assert_eq!(doc.body, "one\ntwo\n");
        assert_eq!(command.next.as_ref().map(|n| n.argv()), Some(vec!["wc".to_string()]));

        let after = parser.parse_command()?;
        assert_eq!(after.argv(), vec!["echo", "after"]);
        Ok(())
    }

    #[test]
    fn two_here_documents_on_one_line() -> Result<()> {
        let mut parser = Parser::for_text("test", "a <<X; b <<Y\nx\nX\ny\nY\nc\n");
        let a = parser.parse_command()?;
        let b = parser.parse_command()?;
        let c = parser.parse_command()?;
        let body = |command: &Command| match &command.redirects[0].target {
            RedirectTarget::HereDocument(doc) => doc.body.clone(),
            _ => String::new(),
        };
        assert_eq!(body(&a), "x\n");
        assert_eq!(body(&b), "y\n");
        assert_eq!(c.argv(), vec!["c"]);
        Ok(())
    }

    #[test]
    fn unterminated_here_document() -> Result<()> {
        let err = expect_error(parse_one("cat <<EOF\nline\n"))?;
        let err = err.downcast::<SyntaxError>()?;
        assert_eq!(
            err.kind,
            SyntaxErrorKind::UnterminatedHereDocument("EOF".into())
        );
        assert!(err.is_incomplete());
        Ok(())
    }

    #[test]
    fn unterminated_quote_reports_position_and_token() -> Result<()> {
        let err = expect_error(Parser::for_text("script", "echo 'abc").parse_command())?;
        assert_eq!(err.kind, SyntaxErrorKind::UnterminatedSingleQuote);
        assert_eq!(err.position.line, 1);
        assert_eq!(err.position.column, 6);
        assert_eq!(err.token, "abc");
        assert_eq!(err.to_string(), "script: line 1, column 6: unterminated single quote");
        Ok(())
    }

    #[test]
    fn bad_duplicate_target() -> Result<()> {
        let err = expect_error(Parser::for_text("test", "cmd >&file").parse_command())?;
        assert_eq!(
            err.kind,
            SyntaxErrorKind::UnrecognizedRedirection(">&file".into())
        );
        Ok(())
    }

    #[test]
    fn multi_character_terminators() -> Result<()> {
        let cases = [
            ("a && b", Terminator::And),
            ("a || b", Terminator::Or),
            ("a ;; b", Terminator::DoubleSemicolon),
            ("a ; b", Terminator::Semicolon),
            ("a & b", Terminator::Background),
            ("a }", Terminator::CloseGroup),
        ];
        for (text, terminator) in cases {
            assert_eq!(parse_one(text)?.terminator, terminator, "{text}");
        }
        Ok(())
    }

    #[test]
    fn pipe_links_next_command() -> Result<()> {
        let command = parse_one("a | b | c\n")?;
        let names: Vec<_> = command
            .chain()
            .filter_map(|c| c.name().map(|n| n.into_owned()))
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        for link in command.chain() {
            assert_eq!(link.next.is_some(), link.terminator == Terminator::Pipe);
        }
        Ok(())
    }

    #[test]
    fn pipe_without_command_fails() -> Result<()> {
        let err = expect_error(Parser::for_text("test", "a |\n").parse_command())?;
        assert_eq!(err.kind, SyntaxErrorKind::MissingCommand("|".into()));
        Ok(())
    }

    #[test]
    fn assignments_precede_words() -> Result<()> {
        let command = parse_one("A=1 B+=two C= run X=not")?;
        let names: Vec<_> = command.assignments.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B", "C"]);
        assert_eq!(command.assignments[1].operator, AssignmentOperator::Append);
        assert_eq!(command.assignments[2].value_text(), "");
        assert_eq!(command.argv(), vec!["run", "X=not"]);
        Ok(())
    }

    #[test]
    fn leading_digit_is_not_an_assignment() -> Result<()> {
        let command = parse_one("1A=x")?;
        assert!(command.assignments.is_empty());
        assert_eq!(command.argv(), vec!["1A=x"]);
        Ok(())
    }

    #[test]
    fn comment_ends_command() -> Result<()> {
        let mut parser = Parser::for_text("test", "#!/bin/starsh\necho hi # greet\n");
        let shebang = parser.parse_command()?;
        assert!(shebang.is_blank());
        assert_eq!(shebang.comment.as_deref(), Some("!/bin/starsh"));

        let command = parser.parse_command()?;
        assert_eq!(command.argv(), vec!["echo", "hi"]);
        assert_eq!(command.comment.as_deref(), Some(" greet"));
        assert_eq!(command.terminator, Terminator::NewLine);
        Ok(())
    }

    #[test]
    fn parse_all_commands() -> Result<()> {
        let commands = parse_commands("test", "a; b\n\nc")?;
        let names: Vec<_> = commands
            .iter()
            .map(|c| c.name().map(|n| n.into_owned()).unwrap_or_default())
            .collect();
        assert_eq!(names, vec!["a", "b", "", "c"]);
        Ok(())
    }
}
