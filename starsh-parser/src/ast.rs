//! Defines the command model produced by the parser.

use std::borrow::Cow;
use std::fmt::{Display, Write};

use crate::SourcePosition;

/// Quoting applied to a parameter token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum_macros::Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum QuoteKind {
    /// No quoting; the text is literal.
    #[strum(serialize = "unquoted")]
    Unquoted,
    /// Single-quoted; the text was taken verbatim.
    #[strum(serialize = "single-quoted")]
    SingleQuoted,
    /// Double-quoted; eligible for expansion.
    #[strum(serialize = "double-quoted")]
    DoubleQuoted,
    /// A concatenation of runs with differing quoting.
    #[strum(serialize = "compound")]
    Compound,
}

/// Kind of a single run within a parameter token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SegmentKind {
    /// Literal (unquoted) text.
    Literal,
    /// Text that appeared between single quotes.
    SingleQuoted,
    /// Text that appeared between double quotes.
    DoubleQuoted,
}

/// One run of a parameter token.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ParameterSegment {
    /// How the run was quoted.
    pub kind: SegmentKind,
    /// The run's text, with quotes and escapes removed.
    pub text: String,
}

/// A parameter token: a command word, an assignment value, or a redirection target.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Parameter {
    /// The runs making up the token, in source order.
    pub segments: Vec<ParameterSegment>,
    /// Where the token starts.
    pub position: SourcePosition,
}

impl Parameter {
    /// Creates an unquoted parameter holding the given text.
    pub fn literal(text: impl Into<String>) -> Self {
        Self {
            segments: vec![ParameterSegment {
                kind: SegmentKind::Literal,
                text: text.into(),
            }],
            position: SourcePosition::default(),
        }
    }

    /// Returns the token's value with all quoting removed.
    pub fn text(&self) -> Cow<'_, str> {
        match self.segments.as_slice() {
            [] => Cow::Borrowed(""),
            [only] => Cow::Borrowed(only.text.as_str()),
            segments => Cow::Owned(segments.iter().map(|s| s.text.as_str()).collect()),
        }
    }

    /// Returns the token's overall quoting.
    pub fn quoting(&self) -> QuoteKind {
        let mut kinds = self.segments.iter().map(|s| s.kind);
        let Some(first) = kinds.next() else {
            return QuoteKind::Unquoted;
        };

        if kinds.any(|kind| kind != first) {
            return QuoteKind::Compound;
        }

        match first {
            SegmentKind::Literal => QuoteKind::Unquoted,
            SegmentKind::SingleQuoted => QuoteKind::SingleQuoted,
            SegmentKind::DoubleQuoted => QuoteKind::DoubleQuoted,
        }
    }

    /// Returns true if any part of the token was quoted.
    pub fn is_quoted(&self) -> bool {
        self.segments.iter().any(|s| s.kind != SegmentKind::Literal)
    }

    /// Returns true if the token holds no text and no quoted (possibly empty) runs.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

impl Display for Parameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for segment in &self.segments {
            match segment.kind {
                SegmentKind::Literal => {
                    for c in segment.text.chars() {
                        if c.is_whitespace() || "|&;<>(){}#'\"\\".contains(c) {
                            f.write_char('\\')?;
                        }
                        f.write_char(c)?;
                    }
                }
                SegmentKind::SingleQuoted => write!(f, "'{}'", segment.text)?,
                SegmentKind::DoubleQuoted => {
                    f.write_char('"')?;
                    for c in segment.text.chars() {
                        if c == '"' || c == '\\' {
                            f.write_char('\\')?;
                        }
                        f.write_char(c)?;
                    }
                    f.write_char('"')?;
                }
            }
        }
        Ok(())
    }
}

/// Operator of an environment assignment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum_macros::Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AssignmentOperator {
    /// `=`
    #[strum(serialize = "=")]
    Assign,
    /// `+=`
    #[strum(serialize = "+=")]
    Append,
}

/// A `NAME=value` assignment preceding a command's words.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EnvironmentAssignment {
    /// Name of the variable.
    pub name: String,
    /// How the value combines with any existing value.
    pub operator: AssignmentOperator,
    /// The assigned value; `None` for `NAME=` with nothing following.
    pub value: Option<Parameter>,
}

impl EnvironmentAssignment {
    /// Returns the assigned text.
    pub fn value_text(&self) -> Cow<'_, str> {
        self.value.as_ref().map_or(Cow::Borrowed(""), Parameter::text)
    }
}

impl Display for EnvironmentAssignment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.name, self.operator)?;
        if let Some(value) = &self.value {
            write!(f, "{value}")?;
        }
        Ok(())
    }
}

/// A redirection operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum_macros::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RedirectOperation {
    /// `<>`: open for reading and writing.
    OpenReadWrite,
    /// `<&-`: close an input channel.
    CloseRead,
    /// `>&-`: close an output channel.
    CloseWrite,
    /// `<&`: duplicate an input channel.
    DuplicateRead,
    /// `>&`: duplicate an output channel.
    DuplicateWrite,
    /// `>>`: open for appending.
    OpenWriteAppend,
    /// `>|`: open for writing, truncating even when clobbering is disallowed.
    OpenWriteClobber,
    /// `<<-`: here-document with leading tabs stripped.
    HereDocumentIndented,
    /// `<<`: here-document.
    HereDocument,
    /// `<`: open for reading.
    OpenRead,
    /// `>`: open for writing, truncating.
    OpenWriteTruncate,
}

impl RedirectOperation {
    /// Every operator, longest symbol first, so that no operator shadows a longer one
    /// sharing its prefix.
    pub const TABLE: [Self; 11] = [
        Self::OpenReadWrite,
        Self::CloseRead,
        Self::CloseWrite,
        Self::DuplicateRead,
        Self::DuplicateWrite,
        Self::OpenWriteAppend,
        Self::OpenWriteClobber,
        Self::HereDocumentIndented,
        Self::HereDocument,
        Self::OpenRead,
        Self::OpenWriteTruncate,
    ];

    /// Returns the operator's source symbol.
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::OpenReadWrite => "<>",
            Self::CloseRead => "<&-",
            Self::CloseWrite => ">&-",
            Self::DuplicateRead => "<&",
            Self::DuplicateWrite => ">&",
            Self::OpenWriteAppend => ">>",
            Self::OpenWriteClobber => ">|",
            Self::HereDocumentIndented => "<<-",
            Self::HereDocument => "<<",
            Self::OpenRead => "<",
            Self::OpenWriteTruncate => ">",
        }
    }

    /// Returns the channel the operator applies to when none is given.
    pub const fn default_channel(self) -> u32 {
        match self {
            Self::OpenReadWrite
            | Self::CloseRead
            | Self::DuplicateRead
            | Self::HereDocumentIndented
            | Self::HereDocument
            | Self::OpenRead => 0,
            Self::CloseWrite
            | Self::DuplicateWrite
            | Self::OpenWriteAppend
            | Self::OpenWriteClobber
            | Self::OpenWriteTruncate => 1,
        }
    }

    /// Returns true for the here-document forms.
    pub const fn is_here_document(self) -> bool {
        matches!(self, Self::HereDocument | Self::HereDocumentIndented)
    }

    /// Returns true for the duplicate forms.
    pub const fn is_duplicate(self) -> bool {
        matches!(self, Self::DuplicateRead | Self::DuplicateWrite)
    }

    /// Returns true for the close forms.
    pub const fn is_close(self) -> bool {
        matches!(self, Self::CloseRead | Self::CloseWrite)
    }
}

impl Display for RedirectOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Inline text supplied by a here-document.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HereDocument {
    /// The terminating tag, unquoted.
    pub tag: String,
    /// Whether any part of the tag was quoted.
    pub quoted: bool,
    /// Whether leading tabs were stripped from the body (the `<<-` form).
    pub strip_tabs: bool,
    /// The body, each line keeping its original terminator.
    pub body: String,
}

/// What a redirection points at.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RedirectTarget {
    /// A file path.
    File(Parameter),
    /// Another channel, for the duplicate forms.
    Channel(u32),
    /// No target; the channel is closed.
    Close,
    /// An inline here-document.
    HereDocument(HereDocument),
}

/// A redirection attached to a command.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Redirect {
    /// The channel being redirected.
    pub channel: u32,
    /// The operator.
    pub operation: RedirectOperation,
    /// The operator's target.
    pub target: RedirectTarget,
    /// Where the redirection starts.
    pub position: SourcePosition,
}

impl Redirect {
    /// Returns the redirection's file field: a path, a `/dev/fd/N` reference for the
    /// duplicate forms, or the tag of a here-document. Close forms have none.
    pub fn file(&self) -> Option<Cow<'_, str>> {
        match &self.target {
            RedirectTarget::File(path) => Some(path.text()),
            RedirectTarget::Channel(channel) => Some(Cow::Owned(format!("/dev/fd/{channel}"))),
            RedirectTarget::Close => None,
            RedirectTarget::HereDocument(doc) => Some(Cow::Borrowed(doc.tag.as_str())),
        }
    }
}

impl Display for Redirect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.channel != self.operation.default_channel() {
            write!(f, "{}", self.channel)?;
        }
        write!(f, "{}", self.operation)?;
        match &self.target {
            RedirectTarget::File(path) => write!(f, "{path}"),
            RedirectTarget::Channel(channel) => write!(f, "{channel}"),
            RedirectTarget::Close => Ok(()),
            RedirectTarget::HereDocument(doc) => write!(f, "{}", doc.tag),
        }
    }
}

/// Token ending a command.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum_macros::Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Terminator {
    /// End of input.
    #[strum(serialize = "end of input")]
    EndOfInput,
    /// A newline.
    #[strum(serialize = "newline")]
    NewLine,
    /// `;`
    #[strum(serialize = ";")]
    Semicolon,
    /// `;;`
    #[strum(serialize = ";;")]
    DoubleSemicolon,
    /// `&`
    #[strum(serialize = "&")]
    Background,
    /// `&&`
    #[strum(serialize = "&&")]
    And,
    /// `||`
    #[strum(serialize = "||")]
    Or,
    /// `|`
    #[strum(serialize = "|")]
    Pipe,
    /// `{`
    #[strum(serialize = "{{")]
    OpenGroup,
    /// `}`
    #[strum(serialize = "}}")]
    CloseGroup,
    /// `(`
    #[strum(serialize = "(")]
    OpenSubshell,
    /// `)`
    #[strum(serialize = ")")]
    CloseSubshell,
}

/// A parsed command: assignments, words, redirections and the token that ended it.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Command {
    /// Assignments applying only to this command's execution.
    pub assignments: Vec<EnvironmentAssignment>,
    /// The command's words; the first names the command.
    pub parameters: Vec<Parameter>,
    /// Redirections, in source order.
    pub redirects: Vec<Redirect>,
    /// What ended the command.
    pub terminator: Terminator,
    /// The next pipeline stage; present exactly when `terminator` is a pipe.
    pub next: Option<Box<Command>>,
    /// Text of a trailing `#` comment, without the `#`.
    pub comment: Option<String>,
    /// Where the command starts.
    pub position: SourcePosition,
}

impl Command {
    /// Returns true if the command has no assignments, words or redirections.
    pub fn is_blank(&self) -> bool {
        self.assignments.is_empty() && self.parameters.is_empty() && self.redirects.is_empty()
    }

    /// Returns the command's name, if it has any words.
    pub fn name(&self) -> Option<Cow<'_, str>> {
        self.parameters.first().map(Parameter::text)
    }

    /// Returns the words with quoting removed.
    pub fn argv(&self) -> Vec<String> {
        self.parameters.iter().map(|p| p.text().into_owned()).collect()
    }

    /// Iterates over this command and every command linked after it by pipes.
    pub fn chain(&self) -> impl Iterator<Item = &Self> {
        std::iter::successors(Some(self), |command| command.next.as_deref())
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let words = self
            .assignments
            .iter()
            .map(ToString::to_string)
            .chain(self.parameters.iter().map(ToString::to_string))
            .chain(self.redirects.iter().map(ToString::to_string));

        let mut first = true;
        for word in words {
            if !first {
                f.write_char(' ')?;
            }
            f.write_str(&word)?;
            first = false;
        }

        match self.terminator {
            Terminator::EndOfInput | Terminator::NewLine => {}
            terminator => write!(f, " {terminator}")?,
        }

        if let Some(next) = &self.next {
            write!(f, " {next}")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn operator_table_is_longest_first() {
        for (i, earlier) in RedirectOperation::TABLE.iter().enumerate() {
            for later in &RedirectOperation::TABLE[i + 1..] {
                assert!(
                    !later.symbol().starts_with(earlier.symbol()),
                    "{earlier} shadows {later}"
                );
            }
        }
    }

    #[test]
    fn table_covers_every_operator() {
        use strum::IntoEnumIterator;
        assert_eq!(
            RedirectOperation::iter().count(),
            RedirectOperation::TABLE.len()
        );
    }

    #[test]
    fn compound_quoting() {
        let param = Parameter {
            segments: vec![
                ParameterSegment {
                    kind: SegmentKind::Literal,
                    text: "a".into(),
                },
                ParameterSegment {
                    kind: SegmentKind::SingleQuoted,
                    text: "b c".into(),
                },
            ],
            position: SourcePosition::default(),
        };
        assert_eq!(param.quoting(), QuoteKind::Compound);
        assert_eq!(param.text(), "ab c");
        assert_eq!(param.to_string(), "a'b c'");
    }

    #[test]
    fn duplicate_file_field() {
        let redirect = Redirect {
            channel: 2,
            operation: RedirectOperation::DuplicateWrite,
            target: RedirectTarget::Channel(1),
            position: SourcePosition::default(),
        };
        assert_eq!(redirect.file().as_deref(), Some("/dev/fd/1"));
        assert_eq!(redirect.to_string(), "2>&1");
    }

    #[test]
    fn terminator_tokens() {
        assert_eq!(Terminator::OpenGroup.to_string(), "{");
        assert_eq!(Terminator::CloseGroup.to_string(), "}");
        assert_eq!(Terminator::OpenSubshell.to_string(), "(");
        assert_eq!(Terminator::And.to_string(), "&&");
        assert_eq!(Terminator::EndOfInput.to_string(), "end of input");
    }
}
