use clap::Parser;
use itertools::Itertools;
use std::io::Write;

use crate::builtins;
use crate::functions::FunctionCall;

/// Echo text to standard output.
#[derive(Parser)]
#[clap(disable_help_flag = true, disable_version_flag = true)]
pub(crate) struct EchoCommand {
    /// Suppress the trailing line separator.
    #[arg(short = 'n')]
    no_trailing_newline: bool,

    /// Interpret backslash escapes (the default).
    #[arg(short = 'e')]
    interpret_backslash_escapes: bool,

    /// Do not interpret backslash escapes.
    #[arg(short = 'E', overrides_with = "interpret_backslash_escapes")]
    no_interpret_backslash_escapes: bool,

    /// Tokens to echo to standard output.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

impl builtins::BuiltinCommand for EchoCommand {
    fn execute(&self, call: &mut FunctionCall) -> Result<u8, crate::error::Error> {
        let mut trailing_newline = !self.no_trailing_newline;
        let mut output = vec![];

        if self.interpret_backslash_escapes || !self.no_interpret_backslash_escapes {
            for (i, arg) in self.args.iter().enumerate() {
                if i > 0 {
                    output.push(b' ');
                }

                let (expanded, keep_going) = expand_backslash_escapes(arg);
                output.extend(expanded);

                if !keep_going {
                    trailing_newline = false;
                    break;
                }
            }
        } else {
            output.extend(self.args.iter().join(" ").into_bytes());
        }

        if trailing_newline {
            output.extend(call.line_separator().into_bytes());
        }

        call.stdout()?.write_all(&output)?;
        Ok(0)
    }
}

fn take_digits(
    it: &mut std::iter::Peekable<std::str::Chars<'_>>,
    max: usize,
    radix: u32,
) -> String {
    it.peeking_take_while(|c| c.is_digit(radix))
        .take(max)
        .collect()
}

/// Expands echo-style backslash escapes. The flag is false when `\c` asked for
/// output to stop.
fn expand_backslash_escapes(s: &str) -> (Vec<u8>, bool) {
    let mut result = vec![];
    let mut it = s.chars().peekable();

    while let Some(c) = it.next() {
        if c != '\\' {
            let mut buf = [0; 4];
            result.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }

        match it.next() {
            Some('a') => result.push(b'\x07'),
            Some('b') => result.push(b'\x08'),
            Some('c') => return (result, false),
            Some('e' | 'E') => result.push(b'\x1b'),
            Some('f') => result.push(b'\x0c'),
            Some('n') => result.push(b'\n'),
            Some('r') => result.push(b'\r'),
            Some('t') => result.push(b'\t'),
            Some('v') => result.push(b'\x0b'),
            Some('\\') => result.push(b'\\'),
            Some('0') => {
                let digits = take_digits(&mut it, 3, 8);
                result.push(u8::from_str_radix(&digits, 8).unwrap_or(0));
            }
            Some('x') => {
                let digits = take_digits(&mut it, 2, 16);
                match u8::from_str_radix(&digits, 16) {
                    Ok(value) => result.push(value),
                    Err(_) => result.extend_from_slice(b"\\x"),
                }
            }
            Some(other) => {
                result.push(b'\\');
                let mut buf = [0; 4];
                result.extend_from_slice(other.encode_utf8(&mut buf).as_bytes());
            }
            None => result.push(b'\\'),
        }
    }

    (result, true)
}
