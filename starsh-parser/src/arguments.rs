//! Reader for flag/value style command arguments such as `-a:apple`, `-c=car` or `-d daisy`.

use crate::ArgumentError;

/// A switch read from an argument list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Switch {
    /// The switch name, including its leading `-` or `+`.
    pub name: String,
    /// A value joined to the name with `:` or `=`, trimmed of surrounding spaces.
    pub inline_value: Option<String>,
    /// Whether the switch was introduced with `+` rather than `-`.
    pub plus: bool,
}

impl Switch {
    fn parse(token: &str) -> Self {
        let split = match (token.find(':'), token.find('=')) {
            (Some(colon), Some(equals)) if colon < equals => Some(colon),
            (Some(colon), None) => Some(colon),
            (_, Some(equals)) => Some(equals),
            (None, None) => None,
        };

        let (name, inline_value) = match split {
            Some(index) if index > 0 => {
                let (name, rest) = token.split_at(index);
                (name.to_string(), Some(rest[1..].trim().to_string()))
            }
            _ => (token.to_string(), None),
        };

        Self {
            plus: name.starts_with('+'),
            name,
            inline_value,
        }
    }

    /// Returns true if the token looks like a switch (`-x`, `--name`, `+x`).
    pub fn is_flag(&self) -> bool {
        self.name.len() > 1 && (self.name.starts_with('-') || self.plus)
    }

    /// Expands a cluster of single-letter switches such as `-xvc` into `-x`, `-v`, `-c`.
    ///
    /// Any inline value stays with the last switch. Long (`--name`) switches and
    /// single switches are returned unchanged.
    pub fn cluster(&self) -> Vec<Self> {
        let prefix = if self.plus { '+' } else { '-' };
        let letters = self.name.strip_prefix(prefix).unwrap_or_default();
        if letters.chars().count() < 2 || letters.starts_with('-') {
            return vec![self.clone()];
        }

        let count = letters.chars().count();
        letters
            .chars()
            .enumerate()
            .map(|(i, c)| Self {
                name: format!("{prefix}{c}"),
                inline_value: if i + 1 == count {
                    self.inline_value.clone()
                } else {
                    None
                },
                plus: self.plus,
            })
            .collect()
    }
}

/// Walks an argument list, splitting `name:value` and `name=value` tokens.
#[derive(Clone, Debug)]
pub struct ArgumentReader<'a> {
    arguments: &'a [String],
    index: usize,
}

impl<'a> ArgumentReader<'a> {
    /// Returns a reader over the given arguments.
    pub const fn new(arguments: &'a [String]) -> Self {
        Self {
            arguments,
            index: 0,
        }
    }

    /// Reads the next argument as a switch.
    pub fn next_switch(&mut self) -> Option<Switch> {
        let token = self.arguments.get(self.index)?;
        self.index += 1;
        Some(Switch::parse(token))
    }

    /// Returns the value for `switch`: its inline value, or else the argument after it.
    ///
    /// # Arguments
    ///
    /// * `switch` - The switch most recently returned by [`Self::next_switch`].
    pub fn value(&mut self, switch: &Switch) -> Result<String, ArgumentError> {
        if let Some(value) = &switch.inline_value {
            return Ok(value.clone());
        }

        let value = self
            .arguments
            .get(self.index)
            .ok_or_else(|| ArgumentError::MissingValue(switch.name.clone()))?;
        self.index += 1;
        Ok(value.clone())
    }

    /// Returns the arguments not yet read.
    pub fn remaining(&self) -> &'a [String] {
        &self.arguments[self.index.min(self.arguments.len())..]
    }
}
