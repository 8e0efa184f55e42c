//! Implements variables for an execution environment.

use std::fmt::Display;

/// A variable.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Variable {
    /// The value currently associated with the variable.
    value: String,
    /// Whether or not the variable is marked as exported to child processes.
    exported: bool,
    /// Whether or not the variable is marked as read-only.
    readonly: bool,
}

impl Variable {
    /// Returns a new, unexported and writable variable holding the given value.
    ///
    /// # Arguments
    ///
    /// * `value` - The value to hold.
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            ..Self::default()
        }
    }

    /// Returns the variable's value.
    pub fn value(&self) -> &str {
        &self.value
    }

    pub(crate) fn set_value(&mut self, value: impl Into<String>) {
        self.value = value.into();
    }

    pub(crate) fn append_value(&mut self, value: &str) {
        self.value.push_str(value);
    }

    /// Returns whether or not the variable is exported to child processes.
    pub const fn is_exported(&self) -> bool {
        self.exported
    }

    /// Marks the variable as exported (or not) to child processes.
    pub const fn set_exported(&mut self, exported: bool) -> &mut Self {
        self.exported = exported;
        self
    }

    /// Returns whether or not the variable is read-only.
    pub const fn is_readonly(&self) -> bool {
        self.readonly
    }

    /// Marks the variable as read-only. There is no way back.
    pub const fn set_readonly(&mut self) -> &mut Self {
        self.readonly = true;
        self
    }

    /// Builder form of [`Self::set_exported`] with `true`.
    #[must_use]
    pub const fn exported(mut self) -> Self {
        self.exported = true;
        self
    }

    /// Builder form of [`Self::set_readonly`].
    #[must_use]
    pub const fn readonly(mut self) -> Self {
        self.readonly = true;
        self
    }
}

impl Display for Variable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.value)
    }
}

/// Checks if the given name is a valid variable name.
pub fn valid_variable_name(s: &str) -> bool {
    let mut cs = s.chars();
    match cs.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            cs.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        Some(_) | None => false,
    }
}
