//! Implements the variable environment of an execution context.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use crate::error;
use crate::variables::Variable;

/// Name of the variable tracking the working directory.
pub const PWD: &str = "PWD";

/// Scoped name/value storage with export and read-only flags, plus the working
/// directory processes are started in.
#[derive(Clone, Debug)]
pub struct Environment {
    /// Variables, in insertion order.
    variables: IndexMap<String, Variable>,
    /// Directory relative paths are resolved against.
    working_dir: PathBuf,
}

impl Default for Environment {
    fn default() -> Self {
        Self::new(".")
    }
}

impl Environment {
    /// Returns a new, empty environment.
    ///
    /// # Arguments
    ///
    /// * `working_dir` - The initial working directory.
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            variables: IndexMap::new(),
            working_dir: working_dir.into(),
        }
    }

    /// Returns an environment holding the given variables, all marked exported.
    ///
    /// # Arguments
    ///
    /// * `vars` - Name/value pairs, typically the host process environment.
    /// * `working_dir` - The initial working directory.
    pub fn from_host(
        vars: impl IntoIterator<Item = (String, String)>,
        working_dir: impl Into<PathBuf>,
    ) -> Self {
        let mut env = Self::new(working_dir);
        for (name, value) in vars {
            env.variables.insert(name, Variable::new(value).exported());
        }
        env
    }

    /// Retrieves the variable with the given name.
    pub fn get(&self, name: &str) -> Option<&Variable> {
        self.variables.get(name)
    }

    /// Retrieves the value of the variable with the given name.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.variables.get(name).map(Variable::value)
    }

    /// Returns whether a variable with the given name is set.
    pub fn is_set(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    /// Returns whether the named variable is exported.
    pub fn is_exported(&self, name: &str) -> bool {
        self.variables.get(name).is_some_and(Variable::is_exported)
    }

    /// Returns whether the named variable is read-only.
    pub fn is_readonly(&self, name: &str) -> bool {
        self.variables.get(name).is_some_and(Variable::is_readonly)
    }

    /// Sets a variable's value, creating it if needed.
    ///
    /// An existing variable keeps its export flag unless `export` is set.
    ///
    /// # Arguments
    ///
    /// * `name` - The name of the variable.
    /// * `value` - The new value.
    /// * `export` - Whether to mark the variable exported.
    pub fn set(
        &mut self,
        name: &str,
        value: impl Into<String>,
        export: bool,
    ) -> Result<(), error::Error> {
        let var = self.writable_entry(name)?;
        var.set_value(value);
        if export {
            var.set_exported(true);
        }
        Ok(())
    }

    /// Appends to a variable's value, creating it if needed.
    ///
    /// # Arguments
    ///
    /// * `name` - The name of the variable.
    /// * `value` - The text to append.
    /// * `export` - Whether to mark the variable exported.
    pub fn append(&mut self, name: &str, value: &str, export: bool) -> Result<(), error::Error> {
        let var = self.writable_entry(name)?;
        var.append_value(value);
        if export {
            var.set_exported(true);
        }
        Ok(())
    }

    fn writable_entry(&mut self, name: &str) -> Result<&mut Variable, error::Error> {
        let var = self.variables.entry(name.to_owned()).or_default();
        if var.is_readonly() {
            return Err(error::Error::ReadOnlyViolation(name.to_owned()));
        }
        Ok(var)
    }

    /// Tries to unset the variable with the given name, returning it if it existed.
    ///
    /// # Arguments
    ///
    /// * `name` - The name of the variable to unset.
    pub fn unset(&mut self, name: &str) -> Result<Option<Variable>, error::Error> {
        if self.is_readonly(name) {
            return Err(error::Error::ReadOnlyViolation(name.to_owned()));
        }
        Ok(self.variables.shift_remove(name))
    }

    /// Sets or clears the export flag of an existing variable. Returns whether the
    /// variable exists.
    ///
    /// # Arguments
    ///
    /// * `name` - The name of the variable.
    /// * `export` - The new export flag.
    pub fn export(&mut self, name: &str, export: bool) -> bool {
        match self.variables.get_mut(name) {
            Some(var) => {
                var.set_exported(export);
                true
            }
            None => false,
        }
    }

    /// Marks a variable read-only, creating it with an empty value if needed.
    pub fn set_readonly(&mut self, name: &str) {
        self.variables
            .entry(name.to_owned())
            .or_default()
            .set_readonly();
    }

    /// Iterates over all variables in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Variable)> {
        self.variables.iter()
    }

    /// Returns the exported variables as name/value pairs, with `locals` layered on
    /// top. Each name appears once; later writes win.
    ///
    /// # Arguments
    ///
    /// * `locals` - Command-scoped assignments.
    pub fn exported_with(&self, locals: &[(String, String)]) -> Vec<(String, String)> {
        let mut merged: IndexMap<&str, &str> = self
            .variables
            .iter()
            .filter(|(_, var)| var.is_exported())
            .map(|(name, var)| (name.as_str(), var.value()))
            .collect();

        for (name, value) in locals {
            merged.insert(name.as_str(), value.as_str());
        }

        merged
            .into_iter()
            .map(|(name, value)| (name.to_owned(), value.to_owned()))
            .collect()
    }

    /// Produces the `NAME=VALUE` vector handed to process creation.
    pub fn compile(&self) -> Vec<String> {
        self.compile_with(&[])
    }

    /// Produces the `NAME=VALUE` vector with command-scoped assignments layered on top.
    ///
    /// # Arguments
    ///
    /// * `locals` - Command-scoped assignments.
    pub fn compile_with(&self, locals: &[(String, String)]) -> Vec<String> {
        self.exported_with(locals)
            .into_iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect()
    }

    /// Returns a new environment seeded with value copies of this one's variables.
    ///
    /// # Arguments
    ///
    /// * `exported_only` - Copy only exported variables.
    #[must_use]
    pub fn fork(&self, exported_only: bool) -> Self {
        let variables = self
            .variables
            .iter()
            .filter(|(_, var)| !exported_only || var.is_exported())
            .map(|(name, var)| (name.clone(), var.clone()))
            .collect();

        Self {
            variables,
            working_dir: self.working_dir.clone(),
        }
    }

    /// Returns the working directory.
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Changes the working directory and updates `PWD`.
    ///
    /// # Arguments
    ///
    /// * `path` - The new directory, absolute or relative to the current one.
    pub fn set_working_dir(&mut self, path: impl AsRef<Path>) -> Result<(), error::Error> {
        let path = self.resolve_path(path);
        if !path.is_dir() {
            return Err(error::Error::NotADirectory(path));
        }

        let path = path.canonicalize().unwrap_or(path);
        self.set(PWD, path.to_string_lossy(), true)?;
        self.working_dir = path;
        Ok(())
    }

    /// Resolves a path relative to the working directory.
    pub fn resolve_path(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.working_dir.join(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use pretty_assertions::assert_eq;

    #[test]
    fn fork_copies_exported_values() -> Result<()> {
        let mut parent = Environment::default();
        parent.set("SHARED", "one", true)?;
        parent.set("PRIVATE", "hidden", false)?;

        let mut child = parent.fork(true);
        assert_eq!(child.get_str("SHARED"), Some("one"));
        assert_eq!(child.get_str("PRIVATE"), None);

        child.set("SHARED", "two", false)?;
        assert_eq!(child.get_str("SHARED"), Some("two"));
        assert_eq!(parent.get_str("SHARED"), Some("one"));
        Ok(())
    }

    #[test]
    fn full_fork_keeps_private_variables() -> Result<()> {
        let mut parent = Environment::default();
        parent.set("PRIVATE", "x", false)?;
        assert_eq!(parent.fork(false).get_str("PRIVATE"), Some("x"));
        Ok(())
    }

    #[test]
    fn readonly_rejects_writes() -> Result<()> {
        let mut env = Environment::default();
        env.set("LOCKED", "v", false)?;
        env.set_readonly("LOCKED");

        assert!(matches!(
            env.set("LOCKED", "w", false),
            Err(error::Error::ReadOnlyViolation(name)) if name == "LOCKED"
        ));
        assert!(env.unset("LOCKED").is_err());
        assert!(env.append("LOCKED", "w", false).is_err());
        assert_eq!(env.get_str("LOCKED"), Some("v"));
        assert!(env.is_readonly("LOCKED"));
        Ok(())
    }

    #[test]
    fn set_preserves_export_flag() -> Result<()> {
        let mut env = Environment::default();
        env.set("PATH", "/bin", true)?;
        env.set("PATH", "/usr/bin", false)?;
        assert!(env.is_exported("PATH"));
        assert!(env.export("PATH", false));
        assert!(!env.is_exported("PATH"));
        assert!(!env.export("MISSING", true));
        Ok(())
    }

    #[test]
    fn compile_has_one_entry_per_name() -> Result<()> {
        let mut env = Environment::default();
        env.set("A", "1", true)?;
        env.set("B", "2", true)?;
        env.set("A", "3", true)?;
        env.set("HIDDEN", "4", false)?;

        assert_eq!(env.compile(), vec!["A=3", "B=2"]);
        assert_eq!(
            env.compile_with(&[("B".into(), "5".into()), ("C".into(), "6".into())]),
            vec!["A=3", "B=5", "C=6"]
        );
        Ok(())
    }

    #[test]
    fn working_dir_must_exist() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut env = Environment::new(dir.path());
        std::fs::create_dir(dir.path().join("sub"))?;

        env.set_working_dir("sub")?;
        assert!(env.working_dir().ends_with("sub"));
        assert!(env.get_str(PWD).is_some_and(|pwd| pwd.ends_with("sub")));

        assert!(matches!(
            env.set_working_dir("missing"),
            Err(error::Error::NotADirectory(_))
        ));
        Ok(())
    }
}
