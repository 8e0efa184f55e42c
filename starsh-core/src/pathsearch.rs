//! Path searching utilities.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use crate::sys::PathExt;

/// Iterates over the executables with a given file name in a list of directories.
pub struct ExecutablePathSearch {
    dirs: VecDeque<PathBuf>,
    filename: String,
}

impl Iterator for ExecutablePathSearch {
    type Item = PathBuf;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(dir) = self.dirs.pop_front() {
            let path = dir.join(&self.filename);
            if path.is_file() && path.as_path().executable() {
                return Some(path);
            }
        }

        None
    }
}

/// Searches a `PATH`-style list for an executable.
///
/// Empty entries stand for the working directory; relative entries are resolved
/// against it.
///
/// # Arguments
///
/// * `search_path` - The directory list, separated the platform's way.
/// * `filename` - The executable's file name.
/// * `working_dir` - Directory relative entries resolve against.
pub fn search_for_executable(
    search_path: &str,
    filename: &str,
    working_dir: &Path,
) -> ExecutablePathSearch {
    let dirs = std::env::split_paths(search_path)
        .map(|dir| {
            if dir.as_os_str().is_empty() {
                working_dir.to_path_buf()
            } else {
                working_dir.join(dir)
            }
        })
        .collect();

    ExecutablePathSearch {
        dirs,
        filename: filename.to_owned(),
    }
}

/// Finds the program a command name refers to.
///
/// Names containing a path separator are used as given, resolved against the
/// working directory, and are returned whenever they exist so that permission
/// problems surface when spawning. Other names are looked up in `search_path`,
/// or in a platform default list when it is `None`.
///
/// # Arguments
///
/// * `name` - The command name.
/// * `search_path` - The value of `PATH`, if set.
/// * `working_dir` - The working directory.
pub fn find_executable(
    name: &str,
    search_path: Option<&str>,
    working_dir: &Path,
) -> Option<PathBuf> {
    if name.is_empty() {
        return None;
    }

    if name.contains('/') || name.contains(std::path::MAIN_SEPARATOR) {
        let path = working_dir.join(name);
        return path.exists().then_some(path);
    }

    let search_path = search_path.unwrap_or(crate::sys::platform::DEFAULT_SEARCH_PATH);
    search_for_executable(search_path, name, working_dir).next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use pretty_assertions::assert_eq;

    #[cfg(unix)]
    fn make_executable(path: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;
        std::fs::write(path, "#!/bin/sh\nexit 0\n")?;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn searches_in_order() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::create_dir(dir.path().join("first"))?;
        std::fs::create_dir(dir.path().join("second"))?;
        make_executable(&dir.path().join("second/tool"))?;
        std::fs::write(dir.path().join("first/tool"), "not executable")?;

        let found = find_executable("tool", Some("first:second"), dir.path());
        assert_eq!(found, Some(dir.path().join("second/tool")));
        assert_eq!(find_executable("missing", Some("first:second"), dir.path()), None);
        Ok(())
    }

    #[test]
    fn names_with_separators_skip_search() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("script"), "")?;

        assert_eq!(
            find_executable("./script", Some(""), dir.path()),
            Some(dir.path().join("./script"))
        );
        assert_eq!(find_executable("./absent", None, dir.path()), None);
        assert_eq!(find_executable("", None, dir.path()), None);
        Ok(())
    }
}
