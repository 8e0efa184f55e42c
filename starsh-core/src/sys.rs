//! Platform abstraction facilities

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        pub(crate) mod unix;
        pub(crate) use unix as platform;
    } else {
        pub(crate) mod stubs;
        pub(crate) use stubs as platform;
    }
}

/// Extension methods for paths.
pub(crate) trait PathExt {
    /// Returns whether the path names a file the current user may execute.
    fn executable(&self) -> bool;
}
