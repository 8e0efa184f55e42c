//! Trace utilities

/// Trace category for command execution.
pub const COMMANDS: &str = "commands";
/// Trace category for function workers.
pub const FUNCTIONS: &str = "functions";
/// Trace category for parsing.
pub const PARSE: &str = "parse";
/// Trace category for pipeline construction and teardown.
pub const PIPELINE: &str = "pipeline";
/// Trace category for stream pumps and redirection.
pub const STREAMS: &str = "streams";
