//! Execution engine of the starsh command language. Implements variable scopes,
//! stream tables, execution contexts, in-process functions, OS process launching
//! and the pipelines that connect them.

pub mod builtins;
mod config;
mod context;
pub mod env;
mod error;
mod executive;
pub mod functions;
mod interp;
mod pathsearch;
mod pipeline;
mod pump;
mod redirects;
mod shell;
pub mod streams;
mod sys;
mod trace_categories;
pub mod variables;

pub use config::{LINE_SEPARATOR, NATIVE_LINE_SEPARATOR, ShellConfig};
pub use context::{ContextKind, ContextState, ExecutionContext};
pub use env::Environment;
pub use error::Error;
pub use executive::{Executive, Invocation, StreamSpec, Target};
pub use functions::{
    Function, FunctionCall, FunctionFactory, FunctionMonitor, FunctionTable, simple_function,
};
pub use interp::Interpreter;
pub use pathsearch::{ExecutablePathSearch, find_executable, search_for_executable};
pub use pipeline::{RunningPipeline, StagePlan, start_pipeline};
pub use pump::{Pump, spawn_pump};
pub use redirects::apply_redirects;
pub use shell::{Captured, Shell};
pub use streams::{OutputBuffer, Stream, StreamKind, StreamTable, pipe};
