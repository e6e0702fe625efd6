//! Sandboxed multi-module script engine for canvas notebooks.
//!
//! A notebook script may import from sibling scripts. The [`bundler`]
//! rewrites every fragment into a wrapped body, the [`harness`] stitches them
//! into one generated unit and evaluates it with the embedded
//! [`interpreter`], and [`errors`] maps failures back onto the fragment that
//! caused them. [`engine`] ties it together behind the run, test and
//! introspection surfaces.

pub mod bundler;
pub mod capabilities;
pub mod config;
pub mod engine;
pub mod errors;
pub mod harness;
pub mod interpreter;
pub mod parser;
pub mod resolver;
pub mod symbols;

pub use bundler::{Bundle, Bundler, Module};
pub use capabilities::{Capabilities, CanvasHost, NoCanvas};
pub use config::{ConfigError, ConfigSource, EngineConfig};
pub use engine::{
    Engine, IntrospectRequest, IntrospectionResponse, Output, Response, RunRequest, ScriptRequest,
    TestRequest, failure_report,
};
pub use errors::{ExecutionError, RuntimeError, SourceRegion, WrappedError};
pub use harness::{ScriptResult, UnitTestOutcome};
pub use interpreter::LogEntry;
