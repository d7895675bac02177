//! The core of `seashell`, a small interactive command shell.
//!
//! A line of input goes through the [`lexer`] and the [`parser`] into a
//! [`Pipeline`]. A single-stage pipeline naming a builtin is run in-process by the
//! [`Interpreter`]; anything else is handed to the [`executor`], which resolves every
//! stage through the search path ([`resolver`]), wires the stages together with
//! pipes and runs them as operating-system processes. Pipelines ending in `&` are
//! tracked in a [`jobs::JobTable`] and reaped before the next prompt.
//!
//! The public modules [`command`] and [`env`] expose the traits and types needed to
//! plug custom builtins into an [`Interpreter`].

mod builtin;
pub mod command;
pub mod config;
pub mod env;
pub mod error;
pub mod executor;
mod interpreter;
mod io_adapters;
pub mod jobs;
pub mod lexer;
pub mod parser;
pub mod resolver;

/// Just a convenient re-export of the interactive shell.
///
/// See [`Interpreter`] for the high-level API and examples.
pub use interpreter::{Interpreter, LineOutcome};

pub use config::ShellConfig;
pub use error::{BuiltinError, LaunchError, ParseError, ResolutionError, ShellError};
pub use executor::{Executor, Status};
pub use parser::{Pipeline, Redirect, Stage, WriteMode, parse_line};
