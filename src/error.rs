//! Error taxonomy of the shell core.
//!
//! Every failure is recovered at line granularity: the read-eval loop prints the
//! error and re-prompts. Only an explicit exit request or end-of-input stops it.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// The input line could not be turned into a pipeline. No process is launched.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// A `|` without a command on one of its sides, or a stage with no command name.
    #[error("syntax error: {0}")]
    MalformedPipeline(String),
    /// A redirect operator without a usable target.
    #[error("syntax error: `{0}` needs a file name as target")]
    MalformedRedirect(String),
    /// An opening quote that is never closed.
    #[error("syntax error: unterminated quote in `{0}`")]
    MalformedQuote(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("{0}: command not found")]
    NotFound(String),
}

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("{}: {source}", path.display())]
    RedirectFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{name}: cannot create process: {source}")]
    ForkFailed {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("{name}: cannot execute: {source}")]
    ExecFailed {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("{name}: cannot wait for process: {source}")]
    WaitFailed {
        name: String,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BuiltinError {
    #[error("{0}: builtin cannot be used in a pipeline")]
    BuiltinInPipeline(String),
}

/// Anything that aborts the processing of one input line.
#[derive(Debug, Error)]
pub enum ShellError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error(transparent)]
    Launch(#[from] LaunchError),
    #[error(transparent)]
    Builtin(#[from] BuiltinError),
}

pub type Result<T, E = ShellError> = std::result::Result<T, E>;
