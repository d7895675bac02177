use crate::env::Environment;
use anyhow::Result;
use std::io::Write;

/// Conventional process exit code type used by this crate.
///
/// A value of 0 indicates success; any non-zero value indicates failure.
pub type ExitCode = i32;

/// What a builtin handler reports back to the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinStatus {
    /// The builtin ran; the line is done.
    Success,
    /// The shell should leave its read-eval loop.
    Exit,
    /// The builtin declined; the line goes on to the process executor.
    NotHandled,
}

/// Object-safe trait for a builtin invocation ready to run in-process.
pub trait ExecutableCommand {
    /// Executes the command, writing its output to `stdout`.
    ///
    /// `background` is the line's `&` flag; builtins always run to completion in the
    /// shell process whatever its value.
    fn execute(
        self: Box<Self>,
        stdout: &mut dyn Write,
        env: &mut Environment,
        background: bool,
    ) -> Result<BuiltinStatus>;
}

/// Factory that tries to create a builtin from a name and its arguments.
///
/// Returns `None` when the factory doesn't recognize the `name`.
pub trait CommandFactory {
    /// Name the factory answers to.
    fn name(&self) -> &'static str;

    /// Attempt to create a command instance for the provided name and arguments.
    fn try_create(&self, name: &str, args: &[&str]) -> Option<Box<dyn ExecutableCommand>>;
}
