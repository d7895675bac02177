use crate::command::{BuiltinStatus, CommandFactory, ExitCode};
use crate::config::{SYSTEM_NAME, ShellConfig};
use crate::env::Environment;
use crate::error::{BuiltinError, Result};
use crate::executor::{Executor, Status};
use crate::io_adapters::BuiltinOutput;
use crate::jobs::{FinishedJob, JobTable};
use crate::lexer::is_blank;
use crate::parser::{Pipeline, parse_line};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::fs;
use std::io::{self, Write};

/// Factory allows creating instances of builtin commands.
///
/// Only supports commands defined in this crate, see `BuiltinCommand`.
pub(crate) struct Factory<T> {
    _phantom: std::marker::PhantomData<T>,
}

impl<T> Default for Factory<T> {
    fn default() -> Self {
        Self {
            _phantom: std::marker::PhantomData,
        }
    }
}

/// What became of one input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome {
    /// Nothing to run.
    Idle,
    /// A builtin ran in-process with this status.
    Builtin(ExitCode),
    /// The line was run as a process pipeline.
    Pipeline(Status),
    /// The line ended in `?`. Nothing ran; the text before the `?` is handed back so
    /// the editor can offer it again.
    Autocomplete(String),
    /// A builtin asked the shell to stop.
    Exit,
}

/// The shell: parses lines, runs builtins in-process and hands everything else to
/// the [`Executor`].
///
/// The interpreter owns an [`Environment`], the set of [`CommandFactory`] objects
/// queried for builtins by name, and the table of background jobs. See [`Default`]
/// for the builtins included out of the box.
///
/// Example
/// ```
/// use seashell::{Interpreter, LineOutcome};
/// let mut sh = Interpreter::default();
/// let outcome = sh.run_line("exit", &mut std::io::sink()).unwrap();
/// assert_eq!(outcome, LineOutcome::Exit);
/// ```
pub struct Interpreter {
    env: Environment,
    commands: Vec<Box<dyn CommandFactory>>,
    jobs: JobTable,
}

impl Interpreter {
    /// Create a new interpreter with a custom set of command factories.
    pub fn new(config: ShellConfig, commands: Vec<Box<dyn CommandFactory>>) -> Self {
        Self {
            env: Environment::new(config),
            commands,
            jobs: JobTable::new(),
        }
    }

    /// Create an interpreter with the default builtins and the given configuration.
    pub fn with_config(config: ShellConfig) -> Self {
        Self::new(config, default_commands())
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn env_mut(&mut self) -> &mut Environment {
        &mut self.env
    }

    fn is_builtin(&self, name: &str) -> bool {
        self.commands.iter().any(|f| f.name() == name)
    }

    /// Parse and run one line.
    ///
    /// Builtin output goes to `stdout` unless the stage redirects it; external
    /// processes write to the inherited standard streams or their redirect targets.
    pub fn run_line(&mut self, line: &str, stdout: &mut dyn Write) -> Result<LineOutcome> {
        let pipeline = parse_line(line)?;

        if pipeline.request_autocomplete {
            let text = line.trim_matches(is_blank);
            let text = text.strip_suffix('?').unwrap_or(text);
            return Ok(LineOutcome::Autocomplete(text.to_string()));
        }
        if pipeline.is_empty() {
            return Ok(LineOutcome::Idle);
        }

        if let Some(outcome) = self.dispatch_builtin(&pipeline, stdout)? {
            return Ok(outcome);
        }

        tracing::debug!(pipeline = %pipeline, "executing");
        let status = Executor::new(&self.env).execute(&pipeline, &mut self.jobs)?;
        Ok(LineOutcome::Pipeline(status))
    }

    /// Run a single-stage pipeline whose name is a builtin. `None` means the line is
    /// for the executor.
    fn dispatch_builtin(
        &mut self,
        pipeline: &Pipeline,
        stdout: &mut dyn Write,
    ) -> Result<Option<LineOutcome>> {
        if pipeline.stages.len() > 1 {
            if let Some(stage) = pipeline.stages.iter().find(|s| self.is_builtin(&s.name)) {
                return Err(BuiltinError::BuiltinInPipeline(stage.name.clone()).into());
            }
            return Ok(None);
        }

        let stage = &pipeline.stages[0];
        let args: Vec<&str> = stage.args.iter().map(String::as_str).collect();
        let Some(cmd) = self
            .commands
            .iter()
            .find_map(|factory| factory.try_create(&stage.name, &args))
        else {
            return Ok(None);
        };

        let mut out = BuiltinOutput::new(&stage.stdout, stdout)?;
        tracing::debug!(builtin = %stage.name, background = pipeline.background, "running builtin");
        match cmd.execute(&mut out, &mut self.env, pipeline.background) {
            Ok(BuiltinStatus::Success) => Ok(Some(LineOutcome::Builtin(0))),
            Ok(BuiltinStatus::Exit) => Ok(Some(LineOutcome::Exit)),
            Ok(BuiltinStatus::NotHandled) => Ok(None),
            Err(e) => {
                eprintln!("-{}: {}: {:#}", SYSTEM_NAME, stage.name, e);
                Ok(Some(LineOutcome::Builtin(1)))
            }
        }
    }

    /// Collect the background jobs that have finished since the last call.
    pub fn reap_jobs(&mut self) -> Vec<FinishedJob> {
        self.jobs.reap()
    }

    /// Run one line against the real standard streams and report what happened the
    /// way the prompt does. `None` means the line failed and the error was printed.
    pub fn eval(&mut self, line: &str) -> Option<LineOutcome> {
        let mut stdout = io::stdout();
        let outcome = match self.run_line(line, &mut stdout) {
            Ok(outcome) => outcome,
            Err(e) => {
                eprintln!("-{}: {}", SYSTEM_NAME, e);
                return None;
            }
        };
        let _ = stdout.flush();

        if let LineOutcome::Pipeline(status) = &outcome {
            match status {
                Status::Launched(id) => {
                    if let Some(job) = self.jobs.get(*id) {
                        let pids: Vec<String> = job.pids().iter().map(u32::to_string).collect();
                        println!("[{}] {}", id, pids.join(" "));
                    }
                }
                status if !status.success() => {
                    eprintln!("-{}: exit status {}", SYSTEM_NAME, status.code());
                }
                _ => {}
            }
        }
        Some(outcome)
    }

    fn prompt(&self) -> String {
        let user = self.env.get_var("USER").unwrap_or_else(|| "user".to_string());
        format!(
            "{}@{}:{} {}$ ",
            user,
            hostname(),
            self.env.current_dir.display(),
            SYSTEM_NAME
        )
    }

    /// Read-eval loop on top of `rustyline`. Returns on end-of-input or `exit`.
    pub fn repl(&mut self) -> rustyline::Result<()> {
        let mut rl = DefaultEditor::new()?;
        let mut initial = String::new();

        loop {
            for job in self.reap_jobs() {
                println!("{}", job);
            }

            let prompt = self.prompt();
            let readline = if initial.is_empty() {
                rl.readline(&prompt)
            } else {
                rl.readline_with_initial(&prompt, (initial.as_str(), ""))
            };
            initial.clear();

            match readline {
                Ok(line) => {
                    if !line.trim().is_empty() {
                        rl.add_history_entry(line.as_str())?;
                    }
                    match self.eval(&line) {
                        Some(LineOutcome::Exit) => break,
                        Some(LineOutcome::Autocomplete(text)) => initial = text,
                        _ => {}
                    }
                }
                Err(ReadlineError::Interrupted) => continue,
                Err(ReadlineError::Eof) => break,
                Err(err) => return Err(err),
            }
        }

        Ok(())
    }
}

fn hostname() -> String {
    fs::read_to_string("/proc/sys/kernel/hostname")
        .ok()
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok())
        .unwrap_or_else(|| "localhost".to_string())
}

/// The builtins: `exit`, `cd`, `shortdir`, `highlight` and `kdiff`.
fn default_commands() -> Vec<Box<dyn CommandFactory>> {
    use crate::builtin::*;
    vec![
        Box::new(Factory::<Exit>::default()),
        Box::new(Factory::<Cd>::default()),
        Box::new(Factory::<Shortdir>::default()),
        Box::new(Factory::<Highlight>::default()),
        Box::new(Factory::<Kdiff>::default()),
    ]
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::with_config(ShellConfig::default())
    }
}
