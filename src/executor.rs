//! Launching a parsed [`Pipeline`] as operating-system processes.
//!
//! Execution happens in three phases, and nothing is started unless the first two
//! succeed for every stage:
//!
//! 1. every stage name is resolved through the search path;
//! 2. every redirect target is opened;
//! 3. one pipe per adjacent pair of stages is created, then the stages are spawned
//!    left to right.
//!
//! The parent moves each pipe end into exactly one child's `Stdio` and drops its own
//! handle right after that child is spawned. Pipe ends are close-on-exec, so a child
//! only keeps the two descriptors installed as its standard streams and a reader sees
//! end-of-file as soon as its writer exits.

use crate::command::ExitCode;
use crate::env::Environment;
use crate::error::{LaunchError, Result};
use crate::io_adapters::{OutputTarget, open_stdin, open_stdout_target};
use crate::jobs::{JobId, JobTable};
use crate::parser::{Pipeline, Stage};
use crate::resolver;
use os_pipe::{PipeReader, PipeWriter};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};

/// Result of executing a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The last stage exited normally with this code.
    Exited(ExitCode),
    /// The last stage was terminated by this signal.
    Signaled(i32),
    /// The pipeline runs in the background as this job.
    Launched(JobId),
}

impl Status {
    /// Numeric status in the usual shell convention, `128 + signal` for signals.
    pub fn code(&self) -> ExitCode {
        match *self {
            Status::Exited(code) => code,
            Status::Signaled(signal) => 128 + signal,
            Status::Launched(_) => 0,
        }
    }

    pub fn success(&self) -> bool {
        self.code() == 0
    }
}

impl From<ExitStatus> for Status {
    fn from(exit_status: ExitStatus) -> Self {
        match exit_status.code() {
            Some(code) => Status::Exited(code),
            None => terminated_by_signal(exit_status),
        }
    }
}

#[cfg(unix)]
fn terminated_by_signal(exit_status: ExitStatus) -> Status {
    use std::os::unix::process::ExitStatusExt;
    match exit_status.signal() {
        Some(signal) => Status::Signaled(signal),
        None => Status::Exited(-1),
    }
}

#[cfg(not(unix))]
fn terminated_by_signal(_exit_status: ExitStatus) -> Status {
    Status::Exited(-1)
}

/// A stage that passed resolution and whose redirect targets are open.
struct PreparedStage<'p> {
    stage: &'p Stage,
    program: PathBuf,
    stdin: Option<File>,
    stdout: Option<File>,
}

pub struct Executor<'a> {
    env: &'a Environment,
}

impl<'a> Executor<'a> {
    pub fn new(env: &'a Environment) -> Self {
        Self { env }
    }

    /// Run every stage of a non-empty pipeline.
    ///
    /// A foreground pipeline is waited for and its last stage's status returned. A
    /// background pipeline is registered in `jobs` and [`Status::Launched`] returned
    /// at once.
    pub fn execute(&self, pipeline: &Pipeline, jobs: &mut JobTable) -> Result<Status> {
        if pipeline.is_empty() {
            return Ok(Status::Exited(0));
        }

        let prepared = self.prepare(pipeline)?;
        let children = self.spawn_all(prepared)?;

        if pipeline.background {
            let job = jobs.push(pipeline.to_string(), children);
            return Ok(Status::Launched(job.id));
        }

        let names = pipeline.stages.iter().map(|s| s.name.as_str());
        wait_all(names.zip(children))
    }

    /// Resolve every stage, then open every redirect. Fails on the first stage that
    /// cannot be resolved or whose redirect cannot be opened.
    ///
    /// Input targets are opened before output targets, and `>` targets are only
    /// truncated once every redirect of the pipeline is open. On failure, output
    /// files created here are removed again.
    fn prepare<'p>(&self, pipeline: &'p Pipeline) -> Result<Vec<PreparedStage<'p>>> {
        let search_path = self.env.search_path();
        let programs = pipeline
            .stages
            .iter()
            .map(|stage| -> Result<PathBuf> {
                let program = resolver::resolve(&stage.name, search_path.as_deref())?;
                tracing::debug!(name = %stage.name, program = %program.display(), "resolved");
                Ok(program)
            })
            .collect::<Result<Vec<PathBuf>>>()?;

        let stdins = pipeline
            .stages
            .iter()
            .map(|stage| open_stdin(&stage.stdin))
            .collect::<Result<Vec<_>, LaunchError>>()?;

        let mut targets: Vec<Option<OutputTarget>> = Vec::with_capacity(programs.len());
        for stage in &pipeline.stages {
            match open_stdout_target(&stage.stdout) {
                Ok(target) => targets.push(target),
                Err(e) => {
                    targets.into_iter().flatten().for_each(OutputTarget::discard);
                    return Err(e.into());
                }
            }
        }
        let stdouts = targets
            .into_iter()
            .map(|target| target.map(OutputTarget::commit).transpose())
            .collect::<Result<Vec<_>, LaunchError>>()?;

        let prepared = pipeline
            .stages
            .iter()
            .zip(programs)
            .zip(stdins.into_iter().zip(stdouts))
            .map(|((stage, program), (stdin, stdout))| PreparedStage {
                stage,
                program,
                stdin,
                stdout,
            })
            .collect();
        Ok(prepared)
    }

    fn spawn_all(&self, prepared: Vec<PreparedStage<'_>>) -> Result<Vec<Child>> {
        let (mut readers, mut writers) = make_pipes(&prepared)?;
        let mut children = Vec::with_capacity(prepared.len());

        for (i, stage) in prepared.into_iter().enumerate() {
            let name = stage.stage.name.clone();
            let upstream = readers[i].take();
            let downstream = writers[i].take();

            // An explicit redirect takes priority over the pipe, whose end is then
            // dropped here so the neighbour sees end-of-file or a broken pipe.
            let stdin = match (stage.stdin, upstream) {
                (Some(file), _) => Stdio::from(file),
                (None, Some(reader)) => Stdio::from(reader),
                (None, None) => Stdio::inherit(),
            };
            let stdout = match (stage.stdout, downstream) {
                (Some(file), _) => Stdio::from(file),
                (None, Some(writer)) => Stdio::from(writer),
                (None, None) => Stdio::inherit(),
            };

            match self.spawn_stage(stage.stage, &stage.program, stdin, stdout) {
                Ok(child) => {
                    tracing::debug!(name = %name, pid = child.id(), "spawned stage");
                    children.push(child);
                }
                Err(source) => {
                    tracing::warn!(name = %name, error = %source, "launch failed, aborting pipeline");
                    drop(readers);
                    drop(writers);
                    abort(children);
                    return Err(launch_error(name, source).into());
                }
            }
        }

        Ok(children)
    }

    fn spawn_stage(
        &self,
        stage: &Stage,
        program: &Path,
        stdin: Stdio,
        stdout: Stdio,
    ) -> io::Result<Child> {
        let mut command = Command::new(program);
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.arg0(&stage.name);
        }
        command
            .args(&stage.args)
            .stdin(stdin)
            .stdout(stdout)
            .envs(self.env.vars.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir(&self.env.current_dir)
            .spawn()
    }
}

type PipeEnds = (Vec<Option<PipeReader>>, Vec<Option<PipeWriter>>);

/// `readers[i]` feeds stage `i`, `writers[i]` is written by stage `i`.
fn make_pipes(prepared: &[PreparedStage<'_>]) -> Result<PipeEnds> {
    let count = prepared.len();
    let mut readers = Vec::with_capacity(count);
    let mut writers = Vec::with_capacity(count);
    readers.push(None);
    for stage in &prepared[..count.saturating_sub(1)] {
        let (reader, writer) = os_pipe::pipe().map_err(|source| LaunchError::ForkFailed {
            name: stage.stage.name.clone(),
            source,
        })?;
        readers.push(Some(reader));
        writers.push(Some(writer));
    }
    writers.push(None);
    Ok((readers, writers))
}

fn launch_error(name: String, source: io::Error) -> LaunchError {
    match source.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::OutOfMemory => {
            LaunchError::ForkFailed { name, source }
        }
        _ => LaunchError::ExecFailed { name, source },
    }
}

/// Kill and reap the stages already started for a pipeline that failed to launch.
fn abort(children: Vec<Child>) {
    for mut child in children {
        let _ = child.kill();
        let _ = child.wait();
    }
}

/// Wait for every stage in order and report the last one's status.
fn wait_all<'n>(stages: impl Iterator<Item = (&'n str, Child)>) -> Result<Status> {
    let mut last = Status::Exited(0);
    let mut first_error = None;
    for (name, mut child) in stages {
        match child.wait() {
            Ok(exit_status) => last = Status::from(exit_status),
            Err(source) => {
                first_error.get_or_insert(LaunchError::WaitFailed {
                    name: name.to_string(),
                    source,
                });
            }
        }
    }
    match first_error {
        Some(e) => Err(e.into()),
        None => Ok(last),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::error::{ResolutionError, ShellError};
    use crate::parser::parse_line;
    use std::fs;
    use std::thread::sleep;
    use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

    struct Scratch {
        dir: PathBuf,
    }

    impl Scratch {
        fn new(tag: &str) -> Self {
            let nanos = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_nanos();
            let dir = std::env::temp_dir().join(format!(
                "executor_{}_{}_{}",
                tag,
                std::process::id(),
                nanos
            ));
            fs::create_dir_all(&dir).unwrap();
            Scratch { dir }
        }

        fn path(&self, name: &str) -> String {
            self.dir.join(name).to_string_lossy().to_string()
        }

        fn read(&self, name: &str) -> String {
            fs::read_to_string(self.dir.join(name)).unwrap()
        }
    }

    impl Drop for Scratch {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.dir);
        }
    }

    /// Other tests move the process working directory around; children here run in
    /// a directory that always exists.
    fn test_env() -> Environment {
        let mut env = Environment::default();
        env.current_dir = std::env::temp_dir();
        env
    }

    fn run(line: &str) -> Result<Status> {
        let env = test_env();
        let mut jobs = JobTable::new();
        let pipeline = parse_line(line).unwrap();
        Executor::new(&env).execute(&pipeline, &mut jobs)
    }

    #[test]
    fn test_two_stage_pipeline_transforms_output() {
        let tmp = Scratch::new("upper");
        let status = run(&format!("printf hello | tr a-z A-Z > {}", tmp.path("out"))).unwrap();
        assert_eq!(status, Status::Exited(0));
        assert_eq!(tmp.read("out"), "HELLO");
    }

    #[test]
    fn test_input_redirect_and_append() {
        let tmp = Scratch::new("redirects");
        fs::write(tmp.dir.join("in"), "b\na\n").unwrap();
        fs::write(tmp.dir.join("out"), "first\n").unwrap();
        let status = run(&format!("sort < {} >> {}", tmp.path("in"), tmp.path("out"))).unwrap();
        assert!(status.success());
        assert_eq!(tmp.read("out"), "first\na\nb\n");
    }

    #[test]
    fn test_last_stage_status_is_reported() {
        assert_eq!(run("false | true").unwrap(), Status::Exited(0));
        assert_eq!(run("true | false").unwrap(), Status::Exited(1));
        assert_eq!(run("sh -c \"exit 7\"").unwrap(), Status::Exited(7));
    }

    #[test]
    fn test_signaled_stage() {
        let status = run("sh -c \"kill -9 $$\"").unwrap();
        assert_eq!(status, Status::Signaled(9));
        assert_eq!(status.code(), 137);
    }

    #[test]
    fn test_reader_sees_eof_when_writer_exits() {
        let tmp = Scratch::new("eof");
        let status = run(&format!("yes | head -n 2 > {}", tmp.path("out"))).unwrap();
        assert_eq!(status, Status::Exited(0));
        assert_eq!(tmp.read("out"), "y\ny\n");
    }

    #[test]
    fn test_middle_redirect_leaves_next_stage_empty_input() {
        let tmp = Scratch::new("middle");
        let line = format!(
            "printf abc > {} | wc -c > {}",
            tmp.path("mid"),
            tmp.path("count")
        );
        assert_eq!(run(&line).unwrap(), Status::Exited(0));
        assert_eq!(tmp.read("mid"), "abc");
        assert_eq!(tmp.read("count").trim(), "0");
    }

    #[test]
    fn test_unknown_command_launches_nothing() {
        let tmp = Scratch::new("notfound");
        let marker = tmp.path("marker");
        let err = run(&format!("touch {} | nosuchcmd123", marker)).unwrap_err();
        match err {
            ShellError::Resolution(ResolutionError::NotFound(name)) => {
                assert_eq!(name, "nosuchcmd123")
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(!Path::new(&marker).exists());
    }

    #[test]
    fn test_first_unresolved_stage_is_named() {
        let err = run("nosuchcmd1 | nosuchcmd2").unwrap_err();
        assert!(matches!(
            err,
            ShellError::Resolution(ResolutionError::NotFound(ref name)) if name == "nosuchcmd1"
        ));
    }

    #[test]
    fn test_failed_redirect_aborts_whole_pipeline() {
        let tmp = Scratch::new("badredirect");
        let marker = tmp.path("marker");
        let line = format!("touch {} | cat < {}", marker, tmp.path("missing/input"));
        match run(&line).unwrap_err() {
            ShellError::Launch(LaunchError::RedirectFailed { path, .. }) => {
                assert!(path.ends_with("missing/input"))
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(!Path::new(&marker).exists());
    }

    #[test]
    fn test_aborted_pipeline_keeps_existing_output_file() {
        let tmp = Scratch::new("keep");
        let keep = tmp.path("keep.txt");
        fs::write(&keep, "precious\n").unwrap();

        let line = format!("printf x > {} | cat < {}", keep, tmp.path("missing/in"));
        assert!(matches!(
            run(&line).unwrap_err(),
            ShellError::Launch(LaunchError::RedirectFailed { .. })
        ));
        assert_eq!(tmp.read("keep.txt"), "precious\n");

        let line = format!("printf x > {} | cat > {}", keep, tmp.path("missing/out"));
        assert!(run(&line).is_err());
        assert_eq!(tmp.read("keep.txt"), "precious\n");
    }

    #[test]
    fn test_aborted_pipeline_creates_no_output_file() {
        let tmp = Scratch::new("nocreate");
        let fresh = tmp.path("fresh.txt");
        let line = format!("printf x >> {} | cat > {}", fresh, tmp.path("missing/out"));
        assert!(run(&line).is_err());
        assert!(!Path::new(&fresh).exists());
    }

    #[test]
    fn test_stage_runs_in_environment_directory() {
        let tmp = Scratch::new("cwd");
        let mut env = Environment::default();
        env.current_dir = tmp.dir.clone();
        let pipeline = parse_line(&format!("pwd > {}", tmp.path("where"))).unwrap();
        Executor::new(&env)
            .execute(&pipeline, &mut JobTable::new())
            .unwrap();
        let reported = fs::canonicalize(tmp.read("where").trim()).unwrap();
        assert_eq!(reported, fs::canonicalize(&tmp.dir).unwrap());
    }

    #[test]
    fn test_environment_overrides_reach_children() {
        let tmp = Scratch::new("vars");
        let mut env = test_env();
        env.set_var("SEASHELL_TEST_VALUE", "42");
        let line = format!("sh -c \"echo $SEASHELL_TEST_VALUE\" > {}", tmp.path("out"));
        let pipeline = parse_line(&line).unwrap();
        Executor::new(&env)
            .execute(&pipeline, &mut JobTable::new())
            .unwrap();
        assert_eq!(tmp.read("out"), "42\n");
    }

    #[test]
    fn test_background_returns_immediately_and_is_reaped() {
        let env = test_env();
        let mut jobs = JobTable::new();
        let pipeline = parse_line("sh -c \"sleep 0.2; exit 4\" &").unwrap();

        let started = Instant::now();
        let status = Executor::new(&env).execute(&pipeline, &mut jobs).unwrap();
        assert!(started.elapsed() < Duration::from_millis(200));
        let Status::Launched(id) = status else {
            panic!("expected a background job, got {:?}", status);
        };
        assert_eq!(jobs.get(id).unwrap().pids().len(), 1);

        let deadline = Instant::now() + Duration::from_secs(10);
        let finished = loop {
            let finished = jobs.reap();
            if !finished.is_empty() || Instant::now() > deadline {
                break finished;
            }
            sleep(Duration::from_millis(20));
        };
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].id, id);
        assert_eq!(finished[0].status, Status::Exited(4));
    }

    #[test]
    fn test_empty_pipeline_is_a_no_op() {
        assert_eq!(run("").unwrap(), Status::Exited(0));
    }
}
