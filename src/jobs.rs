//! Bookkeeping for pipelines launched in the background.
//!
//! Background children are never waited for on launch. The read-eval loop calls
//! [`JobTable::reap`] before each prompt, which polls every child without blocking
//! and hands back the jobs whose stages have all terminated.

use crate::executor::Status;
use std::fmt;
use std::io;
use std::process::{Child, ExitStatus};

pub type JobId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProcessState {
    Running,
    Done(ExitStatus),
    /// `try_wait` failed; the process is given up on and counts as terminated.
    Lost,
}

impl ProcessState {
    fn after_poll(pid: u32, polled: io::Result<Option<ExitStatus>>) -> Self {
        match polled {
            Ok(Some(status)) => ProcessState::Done(status),
            Ok(None) => ProcessState::Running,
            Err(e) => {
                tracing::warn!(pid, error = %e, "cannot poll background process, dropping it");
                ProcessState::Lost
            }
        }
    }
}

#[derive(Debug)]
struct Process {
    child: Child,
    state: ProcessState,
}

#[derive(Debug)]
pub struct Job {
    pub id: JobId,
    /// The pipeline as typed, for reports.
    pub description: String,
    processes: Vec<Process>,
}

impl Job {
    pub fn pids(&self) -> Vec<u32> {
        self.processes.iter().map(|p| p.child.id()).collect()
    }

    fn is_terminated(&self) -> bool {
        self.processes
            .iter()
            .all(|p| p.state != ProcessState::Running)
    }

    /// Poll every running stage once.
    fn poll(&mut self) {
        for process in self
            .processes
            .iter_mut()
            .filter(|p| p.state == ProcessState::Running)
        {
            process.state = ProcessState::after_poll(process.child.id(), process.child.try_wait());
        }
    }

    /// Status of the last stage; meaningful once the job has terminated. A lost
    /// stage reports `-1`.
    fn status(&self) -> Option<Status> {
        match self.processes.last()?.state {
            ProcessState::Running => None,
            ProcessState::Done(status) => Some(Status::from(status)),
            ProcessState::Lost => Some(Status::Exited(-1)),
        }
    }
}

/// A background job that has terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedJob {
    pub id: JobId,
    pub description: String,
    pub status: Status,
}

impl fmt::Display for FinishedJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.status {
            Status::Exited(0) => "Done".to_string(),
            Status::Exited(code) => format!("Exit {}", code),
            Status::Signaled(signal) => format!("Signal {}", signal),
            Status::Launched(_) => "Running".to_string(),
        };
        write!(f, "[{}] {}\t{}", self.id, state, self.description)
    }
}

#[derive(Debug, Default)]
pub struct JobTable {
    jobs: Vec<Job>,
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Register the children of a freshly launched pipeline under the smallest id
    /// above every id in use.
    pub fn push(&mut self, description: String, children: Vec<Child>) -> &Job {
        let id = self.jobs.iter().map(|j| j.id).max().unwrap_or(0) + 1;
        let processes = children
            .into_iter()
            .map(|child| Process {
                child,
                state: ProcessState::Running,
            })
            .collect();
        self.jobs.push(Job {
            id,
            description,
            processes,
        });
        tracing::info!(job = id, "background job launched");
        &self.jobs[self.jobs.len() - 1]
    }

    pub fn get(&self, id: JobId) -> Option<&Job> {
        self.jobs.iter().find(|j| j.id == id)
    }

    /// Remove and return every job whose processes have all terminated.
    pub fn reap(&mut self) -> Vec<FinishedJob> {
        for job in &mut self.jobs {
            job.poll();
        }

        let mut finished = Vec::new();
        let mut running = Vec::with_capacity(self.jobs.len());
        for job in self.jobs.drain(..) {
            match job.status() {
                Some(status) if job.is_terminated() => {
                    tracing::info!(job = job.id, ?status, "background job finished");
                    finished.push(FinishedJob {
                        id: job.id,
                        description: job.description,
                        status,
                    });
                }
                _ => running.push(job),
            }
        }
        self.jobs = running;
        finished
    }
}
