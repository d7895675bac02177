use crate::config::ShellConfig;
use std::collections::HashMap;
use std::env as stdenv;
use std::ffi::OsString;
use std::path::PathBuf;

/// Mutable, user-level view of the process environment used by the interpreter.
///
/// The environment contains:
/// - `vars`: variables set through the shell, layered over the live process
///   environment and passed on to every launched process.
/// - `current_dir`: the working directory for command execution.
/// - `config`: session settings.
///
/// Lookups fall through to the process environment at call time, so a `PATH`
/// changed mid-session is seen by the next resolution.
#[derive(Debug, Clone)]
pub struct Environment {
    pub vars: HashMap<String, String>,
    pub current_dir: PathBuf,
    pub config: ShellConfig,
}

impl Environment {
    /// Capture the current working directory into a new `Environment`.
    pub fn new(config: ShellConfig) -> Self {
        let current_dir = stdenv::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self {
            vars: HashMap::new(),
            current_dir,
            config,
        }
    }

    /// Get the value of a variable, preferring shell-set values over the process
    /// environment.
    pub fn get_var(&self, key: &str) -> Option<String> {
        self.vars
            .get(key)
            .cloned()
            .or_else(|| stdenv::var(key).ok())
    }

    /// Set or override a variable in `self.vars`.
    pub fn set_var(&mut self, key: impl Into<String>, val: impl Into<String>) {
        self.vars.insert(key.into(), val.into());
    }

    /// The executable search path, read now.
    pub fn search_path(&self) -> Option<OsString> {
        match self.vars.get("PATH") {
            Some(path) => Some(OsString::from(path)),
            None => stdenv::var_os("PATH"),
        }
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new(ShellConfig::default())
    }
}
