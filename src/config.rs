use std::env;
use std::path::PathBuf;

/// Environment variable naming the bookmark store used by `shortdir`.
pub const SHORTDIR_FILE_VAR: &str = "SEASHELL_SHORTDIRS";
/// Environment variable holding the `tracing` filter directives.
pub const LOG_FILTER_VAR: &str = "SEASHELL_LOG";

/// Name shown in the prompt and used as prefix of error messages.
pub const SYSTEM_NAME: &str = "seashell";

/// Settings fixed for the lifetime of one shell session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellConfig {
    /// File holding the `shortdir` bookmarks, one `name -> path` entry per line.
    pub shortdir_file: PathBuf,
    /// Default log filter used when [`LOG_FILTER_VAR`] is not set.
    pub log_filter: String,
}

impl ShellConfig {
    /// Build the configuration from the process environment.
    pub fn from_env() -> Self {
        let shortdir_file = env::var_os(SHORTDIR_FILE_VAR)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_shortdir_file);
        Self {
            shortdir_file,
            log_filter: "warn".to_string(),
        }
    }

    pub fn with_shortdir_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.shortdir_file = path.into();
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        if verbose {
            self.log_filter = "debug".to_string();
        }
        self
    }
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

fn default_shortdir_file() -> PathBuf {
    env::temp_dir().join("shortdirs.txt")
}
