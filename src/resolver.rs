use crate::error::ResolutionError;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

/// Resolve a command name to an executable file the way a typical shell would.
///
/// Behavior:
/// - Name containing a path separator (`/bin/ls`, `./run`, `bin/tool`): checked
///   directly, the search path is not consulted.
/// - Bare name: each directory of `search_path` is tried in order and the first
///   `directory/name` that is an executable file wins. Empty entries are skipped.
/// - Empty name, missing or exhausted search path: [`ResolutionError::NotFound`].
pub fn resolve(name: &str, search_path: Option<&OsStr>) -> Result<PathBuf, ResolutionError> {
    let not_found = || ResolutionError::NotFound(name.to_string());
    if name.is_empty() {
        return Err(not_found());
    }

    if name.contains(std::path::MAIN_SEPARATOR) {
        let path = Path::new(name);
        return if is_executable(path) {
            Ok(path.to_path_buf())
        } else {
            Err(not_found())
        };
    }

    let search_path = search_path.ok_or_else(not_found)?;
    find_in_path(search_path, name).ok_or_else(not_found)
}

fn find_in_path(search_path: &OsStr, cmd: &str) -> Option<PathBuf> {
    std::env::split_paths(search_path)
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(|dir| dir.join(cmd))
        .find(|path| is_executable(path))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    match path.metadata() {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
