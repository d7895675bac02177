use crate::error::LaunchError;
use crate::parser::{Redirect, WriteMode};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Open the target of an input redirect read-only.
pub fn open_input(path: &Path) -> Result<File, LaunchError> {
    File::open(path).map_err(|source| LaunchError::RedirectFailed {
        path: path.to_path_buf(),
        source,
    })
}

fn redirect_failed(path: &Path) -> impl FnOnce(io::Error) -> LaunchError + '_ {
    move |source| LaunchError::RedirectFailed {
        path: path.to_path_buf(),
        source,
    }
}

/// An output redirect target that is open but not yet truncated.
///
/// A pipeline opens all of its targets first and then either commits them, which
/// truncates the `>` ones, or discards them, which removes the files the open
/// created. An aborted pipeline leaves existing files untouched.
#[derive(Debug)]
pub struct OutputTarget {
    file: File,
    path: PathBuf,
    mode: WriteMode,
    created: bool,
}

impl OutputTarget {
    pub fn open(path: &Path, mode: WriteMode) -> Result<Self, LaunchError> {
        let mut options = OpenOptions::new();
        match mode {
            WriteMode::Truncate => options.write(true),
            WriteMode::Append => options.append(true),
        };
        let (file, created) = match options.clone().create_new(true).open(path) {
            Ok(file) => (file, true),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                (options.open(path).map_err(redirect_failed(path))?, false)
            }
            Err(e) => return Err(redirect_failed(path)(e)),
        };
        Ok(OutputTarget {
            file,
            path: path.to_path_buf(),
            mode,
            created,
        })
    }

    /// Apply the redirect's write mode and hand back the file.
    pub fn commit(self) -> Result<File, LaunchError> {
        if self.mode == WriteMode::Truncate && !self.created {
            self.file.set_len(0).map_err(redirect_failed(&self.path))?;
        }
        Ok(self.file)
    }

    /// Close the target, removing the file if opening it created it.
    pub fn discard(self) {
        drop(self.file);
        if self.created {
            if let Err(e) = fs::remove_file(&self.path) {
                tracing::warn!(path = %self.path.display(), error = %e, "cannot remove redirect target");
            }
        }
    }
}

/// Open the target of an output redirect, creating it when missing.
pub fn open_output(path: &Path, mode: WriteMode) -> Result<File, LaunchError> {
    OutputTarget::open(path, mode)?.commit()
}

/// Open a stage's input redirect, if it has one.
pub fn open_stdin(redirect: &Redirect) -> Result<Option<File>, LaunchError> {
    match redirect {
        Redirect::ReadFrom(path) => open_input(path).map(Some),
        _ => Ok(None),
    }
}

/// Open a stage's output redirect without truncating it, if it has one.
pub fn open_stdout_target(redirect: &Redirect) -> Result<Option<OutputTarget>, LaunchError> {
    match redirect {
        Redirect::WriteTo(path, mode) => OutputTarget::open(path, *mode).map(Some),
        _ => Ok(None),
    }
}

/// Open a stage's output redirect, if it has one.
pub fn open_stdout(redirect: &Redirect) -> Result<Option<File>, LaunchError> {
    match redirect {
        Redirect::WriteTo(path, mode) => open_output(path, *mode).map(Some),
        _ => Ok(None),
    }
}

/// Output sink of an in-process builtin: the redirect target or the shell's stdout.
pub enum BuiltinOutput<'a> {
    Shell(&'a mut dyn Write),
    File(File),
}

impl<'a> BuiltinOutput<'a> {
    pub fn new(redirect: &Redirect, shell: &'a mut dyn Write) -> Result<Self, LaunchError> {
        Ok(match open_stdout(redirect)? {
            Some(file) => BuiltinOutput::File(file),
            None => BuiltinOutput::Shell(shell),
        })
    }
}

impl Write for BuiltinOutput<'_> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        match self {
            BuiltinOutput::Shell(out) => out.write(data),
            BuiltinOutput::File(file) => file.write(data),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            BuiltinOutput::Shell(out) => out.flush(),
            BuiltinOutput::File(file) => file.flush(),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::cell::RefCell;
    use std::io::{Result as IoResult, Write};
    use std::rc::Rc;

    /// Memory-backed writer for capturing what the shell prints.
    pub struct MemWriter {
        buf: Rc<RefCell<Vec<u8>>>,
    }

    impl MemWriter {
        /// Create a writer and return it with a handle to the collected bytes.
        pub fn with_handle() -> (Self, Rc<RefCell<Vec<u8>>>) {
            let buf = Rc::new(RefCell::new(Vec::new()));
            (MemWriter { buf: buf.clone() }, buf)
        }
    }

    impl Write for MemWriter {
        fn write(&mut self, data: &[u8]) -> IoResult<usize> {
            self.buf.borrow_mut().extend_from_slice(data);
            Ok(data.len())
        }

        fn flush(&mut self) -> IoResult<()> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MemWriter;
    use super::*;
    use std::fs;
    use std::io::Read;
    use std::path::PathBuf;

    fn temp_file(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("io_adapters_{}_{}", tag, std::process::id()))
    }

    #[test]
    fn test_truncate_then_append() {
        let path = temp_file("modes");
        fs::write(&path, "old content\n").unwrap();

        let mut f = open_output(&path, WriteMode::Truncate).unwrap();
        write!(f, "one\n").unwrap();
        drop(f);
        let mut f = open_output(&path, WriteMode::Append).unwrap();
        write!(f, "two\n").unwrap();
        drop(f);

        assert_eq!(fs::read_to_string(&path).unwrap(), "one\ntwo\n");
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_missing_input_reports_path() {
        let path = temp_file("missing_input");
        let _ = fs::remove_file(&path);
        match open_input(&path) {
            Err(LaunchError::RedirectFailed { path: reported, .. }) => assert_eq!(reported, path),
            other => panic!("expected RedirectFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_output_into_missing_directory_fails() {
        let path = temp_file("no_such_dir").join("out.txt");
        assert!(matches!(
            open_output(&path, WriteMode::Truncate),
            Err(LaunchError::RedirectFailed { .. })
        ));
    }

    #[test]
    fn test_target_is_truncated_only_on_commit() {
        let path = temp_file("deferred_truncate");
        fs::write(&path, "precious\n").unwrap();

        let target = OutputTarget::open(&path, WriteMode::Truncate).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "precious\n");
        target.discard();
        assert_eq!(fs::read_to_string(&path).unwrap(), "precious\n");

        let mut f = OutputTarget::open(&path, WriteMode::Truncate)
            .unwrap()
            .commit()
            .unwrap();
        write!(f, "new\n").unwrap();
        drop(f);
        assert_eq!(fs::read_to_string(&path).unwrap(), "new\n");
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_discard_removes_only_created_files() {
        let path = temp_file("discard_created");
        let _ = fs::remove_file(&path);
        OutputTarget::open(&path, WriteMode::Append).unwrap().discard();
        assert!(!path.exists());
    }

    #[test]
    fn test_inherit_opens_nothing() {
        assert!(open_stdin(&Redirect::Inherit).unwrap().is_none());
        assert!(open_stdout(&Redirect::Inherit).unwrap().is_none());
        assert!(open_stdout_target(&Redirect::Inherit).unwrap().is_none());
    }

    #[test]
    fn test_builtin_output_goes_to_shell_or_file() {
        let (mut shell, handle) = MemWriter::with_handle();
        {
            let mut out = BuiltinOutput::new(&Redirect::Inherit, &mut shell).unwrap();
            write!(out, "to shell").unwrap();
        }
        assert_eq!(handle.borrow().as_slice(), b"to shell");

        let path = temp_file("builtin_out");
        let redirect = Redirect::WriteTo(path.clone(), WriteMode::Truncate);
        {
            let mut out = BuiltinOutput::new(&redirect, &mut shell).unwrap();
            write!(out, "to file").unwrap();
        }
        let mut s = String::new();
        File::open(&path).unwrap().read_to_string(&mut s).unwrap();
        assert_eq!(s, "to file");
        assert_eq!(handle.borrow().as_slice(), b"to shell");
        let _ = fs::remove_file(path);
    }
}
