use crate::command::{BuiltinStatus, CommandFactory, ExecutableCommand};
use crate::env::Environment;
use crate::interpreter::Factory;
use anyhow::{Context, Result, bail};
use argh::{EarlyExit, FromArgs};
use regex::{Captures, Regex, RegexBuilder};
use std::cmp::Ordering;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Built-in commands known to the shell at compile time.
///
/// Builtins are parsed using the [`argh`] crate (`FromArgs`) and executed directly
/// in-process without spawning a child process.
pub(crate) trait BuiltinCommand: Sized + FromArgs {
    /// Canonical name of the command, e.g. "cd" or "exit".
    fn name() -> &'static str;

    /// Executes the command using the provided output stream and environment.
    fn execute(
        self,
        stdout: &mut dyn Write,
        env: &mut Environment,
        background: bool,
    ) -> Result<BuiltinStatus>;
}

impl<T: BuiltinCommand> ExecutableCommand for T {
    fn execute(
        self: Box<Self>,
        stdout: &mut dyn Write,
        env: &mut Environment,
        background: bool,
    ) -> Result<BuiltinStatus> {
        T::execute(*self, stdout, env, background)
    }
}

/// Arguments rejected by `argh`, or an explicit `--help`.
struct InvalidArgs {
    output: String,
    is_error: bool,
}

impl ExecutableCommand for InvalidArgs {
    fn execute(
        self: Box<Self>,
        stdout: &mut dyn Write,
        _env: &mut Environment,
        _background: bool,
    ) -> Result<BuiltinStatus> {
        if self.is_error {
            bail!("{}", self.output.trim_end());
        }
        writeln!(stdout, "{}", self.output.trim_end())?;
        Ok(BuiltinStatus::Success)
    }
}

impl<T: BuiltinCommand + 'static> CommandFactory for Factory<T> {
    fn name(&self) -> &'static str {
        T::name()
    }

    fn try_create(&self, name: &str, args: &[&str]) -> Option<Box<dyn ExecutableCommand>> {
        if name == T::name() {
            Some(match T::from_args(&[name], args) {
                Ok(cmd) => Box::new(cmd),
                Err(EarlyExit { output, status }) => Box::new(InvalidArgs {
                    output,
                    is_error: status.is_err(),
                }),
            })
        } else {
            None
        }
    }
}

#[derive(FromArgs)]
/// Leave the shell.
pub struct Exit {
    #[argh(positional, greedy)]
    /// ignored; the shell always exits with status 0.
    pub _args: Vec<String>,
}

impl BuiltinCommand for Exit {
    fn name() -> &'static str {
        "exit"
    }

    fn execute(
        self,
        _stdout: &mut dyn Write,
        _env: &mut Environment,
        _background: bool,
    ) -> Result<BuiltinStatus> {
        Ok(BuiltinStatus::Exit)
    }
}

/// Switch the process and the environment to `target`, relative paths being taken
/// from the environment's current directory.
fn change_dir(env: &mut Environment, target: &Path) -> Result<()> {
    let new_dir = if target.is_absolute() {
        target.to_path_buf()
    } else {
        env.current_dir.join(target)
    };

    let canonical = fs::canonicalize(&new_dir)
        .with_context(|| format!("can't canonicalize {}", new_dir.display()))?;

    std::env::set_current_dir(&canonical)
        .with_context(|| format!("can't chdir to {}", canonical.display()))?;
    tracing::debug!(dir = %canonical.display(), "changed directory");
    env.current_dir = canonical;
    Ok(())
}

#[derive(FromArgs)]
/// Change the current working directory.
/// If no target is provided, changes to the directory specified by the HOME environment variable.
pub struct Cd {
    #[argh(positional)]
    /// directory to switch to; absolute or relative to the current directory. Defaults to $HOME when omitted.
    pub target: Option<String>,
}

impl BuiltinCommand for Cd {
    fn name() -> &'static str {
        "cd"
    }

    fn execute(
        self,
        _stdout: &mut dyn Write,
        env: &mut Environment,
        _background: bool,
    ) -> Result<BuiltinStatus> {
        let target = match &self.target {
            Some(t) if !t.is_empty() => PathBuf::from(t),
            _ => match env.get_var("HOME") {
                Some(home) => PathBuf::from(home),
                None => bail!("no target and HOME not set"),
            },
        };
        change_dir(env, &target)?;
        Ok(BuiltinStatus::Success)
    }
}

/// Bookmarks kept by `shortdir`, one `name -> path` line per entry.
struct ShortdirStore {
    path: PathBuf,
}

const SHORTDIR_SEPARATOR: &str = " -> ";

impl ShortdirStore {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    fn load(&self) -> Result<Vec<(String, PathBuf)>> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("can't read {}", self.path.display()));
            }
        };
        Ok(text
            .lines()
            .filter_map(|line| line.split_once(SHORTDIR_SEPARATOR))
            .map(|(name, dir)| (name.to_string(), PathBuf::from(dir)))
            .collect())
    }

    /// Rewrite the store through a sibling temporary file.
    fn save(&self, entries: &[(String, PathBuf)]) -> Result<()> {
        let mut text = String::new();
        for (name, dir) in entries {
            text.push_str(name);
            text.push_str(SHORTDIR_SEPARATOR);
            text.push_str(&dir.to_string_lossy());
            text.push('\n');
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        fs::write(&tmp, text).with_context(|| format!("can't write {}", self.path.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("can't write {}", self.path.display()))?;
        Ok(())
    }
}

#[derive(FromArgs)]
/// Bind short names to directories and jump between them.
pub struct Shortdir {
    #[argh(subcommand)]
    pub action: ShortdirAction,
}

#[derive(FromArgs)]
#[argh(subcommand)]
pub enum ShortdirAction {
    Set(ShortdirSet),
    Jump(ShortdirJump),
    Del(ShortdirDel),
    Clear(ShortdirClear),
    List(ShortdirList),
}

#[derive(FromArgs)]
#[argh(subcommand, name = "set")]
/// bind a name to the current directory.
pub struct ShortdirSet {
    #[argh(positional)]
    /// bookmark name.
    pub name: String,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "jump")]
/// change to the directory bound to a name.
pub struct ShortdirJump {
    #[argh(positional)]
    /// bookmark name.
    pub name: String,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "del")]
/// forget a name.
pub struct ShortdirDel {
    #[argh(positional)]
    /// bookmark name.
    pub name: String,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "clear")]
/// forget every name.
pub struct ShortdirClear {}

#[derive(FromArgs)]
#[argh(subcommand, name = "list")]
/// print every bookmark.
pub struct ShortdirList {}

fn check_bookmark_name(name: &str) -> Result<()> {
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        bail!("invalid name {:?}: names are single words", name);
    }
    Ok(())
}

impl BuiltinCommand for Shortdir {
    fn name() -> &'static str {
        "shortdir"
    }

    fn execute(
        self,
        stdout: &mut dyn Write,
        env: &mut Environment,
        _background: bool,
    ) -> Result<BuiltinStatus> {
        let store = ShortdirStore::new(&env.config.shortdir_file);
        match self.action {
            ShortdirAction::Set(ShortdirSet { name }) => {
                check_bookmark_name(&name)?;
                let mut entries = store.load()?;
                let dir = env.current_dir.clone();
                match entries.iter_mut().find(|(n, _)| *n == name) {
                    Some(entry) => entry.1 = dir,
                    None => entries.push((name, dir)),
                }
                store.save(&entries)?;
            }
            ShortdirAction::Jump(ShortdirJump { name }) => {
                let entries = store.load()?;
                let Some((_, dir)) = entries.iter().find(|(n, _)| *n == name) else {
                    bail!("{}: not associated with any directory", name);
                };
                change_dir(env, dir)?;
            }
            ShortdirAction::Del(ShortdirDel { name }) => {
                let mut entries = store.load()?;
                let before = entries.len();
                entries.retain(|(n, _)| *n != name);
                if entries.len() == before {
                    bail!("{}: no such short directory name", name);
                }
                store.save(&entries)?;
            }
            ShortdirAction::Clear(ShortdirClear {}) => store.save(&[])?,
            ShortdirAction::List(ShortdirList {}) => {
                for (name, dir) in store.load()? {
                    writeln!(stdout, "{}{}{}", name, SHORTDIR_SEPARATOR, dir.display())?;
                }
            }
        }
        Ok(BuiltinStatus::Success)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    Red,
    Green,
    Blue,
}

impl Color {
    fn ansi_code(self) -> u8 {
        match self {
            Color::Red => 31,
            Color::Green => 32,
            Color::Blue => 34,
        }
    }
}

fn parse_color(value: &str) -> Result<Color, String> {
    match value.to_ascii_lowercase().as_str() {
        "r" | "red" => Ok(Color::Red),
        "g" | "green" => Ok(Color::Green),
        "b" | "blue" => Ok(Color::Blue),
        _ => Err(format!("unknown colour `{}`, expected r, g or b", value)),
    }
}

#[derive(FromArgs)]
/// Print the lines of a file that contain a word, with every occurrence coloured.
pub struct Highlight {
    #[argh(positional)]
    /// word to look for, matched whole and ignoring case.
    pub word: String,

    #[argh(positional, from_str_fn(parse_color))]
    /// colour of the highlight: r, g or b.
    pub color: Color,

    #[argh(positional)]
    /// file to search.
    pub file: PathBuf,
}

impl Highlight {
    /// Case-insensitive whole-word matcher. Word boundaries are only required on the
    /// sides where the word itself starts or ends with a word character.
    fn matcher(&self) -> Result<Regex> {
        let is_word = |c: Option<char>| c.is_some_and(|c| c.is_alphanumeric() || c == '_');
        let left = if is_word(self.word.chars().next()) { r"\b" } else { "" };
        let right = if is_word(self.word.chars().last()) { r"\b" } else { "" };
        let pattern = format!("{}{}{}", left, regex::escape(&self.word), right);
        RegexBuilder::new(&pattern)
            .case_insensitive(true)
            .build()
            .with_context(|| format!("invalid word {:?}", self.word))
    }
}

impl BuiltinCommand for Highlight {
    fn name() -> &'static str {
        "highlight"
    }

    fn execute(
        self,
        stdout: &mut dyn Write,
        _env: &mut Environment,
        _background: bool,
    ) -> Result<BuiltinStatus> {
        if self.word.is_empty() {
            bail!("empty word");
        }
        let re = self.matcher()?;
        let file = fs::File::open(&self.file)
            .with_context(|| format!("{}: no such file", self.file.display()))?;
        let code = self.color.ansi_code();

        for line in BufReader::new(file).lines() {
            let line = line.with_context(|| format!("read error in {}", self.file.display()))?;
            if !re.is_match(&line) {
                continue;
            }
            let coloured = re.replace_all(&line, |caps: &Captures| {
                format!("\x1b[{}m{}\x1b[0m", code, &caps[0])
            });
            writeln!(stdout, "{}", coloured)?;
        }
        Ok(BuiltinStatus::Success)
    }
}

#[derive(FromArgs)]
/// Compare two .txt files line by line (-a, the default) or byte by byte (-b).
pub struct Kdiff {
    #[argh(switch, short = 'a')]
    /// compare line by line.
    pub lines: bool,

    #[argh(switch, short = 'b')]
    /// compare byte by byte.
    pub bytes: bool,

    #[argh(positional)]
    /// first file.
    pub first: PathBuf,

    #[argh(positional)]
    /// second file.
    pub second: PathBuf,
}

fn is_txt(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "txt")
}

impl Kdiff {
    fn compare_lines(&self, first: &str, second: &str, stdout: &mut dyn Write) -> Result<()> {
        let first_lines: Vec<&str> = first.lines().collect();
        let second_lines: Vec<&str> = second.lines().collect();

        let mut count = 0;
        for (n, (a, b)) in first_lines.iter().zip(&second_lines).enumerate() {
            if a != b {
                writeln!(stdout, "{}: Line {}: {}", self.first.display(), n + 1, a)?;
                writeln!(stdout, "{}: Line {}: {}", self.second.display(), n + 1, b)?;
                count += 1;
            }
        }

        match (count, first_lines.len().cmp(&second_lines.len())) {
            (0, Ordering::Equal) => writeln!(stdout, "The files are identical.")?,
            (0, Ordering::Greater) => writeln!(
                stdout,
                "The files differ. The first file is longer than the second one, but they are identical in the common lines."
            )?,
            (0, Ordering::Less) => writeln!(
                stdout,
                "The files differ. The second file is longer than the first one, but they are identical in the common lines."
            )?,
            (count, _) => writeln!(stdout, "{} different line(s) found.", count)?,
        }
        Ok(())
    }

    fn compare_bytes(&self, first: &[u8], second: &[u8], stdout: &mut dyn Write) -> Result<()> {
        let common = first.len().min(second.len());
        let differing = first.iter().zip(second).filter(|(a, b)| a != b).count();
        let count = differing + (first.len().max(second.len()) - common);

        if first.len() > second.len() {
            writeln!(stdout, "The first file is longer than the second file.")?;
        } else if first.len() < second.len() {
            writeln!(stdout, "The second file is longer than the first file.")?;
        }
        if count == 0 {
            writeln!(stdout, "The files are identical.")?;
        } else {
            writeln!(stdout, "The files differ in {} bytes.", count)?;
        }
        Ok(())
    }
}

impl BuiltinCommand for Kdiff {
    fn name() -> &'static str {
        "kdiff"
    }

    fn execute(
        self,
        stdout: &mut dyn Write,
        _env: &mut Environment,
        _background: bool,
    ) -> Result<BuiltinStatus> {
        if self.lines && self.bytes {
            bail!("-a and -b are mutually exclusive");
        }
        match (self.first.exists(), self.second.exists()) {
            (false, false) => bail!("none of the files exists"),
            (false, true) => bail!("{}: the first file does not exist", self.first.display()),
            (true, false) => bail!("{}: the second file does not exist", self.second.display()),
            (true, true) => {}
        }
        if !is_txt(&self.first) || !is_txt(&self.second) {
            bail!("both of the files must be .txt files");
        }

        let first = fs::read(&self.first)
            .with_context(|| format!("can't read {}", self.first.display()))?;
        let second = fs::read(&self.second)
            .with_context(|| format!("can't read {}", self.second.display()))?;

        if self.bytes {
            self.compare_bytes(&first, &second, stdout)?;
        } else {
            self.compare_lines(
                &String::from_utf8_lossy(&first),
                &String::from_utf8_lossy(&second),
                stdout,
            )?;
        }
        Ok(BuiltinStatus::Success)
    }
}
