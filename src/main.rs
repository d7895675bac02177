use argh::FromArgs;
use seashell::config::LOG_FILTER_VAR;
use seashell::{Interpreter, ShellConfig};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(FromArgs)]
/// An interactive command shell.
struct Args {
    #[argh(option, short = 'c')]
    /// run this line instead of reading lines interactively.
    command: Option<String>,

    #[argh(switch, short = 'v')]
    /// log debug information to standard error.
    verbose: bool,

    #[argh(option)]
    /// file holding the shortdir bookmarks.
    shortdirs: Option<PathBuf>,
}

fn main() {
    let args: Args = argh::from_env();

    let mut config = ShellConfig::from_env().verbose(args.verbose);
    if let Some(path) = args.shortdirs {
        config = config.with_shortdir_file(path);
    }

    let filter = EnvFilter::try_from_env(LOG_FILTER_VAR)
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut sh = Interpreter::with_config(config);
    match args.command {
        Some(line) => {
            sh.eval(&line);
        }
        None => {
            if let Err(e) = sh.repl() {
                tracing::error!(error = %e, "line editor failed");
            }
        }
    }
}
