use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::Parser;
use samex::{Diagnostics, EditError, Session, ShellProcess, Workspace};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "samex",
    version,
    about = "Apply sam-style edit commands to a file",
    after_help = "Each COMMAND argument is one line of the script. With no COMMAND the \
                  script is read from stdin.\n\nExit status is 2 when a command fails and \
                  1 on I/O errors. A failing script leaves the file untouched."
)]
struct Cli {
    /// Don't write the file; print the edited text instead.
    #[arg(long)]
    dry_run: bool,

    /// Read the text from stdin and print the edited text. FILE must be `-`.
    #[arg(long)]
    stdin: bool,

    /// Shell for `<`, `|` and `>` commands.
    #[arg(long, env = "SAMEX_SHELL", value_name = "PATH")]
    shell: Option<PathBuf>,

    /// File to edit, or `-` with --stdin.
    #[arg(value_name = "FILE")]
    file: String,

    #[arg(value_name = "COMMAND")]
    commands: Vec<String>,
}

/// Printed text to stdout, warnings to stderr.
struct Console;

impl Diagnostics for Console {
    fn warning(&mut self, msg: &str) {
        eprintln!("{msg}");
    }

    fn output(&mut self, text: &str) {
        print!("{text}");
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("SAMEX_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn is_binary(bytes: &[u8]) -> bool {
    bytes.iter().any(|&b| b == 0)
}

/// Replace `path` with `content` through a temporary file in the same
/// directory, keeping the file's permissions.
fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let perms = fs::metadata(path).map(|m| m.permissions()).ok();
    let mut tmp = tempfile::Builder::new()
        .prefix(".samex")
        .tempfile_in(dir)
        .with_context(|| format!("can't create a temporary file in {}", dir.display()))?;
    tmp.write_all(content.as_bytes())?;
    tmp.as_file().sync_all()?;
    if let Some(perms) = perms {
        fs::set_permissions(tmp.path(), perms).context("can't copy permissions")?;
    }
    tmp.persist(path)?;
    Ok(())
}

fn decode(bytes: Vec<u8>, what: &str) -> Result<String> {
    if is_binary(&bytes) {
        bail!("{what} appears to be binary");
    }
    String::from_utf8(bytes).with_context(|| format!("{what} is not valid UTF-8"))
}

fn run(cli: Cli) -> Result<()> {
    if cli.stdin && cli.file != "-" {
        bail!("with --stdin, FILE must be '-' (got '{}')", cli.file);
    }
    if cli.stdin && cli.commands.is_empty() {
        bail!("--stdin needs commands on the command line");
    }

    let text = if cli.stdin {
        let mut buf = Vec::new();
        io::stdin()
            .read_to_end(&mut buf)
            .context("failed to read stdin")?;
        decode(buf, "input")?
    } else {
        let bytes = fs::read(&cli.file).with_context(|| format!("failed to read {}", cli.file))?;
        decode(bytes, &cli.file)?
    };

    let script = if cli.commands.is_empty() {
        let mut s = String::new();
        io::stdin()
            .read_to_string(&mut s)
            .context("failed to read commands from stdin")?;
        s
    } else {
        cli.commands.join("\n")
    };

    let cwd = std::env::current_dir().context("no working directory")?;
    let mut ws = Workspace::with_dir(cwd);
    let name = if cli.stdin { "" } else { cli.file.as_str() };
    let id = ws.open(name, &text);

    let mut process = match &cli.shell {
        Some(shell) => ShellProcess::new(shell.clone()),
        None => ShellProcess::from_env(),
    };
    Session::new().run(&mut ws, &script, &mut Console, &mut process)?;

    let Some(buf) = ws.buffer(id) else {
        debug!(file = %cli.file, "buffer closed by script");
        return Ok(());
    };
    let edited = buf.text();
    io::stdout().flush().context("failed to flush stdout")?;

    if cli.stdin || cli.dry_run {
        print!("{edited}");
    } else if edited != text {
        write_atomic(Path::new(&cli.file), &edited)
            .with_context(|| format!("failed to write {}", cli.file))?;
        debug!(file = %cli.file, "written");
    }
    Ok(())
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let _ = io::stdout().flush();
            eprintln!("error: {e:#}");
            if e.downcast_ref::<EditError>().is_some() {
                ExitCode::from(2)
            } else {
                ExitCode::from(1)
            }
        }
    }
}
