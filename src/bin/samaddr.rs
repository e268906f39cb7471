use std::fs;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::Parser;
use samex::{resolve_address, EditError, Range, StrSource, TextSource};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "samaddr",
    version,
    about = "Resolve an address in a file and print what it selects"
)]
struct Cli {
    /// Starting dot as `Q0,Q1` in characters.
    #[arg(long, value_name = "Q0,Q1", value_parser = parse_dot, default_value = "0,0")]
    dot: Range,

    /// Print only the range, not the selected text.
    #[arg(long)]
    quiet: bool,

    #[arg(value_name = "FILE")]
    file: PathBuf,

    /// Address such as `3`, `#10`, `/re/`, `.,$` or `$-2`.
    #[arg(value_name = "ADDRESS")]
    address: String,
}

fn parse_dot(s: &str) -> Result<Range, String> {
    let (a, b) = s.split_once(',').unwrap_or((s, s));
    let q0 = a.trim().parse::<usize>().map_err(|e| format!("bad dot {s}: {e}"))?;
    let q1 = b.trim().parse::<usize>().map_err(|e| format!("bad dot {s}: {e}"))?;
    if q0 > q1 {
        return Err(format!("bad dot {s}: start after end"));
    }
    Ok(Range::new(q0, q1))
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("SAMEX_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let bytes =
        fs::read(&cli.file).with_context(|| format!("failed to read {}", cli.file.display()))?;
    if bytes.contains(&0) {
        bail!("{} appears to be binary", cli.file.display());
    }
    let text = String::from_utf8(bytes)
        .with_context(|| format!("{} is not valid UTF-8", cli.file.display()))?;

    let source = StrSource::new(&text);
    if cli.dot.q1 > source.len() {
        return Err(EditError::Eval("dot out of range".to_string()).into());
    }
    let r = resolve_address(&text, &cli.address, cli.dot)?;
    println!("{r}");
    if !cli.quiet {
        let selected = source.slice(r.q0, r.q1);
        print!("{selected}");
        if !selected.is_empty() && !selected.ends_with('\n') {
            println!();
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            if e.downcast_ref::<EditError>().is_some() {
                ExitCode::from(2)
            } else {
                ExitCode::from(1)
            }
        }
    }
}
