use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::debug;

use crate::EditError;

/// Where warnings and printed text go.
pub trait Diagnostics {
    fn warning(&mut self, msg: &str);

    /// Text printed by `p`, `=`, `>` and friends.
    fn output(&mut self, text: &str) {
        self.warning(text);
    }
}

/// Keeps everything in memory.
#[derive(Debug, Clone, Default)]
pub struct CollectDiagnostics {
    pub warnings: Vec<String>,
    pub output: Vec<String>,
}

impl CollectDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// All printed text, concatenated.
    pub fn printed(&self) -> String {
        self.output.concat()
    }
}

impl Diagnostics for CollectDiagnostics {
    fn warning(&mut self, msg: &str) {
        self.warnings.push(msg.to_string());
    }

    fn output(&mut self, text: &str) {
        self.output.push(text.to_string());
    }
}

/// Runs external commands for `<`, `|` and `>`.
pub trait Process {
    /// Run `cmdline` in `dir` with `stdin` as its input and return what it
    /// wrote to stdout. Blocks until the command exits.
    fn run(&mut self, cmdline: &str, dir: &Path, stdin: Option<&str>) -> Result<String, EditError>;
}

/// Runs commands through `shell -c`.
#[derive(Debug, Clone)]
pub struct ShellProcess {
    shell: PathBuf,
}

impl Default for ShellProcess {
    fn default() -> Self {
        Self::new("/bin/sh")
    }
}

impl ShellProcess {
    pub fn new(shell: impl Into<PathBuf>) -> Self {
        Self {
            shell: shell.into(),
        }
    }

    /// `$SHELL`, falling back to `/bin/sh`.
    pub fn from_env() -> Self {
        match std::env::var_os("SHELL") {
            Some(s) if !s.is_empty() => Self::new(s),
            _ => Self::default(),
        }
    }
}

impl Process for ShellProcess {
    fn run(&mut self, cmdline: &str, dir: &Path, stdin: Option<&str>) -> Result<String, EditError> {
        debug!(cmdline, dir = %dir.display(), shell = %self.shell.display(), "spawn");
        let mut child = Command::new(&self.shell)
            .arg("-c")
            .arg(cmdline)
            .current_dir(dir)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| EditError::Io(format!("can't run {cmdline}: {e}")))?;

        // Feed stdin from another thread so a chatty child can't deadlock us.
        let feeder = match (stdin, child.stdin.take()) {
            (Some(input), Some(mut pipe)) => {
                let input = input.to_string();
                Some(std::thread::spawn(move || {
                    match pipe.write_all(input.as_bytes()) {
                        // the child is free to stop reading early
                        Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
                        other => other,
                    }
                }))
            }
            _ => None,
        };

        let out = child
            .wait_with_output()
            .map_err(|e| EditError::Io(format!("{cmdline}: {e}")))?;
        if let Some(feeder) = feeder {
            match feeder.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    return Err(EditError::Io(format!("{cmdline}: can't write input: {e}")))
                }
                Err(_) => return Err(EditError::Io(format!("{cmdline}: input writer died"))),
            }
        }
        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            let stderr = stderr.trim_end();
            return Err(EditError::Io(if stderr.is_empty() {
                format!("{cmdline}: {}", out.status)
            } else {
                format!("{cmdline}: {}: {stderr}", out.status)
            }));
        }
        Ok(String::from_utf8_lossy(&out.stdout).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_keeps_warnings_and_output_apart() {
        let mut d = CollectDiagnostics::new();
        d.warning("careful");
        d.output("a\n");
        d.output("b\n");
        assert_eq!(d.warnings, vec!["careful"]);
        assert_eq!(d.printed(), "a\nb\n");
    }

    #[cfg(unix)]
    #[test]
    fn shell_pipes_stdin_through() {
        let mut sh = ShellProcess::default();
        let out = sh.run("tr a-z A-Z", Path::new("."), Some("shout\n")).unwrap();
        assert_eq!(out, "SHOUT\n");
    }

    #[cfg(unix)]
    #[test]
    fn child_may_stop_reading_input() {
        let mut sh = ShellProcess::default();
        let input = "x".repeat(1 << 20);
        let out = sh.run("head -c 3", Path::new("."), Some(&input)).unwrap();
        assert_eq!(out, "xxx");
    }

    #[cfg(unix)]
    #[test]
    fn shell_failure_is_an_error() {
        let mut sh = ShellProcess::default();
        let err = sh.run("echo oops >&2; exit 3", Path::new("."), None).unwrap_err();
        assert!(matches!(err, EditError::Io(_)));
        assert!(err.message().contains("oops"));
    }
}
