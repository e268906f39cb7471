//! samex — structural addresses and sam-style edit commands (core library)
//!
//! This crate provides the address evaluator, command parser, executor and
//! edit log behind the `samex` and `samaddr` CLIs.

mod addr;
mod buffer;
mod elog;
mod engine;
mod host;
mod parse;
mod regx;
mod session;
mod text;

pub use addr::{AddressEvaluator, Evaluated};
pub use buffer::{Buffer, BufferId, Workspace};
pub use elog::{EditTarget, Elog, ElogEntry, ElogKind};
pub use engine::Address;
pub use host::{CollectDiagnostics, Diagnostics, Process, ShellProcess};
pub use parse::{Addr, AddrKind, Cmd, CmdLetter, Parser};
pub use regx::{Matches, Pattern, RangeSet};
pub use session::Session;
pub use text::{Range, StrSource, TextSource};

/// Library error type.
///
/// Every failure inside one command invocation unwinds to
/// [`Session::run`], which discards pending edits in all buffers before
/// handing the error back.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EditError {
    /// Malformed command or address text.
    #[error("{0}")]
    Parse(String),
    /// An address could not be resolved.
    #[error("{0}")]
    Eval(String),
    /// `X` or `Y` inside another `X`/`Y`.
    #[error("can't nest {0} command")]
    Reentrant(char),
    /// The buffer changed underneath a running `{` group.
    #[error("{0}")]
    Invariant(String),
    #[error("bad regexp in {context}: {reason}")]
    BadRegexp { context: String, reason: String },
    /// File or process failure.
    #[error("{0}")]
    Io(String),
}

impl EditError {
    pub(crate) fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub(crate) fn eval(msg: impl Into<String>) -> Self {
        Self::Eval(msg.into())
    }

    /// Human-friendly error message.
    pub fn message(&self) -> String {
        self.to_string()
    }
}
