use tracing::{debug, warn};

use crate::buffer::Workspace;
use crate::engine::Executor;
use crate::host::{Diagnostics, Process};
use crate::parse::Parser;
use crate::regx::Pattern;
use crate::EditError;

/// State that outlives a single invocation: the remembered patterns.
///
/// The parser's last pattern (what an empty `//` in a command means) and
/// the last compiled pattern (what an empty `//` in an evaluated address
/// means) are tracked separately.
#[derive(Debug, Clone, Default)]
pub struct Session {
    last_source: Option<String>,
    compiled: Option<Pattern>,
    pub(crate) nest: usize,
    pub(crate) file_looping: bool,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pattern text an empty command regexp stands for.
    pub fn last_pattern(&self) -> Option<&str> {
        self.last_source.as_deref()
    }

    pub(crate) fn remember_pattern(&mut self, source: &str) {
        self.last_source = Some(source.to_string());
    }

    pub(crate) fn last_compiled(&self) -> Option<Pattern> {
        self.compiled.clone()
    }

    /// Compile `source`, reusing the previous compilation when it matches.
    pub(crate) fn compile(&mut self, source: &str, context: &str) -> Result<Pattern, EditError> {
        if let Some(p) = &self.compiled {
            if p.as_str() == source {
                return Ok(p.clone());
            }
        }
        let p = Pattern::compile_for(source, context)?;
        self.compiled = Some(p.clone());
        Ok(p)
    }

    /// Parse and execute `text` against `ws`.
    ///
    /// Commands run one at a time as they are parsed. Their edits are
    /// recorded, not applied; when the whole text has run, every buffer's
    /// edits are applied under one sequence number. On any error nothing is
    /// applied.
    pub fn run(
        &mut self,
        ws: &mut Workspace,
        text: &str,
        diag: &mut dyn Diagnostics,
        process: &mut dyn Process,
    ) -> Result<(), EditError> {
        let mut src = text.to_string();
        if !src.ends_with('\n') {
            src.push('\n');
        }
        let mut parser = Parser::new(&src);
        match self.run_parsed(&mut parser, ws, diag, process) {
            Ok(()) => {
                let seq = ws.commit_all();
                debug!(seq, "edit committed");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "edit aborted");
                ws.truncate_all();
                self.nest = 0;
                self.file_looping = false;
                Err(e)
            }
        }
    }

    fn run_parsed(
        &mut self,
        parser: &mut Parser,
        ws: &mut Workspace,
        diag: &mut dyn Diagnostics,
        process: &mut dyn Process,
    ) -> Result<(), EditError> {
        while let Some(cmd) = parser.parse_command(self, 0)? {
            debug!(letter = %cmd.letter, "exec");
            Executor::new(self, ws, diag, process).exec(&cmd)?;
        }
        Ok(())
    }
}
