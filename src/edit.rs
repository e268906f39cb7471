use samex_core::{
    AddressEvaluator, CollectDiagnostics, EditError, Process, Range, Session, ShellProcess,
    StrSource, Workspace,
};

/// Outcome of running a command string over a piece of text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditResult {
    pub text: String,
    /// Dot after the commit.
    pub dot: Range,
    /// Everything printed by `p`, `=`, `>` and friends.
    pub output: String,
    pub warnings: Vec<String>,
    pub changed: bool,
}

/// Run `commands` over `text` as a single unnamed buffer. Pipes go
/// through `$SHELL`.
pub fn edit_text(text: &str, commands: &str) -> Result<EditResult, EditError> {
    edit_text_with(text, commands, &mut ShellProcess::from_env())
}

pub fn edit_text_with(
    text: &str,
    commands: &str,
    process: &mut dyn Process,
) -> Result<EditResult, EditError> {
    let mut ws = Workspace::new();
    let id = ws.open("", text);
    let mut diag = CollectDiagnostics::new();
    Session::new().run(&mut ws, commands, &mut diag, process)?;
    let buf = ws
        .buffer(id)
        .ok_or_else(|| EditError::Eval("buffer has been closed".to_string()))?;
    let new_text = buf.text();
    Ok(EditResult {
        changed: new_text != text,
        text: new_text,
        dot: buf.dot(),
        output: diag.printed(),
        warnings: diag.warnings,
    })
}

/// Resolve a whole address string against `text` starting from `dot`.
///
/// The first warning the evaluator raises becomes the error, as does any
/// text left over after the address.
pub fn resolve_address(text: &str, addr: &str, dot: Range) -> Result<Range, EditError> {
    let source = StrSource::new(text);
    let mut session = Session::new();
    let mut diag = CollectDiagnostics::new();
    let ev = AddressEvaluator::new(&source, &mut session, &mut diag).eval_str(dot, addr);
    if !ev.evaluated {
        let msg = diag
            .warnings
            .into_iter()
            .next()
            .unwrap_or_else(|| "bad address".to_string());
        return Err(EditError::Eval(msg));
    }
    let rest: String = addr.chars().skip(ev.stopped_at).collect();
    if !rest.trim().is_empty() {
        return Err(EditError::Parse(format!(
            "unexpected text after address: {}",
            rest.trim()
        )));
    }
    Ok(ev.range)
}
