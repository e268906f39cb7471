use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::buffer::{Buffer, BufferId, Workspace};
use crate::elog::Elog;
use crate::host::{Diagnostics, Process};
use crate::parse::{lookup, Addr, AddrKind, Cmd, CmdLetter, DefAddr};
use crate::regx::{Pattern, RangeSet};
use crate::session::Session;
use crate::text::{Range, StrSource, TextSource};
use crate::EditError;

/// A resolved address: a range in a particular buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Address {
    pub range: Range,
    pub buf: BufferId,
}

/// Runs parsed commands against a workspace.
///
/// Every edit goes into the target buffer's [`Elog`]; nothing here changes
/// buffer text except `u`, which refuses to run over pending edits.
pub(crate) struct Executor<'a> {
    session: &'a mut Session,
    ws: &'a mut Workspace,
    diag: &'a mut dyn Diagnostics,
    process: &'a mut dyn Process,
}

impl<'a> Executor<'a> {
    pub(crate) fn new(
        session: &'a mut Session,
        ws: &'a mut Workspace,
        diag: &'a mut dyn Diagnostics,
        process: &'a mut dyn Process,
    ) -> Self {
        Self {
            session,
            ws,
            diag,
            process,
        }
    }

    pub(crate) fn exec(&mut self, cp: &Cmd) -> Result<(), EditError> {
        let starts_with_file = cp
            .addr
            .as_ref()
            .is_some_and(|a| matches!(a.kind, AddrKind::File(_)));
        let needs_buffer = !matches!(
            cp.letter,
            CmdLetter::Cd | CmdLetter::Char('b' | 'B' | 'X' | 'Y')
        ) && !(cp.letter == CmdLetter::Char('D') && !cp.text().trim().is_empty());
        if needs_buffer && self.ws.current().is_none() && !starts_with_file {
            return Err(EditError::eval("no current buffer"));
        }

        let mut addr = None;
        let defaddr = lookup(cp.letter).map_or(DefAddr::No, |s| s.defaddr);
        if defaddr != DefAddr::No {
            if let Some(ap) = default_address(cp, defaddr) {
                let dot = self.initial_dot(&ap)?;
                let a = self.cmdaddress(&ap, dot, 0)?;
                self.ws.set_current(a.buf);
                addr = Some(a);
            }
        }
        let addressed = || {
            addr.ok_or_else(|| EditError::Invariant(format!("{} command has no address", cp.letter)))
        };

        match cp.letter {
            CmdLetter::Group => self.group_cmd(cp),
            CmdLetter::Cd => self.cd_cmd(cp),
            CmdLetter::Char(c) => match c {
                '\n' => self.nl_cmd(addr),
                'a' => self.append(cp, addressed()?, true),
                'i' => self.append(cp, addressed()?, false),
                'b' => self.b_cmd(cp),
                'B' => self.open_cmd(cp),
                'c' => self.c_cmd(cp, addressed()?),
                'd' => self.d_cmd(addressed()?),
                'D' => self.close_cmd(cp),
                'e' => self.e_cmd(cp, None),
                'r' => self.e_cmd(cp, Some(addressed()?)),
                'f' => self.f_cmd(cp),
                'g' | 'v' => self.g_cmd(cp, addressed()?),
                'm' | 't' => self.m_cmd(cp, addressed()?),
                'p' => self.p_cmd(addressed()?),
                's' => self.s_cmd(cp, addressed()?),
                'u' => self.u_cmd(cp),
                'w' => self.w_cmd(cp, addressed()?),
                'x' | 'y' => self.x_cmd(cp, addressed()?),
                'X' | 'Y' => self.filelooper(cp),
                '=' => self.eq_cmd(cp, addressed()?),
                '<' | '|' | '>' => self.pipe_cmd(cp, addressed()?),
                _ => Err(EditError::parse(format!("unknown command {c}"))),
            },
        }
    }

    fn initial_dot(&mut self, ap: &Addr) -> Result<Address, EditError> {
        match (self.ws.current(), &ap.kind) {
            (Some(f), _) => self.mkaddr(f),
            (None, AddrKind::File(re)) => {
                let f = self.matchfile(re)?;
                self.mkaddr(f)
            }
            (None, _) => Err(EditError::eval("no current buffer")),
        }
    }

    fn current(&self) -> Result<BufferId, EditError> {
        self.ws
            .current()
            .ok_or_else(|| EditError::eval("no current buffer"))
    }

    fn buf(&self, id: BufferId) -> Result<&Buffer, EditError> {
        self.ws.get(id)
    }

    fn mkaddr(&self, f: BufferId) -> Result<Address, EditError> {
        Ok(Address {
            range: self.buf(f)?.dot(),
            buf: f,
        })
    }

    /// Make `f` current with dot `r`.
    fn select(&mut self, f: BufferId, r: Range) -> Result<(), EditError> {
        self.ws.set_current(f);
        self.ws.get_mut(f)?.set_dot(r);
        Ok(())
    }

    fn record(&mut self, f: BufferId, edit: impl FnOnce(&mut Elog) -> bool) -> Result<(), EditError> {
        let b = self.ws.get_mut(f)?;
        if !edit(&mut b.elog) {
            warn!(name = b.name(), "changes not in sequence");
            self.diag.warning("changes not in sequence");
        }
        Ok(())
    }

    // ---- addresses ----

    fn cmdaddress(&mut self, ap: &Addr, mut a: Address, mut sign: i32) -> Result<Address, EditError> {
        let mut f = a.buf;
        let mut cur = Some(ap);
        while let Some(ap) = cur {
            match &ap.kind {
                AddrKind::Line(n) => a = self.lineaddr(*n, a, sign)?,
                AddrKind::Char(n) => a = self.charaddr(*n, a, sign)?,
                AddrKind::Dot => a = self.mkaddr(f)?,
                AddrKind::End => a.range = Range::point(self.buf(f)?.len()),
                AddrKind::Mark => return Err(EditError::eval("can't handle '")),
                AddrKind::Forward(re) | AddrKind::Backward(re) => {
                    if matches!(ap.kind, AddrKind::Backward(_)) {
                        sign = if sign == 0 { -1 } else { -sign };
                    }
                    let start = if sign >= 0 { a.range.q1 } else { a.range.q0 };
                    a.range = self.nextmatch(f, re, start, sign)?;
                }
                AddrKind::File(re) => {
                    f = self.matchfile(re)?;
                    a = self.mkaddr(f)?;
                }
                AddrKind::All => {
                    a.range = Range::new(0, self.buf(f)?.len());
                    return Ok(a);
                }
                AddrKind::Comma(left) | AddrKind::Semi(left) => {
                    let a1 = match left {
                        Some(l) => self.cmdaddress(l, a, 0)?,
                        None => Address {
                            range: Range::point(0),
                            buf: a.buf,
                        },
                    };
                    if matches!(ap.kind, AddrKind::Semi(_)) {
                        f = a1.buf;
                        a = a1;
                        self.ws.get_mut(f)?.set_dot(a1.range);
                    }
                    let a2 = match &ap.next {
                        Some(r) => self.cmdaddress(r, a, 0)?,
                        None => Address {
                            range: Range::point(self.buf(f)?.len()),
                            buf: a.buf,
                        },
                    };
                    if a1.buf != a2.buf {
                        return Err(EditError::eval("addresses in different files"));
                    }
                    if a2.range.q1 < a1.range.q0 {
                        return Err(EditError::eval("addresses out of order"));
                    }
                    return Ok(Address {
                        range: Range::new(a1.range.q0, a2.range.q1),
                        buf: a1.buf,
                    });
                }
                AddrKind::Plus | AddrKind::Minus => {
                    sign = if ap.kind == AddrKind::Plus { 1 } else { -1 };
                    let bare = match &ap.next {
                        None => true,
                        Some(n) => matches!(n.kind, AddrKind::Plus | AddrKind::Minus),
                    };
                    if bare {
                        a = self.lineaddr(1, a, sign)?;
                    }
                }
            }
            cur = ap.next.as_deref();
        }
        Ok(a)
    }

    /// Line `l` counted from `addr`: absolute when `sign` is 0, forward
    /// from its end when positive, backward from its start when negative.
    fn lineaddr(&self, l: usize, addr: Address, sign: i32) -> Result<Address, EditError> {
        let f = self.buf(addr.buf)?;
        let nc = f.len();
        let mut a = Address {
            range: Range::default(),
            buf: addr.buf,
        };
        if sign >= 0 {
            let mut p;
            if l == 0 {
                if sign == 0 || addr.range.q1 == 0 {
                    a.range = Range::point(0);
                    return Ok(a);
                }
                a.range.q0 = addr.range.q1;
                p = addr.range.q1 - 1;
            } else {
                let mut n;
                if sign == 0 || addr.range.q1 == 0 {
                    p = 0;
                    n = 1;
                } else {
                    p = addr.range.q1 - 1;
                    n = usize::from(f.is_newline_at(p));
                    p += 1;
                }
                while n < l {
                    if p >= nc {
                        return Err(EditError::eval("address out of range"));
                    }
                    if f.is_newline_at(p) {
                        n += 1;
                    }
                    p += 1;
                }
                a.range.q0 = p;
            }
            while p < nc {
                let c = f.char_at(p);
                p += 1;
                if c == Some('\n') {
                    break;
                }
            }
            a.range.q1 = p;
        } else {
            let mut p = addr.range.q0;
            if l == 0 {
                a.range.q1 = addr.range.q0;
            } else {
                let mut n = 0;
                while n < l {
                    if p == 0 {
                        n += 1;
                        if n != l {
                            return Err(EditError::eval("address out of range"));
                        }
                    } else if !f.is_newline_at(p - 1) {
                        p -= 1;
                    } else {
                        n += 1;
                        if n != l {
                            p -= 1;
                        }
                    }
                }
                a.range.q1 = p;
                if p > 0 {
                    p -= 1;
                }
            }
            while p > 0 && !f.is_newline_at(p - 1) {
                p -= 1;
            }
            a.range.q0 = p;
        }
        Ok(a)
    }

    fn charaddr(&self, l: usize, addr: Address, sign: i32) -> Result<Address, EditError> {
        let nc = self.buf(addr.buf)?.len();
        let p = match sign {
            0 => Some(l),
            s if s < 0 => addr.range.q0.checked_sub(l),
            _ => addr.range.q1.checked_add(l),
        };
        match p {
            Some(p) if p <= nc => Ok(Address {
                range: Range::point(p),
                buf: addr.buf,
            }),
            _ => Err(EditError::eval("address out of range")),
        }
    }

    /// Search for `re` from `p`, forward or backward, wrapping. An empty
    /// match right at `p` is skipped so repeated searches make progress.
    fn nextmatch(&mut self, f: BufferId, re: &str, p: usize, sign: i32) -> Result<Range, EditError> {
        let pat = self.session.compile(re, "address")?;
        let src = self.ws.get(f)?;
        let no_match = || EditError::eval("no match for regexp");
        if sign >= 0 {
            let mut sel = pat.search_forward(src, p).ok_or_else(no_match)?.whole();
            if sel.is_empty() && sel.q0 == p {
                let next = if p + 1 > src.len() { 0 } else { p + 1 };
                sel = pat.search_forward(src, next).ok_or_else(no_match)?.whole();
            }
            Ok(sel)
        } else {
            let mut sel = pat.search_backward(src, p).ok_or_else(no_match)?.whole();
            if sel.is_empty() && sel.q1 == p {
                let next = if p == 0 { src.len() } else { p - 1 };
                sel = pat.search_backward(src, next).ok_or_else(no_match)?.whole();
            }
            Ok(sel)
        }
    }

    /// The single buffer whose status line matches `re`.
    fn matchfile(&mut self, re: &str) -> Result<BufferId, EditError> {
        let pat = self.session.compile(re, "file match")?;
        let mut found = None;
        for id in self.ws.ids() {
            if self.filematch(id, &pat)? {
                if found.is_some() {
                    return Err(EditError::eval(format!("too many files match \"{re}\"")));
                }
                found = Some(id);
            }
        }
        found.ok_or_else(|| EditError::eval(format!("no file matches \"{re}\"")))
    }

    fn filematch(&self, id: BufferId, pat: &Pattern) -> Result<bool, EditError> {
        let line = self.buf(id)?.status_line(self.ws.current() == Some(id));
        let src = StrSource::new(&line);
        Ok(pat.is_match_in(&src, Range::new(0, src.len())))
    }

    // ---- commands ----

    fn nl_cmd(&mut self, addr: Option<Address>) -> Result<(), EditError> {
        let target = match addr {
            Some(a) => a,
            None => {
                let a = self.mkaddr(self.current()?)?;
                let mut r = self.lineaddr(0, a, -1)?;
                r.range.q1 = self.lineaddr(0, a, 1)?.range.q1;
                if r.range == a.range {
                    r = self.lineaddr(1, a, 1)?;
                }
                r
            }
        };
        self.select(target.buf, target.range)
    }

    fn group_cmd(&mut self, cp: &Cmd) -> Result<(), EditError> {
        let mut dot = match &cp.addr {
            Some(ap) => {
                let start = self.initial_dot(ap)?;
                self.cmdaddress(ap, start, 0)?
            }
            None => self.mkaddr(self.current()?)?,
        };
        for sub in &cp.body {
            if dot.range.q1 > self.buf(dot.buf)?.len() {
                return Err(EditError::Invariant(
                    "dot extends past end of buffer during { command".into(),
                ));
            }
            self.select(dot.buf, dot.range)?;
            self.exec(sub)?;
            // a member may have closed or switched buffers
            if self.ws.buffer(dot.buf).is_none() {
                dot = self.mkaddr(self.current()?)?;
            }
        }
        Ok(())
    }

    fn append(&mut self, cp: &Cmd, addr: Address, after: bool) -> Result<(), EditError> {
        let p = if after { addr.range.q1 } else { addr.range.q0 };
        let text = cp.text();
        if !text.is_empty() {
            self.record(addr.buf, |e| e.insert(p, text))?;
        }
        self.select(addr.buf, Range::point(p))
    }

    fn c_cmd(&mut self, cp: &Cmd, addr: Address) -> Result<(), EditError> {
        let r = addr.range;
        let text = cp.text();
        self.record(addr.buf, |e| e.replace(r.q0, r.q1, text))?;
        self.select(addr.buf, r)
    }

    fn d_cmd(&mut self, addr: Address) -> Result<(), EditError> {
        let r = addr.range;
        if !r.is_empty() {
            self.record(addr.buf, |e| e.delete(r.q0, r.q1))?;
        }
        self.select(addr.buf, Range::point(r.q0))
    }

    fn p_cmd(&mut self, addr: Address) -> Result<(), EditError> {
        let text = self.buf(addr.buf)?.slice(addr.range.q0, addr.range.q1);
        self.diag.output(&text);
        self.select(addr.buf, addr.range)
    }

    fn eq_cmd(&mut self, cp: &Cmd, addr: Address) -> Result<(), EditError> {
        let chars = match cp.text().trim() {
            "" => false,
            "#" => true,
            other => return Err(EditError::parse(format!("bad argument to =: {other}"))),
        };
        let b = self.buf(addr.buf)?;
        let r = addr.range;
        let mut s = String::new();
        if !b.name().is_empty() {
            s.push_str(b.name());
            s.push(':');
        }
        if chars {
            s.push_str(&format!("#{}", r.q0));
            if r.q1 != r.q0 {
                s.push_str(&format!(",#{}", r.q1));
            }
        } else {
            let l1 = 1 + b.count_newlines(0, r.q0);
            let mut l2 = l1 + b.count_newlines(r.q0, r.q1);
            if r.q1 > r.q0 && b.is_newline_at(r.q1 - 1) {
                l2 -= 1;
            }
            s.push_str(&l1.to_string());
            if l2 != l1 {
                s.push_str(&format!(",{l2}"));
            }
        }
        s.push('\n');
        self.diag.output(&s);
        Ok(())
    }

    fn s_cmd(&mut self, cp: &Cmd, addr: Address) -> Result<(), EditError> {
        let re = cp.re.as_deref().unwrap_or_default();
        let pat = self.session.compile(re, "s command")?;
        let template = cp.text();
        let r = addr.range;

        let replacements = {
            let src = self.buf(addr.buf)?;
            let mut n = cp.count;
            let mut op: Option<usize> = None;
            let mut out = Vec::new();
            for sel in pat.matches(src, r.q0, Some(r.q1)) {
                let w = sel.whole();
                // no empty match right after the previous one
                if w.is_empty() && Some(w.q0) == op {
                    continue;
                }
                op = Some(w.q1);
                n -= 1;
                if n > 0 {
                    continue;
                }
                out.push((w, expand(template, &sel, src)));
                if !cp.global {
                    break;
                }
            }
            out
        };

        if replacements.is_empty() && self.session.nest == 0 {
            return Err(EditError::eval("no substitution"));
        }
        for (w, text) in &replacements {
            self.record(addr.buf, |e| e.replace(w.q0, w.q1, text))?;
        }
        self.select(addr.buf, r)
    }

    fn m_cmd(&mut self, cp: &Cmd, addr: Address) -> Result<(), EditError> {
        let dest = cp
            .mtaddr
            .as_ref()
            .ok_or_else(|| EditError::parse("bad address"))?;
        let dot = self.mkaddr(addr.buf)?;
        let addr2 = self.cmdaddress(dest, dot, 0)?;
        if cp.letter == CmdLetter::Char('m') {
            self.move_text(addr, addr2)
        } else {
            self.copy_text(addr, addr2)
        }
    }

    fn copy_text(&mut self, addr: Address, addr2: Address) -> Result<(), EditError> {
        let text = self.buf(addr.buf)?.slice(addr.range.q0, addr.range.q1);
        let p = addr2.range.q1;
        self.record(addr2.buf, |e| e.insert(p, &text))?;
        self.select(addr2.buf, Range::point(p))
    }

    fn move_text(&mut self, addr: Address, addr2: Address) -> Result<(), EditError> {
        let r = addr.range;
        if addr.buf != addr2.buf || r.q1 <= addr2.range.q0 {
            self.record(addr.buf, |e| e.delete(r.q0, r.q1))?;
            self.copy_text(addr, addr2)
        } else if r.q0 >= addr2.range.q1 {
            self.copy_text(addr, addr2)?;
            self.record(addr.buf, |e| e.delete(r.q0, r.q1))
        } else if r == addr2.range {
            Ok(())
        } else {
            Err(EditError::eval("move overlaps itself"))
        }
    }

    fn g_cmd(&mut self, cp: &Cmd, addr: Address) -> Result<(), EditError> {
        let re = cp.re.as_deref().unwrap_or_default();
        let pat = self.session.compile(re, "g command")?;
        let matched = pat.is_match_in(self.buf(addr.buf)?, addr.range);
        if matched != (cp.letter == CmdLetter::Char('v')) {
            self.select(addr.buf, addr.range)?;
            if let Some(sub) = &cp.cmd {
                self.exec(sub)?;
            }
        }
        Ok(())
    }

    fn x_cmd(&mut self, cp: &Cmd, addr: Address) -> Result<(), EditError> {
        let is_x = cp.letter == CmdLetter::Char('x');
        let ranges = match &cp.re {
            Some(re) => self.loop_ranges(re, addr, is_x)?,
            None => self.line_ranges(addr)?,
        };
        self.session.nest += 1;
        let result = self.loopcmd(addr.buf, cp, &ranges);
        self.session.nest -= 1;
        result
    }

    /// The matches of `re` in `addr` (`x`), or the gaps between them (`y`).
    fn loop_ranges(&mut self, re: &str, addr: Address, is_x: bool) -> Result<Vec<Range>, EditError> {
        let pat = self.session.compile(re, "x command")?;
        let src = self.buf(addr.buf)?;
        let r = addr.range;
        let mut out = Vec::new();
        let mut op = if is_x { None } else { Some(r.q0) };
        // an empty match at the very end leaves no gap after it
        let mut ends_empty = false;
        for sel in pat.matches(src, r.q0, Some(r.q1)) {
            let w = sel.whole();
            ends_empty = w.is_empty() && w.q0 == r.q1;
            if w.is_empty() && Some(w.q0) == op {
                continue;
            }
            out.push(if is_x {
                w
            } else {
                Range::new(op.unwrap_or(r.q0), w.q0)
            });
            op = Some(w.q1);
        }
        if let (false, Some(o)) = (is_x, op) {
            if o <= r.q1 && !ends_empty {
                out.push(Range::new(o, r.q1));
            }
        }
        Ok(out)
    }

    /// The lines of `addr`, the first and last clipped to it.
    fn line_ranges(&self, addr: Address) -> Result<Vec<Range>, EditError> {
        let r = addr.range;
        let mut out = Vec::new();
        let mut a3 = Address {
            range: Range::point(r.q0),
            buf: addr.buf,
        };
        let mut p = r.q0;
        while p < r.q1 {
            a3.range.q0 = a3.range.q1;
            let mut linesel = Range::default();
            let step = p != r.q0 || {
                linesel = self.lineaddr(0, a3, 1)?.range;
                linesel.q1 == p
            };
            if step {
                linesel = self.lineaddr(1, a3, 1)?.range;
            }
            if linesel.q0 >= r.q1 {
                break;
            }
            if linesel.q1 >= r.q1 {
                linesel.q1 = r.q1;
            }
            if linesel.q1 > linesel.q0 && linesel.q0 >= a3.range.q1 && linesel.q1 > a3.range.q1 {
                a3.range = linesel;
                out.push(linesel);
                p = a3.range.q1;
                continue;
            }
            break;
        }
        Ok(out)
    }

    fn loopcmd(&mut self, f: BufferId, cp: &Cmd, ranges: &[Range]) -> Result<(), EditError> {
        let Some(sub) = &cp.cmd else {
            return Ok(());
        };
        for r in ranges {
            self.select(f, *r)?;
            self.exec(sub)?;
        }
        Ok(())
    }

    fn filelooper(&mut self, cp: &Cmd) -> Result<(), EditError> {
        let CmdLetter::Char(letter) = cp.letter else {
            return Err(EditError::parse(format!("unknown command {}", cp.letter)));
        };
        if self.session.file_looping {
            return Err(EditError::Reentrant(letter));
        }
        let keep_matches = letter == 'X';
        let pat = match &cp.re {
            Some(re) => Some(self.session.compile(re, "X command")?),
            None => None,
        };
        let mut targets = Vec::new();
        for id in self.ws.ids() {
            let b = self.buf(id)?;
            match &pat {
                None if b.name().is_empty() => {}
                None => targets.push(id),
                Some(pat) => {
                    if self.filematch(id, pat)? == keep_matches {
                        targets.push(id);
                    }
                }
            }
        }
        debug!(letter = %letter, buffers = targets.len(), "file loop");

        self.session.file_looping = true;
        self.session.nest += 1;
        for id in &targets {
            self.ws.get_mut(*id)?.pin();
        }
        let result = self.run_on_buffers(cp, &targets);
        for id in &targets {
            if let Some(b) = self.ws.buffer_mut(*id) {
                b.unpin();
            }
        }
        self.session.nest -= 1;
        self.session.file_looping = false;
        result
    }

    fn run_on_buffers(&mut self, cp: &Cmd, targets: &[BufferId]) -> Result<(), EditError> {
        let Some(sub) = &cp.cmd else {
            return Ok(());
        };
        for id in targets {
            match self.ws.buffer(*id) {
                Some(b) if !b.closing => {}
                _ => continue,
            }
            self.ws.set_current(*id);
            self.exec(sub)?;
        }
        Ok(())
    }

    fn u_cmd(&mut self, cp: &Cmd) -> Result<(), EditError> {
        let f = self.current()?;
        let b = self.ws.get_mut(f)?;
        if !b.pending().is_empty() {
            return Err(EditError::eval("can't undo with edits pending"));
        }
        for _ in 0..cp.count.unsigned_abs() {
            let done = if cp.count >= 0 { b.undo() } else { b.redo() };
            if !done {
                break;
            }
        }
        Ok(())
    }

    // ---- files and buffers ----

    /// Name argument of `e r w f`, falling back to the buffer's name.
    fn cmdname(&mut self, f: BufferId, text: &str, set: bool) -> Result<String, EditError> {
        let s = text.trim();
        let b = self.ws.get_mut(f)?;
        if s.is_empty() {
            if b.name().is_empty() {
                return Err(EditError::eval("no file name given"));
            }
            return Ok(b.name().to_string());
        }
        if set && s != b.name() {
            b.set_name(s);
            b.mark_dirty();
        }
        Ok(s.to_string())
    }

    fn e_cmd(&mut self, cp: &Cmd, addr: Option<Address>) -> Result<(), EditError> {
        let f = self.current()?;
        let replace_all = addr.is_none();
        if replace_all {
            let b = self.buf(f)?;
            if b.is_dirty() {
                return Err(EditError::eval(format!("{} modified", b.name())));
            }
        }
        let r = match addr {
            Some(a) => a.range,
            None => Range::new(0, self.buf(f)?.len()),
        };
        let whole = r.q0 == 0 && r.q1 == self.buf(f)?.len();
        let name = self.cmdname(f, cp.text(), false)?;
        let path = self.ws.resolve(&name);
        if path.is_dir() {
            return Err(EditError::Io(format!("{name} is a directory")));
        }
        let bytes =
            std::fs::read(&path).map_err(|e| EditError::Io(format!("can't open {name}: {e}")))?;
        let (text, nulls) = decode(&bytes);
        if replace_all {
            self.cmdname(f, &name, true)?;
        }
        self.record(f, |e| e.replace(r.q0, r.q1, &text))?;
        if nulls {
            self.diag.warning(&format!("{name}: NUL bytes elided"));
        } else if whole && name == self.buf(f)?.name() {
            self.ws.get_mut(f)?.edit_clean = true;
        }
        self.select(f, Range::point(r.q0))
    }

    fn w_cmd(&mut self, cp: &Cmd, addr: Address) -> Result<(), EditError> {
        let f = addr.buf;
        if !self.buf(f)?.pending().is_empty() {
            return Err(EditError::eval("can't write file with pending modifications"));
        }
        let name = self.cmdname(f, cp.text(), false)?;
        let b = self.buf(f)?;
        let text = b.slice(addr.range.q0, addr.range.q1);
        let whole = addr.range.q0 == 0 && addr.range.q1 == b.len();
        let unnamed = b.name().is_empty();
        let same_name = unnamed || name == b.name();
        let path = self.ws.resolve(&name);
        std::fs::write(&path, &text)
            .map_err(|e| EditError::Io(format!("can't write {name}: {e}")))?;
        debug!(path = %path.display(), "wrote");
        if unnamed {
            self.ws.get_mut(f)?.set_name(&name);
        }
        if whole && same_name {
            self.ws.get_mut(f)?.mark_clean();
        }
        self.diag
            .warning(&format!("{name}: #{}", addr.range.len()));
        Ok(())
    }

    fn f_cmd(&mut self, cp: &Cmd) -> Result<(), EditError> {
        let f = self.current()?;
        if !cp.text().trim().is_empty() {
            self.cmdname(f, cp.text(), true)?;
        }
        let line = self.buf(f)?.status_line(true);
        self.diag.output(&line);
        Ok(())
    }

    fn b_cmd(&mut self, cp: &Cmd) -> Result<(), EditError> {
        let name = cp.text().trim();
        let id = self
            .ws
            .find(name)
            .ok_or_else(|| EditError::eval(format!("no such file \"{name}\"")))?;
        self.ws.set_current(id);
        if self.session.nest == 0 {
            let line = self.buf(id)?.status_line(true);
            self.diag.output(&line);
        }
        Ok(())
    }

    /// `B`: make each named file current, opening the ones not open yet.
    fn open_cmd(&mut self, cp: &Cmd) -> Result<(), EditError> {
        let names: Vec<&str> = cp.text().split_whitespace().collect();
        if names.is_empty() {
            return Err(EditError::eval("no file name given"));
        }
        for name in names {
            if let Some(id) = self.ws.find(name) {
                self.ws.set_current(id);
                continue;
            }
            let text = read_if_exists(&self.ws.resolve(name))
                .map_err(|e| EditError::Io(format!("can't open {name}: {e}")))?;
            let id = self.ws.open(name, &text);
            debug!(name, ?id, "opened");
            self.ws.set_current(id);
        }
        Ok(())
    }

    /// `D`: close the named buffers, or the current one, when the
    /// invocation commits.
    fn close_cmd(&mut self, cp: &Cmd) -> Result<(), EditError> {
        let names: Vec<&str> = cp.text().split_whitespace().collect();
        if names.is_empty() {
            let f = self.current()?;
            self.ws.get_mut(f)?.closing = true;
            return Ok(());
        }
        for name in names {
            match self.ws.find(name) {
                Some(id) => self.ws.get_mut(id)?.closing = true,
                None => self.diag.warning(&format!("no such file \"{name}\"")),
            }
        }
        Ok(())
    }

    fn cd_cmd(&mut self, cp: &Cmd) -> Result<(), EditError> {
        let arg = cp.text().trim();
        let target = if arg.is_empty() {
            std::env::var_os("HOME")
                .map(PathBuf::from)
                .ok_or_else(|| EditError::eval("no home directory"))?
        } else {
            self.ws.resolve(arg)
        };
        let dir = std::fs::canonicalize(&target)
            .map_err(|e| EditError::Io(format!("can't cd to {}: {e}", target.display())))?;
        if !dir.is_dir() {
            return Err(EditError::Io(format!("can't cd to {}: not a directory", dir.display())));
        }
        debug!(dir = %dir.display(), "cd");
        self.ws.set_dir(dir);
        Ok(())
    }

    /// `<` replaces dot with a command's output, `|` filters dot through a
    /// command and `>` sends dot to a command and prints what comes back.
    fn pipe_cmd(&mut self, cp: &Cmd, addr: Address) -> Result<(), EditError> {
        let CmdLetter::Char(letter) = cp.letter else {
            return Err(EditError::parse(format!("unknown command {}", cp.letter)));
        };
        let cmdline = cp.text().trim();
        if cmdline.is_empty() {
            return Err(EditError::eval(format!("no command specified for {letter}")));
        }
        let r = addr.range;
        let input = match letter {
            '<' => None,
            _ => Some(self.buf(addr.buf)?.slice(r.q0, r.q1)),
        };
        let dir = self.ws.dir().to_path_buf();
        let out = self.process.run(cmdline, &dir, input.as_deref())?;
        if letter == '>' {
            if !out.is_empty() {
                self.diag.output(&out);
            }
            return self.select(addr.buf, r);
        }
        self.record(addr.buf, |e| e.replace(r.q0, r.q1, &out))?;
        self.select(addr.buf, Range::point(r.q0))
    }
}

/// The address a command runs on when it names none.
fn default_address(cp: &Cmd, defaddr: DefAddr) -> Option<Addr> {
    let default = || {
        Addr::new(if defaddr == DefAddr::All {
            AddrKind::All
        } else {
            AddrKind::Dot
        })
    };
    let newline = cp.letter == CmdLetter::Char('\n');
    match &cp.addr {
        None if !newline => Some(default()),
        Some(a) if matches!(a.kind, AddrKind::File(_)) && a.next.is_none() && !newline => {
            Some(Addr {
                kind: a.kind.clone(),
                next: Some(Box::new(default())),
            })
        }
        other => other.clone(),
    }
}

/// Expand `&` and `\1`..`\9` in an `s` replacement.
fn expand(template: &str, sel: &RangeSet, src: &dyn TextSource) -> String {
    let mut out = String::new();
    let mut chars = template.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(d @ '1'..='9') => {
                    let i = d as usize - '0' as usize;
                    if let Some(g) = sel.group(i) {
                        out.push_str(&src.slice(g.q0, g.q1));
                    }
                }
                Some(d) => out.push(d),
                None => out.push('\\'),
            },
            '&' => {
                let w = sel.whole();
                out.push_str(&src.slice(w.q0, w.q1));
            }
            _ => out.push(c),
        }
    }
    out
}

fn decode(bytes: &[u8]) -> (String, bool) {
    let mut text = String::from_utf8_lossy(bytes).into_owned();
    let nulls = text.contains('\0');
    if nulls {
        text.retain(|c| c != '\0');
    }
    (text, nulls)
}

fn read_if_exists(path: &Path) -> std::io::Result<String> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(decode(&bytes).0),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e),
    }
}
