use crate::host::Diagnostics;
use crate::session::Session;
use crate::text::{Range, TextSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dir {
    None,
    Fore,
    Back,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Size {
    Line,
    Char,
}

/// Result of [`AddressEvaluator::eval`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluated {
    pub range: Range,
    /// False once any step failed; `range` is then the last good value.
    pub evaluated: bool,
    /// Offset in the address text where evaluation stopped.
    pub stopped_at: usize,
}

/// Resolves address strings like `3`, `#10`, `/re/`, `.,$` or `$-2`
/// against a text, the way a click or a typed address does.
///
/// Unlike command addresses, failures here are not errors: the evaluator
/// warns (unless told not to) and hands back the last good range.
pub struct AddressEvaluator<'a> {
    text: &'a dyn TextSource,
    session: &'a mut Session,
    diag: &'a mut dyn Diagnostics,
    limit: Option<Range>,
    show_errors: bool,
}

impl<'a> AddressEvaluator<'a> {
    pub fn new(
        text: &'a dyn TextSource,
        session: &'a mut Session,
        diag: &'a mut dyn Diagnostics,
    ) -> Self {
        Self {
            text,
            session,
            diag,
            limit: None,
            show_errors: true,
        }
    }

    /// Bound forward searches to `limit.q1` instead of wrapping.
    pub fn limit(mut self, limit: Range) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn show_errors(mut self, show: bool) -> Self {
        self.show_errors = show;
        self
    }

    /// Evaluate the address held in `raw[window]`, starting from `dot`.
    ///
    /// With `eval` false the text is only scanned, which tells the caller
    /// how much of it is an address.
    pub fn eval(&mut self, dot: Range, raw: &dyn TextSource, window: Range, eval: bool) -> Evaluated {
        let mut evaluated = eval;
        let (range, stopped_at) = self.address(dot, raw, window.q0, window.q1, &mut evaluated);
        Evaluated {
            range,
            evaluated,
            stopped_at,
        }
    }

    /// Evaluate a whole address string.
    pub fn eval_str(&mut self, dot: Range, addr: &str) -> Evaluated {
        let raw = crate::text::StrSource::new(addr);
        let window = Range::new(0, raw.len());
        self.eval(dot, &raw, window, true)
    }

    fn warn(&mut self, msg: &str) {
        if self.show_errors {
            self.diag.warning(msg);
        }
    }

    fn address(
        &mut self,
        mut ar: Range,
        raw: &dyn TextSource,
        q0: usize,
        q1: usize,
        evalp: &mut bool,
    ) -> (Range, usize) {
        let mut r = ar;
        let mut q = q0;
        let mut dir = Dir::None;
        let mut size = Size::Line;
        let mut c: Option<char> = None;
        while q < q1 {
            let prevc = c;
            c = raw.char_at(q);
            q += 1;
            let Some(ch) = c else {
                return (r, q - 1);
            };
            match ch {
                ';' | ',' => {
                    if ch == ';' {
                        ar = r;
                    }
                    if prevc.is_none() {
                        r.q0 = 0;
                    }
                    if q >= q1 {
                        r.q1 = self.text.len();
                    } else {
                        let (nr, nq) = self.address(ar, raw, q, q1, evalp);
                        r.q1 = nr.q1;
                        q = nq;
                    }
                    return (r, q);
                }
                '+' | '-' => {
                    if *evalp && matches!(prevc, Some('+' | '-')) {
                        let following = if q < q1 { raw.char_at(q) } else { None };
                        if !matches!(following, Some('#' | '/' | '?')) {
                            let d = if prevc == Some('+') { Dir::Fore } else { Dir::Back };
                            r = self.number(r, 1, d, Size::Line, evalp);
                        }
                    }
                    dir = if ch == '+' { Dir::Fore } else { Dir::Back };
                }
                '.' | '$' => {
                    if q != q0 + 1 {
                        return (r, q - 1);
                    }
                    if *evalp {
                        r = if ch == '.' {
                            ar
                        } else {
                            Range::point(self.text.len())
                        };
                    }
                    dir = if q < q1 { Dir::Fore } else { Dir::None };
                }
                '#' | '0'..='9' => {
                    let mut first = ch;
                    if ch == '#' {
                        if q == q1 {
                            return (r, q - 1);
                        }
                        let d = raw.char_at(q);
                        q += 1;
                        match d {
                            Some(d) if d.is_ascii_digit() => {
                                first = d;
                                size = Size::Char;
                            }
                            _ => return (r, q - 1),
                        }
                    }
                    let mut n = first.to_digit(10).unwrap_or(0) as usize;
                    while q < q1 {
                        match raw.char_at(q).and_then(|d| d.to_digit(10)) {
                            Some(d) => {
                                n = n.saturating_mul(10).saturating_add(d as usize);
                                q += 1;
                            }
                            None => break,
                        }
                    }
                    if *evalp {
                        r = self.number(r, n, dir, size, evalp);
                    }
                    dir = Dir::None;
                    size = Size::Line;
                }
                '?' | '/' => {
                    if ch == '?' {
                        dir = Dir::Back;
                    }
                    let mut pat = String::new();
                    while q < q1 {
                        let Some(pc) = raw.char_at(q) else { break };
                        q += 1;
                        match pc {
                            '\n' => {
                                q -= 1;
                                break;
                            }
                            '\\' => {
                                pat.push(pc);
                                if q == q1 {
                                    break;
                                }
                                if let Some(esc) = raw.char_at(q) {
                                    pat.push(esc);
                                }
                                q += 1;
                            }
                            '/' => break,
                            _ => pat.push(pc),
                        }
                    }
                    if *evalp {
                        r = self.regexp(r, &pat, dir, evalp);
                    }
                    dir = Dir::None;
                    size = Size::Line;
                }
                _ => return (r, q - 1),
            }
        }
        if *evalp && dir != Dir::None {
            r = self.number(r, 1, dir, Size::Line, evalp);
        }
        (r, q)
    }

    fn number(&mut self, r: Range, n: usize, dir: Dir, size: Size, evalp: &mut bool) -> Range {
        let nc = self.text.len();
        let t = self.text;
        let newline_before = |p: usize| t.is_newline_at(p - 1);

        if size == Size::Char {
            let target = match dir {
                Dir::Fore => r.q1.checked_add(n),
                Dir::Back => {
                    let base = if r.q0 == 0 && n > 0 { nc } else { r.q0 };
                    base.checked_sub(n)
                }
                Dir::None => Some(n),
            };
            return match target {
                Some(p) if p <= nc => Range::point(p),
                _ => self.rescue(r, evalp),
            };
        }

        let (mut q0, mut q1) = (r.q0, r.q1);
        let mut line = n;
        match dir {
            Dir::None => {
                q0 = 0;
                q1 = 0;
            }
            Dir::Fore => {
                if q1 > 0 {
                    while q1 < nc && !newline_before(q1) {
                        q1 += 1;
                    }
                }
                q0 = q1;
            }
            Dir::Back => {
                if q0 < nc {
                    while q0 > 0 && !newline_before(q0) {
                        q0 -= 1;
                    }
                }
                q1 = q0;
                while line > 0 && q0 > 0 {
                    if newline_before(q0) {
                        line -= 1;
                        q1 = q0;
                    }
                    q0 -= 1;
                }
                // 1-1 is line 0, the empty range at #0; 1-2 is out of range
                if line > 1 {
                    return self.rescue(r, evalp);
                }
                while q0 > 0 && !newline_before(q0) {
                    q0 -= 1;
                }
                return Range::new(q0, q1);
            }
        }
        while line > 0 && q1 < nc {
            let c = t.char_at(q1);
            q1 += 1;
            if c == Some('\n') || q1 == nc {
                line -= 1;
                if line > 0 {
                    q0 = q1;
                }
            }
        }
        // one past the last line is the end of the text
        if line == 1 && q1 == nc {
            return Range::new(q0, q1);
        }
        if line > 0 {
            return self.rescue(r, evalp);
        }
        Range::new(q0, q1)
    }

    fn rescue(&mut self, r: Range, evalp: &mut bool) -> Range {
        self.warn("address out of range");
        *evalp = false;
        r
    }

    fn regexp(&mut self, r: Range, pat: &str, dir: Dir, evalp: &mut bool) -> Range {
        let compiled = if pat.is_empty() {
            match self.session.last_compiled() {
                Some(p) => p,
                None => {
                    self.warn("no previous regular expression");
                    *evalp = false;
                    return r;
                }
            }
        } else {
            match self.session.compile(pat, "address") {
                Ok(p) => p,
                Err(e) => {
                    self.warn(&e.message());
                    *evalp = false;
                    return r;
                }
            }
        };
        let found = match (dir, self.limit) {
            (Dir::Back, _) => compiled.search_backward(self.text, r.q0),
            (_, Some(lim)) => compiled
                .execute(self.text, r.q1, Some(lim.q1), 1)
                .into_iter()
                .next(),
            (_, None) => compiled.search_forward(self.text, r.q1),
        };
        match found {
            Some(rs) => rs.whole(),
            None => {
                self.warn("no match for regexp");
                *evalp = false;
                r
            }
        }
    }
}
