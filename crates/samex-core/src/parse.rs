use std::fmt;

use crate::session::Session;
use crate::EditError;

/// One element of an address chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddrKind {
    /// `N`: a line number.
    Line(usize),
    /// `#N`: a rune offset.
    Char(usize),
    Dot,
    End,
    /// `'`, parsed but never resolvable.
    Mark,
    /// `/re/`
    Forward(String),
    /// `?re?`
    Backward(String),
    /// `"re"`: the buffer whose status line matches.
    File(String),
    /// Whole buffer. Only ever synthesized as a default address.
    All,
    Plus,
    Minus,
    /// `a,b`. The left side is the payload, the right side is `next`.
    Comma(Option<Box<Addr>>),
    /// `a;b`, which evaluates `b` with dot set to `a`.
    Semi(Option<Box<Addr>>),
}

/// A parsed address: a chain of simple addresses linked through `next`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Addr {
    pub kind: AddrKind,
    pub next: Option<Box<Addr>>,
}

impl Addr {
    pub fn new(kind: AddrKind) -> Self {
        Self { kind, next: None }
    }

    fn with_next(kind: AddrKind, next: Option<Addr>) -> Self {
        Self {
            kind,
            next: next.map(Box::new),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmdLetter {
    Char(char),
    /// `cd`
    Cd,
    /// `{ ... }`
    Group,
}

impl fmt::Display for CmdLetter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CmdLetter::Char('\n') => f.write_str("\\n"),
            CmdLetter::Char(c) => write!(f, "{c}"),
            CmdLetter::Cd => f.write_str("cd"),
            CmdLetter::Group => f.write_str("{"),
        }
    }
}

/// A parsed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cmd {
    pub letter: CmdLetter,
    pub addr: Option<Addr>,
    pub re: Option<String>,
    /// Sub-command of `x y X Y g v`.
    pub cmd: Option<Box<Cmd>>,
    /// Members of a `{` group.
    pub body: Vec<Cmd>,
    pub text: Option<String>,
    /// Destination of `m` and `t`.
    pub mtaddr: Option<Addr>,
    /// Match index for `s`, repeat count for `u`.
    pub count: i64,
    /// Trailing `g` on `s`.
    pub global: bool,
}

impl Cmd {
    pub fn new(letter: CmdLetter, addr: Option<Addr>) -> Self {
        Self {
            letter,
            addr,
            re: None,
            cmd: None,
            body: Vec::new(),
            text: None,
            mtaddr: None,
            count: 0,
            global: false,
        }
    }

    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DefAddr {
    No,
    Dot,
    All,
}

/// Syntax of one command letter.
#[derive(Debug)]
pub(crate) struct CmdSpec {
    pub letter: CmdLetter,
    /// Takes text, either delimited or as following lines ended by `.`.
    pub text: bool,
    pub regexp: bool,
    /// Takes a destination address (`m`, `t`).
    pub addr: bool,
    /// Command to run when the sub-command is omitted.
    pub defcmd: Option<char>,
    pub defaddr: DefAddr,
    /// 0: no count; 1: unsigned; 2: may be negative.
    pub count: u8,
    /// Characters ending a token argument; empty if none is taken.
    pub token: &'static str,
}

const LINEX: &str = "\n";
const WORDX: &str = " \t\n";

const fn spec(
    c: char,
    text: bool,
    regexp: bool,
    addr: bool,
    defcmd: Option<char>,
    defaddr: DefAddr,
    count: u8,
    token: &'static str,
) -> CmdSpec {
    CmdSpec {
        letter: CmdLetter::Char(c),
        text,
        regexp,
        addr,
        defcmd,
        defaddr,
        count,
        token,
    }
}

pub(crate) static CMDTAB: &[CmdSpec] = &[
    spec('\n', false, false, false, None, DefAddr::Dot, 0, ""),
    spec('a', true, false, false, None, DefAddr::Dot, 0, ""),
    spec('b', false, false, false, None, DefAddr::No, 0, LINEX),
    spec('B', false, false, false, None, DefAddr::No, 0, LINEX),
    spec('c', true, false, false, None, DefAddr::Dot, 0, ""),
    CmdSpec {
        letter: CmdLetter::Cd,
        text: false,
        regexp: false,
        addr: false,
        defcmd: None,
        defaddr: DefAddr::No,
        count: 0,
        token: LINEX,
    },
    spec('d', false, false, false, None, DefAddr::Dot, 0, ""),
    spec('D', false, false, false, None, DefAddr::No, 0, LINEX),
    spec('e', false, false, false, None, DefAddr::No, 0, WORDX),
    spec('f', false, false, false, None, DefAddr::No, 0, WORDX),
    spec('g', false, true, false, Some('p'), DefAddr::Dot, 0, ""),
    spec('i', true, false, false, None, DefAddr::Dot, 0, ""),
    spec('m', false, false, true, None, DefAddr::Dot, 0, ""),
    spec('p', false, false, false, None, DefAddr::Dot, 0, ""),
    spec('r', false, false, false, None, DefAddr::Dot, 0, WORDX),
    spec('s', false, true, false, None, DefAddr::Dot, 1, ""),
    spec('t', false, false, true, None, DefAddr::Dot, 0, ""),
    spec('u', false, false, false, None, DefAddr::No, 2, ""),
    spec('v', false, true, false, Some('p'), DefAddr::Dot, 0, ""),
    spec('w', false, false, false, None, DefAddr::All, 0, WORDX),
    spec('x', false, true, false, Some('p'), DefAddr::Dot, 0, ""),
    spec('y', false, true, false, Some('p'), DefAddr::Dot, 0, ""),
    spec('=', false, false, false, None, DefAddr::Dot, 0, LINEX),
    spec('X', false, true, false, Some('f'), DefAddr::No, 0, ""),
    spec('Y', false, true, false, Some('f'), DefAddr::No, 0, ""),
    spec('<', false, false, false, None, DefAddr::Dot, 0, LINEX),
    spec('|', false, false, false, None, DefAddr::Dot, 0, LINEX),
    spec('>', false, false, false, None, DefAddr::Dot, 0, LINEX),
];

pub(crate) fn lookup(letter: CmdLetter) -> Option<&'static CmdSpec> {
    CMDTAB.iter().find(|s| s.letter == letter)
}

enum Parsed {
    Cmd(Cmd),
    CloseBrace,
    End,
}

/// Recursive-descent parser over command text.
///
/// The text must end with a newline; [`Session::run`] adds one.
pub struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    pub fn new(text: &str) -> Self {
        Self {
            chars: text.chars().collect(),
            pos: 0,
        }
    }

    /// Parse the next top-level command, or `None` at end of input.
    ///
    /// Regexps left empty resolve to the session's last pattern here, at
    /// parse time; non-empty ones become the new last pattern.
    pub fn parse_command(
        &mut self,
        session: &mut Session,
        nest: usize,
    ) -> Result<Option<Cmd>, EditError> {
        match self.parse(session, nest)? {
            Parsed::Cmd(cmd) => Ok(Some(cmd)),
            Parsed::CloseBrace | Parsed::End => Ok(None),
        }
    }

    fn getch(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn nextc(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn ungetch(&mut self) {
        self.pos = self.pos.saturating_sub(1);
    }

    fn skipbl(&mut self) -> Option<char> {
        while matches!(self.nextc(), Some(' ' | '\t')) {
            self.pos += 1;
        }
        self.nextc()
    }

    fn atnl(&mut self) -> Result<(), EditError> {
        self.skipbl();
        match self.getch() {
            Some('\n') => Ok(()),
            Some(c) => Err(EditError::parse(format!("newline expected (saw {c})"))),
            None => Err(EditError::parse("newline expected")),
        }
    }

    /// Digits, or the sign alone when there are none.
    fn getnum(&mut self, signok: u8) -> i64 {
        let mut sign = 1;
        if signok > 1 && self.nextc() == Some('-') {
            sign = -1;
            self.getch();
        }
        let mut n: i64 = 0;
        let mut any = false;
        while let Some(d) = self.nextc().and_then(|c| c.to_digit(10)) {
            n = n.saturating_mul(10).saturating_add(i64::from(d));
            any = true;
            self.getch();
        }
        if any {
            sign * n
        } else {
            sign
        }
    }

    fn parse(&mut self, session: &mut Session, nest: usize) -> Result<Parsed, EditError> {
        let addr = self.compoundaddr(session)?;
        if self.skipbl().is_none() {
            return Ok(Parsed::End);
        }
        let Some(c) = self.getch() else {
            return Ok(Parsed::End);
        };
        let mut letter = CmdLetter::Char(c);
        if c == 'c' && self.nextc() == Some('d') {
            self.getch();
            letter = CmdLetter::Cd;
        }
        let mut cmd = Cmd::new(letter, addr);

        let Some(spec) = lookup(letter) else {
            return match c {
                '{' => {
                    cmd.letter = CmdLetter::Group;
                    loop {
                        if self.skipbl() == Some('\n') {
                            self.getch();
                        }
                        match self.parse(session, nest + 1)? {
                            Parsed::Cmd(sub) => cmd.body.push(sub),
                            Parsed::CloseBrace => break,
                            Parsed::End => return Err(EditError::parse("missing }")),
                        }
                    }
                    Ok(Parsed::Cmd(cmd))
                }
                '}' => {
                    self.atnl()?;
                    if nest == 0 {
                        return Err(EditError::parse("right brace with no left brace"));
                    }
                    Ok(Parsed::CloseBrace)
                }
                _ => Err(EditError::parse(format!("unknown command {c}"))),
            };
        };

        if letter == CmdLetter::Char('\n') {
            return Ok(Parsed::Cmd(cmd));
        }
        if spec.defaddr == DefAddr::No && cmd.addr.is_some() {
            return Err(EditError::parse("command takes no address"));
        }
        if spec.count > 0 {
            cmd.count = self.getnum(spec.count);
        }
        if spec.regexp {
            let loops_lines = matches!(c, 'x' | 'X') && matches!(self.nextc(), Some(' ' | '\t' | '\n'));
            if !loops_lines {
                self.skipbl();
                let delim = match self.getch() {
                    None | Some('\n') => return Err(EditError::parse("regular expression expected")),
                    Some(d) => okdelim(d)?,
                };
                cmd.re = Some(self.getregexp(session, delim)?);
                if c == 's' {
                    cmd.text = Some(self.getrhs(delim, 's')?);
                    if self.nextc() == Some(delim) {
                        self.getch();
                        if self.nextc() == Some('g') {
                            self.getch();
                            cmd.global = true;
                        }
                    }
                }
            }
        }
        if spec.addr {
            let dest = self
                .simpleaddr(session)?
                .ok_or_else(|| EditError::parse("bad address"))?;
            cmd.mtaddr = Some(dest);
        }
        if let Some(def) = spec.defcmd {
            if self.skipbl() == Some('\n') {
                self.getch();
                cmd.cmd = Some(Box::new(Cmd::new(CmdLetter::Char(def), None)));
            } else {
                match self.parse(session, nest)? {
                    Parsed::Cmd(sub) => cmd.cmd = Some(Box::new(sub)),
                    _ => return Err(EditError::parse(format!("missing command after {c}"))),
                }
            }
        } else if spec.text {
            cmd.text = Some(self.collecttext()?);
        } else if !spec.token.is_empty() {
            cmd.text = Some(self.collecttoken(spec.token)?);
        } else {
            self.atnl()?;
        }
        Ok(Parsed::Cmd(cmd))
    }

    /// Pattern up to `delim` or newline. `\delim` stands for `delim`.
    fn getregexp(&mut self, session: &mut Session, delim: char) -> Result<String, EditError> {
        let mut buf = String::new();
        while let Some(c) = self.getch() {
            if c == '\\' {
                if self.nextc() == Some(delim) {
                    self.getch();
                    buf.push(delim);
                    continue;
                }
                if self.nextc() == Some('\\') {
                    self.getch();
                    buf.push_str("\\\\");
                    continue;
                }
            } else if c == delim || c == '\n' {
                if c == '\n' {
                    self.ungetch();
                }
                break;
            }
            buf.push(c);
        }
        if !buf.is_empty() {
            session.remember_pattern(&buf);
        }
        session
            .last_pattern()
            .map(str::to_string)
            .ok_or_else(|| EditError::parse("no regular expression defined"))
    }

    /// Replacement or delimited text up to `delim` or newline.
    ///
    /// `\n` is a newline and `\delim` is `delim`. Any other escape keeps its
    /// backslash for `s`, which interprets `\1`..`\9` itself.
    fn getrhs(&mut self, delim: char, cmd: char) -> Result<String, EditError> {
        let mut s = String::new();
        while let Some(mut c) = self.getch() {
            if c == delim || c == '\n' {
                self.ungetch();
                break;
            }
            if c == '\\' {
                c = self
                    .getch()
                    .ok_or_else(|| EditError::parse("bad right hand side"))?;
                if c == '\n' {
                    self.ungetch();
                    c = '\\';
                } else if c == 'n' {
                    c = '\n';
                } else if c != delim && (cmd == 's' || c != '\\') {
                    s.push('\\');
                }
            }
            s.push(c);
        }
        Ok(s)
    }

    fn collecttext(&mut self) -> Result<String, EditError> {
        let mut text = String::new();
        if self.skipbl() == Some('\n') {
            self.getch();
            loop {
                let mut line = String::new();
                let mut ended = true;
                while let Some(c) = self.getch() {
                    if c == '\n' {
                        ended = false;
                        break;
                    }
                    line.push(c);
                }
                if ended {
                    if !line.is_empty() {
                        text.push_str(&line);
                        text.push('\n');
                    }
                    break;
                }
                if line == "." {
                    break;
                }
                text.push_str(&line);
                text.push('\n');
            }
            return Ok(text);
        }
        let delim = match self.getch() {
            Some(d) => okdelim(d)?,
            None => return Err(EditError::parse("newline expected")),
        };
        text = self.getrhs(delim, 'a')?;
        if self.nextc() == Some(delim) {
            self.getch();
        }
        self.atnl()?;
        Ok(text)
    }

    /// Everything up to a character in `end`, leading blanks included.
    fn collecttoken(&mut self, end: &str) -> Result<String, EditError> {
        let mut s = String::new();
        while let Some(c @ (' ' | '\t')) = self.nextc() {
            s.push(c);
            self.getch();
        }
        let mut last = None;
        while let Some(c) = self.getch() {
            last = Some(c);
            if end.contains(c) {
                break;
            }
            s.push(c);
        }
        if last != Some('\n') {
            self.atnl()?;
        }
        Ok(s)
    }

    fn simpleaddr(&mut self, session: &mut Session) -> Result<Option<Addr>, EditError> {
        let kind = match self.skipbl() {
            Some('#') => {
                self.getch();
                AddrKind::Char(self.getnum(1).unsigned_abs() as usize)
            }
            Some('0'..='9') => AddrKind::Line(self.getnum(1).unsigned_abs() as usize),
            Some(c @ ('/' | '?' | '"')) => {
                self.getch();
                let re = self.getregexp(session, c)?;
                match c {
                    '/' => AddrKind::Forward(re),
                    '?' => AddrKind::Backward(re),
                    _ => AddrKind::File(re),
                }
            }
            Some(c @ ('.' | '$' | '+' | '-' | '\'')) => {
                self.getch();
                match c {
                    '.' => AddrKind::Dot,
                    '$' => AddrKind::End,
                    '+' => AddrKind::Plus,
                    '-' => AddrKind::Minus,
                    _ => AddrKind::Mark,
                }
            }
            _ => return Ok(None),
        };
        let mut addr = Addr::new(kind);
        if let Some(next) = self.simpleaddr(session)? {
            let is_file = matches!(addr.kind, AddrKind::File(_));
            let signed = matches!(addr.kind, AddrKind::Plus | AddrKind::Minus);
            let implied_plus = match &next.kind {
                AddrKind::Dot | AddrKind::End | AddrKind::Mark if !is_file => {
                    return Err(EditError::parse("bad address syntax"));
                }
                AddrKind::File(_) => return Err(EditError::parse("bad address syntax")),
                AddrKind::Line(_) | AddrKind::Char(_) if is_file => false,
                AddrKind::Line(_)
                | AddrKind::Char(_)
                | AddrKind::Forward(_)
                | AddrKind::Backward(_) => !signed,
                _ => false,
            };
            addr.next = Some(Box::new(if implied_plus {
                Addr::with_next(AddrKind::Plus, Some(next))
            } else {
                next
            }));
        }
        Ok(Some(addr))
    }

    fn compoundaddr(&mut self, session: &mut Session) -> Result<Option<Addr>, EditError> {
        let left = self.simpleaddr(session)?;
        let op = self.skipbl();
        if op != Some(',') && op != Some(';') {
            return Ok(left);
        }
        self.getch();
        let next = self.compoundaddr(session)?;
        if let Some(n) = &next {
            if matches!(n.kind, AddrKind::Comma(None) | AddrKind::Semi(None)) {
                return Err(EditError::parse("bad address syntax"));
            }
        }
        let left = left.map(Box::new);
        let kind = if op == Some(',') {
            AddrKind::Comma(left)
        } else {
            AddrKind::Semi(left)
        };
        Ok(Some(Addr::with_next(kind, next)))
    }
}

fn okdelim(c: char) -> Result<char, EditError> {
    if c == '\\' || c.is_ascii_alphabetic() {
        return Err(EditError::parse(format!(
            "bad delimiter {c}; only non-alphanumeric characters allowed"
        )));
    }
    Ok(c)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(text: &str) -> Result<Vec<Cmd>, EditError> {
        let mut session = Session::new();
        parse_with(&mut session, text)
    }

    fn parse_with(session: &mut Session, text: &str) -> Result<Vec<Cmd>, EditError> {
        let mut src = text.to_string();
        if !src.ends_with('\n') {
            src.push('\n');
        }
        let mut p = Parser::new(&src);
        let mut out = Vec::new();
        while let Some(cmd) = p.parse_command(session, 0)? {
            out.push(cmd);
        }
        Ok(out)
    }

    fn one(text: &str) -> Cmd {
        let mut cmds = parse_all(text).unwrap();
        assert_eq!(cmds.len(), 1, "{cmds:?}");
        cmds.remove(0)
    }

    #[test]
    fn substitute_with_count_and_global() {
        let cmd = one("s2/a(b)/<\\1>/g");
        assert_eq!(cmd.letter, CmdLetter::Char('s'));
        assert_eq!(cmd.count, 2);
        assert_eq!(cmd.re.as_deref(), Some("a(b)"));
        assert_eq!(cmd.text(), "<\\1>");
        assert!(cmd.global);
    }

    #[test]
    fn substitute_escapes() {
        let cmd = one("s/x/a\\nb\\/c/");
        assert_eq!(cmd.text(), "a\nb/c");
        let cmd = one("s/\\/\\\\/-/");
        assert_eq!(cmd.re.as_deref(), Some("/\\\\"));
    }

    #[test]
    fn compound_address_shape() {
        let cmd = one("1,/foo/d");
        let addr = cmd.addr.unwrap();
        let AddrKind::Comma(Some(left)) = addr.kind else {
            panic!("expected comma, got {:?}", addr.kind);
        };
        assert_eq!(left.kind, AddrKind::Line(1));
        assert_eq!(addr.next.unwrap().kind, AddrKind::Forward("foo".into()));
    }

    #[test]
    fn implied_plus_between_simple_addresses() {
        let cmd = one("/a/3p");
        let addr = cmd.addr.unwrap();
        assert_eq!(addr.kind, AddrKind::Forward("a".into()));
        let plus = addr.next.unwrap();
        assert_eq!(plus.kind, AddrKind::Plus);
        assert_eq!(plus.next.unwrap().kind, AddrKind::Line(3));
    }

    #[test]
    fn file_address_takes_a_line_without_plus() {
        let cmd = one("\"x\"3p");
        let addr = cmd.addr.unwrap();
        assert_eq!(addr.next.unwrap().kind, AddrKind::Line(3));
    }

    #[test]
    fn dot_after_number_is_an_error() {
        let err = parse_all("3.p").unwrap_err();
        assert_eq!(err.message(), "bad address syntax");
    }

    #[test]
    fn loops_take_default_sub_commands() {
        let cmd = one(",x/a/");
        assert_eq!(cmd.cmd.unwrap().letter, CmdLetter::Char('p'));
        let cmd = one("X");
        assert!(cmd.re.is_none());
        assert_eq!(cmd.cmd.unwrap().letter, CmdLetter::Char('f'));
        let cmd = one("x d");
        assert!(cmd.re.is_none());
        assert_eq!(cmd.cmd.unwrap().letter, CmdLetter::Char('d'));
    }

    #[test]
    fn multiline_text() {
        let cmd = one("a\nline one\nline two\n.\n");
        assert_eq!(cmd.text(), "line one\nline two\n");
        let cmd = one("i/hi there/");
        assert_eq!(cmd.text(), "hi there");
    }

    #[test]
    fn groups_nest() {
        let cmd = one("{\n d\n p\n}");
        assert_eq!(cmd.letter, CmdLetter::Group);
        assert_eq!(cmd.body.len(), 2);
        assert_eq!(parse_all("}").unwrap_err().message(), "right brace with no left brace");
        assert_eq!(parse_all("{\np\n").unwrap_err().message(), "missing }");
    }

    #[test]
    fn cd_and_tokens() {
        let cmd = one("cd /tmp");
        assert_eq!(cmd.letter, CmdLetter::Cd);
        assert_eq!(cmd.text().trim(), "/tmp");
        let cmd = one("w out.txt");
        assert_eq!(cmd.text(), " out.txt");
        assert_eq!(cmd.addr, None);
        let cmd = one("| sort -u");
        assert_eq!(cmd.text(), " sort -u");
    }

    #[test]
    fn undo_count_may_be_negative() {
        assert_eq!(one("u").count, 1);
        assert_eq!(one("u3").count, 3);
        assert_eq!(one("u-").count, -1);
    }

    #[test]
    fn errors() {
        assert_eq!(parse_all("1e foo").unwrap_err().message(), "command takes no address");
        assert_eq!(parse_all("k").unwrap_err().message(), "unknown command k");
        assert!(parse_all("sa/b/c/").unwrap_err().message().starts_with("bad delimiter a"));
        assert_eq!(parse_all("m").unwrap_err().message(), "bad address");
        assert_eq!(parse_all("s//x/").unwrap_err().message(), "no regular expression defined");
        assert!(parse_all("d x").unwrap_err().message().starts_with("newline expected"));
    }

    #[test]
    fn empty_regexp_reuses_last() {
        let mut session = Session::new();
        let cmds = parse_with(&mut session, "/abc/\ns//x/").unwrap();
        assert_eq!(cmds[1].re.as_deref(), Some("abc"));
        assert_eq!(session.last_pattern(), Some("abc"));
    }

    #[test]
    fn move_destination() {
        let cmd = one("1,2m$");
        assert_eq!(cmd.mtaddr.unwrap().kind, AddrKind::End);
    }
}
