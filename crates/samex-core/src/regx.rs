use regex::{Regex, RegexBuilder};

use crate::text::{Range, TextSource};
use crate::EditError;

/// Number of ranges in a [`RangeSet`]: the whole match plus `\1`..`\9`.
pub const NRANGE: usize = 10;

/// One match: index 0 is the whole match, 1..9 are capture groups.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RangeSet(pub [Option<Range>; NRANGE]);

impl RangeSet {
    /// The whole match.
    pub fn whole(&self) -> Range {
        self.0[0].unwrap_or_default()
    }

    /// Capture group `i`, if it participated in the match.
    pub fn group(&self, i: usize) -> Option<Range> {
        self.0.get(i).copied().flatten()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Anchor {
    Bol,
    Eol,
}

/// A compiled pattern.
///
/// Patterns run in multi-line mode over rune-addressed text. Searches see
/// the rune before their start so `^` and `\b` have their real left
/// context; the right edge is the search bound.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    re: Regex,
    /// The pattern pinned to the end of the haystack, for backward search.
    tail: Regex,
    exception: Option<Anchor>,
}

impl Pattern {
    pub fn compile(pattern: &str) -> Result<Self, EditError> {
        Self::compile_for(pattern, "expression")
    }

    /// Compile `pattern`, naming `context` in the error.
    pub fn compile_for(pattern: &str, context: &str) -> Result<Self, EditError> {
        let build = |p: &str| {
            RegexBuilder::new(p)
                .multi_line(true)
                .build()
                .map_err(|e| EditError::BadRegexp {
                    context: context.to_string(),
                    reason: e.to_string(),
                })
        };
        let re = build(pattern)?;
        let tail = build(&format!("(?:{pattern})\\z"))?;
        let exception = match pattern {
            "^" => Some(Anchor::Bol),
            "$" => Some(Anchor::Eol),
            _ => None,
        };
        Ok(Self {
            source: pattern.to_string(),
            re,
            tail,
            exception,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Matches in `[from, to)` (or to the end of `src`), in document order.
    ///
    /// An empty match moves the search on by one rune. The text is copied
    /// once, so walking every match is linear in the size of the range.
    pub fn matches<'a>(&'a self, src: &'a dyn TextSource, from: usize, to: Option<usize>) -> Matches<'a> {
        let end = to.unwrap_or(usize::MAX).min(src.len());
        let base = from.min(end).saturating_sub(1);
        Matches {
            pattern: self,
            src,
            hay: Haystack::new(src, base, end),
            pos: from,
            end,
        }
    }

    /// Forward search in `[from, to)`, returning at most `max`
    /// non-overlapping matches.
    pub fn execute(
        &self,
        src: &dyn TextSource,
        from: usize,
        to: Option<usize>,
        max: usize,
    ) -> Vec<RangeSet> {
        self.matches(src, from, to).take(max).collect()
    }

    /// Backward search: matches ending at or before `from`, nearest first.
    ///
    /// Each further match ends at or before the start of the one found
    /// before it. Among matches ending at the same position the one starting
    /// earliest wins.
    pub fn bexecute(&self, src: &dyn TextSource, from: usize, max: usize) -> Vec<RangeSet> {
        let mut out = Vec::new();
        let mut limit = from.min(src.len());
        while out.len() < max {
            let Some(rs) = self.last_match_before(src, limit) else {
                break;
            };
            let whole = rs.whole();
            out.push(rs);
            limit = if whole.is_empty() {
                match whole.q0.checked_sub(1) {
                    Some(l) => l,
                    None => break,
                }
            } else {
                whole.q0
            };
        }
        out
    }

    /// First match at or after `from`, wrapping to the start of `src`.
    pub fn search_forward(&self, src: &dyn TextSource, from: usize) -> Option<RangeSet> {
        self.matches(src, from, None)
            .next()
            .or_else(|| self.matches(src, 0, None).next())
    }

    /// Nearest match ending at or before `from`, wrapping to the end of `src`.
    pub fn search_backward(&self, src: &dyn TextSource, from: usize) -> Option<RangeSet> {
        self.bexecute(src, from, 1)
            .into_iter()
            .next()
            .or_else(|| self.bexecute(src, src.len(), 1).into_iter().next())
    }

    /// Whether the pattern matches anywhere inside `r`.
    pub fn is_match_in(&self, src: &dyn TextSource, r: Range) -> bool {
        self.matches(src, r.q0, Some(r.q1)).next().is_some()
    }

    fn match_at(&self, hay: &Haystack, pos: usize) -> Option<RangeSet> {
        if pos < hay.base || pos > hay.end() {
            return None;
        }
        let caps = self.re.captures_at(&hay.text, hay.byte(pos))?;
        Some(hay.ranges(&caps))
    }

    // Leftmost-first matching can stop short of the end a longer
    // alternative reaches, so the forward scan only bounds the answer from
    // below; the ends between that bound and `limit` are then tried
    // nearest first with the pattern pinned to the end.
    fn last_match_before(&self, src: &dyn TextSource, limit: usize) -> Option<RangeSet> {
        let hay = Haystack::new(src, 0, limit);
        let mut best: Option<RangeSet> = None;
        let mut start = 0;
        while let Some(rs) = self.match_at(&hay, start) {
            let whole = rs.whole();
            start = whole.q0 + 1;
            if !self.accepts(src, whole) {
                continue;
            }
            if best.map_or(true, |b| whole.q1 > b.whole().q1) {
                best = Some(rs);
                if whole.q1 == limit {
                    break;
                }
            }
        }
        let floor = best?.whole().q1;
        (floor..=limit)
            .rev()
            .find_map(|e| self.match_ending_at(&hay, src, e))
            .or(best)
    }

    /// The earliest-starting match that ends exactly at `e`.
    fn match_ending_at(&self, hay: &Haystack, src: &dyn TextSource, e: usize) -> Option<RangeSet> {
        let caps = self.tail.captures(&hay.text[..hay.byte(e)])?;
        let rs = hay.ranges(&caps);
        self.accepts(src, rs.whole()).then_some(rs)
    }

    // A bare `^` or `$` only matches next to a real newline or the buffer
    // edge, never at the artificial edge of a bounded search.
    fn accepts(&self, src: &dyn TextSource, m: Range) -> bool {
        match self.exception {
            None => true,
            Some(Anchor::Bol) => m.q0 == 0 || src.is_newline_at(m.q0 - 1),
            Some(Anchor::Eol) => m.q1 == src.len() || src.is_newline_at(m.q1),
        }
    }
}

/// Matches of one forward search, from [`Pattern::matches`].
pub struct Matches<'a> {
    pattern: &'a Pattern,
    src: &'a dyn TextSource,
    hay: Haystack,
    pos: usize,
    end: usize,
}

impl Iterator for Matches<'_> {
    type Item = RangeSet;

    fn next(&mut self) -> Option<RangeSet> {
        while self.pos <= self.end {
            let Some(rs) = self.pattern.match_at(&self.hay, self.pos) else {
                self.pos = self.end + 1;
                return None;
            };
            let whole = rs.whole();
            self.pos = if whole.is_empty() { whole.q1 + 1 } else { whole.q1 };
            if self.pattern.accepts(self.src, whole) {
                return Some(rs);
            }
        }
        None
    }
}

/// The runes `[base, end)` of a source as a `String`, with rune/byte offset
/// conversion.
struct Haystack {
    base: usize,
    text: String,
    offsets: Vec<usize>,
}

impl Haystack {
    fn new(src: &dyn TextSource, base: usize, end: usize) -> Self {
        let text = src.slice(base, end);
        let mut offsets: Vec<usize> = text.char_indices().map(|(b, _)| b).collect();
        offsets.push(text.len());
        Self {
            base,
            text,
            offsets,
        }
    }

    fn end(&self) -> usize {
        self.base + self.offsets.len() - 1
    }

    fn byte(&self, c: usize) -> usize {
        let i = c.saturating_sub(self.base).min(self.offsets.len() - 1);
        self.offsets[i]
    }

    fn char(&self, b: usize) -> usize {
        self.base + self.offsets.binary_search(&b).unwrap_or_else(|i| i)
    }

    fn ranges(&self, caps: &regex::Captures<'_>) -> RangeSet {
        let mut rs = RangeSet::default();
        for (i, slot) in rs.0.iter_mut().enumerate() {
            *slot = caps
                .get(i)
                .map(|m| Range::new(self.char(m.start()), self.char(m.end())));
        }
        rs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::StrSource;

    fn wholes(v: &[RangeSet]) -> Vec<(usize, usize)> {
        v.iter().map(|rs| (rs.whole().q0, rs.whole().q1)).collect()
    }

    #[test]
    fn forward_finds_every_match() {
        let src = StrSource::new("aaa");
        let re = Pattern::compile("a").unwrap();
        let got = re.execute(&src, 0, None, usize::MAX);
        assert_eq!(wholes(&got), vec![(0, 1), (1, 2), (2, 3)]);
    }

    #[test]
    fn forward_respects_bound_and_max() {
        let src = StrSource::new("abcabcabc");
        let re = Pattern::compile("abc").unwrap();
        assert_eq!(wholes(&re.execute(&src, 0, Some(7), 10)), vec![(0, 3), (3, 6)]);
        assert_eq!(wholes(&re.execute(&src, 1, None, 1)), vec![(3, 6)]);
    }

    #[test]
    fn offsets_are_runes() {
        let src = StrSource::new("ééx");
        let re = Pattern::compile("x").unwrap();
        assert_eq!(wholes(&re.execute(&src, 0, None, 1)), vec![(2, 3)]);
    }

    #[test]
    fn captures_are_reported() {
        let src = StrSource::new("key=value");
        let re = Pattern::compile("(\\w+)=(\\w+)").unwrap();
        let rs = re.execute(&src, 0, None, 1)[0];
        assert_eq!(rs.group(1), Some(Range::new(0, 3)));
        assert_eq!(rs.group(2), Some(Range::new(4, 9)));
        assert_eq!(rs.group(3), None);
    }

    #[test]
    fn bare_dollar_ignores_search_bound() {
        let src = StrSource::new("ab\ncd");
        let re = Pattern::compile("$").unwrap();
        assert!(re.execute(&src, 0, Some(1), 5).is_empty());
        assert_eq!(wholes(&re.execute(&src, 0, None, 5)), vec![(2, 2), (5, 5)]);
    }

    #[test]
    fn bare_caret_matches_line_starts() {
        let src = StrSource::new("ab\ncd\n");
        let re = Pattern::compile("^").unwrap();
        assert_eq!(wholes(&re.execute(&src, 1, None, 5)), vec![(3, 3), (6, 6)]);
    }

    #[test]
    fn backward_nearest_first() {
        let src = StrSource::new("foo bar foo");
        let re = Pattern::compile("foo").unwrap();
        assert_eq!(wholes(&re.bexecute(&src, 11, 5)), vec![(8, 11), (0, 3)]);
        assert_eq!(wholes(&re.bexecute(&src, 10, 5)), vec![(0, 3)]);
    }

    #[test]
    fn backward_prefers_longest_at_same_end() {
        let src = StrSource::new("xaaa");
        let re = Pattern::compile("a+").unwrap();
        assert_eq!(wholes(&re.bexecute(&src, 4, 1)), vec![(1, 4)]);
    }

    #[test]
    fn backward_finds_alternative_ending_at_limit() {
        let src = StrSource::new("ab");
        let re = Pattern::compile("a|ab").unwrap();
        assert_eq!(wholes(&re.bexecute(&src, 2, 1)), vec![(0, 2)]);

        let src = StrSource::new("xx foo foobar");
        let re = Pattern::compile("foo|foobar").unwrap();
        assert_eq!(wholes(&re.bexecute(&src, 13, 2)), vec![(7, 13), (3, 6)]);
    }

    #[test]
    fn matches_keep_left_context() {
        let src = StrSource::new("ab\ncd");
        let re = Pattern::compile("^c").unwrap();
        assert_eq!(wholes(&re.execute(&src, 3, None, 5)), vec![(3, 4)]);
        let re = Pattern::compile("\\bd").unwrap();
        assert!(re.execute(&src, 4, None, 5).is_empty());
    }

    #[test]
    fn matches_walk_a_large_text() {
        let text = "a\n".repeat(50_000);
        let src = StrSource::new(&text);
        let re = Pattern::compile("a").unwrap();
        assert_eq!(re.matches(&src, 0, None).count(), 50_000);
        let last = re.matches(&src, 0, Some(text.len())).last().unwrap();
        assert_eq!(last.whole(), Range::new(99_998, 99_999));
    }

    #[test]
    fn searches_wrap() {
        let src = StrSource::new("x.x.");
        let re = Pattern::compile("x").unwrap();
        assert_eq!(re.search_forward(&src, 3).unwrap().whole(), Range::new(0, 1));
        assert_eq!(re.search_backward(&src, 0).unwrap().whole(), Range::new(2, 3));
    }

    #[test]
    fn compile_error_is_bad_regexp() {
        let err = Pattern::compile_for("a(", "s command").unwrap_err();
        assert!(matches!(err, EditError::BadRegexp { .. }));
        assert!(err.message().starts_with("bad regexp in s command"));
    }
}
