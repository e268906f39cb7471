/// A half-open range of rune offsets.
///
/// Resolved ranges satisfy `q0 <= q1 <= len`; error paths may leave
/// `q0 > q1`, which callers treat as "no selection".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Range {
    pub q0: usize,
    pub q1: usize,
}

impl Range {
    pub fn new(q0: usize, q1: usize) -> Self {
        Self { q0, q1 }
    }

    /// An empty range at `q`.
    pub fn point(q: usize) -> Self {
        Self { q0: q, q1: q }
    }

    pub fn len(&self) -> usize {
        self.q1.saturating_sub(self.q0)
    }

    pub fn is_empty(&self) -> bool {
        self.q1 <= self.q0
    }
}

impl std::fmt::Display for Range {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{},#{}", self.q0, self.q1)
    }
}

/// Read access to rune-addressed text.
pub trait TextSource {
    /// Length in runes.
    fn len(&self) -> usize;

    /// The rune at `pos`, or `None` past the end.
    fn char_at(&self, pos: usize) -> Option<char>;

    /// Text of `[q0, q1)`, clamped to the source.
    fn slice(&self, q0: usize, q1: usize) -> String;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_newline_at(&self, pos: usize) -> bool {
        self.char_at(pos) == Some('\n')
    }

    /// Number of newlines in `[q0, q1)`.
    fn count_newlines(&self, q0: usize, q1: usize) -> usize {
        (q0..q1.min(self.len()))
            .filter(|&p| self.is_newline_at(p))
            .count()
    }
}

/// A [`TextSource`] over a string slice.
///
/// Used for the command text the address evaluator reads and for the
/// buffer status lines `X`/`Y` match against.
#[derive(Debug, Clone)]
pub struct StrSource {
    chars: Vec<char>,
}

impl StrSource {
    pub fn new(s: &str) -> Self {
        Self {
            chars: s.chars().collect(),
        }
    }
}

impl TextSource for StrSource {
    fn len(&self) -> usize {
        self.chars.len()
    }

    fn char_at(&self, pos: usize) -> Option<char> {
        self.chars.get(pos).copied()
    }

    fn slice(&self, q0: usize, q1: usize) -> String {
        let q1 = q1.min(self.chars.len());
        if q0 >= q1 {
            return String::new();
        }
        self.chars[q0..q1].iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn str_source_counts_runes_not_bytes() {
        let s = StrSource::new("héllo\nwörld\n");
        assert_eq!(s.len(), 12);
        assert_eq!(s.char_at(1), Some('é'));
        assert_eq!(s.slice(6, 11), "wörld");
        assert_eq!(s.count_newlines(0, s.len()), 2);
    }

    #[test]
    fn slice_clamps_to_end() {
        let s = StrSource::new("abc");
        assert_eq!(s.slice(1, 99), "bc");
        assert_eq!(s.slice(2, 1), "");
    }
}
