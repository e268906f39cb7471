use tracing::trace;

use crate::text::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElogKind {
    Insert,
    Delete,
    Replace,
}

/// One pending edit, in coordinates of the unmodified buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElogEntry {
    pub kind: ElogKind,
    pub q0: usize,
    pub q1: usize,
    pub text: String,
}

/// Something an edit log can be applied to.
pub trait EditTarget {
    fn insert(&mut self, q0: usize, text: &str);
    fn delete(&mut self, q0: usize, q1: usize);
}

/// Pending edits for one buffer.
///
/// Nothing touches the text until [`Elog::apply`]; until then every entry
/// and every selection the commands set refer to the unmodified buffer.
#[derive(Debug, Clone, Default)]
pub struct Elog {
    entries: Vec<ElogEntry>,
}

impl Elog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ElogEntry] {
        &self.entries
    }

    /// Record an insertion. Returns `false` if the entry is out of sequence.
    pub fn insert(&mut self, q0: usize, text: &str) -> bool {
        if text.is_empty() {
            return true;
        }
        if let Some(last) = self.entries.last_mut() {
            if last.kind == ElogKind::Insert && last.q0 == q0 {
                last.text.push_str(text);
                return true;
            }
        }
        self.push(ElogEntry {
            kind: ElogKind::Insert,
            q0,
            q1: q0,
            text: text.to_string(),
        })
    }

    /// Record a deletion of `[q0, q1)`.
    pub fn delete(&mut self, q0: usize, q1: usize) -> bool {
        if q0 >= q1 {
            return true;
        }
        if let Some(last) = self.entries.last_mut() {
            if last.kind == ElogKind::Delete && last.q1 == q0 {
                last.q1 = q1;
                return true;
            }
        }
        self.push(ElogEntry {
            kind: ElogKind::Delete,
            q0,
            q1,
            text: String::new(),
        })
    }

    /// Record replacing `[q0, q1)` with `text`.
    pub fn replace(&mut self, q0: usize, q1: usize, text: &str) -> bool {
        if q0 == q1 && text.is_empty() {
            return true;
        }
        if let Some(last) = self.entries.last_mut() {
            if last.kind == ElogKind::Replace && last.q1 == q0 {
                last.q1 = q1;
                last.text.push_str(text);
                return true;
            }
        }
        self.push(ElogEntry {
            kind: ElogKind::Replace,
            q0,
            q1,
            text: text.to_string(),
        })
    }

    fn push(&mut self, entry: ElogEntry) -> bool {
        let in_sequence = self.entries.last().map_or(true, |last| entry.q0 >= last.q0);
        trace!(?entry, in_sequence, "elog");
        self.entries.push(entry);
        in_sequence
    }

    /// Discard every pending entry.
    pub fn truncate(&mut self) {
        self.entries.clear();
    }

    /// Apply and drain the log, returning `dot` carried through the edits.
    ///
    /// Entries are applied last-position-first so each one still sees the
    /// coordinates it was recorded against. At a shared position deletions
    /// go before insertions, so an insertion is never eaten by a deletion
    /// recorded alongside it. An insertion at an empty dot selects the
    /// inserted text.
    pub fn apply(&mut self, target: &mut dyn EditTarget, dot: Range) -> Range {
        let mut entries = std::mem::take(&mut self.entries);
        entries.sort_by_key(|e| (e.q0, e.kind != ElogKind::Insert));
        let mut dot = dot;
        for e in entries.iter().rev() {
            match e.kind {
                ElogKind::Delete => {
                    target.delete(e.q0, e.q1);
                    shift_for_delete(&mut dot, e.q0, e.q1 - e.q0);
                }
                ElogKind::Insert => insert_text(target, &mut dot, e.q0, &e.text),
                ElogKind::Replace => {
                    target.delete(e.q0, e.q1);
                    shift_for_delete(&mut dot, e.q0, e.q1 - e.q0);
                    insert_text(target, &mut dot, e.q0, &e.text);
                }
            }
        }
        dot
    }
}

fn insert_text(target: &mut dyn EditTarget, dot: &mut Range, q0: usize, text: &str) {
    let n = text.chars().count();
    target.insert(q0, text);
    if dot.q0 == q0 && dot.q1 == q0 {
        dot.q1 += n;
        return;
    }
    if q0 < dot.q0 {
        dot.q0 += n;
    }
    if q0 < dot.q1 {
        dot.q1 += n;
    }
}

fn shift_for_delete(dot: &mut Range, q0: usize, n: usize) {
    if q0 < dot.q0 {
        dot.q0 -= n.min(dot.q0 - q0);
    }
    if q0 < dot.q1 {
        dot.q1 -= n.min(dot.q1 - q0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Chars(Vec<char>);

    impl EditTarget for Chars {
        fn insert(&mut self, q0: usize, text: &str) {
            let tail = self.0.split_off(q0);
            self.0.extend(text.chars());
            self.0.extend(tail);
        }

        fn delete(&mut self, q0: usize, q1: usize) {
            self.0.drain(q0..q1);
        }
    }

    fn chars(s: &str) -> Chars {
        Chars(s.chars().collect())
    }

    fn text(c: &Chars) -> String {
        c.0.iter().collect()
    }

    #[test]
    fn entries_use_original_coordinates() {
        let mut buf = chars("one two three");
        let mut log = Elog::new();
        assert!(log.replace(0, 3, "ONE"));
        assert!(log.delete(3, 7));
        assert!(log.insert(13, "!"));
        log.apply(&mut buf, Range::point(0));
        assert_eq!(text(&buf), "ONE three!");
        assert!(log.is_empty());
    }

    #[test]
    fn adjacent_entries_merge() {
        let mut log = Elog::new();
        log.insert(2, "a");
        log.insert(2, "b");
        log.delete(4, 5);
        log.delete(5, 7);
        assert_eq!(log.entries().len(), 2);
        assert_eq!(log.entries()[0].text, "ab");
        assert_eq!((log.entries()[1].q0, log.entries()[1].q1), (4, 7));
    }

    #[test]
    fn out_of_sequence_is_reported_and_still_applied() {
        let mut buf = chars("abc");
        let mut log = Elog::new();
        assert!(log.insert(3, "Z"));
        assert!(!log.insert(0, "A"));
        log.apply(&mut buf, Range::point(0));
        assert_eq!(text(&buf), "AabcZ");
    }

    #[test]
    fn insert_at_empty_dot_selects_inserted_text() {
        let mut buf = chars("abc");
        let mut log = Elog::new();
        log.insert(1, "XY");
        let dot = log.apply(&mut buf, Range::point(1));
        assert_eq!(dot, Range::new(1, 3));
    }

    #[test]
    fn replace_keeps_dot_on_replaced_range() {
        let mut buf = chars("hello world");
        let mut log = Elog::new();
        log.replace(0, 5, "bye");
        log.replace(6, 11, "all!");
        let dot = log.apply(&mut buf, Range::new(0, 11));
        assert_eq!(text(&buf), "bye all!");
        assert_eq!(dot, Range::new(0, 8));
    }

    #[test]
    fn delete_then_insert_at_same_position() {
        let mut buf = chars("abc\n");
        let mut log = Elog::new();
        assert!(log.delete(0, 3));
        assert!(log.insert(0, "Y"));
        log.apply(&mut buf, Range::new(0, 3));
        assert_eq!(text(&buf), "Y\n");
    }

    #[test]
    fn replace_then_insert_at_same_position() {
        let mut buf = chars("abc\n");
        let mut log = Elog::new();
        assert!(log.replace(0, 3, "X"));
        assert!(log.insert(0, "Y"));
        assert!(log.insert(0, "Z"));
        log.apply(&mut buf, Range::new(0, 3));
        assert_eq!(text(&buf), "YZX\n");
    }

    #[test]
    fn truncate_discards() {
        let mut log = Elog::new();
        log.delete(0, 4);
        log.truncate();
        assert!(log.is_empty());
    }
}
