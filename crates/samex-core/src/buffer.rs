use std::path::{Path, PathBuf};

use ropey::Rope;
use tracing::debug;

use crate::elog::{EditTarget, Elog};
use crate::text::{Range, TextSource};
use crate::EditError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u32);

#[derive(Debug, Clone)]
enum UndoOp {
    Inserted { q0: usize, text: String },
    Deleted { q0: usize, text: String },
}

/// Everything one committed invocation did to a buffer.
#[derive(Debug, Clone)]
struct UndoUnit {
    seq: u64,
    ops: Vec<UndoOp>,
    dot_before: Range,
    dot_after: Range,
    dirty_before: bool,
    dirty_after: bool,
}

/// An open text.
#[derive(Debug, Clone)]
pub struct Buffer {
    id: BufferId,
    name: String,
    text: Rope,
    dot: Range,
    dirty: bool,
    pub(crate) elog: Elog,
    undo: Vec<UndoUnit>,
    redo: Vec<UndoUnit>,
    pins: usize,
    pub(crate) closing: bool,
    pub(crate) edit_clean: bool,
    /// Name and dirty flag from before the running invocation renamed it.
    renamed: Option<(String, bool)>,
}

impl Buffer {
    fn new(id: BufferId, name: &str, text: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            text: Rope::from_str(text),
            dot: Range::default(),
            dirty: false,
            elog: Elog::new(),
            undo: Vec::new(),
            redo: Vec::new(),
            pins: 0,
            closing: false,
            edit_clean: false,
            renamed: None,
        }
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn set_name(&mut self, name: &str) {
        if self.renamed.is_none() {
            self.renamed = Some((self.name.clone(), self.dirty));
        }
        self.name = name.to_string();
    }

    /// Put back the name a failed invocation changed.
    fn restore_name(&mut self) {
        if let Some((name, dirty)) = self.renamed.take() {
            self.name = name;
            self.dirty = dirty;
        }
    }

    pub fn text(&self) -> String {
        self.text.to_string()
    }

    pub fn dot(&self) -> Range {
        self.dot
    }

    pub fn set_dot(&mut self, r: Range) {
        let n = self.len();
        self.dot = Range::new(r.q0.min(n), r.q1.min(n));
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Edits recorded by the running invocation and not yet applied.
    pub fn pending(&self) -> &Elog {
        &self.elog
    }

    pub fn is_pinned(&self) -> bool {
        self.pins > 0
    }

    pub(crate) fn pin(&mut self) {
        self.pins += 1;
    }

    pub(crate) fn unpin(&mut self) {
        self.pins = self.pins.saturating_sub(1);
    }

    /// Sequence number of the newest undoable change.
    pub fn undo_seq(&self) -> Option<u64> {
        self.undo.last().map(|u| u.seq)
    }

    /// The line `X` and `Y` match against: dirty flag, `+`, current flag,
    /// a space and the name.
    pub fn status_line(&self, current: bool) -> String {
        format!(
            "{}+{} {}\n",
            if self.dirty { '\'' } else { ' ' },
            if current { '.' } else { ' ' },
            self.name
        )
    }

    /// Apply the pending edits as one undo unit. Returns whether the text
    /// changed.
    pub(crate) fn commit(&mut self, seq: u64) -> bool {
        let clean = std::mem::take(&mut self.edit_clean);
        self.renamed = None;
        if self.elog.is_empty() {
            if clean {
                self.dirty = false;
            }
            return false;
        }
        let dot_before = self.dot;
        let dirty_before = self.dirty;
        let mut elog = std::mem::take(&mut self.elog);
        let mut recorder = Recorder {
            rope: &mut self.text,
            ops: Vec::new(),
        };
        let dot = elog.apply(&mut recorder, dot_before);
        let ops = recorder.ops;
        self.dirty = !clean;
        self.set_dot(dot);
        debug!(name = %self.name, seq, ops = ops.len(), "committed");
        self.undo.push(UndoUnit {
            seq,
            ops,
            dot_before,
            dot_after: self.dot,
            dirty_before,
            dirty_after: self.dirty,
        });
        self.redo.clear();
        true
    }

    /// Revert the newest committed change. Returns `false` if there is none.
    pub fn undo(&mut self) -> bool {
        let Some(unit) = self.undo.pop() else {
            return false;
        };
        for op in unit.ops.iter().rev() {
            match op {
                UndoOp::Inserted { q0, text } => {
                    let q1 = q0 + text.chars().count();
                    self.text.remove(*q0..q1);
                }
                UndoOp::Deleted { q0, text } => self.text.insert(*q0, text),
            }
        }
        self.dot = unit.dot_before;
        self.dirty = unit.dirty_before;
        self.redo.push(unit);
        true
    }

    /// Re-apply the newest undone change.
    pub fn redo(&mut self) -> bool {
        let Some(unit) = self.redo.pop() else {
            return false;
        };
        for op in &unit.ops {
            match op {
                UndoOp::Inserted { q0, text } => self.text.insert(*q0, text),
                UndoOp::Deleted { q0, text } => {
                    let q1 = q0 + text.chars().count();
                    self.text.remove(*q0..q1);
                }
            }
        }
        self.dot = unit.dot_after;
        self.dirty = unit.dirty_after;
        self.undo.push(unit);
        true
    }
}

impl TextSource for Buffer {
    fn len(&self) -> usize {
        self.text.len_chars()
    }

    fn char_at(&self, pos: usize) -> Option<char> {
        self.text.get_char(pos)
    }

    fn slice(&self, q0: usize, q1: usize) -> String {
        let q1 = q1.min(self.len());
        if q0 >= q1 {
            return String::new();
        }
        self.text.slice(q0..q1).to_string()
    }
}

struct Recorder<'a> {
    rope: &'a mut Rope,
    ops: Vec<UndoOp>,
}

impl EditTarget for Recorder<'_> {
    fn insert(&mut self, q0: usize, text: &str) {
        let q0 = q0.min(self.rope.len_chars());
        self.rope.insert(q0, text);
        self.ops.push(UndoOp::Inserted {
            q0,
            text: text.to_string(),
        });
    }

    fn delete(&mut self, q0: usize, q1: usize) {
        let q1 = q1.min(self.rope.len_chars());
        if q0 >= q1 {
            return;
        }
        let text = self.rope.slice(q0..q1).to_string();
        self.rope.remove(q0..q1);
        self.ops.push(UndoOp::Deleted { q0, text });
    }
}

/// The set of open buffers plus the current one and the working directory.
#[derive(Debug, Clone)]
pub struct Workspace {
    buffers: Vec<Buffer>,
    current: Option<BufferId>,
    next_id: u32,
    seq: u64,
    dir: PathBuf,
}

impl Default for Workspace {
    fn default() -> Self {
        Self::new()
    }
}

impl Workspace {
    pub fn new() -> Self {
        Self::with_dir(".")
    }

    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            buffers: Vec::new(),
            current: None,
            next_id: 0,
            seq: 0,
            dir: dir.into(),
        }
    }

    /// Add a buffer. The first buffer opened becomes current.
    pub fn open(&mut self, name: &str, text: &str) -> BufferId {
        let id = BufferId(self.next_id);
        self.next_id += 1;
        self.buffers.push(Buffer::new(id, name, text));
        if self.current.is_none() {
            self.current = Some(id);
        }
        id
    }

    pub fn buffer(&self, id: BufferId) -> Option<&Buffer> {
        self.buffers.iter().find(|b| b.id == id)
    }

    pub fn buffer_mut(&mut self, id: BufferId) -> Option<&mut Buffer> {
        self.buffers.iter_mut().find(|b| b.id == id)
    }

    pub(crate) fn get(&self, id: BufferId) -> Result<&Buffer, EditError> {
        self.buffer(id)
            .ok_or_else(|| EditError::eval("buffer has been closed"))
    }

    pub(crate) fn get_mut(&mut self, id: BufferId) -> Result<&mut Buffer, EditError> {
        self.buffer_mut(id)
            .ok_or_else(|| EditError::eval("buffer has been closed"))
    }

    pub fn current(&self) -> Option<BufferId> {
        self.current
    }

    pub fn set_current(&mut self, id: BufferId) {
        if self.buffer(id).is_some() {
            self.current = Some(id);
        }
    }

    pub fn ids(&self) -> Vec<BufferId> {
        self.buffers.iter().map(|b| b.id).collect()
    }

    pub fn find(&self, name: &str) -> Option<BufferId> {
        self.buffers.iter().find(|b| b.name == name).map(|b| b.id)
    }

    /// Close a buffer right away. Commands close through `D`, which waits
    /// for the invocation to commit.
    pub fn close(&mut self, id: BufferId) {
        self.buffers.retain(|b| b.id != id);
        if self.current == Some(id) {
            self.current = self.buffers.first().map(|b| b.id);
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub(crate) fn set_dir(&mut self, dir: PathBuf) {
        self.dir = dir;
    }

    /// `name` resolved against the working directory.
    pub fn resolve(&self, name: &str) -> PathBuf {
        let path = Path::new(name);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.dir.join(path)
        }
    }

    /// Sequence number of the last committed invocation.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Drop every pending edit, rename and close request in every buffer.
    pub fn truncate_all(&mut self) {
        for b in &mut self.buffers {
            b.elog.truncate();
            b.restore_name();
            b.closing = false;
            b.edit_clean = false;
        }
    }

    /// Apply every buffer's pending edits under one new sequence number,
    /// then close the buffers `D` asked for.
    pub(crate) fn commit_all(&mut self) -> u64 {
        self.seq += 1;
        let seq = self.seq;
        for b in &mut self.buffers {
            b.commit(seq);
        }
        let closing: Vec<BufferId> = self
            .buffers
            .iter()
            .filter(|b| b.closing && !b.is_pinned())
            .map(|b| b.id)
            .collect();
        for id in closing {
            debug!(?id, "closing buffer");
            self.close(id);
        }
        seq
    }
}
