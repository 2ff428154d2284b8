//! Bounded LIFO stacks of cells.
//!
//! The machine owns three: data, return and control. Capacity is fixed at
//! construction; overflow and underflow raise the throw code matching the
//! stack's kind. `pick` and `roll` follow the classic semantics: index 0 is
//! the current top.

use crate::cell::Cell;
use crate::exception::Exception;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StackKind {
    Data,
    Return,
    Control,
}

impl StackKind {
    fn overflow(self) -> Exception {
        match self {
            StackKind::Data => Exception::DataStackOverflow,
            StackKind::Return => Exception::ReturnStackOverflow,
            StackKind::Control => Exception::ControlStackOverflow,
        }
    }

    fn underflow(self) -> Exception {
        match self {
            StackKind::Data => Exception::DataStackUnderflow,
            StackKind::Return => Exception::ReturnStackUnderflow,
            StackKind::Control => Exception::ControlStackUnderflow,
        }
    }
}

#[derive(Debug)]
pub struct Stack {
    kind: StackKind,
    cells: Vec<Cell>,
    capacity: usize,
}

impl Stack {
    pub fn new(kind: StackKind, capacity: usize) -> Stack {
        assert!(capacity > 0);
        Stack {
            kind,
            cells: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn kind(&self) -> StackKind {
        self.kind
    }

    pub fn depth(&self) -> usize {
        self.cells.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Reset to empty without releasing storage.
    pub fn clear(&mut self) {
        self.cells.clear();
    }

    /// Drop elements until only `depth` remain. Used by CATCH to roll back
    /// to the depths its frame recorded.
    pub fn truncate(&mut self, depth: usize) {
        self.cells.truncate(depth);
    }

    pub fn push(&mut self, val: Cell) -> Result<(), Exception> {
        if self.cells.len() >= self.capacity {
            return Err(self.kind.overflow());
        }
        self.cells.push(val);
        Ok(())
    }

    pub fn pop(&mut self) -> Result<Cell, Exception> {
        self.cells.pop().ok_or_else(|| self.kind.underflow())
    }

    pub fn peek(&self) -> Result<Cell, Exception> {
        self.cells.last().copied().ok_or_else(|| self.kind.underflow())
    }

    pub fn peek_mut(&mut self) -> Result<&mut Cell, Exception> {
        let underflow = self.kind.underflow();
        self.cells.last_mut().ok_or(underflow)
    }

    /// Duplicate the n-th item from the top onto the top; `pick(0)` is DUP.
    pub fn pick(&mut self, n: usize) -> Result<(), Exception> {
        if n >= self.cells.len() {
            return Err(self.kind.underflow());
        }
        let val = self.cells[self.cells.len() - 1 - n];
        self.push(val)
    }

    /// Remove the n-th item from the top and re-push it as the new top,
    /// shifting the intervening items down; `roll(0)` is a no-op.
    pub fn roll(&mut self, n: usize) -> Result<(), Exception> {
        if n >= self.cells.len() {
            return Err(self.kind.underflow());
        }
        let ix = self.cells.len() - 1 - n;
        let val = self.cells.remove(ix);
        self.cells.push(val);
        Ok(())
    }

    /// Bottom-to-top view, for `.S` and ASSERT.
    pub fn as_slice(&self) -> &[Cell] {
        &self.cells
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Cell> {
        self.cells.iter()
    }
}
