//! Fixed-capacity ring buffer of session output.

use std::collections::VecDeque;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::types::OutputLine;

/// Keeps the most recent `capacity` lines; the oldest line is evicted on overflow.
#[derive(Debug)]
pub struct OutputBuffer {
    capacity: usize,
    lines: RwLock<VecDeque<OutputLine>>,
}

impl OutputBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            lines: RwLock::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn push(&self, line: OutputLine) {
        let mut lines = self.write();
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// All retained lines, oldest first.
    pub fn lines(&self) -> Vec<OutputLine> {
        self.read().iter().cloned().collect()
    }

    /// The last `n` retained lines, oldest first.
    pub fn recent(&self, n: usize) -> Vec<OutputLine> {
        let lines = self.read();
        let skip = lines.len().saturating_sub(n);
        lines.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    // A panicking reader cannot leave the deque inconsistent, so poison is ignored.
    fn read(&self) -> RwLockReadGuard<'_, VecDeque<OutputLine>> {
        self.lines.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, VecDeque<OutputLine>> {
        self.lines.write().unwrap_or_else(|e| e.into_inner())
    }
}
