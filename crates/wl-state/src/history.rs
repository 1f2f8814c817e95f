//! Bounded undo/redo state history
//!
//! `StateHistory` is a generic bag of before-states with a cursor. Callers
//! capture the mutated subset of their state *before* applying an operation
//! and append it; `undo` exchanges the stored state for the caller's current
//! equivalent so the entry can later be redone. Appending while redo entries
//! exist truncates them (linear history).
//!
//! Two independent stacks exist at runtime: the session-wide arrange history
//! and one edit history per region.

use std::collections::VecDeque;

use wl_core::{EditError, EditResult};

use crate::OnsetSequence;

/// Bound on stored states per history
pub const MAX_HISTORY_STATES: usize = 100;

#[derive(Debug, Clone)]
struct HistoryEntry<S> {
    state: S,
    description: String,
}

/// Generic bounded undo/redo stack
#[derive(Debug, Clone)]
pub struct StateHistory<S> {
    past: VecDeque<HistoryEntry<S>>,
    future: Vec<HistoryEntry<S>>,
    max_states: usize,
}

impl<S> Default for StateHistory<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> StateHistory<S> {
    pub fn new() -> Self {
        Self::with_limit(MAX_HISTORY_STATES)
    }

    pub fn with_limit(max_states: usize) -> Self {
        Self {
            past: VecDeque::new(),
            future: Vec::new(),
            max_states,
        }
    }

    /// Push the before-state of an operation; truncates redo history
    pub fn append_state(&mut self, state: S, description: &str) {
        self.future.clear();
        self.past.push_back(HistoryEntry {
            state,
            description: description.to_string(),
        });
        while self.past.len() > self.max_states {
            self.past.pop_front();
        }
    }

    /// Exchange `current` for the most recent stored state
    pub fn undo(&mut self, current: S) -> EditResult<S> {
        let entry = self.past.pop_back().ok_or(EditError::NoHistory)?;
        self.future.push(HistoryEntry {
            state: current,
            description: entry.description.clone(),
        });
        Ok(entry.state)
    }

    /// Exchange `current` for the next redo state
    pub fn redo(&mut self, current: S) -> EditResult<S> {
        let entry = self.future.pop().ok_or(EditError::NoHistory)?;
        self.past.push_back(HistoryEntry {
            state: current,
            description: entry.description.clone(),
        });
        Ok(entry.state)
    }

    /// The state the next `undo` would restore
    pub fn query_undo(&self) -> EditResult<&S> {
        self.past
            .back()
            .map(|e| &e.state)
            .ok_or(EditError::NoHistory)
    }

    /// The state the next `redo` would restore
    pub fn query_redo(&self) -> EditResult<&S> {
        self.future
            .last()
            .map(|e| &e.state)
            .ok_or(EditError::NoHistory)
    }

    /// Description of the operation the next `undo` reverts
    pub fn undo_description(&self) -> EditResult<&str> {
        self.past
            .back()
            .map(|e| e.description.as_str())
            .ok_or(EditError::NoHistory)
    }

    /// Description of the operation the next `redo` reapplies
    pub fn redo_description(&self) -> EditResult<&str> {
        self.future
            .last()
            .map(|e| e.description.as_str())
            .ok_or(EditError::NoHistory)
    }

    /// Undoable operations, oldest first (newest last)
    pub fn undo_history(&self) -> impl Iterator<Item = &str> {
        self.past.iter().map(|e| e.description.as_str())
    }

    /// Redoable operations, next first
    pub fn redo_history(&self) -> impl Iterator<Item = &str> {
        self.future.iter().rev().map(|e| e.description.as_str())
    }

    /// Number of undoable entries
    pub fn undo_len(&self) -> usize {
        self.past.len()
    }

    pub fn can_undo(&self) -> bool {
        !self.past.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.future.is_empty()
    }

    pub fn clear(&mut self) {
        self.past.clear();
        self.future.clear();
    }
}

/// Per-region edit state, one arm per mutated subset
#[derive(Debug, Clone)]
pub enum EditState {
    /// Audio content changed; samples are reverted through the sequence's
    /// piece table, the slice window through the stored bounds
    Audio { slice_start: u64, slice_end: u64 },
    /// Onset bookkeeping changed
    Onsets {
        linked: Option<OnsetSequence>,
        per_channel: Vec<OnsetSequence>,
        link_channels: bool,
    },
    /// Subregion selection changed
    Subregion { bounds: Option<(u64, u64)> },
}
