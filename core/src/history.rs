//! Undo/redo history of whole-state snapshots.
//!
//! `past` and `future` are both most-recent-last. Snapshots are immutable
//! `Arc<Value>` trees: live state is replaced wholesale on every transition
//! and never edited in place, so a recorded snapshot can never observe a
//! later mutation.

use std::sync::Arc;

use serde_json::Value;

/// Shared, immutable snapshot of the full state tree.
pub type Snapshot = Arc<Value>;

/// Two unbounded stacks of full-state snapshots.
#[derive(Debug, Clone, Default)]
pub struct HistoryStack {
    past: Vec<Snapshot>,
    future: Vec<Snapshot>,
}

impl HistoryStack {
    pub fn new() -> Self {
        HistoryStack {
            past: Vec::new(),
            future: Vec::new(),
        }
    }

    /// Record the state as it was before a fresh edit.
    ///
    /// Any redo history is discarded.
    pub fn record(&mut self, previous: Snapshot) {
        self.past.push(previous);
        self.future.clear();
    }

    /// Step back one edit.
    ///
    /// Pushes `current` onto the redo stack and returns the snapshot to
    /// restore, or `None` (leaving both stacks untouched) when there is
    /// nothing to undo.
    pub fn undo(&mut self, current: Snapshot) -> Option<Snapshot> {
        let previous = self.past.pop()?;
        self.future.push(current);
        Some(previous)
    }

    /// Mirror of [`HistoryStack::undo`].
    pub fn redo(&mut self, current: Snapshot) -> Option<Snapshot> {
        let next = self.future.pop()?;
        self.past.push(current);
        Some(next)
    }

    pub fn can_undo(&self) -> bool {
        !self.past.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.future.is_empty()
    }

    pub fn past_len(&self) -> usize {
        self.past.len()
    }

    pub fn future_len(&self) -> usize {
        self.future.len()
    }

    /// Drop all recorded snapshots.
    pub fn clear(&mut self) {
        self.past.clear();
        self.future.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snap(v: Value) -> Snapshot {
        Arc::new(v)
    }

    #[test]
    fn new_stack_is_empty() {
        let history = HistoryStack::new();
        assert!(!history.can_undo());
        assert!(!history.can_redo());
        assert_eq!(history.past_len(), 0);
        assert_eq!(history.future_len(), 0);
    }

    #[test]
    fn undo_on_empty_is_noop() {
        let mut history = HistoryStack::new();
        assert!(history.undo(snap(json!(1))).is_none());
        assert_eq!(history.future_len(), 0);
    }

    #[test]
    fn redo_on_empty_is_noop() {
        let mut history = HistoryStack::new();
        assert!(history.redo(snap(json!(1))).is_none());
        assert_eq!(history.past_len(), 0);
    }

    #[test]
    fn undo_then_redo_walks_both_ways() {
        let mut history = HistoryStack::new();
        history.record(snap(json!(0)));
        history.record(snap(json!(1)));

        let restored = history.undo(snap(json!(2))).unwrap();
        assert_eq!(*restored, json!(1));
        assert_eq!(history.future_len(), 1);

        let again = history.redo(restored).unwrap();
        assert_eq!(*again, json!(2));
        assert_eq!(history.past_len(), 2);
        assert_eq!(history.future_len(), 0);
    }

    #[test]
    fn record_clears_redo() {
        let mut history = HistoryStack::new();
        history.record(snap(json!(0)));
        history.undo(snap(json!(1))).unwrap();
        assert!(history.can_redo());

        history.record(snap(json!(0)));
        assert!(!history.can_redo());
        assert!(history.redo(snap(json!(5))).is_none());
    }

    #[test]
    fn snapshots_are_independent_of_later_states() {
        let mut history = HistoryStack::new();
        let before = snap(json!({"user": {"name": "A"}}));
        history.record(before.clone());

        let mut next = (*before).clone();
        next["user"]["name"] = json!("B");

        let restored = history.undo(Arc::new(next)).unwrap();
        assert_eq!(restored["user"]["name"], json!("A"));
    }

    #[test]
    fn clear_drops_everything() {
        let mut history = HistoryStack::new();
        history.record(snap(json!(0)));
        history.record(snap(json!(1)));
        history.undo(snap(json!(2)));
        history.clear();
        assert_eq!(history.past_len(), 0);
        assert_eq!(history.future_len(), 0);
    }
}
