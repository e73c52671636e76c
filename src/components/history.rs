use std::collections::VecDeque;

use crate::canvas::MaskSurface;
use crate::components::tools::StrokeLog;

// ============================================================================
// MASK SNAPSHOT - owned copy of the surface + stroke log
// ============================================================================

/// A complete, independent copy of the mask state.
///
/// Never aliases the live surface: capturing clones the pixel buffer and the
/// stroke log.
#[derive(Clone, Debug, PartialEq)]
pub struct MaskSnapshot {
    surface: MaskSurface,
    strokes: StrokeLog,
}

impl MaskSnapshot {
    pub fn capture(surface: &MaskSurface, strokes: &StrokeLog) -> Self {
        Self {
            surface: surface.clone(),
            strokes: strokes.clone(),
        }
    }

    /// Move the snapshot into the live state without an extra copy.
    fn restore_owned(self, surface: &mut MaskSurface, strokes: &mut StrokeLog) {
        *surface = self.surface;
        *strokes = self.strokes;
    }

    pub fn surface(&self) -> &MaskSurface {
        &self.surface
    }

    pub fn strokes(&self) -> &StrokeLog {
        &self.strokes
    }

    pub fn stroke_count(&self) -> usize {
        self.strokes.stroke_count()
    }

    fn memory_bytes(&self) -> usize {
        self.surface.memory_bytes() + self.strokes.memory_bytes()
    }
}

struct HistoryEntry {
    description: String,
    snapshot: MaskSnapshot,
}

impl HistoryEntry {
    fn memory_bytes(&self) -> usize {
        self.snapshot.memory_bytes() + self.description.len()
    }
}

// ============================================================================
// HISTORY MANAGER - past / future stacks with depth and memory limits
// ============================================================================

/// Snapshot-based undo/redo for the mask.
///
/// * `record` is called *before* a mutating action; it pushes the current
///   state onto `past` and invalidates `future`.
/// * `undo` / `redo` swap the current state with the top of the opposite
///   stack.  Both are no-ops on an empty stack.
pub struct HistoryManager {
    past: VecDeque<HistoryEntry>,
    future: VecDeque<HistoryEntry>,
    max_history_size: usize,
    /// Optional memory cap in bytes.
    max_memory_bytes: Option<usize>,
    /// Running memory total across both stacks.
    total_memory: usize,
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new(50)
    }
}

impl std::fmt::Debug for HistoryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryManager")
            .field("past", &self.past.len())
            .field("future", &self.future.len())
            .field("total_memory", &self.total_memory)
            .finish()
    }
}

impl HistoryManager {
    pub fn new(max_history_size: usize) -> Self {
        Self {
            past: VecDeque::new(),
            future: VecDeque::new(),
            max_history_size: max_history_size.max(1),
            max_memory_bytes: Some(100 * 1024 * 1024), // 100 MB default limit
            total_memory: 0,
        }
    }

    pub fn with_memory_limit(mut self, max_memory_bytes: Option<usize>) -> Self {
        self.max_memory_bytes = max_memory_bytes;
        self.prune();
        self
    }

    /// Snapshot the current state ahead of a mutating action.
    pub fn record(&mut self, description: impl Into<String>, surface: &MaskSurface, strokes: &StrokeLog) {
        for entry in self.future.drain(..) {
            self.total_memory = self.total_memory.saturating_sub(entry.memory_bytes());
        }

        let entry = HistoryEntry {
            description: description.into(),
            snapshot: MaskSnapshot::capture(surface, strokes),
        };
        self.total_memory += entry.memory_bytes();
        self.past.push_back(entry);

        self.prune();
    }

    /// Step back.  Returns the description of the undone action.
    pub fn undo(&mut self, surface: &mut MaskSurface, strokes: &mut StrokeLog) -> Option<String> {
        let entry = self.past.pop_back()?;
        self.total_memory = self.total_memory.saturating_sub(entry.memory_bytes());

        let current = HistoryEntry {
            description: entry.description.clone(),
            snapshot: MaskSnapshot::capture(surface, strokes),
        };
        self.total_memory += current.memory_bytes();
        self.future.push_back(current);

        let description = entry.description.clone();
        entry.snapshot.restore_owned(surface, strokes);
        Some(description)
    }

    /// Step forward.  Returns the description of the redone action.
    pub fn redo(&mut self, surface: &mut MaskSurface, strokes: &mut StrokeLog) -> Option<String> {
        let entry = self.future.pop_back()?;
        self.total_memory = self.total_memory.saturating_sub(entry.memory_bytes());

        let current = HistoryEntry {
            description: entry.description.clone(),
            snapshot: MaskSnapshot::capture(surface, strokes),
        };
        self.total_memory += current.memory_bytes();
        self.past.push_back(current);

        let description = entry.description.clone();
        entry.snapshot.restore_owned(surface, strokes);
        self.prune();
        Some(description)
    }

    pub fn can_undo(&self) -> bool {
        !self.past.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.future.is_empty()
    }

    pub fn undo_description(&self) -> Option<&str> {
        self.past.back().map(|e| e.description.as_str())
    }

    pub fn redo_description(&self) -> Option<&str> {
        self.future.back().map(|e| e.description.as_str())
    }

    /// All undo descriptions, most recent first.
    pub fn undo_history(&self) -> Vec<String> {
        self.past.iter().rev().map(|e| e.description.clone()).collect()
    }

    pub fn memory_usage(&self) -> usize {
        self.total_memory
    }

    pub fn undo_count(&self) -> usize {
        self.past.len()
    }

    pub fn redo_count(&self) -> usize {
        self.future.len()
    }

    pub fn clear(&mut self) {
        self.past.clear();
        self.future.clear();
        self.total_memory = 0;
    }

    /// Rewrite every stored snapshot (both stacks), e.g. to rescale them after
    /// the surface geometry changed.
    pub fn remap<F>(&mut self, mut f: F)
    where
        F: FnMut(&MaskSnapshot) -> MaskSnapshot,
    {
        let mut total = 0;
        for entry in self.past.iter_mut().chain(self.future.iter_mut()) {
            entry.snapshot = f(&entry.snapshot);
            total += entry.memory_bytes();
        }
        self.total_memory = total;
        self.prune();
    }

    /// Drop the oldest `past` entries until both limits hold.
    fn prune(&mut self) {
        let mut dropped = 0usize;
        while self.past.len() > self.max_history_size {
            if let Some(removed) = self.past.pop_front() {
                self.total_memory = self.total_memory.saturating_sub(removed.memory_bytes());
                dropped += 1;
            }
        }

        if let Some(max_bytes) = self.max_memory_bytes {
            while self.total_memory > max_bytes && self.past.len() > 1 {
                if let Some(removed) = self.past.pop_front() {
                    self.total_memory = self.total_memory.saturating_sub(removed.memory_bytes());
                    dropped += 1;
                }
            }
        }

        if dropped > 0 {
            crate::log_info!(
                "History pruned {} snapshot(s); {} remain ({} bytes)",
                dropped,
                self.past.len(),
                self.total_memory
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::StrokePoint;
    use crate::components::tools::{BrushConfig, StrokeRasterizer};

    fn stroke(surface: &mut MaskSurface, log: &mut StrokeLog, x: f32) {
        let mut r = StrokeRasterizer::new(BrushConfig::new(6));
        r.begin_stroke(surface, log, StrokePoint::new(x, 5.0));
        r.extend_stroke(surface, log, StrokePoint::new(x, 15.0));
        r.end_stroke(log);
    }

    #[test]
    fn empty_stacks_are_no_ops() {
        let mut h = HistoryManager::default();
        let mut s = MaskSurface::new(10, 10).unwrap();
        let mut log = StrokeLog::new();
        assert_eq!(h.undo(&mut s, &mut log), None);
        assert_eq!(h.redo(&mut s, &mut log), None);
        assert!(s.is_empty());
    }

    #[test]
    fn n_actions_n_undos_n_redos() {
        let mut h = HistoryManager::default();
        let mut s = MaskSurface::new(40, 20).unwrap();
        let mut log = StrokeLog::new();

        let initial = MaskSnapshot::capture(&s, &log);
        for i in 0..4 {
            h.record("Brush Stroke", &s, &log);
            stroke(&mut s, &mut log, 5.0 + i as f32 * 9.0);
        }
        let final_state = MaskSnapshot::capture(&s, &log);
        assert_eq!(log.stroke_count(), 4);

        for _ in 0..4 {
            assert!(h.undo(&mut s, &mut log).is_some());
        }
        assert_eq!(MaskSnapshot::capture(&s, &log), initial);
        assert!(!h.can_undo());

        for _ in 0..4 {
            assert!(h.redo(&mut s, &mut log).is_some());
        }
        assert_eq!(MaskSnapshot::capture(&s, &log), final_state);
        assert!(!h.can_redo());
    }

    #[test]
    fn new_action_invalidates_redo() {
        let mut h = HistoryManager::default();
        let mut s = MaskSurface::new(30, 20).unwrap();
        let mut log = StrokeLog::new();

        h.record("Brush Stroke", &s, &log);
        stroke(&mut s, &mut log, 5.0);
        h.undo(&mut s, &mut log);
        assert!(h.can_redo());

        h.record("Brush Stroke", &s, &log);
        stroke(&mut s, &mut log, 20.0);
        assert!(!h.can_redo());
        let before = MaskSnapshot::capture(&s, &log);
        assert_eq!(h.redo(&mut s, &mut log), None);
        assert_eq!(MaskSnapshot::capture(&s, &log), before);
    }

    #[test]
    fn restored_snapshot_is_not_aliased() {
        let mut h = HistoryManager::default();
        let mut s = MaskSurface::new(30, 20).unwrap();
        let mut log = StrokeLog::new();

        h.record("Brush Stroke", &s, &log);
        stroke(&mut s, &mut log, 5.0);
        h.undo(&mut s, &mut log);
        // Mutating the restored state must not reach the redo snapshot.
        stroke(&mut s, &mut log, 20.0);
        h.redo(&mut s, &mut log);
        assert!(s.is_marked(5, 10));
        assert!(!s.is_marked(20, 10));
        assert_eq!(log.stroke_count(), 1);
    }

    #[test]
    fn depth_cap_prunes_oldest() {
        let mut h = HistoryManager::new(3);
        let mut s = MaskSurface::new(60, 20).unwrap();
        let mut log = StrokeLog::new();
        for i in 0..5 {
            h.record(format!("Stroke {i}"), &s, &log);
            stroke(&mut s, &mut log, 5.0 + i as f32 * 10.0);
        }
        assert_eq!(h.undo_count(), 3);
        assert_eq!(h.undo_history(), vec!["Stroke 4", "Stroke 3", "Stroke 2"]);
        while h.undo(&mut s, &mut log).is_some() {}
        // The two oldest snapshots are gone: two strokes survive.
        assert_eq!(log.stroke_count(), 2);
    }

    #[test]
    fn descriptions_follow_entries_across_stacks() {
        let mut h = HistoryManager::new(10);
        let mut s = MaskSurface::new(30, 20).unwrap();
        let mut log = StrokeLog::new();
        assert_eq!(h.undo_description(), None);

        h.record("Brush Stroke", &s, &log);
        stroke(&mut s, &mut log, 5.0);
        h.record("Clear Mask", &s, &log);
        s.clear();
        log.clear();
        assert_eq!(h.undo_description(), Some("Clear Mask"));

        h.undo(&mut s, &mut log);
        assert_eq!(h.undo_description(), Some("Brush Stroke"));
        assert_eq!(h.redo_description(), Some("Clear Mask"));
        h.redo(&mut s, &mut log);
        assert_eq!(h.redo_description(), None);
        assert_eq!(h.undo_description(), Some("Clear Mask"));
    }

    #[test]
    fn memory_cap_keeps_at_least_one_entry() {
        let mut h = HistoryManager::new(50).with_memory_limit(Some(1));
        let mut s = MaskSurface::new(10, 10).unwrap();
        let mut log = StrokeLog::new();
        for _ in 0..3 {
            h.record("Brush Stroke", &s, &log);
            stroke(&mut s, &mut log, 5.0);
        }
        assert_eq!(h.undo_count(), 1);
    }

    #[test]
    fn memory_accounting_returns_to_zero() {
        let mut h = HistoryManager::default();
        let mut s = MaskSurface::new(10, 10).unwrap();
        let mut log = StrokeLog::new();
        h.record("Brush Stroke", &s, &log);
        assert!(h.memory_usage() >= 400);
        h.clear();
        assert_eq!(h.memory_usage(), 0);
        assert!(!h.can_undo());
    }
}
