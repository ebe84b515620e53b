//! Generational entry handles and the slot arena that backs them.
//!
//! An [`EntryId`] packs a *generation* counter in the high 32 bits and a slot
//! *index* in the low 32 bits. The generation of a slot is bumped whenever
//! its entry is physically removed (pruned, or dropped with its owner), so a
//! handle held across a prune is detected as stale instead of silently
//! aliasing whatever entry reuses the slot.

use std::collections::VecDeque;
use std::fmt;

// ---------------------------------------------------------------------------
// EntryId
// ---------------------------------------------------------------------------

/// A generational handle to an entry in a [`Registry`](crate::registry::Registry).
///
/// Layout: `[generation: u32 | index: u32]`
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(u64);

impl EntryId {
    #[inline]
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self((generation as u64) << 32 | index as u64)
    }

    /// The slot index (low 32 bits).
    #[inline]
    pub fn index(self) -> u32 {
        self.0 as u32
    }

    /// The slot generation (high 32 bits).
    #[inline]
    pub fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

impl fmt::Debug for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntryId({}v{})", self.index(), self.generation())
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index(), self.generation())
    }
}

// ---------------------------------------------------------------------------
// SlotArena
// ---------------------------------------------------------------------------

/// Owned storage for values addressed by [`EntryId`].
///
/// Vacated slots are recycled in FIFO order so that generations are spread
/// across slots instead of churning a single hot index.
#[derive(Debug)]
pub(crate) struct SlotArena<T> {
    generations: Vec<u32>,
    slots: Vec<Option<T>>,
    free: VecDeque<u32>,
}

impl<T> SlotArena<T> {
    pub(crate) fn new() -> Self {
        Self {
            generations: Vec::new(),
            slots: Vec::new(),
            free: VecDeque::new(),
        }
    }

    /// Store `value` and return its handle.
    pub(crate) fn insert(&mut self, value: T) -> EntryId {
        if let Some(index) = self.free.pop_front() {
            let idx = index as usize;
            self.slots[idx] = Some(value);
            EntryId::new(index, self.generations[idx])
        } else {
            let index = self.slots.len() as u32;
            self.generations.push(0);
            self.slots.push(Some(value));
            EntryId::new(index, 0)
        }
    }

    /// Take the value out of its slot and invalidate every copy of `id`.
    ///
    /// Returns `None` if `id` is stale or was never allocated.
    pub(crate) fn remove(&mut self, id: EntryId) -> Option<T> {
        if !self.contains(id) {
            return None;
        }
        let idx = id.index() as usize;
        let value = self.slots[idx].take();
        self.generations[idx] = self.generations[idx].wrapping_add(1);
        self.free.push_back(id.index());
        value
    }

    pub(crate) fn contains(&self, id: EntryId) -> bool {
        let idx = id.index() as usize;
        idx < self.slots.len()
            && self.generations[idx] == id.generation()
            && self.slots[idx].is_some()
    }

    pub(crate) fn get(&self, id: EntryId) -> Option<&T> {
        if !self.contains(id) {
            return None;
        }
        self.slots[id.index() as usize].as_ref()
    }

    pub(crate) fn get_mut(&mut self, id: EntryId) -> Option<&mut T> {
        if !self.contains(id) {
            return None;
        }
        self.slots[id.index() as usize].as_mut()
    }

    /// Number of occupied slots.
    pub(crate) fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

impl<T> Default for SlotArena<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_hands_out_distinct_slots() {
        let mut arena = SlotArena::new();
        let ids: Vec<EntryId> = (0..50).map(|i| arena.insert(i)).collect();
        let mut indices: Vec<u32> = ids.iter().map(|id| id.index()).collect();
        indices.sort();
        indices.dedup();
        assert_eq!(indices.len(), 50);
        assert_eq!(arena.len(), 50);
    }

    #[test]
    fn removed_handle_goes_stale_after_recycle() {
        let mut arena = SlotArena::new();
        let a = arena.insert("a");
        assert_eq!(arena.remove(a), Some("a"));
        let b = arena.insert("b");
        assert_eq!(b.index(), a.index());
        assert_eq!(b.generation(), 1);
        assert_eq!(arena.get(a), None);
        assert_eq!(arena.get(b), Some(&"b"));
    }

    #[test]
    fn double_remove_is_noop() {
        let mut arena = SlotArena::new();
        let a = arena.insert(1);
        assert!(arena.remove(a).is_some());
        assert!(arena.remove(a).is_none());
        assert_eq!(arena.len(), 0);
    }

    #[test]
    fn free_slots_are_recycled_fifo() {
        let mut arena = SlotArena::new();
        let a = arena.insert(0);
        let b = arena.insert(1);
        arena.remove(a);
        arena.remove(b);
        assert_eq!(arena.insert(2).index(), a.index());
        assert_eq!(arena.insert(3).index(), b.index());
    }
}
