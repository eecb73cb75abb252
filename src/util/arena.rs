//! Generation-checked arena.
//!
//! Timeout entries live in an [`Arena`] owned by their service and are
//! addressed by [`ArenaIndex`] from the handles that own them. A stale index
//! (one whose slot has been freed and reused) never resolves, so a handle
//! that outlives its entry cannot reach someone else's state.
//!
//! Removed slots are threaded onto a free list and reused by later inserts
//! with a bumped generation.

use core::fmt;

use crate::error::{Error, ErrorKind, Result};

/// An index into an [`Arena`] with a generation counter for ABA safety.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArenaIndex {
    index: u32,
    generation: u32,
}

impl ArenaIndex {
    /// Returns the slot position.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Returns the generation the slot had when this index was issued.
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for ArenaIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArenaIndex({}:{})", self.index, self.generation)
    }
}

#[derive(Debug)]
enum Slot<T> {
    Occupied { value: T, generation: u32 },
    Vacant { next_free: Option<u32>, generation: u32 },
}

/// Slot storage with stable, generation-checked indices.
#[derive(Debug)]
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    len: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    /// Creates an empty arena.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            len: 0,
        }
    }

    /// Returns the number of occupied slots.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true if no slot is occupied.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Stores `value` and returns its index.
    ///
    /// Fails with [`ErrorKind::Exhausted`] once `u32::MAX` slots exist.
    pub fn insert(&mut self, value: T) -> Result<ArenaIndex> {
        if let Some(free) = self.free_head {
            if let Some(slot) = self.slots.get_mut(free as usize) {
                if let Slot::Vacant {
                    next_free,
                    generation,
                } = *slot
                {
                    *slot = Slot::Occupied { value, generation };
                    self.free_head = next_free;
                    self.len += 1;
                    return Ok(ArenaIndex {
                        index: free,
                        generation,
                    });
                }
            }
            return Err(Error::invalid_state("arena free list points at an occupied slot"));
        }

        let index = u32::try_from(self.slots.len())
            .map_err(|_| Error::new(ErrorKind::Exhausted).with_message("arena is full"))?;
        self.slots.push(Slot::Occupied {
            value,
            generation: 0,
        });
        self.len += 1;
        Ok(ArenaIndex {
            index,
            generation: 0,
        })
    }

    /// Removes and returns the value at `index`.
    ///
    /// Returns `None` for stale or vacant indices.
    pub fn remove(&mut self, index: ArenaIndex) -> Option<T> {
        let slot = self.slots.get_mut(index.index as usize)?;
        match slot {
            Slot::Occupied { generation, .. } if *generation == index.generation => {
                let vacant = Slot::Vacant {
                    next_free: self.free_head,
                    generation: generation.wrapping_add(1),
                };
                let Slot::Occupied { value, .. } = core::mem::replace(slot, vacant) else {
                    return None;
                };
                self.free_head = Some(index.index);
                self.len -= 1;
                Some(value)
            }
            _ => None,
        }
    }

    /// Returns a reference to the value at `index`.
    #[must_use]
    pub fn get(&self, index: ArenaIndex) -> Option<&T> {
        match self.slots.get(index.index as usize)? {
            Slot::Occupied { value, generation } if *generation == index.generation => Some(value),
            _ => None,
        }
    }

    /// Returns a mutable reference to the value at `index`.
    pub fn get_mut(&mut self, index: ArenaIndex) -> Option<&mut T> {
        match self.slots.get_mut(index.index as usize)? {
            Slot::Occupied { value, generation } if *generation == index.generation => Some(value),
            _ => None,
        }
    }

    /// Returns true if `index` resolves to a live value.
    #[must_use]
    pub fn contains(&self, index: ArenaIndex) -> bool {
        self.get(index).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_get() {
        let mut arena = Arena::new();
        let idx = arena.insert("entry").expect("insert");
        assert_eq!(arena.get(idx), Some(&"entry"));
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn freed_slots_are_reused_with_new_generation() {
        let mut arena = Arena::new();
        let first = arena.insert(1).expect("insert");
        let second = arena.insert(2).expect("insert");

        assert_eq!(arena.remove(first), Some(1));
        assert!(!arena.contains(first));

        let third = arena.insert(3).expect("insert");
        assert_eq!(third.index(), first.index());
        assert_ne!(third.generation(), first.generation());
        assert_eq!(arena.get(first), None);
        assert_eq!(arena.get(second), Some(&2));
        assert_eq!(arena.get(third), Some(&3));
    }

    #[test]
    fn stale_remove_is_a_noop() {
        let mut arena = Arena::new();
        let idx = arena.insert(10).expect("insert");
        assert_eq!(arena.remove(idx), Some(10));
        assert_eq!(arena.remove(idx), None);
        assert!(arena.is_empty());
    }

    #[test]
    fn get_mut_updates_in_place() {
        let mut arena = Arena::new();
        let idx = arena.insert(vec![1]).expect("insert");
        arena.get_mut(idx).expect("live").push(2);
        assert_eq!(arena.get(idx), Some(&vec![1, 2]));
    }
}
