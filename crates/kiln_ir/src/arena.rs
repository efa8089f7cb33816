//! Dense, ID-indexed storage for IR entities.
//!
//! Items are only ever appended, so an ID stays valid for the lifetime of the
//! arena and allocation order doubles as declaration order.

use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

/// Trait for opaque ID types used as arena keys.
pub trait ArenaId: Copy {
    /// Creates an ID from a raw `u32` index.
    fn from_raw(index: u32) -> Self;

    /// Returns the raw `u32` index.
    fn as_raw(self) -> u32;

    /// Returns the raw index as a `usize`, for slot tables keyed by ID.
    fn index(self) -> usize {
        self.as_raw() as usize
    }
}

/// An append-only vector keyed by an [`ArenaId`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Arena<I: ArenaId, T> {
    items: Vec<T>,
    #[serde(skip)]
    _marker: PhantomData<I>,
}

impl<I: ArenaId, T> Default for Arena<I, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: ArenaId, T> Arena<I, T> {
    /// Creates a new, empty arena.
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Appends an item and returns its ID.
    pub fn alloc(&mut self, item: T) -> I {
        let id = I::from_raw(self.items.len() as u32);
        self.items.push(item);
        id
    }

    /// Returns the ID the next [`alloc`](Self::alloc) will hand out.
    pub fn next_id(&self) -> I {
        I::from_raw(self.items.len() as u32)
    }

    /// Returns the item for `id`, or `None` if the ID came from elsewhere.
    pub fn get(&self, id: I) -> Option<&T> {
        self.items.get(id.index())
    }

    /// Mutable counterpart of [`get`](Self::get).
    pub fn get_mut(&mut self, id: I) -> Option<&mut T> {
        self.items.get_mut(id.index())
    }

    /// Returns `true` if `id` names an allocated item.
    pub fn contains(&self, id: I) -> bool {
        id.index() < self.items.len()
    }

    /// Returns the number of items in the arena.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if the arena contains no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterates over `(ID, &T)` pairs in allocation order.
    pub fn iter(&self) -> impl Iterator<Item = (I, &T)> {
        self.items
            .iter()
            .enumerate()
            .map(|(i, item)| (I::from_raw(i as u32), item))
    }

    /// Iterates over allocated IDs in order.
    pub fn ids(&self) -> impl Iterator<Item = I> {
        (0..self.items.len() as u32).map(I::from_raw)
    }

    /// Iterates over references to items in allocation order.
    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

impl<I: ArenaId, T> Index<I> for Arena<I, T> {
    type Output = T;

    /// # Panics
    ///
    /// Panics if the ID is out of bounds. IDs inside a checked module are
    /// always in bounds.
    fn index(&self, id: I) -> &T {
        &self.items[id.index()]
    }
}

impl<I: ArenaId, T> IndexMut<I> for Arena<I, T> {
    fn index_mut(&mut self, id: I) -> &mut T {
        &mut self.items[id.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::SignalId;

    #[test]
    fn alloc_returns_sequential_ids() {
        let mut arena: Arena<SignalId, &str> = Arena::new();
        let a = arena.alloc("clk");
        let b = arena.alloc("rst");
        assert_eq!(a.as_raw(), 0);
        assert_eq!(b.as_raw(), 1);
        assert_eq!(arena[b], "rst");
        assert_eq!(arena.next_id().as_raw(), 2);
    }

    #[test]
    fn get_out_of_range_is_none() {
        let arena: Arena<SignalId, u32> = Arena::new();
        assert!(arena.get(SignalId::from_raw(3)).is_none());
        assert!(!arena.contains(SignalId::from_raw(0)));
    }

    #[test]
    fn index_mut_modifies() {
        let mut arena: Arena<SignalId, u32> = Arena::new();
        let id = arena.alloc(1);
        arena[id] = 7;
        assert_eq!(arena.get(id), Some(&7));
    }

    #[test]
    fn ids_match_iter_order() {
        let mut arena: Arena<SignalId, char> = Arena::new();
        arena.alloc('a');
        arena.alloc('b');
        let ids: Vec<u32> = arena.ids().map(|id| id.as_raw()).collect();
        let from_iter: Vec<u32> = arena.iter().map(|(id, _)| id.as_raw()).collect();
        assert_eq!(ids, from_iter);
    }

    #[test]
    fn serde_is_a_plain_list() {
        let mut arena: Arena<SignalId, u32> = Arena::new();
        arena.alloc(10);
        arena.alloc(20);
        let json = serde_json::to_string(&arena).unwrap();
        assert_eq!(json, "[10,20]");
        let back: Arena<SignalId, u32> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, arena);
    }
}
