//! Generation-indexed slot map, replacing the C "id_mgr" (a table mapping
//! small integers to pointers) per Design Note "ID managers and opaque
//! handles" in spec.md §9.
//!
//! Exposed handles are `{index, generation}` pairs; a handle whose
//! generation doesn't match the slot's current generation is stale and
//! every lookup reports it as such (`get` returns `None`), rather than
//! risking an ABA bug where a freed-and-reused index is silently treated
//! as still referring to the original object.

use slab::Slab;

/// An opaque handle into an [`IdMap`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Handle<T> {
    index: usize,
    generation: u32,
    _marker: std::marker::PhantomData<fn() -> T>,
}

// Manual impls: `T` needn't be `Copy`/`Eq` for the handle to be.
impl<T> Copy for Handle<T> {}
impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

struct Slot<T> {
    generation: u32,
    value: T,
}

/// A pool of `T`s addressed by stable, ABA-safe handles.
pub struct IdMap<T> {
    slots: Slab<Slot<T>>,
    next_generation: u32,
}

impl<T> Default for IdMap<T> {
    fn default() -> Self {
        Self {
            slots: Slab::new(),
            next_generation: 1,
        }
    }
}

impl<T> IdMap<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, value: T) -> Handle<T> {
        let generation = self.next_generation;
        self.next_generation = self.next_generation.wrapping_add(1).max(1);
        let index = self.slots.insert(Slot { generation, value });
        Handle {
            index,
            generation,
            _marker: std::marker::PhantomData,
        }
    }

    pub fn get(&self, handle: Handle<T>) -> Option<&T> {
        self.slots
            .get(handle.index)
            .filter(|s| s.generation == handle.generation)
            .map(|s| &s.value)
    }

    pub fn get_mut(&mut self, handle: Handle<T>) -> Option<&mut T> {
        self.slots
            .get_mut(handle.index)
            .filter(|s| s.generation == handle.generation)
            .map(|s| &mut s.value)
    }

    /// Returns whether `handle` still refers to a live slot, i.e. the
    /// identity check `tuner_n != tuner` from
    /// `vqec_dp_oshim_read_api.c::vqec_dp_oshim_read_tuner_read` — here a
    /// cheap generation comparison instead of a pointer comparison.
    pub fn is_current(&self, handle: Handle<T>) -> bool {
        self.slots
            .get(handle.index)
            .is_some_and(|s| s.generation == handle.generation)
    }

    pub fn remove(&mut self, handle: Handle<T>) -> Option<T> {
        if !self.is_current(handle) {
            return None;
        }
        Some(self.slots.remove(handle.index).value)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> {
        self.slots.iter().map(|(index, slot)| {
            (
                Handle {
                    index,
                    generation: slot.generation,
                    _marker: std::marker::PhantomData,
                },
                &slot.value,
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_handle_after_remove_and_reinsert() {
        let mut m: IdMap<&'static str> = IdMap::new();
        let h1 = m.insert("a");
        assert_eq!(m.get(h1), Some(&"a"));
        m.remove(h1);
        let h2 = m.insert("b");
        // Same slot is very likely reused, but the stale handle must not
        // resolve to the new value.
        assert_eq!(m.get(h1), None);
        assert_eq!(m.get(h2), Some(&"b"));
        assert!(!m.is_current(h1));
        assert!(m.is_current(h2));
    }

    #[test]
    fn double_remove_is_noop() {
        let mut m: IdMap<u32> = IdMap::new();
        let h = m.insert(5);
        assert_eq!(m.remove(h), Some(5));
        assert_eq!(m.remove(h), None);
    }
}
