//! # Object Table
//!
//! Maps handles of one resource kind to the native references they stand for.
//!
//! The allocator and the map sit behind one lock, so a handle is never visible
//! in one without the other.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use crate::handle::Handle;
use crate::handle::Kind;
use crate::handle::RawHandle;
use crate::id_alloc::IdAllocator;

/// Returned by [`ObjectTable::allocate`] when the id space is used up.
///
/// Ownership of the reference never moved into the table, so it comes back here.
pub struct Exhausted<T> {
    pub object: T,
}

impl<T> std::fmt::Debug for Exhausted<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exhausted").finish_non_exhaustive()
    }
}

impl<T> std::fmt::Display for Exhausted<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "no free handles left in table")
    }
}

impl<T> std::error::Error for Exhausted<T> {}

struct Slots<T> {
    ids: IdAllocator,
    objects: BTreeMap<RawHandle, T>,
}

pub struct ObjectTable<K: Kind> {
    slots: Mutex<Slots<K::Ref>>,
}

impl<K: Kind> Default for ObjectTable<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Kind> ObjectTable<K> {
    pub fn new() -> Self {
        Self::with_allocator(IdAllocator::new())
    }

    /// A table that hands out at most `limit` live handles.
    pub fn with_capacity_limit(limit: u64) -> Self {
        Self::with_allocator(IdAllocator::with_capacity_limit(limit))
    }

    fn with_allocator(ids: IdAllocator) -> Self {
        Self {
            slots: Mutex::new(Slots {
                ids,
                objects: BTreeMap::new(),
            }),
        }
    }

    /// A panicking caller cannot leave the slots half-updated, so a poisoned
    /// lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, Slots<K::Ref>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores `object` under a fresh handle.
    pub fn allocate(&self, object: K::Ref) -> Result<Handle<K>, Exhausted<K::Ref>> {
        let mut slots = self.lock();
        let id = slots.ids.allocate();
        if id == crate::handle::INVALID_HANDLE {
            tracing::warn!(kind = K::NAME, "handle table exhausted");
            return Err(Exhausted { object });
        }
        slots.objects.insert(id, object);
        Ok(Handle::from_raw(id))
    }

    /// A clone of the reference behind `handle`.
    pub fn find(&self, handle: Handle<K>) -> Option<K::Ref>
    where
        K::Ref: Clone,
    {
        self.lock().objects.get(&handle.raw()).cloned()
    }

    /// Runs `f` on the reference behind `handle` without cloning it.
    pub fn with<R>(&self, handle: Handle<K>, f: impl FnOnce(&K::Ref) -> R) -> Option<R> {
        self.lock().objects.get(&handle.raw()).map(f)
    }

    pub fn contains(&self, handle: Handle<K>) -> bool {
        self.lock().objects.contains_key(&handle.raw())
    }

    /// Removes `handle` and hands its reference back so the caller can release it.
    pub fn free(&self, handle: Handle<K>) -> Option<K::Ref> {
        let mut slots = self.lock();
        let object = slots.objects.remove(&handle.raw())?;
        slots.ids.free(handle.raw());
        Some(object)
    }

    /// Reverse lookup: the handle currently bound to `object`.
    pub fn handle_of(&self, object: &K::Ref) -> Option<Handle<K>>
    where
        K::Ref: PartialEq,
    {
        self.lock()
            .objects
            .iter()
            .find(|(_, candidate)| *candidate == object)
            .map(|(id, _)| Handle::from_raw(*id))
    }

    /// Visits every entry in ascending handle order.
    ///
    /// The table stays locked for the whole walk; `f` must not call back into it.
    pub fn for_each(&self, mut f: impl FnMut(Handle<K>, &K::Ref)) {
        let slots = self.lock();
        for (id, object) in &slots.objects {
            f(Handle::from_raw(*id), object);
        }
    }

    /// Frees every handle, returning the references in ascending handle order.
    pub fn drain(&self) -> Vec<(Handle<K>, K::Ref)> {
        let mut slots = self.lock();
        slots.ids.reset();
        std::mem::take(&mut slots.objects)
            .into_iter()
            .map(|(id, object)| (Handle::from_raw(id), object))
            .collect()
    }

    pub fn clear(&self) {
        drop(self.drain());
    }

    pub fn len(&self) -> usize {
        self.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().objects.is_empty()
    }

    /// How many more handles can be allocated.
    pub fn remaining(&self) -> u64 {
        self.lock().ids.count(true)
    }
}
