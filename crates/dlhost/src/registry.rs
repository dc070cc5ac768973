// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Storage id -> instance map.
//!
//! One lock guards the map. Lookups hand out an `Arc` so callers run hooks
//! after the lock is released; the lock is never held across loader code.
//! An id being constructed is held by a [`Reservation`] so a concurrent
//! create of the same id fails before building anything.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::StorageId;

/// Concurrent registry of loader instances.
pub struct LoaderRegistry<T> {
    entries: Mutex<HashMap<StorageId, Arc<T>>>,
    reserved: Mutex<HashSet<StorageId>>,
}

impl<T> LoaderRegistry<T> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            reserved: Mutex::new(HashSet::new()),
        }
    }

    /// Claim `id` for construction. `None` if it is registered or already
    /// claimed. The claim is released when the reservation drops.
    pub fn reserve(&self, id: StorageId) -> Option<Reservation<'_, T>> {
        let entries = self.entries.lock();
        if entries.contains_key(&id) || !self.reserved.lock().insert(id) {
            return None;
        }
        Some(Reservation { registry: self, id })
    }

    /// Insert unless `id` is taken. Returns `false` (no mutation) on conflict.
    pub fn try_insert(&self, id: StorageId, instance: Arc<T>) -> bool {
        let mut entries = self.entries.lock();
        if entries.contains_key(&id) {
            return false;
        }
        entries.insert(id, instance);
        true
    }

    pub fn find(&self, id: StorageId) -> Option<Arc<T>> {
        self.entries.lock().get(&id).cloned()
    }

    pub fn remove(&self, id: StorageId) -> Option<Arc<T>> {
        self.entries.lock().remove(&id)
    }

    /// Remove `id` only if it still maps to `instance`.
    pub fn remove_if_same(&self, id: StorageId, instance: &Arc<T>) -> bool {
        let mut entries = self.entries.lock();
        match entries.get(&id) {
            Some(current) if Arc::ptr_eq(current, instance) => {
                entries.remove(&id);
                true
            }
            _ => false,
        }
    }

    pub fn contains(&self, id: StorageId) -> bool {
        self.entries.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Registered ids, ascending.
    pub fn ids(&self) -> Vec<StorageId> {
        let mut ids: Vec<StorageId> = self.entries.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

/// Exclusive claim on an unregistered id.
pub struct Reservation<'a, T> {
    registry: &'a LoaderRegistry<T>,
    id: StorageId,
}

impl<T> Reservation<'_, T> {
    pub fn id(&self) -> StorageId {
        self.id
    }

    /// Register `instance` under the reserved id.
    pub fn commit(self, instance: Arc<T>) -> bool {
        self.registry.try_insert(self.id, instance)
    }
}

impl<T> Drop for Reservation<'_, T> {
    fn drop(&mut self) {
        self.registry.reserved.lock().remove(&self.id);
    }
}

impl<T> Default for LoaderRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn insert_find_remove() {
        let registry = LoaderRegistry::new();
        assert!(registry.try_insert(7, Arc::new("seven")));
        assert_eq!(registry.find(7).as_deref(), Some(&"seven"));
        assert!(registry.contains(7));

        let removed = registry.remove(7).expect("removed");
        assert_eq!(*removed, "seven");
        assert!(registry.find(7).is_none());
        assert!(registry.remove(7).is_none());
    }

    #[test]
    fn duplicate_insert_leaves_first_untouched() {
        let registry = LoaderRegistry::new();
        let first = Arc::new(1u32);
        assert!(registry.try_insert(7, first.clone()));
        assert!(!registry.try_insert(7, Arc::new(2u32)));

        assert_eq!(registry.len(), 1);
        assert!(Arc::ptr_eq(&registry.find(7).expect("present"), &first));
    }

    #[test]
    fn reference_outlives_removal() {
        let registry = LoaderRegistry::new();
        registry.try_insert(3, Arc::new(String::from("held")));
        let held = registry.find(3).expect("present");
        registry.remove(3);
        assert_eq!(held.as_str(), "held");
    }

    #[test]
    fn remove_if_same_ignores_replacement() {
        let registry = LoaderRegistry::new();
        let old = Arc::new(1u32);
        registry.try_insert(5, old.clone());
        registry.remove(5);
        let new = Arc::new(2u32);
        registry.try_insert(5, new.clone());

        assert!(!registry.remove_if_same(5, &old));
        assert!(registry.remove_if_same(5, &new));
        assert!(registry.is_empty());
    }

    #[test]
    fn reservation_blocks_second_claim() {
        let registry = LoaderRegistry::new();
        let claim = registry.reserve(9).expect("first claim");
        assert!(registry.reserve(9).is_none());
        assert!(!registry.contains(9));

        drop(claim);
        let claim = registry.reserve(9).expect("released");
        assert_eq!(claim.id(), 9);
        assert!(claim.commit(Arc::new("nine")));
        assert!(registry.reserve(9).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn concurrent_inserts_of_one_id_have_one_winner() {
        let registry = Arc::new(LoaderRegistry::new());
        let handles: Vec<_> = (0..8u32)
            .map(|n| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.try_insert(42, Arc::new(n)))
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().expect("join"))
            .filter(|inserted| *inserted)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(registry.ids(), vec![42]);
    }
}
