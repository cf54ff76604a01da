//! Fixed-capacity slot arena with a lock-free, single-producer free list.
//!
//! Allocation pops the free-list head with a compare-and-swap retry loop and is only
//! safe to call from one producer at a time; [`PoolHandle::drop`] pushes the slot back
//! with the same CAS loop and is safe to call concurrently from any thread holding a
//! handle — the two halves together give the "wait-free allocate, thread-safe
//! deallocate" contract the raw double-buffer slots need.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};

const NIL: usize = usize::MAX;

struct Slot<T> {
    value: UnsafeCell<MaybeUninit<T>>,
    next: AtomicUsize,
}

pub struct StoragePool<T> {
    slots: Box<[Slot<T>]>,
    free_head: AtomicUsize,
}

// Slots are only ever accessed through a handed-out `PoolHandle`, which is the unique
// owner of its slot's contents until dropped, so `&StoragePool<T>` may cross threads
// as long as `T` may.
unsafe impl<T: Send> Sync for StoragePool<T> {}

impl<T: Default> StoragePool<T> {
    pub fn new(capacity: usize) -> Self {
        let slots: Box<[Slot<T>]> = (0..capacity)
            .map(|i| Slot {
                value: UnsafeCell::new(MaybeUninit::new(T::default())),
                next: AtomicUsize::new(if i + 1 < capacity { i + 1 } else { NIL }),
            })
            .collect();
        Self {
            slots,
            free_head: AtomicUsize::new(if capacity == 0 { NIL } else { 0 }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Pops a free slot off the list. Single-producer only: concurrent callers must
    /// serialize externally, or use distinct pools.
    pub fn allocate(&self) -> Option<PoolHandle<'_, T>> {
        loop {
            let head = self.free_head.load(Ordering::Acquire);
            if head == NIL {
                return None;
            }
            let next = self.slots[head].next.load(Ordering::Relaxed);
            if self
                .free_head
                .compare_exchange(head, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(PoolHandle { pool: self, index: head });
            }
        }
    }

    fn deallocate(&self, index: usize) {
        loop {
            let head = self.free_head.load(Ordering::Acquire);
            self.slots[index].next.store(head, Ordering::Relaxed);
            if self
                .free_head
                .compare_exchange(head, index, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return;
            }
        }
    }
}

/// An owned slot handed out by [`StoragePool::allocate`]. Returns the slot to the pool
/// on drop.
pub struct PoolHandle<'a, T> {
    pool: &'a StoragePool<T>,
    index: usize,
}

impl<T> Deref for PoolHandle<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // Safety: this handle is the pool's only live reference to this slot until drop.
        unsafe { (*self.pool.slots[self.index].value.get()).assume_init_ref() }
    }
}

impl<T> DerefMut for PoolHandle<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { (*self.pool.slots[self.index].value.get()).assume_init_mut() }
    }
}

impl<T> Drop for PoolHandle<'_, T> {
    fn drop(&mut self) {
        self.pool.deallocate(self.index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn allocate_never_hands_out_the_same_slot_twice() {
        let pool = StoragePool::<u32>::new(2);
        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        assert_ne!(a.index, b.index);
        assert!(pool.allocate().is_none());
    }

    #[test]
    fn exhaustion_returns_none_not_a_panic() {
        let pool = StoragePool::<u32>::new(0);
        assert!(pool.allocate().is_none());
    }

    #[test]
    fn drop_returns_the_slot_for_reuse() {
        let pool = StoragePool::<u32>::new(1);
        {
            let mut h = pool.allocate().unwrap();
            *h = 7;
        }
        let h = pool.allocate().unwrap();
        assert_eq!(*h, 7);
    }

    #[test]
    fn deallocate_is_thread_safe_from_any_thread() {
        let pool = Arc::new(StoragePool::<u32>::new(4));
        let handles: Vec<_> = (0..4).map(|_| pool.allocate().unwrap()).collect();
        assert!(pool.allocate().is_none());

        std::thread::scope(|s| {
            for h in handles {
                let pool = Arc::clone(&pool);
                s.spawn(move || {
                    drop(h);
                    let _ = &pool;
                });
            }
        });

        let mut reallocated = 0;
        while pool.allocate().is_some() {
            reallocated += 1;
        }
        assert_eq!(reallocated, 4);
    }
}
