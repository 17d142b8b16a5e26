//! The replacement-set side table recording removed buckets (spec §4.2).
//!
//! Two interchangeable implementations are provided behind the [`Memento`]
//! trait: [`RwLockMemento`] (a `parking_lot`-guarded hash table, the
//! default) and [`LockFreeMemento`] (an `arc-swap`-backed, copy-on-resize
//! array of packed atomics). Spec §9 treats the choice between them as an
//! open question left to the implementer; both are kept.

use std::fmt::Debug;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use arc_swap::ArcSwap;
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};

/// The replacement recorded for a removed bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Replacement {
    /// The working-set size at the moment this bucket was removed. A key
    /// hashed into this bucket is re-hashed into `[0, replacer)`.
    pub(crate) replacer: u32,
    /// The bucket id that was the head of the removal list just before this
    /// one, i.e. the next entry to restore after this one (LIFO).
    pub(crate) prev_removed: u32,
}

/// The capability set shared by every `Memento` implementation (spec §4.2).
pub(crate) trait Memento: Debug + Send + Sync {
    /// Insert `(bucket, replacer, prev_removed)`, returning `bucket` as the
    /// new head of the removal list.
    fn remember(&self, bucket: u32, replacer: u32, prev_removed: u32) -> u32;

    /// Return `Some(replacer)` if `bucket` is currently removed, else `None`.
    fn replacer(&self, bucket: u32) -> Option<u32>;

    /// Remove `bucket`'s entry and return its stored `prev_removed` (the new
    /// head after the LIFO pop).
    ///
    /// Must only be called with `bucket` equal to the current head of the
    /// removal list; `MementoEngine` guarantees this by construction. The
    /// head of an empty removal list is the sentinel `binomial.size()`,
    /// which was never itself passed to `remember` — calling `restore` on a
    /// bucket with no entry (the empty-list case, and the fresh-engine case
    /// where nothing has ever been removed) returns `bucket + 1`, the next
    /// fresh bucket id, so `MementoEngine::add_bucket` can treat "restore"
    /// and "grow" as the same pop operation from the start (mirroring the
    /// teacher's `Anchor`, whose `R` stack is pre-filled with every
    /// not-yet-working id so `R.pop()` never fails).
    fn restore(&self, bucket: u32) -> u32;

    /// `true` if no buckets are currently removed.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The number of currently-removed buckets.
    fn len(&self) -> usize;

    /// The number of bucket ids this table has storage for.
    fn capacity(&self) -> usize;
}

/// A `parking_lot::RwLock`-guarded hash table. Writes (`remember`/`restore`)
/// take the write lock; `replacer`, the hot path for `MementoEngine`, takes
/// only a read lock.
#[derive(Debug, Default)]
pub(crate) struct RwLockMemento {
    table: RwLock<HashMap<u32, Replacement>>,
}

impl RwLockMemento {
    pub(crate) fn new() -> Self {
        Self::default()
    }
}

impl Memento for RwLockMemento {
    fn remember(&self, bucket: u32, replacer: u32, prev_removed: u32) -> u32 {
        let mut table = self.table.write();
        table.insert(
            bucket,
            Replacement {
                replacer,
                prev_removed,
            },
        );
        bucket
    }

    fn replacer(&self, bucket: u32) -> Option<u32> {
        self.table.read().get(&bucket).map(|r| r.replacer)
    }

    fn restore(&self, bucket: u32) -> u32 {
        let mut table = self.table.write();
        match table.remove(&bucket) {
            Some(r) => r.prev_removed,
            None => bucket + 1,
        }
    }

    fn len(&self) -> usize {
        self.table.read().len()
    }

    fn capacity(&self) -> usize {
        self.table.read().capacity()
    }
}

/// Sentinel slot value meaning "this bucket is not currently removed".
const EMPTY: i64 = -1;

fn pack(r: Replacement) -> i64 {
    ((r.replacer as i64) << 32) | (r.prev_removed as i64)
}

fn unpack(v: i64) -> Replacement {
    Replacement {
        replacer: (v >> 32) as u32,
        prev_removed: (v & 0xFFFF_FFFF) as u32,
    }
}

/// A lock-free, copy-on-resize memento table.
///
/// `replacer` loads the current backing array with a single atomic pointer
/// load (via [`ArcSwap`]) and then reads the slot in place — no lock is ever
/// taken on the read path. `remember`/`restore` mutate an existing slot via
/// an atomic store; growing the array (when a bucket id falls outside the
/// current length) publishes a new, larger array under a small resize mutex
/// so concurrent growth attempts don't race, copying forward the old
/// snapshot's values. Readers that hold an older snapshot during a resize
/// simply keep using it: a reader that misses a very recent `remember` for
/// a bucket beyond its snapshot's length observes "not removed", which is
/// exactly the pre-removal answer and is therefore still a valid
/// linearization (spec §9, "lock-free memento correctness").
#[derive(Debug)]
pub(crate) struct LockFreeMemento {
    slots: ArcSwap<Vec<AtomicI64>>,
    len: AtomicUsize,
    resize: Mutex<()>,
}

impl Default for LockFreeMemento {
    fn default() -> Self {
        Self {
            slots: ArcSwap::from_pointee(Vec::new()),
            len: AtomicUsize::new(0),
            resize: Mutex::new(()),
        }
    }
}

impl LockFreeMemento {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Ensure the backing array has at least `min_len` slots, growing (and
    /// publishing a fresh snapshot) if necessary.
    fn ensure_capacity(&self, min_len: usize) {
        if self.slots.load().len() > min_len {
            return;
        }

        let _guard = self.resize.lock();
        let current = self.slots.load();
        if current.len() > min_len {
            return;
        }

        let new_len = (min_len + 1).max(current.len() * 2).max(16);
        let mut grown = Vec::with_capacity(new_len);
        for slot in current.iter() {
            grown.push(AtomicI64::new(slot.load(Ordering::Acquire)));
        }
        grown.resize_with(new_len, || AtomicI64::new(EMPTY));

        self.slots.store(std::sync::Arc::new(grown));
    }
}

impl Memento for LockFreeMemento {
    fn remember(&self, bucket: u32, replacer: u32, prev_removed: u32) -> u32 {
        self.ensure_capacity(bucket as usize);
        let slots = self.slots.load();
        let packed = pack(Replacement {
            replacer,
            prev_removed,
        });
        let prior = slots[bucket as usize].swap(packed, Ordering::AcqRel);
        if prior == EMPTY {
            self.len.fetch_add(1, Ordering::AcqRel);
        }
        bucket
    }

    fn replacer(&self, bucket: u32) -> Option<u32> {
        let slots = self.slots.load();
        let v = slots.get(bucket as usize)?.load(Ordering::Acquire);
        if v == EMPTY {
            None
        } else {
            Some(unpack(v).replacer)
        }
    }

    fn restore(&self, bucket: u32) -> u32 {
        let slots = self.slots.load();
        let slot = match slots.get(bucket as usize) {
            Some(slot) => slot,
            None => return bucket + 1,
        };

        let v = slot.swap(EMPTY, Ordering::AcqRel);
        if v == EMPTY {
            return bucket + 1;
        }
        self.len.fetch_sub(1, Ordering::AcqRel);
        unpack(v).prev_removed
    }

    fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    fn capacity(&self) -> usize {
        self.slots.load().len()
    }
}

/// A runtime choice between the two `Memento` implementations, selected by
/// the `lock_free` flag on [`ConsistentEngine::builder`]
/// (spec §9's "gated by a boolean (`lockFree`)").
///
/// [`ConsistentEngine::builder`]: crate::consistent::ConsistentEngine::builder
#[derive(Debug)]
pub(crate) enum MementoImpl {
    Locked(RwLockMemento),
    LockFree(LockFreeMemento),
}

impl MementoImpl {
    pub(crate) fn new(lock_free: bool) -> Self {
        if lock_free {
            MementoImpl::LockFree(LockFreeMemento::new())
        } else {
            MementoImpl::Locked(RwLockMemento::new())
        }
    }
}

impl Memento for MementoImpl {
    fn remember(&self, bucket: u32, replacer: u32, prev_removed: u32) -> u32 {
        match self {
            MementoImpl::Locked(m) => m.remember(bucket, replacer, prev_removed),
            MementoImpl::LockFree(m) => m.remember(bucket, replacer, prev_removed),
        }
    }

    fn replacer(&self, bucket: u32) -> Option<u32> {
        match self {
            MementoImpl::Locked(m) => m.replacer(bucket),
            MementoImpl::LockFree(m) => m.replacer(bucket),
        }
    }

    fn restore(&self, bucket: u32) -> u32 {
        match self {
            MementoImpl::Locked(m) => m.restore(bucket),
            MementoImpl::LockFree(m) => m.restore(bucket),
        }
    }

    fn len(&self) -> usize {
        match self {
            MementoImpl::Locked(m) => m.len(),
            MementoImpl::LockFree(m) => m.len(),
        }
    }

    fn capacity(&self) -> usize {
        match self {
            MementoImpl::Locked(m) => m.capacity(),
            MementoImpl::LockFree(m) => m.capacity(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise<M: Memento>(m: M) {
        assert!(m.is_empty());
        assert_eq!(m.replacer(3), None);

        assert_eq!(m.remember(3, 10, 3), 3);
        assert_eq!(m.replacer(3), Some(10));
        assert_eq!(m.len(), 1);

        assert_eq!(m.remember(7, 9, 3), 7);
        assert_eq!(m.len(), 2);

        // LIFO restore
        assert_eq!(m.restore(7), 3);
        assert_eq!(m.replacer(7), None);
        assert_eq!(m.len(), 1);

        assert_eq!(m.restore(3), 3);
        assert!(m.is_empty());
    }

    /// Restoring a bucket that was never `remember`-ed (the fresh-engine
    /// case, and the general "removal list is empty" case) must return
    /// `bucket + 1` rather than panicking: `MementoEngine::add_bucket` relies
    /// on this to treat growth and restore as the same operation.
    fn exercise_restore_on_never_removed<M: Memento>(m: M) {
        assert!(m.is_empty());
        assert_eq!(m.restore(0), 1);
        assert_eq!(m.restore(1), 2);
        assert!(m.is_empty());
    }

    #[test]
    fn test_rwlock_memento_restore_on_never_removed() {
        exercise_restore_on_never_removed(RwLockMemento::new());
    }

    #[test]
    fn test_lock_free_memento_restore_on_never_removed() {
        exercise_restore_on_never_removed(LockFreeMemento::new());
    }

    #[test]
    fn test_rwlock_memento() {
        exercise(RwLockMemento::new());
    }

    #[test]
    fn test_lock_free_memento() {
        exercise(LockFreeMemento::new());
    }

    #[test]
    fn test_memento_impl_dispatches_to_both_variants() {
        exercise(MementoImpl::new(false));
        exercise(MementoImpl::new(true));
    }

    #[test]
    fn test_lock_free_memento_grows() {
        let m = LockFreeMemento::new();
        for b in 0..500u32 {
            m.remember(b, b + 1, b.wrapping_sub(1));
        }
        assert_eq!(m.len(), 500);
        for b in 0..500u32 {
            assert_eq!(m.replacer(b), Some(b + 1));
        }
        assert!(m.capacity() >= 500);
    }
}
