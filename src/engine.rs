//! `MementoEngine` — chains [`Memento`] over [`BinomialEngine`] for a stable
//! per-key bucket lookup (spec §4.3).

use crate::binomial::BinomialEngine;
use crate::hash::{fasthash, range_map};
use crate::memento::{Memento, RwLockMemento};

/// The core consistent-hashing lookup. Composes a growable
/// [`BinomialEngine`] with a [`Memento`] side table so that a removed bucket
/// is transparently replaced by a live one, and restoring buckets in LIFO
/// order recovers the exact prior mapping.
#[derive(Debug)]
pub(crate) struct MementoEngine<M: Memento = RwLockMemento> {
    binomial: BinomialEngine,
    memento: M,
    /// Head of the removal list, or `binomial.size()` (the sentinel) when
    /// empty.
    last_removed: u32,
}

/// Combine `key` with the removed bucket `b` it landed on, producing a seed
/// for the re-draw in step 4. Folds the 64 bit key into two 32 bit hashes
/// (carrying over `fasthash` from the AnchorHash lineage) rather than
/// truncating, so both halves of the key influence the re-draw.
fn rehash_seed(key: u64, b: u32) -> u32 {
    fasthash(b, (key & 0xFFFF_FFFF) as u32) ^ fasthash(b, (key >> 32) as u32)
}

impl<M: Memento> MementoEngine<M> {
    pub(crate) fn new(memento: M) -> Self {
        Self {
            binomial: BinomialEngine::new(),
            memento,
            last_removed: 0,
        }
    }

    /// Resolve `key` (a 64 bit hash) to a live bucket id.
    ///
    /// Implements spec §4.3's algorithm exactly:
    ///
    /// 1. `b ← BinomialEngine.GetBucket(key)`
    /// 2. `replacer ← Memento.Replacer(b)`
    /// 3. if not removed, return `b`
    /// 4. else rehash: `b ← h(key, b) mod replacer`
    /// 5. `r ← Memento.Replacer(b)`
    /// 6. while `r` is removed and `r ≥ replacer`: `b ← r`, `r ←
    ///    Memento.Replacer(b)`
    /// 7. `replacer ← r`; loop to 4 if still removed, else return `b`
    ///
    /// The guard in step 6 (`r ≥ replacer`) must be preserved: dropping it
    /// lets lookups descend into removal contexts younger than the one
    /// currently being resolved, breaking minimal disruption (spec §9).
    ///
    /// # Panics
    ///
    /// Panics (in debug builds) if the working set is empty; callers
    /// (`ConsistentEngine`) must check `size() > 0` first.
    pub(crate) fn get_bucket(&self, key: u64) -> u32 {
        debug_assert_ne!(self.size(), 0, "get_bucket called on an empty MementoEngine");

        let mut b = self.binomial.get_bucket(key);
        let mut replacer = self.memento.replacer(b);

        while let Some(rep) = replacer {
            // Step 4: re-draw into [0, rep), the working set as it stood at
            // b's removal.
            let seed = rehash_seed(key, b);
            b = range_map(seed, rep);

            // Steps 5-6: follow the replacement chain upward through
            // removals younger than (or contemporary with) `rep`.
            let mut r = self.memento.replacer(b);
            while let Some(rv) = r {
                if rv < rep {
                    break;
                }
                b = rv;
                r = self.memento.replacer(b);
            }

            // Step 7.
            replacer = r;
        }

        b
    }

    /// Restore the most recently removed bucket, or grow the binomial array
    /// if nothing has been removed.
    ///
    /// `last_removed` is the sentinel `binomial.size()` whenever the removal
    /// list is empty (including on a fresh engine, before anything has ever
    /// been removed); `Memento::restore` on that sentinel has no entry to
    /// pop and returns `bucket + 1` instead, so this is a plain grow in that
    /// case and a real LIFO pop otherwise — the two cases need no special
    /// casing here.
    pub(crate) fn add_bucket(&mut self) -> u32 {
        let bucket = self.last_removed;
        self.last_removed = self.memento.restore(bucket);

        if self.binomial.size() <= bucket {
            self.binomial.add_bucket();
        }

        bucket
    }

    /// Remove `bucket` from the working set, taking the fast (pure shrink)
    /// path when possible.
    pub(crate) fn remove_bucket(&mut self, bucket: u32) {
        let working = self.binomial.size() - self.memento.len() as u32;

        if self.memento.is_empty() && bucket == self.binomial.size() - 1 {
            self.binomial.remove_bucket();
            self.last_removed = bucket;
            return;
        }

        self.last_removed = self.memento.remember(bucket, working, self.last_removed);
    }

    /// The current live working-set size.
    pub(crate) fn size(&self) -> u32 {
        self.binomial.size() - self.memento.len() as u32
    }

    #[cfg(test)]
    pub(crate) fn binomial_size(&self) -> u32 {
        self.binomial.size()
    }

    #[cfg(test)]
    pub(crate) fn memento(&self) -> &M {
        &self.memento
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memento::LockFreeMemento;
    use quickcheck_macros::quickcheck;

    fn new_engine() -> MementoEngine<RwLockMemento> {
        MementoEngine::new(RwLockMemento::new())
    }

    /// For any sequence of add/remove operations, `get_bucket` must only ever
    /// return a bucket the memento does not currently list as removed (spec
    /// §8 property 2, "coverage").
    #[quickcheck]
    fn test_get_bucket_always_live(ops: Vec<(bool, u8)>, keys: Vec<u64>) -> bool {
        let mut e = new_engine();
        let mut live: Vec<u32> = Vec::new();

        for (add, hint) in ops {
            if add || live.is_empty() {
                live.push(e.add_bucket());
            } else {
                let idx = (hint as usize) % live.len();
                let bucket = live.swap_remove(idx);
                e.remove_bucket(bucket);
            }
        }

        if live.is_empty() {
            return true;
        }

        keys.iter().all(|&k| {
            let b = e.get_bucket(k);
            e.memento().replacer(b).is_none()
        })
    }

    /// `get_bucket` is a pure function of `(key, topology)`: repeating the
    /// same lookup on an unchanged engine always yields the same bucket
    /// (spec §8 property 1, "determinism").
    #[quickcheck]
    fn test_get_bucket_deterministic(key: u64, additions: u8) -> bool {
        let mut e = new_engine();
        for _ in 0..=additions {
            e.add_bucket();
        }
        let first = e.get_bucket(key);
        (0..10).all(|_| e.get_bucket(key) == first)
    }

    #[test]
    fn test_add_bucket_grows_from_empty() {
        let mut e = new_engine();
        assert_eq!(e.add_bucket(), 0);
        assert_eq!(e.add_bucket(), 1);
        assert_eq!(e.size(), 2);
    }

    #[test]
    fn test_fast_path_tail_removal() {
        let mut e = new_engine();
        e.add_bucket();
        e.add_bucket();
        e.add_bucket();
        assert_eq!(e.size(), 3);

        e.remove_bucket(2);
        assert_eq!(e.size(), 2);
        assert_eq!(e.binomial_size(), 2);
        assert!(e.memento().is_empty());
    }

    #[test]
    fn test_remove_middle_remembers() {
        let mut e = new_engine();
        for _ in 0..5 {
            e.add_bucket();
        }
        e.remove_bucket(2);
        assert_eq!(e.size(), 4);
        assert!(!e.memento().is_empty());
        // Binomial array is unaffected; bucket 2 is remembered, not removed.
        assert_eq!(e.binomial_size(), 5);
    }

    #[test]
    fn test_get_bucket_returns_live_bucket() {
        let mut e = new_engine();
        for _ in 0..10 {
            e.add_bucket();
        }
        e.remove_bucket(4);
        e.remove_bucket(7);

        for k in 0..10_000u64 {
            let b = e.get_bucket(k);
            assert!(b < e.binomial_size());
            assert_eq!(e.memento().replacer(b), None, "get_bucket must only return live buckets");
        }
    }

    #[test]
    fn test_lifo_restore_recovers_mapping() {
        let mut e: MementoEngine<LockFreeMemento> = MementoEngine::new(LockFreeMemento::new());
        for _ in 0..50 {
            e.add_bucket();
        }

        let keys: Vec<u64> = (0..200u64).collect();
        let before: Vec<u32> = keys.iter().map(|&k| e.get_bucket(k)).collect();

        e.remove_bucket(11);
        e.remove_bucket(21);
        e.remove_bucket(31);

        e.add_bucket(); // restores 31
        e.add_bucket(); // restores 21
        e.add_bucket(); // restores 11

        let after: Vec<u32> = keys.iter().map(|&k| e.get_bucket(k)).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_removal_is_near_minimal() {
        let mut e = new_engine();
        for _ in 0..20 {
            e.add_bucket();
        }

        let keys: Vec<u64> = (0..5_000u64).collect();
        let before: Vec<u32> = keys.iter().map(|&k| e.get_bucket(k)).collect();

        e.remove_bucket(9);

        let after: Vec<u32> = keys.iter().map(|&k| e.get_bucket(k)).collect();
        for (b, a) in before.iter().zip(after.iter()) {
            if *b != 9 {
                assert_eq!(b, a, "key not on removed bucket must be unaffected");
            } else {
                assert_ne!(*a, 9);
            }
        }
    }

    #[test]
    fn test_multiple_removals_then_additions_stay_consistent() {
        let mut e = new_engine();
        for _ in 0..30 {
            e.add_bucket();
        }

        e.remove_bucket(5);
        e.remove_bucket(29); // tail removal, but memento non-empty so remembered
        e.remove_bucket(15);

        for k in 0..2_000u64 {
            let b = e.get_bucket(k);
            assert!(e.memento().replacer(b).is_none());
        }

        e.add_bucket();
        e.add_bucket();
        e.add_bucket();
        assert_eq!(e.size(), 30);
        assert!(e.memento().is_empty());
    }
}
