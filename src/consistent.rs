//! `ConsistentEngine` / `WeightedConsistentEngine` — the engine +
//! indirection façade that drives topology mutations (spec §4.5, §4.6).

use std::hash::Hash;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::engine::MementoEngine;
use crate::error::Error;
use crate::hash::hash_key;
use crate::indirection::Indirection;
use crate::memento::MementoImpl;
use crate::upstream::Upstream;
use crate::weighted::WeightedIndirection;

struct Inner {
    engine: MementoEngine<MementoImpl>,
    indirection: Indirection,
}

/// The unweighted consistent-hashing engine: one bucket per upstream.
///
/// Reads (`get_node`) take a shared lock for the duration of one lookup, so
/// every `Select` call sees either the whole topology before a concurrent
/// mutation or the whole topology after it, never a torn mix (spec §5).
/// Mutations (`add_node`/`remove_node`) take the exclusive write lock.
#[derive(Clone)]
pub struct ConsistentEngine {
    inner: Arc<RwLock<Inner>>,
    hasher: fnv::FnvBuildHasher,
}

impl std::fmt::Debug for ConsistentEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("ConsistentEngine")
            .field("size", &inner.engine.size())
            .finish()
    }
}

impl Default for ConsistentEngine {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Builder for [`ConsistentEngine`], exposing the `lock_free` memento choice
/// spec §9 leaves as an implementer's option.
#[derive(Debug, Default)]
pub struct ConsistentEngineBuilder {
    lock_free: bool,
}

impl ConsistentEngineBuilder {
    /// Use the lock-free, copy-on-resize `Memento` implementation instead of
    /// the default `parking_lot`-backed one.
    pub fn lock_free(mut self, lock_free: bool) -> Self {
        self.lock_free = lock_free;
        self
    }

    pub fn build(self) -> ConsistentEngine {
        ConsistentEngine {
            inner: Arc::new(RwLock::new(Inner {
                engine: MementoEngine::new(MementoImpl::new(self.lock_free)),
                indirection: Indirection::new(),
            })),
            hasher: fnv::FnvBuildHasher::default(),
        }
    }
}

impl ConsistentEngine {
    /// Construct an empty engine using the default (`RwLockMemento`)
    /// concurrency variant.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> ConsistentEngineBuilder {
        ConsistentEngineBuilder::default()
    }

    /// Add `up` to the topology. Idempotent: a no-op if `up` is already
    /// present.
    pub fn add_node(&self, up: Upstream) -> Result<(), Error> {
        let mut inner = self.inner.write();
        if inner.indirection.has_node(&up) {
            return Ok(());
        }

        let bucket = inner.engine.add_bucket();
        inner.indirection.put(up.clone(), bucket)?;
        tracing::info!(upstream = %up, bucket, "added node to consistent engine");
        Ok(())
    }

    /// Remove `up` from the topology.
    ///
    /// The indirection binding is removed *before* the bucket is removed
    /// from the engine, so the engine's fast (tail-shrink) path can trigger
    /// deterministically off the remaining state (spec §4.4's ordering
    /// note).
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if `up` is not present.
    pub fn remove_node(&self, up: &Upstream) -> Result<(), Error> {
        let mut inner = self.inner.write();
        let bucket = inner.indirection.remove_node(up)?;
        inner.engine.remove_bucket(bucket);
        tracing::info!(upstream = %up, bucket, "removed node from consistent engine");
        Ok(())
    }

    pub fn has_node(&self, up: &Upstream) -> bool {
        self.inner.read().indirection.has_node(up)
    }

    /// The number of upstreams currently in the topology.
    pub fn size(&self) -> usize {
        self.inner.read().indirection.size()
    }

    /// All upstreams currently in the topology, in arbitrary order.
    pub fn nodes(&self) -> Vec<Upstream> {
        self.inner.read().indirection.nodes().cloned().collect()
    }

    /// Consistently hash `key` to an upstream, or `None` if the topology is
    /// empty (spec §4.6, the primary `Select` path sans fallback).
    pub fn get_node<K: Hash>(&self, key: &K) -> Option<Upstream> {
        let inner = self.inner.read();
        if inner.engine.size() == 0 {
            return None;
        }
        let hashed = hash_key(key, &self.hasher);
        let bucket = inner.engine.get_bucket(hashed);
        inner.indirection.get_node_id(bucket).cloned()
    }
}

struct WeightedInner {
    engine: MementoEngine<MementoImpl>,
    indirection: WeightedIndirection,
}

/// The weighted consistent-hashing engine: each upstream owns `weight`
/// buckets (spec §4.5).
#[derive(Clone)]
pub struct WeightedConsistentEngine {
    inner: Arc<RwLock<WeightedInner>>,
    hasher: fnv::FnvBuildHasher,
    lock_free: bool,
}

impl std::fmt::Debug for WeightedConsistentEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("WeightedConsistentEngine")
            .field("size", &inner.engine.size())
            .field("nodes", &inner.indirection.node_count())
            .finish()
    }
}

impl WeightedConsistentEngine {
    /// Build a weighted engine from an initial `(upstream, weight)` list.
    ///
    /// Computes `totalBuckets = Σ weight[u]`, sorts upstreams by identity
    /// for determinism, and interleaves bucket assignment
    /// weighted-round-robin across them so the bucket space is not
    /// contiguous by owner (spec §4.5, "this improves distribution under
    /// partial removal").
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] if any weight is zero or an upstream
    /// identity is duplicated.
    pub fn init_cluster(nodes: Vec<(Upstream, u32)>) -> Result<Self, Error> {
        Self::init_cluster_with(nodes, false)
    }

    /// As [`init_cluster`](Self::init_cluster), but selecting the lock-free
    /// memento variant.
    pub fn init_cluster_with(
        mut nodes: Vec<(Upstream, u32)>,
        lock_free: bool,
    ) -> Result<Self, Error> {
        for (_, w) in &nodes {
            if *w == 0 {
                return Err(Error::Configuration(
                    "upstream weight must be greater than zero".to_string(),
                ));
            }
        }

        nodes.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
        let mut seen = hashbrown::HashSet::with_capacity(nodes.len());
        for (up, _) in &nodes {
            if !seen.insert(up.clone()) {
                return Err(Error::Configuration(format!(
                    "duplicate upstream identity {up}"
                )));
            }
        }

        let mut engine = MementoEngine::new(MementoImpl::new(lock_free));
        let mut indirection = WeightedIndirection::new();
        for (up, w) in &nodes {
            indirection.register(up.clone(), *w);
        }

        // Weighted round-robin interleave: repeatedly walk the sorted list,
        // giving each upstream with remaining weight one more bucket per
        // pass, until every upstream has its full weight attached.
        let mut remaining: Vec<u32> = nodes.iter().map(|(_, w)| *w).collect();
        loop {
            let mut any = false;
            for (i, (up, _)) in nodes.iter().enumerate() {
                if remaining[i] == 0 {
                    continue;
                }
                let bucket = engine.add_bucket();
                indirection.attach_bucket(up, bucket)?;
                remaining[i] -= 1;
                any = true;
            }
            if !any {
                break;
            }
        }

        Ok(Self {
            inner: Arc::new(RwLock::new(WeightedInner { engine, indirection })),
            hasher: fnv::FnvBuildHasher::default(),
            lock_free,
        })
    }

    /// An empty weighted engine (no upstreams yet).
    pub fn new(lock_free: bool) -> Self {
        Self {
            inner: Arc::new(RwLock::new(WeightedInner {
                engine: MementoEngine::new(MementoImpl::new(lock_free)),
                indirection: WeightedIndirection::new(),
            })),
            hasher: fnv::FnvBuildHasher::default(),
            lock_free,
        }
    }

    /// Add `up` with `weight` buckets. Idempotent: a no-op if `up` is
    /// already present.
    pub fn add_node(&self, up: Upstream, weight: u32) -> Result<(), Error> {
        if weight == 0 {
            return Err(Error::Configuration(
                "upstream weight must be greater than zero".to_string(),
            ));
        }

        let mut inner = self.inner.write();
        if inner.indirection.has_node(&up) {
            return Ok(());
        }

        inner.indirection.register(up.clone(), weight);
        for _ in 0..weight {
            let bucket = inner.engine.add_bucket();
            inner.indirection.attach_bucket(&up, bucket)?;
        }
        tracing::info!(upstream = %up, weight, "added weighted node");
        Ok(())
    }

    /// Remove `up` and every bucket it owns.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if `up` is not present.
    pub fn remove_node(&self, up: &Upstream) -> Result<(), Error> {
        let mut inner = self.inner.write();
        if !inner.indirection.has_node(up) {
            return Err(Error::NotFound(format!("upstream {up}")));
        }

        // Snapshot first: detaching mutates the owned list we'd otherwise
        // be iterating.
        let buckets = inner.indirection.buckets(up);
        for bucket in buckets {
            inner.indirection.detach_bucket(bucket)?;
            inner.engine.remove_bucket(bucket);
        }
        inner.indirection.forget_node(up);
        tracing::info!(upstream = %up, "removed weighted node");
        Ok(())
    }

    /// Change `up`'s weight to `new_weight`, attaching or detaching buckets
    /// to match. A non-existent `up` is treated as `add_node`.
    pub fn update_weight(&self, up: &Upstream, new_weight: u32) -> Result<(), Error> {
        let mut inner = self.inner.write();
        if !inner.indirection.has_node(up) {
            drop(inner);
            return self.add_node(up.clone(), new_weight);
        }

        let current = inner.indirection.weight(up).unwrap_or(0);
        if new_weight > current {
            for _ in 0..(new_weight - current) {
                let bucket = inner.engine.add_bucket();
                inner.indirection.attach_bucket(up, bucket)?;
            }
        } else if new_weight < current {
            for _ in 0..(current - new_weight) {
                let bucket = inner
                    .indirection
                    .last_bucket(up)
                    .expect("weight invariant: node must still own a bucket to shrink");
                inner.indirection.detach_bucket(bucket)?;
                inner.engine.remove_bucket(bucket);
            }
        }
        inner.indirection.set_weight(up, new_weight);
        tracing::info!(upstream = %up, weight = new_weight, "updated node weight");
        Ok(())
    }

    pub fn has_node(&self, up: &Upstream) -> bool {
        self.inner.read().indirection.has_node(up)
    }

    pub fn size(&self) -> usize {
        self.inner.read().engine.size() as usize
    }

    pub fn nodes(&self) -> Vec<Upstream> {
        self.inner.read().indirection.nodes().cloned().collect()
    }

    /// Whether this engine was configured to use the lock-free memento
    /// variant.
    pub fn is_lock_free(&self) -> bool {
        self.lock_free
    }

    pub fn get_node<K: Hash>(&self, key: &K) -> Option<Upstream> {
        let inner = self.inner.read();
        if inner.engine.size() == 0 {
            return None;
        }
        let hashed = hash_key(key, &self.hasher);
        let bucket = inner.engine.get_bucket(hashed);
        inner.indirection.get_node_id(bucket).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    fn up(s: &str) -> Upstream {
        Upstream::new(s).unwrap()
    }

    /// For any sequence of add/remove operations, `Indirection::size()` and
    /// `MementoEngine::size()` must stay equal: every live bucket has exactly
    /// one upstream and vice versa (spec §8 property 3, "bijection").
    #[quickcheck]
    fn test_bijection_holds_under_random_mutation(ops: Vec<(bool, u8)>) -> bool {
        let e = ConsistentEngine::new();
        let mut present: Vec<Upstream> = Vec::new();

        for (add, hint) in ops {
            if add || present.is_empty() {
                let name = up(&format!("h{}", hint));
                if e.add_node(name.clone()).is_ok() && !present.contains(&name) {
                    present.push(name);
                }
            } else {
                let idx = (hint as usize) % present.len();
                let target = present.swap_remove(idx);
                e.remove_node(&target).ok();
            }
        }

        e.size() == e.inner.read().engine.size() as usize
    }

    #[test]
    fn test_determinism_and_coverage() {
        let e = ConsistentEngine::new();
        e.add_node(up("h1")).unwrap();
        e.add_node(up("h2")).unwrap();
        e.add_node(up("h3")).unwrap();

        for k in &["172.0.0.1", "172.0.0.2", "172.0.0.3"] {
            let first = e.get_node(k).unwrap();
            for _ in 0..100 {
                assert_eq!(e.get_node(k).unwrap(), first);
            }
            assert!(["h1", "h2", "h3"].contains(&first.as_str()));
        }
    }

    #[test]
    fn test_empty_engine_returns_none() {
        let e = ConsistentEngine::new();
        assert_eq!(e.get_node(&"anything"), None);
    }

    #[test]
    fn test_add_node_idempotent() {
        let e = ConsistentEngine::new();
        e.add_node(up("h1")).unwrap();
        e.add_node(up("h1")).unwrap();
        assert_eq!(e.size(), 1);
    }

    #[test]
    fn test_remove_absent_node_errors() {
        let e = ConsistentEngine::new();
        assert!(e.remove_node(&up("ghost")).is_err());
    }

    #[test]
    fn test_lifo_restore_scenario_b() {
        let e = ConsistentEngine::new();
        for i in 0..50 {
            e.add_node(up(&format!("h{i}"))).unwrap();
        }

        let keys: Vec<String> = (0..100).map(|i| format!("172.16.0.{i}")).collect();
        let before: Vec<Upstream> = keys.iter().map(|k| e.get_node(k).unwrap()).collect();

        e.remove_node(&up("h11")).unwrap();
        e.remove_node(&up("h21")).unwrap();
        e.remove_node(&up("h31")).unwrap();

        e.add_node(up("h31")).unwrap();
        e.add_node(up("h21")).unwrap();
        e.add_node(up("h11")).unwrap();

        let after: Vec<Upstream> = keys.iter().map(|k| e.get_node(k).unwrap()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_minimal_disruption_on_removal_scenario_c() {
        let e = ConsistentEngine::new();
        e.add_node(up("h1")).unwrap();
        e.add_node(up("h2")).unwrap();
        e.add_node(up("h3")).unwrap();

        let keys: Vec<String> = (0..10_000).map(|i| format!("key-{i}")).collect();
        let before: Vec<Upstream> = keys.iter().map(|k| e.get_node(k).unwrap()).collect();

        e.remove_node(&up("h2")).unwrap();

        let after: Vec<Upstream> = keys.iter().map(|k| e.get_node(k).unwrap()).collect();
        for (b, a) in before.iter().zip(after.iter()) {
            if b.as_str() == "h2" {
                assert_ne!(a.as_str(), "h2");
            } else {
                assert_eq!(b, a);
            }
        }
    }

    #[test]
    fn test_monotonicity_on_addition_scenario_e() {
        let e = ConsistentEngine::new();
        e.add_node(up("A")).unwrap();
        e.add_node(up("B")).unwrap();
        e.add_node(up("C")).unwrap();

        let keys: Vec<String> = (0..10_000).map(|i| format!("key-{i}")).collect();
        let before: Vec<Upstream> = keys.iter().map(|k| e.get_node(k).unwrap()).collect();

        e.add_node(up("D")).unwrap();

        let after: Vec<Upstream> = keys.iter().map(|k| e.get_node(k).unwrap()).collect();
        for (b, a) in before.iter().zip(after.iter()) {
            assert!(a == b || a.as_str() == "D", "key moved to an unexpected upstream");
        }
    }

    #[test]
    fn test_lock_free_variant_behaves_identically() {
        let e = ConsistentEngine::builder().lock_free(true).build();
        e.add_node(up("h1")).unwrap();
        e.add_node(up("h2")).unwrap();

        let k = "some-key";
        let first = e.get_node(&k).unwrap();
        for _ in 0..50 {
            assert_eq!(e.get_node(&k).unwrap(), first);
        }
    }

    #[test]
    fn test_weighted_init_cluster_interleaves() {
        let w = WeightedConsistentEngine::init_cluster(vec![
            (up("a"), 2),
            (up("b"), 2),
        ])
        .unwrap();
        assert_eq!(w.size(), 4);
        assert_eq!(w.nodes().len(), 2);
    }

    #[test]
    fn test_weighted_distribution_scenario_d() {
        let w = WeightedConsistentEngine::init_cluster(vec![
            (up("a"), 50),
            (up("b"), 30),
            (up("c"), 20),
        ])
        .unwrap();

        let mut counts = hashbrown::HashMap::new();
        const K: usize = 100_000;
        for i in 0..K {
            let node = w.get_node(&format!("key-{i}")).unwrap();
            *counts.entry(node).or_insert(0usize) += 1;
        }

        let want = [("a", 0.5), ("b", 0.3), ("c", 0.2)];
        for (name, ratio) in want {
            let got = *counts.get(&up(name)).unwrap_or(&0) as f64 / K as f64;
            assert!(
                (got - ratio).abs() < 0.05,
                "upstream {name}: got ratio {got}, want {ratio} +/- 0.05"
            );
        }
    }

    #[test]
    fn test_weighted_minimal_disruption_scenario_c() {
        let w = WeightedConsistentEngine::init_cluster(vec![
            (up("h1"), 10),
            (up("h2"), 2),
            (up("h3"), 8),
        ])
        .unwrap();

        let keys: Vec<String> = (0..10_000).map(|i| format!("key-{i}")).collect();
        let before: Vec<Upstream> = keys.iter().map(|k| w.get_node(k).unwrap()).collect();

        w.remove_node(&up("h2")).unwrap();

        let after: Vec<Upstream> = keys.iter().map(|k| w.get_node(k).unwrap()).collect();
        for (b, a) in before.iter().zip(after.iter()) {
            if b.as_str() == "h2" {
                assert_ne!(a.as_str(), "h2");
            } else {
                assert_eq!(b, a);
            }
        }
    }

    #[test]
    fn test_update_weight_grows_and_shrinks() {
        let w = WeightedConsistentEngine::init_cluster(vec![(up("a"), 4)]).unwrap();
        assert_eq!(w.size(), 4);

        w.update_weight(&up("a"), 6).unwrap();
        assert_eq!(w.size(), 6);

        w.update_weight(&up("a"), 2).unwrap();
        assert_eq!(w.size(), 2);
    }

    #[test]
    fn test_update_weight_on_absent_node_adds_it() {
        let w = WeightedConsistentEngine::new(false);
        w.update_weight(&up("fresh"), 3).unwrap();
        assert!(w.has_node(&up("fresh")));
        assert_eq!(w.size(), 3);
    }
}
