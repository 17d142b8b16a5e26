//! The weighted bucket → upstream many-to-one indirection (spec §4.5).

use hashbrown::HashMap;

use crate::error::Error;
use crate::upstream::Upstream;

/// A many-to-one indirection: each upstream owns a list of buckets whose
/// length is (normally) its configured weight.
///
/// `detach_bucket` uses swap-and-pop so detaching any bucket from an
/// upstream's list is O(1): the tail bucket is moved into the detached
/// slot and its position index updated, keeping `bucket_to_up`,
/// `node_bucket_pos`, and `node_buckets` coherent (spec §4.5).
#[derive(Debug, Default, Clone)]
pub(crate) struct WeightedIndirection {
    bucket_to_up: HashMap<u32, Upstream>,
    node_buckets: HashMap<Upstream, Vec<u32>>,
    node_bucket_pos: HashMap<u32, usize>,
    weights: HashMap<Upstream, u32>,
}

impl WeightedIndirection {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn has_node(&self, up: &Upstream) -> bool {
        self.node_buckets.contains_key(up)
    }

    pub(crate) fn weight(&self, up: &Upstream) -> Option<u32> {
        self.weights.get(up).copied()
    }

    pub(crate) fn get_node_id(&self, bucket: u32) -> Option<&Upstream> {
        self.bucket_to_up.get(&bucket)
    }

    pub(crate) fn node_count(&self) -> usize {
        self.node_buckets.len()
    }

    pub(crate) fn nodes(&self) -> impl Iterator<Item = &Upstream> {
        self.node_buckets.keys()
    }

    /// Register `up` with `weight` and no buckets yet attached. Idempotent:
    /// a no-op if `up` is already present (spec §4.5's `AddNode` contract
    /// lives in `WeightedConsistentEngine`; this just seeds the tables).
    pub(crate) fn register(&mut self, up: Upstream, weight: u32) {
        self.node_buckets.entry(up.clone()).or_default();
        self.weights.entry(up).or_insert(weight);
    }

    /// Append `bucket` to `up`'s owned list.
    ///
    /// # Errors
    ///
    /// [`Error::InvariantViolation`] if `bucket` is already bound to a node.
    pub(crate) fn attach_bucket(&mut self, up: &Upstream, bucket: u32) -> Result<(), Error> {
        if self.bucket_to_up.contains_key(&bucket) {
            return Err(Error::InvariantViolation {
                map: "bucket_to_up",
                detail: format!("bucket {bucket} is already bound"),
            });
        }

        let list = self
            .node_buckets
            .get_mut(up)
            .ok_or_else(|| Error::NotFound(format!("upstream {up}")))?;
        self.node_bucket_pos.insert(bucket, list.len());
        list.push(bucket);
        self.bucket_to_up.insert(bucket, up.clone());
        Ok(())
    }

    /// Detach `bucket` from its owning upstream via swap-and-pop, returning
    /// the owner.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if `bucket` is not attached to any node.
    pub(crate) fn detach_bucket(&mut self, bucket: u32) -> Result<Upstream, Error> {
        let up = self
            .bucket_to_up
            .remove(&bucket)
            .ok_or_else(|| Error::NotFound(format!("bucket {bucket}")))?;

        let pos = self
            .node_bucket_pos
            .remove(&bucket)
            .expect("bucket_to_up and node_bucket_pos must stay in lockstep");

        let list = self
            .node_buckets
            .get_mut(&up)
            .expect("bucket_to_up and node_buckets must stay in lockstep");

        let last = list.len() - 1;
        list.swap(pos, last);
        list.pop();
        if pos < list.len() {
            let moved = list[pos];
            self.node_bucket_pos.insert(moved, pos);
        }

        Ok(up)
    }

    /// Detach and return the last bucket in `up`'s list (used by
    /// `UpdateWeight` shrink and `RemoveNode`'s snapshot-then-remove loop).
    pub(crate) fn last_bucket(&self, up: &Upstream) -> Option<u32> {
        self.node_buckets.get(up).and_then(|l| l.last().copied())
    }

    pub(crate) fn buckets(&self, up: &Upstream) -> Vec<u32> {
        self.node_buckets.get(up).cloned().unwrap_or_default()
    }

    /// Fully remove `up` (and the empty list it owned) from the tables.
    /// Callers must have already detached every one of `up`'s buckets.
    pub(crate) fn forget_node(&mut self, up: &Upstream) {
        self.node_buckets.remove(up);
        self.weights.remove(up);
    }

    pub(crate) fn set_weight(&mut self, up: &Upstream, weight: u32) {
        self.weights.insert(up.clone(), weight);
    }
}
