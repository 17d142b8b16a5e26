//! The bucket ↔ upstream bijection (spec §4.4).

use hashbrown::HashMap;

use crate::error::Error;
use crate::upstream::Upstream;

/// A strict bijection between bucket ids and upstream identities.
///
/// `Put` fails if either side of the binding is already taken; mutating
/// operations keep both maps in lockstep so a reader never observes one
/// side of a binding without the other.
#[derive(Debug, Default, Clone)]
pub(crate) struct Indirection {
    up_to_bucket: HashMap<Upstream, u32>,
    bucket_to_up: HashMap<u32, Upstream>,
}

impl Indirection {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Bind `up` to `bucket`.
    ///
    /// # Errors
    ///
    /// [`Error::InvariantViolation`] if `up` or `bucket` is already bound.
    pub(crate) fn put(&mut self, up: Upstream, bucket: u32) -> Result<(), Error> {
        if self.up_to_bucket.contains_key(&up) {
            return Err(Error::InvariantViolation {
                map: "up_to_bucket",
                detail: format!("upstream {up} is already bound"),
            });
        }
        if self.bucket_to_up.contains_key(&bucket) {
            return Err(Error::InvariantViolation {
                map: "bucket_to_up",
                detail: format!("bucket {bucket} is already bound"),
            });
        }

        self.up_to_bucket.insert(up.clone(), bucket);
        self.bucket_to_up.insert(bucket, up);
        Ok(())
    }

    pub(crate) fn get_bucket(&self, up: &Upstream) -> Option<u32> {
        self.up_to_bucket.get(up).copied()
    }

    pub(crate) fn get_node_id(&self, bucket: u32) -> Option<&Upstream> {
        self.bucket_to_up.get(&bucket)
    }

    pub(crate) fn has_node(&self, up: &Upstream) -> bool {
        self.up_to_bucket.contains_key(up)
    }

    pub(crate) fn has_bucket(&self, bucket: u32) -> bool {
        self.bucket_to_up.contains_key(&bucket)
    }

    /// Remove `up`'s binding, returning the bucket it was bound to.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if `up` is not bound.
    pub(crate) fn remove_node(&mut self, up: &Upstream) -> Result<u32, Error> {
        let bucket = self
            .up_to_bucket
            .remove(up)
            .ok_or_else(|| Error::NotFound(format!("upstream {up}")))?;
        self.bucket_to_up.remove(&bucket);
        Ok(bucket)
    }

    /// Remove `bucket`'s binding, returning the upstream it was bound to.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if `bucket` is not bound.
    #[cfg_attr(not(test), allow(dead_code))]
    pub(crate) fn remove_bucket(&mut self, bucket: u32) -> Result<Upstream, Error> {
        let up = self
            .bucket_to_up
            .remove(&bucket)
            .ok_or_else(|| Error::NotFound(format!("bucket {bucket}")))?;
        self.up_to_bucket.remove(&up);
        Ok(up)
    }

    pub(crate) fn size(&self) -> usize {
        self.up_to_bucket.len()
    }

    pub(crate) fn nodes(&self) -> impl Iterator<Item = &Upstream> {
        self.up_to_bucket.keys()
    }
}
