//! The opaque upstream identity (spec §3).

use std::convert::TryFrom;
use std::fmt;
use std::sync::Arc;

use crate::error::Error;

/// An opaque upstream identity, e.g. `"host:port"`.
///
/// Equality is by string value. `Upstream` wraps an `Arc<str>` so that the
/// many maps keying or valuing on it (`Indirection`, `WeightedIndirection`,
/// the tracker) can clone it cheaply.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Upstream(Arc<str>);

impl Upstream {
    /// Construct an `Upstream` from any string-like value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvariantViolation`] if `id` is empty: the "no null
    /// upstream" invariant (spec §4.4) is enforced here so every downstream
    /// map can assume a non-empty identity.
    pub fn new(id: impl Into<Arc<str>>) -> Result<Self, Error> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::InvariantViolation {
                map: "Upstream",
                detail: "upstream identity must not be empty".to_string(),
            });
        }
        Ok(Self(id))
    }

    /// Borrow the identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Upstream").field(&self.0).finish()
    }
}

impl fmt::Display for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for Upstream {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self, Error> {
        Upstream::new(value)
    }
}

impl TryFrom<String> for Upstream {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Error> {
        Upstream::new(value)
    }
}
