use thiserror::Error;

/// Errors produced while configuring or mutating a [`mementohash`] engine.
///
/// Lookups on the hot path (`Select`, `MementoEngine::get_bucket`) never
/// produce an `Error` — an empty pool or an unbound bucket is handled by
/// falling back, not by raising.
///
/// [`mementohash`]: crate
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum Error {
    /// The selection policy configuration is invalid: an unrecognised
    /// `field`, a missing `header_field` when `field == header`, or a
    /// `weights` array whose length does not match the upstream list.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An internal consistency check failed: a null upstream was passed to
    /// [`Indirection::put`], a binding was duplicated on one side of the
    /// bijection, or a bucket was removed twice. These indicate a bug in
    /// the caller (or this crate) rather than expected runtime behaviour.
    ///
    /// [`Indirection::put`]: crate::indirection::Indirection::put
    #[error("invariant violation in {map}: {detail}")]
    InvariantViolation {
        /// The map or table that detected the violation (e.g. `"up_to_bucket"`).
        map: &'static str,
        /// Human-readable detail, including the offending key(s).
        detail: String,
    },

    /// The requested upstream or bucket is not present in the topology.
    #[error("not found: {0}")]
    NotFound(String),
}

/// A `Result` alias defaulting to [`enum@Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;
