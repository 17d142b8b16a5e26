//! Request-key → upstream selection policy (spec §4.6) and its
//! configuration surface (spec §6).

use std::fmt::Debug;
use std::net::IpAddr;

use rand::seq::SliceRandom;
use serde::Deserialize;

use crate::consistent::{ConsistentEngine, WeightedConsistentEngine};
use crate::error::Error;
use crate::upstream::Upstream;

/// The field a request key is extracted from (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyField {
    /// The remote address with port stripped.
    Ip,
    /// The request URI.
    Uri,
    /// The value of a configured header (case-insensitive lookup).
    Header,
    /// A variable previously placed in the request context by upstream
    /// middleware; absent ⇒ fall back.
    ClientIp,
}

/// A minimal seam onto the surrounding proxy's request type (spec §1: HTTP
/// request parsing is an external collaborator, "specified only at [its]
/// interface").
pub trait Request: Debug {
    /// The remote peer's address, with any port already stripped.
    fn remote_addr(&self) -> Option<IpAddr>;
    /// The request URI (path + query, as the proxy sees it).
    fn uri(&self) -> &str;
    /// A header value, looked up case-insensitively.
    fn header(&self, name: &str) -> Option<&str>;
    /// The `client_ip` variable set by upstream middleware, if any.
    fn client_ip_var(&self) -> Option<IpAddr>;
}

/// The selection policy configuration (spec §6), deserializable from
/// whatever structured format the surrounding proxy's configuration uses.
#[derive(Debug, Clone, Deserialize)]
pub struct SelectionConfig {
    /// The key extraction source.
    pub field: KeyField,
    /// The header name to read, required iff `field == header`.
    #[serde(default)]
    pub header_field: Option<String>,
    /// Whether the surrounding proxy should wire up a [`Tracker`](crate::Tracker)
    /// for this engine. When `false` the engine still hashes keys
    /// consistently, but nothing calls `add_node`/`remove_node` in response
    /// to health events, so the bucket space stays frozen at whatever the
    /// initial topology was — useful for tests.
    #[serde(default)]
    pub consistent: bool,
    /// Optional parallel array of weights, same length as the upstream
    /// list; presence selects the weighted engine variant.
    #[serde(default)]
    pub weights: Option<Vec<u32>>,
}

impl SelectionConfig {
    /// Validate field/weights consistency, producing
    /// [`Error::Configuration`] rather than failing lazily at request time.
    pub fn validate(&self, upstream_count: usize) -> Result<(), Error> {
        if self.field == KeyField::Header && self.header_field.is_none() {
            return Err(Error::Configuration(
                "header_field is required when field == header".to_string(),
            ));
        }
        if let Some(weights) = &self.weights {
            if weights.len() != upstream_count {
                return Err(Error::Configuration(format!(
                    "weights length ({}) does not match upstream count ({})",
                    weights.len(),
                    upstream_count
                )));
            }
        }
        Ok(())
    }
}

/// An injected, pluggable policy used when the primary consistent-hashing
/// path cannot produce an answer (spec §4.6, §9).
pub trait FallbackSelector: Debug + Send + Sync {
    /// Pick an upstream from `pool` for `request`, or `None` if no decision
    /// can be made; the caller decides retry policy.
    fn select(&self, pool: &[Upstream], request: &dyn Request) -> Option<Upstream>;
}

/// The default fallback: pick uniformly at random from the pool.
#[derive(Debug, Default)]
pub struct RandomFallback;

impl FallbackSelector for RandomFallback {
    fn select(&self, pool: &[Upstream], _request: &dyn Request) -> Option<Upstream> {
        let mut rng = rand::thread_rng();
        pool.choose(&mut rng).cloned()
    }
}

/// The primary engine a [`Selector`] drives, or the "ignore topology
/// events" mode `consistent: false` asks for (spec §6): keys still hash
/// consistently, but `AddNode`/`RemoveNode` from the tracker are never
/// applied, so the engine is frozen at its initial bucket space — useful
/// for tests.
#[derive(Debug)]
pub enum SelectionEngine {
    Unweighted(ConsistentEngine),
    Weighted(WeightedConsistentEngine),
}

impl SelectionEngine {
    fn size(&self) -> usize {
        match self {
            SelectionEngine::Unweighted(e) => e.size(),
            SelectionEngine::Weighted(e) => e.size(),
        }
    }

    fn get_node(&self, key: &str) -> Option<Upstream> {
        match self {
            SelectionEngine::Unweighted(e) => e.get_node(&key),
            SelectionEngine::Weighted(e) => e.get_node(&key),
        }
    }
}

/// Extracts a request key per `config.field`, hashes it through
/// `engine`, and falls back when extraction or lookup fails (spec §4.6's
/// `Select` algorithm).
#[derive(Debug)]
pub struct Selector {
    config: SelectionConfig,
    engine: SelectionEngine,
    fallback: Box<dyn FallbackSelector>,
}

impl Selector {
    pub fn new(config: SelectionConfig, engine: SelectionEngine) -> Result<Self, Error> {
        Self::with_fallback(config, engine, Box::new(RandomFallback))
    }

    pub fn with_fallback(
        config: SelectionConfig,
        engine: SelectionEngine,
        fallback: Box<dyn FallbackSelector>,
    ) -> Result<Self, Error> {
        if config.field == KeyField::Header && config.header_field.is_none() {
            return Err(Error::Configuration(
                "header_field is required when field == header".to_string(),
            ));
        }
        Ok(Self {
            config,
            engine,
            fallback,
        })
    }

    fn extract_key(&self, request: &dyn Request) -> Option<String> {
        match self.config.field {
            KeyField::Ip => request.remote_addr().map(|a| a.to_string()),
            KeyField::Uri => Some(request.uri().to_string()),
            KeyField::Header => {
                let name = self.config.header_field.as_deref()?;
                request.header(name).map(|v| v.to_string())
            }
            KeyField::ClientIp => request.client_ip_var().map(|a| a.to_string()),
        }
    }

    /// Select an upstream for `request` from `pool` (the fallback's
    /// candidate set; the primary path ignores it and uses the engine's own
    /// topology).
    ///
    /// 1. Extract the key; unavailable ⇒ fallback.
    /// 2. Empty engine ⇒ fallback.
    /// 3. Hash the key to a bucket, resolve to an upstream.
    /// 4. Unbound bucket (race / stale removal) ⇒ fallback.
    /// 5. Return the upstream. The caller rechecks availability before
    ///    dispatch; this layer does not re-probe.
    pub fn select(&self, pool: &[Upstream], request: &dyn Request) -> Option<Upstream> {
        let key = match self.extract_key(request) {
            Some(k) => k,
            None => return self.fallback.select(pool, request),
        };

        if self.engine.size() == 0 {
            return self.fallback.select(pool, request);
        }

        match self.engine.get_node(&key) {
            Some(up) => Some(up),
            None => self.fallback.select(pool, request),
        }
    }
}
