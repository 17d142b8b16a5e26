//! The topology tracker: consumes `healthy`/`unhealthy` events from the
//! surrounding proxy and drives add/remove on the engine (spec §4.7).

use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Error;
use crate::upstream::Upstream;

/// The two event kinds the tracker subscribes to. Each carries at least a
/// `host` field; unknown payload fields are the proxy's concern, not ours.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthEvent {
    /// `host` became healthy and should be added to the topology.
    Healthy { host: Upstream },
    /// `host` became unhealthy and should be removed from the topology.
    Unhealthy { host: Upstream },
}

/// The capability `Tracker` needs from whatever engine it drives —
/// `ConsistentEngine` and `WeightedConsistentEngine` both satisfy this.
pub trait TopologyEngine: Debug + Send + Sync {
    fn add_node(&self, up: Upstream) -> Result<(), Error>;
    fn remove_node(&self, up: &Upstream) -> Result<(), Error>;
    fn has_node(&self, up: &Upstream) -> bool;
}

impl TopologyEngine for crate::consistent::ConsistentEngine {
    fn add_node(&self, up: Upstream) -> Result<(), Error> {
        crate::consistent::ConsistentEngine::add_node(self, up)
    }
    fn remove_node(&self, up: &Upstream) -> Result<(), Error> {
        crate::consistent::ConsistentEngine::remove_node(self, up)
    }
    fn has_node(&self, up: &Upstream) -> bool {
        crate::consistent::ConsistentEngine::has_node(self, up)
    }
}

/// Health events carry no weight, so a host arriving via `healthy(host)`
/// joins a weighted topology with a weight of one; callers that need a
/// different weight call `WeightedConsistentEngine::update_weight` directly
/// after the node appears.
impl TopologyEngine for crate::consistent::WeightedConsistentEngine {
    fn add_node(&self, up: Upstream) -> Result<(), Error> {
        crate::consistent::WeightedConsistentEngine::add_node(self, up, 1)
    }
    fn remove_node(&self, up: &Upstream) -> Result<(), Error> {
        crate::consistent::WeightedConsistentEngine::remove_node(self, up)
    }
    fn has_node(&self, up: &Upstream) -> bool {
        crate::consistent::WeightedConsistentEngine::has_node(self, up)
    }
}

/// Serializes event handling so that concurrent `healthy(h)` calls for the
/// same `h` are idempotent, and interleaved events are applied in delivery
/// order, independent of how many readers are mid-`Select` (spec §5).
///
/// `Tracker` is handed the starting upstream list at construction and adds
/// each before returning, so no event delivered after construction can race
/// with initial population (spec §4.7).
pub struct Tracker<E: TopologyEngine> {
    engine: Arc<E>,
    writer: Mutex<()>,
}

impl<E: TopologyEngine> Debug for Tracker<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracker").field("engine", &self.engine).finish()
    }
}

impl<E: TopologyEngine> Tracker<E> {
    /// Populate `engine` with `initial` and return a tracker ready to
    /// subscribe to events.
    pub fn new(engine: Arc<E>, initial: Vec<Upstream>) -> Result<Self, Error> {
        for up in initial {
            engine.add_node(up)?;
        }
        Ok(Self {
            engine,
            writer: Mutex::new(()),
        })
    }

    /// Apply one event. `healthy` for an already-present host and
    /// `unhealthy` for an absent one are both no-ops (spec §4.7, §7).
    pub fn handle_event(&self, event: HealthEvent) {
        let _guard = self.writer.lock();
        match event {
            HealthEvent::Healthy { host } => {
                if self.engine.has_node(&host) {
                    tracing::debug!(host = %host, "healthy event for already-tracked host, ignoring");
                    return;
                }
                match self.engine.add_node(host.clone()) {
                    Ok(()) => tracing::info!(host = %host, "added host to topology"),
                    Err(err) => tracing::warn!(host = %host, %err, "failed to add host to topology"),
                }
            }
            HealthEvent::Unhealthy { host } => {
                if !self.engine.has_node(&host) {
                    tracing::debug!(host = %host, "unhealthy event for untracked host, ignoring");
                    return;
                }
                match self.engine.remove_node(&host) {
                    Ok(()) => tracing::info!(host = %host, "removed host from topology"),
                    Err(err) => tracing::warn!(host = %host, %err, "failed to remove host from topology"),
                }
            }
        }
    }

    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }
}
