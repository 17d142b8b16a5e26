//! A consistent-hashing load-balancing engine for reverse proxies.
//!
//! This crate implements the MementoHash consistent-hashing scheme: a
//! bucket-space hasher ([`binomial`]) composed with a side table of removals
//! ([`memento`]) so that removing an upstream remaps only the keys that were
//! mapped to it, and restoring upstreams in LIFO order recovers the exact
//! prior mapping. [`ConsistentEngine`] and [`WeightedConsistentEngine`] are
//! the public façade most callers want; [`Selector`] wraps one of them with
//! request-key extraction and a fallback policy, and [`Tracker`] drives
//! topology mutations from health-check events.
//!
//! # Example
//!
//! ```rust
//! use mementohash::{ConsistentEngine, Upstream};
//!
//! let engine = ConsistentEngine::new();
//! engine.add_node(Upstream::new("cache1.itsallbroken.com").unwrap()).unwrap();
//! engine.add_node(Upstream::new("cache2.itsallbroken.com").unwrap()).unwrap();
//!
//! // Map a request key to one of the backends.
//! let backend = engine.get_node(&"user-A").unwrap();
//! println!("user mapped to: {}", backend);
//! ```
//!
//! # Features
//!
//! * `simd`: use the `_mm_crc32_u32` intrinsic for the internal re-hash step
//!   on `x86_64` platforms with SSE4.2 support (enabled by default there).
//! * `fastmod`: Lemire's fast range-mapping in place of a modulo, on 64-bit
//!   platforms (enabled by default).

//   Copyright 2021 Dominic Dwyer (dom@itsallbroken.com)
//
//   Licensed under the Apache License, Version 2.0 (the "License");
//   you may not use this file except in compliance with the License.
//   You may obtain a copy of the License at
//
//       http://www.apache.org/licenses/LICENSE-2.0
//
//   Unless required by applicable law or agreed to in writing, software
//   distributed under the License is distributed on an "AS IS" BASIS,
//   WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//   See the License for the specific language governing permissions and
//   limitations under the License.

#![deny(rust_2018_idioms, missing_debug_implementations, unreachable_pub)]
#![warn(
    missing_docs,
    clippy::todo,
    clippy::dbg_macro,
    clippy::clone_on_ref_ptr
)]
#![allow(clippy::missing_docs_in_private_items)]

mod binomial;

mod memento;

mod engine;

mod error;
pub use error::{Error, Result};

mod hash;

mod indirection;

mod weighted;

mod upstream;
pub use upstream::Upstream;

mod consistent;
pub use consistent::{ConsistentEngine, ConsistentEngineBuilder, WeightedConsistentEngine};

mod selection;
pub use selection::{
    FallbackSelector, KeyField, RandomFallback, Request, SelectionConfig, SelectionEngine,
    Selector,
};

mod tracker;
pub use tracker::{HealthEvent, TopologyEngine, Tracker};
