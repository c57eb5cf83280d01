//! Network evaluation for the search core.
//!
//! The search only ever sees the [`Network`]/[`NetworkComputation`] capability
//! pair plus the [`CachingComputation`] wrapper that fronts them with the
//! position-keyed [`NnCache`]. Concrete backends live behind the process-wide
//! [`registry`].

pub mod batch;
pub mod cache;
pub mod network;
pub mod registry;
pub mod stream;
pub mod uniform;

pub use batch::CachingComputation;
pub use cache::{CachedEval, NnCache};
pub use network::{EvalError, Network, NetworkComputation};
pub use stream::{StreamingNetwork, StreamingOptions};
pub use uniform::UniformNetwork;
