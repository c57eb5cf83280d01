//! Evaluator capability traits.
//!
//! A backend hands out batch builders; the search fills a builder with
//! encoded positions, runs it once, and reads per-slot results. Backends can
//! be anything from the in-tree uniform stub to an out-of-process GPU server,
//! as long as they honor the slot-order contract.

use cinder_position::encode::InputPlanes;
use thiserror::Error;

/// Errors surfaced by evaluation backends.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("evaluation failed: {0}")]
    ComputeFailed(String),

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("unknown backend: {0}")]
    UnknownBackend(String),

    #[error("evaluator registry used before init()")]
    RegistryNotInitialized,
}

/// One pending batch of positions to evaluate.
///
/// Results are addressed by the slot order in which inputs were added.
/// `q` is the value head in `[-1, 1]` from the point of view of the side to
/// move; `p` reads a single policy-head logit by move index.
pub trait NetworkComputation: Send {
    fn add_input(&mut self, planes: InputPlanes);

    fn batch_size(&self) -> usize;

    /// Runs the whole batch synchronously. Returns only when every slot has
    /// an answer. A failure poisons the batch; no slot may be read after an
    /// error.
    fn compute_blocking(&mut self) -> Result<(), EvalError>;

    fn q(&self, idx: usize) -> f32;

    fn p(&self, idx: usize, move_index: u16) -> f32;
}

/// A loaded network able to mint fresh computations.
pub trait Network: Send + Sync {
    fn new_computation(&self) -> Box<dyn NetworkComputation>;
}
