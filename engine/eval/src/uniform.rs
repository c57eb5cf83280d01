//! Flat-policy backend.
//!
//! Evaluates every position to value 0 with a uniform policy. Useful as a
//! deterministic stand-in for a real network in tests and smoke runs: the
//! search then reduces to prior-free PUCT, which still solves tactics via
//! terminal nodes.

use crate::network::{EvalError, Network, NetworkComputation};
use cinder_position::encode::InputPlanes;
use cinder_position::policy::POLICY_SIZE;

#[derive(Debug, Default, Clone, Copy)]
pub struct UniformNetwork;

impl UniformNetwork {
    pub fn new() -> Self {
        Self
    }
}

impl Network for UniformNetwork {
    fn new_computation(&self) -> Box<dyn NetworkComputation> {
        Box::new(UniformComputation { inputs: 0 })
    }
}

struct UniformComputation {
    inputs: usize,
}

impl NetworkComputation for UniformComputation {
    fn add_input(&mut self, _planes: InputPlanes) {
        self.inputs += 1;
    }

    fn batch_size(&self) -> usize {
        self.inputs
    }

    fn compute_blocking(&mut self) -> Result<(), EvalError> {
        Ok(())
    }

    fn q(&self, idx: usize) -> f32 {
        debug_assert!(idx < self.inputs);
        0.0
    }

    fn p(&self, idx: usize, _move_index: u16) -> f32 {
        debug_assert!(idx < self.inputs);
        1.0 / POLICY_SIZE as f32
    }
}
