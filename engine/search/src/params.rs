//! Search tuning parameters and per-search limits.

use shakmaty::Move;

/// Exploration constants and feature switches for one search. Defaults are
/// the tournament-tuned values; hosts override them through options.
#[derive(Debug, Clone)]
pub struct Params {
    /// PUCT exploration constant.
    pub cpuct: f32,

    /// Target number of leaves per network batch.
    pub minibatch_size: usize,

    /// Budget for speculative cache warming per batch. 0 disables prefetch.
    pub max_prefetch_batch: usize,

    /// First-play-urgency reduction: unvisited children start from the
    /// parent's value minus this times sqrt(visited policy mass).
    pub fpu_reduction: f32,

    /// Softmax temperature applied to raw policy priors.
    pub policy_softmax_temp: f32,

    /// Collisions tolerated while gathering one batch before giving up.
    pub allowed_node_collisions: usize,

    /// Legacy bias applied to unvisited children; 0 disables it.
    pub virtual_loss_bug: f32,

    /// Dirichlet noise on root priors (self-play exploration).
    pub noise: bool,

    /// Stop early once the best move can no longer be overtaken.
    pub smart_pruning: bool,

    /// Root sampling temperature for move choice; 0 is greedy.
    pub temperature: f32,

    /// Full moves over which `temperature` decays linearly to 0.
    pub temp_decay_moves: u32,

    /// Positions beyond the head included in the NN cache key.
    pub cache_history_length: usize,

    /// Backup update shape; 1.0/1.0 is plain averaging.
    pub backprop_gamma: f32,
    pub backprop_beta: f32,

    /// Emit per-move statistics with the final info.
    pub verbose_stats: bool,

    /// Seed for noise and temperature sampling. `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            cpuct: 3.4,
            minibatch_size: 256,
            max_prefetch_batch: 32,
            fpu_reduction: 0.9,
            policy_softmax_temp: 2.2,
            allowed_node_collisions: 32,
            virtual_loss_bug: 0.0,
            noise: false,
            smart_pruning: true,
            temperature: 0.0,
            temp_decay_moves: 0,
            cache_history_length: 7,
            backprop_gamma: 1.0,
            backprop_beta: 1.0,
            verbose_stats: false,
            seed: None,
        }
    }
}

impl Params {
    /// Small batches and a fixed seed: deterministic and fast for tests.
    pub fn for_testing() -> Self {
        Self {
            minibatch_size: 8,
            allowed_node_collisions: 4,
            seed: Some(42),
            ..Self::default()
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_noise(mut self, noise: bool) -> Self {
        self.noise = noise;
        self
    }

    pub fn with_minibatch_size(mut self, size: usize) -> Self {
        self.minibatch_size = size;
        self
    }
}

/// Stopping conditions for one search. Negative numbers mean "no limit".
#[derive(Debug, Clone)]
pub struct Limits {
    pub visits: i64,
    pub playouts: i64,
    pub time_ms: i64,
    pub infinite: bool,
    /// Root moves the host restricted the search to; empty means all.
    pub searchmoves: Vec<Move>,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            visits: -1,
            playouts: -1,
            time_ms: -1,
            infinite: false,
            searchmoves: Vec::new(),
        }
    }
}

impl Limits {
    pub fn visits(n: i64) -> Self {
        Self {
            visits: n,
            ..Self::default()
        }
    }

    pub fn movetime(ms: i64) -> Self {
        Self {
            time_ms: ms,
            ..Self::default()
        }
    }

    pub fn infinite() -> Self {
        Self {
            infinite: true,
            ..Self::default()
        }
    }
}
