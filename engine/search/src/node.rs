//! Search tree nodes.
//!
//! Nodes live in an arena (`Vec<Node>`) and refer to each other by index.
//! A node's accumulated value `W` is kept from the point of view of the
//! player who moved *into* the node, so a parent reads its children's `Q`
//! directly during selection and values are negated once per ply on backup.

use cinder_position::GameResult;
use shakmaty::Move;

/// Index into the node arena. Using a newtype for type safety.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

impl NodeId {
    pub const NONE: NodeId = NodeId(u32::MAX);

    pub fn is_none(self) -> bool {
        self == Self::NONE
    }

    pub fn is_some(self) -> bool {
        !self.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    /// Parent node index (NONE for the root).
    pub parent: NodeId,

    /// Edge label: the move that leads from the parent to this node.
    /// `None` only at the root.
    pub mv: Option<Move>,

    /// Child nodes, in move-generation order. Empty until extended.
    pub children: Vec<NodeId>,

    /// Prior probability from the policy head, set once when the parent's
    /// network result arrives.
    pub p: f32,

    /// Completed visits.
    pub n: u32,

    /// Started visits; `n_started - n` playouts are currently in flight.
    pub n_started: u32,

    /// Accumulated value sum; `Q = W / N`.
    pub w: f32,

    /// Raw network value, set once on first evaluation.
    pub v: f32,

    /// Game-rule result, if this position ends the game. Monotonic: never
    /// cleared once set.
    pub terminal: Option<GameResult>,

    /// Deepest completed playout through this node.
    pub max_depth: u16,

    /// Depth to which every line below this node is fully explored.
    pub full_depth: u16,
}

impl Node {
    pub fn new_root() -> Self {
        Self::new(NodeId::NONE, None)
    }

    pub fn new_child(parent: NodeId, mv: Move) -> Self {
        Self::new(parent, Some(mv))
    }

    fn new(parent: NodeId, mv: Option<Move>) -> Self {
        Self {
            parent,
            mv,
            children: Vec::new(),
            p: 0.0,
            n: 0,
            n_started: 0,
            w: 0.0,
            v: 0.0,
            terminal: None,
            max_depth: 0,
            full_depth: 0,
        }
    }

    /// Mean value, or `fallback` (first-play urgency) when unvisited.
    #[inline]
    pub fn q(&self, fallback: f32) -> f32 {
        if self.n > 0 {
            self.w / self.n as f32
        } else {
            fallback
        }
    }

    /// Prior-weighted exploration term. The caller multiplies by
    /// `cpuct * sqrt(children_visits)`.
    #[inline]
    pub fn u(&self) -> f32 {
        self.p / (1.0 + self.n_started as f32)
    }

    #[inline]
    pub fn n_in_flight(&self) -> u32 {
        self.n_started - self.n
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.terminal.is_some()
    }

    #[inline]
    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    /// Claims an in-flight visit. Fails when the node is an unextended leaf
    /// that another worker is already expanding: that worker owns the
    /// extension, and a second visit now would be a collision.
    pub fn try_start_score_update(&mut self) -> bool {
        if self.n == 0 && self.n_started > 0 {
            return false;
        }
        self.n_started += 1;
        true
    }

    /// Releases an in-flight visit without completing it.
    pub fn cancel_score_update(&mut self) {
        debug_assert!(self.n_started > self.n);
        self.n_started -= 1;
    }

    /// Completes a visit with value `v`. At the default `gamma = beta = 1`
    /// this is plain accumulation, `W += v`; the parameters bias the update
    /// toward or away from the running mean.
    pub fn finalize_score_update(&mut self, v: f32, gamma: f32, beta: f32) {
        debug_assert!(self.n_started > self.n);
        let q_old = self.q(0.0);
        self.w += beta * (v - gamma * q_old) + gamma * q_old;
        self.n += 1;
    }

    /// Marks the node as a finished game. Terminal nodes are never extended
    /// and never evaluated by the network.
    pub fn make_terminal(&mut self, result: GameResult) {
        debug_assert!(self.terminal.is_none());
        debug_assert!(self.children.is_empty());
        self.terminal = Some(result);
    }

    pub fn update_max_depth(&mut self, depth: u16) {
        if depth > self.max_depth {
            self.max_depth = depth;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_none() {
        assert!(NodeId::NONE.is_none());
        assert!(NodeId(0).is_some());
    }

    #[test]
    fn q_falls_back_when_unvisited() {
        let mut node = Node::new_root();
        assert_eq!(node.q(-0.25), -0.25);
        node.try_start_score_update();
        node.finalize_score_update(1.0, 1.0, 1.0);
        assert_eq!(node.q(-0.25), 1.0);
    }

    #[test]
    fn default_backup_is_plain_accumulation() {
        let mut node = Node::new_root();
        for v in [1.0, 0.0, -1.0, 1.0] {
            node.try_start_score_update();
            node.finalize_score_update(v, 1.0, 1.0);
        }
        assert_eq!(node.n, 4);
        assert!((node.w - 1.0).abs() < 1e-6);
        assert!((node.q(0.0) - 0.25).abs() < 1e-6);
    }

    #[test]
    fn collision_detection() {
        let mut node = Node::new_root();
        assert!(node.try_start_score_update());
        // Unextended with a visit in flight: second visit collides.
        assert!(!node.try_start_score_update());
        node.cancel_score_update();
        assert_eq!(node.n_in_flight(), 0);
        assert!(node.try_start_score_update());
        node.finalize_score_update(0.5, 1.0, 1.0);
        // Visited nodes accept concurrent in-flight visits.
        assert!(node.try_start_score_update());
        assert!(node.try_start_score_update());
        assert_eq!(node.n_in_flight(), 2);
    }

    #[test]
    fn exploration_term_decays_with_started_visits() {
        let mut node = Node::new_root();
        node.p = 0.8;
        assert!((node.u() - 0.8).abs() < 1e-6);
        node.try_start_score_update();
        assert!((node.u() - 0.4).abs() < 1e-6);
    }
}
