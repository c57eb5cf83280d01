//! Arena-allocated search tree.
//!
//! The tree outlives individual searches: when the host advances the game by
//! a move the engine already explored, the subtree under that move keeps its
//! statistics and becomes the new root, and every sibling subtree is
//! released by compacting the arena.

use crate::node::{Node, NodeId};
use cinder_position::{History, PositionError};
use shakmaty::Move;

#[derive(Debug)]
pub struct NodeTree {
    nodes: Vec<Node>,
    root: NodeId,
    history: History,
    base_fen: String,
    applied_moves: Vec<String>,
}

impl Default for NodeTree {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeTree {
    /// Fresh tree at the standard starting position.
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::new_root()],
            root: NodeId(0),
            history: History::starting(),
            base_fen: cinder_position::STARTING_FEN.to_string(),
            applied_moves: Vec::new(),
        }
    }

    #[inline]
    pub fn root(&self) -> NodeId {
        self.root
    }

    #[inline]
    pub fn get(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    #[inline]
    pub fn get_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Played-game history ending at the root position.
    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn add_child(&mut self, parent: NodeId, mv: Move) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node::new_child(parent, mv));
        self.get_mut(parent).children.push(id);
        id
    }

    /// Sum of completed visits over a node's children.
    pub fn children_visits(&self, id: NodeId) -> u32 {
        self.get(id).children.iter().map(|&c| self.get(c).n).sum()
    }

    /// Sum of priors over a node's visited children.
    pub fn visited_policy(&self, id: NodeId) -> f32 {
        self.get(id)
            .children
            .iter()
            .map(|&c| self.get(c))
            .filter(|c| c.n > 0)
            .map(|c| c.p)
            .sum()
    }

    /// One step of full-depth propagation during backup. `depth` carries the
    /// candidate value up the path; it is capped by the shallowest child at
    /// each level, and propagation stops at the first node that does not
    /// improve.
    pub fn update_full_depth(&mut self, id: NodeId, depth: &mut u16) -> bool {
        if self.get(id).full_depth >= *depth {
            return false;
        }
        for i in 0..self.get(id).children.len() {
            let child = self.get(id).children[i];
            *depth = (*depth).min(self.get(child).full_depth + 1);
        }
        if *depth >= self.get(id).full_depth {
            self.get_mut(id).full_depth = *depth;
            return true;
        }
        false
    }

    /// Resets the tree to `fen` plus `moves`. If the new position extends
    /// the previous one move by move, the matching subtree is kept (with all
    /// of its statistics) and re-rooted; otherwise the tree is rebuilt.
    pub fn reset_to_position(&mut self, fen: &str, moves: &[String]) -> Result<(), PositionError> {
        let mut history = History::from_fen(fen)?;
        for mv in moves {
            history.push_uci(mv)?;
        }

        let same_game = fen == self.base_fen
            && moves.len() >= self.applied_moves.len()
            && moves[..self.applied_moves.len()] == self.applied_moves[..];

        if same_game {
            for mv in &moves[self.applied_moves.len()..] {
                let next = self
                    .get(self.root)
                    .children
                    .iter()
                    .copied()
                    .find(|&c| {
                        self.get(c)
                            .mv
                            .as_ref()
                            .is_some_and(|m| &cinder_position::policy::move_to_uci(m) == mv)
                    });
                match next {
                    Some(child) => self.re_root(child),
                    None => {
                        // The game left the explored tree; start over.
                        self.nodes = vec![Node::new_root()];
                        self.root = NodeId(0);
                        break;
                    }
                }
            }
        } else {
            self.nodes = vec![Node::new_root()];
            self.root = NodeId(0);
        }

        self.history = history;
        self.base_fen = fen.to_string();
        self.applied_moves = moves.to_vec();
        Ok(())
    }

    /// Compacts the arena down to the subtree under `new_root`.
    fn re_root(&mut self, new_root: NodeId) {
        let mut order = vec![new_root];
        let mut remap = vec![u32::MAX; self.nodes.len()];
        remap[new_root.0 as usize] = 0;
        let mut i = 0;
        while i < order.len() {
            for &child in &self.nodes[order[i].0 as usize].children {
                remap[child.0 as usize] = order.len() as u32;
                order.push(child);
            }
            i += 1;
        }

        let mut nodes = Vec::with_capacity(order.len());
        for &old_id in &order {
            let mut node = std::mem::replace(&mut self.nodes[old_id.0 as usize], Node::new_root());
            node.children = node
                .children
                .iter()
                .map(|c| NodeId(remap[c.0 as usize]))
                .collect();
            node.parent = if old_id == new_root {
                NodeId::NONE
            } else {
                NodeId(remap[node.parent.0 as usize])
            };
            nodes.push(node);
        }
        nodes[0].mv = None;
        self.nodes = nodes;
        self.root = NodeId(0);
    }
}
