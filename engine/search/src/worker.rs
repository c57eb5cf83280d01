//! Search worker.
//!
//! Each worker thread repeats a seven-step iteration: gather a minibatch of
//! leaves by PUCT descent, optionally prefetch likely-next positions into
//! the NN cache, run the batched evaluation, write results into the tree,
//! back values up to the root, and update the shared counters. Workers
//! coordinate only through the tree lock and in-flight visit counts.

use crate::node::NodeId;
use crate::search::SearchContext;
use crate::tree::NodeTree;
use cinder_eval::{CachingComputation, EvalError};
use cinder_position::encode::encode_position;
use cinder_position::policy::move_to_index;
use cinder_position::History;
use rand_distr::{Distribution, Gamma};
use shakmaty::Position;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

/// One gathered leaf (or collision) awaiting backup.
struct NodeToProcess {
    node: NodeId,
    /// The visit could not be started: another worker owns the leaf.
    is_collision: bool,
    /// A computation slot was reserved for this node.
    nn_queried: bool,
    /// Board orientation the node's policy indexes were computed under.
    flip: bool,
    /// Value to back up, from the point of view of the player who moved
    /// into the node.
    v: f32,
}

impl NodeToProcess {
    fn collision(node: NodeId) -> Self {
        Self {
            node,
            is_collision: true,
            nn_queried: false,
            flip: false,
            v: 0.0,
        }
    }

    fn visit(node: NodeId) -> Self {
        Self {
            node,
            is_collision: false,
            nn_queried: false,
            flip: false,
            v: 0.0,
        }
    }
}

pub(crate) struct Worker {
    ctx: Arc<SearchContext>,
    history: History,
    nodes_to_process: Vec<NodeToProcess>,
}

impl Worker {
    pub(crate) fn new(ctx: Arc<SearchContext>) -> Self {
        let history = ctx.played_history.clone();
        Self {
            ctx,
            history,
            nodes_to_process: Vec::new(),
        }
    }

    pub(crate) fn run_blocking(mut self) {
        while self.ctx.is_search_active() {
            if let Err(err) = self.execute_one_iteration() {
                error!(error = %err, "network evaluation failed, aborting search");
                self.cancel_gathered_visits();
                self.ctx.abort_with_failure();
                break;
            }
        }
    }

    fn execute_one_iteration(&mut self) -> Result<(), EvalError> {
        // 1. Fresh batch.
        self.nodes_to_process.clear();
        let mut computation = CachingComputation::new(
            self.ctx.network.new_computation(),
            Arc::clone(&self.ctx.cache),
        );

        // 2. Gather minibatch.
        self.gather_minibatch(&mut computation);

        // 3. Prefetch into cache.
        self.maybe_prefetch_into_cache(&mut computation);

        // 4. Run NN computation. The only step that can fail.
        if computation.batch_size() > 0 {
            computation.compute_blocking()?;
        }

        // 5. Populate nodes with network results.
        self.fetch_nn_results(&computation);

        // 6. Back values up to the root.
        self.do_backup_update();

        // 7. Counters, progress, stop conditions.
        self.update_counters();
        Ok(())
    }

    // 2. Gather minibatch.
    // ~~~~~~~~~~~~~~~~~~~~
    fn gather_minibatch(&mut self, computation: &mut CachingComputation) {
        let mut nodes_found = 0;
        let mut collisions_found = 0;

        while nodes_found < self.ctx.params.minibatch_size {
            // If everything gathered so far came from the cache, there is no
            // slow evaluation to amortize; take what we have.
            if nodes_found > 0 && computation.cache_misses() == 0 {
                return;
            }
            let mut picked = self.pick_node_to_extend();
            if picked.is_collision {
                self.nodes_to_process.push(picked);
                collisions_found += 1;
                if collisions_found > self.ctx.params.allowed_node_collisions {
                    return;
                }
                continue;
            }
            nodes_found += 1;

            // A terminal picked again is a repeat visit; its value is known.
            if let Some(result) = self.ctx.tree.read().get(picked.node).terminal {
                picked.v = result.value_for_mover(self.history.last().turn());
                self.nodes_to_process.push(picked);
                continue;
            }

            self.extend_node(picked.node);

            if let Some(result) = self.ctx.tree.read().get(picked.node).terminal {
                picked.v = result.value_for_mover(self.history.last().turn());
                self.nodes_to_process.push(picked);
                continue;
            }

            picked.nn_queried = true;
            picked.flip = self.history.is_black_to_move();
            {
                let tree = Arc::clone(&self.ctx.tree);
                let t = tree.read();
                self.add_node_to_computation(&t, picked.node, computation, true);
            }
            self.nodes_to_process.push(picked);
        }
    }

    /// PUCT descent from the root. Claims an in-flight visit on every node
    /// along the path; returns either an unextended leaf or the node where a
    /// collision stopped the descent.
    fn pick_node_to_extend(&mut self) -> NodeToProcess {
        let tree = Arc::clone(&self.ctx.tree);
        let mut node_id = self.ctx.root;
        self.history.trim(self.ctx.played_history.len());

        // Snapshot of the incumbent best move for root pruning. It may move
        // under us; the identity check below keeps the incumbent searchable.
        let (best_move_id, best_node_n, remaining_playouts) = {
            let t = tree.read();
            let counters = self.ctx.counters.lock();
            (
                counters.best_move_node,
                counters.best_move_node.map_or(0, |id| t.get(id).n),
                counters.remaining_playouts,
            )
        };

        let mut is_root_node = true;
        loop {
            {
                let mut t = tree.write();
                let node = t.get_mut(node_id);
                if !node.try_start_score_update() {
                    return NodeToProcess::collision(node_id);
                }
                if !node.has_children() {
                    return NodeToProcess::visit(node_id);
                }
            }

            let t = tree.read();
            let node = t.get(node_id);
            let puct_mult =
                self.ctx.params.cpuct * (t.children_visits(node_id).max(1) as f32).sqrt();
            let parent_q = if is_root_node && self.ctx.params.noise {
                -node.q(0.0)
            } else {
                -node.q(0.0)
                    - self.ctx.params.fpu_reduction * t.visited_policy(node_id).sqrt()
            };

            let mut best_score = f32::NEG_INFINITY;
            let mut best_child: Option<NodeId> = None;
            let mut possible_moves = 0;
            for &child_id in &node.children {
                let child = t.get(child_id);
                if is_root_node {
                    // Prune root moves that can no longer catch the
                    // incumbent within the remaining playout budget.
                    if Some(child_id) != best_move_id
                        && remaining_playouts < i64::from(best_node_n) - i64::from(child.n)
                    {
                        continue;
                    }
                    if !self.ctx.limits.searchmoves.is_empty()
                        && !child
                            .mv
                            .as_ref()
                            .is_some_and(|m| self.ctx.limits.searchmoves.contains(m))
                    {
                        continue;
                    }
                    possible_moves += 1;
                }
                let mut q = child.q(parent_q);
                if self.ctx.params.virtual_loss_bug != 0.0 && child.n == 0 {
                    let parent_n = node.n as f32;
                    q = (q * parent_n - self.ctx.params.virtual_loss_bug)
                        / (parent_n + self.ctx.params.virtual_loss_bug.abs());
                }
                let score = puct_mult * child.u() + q;
                if score > best_score {
                    best_score = score;
                    best_child = Some(child_id);
                }
            }

            let next = best_child.expect("root pruning always keeps the incumbent");
            let mv = t
                .get(next)
                .mv
                .clone()
                .expect("non-root nodes carry their move");
            self.history.push(&mv);
            if is_root_node && possible_moves <= 1 && !self.ctx.limits.infinite {
                // Only one root move is worth searching; the answer is known.
                self.ctx.counters.lock().found_best_move = true;
            }
            is_root_node = false;
            drop(t);
            node_id = next;
        }
    }

    /// Classifies the leaf and creates one child per legal move. Requires an
    /// unextended, non-terminal node; callers guarantee exclusivity via the
    /// in-flight claim.
    fn extend_node(&mut self, node_id: NodeId) {
        let legal = self.history.last().legal_moves();
        let at_root = node_id == self.ctx.root;
        let mut t = self.ctx.tree.write();
        if let Some(result) = self.history.classify_terminal(&legal, at_root) {
            t.get_mut(node_id).make_terminal(result);
            return;
        }
        for mv in &legal {
            t.add_child(node_id, mv.clone());
        }
    }

    /// Queues the position at the worker's history head. With
    /// `add_if_cached`, hits still reserve a result slot; prefetch passes
    /// false and only wants misses forwarded.
    fn add_node_to_computation(
        &mut self,
        t: &NodeTree,
        node_id: NodeId,
        computation: &mut CachingComputation,
        add_if_cached: bool,
    ) -> bool {
        let hash = self
            .history
            .hash_last(self.ctx.params.cache_history_length + 1);
        if add_if_cached {
            if computation.add_input_by_hash(hash) {
                return true;
            }
        } else if self.ctx.cache.contains(hash) {
            return true;
        }

        let flip = self.history.is_black_to_move();
        let node = t.get(node_id);
        let moves: Vec<u16> = if node.has_children() {
            node.children
                .iter()
                .map(|&c| {
                    move_to_index(
                        t.get(c).mv.as_ref().expect("non-root nodes carry their move"),
                        flip,
                    )
                })
                .collect()
        } else {
            // Not extended yet; cache against the legal moves directly.
            self.history
                .last()
                .legal_moves()
                .iter()
                .map(|m| move_to_index(m, flip))
                .collect()
        };
        let planes = encode_position(&self.history);
        computation.add_input(hash, planes, moves);
        false
    }

    // 3. Prefetch into cache.
    // ~~~~~~~~~~~~~~~~~~~~~~~
    fn maybe_prefetch_into_cache(&mut self, computation: &mut CachingComputation) {
        let misses = computation.cache_misses();
        if misses == 0 || misses >= self.ctx.params.max_prefetch_batch {
            return;
        }
        self.history.trim(self.ctx.played_history.len());
        let budget = (self.ctx.params.max_prefetch_batch - misses) as i32;
        let tree = Arc::clone(&self.ctx.tree);
        let t = tree.read();
        self.prefetch_into_cache(&t, self.ctx.root, budget, computation);
    }

    /// Best-effort cache warming: spends `budget` slots on the positions
    /// selection is most likely to reach next, splitting each node's budget
    /// between children by how quickly their PUCT score could overtake the
    /// next-best sibling. Returns slots spent.
    fn prefetch_into_cache(
        &mut self,
        t: &NodeTree,
        node_id: NodeId,
        budget: i32,
        computation: &mut CachingComputation,
    ) -> i32 {
        if budget <= 0 {
            return 0;
        }

        let node = t.get(node_id);
        if node.n_started == 0 {
            // Untouched leaf: one budget unit whether or not it was cached,
            // so the walk keeps moving instead of hammering cached lines.
            self.add_node_to_computation(t, node_id, computation, false);
            return 1;
        }
        // Started but unvisited: another worker is extending it right now.
        if node.n == 0 {
            return 0;
        }
        if node.is_terminal() {
            return 0;
        }

        let puct_mult = self.ctx.params.cpuct * (t.children_visits(node_id).max(1) as f32).sqrt();
        let parent_q = -node.q(0.0);

        // Scores are sign-flipped so ascending order is best-first.
        let mut scores: Vec<(f32, NodeId)> = node
            .children
            .iter()
            .filter(|&&c| t.get(c).p > 0.0)
            .map(|&c| {
                let child = t.get(c);
                (-puct_mult * child.u() - child.q(parent_q), c)
            })
            .collect();

        let mut first_unsorted = 0usize;
        let mut budget = budget;
        let mut budget_to_spend = budget;
        let mut total_spent = 0;
        for i in 0..scores.len() {
            if budget <= 0 {
                break;
            }
            // Lazily order the next few candidates; most of the budget goes
            // to the first children, so sorting everything is wasted work.
            if first_unsorted != scores.len() && i + 2 >= first_unsorted {
                let chunk = if budget < 2 { 2 } else { 3 };
                let new_unsorted = scores.len().min(first_unsorted + chunk);
                for k in first_unsorted..new_unsorted {
                    let mut min_idx = k;
                    for j in k + 1..scores.len() {
                        if scores[j].0 < scores[min_idx].0 {
                            min_idx = j;
                        }
                    }
                    scores.swap(k, min_idx);
                }
                first_unsorted = new_unsorted;
            }

            let (_, child_id) = scores[i];
            if i != scores.len() - 1 {
                // Allocate enough visits for this child's score to fall to
                // the next sibling's; the rest of the budget waits there.
                let next_score = -scores[i + 1].0;
                let child = t.get(child_id);
                let q = child.q(-parent_q);
                budget_to_spend = if next_score > q {
                    budget.min(
                        (child.p * puct_mult / (next_score - q)) as i32
                            - child.n_started as i32
                            + 1,
                    )
                } else {
                    budget
                };
            }

            let mv = t
                .get(child_id)
                .mv
                .clone()
                .expect("non-root nodes carry their move");
            self.history.push(&mv);
            let spent = self.prefetch_into_cache(t, child_id, budget_to_spend, computation);
            self.history.pop();
            budget -= spent;
            total_spent += spent;
        }
        total_spent
    }

    // 5. Populate nodes with results of the NN computation.
    // ~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~
    fn fetch_nn_results(&mut self, computation: &CachingComputation) {
        if computation.batch_size() == 0 {
            return;
        }
        let tree = Arc::clone(&self.ctx.tree);
        let mut t = tree.write();
        let mut idx = 0;
        for ntp in &mut self.nodes_to_process {
            if !ntp.nn_queried {
                continue;
            }
            // The network scores the side to move; the node accumulates
            // value for the player who moved into it.
            let v = -computation.q(idx);
            ntp.v = v;
            t.get_mut(ntp.node).v = v;

            let children = t.get(ntp.node).children.clone();
            let mut priors = Vec::with_capacity(children.len());
            let mut total = 0.0f32;
            for &child in &children {
                let mv = t
                    .get(child)
                    .mv
                    .as_ref()
                    .expect("non-root nodes carry their move");
                let mut p = computation.p(idx, move_to_index(mv, ntp.flip));
                if self.ctx.params.policy_softmax_temp != 1.0 {
                    p = p.powf(1.0 / self.ctx.params.policy_softmax_temp);
                }
                total += p;
                priors.push(p);
            }
            if total > 0.0 {
                let scale = 1.0 / total;
                for p in &mut priors {
                    *p *= scale;
                }
            }
            for (&child, &p) in children.iter().zip(priors.iter()) {
                t.get_mut(child).p = p;
            }
            if self.ctx.params.noise && ntp.node == self.ctx.root {
                apply_dirichlet_noise(&self.ctx, &mut t, &children);
            }
            idx += 1;
        }
    }

    // 6. Back values up.
    // ~~~~~~~~~~~~~~~~~~
    fn do_backup_update(&mut self) {
        let tree = Arc::clone(&self.ctx.tree);
        let mut t = tree.write();
        for ntp in &self.nodes_to_process {
            if ntp.is_collision {
                // The colliding node itself was never claimed; release the
                // in-flight visits on its ancestors only.
                let mut id = t.get(ntp.node).parent;
                while id.is_some() {
                    t.get_mut(id).cancel_score_update();
                    id = t.get(id).parent;
                }
                continue;
            }

            let mut v = ntp.v;
            let mut depth: u16 = 0;
            // Terminals count as fully explored to any depth.
            let mut cur_full_depth: u16 = if t.get(ntp.node).is_terminal() { 999 } else { 0 };
            let mut full_depth_updated = true;
            let mut id = ntp.node;
            while id.is_some() {
                depth += 1;
                {
                    let node = t.get_mut(id);
                    node.finalize_score_update(
                        v,
                        self.ctx.params.backprop_gamma,
                        self.ctx.params.backprop_beta,
                    );
                    // The opponent sees the negated value one ply up.
                    v = -v;
                    node.update_max_depth(depth);
                }
                if full_depth_updated {
                    full_depth_updated = t.update_full_depth(id, &mut cur_full_depth);
                }
                let parent = t.get(id).parent;
                if parent == self.ctx.root {
                    let mut counters = self.ctx.counters.lock();
                    let candidate_n = t.get(id).n;
                    let improves = counters
                        .best_move_node
                        .map_or(true, |best| t.get(best).n < candidate_n);
                    if improves {
                        counters.best_move_node = Some(id);
                    }
                }
                id = parent;
            }
            self.ctx.counters.lock().total_playouts += 1;
        }
    }

    // 7. Update counters.
    // ~~~~~~~~~~~~~~~~~~~
    fn update_counters(&mut self) {
        self.ctx.update_remaining_playouts();
        self.ctx.maybe_output_info();
        self.ctx.maybe_trigger_stop();
        if self.nodes_to_process.is_empty() {
            // Nothing but collisions (or nothing at all); let the other
            // workers make progress before trying again.
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    /// Unwinds the in-flight claims of a batch that will never be backed
    /// up, restoring the visit balance before the search aborts.
    fn cancel_gathered_visits(&mut self) {
        let tree = Arc::clone(&self.ctx.tree);
        let mut t = tree.write();
        for ntp in &self.nodes_to_process {
            let mut id = if ntp.is_collision {
                t.get(ntp.node).parent
            } else {
                ntp.node
            };
            while id.is_some() {
                t.get_mut(id).cancel_score_update();
                id = t.get(id).parent;
            }
        }
        self.nodes_to_process.clear();
    }
}

/// Mixes Dirichlet noise into the root priors: eta ~ Gamma(0.3, 1)
/// normalized, blended at epsilon = 0.25.
fn apply_dirichlet_noise(ctx: &SearchContext, t: &mut NodeTree, children: &[NodeId]) {
    const EPS: f32 = 0.25;
    const ALPHA: f64 = 0.3;
    if children.is_empty() {
        return;
    }
    let gamma = Gamma::new(ALPHA, 1.0).expect("valid gamma parameters");
    let mut rng = ctx.rng.lock();
    let noise: Vec<f64> = children.iter().map(|_| gamma.sample(&mut *rng)).collect();
    let total: f64 = noise.iter().sum();
    if total < f64::MIN_POSITIVE {
        return;
    }
    for (&child, eta) in children.iter().zip(noise.iter()) {
        let node = t.get_mut(child);
        node.p = node.p * (1.0 - EPS) + EPS * (eta / total) as f32;
    }
}
