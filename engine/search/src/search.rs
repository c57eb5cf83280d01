//! Search controller.
//!
//! Owns the shared state of one search over an existing [`NodeTree`] and the
//! worker threads that grow it. Three locks split the hot state: the tree's
//! reader-writer lock for node statistics, a mutex for the stop/progress
//! counters, and a mutex for thread handles. Lock order is tree before
//! counters, everywhere.

use crate::node::NodeId;
use crate::params::{Limits, Params};
use crate::report::{
    q_to_centipawns, BestMoveInfo, BestMoveCallback, InfoCallback, ThinkingInfo,
};
use crate::tree::NodeTree;
use crate::worker::Worker;
use cinder_eval::{Network, NnCache};
use cinder_position::policy::{move_to_index, move_to_uci};
use cinder_position::History;
use parking_lot::{Mutex, RwLock};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use tracing::debug;

/// Leeway granted to the nodes-per-second estimate before smart pruning
/// trusts it.
pub(crate) const SMART_PRUNING_TOLERANCE_NODES: i64 = 100;
pub(crate) const SMART_PRUNING_TOLERANCE_MS: i64 = 200;
/// Longest silence between info events when nothing interesting changes.
const INFO_MINIMUM_FREQUENCY_MS: i64 = 5000;

pub struct Search {
    ctx: Arc<SearchContext>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

pub(crate) struct SearchContext {
    pub(crate) tree: Arc<RwLock<NodeTree>>,
    pub(crate) root: NodeId,
    pub(crate) played_history: History,
    pub(crate) network: Arc<dyn Network>,
    pub(crate) cache: Arc<NnCache>,
    pub(crate) params: Params,
    pub(crate) limits: Limits,
    pub(crate) start_time: Instant,
    pub(crate) initial_visits: u32,
    pub(crate) counters: Mutex<Counters>,
    pub(crate) rng: Mutex<ChaCha20Rng>,
    info_callback: InfoCallback,
    best_move_callback: BestMoveCallback,
}

pub(crate) struct Counters {
    pub(crate) stop: bool,
    pub(crate) responded_bestmove: bool,
    pub(crate) found_best_move: bool,
    pub(crate) total_playouts: i64,
    pub(crate) remaining_playouts: i64,
    pub(crate) best_move_node: Option<NodeId>,
    last_outputted_best_move_node: Option<NodeId>,
    last_info_depth: u16,
    last_info_seldepth: u16,
    last_info_time: i64,
    best_move: BestMoveInfo,
}

impl Search {
    pub fn new(
        tree: Arc<RwLock<NodeTree>>,
        network: Arc<dyn Network>,
        cache: Arc<NnCache>,
        limits: Limits,
        params: Params,
        info_callback: InfoCallback,
        best_move_callback: BestMoveCallback,
    ) -> Self {
        let (root, played_history, initial_visits) = {
            let t = tree.read();
            (t.root(), t.history().clone(), t.get(t.root()).n)
        };
        let rng = match params.seed {
            Some(seed) => ChaCha20Rng::seed_from_u64(seed),
            None => ChaCha20Rng::from_entropy(),
        };
        Self {
            ctx: Arc::new(SearchContext {
                tree,
                root,
                played_history,
                network,
                cache,
                params,
                limits,
                start_time: Instant::now(),
                initial_visits,
                counters: Mutex::new(Counters {
                    stop: false,
                    responded_bestmove: false,
                    found_best_move: false,
                    total_playouts: 0,
                    remaining_playouts: i64::MAX,
                    best_move_node: None,
                    last_outputted_best_move_node: None,
                    last_info_depth: 0,
                    last_info_seldepth: 0,
                    last_info_time: 0,
                    best_move: BestMoveInfo::default(),
                }),
                rng: Mutex::new(rng),
                info_callback,
                best_move_callback,
            }),
            threads: Mutex::new(Vec::new()),
        }
    }

    /// Launches worker threads. Idempotent up to the requested count.
    pub fn start(&self, how_many: usize) {
        let mut threads = self.threads.lock();
        while threads.len() < how_many {
            let ctx = Arc::clone(&self.ctx);
            let handle = std::thread::Builder::new()
                .name(format!("cinder-search-{}", threads.len()))
                .spawn(move || Worker::new(ctx).run_blocking())
                .expect("spawn search worker thread");
            threads.push(handle);
        }
        debug!(threads = threads.len(), "search started");
    }

    /// Requests a graceful stop. The best-move event still fires (once).
    pub fn stop(&self) {
        self.ctx.counters.lock().stop = true;
        // A worker may already have drained and gone idle; settle the
        // best-move emission from here rather than from its next iteration.
        self.ctx.maybe_trigger_stop();
    }

    /// Stops without ever emitting a best move.
    pub fn abort(&self) {
        let mut counters = self.ctx.counters.lock();
        counters.responded_bestmove = true;
        counters.stop = true;
    }

    /// Joins all workers.
    pub fn wait(&self) {
        let mut threads = self.threads.lock();
        while let Some(handle) = threads.pop() {
            let _ = handle.join();
        }
    }

    /// Currently preferred move, honoring temperature settings.
    pub fn best_move_now(&self) -> BestMoveInfo {
        let tree = self.ctx.tree.read();
        let counters = self.ctx.counters.lock();
        self.ctx.best_move_internal(&tree, &counters)
    }

    /// Evaluation of the actual best child, ignoring temperature.
    pub fn best_eval_now(&self) -> f32 {
        let tree = self.ctx.tree.read();
        let _counters = self.ctx.counters.lock();
        let root = tree.get(self.ctx.root);
        let parent_q = -root.q(0.0);
        if !root.has_children() {
            return parent_q;
        }
        match self.ctx.best_child_no_temperature(&tree, self.ctx.root) {
            Some(best) => tree.get(best).q(parent_q),
            None => parent_q,
        }
    }

    /// Completed playouts so far.
    pub fn total_playouts(&self) -> i64 {
        self.ctx.counters.lock().total_playouts
    }
}

impl Drop for Search {
    fn drop(&mut self) {
        self.abort();
        self.wait();
    }
}

impl SearchContext {
    pub(crate) fn elapsed_ms(&self) -> i64 {
        self.start_time.elapsed().as_millis() as i64
    }

    pub(crate) fn is_search_active(&self) -> bool {
        !self.counters.lock().stop
    }

    /// Abort initiated by a worker on evaluator failure: no best-move event
    /// is fabricated for a search that could not finish.
    pub(crate) fn abort_with_failure(&self) {
        let mut counters = self.counters.lock();
        counters.responded_bestmove = true;
        counters.stop = true;
    }

    /// Applies the stop rules and, on the transition to stopped, emits the
    /// final info and the single best-move event.
    pub(crate) fn maybe_trigger_stop(&self) {
        let tree = self.tree.read();
        let mut counters = self.counters.lock();
        // Never stop before the root has been expanded.
        if counters.total_playouts == 0 {
            return;
        }
        if counters.found_best_move {
            counters.stop = true;
        }
        if self.limits.playouts >= 0 && counters.total_playouts >= self.limits.playouts {
            counters.stop = true;
        }
        if self.limits.visits >= 0
            && counters.total_playouts + i64::from(self.initial_visits) >= self.limits.visits
        {
            counters.stop = true;
        }
        if self.limits.time_ms >= 0 && self.elapsed_ms() >= self.limits.time_ms {
            counters.stop = true;
        }
        if counters.stop && !counters.responded_bestmove {
            self.send_uci_info(&tree, &mut counters);
            if self.params.verbose_stats {
                self.send_move_stats(&tree);
            }
            let best = self.best_move_internal(&tree, &counters);
            counters.best_move = best.clone();
            counters.responded_bestmove = true;
            counters.best_move_node = None;
            (self.best_move_callback)(best);
        }
    }

    /// Emits an info event when the best move changed, a depth moved, or
    /// the rate-limit interval expired.
    pub(crate) fn maybe_output_info(&self) {
        let tree = self.tree.read();
        let mut counters = self.counters.lock();
        if counters.responded_bestmove || counters.best_move_node.is_none() {
            return;
        }
        let root = tree.get(self.root);
        if counters.best_move_node != counters.last_outputted_best_move_node
            || counters.last_info_depth != root.full_depth
            || counters.last_info_seldepth != root.max_depth
            || counters.last_info_time + INFO_MINIMUM_FREQUENCY_MS < self.elapsed_ms()
        {
            self.send_uci_info(&tree, &mut counters);
        }
    }

    fn send_uci_info(&self, tree: &NodeTree, counters: &mut Counters) {
        let Some(best_id) = counters.best_move_node else {
            return;
        };
        counters.last_outputted_best_move_node = Some(best_id);
        let root = tree.get(self.root);
        let time_ms = self.elapsed_ms();
        let nodes = counters.total_playouts + i64::from(self.initial_visits);

        let mut pv = Vec::new();
        let mut iter = Some(best_id);
        while let Some(id) = iter {
            if let Some(mv) = tree.get(id).mv.as_ref() {
                pv.push(move_to_uci(mv));
            }
            iter = self.best_child_no_temperature(tree, id);
        }

        let info = ThinkingInfo {
            depth: root.full_depth,
            seldepth: root.max_depth,
            time_ms,
            nodes,
            nps: if time_ms > 0 {
                counters.total_playouts * 1000 / time_ms
            } else {
                0
            },
            hashfull: (self.cache.len() * 1000 / self.cache.capacity().max(1)) as i64,
            score_cp: Some(q_to_centipawns(tree.get(best_id).q(0.0))),
            pv,
            comment: None,
        };
        counters.last_info_depth = info.depth;
        counters.last_info_seldepth = info.seldepth;
        counters.last_info_time = info.time_ms;
        (self.info_callback)(info);
    }

    /// One comment line per root child, least visited first.
    fn send_move_stats(&self, tree: &NodeTree) {
        let root = tree.get(self.root);
        let parent_q =
            -root.q(0.0) - self.params.fpu_reduction * self.tree_visited_policy(tree).sqrt();
        let puct_mult =
            self.params.cpuct * (tree.children_visits(self.root).max(1) as f32).sqrt();
        let flip = self.played_history.is_black_to_move();

        let mut children = root.children.clone();
        children.sort_by_key(|&id| tree.get(id).n);
        for id in children {
            let node = tree.get(id);
            let Some(mv) = node.mv.as_ref() else { continue };
            let u = node.u() * puct_mult;
            let q = node.q(parent_q);
            let comment = format!(
                "{:<5} ({:4}) N: {:7} (+{:2}) (V: {:6.2}%) (P: {:5.2}%) (Q: {:8.5}) (U: {:.5}) (Q+U: {:.5})",
                move_to_uci(mv),
                move_to_index(mv, flip),
                node.n,
                node.n_in_flight(),
                node.v * 100.0,
                node.p * 100.0,
                q,
                u,
                q + u,
            );
            (self.info_callback)(ThinkingInfo {
                comment: Some(comment),
                ..ThinkingInfo::default()
            });
        }
    }

    fn tree_visited_policy(&self, tree: &NodeTree) -> f32 {
        tree.visited_policy(self.root)
    }

    /// Recomputes the smart-pruning bound on playouts this search can still
    /// complete, taking the tightest of the time, visit and playout budgets.
    pub(crate) fn update_remaining_playouts(&self) {
        if !self.params.smart_pruning {
            return;
        }
        let mut counters = self.counters.lock();
        let mut remaining = i64::MAX;
        if self.limits.time_ms >= 0 {
            let elapsed = self.elapsed_ms();
            if elapsed > SMART_PRUNING_TOLERANCE_MS {
                let nps = (1000 * counters.total_playouts + SMART_PRUNING_TOLERANCE_NODES)
                    / (elapsed - SMART_PRUNING_TOLERANCE_MS)
                    + 1;
                let remaining_time = self.limits.time_ms - elapsed;
                remaining = remaining.min(remaining_time * nps / 1000);
            }
        }
        if self.limits.visits >= 0 {
            // The minibatch may overshoot the limit by its own size.
            remaining = remaining.min(
                self.limits.visits - counters.total_playouts - i64::from(self.initial_visits)
                    + self.params.minibatch_size as i64
                    - 1,
            );
        }
        if self.limits.playouts >= 0 {
            remaining = remaining.min(
                self.limits.playouts - counters.total_playouts
                    + self.params.minibatch_size as i64
                    + 1,
            );
        }
        // Even over budget, never starve the search completely.
        counters.remaining_playouts = remaining.max(1);
    }

    /// Best move under the temperature settings, or the recorded answer if
    /// this search already responded.
    pub(crate) fn best_move_internal(&self, tree: &NodeTree, counters: &Counters) -> BestMoveInfo {
        if counters.responded_bestmove {
            return counters.best_move.clone();
        }
        if !tree.get(self.root).has_children() {
            return BestMoveInfo::default();
        }

        let mut temperature = self.params.temperature;
        if temperature > 0.0 && self.params.temp_decay_moves > 0 {
            let moves = self.played_history.ply() / 2;
            if moves >= self.params.temp_decay_moves {
                temperature = 0.0;
            } else {
                temperature *= (self.params.temp_decay_moves - moves) as f32
                    / self.params.temp_decay_moves as f32;
            }
        }

        let best = if temperature > 0.0 && tree.get(self.root).n > 1 {
            self.best_child_with_temperature(tree, self.root, temperature)
        } else {
            self.best_child_no_temperature(tree, self.root)
        };
        BestMoveInfo {
            best_move: best
                .and_then(|id| tree.get(id).mv.as_ref().map(move_to_uci)),
            ponder_move: None,
        }
    }

    fn root_child_allowed(&self, tree: &NodeTree, parent: NodeId, child: NodeId) -> bool {
        if parent != self.root || self.limits.searchmoves.is_empty() {
            return true;
        }
        tree.get(child)
            .mv
            .as_ref()
            .is_some_and(|m| self.limits.searchmoves.contains(m))
    }

    /// Most-visited child; ties break toward higher eval, then higher prior.
    pub(crate) fn best_child_no_temperature(
        &self,
        tree: &NodeTree,
        parent: NodeId,
    ) -> Option<NodeId> {
        let mut best: Option<(NodeId, (u32, f32, f32))> = None;
        for &child in &tree.get(parent).children {
            if !self.root_child_allowed(tree, parent, child) {
                continue;
            }
            let node = tree.get(child);
            let key = (node.n, node.q(-10.0), node.p);
            let better = match &best {
                None => true,
                Some((_, b)) => {
                    key.0 > b.0
                        || (key.0 == b.0 && (key.1 > b.1 || (key.1 == b.1 && key.2 > b.2)))
                }
            };
            if better {
                best = Some((child, key));
            }
        }
        best.map(|(id, _)| id)
    }

    /// Samples a child proportional to `(N / N_parent)^(1/T)`.
    fn best_child_with_temperature(
        &self,
        tree: &NodeTree,
        parent: NodeId,
        temperature: f32,
    ) -> Option<NodeId> {
        let n_parent = tree.get(parent).n as f32;
        let mut cumulative = Vec::new();
        let mut eligible = Vec::new();
        let mut sum = 0.0f32;
        for &child in &tree.get(parent).children {
            if !self.root_child_allowed(tree, parent, child) {
                continue;
            }
            sum += (tree.get(child).n as f32 / n_parent).powf(1.0 / temperature);
            cumulative.push(sum);
            eligible.push(child);
        }
        if sum <= 0.0 {
            return self.best_child_no_temperature(tree, parent);
        }
        let toss: f32 = self.rng.lock().gen::<f32>() * sum;
        let idx = cumulative.partition_point(|&c| c < toss).min(eligible.len() - 1);
        Some(eligible[idx])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinder_eval::UniformNetwork;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn quiet_callbacks() -> (InfoCallback, BestMoveCallback) {
        (Box::new(|_| {}), Box::new(|_| {}))
    }

    fn make_search(limits: Limits, params: Params) -> Search {
        let tree = Arc::new(RwLock::new(NodeTree::new()));
        let (info, best) = quiet_callbacks();
        Search::new(
            tree,
            Arc::new(UniformNetwork::new()),
            Arc::new(NnCache::new(1000)),
            limits,
            params,
            info,
            best,
        )
    }

    #[test]
    fn stop_before_any_playout_emits_nothing() {
        static BEST_EVENTS: AtomicUsize = AtomicUsize::new(0);
        let tree = Arc::new(RwLock::new(NodeTree::new()));
        let search = Search::new(
            tree,
            Arc::new(UniformNetwork::new()),
            Arc::new(NnCache::new(1000)),
            Limits::default(),
            Params::for_testing(),
            Box::new(|_| {}),
            Box::new(|_| {
                BEST_EVENTS.fetch_add(1, Ordering::SeqCst);
            }),
        );
        search.stop();
        search.wait();
        assert_eq!(BEST_EVENTS.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn best_move_without_children_is_null() {
        let search = make_search(Limits::default(), Params::for_testing());
        assert_eq!(search.best_move_now(), BestMoveInfo::default());
    }

    #[test]
    fn remaining_playouts_tracks_visit_budget() {
        let search = make_search(Limits::visits(100), Params::for_testing());
        {
            let mut counters = search.ctx.counters.lock();
            counters.total_playouts = 40;
        }
        search.ctx.update_remaining_playouts();
        let counters = search.ctx.counters.lock();
        // 100 - 40 - 0 + 8 - 1
        assert_eq!(counters.remaining_playouts, 67);
    }

    #[test]
    fn remaining_playouts_tracks_playout_budget_independently() {
        let mut limits = Limits::default();
        limits.playouts = 50;
        let search = make_search(limits, Params::for_testing());
        {
            search.ctx.counters.lock().total_playouts = 30;
        }
        search.ctx.update_remaining_playouts();
        // 50 - 30 + 8 + 1
        assert_eq!(search.ctx.counters.lock().remaining_playouts, 29);
    }

    #[test]
    fn remaining_playouts_never_drops_below_one() {
        let search = make_search(Limits::visits(1), Params::for_testing());
        {
            search.ctx.counters.lock().total_playouts = 500;
        }
        search.ctx.update_remaining_playouts();
        assert_eq!(search.ctx.counters.lock().remaining_playouts, 1);
    }
}
