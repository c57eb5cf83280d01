//! Engine controller.
//!
//! Glues the host protocol to the search: owns the tree (so statistics
//! survive across moves of one game), the NN cache, the loaded network and
//! the in-flight search. Option changes are deferred and re-applied on the
//! next action; `ensure_ready` is the gate the host can use to wait for
//! them to land.

use crate::options::{EngineOptions, OptionsError};
use crate::time::{build_limits, TimeParams};
use crate::uci::GoParams;
use anyhow::{Context, Result};
use cinder_eval::{registry, Network, NnCache};
use cinder_position::policy::move_to_uci;
use cinder_position::STARTING_FEN;
use cinder_search::{BestMoveInfo, NodeTree, Search, ThinkingInfo};
use parking_lot::RwLock;
use shakmaty::{Move, Position};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

pub type InfoSink = Arc<dyn Fn(ThinkingInfo) + Send + Sync>;
pub type BestMoveSink = Arc<dyn Fn(BestMoveInfo) + Send + Sync>;

pub struct EngineController {
    options: EngineOptions,
    /// Configuration gate: actions hold it shared, `ensure_ready` drains it
    /// exclusively.
    busy: Arc<RwLock<()>>,
    tree: Arc<RwLock<NodeTree>>,
    cache: Arc<NnCache>,
    network: Option<Arc<dyn Network>>,
    /// Backend/weights pair the current network was built from.
    network_signature: Option<(String, String)>,
    search: Option<Search>,
    info_sink: InfoSink,
    best_move_sink: BestMoveSink,
}

impl EngineController {
    pub fn new(options: EngineOptions, info_sink: InfoSink, best_move_sink: BestMoveSink) -> Self {
        let cache = Arc::new(NnCache::new(options.nncache));
        Self {
            options,
            busy: Arc::new(RwLock::new(())),
            tree: Arc::new(RwLock::new(NodeTree::new())),
            cache,
            network: None,
            network_signature: None,
            search: None,
            info_sink,
            best_move_sink,
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Records an option change. Nothing is applied until the next action.
    pub fn set_option(&mut self, name: &str, value: &str) -> Result<(), OptionsError> {
        self.options.set(name, value)
    }

    /// Re-applies pending configuration and waits out anything still using
    /// the previous one.
    pub fn ensure_ready(&mut self) -> Result<()> {
        self.update_network()?;
        self.cache.set_capacity(self.options.nncache);
        let busy = Arc::clone(&self.busy);
        let _gate = busy.write();
        Ok(())
    }

    /// Forgets the game: drops the search and the tree, clears the cache.
    pub fn new_game(&mut self) -> Result<()> {
        let busy = Arc::clone(&self.busy);
        let _gate = busy.read();
        self.search.take();
        self.cache.clear();
        self.cache.set_capacity(self.options.nncache);
        *self.tree.write() = NodeTree::new();
        self.update_network()
    }

    /// Resets the root to `fen` plus `moves`, keeping any explored subtree.
    pub fn set_position(&mut self, fen: Option<&str>, moves: &[String]) -> Result<()> {
        let busy = Arc::clone(&self.busy);
        let _gate = busy.read();
        self.search.take();
        self.tree
            .write()
            .reset_to_position(fen.unwrap_or(STARTING_FEN), moves)?;
        self.update_network()
    }

    /// Starts a search with limits computed from the clock.
    pub fn go(&mut self, params: &GoParams) -> Result<()> {
        let busy = Arc::clone(&self.busy);
        let _gate = busy.read();
        self.search.take();
        self.update_network()?;
        self.cache.set_capacity(self.options.nncache);

        let (ply, is_black) = {
            let tree = self.tree.read();
            (tree.history().ply(), tree.history().is_black_to_move())
        };
        let mut limits = build_limits(params, ply, is_black, &self.time_params());
        limits.searchmoves = self.resolve_searchmoves(&params.searchmoves);

        let network = self
            .network
            .clone()
            .context("no evaluator backend loaded")?;
        let info_sink = Arc::clone(&self.info_sink);
        let best_move_sink = Arc::clone(&self.best_move_sink);
        let search = Search::new(
            Arc::clone(&self.tree),
            network,
            Arc::clone(&self.cache),
            limits,
            self.options.search_params(),
            Box::new(move |info| info_sink(info)),
            Box::new(move |best| best_move_sink(best)),
        );
        search.start(self.options.threads);
        self.search = Some(search);
        Ok(())
    }

    /// Graceful stop: the best-move event fires before this returns.
    pub fn stop(&mut self) {
        if let Some(search) = &self.search {
            search.stop();
            search.wait();
        }
    }

    fn time_params(&self) -> TimeParams {
        TimeParams {
            slowmover: self.options.slowmover,
            move_overhead_ms: self.options.move_overhead,
            curve_peak: self.options.time_curve_peak,
            curve_left_width: self.options.time_curve_left_width,
            curve_right_width: self.options.time_curve_right_width,
        }
    }

    /// Resolves searchmove strings against the root's legal moves. Unknown
    /// moves are dropped; if nothing survives, the restriction is ignored
    /// rather than leaving the search with no root to work on.
    fn resolve_searchmoves(&self, searchmoves: &[String]) -> Vec<Move> {
        if searchmoves.is_empty() {
            return Vec::new();
        }
        let tree = self.tree.read();
        let legal = tree.history().last().legal_moves();
        let mut resolved = Vec::new();
        for wanted in searchmoves {
            match legal.iter().find(|m| &move_to_uci(m) == wanted) {
                Some(m) => resolved.push(m.clone()),
                None => warn!(mv = %wanted, "ignoring searchmove, not legal here"),
            }
        }
        if resolved.is_empty() {
            warn!("searchmoves matched no legal move; searching everything");
        }
        resolved
    }

    fn update_network(&mut self) -> Result<()> {
        let signature = (self.options.backend.clone(), self.options.weights.clone());
        if self.network.is_some() && self.network_signature.as_ref() == Some(&signature) {
            return Ok(());
        }
        let weights_path = if self.options.weights.is_empty() {
            None
        } else {
            Some(Path::new(self.options.weights.as_str()))
        };
        let network = registry::create(&self.options.backend, weights_path)
            .with_context(|| format!("creating evaluator backend '{}'", self.options.backend))?;
        info!(backend = %self.options.backend, "evaluator backend ready");
        self.network = Some(network);
        self.network_signature = Some(signature);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    type Events = Arc<Mutex<Vec<BestMoveInfo>>>;

    fn test_controller() -> (EngineController, Events) {
        registry::init();
        let mut options = EngineOptions::default();
        options.threads = 2;
        options.minibatch_size = 8;
        options.nncache = 1000;
        let bests: Events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&bests);
        let controller = EngineController::new(
            options,
            Arc::new(|_| {}),
            Arc::new(move |best| sink.lock().push(best)),
        );
        (controller, bests)
    }

    fn go_nodes(controller: &mut EngineController, nodes: i64, searchmoves: Vec<String>) {
        controller
            .go(&GoParams {
                nodes: Some(nodes),
                searchmoves,
                ..GoParams::default()
            })
            .unwrap();
        // The node limit stops the search on its own; joining the workers is
        // enough to know the best-move event fired.
        controller.search.as_ref().unwrap().wait();
    }

    #[test]
    fn new_game_clears_cache_and_tree() {
        let (mut controller, bests) = test_controller();
        controller.set_position(None, &[]).unwrap();
        go_nodes(&mut controller, 100, Vec::new());
        assert_eq!(bests.lock().len(), 1);
        assert!(controller.cache.len() > 0);
        {
            let tree = controller.tree.read();
            assert!(tree.get(tree.root()).n > 0);
        }

        controller.new_game().unwrap();
        assert_eq!(controller.cache.len(), 0);
        // A fresh tree means the next search starts from zero visits.
        {
            let tree = controller.tree.read();
            assert_eq!(tree.get(tree.root()).n, 0);
        }

        go_nodes(&mut controller, 100, Vec::new());
        assert_eq!(bests.lock().len(), 2);
    }

    #[test]
    fn searchmoves_restricts_the_root() {
        let (mut controller, bests) = test_controller();
        controller.set_position(None, &[]).unwrap();
        go_nodes(&mut controller, 200, vec!["e2e4".to_string()]);
        assert_eq!(bests.lock()[0].best_move.as_deref(), Some("e2e4"));
    }

    #[test]
    fn position_advances_are_cumulative() {
        let (mut controller, bests) = test_controller();
        controller.set_position(None, &[]).unwrap();
        go_nodes(&mut controller, 50, Vec::new());
        controller
            .set_position(None, &["e2e4".to_string()])
            .unwrap();
        go_nodes(&mut controller, 50, Vec::new());
        assert_eq!(bests.lock().len(), 2);
        assert!(controller.tree.read().history().is_black_to_move());
    }

    #[test]
    fn bad_option_keeps_previous_state() {
        let (mut controller, _) = test_controller();
        assert!(controller.set_option("threads", "0").is_err());
        assert_eq!(controller.options().threads, 2);
        controller.set_option("threads", "4").unwrap();
        assert_eq!(controller.options().threads, 4);
    }

    #[test]
    fn unknown_backend_is_rejected_and_state_kept() {
        let (mut controller, _) = test_controller();
        controller.set_option("backend", "opencl").unwrap();
        assert!(controller.ensure_ready().is_err());
        // Recover by setting a valid backend again.
        controller.set_option("backend", "uniform").unwrap();
        controller.ensure_ready().unwrap();
    }
}
