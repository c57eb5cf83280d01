//! Concurrent PUCT tree search.
//!
//! One [`Search`] drives worker threads over a shared [`NodeTree`], batching
//! leaf positions through `cinder-eval` and reporting progress through
//! callback events. The tree outlives searches so statistics survive when
//! the game advances along an explored line.

pub mod node;
pub mod params;
pub mod report;
pub mod search;
pub mod tree;

mod worker;

pub use node::{Node, NodeId};
pub use params::{Limits, Params};
pub use report::{q_to_centipawns, BestMoveCallback, BestMoveInfo, InfoCallback, ThinkingInfo};
pub use search::Search;
pub use tree::NodeTree;
