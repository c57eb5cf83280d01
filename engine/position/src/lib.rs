//! Board-facing support for the search core.
//!
//! The board and move rules themselves come from `shakmaty`; this crate owns
//! the three things the search needs on top of them:
//!
//! - [`History`]: the sequence of positions reached in the current game,
//!   with window hashing and repetition counting
//! - [`policy`]: the fixed 1,858-slot projection of moves into the policy
//!   head of the network
//! - [`encode`]: the input-plane encoding handed to evaluators (opaque to
//!   the search itself)

pub mod encode;
pub mod history;
pub mod policy;

pub use history::{GameResult, History, PositionError, STARTING_FEN};
