//! Analyses over a single function.
//!
//! Every analysis is a plain value computed from a `&FunctionData`. None of them
//! observes later edits: a pass that changes the block graph or the instruction
//! lists recomputes what it needs afterwards.

pub mod dominance;
pub mod escape;
pub mod intervals;
pub mod liveness;
pub mod order;

pub use dominance::{DominatorTree, PostDomNode, PostDominatorTree};
pub use escape::{AllocInfo, AllocState, EscapeAnalysis};
pub use intervals::{LiveIntervals, LiveRange};
pub use liveness::LivenessAnalysis;
pub use order::{linear_scan_order, postorder, preorder, reverse_postorder, BlockOrder};
