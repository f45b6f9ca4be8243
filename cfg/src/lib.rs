//! Control flow graph arena and analyses for the Glint shader compiler.
//!
//! This crate owns the working representation used by control flow
//! restructuring: an index-based pool of basic block nodes ([NodePool]),
//! the per-node data ([NodeData]) including the tagged terminator and phi
//! records, and the read-only analyses computed over the pool (depth-first
//! traversal, dominance, post-dominance, reachability, dominance frontiers).
//!
//! Analyses are produced as side tables keyed by [Node] and are never wired
//! into the nodes themselves; a caller that mutates edges is responsible for
//! discarding any analysis computed before the mutation.

mod dominance;
mod frontier;
mod node;
mod pool;
mod reachability;
mod traverse;

pub use compact_str::{
    CompactString as SmallStr, ToCompactString as ToSmallStr, format_compact,
};
pub use rustc_hash::{FxHashMap, FxHashSet};
pub use smallvec::{SmallVec, smallvec};

pub use self::{
    dominance::{DominatorTree, PostDominatorTree},
    frontier::{DominanceFrontier, PostDominanceFrontier},
    node::{MergeInfo, Node, NodeData, OpId, Phi, PhiOperand, SwitchCase, Terminator, ValueId},
    pool::NodePool,
    reachability::Reachability,
    traverse::DepthFirstSearch,
};
