//! Structured control flow reconstruction for GPU shader IR.
//!
//! The entry point is [structurize]: it imports a host [Function] into a
//! [NodePool](glint_cfg::NodePool), runs a bounded fixed-point pipeline of
//! rewriting passes until every conditional, switch and loop has a unique
//! merge (and, for loops, continue) target, and writes the result back with
//! the merge annotation markers of [BlockOp] injected.
//!
//! The transformation preserves the observable order of opaque host
//! instructions along every terminating path. It does not try to produce a
//! minimal graph and it never optimizes redundant branches; consumers are
//! expected to run their own simplification afterwards.

mod driver;
mod function;
mod loops;
mod rewrite;
mod selection;
mod translate;

use glint_cfg::{Node, NodePool};

pub use self::function::{Block, BlockId, BlockOp, Function};

/// Failure modes of [structurize]. Phi problems are never fatal: a phi
/// entry that cannot be repaired is replaced with an undef placeholder and
/// logged instead.
#[derive(Debug, thiserror::Error)]
pub enum StructurizeError {
    /// A reachable block has a missing (or unknown) terminator. No
    /// recovery; the function cannot be interpreted.
    #[error("block {0:?} has an unsupported or missing terminator")]
    UnsupportedTerminator(BlockId),
    /// The rewrite pipeline failed to reach a fixed point within the pass
    /// budget.
    #[error("control flow failed to stabilize after {0} passes")]
    NonConvergent(usize),
    /// An irreducible strongly connected component survived entry
    /// duplication and the pass budget.
    #[error("irreducible control flow could not be resolved")]
    IrreducibleRemainder,
}

/// Rewrite `function` into structured form in place.
///
/// On success every conditional or switch block is either a loop header
/// carrying a `loop_merge` marker or a selection header carrying a
/// `selection_merge` marker, each with a unique merge target, and every
/// loop has a well-defined continue block. On failure the function is left
/// unspecified and must be discarded by the caller.
pub fn structurize(function: &mut Function) -> Result<(), StructurizeError> {
    let mut pool = NodePool::new();
    structurize_into(function, &mut pool).map(|_| ())
}

/// Like [structurize], but structurizes into a caller-provided pool and
/// returns the entry node, so the caller can inspect the final graph.
/// Callers structurizing functions in parallel must give each function its
/// own pool.
pub fn structurize_into(
    function: &mut Function,
    pool: &mut NodePool,
) -> Result<Node, StructurizeError> {
    let (mut translation, entry) = translate::import(function, pool)?;
    driver::run(pool, entry)?;
    translate::emit(function, pool, entry, &mut translation);
    Ok(entry)
}
