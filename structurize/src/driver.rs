use glint_cfg::{DepthFirstSearch, DominatorTree, Node, NodePool, PostDominatorTree, Reachability};

use crate::{StructurizeError, loops, rewrite, selection};

/// Upper bound on full pipeline iterations. Every productive pass either
/// annotates a new header or retires a merge conflict, so a well-formed
/// function stabilizes long before this; exhausting the budget means the
/// graph is fighting back and we fail loudly instead of spinning.
pub(crate) const MAX_PASSES: usize = 16;

/// The read-only analysis bundle handed to every stage.
///
/// Recomputed from scratch whenever a stage reports a structural change;
/// stages never see a stale view. This is deliberately explicit rather
/// than reactive: a stage that mutates edges returns a dirty bit, and the
/// driver performs the reset.
pub(crate) struct Analyses {
    pub dfs: DepthFirstSearch,
    pub domtree: DominatorTree,
    pub pdom: PostDominatorTree,
    pub reach: Reachability,
}

impl Analyses {
    pub fn compute(pool: &NodePool, entry: Node) -> Self {
        let dfs = DepthFirstSearch::compute(pool, entry);
        let domtree = DominatorTree::compute(pool, &dfs, entry);
        let pdom = PostDominatorTree::compute(pool);
        let reach = Reachability::compute(pool, &dfs);
        Self {
            dfs,
            domtree,
            pdom,
            reach,
        }
    }
}

type StageFn = fn(&mut NodePool, &Analyses, Node) -> Result<bool, StructurizeError>;

struct Stage {
    name: &'static str,
    run: StageFn,
}

const STAGES: &[Stage] = &[
    Stage {
        name: "split-multiple-back-edges",
        run: loops::split_multiple_back_edges,
    },
    Stage {
        name: "resolve-irreducible-entries",
        run: loops::resolve_irreducible_entries,
    },
    Stage {
        name: "assign-loop-merges",
        run: loops::assign_loop_merges,
    },
    Stage {
        name: "rewrite-transposed-loops",
        run: loops::rewrite_transposed_loops,
    },
    Stage {
        name: "assign-selection-merges",
        run: selection::assign_selection_merges,
    },
    Stage {
        name: "enforce-unique-merges",
        run: selection::enforce_unique_merges,
    },
    Stage {
        name: "eliminate-degenerates",
        run: rewrite::eliminate_degenerates,
    },
    Stage {
        name: "repair-phis",
        run: rewrite::repair_phis,
    },
];

/// Run the pass pipeline to a fixed point.
pub(crate) fn run(pool: &mut NodePool, entry: Node) -> Result<(), StructurizeError> {
    let mut analyses = Analyses::compute(pool, entry);
    for pass in 0..MAX_PASSES {
        let mut changed = false;
        for stage in STAGES {
            let dirty = (stage.run)(pool, &analyses, entry)?;
            if dirty {
                log::debug!(target: "structurize", "pass {pass}: {} changed the graph", stage.name);
                analyses = Analyses::compute(pool, entry);
                changed = true;
            }
        }
        if !changed {
            log::debug!(target: "structurize", "stable after {} passes", pass + 1);
            return Ok(());
        }
    }

    // The budget is gone. Distinguish an unresolved irreducible region
    // from plain non-convergence for the caller's diagnostics.
    let irreducible = analyses
        .dfs
        .back_edges
        .iter()
        .any(|&(from, to)| !analyses.domtree.dominates(to, from));
    if irreducible {
        Err(StructurizeError::IrreducibleRemainder)
    } else {
        Err(StructurizeError::NonConvergent(MAX_PASSES))
    }
}
