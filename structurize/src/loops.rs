use glint_cfg::{FxHashMap, MergeInfo, Node, NodePool, SmallVec, Terminator, format_compact};

use crate::{StructurizeError, driver::Analyses, rewrite};

/// A header with more than one back-edge cannot have a unique continue
/// block. Synthesize one: every back-edge is retargeted at a fresh
/// `fake_continue` node whose only branch is the header, and the header's
/// phis are merged through it.
pub(crate) fn split_multiple_back_edges(
    pool: &mut NodePool,
    analyses: &Analyses,
    _entry: Node,
) -> Result<bool, StructurizeError> {
    let mut dirty = false;
    for h in analyses.dfs.headers() {
        let backs = analyses.dfs.back_edge_preds(pool, h);
        if backs.len() < 2 {
            continue;
        }
        let name = format_compact!("{}.fake_continue", pool[h].name);
        let merged = pool.create_node(name);
        for &latch in backs.iter() {
            pool.retarget_branch(latch, h, merged);
        }
        pool.add_branch(merged, h);
        pool[merged].terminator = Terminator::Branch { target: h };
        let carriers: SmallVec<[(Node, Option<Node>); 4]> =
            backs.iter().map(|&latch| (latch, Some(latch))).collect();
        rewrite::migrate_phi_entries(pool, h, merged, &carriers);
        log::debug!(
            target: "structurize",
            "merged {} back-edges into {} into {}",
            backs.len(),
            pool[h].name,
            pool[merged].name,
        );
        dirty = true;
    }
    Ok(dirty)
}

/// A back-edge whose target does not dominate its source marks an
/// irreducible strongly connected component: the loop has more than one
/// entry. Elect the entry with the smallest forward post-visit rank as the
/// header and peel every other entry off into a duplicate that outside
/// predecessors are rerouted to; the duplicates re-enter the component at
/// the elected header, restoring a single entry.
pub(crate) fn resolve_irreducible_entries(
    pool: &mut NodePool,
    analyses: &Analyses,
    _entry: Node,
) -> Result<bool, StructurizeError> {
    let Some(&(_, target)) = analyses
        .dfs
        .back_edges
        .iter()
        .find(|&&(from, to)| !analyses.domtree.dominates(to, from))
    else {
        return Ok(false);
    };

    let scc: Vec<Node> = pool
        .nodes()
        .filter(|&n| {
            analyses.reach.query_reachability_through_back_edges(target, n)
                && analyses.reach.query_reachability_through_back_edges(n, target)
        })
        .collect();

    let mut entries: SmallVec<[Node; 4]> = scc
        .iter()
        .copied()
        .filter(|&n| pool[n].distinct_preds().iter().any(|p| !scc.contains(p)))
        .collect();
    // Smallest post-visit rank wins; the name is a stable secondary key so
    // the election never depends on allocation order.
    entries.sort_by(|&a, &b| {
        let rank = |n: Node| analyses.dfs.rank(n).unwrap_or(u32::MAX);
        rank(a).cmp(&rank(b)).then_with(|| pool[a].name.cmp(&pool[b].name))
    });
    let Some((&header, rest)) = entries.split_first() else {
        return Ok(false);
    };

    let mut dirty = false;
    for &node in rest {
        let external: SmallVec<[Node; 4]> = pool[node]
            .distinct_preds()
            .into_iter()
            .filter(|p| !scc.contains(p))
            .collect();
        if external.is_empty() {
            continue;
        }
        let name = format_compact!("{}.ladder", pool[node].name);
        let Some(dup) = rewrite::duplicate_node(pool, node, &external, name) else {
            // A self-referential phi pins the node in place; the component
            // cannot be opened up.
            return Err(StructurizeError::IrreducibleRemainder);
        };
        log::debug!(
            target: "structurize",
            "rerouted secondary loop entry {} through duplicate {} (header {})",
            pool[node].name,
            pool[dup].name,
            pool[header].name,
        );
        dirty = true;
    }
    Ok(dirty)
}

/// Classified out-edges of one loop body, per the taxonomy used by merge
/// selection.
#[derive(Default)]
struct LoopExits {
    /// Every edge leaving the body, as `(source, target)`.
    direct: Vec<(Node, Node)>,
    /// Exit targets dominated by the header: exclusive exit paths owned by
    /// the loop.
    dominated: SmallVec<[Node; 4]>,
    /// Dominated exit targets that belong to a nested loop.
    inner_dominated: SmallVec<[Node; 4]>,
    /// Exit targets not dominated by the header; natural merge candidates.
    non_dominated: SmallVec<[Node; 4]>,
    /// Body blocks that jump to the continue block (explicit continues).
    continue_sources: SmallVec<[Node; 4]>,
}

fn classify_exits(
    pool: &NodePool,
    analyses: &Analyses,
    headers: &[Node],
    h: Node,
    cont: Node,
    body: &[Node],
) -> LoopExits {
    let mut exits = LoopExits::default();
    for &b in body {
        for s in pool[b].distinct_succs() {
            if body.contains(&s) {
                if s == cont && b != h {
                    exits.continue_sources.push(b);
                }
                continue;
            }
            exits.direct.push((b, s));
            if analyses.domtree.dominates(h, s) {
                let nested = headers.iter().any(|&h2| {
                    h2 != h
                        && analyses.domtree.strictly_dominates(h, h2)
                        && analyses.domtree.dominates(h2, s)
                });
                if nested {
                    if !exits.inner_dominated.contains(&s) {
                        exits.inner_dominated.push(s);
                    }
                } else if !exits.dominated.contains(&s) {
                    exits.dominated.push(s);
                }
            } else if !exits.non_dominated.contains(&s) {
                exits.non_dominated.push(s);
            }
        }
    }
    exits
}

/// Identify every reducible loop and choose its merge and continue blocks.
///
/// The body is the set of header-dominated nodes that can still reach the
/// continue block along forward edges. The merge is the common
/// post-dominator of the exit targets, computed with the continue block
/// (and any enclosing loop's continue) ignored. A loop with no usable exit
/// gets a synthetic unreachable merge; exits with no common post-dominator
/// are funneled through a dispatch ladder which then becomes the merge.
pub(crate) fn assign_loop_merges(
    pool: &mut NodePool,
    analyses: &Analyses,
    _entry: Node,
) -> Result<bool, StructurizeError> {
    let headers = analyses.dfs.headers();
    // Merge blocks already claimed by some header: another header's choice
    // is not up for grabs, and selecting past it keeps re-runs stable.
    let mut claimed: FxHashMap<Node, Node> = FxHashMap::default();
    for n in pool.nodes() {
        if let Some(m) = pool[n].merge.merge_block() {
            claimed.entry(m).or_insert(n);
        }
    }
    let mut dirty = false;
    for &h in headers.iter() {
        let backs = analyses.dfs.back_edge_preds(pool, h);
        let &[cont] = backs.as_slice() else {
            continue;
        };
        if !analyses.domtree.dominates(h, cont) {
            // Irreducible; left for entry resolution.
            continue;
        }

        let body: Vec<Node> = pool
            .nodes()
            .filter(|&n| {
                analyses.domtree.dominates(h, n) && analyses.reach.query_reachability(n, cont)
            })
            .collect();
        let exits = classify_exits(pool, analyses, &headers, h, cont, &body);
        log::trace!(
            target: "structurize",
            "loop {}: {} exit edges ({} dominated, {} inner, {} non-dominated), {} continues",
            pool[h].name,
            exits.direct.len(),
            exits.dominated.len(),
            exits.inner_dominated.len(),
            exits.non_dominated.len(),
            exits.continue_sources.len(),
        );

        // Exit targets that are some enclosing loop's continue block are
        // transparent for merge selection: leaving into the enclosing latch
        // is a continue of the outer loop, not a reconvergence of this one.
        let mut ignore: SmallVec<[Node; 2]> = headers
            .iter()
            .filter(|&&h2| h2 != h && analyses.domtree.strictly_dominates(h2, h))
            .flat_map(|&h2| analyses.dfs.back_edge_preds(pool, h2))
            .collect();
        ignore.push(cont);

        let mut targets: SmallVec<[Node; 4]> = SmallVec::new();
        for &(_, t) in exits.direct.iter() {
            if !ignore.contains(&t) && !targets.contains(&t) {
                targets.push(t);
            }
        }

        let current = pool[h].merge.clone();
        if targets.is_empty() {
            // Infinite loop (or a loop that only exits into an enclosing
            // latch): the merge is a synthetic unreachable block.
            let reusable = match current {
                MergeInfo::Loop {
                    merge,
                    continue_block,
                } => {
                    continue_block == cont
                        && matches!(pool[merge].terminator, Terminator::Unreachable)
                        && pool[merge].preds.is_empty()
                }
                _ => false,
            };
            if !reusable {
                let name = format_compact!("{}.unreachable", pool[h].name);
                let merge = pool.create_node(name);
                pool[merge].terminator = Terminator::Unreachable;
                pool[h].merge = MergeInfo::Loop {
                    merge,
                    continue_block: cont,
                };
                log::debug!(
                    target: "structurize",
                    "loop {} has no exits; merging at synthetic {}",
                    pool[h].name,
                    pool[merge].name,
                );
                dirty = true;
            }
            continue;
        }

        let mut merge = analyses
            .pdom
            .common_post_dominator_ignoring(targets.iter().copied(), Some(cont));
        // Climb past transparent candidates: enclosing latches, blocks
        // already claimed by another header, and bare exit funnels (whose
        // real convergence point is their successor). A block this header
        // already owns stays put.
        let mut fuel = pool.slot_count();
        while let Some(m) = merge {
            if claimed.get(&m) == Some(&h) {
                break;
            }
            if fuel == 0 {
                break;
            }
            fuel -= 1;
            if ignore.contains(&m) || claimed.contains_key(&m) {
                merge = analyses.pdom.ipdom(m);
            } else if let Some(succ) = exit_funnel_successor(pool, m) {
                merge = Some(succ);
            } else {
                break;
            }
        }
        if let Some(m) = merge {
            if body.contains(&m) {
                merge = None;
            }
        }

        let merge = match merge {
            Some(m) => m,
            None => {
                // Divergent exits: funnel every exit edge through one
                // dispatch block and let it re-branch; the dispatch is the
                // merge, and its re-branch is an ordinary selection.
                let edges: Vec<(Node, Node)> = exits
                    .direct
                    .iter()
                    .copied()
                    .filter(|(_, t)| !ignore.contains(t))
                    .collect();
                let name = format_compact!("{}.fake_merge", pool[h].name);
                let dispatch = rewrite::funnel_through_dispatch(pool, &edges, name);
                pool[h].merge = MergeInfo::Loop {
                    merge: dispatch,
                    continue_block: cont,
                };
                log::debug!(
                    target: "structurize",
                    "loop {} exits diverge; dispatching through {}",
                    pool[h].name,
                    pool[dispatch].name,
                );
                return Ok(true);
            }
        };

        let info = MergeInfo::Loop {
            merge,
            continue_block: cont,
        };
        if pool[h].merge != info {
            pool[h].merge = info;
            dirty = true;
        }
    }
    Ok(dirty)
}

/// An operation-free forwarding block is transparent to merge selection;
/// the construct really converges at its successor.
fn exit_funnel_successor(pool: &NodePool, m: Node) -> Option<Node> {
    if !pool[m].ops.is_empty() || !matches!(pool[m].terminator, Terminator::Branch { .. }) {
        return None;
    }
    match pool[m].distinct_succs().as_slice() {
        &[succ] if succ != m => Some(succ),
        _ => None,
    }
}

/// A transposed loop tests for exit before it continues: the latch carries
/// operations and a conditional whose exit arm comes first. Split it so a
/// bare ladder tail owns the conditional and the back-edge, with the
/// original block reduced to a plain branch into the tail; downstream phis
/// keep referring to the original block through its phi override.
pub(crate) fn rewrite_transposed_loops(
    pool: &mut NodePool,
    analyses: &Analyses,
    _entry: Node,
) -> Result<bool, StructurizeError> {
    for &h in analyses.dfs.headers().iter() {
        let MergeInfo::Loop {
            merge,
            continue_block: cont,
        } = pool[h].merge.clone()
        else {
            continue;
        };
        if cont == h {
            continue;
        }
        let Terminator::Condition { then_dest, .. } = &pool[cont].terminator else {
            continue;
        };
        if *then_dest == h {
            // Canonical order: the continue path comes first.
            continue;
        }
        if pool[cont].is_empty() {
            continue;
        }
        if !pool[cont].succs.contains(&h) {
            continue;
        }

        let name = format_compact!("{}.ladder", pool[cont].name);
        let tail = pool.create_node(name);
        rewrite::move_out_edges(pool, cont, tail);
        pool.add_branch(cont, tail);
        pool[cont].terminator = Terminator::Branch { target: tail };
        pool[cont].phi_override = tail.into();
        pool[h].merge = MergeInfo::Loop {
            merge,
            continue_block: tail,
        };
        log::debug!(
            target: "structurize",
            "transposed loop {}: split latch {} with tail {}",
            pool[h].name,
            pool[cont].name,
            pool[tail].name,
        );
        return Ok(true);
    }
    Ok(false)
}
