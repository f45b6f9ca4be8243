use glint_cfg::{FxHashMap, MergeInfo, Node, NodePool, SmallVec, Terminator, format_compact};

use crate::{StructurizeError, driver::Analyses, rewrite};

/// The innermost loop whose body contains `node`.
struct EnclosingLoop {
    header: Node,
    merge: Node,
    continue_block: Node,
}

fn enclosing_loop(
    pool: &NodePool,
    analyses: &Analyses,
    headers: &[Node],
    node: Node,
) -> Option<EnclosingLoop> {
    // Headers are ordered by ascending post-visit rank, innermost first.
    // Membership matches the loop-body rule: dominated by the header and
    // still able to reach the continue block along forward edges.
    headers.iter().find_map(|&h| match &pool[h].merge {
        MergeInfo::Loop {
            merge,
            continue_block,
        } if h != node
            && analyses.domtree.dominates(h, node)
            && analyses.reach.query_reachability(node, *continue_block) =>
        {
            Some(EnclosingLoop {
                header: h,
                merge: *merge,
                continue_block: *continue_block,
            })
        }
        _ => None,
    })
}

/// Assign a selection merge to every conditional or switch block that is
/// not a loop header.
///
/// The natural candidate is the immediate post-dominator, filtered: it must
/// lie inside the enclosing loop's body and must not be (or cross) that
/// loop's merge or continue. A candidate failing the filter means the
/// construct's arms never reconverge locally; its breaking edges are then
/// funneled through a ladder in front of the legal break target, and the
/// ladder is the merge. A candidate the header does not dominate gets the
/// same ladder treatment in front of itself, which restores single-entry.
pub(crate) fn assign_selection_merges(
    pool: &mut NodePool,
    analyses: &Analyses,
    _entry: Node,
) -> Result<bool, StructurizeError> {
    let headers = analyses.dfs.headers();
    let order: Vec<Node> = analyses.dfs.reverse_postorder().collect();
    let mut dirty = false;
    for n in order {
        if !pool[n].terminator.is_conditional() || headers.contains(&n) {
            continue;
        }
        if matches!(pool[n].terminator, Terminator::Switch { .. })
            && create_switch_merge_ladder(pool, analyses, n)?
        {
            return Ok(true);
        }

        let enclosing = enclosing_loop(pool, analyses, &headers, n);
        if let Some(encl) = &enclosing {
            if n == encl.continue_block {
                // The latch's own conditional is the loop's back-edge
                // structure, not a selection.
                continue;
            }
        }

        let natural = analyses.pdom.ipdom(n);
        let decision = match natural {
            None => Decision::Annotate(MergeInfo::Selection {
                merge: None,
                exits_construct: true,
            }),
            Some(m) => match &enclosing {
                Some(encl) => {
                    let legal = m != encl.merge
                        && m != encl.continue_block
                        && analyses.domtree.dominates(n, m)
                        && in_loop_body(analyses, encl, m);
                    if legal {
                        Decision::Annotate(MergeInfo::Selection {
                            merge: Some(m),
                            exits_construct: false,
                        })
                    } else if m != encl.merge
                        && m != encl.continue_block
                        && !analyses.domtree.dominates(n, m)
                        && in_loop_body(analyses, encl, m)
                    {
                        // Reconverges inside the loop, but the join has
                        // entries from outside this construct.
                        Decision::Funnel(m)
                    } else if m == encl.continue_block {
                        Decision::Funnel(encl.continue_block)
                    } else {
                        Decision::Funnel(encl.merge)
                    }
                }
                None => {
                    if analyses.domtree.dominates(n, m) {
                        Decision::Annotate(MergeInfo::Selection {
                            merge: Some(m),
                            exits_construct: false,
                        })
                    } else {
                        Decision::Funnel(m)
                    }
                }
            },
        };

        match decision {
            Decision::Annotate(info) => {
                if pool[n].merge != info {
                    pool[n].merge = info;
                    dirty = true;
                }
            }
            Decision::Funnel(target) => {
                if let Some(funnel) = rewrite::existing_funnel(pool, &analyses.domtree, n, target) {
                    let info = MergeInfo::Selection {
                        merge: Some(funnel),
                        exits_construct: false,
                    };
                    if pool[n].merge != info {
                        pool[n].merge = info;
                        dirty = true;
                    }
                } else if let Some(ladder) =
                    rewrite::create_ladder_block(pool, &analyses.domtree, n, target)
                {
                    pool[n].merge = MergeInfo::Selection {
                        merge: Some(ladder),
                        exits_construct: false,
                    };
                    log::debug!(
                        target: "structurize",
                        "selection {} merges through ladder {}",
                        pool[n].name,
                        pool[ladder].name,
                    );
                    return Ok(true);
                } else {
                    // The construct never branches into the target at all;
                    // it leaves the function or the enclosing construct on
                    // every arm.
                    let info = MergeInfo::Selection {
                        merge: None,
                        exits_construct: true,
                    };
                    if pool[n].merge != info {
                        pool[n].merge = info;
                        dirty = true;
                    }
                }
            }
        }
    }
    Ok(dirty)
}

enum Decision {
    Annotate(MergeInfo),
    Funnel(Node),
}

fn in_loop_body(analyses: &Analyses, encl: &EnclosingLoop, m: Node) -> bool {
    analyses.domtree.dominates(encl.header, m)
        && analyses.reach.query_reachability(m, encl.continue_block)
}

/// Interpose a forwarding block on switch case arms that fall through to
/// another case's target, so every case construct keeps a single entry and
/// the switch a single post-dominating merge. One ladder per invocation;
/// existing forwarding blocks are recognized and left alone.
fn create_switch_merge_ladder(
    pool: &mut NodePool,
    analyses: &Analyses,
    n: Node,
) -> Result<bool, StructurizeError> {
    let case_targets: SmallVec<[Node; 2]> = pool[n].distinct_succs();
    for &t in case_targets.iter() {
        let fallthrough: SmallVec<[Node; 2]> = pool[t]
            .distinct_preds()
            .into_iter()
            .filter(|&u| {
                u != n
                    && case_targets
                        .iter()
                        .any(|&t2| t2 != t && analyses.domtree.dominates(t2, u))
                    && !is_forwarder(pool, u, t)
            })
            .collect();
        if fallthrough.is_empty() {
            continue;
        }
        let name = format_compact!("{}.ladder", pool[t].name);
        let ladder = pool.create_node(name);
        for &u in fallthrough.iter() {
            pool.retarget_branch(u, t, ladder);
        }
        pool.add_branch(ladder, t);
        pool[ladder].terminator = Terminator::Branch { target: t };
        let carriers: SmallVec<[(Node, Option<Node>); 4]> =
            fallthrough.iter().map(|&u| (u, Some(u))).collect();
        rewrite::migrate_phi_entries(pool, t, ladder, &carriers);
        log::debug!(
            target: "structurize",
            "switch {}: case fallthrough into {} now runs through {}",
            pool[n].name,
            pool[t].name,
            pool[ladder].name,
        );
        return Ok(true);
    }
    Ok(false)
}

fn is_forwarder(pool: &NodePool, node: Node, target: Node) -> bool {
    pool[node].is_empty()
        && matches!(pool[node].terminator, Terminator::Branch { .. })
        && pool[node].distinct_succs().as_slice() == [target]
}

/// A block may be the merge target of at most one header, must not double
/// as a continue target, and must not be entered from outside its owning
/// construct except through the header. Violations are repaired one at a
/// time by re-pointing the offending header at a capture ladder carrying
/// exactly its own construct's edges.
pub(crate) fn enforce_unique_merges(
    pool: &mut NodePool,
    analyses: &Analyses,
    _entry: Node,
) -> Result<bool, StructurizeError> {
    let mut merge_claims: FxHashMap<Node, SmallVec<[Node; 2]>> = FxHashMap::default();
    let mut continue_of: FxHashMap<Node, Node> = FxHashMap::default();
    for h in pool.nodes() {
        if let Some(m) = pool[h].merge.merge_block() {
            merge_claims.entry(m).or_default().push(h);
        }
        if let Some(c) = pool[h].merge.continue_block() {
            continue_of.insert(c, h);
        }
    }

    for m in pool.nodes().collect::<Vec<_>>() {
        let Some(claimants) = merge_claims.get(&m) else {
            continue;
        };
        if claimants.len() > 1 {
            // The outermost claimant (one dominating all others) keeps the
            // block; re-point the first of the rest.
            let owner = claimants
                .iter()
                .copied()
                .find(|&h| claimants.iter().all(|&o| h == o || analyses.domtree.dominates(h, o)));
            let loser = claimants
                .iter()
                .copied()
                .find(|&h| Some(h) != owner)
                .expect("more than one claimant");
            log::debug!(
                target: "structurize",
                "{} is claimed as merge by multiple headers; re-pointing {}",
                pool[m].name,
                pool[loser].name,
            );
            repoint_merge(pool, analyses, loser, m);
            return Ok(true);
        }
        if let (Some(&loop_header), Some(&claimant)) = (continue_of.get(&m), claimants.first()) {
            if claimant != loop_header {
                log::debug!(
                    target: "structurize",
                    "{} is both a continue and a merge target; re-pointing {}",
                    pool[m].name,
                    pool[claimant].name,
                );
                repoint_merge(pool, analyses, claimant, m);
                return Ok(true);
            }
        }
    }

    // No edge from outside a construct may enter its merge except through
    // the header.
    for h in pool.nodes().collect::<Vec<_>>() {
        let Some(m) = pool[h].merge.merge_block() else {
            continue;
        };
        if !analyses.dfs.is_reachable(m) {
            continue;
        }
        let preds = pool[m].distinct_preds();
        let outside = preds
            .iter()
            .any(|&p| p != h && !analyses.domtree.dominates(h, p));
        let dominated = preds.iter().any(|&p| analyses.domtree.dominates(h, p));
        if outside && dominated {
            log::debug!(
                target: "structurize",
                "merge {} of {} is entered from outside the construct; capturing",
                pool[m].name,
                pool[h].name,
            );
            repoint_merge(pool, analyses, h, m);
            return Ok(true);
        }
    }
    Ok(false)
}

/// Re-point `header`'s merge annotation away from `merge`, funneling the
/// construct's own edges into a ladder (or an already-present funnel).
fn repoint_merge(pool: &mut NodePool, analyses: &Analyses, header: Node, merge: Node) {
    let new_merge = rewrite::existing_funnel(pool, &analyses.domtree, header, merge)
        .or_else(|| rewrite::create_ladder_block(pool, &analyses.domtree, header, merge));
    match (new_merge, pool[header].merge.clone()) {
        (Some(new), MergeInfo::Loop { continue_block, .. }) => {
            pool[header].merge = MergeInfo::Loop {
                merge: new,
                continue_block,
            };
        }
        (Some(new), MergeInfo::Selection { .. }) => {
            pool[header].merge = MergeInfo::Selection {
                merge: Some(new),
                exits_construct: false,
            };
        }
        (None, MergeInfo::Loop { continue_block, .. }) => {
            // The construct has no edge into the contested merge at all;
            // fall back to a synthetic unreachable target.
            let name = format_compact!("{}.unreachable", pool[header].name);
            let merge = pool.create_node(name);
            pool[merge].terminator = Terminator::Unreachable;
            pool[header].merge = MergeInfo::Loop {
                merge,
                continue_block,
            };
        }
        (None, MergeInfo::Selection { .. }) => {
            pool[header].merge = MergeInfo::Selection {
                merge: None,
                exits_construct: true,
            };
        }
        (_, MergeInfo::None) => {}
    }
}
