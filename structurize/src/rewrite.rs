use glint_cfg::{
    DominatorTree, FxHashSet, Node, NodePool, Phi, PhiOperand, SmallStr, SmallVec, Terminator,
    ValueId, format_compact,
};

use crate::{StructurizeError, driver::Analyses};

/// Rebuild the phi entries of `target` after its predecessors were rerouted
/// through `via`.
///
/// `carriers` describes every predecessor of `via`, in order: the second
/// element names the original predecessor of `target` the route came from,
/// or `None` for routes that never fed `target` (dispatch routes bound for
/// a different exit). Entries owned by the original predecessors migrate
/// into a merged phi on `via` when there is more than one route; with a
/// single route the entry is simply renamed.
pub(crate) fn migrate_phi_entries(
    pool: &mut NodePool,
    target: Node,
    via: Node,
    carriers: &[(Node, Option<Node>)],
) {
    let origs: SmallVec<[Node; 4]> = carriers.iter().filter_map(|&(_, orig)| orig).collect();
    let mut phis = core::mem::take(&mut pool[target].phis);
    for phi in phis.iter_mut() {
        let mut moved: SmallVec<[(Node, PhiOperand); 4]> = SmallVec::new();
        phi.incoming.retain(|&mut (p, operand)| {
            if origs.contains(&p) {
                moved.push((p, operand));
                false
            } else {
                true
            }
        });
        if moved.is_empty() {
            continue;
        }
        if carriers.len() == 1 {
            phi.incoming.push((via, moved[0].1));
        } else {
            let result = pool.alloc_value();
            let incoming = carriers
                .iter()
                .map(|&(carrier, orig)| {
                    let operand = orig
                        .and_then(|o| moved.iter().find(|&&(p, _)| p == o))
                        .map(|&(_, operand)| operand)
                        .unwrap_or(PhiOperand::Undef);
                    (carrier, operand)
                })
                .collect();
            pool[via].phis.push(Phi { result, incoming });
            phi.incoming.push((via, PhiOperand::Value(result)));
        }
    }
    pool[target].phis = phis;
}

/// Funnel every branch from a block dominated by `header` into `target`
/// through a fresh passthrough ladder, which becomes the construct's choke
/// point. Returns `None` when no such branch exists.
pub(crate) fn create_ladder_block(
    pool: &mut NodePool,
    domtree: &DominatorTree,
    header: Node,
    target: Node,
) -> Option<Node> {
    let rerouted: SmallVec<[Node; 4]> = pool[target]
        .distinct_preds()
        .into_iter()
        .filter(|&p| domtree.dominates(header, p))
        .collect();
    if rerouted.is_empty() {
        return None;
    }
    let name = format_compact!("{}.ladder", pool[target].name);
    let ladder = pool.create_node(name);
    for &p in rerouted.iter() {
        pool.retarget_branch(p, target, ladder);
    }
    pool.add_branch(ladder, target);
    pool[ladder].terminator = Terminator::Branch { target };
    let carriers: SmallVec<[(Node, Option<Node>); 4]> =
        rerouted.iter().map(|&p| (p, Some(p))).collect();
    migrate_phi_entries(pool, target, ladder, &carriers);
    log::trace!(
        target: "structurize",
        "funneled {} edges into {} through {}",
        rerouted.len(),
        pool[target].name,
        pool[ladder].name,
    );
    Some(ladder)
}

/// An already-existing choke point in front of `target` for the construct
/// of `header`: the unique `header`-dominated predecessor, when it is an
/// operation-free forwarding block. Recognizing these keeps ladder
/// construction idempotent across re-runs.
pub(crate) fn existing_funnel(
    pool: &NodePool,
    domtree: &DominatorTree,
    header: Node,
    target: Node,
) -> Option<Node> {
    let dominated: SmallVec<[Node; 4]> = pool[target]
        .distinct_preds()
        .into_iter()
        .filter(|&p| domtree.dominates(header, p))
        .collect();
    match dominated.as_slice() {
        &[p]
            if p != header
                && pool[p].ops.is_empty()
                && matches!(pool[p].terminator, Terminator::Branch { .. })
                && pool[p].distinct_succs().as_slice() == [target] =>
        {
            Some(p)
        }
        _ => None,
    }
}

/// Funnel a set of exit edges into a single dispatch block that re-branches
/// to the original targets on a constant selector phi. Used when a loop's
/// exits do not share a post-dominator, and for multi-level breaks: the
/// dispatch becomes the construct's one merge, and the re-branch is an
/// ordinary selection for the next pass to annotate.
pub(crate) fn funnel_through_dispatch(
    pool: &mut NodePool,
    exits: &[(Node, Node)],
    name: SmallStr,
) -> Node {
    debug_assert!(!exits.is_empty());
    let dispatch = pool.create_node(name);

    let mut targets: SmallVec<[Node; 4]> = SmallVec::new();
    let mut sources: SmallVec<[Node; 4]> = SmallVec::new();
    for &(source, target) in exits {
        if !targets.contains(&target) {
            targets.push(target);
        }
        if !sources.contains(&source) {
            sources.push(source);
        }
    }

    // Route every exit edge into the dispatch. A source branching to two
    // distinct exit targets gets one forwarding block per edge, so that the
    // selector phi stays a per-predecessor record.
    let mut routes: SmallVec<[(Node, Node, u32); 4]> = SmallVec::new();
    for &source in sources.iter() {
        let source_targets: SmallVec<[Node; 2]> = targets
            .iter()
            .copied()
            .filter(|&t| exits.contains(&(source, t)))
            .collect();
        if let &[target] = source_targets.as_slice() {
            pool.retarget_branch(source, target, dispatch);
            let index = targets.iter().position(|&t| t == target).unwrap() as u32;
            routes.push((source, source, index));
        } else {
            for target in source_targets {
                let name = format_compact!("{}.ladder", pool[target].name);
                let forward = pool.create_node(name);
                pool.retarget_branch(source, target, forward);
                pool.add_branch(forward, dispatch);
                pool[forward].terminator = Terminator::Branch { target: dispatch };
                let index = targets.iter().position(|&t| t == target).unwrap() as u32;
                routes.push((forward, source, index));
            }
        }
    }

    // The selector constants: for a two-way dispatch the first target is
    // the true arm, so its routes carry 1.
    let two_way = targets.len() == 2;
    let selector = pool.alloc_value();
    let incoming = routes
        .iter()
        .map(|&(carrier, _, index)| {
            let constant = if two_way { (index == 0) as u32 } else { index };
            (carrier, PhiOperand::Const(constant))
        })
        .collect();
    pool[dispatch].phis.push(Phi {
        result: selector,
        incoming,
    });

    for &t in targets.iter() {
        pool.add_branch(dispatch, t);
    }
    pool[dispatch].terminator = match targets.as_slice() {
        &[target] => Terminator::Branch { target },
        &[then_dest, else_dest] => Terminator::Condition {
            cond: selector,
            then_dest,
            else_dest,
        },
        _ => Terminator::Switch {
            selector,
            cases: targets
                .iter()
                .enumerate()
                .map(|(i, &target)| glint_cfg::SwitchCase {
                    value: i as u32,
                    target,
                    is_default: i + 1 == targets.len(),
                })
                .collect(),
        },
    };

    // Per-target phi migration: the dispatch stands in for the original
    // exit sources.
    for (index, &target) in targets.iter().enumerate() {
        let carriers: SmallVec<[(Node, Option<Node>); 4]> = routes
            .iter()
            .map(|&(carrier, source, route_index)| {
                let orig = (route_index == index as u32).then_some(source);
                (carrier, orig)
            })
            .collect();
        migrate_phi_entries(pool, target, dispatch, &carriers);
    }

    dispatch
}

/// Returns true if the phis of `node` may be duplicated: none of them feeds
/// one of its own block's phi results back in as an incoming value.
pub(crate) fn can_duplicate_phis(pool: &NodePool, node: Node) -> bool {
    let results: SmallVec<[ValueId; 2]> = pool[node].phis.iter().map(|phi| phi.result).collect();
    pool[node].phis.iter().all(|phi| {
        phi.incoming.iter().all(|(_, operand)| match operand {
            PhiOperand::Value(v) => !results.contains(v),
            PhiOperand::Const(_) | PhiOperand::Undef => true,
        })
    })
}

/// Clone `node` (operations, terminator, out-edges) into a fresh node and
/// move the given predecessors over to it. Phi entries for the rewired
/// predecessors migrate to the clone, keeping the same result ids: only
/// one of the twins executes on any path, so every downstream use still
/// sees exactly one definition.
///
/// Returns `None` when [can_duplicate_phis] rejects the node.
pub(crate) fn duplicate_node(
    pool: &mut NodePool,
    node: Node,
    rewire: &[Node],
    name: SmallStr,
) -> Option<Node> {
    if !can_duplicate_phis(pool, node) {
        return None;
    }
    let dup = pool.create_node(name);
    let ops = pool[node].ops.clone();
    pool[dup].ops = ops;
    let terminator = pool[node].terminator.clone();
    pool[dup].terminator = terminator;
    for t in pool[node].succs.clone() {
        pool.add_branch(dup, t);
    }

    // Downstream phis see the twin as one more source of the same values.
    for t in pool[node].distinct_succs() {
        for i in 0..pool[t].phis.len() {
            if let Some(operand) = pool[t].phis[i].operand_for(node) {
                pool[t].phis[i].incoming.push((dup, operand));
            }
        }
    }

    let mut node_phis = core::mem::take(&mut pool[node].phis);
    let mut dup_phis = Vec::new();
    for phi in node_phis.iter_mut() {
        let mut moved: SmallVec<[(Node, PhiOperand); 2]> = SmallVec::new();
        phi.incoming.retain(|&mut (p, operand)| {
            if rewire.contains(&p) {
                moved.push((p, operand));
                false
            } else {
                true
            }
        });
        if !moved.is_empty() {
            dup_phis.push(Phi {
                result: phi.result,
                incoming: moved,
            });
        }
    }
    pool[node].phis = node_phis;
    pool[dup].phis = dup_phis;

    for &p in rewire {
        pool.retarget_branch(p, node, dup);
    }
    Some(dup)
}

/// Transfer `from`'s terminator and out-edges onto `to`, leaving `from`
/// with no successors and an unset terminator. Used when a block is split
/// and a tail takes over its branch.
pub(crate) fn move_out_edges(pool: &mut NodePool, from: Node, to: Node) {
    let succs = pool[from].succs.clone();
    let terminator = core::mem::take(&mut pool[from].terminator);
    for s in pool[from].distinct_succs() {
        pool.replace_pred(s, from, to);
    }
    pool[from].succs.clear();
    pool[to].succs = succs;
    pool[to].terminator = terminator;
}

/// Merge operation-free single-predecessor, single-successor forwarding
/// blocks into their successor, unless something structural (an
/// annotation, a phi override, the entry) depends on their identity.
pub(crate) fn eliminate_degenerates(
    pool: &mut NodePool,
    _analyses: &Analyses,
    entry: Node,
) -> Result<bool, StructurizeError> {
    let mut referenced: FxHashSet<Node> = FxHashSet::default();
    referenced.insert(entry);
    for n in pool.nodes() {
        if !pool[n].merge.is_none() {
            referenced.insert(n);
        }
        if let Some(m) = pool[n].merge.merge_block() {
            referenced.insert(m);
        }
        if let Some(c) = pool[n].merge.continue_block() {
            referenced.insert(c);
        }
        if let Some(tail) = pool[n].phi_override.expand() {
            referenced.insert(tail);
        }
    }

    let candidates: Vec<Node> = pool.nodes().collect();
    let mut dirty = false;
    for n in candidates {
        if referenced.contains(&n) {
            continue;
        }
        let data = &pool[n];
        if !data.ops.is_empty() || !data.phis.is_empty() {
            continue;
        }
        if !matches!(data.terminator, Terminator::Branch { .. }) {
            continue;
        }
        let preds = data.distinct_preds();
        let succs = data.distinct_succs();
        let &[p] = preds.as_slice() else {
            continue;
        };
        let &[s] = succs.as_slice() else {
            continue;
        };
        if p == n || s == n {
            continue;
        }
        // Folding the edge must not leave the successor with two values
        // arriving from the same predecessor.
        if pool[s].preds.contains(&p) && !pool[s].phis.is_empty() {
            continue;
        }
        // Forwarders between switch case constructs keep each case
        // single-entry; folding them would re-create the shared entry the
        // switch ladders were built to remove.
        if pool[s]
            .distinct_preds()
            .iter()
            .any(|&q| q != n && matches!(pool[q].terminator, Terminator::Switch { .. }))
        {
            continue;
        }

        pool.retarget_branch(p, n, s);
        for i in 0..pool[s].phis.len() {
            for e in pool[s].phis[i].incoming.iter_mut() {
                if e.0 == n {
                    e.0 = p;
                }
            }
        }
        pool.sever_edge(n, s);
        log::trace!(target: "structurize", "merged degenerate {} into {}", pool[n].name, pool[s].name);
        pool.remove_node(n);
        dirty = true;
    }
    Ok(dirty)
}

/// Enforce that every phi's domain is exactly the owning node's
/// predecessor set, modulo the phi-override substitution on split blocks.
///
/// A predecessor with no entry receives a propagated value when some
/// existing incoming operand's source block still reaches it without
/// re-entering the phi's block; otherwise it receives undef. Entries whose
/// predecessor is gone are dropped with a warning: that is the recovery
/// path for malformed phis, never an error.
pub(crate) fn repair_phis(
    pool: &mut NodePool,
    analyses: &Analyses,
    _entry: Node,
) -> Result<bool, StructurizeError> {
    let nodes: Vec<Node> = pool
        .nodes()
        .filter(|&n| analyses.dfs.is_reachable(n) && !pool[n].phis.is_empty())
        .collect();
    for n in nodes {
        let preds = pool[n].distinct_preds();
        let mut phis = core::mem::take(&mut pool[n].phis);
        for phi in phis.iter_mut() {
            let mut seen: SmallVec<[Node; 4]> = SmallVec::new();
            phi.incoming.retain(|&mut (p, _)| {
                let resolved = pool.resolve_phi_override(p);
                if !preds.contains(&resolved) {
                    log::warn!(
                        target: "structurize",
                        "dropping phi entry for stale predecessor {} on {}",
                        pool[p].name,
                        pool[n].name,
                    );
                    return false;
                }
                if seen.contains(&resolved) {
                    false
                } else {
                    seen.push(resolved);
                    true
                }
            });
            for &q in preds.iter() {
                if seen.contains(&q) {
                    continue;
                }
                let operand = propagated_operand(pool, analyses, phi, q, n);
                phi.incoming.push((q, operand));
                seen.push(q);
            }
        }
        pool[n].phis = phis;
    }
    Ok(false)
}

/// The operand a freshly appeared predecessor `new_pred` of `node` should
/// carry: the first existing incoming operand whose source block reaches
/// `new_pred` without passing through `node` makes forward progress and is
/// propagated; failing that, undef.
fn propagated_operand(
    pool: &NodePool,
    analyses: &Analyses,
    phi: &Phi,
    new_pred: Node,
    node: Node,
) -> PhiOperand {
    for &(p, operand) in phi.incoming.iter() {
        if matches!(operand, PhiOperand::Undef) {
            continue;
        }
        let origin = pool.resolve_phi_override(p);
        if analyses
            .reach
            .exists_path_without_intermediate(pool, origin, new_pred, node)
        {
            return operand;
        }
    }
    log::debug!(
        target: "structurize",
        "no definition reaches {} along {}; using undef",
        pool[node].name,
        pool[new_pred].name,
    );
    PhiOperand::Undef
}
