use cranelift_entity::{SecondaryMap, packed_option::PackedOption};
use glint_cfg::{
    DepthFirstSearch, FxHashSet, MergeInfo, Node, NodePool, Phi, SmallVec, Terminator,
    format_compact,
};

use crate::{BlockId, BlockOp, Function, StructurizeError, rewrite};

/// Bidirectional mapping between host blocks and pool nodes. Nodes minted
/// during structurization get their host block lazily at emission.
pub(crate) struct Translation {
    node_of: SecondaryMap<BlockId, PackedOption<Node>>,
    block_of: SecondaryMap<Node, PackedOption<BlockId>>,
}

impl Translation {
    fn new() -> Self {
        Self {
            node_of: SecondaryMap::new(),
            block_of: SecondaryMap::new(),
        }
    }

    fn bind(&mut self, block: BlockId, node: Node) {
        self.node_of[block] = node.into();
        self.block_of[node] = block.into();
    }
}

/// Import the host function into the pool: one node per reachable block,
/// terminators translated 1:1, phi incoming lists deduplicated. Blocks the
/// entry cannot reach are silently left behind; markers from a previous
/// structurization are stripped. A reachable block without a terminator is
/// fatal.
pub(crate) fn import(
    func: &Function,
    pool: &mut NodePool,
) -> Result<(Translation, Node), StructurizeError> {
    let entry_block = func.entry().expect("function has no entry block");

    let mut reachable: SecondaryMap<BlockId, bool> = SecondaryMap::new();
    let mut worklist: Vec<BlockId> = vec![entry_block];
    reachable[entry_block] = true;
    while let Some(b) = worklist.pop() {
        let terminator = &func.block(b).terminator;
        if matches!(terminator, Terminator::None) {
            return Err(StructurizeError::UnsupportedTerminator(b));
        }
        for t in terminator.targets() {
            if !reachable[t] {
                reachable[t] = true;
                worklist.push(t);
            }
        }
    }

    let mut translation = Translation::new();
    for b in func.blocks() {
        if !reachable[b] {
            continue;
        }
        let block = func.block(b);
        let node = pool.create_node(block.name.clone());
        pool[node].ops = block.opaque_ops().collect();
        translation.bind(b, node);
    }

    // Edges first, then phis, so that predecessor membership is checkable.
    for b in func.blocks() {
        if !reachable[b] {
            continue;
        }
        let node = translation.node_of[b].unwrap();
        let terminator = func.block(b).terminator.map_targets(|t| {
            translation.node_of[t].expect("edge target must be reachable")
        });
        for t in terminator.targets() {
            pool.add_branch(node, t);
        }
        pool[node].terminator = terminator;
    }

    for b in func.blocks() {
        if !reachable[b] {
            continue;
        }
        let node = translation.node_of[b].unwrap();
        for phi in func.block(b).phis.iter() {
            let mut incoming: SmallVec<[(Node, glint_cfg::PhiOperand); 2]> = SmallVec::new();
            let mut seen: SmallVec<[Node; 4]> = SmallVec::new();
            for &(p, operand) in phi.incoming.iter() {
                let Some(pn) = (if reachable[p] {
                    translation.node_of[p].expand()
                } else {
                    None
                }) else {
                    log::warn!(
                        target: "structurize",
                        "phi on {:?} names unreachable predecessor {:?}; entry dropped",
                        func.block(b).name,
                        func.block(p).name,
                    );
                    continue;
                };
                if !pool[node].preds.contains(&pn) {
                    log::warn!(
                        target: "structurize",
                        "phi on {:?} names non-predecessor {:?}; entry dropped",
                        func.block(b).name,
                        func.block(p).name,
                    );
                    continue;
                }
                // Only the first occurrence of a duplicate edge is kept;
                // multiplicity is re-materialized at emission.
                if seen.contains(&pn) {
                    continue;
                }
                seen.push(pn);
                incoming.push((pn, operand));
            }
            pool[node].phis.push(Phi {
                result: phi.result,
                incoming,
            });
        }
    }

    // A branch into the entry block would hide the loop it forms; give the
    // function a fresh entry so the back-edge is detectable.
    let mut entry_node = translation.node_of[entry_block].unwrap();
    if !pool[entry_node].preds.is_empty() {
        let name = format_compact!("{}.new_entry", pool[entry_node].name);
        let new_entry = pool.create_node(name);
        pool.add_branch(new_entry, entry_node);
        pool[new_entry].terminator = Terminator::Branch { target: entry_node };
        entry_node = new_entry;
    }

    pool.set_value_watermark(func.value_watermark());
    Ok((translation, entry_node))
}

/// Write the structured pool back into the host function: merge markers at
/// headers and their targets, rewritten terminators, phi incoming lists
/// resolved through the override map and re-expanded to edge multiplicity.
pub(crate) fn emit(
    func: &mut Function,
    pool: &mut NodePool,
    entry: Node,
    translation: &mut Translation,
) {
    prune_unreachable(pool, entry);
    synthesize_unreachable_selection_merges(pool);
    wrap_header_conditionals(pool);
    interpose_fake_continues(pool);

    let live: Vec<Node> = pool.nodes().collect();
    for &n in live.iter() {
        if translation.block_of[n].is_none() {
            let b = func.create_block(pool[n].name.clone());
            translation.bind(b, n);
        }
    }

    let mut merge_targets: FxHashSet<Node> = FxHashSet::default();
    let mut continue_targets: FxHashSet<Node> = FxHashSet::default();
    for &n in live.iter() {
        if let Some(m) = pool[n].merge.merge_block() {
            merge_targets.insert(m);
        }
        if let Some(c) = pool[n].merge.continue_block() {
            continue_targets.insert(c);
        }
    }

    let mut layout = Vec::with_capacity(live.len());
    for &n in live.iter() {
        let b = translation.block_of[n].unwrap();
        layout.push(b);

        let mut ops: Vec<BlockOp> = Vec::with_capacity(pool[n].ops.len() + 2);
        if merge_targets.contains(&n) {
            ops.push(BlockOp::MergeBlock);
        }
        if continue_targets.contains(&n) {
            ops.push(BlockOp::ContinueBlock);
        }
        ops.extend(pool[n].ops.iter().map(|&op| BlockOp::Op(op)));
        match &pool[n].merge {
            MergeInfo::Selection { merge: Some(m), .. } => {
                ops.push(BlockOp::SelectionMerge(translation.block_of[*m].unwrap()));
            }
            MergeInfo::Loop {
                merge,
                continue_block,
            } => {
                ops.push(BlockOp::LoopMerge(
                    translation.block_of[*merge].unwrap(),
                    translation.block_of[*continue_block].unwrap(),
                ));
            }
            _ => {}
        }

        let terminator = pool[n]
            .terminator
            .map_targets(|t| translation.block_of[t].unwrap());

        let mut phis: Vec<Phi<BlockId>> = Vec::with_capacity(pool[n].phis.len());
        for phi in pool[n].phis.iter() {
            let mut incoming: SmallVec<[(BlockId, glint_cfg::PhiOperand); 2]> = SmallVec::new();
            for &(p, operand) in phi.incoming.iter() {
                let resolved = pool.resolve_phi_override(p);
                let multiplicity = pool[n].pred_multiplicity(resolved);
                if multiplicity == 0 {
                    log::warn!(
                        target: "structurize",
                        "load-bearing phi entry on {} references removed predecessor {}",
                        pool[n].name,
                        pool[resolved].name,
                    );
                    continue;
                }
                let pb = translation.block_of[resolved].unwrap();
                for _ in 0..multiplicity {
                    incoming.push((pb, operand));
                }
            }
            phis.push(Phi {
                result: phi.result,
                incoming,
            });
        }

        let block = func.block_mut(b);
        block.name = pool[n].name.clone();
        block.ops = ops;
        block.terminator = terminator;
        block.phis = phis;
    }

    func.set_layout(layout);
    func.set_entry(translation.block_of[entry].unwrap());
    func.set_value_watermark(pool.value_watermark());
}

/// Destroy nodes unreachable from the entry unless a live annotation still
/// references them, and drop predecessor records (and their phi entries)
/// that point at pruned nodes.
fn prune_unreachable(pool: &mut NodePool, entry: Node) {
    let dfs = DepthFirstSearch::compute(pool, entry);
    let mut referenced: FxHashSet<Node> = FxHashSet::default();
    for n in pool.nodes() {
        if !dfs.is_reachable(n) {
            continue;
        }
        if let Some(m) = pool[n].merge.merge_block() {
            referenced.insert(m);
        }
        if let Some(c) = pool[n].merge.continue_block() {
            referenced.insert(c);
        }
    }

    let doomed: Vec<Node> = pool
        .nodes()
        .filter(|&n| !dfs.is_reachable(n) && !referenced.contains(&n))
        .collect();
    for n in doomed {
        pool.isolate(n);
        pool.remove_node(n);
    }

    // Dead-predecessor pruning on the survivors.
    let live: Vec<Node> = pool.nodes().filter(|&n| dfs.is_reachable(n)).collect();
    for n in live {
        let stale: SmallVec<[Node; 2]> = pool[n]
            .distinct_preds()
            .into_iter()
            .filter(|&p| !pool.is_live(p) || !dfs.is_reachable(p))
            .collect();
        for p in stale {
            if pool.is_live(p) {
                pool.sever_edge(p, n);
            } else {
                pool[n].preds.retain(|&mut q| q != p);
            }
            for i in 0..pool[n].phis.len() {
                pool[n].phis[i].incoming.retain(|&mut (q, _)| q != p);
            }
        }
    }
}

/// A selection that never reconverges still needs a merge operand; give it
/// a synthetic unreachable target.
fn synthesize_unreachable_selection_merges(pool: &mut NodePool) {
    let candidates: Vec<Node> = pool
        .nodes()
        .filter(|&n| {
            matches!(
                pool[n].merge,
                MergeInfo::Selection {
                    merge: None,
                    exits_construct: true,
                }
            )
        })
        .collect();
    for n in candidates {
        let name = format_compact!("{}.unreachable", pool[n].name);
        let merge = pool.create_node(name);
        pool[merge].terminator = Terminator::Unreachable;
        pool[n].merge = MergeInfo::Selection {
            merge: Some(merge),
            exits_construct: true,
        };
    }
}

/// A loop header whose conditional branches to two targets that are
/// neither its merge nor its continue cannot carry both a loop merge and a
/// selection merge. Hoist the conditional into a `fake_selection` helper
/// the header branches to unconditionally; the helper gets a synthetic
/// unreachable selection merge of its own.
fn wrap_header_conditionals(pool: &mut NodePool) {
    let headers: Vec<Node> = pool
        .nodes()
        .filter(|&n| pool[n].merge.is_loop() && pool[n].terminator.is_conditional())
        .collect();
    for h in headers {
        let MergeInfo::Loop {
            merge,
            continue_block,
        } = pool[h].merge.clone()
        else {
            continue;
        };
        let structural = [merge, continue_block, h];
        if pool[h]
            .terminator
            .targets()
            .iter()
            .any(|t| structural.contains(t))
        {
            continue;
        }

        let name = format_compact!("{}.fake_selection", pool[h].name);
        let selection = pool.create_node(name);
        rewrite::move_out_edges(pool, h, selection);
        pool.add_branch(h, selection);
        pool[h].terminator = Terminator::Branch { target: selection };
        pool[h].phi_override = selection.into();

        let merge_name = format_compact!("{}.unreachable", pool[selection].name);
        let fake_merge = pool.create_node(merge_name);
        pool[fake_merge].terminator = Terminator::Unreachable;
        pool[selection].merge = MergeInfo::Selection {
            merge: Some(fake_merge),
            exits_construct: false,
        };
        log::debug!(
            target: "structurize",
            "wrapped loop header conditional {} in {}",
            pool[h].name,
            pool[selection].name,
        );
    }
}

/// A continue target that simultaneously serves as some header's merge
/// target gets a passthrough `fake_continue` interposed on the back-edge.
fn interpose_fake_continues(pool: &mut NodePool) {
    let mut merge_targets: FxHashSet<Node> = FxHashSet::default();
    for n in pool.nodes() {
        if let Some(m) = pool[n].merge.merge_block() {
            merge_targets.insert(m);
        }
    }
    let headers: Vec<Node> = pool.nodes().filter(|&n| pool[n].merge.is_loop()).collect();
    for h in headers {
        let MergeInfo::Loop {
            merge,
            continue_block,
        } = pool[h].merge.clone()
        else {
            continue;
        };
        if continue_block == h || !merge_targets.contains(&continue_block) {
            continue;
        }
        let name = format_compact!("{}.fake_continue", pool[h].name);
        let fake = pool.create_node(name);
        pool.retarget_branch(continue_block, h, fake);
        pool.add_branch(fake, h);
        pool[fake].terminator = Terminator::Branch { target: h };
        rewrite::migrate_phi_entries(pool, h, fake, &[(continue_block, Some(continue_block))]);
        pool[h].merge = MergeInfo::Loop {
            merge,
            continue_block: fake,
        };
        log::debug!(
            target: "structurize",
            "continue {} doubles as a merge target; interposed {}",
            pool[continue_block].name,
            pool[fake].name,
        );
    }
}
