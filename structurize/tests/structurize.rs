use glint_cfg::{
    DepthFirstSearch, DominatorTree, FxHashMap, MergeInfo, Node, NodePool, PhiOperand, SwitchCase,
    Terminator,
};
use glint_structurize::{BlockId, Function, StructurizeError, structurize, structurize_into};
use pretty_assertions::assert_eq;

fn init() {
    let _ = env_logger::Builder::from_env("GLINT_TRACE")
        .format_timestamp(None)
        .is_test(true)
        .try_init();
}

fn cond(f: &mut Function, b: BlockId, then_dest: BlockId, else_dest: BlockId) {
    let cond = f.alloc_value();
    f.set_terminator(
        b,
        Terminator::Condition {
            cond,
            then_dest,
            else_dest,
        },
    );
}

fn branch(f: &mut Function, b: BlockId, target: BlockId) {
    f.set_terminator(b, Terminator::Branch { target });
}

fn ret(f: &mut Function, b: BlockId) {
    f.set_terminator(b, Terminator::Return { value: None });
}

/// Structurize and verify the universal properties on the final graph:
/// at most one back-edge predecessor per node, every back-edge target is an
/// annotated loop header, merge targets are claimed by exactly one header
/// which dominates them, loop constructs only escape to legal targets, and
/// every phi's domain matches its block's predecessors.
fn structurize_checked(f: &mut Function) -> (NodePool, Node) {
    init();
    let mut pool = NodePool::new();
    let entry = structurize_into(f, &mut pool).expect("structurization should succeed");
    assert_properties(&pool, entry);
    (pool, entry)
}

fn assert_properties(pool: &NodePool, entry: Node) {
    let dfs = DepthFirstSearch::compute(pool, entry);
    let dom = DominatorTree::compute(pool, &dfs, entry);

    let loops: Vec<(Node, Node, Node)> = pool
        .nodes()
        .filter_map(|n| match &pool[n].merge {
            MergeInfo::Loop {
                merge,
                continue_block,
            } => Some((n, *merge, *continue_block)),
            _ => None,
        })
        .collect();

    // No node has more than one back-edge predecessor, and every back-edge
    // target carries a loop annotation.
    pool.for_each_node(|n, data| {
        if !dfs.is_reachable(n) {
            return;
        }
        let backs = dfs.back_edge_preds(pool, n);
        assert!(
            backs.len() <= 1,
            "{} has {} back-edge predecessors",
            data.name,
            backs.len()
        );
        if !backs.is_empty() {
            assert!(
                data.merge.is_loop(),
                "back-edge target {} is not annotated as a loop",
                data.name
            );
        }
    });

    // Each block is the merge target of at most one header.
    let mut claimed: FxHashMap<Node, Node> = FxHashMap::default();
    for n in pool.nodes() {
        if let Some(m) = pool[n].merge.merge_block() {
            if let Some(prev) = claimed.insert(m, n) {
                panic!(
                    "{} is the merge target of both {} and {}",
                    pool[m].name, pool[prev].name, pool[n].name
                );
            }
        }
    }

    // Every edge leaving a loop construct lands on the loop's merge or
    // continue, or on a legal target of a strictly enclosing loop.
    for &(h, m, c) in loops.iter() {
        if !dfs.is_reachable(h) {
            continue;
        }
        let construct: Vec<Node> = pool
            .nodes()
            .filter(|&x| dfs.is_reachable(x) && dom.dominates(h, x) && !dom.dominates(m, x))
            .collect();
        for &x in construct.iter() {
            for s in pool[x].distinct_succs() {
                if construct.contains(&s) {
                    continue;
                }
                let legal = s == m
                    || s == c
                    || loops.iter().any(|&(h2, m2, c2)| {
                        h2 != h
                            && dom.dominates(h2, h)
                            && (s == m2 || s == c2 || (s == h2 && x == c2))
                    });
                assert!(
                    legal,
                    "edge {} -> {} escapes the construct of loop {}",
                    pool[x].name, pool[s].name, pool[h].name
                );
            }
        }
    }

    // Selection headers dominate their (reachable) merge targets.
    for n in pool.nodes() {
        if let MergeInfo::Selection { merge: Some(m), .. } = &pool[n].merge {
            if dfs.is_reachable(*m) {
                assert!(
                    dom.dominates(n, *m),
                    "selection {} does not dominate its merge {}",
                    pool[n].name,
                    pool[*m].name
                );
            }
        }
    }

    // Phi domains equal predecessor sets, modulo override substitution.
    for n in pool.nodes().filter(|&n| dfs.is_reachable(n)) {
        let mut expected: Vec<Node> = pool[n].distinct_preds().into_iter().collect();
        expected.sort();
        for phi in pool[n].phis.iter() {
            let mut resolved: Vec<Node> = phi
                .incoming
                .iter()
                .map(|&(p, _)| pool.resolve_phi_override(p))
                .collect();
            resolved.sort();
            resolved.dedup();
            assert_eq!(
                resolved, expected,
                "phi domain mismatch on {}",
                pool[n].name
            );
        }
    }
}

fn marker_snapshot(f: &Function) -> Vec<(String, Option<String>, Option<(String, String)>)> {
    f.blocks()
        .map(|b| {
            let block = f.block(b);
            (
                block.name.to_string(),
                block
                    .selection_merge()
                    .map(|m| f.block(m).name.to_string()),
                block.loop_merge().map(|(m, c)| {
                    (f.block(m).name.to_string(), f.block(c).name.to_string())
                }),
            )
        })
        .collect()
}

/// A conditional whose arms reconverge immediately: the header is annotated
/// with the join as its selection merge and nothing else changes.
#[test]
fn diamond_selection() {
    let mut f = Function::new();
    let a = f.create_block("a");
    let b = f.create_block("b");
    let c = f.create_block("c");
    let d = f.create_block("d");
    f.set_entry(a);
    let v1 = f.alloc_value();
    let v2 = f.alloc_value();
    f.add_op(b);
    f.add_op(c);
    f.add_op(d);
    cond(&mut f, a, b, c);
    branch(&mut f, b, d);
    branch(&mut f, c, d);
    ret(&mut f, d);
    f.add_phi(d, [(b, PhiOperand::Value(v1)), (c, PhiOperand::Value(v2))]);

    structurize_checked(&mut f);

    assert_eq!(f.num_blocks(), 4, "no blocks should be inserted");
    assert_eq!(f.block(a).selection_merge(), Some(d));
    assert_eq!(f.block(a).loop_merge(), None);
    assert!(f.block(d).is_merge_target());
    assert_eq!(f.block(d).phis[0].incoming.len(), 2);
}

/// A loop with an early exit: the loop merges at the exit target, and the
/// breaking conditional gets a ladder funneling its break edge into it.
#[test]
fn early_exit_loop() {
    let mut f = Function::new();
    let start = f.create_block("start");
    let h = f.create_block("h");
    let q = f.create_block("q");
    let r = f.create_block("r");
    let l = f.create_block("l");
    let e = f.create_block("e");
    f.set_entry(start);
    f.add_op(q);
    f.add_op(r);
    f.add_op(l);
    branch(&mut f, start, h);
    branch(&mut f, h, q);
    cond(&mut f, q, r, l);
    cond(&mut f, r, e, l);
    branch(&mut f, l, h);
    ret(&mut f, e);

    structurize_checked(&mut f);

    assert_eq!(f.block(h).loop_merge(), Some((e, l)));
    assert!(f.block(e).is_merge_target());
    assert!(f.block(l).is_continue_target());

    // The break runs through a synthesized ladder in front of the merge.
    let ladder = f.block_by_name("e.ladder").expect("break ladder expected");
    assert_eq!(f.block(r).selection_merge(), Some(ladder));
    assert_eq!(
        f.block(ladder).terminator,
        Terminator::Branch { target: e }
    );
    assert_eq!(f.block(r).terminator.targets()[0], ladder);
    // The body conditional reconverges at the breaking conditional.
    assert_eq!(f.block(q).selection_merge(), Some(r));
}

/// Two mutually-branching blocks entered separately: one entry is elected
/// header by post-visit rank and the other entry edge is rerouted through
/// a duplicated ladder block, leaving a reducible single-entry loop.
#[test]
fn irreducible_two_header() {
    let mut f = Function::new();
    let a = f.create_block("a");
    let b = f.create_block("b");
    let c = f.create_block("c");
    f.set_entry(a);
    f.add_op(b);
    f.add_op(c);
    cond(&mut f, a, b, c);
    branch(&mut f, b, c);
    branch(&mut f, c, b);

    let (pool, entry) = structurize_checked(&mut f);

    let ladder = f
        .block_by_name("b.ladder")
        .expect("secondary entry should be duplicated");
    assert_eq!(f.block(a).terminator.targets()[0], ladder);
    assert_eq!(f.block(ladder).terminator, Terminator::Branch { target: c });

    // c (the lower post-visit rank) is the loop header; the loop never
    // terminates, so its merge is a synthetic unreachable block.
    let merge = f.block_by_name("c.unreachable").expect("synthetic merge");
    assert_eq!(f.block(c).loop_merge(), Some((merge, b)));
    assert_eq!(f.block(merge).terminator, Terminator::Unreachable);

    // The entry conditional never reconverges.
    let sel_merge = f.block_by_name("a.unreachable").expect("selection merge");
    assert_eq!(f.block(a).selection_merge(), Some(sel_merge));

    // The final graph is reducible.
    let dfs = DepthFirstSearch::compute(&pool, entry);
    let dom = DominatorTree::compute(&pool, &dfs, entry);
    for &(from, to) in dfs.back_edges.iter() {
        assert!(dom.dominates(to, from));
    }
}

/// A self-loop never exits: it gets a synthetic unreachable merge and its
/// own header as continue.
#[test]
fn infinite_loop() {
    let mut f = Function::new();
    let e = f.create_block("e");
    let h = f.create_block("h");
    f.set_entry(e);
    f.add_op(h);
    branch(&mut f, e, h);
    branch(&mut f, h, h);

    structurize_checked(&mut f);

    let merge = f.block_by_name("h.unreachable").expect("synthetic merge");
    assert_eq!(f.block(h).loop_merge(), Some((merge, h)));
    assert!(f.block(h).is_continue_target());
    assert!(f.block(merge).is_merge_target());
    assert_eq!(f.block(merge).terminator, Terminator::Unreachable);
}

/// Two back-edges into one header are merged through a synthetic continue
/// block, and the header's phi is split across it.
#[test]
fn multi_back_edge() {
    let mut f = Function::new();
    let e = f.create_block("e");
    let h = f.create_block("h");
    let l1 = f.create_block("l1");
    let l2 = f.create_block("l2");
    f.set_entry(e);
    let v0 = f.alloc_value();
    let v1 = f.alloc_value();
    let v2 = f.alloc_value();
    f.add_op(l1);
    f.add_op(l2);
    branch(&mut f, e, h);
    cond(&mut f, h, l1, l2);
    branch(&mut f, l1, h);
    branch(&mut f, l2, h);
    f.add_phi(
        h,
        [
            (e, PhiOperand::Value(v0)),
            (l1, PhiOperand::Value(v1)),
            (l2, PhiOperand::Value(v2)),
        ],
    );

    structurize_checked(&mut f);

    let fc = f.block_by_name("h.fake_continue").expect("merged continue");
    assert_eq!(f.block(l1).terminator, Terminator::Branch { target: fc });
    assert_eq!(f.block(l2).terminator, Terminator::Branch { target: fc });
    assert_eq!(f.block(fc).terminator, Terminator::Branch { target: h });
    assert!(f.block(fc).is_continue_target());

    let (merge, cont) = f.block(h).loop_merge().expect("loop annotation");
    assert_eq!(cont, fc);
    assert_eq!(f.block(merge).terminator, Terminator::Unreachable);

    // The back-edge values are merged by a phi on the new continue.
    let fc_phi = &f.block(fc).phis[0];
    assert_eq!(
        fc_phi.incoming.as_slice(),
        &[(l1, PhiOperand::Value(v1)), (l2, PhiOperand::Value(v2))]
    );
    let h_phi = &f.block(h).phis[0];
    assert!(h_phi.incoming.contains(&(e, PhiOperand::Value(v0))));
    assert!(
        h_phi
            .incoming
            .contains(&(fc, PhiOperand::Value(fc_phi.result)))
    );

    // The header's internal conditional is hoisted into a fake selection
    // with an unreachable merge of its own.
    let fs = f.block_by_name("h.fake_selection").expect("fake selection");
    assert_eq!(f.block(h).terminator, Terminator::Branch { target: fs });
    assert!(f.block(fs).terminator.is_conditional());
    let fs_merge = f.block_by_name("h.fake_selection.unreachable").unwrap();
    assert_eq!(f.block(fs).selection_merge(), Some(fs_merge));
}

/// A switch whose arms all branch straight to one block needs no ladder:
/// the join is the selection merge, and the deduplicated phi is expanded
/// back to one entry per edge at emission.
#[test]
fn switch_with_common_merge() {
    let mut f = Function::new();
    let s = f.create_block("s");
    let m = f.create_block("m");
    f.set_entry(s);
    let v = f.alloc_value();
    let selector = f.alloc_value();
    f.set_terminator(
        s,
        Terminator::Switch {
            selector,
            cases: vec![
                SwitchCase {
                    value: 0,
                    target: m,
                    is_default: false,
                },
                SwitchCase {
                    value: 1,
                    target: m,
                    is_default: false,
                },
                SwitchCase {
                    value: 2,
                    target: m,
                    is_default: false,
                },
                SwitchCase {
                    value: 0,
                    target: m,
                    is_default: true,
                },
            ],
        },
    );
    ret(&mut f, m);
    f.add_phi(
        m,
        [
            (s, PhiOperand::Value(v)),
            (s, PhiOperand::Value(v)),
            (s, PhiOperand::Value(v)),
            (s, PhiOperand::Value(v)),
        ],
    );

    structurize_checked(&mut f);

    assert_eq!(f.num_blocks(), 2, "no ladder should be inserted");
    assert_eq!(f.block(s).selection_merge(), Some(m));
    assert!(f.block(m).is_merge_target());
    // One phi entry per edge instance.
    assert_eq!(f.block(m).phis[0].incoming.len(), 4);
}

/// A case arm falling through into another case target gets a forwarding
/// ladder so every case construct keeps a single entry point.
#[test]
fn switch_fallthrough_ladder() {
    let mut f = Function::new();
    let s = f.create_block("s");
    let b1 = f.create_block("b1");
    let b2 = f.create_block("b2");
    let m = f.create_block("m");
    f.set_entry(s);
    f.add_op(b1);
    f.add_op(b2);
    let selector = f.alloc_value();
    f.set_terminator(
        s,
        Terminator::Switch {
            selector,
            cases: vec![
                SwitchCase {
                    value: 0,
                    target: b1,
                    is_default: false,
                },
                SwitchCase {
                    value: 1,
                    target: b2,
                    is_default: false,
                },
                SwitchCase {
                    value: 0,
                    target: m,
                    is_default: true,
                },
            ],
        },
    );
    branch(&mut f, b1, b2);
    branch(&mut f, b2, m);
    ret(&mut f, m);

    structurize_checked(&mut f);

    let ladder = f.block_by_name("b2.ladder").expect("fallthrough ladder");
    assert_eq!(f.block(b1).terminator, Terminator::Branch { target: ladder });
    assert_eq!(
        f.block(ladder).terminator,
        Terminator::Branch { target: b2 }
    );
    assert_eq!(f.block(s).selection_merge(), Some(m));
}

/// Nested loops where the inner latch breaks straight to the outer merge:
/// the contested join stays with the outer loop and the inner loop gets a
/// capture ladder as its own merge.
#[test]
fn nested_loop_with_inner_break() {
    let mut f = Function::new();
    let e = f.create_block("e");
    let h1 = f.create_block("h1");
    let h2 = f.create_block("h2");
    let b = f.create_block("b");
    let xi = f.create_block("xi");
    let x = f.create_block("x");
    f.set_entry(e);
    f.add_op(b);
    f.add_op(xi);
    branch(&mut f, e, h1);
    cond(&mut f, h1, h2, x);
    cond(&mut f, h2, b, xi);
    cond(&mut f, b, h2, x);
    branch(&mut f, xi, h1);
    ret(&mut f, x);

    structurize_checked(&mut f);

    assert_eq!(f.block(h1).loop_merge(), Some((x, xi)));
    let ladder = f.block_by_name("x.ladder").expect("inner capture ladder");
    assert_eq!(f.block(h2).loop_merge(), Some((ladder, b)));
    assert_eq!(f.block(ladder).terminator, Terminator::Branch { target: x });
    // The inner latch's break now runs through the ladder.
    assert_eq!(f.block(b).terminator.targets()[1], ladder);
}

/// A latch that tests for exit before it continues is split: the ladder
/// tail takes the conditional and the back-edge, and downstream phis are
/// redirected through the override map.
#[test]
fn transposed_do_while() {
    let mut f = Function::new();
    let e = f.create_block("e");
    let h = f.create_block("h");
    let c = f.create_block("c");
    let x = f.create_block("x");
    f.set_entry(e);
    let v = f.alloc_value();
    f.add_op(c);
    branch(&mut f, e, h);
    branch(&mut f, h, c);
    cond(&mut f, c, x, h);
    ret(&mut f, x);
    f.add_phi(x, [(c, PhiOperand::Value(v))]);

    structurize_checked(&mut f);

    let tail = f.block_by_name("c.ladder").expect("latch tail");
    assert_eq!(f.block(c).terminator, Terminator::Branch { target: tail });
    assert!(f.block(tail).terminator.is_conditional());
    assert_eq!(f.block(h).loop_merge(), Some((x, tail)));
    assert!(f.block(tail).is_continue_target());
    // The latch conditional is loop structure, not a selection.
    assert_eq!(f.block(tail).selection_merge(), None);
    // The phi now names the tail as its predecessor.
    assert_eq!(
        f.block(x).phis[0].incoming.as_slice(),
        &[(tail, PhiOperand::Value(v))]
    );
}

/// A loop whose exits never reconverge is funneled through a dispatch
/// block carrying a constant selector phi; the dispatch becomes the merge
/// and re-branches to the original targets.
#[test]
fn divergent_exits_dispatch() {
    let mut f = Function::new();
    let e = f.create_block("e");
    let h = f.create_block("h");
    let body = f.create_block("body");
    let l = f.create_block("l");
    let exit1 = f.create_block("exit1");
    let exit2 = f.create_block("exit2");
    f.set_entry(e);
    f.add_op(body);
    f.add_op(l);
    f.add_op(exit1);
    f.add_op(exit2);
    branch(&mut f, e, h);
    cond(&mut f, h, body, exit1);
    cond(&mut f, body, l, exit2);
    branch(&mut f, l, h);
    ret(&mut f, exit1);
    f.set_terminator(exit2, Terminator::Kill);

    structurize_checked(&mut f);

    let dispatch = f.block_by_name("h.fake_merge").expect("dispatch merge");
    let (merge, cont) = f.block(h).loop_merge().expect("loop annotation");
    assert_eq!(merge, dispatch);
    assert_eq!(cont, l);
    assert!(f.block(dispatch).terminator.is_conditional());

    // The selector phi carries one constant per route.
    let phi = &f.block(dispatch).phis[0];
    assert!(phi.incoming.contains(&(h, PhiOperand::Const(1))));
    assert_eq!(phi.incoming.len(), 2);
    // The dispatch still reaches both original exits.
    let targets = f.block(dispatch).terminator.targets();
    assert!(targets.contains(&exit1));
    assert!(targets.contains(&exit2));
}

/// Chained conditionals sharing one join: the join belongs to the
/// outermost conditional, and the inner one merges through a capture
/// ladder that carries the join's phi traffic for its construct.
#[test]
fn shared_join_gets_capture_ladder() {
    let mut f = Function::new();
    let a = f.create_block("a");
    let b = f.create_block("b");
    let c = f.create_block("c");
    let d = f.create_block("d");
    f.set_entry(a);
    let va = f.alloc_value();
    let vb = f.alloc_value();
    let vc = f.alloc_value();
    f.add_op(c);
    cond(&mut f, a, b, d);
    cond(&mut f, b, c, d);
    branch(&mut f, c, d);
    ret(&mut f, d);
    f.add_phi(
        d,
        [
            (a, PhiOperand::Value(va)),
            (b, PhiOperand::Value(vb)),
            (c, PhiOperand::Value(vc)),
        ],
    );

    structurize_checked(&mut f);

    let ladder = f.block_by_name("d.ladder").expect("capture ladder");
    assert_eq!(f.block(a).selection_merge(), Some(d));
    assert_eq!(f.block(b).selection_merge(), Some(ladder));
    assert_eq!(f.block(c).terminator, Terminator::Branch { target: ladder });

    // d's phi now merges the construct's values through the ladder.
    let d_phi = &f.block(d).phis[0];
    assert_eq!(d_phi.incoming.len(), 2);
    assert!(d_phi.incoming.contains(&(a, PhiOperand::Value(va))));
    let ladder_phi = &f.block(ladder).phis[0];
    assert_eq!(
        ladder_phi.incoming.as_slice(),
        &[(b, PhiOperand::Value(vb)), (c, PhiOperand::Value(vc))]
    );
    assert!(
        d_phi
            .incoming
            .contains(&(ladder, PhiOperand::Value(ladder_phi.result)))
    );
}

/// A branch into the function entry hides the loop it forms; a fresh entry
/// is synthesized so the back-edge is detectable.
#[test]
fn entry_self_loop_gets_new_entry() {
    let mut f = Function::new();
    let h = f.create_block("h");
    f.set_entry(h);
    f.add_op(h);
    branch(&mut f, h, h);

    structurize_checked(&mut f);

    let new_entry = f.block_by_name("h.new_entry").expect("fresh entry");
    assert_eq!(f.entry(), Some(new_entry));
    assert_eq!(f.block(new_entry).terminator, Terminator::Branch { target: h });
    let merge = f.block_by_name("h.unreachable").unwrap();
    assert_eq!(f.block(h).loop_merge(), Some((merge, h)));
}

/// Structurizing an already-structured function changes nothing but
/// (at most) the identity of re-synthesized unreachable merge blocks.
#[test]
fn structurization_is_idempotent() {
    init();
    for build in [
        build_early_exit_loop,
        build_diamond,
        build_self_loop,
    ] {
        let mut f = build();
        structurize(&mut f).expect("first run");
        let first = marker_snapshot(&f);
        let blocks = f.num_blocks();
        structurize(&mut f).expect("second run");
        assert_eq!(marker_snapshot(&f), first);
        assert_eq!(f.num_blocks(), blocks);
    }
}

fn build_early_exit_loop() -> Function {
    let mut f = Function::new();
    let start = f.create_block("start");
    let h = f.create_block("h");
    let q = f.create_block("q");
    let r = f.create_block("r");
    let l = f.create_block("l");
    let e = f.create_block("e");
    f.set_entry(start);
    f.add_op(q);
    f.add_op(r);
    f.add_op(l);
    branch(&mut f, start, h);
    branch(&mut f, h, q);
    cond(&mut f, q, r, l);
    cond(&mut f, r, e, l);
    branch(&mut f, l, h);
    ret(&mut f, e);
    f
}

fn build_diamond() -> Function {
    let mut f = Function::new();
    let a = f.create_block("a");
    let b = f.create_block("b");
    let c = f.create_block("c");
    let d = f.create_block("d");
    f.set_entry(a);
    f.add_op(b);
    f.add_op(c);
    cond(&mut f, a, b, c);
    branch(&mut f, b, d);
    branch(&mut f, c, d);
    ret(&mut f, d);
    f
}

fn build_self_loop() -> Function {
    let mut f = Function::new();
    let e = f.create_block("e");
    let h = f.create_block("h");
    f.set_entry(e);
    f.add_op(h);
    branch(&mut f, e, h);
    branch(&mut f, h, h);
    f
}

/// Input blocks the entry cannot reach are dropped without complaint.
#[test]
fn unreachable_input_is_pruned() {
    let mut f = Function::new();
    let a = f.create_block("a");
    let orphan = f.create_block("orphan");
    f.set_entry(a);
    ret(&mut f, a);
    f.add_op(orphan);
    ret(&mut f, orphan);

    structurize_checked(&mut f);

    assert_eq!(f.num_blocks(), 1);
    assert_eq!(f.block_by_name("orphan"), None);
}

/// A phi entry naming a block that is not a predecessor is dropped at
/// import; structurization still succeeds.
#[test]
fn malformed_phi_entry_is_dropped() {
    let mut f = Function::new();
    let a = f.create_block("a");
    let b = f.create_block("b");
    let c = f.create_block("c");
    let d = f.create_block("d");
    f.set_entry(a);
    let v1 = f.alloc_value();
    let v2 = f.alloc_value();
    let bogus = f.alloc_value();
    f.add_op(b);
    f.add_op(c);
    cond(&mut f, a, b, c);
    branch(&mut f, b, d);
    branch(&mut f, c, d);
    ret(&mut f, d);
    f.add_phi(
        d,
        [
            (b, PhiOperand::Value(v1)),
            (c, PhiOperand::Value(v2)),
            // `a` is not a predecessor of `d`.
            (a, PhiOperand::Value(bogus)),
        ],
    );

    structurize_checked(&mut f);

    let phi = &f.block(d).phis[0];
    assert_eq!(phi.incoming.len(), 2);
    assert!(!phi.incoming.iter().any(|&(p, _)| p == a));
}

/// A reachable block with no terminator is fatal.
#[test]
fn missing_terminator_is_fatal() {
    init();
    let mut f = Function::new();
    let a = f.create_block("a");
    let b = f.create_block("b");
    f.set_entry(a);
    branch(&mut f, a, b);
    // b never gets a terminator.

    match structurize(&mut f) {
        Err(StructurizeError::UnsupportedTerminator(block)) => assert_eq!(block, b),
        other => panic!("expected UnsupportedTerminator, got {other:?}"),
    }
}

/// An irreducible component whose secondary entry carries a
/// self-referential phi cannot be opened by duplication.
#[test]
fn self_referential_phi_blocks_irreducible_rewrite() {
    init();
    let mut f = Function::new();
    let a = f.create_block("a");
    let b = f.create_block("b");
    let c = f.create_block("c");
    f.set_entry(a);
    f.add_op(c);
    cond(&mut f, a, b, c);
    branch(&mut f, b, c);
    branch(&mut f, c, b);
    // The phi on b feeds its own result back around the cycle.
    let other = f.alloc_value();
    let result = f.add_phi(b, [(c, PhiOperand::Value(other))]);
    f.block_mut(b).phis[0]
        .incoming
        .push((a, PhiOperand::Value(result)));

    match structurize(&mut f) {
        Err(StructurizeError::IrreducibleRemainder) => {}
        other => panic!("expected IrreducibleRemainder, got {other:?}"),
    }
}
