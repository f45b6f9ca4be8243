use smallvec::SmallVec;

use crate::{DominatorTree, FxHashMap, Node, NodePool, PostDominatorTree};

/// Dominance frontiers for every block of the graph.
///
/// `DF(n)` is the set of blocks `d` such that `n` dominates a predecessor
/// of `d` but does not strictly dominate `d` itself; the construction walks
/// each join block's predecessors up the idom chain, crediting the join to
/// every block passed on the way. The walk is guarded so graphs that are
/// (still) irreducible cannot send it past the entry.
#[derive(Default)]
pub struct DominanceFrontier {
    dfs: FxHashMap<Node, SmallVec<[Node; 4]>>,
}

impl DominanceFrontier {
    pub fn compute(pool: &NodePool, domtree: &DominatorTree) -> Self {
        let mut this = Self::default();
        for join in pool.nodes() {
            let preds = pool[join].distinct_preds();
            if preds.len() < 2 {
                continue;
            }
            let Some(idom) = domtree.idom(join) else {
                continue;
            };
            for pred in preds {
                let mut runner = pred;
                while runner != idom {
                    let frontier = this.dfs.entry(runner).or_default();
                    if !frontier.contains(&join) {
                        frontier.push(join);
                    }
                    match domtree.idom(runner) {
                        Some(next) => runner = next,
                        None => break,
                    }
                }
            }
        }
        this
    }

    /// The dominance frontier of `node`.
    pub fn frontier(&self, node: Node) -> &[Node] {
        self.dfs.get(&node).map(|f| f.as_slice()).unwrap_or(&[])
    }

    /// The iterated dominance frontier `DF+` of a set of blocks.
    pub fn iterate(&self, nodes: impl IntoIterator<Item = Node>) -> SmallVec<[Node; 4]> {
        let mut idf: SmallVec<[Node; 4]> = SmallVec::new();
        let mut worklist: SmallVec<[Node; 8]> = nodes.into_iter().collect();
        while let Some(n) = worklist.pop() {
            for &d in self.frontier(n) {
                if !idf.contains(&d) {
                    idf.push(d);
                    worklist.push(d);
                }
            }
        }
        idf
    }
}

/// Post-dominance frontiers: the symmetric construction on the reversed
/// CFG. `PDF(n)` is the set of blocks `d` such that `n` post-dominates a
/// successor of `d` but not `d` itself, i.e. the branch points where
/// control last diverges away from `n`.
#[derive(Default)]
pub struct PostDominanceFrontier {
    pdfs: FxHashMap<Node, SmallVec<[Node; 4]>>,
}

impl PostDominanceFrontier {
    pub fn compute(pool: &NodePool, pdom: &PostDominatorTree) -> Self {
        let mut this = Self::default();
        for join in pool.nodes() {
            let succs = pool[join].distinct_succs();
            if succs.len() < 2 {
                continue;
            }
            // `None` stands for the virtual exit, which post-dominates
            // everything; the walk then climbs to the end of the chain.
            let ipdom = pdom.ipdom(join);
            for succ in succs {
                let mut runner = succ;
                loop {
                    if Some(runner) == ipdom {
                        break;
                    }
                    let frontier = this.pdfs.entry(runner).or_default();
                    if !frontier.contains(&join) {
                        frontier.push(join);
                    }
                    match pdom.ipdom(runner) {
                        Some(next) => runner = next,
                        None => break,
                    }
                }
            }
        }
        this
    }

    /// The post-dominance frontier of `node`.
    pub fn frontier(&self, node: Node) -> &[Node] {
        self.pdfs.get(&node).map(|f| f.as_slice()).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{DepthFirstSearch, Terminator};

    /// a -> b | c; b -> d; c -> d; d -> ret
    fn diamond() -> (NodePool, Node, Node, Node, Node) {
        let mut pool = NodePool::new();
        let a = pool.create_node("a");
        let b = pool.create_node("b");
        let c = pool.create_node("c");
        let d = pool.create_node("d");
        let cond = pool.alloc_value();
        pool.add_branch(a, b);
        pool.add_branch(a, c);
        pool[a].terminator = Terminator::Condition {
            cond,
            then_dest: b,
            else_dest: c,
        };
        pool.add_branch(b, d);
        pool[b].terminator = Terminator::Branch { target: d };
        pool.add_branch(c, d);
        pool[c].terminator = Terminator::Branch { target: d };
        pool[d].terminator = Terminator::Return { value: None };
        (pool, a, b, c, d)
    }

    #[test]
    fn diamond_frontiers() {
        let (pool, a, b, c, d) = diamond();
        let dfs = DepthFirstSearch::compute(&pool, a);
        let dom = DominatorTree::compute(&pool, &dfs, a);
        let df = DominanceFrontier::compute(&pool, &dom);

        assert_eq!(df.frontier(b), &[d]);
        assert_eq!(df.frontier(c), &[d]);
        // a strictly dominates d, so d is not in a's frontier.
        assert_eq!(df.frontier(a), &[] as &[Node]);
        assert_eq!(df.iterate([b]).as_slice(), &[d]);
    }

    #[test]
    fn diamond_post_frontiers() {
        let (pool, a, b, c, _d) = diamond();
        let pdom = crate::PostDominatorTree::compute(&pool);
        let pdf = PostDominanceFrontier::compute(&pool, &pdom);

        // Control last diverges away from b (and c) at a.
        assert_eq!(pdf.frontier(b), &[a]);
        assert_eq!(pdf.frontier(c), &[a]);
    }
}
