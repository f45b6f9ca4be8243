use bitvec::prelude::*;
use cranelift_entity::SecondaryMap;
use smallvec::SmallVec;

use crate::{DepthFirstSearch, Node, NodePool};

const UNRANKED: u32 = u32::MAX;

/// Dense reachability over the nodes discovered by a forward DFS.
///
/// Two bit matrices of dimension `N x ceil(N/64)` are kept: one computed
/// with DFS back-edges excluded (a single post-order union pass suffices,
/// since every non-back successor is finished before its predecessor), and
/// one with back-edges included, where the union is iterated to a fixed
/// point to close over cycles. Rows are indexed by forward post-visit rank.
///
/// Reachability is reflexive in both variants: a node reaches itself by the
/// empty path.
pub struct Reachability {
    rank: SecondaryMap<Node, u32>,
    without_back_edges: Vec<BitVec>,
    through_back_edges: Vec<BitVec>,
}

impl Reachability {
    pub fn compute(pool: &NodePool, dfs: &DepthFirstSearch) -> Self {
        let n = dfs.postorder.len();
        let mut rank = SecondaryMap::with_default(UNRANKED);
        for &node in dfs.postorder.iter() {
            rank[node] = dfs.rank(node).expect("post-order node must be ranked");
        }

        // Post-order guarantees every non-back successor's row is final
        // before its predecessors are processed.
        let mut without_back_edges: Vec<BitVec> = Vec::with_capacity(n);
        for (i, &node) in dfs.postorder.iter().enumerate() {
            let mut row = bitvec![0; n];
            row.set(i, true);
            for s in pool[node].distinct_succs() {
                if dfs.is_back_edge(node, s) || rank[s] == UNRANKED {
                    continue;
                }
                let src = &without_back_edges[rank[s] as usize];
                for bit in src.iter_ones() {
                    row.set(bit, true);
                }
            }
            without_back_edges.push(row);
        }

        let mut through_back_edges = without_back_edges.clone();
        let mut sweeps = 0usize;
        let mut changed = true;
        while changed {
            changed = false;
            sweeps += 1;
            for (i, &node) in dfs.postorder.iter().enumerate() {
                for s in pool[node].distinct_succs() {
                    if rank[s] == UNRANKED || rank[s] as usize == i {
                        continue;
                    }
                    let src = through_back_edges[rank[s] as usize].clone();
                    let dst = &mut through_back_edges[i];
                    let before = dst.count_ones();
                    for bit in src.iter_ones() {
                        dst.set(bit, true);
                    }
                    changed |= dst.count_ones() != before;
                }
            }
        }

        log::trace!(
            target: "reachability",
            "closed reachability over {n} nodes in {sweeps} sweeps",
        );

        Self {
            rank,
            without_back_edges,
            through_back_edges,
        }
    }

    /// Can `from` reach `to` along forward (non-back) edges?
    pub fn query_reachability(&self, from: Node, to: Node) -> bool {
        let (a, b) = (self.rank[from], self.rank[to]);
        if a == UNRANKED || b == UNRANKED {
            return false;
        }
        self.without_back_edges[a as usize][b as usize]
    }

    /// Can `from` reach `to` when back-edges participate as well?
    pub fn query_reachability_through_back_edges(&self, from: Node, to: Node) -> bool {
        let (a, b) = (self.rank[from], self.rank[to]);
        if a == UNRANKED || b == UNRANKED {
            return false;
        }
        self.through_back_edges[a as usize][b as usize]
    }

    /// Is there a path from `start` to `end` in the graph with `stop`
    /// deleted? All edges (including back-edges) participate. Removing a
    /// vertex removes the trivial path to itself, so any query touching
    /// `stop` as an endpoint is false.
    pub fn exists_path_without_intermediate(
        &self,
        pool: &NodePool,
        start: Node,
        end: Node,
        stop: Node,
    ) -> bool {
        self.path_avoiding(pool, start, end, &[stop])
    }

    /// `a` reaches `b`, and `b` reaches `c` without passing back through
    /// `a`.
    pub fn is_ordered(&self, pool: &NodePool, a: Node, b: Node, c: Node) -> bool {
        self.query_reachability(a, b) && self.path_avoiding(pool, b, c, &[a])
    }

    /// Worklist reachability with a set of deleted vertices.
    pub fn path_avoiding(&self, pool: &NodePool, start: Node, end: Node, stops: &[Node]) -> bool {
        if stops.contains(&start) || stops.contains(&end) {
            return false;
        }
        if start == end {
            return true;
        }
        let mut seen: SecondaryMap<Node, bool> = SecondaryMap::new();
        seen[start] = true;
        let mut worklist: SmallVec<[Node; 8]> = SmallVec::new();
        worklist.push(start);
        while let Some(n) = worklist.pop() {
            for s in pool[n].distinct_succs() {
                if s == end {
                    return true;
                }
                if !seen[s] && !stops.contains(&s) {
                    seen[s] = true;
                    worklist.push(s);
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Terminator;

    /// entry -> h; h -> body | exit; body -> h (back edge)
    fn simple_loop() -> (NodePool, Node, Node, Node, Node) {
        let mut pool = NodePool::new();
        let entry = pool.create_node("entry");
        let h = pool.create_node("h");
        let body = pool.create_node("body");
        let exit = pool.create_node("exit");
        let cond = pool.alloc_value();
        pool.add_branch(entry, h);
        pool[entry].terminator = Terminator::Branch { target: h };
        pool.add_branch(h, body);
        pool.add_branch(h, exit);
        pool[h].terminator = Terminator::Condition {
            cond,
            then_dest: body,
            else_dest: exit,
        };
        pool.add_branch(body, h);
        pool[body].terminator = Terminator::Branch { target: h };
        pool[exit].terminator = Terminator::Return { value: None };
        (pool, entry, h, body, exit)
    }

    #[test]
    fn back_edges_are_excluded_and_included() {
        let (pool, entry, h, body, exit) = simple_loop();
        let dfs = DepthFirstSearch::compute(&pool, entry);
        let reach = Reachability::compute(&pool, &dfs);

        assert!(reach.query_reachability(entry, exit));
        assert!(reach.query_reachability(h, body));
        // The only path from body back to h is the back-edge.
        assert!(!reach.query_reachability(body, h));
        assert!(reach.query_reachability_through_back_edges(body, h));
        assert!(reach.query_reachability_through_back_edges(body, exit));
        // Reflexivity.
        assert!(reach.query_reachability(body, body));
    }

    #[test]
    fn path_queries_respect_removed_nodes() {
        let (pool, entry, h, body, exit) = simple_loop();
        let dfs = DepthFirstSearch::compute(&pool, entry);
        let reach = Reachability::compute(&pool, &dfs);

        assert!(reach.exists_path_without_intermediate(&pool, entry, exit, body));
        assert!(!reach.exists_path_without_intermediate(&pool, entry, exit, h));
        assert!(!reach.exists_path_without_intermediate(&pool, body, exit, h));
        assert!(reach.is_ordered(&pool, entry, h, exit));
        // body -> exit only passes through h, so ordering via h fails.
        assert!(!reach.is_ordered(&pool, h, body, exit));
    }

    #[test]
    fn self_loop_reaches_itself_through_back_edges() {
        let mut pool = NodePool::new();
        let entry = pool.create_node("entry");
        let h = pool.create_node("h");
        pool.add_branch(entry, h);
        pool[entry].terminator = Terminator::Branch { target: h };
        pool.add_branch(h, h);
        pool[h].terminator = Terminator::Branch { target: h };

        let dfs = DepthFirstSearch::compute(&pool, entry);
        let reach = Reachability::compute(&pool, &dfs);
        assert!(reach.query_reachability_through_back_edges(h, h));
        assert!(reach.query_reachability(h, h));
    }
}
