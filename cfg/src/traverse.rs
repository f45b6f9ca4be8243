use cranelift_entity::SecondaryMap;
use smallvec::SmallVec;

use crate::{FxHashSet, Node, NodePool};

/// Sentinel rank for nodes never reached by the traversal.
const UNVISITED: u32 = u32::MAX;

/// Result of a forward depth-first traversal from the entry node.
///
/// The traversal is iterative with an explicit stack, so its memory use is
/// linear in the node count regardless of graph depth. Successors are
/// explored in terminator order, which makes post-order ranks (and every
/// tie-break derived from them) deterministic.
pub struct DepthFirstSearch {
    /// Nodes in forward post-order: a node appears after all of the
    /// successors reached through tree edges.
    pub postorder: Vec<Node>,
    /// `u -> v` edges whose target was on the DFS stack when the edge was
    /// traversed, i.e. `v` is an ancestor of `u` in the DFS tree.
    pub back_edges: Vec<(Node, Node)>,
    post_visit_index: SecondaryMap<Node, u32>,
    back_edge_set: FxHashSet<(Node, Node)>,
}

struct Frame {
    node: Node,
    succs: SmallVec<[Node; 2]>,
    next_succ: usize,
}

impl DepthFirstSearch {
    pub fn compute(pool: &NodePool, entry: Node) -> Self {
        let mut post_visit_index = SecondaryMap::with_default(UNVISITED);
        let mut on_stack: SecondaryMap<Node, bool> = SecondaryMap::new();
        let mut discovered: SecondaryMap<Node, bool> = SecondaryMap::new();
        let mut postorder = Vec::with_capacity(pool.len());
        let mut back_edges = Vec::new();
        let mut back_edge_set = FxHashSet::default();

        let mut stack = vec![Frame {
            node: entry,
            succs: pool[entry].succs.clone(),
            next_succ: 0,
        }];
        discovered[entry] = true;
        on_stack[entry] = true;

        while let Some(frame) = stack.last_mut() {
            if frame.next_succ < frame.succs.len() {
                let succ = frame.succs[frame.next_succ];
                let from = frame.node;
                frame.next_succ += 1;
                if on_stack[succ] {
                    if back_edge_set.insert((from, succ)) {
                        back_edges.push((from, succ));
                    }
                } else if !discovered[succ] {
                    discovered[succ] = true;
                    on_stack[succ] = true;
                    stack.push(Frame {
                        node: succ,
                        succs: pool[succ].succs.clone(),
                        next_succ: 0,
                    });
                }
            } else {
                let node = frame.node;
                stack.pop();
                on_stack[node] = false;
                post_visit_index[node] = postorder.len() as u32;
                postorder.push(node);
            }
        }

        Self {
            postorder,
            back_edges,
            post_visit_index,
            back_edge_set,
        }
    }

    /// The forward post-visit rank of `node`, or `None` if it is not
    /// reachable from the entry.
    #[inline]
    pub fn rank(&self, node: Node) -> Option<u32> {
        match self.post_visit_index[node] {
            UNVISITED => None,
            rank => Some(rank),
        }
    }

    #[inline]
    pub fn is_reachable(&self, node: Node) -> bool {
        self.post_visit_index[node] != UNVISITED
    }

    #[inline]
    pub fn is_back_edge(&self, from: Node, to: Node) -> bool {
        self.back_edge_set.contains(&(from, to))
    }

    /// Back-edge predecessors of `node`.
    pub fn back_edge_preds(&self, pool: &NodePool, node: Node) -> SmallVec<[Node; 2]> {
        let mut out = SmallVec::new();
        for &p in pool[node].preds.iter() {
            if self.is_back_edge(p, node) && !out.contains(&p) {
                out.push(p);
            }
        }
        out
    }

    /// Distinct back-edge targets (loop header candidates), ordered by
    /// increasing post-visit rank for deterministic processing.
    pub fn headers(&self) -> SmallVec<[Node; 4]> {
        let mut out: SmallVec<[Node; 4]> = SmallVec::new();
        for &(_, target) in self.back_edges.iter() {
            if !out.contains(&target) {
                out.push(target);
            }
        }
        out.sort_by_key(|&n| self.post_visit_index[n]);
        out
    }

    /// Iterate reachable nodes in reverse post-order.
    pub fn reverse_postorder(&self) -> impl Iterator<Item = Node> + '_ {
        self.postorder.iter().rev().copied()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::Terminator;

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
    fn postorder_of_diamond() {
        let (pool, a, b, c, d) = diamond();
        let dfs = DepthFirstSearch::compute(&pool, a);
        assert_eq!(dfs.postorder, vec![d, b, c, a]);
        assert!(dfs.back_edges.is_empty());
        assert!(dfs.rank(d).unwrap() < dfs.rank(b).unwrap());
        assert!(dfs.rank(a).unwrap() > dfs.rank(c).unwrap());
    }

    #[test]
    fn back_edge_detection() {
        let mut pool = NodePool::new();
        let h = pool.create_node("h");
        let l = pool.create_node("l");
        let e = pool.create_node("e");
        let cond = pool.alloc_value();
        pool.add_branch(h, l);
        pool.add_branch(h, e);
        pool[h].terminator = Terminator::Condition {
            cond,
            then_dest: l,
            else_dest: e,
        };
        pool.add_branch(l, h);
        pool[l].terminator = Terminator::Branch { target: h };
        pool[e].terminator = Terminator::Return { value: None };

        let dfs = DepthFirstSearch::compute(&pool, h);
        assert_eq!(dfs.back_edges, vec![(l, h)]);
        assert!(dfs.is_back_edge(l, h));
        assert!(!dfs.is_back_edge(h, l));
        assert_eq!(dfs.headers().as_slice(), &[h]);
        assert_eq!(dfs.back_edge_preds(&pool, h).as_slice(), &[l]);
    }

    #[test]
    fn unreachable_nodes_have_no_rank() {
        let (mut pool, a, _, _, _) = diamond();
        let orphan = pool.create_node("orphan");
        pool[orphan].terminator = Terminator::Return { value: None };
        let dfs = DepthFirstSearch::compute(&pool, a);
        assert_eq!(dfs.rank(orphan), None);
        assert!(!dfs.is_reachable(orphan));
    }
}
