use cranelift_entity::{SecondaryMap, packed_option::PackedOption};

use crate::{DepthFirstSearch, Node, NodePool};

const UNRANKED: u32 = u32::MAX;

/// Immediate-dominator tree, computed by the iterative Cooper–Harvey–Kennedy
/// algorithm over the reverse post-order of the forward CFG.
///
/// Dominance queries climb the idom chain guided by post-visit ranks, which
/// strictly increase along the chain, so a query costs at most the tree
/// depth and allocates nothing.
pub struct DominatorTree {
    idom: SecondaryMap<Node, PackedOption<Node>>,
    rank: SecondaryMap<Node, u32>,
    entry: Node,
}

impl DominatorTree {
    pub fn compute(pool: &NodePool, dfs: &DepthFirstSearch, entry: Node) -> Self {
        let mut this = Self {
            idom: SecondaryMap::new(),
            rank: SecondaryMap::with_default(UNRANKED),
            entry,
        };
        for &n in dfs.postorder.iter() {
            this.rank[n] = dfs.rank(n).expect("post-order node must be ranked");
        }
        // The entry is its own idom internally; the public accessor hides
        // the self-reference.
        this.idom[entry] = entry.into();

        let mut changed = true;
        while changed {
            changed = false;
            for b in dfs.reverse_postorder() {
                if b == entry {
                    continue;
                }
                let mut new_idom: Option<Node> = None;
                for p in pool[b].distinct_preds() {
                    if this.rank[p] == UNRANKED || this.idom[p].is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => p,
                        Some(cur) => this.intersect(cur, p),
                    });
                }
                if let Some(idom) = new_idom {
                    if this.idom[b].expand() != Some(idom) {
                        this.idom[b] = idom.into();
                        changed = true;
                    }
                }
            }
        }
        this
    }

    fn intersect(&self, mut a: Node, mut b: Node) -> Node {
        while a != b {
            while self.rank[a] < self.rank[b] {
                a = self.idom[a].expand().expect("idom chain must reach the entry");
            }
            while self.rank[b] < self.rank[a] {
                b = self.idom[b].expand().expect("idom chain must reach the entry");
            }
        }
        a
    }

    /// The immediate dominator of `node`, or `None` for the entry and for
    /// unreachable nodes.
    pub fn idom(&self, node: Node) -> Option<Node> {
        if node == self.entry {
            return None;
        }
        self.idom[node].expand()
    }

    /// Reflexive dominance: `a` dominates `b`. Unreachable nodes dominate
    /// nothing and are dominated by nothing.
    pub fn dominates(&self, a: Node, b: Node) -> bool {
        if self.rank[a] == UNRANKED || self.rank[b] == UNRANKED {
            return false;
        }
        let mut b = b;
        while self.rank[b] < self.rank[a] {
            match self.idom[b].expand() {
                Some(next) => b = next,
                None => return false,
            }
        }
        a == b
    }

    pub fn strictly_dominates(&self, a: Node, b: Node) -> bool {
        a != b && self.dominates(a, b)
    }
}

/// Immediate post-dominator tree.
///
/// Computed on the reversed CFG with a virtual exit adopting every node
/// whose terminator leaves the function: `Return`, `Unreachable` and `Kill`
/// all count as exits. The virtual exit is not materialized; a node whose
/// immediate post-dominator is the virtual exit simply reports `None`, and
/// nodes on no path to any exit (infinite loops) carry no rank at all.
pub struct PostDominatorTree {
    ipdom: SecondaryMap<Node, PackedOption<Node>>,
    rank: SecondaryMap<Node, u32>,
    order: Vec<Node>,
}

impl PostDominatorTree {
    pub fn compute(pool: &NodePool) -> Self {
        let mut this = Self {
            ipdom: SecondaryMap::new(),
            rank: SecondaryMap::with_default(UNRANKED),
            order: Vec::with_capacity(pool.len()),
        };

        let roots: Vec<Node> =
            pool.nodes().filter(|&n| pool[n].terminator.is_exit()).collect();
        this.backward_postorder(pool, &roots);

        let mut processed: SecondaryMap<Node, bool> = SecondaryMap::new();
        for &r in roots.iter() {
            processed[r] = true;
        }

        let mut changed = true;
        while changed {
            changed = false;
            // Reverse post-order of the reversed graph: highest backward
            // rank first.
            for i in (0..this.order.len()).rev() {
                let b = this.order[i];
                if pool[b].terminator.is_exit() {
                    continue;
                }
                // Candidates are the successors in the original graph.
                let mut acc: Option<Option<Node>> = None;
                for s in pool[b].distinct_succs() {
                    if this.rank[s] == UNRANKED || !processed[s] {
                        continue;
                    }
                    acc = Some(match acc {
                        None => Some(s),
                        // The virtual exit is an ancestor of everything.
                        Some(None) => None,
                        Some(Some(cur)) => this.intersect(cur, s),
                    });
                }
                if let Some(new_ipdom) = acc {
                    processed[b] = true;
                    if this.ipdom[b].expand() != new_ipdom {
                        this.ipdom[b] = new_ipdom.into();
                        changed = true;
                    }
                }
            }
        }
        this
    }

    /// Multi-root backward DFS over predecessor edges, assigning backward
    /// post-visit ranks. Roots are visited in pool order for determinism.
    fn backward_postorder(&mut self, pool: &NodePool, roots: &[Node]) {
        struct Frame {
            node: Node,
            preds: smallvec::SmallVec<[Node; 2]>,
            next: usize,
        }
        let mut discovered: SecondaryMap<Node, bool> = SecondaryMap::new();
        for &root in roots {
            if discovered[root] {
                continue;
            }
            discovered[root] = true;
            let mut stack = vec![Frame {
                node: root,
                preds: pool[root].distinct_preds(),
                next: 0,
            }];
            while let Some(frame) = stack.last_mut() {
                if frame.next < frame.preds.len() {
                    let pred = frame.preds[frame.next];
                    frame.next += 1;
                    if !discovered[pred] {
                        discovered[pred] = true;
                        stack.push(Frame {
                            node: pred,
                            preds: pool[pred].distinct_preds(),
                            next: 0,
                        });
                    }
                } else {
                    let node = frame.node;
                    stack.pop();
                    self.rank[node] = self.order.len() as u32;
                    self.order.push(node);
                }
            }
        }
    }

    /// Nearest common ancestor in the post-dominator tree; `None` means the
    /// fingers only meet at the virtual exit.
    fn intersect(&self, mut a: Node, mut b: Node) -> Option<Node> {
        while a != b {
            while self.rank[a] < self.rank[b] {
                a = self.ipdom[a].expand()?;
            }
            while self.rank[b] < self.rank[a] {
                b = self.ipdom[b].expand()?;
            }
        }
        Some(a)
    }

    /// The immediate post-dominator of `node`; `None` when it is the
    /// virtual exit or the node cannot reach any exit.
    pub fn ipdom(&self, node: Node) -> Option<Node> {
        self.ipdom[node].expand()
    }

    /// The backward post-visit rank of `node`, if it reaches an exit.
    pub fn rank(&self, node: Node) -> Option<u32> {
        match self.rank[node] {
            UNRANKED => None,
            rank => Some(rank),
        }
    }

    /// Reflexive post-dominance: every path from `b` to an exit passes
    /// through `a`.
    pub fn post_dominates(&self, a: Node, b: Node) -> bool {
        if self.rank[a] == UNRANKED || self.rank[b] == UNRANKED {
            return false;
        }
        let mut b = b;
        while self.rank[b] < self.rank[a] {
            match self.ipdom[b].expand() {
                Some(next) => b = next,
                None => return false,
            }
        }
        a == b
    }

    /// The nearest node post-dominating every node of `nodes`, or `None`
    /// when they only converge at the virtual exit.
    pub fn common_post_dominator(
        &self,
        nodes: impl IntoIterator<Item = Node>,
    ) -> Option<Node> {
        let mut acc: Option<Node> = None;
        for n in nodes {
            if self.rank[n] == UNRANKED {
                return None;
            }
            acc = match acc {
                None => Some(n),
                Some(cur) => self.intersect(cur, n)?.into(),
            };
        }
        acc
    }

    /// [common_post_dominator](Self::common_post_dominator) with one node
    /// treated as transparent: `ignoring` is removed from the candidate set
    /// and skipped over if the fold lands on it. Used to select loop merges
    /// with the continue block ignored.
    pub fn common_post_dominator_ignoring(
        &self,
        nodes: impl IntoIterator<Item = Node>,
        ignoring: Option<Node>,
    ) -> Option<Node> {
        let mut result =
            self.common_post_dominator(nodes.into_iter().filter(|&n| Some(n) != ignoring))?;
        while Some(result) == ignoring {
            result = self.ipdom[result].expand()?;
        }
        Some(result)
    }
}
