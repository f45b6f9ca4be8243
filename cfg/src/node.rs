use cranelift_entity::{entity_impl, packed_option::PackedOption};
use smallvec::SmallVec;

use crate::SmallStr;

/// A basic block in the structurizer's working graph.
///
/// Nodes are plain indices into a [NodePool](crate::NodePool); all per-block
/// state lives in the pool's [NodeData] table.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Node(u32);
entity_impl!(Node, "node");

/// An opaque handle to a host IR instruction.
///
/// The structurizer never inspects these; it only preserves their order and
/// block membership while edges are rewritten around them.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpId(u32);
entity_impl!(OpId, "op");

/// An opaque handle to a host IR value.
///
/// Branch conditions, switch selectors, return values and phi operands are
/// all carried as [ValueId]s. Fresh ids can be minted through the pool when
/// a rewrite introduces a new phi.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(u32);
entity_impl!(ValueId, "v");

/// One arm of a `Switch` terminator.
///
/// Generic over the block reference type `T`: the structurizer works with
/// [Node] targets, the host function boundary with its own block ids.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SwitchCase<T = Node> {
    /// The selector value matched by this arm. Ignored when `is_default`.
    pub value: u32,
    pub target: T,
    pub is_default: bool,
}

/// The tagged terminator record of a node.
///
/// This is deliberately a closed sum type rather than an open op hierarchy;
/// every rewrite in the structurizer matches on it exhaustively. It is
/// generic over the block reference type `T` so the same shape serves both
/// the working graph ([Node] targets) and the host IR boundary.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Terminator<T = Node> {
    /// No terminator has been attached yet. Only legal while a block is
    /// under construction; importing a block in this state is fatal.
    #[default]
    None,
    Branch {
        target: T,
    },
    /// Two-way conditional branch. `then_dest` corresponds to `succs[0]`,
    /// `else_dest` to `succs[1]`.
    Condition {
        cond: ValueId,
        then_dest: T,
        else_dest: T,
    },
    Switch {
        selector: ValueId,
        cases: Vec<SwitchCase<T>>,
    },
    Return {
        value: Option<ValueId>,
    },
    Unreachable,
    /// Fragment discard. Terminates the invocation, and is treated as an
    /// exit for post-dominance purposes, like `Return` and `Unreachable`.
    Kill,
}

impl<T: Copy + PartialEq> Terminator<T> {
    /// Branch targets in successor order.
    pub fn targets(&self) -> SmallVec<[T; 2]> {
        match self {
            Self::Branch { target } => smallvec::smallvec![*target],
            Self::Condition {
                then_dest,
                else_dest,
                ..
            } => smallvec::smallvec![*then_dest, *else_dest],
            Self::Switch { cases, .. } => cases.iter().map(|case| case.target).collect(),
            Self::None | Self::Return { .. } | Self::Unreachable | Self::Kill => SmallVec::new(),
        }
    }

    /// Rewrite this terminator's targets through `map`.
    pub fn map_targets<U: Copy + PartialEq>(&self, mut map: impl FnMut(T) -> U) -> Terminator<U> {
        match self {
            Self::None => Terminator::None,
            Self::Branch { target } => Terminator::Branch {
                target: map(*target),
            },
            Self::Condition {
                cond,
                then_dest,
                else_dest,
            } => Terminator::Condition {
                cond: *cond,
                then_dest: map(*then_dest),
                else_dest: map(*else_dest),
            },
            Self::Switch { selector, cases } => Terminator::Switch {
                selector: *selector,
                cases: cases
                    .iter()
                    .map(|case| SwitchCase {
                        value: case.value,
                        target: map(case.target),
                        is_default: case.is_default,
                    })
                    .collect(),
            },
            Self::Return { value } => Terminator::Return { value: *value },
            Self::Unreachable => Terminator::Unreachable,
            Self::Kill => Terminator::Kill,
        }
    }

    /// Replace every occurrence of `old` among the branch targets with `new`.
    pub fn retarget(&mut self, old: T, new: T) {
        match self {
            Self::Branch { target } => {
                if *target == old {
                    *target = new;
                }
            }
            Self::Condition {
                then_dest,
                else_dest,
                ..
            } => {
                if *then_dest == old {
                    *then_dest = new;
                }
                if *else_dest == old {
                    *else_dest = new;
                }
            }
            Self::Switch { cases, .. } => {
                for case in cases.iter_mut() {
                    if case.target == old {
                        case.target = new;
                    }
                }
            }
            Self::None | Self::Return { .. } | Self::Unreachable | Self::Kill => {}
        }
    }

    /// Returns true if this terminator leaves the function (or kills the
    /// invocation) rather than branching to another node.
    pub fn is_exit(&self) -> bool {
        matches!(self, Self::Return { .. } | Self::Unreachable | Self::Kill)
    }

    pub fn is_conditional(&self) -> bool {
        matches!(self, Self::Condition { .. } | Self::Switch { .. })
    }
}

/// An incoming phi operand.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PhiOperand {
    /// A host IR value, or a phi result minted by the structurizer.
    Value(ValueId),
    /// A small integer constant materialized by a dispatch ladder; the
    /// emitting consumer lowers it to a real constant of the selector type.
    Const(u32),
    /// Placeholder for a path along which no definition can reach.
    Undef,
}

/// A phi record: `result = phi [(pred, operand), ...]`.
///
/// After stabilization the set of predecessors named by `incoming` is
/// exactly the set of distinct predecessors of the owning node, modulo
/// `phi_override` substitution on split blocks. Multiplicity of duplicate
/// edges is re-materialized at emission, not tracked here.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Phi<T = Node> {
    pub result: ValueId,
    pub incoming: SmallVec<[(T, PhiOperand); 2]>,
}

impl<T: Copy + PartialEq> Phi<T> {
    /// The operand flowing in from `pred`, if any.
    pub fn operand_for(&self, pred: T) -> Option<PhiOperand> {
        self.incoming
            .iter()
            .find(|(p, _)| *p == pred)
            .map(|(_, operand)| *operand)
    }
}

/// The structured control flow annotation of a node.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum MergeInfo {
    /// Not a structured header.
    #[default]
    None,
    /// A selection (conditional or switch) header.
    Selection {
        /// The unique reconvergence point, when one exists inside the
        /// enclosing construct.
        merge: Option<Node>,
        /// Set when every path from the arms leaves the function or the
        /// enclosing construct; emission synthesizes an unreachable merge
        /// target to carry the annotation.
        exits_construct: bool,
    },
    /// A loop header.
    Loop {
        merge: Node,
        continue_block: Node,
    },
}

impl MergeInfo {
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    pub fn is_loop(&self) -> bool {
        matches!(self, Self::Loop { .. })
    }

    pub fn is_selection(&self) -> bool {
        matches!(self, Self::Selection { .. })
    }

    /// The merge target named by this annotation, if any.
    pub fn merge_block(&self) -> Option<Node> {
        match self {
            Self::None => None,
            Self::Selection { merge, .. } => *merge,
            Self::Loop { merge, .. } => Some(*merge),
        }
    }

    pub fn continue_block(&self) -> Option<Node> {
        match self {
            Self::Loop { continue_block, .. } => Some(*continue_block),
            _ => None,
        }
    }
}

/// Per-block data owned by the [NodePool](crate::NodePool).
#[derive(Clone, Debug, Default)]
pub struct NodeData {
    /// Stable identifier, used for diagnostics and as the final tie-break
    /// where post-order ranks collide.
    pub name: SmallStr,
    /// Predecessors, with one entry per edge instance; a conditional with
    /// both arms pointing here contributes two entries.
    pub preds: SmallVec<[Node; 2]>,
    /// Successors in terminator order: `succs[0]` is the true target of a
    /// conditional, `succs[1]` the false target.
    pub succs: SmallVec<[Node; 2]>,
    /// Opaque host instructions, passed through untouched.
    pub ops: Vec<OpId>,
    pub phis: Vec<Phi>,
    pub terminator: Terminator,
    pub merge: MergeInfo,
    /// Replacement predecessor for downstream phis, installed when this
    /// block is split and a tail block takes over its out-edges. Consulted
    /// by phi-domain checks and resolved transitively at emission; never
    /// eagerly chased during rewriting.
    pub phi_override: PackedOption<Node>,
}

impl NodeData {
    /// Returns true if the node carries no operations and no phis.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty() && self.phis.is_empty()
    }

    /// Distinct predecessors, preserving first-occurrence order.
    pub fn distinct_preds(&self) -> SmallVec<[Node; 2]> {
        let mut out = SmallVec::new();
        for &p in self.preds.iter() {
            if !out.contains(&p) {
                out.push(p);
            }
        }
        out
    }

    /// Distinct successors, preserving first-occurrence order.
    pub fn distinct_succs(&self) -> SmallVec<[Node; 2]> {
        let mut out = SmallVec::new();
        for &s in self.succs.iter() {
            if !out.contains(&s) {
                out.push(s);
            }
        }
        out
    }

    /// Number of edge instances from `pred` to this node.
    pub fn pred_multiplicity(&self, pred: Node) -> usize {
        self.preds.iter().filter(|&&p| p == pred).count()
    }
}
