use cranelift_entity::{PrimaryMap, entity_impl, packed_option::PackedOption};
use glint_cfg::{OpId, Phi, SmallStr, Terminator, ValueId};

/// A basic block of the host function.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(u32);
entity_impl!(BlockId, "block");

/// One slot in a block's instruction list: either an opaque host
/// instruction, or one of the structured control flow markers injected at
/// emission.
///
/// Markers are synthetic; a consumer lowering the function materializes
/// them as the target IR's merge annotations. Importing a function strips
/// any markers left over from a previous structurization, which is what
/// makes the whole transformation idempotent.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BlockOp {
    /// An opaque host instruction, passed through untouched. After node
    /// duplication the same [OpId] may appear in more than one block; the
    /// consumer clones the underlying instruction when lowering.
    Op(OpId),
    /// `selection_merge(merge)`, injected at the terminator of a selection
    /// header.
    SelectionMerge(BlockId),
    /// `loop_merge(merge, continue)`, injected at the terminator of a loop
    /// header.
    LoopMerge(BlockId, BlockId),
    /// Marks the first position of a block that is some header's merge
    /// target.
    MergeBlock,
    /// Marks the first position of a block that is some loop's continue
    /// target.
    ContinueBlock,
}

/// A host basic block: opaque instructions, phi records and a terminator
/// over [BlockId] targets.
#[derive(Clone, Debug, Default)]
pub struct Block {
    pub name: SmallStr,
    pub ops: Vec<BlockOp>,
    pub phis: Vec<Phi<BlockId>>,
    pub terminator: Terminator<BlockId>,
}

impl Block {
    /// The selection merge target annotated on this block, if any.
    pub fn selection_merge(&self) -> Option<BlockId> {
        self.ops.iter().find_map(|op| match op {
            BlockOp::SelectionMerge(m) => Some(*m),
            _ => None,
        })
    }

    /// The `(merge, continue)` pair annotated on this block, if any.
    pub fn loop_merge(&self) -> Option<(BlockId, BlockId)> {
        self.ops.iter().find_map(|op| match op {
            BlockOp::LoopMerge(m, c) => Some((*m, *c)),
            _ => None,
        })
    }

    pub fn is_merge_target(&self) -> bool {
        matches!(self.ops.first(), Some(BlockOp::MergeBlock))
    }

    pub fn is_continue_target(&self) -> bool {
        self.ops
            .iter()
            .take(2)
            .any(|op| matches!(op, BlockOp::ContinueBlock))
    }

    /// The opaque host instructions of this block, markers skipped.
    pub fn opaque_ops(&self) -> impl Iterator<Item = OpId> + '_ {
        self.ops.iter().filter_map(|op| match op {
            BlockOp::Op(id) => Some(*id),
            _ => None,
        })
    }
}

/// The host function handle consumed and produced by
/// [structurize](crate::structurize).
///
/// This is a deliberately thin stand-in for the host IR: blocks hold opaque
/// instruction handles, a tagged terminator and phi records, and nothing
/// else. A frontend builds it with [create_block](Function::create_block)
/// and friends; after structurization the same handle carries the rewritten
/// edges plus the merge annotation markers of [BlockOp].
#[derive(Default)]
pub struct Function {
    blocks: PrimaryMap<BlockId, Block>,
    /// Blocks in layout order. Blocks dropped by structurization (input
    /// unreachable from the entry) simply leave the layout; their storage
    /// is retired with the function.
    layout: Vec<BlockId>,
    entry: PackedOption<BlockId>,
    next_value: u32,
    next_op: u32,
}

impl Function {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_block(&mut self, name: impl Into<SmallStr>) -> BlockId {
        let block = self.blocks.push(Block {
            name: name.into(),
            ..Block::default()
        });
        self.layout.push(block);
        block
    }

    pub fn set_entry(&mut self, block: BlockId) {
        self.entry = block.into();
    }

    pub fn entry(&self) -> Option<BlockId> {
        self.entry.expand()
    }

    #[inline]
    pub fn block(&self, block: BlockId) -> &Block {
        &self.blocks[block]
    }

    #[inline]
    pub fn block_mut(&mut self, block: BlockId) -> &mut Block {
        &mut self.blocks[block]
    }

    /// Blocks in layout order.
    pub fn blocks(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.layout.iter().copied()
    }

    pub fn num_blocks(&self) -> usize {
        self.layout.len()
    }

    /// Find a block by name. Synthetic blocks get predictable names, so
    /// this is mostly a convenience for tests and diagnostics.
    pub fn block_by_name(&self, name: &str) -> Option<BlockId> {
        self.blocks().find(|&b| self.blocks[b].name == name)
    }

    /// Mint a fresh opaque value id.
    pub fn alloc_value(&mut self) -> ValueId {
        let v = ValueId::from_u32(self.next_value);
        self.next_value += 1;
        v
    }

    /// Mint a fresh opaque instruction and append it to `block`.
    pub fn add_op(&mut self, block: BlockId) -> OpId {
        let op = OpId::from_u32(self.next_op);
        self.next_op += 1;
        self.blocks[block].ops.push(BlockOp::Op(op));
        op
    }

    pub fn set_terminator(&mut self, block: BlockId, terminator: Terminator<BlockId>) {
        self.blocks[block].terminator = terminator;
    }

    /// Append a phi to `block`, minting its result value.
    pub fn add_phi(
        &mut self,
        block: BlockId,
        incoming: impl IntoIterator<Item = (BlockId, glint_cfg::PhiOperand)>,
    ) -> ValueId {
        let result = self.alloc_value();
        let incoming = incoming.into_iter().collect();
        self.blocks[block].phis.push(Phi { result, incoming });
        result
    }

    pub(crate) fn value_watermark(&self) -> u32 {
        self.next_value
    }

    pub(crate) fn set_value_watermark(&mut self, next: u32) {
        self.next_value = self.next_value.max(next);
    }

    pub(crate) fn set_layout(&mut self, layout: Vec<BlockId>) {
        self.layout = layout;
    }
}
