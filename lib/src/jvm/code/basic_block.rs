use crate::jvm::code::{BranchInstruction, SerializableInstruction, SynLabel};
use crate::jvm::verifier::VerifierFrame;
use crate::util::{Offset, OffsetVec, Width};
use std::collections::HashMap;
use std::hash::Hash;

/// Basic block as it is stored in [`super::Code`]
///
/// The frame is `None` until it is either read from the method's stack map table or inferred.
pub type CodeBlock = BasicBlock<
    Option<VerifierFrame>,
    SerializableInstruction,
    BranchInstruction<SynLabel, SynLabel, SynLabel>,
>;

/// A JVM method code body is made up of a linear sequence of basic blocks.
///
/// We also store some extra information that ultimately allows us to compute things like: the
/// maximum height of the locals, the maximum height of the stack, and the stack map frames.
#[derive(Debug, Eq, PartialEq, Clone)]
pub struct BasicBlock<Frame, Insn, BrInsn> {
    /// Frame at the start of the block
    pub frame: Frame,

    /// Straight-line instructions in the block
    pub instructions: OffsetVec<Insn>,

    /// Branch instruction to close the block
    pub branch_end: BrInsn,
}

impl<Frame, Insn: Width, BrInsn: Width> Width for BasicBlock<Frame, Insn, BrInsn> {
    fn width(&self) -> usize {
        self.instructions.offset_len().0 + self.branch_end.width()
    }
}

impl<Frame, Insn: Width, BrInsn: Width> BasicBlock<Frame, Insn, BrInsn> {
    /// Given an expected order of blocks, compute the offset of every basic block with respect to
    /// that start of the method.
    pub fn compute_block_offsets<Lbl: Copy + Eq + Hash>(
        block_layout_order: &[Lbl],
        blocks: &HashMap<Lbl, BasicBlock<Frame, Insn, BrInsn>>,
    ) -> HashMap<Lbl, Offset> {
        let mut block_offsets: HashMap<Lbl, Offset> = HashMap::new();
        let mut offset = Offset(0);
        for block_lbl in block_layout_order {
            block_offsets.insert(*block_lbl, offset);
            offset.0 += blocks[block_lbl].width();
        }
        block_offsets
    }
}

impl<Frame> BasicBlock<Frame, SerializableInstruction, BranchInstruction<SynLabel, SynLabel, SynLabel>> {
    /// Ensure the branch instruction has the right padding, given the offset of the block
    ///
    /// Switch operands must start at a multiple of four bytes from the start of the method, so
    /// moving a block can change the width of its terminator.
    pub fn align_branch(&mut self, offset_from_start: Offset) {
        let branch_off = offset_from_start.0 + self.instructions.offset_len().0 + 1;
        let padding = match (branch_off % 4) as u8 {
            0 => 0,
            x => 4 - x,
        };
        self.branch_end.set_padding(padding);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::code::Instruction;

    #[test]
    fn switch_padding_follows_block_offset() {
        let mut block: BasicBlock<(), SerializableInstruction, _> = BasicBlock {
            frame: (),
            instructions: OffsetVec::from([Instruction::IConst0]),
            branch_end: BranchInstruction::LookupSwitch {
                padding: 0,
                default: SynLabel::START,
                targets: vec![],
            },
        };

        block.align_branch(Offset(0));
        assert_eq!(block.width(), 1 + 1 + 2 + 8);

        block.align_branch(Offset(2));
        assert_eq!(block.width(), 1 + 1 + 0 + 8);

        let blocks = HashMap::from([(SynLabel::START, block)]);
        let offsets = BasicBlock::compute_block_offsets(&[SynLabel::START], &blocks);
        assert_eq!(offsets[&SynLabel::START], Offset(0));
    }
}
