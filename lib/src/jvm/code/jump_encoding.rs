//! Widen jumps that no longer fit in a signed 16-bit offset
//!
//! Instrumenting conditionals grows method bodies, so a `goto` or `if*` that used to reach its
//! target can end up too far from it. Only `goto_w` and `jsr_w` take 32-bit offsets, so:
//!
//! ```text,ignore,no_run
//!     goto L2               nop
//!                           nop
//!                           goto_w L2
//! ```
//!
//! and conditionals branch around a trampoline:
//!
//! ```text,ignore,no_run
//!     if* L2                ifnot* L1
//! L1: ...         =>        nop
//!                           nop
//!                           nop
//!                           goto_w L2
//!                       L1: ...
//! ```
//!
//! Both rewrites add a multiple of four bytes, so `tableswitch`/`lookupswitch` padding further down
//! stays valid. Widening can push other jumps out of range, so the check repeats until nothing is
//! oversized. That terminates: every round turns at least one 16-bit jump into a 32-bit one, and
//! the only 16-bit jump a rewrite introduces hops over its own trampoline.

use crate::jvm::code::{BasicBlock, BranchInstruction, JumpTargets, LabelGenerator};
use crate::util::{OffsetVec, Width};
use std::collections::HashMap;
use std::hash::Hash;
use std::ops::{RangeBounds, RangeInclusive};

/// Relative offsets reachable by `goto`, `jsr`, and `if*`
pub const SIGNED_16BIT_JUMP_RANGE: RangeInclusive<isize> =
    RangeInclusive::new(i16::MIN as isize, i16::MAX as isize);

/// Bytes of `nop` in front of the `goto_w` of a conditional trampoline
const TRAMPOLINE_PADDING: usize = 3;

/// Rewrite every jump in `blocks` that cannot reach its target when laid out in `block_order`
///
/// Trampolines are new blocks, so both the order and the blocks get updated. `small_jump_range`
/// is always [`SIGNED_16BIT_JUMP_RANGE`] outside of tests.
pub fn widen_oversized_jumps<Frame: Clone, Insn: Default + Width, Lbl: Copy + Eq + Hash>(
    block_order: &mut Vec<Lbl>,
    blocks: &mut HashMap<Lbl, BasicBlock<Frame, Insn, BranchInstruction<Lbl, Lbl, Lbl>>>,
    label_generator: &mut impl LabelGenerator<Lbl>,
    small_jump_range: &impl RangeBounds<isize>,
) {
    loop {
        let offsets = BasicBlock::compute_block_offsets(block_order, blocks);
        let oversized: Vec<Lbl> = block_order
            .iter()
            .copied()
            .filter(|lbl| {
                let block = &blocks[lbl];
                match block.branch_end.jump_targets() {
                    JumpTargets::Regular(target) => {
                        let from = offsets[lbl].0 + block.instructions.offset_len().0;
                        let distance = offsets[&target].0 as isize - from as isize;
                        !small_jump_range.contains(&distance)
                    }
                    _ => false,
                }
            })
            .collect();
        if oversized.is_empty() {
            return;
        }

        let mut trampolines: HashMap<Lbl, Lbl> = HashMap::new();
        for lbl in oversized {
            if let Some(trampoline) = widen_jump(lbl, blocks, label_generator) {
                trampolines.insert(lbl, trampoline);
            }
        }
        if !trampolines.is_empty() {
            *block_order = block_order
                .iter()
                .flat_map(|lbl| std::iter::once(*lbl).chain(trampolines.get(lbl).copied()))
                .collect();
        }
    }
}

/// Widen the jump ending block `lbl`, returning the trampoline to place right after it (if any)
fn widen_jump<Frame: Clone, Insn: Default + Width, Lbl: Copy + Eq + Hash>(
    lbl: Lbl,
    blocks: &mut HashMap<Lbl, BasicBlock<Frame, Insn, BranchInstruction<Lbl, Lbl, Lbl>>>,
    label_generator: &mut impl LabelGenerator<Lbl>,
) -> Option<Lbl> {
    use BranchInstruction::*;

    let block = blocks.get_mut(&lbl)?;
    if let Goto(far) | Jsr(far, _) = block.branch_end {
        block.branch_end = match block.branch_end {
            Jsr(_, next) => JsrW(far, next),
            _ => GotoW(far),
        };
        block.instructions.push(Insn::default());
        block.instructions.push(Insn::default());
        return None;
    }

    let trampoline = label_generator.fresh_label();
    let (inverted, far) = match block.branch_end {
        If(comp, far, next) => (If(!comp, next, trampoline), far),
        IfICmp(comp, far, next) => (IfICmp(!comp, next, trampoline), far),
        IfACmp(comp, far, next) => (IfACmp(!comp, next, trampoline), far),
        IfNull(comp, far, next) => (IfNull(!comp, next, trampoline), far),
        _ => return None,
    };
    block.branch_end = inverted;

    // Entering the trampoline looks just like entering the block it jumps to
    let frame = blocks[&far].frame.clone();
    let instructions: OffsetVec<Insn> = (0..TRAMPOLINE_PADDING).map(|_| Insn::default()).collect();
    blocks.insert(
        trampoline,
        BasicBlock {
            frame,
            instructions,
            branch_end: GotoW(far),
        },
    );
    Some(trampoline)
}
