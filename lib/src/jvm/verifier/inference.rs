use super::frame::{compress_slots, local_slots};
use super::*;
use crate::jvm::class_file::ConstantsPool;
use crate::jvm::code::{BranchInstruction, Code, SynLabel};
use crate::jvm::{BinaryName, Error, RefType};
use crate::util::{Offset, OffsetVec};
use log::trace;
use std::collections::{HashMap, HashSet, VecDeque};

/// Fill in the frame of every block in `code` that doesn't already have one
///
/// Frames declared in the original stack map table are trusted as-is and never revised. The
/// remaining frames come from a fix-point over the control flow graph: where two paths disagree on
/// a local, that local becomes `Top`; where they disagree on the stack, the first path to arrive
/// wins (merging reference types would require the class hierarchy). Exception handlers see the
/// locals of every instruction in the blocks they cover.
///
/// Returns the maximum locals and stack sizes seen along the way. Blocks that are never reached
/// keep a `None` frame, and in that case the declared maximum stack is used as a lower bound.
pub fn infer_frames(
    code: &mut Code,
    header: &MethodHeader,
    constants: &ConstantsPool,
) -> Result<(Offset, Offset), Error> {
    let mut max_locals = Offset(0);
    let mut max_stack = Offset(0);

    // Which handlers cover each block
    let positions: HashMap<SynLabel, usize> = code
        .block_order
        .iter()
        .enumerate()
        .map(|(idx, lbl)| (*lbl, idx))
        .collect();
    let mut handlers: HashMap<SynLabel, Vec<(SynLabel, RefType<BinaryName>)>> = HashMap::new();
    for range in &code.exception_table {
        let catch_type = match range.catch_type {
            Some(class) => constants.class_ref_type(class)?,
            None => RefType::Object(BinaryName::THROWABLE),
        };
        let start = positions.get(&range.start).copied().ok_or_else(|| {
            Error::InvalidLayout(format!("exception range starts at unknown block {:?}", range.start))
        })?;
        let end = positions
            .get(&range.end)
            .copied()
            .unwrap_or(code.block_order.len());
        for covered in &code.block_order[start..end.max(start)] {
            handlers
                .entry(*covered)
                .or_default()
                .push((range.handler, catch_type.clone()));
        }
    }

    // Seed with the declared frames and the method entry
    let mut states: HashMap<SynLabel, VerifierFrame> = HashMap::new();
    let mut worklist: VecDeque<SynLabel> = VecDeque::new();
    for lbl in &code.block_order {
        if code.declared_frames.contains(lbl) {
            if let Some(frame) = code.blocks.get(lbl).and_then(|block| block.frame.clone()) {
                states.insert(*lbl, frame);
                worklist.push_back(*lbl);
            }
        }
    }
    if let Some(entry) = code.block_order.first() {
        if !states.contains_key(entry) {
            states.insert(*entry, header.entry_frame());
            worklist.push_front(*entry);
        }
    }

    let mut queued: HashSet<SynLabel> = worklist.iter().copied().collect();
    while let Some(lbl) = worklist.pop_front() {
        queued.remove(&lbl);
        let block = code
            .blocks
            .get(&lbl)
            .ok_or_else(|| Error::InvalidLayout(format!("missing block {:?}", lbl)))?;
        let mut frame = match states.get(&lbl) {
            Some(frame) => frame.clone(),
            None => continue,
        };
        trace!("Inferring frames in block {:?} from {:?}", lbl, frame);

        // Locals as seen by handlers covering this block
        let mut handler_locals = frame.locals.clone();
        frame.update_maximums(&mut max_locals, &mut max_stack);
        for (offset, _, insn) in block.instructions.iter() {
            frame
                .apply_instruction(insn, offset, lbl, constants, &header.class)
                .map_err(|kind| Error::VerifierError {
                    instruction: format!("{:?}", insn),
                    kind,
                })?;
            frame.update_maximums(&mut max_locals, &mut max_stack);
            handler_locals = merge_locals(&handler_locals, &frame.locals);
        }

        let mut successors: Vec<(SynLabel, VerifierFrame)> = vec![];
        for (handler, catch_type) in handlers.get(&lbl).into_iter().flatten() {
            let handler_frame = Frame {
                locals: handler_locals.clone(),
                stack: OffsetVec::from([VerificationType::Object(catch_type.clone())]),
            };
            successors.push((*handler, handler_frame));
        }

        let branch = &block.branch_end;
        frame
            .apply_branch_instruction(branch)
            .map_err(|kind| Error::VerifierBranchingError {
                instruction: format!("{:?}", branch),
                kind,
            })?;
        match branch {
            BranchInstruction::Jsr(target, next) | BranchInstruction::JsrW(target, next) => {
                let mut subroutine_frame = frame.clone();
                subroutine_frame.stack.push(VerificationType::Top);
                successors.push((*target, subroutine_frame));
                successors.push((*next, frame));
            }
            _ => {
                for target in branch.jump_targets().targets() {
                    successors.push((*target, frame.clone()));
                }
                if let Some(next) = branch.fallthrough_target() {
                    successors.push((next, frame));
                }
            }
        }

        for (target, incoming) in successors {
            let changed = match states.get_mut(&target) {
                None => {
                    states.insert(target, incoming);
                    true
                }
                Some(_) if code.declared_frames.contains(&target) => false,
                Some(existing) => merge_frame(existing, &incoming),
            };
            if changed && queued.insert(target) {
                worklist.push_back(target);
            }
        }
    }

    let mut unreached = false;
    for lbl in &code.block_order {
        if code.declared_frames.contains(lbl) {
            continue;
        }
        if let Some(block) = code.blocks.get_mut(lbl) {
            block.frame = states.remove(lbl);
            unreached |= block.frame.is_none();
        }
    }
    if unreached {
        max_stack.0 = max_stack.0.max(code.max_stack as usize);
    }

    Ok((max_locals, max_stack))
}

/// Merge an incoming frame into an existing one, returning whether anything changed
fn merge_frame(existing: &mut VerifierFrame, incoming: &VerifierFrame) -> bool {
    let merged = merge_locals(&existing.locals, &incoming.locals);
    if merged != existing.locals {
        existing.locals = merged;
        true
    } else {
        false
    }
}

/// Slot-wise merge of two sets of locals (mismatching slots become `Top`)
fn merge_locals(first: &OffsetVec<VType>, second: &OffsetVec<VType>) -> OffsetVec<VType> {
    let first = local_slots(first.clone());
    let second = local_slots(second.clone());
    let merged: Vec<VType> = first
        .into_iter()
        .zip(second)
        .map(|(a, b)| if a == b { a } else { VerificationType::Top })
        .collect();
    compress_slots(merged)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_file::{BytecodeArray, BytecodeIndex, ExceptionHandler};
    use crate::jvm::descriptors::ParseDescriptor;
    use crate::jvm::{class_file, MethodDescriptor, Name, UnqualifiedName};

    fn header(descriptor: &str) -> MethodHeader {
        MethodHeader {
            class: BinaryName::from_string(String::from("Foo")).unwrap(),
            name: UnqualifiedName::from_string(String::from("test")).unwrap(),
            descriptor: MethodDescriptor::parse(descriptor).unwrap(),
            is_static: true,
        }
    }

    fn decode(bytes: Vec<u8>, header: &MethodHeader) -> Code {
        let raw = class_file::Code {
            max_stack: 7,
            max_locals: 3,
            code_array: BytecodeArray(bytes),
            exception_table: vec![],
            attributes: vec![],
        };
        Code::decode(&raw, &ConstantsPool::new(), header).unwrap()
    }

    #[test]
    fn locals_disagreeing_at_joins_become_top() {
        // iload_0; ifeq L; iconst_1; istore_1; goto J; L: fconst_0; fstore_1; J: return
        let header = header("(I)V");
        let mut code = decode(
            vec![
                0x1a, 0x99, 0x00, 0x08, 0x04, 0x3c, 0xa7, 0x00, 0x05, 0x0b, 0x44, 0xb1,
            ],
            &header,
        );
        let (max_locals, max_stack) =
            infer_frames(&mut code, &header, &ConstantsPool::new()).unwrap();
        assert_eq!(max_locals, Offset(2));
        assert_eq!(max_stack, Offset(1));

        let join = code.block_order.last().unwrap();
        let frame = code.blocks[join].frame.clone().unwrap();
        assert_eq!(frame.locals, OffsetVec::from([VerificationType::Integer]));
        assert!(frame.stack.is_empty());
    }

    #[test]
    fn handlers_see_locals_of_the_whole_range() {
        // iconst_0; istore_1; fconst_0; fstore_1; return; H: pop; return
        let header = header("(I)V");
        let raw = class_file::Code {
            max_stack: 1,
            max_locals: 2,
            code_array: BytecodeArray(vec![0x03, 0x3c, 0x0b, 0x44, 0xb1, 0x57, 0xb1]),
            exception_table: vec![ExceptionHandler {
                start_pc: BytecodeIndex(0),
                end_pc: BytecodeIndex(5),
                handler_pc: BytecodeIndex(5),
                catch_type: None,
            }],
            attributes: vec![],
        };
        let constants = ConstantsPool::new();
        let mut code = Code::decode(&raw, &constants, &header).unwrap();
        infer_frames(&mut code, &header, &constants).unwrap();

        let handler = code.exception_table[0].handler;
        let frame = code.blocks[&handler].frame.clone().unwrap();
        assert_eq!(frame.locals, OffsetVec::from([VerificationType::Integer]));
        assert_eq!(
            frame.stack,
            OffsetVec::from([VerificationType::Object(RefType::Object(BinaryName::THROWABLE))])
        );
    }

    #[test]
    fn unreachable_blocks_have_no_frame() {
        // return; iconst_0; ireturn
        let header = header("()V");
        let mut code = decode(vec![0xb1, 0x03, 0xac], &header);
        let (_, max_stack) = infer_frames(&mut code, &header, &ConstantsPool::new()).unwrap();
        assert_eq!(max_stack, Offset(7));
        assert!(code.blocks[&code.block_order[1]].frame.is_none());
    }

    #[test]
    fn stack_underflow_is_an_error() {
        let header = header("()V");
        let mut code = decode(vec![0x57, 0xb1], &header);
        assert!(matches!(
            infer_frames(&mut code, &header, &ConstantsPool::new()),
            Err(Error::VerifierError { .. })
        ));
    }
}
