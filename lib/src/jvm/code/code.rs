use crate::jvm::class_file;
use crate::jvm::class_file::{
    AttributeLike, BytecodeArray, BytecodeIndex, ClassConstantIndex, ConstantsPool,
    ExceptionHandler, LineNumber, LineNumberTable, LocalVariable, LocalVariableTable,
    LocalVariableTypeTable, Serialize, StackMapFrame, StackMapTable, Utf8ConstantIndex, Version,
};
use crate::jvm::code::{
    decode_instructions, jump_encoding, BasicBlock, BranchInstruction, CodeBlock,
    DecodedInstruction, Instruction, LabelGenerator, SerializableInstruction, SynLabel,
    SynLabelGenerator,
};
use crate::jvm::verifier::{
    infer_frames, Frame, MethodHeader, UninitializedRefType, VType, VerificationType,
};
use crate::jvm::Error;
use crate::util::{Offset, OffsetVec, Width};
use log::debug;
use std::cell::Cell;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Semantic representation of a method body
///
/// Everything that refers to a position in the code (jumps, exception ranges, debug tables, stack
/// map frames) refers to a block label instead, so blocks can be split, inserted, and moved
/// freely. Offsets only come back when the code is serialized.
#[derive(Debug)]
pub struct Code {
    /// Maximum size of locals declared in the original code
    pub max_locals: u16,

    /// Maximum size of stack declared in the original code
    pub max_stack: u16,

    /// Basic blocks in the code
    pub blocks: HashMap<SynLabel, CodeBlock>,

    /// Order of basic blocks in the code (elements are unique and exactly match keys of `blocks`)
    pub block_order: Vec<SynLabel>,

    /// Generator to produce the next label
    pub label_generator: SynLabelGenerator,

    /// Label standing in for the offset just past the end of the code
    pub end_label: SynLabel,

    pub exception_table: Vec<ExceptionRange>,
    pub line_numbers: Vec<LineNumberEntry>,
    pub local_variables: Vec<LocalVariableRange>,
    pub local_variable_types: Vec<LocalVariableRange>,

    /// Blocks whose frame came from the original `StackMapTable`
    pub declared_frames: HashSet<SynLabel>,
}

/// Entry of the exception table (`end` is exclusive and may be [`Code::end_label`])
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionRange {
    pub start: SynLabel,
    pub end: SynLabel,
    pub handler: SynLabel,
    pub catch_type: Option<ClassConstantIndex>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineNumberEntry {
    pub start: SynLabel,
    pub line_number: u16,
}

/// Entry of a `LocalVariableTable` or `LocalVariableTypeTable`
///
/// For the type table, `descriptor_index` is really the signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariableRange {
    pub start: SynLabel,
    pub end: SynLabel,
    pub name_index: Utf8ConstantIndex,
    pub descriptor_index: Utf8ConstantIndex,
    pub index: u16,
}

impl Code {
    /// Code made of exactly one block, with no exception handlers or debug information
    pub fn single_block(
        instructions: OffsetVec<SerializableInstruction>,
        branch_end: BranchInstruction<SynLabel, SynLabel, SynLabel>,
    ) -> Code {
        let mut label_generator = SynLabelGenerator::new(SynLabel::START);
        let start = label_generator.fresh_label();
        let end_label = label_generator.fresh_label();
        let block = BasicBlock {
            frame: None,
            instructions,
            branch_end,
        };
        Code {
            max_locals: 0,
            max_stack: 0,
            blocks: HashMap::from([(start, block)]),
            block_order: vec![start],
            label_generator,
            end_label,
            exception_table: vec![],
            line_numbers: vec![],
            local_variables: vec![],
            local_variable_types: vec![],
            declared_frames: HashSet::new(),
        }
    }

    /// Split a `Code` attribute into basic blocks
    ///
    /// A new block starts at offset 0, at every jump target, after every branch instruction, at
    /// every `new` (so uninitialized types can be tracked by block), and at every offset mentioned
    /// by the exception table, the stack map table, or the debug tables. Debug entries pointing
    /// into the middle of an instruction are dropped, but anything else that does is malformed.
    pub fn decode(
        code: &class_file::Code,
        constants: &ConstantsPool,
        header: &MethodHeader,
    ) -> Result<Code, Error> {
        let bytes = &code.code_array.0;
        let code_len = bytes.len();
        if code_len == 0 {
            return Err(Error::Malformed(String::from("method has an empty code array")));
        }
        let instructions = decode_instructions(bytes)?;
        let boundaries: HashSet<usize> = instructions.iter().map(|(offset, _)| *offset).collect();
        let is_end = |offset: usize| boundaries.contains(&offset) || offset == code_len;

        // Sub-attributes we keep track of
        let mut stack_map_table: Option<StackMapTable> = None;
        let mut line_numbers: Vec<LineNumber> = vec![];
        let mut local_variables: Vec<LocalVariable> = vec![];
        let mut local_variable_types: Vec<LocalVariable> = vec![];
        for attribute in &code.attributes {
            let name = constants.utf8(attribute.name_index)?;
            if name == StackMapTable::NAME {
                stack_map_table = Some(attribute.decode()?);
            } else if name == LineNumberTable::NAME {
                line_numbers.extend(attribute.decode::<LineNumberTable>()?.0);
            } else if name == LocalVariableTable::NAME {
                local_variables.extend(attribute.decode::<LocalVariableTable>()?.0);
            } else if name == LocalVariableTypeTable::NAME {
                local_variable_types.extend(attribute.decode::<LocalVariableTypeTable>()?.0);
            } else {
                debug!("Dropping `{}` attribute of method code", name);
            }
        }

        // Absolute offsets of the declared frames
        let mut frame_offsets: Vec<usize> = vec![];
        if let Some(table) = &stack_map_table {
            for frame in &table.0 {
                let delta = frame.offset_delta() as usize;
                let offset = match frame_offsets.last() {
                    None => delta,
                    Some(previous) => previous + delta + 1,
                };
                if !boundaries.contains(&offset) {
                    return Err(Error::Malformed(format!(
                        "stack map frame at offset {} is not on an instruction",
                        offset
                    )));
                }
                frame_offsets.push(offset);
            }
        }

        // Find the block leaders
        let mut leaders: BTreeSet<usize> = BTreeSet::new();
        leaders.insert(0);
        leaders.extend(frame_offsets.iter().copied());
        for (idx, (offset, insn)) in instructions.iter().enumerate() {
            match insn {
                DecodedInstruction::Branch(branch) => {
                    for target in branch.jump_targets().targets() {
                        if !boundaries.contains(target) {
                            return Err(Error::Malformed(format!(
                                "jump at offset {} lands inside an instruction (offset {})",
                                offset, target
                            )));
                        }
                        leaders.insert(*target);
                    }
                    if let Some((next, _)) = instructions.get(idx + 1) {
                        leaders.insert(*next);
                    }
                }
                DecodedInstruction::Straight(Instruction::New(_)) => {
                    leaders.insert(*offset);
                }
                DecodedInstruction::Straight(_) => (),
            }
        }
        for handler in &code.exception_table {
            let start = handler.start_pc.0 as usize;
            let end = handler.end_pc.0 as usize;
            let handler_pc = handler.handler_pc.0 as usize;
            if !boundaries.contains(&start)
                || !boundaries.contains(&handler_pc)
                || !is_end(end)
                || start >= end
            {
                return Err(Error::Malformed(format!(
                    "bad exception table entry {}..{} => {}",
                    start, end, handler_pc
                )));
            }
            leaders.extend([start, end, handler_pc]);
        }
        line_numbers.retain(|entry| {
            let keep = boundaries.contains(&(entry.start_pc.0 as usize));
            if !keep {
                debug!("Dropping line number entry at offset {}", entry.start_pc.0);
            }
            keep
        });
        for table in [&mut local_variables, &mut local_variable_types] {
            table.retain(|entry| {
                let start = entry.start_pc.0 as usize;
                let keep = boundaries.contains(&start) && is_end(start + entry.length as usize);
                if !keep {
                    debug!("Dropping local variable entry at offset {}", start);
                }
                keep
            });
        }
        leaders.extend(line_numbers.iter().map(|entry| entry.start_pc.0 as usize));
        for entry in local_variables.iter().chain(local_variable_types.iter()) {
            let start = entry.start_pc.0 as usize;
            leaders.extend([start, start + entry.length as usize]);
        }
        leaders.remove(&code_len);

        // Label every leader, in order (so offset 0 gets `SynLabel::START`)
        let mut label_generator = SynLabelGenerator::new(SynLabel::START);
        let labels: HashMap<usize, SynLabel> = leaders
            .iter()
            .map(|offset| (*offset, label_generator.fresh_label()))
            .collect();
        let end_label = label_generator.fresh_label();
        let label_at = |offset: usize| -> SynLabel {
            if offset == code_len {
                end_label
            } else {
                labels[&offset]
            }
        };

        // Every `new` starts a block, so uninitialized values are always at offset 0 in it
        let mut new_sites: HashMap<usize, UninitializedRefType> = HashMap::new();
        for (offset, insn) in &instructions {
            if let DecodedInstruction::Straight(Instruction::New(class)) = insn {
                let uninitialized = UninitializedRefType {
                    verification_type: constants.class_ref_type(*class)?,
                    offset_in_block: Offset(0),
                    block: labels[offset],
                };
                new_sites.insert(*offset, uninitialized);
            }
        }

        // Cut the instructions into blocks
        let mut blocks: HashMap<SynLabel, CodeBlock> = HashMap::new();
        let mut block_order: Vec<SynLabel> = vec![];
        let mut current: Option<(SynLabel, OffsetVec<SerializableInstruction>)> = None;
        let next_offsets: Vec<usize> = instructions
            .iter()
            .skip(1)
            .map(|(offset, _)| *offset)
            .chain([code_len])
            .collect();
        for ((offset, insn), next_offset) in instructions.into_iter().zip(next_offsets) {
            if let Some(label) = labels.get(&offset) {
                if let Some((previous_label, previous_instructions)) = current.take() {
                    let block = BasicBlock {
                        frame: None,
                        instructions: previous_instructions,
                        branch_end: BranchInstruction::FallThrough(*label),
                    };
                    blocks.insert(previous_label, block);
                }
                block_order.push(*label);
                current = Some((*label, OffsetVec::new()));
            }

            match insn {
                DecodedInstruction::Straight(insn) => match current.as_mut() {
                    Some((_, block_instructions)) => {
                        block_instructions.push(insn);
                    }
                    None => {
                        return Err(Error::Malformed(format!(
                            "unreachable instruction at offset {} after a branch",
                            offset
                        )))
                    }
                },
                DecodedInstruction::Branch(branch) => {
                    let (label, block_instructions) = match current.take() {
                        Some(current) => current,
                        None => {
                            return Err(Error::Malformed(format!(
                                "unreachable instruction at offset {} after a branch",
                                offset
                            )))
                        }
                    };
                    if branch.fallthrough_target().is_some() && next_offset >= code_len {
                        return Err(Error::Malformed(format!(
                            "`{}` at offset {} falls off the end of the code",
                            branch.mnemonic(),
                            offset
                        )));
                    }
                    let branch_end =
                        branch.map_labels(|lbl| labels[lbl], |lbl| labels[lbl], |_| label_at(next_offset));
                    blocks.insert(
                        label,
                        BasicBlock {
                            frame: None,
                            instructions: block_instructions,
                            branch_end,
                        },
                    );
                }
            }
        }
        if current.is_some() {
            return Err(Error::Malformed(String::from(
                "code falls off the end without a return, throw, or jump",
            )));
        }

        // Attach the declared frames
        let mut declared_frames: HashSet<SynLabel> = HashSet::new();
        if let Some(table) = stack_map_table {
            let resolve = |typ: &VerificationType<ClassConstantIndex, u16>| {
                resolve_declared_type(typ, constants, &new_sites)
            };
            let mut locals: Vec<VType> = header
                .entry_frame()
                .locals
                .into_iter()
                .map(|(_, _, typ)| typ)
                .collect();
            for (frame, offset) in table.0.iter().zip(frame_offsets) {
                let stack: Vec<VType> = match frame {
                    StackMapFrame::SameLocalsNoStack { .. } => vec![],
                    StackMapFrame::SameLocalsOneStack { stack, .. } => vec![resolve(stack)?],
                    StackMapFrame::ChopLocalsNoStack { chopped_k, .. } => {
                        let chopped_k = *chopped_k as usize;
                        if chopped_k > locals.len() {
                            return Err(Error::Malformed(format!(
                                "stack map frame at offset {} chops too many locals",
                                offset
                            )));
                        }
                        locals.truncate(locals.len() - chopped_k);
                        vec![]
                    }
                    StackMapFrame::AppendLocalsNoStack {
                        locals: appended, ..
                    } => {
                        for typ in appended {
                            locals.push(resolve(typ)?);
                        }
                        vec![]
                    }
                    StackMapFrame::Full {
                        locals: full_locals,
                        stack,
                        ..
                    } => {
                        locals = full_locals.iter().map(resolve).collect::<Result<_, _>>()?;
                        stack.iter().map(resolve).collect::<Result<_, _>>()?
                    }
                };

                let label = labels[&offset];
                if let Some(block) = blocks.get_mut(&label) {
                    block.frame = Some(Frame {
                        locals: locals.iter().cloned().collect(),
                        stack: stack.into_iter().collect(),
                    });
                    declared_frames.insert(label);
                }
            }
        }

        let exception_table = code
            .exception_table
            .iter()
            .map(|handler| ExceptionRange {
                start: labels[&(handler.start_pc.0 as usize)],
                end: label_at(handler.end_pc.0 as usize),
                handler: labels[&(handler.handler_pc.0 as usize)],
                catch_type: handler.catch_type,
            })
            .collect();
        let line_numbers = line_numbers
            .into_iter()
            .map(|entry| LineNumberEntry {
                start: labels[&(entry.start_pc.0 as usize)],
                line_number: entry.line_number,
            })
            .collect();
        let local_variable_range = |entry: LocalVariable| {
            let start = entry.start_pc.0 as usize;
            LocalVariableRange {
                start: label_at(start),
                end: label_at(start + entry.length as usize),
                name_index: entry.name_index,
                descriptor_index: entry.descriptor_index,
                index: entry.index,
            }
        };
        let local_variables = local_variables
            .into_iter()
            .map(local_variable_range)
            .collect();
        let local_variable_types = local_variable_types
            .into_iter()
            .map(local_variable_range)
            .collect();

        Ok(Code {
            max_locals: code.max_locals,
            max_stack: code.max_stack,
            blocks,
            block_order,
            label_generator,
            end_label,
            exception_table,
            line_numbers,
            local_variables,
            local_variable_types,
            declared_frames,
        })
    }

    /// Turn the blocks back into a `Code` attribute
    ///
    /// This is where frames get inferred, maximums computed, oversized jumps widened, and labels
    /// resolved back into offsets. Stack map frames are only emitted for class file versions that
    /// use them.
    pub fn serialize_code(
        mut self,
        header: &MethodHeader,
        constants_pool: &mut ConstantsPool,
        version: Version,
    ) -> Result<class_file::Code, Error> {
        // Fill in missing frames and compute maximums
        let (frames_max_locals, max_stack) = infer_frames(&mut self, header, constants_pool)?;
        let max_locals = self.max_locals_used(header, frames_max_locals, constants_pool);
        let max_locals: u16 = match u16::try_from(max_locals.0) {
            Ok(max_locals) => max_locals,
            Err(_) => return Err(Error::MethodCodeMaxLocalsOverflow(max_locals)),
        };
        let max_stack: u16 = match u16::try_from(max_stack.0) {
            Ok(max_stack) => max_stack,
            Err(_) => return Err(Error::MethodCodeMaxStackOverflow(max_stack)),
        };

        // Switch padding depends on where the block ends up
        let mut latest_offset = Offset(0);
        for block_label in &self.block_order {
            let block = self.blocks.get_mut(block_label).ok_or_else(|| {
                Error::InvalidLayout(format!("missing block {:?}", block_label))
            })?;
            block.align_branch(latest_offset);
            latest_offset.0 += block.width();
        }

        // Check and rewrite oversized jumps
        jump_encoding::widen_oversized_jumps(
            &mut self.block_order,
            &mut self.blocks,
            &mut self.label_generator,
            &jump_encoding::SIGNED_16BIT_JUMP_RANGE,
        );

        // Extract a mapping of label to offset and labels used
        let mut label_offsets: HashMap<SynLabel, Offset> = HashMap::new();
        let mut jump_targets: HashSet<SynLabel> = HashSet::new();
        let mut latest_offset = Offset(0);
        for block_label in &self.block_order {
            let block = &self.blocks[block_label];
            label_offsets.insert(*block_label, latest_offset);
            jump_targets.extend(block.branch_end.jump_targets().targets());
            latest_offset.0 += block.width();
        }
        label_offsets.insert(self.end_label, latest_offset);

        // Check if we've got an overflow
        if latest_offset.0 == 0 || u16::try_from(latest_offset.0).is_err() {
            return Err(Error::MethodCodeOverflow(latest_offset));
        }

        // Blocks that need a stack map frame
        let mut needs_frame: HashSet<SynLabel> = jump_targets;
        needs_frame.extend(self.exception_table.iter().map(|entry| entry.handler));
        needs_frame.extend(self.declared_frames.iter().copied());
        for pair in self.block_order.windows(2) {
            if self.blocks[&pair[0]].branch_end.fallthrough_target().is_none() {
                needs_frame.insert(pair[1]);
            }
        }
        let emit_frames = version.uses_stack_map_frames();

        // Loop through the blocks in placement order to accumulate code and frames
        let mut code_array: BytecodeArray = BytecodeArray(vec![]);
        let implicit_frame: Frame<ClassConstantIndex, u16> = header
            .entry_frame()
            .into_serializable(constants_pool, &label_offsets)?;
        let mut frames: Vec<(Offset, Frame<ClassConstantIndex, u16>)> = vec![];
        let mut fallthrough_label: Option<SynLabel> = None;
        let mut blocks = std::mem::take(&mut self.blocks);

        for block_label in &self.block_order {
            if let Some(fallthrough_label) = fallthrough_label.take() {
                if fallthrough_label != *block_label {
                    return Err(Error::InvalidLayout(format!(
                        "block falls through to {:?} but is followed by {:?}",
                        fallthrough_label, block_label
                    )));
                }
            }
            let basic_block = blocks.remove(block_label).ok_or_else(|| {
                Error::InvalidLayout(format!("block {:?} is missing or placed twice", block_label))
            })?;
            let block_offset_from_start = label_offsets[block_label];

            if emit_frames && needs_frame.contains(block_label) {
                let frame = basic_block.frame.as_ref().ok_or_else(|| {
                    Error::Malformed(format!(
                        "cannot compute a stack map frame for offset {}",
                        block_offset_from_start.0
                    ))
                })?;
                let mut frame = frame.into_serializable(constants_pool, &label_offsets)?;
                frame.trim_trailing_top();
                frames.push((block_offset_from_start, frame));
            }

            // Serialize the instructions in the block to the bytecode array
            for (_, _, insn) in basic_block.instructions.iter() {
                insn.serialize(&mut code_array.0).map_err(Error::IoError)?;
            }
            let branch_end_offset: i64 =
                (block_offset_from_start.0 + basic_block.instructions.offset_len().0) as i64;
            let jump_overflow = Cell::new(false);
            let end_insn = basic_block.branch_end.map_labels(
                |lbl: &SynLabel| {
                    i16::try_from(label_offsets[lbl].0 as i64 - branch_end_offset)
                        .unwrap_or_else(|_| {
                            jump_overflow.set(true);
                            0
                        })
                },
                |lbl: &SynLabel| {
                    i32::try_from(label_offsets[lbl].0 as i64 - branch_end_offset)
                        .unwrap_or_else(|_| {
                            jump_overflow.set(true);
                            0
                        })
                },
                |_| (),
            );
            if jump_overflow.get() {
                return Err(Error::MethodCodeOverflow(Offset(branch_end_offset as usize)));
            }
            end_insn
                .serialize(&mut code_array.0)
                .map_err(Error::IoError)?;

            fallthrough_label = basic_block.branch_end.fallthrough_target();
        }
        if let Some(fallthrough_label) = fallthrough_label {
            return Err(Error::InvalidLayout(format!(
                "last block falls through to {:?}",
                fallthrough_label
            )));
        }

        // Build up stack map frames
        let mut previous_frame = implicit_frame;
        let mut previous_offset = Offset(0);
        let mut stack_map_frames = vec![];
        for (offset, frame) in frames {
            let offset_delta = if stack_map_frames.is_empty() {
                offset.0 - previous_offset.0
            } else if offset == previous_offset {
                if frame != previous_frame {
                    return Err(Error::ConflictingFrames(offset, frame, previous_frame));
                } else {
                    continue;
                }
            } else {
                offset.0 - previous_offset.0 - 1
            };
            stack_map_frames.push(frame.stack_map_frame(offset_delta as u16, &previous_frame));

            previous_frame = frame;
            previous_offset = offset;
        }

        // Map the labelled tables back to offsets
        let pc = |label: &SynLabel| -> Result<BytecodeIndex, Error> {
            label_offsets
                .get(label)
                .map(|offset| BytecodeIndex(offset.0 as u16))
                .ok_or_else(|| Error::InvalidLayout(format!("unknown label {:?}", label)))
        };
        let exception_table = self
            .exception_table
            .iter()
            .map(|entry| {
                Ok(ExceptionHandler {
                    start_pc: pc(&entry.start)?,
                    end_pc: pc(&entry.end)?,
                    handler_pc: pc(&entry.handler)?,
                    catch_type: entry.catch_type,
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;
        let line_numbers = self
            .line_numbers
            .iter()
            .map(|entry| {
                Ok(LineNumber {
                    start_pc: pc(&entry.start)?,
                    line_number: entry.line_number,
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;
        let local_variable = |entry: &LocalVariableRange| -> Result<LocalVariable, Error> {
            let start_pc = pc(&entry.start)?;
            let end_pc = pc(&entry.end)?;
            Ok(LocalVariable {
                start_pc,
                length: end_pc.0.saturating_sub(start_pc.0),
                name_index: entry.name_index,
                descriptor_index: entry.descriptor_index,
                index: entry.index,
            })
        };
        let local_variables = self
            .local_variables
            .iter()
            .map(local_variable)
            .collect::<Result<Vec<_>, Error>>()?;
        let local_variable_types = self
            .local_variable_types
            .iter()
            .map(local_variable)
            .collect::<Result<Vec<_>, Error>>()?;

        let mut attributes = vec![];

        // Add `StackMapTable` attribute only if there are frames
        if !stack_map_frames.is_empty() {
            let stack_map_table = StackMapTable(stack_map_frames);
            attributes.push(constants_pool.get_attribute(stack_map_table)?);
        }
        if !line_numbers.is_empty() {
            attributes.push(constants_pool.get_attribute(LineNumberTable(line_numbers))?);
        }
        if !local_variables.is_empty() {
            attributes.push(constants_pool.get_attribute(LocalVariableTable(local_variables))?);
        }
        if !local_variable_types.is_empty() {
            let table = LocalVariableTypeTable(local_variable_types);
            attributes.push(constants_pool.get_attribute(table)?);
        }

        Ok(class_file::Code {
            max_stack,
            max_locals,
            code_array,
            exception_table,
            attributes,
        })
    }

    /// Number of local slots the code touches
    ///
    /// This covers the parameters, every frame, every local instruction, and every entry of the
    /// local variable tables.
    fn max_locals_used(
        &self,
        header: &MethodHeader,
        frames_max_locals: Offset,
        constants_pool: &ConstantsPool,
    ) -> Offset {
        let mut max_locals = frames_max_locals.0.max(header.parameter_length());
        for block in self.blocks.values() {
            for (_, _, insn) in block.instructions.iter() {
                let used = match insn {
                    Instruction::ILoad(idx)
                    | Instruction::FLoad(idx)
                    | Instruction::ALoad(idx)
                    | Instruction::IStore(idx)
                    | Instruction::FStore(idx)
                    | Instruction::AStore(idx)
                    | Instruction::IInc(idx, _) => *idx as usize + 1,
                    Instruction::LLoad(idx)
                    | Instruction::DLoad(idx)
                    | Instruction::LStore(idx)
                    | Instruction::DStore(idx) => *idx as usize + 2,
                    _ => 0,
                };
                max_locals = max_locals.max(used);
            }
            if let BranchInstruction::Ret(idx) = block.branch_end {
                max_locals = max_locals.max(idx as usize + 1);
            }
        }
        for entry in &self.local_variables {
            let width = match constants_pool.utf8(entry.descriptor_index) {
                Ok(descriptor) if descriptor.starts_with('J') || descriptor.starts_with('D') => 2,
                _ => 1,
            };
            max_locals = max_locals.max(entry.index as usize + width);
        }
        for entry in &self.local_variable_types {
            max_locals = max_locals.max(entry.index as usize + 1);
        }
        Offset(max_locals)
    }
}

/// Resolve a type from the `StackMapTable` of the input
fn resolve_declared_type(
    typ: &VerificationType<ClassConstantIndex, u16>,
    constants: &ConstantsPool,
    new_sites: &HashMap<usize, UninitializedRefType>,
) -> Result<VType, Error> {
    Ok(match typ {
        VerificationType::Top => VerificationType::Top,
        VerificationType::Integer => VerificationType::Integer,
        VerificationType::Float => VerificationType::Float,
        VerificationType::Long => VerificationType::Long,
        VerificationType::Double => VerificationType::Double,
        VerificationType::Null => VerificationType::Null,
        VerificationType::UninitializedThis => VerificationType::UninitializedThis,
        VerificationType::Object(class) => VerificationType::Object(constants.class_ref_type(*class)?),
        VerificationType::Uninitialized(offset) => match new_sites.get(&(*offset as usize)) {
            Some(uninitialized) => VerificationType::Uninitialized(uninitialized.clone()),
            None => {
                return Err(Error::Malformed(format!(
                    "uninitialized type refers to offset {} which is not a `new`",
                    offset
                )))
            }
        },
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_file::Deserialize;
    use crate::jvm::{BinaryName, MethodDescriptor, Name, UnqualifiedName};
    use crate::jvm::descriptors::ParseDescriptor;

    fn header(descriptor: &str) -> MethodHeader {
        MethodHeader {
            class: BinaryName::from_string(String::from("Foo")).unwrap(),
            name: UnqualifiedName::from_string(String::from("test")).unwrap(),
            descriptor: MethodDescriptor::parse(descriptor).unwrap(),
            is_static: true,
        }
    }

    fn stack_map_table(code: &class_file::Code, constants: &ConstantsPool) -> Option<StackMapTable> {
        code.attributes
            .iter()
            .find(|attr| constants.utf8(attr.name_index).unwrap() == StackMapTable::NAME)
            .map(|attr| attr.decode().unwrap())
    }

    /// `static int test(int x) { return x > 0 ? 1 : 0; }`
    fn positive_code(constants: &mut ConstantsPool) -> class_file::Code {
        let frames = StackMapTable(vec![StackMapFrame::SameLocalsNoStack { offset_delta: 6 }]);
        class_file::Code {
            max_stack: 1,
            max_locals: 1,
            code_array: BytecodeArray(vec![0x1a, 0x9e, 0x00, 0x05, 0x04, 0xac, 0x03, 0xac]),
            exception_table: vec![],
            attributes: vec![constants.get_attribute(frames).unwrap()],
        }
    }

    #[test]
    fn decode_then_serialize_is_stable() {
        let mut constants = ConstantsPool::new();
        let original = positive_code(&mut constants);
        let header = header("(I)I");

        let code = Code::decode(&original, &constants, &header).unwrap();
        assert_eq!(code.block_order.len(), 3);
        assert_eq!(code.declared_frames.len(), 1);
        assert!(matches!(
            code.blocks[&SynLabel::START].branch_end,
            BranchInstruction::If(_, _, _)
        ));

        let serialized = code
            .serialize_code(&header, &mut constants, Version::JAVA8)
            .unwrap();
        assert_eq!(serialized.code_array, original.code_array);
        assert_eq!(serialized.max_stack, 1);
        assert_eq!(serialized.max_locals, 1);
        assert_eq!(
            stack_map_table(&serialized, &constants),
            Some(StackMapTable(vec![StackMapFrame::SameLocalsNoStack {
                offset_delta: 6
            }]))
        );
    }

    #[test]
    fn old_versions_get_no_frames() {
        let mut constants = ConstantsPool::new();
        let mut original = positive_code(&mut constants);
        original.attributes.clear();
        let header = header("(I)I");

        let code = Code::decode(&original, &constants, &header).unwrap();
        let serialized = code
            .serialize_code(&header, &mut constants, Version { minor_version: 0, major_version: 49 })
            .unwrap();
        assert_eq!(serialized.code_array, original.code_array);
        assert!(serialized.attributes.is_empty());
    }

    #[test]
    fn malformed_code() {
        let constants = ConstantsPool::new();
        let header = header("(I)V");
        let code = |bytes: Vec<u8>| class_file::Code {
            max_stack: 1,
            max_locals: 1,
            code_array: BytecodeArray(bytes),
            exception_table: vec![],
            attributes: vec![],
        };

        // Falls off the end
        assert!(matches!(
            Code::decode(&code(vec![0x1a]), &constants, &header),
            Err(Error::Malformed(_))
        ));

        // Conditional at the very end
        assert!(matches!(
            Code::decode(&code(vec![0x1a, 0x99, 0xff, 0xff]), &constants, &header),
            Err(Error::Malformed(_))
        ));

        // Jump into the middle of `bipush`
        assert!(matches!(
            Code::decode(&code(vec![0x10, 0x05, 0xa7, 0xff, 0xff]), &constants, &header),
            Err(Error::Malformed(_))
        ));

        // Exception range that ends inside an instruction
        let mut bad_range = code(vec![0x10, 0x05, 0x57, 0xb1]);
        bad_range.exception_table.push(ExceptionHandler {
            start_pc: BytecodeIndex(0),
            end_pc: BytecodeIndex(1),
            handler_pc: BytecodeIndex(3),
            catch_type: None,
        });
        assert!(matches!(
            Code::decode(&bad_range, &constants, &header),
            Err(Error::Malformed(_))
        ));
    }

    #[test]
    fn exception_ranges_and_debug_tables_survive() {
        let mut constants = ConstantsPool::new();
        let throwable = constants
            .get_class(&crate::jvm::RefType::Object(BinaryName::THROWABLE))
            .unwrap();
        let name = constants.get_utf8("x").unwrap();
        let descriptor = constants.get_utf8("I").unwrap();

        // iload_0; pop; return; (handler) pop; return
        let frames = StackMapTable(vec![StackMapFrame::SameLocalsOneStack {
            offset_delta: 3,
            stack: VerificationType::Object(throwable),
        }]);
        let lines = LineNumberTable(vec![
            LineNumber {
                start_pc: BytecodeIndex(0),
                line_number: 10,
            },
            LineNumber {
                start_pc: BytecodeIndex(7),
                line_number: 99,
            },
        ]);
        let locals = LocalVariableTable(vec![LocalVariable {
            start_pc: BytecodeIndex(0),
            length: 5,
            name_index: name,
            descriptor_index: descriptor,
            index: 0,
        }]);
        let original = class_file::Code {
            max_stack: 1,
            max_locals: 1,
            code_array: BytecodeArray(vec![0x1a, 0x57, 0xb1, 0x57, 0xb1]),
            exception_table: vec![ExceptionHandler {
                start_pc: BytecodeIndex(0),
                end_pc: BytecodeIndex(2),
                handler_pc: BytecodeIndex(3),
                catch_type: Some(throwable),
            }],
            attributes: vec![
                constants.get_attribute(frames).unwrap(),
                constants.get_attribute(lines).unwrap(),
                constants.get_attribute(locals).unwrap(),
            ],
        };
        let header = header("(I)V");

        let code = Code::decode(&original, &constants, &header).unwrap();
        assert_eq!(code.line_numbers.len(), 1, "entry at offset 7 is dropped");
        assert_eq!(code.local_variables[0].end, code.end_label);

        let serialized = code
            .serialize_code(&header, &mut constants, Version::JAVA8)
            .unwrap();
        assert_eq!(serialized.code_array, original.code_array);
        assert_eq!(serialized.exception_table, original.exception_table);

        let decoded_locals: Vec<LocalVariableTable> = serialized
            .attributes
            .iter()
            .filter(|attr| constants.utf8(attr.name_index).unwrap() == LocalVariableTable::NAME)
            .map(|attr| attr.decode().unwrap())
            .collect();
        assert_eq!(decoded_locals[0].0[0].length, 5);
    }

    #[test]
    fn uninitialized_types_in_declared_frames() {
        let mut constants = ConstantsPool::new();
        let object = constants
            .get_class(&crate::jvm::RefType::Object(BinaryName::OBJECT))
            .unwrap();
        let mut new_insn = vec![0xbb];
        object.serialize(&mut new_insn).unwrap();

        // Frame refers to offset 1, which isn't a `new`
        let frames = StackMapTable(vec![StackMapFrame::SameLocalsOneStack {
            offset_delta: 3,
            stack: VerificationType::<ClassConstantIndex, u16>::deserialize(&mut &[8u8, 0, 1][..])
                .unwrap(),
        }]);
        let mut bytes = new_insn.clone();
        bytes.extend([0x57, 0xb1]);
        let original = class_file::Code {
            max_stack: 1,
            max_locals: 0,
            code_array: BytecodeArray(bytes),
            exception_table: vec![],
            attributes: vec![constants.get_attribute(frames).unwrap()],
        };
        assert!(matches!(
            Code::decode(&original, &constants, &header("()V")),
            Err(Error::Malformed(_))
        ));
    }
}
