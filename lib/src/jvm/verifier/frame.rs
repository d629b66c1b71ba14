use super::*;
use crate::jvm::class_file::{self, ClassConstantIndex, Constant, ConstantsPool, StackMapFrame};
use crate::jvm::code::{BranchInstruction, Instruction, InvokeType, SerializableInstruction, SynLabel};
use crate::jvm::descriptors::ParseDescriptor;
use crate::jvm::{
    ArrayType, BinaryName, ConstantIndex, Error, FieldType, MethodAccessFlags, MethodDescriptor,
    Name, RefType, UnqualifiedName, VerifierErrorKind,
};
use crate::util::{Offset, OffsetVec, Width};
use std::collections::HashMap;

/// Snapshot of the stack and local variables at a point in the bytecode
///
/// Wide values (`long` and `double`) take up one entry but two offsets in both the stack and the
/// locals, which is exactly the compressed form used in stack map frames.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct Frame<Cls, U> {
    /// Local variables in scope
    pub locals: OffsetVec<VerificationType<Cls, U>>,

    /// Types of values on the stack
    pub stack: OffsetVec<VerificationType<Cls, U>>,
}

/// Stack map frame tracked while analyzing a method body
pub type VerifierFrame = Frame<RefType<BinaryName>, UninitializedRefType>;

impl<Cls, U> Frame<Cls, U> {
    /// Drop `Top` locals from the end (they are implicit)
    pub fn trim_trailing_top(&mut self) {
        while let Some((_, VerificationType::Top)) = self.locals.last() {
            self.locals.pop();
        }
    }
}

/// Signature of the method whose body is being analyzed
#[derive(Debug, Clone)]
pub struct MethodHeader {
    /// Class declaring the method
    pub class: BinaryName,
    pub name: UnqualifiedName,
    pub descriptor: MethodDescriptor<BinaryName>,
    pub is_static: bool,
}

impl MethodHeader {
    /// Read the header of a method declared in a parsed class
    pub fn from_method(
        class: &BinaryName,
        method: &class_file::Method,
        constants: &ConstantsPool,
    ) -> Result<MethodHeader, Error> {
        let name = constants.utf8(method.name_index)?;
        let descriptor = constants.utf8(method.descriptor_index)?;
        Ok(MethodHeader {
            class: class.clone(),
            name: UnqualifiedName::from_string(name.to_owned()).map_err(Error::Malformed)?,
            descriptor: MethodDescriptor::parse(descriptor)
                .map_err(|err| Error::Malformed(format!("descriptor '{}': {}", descriptor, err)))?,
            is_static: method.access_flags.contains(MethodAccessFlags::STATIC),
        })
    }

    /// Frame on entry to the method: just the parameters (including `this`) and an empty stack
    pub fn entry_frame(&self) -> VerifierFrame {
        let mut locals = OffsetVec::new();
        if !self.is_static {
            if self.name == UnqualifiedName::INIT && self.class != BinaryName::OBJECT {
                locals.push(VerificationType::UninitializedThis);
            } else {
                locals.push(VerificationType::Object(RefType::Object(self.class.clone())));
            }
        }
        for parameter in &self.descriptor.parameters {
            locals.push(VType::from(parameter.clone()));
        }
        Frame {
            locals,
            stack: OffsetVec::new(),
        }
    }

    /// Number of local slots taken up by the parameters
    pub fn parameter_length(&self) -> usize {
        self.descriptor.parameter_length(!self.is_static)
    }
}

impl VerifierFrame {
    /// Update the frame to reflect the effects of the given (non-branching) instruction
    ///
    /// This is deliberately permissive: popped values aren't checked against what the instruction
    /// expects. The only failures are running out of stack, a value of the wrong width where the
    /// width decides the instruction's behaviour, or constants that can't be resolved.
    pub fn apply_instruction(
        &mut self,
        insn: &SerializableInstruction,
        insn_offset_in_block: Offset,
        current_block: SynLabel,
        constants: &ConstantsPool,
        this_class: &BinaryName,
    ) -> Result<(), VerifierErrorKind> {
        apply_instruction(
            self,
            constants,
            this_class,
            insn,
            insn_offset_in_block,
            current_block,
        )
    }

    /// Update the frame to reflect the effects of the given branching instruction
    pub fn apply_branch_instruction<Lbl, LblWide, LblNext>(
        &mut self,
        insn: &BranchInstruction<Lbl, LblWide, LblNext>,
    ) -> Result<(), VerifierErrorKind> {
        apply_branch_instruction(self, insn)
    }

    /// Update the maximum locals and stack
    ///
    /// Only has an effect if the size of the locals or the size of the stack is greater than the
    /// previous maximum values.
    pub fn update_maximums(&self, max_locals: &mut Offset, max_stack: &mut Offset) {
        max_locals.0 = max_locals.0.max(self.locals.offset_len().0);
        max_stack.0 = max_stack.0.max(self.stack.offset_len().0);
    }

    /// Resolve the frame into its serializable form
    pub fn into_serializable(
        &self,
        constants_pool: &mut ConstantsPool,
        block_offsets: &HashMap<SynLabel, Offset>,
    ) -> Result<Frame<ClassConstantIndex, u16>, Error> {
        Ok(Frame {
            stack: self
                .stack
                .iter()
                .map(|(_, _, t)| t.into_serializable(constants_pool, block_offsets))
                .collect::<Result<_, _>>()?,
            locals: self
                .locals
                .iter()
                .map(|(_, _, t)| t.into_serializable(constants_pool, block_offsets))
                .collect::<Result<_, _>>()?,
        })
    }
}

impl Frame<ClassConstantIndex, u16> {
    /// Compute a stack map frame for this frame, given the previous frame
    ///
    /// This will fall back to the `Full` option using [`Self::full_stack_map_frame`] only if none of the
    /// other stack map frame variants are enough to encode the transition.
    pub fn stack_map_frame(&self, offset_delta: u16, previous_frame: &Self) -> StackMapFrame {
        match self.stack.len() {
            0 => {
                let this_locals_len = self.locals.len();
                let prev_locals_len = previous_frame.locals.len();

                // Both the chop and append forms need one set of locals to be a prefix of the other
                let common_prefix = self
                    .locals
                    .iter()
                    .zip(previous_frame.locals.iter())
                    .all(|((_, _, t1), (_, _, t2))| t1 == t2);

                if common_prefix && this_locals_len <= prev_locals_len {
                    let len_difference = prev_locals_len - this_locals_len;
                    if len_difference == 0 {
                        return StackMapFrame::SameLocalsNoStack { offset_delta };
                    } else if len_difference < 4 {
                        return StackMapFrame::ChopLocalsNoStack {
                            offset_delta,
                            chopped_k: len_difference as u8,
                        };
                    }
                } else if common_prefix && this_locals_len - prev_locals_len < 4 {
                    return StackMapFrame::AppendLocalsNoStack {
                        offset_delta,
                        locals: self
                            .locals
                            .iter()
                            .skip(prev_locals_len)
                            .map(|(_, _, t)| *t)
                            .collect(),
                    };
                }
            }
            1 if self.locals == previous_frame.locals => {
                if let Some((_, stack)) = self.stack.last() {
                    return StackMapFrame::SameLocalsOneStack {
                        offset_delta,
                        stack: *stack,
                    };
                }
            }
            _ => (),
        }

        self.full_stack_map_frame(offset_delta)
    }

    /// Compute a `Full` stack map frame
    pub fn full_stack_map_frame(&self, offset_delta: u16) -> StackMapFrame {
        StackMapFrame::Full {
            offset_delta,
            stack: self.stack.iter().map(|(_, _, t)| *t).collect(),
            locals: self.locals.iter().map(|(_, _, t)| *t).collect(),
        }
    }
}

fn apply_instruction(
    frame: &mut VerifierFrame,
    constants: &ConstantsPool,
    this_class: &BinaryName,
    insn: &SerializableInstruction,
    insn_offset_in_basic_block: Offset,
    current_block: SynLabel,
) -> Result<(), VerifierErrorKind> {
    use Instruction::*;
    use VerificationType::*;

    let Frame {
        ref mut stack,
        ref mut locals,
    } = frame;

    match insn {
        Nop => (),
        AConstNull => {
            stack.push(Null);
        }
        IConstM1 | IConst0 | IConst1 | IConst2 | IConst3 | IConst4 | IConst5 => {
            stack.push(Integer);
        }
        LConst0 | LConst1 => {
            stack.push(Long);
        }
        FConst0 | FConst1 | FConst2 => {
            stack.push(Float);
        }
        DConst0 | DConst1 => {
            stack.push(Double);
        }
        BiPush(_) | SiPush(_) => {
            stack.push(Integer);
        }
        Ldc(constant) => {
            stack.push(loadable_constant(constants, *constant, 1)?);
        }
        Ldc2(constant) => {
            stack.push(loadable_constant(constants, *constant, 2)?);
        }

        ILoad(_) => {
            stack.push(Integer);
        }
        LLoad(_) => {
            stack.push(Long);
        }
        FLoad(_) => {
            stack.push(Float);
        }
        DLoad(_) => {
            stack.push(Double);
        }
        ALoad(offset) => {
            // Return addresses (from `jsr`) are tracked as `Top`
            let typ = match locals.get_offset(Offset(*offset as usize)) {
                Some(typ) if typ.is_reference() => typ.clone(),
                _ => Top,
            };
            stack.push(typ);
        }

        IALoad | BALoad | CALoad | SALoad => {
            pop_offset_vec(stack)?;
            pop_offset_vec(stack)?;
            stack.push(Integer);
        }
        LALoad => {
            pop_offset_vec(stack)?;
            pop_offset_vec(stack)?;
            stack.push(Long);
        }
        FALoad => {
            pop_offset_vec(stack)?;
            pop_offset_vec(stack)?;
            stack.push(Float);
        }
        DALoad => {
            pop_offset_vec(stack)?;
            pop_offset_vec(stack)?;
            stack.push(Double);
        }
        AALoad => {
            pop_offset_vec(stack)?;
            let array = pop_offset_vec(stack)?;
            stack.push(array_component_type(&array));
        }

        IStore(offset) => {
            pop_offset_vec(stack)?;
            set_local(locals, *offset, Integer);
        }
        LStore(offset) => {
            pop_offset_vec(stack)?;
            set_local(locals, *offset, Long);
        }
        FStore(offset) => {
            pop_offset_vec(stack)?;
            set_local(locals, *offset, Float);
        }
        DStore(offset) => {
            pop_offset_vec(stack)?;
            set_local(locals, *offset, Double);
        }
        AStore(offset) => {
            let typ = pop_offset_vec(stack)?;
            set_local(locals, *offset, typ);
        }

        IAStore | LAStore | FAStore | DAStore | AAStore | BAStore | CAStore | SAStore => {
            pop_offset_vec(stack)?;
            pop_offset_vec(stack)?;
            pop_offset_vec(stack)?;
        }

        Pop => {
            let _ = pop_offset_vec_expecting_width(stack, 1)?;
        }

        Pop2 => {
            let arg1 = pop_offset_vec(stack)?;
            match arg1.width() {
                // Form 1
                1 => {
                    let _ = pop_offset_vec_expecting_width(stack, 1)?;
                }

                // Form 2
                2 => (),

                other => return Err(VerifierErrorKind::InvalidWidth(other)),
            }
        }

        Dup => {
            let arg1 = pop_offset_vec_expecting_width(stack, 1)?;
            stack.push(arg1.clone());
            stack.push(arg1);
        }

        DupX1 => {
            let arg1 = pop_offset_vec_expecting_width(stack, 1)?;
            let arg2 = pop_offset_vec_expecting_width(stack, 1)?;
            stack.push(arg1.clone());
            stack.push(arg2);
            stack.push(arg1);
        }

        DupX2 => {
            let arg1 = pop_offset_vec_expecting_width(stack, 1)?;
            let arg2 = pop_offset_vec(stack)?;
            match arg2.width() {
                // Form 1
                1 => {
                    let arg3 = pop_offset_vec_expecting_width(stack, 1)?;
                    stack.push(arg1.clone());
                    stack.push(arg3);
                    stack.push(arg2);
                    stack.push(arg1);
                }

                // Form 2
                2 => {
                    stack.push(arg1.clone());
                    stack.push(arg2);
                    stack.push(arg1);
                }

                other => return Err(VerifierErrorKind::InvalidWidth(other)),
            }
        }

        Dup2 => {
            let arg1 = pop_offset_vec(stack)?;
            match arg1.width() {
                // Form 1
                1 => {
                    let arg2 = pop_offset_vec_expecting_width(stack, 1)?;
                    stack.push(arg2.clone());
                    stack.push(arg1.clone());
                    stack.push(arg2);
                    stack.push(arg1);
                }

                // Form 2
                2 => {
                    stack.push(arg1.clone());
                    stack.push(arg1);
                }

                other => return Err(VerifierErrorKind::InvalidWidth(other)),
            }
        }

        Dup2X1 => {
            let arg1 = pop_offset_vec(stack)?;
            let arg2 = pop_offset_vec_expecting_width(stack, 1)?;
            match arg1.width() {
                // Form 1
                1 => {
                    let arg3 = pop_offset_vec_expecting_width(stack, 1)?;
                    stack.push(arg2.clone());
                    stack.push(arg1.clone());
                    stack.push(arg3);
                    stack.push(arg2);
                    stack.push(arg1);
                }

                // Form 2
                2 => {
                    stack.push(arg1.clone());
                    stack.push(arg2);
                    stack.push(arg1);
                }

                other => return Err(VerifierErrorKind::InvalidWidth(other)),
            }
        }

        Dup2X2 => {
            let arg1 = pop_offset_vec(stack)?;
            match arg1.width() {
                1 => {
                    let arg2 = pop_offset_vec_expecting_width(stack, 1)?;
                    let arg3 = pop_offset_vec(stack)?;
                    match arg3.width() {
                        // Form 1
                        1 => {
                            let arg4 = pop_offset_vec_expecting_width(stack, 1)?;
                            stack.push(arg2.clone());
                            stack.push(arg1.clone());
                            stack.push(arg4);
                            stack.push(arg3);
                            stack.push(arg2);
                            stack.push(arg1);
                        }

                        // Form 3
                        2 => {
                            stack.push(arg2.clone());
                            stack.push(arg1.clone());
                            stack.push(arg3);
                            stack.push(arg2);
                            stack.push(arg1);
                        }

                        other => return Err(VerifierErrorKind::InvalidWidth(other)),
                    }
                }

                2 => {
                    let arg2 = pop_offset_vec(stack)?;
                    match arg2.width() {
                        // Form 2
                        1 => {
                            let arg3 = pop_offset_vec_expecting_width(stack, 1)?;
                            stack.push(arg1.clone());
                            stack.push(arg3);
                            stack.push(arg2);
                            stack.push(arg1);
                        }

                        // Form 4
                        2 => {
                            stack.push(arg1.clone());
                            stack.push(arg2);
                            stack.push(arg1);
                        }

                        other => return Err(VerifierErrorKind::InvalidWidth(other)),
                    }
                }

                other => return Err(VerifierErrorKind::InvalidWidth(other)),
            }
        }

        Swap => {
            let arg1 = pop_offset_vec_expecting_width(stack, 1)?;
            let arg2 = pop_offset_vec_expecting_width(stack, 1)?;
            stack.push(arg1);
            stack.push(arg2);
        }

        IAdd | ISub | IDiv | IMul | IRem | IAnd | IOr | IXor | ISh(_) => {
            pop_offset_vec(stack)?;
            pop_offset_vec(stack)?;
            stack.push(Integer);
        }

        LAdd | LSub | LDiv | LMul | LRem | LAnd | LOr | LXor | LSh(_) => {
            pop_offset_vec(stack)?;
            pop_offset_vec(stack)?;
            stack.push(Long);
        }

        FAdd | FSub | FDiv | FMul | FRem => {
            pop_offset_vec(stack)?;
            pop_offset_vec(stack)?;
            stack.push(Float);
        }

        DAdd | DSub | DDiv | DMul | DRem => {
            pop_offset_vec(stack)?;
            pop_offset_vec(stack)?;
            stack.push(Double);
        }

        INeg | I2B | I2C | I2S | L2I | F2I | D2I => {
            pop_offset_vec(stack)?;
            stack.push(Integer);
        }

        LNeg | I2L | F2L | D2L => {
            pop_offset_vec(stack)?;
            stack.push(Long);
        }

        FNeg | I2F | L2F | D2F => {
            pop_offset_vec(stack)?;
            stack.push(Float);
        }

        DNeg | I2D | L2D | F2D => {
            pop_offset_vec(stack)?;
            stack.push(Double);
        }

        IInc(_, _) => (),

        LCmp | FCmp(_) | DCmp(_) => {
            pop_offset_vec(stack)?;
            pop_offset_vec(stack)?;
            stack.push(Integer);
        }

        GetStatic(field) => {
            let (_, _, descriptor) = constants
                .field_ref(*field)
                .map_err(|_| missing(*field))?;
            stack.push(VType::from(parse_field_type(descriptor)?));
        }
        PutStatic(_) => {
            pop_offset_vec(stack)?;
        }
        GetField(field) => {
            let (_, _, descriptor) = constants
                .field_ref(*field)
                .map_err(|_| missing(*field))?;
            pop_offset_vec(stack)?;
            stack.push(VType::from(parse_field_type(descriptor)?));
        }
        PutField(_) => {
            pop_offset_vec(stack)?;
            pop_offset_vec(stack)?;
        }

        Invoke(invoke_type, method) => {
            let (_, name, descriptor) = constants
                .method_ref(*method)
                .map_err(|_| missing(*method))?;
            let descriptor = parse_method_descriptor(descriptor)?;

            for _ in &descriptor.parameters {
                pop_offset_vec(stack)?;
            }

            if *invoke_type != InvokeType::Static {
                let receiver = pop_offset_vec(stack)?;

                // Initializing an object changes its type everywhere it occurs
                if name == UnqualifiedName::INIT.as_str() {
                    let initialized = match &receiver {
                        UninitializedThis => Some(Object(RefType::Object(this_class.clone()))),
                        Uninitialized(uninit) => Some(Object(uninit.verification_type.clone())),
                        _ => None,
                    };
                    if let Some(initialized) = initialized {
                        replace_all(stack, &receiver, || initialized.clone());
                        replace_all(locals, &receiver, || initialized.clone());
                    }
                }
            }

            if let Some(return_type) = descriptor.return_type {
                stack.push(VType::from(return_type));
            }
        }

        InvokeDynamic(method) => {
            let (_, descriptor) = constants
                .invoke_dynamic(*method)
                .map_err(|_| missing(*method))?;
            let descriptor = parse_method_descriptor(descriptor)?;

            for _ in &descriptor.parameters {
                pop_offset_vec(stack)?;
            }
            if let Some(return_type) = descriptor.return_type {
                stack.push(VType::from(return_type));
            }
        }

        New(class) => {
            let verification_type = constants
                .class_ref_type(*class)
                .map_err(|_| missing(*class))?;
            stack.push(Uninitialized(UninitializedRefType {
                verification_type,
                offset_in_block: insn_offset_in_basic_block,
                block: current_block,
            }));
        }

        NewArray(base_type) => {
            pop_offset_vec(stack)?;
            stack.push(Object(RefType::array(FieldType::Base(*base_type))));
        }

        ANewArray(class) => {
            let element_type = constants
                .class_ref_type(*class)
                .map_err(|_| missing(*class))?;
            pop_offset_vec(stack)?;
            stack.push(Object(RefType::array(FieldType::Ref(element_type))));
        }

        ArrayLength => {
            pop_offset_vec(stack)?;
            stack.push(Integer);
        }

        CheckCast(class) => {
            let ref_type = constants
                .class_ref_type(*class)
                .map_err(|_| missing(*class))?;
            pop_offset_vec(stack)?;
            stack.push(Object(ref_type));
        }

        InstanceOf(_) => {
            pop_offset_vec(stack)?;
            stack.push(Integer);
        }

        MonitorEnter | MonitorExit => {
            pop_offset_vec(stack)?;
        }

        MultiANewArray(class, dimensions) => {
            let ref_type = constants
                .class_ref_type(*class)
                .map_err(|_| missing(*class))?;
            for _ in 0..*dimensions {
                pop_offset_vec(stack)?;
            }
            stack.push(Object(ref_type));
        }
    }

    Ok(())
}

fn apply_branch_instruction<Lbl, LblWide, LblNext>(
    frame: &mut VerifierFrame,
    insn: &BranchInstruction<Lbl, LblWide, LblNext>,
) -> Result<(), VerifierErrorKind> {
    use BranchInstruction::*;

    let Frame {
        ref mut stack,
        locals: _,
    } = frame;

    match insn {
        If(_, _, _) | IfNull(_, _, _) | TableSwitch { .. } | LookupSwitch { .. } => {
            pop_offset_vec(stack)?;
        }
        IfICmp(_, _, _) | IfACmp(_, _, _) => {
            pop_offset_vec(stack)?;
            pop_offset_vec(stack)?;
        }
        Goto(_) | GotoW(_) | Jsr(_, _) | JsrW(_, _) | Ret(_) | FallThrough(_) => (),
        IReturn | LReturn | FReturn | DReturn | AReturn | AThrow => {
            pop_offset_vec(stack)?;
            stack.clear();
        }
        Return => stack.clear(),
    }

    Ok(())
}

/// Type of the element loaded out of an array by `aaload`
fn array_component_type(array: &VType) -> VType {
    match array {
        VerificationType::Null => VerificationType::Null,
        VerificationType::Object(RefType::ObjectArray(ArrayType {
            additional_dimensions: 0,
            element_type,
        })) => VerificationType::Object(RefType::Object(element_type.clone())),
        VerificationType::Object(RefType::ObjectArray(array_type)) => {
            VerificationType::Object(RefType::ObjectArray(ArrayType {
                additional_dimensions: array_type.additional_dimensions - 1,
                element_type: array_type.element_type.clone(),
            }))
        }
        VerificationType::Object(RefType::PrimitiveArray(array_type))
            if array_type.additional_dimensions > 0 =>
        {
            VerificationType::Object(RefType::PrimitiveArray(ArrayType {
                additional_dimensions: array_type.additional_dimensions - 1,
                element_type: array_type.element_type,
            }))
        }
        _ => VerificationType::Object(RefType::Object(BinaryName::OBJECT)),
    }
}

/// Type of a constant loaded with `ldc`, `ldc_w`, or `ldc2_w`
fn loadable_constant(
    constants: &ConstantsPool,
    index: ConstantIndex,
    expected_width: usize,
) -> Result<VType, VerifierErrorKind> {
    let object = |name: BinaryName| VerificationType::Object(RefType::Object(name));
    let typ = match constants.get(index) {
        None => return Err(VerifierErrorKind::MissingConstant(index)),
        Some(Constant::Integer(_)) => VerificationType::Integer,
        Some(Constant::Float(_)) => VerificationType::Float,
        Some(Constant::Long(_)) => VerificationType::Long,
        Some(Constant::Double(_)) => VerificationType::Double,
        Some(Constant::String(_)) => object(BinaryName::STRING),
        Some(Constant::Class(_)) => object(BinaryName::CLASS),
        Some(Constant::MethodHandle { .. }) => object(BinaryName::METHODHANDLE),
        Some(Constant::MethodType { .. }) => object(BinaryName::METHODTYPE),
        Some(Constant::Dynamic { name_and_type, .. }) => {
            let (_, descriptor) = constants
                .name_and_type(*name_and_type)
                .map_err(|_| VerifierErrorKind::MissingConstant(index))?;
            VType::from(parse_field_type(descriptor)?)
        }
        Some(other) => return Err(VerifierErrorKind::NotLoadableConstant(other.clone())),
    };
    if typ.width() == expected_width {
        Ok(typ)
    } else {
        Err(VerifierErrorKind::InvalidWidth(typ.width()))
    }
}

fn missing(index: impl Into<ConstantIndex>) -> VerifierErrorKind {
    VerifierErrorKind::MissingConstant(index.into())
}

fn parse_field_type(descriptor: &str) -> Result<FieldType<BinaryName>, VerifierErrorKind> {
    FieldType::parse(descriptor).map_err(|_| VerifierErrorKind::BadDescriptor(descriptor.to_owned()))
}

fn parse_method_descriptor(
    descriptor: &str,
) -> Result<MethodDescriptor<BinaryName>, VerifierErrorKind> {
    MethodDescriptor::parse(descriptor)
        .map_err(|_| VerifierErrorKind::BadDescriptor(descriptor.to_owned()))
}

fn replace_all<C: Eq, U: Eq>(
    offset_vec: &mut OffsetVec<VerificationType<C, U>>,
    original: &VerificationType<C, U>,
    updated: impl Fn() -> VerificationType<C, U>,
) {
    let mut replaced: OffsetVec<VerificationType<C, U>> = std::mem::take(offset_vec)
        .into_iter()
        .map(|(_, _, ty)| if ty == *original { updated() } else { ty })
        .collect();

    std::mem::swap(offset_vec, &mut replaced);
}

/// Overwrite the local at `offset`, invalidating any wide local that gets partially clobbered
///
/// The result never ends in `Top`.
pub fn set_local(locals: &mut OffsetVec<VType>, offset: u16, new_type: VType) {
    let offset = offset as usize;
    let width = new_type.width();

    let mut slots = local_slots(std::mem::take(locals));
    if slots.len() < offset + width {
        slots.resize(offset + width, VerificationType::Top);
    }

    if offset > 0 && slots[offset - 1].width() == 2 {
        slots[offset - 1] = VerificationType::Top;
    }
    slots[offset] = new_type;
    if width == 2 {
        slots[offset + 1] = VerificationType::Top;
    }

    *locals = compress_slots(slots);
}

/// One entry per slot, with `Top` standing in for the second half of wide values
pub(super) fn local_slots(locals: OffsetVec<VType>) -> Vec<VType> {
    let mut slots: Vec<VType> = vec![];
    for (_, _, typ) in locals {
        let is_wide = typ.width() == 2;
        slots.push(typ);
        if is_wide {
            slots.push(VerificationType::Top);
        }
    }
    slots
}

/// Inverse of [`local_slots`], also dropping trailing `Top`s
pub(super) fn compress_slots(slots: Vec<VType>) -> OffsetVec<VType> {
    let mut locals = OffsetVec::new();
    let mut slots = slots.into_iter();
    while let Some(typ) = slots.next() {
        if typ.width() == 2 {
            slots.next();
        }
        locals.push(typ);
    }
    while let Some((_, VerificationType::Top)) = locals.last() {
        locals.pop();
    }
    locals
}

fn pop_offset_vec(stack: &mut OffsetVec<VType>) -> Result<VType, VerifierErrorKind> {
    stack
        .pop()
        .map(|(_, typ)| typ)
        .ok_or(VerifierErrorKind::EmptyStack)
}

fn pop_offset_vec_expecting_width(
    stack: &mut OffsetVec<VType>,
    expected_width: usize,
) -> Result<VType, VerifierErrorKind> {
    let typ = pop_offset_vec(stack)?;
    let found_width = typ.width();
    if found_width == expected_width {
        Ok(typ)
    } else {
        Err(VerifierErrorKind::InvalidWidth(found_width))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_file::Deserialize;
    use crate::jvm::code::Instruction::*;
    use VerificationType::*;

    fn new_frame<const N: usize, const M: usize>(
        locals: [VType; N],
        stack: [VType; M],
    ) -> VerifierFrame {
        Frame {
            locals: OffsetVec::from(locals),
            stack: OffsetVec::from(stack),
        }
    }

    fn object(name: &str) -> VType {
        Object(RefType::Object(BinaryName::from_string(name.to_owned()).unwrap()))
    }

    fn apply(frame: &mut VerifierFrame, insn: SerializableInstruction, constants: &ConstantsPool) {
        let this_class = BinaryName::from_string(String::from("Foo")).unwrap();
        frame
            .apply_instruction(&insn, Offset(0), SynLabel::START, constants, &this_class)
            .unwrap();
    }

    #[test]
    fn storing_over_wide_locals() {
        let mut locals: OffsetVec<VType> = OffsetVec::from([Integer, Long, Float]);

        // Overwrite the second half of the long
        set_local(&mut locals, 2, Integer);
        assert_eq!(locals, OffsetVec::from([Integer, Top, Integer, Float]));

        // Wide store that clobbers two narrow locals
        set_local(&mut locals, 2, Double);
        assert_eq!(locals, OffsetVec::from([Integer, Top, Double]));

        // Storing past the end pads with `Top`
        set_local(&mut locals, 6, Float);
        assert_eq!(locals, OffsetVec::from([Integer, Top, Double, Top, Top, Float]));

        // Trailing `Top` locals disappear
        set_local(&mut locals, 6, Top);
        assert_eq!(locals, OffsetVec::from([Integer, Top, Double]));
    }

    #[test]
    fn dup_forms() {
        let constants = ConstantsPool::new();

        let mut frame = new_frame([], [Integer, Long]);
        apply(&mut frame, Dup2X1, &constants);
        assert_eq!(frame, new_frame([], [Long, Integer, Long]));

        let mut frame = new_frame([], [Float, Integer, Null]);
        apply(&mut frame, Dup2X1, &constants);
        assert_eq!(frame, new_frame([], [Integer, Null, Float, Integer, Null]));

        let mut frame = new_frame([], [Double, Long]);
        apply(&mut frame, Dup2X2, &constants);
        assert_eq!(frame, new_frame([], [Long, Double, Long]));

        let mut frame = new_frame([], [Long]);
        let this_class = BinaryName::OBJECT;
        assert!(matches!(
            frame.apply_instruction(&Dup, Offset(0), SynLabel::START, &constants, &this_class),
            Err(VerifierErrorKind::InvalidWidth(2))
        ));
        assert!(matches!(
            new_frame([], []).apply_instruction(
                &Pop,
                Offset(0),
                SynLabel::START,
                &constants,
                &this_class
            ),
            Err(VerifierErrorKind::EmptyStack)
        ));
    }

    #[test]
    fn constructor_call_initializes_every_copy() {
        let mut constants = ConstantsPool::new();
        let object_class = constants.get_class(&RefType::Object(BinaryName::OBJECT)).unwrap();
        let init = constants.get_utf8("<init>").unwrap();
        let void = constants.get_utf8("()V").unwrap();
        let name_and_type = constants.get_name_and_type(init, void).unwrap();
        let object_init = constants
            .get_method_ref(object_class, name_and_type, false)
            .unwrap();

        let mut frame = new_frame([UninitializedThis, Integer], [UninitializedThis]);
        apply(&mut frame, ALoad(0), &constants);
        apply(&mut frame, Invoke(InvokeType::Special, object_init), &constants);
        assert_eq!(frame, new_frame([object("Foo"), Integer], [object("Foo")]));

        let mut frame = new_frame([], []);
        apply(&mut frame, New(object_class), &constants);
        apply(&mut frame, Dup, &constants);
        apply(&mut frame, Invoke(InvokeType::Special, object_init), &constants);
        assert_eq!(frame, new_frame([], [object("java/lang/Object")]));
    }

    #[test]
    fn array_loads_track_component_types() {
        let mut constants = ConstantsPool::new();
        let strings = constants
            .get_class(&RefType::Object(BinaryName::STRING))
            .unwrap();

        let mut frame = new_frame([], [Integer]);
        apply(&mut frame, ANewArray(strings), &constants);
        apply(&mut frame, IConst0, &constants);
        apply(&mut frame, AALoad, &constants);
        assert_eq!(frame, new_frame([], [object("java/lang/String")]));

        let mut frame = new_frame([], [Null, Integer]);
        apply(&mut frame, AALoad, &constants);
        assert_eq!(frame, new_frame([], [Null]));
    }

    #[test]
    fn entry_frames() {
        let header = MethodHeader {
            class: BinaryName::from_string(String::from("Foo")).unwrap(),
            name: UnqualifiedName::INIT,
            descriptor: MethodDescriptor::parse("(JI)V").unwrap(),
            is_static: false,
        };
        assert_eq!(header.entry_frame(), new_frame([UninitializedThis, Long, Integer], []));
        assert_eq!(header.parameter_length(), 4);

        let header = MethodHeader {
            is_static: true,
            name: UnqualifiedName::from_string(String::from("run")).unwrap(),
            ..header
        };
        assert_eq!(header.entry_frame(), new_frame([Long, Integer], []));
    }

    #[test]
    fn compressed_stack_map_frames() {
        let class = ClassConstantIndex::deserialize(&mut &[0u8, 7][..]).unwrap();
        let frame = |locals: Vec<VerificationType<ClassConstantIndex, u16>>,
                     stack: Vec<VerificationType<ClassConstantIndex, u16>>| Frame {
            locals: locals.into_iter().collect(),
            stack: stack.into_iter().collect(),
        };
        let previous = frame(vec![Object(class), Integer], vec![]);

        assert_eq!(
            previous.stack_map_frame(3, &previous),
            StackMapFrame::SameLocalsNoStack { offset_delta: 3 }
        );
        assert_eq!(
            frame(vec![Object(class)], vec![]).stack_map_frame(3, &previous),
            StackMapFrame::ChopLocalsNoStack {
                offset_delta: 3,
                chopped_k: 1
            }
        );
        assert_eq!(
            frame(vec![Object(class), Integer, Long], vec![]).stack_map_frame(3, &previous),
            StackMapFrame::AppendLocalsNoStack {
                offset_delta: 3,
                locals: vec![Long]
            }
        );
        assert_eq!(
            frame(vec![Object(class), Integer], vec![Integer]).stack_map_frame(3, &previous),
            StackMapFrame::SameLocalsOneStack {
                offset_delta: 3,
                stack: Integer
            }
        );
        assert_eq!(
            frame(vec![Integer], vec![]).stack_map_frame(3, &previous),
            StackMapFrame::Full {
                offset_delta: 3,
                locals: vec![Integer],
                stack: vec![]
            }
        );
    }
}
