use super::{helper, Error, HELPER_DESCRIPTOR, HELPER_NAME};
use crate::jvm::class_file::{ClassFile, Code as CodeAttribute, ConstantsPool, Method, Version};
use crate::jvm::code::{
    BasicBlock, BranchInstruction, BranchKind, Code, CodeBlock, Instruction, InvokeType,
    LabelGenerator, OrdComparison, SynLabel, SynLabelGenerator,
};
use crate::jvm::verifier::MethodHeader;
use crate::jvm::{BinaryName, MethodRefConstantIndex, Name, RefType};
use crate::util::{Offset, OffsetVec};
use log::debug;
use std::collections::HashMap;

/// Instrument every conditional branch of a class and append the helper method
///
/// The input is fully parsed before anything is rewritten, and the output is only produced once
/// every method has been rewritten successfully.
pub fn instrument_class(bytes: &[u8]) -> Result<Vec<u8>, Error> {
    let mut class = ClassFile::parse(bytes).map_err(Error::Parse)?;
    let mut constants = ConstantsPool::from_offset_vec(std::mem::take(&mut class.constants));

    let type_context = TypeContext::new(&class, &mut constants)?;
    for method in &mut class.methods {
        rewrite_method(&type_context, method, &mut constants)?;
    }
    let helper = helper::helper_method(&type_context, &mut constants)?;
    class.methods.push(helper);

    class.constants = constants.into_offset_vec();
    Ok(class.to_bytes()?)
}

/// What the rewriter knows about the class whose methods it is visiting
#[derive(Debug)]
pub struct TypeContext {
    /// Binary name of the class (owner of the helper method)
    pub class_name: BinaryName,

    /// Reference to the helper method (an interface method ref when the class is an interface)
    pub helper_method: MethodRefConstantIndex,

    pub version: Version,
}

impl TypeContext {
    /// Check that the class can be instrumented and register the helper method reference
    pub fn new(class: &ClassFile, constants: &mut ConstantsPool) -> Result<TypeContext, Error> {
        let class_name = match constants.class_ref_type(class.this_class)? {
            RefType::Object(name) => name,
            other => {
                return Err(Error::Precondition(format!(
                    "class constant names the array type {:?}",
                    other
                )))
            }
        };

        if class.is_interface() && !class.version.allows_static_interface_methods() {
            return Err(Error::UnsupportedConstruct(format!(
                "interface {} has version {} which cannot hold static methods with code",
                class_name.as_str(),
                class.version.major_version
            )));
        }
        for method in &class.methods {
            let name = constants.utf8(method.name_index)?;
            let descriptor = constants.utf8(method.descriptor_index)?;
            if name == HELPER_NAME && descriptor == HELPER_DESCRIPTOR {
                return Err(Error::UnsupportedConstruct(format!(
                    "class {} already declares {}{}",
                    class_name.as_str(),
                    HELPER_NAME,
                    HELPER_DESCRIPTOR
                )));
            }
        }

        let owner = constants.get_class(&RefType::Object(class_name.clone()))?;
        let name = constants.get_utf8(HELPER_NAME)?;
        let descriptor = constants.get_utf8(HELPER_DESCRIPTOR)?;
        let name_and_type = constants.get_name_and_type(name, descriptor)?;
        let helper_method = constants.get_method_ref(owner, name_and_type, class.is_interface())?;

        Ok(TypeContext {
            class_name,
            helper_method,
            version: class.version,
        })
    }
}

/// State of the rewriter while it visits the terminators of one method
pub struct MethodContext<'t> {
    type_context: &'t TypeContext,

    /// Name and descriptor, for diagnostics
    method: String,

    label_generator: SynLabelGenerator,

    /// Number of conditional branches instrumented so far
    conditionals: usize,
}

impl<'t> MethodContext<'t> {
    pub fn new(
        type_context: &'t TypeContext,
        header: &MethodHeader,
        label_generator: SynLabelGenerator,
    ) -> MethodContext<'t> {
        let method = format!(
            "{}.{}{}",
            type_context.class_name.as_str(),
            header.name.as_str(),
            crate::jvm::RenderDescriptor::render(&header.descriptor)
        );
        MethodContext {
            type_context,
            method,
            label_generator,
            conditionals: 0,
        }
    }

    /// Rewrite one block based on its terminator
    ///
    /// The result replaces the block in the layout, starting with the block itself (under the
    /// same label). A conditional jump `if<cond> T` falling through to `N` becomes:
    ///
    /// ```text
    ///         if<cond> then
    /// else:   iconst_1
    ///         goto join
    /// then:   iconst_0
    /// join:   invokestatic __CONDITION__METHOD(Z)Z
    ///         ifeq T
    /// N:      ...
    /// ```
    ///
    /// `offset` is where the terminator was in the original code.
    pub fn visit_terminator(
        &mut self,
        label: SynLabel,
        mut block: CodeBlock,
        offset: usize,
    ) -> Result<Vec<(SynLabel, CodeBlock)>, Error> {
        match block.branch_end.kind() {
            BranchKind::UnconditionalJump | BranchKind::Other => Ok(vec![(label, block)]),

            BranchKind::MultiWayBranch(_) => Err(Error::UnsupportedConstruct(format!(
                "`{}` at offset {} in {}",
                block.branch_end.mnemonic(),
                offset,
                self.method
            ))),

            BranchKind::ConditionalJump(target) => {
                let next = block.branch_end.fallthrough_target().ok_or_else(|| {
                    Error::Precondition(format!(
                        "conditional jump at offset {} in {} has no fall through",
                        offset, self.method
                    ))
                })?;

                let else_label = self.label_generator.fresh_label();
                let then_label = self.label_generator.fresh_label();
                let join_label = self.label_generator.fresh_label();

                // Same condition, just redirected
                block.branch_end = block
                    .branch_end
                    .map_labels(|_| then_label, |lbl| *lbl, |_| else_label);

                let else_block = BasicBlock {
                    frame: None,
                    instructions: OffsetVec::from([Instruction::IConst1]),
                    branch_end: BranchInstruction::Goto(join_label),
                };
                let then_block = BasicBlock {
                    frame: None,
                    instructions: OffsetVec::from([Instruction::IConst0]),
                    branch_end: BranchInstruction::FallThrough(join_label),
                };
                let join_block = BasicBlock {
                    frame: None,
                    instructions: OffsetVec::from([Instruction::Invoke(
                        InvokeType::Static,
                        self.type_context.helper_method,
                    )]),
                    branch_end: BranchInstruction::If(OrdComparison::EQ, target, next),
                };

                self.conditionals += 1;
                Ok(vec![
                    (label, block),
                    (else_label, else_block),
                    (then_label, then_block),
                    (join_label, join_block),
                ])
            }
        }
    }
}

/// Rewrite the body of one method in place (methods without code are left alone)
pub fn rewrite_method(
    type_context: &TypeContext,
    method: &mut Method,
    constants: &mut ConstantsPool,
) -> Result<(), Error> {
    let position = match method.code_attribute_position(constants)? {
        Some(position) => position,
        None => return Ok(()),
    };
    let header = MethodHeader::from_method(&type_context.class_name, method, constants)?;
    let attribute: CodeAttribute = method.attributes[position].decode()?;
    let mut code = Code::decode(&attribute, constants, &header)?;

    // Offsets in the original code, for error messages
    let offsets: HashMap<SynLabel, Offset> =
        BasicBlock::compute_block_offsets(&code.block_order, &code.blocks);

    let label_generator = code.label_generator.clone();
    let mut context = MethodContext::new(type_context, &header, label_generator);
    let mut block_order = Vec::with_capacity(code.block_order.len());
    for label in std::mem::take(&mut code.block_order) {
        let block = code.blocks.remove(&label).ok_or_else(|| {
            Error::Precondition(format!("{} has no block {:?}", context.method, label))
        })?;
        let start = offsets.get(&label).ok_or_else(|| {
            Error::Precondition(format!("{} has no offset for {:?}", context.method, label))
        })?;
        let offset = start.0 + block.instructions.offset_len().0;
        for (new_label, new_block) in context.visit_terminator(label, block, offset)? {
            block_order.push(new_label);
            code.blocks.insert(new_label, new_block);
        }
    }
    code.block_order = block_order;
    code.label_generator = context.label_generator;
    debug!(
        "Instrumented {} conditional branches in {}",
        context.conditionals, context.method
    );

    let rewritten = code.serialize_code(&header, constants, type_context.version)?;
    method.attributes[position] = constants.get_attribute(rewritten)?;
    Ok(())
}
