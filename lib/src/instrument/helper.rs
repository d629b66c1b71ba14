use super::rewriter::TypeContext;
use super::{Error, HELPER_DESCRIPTOR, HELPER_NAME, HELPER_PARAMETER};
use crate::jvm::class_file::{ConstantsPool, Method};
use crate::jvm::code::{BranchInstruction, Code, Instruction, LocalVariableRange};
use crate::jvm::verifier::MethodHeader;
use crate::jvm::{BaseType, FieldType, MethodAccessFlags, MethodDescriptor, Name, UnqualifiedName};
use crate::util::OffsetVec;

/// Make `public static boolean __CONDITION__METHOD(boolean arg) { return arg; }`
///
/// The body goes through the same serialization as rewritten methods, which works out the maximum
/// stack and locals (both 1).
pub fn helper_method(
    type_context: &TypeContext,
    constants: &mut ConstantsPool,
) -> Result<Method, Error> {
    let header = MethodHeader {
        class: type_context.class_name.clone(),
        name: UnqualifiedName::from_string(String::from(HELPER_NAME))
            .map_err(Error::Precondition)?,
        descriptor: MethodDescriptor {
            parameters: vec![FieldType::Base(BaseType::Boolean)],
            return_type: Some(FieldType::Base(BaseType::Boolean)),
        },
        is_static: true,
    };

    let mut code = Code::single_block(
        OffsetVec::from([Instruction::ILoad(0)]),
        BranchInstruction::IReturn,
    );
    code.local_variables.push(LocalVariableRange {
        start: code.block_order[0],
        end: code.end_label,
        name_index: constants.get_utf8(HELPER_PARAMETER)?,
        descriptor_index: constants.get_utf8("Z")?,
        index: 0,
    });
    let code = code.serialize_code(&header, constants, type_context.version)?;

    Ok(Method {
        access_flags: MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
        name_index: constants.get_utf8(HELPER_NAME)?,
        descriptor_index: constants.get_utf8(HELPER_DESCRIPTOR)?,
        attributes: vec![constants.get_attribute(code)?],
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_file::{
        AttributeLike, BytecodeIndex, Code as CodeAttribute, Deserialize, LocalVariable,
        LocalVariableTable, Version,
    };
    use crate::jvm::{BinaryName, MethodRefConstantIndex};

    fn helper() -> (Method, ConstantsPool) {
        let mut constants = ConstantsPool::new();
        let type_context = TypeContext {
            class_name: BinaryName::from_string(String::from("a/Foo")).unwrap(),
            helper_method: MethodRefConstantIndex::deserialize(&mut &[0u8, 1][..]).unwrap(),
            version: Version::JAVA8,
        };
        let method = helper_method(&type_context, &mut constants).unwrap();
        (method, constants)
    }

    #[test]
    fn identity_on_booleans() {
        let (method, constants) = helper();
        assert_eq!(
            method.access_flags,
            MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC
        );
        assert_eq!(constants.utf8(method.name_index).unwrap(), "__CONDITION__METHOD");
        assert_eq!(constants.utf8(method.descriptor_index).unwrap(), "(Z)Z");
        assert_eq!(method.attributes.len(), 1);

        let code: CodeAttribute = method.attributes[0].decode().unwrap();
        assert_eq!(code.code_array.0, vec![0x1a, 0xac]);
        assert_eq!(code.max_stack, 1);
        assert_eq!(code.max_locals, 1);
        assert!(code.exception_table.is_empty());

        // Only the local variable table: no jumps means no stack map frames
        assert_eq!(code.attributes.len(), 1);
        assert_eq!(
            constants.utf8(code.attributes[0].name_index).unwrap(),
            LocalVariableTable::NAME
        );
        let table: LocalVariableTable = code.attributes[0].decode().unwrap();
        let entry: &LocalVariable = &table.0[0];
        assert_eq!(entry.start_pc, BytecodeIndex(0));
        assert_eq!(entry.length, 2);
        assert_eq!(entry.index, 0);
        assert_eq!(constants.utf8(entry.name_index).unwrap(), "arg");
        assert_eq!(constants.utf8(entry.descriptor_index).unwrap(), "Z");
    }
}
