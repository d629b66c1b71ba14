use crate::jvm::class_file::{invalid_data, ClassConstantIndex, ConstantsPool, Deserialize, Serialize};
use crate::jvm::code::SynLabel;
use crate::jvm::{BaseType, BinaryName, Error, FieldType, RefType};
use crate::util::{Offset, Width};
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::collections::HashMap;

/// These types are from [this hierarchy][0]
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se7/html/jvms-4.html#jvms-4.10.1.2
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub enum VerificationType<Cls, U> {
    /// Unusable slot (unset locals, the second half of a wide local, return addresses)
    Top,

    Integer,
    Float,
    Double,
    Long,
    Null,

    /// In the constructor, the `this` parameter starts with this type then turns into an object
    /// type after `<init>` is called
    UninitializedThis,

    /// Object type
    Object(Cls),

    /// State of an object after `new` has been called by `<init>` has not been called
    ///
    ///   - while analyzing the CFG, we use `UninitializedRefType` for `U`, tracking the type of
    ///     the uninitialized object (which we get from the `new` instruction) and the offset of
    ///     the `new` instruction in that basic block.
    ///   - when serializing into a classfile, we use `u16` for `U`, corresponding to the offset of
    ///     the `new` instruction from the start of the method body
    Uninitialized(U),
}

/// Verification type used while analyzing method bodies
pub type VType = VerificationType<RefType<BinaryName>, UninitializedRefType>;

impl<Cls, U> VerificationType<Cls, U> {
    /// Is this type is a reference type?
    pub fn is_reference(&self) -> bool {
        match self {
            VerificationType::Top
            | VerificationType::Integer
            | VerificationType::Float
            | VerificationType::Double
            | VerificationType::Long => false,

            VerificationType::Null
            | VerificationType::UninitializedThis
            | VerificationType::Object(_)
            | VerificationType::Uninitialized(_) => true,
        }
    }

    pub fn map<C2, U2>(
        &self,
        map_class: impl Fn(&Cls) -> C2,
        map_uninitialized: impl Fn(&U) -> U2,
    ) -> VerificationType<C2, U2> {
        match self {
            VerificationType::Top => VerificationType::Top,
            VerificationType::Integer => VerificationType::Integer,
            VerificationType::Float => VerificationType::Float,
            VerificationType::Long => VerificationType::Long,
            VerificationType::Double => VerificationType::Double,
            VerificationType::Null => VerificationType::Null,
            VerificationType::UninitializedThis => VerificationType::UninitializedThis,
            VerificationType::Object(cls) => VerificationType::Object(map_class(cls)),
            VerificationType::Uninitialized(uninit) => {
                VerificationType::Uninitialized(map_uninitialized(uninit))
            }
        }
    }
}

impl<C, U> From<FieldType<C>> for VerificationType<RefType<C>, U> {
    fn from(field_type: FieldType<C>) -> Self {
        match field_type {
            FieldType::Base(BaseType::Int)
            | FieldType::Base(BaseType::Char)
            | FieldType::Base(BaseType::Short)
            | FieldType::Base(BaseType::Byte)
            | FieldType::Base(BaseType::Boolean) => VerificationType::Integer,
            FieldType::Base(BaseType::Float) => VerificationType::Float,
            FieldType::Base(BaseType::Long) => VerificationType::Long,
            FieldType::Base(BaseType::Double) => VerificationType::Double,
            FieldType::Ref(ref_type) => VerificationType::Object(ref_type),
        }
    }
}

impl Serialize for VerificationType<ClassConstantIndex, u16> {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        match self {
            VerificationType::Top => 0u8.serialize(writer)?,
            VerificationType::Integer => 1u8.serialize(writer)?,
            VerificationType::Float => 2u8.serialize(writer)?,
            VerificationType::Double => 3u8.serialize(writer)?,
            VerificationType::Long => 4u8.serialize(writer)?,
            VerificationType::Null => 5u8.serialize(writer)?,
            VerificationType::UninitializedThis => 6u8.serialize(writer)?,
            VerificationType::Object(cls) => {
                7u8.serialize(writer)?;
                cls.serialize(writer)?;
            }
            VerificationType::Uninitialized(off) => {
                8u8.serialize(writer)?;
                off.serialize(writer)?;
            }
        };
        Ok(())
    }
}

impl Deserialize for VerificationType<ClassConstantIndex, u16> {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        Ok(match u8::deserialize(reader)? {
            0 => VerificationType::Top,
            1 => VerificationType::Integer,
            2 => VerificationType::Float,
            3 => VerificationType::Double,
            4 => VerificationType::Long,
            5 => VerificationType::Null,
            6 => VerificationType::UninitializedThis,
            7 => VerificationType::Object(ClassConstantIndex::deserialize(reader)?),
            8 => VerificationType::Uninitialized(u16::deserialize(reader)?),
            other => return Err(invalid_data(format!("unknown verification type tag {}", other))),
        })
    }
}

impl<Cls, A> Width for VerificationType<Cls, A> {
    fn width(&self) -> usize {
        match self {
            VerificationType::Double | VerificationType::Long => 2,
            _ => 1,
        }
    }
}

impl VType {
    /// Resolve the type into its serializable form
    pub fn into_serializable(
        &self,
        constants_pool: &mut ConstantsPool,
        block_offsets: &HashMap<SynLabel, Offset>,
    ) -> Result<VerificationType<ClassConstantIndex, u16>, Error> {
        match self {
            VerificationType::Top => Ok(VerificationType::Top),
            VerificationType::Integer => Ok(VerificationType::Integer),
            VerificationType::Float => Ok(VerificationType::Float),
            VerificationType::Long => Ok(VerificationType::Long),
            VerificationType::Double => Ok(VerificationType::Double),
            VerificationType::Null => Ok(VerificationType::Null),
            VerificationType::UninitializedThis => Ok(VerificationType::UninitializedThis),
            VerificationType::Object(ref_type) => {
                let class_index = constants_pool.get_class(ref_type)?;
                Ok(VerificationType::Object(class_index))
            }
            VerificationType::Uninitialized(uninitialized_ref_type) => {
                let absolute_block_offset = block_offsets
                    .get(&uninitialized_ref_type.block)
                    .copied()
                    .ok_or_else(|| {
                        Error::Malformed(format!(
                            "uninitialized value created in unknown block {:?}",
                            uninitialized_ref_type.block
                        ))
                    })?;
                let offset_in_block = uninitialized_ref_type.offset_in_block.0;
                let absolute_offset = absolute_block_offset.0 + offset_in_block;
                Ok(VerificationType::Uninitialized(absolute_offset as u16))
            }
        }
    }
}

/// After a `new` instruction, the top of the stack will contain an uninitialized value. Although
/// ultimately the stack map frame will contain only an absolute offset into the code array where
/// that `new` instruction is located, that's not something that is convenient to track while
/// rewriting code.
///
///   - we don't yet know what the offset of the `new` instruction will really be (it could even
///     wiggle around a bit thanks to needing to widen some jumps)
///
///   - we want to store information about the type that will be there _once_ it is initialized
///     (eg. so `<init>` can replace it with the right object type)
///
/// Every `new` starts its own basic block, so `offset_in_block` is usually zero.
#[derive(PartialEq, Eq, Hash, Clone, Debug)]
pub struct UninitializedRefType {
    /// Once the type is initialized, what will it be?
    pub verification_type: RefType<BinaryName>,

    /// Offset of the `new` instruction from the start of the basic block containing it
    pub offset_in_block: Offset,

    /// Label of the basic block containing the `new` instruction
    pub block: SynLabel,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn top_is_tag_zero() {
        let mut buffer = vec![];
        VerificationType::<ClassConstantIndex, u16>::Top
            .serialize(&mut buffer)
            .unwrap();
        assert_eq!(buffer, vec![0]);

        let parsed =
            VerificationType::<ClassConstantIndex, u16>::deserialize(&mut &[8u8, 0, 12][..])
                .unwrap();
        assert_eq!(parsed, VerificationType::Uninitialized(12));
        assert!(!VerificationType::<ClassConstantIndex, u16>::Top.is_reference());
    }
}
