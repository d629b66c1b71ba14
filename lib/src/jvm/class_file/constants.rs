use crate::jvm::class_file::{invalid_data, Attribute, AttributeLike, Deserialize, Serialize};
use crate::jvm::descriptors::{ParseDescriptor, RenderDescriptor};
use crate::jvm::names::Name;
use crate::jvm::{BinaryName, Error, RefType};
use crate::util::{Offset, OffsetVec, Width};
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::borrow::{Borrow, Cow};
use std::collections::HashMap;
use std::result::Result;

/// Class file constants pool
///
/// The pool is seeded with the constants of a parsed class and is append only from then on: the
/// indices of existing constants never move, so code referring to them stays valid. Only after
/// the pool is fully built up can it be consumed into a regular [`OffsetVec`].
pub struct ConstantsPool {
    constants: OffsetVec<Constant>,

    classes: HashMap<String, ClassConstantIndex>,
    methodrefs: HashMap<(ClassConstantIndex, NameAndTypeConstantIndex, bool), MethodRefConstantIndex>,
    name_and_types: HashMap<(Utf8ConstantIndex, Utf8ConstantIndex), NameAndTypeConstantIndex>,
    utf8s: HashMap<String, Utf8ConstantIndex>,
}

impl ConstantsPool {
    /// Make a fresh empty constants pool
    pub fn new() -> ConstantsPool {
        ConstantsPool::from_offset_vec(OffsetVec::new_starting_at(Offset(1)))
    }

    /// Wrap the constants of an existing class file
    ///
    /// Duplicate entries are legal in class files. Lookups resolve to the first occurrence.
    pub fn from_offset_vec(constants: OffsetVec<Constant>) -> ConstantsPool {
        let mut pool = ConstantsPool {
            constants: OffsetVec::new_starting_at(Offset(1)),
            classes: HashMap::new(),
            methodrefs: HashMap::new(),
            name_and_types: HashMap::new(),
            utf8s: HashMap::new(),
        };

        for (Offset(offset), _, constant) in &constants {
            let idx = ConstantIndex(offset as u16);
            match constant {
                Constant::Utf8(string) => {
                    pool.utf8s
                        .entry(string.clone())
                        .or_insert(Utf8ConstantIndex(idx));
                }
                Constant::NameAndType { name, descriptor } => {
                    pool.name_and_types
                        .entry((*name, *descriptor))
                        .or_insert(NameAndTypeConstantIndex(idx));
                }
                Constant::MethodRef {
                    class,
                    name_and_type,
                    is_interface,
                } => {
                    pool.methodrefs
                        .entry((*class, *name_and_type, *is_interface))
                        .or_insert(MethodRefConstantIndex(idx));
                }
                _ => (),
            }
        }

        // Class names need the utf8 entries, which may come later in the pool
        for (Offset(offset), _, constant) in &constants {
            if let Constant::Class(name) = constant {
                if let Some(Constant::Utf8(name)) = constants.get_offset(Offset(name.0 .0 as usize)) {
                    pool.classes
                        .entry(name.clone())
                        .or_insert(ClassConstantIndex(ConstantIndex(offset as u16)));
                }
            }
        }

        pool.constants = constants;
        pool
    }

    /// Push a constant into the constant pool, provided there is space for it
    ///
    /// Note: the largest valid index is 65536, indexing starts at 1, and some constants take two
    /// spaces.
    fn push_constant(&mut self, constant: Constant) -> Result<ConstantIndex, ConstantPoolOverflow> {
        // Compute the offset at which this constant will be inserted
        let offset: u16 = self.constants.offset_len().0 as u16;

        // Detect if the next constant would overflow the pool
        if offset.checked_add(constant.width() as u16).is_none() {
            return Err(ConstantPoolOverflow { constant, offset });
        }

        self.constants.push(constant);
        Ok(ConstantIndex(offset))
    }

    /// Consume the pool and return the final vector of constants
    pub fn into_offset_vec(self) -> OffsetVec<Constant> {
        self.constants
    }

    /// Get or insert a utf8 constant from the constant pool
    pub fn get_utf8<'a, S: Into<Cow<'a, str>>>(
        &mut self,
        utf8: S,
    ) -> Result<Utf8ConstantIndex, ConstantPoolOverflow> {
        let cow = utf8.into();

        if let Some(idx) = self.utf8s.get::<str>(cow.borrow()) {
            Ok(*idx)
        } else {
            let owned = cow.into_owned();
            let constant = Constant::Utf8(owned.clone());
            let idx = Utf8ConstantIndex(self.push_constant(constant)?);
            self.utf8s.insert(owned, idx);
            Ok(idx)
        }
    }

    /// Get or insert a class constant from the constant pool
    ///
    /// When making a `CONSTANT_Class_info`, reference types are almost always objects. However,
    /// there are a handful of places where an array type needs to be fit in (eg. a stack map
    /// frame entry for an array). See [JVMS 4.4.1][0].
    ///
    /// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.4.1
    pub fn get_class(
        &mut self,
        class: &RefType<BinaryName>,
    ) -> Result<ClassConstantIndex, ConstantPoolOverflow> {
        let name: String = match class {
            RefType::Object(name) => name.as_str().to_owned(),
            other => other.render(),
        };
        if let Some(idx) = self.classes.get(&name) {
            Ok(*idx)
        } else {
            let name_utf8 = self.get_utf8(name.as_str())?;
            let idx = ClassConstantIndex(self.push_constant(Constant::Class(name_utf8))?);
            self.classes.insert(name, idx);
            Ok(idx)
        }
    }

    /// Get or insert a name & type constant from the constant pool
    pub fn get_name_and_type(
        &mut self,
        name: Utf8ConstantIndex,
        descriptor: Utf8ConstantIndex,
    ) -> Result<NameAndTypeConstantIndex, ConstantPoolOverflow> {
        let name_and_type_key = (name, descriptor);
        if let Some(idx) = self.name_and_types.get(&name_and_type_key) {
            Ok(*idx)
        } else {
            let constant = Constant::NameAndType { name, descriptor };
            let idx = NameAndTypeConstantIndex(self.push_constant(constant)?);
            self.name_and_types.insert(name_and_type_key, idx);
            Ok(idx)
        }
    }

    /// Get or insert a `CONSTANT_Methodref_info` or `CONSTANT_InterfaceMethodref_info`
    pub fn get_method_ref(
        &mut self,
        class: ClassConstantIndex,
        name_and_type: NameAndTypeConstantIndex,
        is_interface: bool,
    ) -> Result<MethodRefConstantIndex, ConstantPoolOverflow> {
        let key = (class, name_and_type, is_interface);
        if let Some(idx) = self.methodrefs.get(&key) {
            Ok(*idx)
        } else {
            let constant = Constant::MethodRef {
                class,
                name_and_type,
                is_interface,
            };
            let idx = MethodRefConstantIndex(self.push_constant(constant)?);
            self.methodrefs.insert(key, idx);
            Ok(idx)
        }
    }

    /// Add an attribute to the constant pool
    pub fn get_attribute<A: AttributeLike>(&mut self, attribute: A) -> Result<Attribute, Error> {
        let name_index = self.get_utf8(A::NAME)?;
        let mut info = vec![];

        attribute.serialize(&mut info).map_err(Error::IoError)?;

        Ok(Attribute { name_index, info })
    }

    /// Look up a constant by index
    pub fn get(&self, index: ConstantIndex) -> Option<&Constant> {
        self.constants.get_offset(Offset(index.0 as usize))
    }

    /// Look up a utf8 constant which is valid as a Rust string
    pub fn utf8(&self, index: Utf8ConstantIndex) -> Result<&str, Error> {
        match self.get(index.0) {
            Some(Constant::Utf8(string)) => Ok(string),
            Some(Constant::Utf8Raw(_)) => Err(Error::Malformed(format!(
                "constant #{} is not representable as a string",
                index.0 .0
            ))),
            _ => Err(mismatched(index.0, "Utf8")),
        }
    }

    /// Raw name stored in a class constant (a binary name or an array descriptor)
    pub fn class_name(&self, index: ClassConstantIndex) -> Result<&str, Error> {
        match self.get(index.0) {
            Some(Constant::Class(name)) => self.utf8(*name),
            _ => Err(mismatched(index.0, "Class")),
        }
    }

    /// Reference type named by a class constant
    pub fn class_ref_type(&self, index: ClassConstantIndex) -> Result<RefType<BinaryName>, Error> {
        let name = self.class_name(index)?;
        if name.starts_with('[') {
            RefType::parse(name).map_err(|err| Error::Malformed(err.to_string()))
        } else {
            BinaryName::from_string(name.to_owned())
                .map(RefType::Object)
                .map_err(Error::Malformed)
        }
    }

    /// Name and descriptor of a name & type constant
    pub fn name_and_type(&self, index: NameAndTypeConstantIndex) -> Result<(&str, &str), Error> {
        match self.get(index.0) {
            Some(Constant::NameAndType { name, descriptor }) => {
                Ok((self.utf8(*name)?, self.utf8(*descriptor)?))
            }
            _ => Err(mismatched(index.0, "NameAndType")),
        }
    }

    /// Class, name, and descriptor of a field reference
    pub fn field_ref(
        &self,
        index: FieldRefConstantIndex,
    ) -> Result<(ClassConstantIndex, &str, &str), Error> {
        match self.get(index.0) {
            Some(Constant::FieldRef(class, name_and_type)) => {
                let (name, descriptor) = self.name_and_type(*name_and_type)?;
                Ok((*class, name, descriptor))
            }
            _ => Err(mismatched(index.0, "Fieldref")),
        }
    }

    /// Class, name, and descriptor of a method reference (interface or not)
    pub fn method_ref(
        &self,
        index: MethodRefConstantIndex,
    ) -> Result<(ClassConstantIndex, &str, &str), Error> {
        match self.get(index.0) {
            Some(Constant::MethodRef {
                class,
                name_and_type,
                ..
            }) => {
                let (name, descriptor) = self.name_and_type(*name_and_type)?;
                Ok((*class, name, descriptor))
            }
            _ => Err(mismatched(index.0, "Methodref")),
        }
    }

    /// Name and descriptor of a dynamically-computed call site
    pub fn invoke_dynamic(&self, index: InvokeDynamicConstantIndex) -> Result<(&str, &str), Error> {
        match self.get(index.0) {
            Some(Constant::InvokeDynamic {
                method_descriptor, ..
            }) => self.name_and_type(*method_descriptor),
            _ => Err(mismatched(index.0, "InvokeDynamic")),
        }
    }
}

impl Default for ConstantsPool {
    fn default() -> Self {
        ConstantsPool::new()
    }
}

fn mismatched(index: ConstantIndex, expected: &str) -> Error {
    Error::Malformed(format!("constant #{} is not a {} constant", index.0, expected))
}

#[derive(Debug)]
pub struct ConstantPoolOverflow {
    pub constant: Constant,
    pub offset: u16,
}

/// Constants as in the constant pool
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.4
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// Class or an interface
    Class(Utf8ConstantIndex),

    /// Field
    FieldRef(ClassConstantIndex, NameAndTypeConstantIndex),

    /// Method (this combines `Methodref` and `InterfaceMethodref`
    MethodRef {
        class: ClassConstantIndex,
        name_and_type: NameAndTypeConstantIndex,
        is_interface: bool,
    },

    /// Constant object of type `java.lang.String`
    String(Utf8ConstantIndex),

    /// Constant primitive of type `int`
    Integer(i32),

    /// Constant primitive of type `float`
    Float(f32),

    /// Constant primitive of type `long`
    Long(i64),

    /// Constant primitive of type `double`
    Double(f64),

    /// Name and a type (eg. for a field or a method)
    NameAndType {
        name: Utf8ConstantIndex,
        descriptor: Utf8ConstantIndex,
    },

    /// Constant UTF-8 encoded raw string value
    ///
    /// Despite the name, the encoding is not quite UTF-8 (the encoding of the
    /// null character `\u{0000}` and the encoding of supplementary characters
    /// is different).
    Utf8(String),

    /// Modified UTF-8 bytes that do not decode to a Rust string (eg. unpaired surrogates)
    ///
    /// These are carried through unchanged.
    Utf8Raw(Vec<u8>),

    /// Constant object of type `java.lang.invoke.MethodHandle`
    MethodHandle {
        handle_kind: HandleKind,

        /// Depending on the method kind, this points to different things:
        ///
        ///   - `FieldRef` for `GetField`, `GetStatic`, `PutField`, `PutStatic`
        ///   - `MethodRef` for the rest
        member: ConstantIndex,
    },

    /// Method type
    MethodType { descriptor: Utf8ConstantIndex },

    /// Dynamically-computed constant
    Dynamic {
        /// Index into the `BootstrapMethods` attribute
        bootstrap_method: u16,
        name_and_type: NameAndTypeConstantIndex,
    },

    /// Dynamically-computed call site
    InvokeDynamic {
        /// Index into the `BootstrapMethods` attribute
        bootstrap_method: u16,
        method_descriptor: NameAndTypeConstantIndex,
    },

    /// Module (only in `module-info` classes)
    Module(Utf8ConstantIndex),

    /// Package exported or opened by a module
    Package(Utf8ConstantIndex),
}

impl Serialize for Constant {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        match self {
            Constant::Utf8(string) => {
                1u8.serialize(writer)?;
                let buffer: Vec<u8> = encode_modified_utf8(string);
                (buffer.len() as u16).serialize(writer)?;
                writer.write_all(&buffer)?;
            }
            Constant::Utf8Raw(bytes) => {
                1u8.serialize(writer)?;
                (bytes.len() as u16).serialize(writer)?;
                writer.write_all(bytes)?;
            }
            Constant::Integer(integer) => {
                3u8.serialize(writer)?;
                integer.serialize(writer)?;
            }
            Constant::Float(float) => {
                4u8.serialize(writer)?;
                float.serialize(writer)?;
            }
            Constant::Long(long) => {
                5u8.serialize(writer)?;
                long.serialize(writer)?;
            }
            Constant::Double(double) => {
                6u8.serialize(writer)?;
                double.serialize(writer)?;
            }
            Constant::Class(name) => {
                7u8.serialize(writer)?;
                name.serialize(writer)?;
            }
            Constant::String(bytes) => {
                8u8.serialize(writer)?;
                bytes.serialize(writer)?;
            }
            Constant::FieldRef(class, name_and_type) => {
                9u8.serialize(writer)?;
                class.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::MethodRef {
                class,
                name_and_type,
                is_interface,
            } => {
                (if !is_interface { 10u8 } else { 11u8 }).serialize(writer)?;
                class.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::NameAndType { name, descriptor } => {
                12u8.serialize(writer)?;
                name.serialize(writer)?;
                descriptor.serialize(writer)?;
            }
            Constant::MethodHandle {
                handle_kind,
                member,
            } => {
                15u8.serialize(writer)?;
                handle_kind.serialize(writer)?;
                member.serialize(writer)?;
            }
            Constant::MethodType { descriptor } => {
                16u8.serialize(writer)?;
                descriptor.serialize(writer)?;
            }
            Constant::Dynamic {
                bootstrap_method,
                name_and_type,
            } => {
                17u8.serialize(writer)?;
                bootstrap_method.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::InvokeDynamic {
                bootstrap_method,
                method_descriptor,
            } => {
                18u8.serialize(writer)?;
                bootstrap_method.serialize(writer)?;
                method_descriptor.serialize(writer)?;
            }
            Constant::Module(name) => {
                19u8.serialize(writer)?;
                name.serialize(writer)?;
            }
            Constant::Package(name) => {
                20u8.serialize(writer)?;
                name.serialize(writer)?;
            }
        };
        Ok(())
    }
}

impl Deserialize for Constant {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        let tag = u8::deserialize(reader)?;
        let constant = match tag {
            1 => {
                let len = u16::deserialize(reader)?;
                let bytes = super::read_bytes(reader, len as usize)?;
                match decode_modified_utf8(&bytes) {
                    Some(string) => Constant::Utf8(string),
                    None => Constant::Utf8Raw(bytes),
                }
            }
            3 => Constant::Integer(i32::deserialize(reader)?),
            4 => Constant::Float(f32::deserialize(reader)?),
            5 => Constant::Long(i64::deserialize(reader)?),
            6 => Constant::Double(f64::deserialize(reader)?),
            7 => Constant::Class(Utf8ConstantIndex::deserialize(reader)?),
            8 => Constant::String(Utf8ConstantIndex::deserialize(reader)?),
            9 => Constant::FieldRef(
                ClassConstantIndex::deserialize(reader)?,
                NameAndTypeConstantIndex::deserialize(reader)?,
            ),
            10 | 11 => Constant::MethodRef {
                class: ClassConstantIndex::deserialize(reader)?,
                name_and_type: NameAndTypeConstantIndex::deserialize(reader)?,
                is_interface: tag == 11,
            },
            12 => Constant::NameAndType {
                name: Utf8ConstantIndex::deserialize(reader)?,
                descriptor: Utf8ConstantIndex::deserialize(reader)?,
            },
            15 => Constant::MethodHandle {
                handle_kind: HandleKind::deserialize(reader)?,
                member: ConstantIndex::deserialize(reader)?,
            },
            16 => Constant::MethodType {
                descriptor: Utf8ConstantIndex::deserialize(reader)?,
            },
            17 => Constant::Dynamic {
                bootstrap_method: u16::deserialize(reader)?,
                name_and_type: NameAndTypeConstantIndex::deserialize(reader)?,
            },
            18 => Constant::InvokeDynamic {
                bootstrap_method: u16::deserialize(reader)?,
                method_descriptor: NameAndTypeConstantIndex::deserialize(reader)?,
            },
            19 => Constant::Module(Utf8ConstantIndex::deserialize(reader)?),
            20 => Constant::Package(Utf8ConstantIndex::deserialize(reader)?),
            other => return Err(invalid_data(format!("unknown constant tag {}", other))),
        };
        Ok(constant)
    }
}

/// Modified UTF-8 format used in class files.
///
/// See [this `DataInput` section for details][0]. Quoting from that section:
///
/// > The differences between this format and the standard UTF-8 format are the following:
/// >
/// >  * The null byte `\u0000` is encoded in 2-byte format rather than 1-byte, so that the encoded
/// >    strings never have embedded nulls.
/// >  * Only the 1-byte, 2-byte, and 3-byte formats are used.
/// >  * Supplementary characters are represented in the form of surrogate pairs.
///
/// [0]: https://docs.oracle.com/en/java/javase/17/docs/api/java.base/java/io/DataInput.html#modified-utf-8
pub fn encode_modified_utf8(string: &str) -> Vec<u8> {
    let mut buffer: Vec<u8> = vec![];
    for c in string.chars() {
        // Handle the exception for how `\u{0000}` is represented
        let len: usize = if c == '\u{0000}' { 2 } else { c.len_utf8() };
        let code: u32 = c as u32;

        match len {
            1 => buffer.push(code as u8),
            2 => {
                buffer.push((code >> 6 & 0x1F) as u8 | 0b1100_0000);
                buffer.push((code & 0x3F) as u8 | 0b1000_0000);
            }
            3 => {
                buffer.push((code >> 12 & 0x0F) as u8 | 0b1110_0000);
                buffer.push((code >> 6 & 0x3F) as u8 | 0b1000_0000);
                buffer.push((code & 0x3F) as u8 | 0b1000_0000);
            }

            // Supplementary characters: main divergence from unicode
            _ => {
                buffer.push(0b1110_1101);
                buffer.push(((code >> 16 & 0x0F) as u8).wrapping_sub(1) & 0x0F | 0b1010_0000);
                buffer.push((code >> 10 & 0x3F) as u8 | 0b1000_0000);

                buffer.push(0b1110_1101);
                buffer.push(((code >> 6 & 0x0F) as u8) | 0b1011_0000);
                buffer.push((code & 0x3F) as u8 | 0b1000_0000);
            }
        }
    }
    buffer
}

/// Decode modified UTF-8 into a string
///
/// Returns `None` if the bytes are not valid modified UTF-8 or if they encode something a Rust
/// string cannot hold (unpaired surrogates). The result always re-encodes to the exact input.
pub fn decode_modified_utf8(bytes: &[u8]) -> Option<String> {
    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut iter = bytes.iter().copied();
    while let Some(b0) = iter.next() {
        let unit: u16 = match b0 {
            0x01..=0x7F => b0 as u16,
            0xC0..=0xDF => {
                let b1 = continuation(iter.next())?;
                (b0 as u16 & 0x1F) << 6 | b1
            }
            0xE0..=0xEF => {
                let b1 = continuation(iter.next())?;
                let b2 = continuation(iter.next())?;
                (b0 as u16 & 0x0F) << 12 | b1 << 6 | b2
            }
            _ => return None,
        };
        units.push(unit);
    }

    let string = String::from_utf16(&units).ok()?;
    if encode_modified_utf8(&string) == bytes {
        Some(string)
    } else {
        None
    }
}

fn continuation(byte: Option<u8>) -> Option<u16> {
    match byte {
        Some(b @ 0x80..=0xBF) => Some(b as u16 & 0x3F),
        _ => None,
    }
}

#[cfg(test)]
mod modified_utf8_tests {
    use super::*;

    #[test]
    fn containing_null_byte() {
        assert_eq!(encode_modified_utf8("a\x00a"), vec![97, 192, 128, 97]);
        assert_eq!(
            decode_modified_utf8(&[97, 192, 128, 97]).as_deref(),
            Some("a\x00a")
        );
    }

    #[test]
    fn simple_ascii() {
        assert_eq!(encode_modified_utf8("foo"), vec![102, 111, 111]);
        assert_eq!(decode_modified_utf8(b"hel10_World").as_deref(), Some("hel10_World"));
    }

    #[test]
    fn two_and_three_byte_encodings() {
        assert_eq!(
            encode_modified_utf8("ĄǍǞǠǺȀȂȦȺӐӒ"),
            vec![
                196, 132, 199, 141, 199, 158, 199, 160, 199, 186, 200, 128, 200, 130, 200, 166,
                200, 186, 211, 144, 211, 146
            ]
        );
        let devanagari = "ऄअॲঅਅઅଅஅఅಅഅะະ༁ཨ";
        assert_eq!(
            decode_modified_utf8(&encode_modified_utf8(devanagari)).as_deref(),
            Some(devanagari)
        );
    }

    #[test]
    fn supplementary_characters() {
        let bytes = vec![
            237, 160, 128, 237, 176, 128, 237, 172, 191, 237, 191, 191, 237, 175, 191, 237, 191,
            191,
        ];
        assert_eq!(encode_modified_utf8("\u{10000}\u{dffff}\u{10FFFF}"), bytes);
        assert_eq!(
            decode_modified_utf8(&bytes).as_deref(),
            Some("\u{10000}\u{dffff}\u{10FFFF}")
        );
    }

    #[test]
    fn undecodable_inputs() {
        // Raw zero byte, 4-byte UTF-8 form, lone high surrogate, truncated sequence
        assert_eq!(decode_modified_utf8(&[97, 0]), None);
        assert_eq!(decode_modified_utf8(&[0xF0, 0x90, 0x80, 0x80]), None);
        assert_eq!(decode_modified_utf8(&[0xED, 0xA0, 0x80]), None);
        assert_eq!(decode_modified_utf8(&[0xE0, 0xA4]), None);
    }

    #[test]
    fn raw_constants_are_preserved() {
        let input: &[u8] = &[1, 0, 3, 0xED, 0xA0, 0x80];
        let constant = Constant::deserialize(&mut &input[..]).unwrap();
        assert_eq!(constant, Constant::Utf8Raw(vec![0xED, 0xA0, 0x80]));

        let mut output = vec![];
        constant.serialize(&mut output).unwrap();
        assert_eq!(output, input);
    }
}

/// Almost all constants have width 1, except for `Constant::Long` and `Constant::Double`. Quoting
/// JVMS 4.4.5:
///
/// > All 8-byte constants take up two entries in the constant_pool table of the class file. If a
/// > CONSTANT_Long_info or CONSTANT_Double_info structure is the item in the constant_pool table
/// > at index n, then the next usable item in the pool is located at index n+2. The constant_pool
/// > index n+1 must be valid but is considered unusable.
/// >
/// > In retrospect, making 8-byte constants take two constant pool entries was a poor choice.
impl Width for Constant {
    fn width(&self) -> usize {
        match self {
            Constant::Long(_) | Constant::Double(_) => 2,
            _ => 1,
        }
    }
}

/// The pool is prefixed by its count, which is one more than the largest index
impl Serialize for OffsetVec<Constant> {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        (self.offset_len().0 as u16).serialize(writer)?;
        for (_, _, constant) in self {
            constant.serialize(writer)?;
        }
        Ok(())
    }
}

impl Deserialize for OffsetVec<Constant> {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        let count = u16::deserialize(reader)? as usize;
        let mut constants = OffsetVec::new_starting_at(Offset(1));
        while constants.offset_len().0 < count {
            constants.push(Constant::deserialize(reader)?);
        }
        if constants.offset_len().0 != count {
            return Err(invalid_data("8-byte constant overruns the constant pool"));
        }
        Ok(constants)
    }
}

#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub struct ConstantIndex(pub u16);

#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub struct Utf8ConstantIndex(pub ConstantIndex);

#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub struct NameAndTypeConstantIndex(ConstantIndex);

#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub struct ClassConstantIndex(ConstantIndex);

#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub struct FieldRefConstantIndex(ConstantIndex);

#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub struct MethodRefConstantIndex(ConstantIndex);

#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub struct InvokeDynamicConstantIndex(ConstantIndex);

impl From<Utf8ConstantIndex> for ConstantIndex {
    fn from(index: Utf8ConstantIndex) -> ConstantIndex {
        index.0
    }
}
impl From<NameAndTypeConstantIndex> for ConstantIndex {
    fn from(index: NameAndTypeConstantIndex) -> ConstantIndex {
        index.0
    }
}
impl From<ClassConstantIndex> for ConstantIndex {
    fn from(index: ClassConstantIndex) -> ConstantIndex {
        index.0
    }
}
impl From<FieldRefConstantIndex> for ConstantIndex {
    fn from(index: FieldRefConstantIndex) -> ConstantIndex {
        index.0
    }
}
impl From<MethodRefConstantIndex> for ConstantIndex {
    fn from(index: MethodRefConstantIndex) -> ConstantIndex {
        index.0
    }
}
impl From<InvokeDynamicConstantIndex> for ConstantIndex {
    fn from(index: InvokeDynamicConstantIndex) -> ConstantIndex {
        index.0
    }
}

macro_rules! constant_index_binary_format {
    ($($index:ident),*) => {
        $(
            impl Serialize for $index {
                fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
                    self.0.serialize(writer)
                }
            }

            impl Deserialize for $index {
                fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
                    Ok($index(Deserialize::deserialize(reader)?))
                }
            }
        )*
    };
}

constant_index_binary_format!(
    ConstantIndex,
    Utf8ConstantIndex,
    NameAndTypeConstantIndex,
    ClassConstantIndex,
    FieldRefConstantIndex,
    MethodRefConstantIndex,
    InvokeDynamicConstantIndex
);

/// Optional class references (eg. a catch-all handler or the super class of `Object`) use 0
impl Serialize for Option<ClassConstantIndex> {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        match self {
            None => 0u16.serialize(writer),
            Some(index) => index.serialize(writer),
        }
    }
}

impl Deserialize for Option<ClassConstantIndex> {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        match u16::deserialize(reader)? {
            0 => Ok(None),
            idx => Ok(Some(ClassConstantIndex(ConstantIndex(idx)))),
        }
    }
}

/// Type of method handle
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-5.html#jvms-5.4.3.5-220
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub enum HandleKind {
    GetField,
    GetStatic,
    PutField,
    PutStatic,
    InvokeVirtual,
    InvokeStatic,
    InvokeSpecial,
    NewInvokeSpecial,
    InvokeInterface,
}

impl Serialize for HandleKind {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        let byte: u8 = match self {
            HandleKind::GetField => 1,
            HandleKind::GetStatic => 2,
            HandleKind::PutField => 3,
            HandleKind::PutStatic => 4,
            HandleKind::InvokeVirtual => 5,
            HandleKind::InvokeStatic => 6,
            HandleKind::InvokeSpecial => 7,
            HandleKind::NewInvokeSpecial => 8,
            HandleKind::InvokeInterface => 9,
        };
        byte.serialize(writer)
    }
}

impl Deserialize for HandleKind {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        Ok(match u8::deserialize(reader)? {
            1 => HandleKind::GetField,
            2 => HandleKind::GetStatic,
            3 => HandleKind::PutField,
            4 => HandleKind::PutStatic,
            5 => HandleKind::InvokeVirtual,
            6 => HandleKind::InvokeStatic,
            7 => HandleKind::InvokeSpecial,
            8 => HandleKind::NewInvokeSpecial,
            9 => HandleKind::InvokeInterface,
            other => return Err(invalid_data(format!("unknown method handle kind {}", other))),
        })
    }
}

#[cfg(test)]
mod pool_tests {
    use super::*;

    fn seeded_pool() -> ConstantsPool {
        let utf8 = |s: &str| Constant::Utf8(String::from(s));
        let mut constants = OffsetVec::new_starting_at(Offset(1));
        constants.extend([
            Constant::Class(Utf8ConstantIndex(ConstantIndex(2))),
            utf8("a/Foo"),
            Constant::Long(7),
            utf8("[I"),
            Constant::Class(Utf8ConstantIndex(ConstantIndex(5))),
        ]);
        ConstantsPool::from_offset_vec(constants)
    }

    #[test]
    fn seeded_entries_are_reused() {
        let mut pool = seeded_pool();
        let foo = RefType::Object(BinaryName::from_string(String::from("a/Foo")).unwrap());
        let class = pool.get_class(&foo).unwrap();
        assert_eq!(ConstantIndex::from(class), ConstantIndex(1));
        assert_eq!(pool.get_utf8("[I").unwrap(), Utf8ConstantIndex(ConstantIndex(5)));
        assert_eq!(pool.class_ref_type(class).unwrap(), foo);

        // Long takes two slots, so the next free index is 7
        assert_eq!(pool.get_utf8("fresh").unwrap(), Utf8ConstantIndex(ConstantIndex(7)));
    }

    #[test]
    fn array_class_constants() {
        let pool = seeded_pool();
        let array = pool
            .class_ref_type(ClassConstantIndex(ConstantIndex(6)))
            .unwrap();
        assert_eq!(array.render(), "[I");
        assert!(pool.class_name(ClassConstantIndex(ConstantIndex(3))).is_err());
    }

    #[test]
    fn pool_overflow() {
        let mut pool = ConstantsPool::new();
        for i in 0..65534u32 {
            pool.get_utf8(i.to_string()).unwrap();
        }
        assert!(pool.get_utf8("one too many").is_err());
    }

    #[test]
    fn long_constant_overrunning_pool() {
        // count of 2 means a single slot, but a long needs two
        let bytes: &[u8] = &[0, 2, 5, 0, 0, 0, 0, 0, 0, 0, 1];
        assert!(OffsetVec::<Constant>::deserialize(&mut &bytes[..]).is_err());
    }
}
