//! Class file assembler and a tiny interpreter for checking instrumented code

#![allow(dead_code)]

use condprobe::jvm::class_file::{
    Attribute, AttributeLike, BytecodeArray, ClassFile, Code, ConstantsPool, Deserialize,
    ExceptionHandler, Method, Serialize, StackMapFrame, StackMapTable, Version,
};
use condprobe::jvm::code::{decode_instructions, DecodedInstruction};
use condprobe::jvm::verifier::MethodHeader;
use condprobe::jvm::{
    BinaryName, ClassAccessFlags, ClassConstantIndex, MethodAccessFlags, MethodDescriptor,
    MethodRefConstantIndex, Name, ParseDescriptor, RefType,
};

pub const HELPER: &str = "__CONDITION__METHOD";

/// Method to put in an assembled class
pub struct MethodDef {
    pub name: &'static str,
    pub descriptor: &'static str,
    pub access_flags: MethodAccessFlags,
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionHandler>,
    pub frames: Vec<StackMapFrame>,
}

impl MethodDef {
    pub fn new(name: &'static str, descriptor: &'static str, code: Vec<u8>) -> MethodDef {
        MethodDef {
            name,
            descriptor,
            access_flags: MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
            max_stack: 2,
            max_locals: 4,
            code,
            exception_table: vec![],
            frames: vec![],
        }
    }

    pub fn frames(mut self, frames: Vec<StackMapFrame>) -> MethodDef {
        self.frames = frames;
        self
    }
}

/// Builds class files out of raw method bodies
pub struct ClassAssembler {
    constants: ConstantsPool,
    version: Version,
    access_flags: ClassAccessFlags,
    this_class: ClassConstantIndex,
    super_class: ClassConstantIndex,
    methods: Vec<Method>,
}

impl ClassAssembler {
    pub fn new(name: &str, version: Version) -> ClassAssembler {
        let mut constants = ConstantsPool::new();
        let this_class = constants
            .get_class(&RefType::Object(
                BinaryName::from_string(name.to_owned()).unwrap(),
            ))
            .unwrap();
        let super_class = constants
            .get_class(&RefType::Object(BinaryName::OBJECT))
            .unwrap();
        ClassAssembler {
            constants,
            version,
            access_flags: ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
            this_class,
            super_class,
            methods: vec![],
        }
    }

    pub fn interface(mut self) -> ClassAssembler {
        self.access_flags = ClassAccessFlags::PUBLIC
            | ClassAccessFlags::INTERFACE
            | ClassAccessFlags::ABSTRACT;
        self
    }

    /// Class constant, for use in frames and exception tables
    pub fn class_constant(&mut self, name: &str) -> ClassConstantIndex {
        self.constants
            .get_class(&RefType::Object(
                BinaryName::from_string(name.to_owned()).unwrap(),
            ))
            .unwrap()
    }

    /// Index of a method ref on this class, as the two operand bytes of an `invokestatic`
    pub fn static_method_ref(&mut self, name: &str, descriptor: &str) -> [u8; 2] {
        let name = self.constants.get_utf8(name.to_owned()).unwrap();
        let descriptor = self.constants.get_utf8(descriptor.to_owned()).unwrap();
        let name_and_type = self.constants.get_name_and_type(name, descriptor).unwrap();
        let method_ref = self
            .constants
            .get_method_ref(self.this_class, name_and_type, false)
            .unwrap();
        let mut bytes = vec![];
        method_ref.serialize(&mut bytes).unwrap();
        [bytes[0], bytes[1]]
    }

    pub fn method(&mut self, def: MethodDef) -> &mut ClassAssembler {
        let mut attributes: Vec<Attribute> = vec![];
        if !def.frames.is_empty() {
            attributes.push(
                self.constants
                    .get_attribute(StackMapTable(def.frames))
                    .unwrap(),
            );
        }
        let code = Code {
            max_stack: def.max_stack,
            max_locals: def.max_locals,
            code_array: BytecodeArray(def.code),
            exception_table: def.exception_table,
            attributes,
        };
        let method = Method {
            access_flags: def.access_flags,
            name_index: self.constants.get_utf8(def.name).unwrap(),
            descriptor_index: self.constants.get_utf8(def.descriptor).unwrap(),
            attributes: vec![self.constants.get_attribute(code).unwrap()],
        };
        self.methods.push(method);
        self
    }

    pub fn finish(self) -> Vec<u8> {
        let class = ClassFile {
            version: self.version,
            constants: self.constants.into_offset_vec(),
            access_flags: self.access_flags,
            this_class: self.this_class,
            super_class: Some(self.super_class),
            interfaces: vec![],
            fields: vec![],
            methods: self.methods,
            attributes: vec![],
        };
        class.to_bytes().unwrap()
    }
}

/// Parsed class, with helpers for poking at its methods
pub struct LoadedClass {
    pub class: ClassFile,
    pub constants: ConstantsPool,
    pub name: BinaryName,
}

impl LoadedClass {
    pub fn parse(bytes: &[u8]) -> LoadedClass {
        let class = ClassFile::parse(bytes).unwrap();
        let constants = ConstantsPool::from_offset_vec(class.constants.clone());
        let name = match constants.class_ref_type(class.this_class).unwrap() {
            RefType::Object(name) => name,
            other => panic!("unexpected class type {:?}", other),
        };
        LoadedClass {
            class,
            constants,
            name,
        }
    }

    /// Methods with this name and descriptor
    pub fn methods_named(&self, name: &str, descriptor: &str) -> Vec<&Method> {
        self.class
            .methods
            .iter()
            .filter(|method| {
                self.constants.utf8(method.name_index).unwrap() == name
                    && self.constants.utf8(method.descriptor_index).unwrap() == descriptor
            })
            .collect()
    }

    pub fn method(&self, name: &str, descriptor: &str) -> &Method {
        let methods = self.methods_named(name, descriptor);
        assert_eq!(methods.len(), 1, "expected one {}{}", name, descriptor);
        methods[0]
    }

    pub fn code(&self, name: &str, descriptor: &str) -> Code {
        let method = self.method(name, descriptor);
        let position = method
            .code_attribute_position(&self.constants)
            .unwrap()
            .expect("method has no code");
        method.attributes[position].decode().unwrap()
    }

    /// Absolute offsets of the frames in a method's `StackMapTable`
    pub fn frame_offsets(&self, name: &str, descriptor: &str) -> Vec<usize> {
        let code = self.code(name, descriptor);
        let mut offsets: Vec<usize> = vec![];
        for attribute in &code.attributes {
            if self.constants.utf8(attribute.name_index).unwrap() != StackMapTable::NAME {
                continue;
            }
            let table: StackMapTable = attribute.decode().unwrap();
            for frame in table.0 {
                let delta = frame.offset_delta() as usize;
                let offset = match offsets.last() {
                    None => delta,
                    Some(previous) => previous + delta + 1,
                };
                offsets.push(offset);
            }
        }
        offsets
    }

    /// Number of `invokestatic` calls to the helper method in a method body
    pub fn helper_call_sites(&self, name: &str, descriptor: &str) -> usize {
        let code = self.code(name, descriptor);
        decode_instructions(&code.code_array.0)
            .unwrap()
            .into_iter()
            .filter(|(_, insn)| match insn {
                DecodedInstruction::Straight(condprobe::jvm::code::Instruction::Invoke(
                    condprobe::jvm::code::InvokeType::Static,
                    method_ref,
                )) => {
                    let (_, name, descriptor) = self.constants.method_ref(*method_ref).unwrap();
                    name == HELPER && descriptor == "(Z)Z"
                }
                _ => false,
            })
            .count()
    }

    /// Check every method decodes, and (for versions with frames) every jump target has a frame
    pub fn assert_well_formed(&self) {
        for method in &self.class.methods {
            let header = MethodHeader::from_method(&self.name, method, &self.constants).unwrap();
            let position = match method.code_attribute_position(&self.constants).unwrap() {
                Some(position) => position,
                None => continue,
            };
            let code: Code = method.attributes[position].decode().unwrap();
            condprobe::jvm::code::Code::decode(&code, &self.constants, &header).unwrap();

            if !self.class.version.uses_stack_map_frames() {
                continue;
            }
            let name = self.constants.utf8(method.name_index).unwrap();
            let descriptor = self.constants.utf8(method.descriptor_index).unwrap();
            let frames = self.frame_offsets(name, descriptor);
            for (offset, insn) in decode_instructions(&code.code_array.0).unwrap() {
                if let DecodedInstruction::Branch(branch) = insn {
                    for target in branch.jump_targets().targets() {
                        assert!(
                            frames.contains(target),
                            "no frame for jump target {} (from {}) in {}{}",
                            target,
                            offset,
                            name,
                            descriptor
                        );
                    }
                }
            }
        }
    }
}

/// Interpreter for static methods that only deal with `int`s, `boolean`s, and references
///
/// References are opaque `int` handles, with `0` standing for `null`.
pub struct Interpreter<'a> {
    class: &'a LoadedClass,

    /// How many times the helper method was called
    pub helper_calls: usize,
}

impl<'a> Interpreter<'a> {
    pub fn new(class: &'a LoadedClass) -> Interpreter<'a> {
        Interpreter {
            class,
            helper_calls: 0,
        }
    }

    /// Run a method, checking the declared maximums along the way
    pub fn call(&mut self, name: &str, descriptor: &str, args: &[i32]) -> Option<i32> {
        if name == HELPER {
            self.helper_calls += 1;
        }
        let code = self.class.code(name, descriptor);
        let bytes = &code.code_array.0;
        let mut locals: Vec<i32> = vec![0; code.max_locals as usize];
        locals[..args.len()].copy_from_slice(args);
        let mut stack: Vec<i32> = vec![];
        let max_stack = code.max_stack as usize;

        let u8_at = |pc: usize| bytes[pc];
        let i16_at = |pc: usize| i16::from_be_bytes([bytes[pc], bytes[pc + 1]]) as isize;
        let i32_at = |pc: usize| {
            i32::from_be_bytes([bytes[pc], bytes[pc + 1], bytes[pc + 2], bytes[pc + 3]]) as isize
        };
        let jump = |pc: usize, delta: isize| (pc as isize + delta) as usize;

        let mut pc: usize = 0;
        loop {
            let opcode = bytes[pc];
            let mut next = pc + 1;
            match opcode {
                0x00 => (),
                0x01 => stack.push(0),
                0x02..=0x08 => stack.push(opcode as i32 - 3),
                0x10 => {
                    stack.push(u8_at(pc + 1) as i8 as i32);
                    next = pc + 2;
                }
                0x11 => {
                    stack.push(i16_at(pc + 1) as i32);
                    next = pc + 3;
                }
                0x15 | 0x19 => {
                    stack.push(locals[u8_at(pc + 1) as usize]);
                    next = pc + 2;
                }
                0x1a..=0x1d => stack.push(locals[(opcode - 0x1a) as usize]),
                0x2a..=0x2d => stack.push(locals[(opcode - 0x2a) as usize]),
                0x36 | 0x3a => {
                    locals[u8_at(pc + 1) as usize] = stack.pop().unwrap();
                    next = pc + 2;
                }
                0x3b..=0x3e => locals[(opcode - 0x3b) as usize] = stack.pop().unwrap(),
                0x4b..=0x4e => locals[(opcode - 0x4b) as usize] = stack.pop().unwrap(),
                0x57 => {
                    stack.pop().unwrap();
                }
                0x59 => {
                    let top = *stack.last().unwrap();
                    stack.push(top);
                }
                0x60 | 0x64 | 0x68 => {
                    let b = stack.pop().unwrap();
                    let a = stack.pop().unwrap();
                    stack.push(match opcode {
                        0x60 => a.wrapping_add(b),
                        0x64 => a.wrapping_sub(b),
                        _ => a.wrapping_mul(b),
                    });
                }
                0x74 => {
                    let a = stack.pop().unwrap();
                    stack.push(a.wrapping_neg());
                }
                0x84 => {
                    let idx = u8_at(pc + 1) as usize;
                    locals[idx] = locals[idx].wrapping_add(u8_at(pc + 2) as i8 as i32);
                    next = pc + 3;
                }
                0x99..=0x9e => {
                    let a = stack.pop().unwrap();
                    if compare(opcode - 0x99, a, 0) {
                        next = jump(pc, i16_at(pc + 1));
                    } else {
                        next = pc + 3;
                    }
                }
                0x9f..=0xa4 => {
                    let b = stack.pop().unwrap();
                    let a = stack.pop().unwrap();
                    if compare(opcode - 0x9f, a, b) {
                        next = jump(pc, i16_at(pc + 1));
                    } else {
                        next = pc + 3;
                    }
                }
                0xa5 | 0xa6 | 0xc6 | 0xc7 => {
                    let (condition, a, b) = match opcode {
                        0xa5 | 0xa6 => {
                            let b = stack.pop().unwrap();
                            (opcode - 0xa5, stack.pop().unwrap(), b)
                        }
                        _ => (opcode - 0xc6, stack.pop().unwrap(), 0),
                    };
                    if compare(condition, a, b) {
                        next = jump(pc, i16_at(pc + 1));
                    } else {
                        next = pc + 3;
                    }
                }
                0xa7 => next = jump(pc, i16_at(pc + 1)),
                0xc8 => next = jump(pc, i32_at(pc + 1)),
                0xac | 0xb0 => return Some(stack.pop().unwrap()),
                0xb1 => return None,
                0xb8 => {
                    let method_ref =
                        MethodRefConstantIndex::deserialize(&mut &bytes[pc + 1..pc + 3]).unwrap();
                    let (class, name, descriptor) =
                        self.class.constants.method_ref(method_ref).unwrap();
                    assert_eq!(
                        self.class.constants.class_name(class).unwrap(),
                        self.class.name.as_str(),
                        "calls must stay inside the class"
                    );
                    let arity = MethodDescriptor::<BinaryName>::parse(descriptor)
                        .unwrap()
                        .parameters
                        .len();
                    let args = stack.split_off(stack.len() - arity);
                    let (name, descriptor) = (name.to_owned(), descriptor.to_owned());
                    if let Some(result) = self.call(&name, &descriptor, &args) {
                        stack.push(result);
                    }
                    next = pc + 3;
                }
                other => panic!("unsupported opcode {:#04x} at {}", other, pc),
            }
            assert!(
                stack.len() <= max_stack,
                "stack exceeds max_stack {} at {}",
                max_stack,
                pc
            );
            pc = next;
        }
    }
}

/// Compare for `if<cond>`, `if_icmp<cond>`, `if_acmp<cond>`, and `if[non]null`, in opcode order:
/// eq, ne, lt, ge, gt, le
fn compare(condition: u8, a: i32, b: i32) -> bool {
    match condition {
        0 => a == b,
        1 => a != b,
        2 => a < b,
        3 => a >= b,
        4 => a > b,
        _ => a <= b,
    }
}

/// `static int positive(int x) { return x > 0 ? 1 : 0; }`
pub fn positive_method() -> MethodDef {
    MethodDef::new(
        "positive",
        "(I)I",
        vec![0x1a, 0x9e, 0x00, 0x05, 0x04, 0xac, 0x03, 0xac],
    )
    .frames(vec![StackMapFrame::SameLocalsNoStack { offset_delta: 6 }])
}

/// `static int sum(int n) { int s = 0; for (int i = 0; i < n; i++) s += i; return s; }`
pub fn sum_method() -> MethodDef {
    use condprobe::jvm::verifier::VerificationType;

    MethodDef::new(
        "sum",
        "(I)I",
        vec![
            0x03, 0x3c, // s = 0
            0x03, 0x3d, // i = 0
            0x1c, 0x1a, 0xa2, 0x00, 0x0d, // loop: if (i >= n) goto end
            0x1b, 0x1c, 0x60, 0x3c, // s += i
            0x84, 0x02, 0x01, // i++
            0xa7, 0xff, 0xf4, // goto loop
            0x1b, 0xac, // end: return s
        ],
    )
    .frames(vec![
        StackMapFrame::AppendLocalsNoStack {
            offset_delta: 4,
            locals: vec![VerificationType::Integer, VerificationType::Integer],
        },
        StackMapFrame::SameLocalsNoStack { offset_delta: 14 },
    ])
}

/// `static int total(int n) { int s = 0; do { s += n; n--; } while (n > 0); return s; }`
pub fn total_method() -> MethodDef {
    use condprobe::jvm::verifier::VerificationType;

    MethodDef::new(
        "total",
        "(I)I",
        vec![
            0x03, 0x3c, // s = 0
            0x1b, 0x1a, 0x60, 0x3c, // loop: s += n
            0x84, 0x00, 0xff, // n--
            0x1a, 0x9d, 0xff, 0xf8, // if (n > 0) goto loop
            0x1b, 0xac, // return s
        ],
    )
    .frames(vec![StackMapFrame::AppendLocalsNoStack {
        offset_delta: 2,
        locals: vec![VerificationType::Integer],
    }])
}

/// `static int both(int a, int b) { return a > 0 && b > 0 ? 1 : 0; }`
pub fn both_method() -> MethodDef {
    use condprobe::jvm::verifier::VerificationType;

    MethodDef::new(
        "both",
        "(II)I",
        vec![
            0x1a, 0x9e, 0x00, 0x0b, // if (a <= 0) goto no
            0x1b, 0x9e, 0x00, 0x07, // if (b <= 0) goto no
            0x04, 0xa7, 0x00, 0x04, // iconst_1, goto done
            0x03, // no: iconst_0
            0xac, // done: ireturn
        ],
    )
    .frames(vec![
        StackMapFrame::SameLocalsNoStack { offset_delta: 12 },
        StackMapFrame::SameLocalsOneStack {
            offset_delta: 0,
            stack: VerificationType::Integer,
        },
    ])
}

/// `static int classify(int a, int b) { if (a > 0) return 0; if (b > 0) return 1; return 2; }`
pub fn classify_method() -> MethodDef {
    MethodDef::new(
        "classify",
        "(II)I",
        vec![
            0x1a, 0x9e, 0x00, 0x05, // if (a <= 0) goto second
            0x03, 0xac, // return 0
            0x1b, 0x9e, 0x00, 0x05, // second: if (b <= 0) goto last
            0x04, 0xac, // return 1
            0x05, 0xac, // last: return 2
        ],
    )
    .frames(vec![
        StackMapFrame::SameLocalsNoStack { offset_delta: 6 },
        StackMapFrame::SameLocalsNoStack { offset_delta: 5 },
    ])
}

pub const COMPARE_DESCRIPTOR: &str = "(Ljava/lang/Object;Ljava/lang/Object;)I";

/// `static int compare(Object o, Object p) { if (o == null) return 0; return o == p ? 1 : 2; }`
pub fn compare_method() -> MethodDef {
    MethodDef::new(
        "compare",
        COMPARE_DESCRIPTOR,
        vec![
            0x2a, 0xc7, 0x00, 0x05, // if (o != null) goto present
            0x03, 0xac, // return 0
            0x2a, 0x2b, 0xa6, 0x00, 0x05, // present: if (o != p) goto other
            0x04, 0xac, // return 1
            0x05, 0xac, // other: return 2
        ],
    )
    .frames(vec![
        StackMapFrame::SameLocalsNoStack { offset_delta: 6 },
        StackMapFrame::SameLocalsNoStack { offset_delta: 6 },
    ])
}

/// `static int differ(Object o, Object p) { return o != null && o != p ? 1 : 0; }`
pub fn differ_method() -> MethodDef {
    use condprobe::jvm::verifier::VerificationType;

    MethodDef::new(
        "differ",
        COMPARE_DESCRIPTOR,
        vec![
            0x2a, 0xc6, 0x00, 0x0c, // if (o == null) goto no
            0x2a, 0x2b, 0xa5, 0x00, 0x07, // if (o == p) goto no
            0x04, 0xa7, 0x00, 0x04, // iconst_1, goto done
            0x03, // no: iconst_0
            0xac, // done: ireturn
        ],
    )
    .frames(vec![
        StackMapFrame::SameLocalsNoStack { offset_delta: 13 },
        StackMapFrame::SameLocalsOneStack {
            offset_delta: 0,
            stack: VerificationType::Integer,
        },
    ])
}

/// `static int zero() { return 0; }`
pub fn zero_method() -> MethodDef {
    MethodDef::new("zero", "()I", vec![0x03, 0xac])
}

/// `static int pick(int x) { switch (x) { case 0: return 1; default: return 0; } }`
pub fn switch_method() -> MethodDef {
    MethodDef::new(
        "pick",
        "(I)I",
        vec![
            0x1a, 0xaa, 0x00, 0x00, // iload_0, tableswitch, padding
            0x00, 0x00, 0x00, 0x15, // default
            0x00, 0x00, 0x00, 0x00, // low
            0x00, 0x00, 0x00, 0x00, // high
            0x00, 0x00, 0x00, 0x13, // case 0
            0x04, 0xac, 0x03, 0xac,
        ],
    )
    .frames(vec![
        StackMapFrame::SameLocalsNoStack { offset_delta: 20 },
        StackMapFrame::SameLocalsNoStack { offset_delta: 1 },
    ])
}
