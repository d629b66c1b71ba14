//! Read, rewrite, and write JVM classes
//!
//! ### Simple example
//!
//! Consider a method body that is already inside a parsed class:
//!
//! ```java,ignore,no_run
//! static int sign(int x) {
//!     return x > 0 ? 1 : 0;
//! }
//! ```
//!
//! Rewriting it goes through the labelled [`code::Code`] representation, which recomputes
//! everything that depends on offsets when it is serialized again:
//!
//! ```
//! use condprobe::jvm::class_file::{BytecodeArray, Code as CodeAttribute, ConstantsPool, Version};
//! use condprobe::jvm::code::Code;
//! use condprobe::jvm::verifier::MethodHeader;
//! use condprobe::jvm::*;
//!
//! # fn rewrite_method() -> Result<(), Error> {
//! let mut constants = ConstantsPool::new();
//! let header = MethodHeader {
//!     class: BinaryName::from_string(String::from("demo/Sign")).unwrap(),
//!     name: UnqualifiedName::from_string(String::from("sign")).unwrap(),
//!     descriptor: MethodDescriptor::parse("(I)I").unwrap(),
//!     is_static: true,
//! };
//! let attribute = CodeAttribute {
//!     max_stack: 1,
//!     max_locals: 1,
//!     code_array: BytecodeArray(vec![0x1a, 0x9e, 0x00, 0x05, 0x04, 0xac, 0x03, 0xac]),
//!     exception_table: vec![],
//!     attributes: vec![],
//! };
//!
//! // Split into blocks, edit the blocks, then lay them out again
//! let code = Code::decode(&attribute, &constants, &header)?;
//! assert_eq!(code.block_order.len(), 3);
//! let rewritten = code.serialize_code(&header, &mut constants, Version::JAVA8)?;
//! assert_eq!(rewritten.code_array, attribute.code_array);
//! # Ok(())
//! # }
//! # rewrite_method().unwrap();
//! ```

mod access_flags;
pub mod class_file;
pub mod code;
mod descriptors;
mod errors;
mod names;
pub mod verifier;

pub use access_flags::*;
pub use class_file::{
    ClassConstantIndex, Constant, ConstantIndex, ConstantPoolOverflow, FieldRefConstantIndex,
    HandleKind, InvokeDynamicConstantIndex, MethodRefConstantIndex, NameAndTypeConstantIndex,
    Utf8ConstantIndex,
};
pub use descriptors::*;
pub use errors::*;
pub use names::*;
