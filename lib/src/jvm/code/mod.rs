//! Bytecode representation and generation
//!
//! ### Structure
//!
//! Despite being pushed off into [just another method attribute](crate::jvm::class_file::Code),
//! the bytecode is arguably the most important part of the class file - it contains the actual
//! executable instructions. Method bodies are essentially just a CFG of basic blocks, with an
//! operand stack and a stack of local variables. We split up the [list of bytecode
//! instructions][0] into two groups:
//!
//!   - [`Instruction`] for straight-line instructions (the body of the basic blocks)
//!   - [`BranchInstruction`] for instructions that may branch (the end of the basic blocks)
//!
//! With these, we can literally represent the method [`Code`] as an ordered sequence of
//! [`BasicBlock`]s.
//!
//! ### Rewriting
//!
//! [`Code::decode`] splits a method body into blocks whose jumps, exception ranges and debug
//! tables all refer to labels. Blocks can then be edited freely before [`Code::serialize_code`]
//! lays them out again, widening jumps that no longer fit (see [`jump_encoding`]) and recomputing
//! the maximum stack, the maximum locals, and the stack map frames (see [`crate::jvm::verifier`]).
//!
//! [0]: https://docs.oracle.com/javase/specs/jvms/se18/html/jvms-6.html#jvms-6.5

mod basic_block;
mod code;
mod decode;
mod instructions;
pub mod jump_encoding;
mod label;

pub use basic_block::*;
pub use code::*;
pub use decode::*;
pub use instructions::*;
pub use label::*;
