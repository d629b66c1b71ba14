//! Supporting data structures that aren't specific to class files

mod offset_vec;

pub use offset_vec::*;
