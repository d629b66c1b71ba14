//! Raw class file structures, as they are laid out on disk
//!
//! Everything here is a thin typed view of the bytes: constants are referred to by index and
//! method bodies are opaque bytes. See [`crate::jvm::code`] for a structured view of method code.

mod attribute;
mod binary_format;
mod class;
mod constants;
mod field;
mod method;
mod version;

pub use attribute::*;
pub use binary_format::*;
pub use class::*;
pub use constants::*;
pub use field::*;
pub use method::*;
pub use version::*;
