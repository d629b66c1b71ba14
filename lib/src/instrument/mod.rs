//! Make conditional branch outcomes observable
//!
//! Every two-way conditional jump in a class gets its outcome materialized as a boolean, which is
//! passed through a static identity method on the class before the jump is taken:
//!
//! ```text
//! if (x > 0) ...        ==>       if (__CONDITION__METHOD(x > 0)) ...
//! ```
//!
//! A tracer that records the arguments of `__CONDITION__METHOD` then knows which way every branch
//! went. Multi-way branches (`tableswitch` and `lookupswitch`) have no single boolean outcome, so
//! classes containing them are rejected.
//!
//! The pipeline for one class is:
//!
//!   - parse the class file and decode every method body into labelled blocks
//!   - rewrite the block terminators (see [`MethodContext::visit_terminator`])
//!   - append the helper method (see [`helper::helper_method`])
//!   - serialize everything back, recomputing maximums and stack map frames
//!
//! [`batch`] applies this to whole directory trees.

pub mod batch;
mod errors;
pub mod events;
pub mod helper;
mod rewriter;

pub use errors::*;
pub use rewriter::*;

/// Name of the method that conditions are passed through
pub const HELPER_NAME: &str = "__CONDITION__METHOD";

/// Descriptor of the helper: `boolean -> boolean`
pub const HELPER_DESCRIPTOR: &str = "(Z)Z";

/// Name of the helper's parameter in its local variable table
pub const HELPER_PARAMETER: &str = "arg";
