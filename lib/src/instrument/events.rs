//! Structural event stream of a class, printed by `condprobe --list`
//!
//! Instrumentation does not consume these events. `instrument_class` rewrites the decoded blocks
//! of each method directly, and this module only reports what it would visit.

use super::Error;
use crate::jvm::class_file::{ClassFile, Code as CodeAttribute, ConstantsPool};
use crate::jvm::code::{BasicBlock, BranchInstruction, BranchKind, Code, SynLabel};
use crate::jvm::verifier::MethodHeader;
use crate::jvm::{BinaryName, MethodAccessFlags, MethodDescriptor, UnqualifiedName};
use crate::util::Offset;
use std::cell::Cell;
use std::collections::HashMap;

/// Structural view of a class, as seen by the rewriter
#[derive(Debug, Clone, PartialEq)]
pub enum ClassEvent {
    TypeBegin {
        name: BinaryName,
    },
    MethodBegin {
        access_flags: MethodAccessFlags,
        name: UnqualifiedName,
        descriptor: MethodDescriptor<BinaryName>,
    },

    /// Block terminator, with jump targets resolved to offsets in the original code
    InstructionVisit {
        offset: usize,
        mnemonic: &'static str,
        kind: BranchKind<usize, usize>,
    },
    MethodEnd,
    TypeEnd,
}

/// Read the events of a class file
///
/// Methods without code (`abstract` or `native`) still get a begin and end event. Synthetic
/// fall-through terminators are not instructions, so they are skipped.
pub fn read_events(bytes: &[u8]) -> Result<Vec<ClassEvent>, Error> {
    let class = ClassFile::parse(bytes).map_err(Error::Parse)?;
    let constants = ConstantsPool::from_offset_vec(class.constants.clone());
    let name = match constants.class_ref_type(class.this_class)? {
        crate::jvm::RefType::Object(name) => name,
        other => {
            return Err(Error::Parse(crate::jvm::Error::Malformed(format!(
                "this class is an array type {:?}",
                other
            ))))
        }
    };

    let mut events = vec![ClassEvent::TypeBegin { name: name.clone() }];
    for method in &class.methods {
        let header = MethodHeader::from_method(&name, method, &constants)?;
        events.push(ClassEvent::MethodBegin {
            access_flags: method.access_flags,
            name: header.name.clone(),
            descriptor: header.descriptor.clone(),
        });

        if let Some(position) = method.code_attribute_position(&constants)? {
            let attribute: CodeAttribute = method.attributes[position].decode()?;
            let code = Code::decode(&attribute, &constants, &header)?;
            events.extend(terminator_events(&code)?);
        }

        events.push(ClassEvent::MethodEnd);
    }
    events.push(ClassEvent::TypeEnd);

    Ok(events)
}

/// Visits for every real terminator of freshly decoded code
fn terminator_events(code: &Code) -> Result<Vec<ClassEvent>, Error> {
    let offsets: HashMap<SynLabel, Offset> =
        BasicBlock::compute_block_offsets(&code.block_order, &code.blocks);
    let unresolved =
        |lbl: SynLabel| Error::Precondition(format!("block {:?} has no offset", lbl));

    let mut events = vec![];
    for lbl in &code.block_order {
        let block = code.blocks.get(lbl).ok_or_else(|| unresolved(*lbl))?;
        if let BranchInstruction::FallThrough(_) = block.branch_end {
            continue;
        }
        let start = offsets.get(lbl).ok_or_else(|| unresolved(*lbl))?.0;

        let missing: Cell<Option<SynLabel>> = Cell::new(None);
        let offset_of = |target: &SynLabel| match offsets.get(target) {
            Some(offset) => offset.0,
            None => {
                missing.set(Some(*target));
                0
            }
        };
        let resolved = block.branch_end.map_labels(offset_of, offset_of, offset_of);
        if let Some(target) = missing.take() {
            return Err(unresolved(target));
        }

        events.push(ClassEvent::InstructionVisit {
            offset: start + block.instructions.offset_len().0,
            mnemonic: resolved.mnemonic(),
            kind: resolved.kind(),
        });
    }
    Ok(events)
}
