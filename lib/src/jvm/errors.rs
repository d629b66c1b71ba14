use super::{ClassConstantIndex, Constant, ConstantIndex, ConstantPoolOverflow};
use super::verifier::Frame;
use crate::util::Offset;
use std::fmt;

#[derive(Debug)]
pub enum Error {
    ConstantPoolOverflow {
        constant: Constant,
        offset: usize,
    },
    IoError(std::io::Error),

    /// Input does not follow the class file format
    Malformed(String),

    /// Blocks were laid out in an order inconsistent with their fallthrough targets
    InvalidLayout(String),

    MethodCodeMaxStackOverflow(Offset),
    MethodCodeMaxLocalsOverflow(Offset),
    MethodCodeOverflow(Offset),

    /// Error trying to infer the frame after an instruction
    VerifierError {
        instruction: String,
        kind: VerifierErrorKind,
    },
    VerifierBranchingError {
        instruction: String,
        kind: VerifierErrorKind,
    },

    /// A particular offset has two conflicting frames
    ConflictingFrames(
        Offset,
        Frame<ClassConstantIndex, u16>,
        Frame<ClassConstantIndex, u16>,
    ),
}

#[derive(Debug)]
pub enum VerifierErrorKind {
    EmptyStack,
    InvalidWidth(usize),
    InvalidIndex,
    MissingConstant(ConstantIndex),
    NotLoadableConstant(Constant),
    BadDescriptor(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ConstantPoolOverflow { offset, .. } => {
                write!(f, "constant pool overflow at index {}", offset)
            }
            Error::IoError(err) => write!(f, "I/O error: {}", err),
            Error::Malformed(msg) => write!(f, "malformed class file: {}", msg),
            Error::InvalidLayout(msg) => write!(f, "invalid block layout: {}", msg),
            Error::MethodCodeMaxStackOverflow(Offset(n)) => {
                write!(f, "method stack height {} does not fit in a u16", n)
            }
            Error::MethodCodeMaxLocalsOverflow(Offset(n)) => {
                write!(f, "method locals size {} does not fit in a u16", n)
            }
            Error::MethodCodeOverflow(Offset(n)) => {
                write!(f, "method code is {} bytes long (max is 65535)", n)
            }
            Error::VerifierError { instruction, kind }
            | Error::VerifierBranchingError { instruction, kind } => {
                write!(f, "cannot infer frame after `{}`: {}", instruction, kind)
            }
            Error::ConflictingFrames(Offset(offset), _, _) => {
                write!(f, "conflicting stack map frames at offset {}", offset)
            }
        }
    }
}

impl fmt::Display for VerifierErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifierErrorKind::EmptyStack => f.write_str("operand stack underflow"),
            VerifierErrorKind::InvalidWidth(w) => write!(f, "unexpected value of width {}", w),
            VerifierErrorKind::InvalidIndex => f.write_str("invalid local variable index"),
            VerifierErrorKind::MissingConstant(ConstantIndex(idx)) => {
                write!(f, "missing or mistyped constant #{}", idx)
            }
            VerifierErrorKind::NotLoadableConstant(constant) => {
                write!(f, "constant {:?} cannot be loaded", constant)
            }
            VerifierErrorKind::BadDescriptor(desc) => write!(f, "bad descriptor '{}'", desc),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::IoError(err)
    }
}

impl From<ConstantPoolOverflow> for Error {
    fn from(overflow: ConstantPoolOverflow) -> Error {
        Error::ConstantPoolOverflow {
            constant: overflow.constant,
            offset: overflow.offset as usize,
        }
    }
}
