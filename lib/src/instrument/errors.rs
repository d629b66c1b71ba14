use crate::jvm;
use std::fmt;
use std::path::PathBuf;

#[derive(Debug)]
pub enum Error {
    /// Input could not be read or is not a well-formed class file
    Parse(jvm::Error),

    /// The class contains something that cannot be instrumented
    UnsupportedConstruct(String),

    /// Internal invariant of the rewriter was broken
    Precondition(String),

    /// Output could not be written
    Write(std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Parse(err) => write!(f, "cannot parse class: {}", err),
            Error::UnsupportedConstruct(msg) => write!(f, "unsupported construct: {}", msg),
            Error::Precondition(msg) => write!(f, "internal error: {}", msg),
            Error::Write(err) => write!(f, "cannot write output: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Parse(err) => Some(err),
            Error::Write(err) => Some(err),
            _ => None,
        }
    }
}

/// Class file errors are sorted by what caused them: limits of the format are unsupported
/// constructs, broken layouts are internal errors, and everything else traces back to the input.
impl From<jvm::Error> for Error {
    fn from(err: jvm::Error) -> Error {
        match err {
            jvm::Error::ConstantPoolOverflow { .. }
            | jvm::Error::MethodCodeMaxStackOverflow(_)
            | jvm::Error::MethodCodeMaxLocalsOverflow(_)
            | jvm::Error::MethodCodeOverflow(_) => Error::UnsupportedConstruct(err.to_string()),
            jvm::Error::InvalidLayout(msg) => Error::Precondition(msg),
            other => Error::Parse(other),
        }
    }
}

impl From<jvm::ConstantPoolOverflow> for Error {
    fn from(overflow: jvm::ConstantPoolOverflow) -> Error {
        Error::from(jvm::Error::from(overflow))
    }
}

/// Error attributed to the input file that caused it
#[derive(Debug)]
pub struct FileError {
    pub input: PathBuf,
    pub error: Error,
}

impl fmt::Display for FileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.input.display(), self.error)
    }
}

impl std::error::Error for FileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}
