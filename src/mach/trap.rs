use thiserror::Error;

/// Runtime failures. One terminates execution; there is no user-level
/// error handling in the language surface.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrapKind {
    #[error("Overflow")]
    Overflow,
    #[error("Division by zero")]
    DivideByZero,
    #[error("Subscript out of range")]
    BoundsViolation,
    #[error("Type mismatch")]
    TypeMismatch,
    #[error("Bad file number")]
    BadChannel,
    #[error("Device I/O error: {0}")]
    IoError(String),
    #[error("Out of DATA")]
    OutOfData,
    #[error("RETURN without GOSUB")]
    ReturnWithoutGosub,
    #[error("Out of stack space")]
    StackOverflow,
    #[error("Interrupted")]
    Interrupted,
    #[error("Illegal function call")]
    IllegalFunctionCall,
    #[error("Feature unavailable")]
    FeatureUnavailable,
    /// Emitter invariants make these unreachable; kept so the VM never
    /// panics on a corrupt image.
    #[error("Internal error: {0}")]
    Internal(&'static str),
}

/// A trap plus the source position of the faulting instruction, taken
/// from the image's source map.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} at line {line}, column {col}")]
pub struct Trap {
    pub kind: TrapKind,
    pub line: u32,
    pub col: u32,
}

impl Trap {
    pub fn bare(kind: TrapKind) -> Trap {
        Trap {
            kind,
            line: 0,
            col: 0,
        }
    }
}
