use super::Span;

/// A compile-time diagnostic. These are collected, not thrown; a single
/// run of the pipeline may report many.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub code: DiagnosticCode,
    pub span: Span,
    pub message: Option<String>,
}

/// Build a [`Diagnostic`] from a code, a span, and an optional message.
///
/// `diag!(TypeMismatch, span)` or `diag!(UnexpectedToken, span; "expected THEN")`.
#[macro_export]
macro_rules! diag {
    ($code:ident, $span:expr) => {
        $crate::lang::Diagnostic::new($crate::lang::DiagnosticCode::$code, $span.clone(), None)
    };
    ($code:ident, $span:expr; $msg:expr) => {
        $crate::lang::Diagnostic::new(
            $crate::lang::DiagnosticCode::$code,
            $span.clone(),
            Some($msg.into()),
        )
    };
}

impl Diagnostic {
    pub fn new(code: DiagnosticCode, span: Span, message: Option<String>) -> Diagnostic {
        Diagnostic {
            code,
            span,
            message,
        }
    }

    /// Warnings do not fail the pipeline.
    pub fn is_warning(&self) -> bool {
        matches!(self.code, DiagnosticCode::InvalidForStep)
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{}: line {}, column {}",
            self.code.as_str(),
            self.span.line,
            self.span.col
        )?;
        if let Some(msg) = &self.message {
            write!(f, "; {}", msg)?;
        }
        Ok(())
    }
}

impl std::error::Error for Diagnostic {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticCode {
    UnterminatedString,
    InvalidNumber,
    IllegalCharacter,
    UnexpectedToken,
    ExpectedEndOfLine,
    TypeMismatch,
    Undeclared,
    Redeclared,
    ArityMismatch,
    NotAnLValue,
    ConstAssign,
    BadCaseRange,
    DuplicateLabel,
    UnknownLabel,
    NonConstInConst,
    InvalidForStep,
    RecordFieldUnknown,
}

impl DiagnosticCode {
    pub fn as_str(self) -> &'static str {
        use DiagnosticCode::*;
        match self {
            UnterminatedString => "Unterminated string",
            InvalidNumber => "Invalid number",
            IllegalCharacter => "Illegal character",
            UnexpectedToken => "Unexpected token",
            ExpectedEndOfLine => "Expected end of statement",
            TypeMismatch => "Type mismatch",
            Undeclared => "Undeclared name",
            Redeclared => "Duplicate definition",
            ArityMismatch => "Wrong number of arguments",
            NotAnLValue => "Expected a variable",
            ConstAssign => "Cannot assign to constant",
            BadCaseRange => "Bad CASE range",
            DuplicateLabel => "Duplicate label",
            UnknownLabel => "Label not defined",
            NonConstInConst => "Expression in CONST is not constant",
            InvalidForStep => "FOR step of zero never iterates",
            RecordFieldUnknown => "Element not defined",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let d = Diagnostic::new(
            DiagnosticCode::TypeMismatch,
            Span::new(4, 7, 2, 5),
            None,
        );
        assert_eq!(d.to_string(), "Type mismatch: line 2, column 5");
        let d = Diagnostic::new(
            DiagnosticCode::UnexpectedToken,
            Span::new(0, 1, 1, 1),
            Some("expected THEN".to_string()),
        );
        assert_eq!(
            d.to_string(),
            "Unexpected token: line 1, column 1; expected THEN"
        );
    }
}
