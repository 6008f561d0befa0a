//! Spanned syntax tree. Every node keeps its source span; expression nodes
//! carry a type slot that the semantic pass fills.

pub use super::token::{Ident, Sigil};
use super::Span;

/// Compile-time type of a slot or expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ty {
    Int16,
    Int32,
    Int64,
    UInt32,
    Single,
    Double,
    Str,
    FixedStr(u16),
    Record(u16),
}

impl Ty {
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            Ty::Int16 | Ty::Int32 | Ty::Int64 | Ty::UInt32 | Ty::Single | Ty::Double
        )
    }

    pub fn is_integer(self) -> bool {
        matches!(self, Ty::Int16 | Ty::Int32 | Ty::Int64 | Ty::UInt32)
    }

    pub fn is_string(self) -> bool {
        matches!(self, Ty::Str | Ty::FixedStr(_))
    }

    /// The type an identifier sigil implies.
    pub fn from_sigil(sigil: Sigil) -> Ty {
        match sigil {
            Sigil::Integer => Ty::Int16,
            Sigil::Long => Ty::Int32,
            Sigil::Single => Ty::Single,
            Sigil::Double => Ty::Double,
            Sigil::Text => Ty::Str,
            Sigil::Integer64 => Ty::Int64,
        }
    }

    /// Numeric widening join. `Int16 < Int32 < Int64 <= Single < Double`;
    /// `UInt32` fits into `Int64` and `Double` only.
    pub fn widen(a: Ty, b: Ty) -> Option<Ty> {
        use Ty::*;
        if !a.is_numeric() || !b.is_numeric() {
            return None;
        }
        if a == b {
            return Some(a);
        }
        Some(match (a, b) {
            (Double, _) | (_, Double) => Double,
            (Single, UInt32) | (UInt32, Single) => Double,
            (Single, _) | (_, Single) => Single,
            (UInt32, _) | (_, UInt32) => Int64,
            (Int64, _) | (_, Int64) => Int64,
            (Int32, _) | (_, Int32) => Int32,
            _ => Int16,
        })
    }

    /// Storage size in bytes, for record layout.
    pub fn size(self) -> u32 {
        match self {
            Ty::Int16 => 2,
            Ty::Int32 | Ty::UInt32 | Ty::Single => 4,
            Ty::Int64 | Ty::Double => 8,
            Ty::Str => 4,
            Ty::FixedStr(n) => n as u32,
            Ty::Record(_) => 0, // patched from the record table
        }
    }

    pub fn name(self) -> String {
        match self {
            Ty::Int16 => "INTEGER".to_string(),
            Ty::Int32 => "LONG".to_string(),
            Ty::Int64 => "_INTEGER64".to_string(),
            Ty::UInt32 => "_UNSIGNED LONG".to_string(),
            Ty::Single => "SINGLE".to_string(),
            Ty::Double => "DOUBLE".to_string(),
            Ty::Str => "STRING".to_string(),
            Ty::FixedStr(n) => format!("STRING * {}", n),
            Ty::Record(id) => format!("TYPE #{}", id),
        }
    }
}

/// A parsed (not yet analyzed) type annotation from `AS …`.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeRef {
    Int16,
    Int32,
    Int64,
    UInt32,
    Single,
    Double,
    Str,
    FixedStr(Box<Expr>),
    Named(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Module {
    pub stmts: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Dim {
        span: Span,
        shared: bool,
        redim: bool,
        decls: Vec<DimDecl>,
    },
    ConstDef {
        span: Span,
        defs: Vec<(Ident, Span, Expr)>,
    },
    TypeDef {
        span: Span,
        name: String,
        fields: Vec<(String, TypeRef, Span)>,
    },
    Assign {
        span: Span,
        target: LValue,
        value: Expr,
    },
    Print {
        span: Span,
        channel: Option<Expr>,
        items: Vec<PrintItem>,
    },
    Write {
        span: Span,
        channel: Option<Expr>,
        items: Vec<Expr>,
    },
    Input {
        span: Span,
        channel: Option<Expr>,
        prompt: Option<String>,
        line: bool,
        targets: Vec<LValue>,
    },
    If {
        span: Span,
        cond: Expr,
        then_body: Vec<Stmt>,
        elseifs: Vec<(Expr, Vec<Stmt>)>,
        else_body: Option<Vec<Stmt>>,
    },
    Select {
        span: Span,
        subject: Expr,
        arms: Vec<CaseArm>,
        else_body: Option<Vec<Stmt>>,
    },
    For {
        span: Span,
        var: Ident,
        var_span: Span,
        from: Expr,
        to: Expr,
        step: Option<Expr>,
        body: Vec<Stmt>,
    },
    While {
        span: Span,
        cond: Expr,
        body: Vec<Stmt>,
    },
    DoLoop {
        span: Span,
        pre: Option<LoopCond>,
        post: Option<LoopCond>,
        body: Vec<Stmt>,
    },
    Exit {
        span: Span,
        kind: ExitKind,
    },
    Goto {
        span: Span,
        target: LabelRef,
    },
    Gosub {
        span: Span,
        target: LabelRef,
    },
    Return {
        span: Span,
        target: Option<LabelRef>,
    },
    Proc(ProcDef),
    Declare {
        span: Span,
        is_function: bool,
        name: Ident,
        params: Vec<Param>,
    },
    Call {
        span: Span,
        name: String,
        name_span: Span,
        args: Vec<Expr>,
    },
    Open {
        span: Span,
        path: Expr,
        mode: OpenMode,
        channel: Expr,
    },
    Close {
        span: Span,
        channels: Vec<Expr>,
    },
    Data {
        span: Span,
        items: Vec<DataLit>,
    },
    Read {
        span: Span,
        targets: Vec<LValue>,
    },
    Restore {
        span: Span,
        target: Option<LabelRef>,
    },
    Randomize {
        span: Span,
        seed: Option<Expr>,
    },
    Swap {
        span: Span,
        left: LValue,
        right: LValue,
    },
    Cls {
        span: Span,
    },
    OptionBase {
        span: Span,
        base: i32,
    },
    Label {
        span: Span,
        name: String,
    },
    Meta {
        span: Span,
        name: String,
    },
    End {
        span: Span,
    },
}

impl Stmt {
    pub fn span(&self) -> &Span {
        use Stmt::*;
        match self {
            Dim { span, .. }
            | ConstDef { span, .. }
            | TypeDef { span, .. }
            | Assign { span, .. }
            | Print { span, .. }
            | Write { span, .. }
            | Input { span, .. }
            | If { span, .. }
            | Select { span, .. }
            | For { span, .. }
            | While { span, .. }
            | DoLoop { span, .. }
            | Exit { span, .. }
            | Goto { span, .. }
            | Gosub { span, .. }
            | Return { span, .. }
            | Declare { span, .. }
            | Call { span, .. }
            | Open { span, .. }
            | Close { span, .. }
            | Data { span, .. }
            | Read { span, .. }
            | Restore { span, .. }
            | Randomize { span, .. }
            | Swap { span, .. }
            | Cls { span }
            | OptionBase { span, .. }
            | Label { span, .. }
            | Meta { span, .. }
            | End { span } => span,
            Proc(def) => &def.span,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DimDecl {
    pub name: Ident,
    pub span: Span,
    /// `Some` for arrays: per-dimension `(lower, upper)`; a missing lower
    /// bound takes the `OPTION BASE` default.
    pub bounds: Option<Vec<(Option<Expr>, Expr)>>,
    pub ty: Option<TypeRef>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PrintItem {
    Expr(Expr),
    Comma,
    Semicolon,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaseArm {
    pub span: Span,
    pub guards: Vec<CaseGuard>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CaseGuard {
    Equal(Expr),
    Range(Expr, Expr),
    Is(CmpOp, Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoopCond {
    pub until: bool,
    pub cond: Expr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    For,
    Do,
    Sub,
    Function,
}

/// A jump target: `Foo:` style or a bare line number.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelRef {
    pub name: String,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Input,
    Output,
    Append,
    Binary,
    Random,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcDef {
    pub span: Span,
    pub is_function: bool,
    pub name: Ident,
    pub name_span: Span,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: Ident,
    pub span: Span,
    pub by_val: bool,
    pub ty: Option<TypeRef>,
}

/// DATA items are literal tokens: numbers or quoted strings.
#[derive(Debug, Clone, PartialEq)]
pub enum DataLit {
    Int(i64),
    Float(f64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum LValue {
    Var(Ident, Span),
    Index(Ident, Vec<Expr>, Span),
    Field(Box<LValue>, String, Span),
}

impl LValue {
    pub fn span(&self) -> &Span {
        match self {
            LValue::Var(_, span) | LValue::Index(_, _, span) | LValue::Field(_, _, span) => span,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
    /// Filled by the semantic pass.
    pub ty: Option<Ty>,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Expr {
        Expr {
            kind,
            span,
            ty: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Int(i16),
    Long(i32),
    Int64(i64),
    Single(f32),
    Double(f64),
    Str(String),
    Var(Ident),
    /// `name(args)`: array element, FUNCTION call, or built-in; the
    /// analyzer rewrites this into one of the resolved forms below.
    Index {
        name: Ident,
        args: Vec<Expr>,
    },
    Field {
        base: Box<Expr>,
        field: String,
        field_span: Span,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// Resolved FUNCTION call.
    CallFn {
        proc: u16,
        args: Vec<Expr>,
    },
    /// Resolved built-in call.
    Builtin {
        builtin: super::Builtin,
        args: Vec<Expr>,
    },
    /// Implicit conversion inserted by the analyzer.
    Coerce {
        to: Ty,
        expr: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Pow,
    Mul,
    Div,
    IntDiv,
    Mod,
    Add,
    Sub,
    Cmp(CmpOp),
    And,
    Or,
}
