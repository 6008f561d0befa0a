use super::ast::*;
use super::builtin::Builtin;
use super::{Diagnostic, Span};
use crate::diag;
use std::collections::HashMap;

/// Resolve names and types across a parsed module.
///
/// Two sub-passes, both in source order: collection gathers constants,
/// record types, procedure signatures, and the flat DATA pool; resolution
/// assigns slots and types, inserts coercions, and binds labels.
pub fn analyze(module: &mut Module) -> (Analysis, Vec<Diagnostic>) {
    let mut analyzer = Analyzer::default();
    analyzer.collect(module);
    analyzer.resolve(module);
    let Analyzer {
        records,
        procs,
        data,
        data_labels,
        base,
        globals,
        global_index,
        select_slots,
        diagnostics,
        consts,
        ..
    } = analyzer;
    (
        Analysis {
            records,
            procs,
            consts,
            data,
            data_labels,
            base,
            globals,
            global_index,
            select_slots,
        },
        diagnostics,
    )
}

/// Namespace key: identifier key plus the scalar/array distinction.
/// `A` and `A()` coexist; `A%` and `A!` are different names entirely.
pub type SlotKey = (String, bool);

#[derive(Debug, Clone, PartialEq)]
pub struct SlotDef {
    pub name: String,
    pub ty: Ty,
    pub is_array: bool,
    pub dims: u8,
    pub shared: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordDef {
    pub name: String,
    pub fields: Vec<FieldDef>,
    pub size: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub ty: Ty,
    pub offset: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcKind {
    Sub,
    Function,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamSig {
    pub ty: Ty,
    pub by_ref: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcSig {
    pub name: String,
    pub kind: ProcKind,
    pub params: Vec<ParamSig>,
    pub ret: Option<Ty>,
    pub locals: Vec<SlotDef>,
    pub local_index: HashMap<SlotKey, u16>,
    pub labels: HashMap<String, Span>,
    pub defined: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConstVal {
    Int(i64),
    Float(f64),
    Text(String),
}

#[derive(Debug, Default)]
pub struct Analysis {
    pub records: Vec<RecordDef>,
    pub procs: Vec<ProcSig>,
    pub consts: HashMap<String, (Ty, ConstVal)>,
    pub data: Vec<DataLit>,
    pub data_labels: HashMap<String, u32>,
    pub base: i32,
    pub globals: Vec<SlotDef>,
    pub global_index: HashMap<SlotKey, u16>,
    /// Hidden subject slots for SELECT CASE, keyed by the subject
    /// expression's byte range.
    pub select_slots: HashMap<(usize, usize), (bool, u16)>,
}

impl Analysis {
    /// Mirror of the resolver's lookup order, for the emitter.
    pub fn slot(&self, proc: Option<u16>, key: &SlotKey) -> Option<(bool, u16)> {
        if let Some(p) = proc {
            let sig = &self.procs[p as usize];
            if let Some(&i) = sig.local_index.get(key) {
                return Some((false, i));
            }
            if let Some(&i) = self.global_index.get(key) {
                if self.globals[i as usize].shared {
                    return Some((true, i));
                }
            }
            None
        } else {
            self.global_index.get(key).map(|&i| (true, i))
        }
    }

    pub fn slot_def(&self, proc: Option<u16>, global: bool, index: u16) -> &SlotDef {
        if global {
            &self.globals[index as usize]
        } else {
            &self.procs[proc.expect("local slot outside procedure") as usize].locals
                [index as usize]
        }
    }

    pub fn record(&self, id: u16) -> &RecordDef {
        &self.records[id as usize]
    }
}

#[derive(Default)]
struct Analyzer {
    records: Vec<RecordDef>,
    record_index: HashMap<String, u16>,
    procs: Vec<ProcSig>,
    proc_index: HashMap<String, u16>,
    consts: HashMap<String, (Ty, ConstVal)>,
    data: Vec<DataLit>,
    data_labels: HashMap<String, u32>,
    base: i32,
    globals: Vec<SlotDef>,
    global_index: HashMap<SlotKey, u16>,
    module_labels: HashMap<String, Span>,
    select_slots: HashMap<(usize, usize), (bool, u16)>,
    select_counter: usize,
    diagnostics: Vec<Diagnostic>,
    ctx: Option<u16>,
    for_vars: Vec<String>,
    do_depth: usize,
}

impl Analyzer {
    fn error(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    // ----- pass A: collection -----

    fn collect(&mut self, module: &Module) {
        for stmt in &module.stmts {
            self.collect_stmt(stmt, None);
        }
        // DECLARE without a body is a missing link in a single
        // translation unit.
        for sig in &self.procs {
            if !sig.defined {
                self.diagnostics.push(Diagnostic::new(
                    super::DiagnosticCode::Undeclared,
                    Span::default(),
                    Some(format!("{} declared but never defined", sig.name)),
                ));
            }
        }
    }

    fn collect_stmt(&mut self, stmt: &Stmt, proc: Option<u16>) {
        match stmt {
            Stmt::OptionBase { base, .. } => self.base = *base,
            Stmt::ConstDef { defs, .. } => {
                for (name, name_span, value) in defs {
                    let key = name.key();
                    if self.consts.contains_key(&key) {
                        self.error(diag!(Redeclared, name_span; key.clone()));
                        continue;
                    }
                    match self.eval_const(value) {
                        Some((ty, val)) => {
                            let ty = match name.sigil {
                                Some(sigil) => Ty::from_sigil(sigil),
                                None => ty,
                            };
                            self.consts.insert(key, (ty, val));
                        }
                        None => {
                            self.error(diag!(NonConstInConst, value.span));
                        }
                    }
                }
            }
            Stmt::TypeDef { span, name, fields } => {
                if self.record_index.contains_key(name) {
                    self.error(diag!(Redeclared, span; name.clone()));
                    return;
                }
                let mut defs = Vec::new();
                let mut offset = 0u32;
                for (field, type_ref, field_span) in fields {
                    if defs.iter().any(|f: &FieldDef| &f.name == field) {
                        self.error(diag!(Redeclared, field_span; field.clone()));
                        continue;
                    }
                    let ty = self.resolve_type_ref(type_ref, field_span);
                    let size = self.ty_size(ty);
                    defs.push(FieldDef {
                        name: field.clone(),
                        ty,
                        offset,
                    });
                    offset += size;
                }
                let id = self.records.len() as u16;
                self.records.push(RecordDef {
                    name: name.clone(),
                    fields: defs,
                    size: offset,
                });
                self.record_index.insert(name.clone(), id);
            }
            Stmt::Proc(def) => {
                let id = self.register_proc(
                    &def.name,
                    &def.name_span,
                    def.is_function,
                    &def.params,
                    true,
                );
                for inner in &def.body {
                    self.collect_stmt(inner, id);
                }
            }
            Stmt::Declare {
                span,
                is_function,
                name,
                params,
            } => {
                self.register_proc(name, span, *is_function, params, false);
            }
            Stmt::Label { span, name } => {
                let labels = match proc {
                    Some(p) => &mut self.procs[p as usize].labels,
                    None => &mut self.module_labels,
                };
                if labels.contains_key(name) {
                    let dup = diag!(DuplicateLabel, span; name.clone());
                    self.diagnostics.push(dup);
                } else {
                    labels.insert(name.clone(), span.clone());
                }
                // RESTORE binds a label to the first DATA item at or
                // after it, in lexical order.
                self.data_labels
                    .entry(name.clone())
                    .or_insert(self.data.len() as u32);
            }
            Stmt::Data { items, .. } => {
                self.data.extend(items.iter().cloned());
            }
            Stmt::If {
                then_body,
                elseifs,
                else_body,
                ..
            } => {
                for s in then_body {
                    self.collect_stmt(s, proc);
                }
                for (_, body) in elseifs {
                    for s in body {
                        self.collect_stmt(s, proc);
                    }
                }
                if let Some(body) = else_body {
                    for s in body {
                        self.collect_stmt(s, proc);
                    }
                }
            }
            Stmt::Select {
                arms, else_body, ..
            } => {
                for arm in arms {
                    for s in &arm.body {
                        self.collect_stmt(s, proc);
                    }
                }
                if let Some(body) = else_body {
                    for s in body {
                        self.collect_stmt(s, proc);
                    }
                }
            }
            Stmt::For { body, .. }
            | Stmt::While { body, .. }
            | Stmt::DoLoop { body, .. } => {
                for s in body {
                    self.collect_stmt(s, proc);
                }
            }
            _ => {}
        }
    }

    fn register_proc(
        &mut self,
        name: &Ident,
        span: &Span,
        is_function: bool,
        params: &[Param],
        defined: bool,
    ) -> Option<u16> {
        let key = name.key();
        let sigs: Vec<ParamSig> = params
            .iter()
            .map(|p| ParamSig {
                ty: self.param_ty(p),
                by_ref: !p.by_val,
            })
            .collect();
        let ret = if is_function {
            Some(match name.sigil {
                Some(sigil) => Ty::from_sigil(sigil),
                None => Ty::Single,
            })
        } else {
            None
        };
        if let Some(&id) = self.proc_index.get(&key) {
            let existing = &mut self.procs[id as usize];
            if existing.params.len() != sigs.len() || existing.ret != ret {
                self.error(diag!(Redeclared, span; format!("{} signature differs", key)));
                return Some(id);
            }
            if defined {
                if existing.defined {
                    self.error(diag!(Redeclared, span; key));
                    return Some(id);
                }
                existing.defined = true;
                // The body's parameter names come from the definition.
                self.bind_proc_locals(id, name, is_function, params);
            }
            return Some(id);
        }
        let id = self.procs.len() as u16;
        self.procs.push(ProcSig {
            name: key.clone(),
            kind: if is_function {
                ProcKind::Function
            } else {
                ProcKind::Sub
            },
            params: sigs,
            ret,
            locals: Vec::new(),
            local_index: HashMap::new(),
            labels: HashMap::new(),
            defined,
        });
        self.proc_index.insert(key, id);
        if defined {
            self.bind_proc_locals(id, name, is_function, params);
        }
        Some(id)
    }

    fn bind_proc_locals(&mut self, id: u16, name: &Ident, is_function: bool, params: &[Param]) {
        let mut locals = Vec::new();
        let mut index = HashMap::new();
        for p in params {
            let ty = self.param_ty(p);
            index.insert((p.name.key(), false), locals.len() as u16);
            locals.push(SlotDef {
                name: p.name.key(),
                ty,
                is_array: false,
                dims: 0,
                shared: false,
            });
        }
        if is_function {
            // The function's name doubles as its result slot.
            let ret = self.procs[id as usize].ret.unwrap_or(Ty::Single);
            index.insert((name.key(), false), locals.len() as u16);
            locals.push(SlotDef {
                name: name.key(),
                ty: ret,
                is_array: false,
                dims: 0,
                shared: false,
            });
        }
        let sig = &mut self.procs[id as usize];
        sig.locals = locals;
        sig.local_index = index;
    }

    fn param_ty(&mut self, p: &Param) -> Ty {
        match &p.ty {
            Some(type_ref) => self.resolve_type_ref(type_ref, &p.span),
            None => match p.name.sigil {
                Some(sigil) => Ty::from_sigil(sigil),
                None => Ty::Single,
            },
        }
    }

    fn resolve_type_ref(&mut self, type_ref: &TypeRef, span: &Span) -> Ty {
        match type_ref {
            TypeRef::Int16 => Ty::Int16,
            TypeRef::Int32 => Ty::Int32,
            TypeRef::Int64 => Ty::Int64,
            TypeRef::UInt32 => Ty::UInt32,
            TypeRef::Single => Ty::Single,
            TypeRef::Double => Ty::Double,
            TypeRef::Str => Ty::Str,
            TypeRef::FixedStr(len) => match self.eval_const(len) {
                Some((_, ConstVal::Int(n))) if n > 0 && n <= u16::MAX as i64 => {
                    Ty::FixedStr(n as u16)
                }
                Some(_) | None => {
                    self.error(diag!(NonConstInConst, span; "fixed string length"));
                    Ty::Str
                }
            },
            TypeRef::Named(name) => match self.record_index.get(name) {
                Some(&id) => Ty::Record(id),
                None => {
                    self.error(diag!(Undeclared, span; format!("type {}", name)));
                    Ty::Single
                }
            },
        }
    }

    fn ty_size(&self, ty: Ty) -> u32 {
        match ty {
            Ty::Record(id) => self.records[id as usize].size,
            other => other.size(),
        }
    }

    fn eval_const(&self, expr: &Expr) -> Option<(Ty, ConstVal)> {
        match &expr.kind {
            ExprKind::Int(n) => Some((Ty::Int16, ConstVal::Int(*n as i64))),
            ExprKind::Long(n) => Some((Ty::Int32, ConstVal::Int(*n as i64))),
            ExprKind::Int64(n) => Some((Ty::Int64, ConstVal::Int(*n))),
            ExprKind::Single(n) => Some((Ty::Single, ConstVal::Float(*n as f64))),
            ExprKind::Double(n) => Some((Ty::Double, ConstVal::Float(*n))),
            ExprKind::Str(s) => Some((Ty::Str, ConstVal::Text(s.clone()))),
            ExprKind::Var(id) => self.consts.get(&id.key()).cloned(),
            ExprKind::Unary { op, expr } => {
                let (ty, val) = self.eval_const(expr)?;
                match (op, val) {
                    (UnaryOp::Neg, ConstVal::Int(n)) => Some((ty, ConstVal::Int(-n))),
                    (UnaryOp::Neg, ConstVal::Float(n)) => Some((ty, ConstVal::Float(-n))),
                    (UnaryOp::Not, ConstVal::Int(n)) => Some((ty, ConstVal::Int(!n))),
                    _ => None,
                }
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let (lty, lv) = self.eval_const(lhs)?;
                let (rty, rv) = self.eval_const(rhs)?;
                const_binary(*op, lty, lv, rty, rv)
            }
            _ => None,
        }
    }

    // ----- pass B: resolution -----

    fn resolve(&mut self, module: &mut Module) {
        let mut stmts = std::mem::take(&mut module.stmts);
        for stmt in &mut stmts {
            self.resolve_stmt(stmt);
        }
        module.stmts = stmts;
    }

    fn resolve_stmt(&mut self, stmt: &mut Stmt) {
        match stmt {
            Stmt::Proc(def) => {
                let key = def.name.key();
                self.ctx = self.proc_index.get(&key).copied();
                for inner in &mut def.body {
                    self.resolve_stmt(inner);
                }
                self.ctx = None;
            }
            Stmt::Dim {
                shared,
                redim,
                decls,
                ..
            } => {
                for decl in decls {
                    self.resolve_dim(decl, *shared, *redim);
                }
            }
            Stmt::ConstDef { defs, .. } => {
                // Collected in pass A; only sanity-check the expressions.
                for (_, _, value) in defs {
                    let _ = self.eval_const(value);
                }
            }
            Stmt::TypeDef { .. }
            | Stmt::Data { .. }
            | Stmt::OptionBase { .. }
            | Stmt::Meta { .. }
            | Stmt::Label { .. }
            | Stmt::End { .. }
            | Stmt::Cls { .. }
            | Stmt::Declare { .. } => {}
            Stmt::Assign { target, value, .. } => {
                let target_ty = self.resolve_lvalue(target, true);
                self.resolve_expr(value);
                if let Some(ty) = target_ty {
                    self.coerce(value, ty);
                }
            }
            Stmt::Print { channel, items, .. } => {
                if let Some(chan) = channel {
                    self.resolve_expr(chan);
                    self.coerce(chan, Ty::Int16);
                }
                for item in items {
                    if let PrintItem::Expr(e) = item {
                        let ty = self.resolve_expr(e);
                        if matches!(ty, Some(Ty::Record(_))) {
                            self.error(diag!(TypeMismatch, e.span; "cannot PRINT a record"));
                        }
                    }
                }
            }
            Stmt::Write { channel, items, .. } => {
                if let Some(chan) = channel {
                    self.resolve_expr(chan);
                    self.coerce(chan, Ty::Int16);
                }
                for e in items {
                    let ty = self.resolve_expr(e);
                    if matches!(ty, Some(Ty::Record(_))) {
                        self.error(diag!(TypeMismatch, e.span; "cannot WRITE a record"));
                    }
                }
            }
            Stmt::Input {
                channel, targets, ..
            } => {
                if let Some(chan) = channel {
                    self.resolve_expr(chan);
                    self.coerce(chan, Ty::Int16);
                }
                for target in targets {
                    let ty = self.resolve_lvalue(target, true);
                    if matches!(ty, Some(Ty::Record(_))) {
                        self.error(
                            diag!(TypeMismatch, target.span(); "cannot INPUT a whole record"),
                        );
                    }
                }
            }
            Stmt::If {
                cond,
                then_body,
                elseifs,
                else_body,
                ..
            } => {
                self.resolve_cond(cond);
                for s in then_body {
                    self.resolve_stmt(s);
                }
                for (c, body) in elseifs {
                    self.resolve_cond(c);
                    for s in body {
                        self.resolve_stmt(s);
                    }
                }
                if let Some(body) = else_body {
                    for s in body {
                        self.resolve_stmt(s);
                    }
                }
            }
            Stmt::Select {
                subject,
                arms,
                else_body,
                ..
            } => {
                let subject_ty = self.resolve_expr(subject).unwrap_or(Ty::Single);
                if matches!(subject_ty, Ty::Record(_)) {
                    self.error(diag!(TypeMismatch, subject.span; "SELECT CASE needs a scalar"));
                }
                let slot = self.alloc_select_slot(subject_ty);
                self.select_slots
                    .insert((subject.span.start, subject.span.end), slot);
                for arm in arms.iter_mut() {
                    for guard in arm.guards.iter_mut() {
                        self.resolve_guard(guard, subject_ty);
                    }
                    for s in arm.body.iter_mut() {
                        self.resolve_stmt(s);
                    }
                }
                if let Some(body) = else_body {
                    for s in body {
                        self.resolve_stmt(s);
                    }
                }
            }
            Stmt::For {
                var,
                var_span,
                from,
                to,
                step,
                body,
                ..
            } => {
                let counter_ty = self.resolve_scalar(var, var_span);
                if !counter_ty.is_numeric() {
                    self.error(diag!(TypeMismatch, var_span; "FOR counter must be numeric"));
                }
                self.resolve_expr(from);
                self.coerce(from, counter_ty);
                self.resolve_expr(to);
                self.coerce(to, counter_ty);
                if let Some(step) = step {
                    self.resolve_expr(step);
                    self.coerce(step, counter_ty);
                    if let Some((_, val)) = self.eval_const(step) {
                        let zero = match val {
                            ConstVal::Int(n) => n == 0,
                            ConstVal::Float(n) => n == 0.0,
                            ConstVal::Text(_) => false,
                        };
                        if zero {
                            self.error(diag!(InvalidForStep, step.span));
                        }
                    }
                }
                self.for_vars.push(var.key());
                for s in body {
                    self.resolve_stmt(s);
                }
                self.for_vars.pop();
            }
            Stmt::While { cond, body, .. } => {
                self.resolve_cond(cond);
                for s in body {
                    self.resolve_stmt(s);
                }
            }
            Stmt::DoLoop {
                pre, post, body, ..
            } => {
                if let Some(c) = pre {
                    self.resolve_cond(&mut c.cond);
                }
                self.do_depth += 1;
                for s in body {
                    self.resolve_stmt(s);
                }
                self.do_depth -= 1;
                if let Some(c) = post {
                    self.resolve_cond(&mut c.cond);
                }
            }
            Stmt::Exit { span, kind } => match kind {
                ExitKind::For if self.for_vars.is_empty() => {
                    self.error(diag!(UnexpectedToken, span; "EXIT FOR outside a FOR loop"));
                }
                ExitKind::Do if self.do_depth == 0 => {
                    self.error(diag!(UnexpectedToken, span; "EXIT DO outside a loop"));
                }
                ExitKind::Sub if self.ctx_kind() != Some(ProcKind::Sub) => {
                    self.error(diag!(UnexpectedToken, span; "EXIT SUB outside a SUB"));
                }
                ExitKind::Function if self.ctx_kind() != Some(ProcKind::Function) => {
                    self.error(diag!(UnexpectedToken, span; "EXIT FUNCTION outside a FUNCTION"));
                }
                _ => {}
            },
            Stmt::Goto { target, .. } | Stmt::Gosub { target, .. } => {
                self.check_label(target);
            }
            Stmt::Return { target, .. } => {
                if let Some(target) = target {
                    self.check_label(target);
                }
            }
            Stmt::Call {
                name,
                name_span,
                args,
                ..
            } => {
                let key = name.clone();
                match self.proc_index.get(&key).copied() {
                    Some(id) if self.procs[id as usize].kind == ProcKind::Sub => {
                        self.resolve_args(id, args, name_span);
                    }
                    Some(_) => {
                        self.error(diag!(TypeMismatch, name_span; format!("{} is a FUNCTION", key)));
                    }
                    None => {
                        self.error(diag!(Undeclared, name_span; key));
                        for arg in args {
                            self.resolve_expr(arg);
                        }
                    }
                }
            }
            Stmt::Open { path, channel, .. } => {
                let ty = self.resolve_expr(path);
                if !matches!(ty, Some(t) if t.is_string()) {
                    self.error(diag!(TypeMismatch, path.span; "OPEN needs a file name"));
                }
                self.resolve_expr(channel);
                self.coerce(channel, Ty::Int16);
            }
            Stmt::Close { channels, .. } => {
                for chan in channels {
                    self.resolve_expr(chan);
                    self.coerce(chan, Ty::Int16);
                }
            }
            Stmt::Read { targets, .. } => {
                for target in targets {
                    let ty = self.resolve_lvalue(target, true);
                    if matches!(ty, Some(Ty::Record(_))) {
                        self.error(diag!(TypeMismatch, target.span(); "cannot READ a record"));
                    }
                }
            }
            Stmt::Restore { target, .. } => {
                if let Some(target) = target {
                    if !self.data_labels.contains_key(&target.name) {
                        self.error(diag!(UnknownLabel, target.span; target.name.clone()));
                    }
                }
            }
            Stmt::Randomize { seed, .. } => {
                if let Some(seed) = seed {
                    self.resolve_expr(seed);
                    self.coerce(seed, Ty::Double);
                }
            }
            Stmt::Swap { left, right, .. } => {
                let lt = self.resolve_lvalue(left, true);
                let rt = self.resolve_lvalue(right, true);
                if let (Some(a), Some(b)) = (lt, rt) {
                    if a != b {
                        self.error(diag!(TypeMismatch, right.span(); "SWAP needs matching types"));
                    }
                }
            }
        }
    }

    fn ctx_kind(&self) -> Option<ProcKind> {
        self.ctx.map(|id| self.procs[id as usize].kind)
    }

    fn check_label(&mut self, target: &LabelRef) {
        let known = match self.ctx {
            Some(p) => self.procs[p as usize].labels.contains_key(&target.name),
            None => self.module_labels.contains_key(&target.name),
        };
        if !known {
            self.error(diag!(UnknownLabel, target.span; target.name.clone()));
        }
    }

    fn resolve_dim(&mut self, decl: &mut DimDecl, shared: bool, redim: bool) {
        let declared_ty = decl
            .ty
            .as_ref()
            .map(|t| {
                let t = t.clone();
                self.resolve_type_ref(&t, &decl.span)
            })
            .unwrap_or_else(|| match decl.name.sigil {
                Some(sigil) => Ty::from_sigil(sigil),
                None => Ty::Single,
            });
        let is_array = decl.bounds.is_some();
        if let Some(bounds) = &mut decl.bounds {
            for (lo, hi) in bounds.iter_mut() {
                if let Some(lo) = lo {
                    self.resolve_expr(lo);
                    self.coerce(lo, Ty::Int32);
                }
                self.resolve_expr(hi);
                self.coerce(hi, Ty::Int32);
            }
        }
        let key = (decl.name.key(), is_array);
        let dims = decl.bounds.as_ref().map(|b| b.len() as u8).unwrap_or(0);
        if self.consts.contains_key(&key.0) {
            self.error(diag!(Redeclared, decl.span; key.0));
            return;
        }
        let exists = self.slot_exists(&key);
        if exists && !redim {
            self.error(diag!(Redeclared, decl.span; decl.name.to_string()));
            return;
        }
        if !exists {
            self.insert_slot(
                key,
                SlotDef {
                    name: decl.name.key(),
                    ty: declared_ty,
                    is_array,
                    dims,
                    shared,
                },
                shared,
            );
        }
    }

    fn slot_exists(&self, key: &SlotKey) -> bool {
        match self.ctx {
            Some(p) => {
                self.procs[p as usize].local_index.contains_key(key)
                    || matches!(self.global_index.get(key),
                        Some(&i) if self.globals[i as usize].shared)
            }
            None => self.global_index.contains_key(key),
        }
    }

    /// Create a slot in the current scope. `force_global` lifts the name
    /// to module scope (DIM SHARED inside a procedure).
    fn insert_slot(&mut self, key: SlotKey, def: SlotDef, force_global: bool) -> (bool, u16) {
        if force_global || self.ctx.is_none() {
            let index = self.globals.len() as u16;
            self.globals.push(def);
            self.global_index.insert(key, index);
            (true, index)
        } else {
            let sig = &mut self.procs[self.ctx.unwrap() as usize];
            let index = sig.locals.len() as u16;
            sig.locals.push(def);
            sig.local_index.insert(key, index);
            (false, index)
        }
    }

    fn alloc_select_slot(&mut self, ty: Ty) -> (bool, u16) {
        self.select_counter += 1;
        let key = (format!("SELECT@{}", self.select_counter), false);
        self.insert_slot(
            key.clone(),
            SlotDef {
                name: key.0.clone(),
                ty,
                is_array: false,
                dims: 0,
                shared: false,
            },
            false,
        )
    }

    /// Find or implicitly create a scalar slot for an identifier.
    fn resolve_scalar(&mut self, id: &Ident, span: &Span) -> Ty {
        let _ = span;
        let key = (id.key(), false);
        if let Some((ty, _)) = self.consts.get(&key.0) {
            return *ty;
        }
        if let Some(p) = self.ctx {
            if let Some(&i) = self.procs[p as usize].local_index.get(&key) {
                return self.procs[p as usize].locals[i as usize].ty;
            }
            if let Some(&i) = self.global_index.get(&key) {
                if self.globals[i as usize].shared {
                    return self.globals[i as usize].ty;
                }
            }
        } else if let Some(&i) = self.global_index.get(&key) {
            return self.globals[i as usize].ty;
        }
        let ty = match id.sigil {
            Some(sigil) => Ty::from_sigil(sigil),
            None => Ty::Single,
        };
        self.insert_slot(
            key,
            SlotDef {
                name: id.key(),
                ty,
                is_array: false,
                dims: 0,
                shared: false,
            },
            false,
        );
        ty
    }

    fn array_slot(&mut self, id: &Ident, span: &Span) -> Option<(Ty, u8)> {
        let key = (id.key(), true);
        if let Some(p) = self.ctx {
            if let Some(&i) = self.procs[p as usize].local_index.get(&key) {
                let def = &self.procs[p as usize].locals[i as usize];
                return Some((def.ty, def.dims));
            }
            if let Some(&i) = self.global_index.get(&key) {
                if self.globals[i as usize].shared {
                    let def = &self.globals[i as usize];
                    return Some((def.ty, def.dims));
                }
            }
        } else if let Some(&i) = self.global_index.get(&key) {
            let def = &self.globals[i as usize];
            return Some((def.ty, def.dims));
        }
        self.error(diag!(Undeclared, span; format!("array {}", id)));
        None
    }

    fn resolve_cond(&mut self, cond: &mut Expr) {
        let ty = self.resolve_expr(cond);
        if let Some(ty) = ty {
            if !ty.is_numeric() {
                self.error(diag!(TypeMismatch, cond.span; "condition must be numeric"));
            }
        }
    }

    fn resolve_guard(&mut self, guard: &mut CaseGuard, subject_ty: Ty) {
        let check = |this: &mut Self, e: &mut Expr, subject_ty: Ty| {
            let ty = this.resolve_expr(e);
            if let Some(ty) = ty {
                if ty.is_string() != subject_ty.is_string() {
                    this.error(diag!(BadCaseRange, e.span));
                } else if subject_ty.is_numeric() {
                    this.coerce(e, subject_ty);
                }
            }
        };
        match guard {
            CaseGuard::Equal(e) | CaseGuard::Is(_, e) => check(self, e, subject_ty),
            CaseGuard::Range(lo, hi) => {
                check(self, lo, subject_ty);
                check(self, hi, subject_ty);
                if let (Some((_, lo)), Some((_, hi))) = (self.eval_const(lo), self.eval_const(hi)) {
                    let bad = match (lo, hi) {
                        (ConstVal::Int(a), ConstVal::Int(b)) => a > b,
                        (ConstVal::Float(a), ConstVal::Float(b)) => a > b,
                        (ConstVal::Int(a), ConstVal::Float(b)) => (a as f64) > b,
                        (ConstVal::Float(a), ConstVal::Int(b)) => a > b as f64,
                        (ConstVal::Text(a), ConstVal::Text(b)) => a > b,
                        _ => false,
                    };
                    if bad {
                        let span = guard_span(guard);
                        self.error(diag!(BadCaseRange, span; "empty range"));
                    }
                }
            }
        }
    }

    fn resolve_lvalue(&mut self, lvalue: &mut LValue, writing: bool) -> Option<Ty> {
        match lvalue {
            LValue::Var(id, span) => {
                if writing && self.consts.contains_key(&id.key()) {
                    self.error(diag!(ConstAssign, span; id.to_string()));
                    return None;
                }
                if writing && Builtin::from_name(&id.key()).is_some() {
                    self.error(diag!(NotAnLValue, span; format!("{} is a built-in", id)));
                    return None;
                }
                if writing {
                    if let Some(&pid) = self.proc_index.get(&id.key()) {
                        let is_own_result = self.ctx == Some(pid)
                            && self.procs[pid as usize].kind == ProcKind::Function;
                        if !is_own_result {
                            self.error(diag!(NotAnLValue, span; format!("{} is a procedure", id)));
                            return None;
                        }
                    }
                }
                Some(self.resolve_scalar(id, span))
            }
            LValue::Index(id, args, span) => {
                let info = self.array_slot(id, span);
                for arg in args.iter_mut() {
                    self.resolve_expr(arg);
                    self.coerce(arg, Ty::Int32);
                }
                let (ty, dims) = info?;
                if args.len() as u8 != dims {
                    self.error(diag!(ArityMismatch, span; "wrong number of subscripts"));
                }
                Some(ty)
            }
            LValue::Field(base, field, span) => {
                let base_ty = self.resolve_lvalue(base, false)?;
                self.field_ty(base_ty, field, span)
            }
        }
    }

    fn field_ty(&mut self, base_ty: Ty, field: &str, span: &Span) -> Option<Ty> {
        match base_ty {
            Ty::Record(id) => {
                let record = &self.records[id as usize];
                match record.fields.iter().find(|f| f.name == field) {
                    Some(f) => Some(f.ty),
                    None => {
                        self.error(diag!(RecordFieldUnknown, span; field.to_string()));
                        None
                    }
                }
            }
            _ => {
                self.error(diag!(TypeMismatch, span; "not a record"));
                None
            }
        }
    }

    fn resolve_args(&mut self, proc: u16, args: &mut [Expr], span: &Span) {
        let params: Vec<ParamSig> = self.procs[proc as usize].params.clone();
        if args.len() != params.len() {
            self.error(diag!(ArityMismatch, span));
        }
        for (arg, param) in args.iter_mut().zip(params.iter()) {
            self.resolve_expr(arg);
            let is_lvalue = matches!(
                arg.kind,
                ExprKind::Var(_) | ExprKind::Index { .. } | ExprKind::Field { .. }
            );
            if param.by_ref && is_lvalue && arg.ty == Some(param.ty) {
                // Passed by reference; the call site writes the final
                // value back after the procedure returns.
                continue;
            }
            self.coerce(arg, param.ty);
        }
    }

    fn resolve_expr(&mut self, expr: &mut Expr) -> Option<Ty> {
        let ty = self.resolve_expr_kind(expr)?;
        expr.ty = Some(ty);
        Some(ty)
    }

    fn resolve_expr_kind(&mut self, expr: &mut Expr) -> Option<Ty> {
        let span = expr.span.clone();
        match &mut expr.kind {
            ExprKind::Int(_) => Some(Ty::Int16),
            ExprKind::Long(_) => Some(Ty::Int32),
            ExprKind::Int64(_) => Some(Ty::Int64),
            ExprKind::Single(_) => Some(Ty::Single),
            ExprKind::Double(_) => Some(Ty::Double),
            ExprKind::Str(_) => Some(Ty::Str),
            ExprKind::Var(id) => {
                let key = id.key();
                if let Some((ty, val)) = self.consts.get(&key).cloned() {
                    expr.kind = const_expr_kind(ty, val);
                    return Some(ty);
                }
                if !self.slot_exists(&(key.clone(), false)) {
                    // A bare FUNCTION name is a zero-argument call, except
                    // inside its own body where it is the result slot.
                    if let Some(&pid) = self.proc_index.get(&key) {
                        let sig = &self.procs[pid as usize];
                        if sig.kind == ProcKind::Function {
                            if sig.params.is_empty() {
                                let ret = sig.ret.unwrap_or(Ty::Single);
                                expr.kind = ExprKind::CallFn {
                                    proc: pid,
                                    args: Vec::new(),
                                };
                                return Some(ret);
                            }
                            self.error(diag!(ArityMismatch, span; key));
                            return None;
                        }
                    }
                    if let Some(builtin) = Builtin::from_name(&key) {
                        if builtin.arity().contains(&0) {
                            let result = builtin.result_ty(&[]);
                            expr.kind = ExprKind::Builtin {
                                builtin,
                                args: Vec::new(),
                            };
                            return Some(result);
                        }
                    }
                }
                let id = id.clone();
                Some(self.resolve_scalar(&id, &span))
            }
            ExprKind::Index { name, args } => {
                let key = name.key();
                let mut args_taken = std::mem::take(args);
                if let Some(builtin) = Builtin::from_name(&key) {
                    return self.resolve_builtin(expr, builtin, args_taken, &span);
                }
                if let Some(&pid) = self.proc_index.get(&key) {
                    if self.procs[pid as usize].kind == ProcKind::Function {
                        self.resolve_args(pid, &mut args_taken, &span);
                        let ret = self.procs[pid as usize].ret.unwrap_or(Ty::Single);
                        expr.kind = ExprKind::CallFn {
                            proc: pid,
                            args: args_taken,
                        };
                        return Some(ret);
                    }
                }
                // Array element access.
                let name = name.clone();
                let info = self.array_slot(&name, &span);
                for arg in &mut args_taken {
                    self.resolve_expr(arg);
                    self.coerce(arg, Ty::Int32);
                }
                let (ty, dims) = info?;
                if args_taken.len() as u8 != dims {
                    self.error(diag!(ArityMismatch, span; "wrong number of subscripts"));
                }
                expr.kind = ExprKind::Index {
                    name,
                    args: args_taken,
                };
                Some(ty)
            }
            ExprKind::Field {
                base,
                field,
                field_span,
            } => {
                let base_ty = self.resolve_expr(base)?;
                let field = field.clone();
                let field_span = field_span.clone();
                self.field_ty(base_ty, &field, &field_span)
            }
            ExprKind::Unary { op, expr: inner } => {
                let ty = self.resolve_expr(inner)?;
                match op {
                    UnaryOp::Neg => {
                        if !ty.is_numeric() {
                            self.error(diag!(TypeMismatch, span; "cannot negate a string"));
                            return None;
                        }
                        if ty == Ty::UInt32 {
                            self.coerce(inner, Ty::Int64);
                            return Some(Ty::Int64);
                        }
                        Some(ty)
                    }
                    UnaryOp::Not => {
                        let int_ty = integer_op_ty(ty)?;
                        self.coerce(inner, int_ty);
                        Some(int_ty)
                    }
                }
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let op = *op;
                let lt = self.resolve_expr(lhs);
                let rt = self.resolve_expr(rhs);
                let (lt, rt) = (lt?, rt?);
                self.binary_ty(op, lhs, lt, rhs, rt, &span)
            }
            ExprKind::CallFn { .. } | ExprKind::Builtin { .. } | ExprKind::Coerce { .. } => {
                expr.ty
            }
        }
    }

    fn resolve_builtin(
        &mut self,
        expr: &mut Expr,
        builtin: Builtin,
        mut args: Vec<Expr>,
        span: &Span,
    ) -> Option<Ty> {
        if !builtin.arity().contains(&args.len()) {
            self.error(diag!(ArityMismatch, span));
            return None;
        }
        let argc = args.len();
        let mut arg_tys = Vec::new();
        for (i, arg) in args.iter_mut().enumerate() {
            if builtin.takes_array() && i == 0 {
                // LBOUND/UBOUND name an array; leave the bare reference.
                if let ExprKind::Var(id) = &arg.kind {
                    let id = id.clone();
                    let arg_span = arg.span.clone();
                    if self.array_slot(&id, &arg_span).is_none() {
                        return None;
                    }
                    arg.ty = Some(Ty::Int32);
                    arg_tys.push(Ty::Int32);
                    continue;
                }
                self.error(diag!(TypeMismatch, arg.span; "expected an array name"));
                return None;
            }
            let ty = self.resolve_expr(arg)?;
            if builtin.arg_is_string(i, argc) {
                if !ty.is_string() {
                    self.error(diag!(TypeMismatch, arg.span));
                    return None;
                }
                self.coerce(arg, Ty::Str);
            } else if !ty.is_numeric() {
                self.error(diag!(TypeMismatch, arg.span));
                return None;
            }
            arg_tys.push(arg.ty.unwrap_or(ty));
        }
        let result = builtin.result_ty(&arg_tys);
        expr.kind = ExprKind::Builtin { builtin, args };
        Some(result)
    }

    fn binary_ty(
        &mut self,
        op: BinOp,
        lhs: &mut Expr,
        lt: Ty,
        rhs: &mut Expr,
        rt: Ty,
        span: &Span,
    ) -> Option<Ty> {
        match op {
            BinOp::Add if lt.is_string() && rt.is_string() => {
                self.coerce(lhs, Ty::Str);
                self.coerce(rhs, Ty::Str);
                Some(Ty::Str)
            }
            BinOp::Cmp(_) if lt.is_string() && rt.is_string() => {
                self.coerce(lhs, Ty::Str);
                self.coerce(rhs, Ty::Str);
                Some(Ty::Int16)
            }
            BinOp::Pow => {
                self.numeric_operands(lhs, lt, rhs, rt, span)?;
                self.coerce(lhs, Ty::Double);
                self.coerce(rhs, Ty::Double);
                Some(Ty::Double)
            }
            BinOp::Div => {
                self.numeric_operands(lhs, lt, rhs, rt, span)?;
                let join = Ty::widen(lt, rt).unwrap_or(Ty::Double);
                let ty = if join == Ty::Double { Ty::Double } else { Ty::Single };
                self.coerce(lhs, ty);
                self.coerce(rhs, ty);
                Some(ty)
            }
            BinOp::IntDiv | BinOp::Mod => {
                self.numeric_operands(lhs, lt, rhs, rt, span)?;
                let join = Ty::widen(lt, rt).unwrap_or(Ty::Int32);
                let ty = integer_op_ty(join).unwrap_or(Ty::Int32);
                self.coerce(lhs, ty);
                self.coerce(rhs, ty);
                Some(ty)
            }
            BinOp::And | BinOp::Or => {
                self.numeric_operands(lhs, lt, rhs, rt, span)?;
                let lty = integer_op_ty(lt)?;
                let rty = integer_op_ty(rt)?;
                let ty = Ty::widen(lty, rty).unwrap_or(Ty::Int32);
                self.coerce(lhs, ty);
                self.coerce(rhs, ty);
                Some(ty)
            }
            BinOp::Cmp(_) => {
                self.numeric_operands(lhs, lt, rhs, rt, span)?;
                let join = Ty::widen(lt, rt).unwrap_or(Ty::Double);
                self.coerce(lhs, join);
                self.coerce(rhs, join);
                Some(Ty::Int16)
            }
            BinOp::Add | BinOp::Sub | BinOp::Mul => {
                self.numeric_operands(lhs, lt, rhs, rt, span)?;
                let join = Ty::widen(lt, rt).unwrap_or(Ty::Double);
                self.coerce(lhs, join);
                self.coerce(rhs, join);
                Some(join)
            }
        }
    }

    fn numeric_operands(
        &mut self,
        lhs: &Expr,
        lt: Ty,
        rhs: &Expr,
        rt: Ty,
        span: &Span,
    ) -> Option<()> {
        let _ = (lhs, rhs);
        if lt.is_numeric() && rt.is_numeric() {
            Some(())
        } else {
            self.error(diag!(TypeMismatch, span));
            None
        }
    }

    /// Wrap `expr` in an implicit conversion when its type differs.
    fn coerce(&mut self, expr: &mut Expr, to: Ty) {
        let from = match expr.ty {
            Some(ty) => ty,
            None => return,
        };
        if from == to {
            return;
        }
        let ok = (from.is_numeric() && to.is_numeric())
            || (from.is_string() && to.is_string());
        if !ok {
            self.error(diag!(TypeMismatch, expr.span));
            return;
        }
        let span = expr.span.clone();
        let inner = std::mem::replace(expr, Expr::new(ExprKind::Int(0), span.clone()));
        *expr = Expr {
            kind: ExprKind::Coerce {
                to,
                expr: Box::new(inner),
            },
            span,
            ty: Some(to),
        };
    }
}

fn guard_span(guard: &CaseGuard) -> Span {
    match guard {
        CaseGuard::Equal(e) | CaseGuard::Is(_, e) => e.span.clone(),
        CaseGuard::Range(lo, hi) => lo.span.to(&hi.span),
    }
}

/// The integer kind an operand takes inside `\`, `MOD`, and the logical
/// operators. Floats round to LONG, as the original toolchain does.
fn integer_op_ty(ty: Ty) -> Option<Ty> {
    match ty {
        Ty::Int16 | Ty::Int32 | Ty::Int64 | Ty::UInt32 => Some(ty),
        Ty::Single | Ty::Double => Some(Ty::Int32),
        _ => None,
    }
}

fn const_expr_kind(ty: Ty, val: ConstVal) -> ExprKind {
    match (ty, val) {
        (Ty::Int16, ConstVal::Int(n)) => ExprKind::Int(n as i16),
        (Ty::Int32, ConstVal::Int(n)) => ExprKind::Long(n as i32),
        (Ty::Int64, ConstVal::Int(n)) => ExprKind::Int64(n),
        (_, ConstVal::Int(n)) => ExprKind::Double(n as f64),
        (Ty::Single, ConstVal::Float(n)) => ExprKind::Single(n as f32),
        (_, ConstVal::Float(n)) => ExprKind::Double(n),
        (_, ConstVal::Text(s)) => ExprKind::Str(s),
    }
}

fn const_binary(
    op: BinOp,
    lty: Ty,
    lv: ConstVal,
    rty: Ty,
    rv: ConstVal,
) -> Option<(Ty, ConstVal)> {
    use ConstVal::*;
    match (lv, rv) {
        (Text(a), Text(b)) => match op {
            BinOp::Add => Some((Ty::Str, Text(format!("{}{}", a, b)))),
            _ => None,
        },
        (Int(a), Int(b)) => {
            let ty = Ty::widen(lty, rty).unwrap_or(Ty::Int64);
            let val = match op {
                BinOp::Add => Int(a.checked_add(b)?),
                BinOp::Sub => Int(a.checked_sub(b)?),
                BinOp::Mul => Int(a.checked_mul(b)?),
                BinOp::Div => {
                    if b == 0 {
                        return None;
                    }
                    return Some((Ty::Double, Float(a as f64 / b as f64)));
                }
                BinOp::IntDiv => Int(a.checked_div(b)?),
                BinOp::Mod => Int(a.checked_rem(b)?),
                BinOp::Pow => return Some((Ty::Double, Float((a as f64).powf(b as f64)))),
                _ => return None,
            };
            Some((ty, val))
        }
        (a, b) => {
            let a = match a {
                Int(n) => n as f64,
                Float(n) => n,
                Text(_) => return None,
            };
            let b = match b {
                Int(n) => n as f64,
                Float(n) => n,
                Text(_) => return None,
            };
            let val = match op {
                BinOp::Add => a + b,
                BinOp::Sub => a - b,
                BinOp::Mul => a * b,
                BinOp::Div => {
                    if b == 0.0 {
                        return None;
                    }
                    a / b
                }
                BinOp::Pow => a.powf(b),
                _ => return None,
            };
            Some((Ty::Double, Float(val)))
        }
    }
}
