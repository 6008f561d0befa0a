use super::image::{Image, ParamEntry, ProcEntry, SlotEntry, FLAG_BASE_ONE, FLAG_RND_REV1};
use super::link::{Link, Symbol};
use super::opcode::Opcode;
use super::val::Val;
use crate::lang::ast::*;
use crate::lang::{Analysis, Builtin};
use std::collections::HashMap;

/// Lower an analyzed module to a bytecode image.
///
/// Only called on a module the analyzer passed without errors; violated
/// assumptions here are compiler bugs, not user mistakes.
pub fn emit(module: &Module, analysis: &Analysis) -> Image {
    let mut emitter = Emitter {
        analysis,
        image: Image {
            flags: FLAG_RND_REV1
                | if analysis.base == 1 { FLAG_BASE_ONE } else { 0 },
            records: analysis.records.clone(),
            data: analysis.data.clone(),
            ..Image::default()
        },
        link: Link::new(),
        const_index: HashMap::new(),
        proc: None,
        loops: Vec::new(),
        proc_end: None,
        label_syms: HashMap::new(),
        entries: vec![0; analysis.procs.len()],
    };

    for stmt in &module.stmts {
        if !matches!(stmt, Stmt::Proc(_)) {
            emitter.statement(stmt);
        }
    }
    emitter.push(Opcode::Halt);

    for stmt in &module.stmts {
        if let Stmt::Proc(def) = stmt {
            emitter.procedure(def);
        }
    }

    let Emitter {
        mut image,
        mut link,
        entries,
        ..
    } = emitter;
    link.resolve(&mut image.code);

    let mut procs = Vec::with_capacity(analysis.procs.len() + 1);
    procs.push(ProcEntry {
        name: "MAIN".to_string(),
        entry: 0,
        params: Vec::new(),
        locals: analysis
            .globals
            .iter()
            .map(|slot| SlotEntry {
                ty: slot.ty,
                is_array: slot.is_array,
            })
            .collect(),
        ret: None,
    });
    for (sig, entry) in analysis.procs.iter().zip(entries) {
        procs.push(ProcEntry {
            name: sig.name.clone(),
            entry,
            params: sig
                .params
                .iter()
                .map(|p| ParamEntry {
                    ty: p.ty,
                    by_ref: p.by_ref,
                })
                .collect(),
            locals: sig
                .locals
                .iter()
                .map(|slot| SlotEntry {
                    ty: slot.ty,
                    is_array: slot.is_array,
                })
                .collect(),
            ret: sig.ret,
        });
    }
    image.procs = procs;
    image
}

/// Hashable view of a pool constant, for deduplication.
#[derive(PartialEq, Eq, Hash)]
enum ConstKey {
    I16(i16),
    I32(i32),
    I64(i64),
    U32(u32),
    F32(u32),
    F64(u64),
    Str(String),
}

fn const_key(val: &Val) -> ConstKey {
    match val {
        Val::Int16(n) => ConstKey::I16(*n),
        Val::Int32(n) => ConstKey::I32(*n),
        Val::Int64(n) => ConstKey::I64(*n),
        Val::UInt32(n) => ConstKey::U32(*n),
        Val::Single(n) => ConstKey::F32(n.to_bits()),
        Val::Double(n) => ConstKey::F64(n.to_bits()),
        Val::Str(s) => ConstKey::Str(s.clone()),
        other => unreachable!("{:?} is not a pool constant", other),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopKind {
    For,
    Do,
}

struct Emitter<'a> {
    analysis: &'a Analysis,
    image: Image,
    link: Link,
    const_index: HashMap<ConstKey, u32>,
    proc: Option<u16>,
    loops: Vec<(LoopKind, Symbol)>,
    proc_end: Option<Symbol>,
    label_syms: HashMap<(u32, String), Symbol>,
    entries: Vec<u32>,
}

impl<'a> Emitter<'a> {
    fn pc(&self) -> u32 {
        self.image.code.len() as u32
    }

    fn push(&mut self, op: Opcode) -> usize {
        self.image.code.push(op);
        self.image.code.len() - 1
    }

    fn konst(&mut self, val: Val) -> usize {
        let key = const_key(&val);
        let index = match self.const_index.get(&key) {
            Some(&i) => i,
            None => {
                let i = self.image.consts.len() as u32;
                self.image.consts.push(val);
                self.const_index.insert(key, i);
                i
            }
        };
        self.push(Opcode::PushConst(index))
    }

    fn scope_id(&self) -> u32 {
        match self.proc {
            Some(p) => p as u32 + 1,
            None => 0,
        }
    }

    fn label_symbol(&mut self, name: &str) -> Symbol {
        let key = (self.scope_id(), name.to_string());
        if let Some(&sym) = self.label_syms.get(&key) {
            return sym;
        }
        let sym = self.link.symbol();
        self.label_syms.insert(key, sym);
        sym
    }

    fn jump(&mut self, op: Opcode, target: Symbol) {
        let index = self.push(op);
        self.link.refer(index, target);
    }

    fn note_position(&mut self, span: &crate::lang::Span) {
        let pc = self.pc();
        // A statement that emitted nothing shares its pc with the next
        // one; the later entry wins so the map always names the code.
        if let Some(last) = self.image.source_map.last_mut() {
            if last.0 == pc {
                *last = (pc, span.line, span.col);
                return;
            }
        }
        self.image.source_map.push((pc, span.line, span.col));
    }

    fn slot(&self, key: &str, is_array: bool) -> (bool, u16) {
        self.analysis
            .slot(self.proc, &(key.to_string(), is_array))
            .expect("slot survived analysis")
    }

    fn load_op(&self, global: bool, slot: u16) -> Opcode {
        if global {
            Opcode::LoadGlobal(slot)
        } else {
            Opcode::LoadLocal(slot)
        }
    }

    fn store_op(&self, global: bool, slot: u16) -> Opcode {
        if global {
            Opcode::StoreGlobal(slot)
        } else {
            Opcode::StoreLocal(slot)
        }
    }

    // ----- procedures -----

    fn procedure(&mut self, def: &ProcDef) {
        let id = self
            .analysis
            .procs
            .iter()
            .position(|sig| sig.name == def.name.key())
            .expect("procedure survived analysis") as u16;
        self.entries[id as usize] = self.pc();
        self.proc = Some(id);
        let end = self.link.symbol();
        self.proc_end = Some(end);
        for stmt in &def.body {
            self.statement(stmt);
        }
        let pc = self.pc();
        self.link.define(end, pc);
        self.push(Opcode::Ret);
        self.proc_end = None;
        self.proc = None;
    }

    // ----- statements -----

    fn statement(&mut self, stmt: &Stmt) {
        self.note_position(stmt.span());
        match stmt {
            Stmt::Dim { decls, .. } => self.r#dim(decls),
            Stmt::ConstDef { .. }
            | Stmt::TypeDef { .. }
            | Stmt::Declare { .. }
            | Stmt::Data { .. }
            | Stmt::OptionBase { .. }
            | Stmt::Meta { .. } => {}
            Stmt::Label { name, .. } => {
                let pc = self.pc();
                let sym = self.label_symbol(name);
                self.link.define(sym, pc);
                let qualified = match self.proc {
                    Some(p) => format!("{}.{}", self.analysis.procs[p as usize].name, name),
                    None => name.clone(),
                };
                self.image.labels.push((qualified, pc));
            }
            Stmt::Assign { target, value, .. } => {
                self.lvalue_prefix(target);
                self.expression(value);
                self.lvalue_store(target);
            }
            Stmt::Print { channel, items, .. } => self.r#print(channel, items),
            Stmt::Write { channel, items, .. } => self.r#write(channel, items),
            Stmt::Input {
                channel,
                prompt,
                line,
                targets,
                ..
            } => self.r#input(channel, prompt, *line, targets),
            Stmt::If {
                cond,
                then_body,
                elseifs,
                else_body,
                ..
            } => self.r#if(cond, then_body, elseifs, else_body),
            Stmt::Select {
                subject,
                arms,
                else_body,
                ..
            } => self.r#select(subject, arms, else_body),
            Stmt::For {
                var,
                from,
                to,
                step,
                body,
                ..
            } => self.r#for(var, from, to, step, body),
            Stmt::While { cond, body, .. } => self.r#while(cond, body),
            Stmt::DoLoop {
                pre, post, body, ..
            } => self.r#do(pre, post, body),
            Stmt::Exit { kind, .. } => self.r#exit(*kind),
            Stmt::Goto { target, .. } => {
                let sym = self.label_symbol(&target.name);
                self.jump(Opcode::Jmp(0), sym);
            }
            Stmt::Gosub { target, .. } => {
                let sym = self.label_symbol(&target.name);
                self.jump(Opcode::Gosub(0), sym);
            }
            Stmt::Return { target, .. } => match target {
                None => {
                    self.push(Opcode::RetSub);
                }
                Some(label) => {
                    let sym = self.label_symbol(&label.name);
                    self.jump(Opcode::RetSubTo(0), sym);
                }
            },
            Stmt::Call { name, args, .. } => {
                let id = self
                    .analysis
                    .procs
                    .iter()
                    .position(|sig| sig.name == *name)
                    .expect("SUB survived analysis") as u16;
                self.call(id, args);
            }
            Stmt::Open {
                path,
                mode,
                channel,
                ..
            } => {
                self.expression(path);
                self.expression(channel);
                self.push(Opcode::Open(*mode));
            }
            Stmt::Close { channels, .. } => {
                if channels.is_empty() {
                    self.push(Opcode::CloseAll);
                } else {
                    for chan in channels {
                        self.expression(chan);
                        self.push(Opcode::Close);
                    }
                }
            }
            Stmt::Read { targets, .. } => {
                for target in targets {
                    let ty = self.lvalue_ty(target);
                    self.lvalue_prefix(target);
                    self.push(Opcode::ReadData(ty));
                    self.lvalue_store(target);
                }
            }
            Stmt::Restore { target, .. } => {
                let index = match target {
                    Some(label) => *self
                        .analysis
                        .data_labels
                        .get(&label.name)
                        .expect("label survived analysis"),
                    None => 0,
                };
                self.push(Opcode::RestoreData(index));
            }
            Stmt::Randomize { seed, .. } => {
                match seed {
                    Some(seed) => self.expression(seed),
                    None => {
                        // RANDOMIZE with no argument seeds from the clock.
                        self.push(Opcode::Timer);
                        self.push(Opcode::Coerce(Ty::Double));
                    }
                }
                self.push(Opcode::Randomize);
            }
            Stmt::Swap { left, right, .. } => {
                self.lvalue_prefix(right);
                self.lvalue_load(left);
                self.lvalue_prefix(left);
                self.lvalue_load(right);
                self.lvalue_store(left);
                self.lvalue_store(right);
            }
            Stmt::Cls { .. } => {
                self.push(Opcode::Cls);
            }
            Stmt::End { .. } => {
                self.push(Opcode::Halt);
            }
            Stmt::Proc(_) => unreachable!("procedure bodies are emitted separately"),
        }
    }

    fn r#dim(&mut self, decls: &[DimDecl]) {
        for decl in decls {
            let Some(bounds) = &decl.bounds else {
                continue; // scalars need no runtime allocation
            };
            let (global, slot) = self.slot(&decl.name.key(), true);
            for (lo, hi) in bounds {
                match lo {
                    Some(lo) => self.expression(lo),
                    None => {
                        let base = self.analysis.base;
                        self.konst(Val::Int32(base));
                    }
                }
                self.expression(hi);
            }
            self.push(Opcode::DimArray {
                global,
                slot,
                dims: bounds.len() as u8,
            });
        }
    }

    fn r#print(&mut self, channel: &Option<Expr>, items: &[PrintItem]) {
        if let Some(chan) = channel {
            self.expression(chan);
            self.push(Opcode::OutChannel);
        }
        for item in items {
            match item {
                PrintItem::Expr(e) => {
                    self.expression(e);
                    self.push(Opcode::PrintItem);
                }
                PrintItem::Comma => {
                    self.push(Opcode::PrintZone);
                }
                PrintItem::Semicolon => {}
            }
        }
        // A trailing `;` holds the cursor; anything else ends the line.
        if !matches!(items.last(), Some(PrintItem::Semicolon)) {
            self.push(Opcode::PrintEol);
        }
        if channel.is_some() {
            self.push(Opcode::OutConsole);
        }
    }

    fn r#write(&mut self, channel: &Option<Expr>, items: &[Expr]) {
        if let Some(chan) = channel {
            self.expression(chan);
            self.push(Opcode::OutChannel);
        }
        for (index, item) in items.iter().enumerate() {
            if index > 0 {
                self.konst(Val::Str(",".to_string()));
                self.push(Opcode::PrintRaw);
            }
            self.expression(item);
            self.push(Opcode::WriteItem);
        }
        self.push(Opcode::PrintEol);
        if channel.is_some() {
            self.push(Opcode::OutConsole);
        }
    }

    fn r#input(
        &mut self,
        channel: &Option<Expr>,
        prompt: &Option<String>,
        line: bool,
        targets: &[LValue],
    ) {
        // Every form buffers the incoming line first; the fields then
        // flow through the ordinary prefix/value/store machinery.
        match channel {
            Some(chan) => {
                self.expression(chan);
                if line {
                    self.push(Opcode::ChanLineInput);
                } else {
                    self.push(Opcode::ChanInputRead(targets.len() as u8));
                }
            }
            None => {
                let prompt = prompt.clone().unwrap_or_else(|| {
                    if line {
                        String::new()
                    } else {
                        "? ".to_string()
                    }
                });
                self.konst(Val::Str(prompt));
                if line {
                    self.push(Opcode::LineInputRead);
                } else {
                    self.push(Opcode::InputRead(targets.len() as u8));
                }
            }
        }
        for target in targets {
            let ty = self.lvalue_ty(target);
            self.lvalue_prefix(target);
            self.push(Opcode::InputField(ty));
            self.lvalue_store(target);
        }
    }

    fn r#if(
        &mut self,
        cond: &Expr,
        then_body: &[Stmt],
        elseifs: &[(Expr, Vec<Stmt>)],
        else_body: &Option<Vec<Stmt>>,
    ) {
        let end = self.link.symbol();
        let mut arms: Vec<(&Expr, &[Stmt])> = vec![(cond, then_body)];
        for (c, body) in elseifs {
            arms.push((c, body));
        }
        for (c, body) in arms {
            let next = self.link.symbol();
            self.expression(c);
            self.jump(Opcode::JmpIfFalse(0), next);
            for stmt in body {
                self.statement(stmt);
            }
            self.jump(Opcode::Jmp(0), end);
            let pc = self.pc();
            self.link.define(next, pc);
        }
        if let Some(body) = else_body {
            for stmt in body {
                self.statement(stmt);
            }
        }
        let pc = self.pc();
        self.link.define(end, pc);
    }

    fn r#select(&mut self, subject: &Expr, arms: &[CaseArm], else_body: &Option<Vec<Stmt>>) {
        let &(global, slot) = self
            .analysis
            .select_slots
            .get(&(subject.span.start, subject.span.end))
            .expect("SELECT subject slot survived analysis");
        self.expression(subject);
        self.push(self.store_op(global, slot));
        let end = self.link.symbol();
        for arm in arms {
            let body = self.link.symbol();
            let next = self.link.symbol();
            for guard in &arm.guards {
                match guard {
                    CaseGuard::Equal(e) => {
                        self.push(self.load_op(global, slot));
                        self.expression(e);
                        self.push(Opcode::Cmp(CmpOp::Eq));
                    }
                    CaseGuard::Is(op, e) => {
                        self.push(self.load_op(global, slot));
                        self.expression(e);
                        self.push(Opcode::Cmp(*op));
                    }
                    CaseGuard::Range(lo, hi) => {
                        self.push(self.load_op(global, slot));
                        self.expression(lo);
                        self.push(Opcode::Cmp(CmpOp::Ge));
                        self.push(self.load_op(global, slot));
                        self.expression(hi);
                        self.push(Opcode::Cmp(CmpOp::Le));
                        self.push(Opcode::And);
                    }
                }
                self.jump(Opcode::JmpIfTrue(0), body);
            }
            self.jump(Opcode::Jmp(0), next);
            let pc = self.pc();
            self.link.define(body, pc);
            for stmt in &arm.body {
                self.statement(stmt);
            }
            self.jump(Opcode::Jmp(0), end);
            let pc = self.pc();
            self.link.define(next, pc);
        }
        if let Some(body) = else_body {
            for stmt in body {
                self.statement(stmt);
            }
        }
        let pc = self.pc();
        self.link.define(end, pc);
    }

    fn r#for(&mut self, var: &Ident, from: &Expr, to: &Expr, step: &Option<Expr>, body: &[Stmt]) {
        let (global, slot) = self.slot(&var.key(), false);
        let counter_ty = self
            .analysis
            .slot_def(self.proc, global, slot)
            .ty;
        self.expression(from);
        self.expression(to);
        match step {
            Some(step) => self.expression(step),
            None => {
                let one = Val::Int16(1)
                    .coerce_to(counter_ty)
                    .expect("unit step fits every counter type");
                self.konst(one);
            }
        }
        let end = self.link.symbol();
        let init = self.push(Opcode::ForInit {
            global,
            slot,
            exit: 0,
        });
        self.link.refer(init, end);
        let body_pc = self.pc();
        let body_sym = self.link.symbol();
        self.link.define(body_sym, body_pc);
        self.loops.push((LoopKind::For, end));
        for stmt in body {
            self.statement(stmt);
        }
        self.loops.pop();
        let step_index = self.push(Opcode::ForStep {
            global,
            slot,
            back: 0,
        });
        self.link.refer(step_index, body_sym);
        let pc = self.pc();
        self.link.define(end, pc);
        self.push(Opcode::ForEnd);
    }

    fn r#while(&mut self, cond: &Expr, body: &[Stmt]) {
        let start = self.link.symbol();
        let end = self.link.symbol();
        let pc = self.pc();
        self.link.define(start, pc);
        self.expression(cond);
        self.jump(Opcode::JmpIfFalse(0), end);
        for stmt in body {
            self.statement(stmt);
        }
        self.jump(Opcode::Jmp(0), start);
        let pc = self.pc();
        self.link.define(end, pc);
    }

    fn r#do(&mut self, pre: &Option<LoopCond>, post: &Option<LoopCond>, body: &[Stmt]) {
        let start = self.link.symbol();
        let end = self.link.symbol();
        let pc = self.pc();
        self.link.define(start, pc);
        if let Some(cond) = pre {
            self.expression(&cond.cond);
            if cond.until {
                self.jump(Opcode::JmpIfTrue(0), end);
            } else {
                self.jump(Opcode::JmpIfFalse(0), end);
            }
        }
        self.loops.push((LoopKind::Do, end));
        for stmt in body {
            self.statement(stmt);
        }
        self.loops.pop();
        match post {
            Some(cond) => {
                self.expression(&cond.cond);
                if cond.until {
                    self.jump(Opcode::JmpIfFalse(0), start);
                } else {
                    self.jump(Opcode::JmpIfTrue(0), start);
                }
            }
            None => self.jump(Opcode::Jmp(0), start),
        }
        let pc = self.pc();
        self.link.define(end, pc);
    }

    fn r#exit(&mut self, kind: ExitKind) {
        match kind {
            ExitKind::For => {
                let sym = self
                    .loops
                    .iter()
                    .rev()
                    .find(|(k, _)| *k == LoopKind::For)
                    .map(|&(_, sym)| sym)
                    .expect("EXIT FOR survived analysis");
                self.jump(Opcode::Jmp(0), sym);
            }
            ExitKind::Do => {
                let sym = self
                    .loops
                    .iter()
                    .rev()
                    .find(|(k, _)| *k == LoopKind::Do)
                    .map(|&(_, sym)| sym)
                    .expect("EXIT DO survived analysis");
                self.jump(Opcode::Jmp(0), sym);
            }
            ExitKind::Sub | ExitKind::Function => {
                let sym = self.proc_end.expect("EXIT outside procedure");
                self.jump(Opcode::Jmp(0), sym);
            }
        }
    }

    // ----- calls -----

    fn call(&mut self, proc: u16, args: &[Expr]) {
        let params = &self.analysis.procs[proc as usize].params;
        for arg in args {
            self.expression(arg);
        }
        self.push(Opcode::Call {
            proc: proc + 1, // entry 0 is MAIN
            argc: args.len() as u8,
        });
        // RET pushed by-reference finals with the last parameter on top;
        // peel them back into their variables.
        for (arg, param) in args.iter().zip(params.iter()).rev() {
            if !param.by_ref {
                continue;
            }
            match &arg.kind {
                ExprKind::Var(id) if arg.ty == Some(param.ty) => {
                    let (global, slot) = self.slot(&id.key(), false);
                    self.push(self.store_op(global, slot));
                }
                _ => {
                    self.push(Opcode::Pop);
                }
            }
        }
    }

    // ----- l-values -----

    /// The declared type a store into this l-value coerces to.
    fn lvalue_ty(&self, lvalue: &LValue) -> Ty {
        match lvalue {
            LValue::Var(id, _) => {
                let (global, slot) = self.slot(&id.key(), false);
                self.analysis.slot_def(self.proc, global, slot).ty
            }
            LValue::Index(id, _, _) => {
                let (global, slot) = self.slot(&id.key(), true);
                self.analysis.slot_def(self.proc, global, slot).ty
            }
            LValue::Field(base, field, _) => {
                let base_ty = self.lvalue_ty(base);
                let Ty::Record(id) = base_ty else {
                    unreachable!("field access on non-record survived analysis");
                };
                self.analysis
                    .record(id)
                    .fields
                    .iter()
                    .find(|f| &f.name == field)
                    .expect("record field survived analysis")
                    .ty
            }
        }
    }

    fn field_index(&self, base_ty: Ty, field: &str) -> u16 {
        let Ty::Record(id) = base_ty else {
            unreachable!("field access on non-record survived analysis");
        };
        self.analysis
            .record(id)
            .fields
            .iter()
            .position(|f| f.name == field)
            .expect("record field survived analysis") as u16
    }

    /// Everything a store needs on the stack *below* the value.
    fn lvalue_prefix(&mut self, lvalue: &LValue) {
        match lvalue {
            LValue::Var(_, _) => {}
            LValue::Index(_, args, _) => {
                for arg in args {
                    self.expression(arg);
                }
            }
            LValue::Field(_, _, _) => {
                // Leave [root, intermediates...] on the stack; the store
                // half threads the new value back down the chain.
                let (root, path) = flatten_field_path(lvalue);
                match root {
                    LValue::Var(id, _) => {
                        let (global, slot) = self.slot(&id.key(), false);
                        self.push(self.load_op(global, slot));
                    }
                    LValue::Index(id, args, _) => {
                        let (global, slot) = self.slot(&id.key(), true);
                        // One set of indices for the final store...
                        for arg in args {
                            self.expression(arg);
                        }
                        // ...and one consumed by the load.
                        for arg in args {
                            self.expression(arg);
                        }
                        self.push(Opcode::IndexGet {
                            global,
                            slot,
                            dims: args.len() as u8,
                        });
                    }
                    LValue::Field(_, _, _) => unreachable!("flattened root is never a field"),
                }
                let mut ty = self.lvalue_ty(root);
                for field in &path[..path.len() - 1] {
                    let index = self.field_index(ty, field);
                    self.push(Opcode::Dup);
                    self.push(Opcode::FieldGet(index));
                    ty = self.field_ty_of(ty, field);
                }
            }
        }
    }

    /// Consume the value on top of the stack (plus the prefix) and store.
    fn lvalue_store(&mut self, lvalue: &LValue) {
        match lvalue {
            LValue::Var(id, _) => {
                let (global, slot) = self.slot(&id.key(), false);
                self.push(self.store_op(global, slot));
            }
            LValue::Index(id, args, _) => {
                let (global, slot) = self.slot(&id.key(), true);
                self.push(Opcode::IndexSet {
                    global,
                    slot,
                    dims: args.len() as u8,
                });
            }
            LValue::Field(_, _, _) => {
                let (root, path) = flatten_field_path(lvalue);
                // Walk the chain types again to emit the FieldSet ladder.
                let mut tys = vec![self.lvalue_ty(root)];
                for field in &path[..path.len() - 1] {
                    let ty = self.field_ty_of(*tys.last().expect("nonempty"), field);
                    tys.push(ty);
                }
                for (field, ty) in path.iter().zip(tys.iter()).rev() {
                    let index = self.field_index(*ty, field);
                    self.push(Opcode::FieldSet(index));
                }
                match root {
                    LValue::Var(id, _) => {
                        let (global, slot) = self.slot(&id.key(), false);
                        self.push(self.store_op(global, slot));
                    }
                    LValue::Index(id, args, _) => {
                        let (global, slot) = self.slot(&id.key(), true);
                        self.push(Opcode::IndexSet {
                            global,
                            slot,
                            dims: args.len() as u8,
                        });
                    }
                    LValue::Field(_, _, _) => unreachable!("flattened root is never a field"),
                }
            }
        }
    }

    fn field_ty_of(&self, base_ty: Ty, field: &str) -> Ty {
        let Ty::Record(id) = base_ty else {
            unreachable!("field access on non-record survived analysis");
        };
        self.analysis
            .record(id)
            .fields
            .iter()
            .find(|f| f.name == field)
            .expect("record field survived analysis")
            .ty
    }

    /// Push the current value of an l-value (for SWAP).
    fn lvalue_load(&mut self, lvalue: &LValue) {
        match lvalue {
            LValue::Var(id, _) => {
                let (global, slot) = self.slot(&id.key(), false);
                self.push(self.load_op(global, slot));
            }
            LValue::Index(id, args, _) => {
                let (global, slot) = self.slot(&id.key(), true);
                for arg in args {
                    self.expression(arg);
                }
                self.push(Opcode::IndexGet {
                    global,
                    slot,
                    dims: args.len() as u8,
                });
            }
            LValue::Field(base, field, _) => {
                self.lvalue_load(base);
                let base_ty = self.lvalue_ty(base);
                let index = self.field_index(base_ty, field);
                self.push(Opcode::FieldGet(index));
            }
        }
    }

    // ----- expressions -----

    fn expression(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Int(n) => {
                self.konst(Val::Int16(*n));
            }
            ExprKind::Long(n) => {
                self.konst(Val::Int32(*n));
            }
            ExprKind::Int64(n) => {
                self.konst(Val::Int64(*n));
            }
            ExprKind::Single(n) => {
                self.konst(Val::Single(*n));
            }
            ExprKind::Double(n) => {
                self.konst(Val::Double(*n));
            }
            ExprKind::Str(s) => {
                self.konst(Val::Str(s.clone()));
            }
            ExprKind::Var(id) => {
                let (global, slot) = self.slot(&id.key(), false);
                self.push(self.load_op(global, slot));
            }
            ExprKind::Index { name, args } => {
                let (global, slot) = self.slot(&name.key(), true);
                for arg in args {
                    self.expression(arg);
                }
                self.push(Opcode::IndexGet {
                    global,
                    slot,
                    dims: args.len() as u8,
                });
            }
            ExprKind::Field {
                base,
                field,
                ..
            } => {
                self.expression(base);
                let base_ty = base.ty.expect("typed by analysis");
                let index = self.field_index(base_ty, field);
                self.push(Opcode::FieldGet(index));
            }
            ExprKind::Unary { op, expr: inner } => {
                self.expression(inner);
                match op {
                    UnaryOp::Neg => self.push(Opcode::Neg),
                    UnaryOp::Not => self.push(Opcode::Not),
                };
            }
            ExprKind::Binary { op, lhs, rhs } => {
                self.expression(lhs);
                self.expression(rhs);
                let string_add = *op == BinOp::Add
                    && matches!(lhs.ty, Some(ty) if ty.is_string());
                let opcode = match op {
                    BinOp::Add if string_add => Opcode::Concat,
                    BinOp::Add => Opcode::Add,
                    BinOp::Sub => Opcode::Sub,
                    BinOp::Mul => Opcode::Mul,
                    BinOp::Div => Opcode::Div,
                    BinOp::IntDiv => Opcode::IntDiv,
                    BinOp::Mod => Opcode::Mod,
                    BinOp::Pow => Opcode::Pow,
                    BinOp::Cmp(cmp) => Opcode::Cmp(*cmp),
                    BinOp::And => Opcode::And,
                    BinOp::Or => Opcode::Or,
                };
                self.push(opcode);
            }
            ExprKind::CallFn { proc, args } => {
                self.call(*proc, args);
            }
            ExprKind::Builtin { builtin, args } => self.builtin(*builtin, args),
            ExprKind::Coerce { to, expr: inner } => {
                self.expression(inner);
                self.push(Opcode::Coerce(*to));
            }
        }
    }

    fn builtin(&mut self, builtin: Builtin, args: &[Expr]) {
        match builtin {
            Builtin::Rnd => {
                let has_arg = !args.is_empty();
                if has_arg {
                    self.expression(&args[0]);
                }
                self.push(Opcode::Rnd { arg: has_arg });
            }
            Builtin::Timer => {
                self.push(Opcode::Timer);
            }
            Builtin::Lbound | Builtin::Ubound => {
                let ExprKind::Var(id) = &args[0].kind else {
                    unreachable!("array-name argument survived analysis");
                };
                let (global, slot) = self.slot(&id.key(), true);
                match args.get(1) {
                    Some(dim) => self.expression(dim),
                    None => {
                        self.konst(Val::Int32(1));
                    }
                }
                self.push(Opcode::ArrayBound {
                    global,
                    slot,
                    upper: builtin == Builtin::Ubound,
                });
            }
            _ => {
                for arg in args {
                    self.expression(arg);
                }
                self.push(Opcode::Intrinsic {
                    builtin,
                    argc: args.len() as u8,
                });
            }
        }
    }
}

/// Peel a field chain down to its root and the field names in order.
fn flatten_field_path(lvalue: &LValue) -> (&LValue, Vec<&str>) {
    let mut path = Vec::new();
    let mut cursor = lvalue;
    while let LValue::Field(base, field, _) = cursor {
        path.push(field.as_str());
        cursor = base;
    }
    path.reverse();
    (cursor, path)
}
