use super::ast::*;
use super::token::{Literal, Operator, Token, TokenKind, Word};
use super::{Diagnostic, Span};
use crate::diag;

/// Parse a token stream into a [`Module`]. Diagnostics are collected and
/// the parser resynchronizes at statement boundaries, so one bad line
/// does not hide the rest.
pub fn parse(tokens: &[Token]) -> (Module, Vec<Diagnostic>) {
    let mut parser = Parser {
        tokens,
        pos: 0,
        diagnostics: Vec::new(),
        in_proc: false,
        depth: 0,
    };
    let stmts = parser.statements(|_| false);
    (Module { stmts }, parser.diagnostics)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    diagnostics: Vec<Diagnostic>,
    in_proc: bool,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&'a Token> {
        self.tokens.get(self.pos + offset)
    }

    fn here(&self) -> Span {
        match self.peek() {
            Some(token) => token.span.clone(),
            None => self
                .tokens
                .last()
                .map(|t| t.span.clone())
                .unwrap_or_default(),
        }
    }

    fn at_word(&self, word: Word) -> bool {
        matches!(self.peek(), Some(t) if t.kind == TokenKind::Word(word))
    }

    fn at_words(&self, a: Word, b: Word) -> bool {
        self.at_word(a) && matches!(self.peek_at(1), Some(t) if t.kind == TokenKind::Word(b))
    }

    fn eat_word(&mut self, word: Word) -> bool {
        if self.at_word(word) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if matches!(self.peek(), Some(t) if t.kind == *kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_word(&mut self, word: Word, what: &str) -> bool {
        if self.eat_word(word) {
            true
        } else {
            let span = self.here();
            self.diagnostics
                .push(diag!(UnexpectedToken, span; format!("expected {}", what)));
            false
        }
    }

    fn error_here(&mut self, message: &str) {
        let span = self.here();
        self.diagnostics
            .push(diag!(UnexpectedToken, span; message));
    }

    /// Skip to the next statement boundary after an error.
    fn synchronize(&mut self) {
        while let Some(token) = self.peek() {
            match token.kind {
                TokenKind::Eol | TokenKind::Colon => break,
                _ => {
                    self.pos += 1;
                }
            }
        }
    }

    fn at_statement_end(&self) -> bool {
        match self.peek() {
            None => true,
            Some(t) => matches!(t.kind, TokenKind::Eol | TokenKind::Colon),
        }
    }

    /// True if the previous token was an end-of-line (or nothing), i.e.
    /// the cursor sits at the start of a logical line.
    fn at_line_start(&self) -> bool {
        match self.pos.checked_sub(1).and_then(|i| self.tokens.get(i)) {
            None => true,
            Some(t) => t.kind == TokenKind::Eol,
        }
    }

    /// Parse statements until `stop` matches at a statement boundary.
    fn statements(&mut self, stop: impl Fn(&Parser) -> bool) -> Vec<Stmt> {
        self.depth += 1;
        let stmts = self.statements_inner(stop);
        self.depth -= 1;
        stmts
    }

    fn statements_inner(&mut self, stop: impl Fn(&Parser) -> bool) -> Vec<Stmt> {
        let mut stmts = Vec::new();
        loop {
            while matches!(
                self.peek().map(|t| &t.kind),
                Some(TokenKind::Eol) | Some(TokenKind::Colon)
            ) {
                self.pos += 1;
            }
            if self.peek().is_none() || stop(self) {
                break;
            }
            if let Some(stmt) = self.statement() {
                let is_label = matches!(stmt, Stmt::Label { .. });
                stmts.push(stmt);
                // Labels may share a line with what follows; everything
                // else runs to a separator.
                if !is_label
                    && !self.at_statement_end()
                    && !self.at_word(Word::Else)
                    && !stop(self)
                {
                    let span = self.here();
                    self.diagnostics.push(diag!(ExpectedEndOfLine, span));
                    self.synchronize();
                }
            }
        }
        stmts
    }

    fn statement(&mut self) -> Option<Stmt> {
        let token = self.peek()?;
        let span = token.span.clone();
        match &token.kind {
            // A bare integer at the start of a logical line is a label.
            TokenKind::Literal(Literal::Int(n)) if self.at_line_start() => {
                let name = n.to_string();
                self.pos += 1;
                return Some(Stmt::Label { span, name });
            }
            TokenKind::Literal(Literal::Long(n)) if self.at_line_start() => {
                let name = n.to_string();
                self.pos += 1;
                return Some(Stmt::Label { span, name });
            }
            // `ident:` in statement position is a label.
            TokenKind::Ident(id) if id.sigil.is_none() => {
                if matches!(self.peek_at(1), Some(t) if t.kind == TokenKind::Colon) {
                    let name = id.name.clone();
                    self.pos += 2;
                    return Some(Stmt::Label { span, name });
                }
                return self.assign_or_call();
            }
            TokenKind::Ident(_) => return self.assign_or_call(),
            TokenKind::Meta(name) => {
                let name = name.clone();
                self.pos += 1;
                return Some(Stmt::Meta { span, name });
            }
            TokenKind::Word(word) => {
                let word = *word;
                return self.word_statement(word, span);
            }
            _ => {}
        }
        self.error_here("expected a statement");
        self.synchronize();
        None
    }

    fn word_statement(&mut self, word: Word, span: Span) -> Option<Stmt> {
        self.pos += 1;
        match word {
            Word::Rem => None,
            Word::Dim => self.dim(span, false),
            Word::Redim => self.dim(span, true),
            Word::Const => self.const_def(span),
            Word::Type => self.type_def(span),
            Word::Let => self.assign_or_call(),
            Word::Print => Some(self.print(span)),
            Word::Write => Some(self.write(span)),
            Word::Input => Some(self.input(span, false)),
            Word::Line => {
                if self.expect_word(Word::Input, "INPUT after LINE") {
                    Some(self.input(span, true))
                } else {
                    self.synchronize();
                    None
                }
            }
            Word::If => self.if_stmt(span),
            Word::Select => self.select(span),
            Word::For => self.for_stmt(span),
            Word::While => self.while_stmt(span),
            Word::Do => self.do_stmt(span),
            Word::Exit => self.exit(span),
            Word::Goto => {
                let target = self.label_ref()?;
                Some(Stmt::Goto { span, target })
            }
            Word::Gosub => {
                let target = self.label_ref()?;
                Some(Stmt::Gosub { span, target })
            }
            Word::Return => {
                let target = if self.at_statement_end() {
                    None
                } else {
                    Some(self.label_ref()?)
                };
                Some(Stmt::Return { span, target })
            }
            Word::Sub => self.proc(span, false),
            Word::Function => self.proc(span, true),
            Word::Declare => self.declare(span),
            Word::Call => self.call(span),
            Word::Open => self.open(span),
            Word::Close => Some(self.close(span)),
            Word::Data => Some(self.data(span)),
            Word::Read => Some(self.read(span)),
            Word::Restore => {
                let target = if self.at_statement_end() {
                    None
                } else {
                    Some(self.label_ref()?)
                };
                Some(Stmt::Restore { span, target })
            }
            Word::Randomize => {
                let seed = if self.at_statement_end() {
                    None
                } else {
                    Some(self.expr())
                };
                Some(Stmt::Randomize { span, seed })
            }
            Word::Swap => {
                let left = self.lvalue()?;
                if !self.eat(&TokenKind::Comma) {
                    self.error_here("expected , in SWAP");
                    self.synchronize();
                    return None;
                }
                let right = self.lvalue()?;
                Some(Stmt::Swap { span, left, right })
            }
            Word::Cls => Some(Stmt::Cls { span }),
            Word::Option => {
                if !self.expect_word(Word::Base, "BASE after OPTION") {
                    self.synchronize();
                    return None;
                }
                match self.peek().map(|t| &t.kind) {
                    Some(TokenKind::Literal(Literal::Int(n))) if *n == 0 || *n == 1 => {
                        let base = *n as i32;
                        self.pos += 1;
                        Some(Stmt::OptionBase { span, base })
                    }
                    _ => {
                        self.error_here("OPTION BASE must be 0 or 1");
                        self.synchronize();
                        None
                    }
                }
            }
            Word::End => {
                if self.at_statement_end() {
                    Some(Stmt::End { span })
                } else {
                    self.error_here("END block without an opening");
                    self.synchronize();
                    None
                }
            }
            _ => {
                self.diagnostics
                    .push(diag!(UnexpectedToken, span; "statement cannot start here"));
                self.synchronize();
                None
            }
        }
    }

    fn dim(&mut self, span: Span, redim: bool) -> Option<Stmt> {
        let shared = self.eat_word(Word::Shared);
        let mut decls = Vec::new();
        loop {
            let (name, name_span) = self.ident("variable name")?;
            let bounds = if self.eat(&TokenKind::LParen) {
                let mut dims = Vec::new();
                loop {
                    let first = self.expr();
                    if self.eat_word(Word::To) {
                        let upper = self.expr();
                        dims.push((Some(first), upper));
                    } else {
                        dims.push((None, first));
                    }
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                if !self.eat(&TokenKind::RParen) {
                    self.error_here("expected )");
                    self.synchronize();
                    return None;
                }
                Some(dims)
            } else {
                None
            };
            let ty = if self.eat_word(Word::As) {
                Some(self.type_ref()?)
            } else {
                None
            };
            decls.push(DimDecl {
                name,
                span: name_span,
                bounds,
                ty,
            });
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        Some(Stmt::Dim {
            span,
            shared,
            redim,
            decls,
        })
    }

    fn type_ref(&mut self) -> Option<TypeRef> {
        let token = self.peek()?;
        let type_ref = match &token.kind {
            TokenKind::Word(Word::TyInteger) => TypeRef::Int16,
            TokenKind::Word(Word::TyLong) => TypeRef::Int32,
            TokenKind::Word(Word::TyInteger64) => TypeRef::Int64,
            TokenKind::Word(Word::TySingle) => TypeRef::Single,
            TokenKind::Word(Word::TyDouble) => TypeRef::Double,
            TokenKind::Word(Word::TyUnsigned) => {
                self.pos += 1;
                if !self.expect_word(Word::TyLong, "LONG after _UNSIGNED") {
                    self.synchronize();
                    return None;
                }
                return Some(TypeRef::UInt32);
            }
            TokenKind::Word(Word::TyString) => {
                self.pos += 1;
                if self.eat(&TokenKind::Operator(Operator::Multiply)) {
                    let len = self.expr();
                    return Some(TypeRef::FixedStr(Box::new(len)));
                }
                return Some(TypeRef::Str);
            }
            TokenKind::Ident(id) if id.sigil.is_none() => TypeRef::Named(id.name.clone()),
            _ => {
                self.error_here("expected a type name");
                self.synchronize();
                return None;
            }
        };
        self.pos += 1;
        Some(type_ref)
    }

    fn const_def(&mut self, span: Span) -> Option<Stmt> {
        let mut defs = Vec::new();
        loop {
            let (name, name_span) = self.ident("constant name")?;
            if !self.eat(&TokenKind::Operator(Operator::Equal)) {
                self.error_here("expected = in CONST");
                self.synchronize();
                break;
            }
            let value = self.expr();
            defs.push((name, name_span, value));
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        Some(Stmt::ConstDef { span, defs })
    }

    fn type_def(&mut self, span: Span) -> Option<Stmt> {
        let (name, _) = self.ident("TYPE name")?;
        if name.sigil.is_some() {
            self.error_here("TYPE name cannot carry a sigil");
        }
        let mut fields = Vec::new();
        loop {
            while matches!(
                self.peek().map(|t| &t.kind),
                Some(TokenKind::Eol) | Some(TokenKind::Colon)
            ) {
                self.pos += 1;
            }
            if self.at_words(Word::End, Word::Type) {
                self.pos += 2;
                break;
            }
            if self.peek().is_none() {
                self.error_here("TYPE without END TYPE");
                break;
            }
            let Some((field, field_span)) = self.ident("field name") else {
                self.synchronize();
                continue;
            };
            if !self.expect_word(Word::As, "AS in TYPE field") {
                self.synchronize();
                continue;
            }
            let Some(ty) = self.type_ref() else {
                continue;
            };
            fields.push((field.name, ty, field_span));
        }
        Some(Stmt::TypeDef {
            span,
            name: name.name,
            fields,
        })
    }

    fn assign_or_call(&mut self) -> Option<Stmt> {
        let start = self.pos;
        let saved_diags = self.diagnostics.len();
        if let Some(target) = self.try_lvalue() {
            if self.eat(&TokenKind::Operator(Operator::Equal)) {
                let span = target.span().clone();
                let value = self.expr();
                return Some(Stmt::Assign {
                    span,
                    target,
                    value,
                });
            }
        }
        // Not an assignment: re-parse as an implicit CALL.
        self.pos = start;
        self.diagnostics.truncate(saved_diags);
        let span = self.here();
        self.call(span)
    }

    fn call(&mut self, span: Span) -> Option<Stmt> {
        let (name, name_span) = self.ident("procedure name")?;
        if name.sigil.is_some() {
            self.diagnostics
                .push(diag!(UnexpectedToken, name_span; "SUB names cannot carry a sigil"));
        }
        let mut args = Vec::new();
        if self.eat(&TokenKind::LParen) {
            if !self.eat(&TokenKind::RParen) {
                loop {
                    args.push(self.expr());
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                if !self.eat(&TokenKind::RParen) {
                    self.error_here("expected )");
                    self.synchronize();
                }
            }
        } else if !self.at_statement_end() && !self.at_word(Word::Else) {
            loop {
                args.push(self.expr());
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        Some(Stmt::Call {
            span,
            name: name.name,
            name_span,
            args,
        })
    }

    fn print(&mut self, span: Span) -> Stmt {
        let channel = self.channel_prefix();
        let mut items = Vec::new();
        loop {
            if self.at_statement_end() || self.at_word(Word::Else) {
                break;
            }
            if self.eat(&TokenKind::Comma) {
                items.push(PrintItem::Comma);
                continue;
            }
            if self.eat(&TokenKind::Semicolon) {
                items.push(PrintItem::Semicolon);
                continue;
            }
            items.push(PrintItem::Expr(self.expr()));
        }
        Stmt::Print {
            span,
            channel,
            items,
        }
    }

    fn write(&mut self, span: Span) -> Stmt {
        let channel = self.channel_prefix();
        let mut items = Vec::new();
        while !self.at_statement_end() && !self.at_word(Word::Else) {
            items.push(self.expr());
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        Stmt::Write {
            span,
            channel,
            items,
        }
    }

    /// `#expr ,` at the head of PRINT/WRITE/INPUT.
    fn channel_prefix(&mut self) -> Option<Expr> {
        if !self.eat(&TokenKind::Hash) {
            return None;
        }
        let channel = self.expr();
        if !self.eat(&TokenKind::Comma) && !self.eat(&TokenKind::Semicolon) {
            self.error_here("expected , after channel");
        }
        Some(channel)
    }

    fn input(&mut self, span: Span, line: bool) -> Stmt {
        let channel = self.channel_prefix();
        let mut prompt = None;
        if channel.is_none() {
            if let Some(TokenKind::Literal(Literal::Str(s))) = self.peek().map(|t| &t.kind) {
                let text = s.clone();
                self.pos += 1;
                if self.eat(&TokenKind::Semicolon) {
                    // INPUT appends the question mark; LINE INPUT never does.
                    prompt = Some(if line { text } else { format!("{}? ", text) });
                } else if self.eat(&TokenKind::Comma) {
                    prompt = Some(text);
                } else {
                    self.error_here("expected ; or , after INPUT prompt");
                    prompt = Some(text);
                }
            }
        }
        let mut targets = Vec::new();
        loop {
            match self.lvalue() {
                Some(lv) => targets.push(lv),
                None => break,
            }
            if line || !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        Stmt::Input {
            span,
            channel,
            prompt,
            line,
            targets,
        }
    }

    fn if_stmt(&mut self, span: Span) -> Option<Stmt> {
        let cond = self.expr();
        if !self.expect_word(Word::Then, "THEN") {
            self.synchronize();
            return None;
        }
        if self.at_statement_end() {
            // Block form.
            let then_body = self.statements(|p| {
                p.at_word(Word::ElseIf) || p.at_word(Word::Else) || p.at_words(Word::End, Word::If)
            });
            let mut elseifs = Vec::new();
            while self.eat_word(Word::ElseIf) {
                let elseif_cond = self.expr();
                self.expect_word(Word::Then, "THEN");
                let body = self.statements(|p| {
                    p.at_word(Word::ElseIf)
                        || p.at_word(Word::Else)
                        || p.at_words(Word::End, Word::If)
                });
                elseifs.push((elseif_cond, body));
            }
            let else_body = if self.eat_word(Word::Else) {
                Some(self.statements(|p| p.at_words(Word::End, Word::If)))
            } else {
                None
            };
            if self.at_words(Word::End, Word::If) {
                self.pos += 2;
            } else {
                self.error_here("IF without END IF");
            }
            Some(Stmt::If {
                span,
                cond,
                then_body,
                elseifs,
                else_body,
            })
        } else {
            // Single-line form: IF c THEN stmts [ELSE stmts]
            let then_body = self.inline_body();
            let else_body = if self.eat_word(Word::Else) {
                Some(self.inline_body())
            } else {
                None
            };
            Some(Stmt::If {
                span,
                cond,
                then_body,
                elseifs: Vec::new(),
                else_body,
            })
        }
    }

    /// Statements up to ELSE or end-of-line; a bare line number means GOTO.
    fn inline_body(&mut self) -> Vec<Stmt> {
        let mut stmts = Vec::new();
        loop {
            while self.eat(&TokenKind::Colon) {}
            if self.at_statement_end() || self.at_word(Word::Else) {
                break;
            }
            if let Some(token) = self.peek() {
                if let TokenKind::Literal(Literal::Int(n)) = &token.kind {
                    let name = n.to_string();
                    let span = token.span.clone();
                    self.pos += 1;
                    stmts.push(Stmt::Goto {
                        span: span.clone(),
                        target: LabelRef { name, span },
                    });
                    continue;
                }
            }
            if let Some(stmt) = self.statement() {
                stmts.push(stmt);
            }
        }
        stmts
    }

    fn select(&mut self, span: Span) -> Option<Stmt> {
        if !self.expect_word(Word::Case, "CASE after SELECT") {
            self.synchronize();
            return None;
        }
        let subject = self.expr();
        let mut arms = Vec::new();
        let mut else_body = None;
        loop {
            while matches!(
                self.peek().map(|t| &t.kind),
                Some(TokenKind::Eol) | Some(TokenKind::Colon)
            ) {
                self.pos += 1;
            }
            if self.at_words(Word::End, Word::Select) {
                self.pos += 2;
                break;
            }
            if !self.eat_word(Word::Case) {
                self.error_here("SELECT CASE without END SELECT");
                break;
            }
            let arm_span = self.here();
            if self.eat_word(Word::Else) {
                let body =
                    self.statements(|p| p.at_word(Word::Case) || p.at_words(Word::End, Word::Select));
                else_body = Some(body);
                continue;
            }
            let mut guards = Vec::new();
            loop {
                if self.eat_word(Word::Is) {
                    let op = self.cmp_op()?;
                    let value = self.expr();
                    guards.push(CaseGuard::Is(op, value));
                } else {
                    let value = self.expr();
                    if self.eat_word(Word::To) {
                        let hi = self.expr();
                        guards.push(CaseGuard::Range(value, hi));
                    } else {
                        guards.push(CaseGuard::Equal(value));
                    }
                }
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
            let body =
                self.statements(|p| p.at_word(Word::Case) || p.at_words(Word::End, Word::Select));
            arms.push(CaseArm {
                span: arm_span,
                guards,
                body,
            });
        }
        Some(Stmt::Select {
            span,
            subject,
            arms,
            else_body,
        })
    }

    fn cmp_op(&mut self) -> Option<CmpOp> {
        let op = match self.peek().map(|t| &t.kind) {
            Some(TokenKind::Operator(Operator::Equal)) => CmpOp::Eq,
            Some(TokenKind::Operator(Operator::NotEqual)) => CmpOp::Ne,
            Some(TokenKind::Operator(Operator::Less)) => CmpOp::Lt,
            Some(TokenKind::Operator(Operator::LessEqual)) => CmpOp::Le,
            Some(TokenKind::Operator(Operator::Greater)) => CmpOp::Gt,
            Some(TokenKind::Operator(Operator::GreaterEqual)) => CmpOp::Ge,
            _ => {
                self.error_here("expected a comparison after IS");
                self.synchronize();
                return None;
            }
        };
        self.pos += 1;
        Some(op)
    }

    fn for_stmt(&mut self, span: Span) -> Option<Stmt> {
        let (var, var_span) = self.ident("FOR counter")?;
        if !self.eat(&TokenKind::Operator(Operator::Equal)) {
            self.error_here("expected = in FOR");
            self.synchronize();
            return None;
        }
        let from = self.expr();
        if !self.expect_word(Word::To, "TO") {
            self.synchronize();
            return None;
        }
        let to = self.expr();
        let step = if self.eat_word(Word::Step) {
            Some(self.expr())
        } else {
            None
        };
        let body = self.statements(|p| p.at_word(Word::Next));
        if self.eat_word(Word::Next) {
            if let Some(TokenKind::Ident(id)) = self.peek().map(|t| &t.kind) {
                let id = id.clone();
                let id_span = self.here();
                self.pos += 1;
                if id.key() != var.key() {
                    self.diagnostics
                        .push(diag!(UnexpectedToken, id_span; "NEXT without FOR"));
                }
                if self.eat(&TokenKind::Comma) {
                    self.diagnostics.push(
                        diag!(UnexpectedToken, id_span; "close each FOR with its own NEXT"),
                    );
                    self.synchronize();
                }
            }
        } else {
            self.error_here("FOR without NEXT");
        }
        Some(Stmt::For {
            span,
            var,
            var_span,
            from,
            to,
            step,
            body,
        })
    }

    fn while_stmt(&mut self, span: Span) -> Option<Stmt> {
        let cond = self.expr();
        let body = self.statements(|p| p.at_word(Word::Wend));
        if !self.eat_word(Word::Wend) {
            self.error_here("WHILE without WEND");
        }
        Some(Stmt::While { span, cond, body })
    }

    fn do_stmt(&mut self, span: Span) -> Option<Stmt> {
        let pre = self.loop_cond();
        let body = self.statements(|p| p.at_word(Word::Loop));
        if !self.eat_word(Word::Loop) {
            self.error_here("DO without LOOP");
            return None;
        }
        let post = self.loop_cond();
        if pre.is_some() && post.is_some() {
            self.error_here("DO and LOOP cannot both carry a condition");
        }
        Some(Stmt::DoLoop {
            span,
            pre,
            post,
            body,
        })
    }

    fn loop_cond(&mut self) -> Option<LoopCond> {
        if self.eat_word(Word::While) {
            Some(LoopCond {
                until: false,
                cond: self.expr(),
            })
        } else if self.eat_word(Word::Until) {
            Some(LoopCond {
                until: true,
                cond: self.expr(),
            })
        } else {
            None
        }
    }

    fn exit(&mut self, span: Span) -> Option<Stmt> {
        let kind = if self.eat_word(Word::For) {
            ExitKind::For
        } else if self.eat_word(Word::Do) {
            ExitKind::Do
        } else if self.eat_word(Word::Sub) {
            ExitKind::Sub
        } else if self.eat_word(Word::Function) {
            ExitKind::Function
        } else {
            self.error_here("expected FOR, DO, SUB, or FUNCTION after EXIT");
            self.synchronize();
            return None;
        };
        Some(Stmt::Exit { span, kind })
    }

    fn proc(&mut self, span: Span, is_function: bool) -> Option<Stmt> {
        if self.in_proc || self.depth > 1 {
            self.diagnostics
                .push(diag!(UnexpectedToken, span; "SUB and FUNCTION must be top-level"));
        }
        let (name, name_span) = self.ident("procedure name")?;
        let params = self.param_list();
        self.in_proc = true;
        let terminator = if is_function {
            Word::Function
        } else {
            Word::Sub
        };
        let body = self.statements(|p| p.at_words(Word::End, terminator));
        self.in_proc = false;
        if self.at_words(Word::End, terminator) {
            self.pos += 2;
        } else {
            self.error_here(if is_function {
                "FUNCTION without END FUNCTION"
            } else {
                "SUB without END SUB"
            });
        }
        Some(Stmt::Proc(ProcDef {
            span,
            is_function,
            name,
            name_span,
            params,
            body,
        }))
    }

    fn declare(&mut self, span: Span) -> Option<Stmt> {
        let is_function = if self.eat_word(Word::Function) {
            true
        } else if self.eat_word(Word::Sub) {
            false
        } else {
            self.error_here("expected SUB or FUNCTION after DECLARE");
            self.synchronize();
            return None;
        };
        let (name, _) = self.ident("procedure name")?;
        let params = self.param_list();
        Some(Stmt::Declare {
            span,
            is_function,
            name,
            params,
        })
    }

    fn param_list(&mut self) -> Vec<Param> {
        let mut params = Vec::new();
        if !self.eat(&TokenKind::LParen) {
            return params;
        }
        if self.eat(&TokenKind::RParen) {
            return params;
        }
        loop {
            let by_val = self.eat_word(Word::Byval);
            let Some((name, param_span)) = self.ident("parameter name") else {
                self.synchronize();
                break;
            };
            let ty = if self.eat_word(Word::As) {
                self.type_ref()
            } else {
                None
            };
            params.push(Param {
                name,
                span: param_span,
                by_val,
                ty,
            });
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        if !self.eat(&TokenKind::RParen) {
            self.error_here("expected )");
            self.synchronize();
        }
        params
    }

    fn open(&mut self, span: Span) -> Option<Stmt> {
        let path = self.expr();
        if !self.expect_word(Word::For, "FOR in OPEN") {
            self.synchronize();
            return None;
        }
        let mode = if self.eat_word(Word::Input) {
            OpenMode::Input
        } else if self.eat_word(Word::Output) {
            OpenMode::Output
        } else if self.eat_word(Word::Append) {
            OpenMode::Append
        } else if self.eat_word(Word::Binary) {
            OpenMode::Binary
        } else if self.eat_word(Word::Random) {
            OpenMode::Random
        } else {
            self.error_here("expected INPUT, OUTPUT, APPEND, BINARY, or RANDOM");
            self.synchronize();
            return None;
        };
        if !self.expect_word(Word::As, "AS in OPEN") {
            self.synchronize();
            return None;
        }
        self.eat(&TokenKind::Hash);
        let channel = self.expr();
        Some(Stmt::Open {
            span,
            path,
            mode,
            channel,
        })
    }

    fn close(&mut self, span: Span) -> Stmt {
        let mut channels = Vec::new();
        while !self.at_statement_end() && !self.at_word(Word::Else) {
            self.eat(&TokenKind::Hash);
            channels.push(self.expr());
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        Stmt::Close { span, channels }
    }

    fn data(&mut self, span: Span) -> Stmt {
        let mut items = Vec::new();
        loop {
            if self.at_statement_end() {
                break;
            }
            let negative = if self.eat(&TokenKind::Operator(Operator::Minus)) {
                true
            } else {
                self.eat(&TokenKind::Operator(Operator::Plus));
                false
            };
            match self.peek().map(|t| t.kind.clone()) {
                Some(TokenKind::Literal(lit)) => {
                    self.pos += 1;
                    let item = match lit {
                        Literal::Int(n) => DataLit::Int(if negative { -(n as i64) } else { n as i64 }),
                        Literal::Long(n) => {
                            DataLit::Int(if negative { -(n as i64) } else { n as i64 })
                        }
                        Literal::Int64(n) => DataLit::Int(if negative { -n } else { n }),
                        Literal::Single(n) => {
                            DataLit::Float(if negative { -n as f64 } else { n as f64 })
                        }
                        Literal::Double(n) => DataLit::Float(if negative { -n } else { n }),
                        Literal::Str(s) => DataLit::Text(s),
                    };
                    items.push(item);
                }
                _ => {
                    self.error_here("DATA items are numbers or quoted strings");
                    self.synchronize();
                    break;
                }
            }
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        Stmt::Data { span, items }
    }

    fn read(&mut self, span: Span) -> Stmt {
        let mut targets = Vec::new();
        loop {
            match self.lvalue() {
                Some(lv) => targets.push(lv),
                None => break,
            }
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        Stmt::Read { span, targets }
    }

    fn label_ref(&mut self) -> Option<LabelRef> {
        let token = self.peek()?;
        let span = token.span.clone();
        match &token.kind {
            TokenKind::Ident(id) if id.sigil.is_none() => {
                let name = id.name.clone();
                self.pos += 1;
                Some(LabelRef { name, span })
            }
            TokenKind::Literal(Literal::Int(n)) => {
                let name = n.to_string();
                self.pos += 1;
                Some(LabelRef { name, span })
            }
            TokenKind::Literal(Literal::Long(n)) => {
                let name = n.to_string();
                self.pos += 1;
                Some(LabelRef { name, span })
            }
            _ => {
                self.error_here("expected a label or line number");
                self.synchronize();
                None
            }
        }
    }

    fn ident(&mut self, what: &str) -> Option<(Ident, Span)> {
        match self.peek() {
            Some(token) => {
                if let TokenKind::Ident(id) = &token.kind {
                    let pair = (id.clone(), token.span.clone());
                    self.pos += 1;
                    Some(pair)
                } else {
                    self.error_here(&format!("expected {}", what));
                    self.synchronize();
                    None
                }
            }
            None => {
                self.error_here(&format!("expected {}", what));
                None
            }
        }
    }

    fn lvalue(&mut self) -> Option<LValue> {
        match self.try_lvalue() {
            Some(lv) => Some(lv),
            None => {
                self.error_here("expected a variable");
                self.synchronize();
                None
            }
        }
    }

    fn try_lvalue(&mut self) -> Option<LValue> {
        let token = self.peek()?;
        let TokenKind::Ident(id) = &token.kind else {
            return None;
        };
        let id = id.clone();
        let span = token.span.clone();
        self.pos += 1;
        let mut lvalue = if self.eat(&TokenKind::LParen) {
            let mut args = Vec::new();
            if !self.eat(&TokenKind::RParen) {
                loop {
                    args.push(self.expr());
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                if !self.eat(&TokenKind::RParen) {
                    self.error_here("expected )");
                }
            }
            let full = span.to(&self.prev_span());
            LValue::Index(id, args, full)
        } else {
            LValue::Var(id, span)
        };
        while self.eat(&TokenKind::Period) {
            let Some((field, field_span)) = self.ident("field name") else {
                break;
            };
            let full = lvalue.span().to(&field_span);
            lvalue = LValue::Field(Box::new(lvalue), field.name, full);
        }
        Some(lvalue)
    }

    fn prev_span(&self) -> Span {
        self.pos
            .checked_sub(1)
            .and_then(|i| self.tokens.get(i))
            .map(|t| t.span.clone())
            .unwrap_or_default()
    }

    // ----- expressions -----

    fn expr(&mut self) -> Expr {
        self.expr_bp(0)
    }

    fn expr_bp(&mut self, min_bp: u8) -> Expr {
        let mut lhs = self.primary();
        loop {
            let op = match self.peek().map(|t| &t.kind) {
                Some(TokenKind::Operator(op)) => match binary_op(*op) {
                    Some(op) => op,
                    None => break,
                },
                _ => break,
            };
            let bp = binding_power(op);
            if bp < min_bp {
                break;
            }
            self.pos += 1;
            let rhs = self.expr_bp(bp + 1);
            let span = lhs.span.to(&rhs.span);
            lhs = Expr::new(
                ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                span,
            );
        }
        lhs
    }

    fn primary(&mut self) -> Expr {
        let Some(token) = self.peek() else {
            let span = self.here();
            self.diagnostics
                .push(diag!(UnexpectedToken, span; "expected an expression"));
            return Expr::new(ExprKind::Int(0), span);
        };
        let span = token.span.clone();
        match token.kind.clone() {
            TokenKind::Literal(lit) => {
                self.pos += 1;
                let kind = match lit {
                    Literal::Int(n) => ExprKind::Int(n),
                    Literal::Long(n) => ExprKind::Long(n),
                    Literal::Int64(n) => ExprKind::Int64(n),
                    Literal::Single(n) => ExprKind::Single(n),
                    Literal::Double(n) => ExprKind::Double(n),
                    Literal::Str(s) => ExprKind::Str(s),
                };
                Expr::new(kind, span)
            }
            TokenKind::Operator(Operator::Minus) => {
                self.pos += 1;
                let operand = self.expr_bp(UNARY_BP);
                let full = span.to(&operand.span);
                Expr::new(
                    ExprKind::Unary {
                        op: UnaryOp::Neg,
                        expr: Box::new(operand),
                    },
                    full,
                )
            }
            TokenKind::Operator(Operator::Plus) => {
                self.pos += 1;
                self.expr_bp(UNARY_BP)
            }
            TokenKind::Operator(Operator::Not) => {
                self.pos += 1;
                let operand = self.expr_bp(UNARY_BP);
                let full = span.to(&operand.span);
                Expr::new(
                    ExprKind::Unary {
                        op: UnaryOp::Not,
                        expr: Box::new(operand),
                    },
                    full,
                )
            }
            TokenKind::LParen => {
                self.pos += 1;
                let mut inner = self.expr();
                if !self.eat(&TokenKind::RParen) {
                    self.error_here("expected )");
                }
                inner.span = span.to(&self.prev_span());
                inner
            }
            TokenKind::Ident(id) => {
                self.pos += 1;
                let mut expr = if self.eat(&TokenKind::LParen) {
                    let mut args = Vec::new();
                    if !self.eat(&TokenKind::RParen) {
                        loop {
                            args.push(self.expr());
                            if !self.eat(&TokenKind::Comma) {
                                break;
                            }
                        }
                        if !self.eat(&TokenKind::RParen) {
                            self.error_here("expected )");
                        }
                    }
                    let full = span.to(&self.prev_span());
                    Expr::new(ExprKind::Index { name: id, args }, full)
                } else {
                    Expr::new(ExprKind::Var(id), span)
                };
                while self.eat(&TokenKind::Period) {
                    if let Some((field, field_span)) = self.ident("field name") {
                        let full = expr.span.to(&field_span);
                        expr = Expr::new(
                            ExprKind::Field {
                                base: Box::new(expr),
                                field: field.name,
                                field_span,
                            },
                            full,
                        );
                    } else {
                        break;
                    }
                }
                expr
            }
            _ => {
                self.diagnostics
                    .push(diag!(UnexpectedToken, span; "expected an expression"));
                self.synchronize();
                Expr::new(ExprKind::Int(0), span)
            }
        }
    }
}

const UNARY_BP: u8 = 90;

fn binary_op(op: Operator) -> Option<BinOp> {
    Some(match op {
        Operator::Caret => BinOp::Pow,
        Operator::Multiply => BinOp::Mul,
        Operator::Divide => BinOp::Div,
        Operator::DivideInt => BinOp::IntDiv,
        Operator::Modulo => BinOp::Mod,
        Operator::Plus => BinOp::Add,
        Operator::Minus => BinOp::Sub,
        Operator::Equal => BinOp::Cmp(CmpOp::Eq),
        Operator::NotEqual => BinOp::Cmp(CmpOp::Ne),
        Operator::Less => BinOp::Cmp(CmpOp::Lt),
        Operator::LessEqual => BinOp::Cmp(CmpOp::Le),
        Operator::Greater => BinOp::Cmp(CmpOp::Gt),
        Operator::GreaterEqual => BinOp::Cmp(CmpOp::Ge),
        Operator::And => BinOp::And,
        Operator::Or => BinOp::Or,
        Operator::Not => return None,
    })
}

/// Precedence, high to low: `^`, `*`/`/`, `\`, `MOD`, `+`/`-`,
/// relational, `AND`, `OR`. Unary operators bind above all of these.
fn binding_power(op: BinOp) -> u8 {
    match op {
        BinOp::Pow => 80,
        BinOp::Mul | BinOp::Div => 70,
        BinOp::IntDiv => 60,
        BinOp::Mod => 50,
        BinOp::Add | BinOp::Sub => 40,
        BinOp::Cmp(_) => 30,
        BinOp::And => 20,
        BinOp::Or => 10,
    }
}
