use qbasic::lang::ast::*;
use qbasic::lang::{lex, parse, DiagnosticCode};

fn parse_ok(source: &str) -> Module {
    let (tokens, lex_diags) = lex(source);
    assert!(lex_diags.is_empty(), "{:?}", lex_diags);
    let (module, diagnostics) = parse(&tokens);
    assert!(diagnostics.is_empty(), "{:?}", diagnostics);
    module
}

fn parse_codes(source: &str) -> Vec<DiagnosticCode> {
    let (tokens, _) = lex(source);
    let (_, diagnostics) = parse(&tokens);
    diagnostics.into_iter().map(|d| d.code).collect()
}

/// Parsing the same source twice yields structurally identical trees
/// with identical spans.
#[test]
fn test_parser_is_deterministic() {
    let source = "DIM a(10) AS INTEGER\nFOR i = 1 TO 10\n  a(i) = i * 2\nNEXT i\nPRINT a(3)\n";
    assert_eq!(parse_ok(source), parse_ok(source));
}

#[test]
fn test_single_line_if_else() {
    let module = parse_ok("IF x > 0 THEN PRINT 1 ELSE PRINT 2");
    let Stmt::If {
        then_body,
        else_body,
        ..
    } = &module.stmts[0]
    else {
        panic!("expected IF");
    };
    assert_eq!(then_body.len(), 1);
    assert_eq!(else_body.as_ref().map(Vec::len), Some(1));
}

#[test]
fn test_single_line_if_goto_number() {
    let module = parse_ok("IF x THEN 100\n100 PRINT");
    let Stmt::If { then_body, .. } = &module.stmts[0] else {
        panic!("expected IF");
    };
    assert!(matches!(&then_body[0], Stmt::Goto { target, .. } if target.name == "100"));
}

#[test]
fn test_block_if_elseif_else() {
    let module = parse_ok("IF a THEN\n PRINT 1\nELSEIF b THEN\n PRINT 2\nELSE\n PRINT 3\nEND IF");
    let Stmt::If {
        elseifs, else_body, ..
    } = &module.stmts[0]
    else {
        panic!("expected IF");
    };
    assert_eq!(elseifs.len(), 1);
    assert!(else_body.is_some());
}

#[test]
fn test_select_case_forms() {
    let module = parse_ok(
        "SELECT CASE s\nCASE IS >= 90: PRINT \"A\"\nCASE 80 TO 89\n PRINT \"B\"\nCASE 1, 2\n PRINT \"C\"\nCASE ELSE\n PRINT \"?\"\nEND SELECT",
    );
    let Stmt::Select {
        arms, else_body, ..
    } = &module.stmts[0]
    else {
        panic!("expected SELECT");
    };
    assert_eq!(arms.len(), 3);
    assert!(matches!(arms[0].guards[0], CaseGuard::Is(CmpOp::Ge, _)));
    assert!(matches!(arms[1].guards[0], CaseGuard::Range(_, _)));
    assert_eq!(arms[2].guards.len(), 2);
    assert!(else_body.is_some());
}

#[test]
fn test_labels_and_line_numbers() {
    let module = parse_ok("10 PRINT\nFoo:\nGOTO Foo\nGOTO 10");
    assert!(matches!(&module.stmts[0], Stmt::Label { name, .. } if name == "10"));
    assert!(matches!(&module.stmts[2], Stmt::Label { name, .. } if name == "FOO"));
}

#[test]
fn test_data_read_restore() {
    let module = parse_ok("DATA 1, -2.5, \"text\"\nREAD a, b, c$\nRESTORE");
    let Stmt::Data { items, .. } = &module.stmts[0] else {
        panic!("expected DATA");
    };
    assert_eq!(
        items,
        &vec![
            DataLit::Int(1),
            DataLit::Float(-2.5),
            DataLit::Text("text".to_string()),
        ]
    );
    assert!(matches!(&module.stmts[1], Stmt::Read { targets, .. } if targets.len() == 3));
}

#[test]
fn test_proc_and_declare() {
    let module = parse_ok(
        "DECLARE SUB Greet (who$)\nSUB Greet (who$)\n PRINT who$\nEND SUB\nFUNCTION Twice% (BYVAL n%)\n Twice% = n% * 2\nEND FUNCTION",
    );
    assert!(matches!(&module.stmts[0], Stmt::Declare { .. }));
    let Stmt::Proc(def) = &module.stmts[1] else {
        panic!("expected SUB");
    };
    assert!(!def.is_function);
    assert_eq!(def.params.len(), 1);
    let Stmt::Proc(def) = &module.stmts[2] else {
        panic!("expected FUNCTION");
    };
    assert!(def.is_function);
    assert!(def.params[0].by_val);
}

#[test]
fn test_open_print_hash() {
    let module = parse_ok("OPEN \"out.txt\" FOR OUTPUT AS #1\nPRINT #1, \"x\"\nCLOSE #1");
    assert!(matches!(
        &module.stmts[0],
        Stmt::Open {
            mode: OpenMode::Output,
            ..
        }
    ));
    assert!(matches!(&module.stmts[1], Stmt::Print { channel: Some(_), .. }));
}

#[test]
fn test_type_block() {
    let module = parse_ok("TYPE Point\n x AS SINGLE\n y AS SINGLE\nEND TYPE");
    let Stmt::TypeDef { name, fields, .. } = &module.stmts[0] else {
        panic!("expected TYPE");
    };
    assert_eq!(name, "POINT");
    assert_eq!(fields.len(), 2);
}

#[test]
fn test_expression_precedence_shape() {
    // 1 + 2 * 3 ^ 2 parses as 1 + (2 * (3 ^ 2))
    let module = parse_ok("x = 1 + 2 * 3 ^ 2");
    let Stmt::Assign { value, .. } = &module.stmts[0] else {
        panic!("expected assignment");
    };
    let ExprKind::Binary {
        op: BinOp::Add,
        rhs,
        ..
    } = &value.kind
    else {
        panic!("expected + at the top: {:?}", value.kind);
    };
    let ExprKind::Binary {
        op: BinOp::Mul,
        rhs: pow,
        ..
    } = &rhs.kind
    else {
        panic!("expected * under +");
    };
    assert!(matches!(
        pow.kind,
        ExprKind::Binary {
            op: BinOp::Pow,
            ..
        }
    ));
}

#[test]
fn test_unary_binds_tighter_than_power() {
    // -2 ^ 2 parses as (-2) ^ 2
    let module = parse_ok("x = -2 ^ 2");
    let Stmt::Assign { value, .. } = &module.stmts[0] else {
        panic!("expected assignment");
    };
    let ExprKind::Binary {
        op: BinOp::Pow,
        lhs,
        ..
    } = &value.kind
    else {
        panic!("expected ^ at the top: {:?}", value.kind);
    };
    assert!(matches!(lhs.kind, ExprKind::Unary { op: UnaryOp::Neg, .. }));
}

#[test]
fn test_parse_errors_recover() {
    let codes = parse_codes("PRINT )\nPRINT 2");
    assert!(codes.contains(&DiagnosticCode::UnexpectedToken));
    // The second line still parses; only one diagnostic for the first.
    assert_eq!(codes.len(), 1);
}

#[test]
fn test_trailing_junk_is_reported() {
    assert_eq!(
        parse_codes("CLS nonsense\nPRINT 1"),
        vec![DiagnosticCode::ExpectedEndOfLine]
    );
}

#[test]
fn test_do_loop_conditions() {
    let module = parse_ok("DO WHILE x < 3\n x = x + 1\nLOOP\nDO\n x = x - 1\nLOOP UNTIL x = 0");
    assert!(matches!(
        &module.stmts[0],
        Stmt::DoLoop { pre: Some(c), post: None, .. } if !c.until
    ));
    assert!(matches!(
        &module.stmts[1],
        Stmt::DoLoop { pre: None, post: Some(c), .. } if c.until
    ));
}
