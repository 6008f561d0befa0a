use qbasic::lang::token::{Literal, Operator, TokenKind, Word};
use qbasic::lang::{lex, DiagnosticCode};

#[test]
fn test_keywords_and_idents_case_insensitive() {
    let (tokens, diagnostics) = lex("Print value\nEND");
    assert!(diagnostics.is_empty());
    let kinds: Vec<_> = tokens.iter().map(|t| &t.kind).collect();
    assert!(matches!(kinds[0], TokenKind::Word(Word::Print)));
    assert!(matches!(kinds[1], TokenKind::Ident(id) if id.name == "VALUE"));
    assert!(matches!(kinds[2], TokenKind::Eol));
    assert!(matches!(kinds[3], TokenKind::Word(Word::End)));
}

#[test]
fn test_question_mark_is_print() {
    let (tokens, _) = lex("? 1");
    assert_eq!(tokens[0].kind, TokenKind::Word(Word::Print));
    assert_eq!(tokens[0].text, "?");
}

#[test]
fn test_numeric_literals() {
    let (tokens, diagnostics) = lex("32767 32768 1.25 3E2 1D2 255% &HFF &O17");
    assert!(diagnostics.is_empty(), "{:?}", diagnostics);
    let literals: Vec<_> = tokens
        .iter()
        .filter_map(|t| match &t.kind {
            TokenKind::Literal(lit) => Some(lit.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(
        literals,
        vec![
            Literal::Int(32767),
            Literal::Long(32768),
            Literal::Single(1.25),
            Literal::Single(300.0),
            Literal::Double(100.0),
            Literal::Int(255),
            Literal::Int(255),
            Literal::Int(15),
        ]
    );
}

#[test]
fn test_int64_literal_round_trips() {
    let (tokens, diagnostics) = lex("9223372036854775807&&");
    assert!(diagnostics.is_empty());
    assert_eq!(
        tokens[0].kind,
        TokenKind::Literal(Literal::Int64(9223372036854775807))
    );
    assert_eq!(tokens[0].text, "9223372036854775807&&");
}

#[test]
fn test_relational_spellings() {
    let (tokens, _) = lex("a =< b >< c => d");
    let ops: Vec<_> = tokens
        .iter()
        .filter_map(|t| match t.kind {
            TokenKind::Operator(op) => Some(op),
            _ => None,
        })
        .collect();
    assert_eq!(
        ops,
        vec![
            Operator::LessEqual,
            Operator::NotEqual,
            Operator::GreaterEqual,
        ]
    );
}

#[test]
fn test_colon_and_crlf() {
    let (tokens, _) = lex("a = 1: b = 2\r\nc = 3\rd = 4");
    let eols = tokens
        .iter()
        .filter(|t| t.kind == TokenKind::Eol)
        .count();
    assert_eq!(eols, 2);
    let line_of_d = tokens
        .iter()
        .find(|t| matches!(&t.kind, TokenKind::Ident(id) if id.name == "D"))
        .map(|t| t.span.line);
    assert_eq!(line_of_d, Some(3));
}

#[test]
fn test_rem_and_apostrophe_comments() {
    let (tokens, _) = lex("PRINT 1 ' ignored\nREM also ignored\nPRINT 2");
    let words = tokens
        .iter()
        .filter(|t| matches!(t.kind, TokenKind::Word(Word::Print)))
        .count();
    assert_eq!(words, 2);
}

#[test]
fn test_metacommand_token() {
    let (tokens, diagnostics) = lex("$CONSOLE\nPRINT 1");
    assert!(diagnostics.is_empty());
    assert_eq!(tokens[0].kind, TokenKind::Meta("$CONSOLE".to_string()));
    let (tokens, _) = lex("$INCLUDE:\"defs.bi\"\n");
    assert_eq!(tokens[0].kind, TokenKind::Meta("$INCLUDE".to_string()));
    assert_eq!(tokens[0].text, "$INCLUDE:\"defs.bi\"");
}

#[test]
fn test_lexer_errors_carry_spans() {
    let (_, diagnostics) = lex("PRINT \"open");
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].code, DiagnosticCode::UnterminatedString);
    assert_eq!(diagnostics[0].span.line, 1);
    assert_eq!(diagnostics[0].span.col, 7);

    let (_, diagnostics) = lex("PRINT 99999%");
    assert_eq!(diagnostics[0].code, DiagnosticCode::InvalidNumber);

    let (_, diagnostics) = lex("PRINT ~");
    assert_eq!(diagnostics[0].code, DiagnosticCode::IllegalCharacter);
}

/// Concatenating token slices, with the gaps restored from spans, yields
/// the original source.
#[test]
fn test_round_trip_reconstruction() {
    let source = "FOR i% = 1 TO 10 STEP 2\n  PRINT i% ; \"x\"\nNEXT i%\n";
    let (tokens, diagnostics) = lex(source);
    assert!(diagnostics.is_empty());
    let mut rebuilt = String::new();
    let mut cursor = 0usize;
    for token in &tokens {
        rebuilt.push_str(&source[cursor..token.span.start]);
        rebuilt.push_str(&token.text);
        cursor = token.span.end;
    }
    rebuilt.push_str(&source[cursor..]);
    assert_eq!(rebuilt, source);
}

#[test]
fn test_line_continuation() {
    let (tokens, diagnostics) = lex("PRINT 1 + _\n        2");
    assert!(diagnostics.is_empty());
    assert!(!tokens.iter().any(|t| t.kind == TokenKind::Eol));
}
