mod common;
use common::*;

#[test]
fn test_hello_world() {
    assert_eq!(exec("PRINT \"Hello, World!\"\nEND"), "Hello, World!\n");
}

#[test]
fn test_print_spacing_and_zones() {
    assert_eq!(exec("PRINT 1; 2; 3"), " 1  2  3 \n");
    assert_eq!(exec("PRINT -1; -2"), "-1 -2 \n");
    assert_eq!(exec("PRINT \"a\", \"b\""), "a             b\n");
    // Already past the zone boundary: skip to the next one.
    assert_eq!(
        exec("PRINT \"aaaaaaaaaaaaaa\", \"b\""),
        "aaaaaaaaaaaaaa              b\n"
    );
    assert_eq!(exec("PRINT \"x\";"), "x");
}

#[test]
fn test_for_loop_with_negative_step() {
    let source = "FOR i = 10 TO 0 STEP -2\n  PRINT i;\nNEXT i\n";
    assert_eq!(exec(source), " 10  8  6  4  2  0 ");
}

#[test]
fn test_for_zero_iterations() {
    assert_eq!(exec("FOR i = 1 TO 0\n PRINT i\nNEXT i\nPRINT \"done\""), "done\n");
}

#[test]
fn test_for_step_zero_runs_zero_times() {
    let source = "FOR i = 1 TO 10 STEP 0\n PRINT i\nNEXT i\nPRINT \"out\"";
    assert_eq!(
        warning_codes(source),
        vec![qbasic::lang::DiagnosticCode::InvalidForStep]
    );
    assert_eq!(exec(source), "out\n");
}

#[test]
fn test_nested_for_exit() {
    let source = "FOR i = 1 TO 3\n  FOR j = 1 TO 3\n    IF j = 2 THEN EXIT FOR\n    PRINT i; j;\n  NEXT j\nNEXT i\n";
    assert_eq!(exec(source), " 1  1  2  1  3  1 ");
}

#[test]
fn test_select_case_with_range_and_is() {
    let source = "DIM s AS INTEGER : s = 85\nSELECT CASE s\n  CASE IS >= 90: PRINT \"A\"\n  CASE 80 TO 89: PRINT \"B\"\n  CASE ELSE:     PRINT \"?\"\nEND SELECT\n";
    assert_eq!(exec(source), "B\n");
}

#[test]
fn test_select_case_else_and_order() {
    let source = "FOR s = 1 TO 4\nSELECT CASE s\n CASE 1, 3\n  PRINT \"odd\";\n CASE IS > 3\n  PRINT \"big\";\n CASE ELSE\n  PRINT \"two\";\nEND SELECT\nNEXT s";
    assert_eq!(exec(source), "oddtwooddbig");
}

#[test]
fn test_select_case_strings() {
    let source = "w$ = \"dog\"\nSELECT CASE w$\n CASE \"cat\"\n  PRINT 1\n CASE \"dog\"\n  PRINT 2\nEND SELECT";
    assert_eq!(exec(source), " 2 \n");
}

#[test]
fn test_data_read_restore_to_label() {
    let source = "READ a,b : PRINT a;b\nRESTORE L2\nREAD a,b : PRINT a;b\nDATA 10,20\nL2: DATA 100,200\n";
    assert_eq!(exec(source), " 10  20 \n 100  200 \n");
}

#[test]
fn test_restore_without_label_rewinds() {
    let source = "READ a : READ b : RESTORE : READ c\nPRINT a; b; c\nDATA 7, 8";
    assert_eq!(exec(source), " 7  8  7 \n");
}

#[test]
fn test_gosub_return_ordering() {
    let source = "PRINT \"A\" : GOSUB S : PRINT \"C\" : END\nS: PRINT \"B\" : RETURN\n";
    assert_eq!(exec(source), "A\nB\nC\n");
}

#[test]
fn test_return_to_label() {
    let source = "GOSUB Sub1\nPRINT \"skipped\"\nAfter:\nPRINT \"after\"\nEND\nSub1: RETURN After";
    assert_eq!(exec(source), "after\n");
}

#[test]
fn test_goto_forward_and_backward() {
    let source = "i = 0\nTop:\ni = i + 1\nIF i < 3 THEN GOTO Top\nPRINT i";
    assert_eq!(exec(source), " 3 \n");
}

#[test]
fn test_while_wend() {
    let source = "n = 1\nWHILE n < 5\n n = n * 2\nWEND\nPRINT n";
    assert_eq!(exec(source), " 8 \n");
}

#[test]
fn test_do_loop_until() {
    let source = "n = 5\nDO\n n = n - 1\nLOOP UNTIL n = 0\nPRINT n";
    assert_eq!(exec(source), " 0 \n");
}

#[test]
fn test_do_while_pretest() {
    let source = "n = 0\nDO WHILE n > 0\n n = n - 1\nLOOP\nPRINT \"skipped\"; n";
    assert_eq!(exec(source), "skipped 0 \n");
}

#[test]
fn test_exit_do() {
    let source = "n = 0\nDO\n n = n + 1\n IF n = 3 THEN EXIT DO\nLOOP\nPRINT n";
    assert_eq!(exec(source), " 3 \n");
}

#[test]
fn test_swap() {
    let source = "a = 1 : b = 2\nSWAP a, b\nPRINT a; b";
    assert_eq!(exec(source), " 2  1 \n");
}

#[test]
fn test_swap_array_elements() {
    let source = "DIM v(2)\nv(1) = 10 : v(2) = 20\nSWAP v(1), v(2)\nPRINT v(1); v(2)";
    assert_eq!(exec(source), " 20  10 \n");
}

#[test]
fn test_const_folding_and_use() {
    let source = "CONST Limit = 3, Tag$ = \"n=\"\nFOR i = 1 TO Limit\n PRINT Tag$; i;\nNEXT i";
    assert_eq!(exec(source), "n= 1 n= 2 n= 3 ");
}

#[test]
fn test_end_stops_execution() {
    assert_eq!(exec("PRINT 1\nEND\nPRINT 2"), " 1 \n");
}

#[test]
fn test_metacommand_is_accepted() {
    assert_eq!(exec("$CONSOLE\nPRINT \"ok\""), "ok\n");
}

#[test]
fn test_single_line_if_colon_chain() {
    assert_eq!(
        exec("IF 0 THEN PRINT \"one\" ELSE PRINT \"two\"; : PRINT 2"),
        "two 2 \n"
    );
    assert_eq!(
        exec("IF 1 THEN PRINT \"one\" ELSE PRINT \"two\" : PRINT 2"),
        "one\n"
    );
}

#[test]
fn test_write_quotes_strings() {
    assert_eq!(exec("WRITE \"a\", 1, 2.5"), "\"a\",1,2.5\n");
}
