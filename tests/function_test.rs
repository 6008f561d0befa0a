mod common;
use common::*;
use qbasic::mach::TrapKind;

#[test]
fn test_fn_abs_and_sgn() {
    assert_eq!(exec("PRINT ABS(9); ABS(-9)"), " 9  9 \n");
    assert_eq!(exec("PRINT SGN(-3); SGN(0); SGN(12.5)"), "-1  0  1 \n");
}

#[test]
fn test_fn_int_and_fix() {
    assert_eq!(exec("PRINT INT(2.8); INT(-2.8)"), " 2 -3 \n");
    assert_eq!(exec("PRINT FIX(2.8); FIX(-2.8)"), " 2 -2 \n");
}

#[test]
fn test_fn_sqr() {
    assert_eq!(exec("PRINT SQR(16)"), " 4 \n");
    assert_eq!(exec_trap("PRINT SQR(-1)"), TrapKind::IllegalFunctionCall);
}

#[test]
fn test_fn_log() {
    assert_eq!(exec("PRINT LOG(1)"), " 0 \n");
    assert_eq!(exec_trap("PRINT LOG(0)"), TrapKind::IllegalFunctionCall);
}

#[test]
fn test_fn_conversions() {
    assert_eq!(exec("PRINT CINT(2.5); CINT(3.5)"), " 2  4 \n");
    assert_eq!(exec("PRINT CLNG(70000.2)"), " 70000 \n");
    assert_eq!(exec("PRINT CDBL(3)"), " 3 \n");
    assert_eq!(exec_trap("PRINT CINT(40000)"), TrapKind::Overflow);
}

#[test]
fn test_fn_chr_asc() {
    assert_eq!(exec("PRINT CHR$(65)"), "A\n");
    assert_eq!(exec("PRINT ASC(\"A\")"), " 65 \n");
    assert_eq!(exec_trap("PRINT ASC(\"\")"), TrapKind::IllegalFunctionCall);
    // CHR$(0) is a legal character.
    assert_eq!(exec("PRINT LEN(CHR$(0))"), " 1 \n");
}

#[test]
fn test_fn_string_slicing() {
    assert_eq!(exec("PRINT LEFT$(\"QBASIC\", 2)"), "QB\n");
    assert_eq!(exec("PRINT RIGHT$(\"QBASIC\", 5)"), "BASIC\n");
    assert_eq!(exec("PRINT MID$(\"QBASIC\", 2, 3)"), "BAS\n");
    assert_eq!(exec("PRINT MID$(\"QBASIC\", 3)"), "ASIC\n");
}

#[test]
fn test_fn_instr_len() {
    assert_eq!(exec("PRINT INSTR(\"haystack\", \"stack\")"), " 4 \n");
    assert_eq!(exec("PRINT INSTR(\"haystack\", \"zebra\")"), " 0 \n");
    assert_eq!(exec("PRINT LEN(\"four\")"), " 4 \n");
}

#[test]
fn test_fn_instr_with_start() {
    assert_eq!(exec("PRINT INSTR(\"banana\", \"an\")"), " 2 \n");
    // A start offset skips earlier matches.
    assert_eq!(exec("PRINT INSTR(3, \"banana\", \"an\")"), " 4 \n");
    assert_eq!(exec("PRINT INSTR(5, \"banana\", \"an\")"), " 0 \n");
    // Past the end of the string there is nothing to find.
    assert_eq!(exec("PRINT INSTR(9, \"banana\", \"an\")"), " 0 \n");
    assert_eq!(
        exec_trap("PRINT INSTR(0, \"banana\", \"an\")"),
        TrapKind::IllegalFunctionCall
    );
}

#[test]
fn test_fn_case_and_trim() {
    assert_eq!(exec("PRINT UCASE$(\"MixEd\")"), "MIXED\n");
    assert_eq!(exec("PRINT LCASE$(\"MixEd\")"), "mixed\n");
    assert_eq!(exec("PRINT LTRIM$(\"  x\"); RTRIM$(\"y  \")"), "xy\n");
}

#[test]
fn test_fn_space_string() {
    assert_eq!(exec("PRINT \"|\"; SPACE$(3); \"|\""), "|   |\n");
    assert_eq!(exec("PRINT STRING$(4, \"*\")"), "****\n");
}

#[test]
fn test_fn_str_and_val() {
    // STR$ keeps the sign position: space for non-negative.
    assert_eq!(exec("PRINT STR$(7); STR$(-7)"), " 7-7\n");
    assert_eq!(exec("PRINT VAL(\"42.5\")"), " 42.5 \n");
    assert_eq!(exec("PRINT VAL(\"12abc\")"), " 12 \n");
    assert_eq!(exec("PRINT VAL(\"nope\")"), " 0 \n");
    // The longest valid numeric prefix wins.
    assert_eq!(exec("PRINT VAL(\"100-50\")"), " 100 \n");
    assert_eq!(exec("PRINT VAL(\"1.2.3\")"), " 1.2 \n");
    assert_eq!(exec("PRINT VAL(\"1e\")"), " 1 \n");
    assert_eq!(exec("PRINT VAL(\"3e2x\")"), " 300 \n");
}

#[test]
fn test_rnd_is_deterministic_per_seed() {
    let a = exec("RANDOMIZE 7\nFOR i = 1 TO 3\n PRINT RND;\nNEXT i");
    let b = exec("RANDOMIZE 7\nFOR i = 1 TO 3\n PRINT RND;\nNEXT i");
    let c = exec("RANDOMIZE 8\nFOR i = 1 TO 3\n PRINT RND;\nNEXT i");
    assert_eq!(a, b);
    assert_ne!(a, c);
}

#[test]
fn test_rnd_zero_repeats_last() {
    assert_eq!(exec("x = RND\nPRINT RND(0) = x"), "-1 \n");
}

#[test]
fn test_timer_reads_host_clock() {
    // The scripted host pins the clock at 1234.5 seconds past midnight.
    assert_eq!(exec("PRINT TIMER"), " 1234.5 \n");
}

#[test]
fn test_randomize_without_argument_uses_clock() {
    // Deterministic under the scripted host's frozen clock.
    let a = exec("RANDOMIZE\nPRINT RND");
    let b = exec("RANDOMIZE\nPRINT RND");
    assert_eq!(a, b);
}

#[test]
fn test_user_function_and_builtin_mix() {
    let source = "PRINT Area(3) + ABS(-1)\nFUNCTION Area (r)\n  Area = 3.14159 * r * r\nEND FUNCTION";
    let expected = 3.14159f32 * 3.0 * 3.0 + 1.0;
    assert_eq!(exec(source), format!(" {} \n", expected));
}
