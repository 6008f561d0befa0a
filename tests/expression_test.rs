mod common;
use common::*;
use qbasic::lang::DiagnosticCode;
use qbasic::mach::TrapKind;

#[test]
fn test_arithmetic_precedence() {
    assert_eq!(exec("PRINT 1 + 2 * 3"), " 7 \n");
    assert_eq!(exec("PRINT (1 + 2) * 3"), " 9 \n");
    assert_eq!(exec("PRINT 2 ^ 3 ^ 2"), " 64 \n"); // left associative
}

#[test]
fn test_division_is_floating() {
    assert_eq!(exec("PRINT 1 / 2"), " 0.5 \n");
    assert_eq!(exec("PRINT 7 \\ 2"), " 3 \n");
    assert_eq!(exec("PRINT -7 \\ 2"), "-3 \n");
}

#[test]
fn test_mod_sign_of_dividend() {
    assert_eq!(exec("PRINT 7 MOD 3"), " 1 \n");
    assert_eq!(exec("PRINT -7 MOD 3"), "-1 \n");
    assert_eq!(exec("PRINT 7 MOD -3"), " 1 \n");
}

#[test]
fn test_power_computed_in_double() {
    // Result narrows back to the destination type on assignment.
    assert_eq!(exec("n% = 2 ^ 10\nPRINT n%"), " 1024 \n");
    assert_eq!(exec("PRINT 2 ^ 0.5"), format!(" {} \n", 2f64.powf(0.5)));
}

#[test]
fn test_relational_results_are_integer_truth() {
    assert_eq!(exec("PRINT 2 > 1; 1 > 2"), "-1  0 \n");
    assert_eq!(exec("PRINT \"abc\" < \"abd\""), "-1 \n");
}

#[test]
fn test_logic_is_bitwise_and_eager() {
    assert_eq!(exec("PRINT 6 AND 3"), " 2 \n");
    assert_eq!(exec("PRINT 4 OR 1"), " 5 \n");
    assert_eq!(exec("PRINT NOT 0"), "-1 \n");
    // Both operands evaluate: the second call still happens.
    let source = "DIM SHARED SHOTS%\nr = Tick% AND Tick%\nPRINT SHOTS%\nFUNCTION Tick%\n  SHOTS% = SHOTS% + 1\n  Tick% = 0\nEND FUNCTION";
    assert_eq!(exec(source), " 2 \n");
}

#[test]
fn test_string_concat_and_mismatch() {
    assert_eq!(exec("PRINT \"foo\" + \"bar\""), "foobar\n");
    assert_eq!(
        error_codes("PRINT \"foo\" + 1"),
        vec![DiagnosticCode::TypeMismatch]
    );
}

#[test]
fn test_numeric_widening() {
    // INTEGER + LONG widens to LONG.
    assert_eq!(exec("PRINT 32767 + 1&"), " 32768 \n");
    // But INTEGER + INTEGER that overflows traps.
    assert_eq!(exec_trap("a% = 32767\nb% = 1\nPRINT a% + b%"), TrapKind::Overflow);
}

#[test]
fn test_narrowing_assignment_rounds_half_even() {
    assert_eq!(exec("n% = 2.5\nPRINT n%"), " 2 \n");
    assert_eq!(exec("n% = 3.5\nPRINT n%"), " 4 \n");
}

#[test]
fn test_narrowing_assignment_overflow() {
    assert_eq!(exec_trap("n% = 32768\nPRINT n%"), TrapKind::Overflow);
}

#[test]
fn test_divide_by_zero_traps() {
    assert_eq!(exec_trap("PRINT 1 / 0"), TrapKind::DivideByZero);
    assert_eq!(exec_trap("PRINT 1 \\ 0"), TrapKind::DivideByZero);
    assert_eq!(exec_trap("PRINT 1 MOD 0"), TrapKind::DivideByZero);
}

#[test]
fn test_int64_values() {
    assert_eq!(
        exec("DIM big AS _INTEGER64\nbig = 9223372036854775807&&\nPRINT big"),
        " 9223372036854775807 \n"
    );
}

#[test]
fn test_unsigned_long() {
    assert_eq!(
        exec("DIM n AS _UNSIGNED LONG\nn = 4000000000\nPRINT n"),
        " 4000000000 \n"
    );
    assert_eq!(
        exec_trap("DIM n AS _UNSIGNED LONG\nn = -1\nPRINT n"),
        TrapKind::Overflow
    );
}

#[test]
fn test_sigils_make_distinct_names() {
    assert_eq!(exec("A% = 1\nA! = 2.5\nPRINT A%; A!"), " 1  2.5 \n");
}

#[test]
fn test_default_type_is_single() {
    assert_eq!(exec("x = 1.5\nPRINT x"), " 1.5 \n");
}

#[test]
fn test_undeclared_array_is_an_error() {
    assert_eq!(error_codes("PRINT nope(3)"), vec![DiagnosticCode::Undeclared]);
}

#[test]
fn test_const_assignment_rejected() {
    assert_eq!(
        error_codes("CONST K = 1\nK = 2"),
        vec![DiagnosticCode::ConstAssign]
    );
}

#[test]
fn test_non_const_in_const() {
    assert_eq!(
        error_codes("x = 1\nCONST K = x + 1"),
        vec![DiagnosticCode::NonConstInConst]
    );
}
