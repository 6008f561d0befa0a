mod common;
use common::*;
use qbasic::lang::DiagnosticCode;
use qbasic::mach::TrapKind;

#[test]
fn test_sub_call_both_spellings() {
    let source = "CALL Greet(\"one\")\nGreet \"two\"\nSUB Greet (who$)\n PRINT \"hi \"; who$\nEND SUB";
    assert_eq!(exec(source), "hi one\nhi two\n");
}

#[test]
fn test_function_in_expression() {
    let source = "PRINT Twice%(4) + Twice%(5)\nFUNCTION Twice% (BYVAL n%)\n Twice% = n% * 2\nEND FUNCTION";
    assert_eq!(exec(source), " 18 \n");
}

#[test]
fn test_parameters_default_by_reference() {
    let source = "a% = 1\nBump a%\nPRINT a%\nSUB Bump (n%)\n n% = n% + 1\nEND SUB";
    assert_eq!(exec(source), " 2 \n");
}

#[test]
fn test_byval_keeps_caller_value() {
    let source = "a% = 1\nBump a%\nPRINT a%\nSUB Bump (BYVAL n%)\n n% = n% + 1\nEND SUB";
    assert_eq!(exec(source), " 1 \n");
}

#[test]
fn test_locals_are_private_per_procedure() {
    let source = "x = 10\nShadow\nPRINT x\nSUB Shadow\n x = 99\nEND SUB";
    assert_eq!(exec(source), " 10 \n");
}

#[test]
fn test_dim_shared_is_visible_in_procs() {
    let source = "DIM SHARED total%\nAdd 3\nAdd 4\nPRINT total%\nSUB Add (n%)\n total% = total% + n%\nEND SUB";
    assert_eq!(exec(source), " 7 \n");
}

#[test]
fn test_exit_sub() {
    let source = "Speak 0\nSpeak 1\nSUB Speak (n%)\n IF n% = 0 THEN EXIT SUB\n PRINT \"spoke\"; n%\nEND SUB";
    assert_eq!(exec(source), "spoke 1 \n");
}

#[test]
fn test_exit_function_keeps_result() {
    let source = "PRINT Pick%(1); Pick%(0)\nFUNCTION Pick% (n%)\n Pick% = 5\n IF n% = 0 THEN EXIT FUNCTION\n Pick% = 7\nEND FUNCTION";
    assert_eq!(exec(source), " 7  5 \n");
}

#[test]
fn test_recursion() {
    let source = "PRINT Fact&(5)\nFUNCTION Fact& (n%)\n IF n% <= 1 THEN\n  Fact& = 1\n ELSE\n  Fact& = n% * Fact&(n% - 1)\n END IF\nEND FUNCTION";
    assert_eq!(exec(source), " 120 \n");
}

#[test]
fn test_declare_checks_arity() {
    assert_eq!(
        error_codes("DECLARE SUB S (a%, b%)\nCALL S(1)\nSUB S (a%, b%)\nEND SUB"),
        vec![DiagnosticCode::ArityMismatch]
    );
}

#[test]
fn test_declared_but_undefined_is_an_error() {
    assert_eq!(
        error_codes("DECLARE SUB Ghost ()"),
        vec![DiagnosticCode::Undeclared]
    );
}

#[test]
fn test_calling_unknown_sub() {
    assert_eq!(
        error_codes("CALL Nowhere(1)"),
        vec![DiagnosticCode::Undeclared]
    );
}

#[test]
fn test_gosub_inside_procedure_is_scoped() {
    let source = "Run1\nSUB Run1\n GOSUB Local1\n PRINT \"back\"\n EXIT SUB\nLocal1:\n PRINT \"in\"\n RETURN\nEND SUB";
    assert_eq!(exec(source), "in\nback\n");
}

#[test]
fn test_return_label_outside_procedure_scope() {
    let source = "Target:\nRun1\nEND\nSUB Run1\n GOSUB L\nL2:\n EXIT SUB\nL:\n RETURN Target\nEND SUB";
    assert_eq!(
        error_codes(source),
        vec![DiagnosticCode::UnknownLabel]
    );
}

#[test]
fn test_deep_recursion_overflows() {
    let source = "PRINT Down%(100000)\nFUNCTION Down% (n&)\n Down% = Down%(n& - 1)\nEND FUNCTION";
    assert_eq!(exec_trap(source), TrapKind::StackOverflow);
}
