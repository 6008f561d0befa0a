mod common;
use common::*;
use qbasic::mach::{Runtime, TrapKind};

#[test]
fn test_input_prompt_and_echo() {
    let transcript = exec_with("INPUT \"Name\"; n$\nPRINT \"hi \"; n$", &["ada"]);
    assert_eq!(transcript, "Name? hi ada\n");
}

#[test]
fn test_input_without_prompt() {
    let transcript = exec_with("INPUT n\nPRINT n * 2", &["21"]);
    assert_eq!(transcript, "?  42 \n");
}

#[test]
fn test_input_multiple_fields() {
    let transcript = exec_with("INPUT a, b$\nPRINT b$; a", &["3, word"]);
    assert_eq!(transcript, "? word 3 \n");
}

#[test]
fn test_input_redo_on_wrong_field_count() {
    let transcript = exec_with("INPUT a, b\nPRINT a + b", &["1", "1, 2"]);
    assert_eq!(transcript, "? Redo from start\n?  3 \n");
}

#[test]
fn test_line_input_keeps_commas() {
    let transcript = exec_with("LINE INPUT \"say\"; s$\nPRINT s$", &["a, b, c"]);
    assert_eq!(transcript, "saya, b, c\n");
}

#[test]
fn test_input_to_array_element() {
    let transcript = exec_with("DIM v(3)\nINPUT v(2)\nPRINT v(2)", &["7"]);
    assert_eq!(transcript, "?  7 \n");
}

#[test]
fn test_sieve_scenario() {
    let source = include_str!("../demos/PRIMES.BAS");
    let transcript = exec_with(source, &["10"]);
    assert!(
        transcript.contains("Prime numbers up to 10 :"),
        "{:?}",
        transcript
    );
    assert!(transcript.contains(" 2  3  5  7 "), "{:?}", transcript);
    assert!(transcript.trim_end().ends_with("Done!"), "{:?}", transcript);
}

#[test]
fn test_print_to_file_and_read_back() {
    let source = "OPEN \"out.txt\" FOR OUTPUT AS #1\nPRINT #1, \"alpha\"; 7\nPRINT #1, \"beta\"\nCLOSE #1\nOPEN \"out.txt\" FOR INPUT AS #2\nLINE INPUT #2, s$\nPRINT \"read: \"; s$\nCLOSE";
    let image = compile_ok(source);
    let mut host = TestHost::new();
    let mut runtime = Runtime::new();
    runtime
        .run(&image, &mut host, 0)
        .expect("program should finish");
    assert_eq!(host.file_text("out.txt").unwrap(), "alpha 7 \nbeta\n");
    assert_eq!(host.transcript(), "read: alpha 7 \n");
}

#[test]
fn test_input_hash_reads_fields() {
    let image = compile_ok(
        "OPEN \"data.csv\" FOR INPUT AS #1\nINPUT #1, a, b$\nPRINT a; b$\nCLOSE #1",
    );
    let mut host = TestHost::new();
    host.seed_file("data.csv", "5, five\n");
    let mut runtime = Runtime::new();
    runtime
        .run(&image, &mut host, 0)
        .expect("program should finish");
    assert_eq!(host.transcript(), " 5 five\n");
}

#[test]
fn test_eof_function() {
    let image = compile_ok(
        "OPEN \"lines.txt\" FOR INPUT AS #1\nWHILE EOF(1) = 0\n LINE INPUT #1, s$\n PRINT \"<\"; s$; \">\"\nWEND\nCLOSE #1",
    );
    let mut host = TestHost::new();
    host.seed_file("lines.txt", "one\ntwo\n");
    let mut runtime = Runtime::new();
    runtime
        .run(&image, &mut host, 0)
        .expect("program should finish");
    assert_eq!(host.transcript(), "<one>\n<two>\n");
}

#[test]
fn test_bad_channel_traps() {
    assert_eq!(exec_trap("PRINT #3, \"x\""), TrapKind::BadChannel);
    assert_eq!(exec_trap("CLOSE #0"), TrapKind::BadChannel);
}

#[test]
fn test_missing_file_is_io_error() {
    let kind = exec_trap("OPEN \"ghost.txt\" FOR INPUT AS #1");
    assert!(matches!(kind, TrapKind::IoError(_)), "{:?}", kind);
}

#[test]
fn test_reading_past_end_traps() {
    let image = compile_ok("OPEN \"empty.txt\" FOR INPUT AS #1\nLINE INPUT #1, s$");
    let mut host = TestHost::new();
    host.seed_file("empty.txt", "");
    let mut runtime = Runtime::new();
    let trap = runtime.run(&image, &mut host, 0).unwrap_err();
    assert!(matches!(trap.kind, TrapKind::IoError(_)), "{:?}", trap);
}

#[test]
fn test_cls_without_screen_hook() {
    assert_eq!(exec_trap("CLS"), TrapKind::FeatureUnavailable);
}

#[test]
fn test_end_of_stdin_is_io_error() {
    assert_eq!(exec_trap("INPUT n"), TrapKind::IoError("input past end".into()));
}
