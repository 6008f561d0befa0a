mod common;
use common::TestHost;
use qbasic::repl::{Outcome, Session};
use std::cell::RefCell;
use std::rc::Rc;

fn session() -> (Session, Rc<RefCell<Vec<u8>>>) {
    let host = TestHost::new();
    let output = host.output.clone();
    (Session::with_host(Box::new(host)), output)
}

fn text(output: &Rc<RefCell<Vec<u8>>>) -> String {
    String::from_utf8(output.borrow().clone()).expect("utf-8 transcript")
}

fn drain(output: &Rc<RefCell<Vec<u8>>>) -> String {
    let s = text(output);
    output.borrow_mut().clear();
    s
}

#[test]
fn test_statements_accumulate_state() {
    let (mut session, output) = session();
    assert!(matches!(session.enter("a = 1"), Outcome::Ran { .. }));
    assert!(matches!(session.enter("a = a + 1"), Outcome::Ran { .. }));
    assert!(matches!(session.enter("PRINT a"), Outcome::Ran { .. }));
    assert_eq!(text(&output), " 2 \n");
}

#[test]
fn test_only_new_statements_run() {
    let (mut session, output) = session();
    session.enter("PRINT \"first\"");
    drain(&output);
    session.enter("PRINT \"second\"");
    // The first PRINT must not run again.
    assert_eq!(drain(&output), "second\n");
}

#[test]
fn test_rejected_line_leaves_module_unchanged() {
    let (mut session, output) = session();
    session.enter("a = 5");
    let outcome = session.enter("PRINT )");
    assert!(matches!(outcome, Outcome::Rejected(_)));
    session.enter("PRINT a");
    assert_eq!(text(&output), " 5 \n");
}

#[test]
fn test_procedures_persist_across_steps() {
    let (mut session, output) = session();
    let outcome = session.enter("FUNCTION Twice% (BYVAL n%)\n Twice% = n% * 2\nEND FUNCTION");
    assert!(matches!(outcome, Outcome::Ran { .. }));
    assert_eq!(text(&output), "");
    session.enter("PRINT Twice%(21)");
    assert_eq!(text(&output), " 42 \n");
}

#[test]
fn test_data_cursor_persists() {
    let (mut session, output) = session();
    session.enter("DATA 10, 20, 30");
    session.enter("READ a : PRINT a");
    session.enter("READ a : PRINT a");
    assert_eq!(text(&output), " 10 \n 20 \n");
}

#[test]
fn test_runtime_fault_keeps_definitions() {
    let (mut session, output) = session();
    session.enter("a = 7");
    let outcome = session.enter("PRINT 1 \\ 0");
    assert!(matches!(outcome, Outcome::Faulted(_)));
    session.enter("PRINT a");
    assert_eq!(text(&output), " 7 \n");
}
