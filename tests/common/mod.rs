#![allow(dead_code)]

use qbasic::lang::ast::OpenMode;
use qbasic::lang::{Diagnostic, DiagnosticCode};
use qbasic::mach::{ChannelIo, Host, Image, Runtime, TrapKind};
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::rc::Rc;

type SharedBytes = Rc<RefCell<Vec<u8>>>;

/// Scripted host: canned stdin, captured stdout, an in-memory file
/// system, and a frozen clock.
pub struct TestHost {
    pub input: VecDeque<String>,
    pub output: SharedBytes,
    pub files: Rc<RefCell<HashMap<String, SharedBytes>>>,
    pub clock: f64,
    pub screen: bool,
}

impl TestHost {
    pub fn new() -> TestHost {
        TestHost {
            input: VecDeque::new(),
            output: Rc::new(RefCell::new(Vec::new())),
            files: Rc::new(RefCell::new(HashMap::new())),
            clock: 1234.5,
            screen: false,
        }
    }

    pub fn with_input(lines: &[&str]) -> TestHost {
        let mut host = TestHost::new();
        host.input = lines.iter().map(|s| s.to_string()).collect();
        host
    }

    pub fn transcript(&self) -> String {
        String::from_utf8(self.output.borrow().clone()).expect("utf-8 transcript")
    }

    pub fn file_text(&self, name: &str) -> Option<String> {
        self.files
            .borrow()
            .get(name)
            .map(|bytes| String::from_utf8_lossy(&bytes.borrow()).into_owned())
    }

    pub fn seed_file(&self, name: &str, contents: &str) {
        self.files.borrow_mut().insert(
            name.to_string(),
            Rc::new(RefCell::new(contents.as_bytes().to_vec())),
        );
    }
}

impl Host for TestHost {
    fn read_line(&mut self) -> io::Result<Option<String>> {
        Ok(self.input.pop_front())
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.output.borrow_mut().extend_from_slice(bytes);
        Ok(())
    }

    fn ticks(&mut self) -> f64 {
        self.clock
    }

    fn open(&mut self, path: &str, mode: OpenMode) -> io::Result<Box<dyn ChannelIo>> {
        let mut files = self.files.borrow_mut();
        match mode {
            OpenMode::Input => {
                let data = files.get(path).ok_or_else(|| {
                    io::Error::new(io::ErrorKind::NotFound, format!("{} not found", path))
                })?;
                Ok(Box::new(MemReader {
                    data: data.borrow().clone(),
                    pos: 0,
                }))
            }
            OpenMode::Output => {
                let buf: SharedBytes = Rc::new(RefCell::new(Vec::new()));
                files.insert(path.to_string(), buf.clone());
                Ok(Box::new(MemWriter { buf }))
            }
            OpenMode::Append | OpenMode::Binary | OpenMode::Random => {
                let buf = files
                    .entry(path.to_string())
                    .or_insert_with(|| Rc::new(RefCell::new(Vec::new())))
                    .clone();
                Ok(Box::new(MemWriter { buf }))
            }
        }
    }

    fn clear_screen(&mut self) -> bool {
        self.screen
    }
}

struct MemReader {
    data: Vec<u8>,
    pos: usize,
}

impl ChannelIo for MemReader {
    fn read_line(&mut self) -> io::Result<Option<String>> {
        if self.pos >= self.data.len() {
            return Ok(None);
        }
        let rest = &self.data[self.pos..];
        let end = rest.iter().position(|&b| b == b'\n').unwrap_or(rest.len());
        let mut line = rest[..end].to_vec();
        self.pos += end + 1;
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Ok(Some(String::from_utf8_lossy(&line).into_owned()))
    }

    fn write(&mut self, _bytes: &[u8]) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::Other, "read-only channel"))
    }

    fn seek(&mut self, pos: u64) -> io::Result<()> {
        self.pos = pos as usize;
        Ok(())
    }

    fn at_eof(&mut self) -> io::Result<bool> {
        Ok(self.pos >= self.data.len())
    }
}

struct MemWriter {
    buf: SharedBytes,
}

impl ChannelIo for MemWriter {
    fn read_line(&mut self) -> io::Result<Option<String>> {
        Err(io::Error::new(io::ErrorKind::Other, "write-only channel"))
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.buf.borrow_mut().extend_from_slice(bytes);
        Ok(())
    }

    fn seek(&mut self, _pos: u64) -> io::Result<()> {
        Ok(())
    }

    fn at_eof(&mut self) -> io::Result<bool> {
        Ok(true)
    }
}

pub fn compile(source: &str) -> Result<(Image, Vec<Diagnostic>), Vec<Diagnostic>> {
    qbasic::compile(source)
}

pub fn compile_ok(source: &str) -> Image {
    match qbasic::compile(source) {
        Ok((image, _)) => image,
        Err(diagnostics) => panic!("unexpected diagnostics: {:?}", diagnostics),
    }
}

pub fn error_codes(source: &str) -> Vec<DiagnosticCode> {
    match qbasic::compile(source) {
        Ok(_) => Vec::new(),
        Err(diagnostics) => diagnostics.into_iter().map(|d| d.code).collect(),
    }
}

pub fn warning_codes(source: &str) -> Vec<DiagnosticCode> {
    match qbasic::compile(source) {
        Ok((_, warnings)) => warnings.into_iter().map(|d| d.code).collect(),
        Err(diagnostics) => panic!("unexpected diagnostics: {:?}", diagnostics),
    }
}

/// Compile and run with canned input; panic on any trap.
pub fn exec_with(source: &str, input: &[&str]) -> String {
    let image = compile_ok(source);
    let mut host = TestHost::with_input(input);
    let mut runtime = Runtime::new();
    if let Err(trap) = runtime.run(&image, &mut host, 0) {
        panic!("unexpected trap {:?}\ntranscript so far: {:?}", trap, host.transcript());
    }
    host.transcript()
}

pub fn exec(source: &str) -> String {
    exec_with(source, &[])
}

/// Compile and run expecting a runtime failure; returns its kind.
pub fn exec_trap(source: &str) -> TrapKind {
    let image = compile_ok(source);
    let mut host = TestHost::new();
    let mut runtime = Runtime::new();
    match runtime.run(&image, &mut host, 0) {
        Ok(()) => panic!("expected a trap, got transcript {:?}", host.transcript()),
        Err(trap) => trap.kind,
    }
}
