//! Interactive session. Each entered line extends the module source; the
//! whole module is recompiled and only the newly appended statements run.
//! Slot numbering is append-only, so variable state, the DATA cursor, and
//! open channels survive from step to step.

use crate::lang::Diagnostic;
use crate::mach::{Host, Image, Runtime, StdHost, Trap};
use ansi_term::Style;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

pub enum Outcome {
    /// The line compiled; any statements it contributed were executed.
    Ran { warnings: Vec<Diagnostic> },
    /// The line was rejected and the module is unchanged.
    Rejected(Vec<Diagnostic>),
    /// The line compiled but execution trapped; definitions are kept.
    Faulted(Trap),
}

pub struct Session {
    source: String,
    line_count: u32,
    runtime: Runtime,
    host: Box<dyn Host>,
}

impl Session {
    pub fn new() -> Session {
        Session::with_host(Box::new(StdHost))
    }

    pub fn with_host(host: Box<dyn Host>) -> Session {
        Session {
            source: String::new(),
            line_count: 0,
            runtime: Runtime::new(),
            host,
        }
    }

    pub fn set_interrupt(&mut self, flag: Arc<AtomicBool>) {
        self.runtime.set_interrupt(flag);
    }

    pub fn enter(&mut self, text: &str) -> Outcome {
        let mut candidate = self.source.clone();
        candidate.push_str(text);
        if !candidate.ends_with('\n') {
            candidate.push('\n');
        }
        let (image, warnings) = match crate::compile(&candidate) {
            Ok(ok) => ok,
            Err(diagnostics) => return Outcome::Rejected(diagnostics),
        };
        let first_new_line = self.line_count + 1;
        self.source = candidate;
        self.line_count += text.lines().count().max(1) as u32;
        match start_pc(&image, first_new_line) {
            Some(pc) => match self.runtime.run(&image, self.host.as_mut(), pc) {
                Ok(()) => Outcome::Ran { warnings },
                Err(trap) => Outcome::Faulted(trap),
            },
            // The entry added only definitions; nothing to execute.
            None => Outcome::Ran { warnings },
        }
    }
}

impl Default for Session {
    fn default() -> Session {
        Session::new()
    }
}

/// First module-body instruction that came from the freshly added lines.
/// Procedure bodies sit past the module HALT and never run directly.
fn start_pc(image: &Image, first_new_line: u32) -> Option<usize> {
    let main_end = image
        .procs
        .iter()
        .skip(1)
        .map(|p| p.entry)
        .min()
        .unwrap_or(image.code.len() as u32);
    image
        .source_map
        .iter()
        .find(|&&(pc, line, _)| line >= first_new_line && pc < main_end)
        .map(|&(pc, _, _)| pc as usize)
}

/// The `repl` subcommand: a rustyline loop over a [`Session`].
pub fn interactive(interrupt: Arc<AtomicBool>) -> rustyline::Result<()> {
    let mut editor = DefaultEditor::new()?;
    let mut session = Session::new();
    session.set_interrupt(interrupt);
    println!("QBasic Lang (SYSTEM to leave)");
    loop {
        match editor.readline("] ") {
            Ok(line) => {
                if line.trim().eq_ignore_ascii_case("SYSTEM") {
                    break;
                }
                editor.add_history_entry(&line)?;
                match session.enter(&line) {
                    Outcome::Ran { warnings } => {
                        for warning in warnings {
                            eprintln!("{}", Style::new().bold().paint(warning.to_string()));
                        }
                    }
                    Outcome::Rejected(diagnostics) => {
                        for diagnostic in diagnostics {
                            eprintln!(
                                "{}",
                                Style::new().bold().paint(format!("?{}", diagnostic))
                            );
                        }
                    }
                    Outcome::Faulted(trap) => {
                        eprintln!("{}", Style::new().bold().paint(format!("?{}", trap)));
                    }
                }
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(err) => return Err(err),
        }
    }
    Ok(())
}
