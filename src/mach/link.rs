use super::opcode::Opcode;
use std::collections::HashMap;

pub type Symbol = usize;

/// Forward-reference fix-ups. Jump sites are recorded against symbols;
/// once every target pc is known, [`Link::resolve`] patches the code.
#[derive(Debug, Default)]
pub struct Link {
    next: Symbol,
    defined: HashMap<Symbol, u32>,
    pending: Vec<(usize, Symbol)>,
}

impl Link {
    pub fn new() -> Link {
        Link::default()
    }

    pub fn symbol(&mut self) -> Symbol {
        self.next += 1;
        self.next
    }

    pub fn define(&mut self, symbol: Symbol, pc: u32) {
        self.defined.insert(symbol, pc);
    }

    pub fn refer(&mut self, code_index: usize, symbol: Symbol) {
        self.pending.push((code_index, symbol));
    }

    pub fn lookup(&self, symbol: Symbol) -> Option<u32> {
        self.defined.get(&symbol).copied()
    }

    /// Patch every pending jump site. The analyzer has already rejected
    /// unknown labels, so a missing symbol here is an emitter bug.
    pub fn resolve(&mut self, code: &mut [Opcode]) {
        for (index, symbol) in self.pending.drain(..) {
            let target = *self
                .defined
                .get(&symbol)
                .expect("jump to an undefined symbol survived analysis");
            match &mut code[index] {
                Opcode::Jmp(a)
                | Opcode::JmpIfFalse(a)
                | Opcode::JmpIfTrue(a)
                | Opcode::Gosub(a)
                | Opcode::RetSubTo(a) => *a = target,
                Opcode::ForInit { exit, .. } => *exit = target,
                Opcode::ForStep { back, .. } => *back = target,
                other => unreachable!("fix-up against non-jump {:?}", other),
            }
        }
    }
}
