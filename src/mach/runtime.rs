use super::host::{ChannelIo, Host};
use super::image::Image;
use super::opcode::Opcode;
use super::operation::Operation;
use super::stack::Stack;
use super::trap::{Trap, TrapKind};
use super::val::{default_val, Array, Val};
use crate::lang::ast::{CmpOp, DataLit, OpenMode, Ty};
use crate::lang::Builtin;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const OPERAND_LIMIT: usize = 16 * 1024;
const FRAME_LIMIT: usize = 256;
const GOSUB_LIMIT: usize = 4 * 1024;
const ZONE_WIDTH: usize = 14;

/// Power-on state of the RND generator.
const RND_SEED: u32 = 0x50000;

type Exec<T> = std::result::Result<T, TrapKind>;

struct Frame {
    proc: u16,
    locals: Vec<Val>,
    ret_pc: usize,
    gosub_mark: usize,
    for_mark: usize,
}

struct ForFrame {
    global: bool,
    slot: u16,
    limit: Val,
    step: Val,
}

struct Channel {
    mode: OpenMode,
    io: Box<dyn ChannelIo>,
    column: usize,
}

/// The virtual machine. State survives across [`Runtime::run`] calls so a
/// REPL can extend a module and resume; a fresh `Runtime` gives the usual
/// one-shot execution.
pub struct Runtime {
    globals: Vec<Val>,
    stack: Stack<Val>,
    frames: Stack<Frame>,
    gosub: Stack<usize>,
    for_frames: Vec<ForFrame>,
    channels: HashMap<u16, Channel>,
    data_cursor: usize,
    rng_state: u32,
    rng_last: f32,
    column: usize,
    out_channel: Option<u16>,
    input_fields: VecDeque<String>,
    interrupt: Option<Arc<AtomicBool>>,
}

impl Default for Runtime {
    fn default() -> Runtime {
        Runtime::new()
    }
}

impl Runtime {
    pub fn new() -> Runtime {
        Runtime {
            globals: Vec::new(),
            stack: Stack::new(OPERAND_LIMIT),
            frames: Stack::new(FRAME_LIMIT),
            gosub: Stack::new(GOSUB_LIMIT),
            for_frames: Vec::new(),
            channels: HashMap::new(),
            data_cursor: 0,
            rng_state: RND_SEED,
            rng_last: 0.0,
            column: 0,
            out_channel: None,
            input_fields: VecDeque::new(),
            interrupt: None,
        }
    }

    /// Install the flag an embedder sets to cancel execution; it is
    /// polled between instructions.
    pub fn set_interrupt(&mut self, flag: Arc<AtomicBool>) {
        self.interrupt = Some(flag);
    }

    /// Operand stack depth; zero between complete statements.
    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    /// Execute from `start_pc` until HALT or the end of the stream.
    /// Open channels are closed on every way out.
    pub fn run(
        &mut self,
        image: &Image,
        host: &mut dyn Host,
        start_pc: usize,
    ) -> Result<(), Trap> {
        let want = image.procs[0].locals.len();
        while self.globals.len() < want {
            self.globals.push(Val::Empty);
        }
        let result = self.dispatch(image, host, start_pc);
        self.channels.clear();
        self.out_channel = None;
        result.map_err(|(kind, pc)| {
            let (line, col) = image.position(pc);
            Trap { kind, line, col }
        })
    }

    fn dispatch(
        &mut self,
        image: &Image,
        host: &mut dyn Host,
        start_pc: usize,
    ) -> Result<(), (TrapKind, usize)> {
        let mut pc = start_pc;
        loop {
            if let Some(flag) = &self.interrupt {
                if flag.swap(false, Ordering::SeqCst) {
                    return Err((TrapKind::Interrupted, pc));
                }
            }
            let Some(op) = image.code.get(pc) else {
                return Ok(());
            };
            let at = pc;
            pc += 1;
            match self.execute(op, image, host, &mut pc) {
                Ok(true) => {}
                Ok(false) => return Ok(()),
                Err(kind) => return Err((kind, at)),
            }
        }
    }

    /// One instruction. Returns `false` to halt.
    fn execute(
        &mut self,
        op: &Opcode,
        image: &Image,
        host: &mut dyn Host,
        pc: &mut usize,
    ) -> Exec<bool> {
        match op {
            Opcode::PushConst(k) => {
                let val = image
                    .consts
                    .get(*k as usize)
                    .ok_or(TrapKind::Internal("constant index"))?
                    .clone();
                self.stack.push(val)?;
            }
            Opcode::Pop => {
                self.stack.pop()?;
            }
            Opcode::Dup => {
                let top = self.stack.pop()?;
                self.stack.push(top.clone())?;
                self.stack.push(top)?;
            }
            Opcode::Swap => {
                let (a, b) = self.stack.pop_2()?;
                self.stack.push(b)?;
                self.stack.push(a)?;
            }

            Opcode::LoadLocal(i) => {
                let val = self.load_slot(false, *i, image)?;
                self.stack.push(val)?;
            }
            Opcode::StoreLocal(i) => {
                let val = self.stack.pop()?;
                self.store_slot(false, *i, val, image)?;
            }
            Opcode::LoadGlobal(i) => {
                let val = self.load_slot(true, *i, image)?;
                self.stack.push(val)?;
            }
            Opcode::StoreGlobal(i) => {
                let val = self.stack.pop()?;
                self.store_slot(true, *i, val, image)?;
            }

            Opcode::FieldGet(i) => {
                let record = self.stack.pop()?;
                let Val::Record(_, fields) = record else {
                    return Err(TrapKind::TypeMismatch);
                };
                let field = fields
                    .get(*i as usize)
                    .ok_or(TrapKind::Internal("field index"))?
                    .clone();
                self.stack.push(field)?;
            }
            Opcode::FieldSet(i) => {
                let value = self.stack.pop()?;
                let record = self.stack.pop()?;
                let Val::Record(id, mut fields) = record else {
                    return Err(TrapKind::TypeMismatch);
                };
                let ty = image
                    .records
                    .get(id as usize)
                    .and_then(|r| r.fields.get(*i as usize))
                    .ok_or(TrapKind::Internal("field index"))?
                    .ty;
                let slot = fields
                    .get_mut(*i as usize)
                    .ok_or(TrapKind::Internal("field index"))?;
                *slot = value.coerce_to(ty)?;
                self.stack.push(Val::Record(id, fields))?;
            }
            Opcode::IndexGet { global, slot, dims } => {
                let indices = self.pop_indices(*dims)?;
                let array = self.array_slot(*global, *slot, image)?;
                let offset = array.offset(&indices)?;
                let val = array.data[offset].clone();
                self.stack.push(val)?;
            }
            Opcode::IndexSet { global, slot, dims } => {
                let value = self.stack.pop()?;
                let indices = self.pop_indices(*dims)?;
                let array = self.array_slot(*global, *slot, image)?;
                let elem = array.elem;
                let offset = array.offset(&indices)?;
                array.data[offset] = value.coerce_to(elem)?;
            }
            Opcode::DimArray { global, slot, dims } => {
                let mut bounds = Vec::with_capacity(*dims as usize);
                let raw = self.stack.pop_n(*dims as usize * 2)?;
                for pair in raw.chunks(2) {
                    let lo = pair[0].as_i64()?;
                    let hi = pair[1].as_i64()?;
                    let lo = i32::try_from(lo).map_err(|_| TrapKind::Overflow)?;
                    let hi = i32::try_from(hi).map_err(|_| TrapKind::Overflow)?;
                    bounds.push((lo, hi));
                }
                let ty = self.slot_ty(*global, *slot, image)?;
                let array = Array::new(ty, bounds, &image.records)?;
                self.put_slot(*global, *slot, Val::Array(array))?;
            }
            Opcode::ArrayBound {
                global,
                slot,
                upper,
            } => {
                let dim = self.stack.pop()?.as_i64()?;
                if dim < 1 {
                    return Err(TrapKind::IllegalFunctionCall);
                }
                let array = self.array_slot(*global, *slot, image)?;
                let (lo, hi) = *array
                    .bounds
                    .get(dim as usize - 1)
                    .ok_or(TrapKind::IllegalFunctionCall)?;
                self.stack
                    .push(Val::Int32(if *upper { hi } else { lo }))?;
            }

            Opcode::Add => self.binary(Operation::add)?,
            Opcode::Sub => self.binary(Operation::subtract)?,
            Opcode::Mul => self.binary(Operation::multiply)?,
            Opcode::Div => self.binary(Operation::divide)?,
            Opcode::IntDiv => self.binary(Operation::int_divide)?,
            Opcode::Mod => self.binary(Operation::modulo)?,
            Opcode::Pow => self.binary(Operation::power)?,
            Opcode::Concat => self.binary(Operation::concat)?,
            Opcode::And => self.binary(Operation::and)?,
            Opcode::Or => self.binary(Operation::or)?,
            Opcode::Neg => {
                let val = self.stack.pop()?;
                self.stack.push(Operation::negate(val)?)?;
            }
            Opcode::Not => {
                let val = self.stack.pop()?;
                self.stack.push(Operation::not(val)?)?;
            }
            Opcode::Cmp(cmp) => {
                let (lhs, rhs) = self.stack.pop_2()?;
                self.stack.push(Operation::compare(*cmp, lhs, rhs)?)?;
            }
            Opcode::Coerce(ty) => {
                let val = self.stack.pop()?;
                self.stack.push(val.coerce_to(*ty)?)?;
            }

            Opcode::Jmp(a) => *pc = *a as usize,
            Opcode::JmpIfFalse(a) => {
                if !self.stack.pop()?.truthy()? {
                    *pc = *a as usize;
                }
            }
            Opcode::JmpIfTrue(a) => {
                if self.stack.pop()?.truthy()? {
                    *pc = *a as usize;
                }
            }
            Opcode::ForInit { global, slot, exit } => {
                let step = self.stack.pop()?;
                let limit = self.stack.pop()?;
                let start = self.stack.pop()?;
                self.store_slot(*global, *slot, start, image)?;
                self.for_frames.push(ForFrame {
                    global: *global,
                    slot: *slot,
                    limit,
                    step,
                });
                if !self.for_continues(image)? {
                    *pc = *exit as usize;
                }
            }
            Opcode::ForStep { global, slot, back } => {
                let frame = self
                    .for_frames
                    .last()
                    .ok_or(TrapKind::Internal("FOR frame"))?;
                let step = frame.step.clone();
                let counter = self.load_slot(*global, *slot, image)?;
                let next = Operation::add(counter, step)?;
                self.store_slot(*global, *slot, next, image)?;
                if self.for_continues(image)? {
                    *pc = *back as usize;
                }
            }
            Opcode::ForEnd => {
                self.for_frames.pop();
            }

            Opcode::Gosub(a) => {
                self.gosub.push(*pc)?;
                *pc = *a as usize;
            }
            Opcode::RetSub => {
                *pc = self.gosub_pop()?;
            }
            Opcode::RetSubTo(a) => {
                self.gosub_pop()?;
                *pc = *a as usize;
            }
            Opcode::Call { proc, argc } => {
                let entry = image
                    .procs
                    .get(*proc as usize)
                    .ok_or(TrapKind::Internal("procedure index"))?;
                let mut locals = vec![Val::Empty; entry.locals.len()];
                let args = self.stack.pop_n(*argc as usize)?;
                for (i, arg) in args.into_iter().enumerate() {
                    let ty = entry
                        .params
                        .get(i)
                        .ok_or(TrapKind::Internal("argument count"))?
                        .ty;
                    locals[i] = arg.coerce_to(ty)?;
                }
                self.frames.push(Frame {
                    proc: *proc,
                    locals,
                    ret_pc: *pc,
                    gosub_mark: self.gosub.len(),
                    for_mark: self.for_frames.len(),
                })?;
                *pc = entry.entry as usize;
            }
            Opcode::Ret => {
                let frame = self.frames.pop()?;
                self.gosub.truncate(frame.gosub_mark);
                self.for_frames.truncate(frame.for_mark);
                let entry = &image.procs[frame.proc as usize];
                if let Some(ret_ty) = entry.ret {
                    let slot = entry.params.len();
                    let val = match frame.locals[slot].clone() {
                        Val::Empty => default_val(ret_ty, &image.records),
                        val => val,
                    };
                    self.stack.push(val)?;
                }
                for (i, param) in entry.params.iter().enumerate() {
                    if param.by_ref {
                        let val = match frame.locals[i].clone() {
                            Val::Empty => default_val(param.ty, &image.records),
                            val => val,
                        };
                        self.stack.push(val)?;
                    }
                }
                *pc = frame.ret_pc;
            }

            Opcode::PrintItem => {
                let val = self.stack.pop()?;
                let text = val.print_form()?;
                self.emit_text(&text, host)?;
            }
            Opcode::PrintZone => {
                let column = self.sink_column();
                let target = (column / ZONE_WIDTH + 1) * ZONE_WIDTH;
                let pad = " ".repeat(target - column);
                self.emit_text(&pad, host)?;
            }
            Opcode::PrintRaw => {
                let val = self.stack.pop()?;
                let text = val.into_string()?;
                self.emit_text(&text, host)?;
            }
            Opcode::PrintEol => {
                self.emit_text("\n", host)?;
            }
            Opcode::WriteItem => {
                let val = self.stack.pop()?;
                let text = val.write_form()?;
                self.emit_text(&text, host)?;
            }
            Opcode::OutChannel => {
                let n = self.channel_number()?;
                let chan = self.channels.get(&n).ok_or(TrapKind::BadChannel)?;
                if matches!(chan.mode, OpenMode::Input) {
                    return Err(TrapKind::BadChannel);
                }
                self.out_channel = Some(n);
            }
            Opcode::OutConsole => {
                self.out_channel = None;
            }

            Opcode::InputRead(n) => {
                let prompt = self.stack.pop()?.into_string()?;
                loop {
                    self.emit_text(&prompt, host)?;
                    let line = host
                        .read_line()
                        .map_err(io_trap)?
                        .ok_or_else(|| TrapKind::IoError("input past end".to_string()))?;
                    self.column = 0;
                    let fields = split_fields(&line);
                    if fields.len() == *n as usize {
                        self.input_fields = fields.into();
                        break;
                    }
                    self.emit_text("Redo from start\n", host)?;
                }
            }
            Opcode::InputField(ty) => {
                let field = self
                    .input_fields
                    .pop_front()
                    .ok_or(TrapKind::Internal("input field"))?;
                let val = parse_field(&field, *ty)?;
                self.stack.push(val)?;
            }
            Opcode::LineInputRead => {
                let prompt = self.stack.pop()?.into_string()?;
                self.emit_text(&prompt, host)?;
                let line = host
                    .read_line()
                    .map_err(io_trap)?
                    .ok_or_else(|| TrapKind::IoError("input past end".to_string()))?;
                self.column = 0;
                self.input_fields = VecDeque::from([line]);
            }
            Opcode::ChanInputRead(n) => {
                let line = self.channel_read_line()?;
                let fields = split_fields(&line);
                if fields.len() != *n as usize {
                    return Err(TrapKind::IoError("bad field count".to_string()));
                }
                self.input_fields = fields.into();
            }
            Opcode::ChanLineInput => {
                let line = self.channel_read_line()?;
                self.input_fields = VecDeque::from([line]);
            }

            Opcode::Open(mode) => {
                let n = self.channel_number()?;
                let path = self.stack.pop()?.into_string()?;
                if self.channels.contains_key(&n) {
                    return Err(TrapKind::BadChannel);
                }
                let io = host.open(&path, *mode).map_err(io_trap)?;
                self.channels.insert(
                    n,
                    Channel {
                        mode: *mode,
                        io,
                        column: 0,
                    },
                );
            }
            Opcode::Close => {
                let n = self.channel_number()?;
                self.channels.remove(&n);
                if self.out_channel == Some(n) {
                    self.out_channel = None;
                }
            }
            Opcode::CloseAll => {
                self.channels.clear();
                self.out_channel = None;
            }
            Opcode::Cls => {
                if !host.clear_screen() {
                    return Err(TrapKind::FeatureUnavailable);
                }
                self.column = 0;
            }

            Opcode::ReadData(ty) => {
                let item = image
                    .data
                    .get(self.data_cursor)
                    .ok_or(TrapKind::OutOfData)?;
                self.data_cursor += 1;
                let val = match item {
                    DataLit::Int(n) => Val::Int64(*n).coerce_to(*ty)?,
                    DataLit::Float(n) => Val::Double(*n).coerce_to(*ty)?,
                    DataLit::Text(s) => Val::Str(s.clone()).coerce_to(*ty)?,
                };
                self.stack.push(val)?;
            }
            Opcode::RestoreData(i) => {
                self.data_cursor = *i as usize;
            }

            Opcode::Rnd { arg } => {
                let value = if *arg {
                    let n = self.stack.pop()?.as_f64()?;
                    if n < 0.0 {
                        self.mix_seed(n);
                        self.rnd_next()
                    } else if n == 0.0 {
                        self.rng_last
                    } else {
                        self.rnd_next()
                    }
                } else {
                    self.rnd_next()
                };
                self.stack.push(Val::Single(value))?;
            }
            Opcode::Randomize => {
                let seed = self.stack.pop()?.as_f64()?;
                self.mix_seed(seed);
            }
            Opcode::Timer => {
                let ticks = host.ticks();
                self.stack.push(Val::Single(ticks as f32))?;
            }
            Opcode::Intrinsic { builtin, argc } => {
                let args = self.stack.pop_n(*argc as usize)?;
                let result = self.apply_builtin(*builtin, args)?;
                self.stack.push(result)?;
            }

            Opcode::Halt => return Ok(false),
        }
        Ok(true)
    }

    // ----- slots -----

    fn slot_ty(&self, global: bool, index: u16, image: &Image) -> Exec<Ty> {
        let entry = if global {
            &image.procs[0]
        } else {
            let frame = self.frame()?;
            &image.procs[frame.proc as usize]
        };
        entry
            .locals
            .get(index as usize)
            .map(|slot| slot.ty)
            .ok_or(TrapKind::Internal("slot index"))
    }

    fn frame(&self) -> Exec<&Frame> {
        self.frames
            .last()
            .ok_or(TrapKind::Internal("no active frame"))
    }

    fn load_slot(&mut self, global: bool, index: u16, image: &Image) -> Exec<Val> {
        let ty = self.slot_ty(global, index, image)?;
        let slot = self.slot_mut(global, index)?;
        if matches!(slot, Val::Empty) {
            *slot = default_val(ty, &image.records);
        }
        Ok(slot.clone())
    }

    fn store_slot(&mut self, global: bool, index: u16, val: Val, image: &Image) -> Exec<()> {
        let ty = self.slot_ty(global, index, image)?;
        let val = val.coerce_to(ty)?;
        self.put_slot(global, index, val)
    }

    fn put_slot(&mut self, global: bool, index: u16, val: Val) -> Exec<()> {
        let slot = self.slot_mut(global, index)?;
        *slot = val;
        Ok(())
    }

    fn slot_mut(&mut self, global: bool, index: u16) -> Exec<&mut Val> {
        if global {
            self.globals
                .get_mut(index as usize)
                .ok_or(TrapKind::Internal("slot index"))
        } else {
            let frame = self
                .frames
                .last_mut()
                .ok_or(TrapKind::Internal("no active frame"))?;
            frame
                .locals
                .get_mut(index as usize)
                .ok_or(TrapKind::Internal("slot index"))
        }
    }

    /// Arrays allocate lazily: touching an undimensioned array gives it
    /// bounds of BASE..10 in every declared dimension.
    fn array_slot(&mut self, global: bool, slot: u16, image: &Image) -> Exec<&mut Array> {
        let ty = self.slot_ty(global, slot, image)?;
        let base = image.option_base();
        let place = self.slot_mut(global, slot)?;
        if matches!(place, Val::Empty) {
            let array = Array::new(ty, vec![(base, 10)], &image.records)?;
            *place = Val::Array(array);
        }
        match place {
            Val::Array(array) => Ok(array),
            _ => Err(TrapKind::TypeMismatch),
        }
    }

    fn pop_indices(&mut self, dims: u8) -> Exec<Vec<i64>> {
        let raw = self.stack.pop_n(dims as usize)?;
        let mut indices = Vec::with_capacity(raw.len());
        for val in raw {
            indices.push(val.as_i64()?);
        }
        Ok(indices)
    }

    // ----- helpers -----

    fn binary(&mut self, op: impl Fn(Val, Val) -> Exec<Val>) -> Exec<()> {
        let (lhs, rhs) = self.stack.pop_2()?;
        let result = op(lhs, rhs)?;
        self.stack.push(result)
    }

    fn gosub_pop(&mut self) -> Exec<usize> {
        let mark = self.frames.last().map(|f| f.gosub_mark).unwrap_or(0);
        if self.gosub.len() <= mark {
            return Err(TrapKind::ReturnWithoutGosub);
        }
        self.gosub.pop()
    }

    fn for_continues(&mut self, image: &Image) -> Exec<bool> {
        let frame = self
            .for_frames
            .last()
            .ok_or(TrapKind::Internal("FOR frame"))?;
        let step = frame.step.as_f64()?;
        let limit = frame.limit.clone();
        let (global, slot) = (frame.global, frame.slot);
        let counter = self.load_slot(global, slot, image)?;
        if step == 0.0 {
            return Ok(false);
        }
        let cmp = if step > 0.0 { CmpOp::Le } else { CmpOp::Ge };
        Operation::compare(cmp, counter, limit)?.truthy()
    }

    fn channel_number(&mut self) -> Exec<u16> {
        let n = self.stack.pop()?.as_i64()?;
        if !(1..=255).contains(&n) {
            return Err(TrapKind::BadChannel);
        }
        Ok(n as u16)
    }

    fn channel_read_line(&mut self) -> Exec<String> {
        let n = self.channel_number()?;
        let chan = self.channels.get_mut(&n).ok_or(TrapKind::BadChannel)?;
        if !matches!(chan.mode, OpenMode::Input | OpenMode::Binary | OpenMode::Random) {
            return Err(TrapKind::BadChannel);
        }
        chan.io
            .read_line()
            .map_err(io_trap)?
            .ok_or_else(|| TrapKind::IoError("input past end of file".to_string()))
    }

    fn sink_column(&self) -> usize {
        match self.out_channel {
            Some(n) => self.channels.get(&n).map(|c| c.column).unwrap_or(0),
            None => self.column,
        }
    }

    fn emit_text(&mut self, text: &str, host: &mut dyn Host) -> Exec<()> {
        match self.out_channel {
            Some(n) => {
                let chan = self.channels.get_mut(&n).ok_or(TrapKind::BadChannel)?;
                // Text channels get host-native newlines.
                if cfg!(windows) {
                    let native = text.replace('\n', "\r\n");
                    chan.io.write(native.as_bytes()).map_err(io_trap)?;
                } else {
                    chan.io.write(text.as_bytes()).map_err(io_trap)?;
                }
                chan.column = column_after(chan.column, text);
            }
            None => {
                host.write(text.as_bytes()).map_err(io_trap)?;
                self.column = column_after(self.column, text);
            }
        }
        Ok(())
    }

    // ----- randomness -----

    /// One step of the 24-bit linear congruential generator.
    fn rnd_next(&mut self) -> f32 {
        self.rng_state = self
            .rng_state
            .wrapping_mul(16_598_013)
            .wrapping_add(12_820_163)
            & 0xFF_FFFF;
        self.rng_last = self.rng_state as f32 / 16_777_216.0;
        self.rng_last
    }

    /// RANDOMIZE folds the argument's IEEE-754 bits and splices bits
    /// 8..24 of the state, keeping the low byte.
    fn mix_seed(&mut self, seed: f64) {
        let bits = seed.to_bits();
        let folded = ((bits >> 32) as u32) ^ (bits as u32);
        self.rng_state = (self.rng_state & 0xFF) | ((folded & 0xFFFF) << 8);
    }

    // ----- built-ins -----

    fn apply_builtin(&mut self, builtin: Builtin, mut args: Vec<Val>) -> Exec<Val> {
        use Builtin::{
            Abs, Asc, Atn, Cdbl, Chr, Cint, Clng, Cos, Csng, Eof, Exp, Fix, Instr, Int, Lbound,
            Lcase, Left, Len, Log, Ltrim, Mid, Right, Rnd, Rtrim, Sgn, Sin, Space, Sqr, Str,
            StringRep, Tan, Timer, Ubound, Ucase,
        };
        fn arg_at(args: &mut [Val], i: usize) -> Val {
            args.get_mut(i).map(std::mem::take).unwrap_or(Val::Empty)
        }
        macro_rules! arg {
            ($i:expr) => {
                arg_at(&mut args, $i)
            };
        }
        Ok(match builtin {
            Abs => match arg!(0) {
                Val::Int16(n) => Val::Int16(n.checked_abs().ok_or(TrapKind::Overflow)?),
                Val::Int32(n) => Val::Int32(n.checked_abs().ok_or(TrapKind::Overflow)?),
                Val::Int64(n) => Val::Int64(n.checked_abs().ok_or(TrapKind::Overflow)?),
                Val::UInt32(n) => Val::UInt32(n),
                Val::Single(n) => Val::Single(n.abs()),
                Val::Double(n) => Val::Double(n.abs()),
                _ => return Err(TrapKind::TypeMismatch),
            },
            Sgn => {
                let n = arg!(0).as_f64()?;
                Val::Int16(if n > 0.0 {
                    1
                } else if n < 0.0 {
                    -1
                } else {
                    0
                })
            }
            Int => match arg!(0) {
                Val::Single(n) => Val::Single(n.floor()),
                Val::Double(n) => Val::Double(n.floor()),
                other => other,
            },
            Fix => match arg!(0) {
                Val::Single(n) => Val::Single(n.trunc()),
                Val::Double(n) => Val::Double(n.trunc()),
                other => other,
            },
            Sqr => {
                let n = arg!(0).as_f64()?;
                if n < 0.0 {
                    return Err(TrapKind::IllegalFunctionCall);
                }
                Val::Double(n.sqrt())
            }
            Log => {
                let n = arg!(0).as_f64()?;
                if n <= 0.0 {
                    return Err(TrapKind::IllegalFunctionCall);
                }
                Val::Double(n.ln())
            }
            Sin => Val::Double(arg!(0).as_f64()?.sin()),
            Cos => Val::Double(arg!(0).as_f64()?.cos()),
            Tan => Val::Double(arg!(0).as_f64()?.tan()),
            Atn => Val::Double(arg!(0).as_f64()?.atan()),
            Exp => Val::Double(arg!(0).as_f64()?.exp()),
            Cint => arg!(0).coerce_to(Ty::Int16)?,
            Clng => arg!(0).coerce_to(Ty::Int32)?,
            Csng => arg!(0).coerce_to(Ty::Single)?,
            Cdbl => arg!(0).coerce_to(Ty::Double)?,
            Asc => {
                let s = arg!(0).into_string()?;
                let ch = s.chars().next().ok_or(TrapKind::IllegalFunctionCall)?;
                let code = ch as u32;
                if code > i16::MAX as u32 {
                    return Err(TrapKind::Overflow);
                }
                Val::Int16(code as i16)
            }
            Chr => {
                let code = arg!(0).as_i64()?;
                if !(0..=255).contains(&code) {
                    return Err(TrapKind::IllegalFunctionCall);
                }
                let ch = char::from_u32(code as u32).ok_or(TrapKind::IllegalFunctionCall)?;
                Val::Str(ch.to_string())
            }
            Len => {
                let s = arg!(0).into_string()?;
                Val::Int32(s.chars().count() as i32)
            }
            Left => {
                let n = args[1].as_i64()?;
                let s = arg!(0).into_string()?;
                if n < 0 {
                    return Err(TrapKind::IllegalFunctionCall);
                }
                Val::Str(s.chars().take(n as usize).collect())
            }
            Right => {
                let n = args[1].as_i64()?;
                let s = arg!(0).into_string()?;
                if n < 0 {
                    return Err(TrapKind::IllegalFunctionCall);
                }
                let chars: Vec<char> = s.chars().collect();
                let start = chars.len().saturating_sub(n as usize);
                Val::Str(chars[start..].iter().collect())
            }
            Mid => {
                let len = if args.len() > 2 {
                    Some(args[2].as_i64()?)
                } else {
                    None
                };
                let start = args[1].as_i64()?;
                let s = arg!(0).into_string()?;
                if start < 1 {
                    return Err(TrapKind::IllegalFunctionCall);
                }
                let tail = s.chars().skip(start as usize - 1);
                match len {
                    Some(len) if len >= 0 => Val::Str(tail.take(len as usize).collect()),
                    Some(_) => return Err(TrapKind::IllegalFunctionCall),
                    None => Val::Str(tail.collect()),
                }
            }
            Instr => {
                // INSTR([start%,] hay$, needle$); start is 1-based.
                let (start, hay, needle) = if args.len() == 3 {
                    let start = args[0].as_i64()?;
                    let hay = arg!(1).into_string()?;
                    let needle = arg!(2).into_string()?;
                    (start, hay, needle)
                } else {
                    let hay = arg!(0).into_string()?;
                    let needle = arg!(1).into_string()?;
                    (1, hay, needle)
                };
                if start < 1 {
                    return Err(TrapKind::IllegalFunctionCall);
                }
                let skip = (start - 1) as usize;
                if skip >= hay.chars().count() {
                    Val::Int32(0)
                } else {
                    let tail = hay
                        .char_indices()
                        .nth(skip)
                        .map(|(byte, _)| byte)
                        .unwrap_or(hay.len());
                    match hay[tail..].find(&needle) {
                        Some(off) => {
                            Val::Int32(hay[..tail + off].chars().count() as i32 + 1)
                        }
                        None => Val::Int32(0),
                    }
                }
            }
            Lcase => Val::Str(arg!(0).into_string()?.to_lowercase()),
            Ucase => Val::Str(arg!(0).into_string()?.to_uppercase()),
            Ltrim => Val::Str(arg!(0).into_string()?.trim_start().to_string()),
            Rtrim => Val::Str(arg!(0).into_string()?.trim_end().to_string()),
            Space => {
                let n = arg!(0).as_i64()?;
                if n < 0 {
                    return Err(TrapKind::IllegalFunctionCall);
                }
                Val::Str(" ".repeat(n as usize))
            }
            StringRep => {
                let pattern = arg!(1).into_string()?;
                let n = arg!(0).as_i64()?;
                let ch = pattern.chars().next().ok_or(TrapKind::IllegalFunctionCall)?;
                if n < 0 {
                    return Err(TrapKind::IllegalFunctionCall);
                }
                Val::Str(ch.to_string().repeat(n as usize))
            }
            Str => {
                let val = arg!(0);
                let body = val.number_form()?;
                Val::Str(if body.starts_with('-') {
                    body
                } else {
                    format!(" {}", body)
                })
            }
            Builtin::Val => {
                let s = arg!(0).into_string()?;
                let text = s.trim_start();
                // Longest prefix that parses as a number, so VAL("100-50")
                // is 100 and VAL("1.2.3") is 1.2.
                let plausible = text
                    .find(|c: char| !c.is_ascii_digit() && !"+-.eE".contains(c))
                    .unwrap_or(text.len());
                let mut value = 0.0;
                for end in 1..=plausible {
                    if let Ok(n) = text[..end].parse::<f64>() {
                        value = n;
                    }
                }
                Val::Double(value)
            }
            Eof => {
                let n = arg!(0).as_i64()?;
                if !(1..=255).contains(&n) {
                    return Err(TrapKind::BadChannel);
                }
                let chan = self
                    .channels
                    .get_mut(&(n as u16))
                    .ok_or(TrapKind::BadChannel)?;
                let eof = chan.io.at_eof().map_err(io_trap)?;
                Val::Int16(if eof { -1 } else { 0 })
            }
            Rnd | Timer | Lbound | Ubound => {
                return Err(TrapKind::Internal("builtin handled by dedicated opcode"))
            }
        })
    }
}

fn io_trap(err: std::io::Error) -> TrapKind {
    TrapKind::IoError(err.to_string())
}

fn column_after(column: usize, text: &str) -> usize {
    match text.rfind('\n') {
        Some(i) => text[i + 1..].chars().count(),
        None => column + text.chars().count(),
    }
}

/// Split an INPUT line on top-level commas; quoted fields keep their
/// commas and shed the quotes, unquoted fields are trimmed.
fn split_fields(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for ch in line.chars() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    fields.push(current);
    fields
        .into_iter()
        .map(|f| f.trim().to_string())
        .collect()
}

fn parse_field(field: &str, ty: Ty) -> Exec<Val> {
    match ty {
        Ty::Str | Ty::FixedStr(_) => Val::Str(field.to_string()).coerce_to(ty),
        _ => {
            let trimmed = field.trim();
            if trimmed.is_empty() {
                return Val::Int16(0).coerce_to(ty);
            }
            let n: f64 = trimmed
                .parse()
                .map_err(|_| TrapKind::TypeMismatch)?;
            Val::Double(n).coerce_to(ty)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rnd_sequence_is_deterministic() {
        let mut a = Runtime::new();
        let mut b = Runtime::new();
        let seq_a: Vec<f32> = (0..5).map(|_| a.rnd_next()).collect();
        let seq_b: Vec<f32> = (0..5).map(|_| b.rnd_next()).collect();
        assert_eq!(seq_a, seq_b);
    }

    #[test]
    fn test_mix_seed_changes_sequence() {
        let mut a = Runtime::new();
        let mut b = Runtime::new();
        b.mix_seed(42.0);
        assert_ne!(a.rnd_next(), b.rnd_next());
    }

    #[test]
    fn test_split_fields() {
        assert_eq!(split_fields("1, 2"), vec!["1", "2"]);
        assert_eq!(split_fields(r#""a,b", c"#), vec!["a,b", "c"]);
    }

    #[test]
    fn test_column_after() {
        assert_eq!(column_after(3, "abc"), 6);
        assert_eq!(column_after(9, "ab\ncd"), 2);
    }
}
