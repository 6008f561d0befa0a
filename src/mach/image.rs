use super::opcode::Opcode;
use super::val::Val;
use crate::lang::ast::{CmpOp, DataLit, OpenMode, Ty};
use crate::lang::{Builtin, FieldDef, RecordDef};
use thiserror::Error;

pub const MAGIC: [u8; 4] = *b"QBVM";
pub const VERSION: u16 = 1;
/// Flag bit 0: RND mixing function revision 1.
pub const FLAG_RND_REV1: u16 = 0x0001;
/// Flag bit 1: OPTION BASE 1 was in effect at build time.
pub const FLAG_BASE_ONE: u16 = 0x0002;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ImageError {
    #[error("Unsupported image")]
    UnsupportedImage,
    #[error("Truncated image")]
    Truncated,
    #[error("Bad image encoding: {0}")]
    BadEncoding(&'static str),
}

type Result<T> = std::result::Result<T, ImageError>;

#[derive(Debug, Clone, PartialEq)]
pub struct ParamEntry {
    pub ty: Ty,
    pub by_ref: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlotEntry {
    pub ty: Ty,
    pub is_array: bool,
}

/// One procedure: entry pc, parameter descriptors, local slot types.
/// Entry 0 is the module body; its locals are the globals.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcEntry {
    pub name: String,
    pub entry: u32,
    pub params: Vec<ParamEntry>,
    pub locals: Vec<SlotEntry>,
    pub ret: Option<Ty>,
}

/// A compiled program: pools, tables, and the instruction stream.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Image {
    pub flags: u16,
    pub consts: Vec<Val>,
    pub records: Vec<RecordDef>,
    pub procs: Vec<ProcEntry>,
    pub data: Vec<DataLit>,
    pub code: Vec<Opcode>,
    pub labels: Vec<(String, u32)>,
    /// pc → (line, col), sorted by pc; empty when stripped.
    pub source_map: Vec<(u32, u32, u32)>,
}

impl Image {
    pub fn option_base(&self) -> i32 {
        if self.flags & FLAG_BASE_ONE != 0 {
            1
        } else {
            0
        }
    }

    /// Source position of the instruction at `pc`.
    pub fn position(&self, pc: usize) -> (u32, u32) {
        let pc = pc as u32;
        match self.source_map.partition_point(|&(p, _, _)| p <= pc) {
            0 => (0, 0),
            n => {
                let (_, line, col) = self.source_map[n - 1];
                (line, col)
            }
        }
    }

    /// Serialize to the little-endian container format: a fixed header,
    /// then length-prefixed sections in a fixed order.
    pub fn write_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&MAGIC);
        write_u16(&mut out, VERSION);
        write_u16(&mut out, self.flags);
        write_section(&mut out, |buf| {
            write_u32(buf, self.consts.len() as u32);
            for val in &self.consts {
                write_const(buf, val);
            }
        });
        write_section(&mut out, |buf| {
            write_u32(buf, self.records.len() as u32);
            for record in &self.records {
                write_str(buf, &record.name);
                write_u32(buf, record.size);
                write_u32(buf, record.fields.len() as u32);
                for field in &record.fields {
                    write_str(buf, &field.name);
                    write_ty(buf, field.ty);
                    write_u32(buf, field.offset);
                }
            }
        });
        write_section(&mut out, |buf| {
            write_u32(buf, self.procs.len() as u32);
            for proc in &self.procs {
                write_str(buf, &proc.name);
                write_u32(buf, proc.entry);
                match proc.ret {
                    None => buf.push(0),
                    Some(ty) => {
                        buf.push(1);
                        write_ty(buf, ty);
                    }
                }
                write_u16(buf, proc.params.len() as u16);
                for param in &proc.params {
                    write_ty(buf, param.ty);
                    buf.push(param.by_ref as u8);
                }
                write_u16(buf, proc.locals.len() as u16);
                for local in &proc.locals {
                    write_ty(buf, local.ty);
                    buf.push(local.is_array as u8);
                }
            }
        });
        write_section(&mut out, |buf| {
            write_u32(buf, self.data.len() as u32);
            for item in &self.data {
                match item {
                    DataLit::Int(n) => {
                        buf.push(0);
                        buf.extend_from_slice(&n.to_le_bytes());
                    }
                    DataLit::Float(n) => {
                        buf.push(1);
                        buf.extend_from_slice(&n.to_le_bytes());
                    }
                    DataLit::Text(s) => {
                        buf.push(2);
                        write_str(buf, s);
                    }
                }
            }
        });
        write_section(&mut out, |buf| {
            write_u32(buf, self.code.len() as u32);
            for op in &self.code {
                write_op(buf, op);
            }
        });
        write_section(&mut out, |buf| {
            write_u32(buf, self.labels.len() as u32);
            for (name, pc) in &self.labels {
                write_str(buf, name);
                write_u32(buf, *pc);
            }
        });
        write_section(&mut out, |buf| {
            write_u32(buf, self.source_map.len() as u32);
            for &(pc, line, col) in &self.source_map {
                write_u32(buf, pc);
                write_u32(buf, line);
                write_u32(buf, col);
            }
        });
        out
    }

    pub fn read_bytes(bytes: &[u8]) -> Result<Image> {
        let mut pos = 0usize;
        let magic = read_bytes(bytes, &mut pos, 4)?;
        if magic != MAGIC {
            return Err(ImageError::UnsupportedImage);
        }
        let version = read_u16(bytes, &mut pos)?;
        if version != VERSION {
            return Err(ImageError::UnsupportedImage);
        }
        let flags = read_u16(bytes, &mut pos)?;

        let mut image = Image {
            flags,
            ..Image::default()
        };

        let section = read_section(bytes, &mut pos)?;
        let mut p = 0usize;
        let count = read_u32(section, &mut p)?;
        for _ in 0..count {
            image.consts.push(read_const(section, &mut p)?);
        }

        let section = read_section(bytes, &mut pos)?;
        let mut p = 0usize;
        let count = read_u32(section, &mut p)?;
        for _ in 0..count {
            let name = read_str(section, &mut p)?;
            let size = read_u32(section, &mut p)?;
            let field_count = read_u32(section, &mut p)?;
            let mut fields = Vec::new();
            for _ in 0..field_count {
                let field = read_str(section, &mut p)?;
                let ty = read_ty(section, &mut p)?;
                let offset = read_u32(section, &mut p)?;
                fields.push(FieldDef {
                    name: field,
                    ty,
                    offset,
                });
            }
            image.records.push(RecordDef { name, fields, size });
        }

        let section = read_section(bytes, &mut pos)?;
        let mut p = 0usize;
        let count = read_u32(section, &mut p)?;
        for _ in 0..count {
            let name = read_str(section, &mut p)?;
            let entry = read_u32(section, &mut p)?;
            let ret = match read_u8(section, &mut p)? {
                0 => None,
                1 => Some(read_ty(section, &mut p)?),
                _ => return Err(ImageError::BadEncoding("return tag")),
            };
            let param_count = read_u16(section, &mut p)?;
            let mut params = Vec::new();
            for _ in 0..param_count {
                let ty = read_ty(section, &mut p)?;
                let by_ref = read_u8(section, &mut p)? != 0;
                params.push(ParamEntry { ty, by_ref });
            }
            let local_count = read_u16(section, &mut p)?;
            let mut locals = Vec::new();
            for _ in 0..local_count {
                let ty = read_ty(section, &mut p)?;
                let is_array = read_u8(section, &mut p)? != 0;
                locals.push(SlotEntry { ty, is_array });
            }
            image.procs.push(ProcEntry {
                name,
                entry,
                params,
                locals,
                ret,
            });
        }

        let section = read_section(bytes, &mut pos)?;
        let mut p = 0usize;
        let count = read_u32(section, &mut p)?;
        for _ in 0..count {
            let item = match read_u8(section, &mut p)? {
                0 => DataLit::Int(i64::from_le_bytes(
                    read_bytes(section, &mut p, 8)?.try_into().unwrap(),
                )),
                1 => DataLit::Float(f64::from_le_bytes(
                    read_bytes(section, &mut p, 8)?.try_into().unwrap(),
                )),
                2 => DataLit::Text(read_str(section, &mut p)?),
                _ => return Err(ImageError::BadEncoding("data tag")),
            };
            image.data.push(item);
        }

        let section = read_section(bytes, &mut pos)?;
        let mut p = 0usize;
        let count = read_u32(section, &mut p)?;
        for _ in 0..count {
            image.code.push(read_op(section, &mut p)?);
        }

        let section = read_section(bytes, &mut pos)?;
        let mut p = 0usize;
        let count = read_u32(section, &mut p)?;
        for _ in 0..count {
            let name = read_str(section, &mut p)?;
            let pc = read_u32(section, &mut p)?;
            image.labels.push((name, pc));
        }

        let section = read_section(bytes, &mut pos)?;
        let mut p = 0usize;
        let count = read_u32(section, &mut p)?;
        for _ in 0..count {
            let pc = read_u32(section, &mut p)?;
            let line = read_u32(section, &mut p)?;
            let col = read_u32(section, &mut p)?;
            image.source_map.push((pc, line, col));
        }

        Ok(image)
    }
}

// ----- primitive writers/readers -----

fn write_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn write_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn write_str(out: &mut Vec<u8>, s: &str) {
    write_u32(out, s.len() as u32);
    out.extend_from_slice(s.as_bytes());
}

fn write_section(out: &mut Vec<u8>, fill: impl FnOnce(&mut Vec<u8>)) {
    let mut buf = Vec::new();
    fill(&mut buf);
    write_u32(out, buf.len() as u32);
    out.extend_from_slice(&buf);
}

fn read_bytes<'a>(bytes: &'a [u8], pos: &mut usize, len: usize) -> Result<&'a [u8]> {
    if *pos + len > bytes.len() {
        return Err(ImageError::Truncated);
    }
    let slice = &bytes[*pos..*pos + len];
    *pos += len;
    Ok(slice)
}

fn read_u8(bytes: &[u8], pos: &mut usize) -> Result<u8> {
    Ok(read_bytes(bytes, pos, 1)?[0])
}

fn read_u16(bytes: &[u8], pos: &mut usize) -> Result<u16> {
    Ok(u16::from_le_bytes(
        read_bytes(bytes, pos, 2)?.try_into().unwrap(),
    ))
}

fn read_u32(bytes: &[u8], pos: &mut usize) -> Result<u32> {
    Ok(u32::from_le_bytes(
        read_bytes(bytes, pos, 4)?.try_into().unwrap(),
    ))
}

fn read_str(bytes: &[u8], pos: &mut usize) -> Result<String> {
    let len = read_u32(bytes, pos)? as usize;
    let slice = read_bytes(bytes, pos, len)?;
    String::from_utf8(slice.to_vec()).map_err(|_| ImageError::BadEncoding("utf-8"))
}

fn read_section<'a>(bytes: &'a [u8], pos: &mut usize) -> Result<&'a [u8]> {
    let len = read_u32(bytes, pos)? as usize;
    read_bytes(bytes, pos, len)
}

// ----- typed payloads -----

fn write_ty(out: &mut Vec<u8>, ty: Ty) {
    match ty {
        Ty::Int16 => out.push(0),
        Ty::Int32 => out.push(1),
        Ty::Int64 => out.push(2),
        Ty::UInt32 => out.push(3),
        Ty::Single => out.push(4),
        Ty::Double => out.push(5),
        Ty::Str => out.push(6),
        Ty::FixedStr(n) => {
            out.push(7);
            write_u16(out, n);
        }
        Ty::Record(id) => {
            out.push(8);
            write_u16(out, id);
        }
    }
}

fn read_ty(bytes: &[u8], pos: &mut usize) -> Result<Ty> {
    Ok(match read_u8(bytes, pos)? {
        0 => Ty::Int16,
        1 => Ty::Int32,
        2 => Ty::Int64,
        3 => Ty::UInt32,
        4 => Ty::Single,
        5 => Ty::Double,
        6 => Ty::Str,
        7 => Ty::FixedStr(read_u16(bytes, pos)?),
        8 => Ty::Record(read_u16(bytes, pos)?),
        _ => return Err(ImageError::BadEncoding("type tag")),
    })
}

fn write_const(out: &mut Vec<u8>, val: &Val) {
    match val {
        Val::Int16(n) => {
            out.push(0);
            out.extend_from_slice(&n.to_le_bytes());
        }
        Val::Int32(n) => {
            out.push(1);
            out.extend_from_slice(&n.to_le_bytes());
        }
        Val::Int64(n) => {
            out.push(2);
            out.extend_from_slice(&n.to_le_bytes());
        }
        Val::UInt32(n) => {
            out.push(3);
            out.extend_from_slice(&n.to_le_bytes());
        }
        Val::Single(n) => {
            out.push(4);
            out.extend_from_slice(&n.to_le_bytes());
        }
        Val::Double(n) => {
            out.push(5);
            out.extend_from_slice(&n.to_le_bytes());
        }
        Val::Str(s) => {
            out.push(6);
            write_str(out, s);
        }
        other => unreachable!("{:?} cannot appear in the constant pool", other),
    }
}

fn read_const(bytes: &[u8], pos: &mut usize) -> Result<Val> {
    Ok(match read_u8(bytes, pos)? {
        0 => Val::Int16(i16::from_le_bytes(
            read_bytes(bytes, pos, 2)?.try_into().unwrap(),
        )),
        1 => Val::Int32(i32::from_le_bytes(
            read_bytes(bytes, pos, 4)?.try_into().unwrap(),
        )),
        2 => Val::Int64(i64::from_le_bytes(
            read_bytes(bytes, pos, 8)?.try_into().unwrap(),
        )),
        3 => Val::UInt32(u32::from_le_bytes(
            read_bytes(bytes, pos, 4)?.try_into().unwrap(),
        )),
        4 => Val::Single(f32::from_le_bytes(
            read_bytes(bytes, pos, 4)?.try_into().unwrap(),
        )),
        5 => Val::Double(f64::from_le_bytes(
            read_bytes(bytes, pos, 8)?.try_into().unwrap(),
        )),
        6 => Val::Str(read_str(bytes, pos)?),
        _ => return Err(ImageError::BadEncoding("constant tag")),
    })
}

fn cmp_code(op: CmpOp) -> u8 {
    match op {
        CmpOp::Eq => 0,
        CmpOp::Ne => 1,
        CmpOp::Lt => 2,
        CmpOp::Le => 3,
        CmpOp::Gt => 4,
        CmpOp::Ge => 5,
    }
}

fn cmp_from(code: u8) -> Result<CmpOp> {
    Ok(match code {
        0 => CmpOp::Eq,
        1 => CmpOp::Ne,
        2 => CmpOp::Lt,
        3 => CmpOp::Le,
        4 => CmpOp::Gt,
        5 => CmpOp::Ge,
        _ => return Err(ImageError::BadEncoding("compare op")),
    })
}

fn mode_code(mode: OpenMode) -> u8 {
    match mode {
        OpenMode::Input => 0,
        OpenMode::Output => 1,
        OpenMode::Append => 2,
        OpenMode::Binary => 3,
        OpenMode::Random => 4,
    }
}

fn mode_from(code: u8) -> Result<OpenMode> {
    Ok(match code {
        0 => OpenMode::Input,
        1 => OpenMode::Output,
        2 => OpenMode::Append,
        3 => OpenMode::Binary,
        4 => OpenMode::Random,
        _ => return Err(ImageError::BadEncoding("open mode")),
    })
}

/// Index doubles as the wire code for built-ins.
const BUILTIN_CODES: &[Builtin] = &[
    Builtin::Abs,
    Builtin::Asc,
    Builtin::Atn,
    Builtin::Cdbl,
    Builtin::Chr,
    Builtin::Cint,
    Builtin::Clng,
    Builtin::Cos,
    Builtin::Csng,
    Builtin::Eof,
    Builtin::Exp,
    Builtin::Fix,
    Builtin::Instr,
    Builtin::Int,
    Builtin::Lbound,
    Builtin::Lcase,
    Builtin::Left,
    Builtin::Len,
    Builtin::Log,
    Builtin::Ltrim,
    Builtin::Mid,
    Builtin::Right,
    Builtin::Rnd,
    Builtin::Rtrim,
    Builtin::Sgn,
    Builtin::Sin,
    Builtin::Space,
    Builtin::Sqr,
    Builtin::Str,
    Builtin::StringRep,
    Builtin::Tan,
    Builtin::Timer,
    Builtin::Ubound,
    Builtin::Ucase,
    Builtin::Val,
];

fn builtin_code(builtin: Builtin) -> u8 {
    BUILTIN_CODES
        .iter()
        .position(|&b| b == builtin)
        .expect("builtin in wire table") as u8
}

fn builtin_from(code: u8) -> Result<Builtin> {
    BUILTIN_CODES
        .get(code as usize)
        .copied()
        .ok_or(ImageError::BadEncoding("builtin"))
}

fn write_slot(out: &mut Vec<u8>, global: bool, slot: u16) {
    out.push(global as u8);
    write_u16(out, slot);
}

fn read_slot(bytes: &[u8], pos: &mut usize) -> Result<(bool, u16)> {
    let global = read_u8(bytes, pos)? != 0;
    let slot = read_u16(bytes, pos)?;
    Ok((global, slot))
}

fn write_op(out: &mut Vec<u8>, op: &Opcode) {
    use Opcode::*;
    match op {
        PushConst(k) => {
            out.push(0x01);
            write_u32(out, *k);
        }
        Pop => out.push(0x02),
        Dup => out.push(0x03),
        Swap => out.push(0x04),
        LoadLocal(i) => {
            out.push(0x05);
            write_u16(out, *i);
        }
        StoreLocal(i) => {
            out.push(0x06);
            write_u16(out, *i);
        }
        LoadGlobal(i) => {
            out.push(0x07);
            write_u16(out, *i);
        }
        StoreGlobal(i) => {
            out.push(0x08);
            write_u16(out, *i);
        }
        FieldGet(i) => {
            out.push(0x09);
            write_u16(out, *i);
        }
        FieldSet(i) => {
            out.push(0x0A);
            write_u16(out, *i);
        }
        IndexGet { global, slot, dims } => {
            out.push(0x0B);
            write_slot(out, *global, *slot);
            out.push(*dims);
        }
        IndexSet { global, slot, dims } => {
            out.push(0x0C);
            write_slot(out, *global, *slot);
            out.push(*dims);
        }
        DimArray { global, slot, dims } => {
            out.push(0x0D);
            write_slot(out, *global, *slot);
            out.push(*dims);
        }
        ArrayBound {
            global,
            slot,
            upper,
        } => {
            out.push(0x0E);
            write_slot(out, *global, *slot);
            out.push(*upper as u8);
        }
        Add => out.push(0x10),
        Sub => out.push(0x11),
        Mul => out.push(0x12),
        Div => out.push(0x13),
        IntDiv => out.push(0x14),
        Mod => out.push(0x15),
        Pow => out.push(0x16),
        Neg => out.push(0x17),
        Cmp(op) => {
            out.push(0x18);
            out.push(cmp_code(*op));
        }
        And => out.push(0x19),
        Or => out.push(0x1A),
        Not => out.push(0x1B),
        Concat => out.push(0x1C),
        Coerce(ty) => {
            out.push(0x1D);
            write_ty(out, *ty);
        }
        Jmp(a) => {
            out.push(0x20);
            write_u32(out, *a);
        }
        JmpIfFalse(a) => {
            out.push(0x21);
            write_u32(out, *a);
        }
        JmpIfTrue(a) => {
            out.push(0x22);
            write_u32(out, *a);
        }
        ForInit { global, slot, exit } => {
            out.push(0x23);
            write_slot(out, *global, *slot);
            write_u32(out, *exit);
        }
        ForStep { global, slot, back } => {
            out.push(0x24);
            write_slot(out, *global, *slot);
            write_u32(out, *back);
        }
        ForEnd => out.push(0x25),
        Gosub(a) => {
            out.push(0x26);
            write_u32(out, *a);
        }
        RetSub => out.push(0x27),
        RetSubTo(a) => {
            out.push(0x28);
            write_u32(out, *a);
        }
        Call { proc, argc } => {
            out.push(0x29);
            write_u16(out, *proc);
            out.push(*argc);
        }
        Ret => out.push(0x2A),
        PrintItem => out.push(0x30),
        PrintZone => out.push(0x31),
        PrintRaw => out.push(0x32),
        PrintEol => out.push(0x33),
        WriteItem => out.push(0x34),
        OutChannel => out.push(0x35),
        OutConsole => out.push(0x36),
        InputRead(n) => {
            out.push(0x37);
            out.push(*n);
        }
        InputField(ty) => {
            out.push(0x38);
            write_ty(out, *ty);
        }
        LineInputRead => out.push(0x39),
        ChanInputRead(n) => {
            out.push(0x3A);
            out.push(*n);
        }
        ChanLineInput => out.push(0x3B),
        Open(mode) => {
            out.push(0x3C);
            out.push(mode_code(*mode));
        }
        Close => out.push(0x3D),
        CloseAll => out.push(0x3E),
        Cls => out.push(0x3F),
        ReadData(ty) => {
            out.push(0x40);
            write_ty(out, *ty);
        }
        RestoreData(i) => {
            out.push(0x41);
            write_u32(out, *i);
        }
        Rnd { arg } => {
            out.push(0x42);
            out.push(*arg as u8);
        }
        Randomize => out.push(0x43),
        Timer => out.push(0x44),
        Intrinsic { builtin, argc } => {
            out.push(0x45);
            out.push(builtin_code(*builtin));
            out.push(*argc);
        }
        Halt => out.push(0x50),
    }
}

fn read_op(bytes: &[u8], pos: &mut usize) -> Result<Opcode> {
    use Opcode::*;
    Ok(match read_u8(bytes, pos)? {
        0x01 => PushConst(read_u32(bytes, pos)?),
        0x02 => Pop,
        0x03 => Dup,
        0x04 => Swap,
        0x05 => LoadLocal(read_u16(bytes, pos)?),
        0x06 => StoreLocal(read_u16(bytes, pos)?),
        0x07 => LoadGlobal(read_u16(bytes, pos)?),
        0x08 => StoreGlobal(read_u16(bytes, pos)?),
        0x09 => FieldGet(read_u16(bytes, pos)?),
        0x0A => FieldSet(read_u16(bytes, pos)?),
        0x0B => {
            let (global, slot) = read_slot(bytes, pos)?;
            let dims = read_u8(bytes, pos)?;
            IndexGet { global, slot, dims }
        }
        0x0C => {
            let (global, slot) = read_slot(bytes, pos)?;
            let dims = read_u8(bytes, pos)?;
            IndexSet { global, slot, dims }
        }
        0x0D => {
            let (global, slot) = read_slot(bytes, pos)?;
            let dims = read_u8(bytes, pos)?;
            DimArray { global, slot, dims }
        }
        0x0E => {
            let (global, slot) = read_slot(bytes, pos)?;
            let upper = read_u8(bytes, pos)? != 0;
            ArrayBound {
                global,
                slot,
                upper,
            }
        }
        0x10 => Add,
        0x11 => Sub,
        0x12 => Mul,
        0x13 => Div,
        0x14 => IntDiv,
        0x15 => Mod,
        0x16 => Pow,
        0x17 => Neg,
        0x18 => Cmp(cmp_from(read_u8(bytes, pos)?)?),
        0x19 => And,
        0x1A => Or,
        0x1B => Not,
        0x1C => Concat,
        0x1D => Coerce(read_ty(bytes, pos)?),
        0x20 => Jmp(read_u32(bytes, pos)?),
        0x21 => JmpIfFalse(read_u32(bytes, pos)?),
        0x22 => JmpIfTrue(read_u32(bytes, pos)?),
        0x23 => {
            let (global, slot) = read_slot(bytes, pos)?;
            let exit = read_u32(bytes, pos)?;
            ForInit { global, slot, exit }
        }
        0x24 => {
            let (global, slot) = read_slot(bytes, pos)?;
            let back = read_u32(bytes, pos)?;
            ForStep { global, slot, back }
        }
        0x25 => ForEnd,
        0x26 => Gosub(read_u32(bytes, pos)?),
        0x27 => RetSub,
        0x28 => RetSubTo(read_u32(bytes, pos)?),
        0x29 => {
            let proc = read_u16(bytes, pos)?;
            let argc = read_u8(bytes, pos)?;
            Call { proc, argc }
        }
        0x2A => Ret,
        0x30 => PrintItem,
        0x31 => PrintZone,
        0x32 => PrintRaw,
        0x33 => PrintEol,
        0x34 => WriteItem,
        0x35 => OutChannel,
        0x36 => OutConsole,
        0x37 => InputRead(read_u8(bytes, pos)?),
        0x38 => InputField(read_ty(bytes, pos)?),
        0x39 => LineInputRead,
        0x3A => ChanInputRead(read_u8(bytes, pos)?),
        0x3B => ChanLineInput,
        0x3C => Open(mode_from(read_u8(bytes, pos)?)?),
        0x3D => Close,
        0x3E => CloseAll,
        0x3F => Cls,
        0x40 => ReadData(read_ty(bytes, pos)?),
        0x41 => RestoreData(read_u32(bytes, pos)?),
        0x42 => Rnd {
            arg: read_u8(bytes, pos)? != 0,
        },
        0x43 => Randomize,
        0x44 => Timer,
        0x45 => {
            let builtin = builtin_from(read_u8(bytes, pos)?)?;
            let argc = read_u8(bytes, pos)?;
            Intrinsic { builtin, argc }
        }
        0x50 => Halt,
        _ => return Err(ImageError::BadEncoding("opcode")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_magic_is_unsupported() {
        let bytes = b"NOPE\x01\x00\x00\x00";
        assert_eq!(
            Image::read_bytes(bytes).unwrap_err(),
            ImageError::UnsupportedImage
        );
    }

    #[test]
    fn test_future_version_is_unsupported() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&MAGIC);
        bytes.extend_from_slice(&2u16.to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes());
        assert_eq!(
            Image::read_bytes(&bytes).unwrap_err(),
            ImageError::UnsupportedImage
        );
    }
}
