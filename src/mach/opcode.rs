use crate::lang::ast::{CmpOp, OpenMode, Ty};
use crate::lang::Builtin;

/// ## Virtual machine instruction set
///
/// A compact stack machine: no registers, every operand travels through
/// the operand stack. `LET A = 3 * B` compiles to
/// `[PushConst(3), LoadGlobal(B), Mul, StoreGlobal(A)]`.
///
/// Slot-addressed instructions carry `global` because module-level code
/// and procedure frames use separate slot arrays.
#[derive(Debug, Clone, PartialEq)]
pub enum Opcode {
    // *** Stack
    PushConst(u32),
    Pop,
    Dup,
    Swap,

    // *** Locals and globals
    LoadLocal(u16),
    StoreLocal(u16),
    LoadGlobal(u16),
    StoreGlobal(u16),

    // *** Records and arrays
    /// Pop a record, push the field at the index.
    FieldGet(u16),
    /// Pop a value and a record, push the record with the field replaced.
    FieldSet(u16),
    /// Pop `dims` indices, push the element. Bounds are checked here.
    IndexGet { global: bool, slot: u16, dims: u8 },
    /// Pop a value then `dims` indices, store the element.
    IndexSet { global: bool, slot: u16, dims: u8 },
    /// Pop `dims` pairs of inclusive bounds, allocate the array.
    DimArray { global: bool, slot: u16, dims: u8 },
    /// Pop a dimension number, push LBOUND/UBOUND of the array.
    ArrayBound { global: bool, slot: u16, upper: bool },

    // *** Arithmetic and logic
    Add,
    Sub,
    Mul,
    Div,
    IntDiv,
    Mod,
    Pow,
    Neg,
    Cmp(CmpOp),
    And,
    Or,
    Not,
    Concat,
    Coerce(Ty),

    // *** Control
    Jmp(u32),
    JmpIfFalse(u32),
    JmpIfTrue(u32),
    /// Pop step, limit, start; store start in the counter slot; push a
    /// loop frame. Jumps to `exit` when the loop runs zero times.
    ForInit { global: bool, slot: u16, exit: u32 },
    /// Step the counter; jump to `back` to continue, else fall through.
    ForStep { global: bool, slot: u16, back: u32 },
    /// Pop the loop frame.
    ForEnd,
    Gosub(u32),
    RetSub,
    /// RETURN with a target: discard the saved address and jump.
    RetSubTo(u32),
    Call { proc: u16, argc: u8 },
    Ret,

    // *** I/O
    PrintItem,
    PrintZone,
    PrintRaw,
    PrintEol,
    WriteItem,
    /// Pop a channel number; sink output there until `OutConsole`.
    OutChannel,
    OutConsole,
    /// Pop a prompt, read a line, split into `n` comma fields.
    InputRead(u8),
    /// Push the next buffered input field, parsed to the type.
    InputField(Ty),
    /// Pop a prompt, read a whole line, buffer it as a single field.
    LineInputRead,
    /// Pop a channel, read a line from it, split into `n` fields.
    ChanInputRead(u8),
    /// Pop a channel, read a whole line, buffer it as a single field.
    ChanLineInput,
    /// Pop a channel number and a path, open the file.
    Open(OpenMode),
    /// Pop a channel number, close it.
    Close,
    CloseAll,
    Cls,

    // *** DATA, randomness, intrinsics
    ReadData(Ty),
    RestoreData(u32),
    Rnd { arg: bool },
    Randomize,
    Timer,
    Intrinsic { builtin: Builtin, argc: u8 },

    // *** Terminal
    Halt,
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        use Opcode::*;
        match self {
            PushConst(k) => write!(f, "PUSH_CONST {}", k),
            Pop => write!(f, "POP"),
            Dup => write!(f, "DUP"),
            Swap => write!(f, "SWAP"),
            LoadLocal(i) => write!(f, "LOAD_LOCAL {}", i),
            StoreLocal(i) => write!(f, "STORE_LOCAL {}", i),
            LoadGlobal(i) => write!(f, "LOAD_GLOBAL {}", i),
            StoreGlobal(i) => write!(f, "STORE_GLOBAL {}", i),
            FieldGet(i) => write!(f, "FIELD_GET {}", i),
            FieldSet(i) => write!(f, "FIELD_SET {}", i),
            IndexGet { global, slot, dims } => {
                write!(f, "INDEX_GET {}{} /{}", slot_tag(*global), slot, dims)
            }
            IndexSet { global, slot, dims } => {
                write!(f, "INDEX_SET {}{} /{}", slot_tag(*global), slot, dims)
            }
            DimArray { global, slot, dims } => {
                write!(f, "DIM_ARRAY {}{} /{}", slot_tag(*global), slot, dims)
            }
            ArrayBound { global, slot, upper } => write!(
                f,
                "{} {}{}",
                if *upper { "UBOUND" } else { "LBOUND" },
                slot_tag(*global),
                slot
            ),
            Add => write!(f, "ADD"),
            Sub => write!(f, "SUB"),
            Mul => write!(f, "MUL"),
            Div => write!(f, "DIV"),
            IntDiv => write!(f, "IDIV"),
            Mod => write!(f, "MOD"),
            Pow => write!(f, "POW"),
            Neg => write!(f, "NEG"),
            Cmp(op) => write!(f, "CMP {:?}", op),
            And => write!(f, "AND"),
            Or => write!(f, "OR"),
            Not => write!(f, "NOT"),
            Concat => write!(f, "CONCAT"),
            Coerce(ty) => write!(f, "COERCE {}", ty.name()),
            Jmp(a) => write!(f, "JMP {}", a),
            JmpIfFalse(a) => write!(f, "JMP_IF_FALSE {}", a),
            JmpIfTrue(a) => write!(f, "JMP_IF_TRUE {}", a),
            ForInit { global, slot, exit } => {
                write!(f, "FOR_INIT {}{} exit={}", slot_tag(*global), slot, exit)
            }
            ForStep { global, slot, back } => {
                write!(f, "FOR_STEP {}{} back={}", slot_tag(*global), slot, back)
            }
            ForEnd => write!(f, "FOR_END"),
            Gosub(a) => write!(f, "GOSUB {}", a),
            RetSub => write!(f, "RET_SUB"),
            RetSubTo(a) => write!(f, "RET_SUB_TO {}", a),
            Call { proc, argc } => write!(f, "CALL {} /{}", proc, argc),
            Ret => write!(f, "RET"),
            PrintItem => write!(f, "PRINT_ITEM"),
            PrintZone => write!(f, "PRINT_ZONE"),
            PrintRaw => write!(f, "PRINT_RAW"),
            PrintEol => write!(f, "PRINT_EOL"),
            WriteItem => write!(f, "WRITE_ITEM"),
            OutChannel => write!(f, "OUT_CHANNEL"),
            OutConsole => write!(f, "OUT_CONSOLE"),
            InputRead(n) => write!(f, "INPUT_READ {}", n),
            InputField(ty) => write!(f, "INPUT_FIELD {}", ty.name()),
            LineInputRead => write!(f, "LINE_INPUT"),
            ChanInputRead(n) => write!(f, "CHAN_INPUT_READ {}", n),
            ChanLineInput => write!(f, "CHAN_LINE_INPUT"),
            Open(mode) => write!(f, "OPEN {:?}", mode),
            Close => write!(f, "CLOSE"),
            CloseAll => write!(f, "CLOSE_ALL"),
            Cls => write!(f, "CLS"),
            ReadData(ty) => write!(f, "READ_DATA {}", ty.name()),
            RestoreData(i) => write!(f, "RESTORE_DATA {}", i),
            Rnd { arg } => write!(f, "RND{}", if *arg { " /1" } else { "" }),
            Randomize => write!(f, "RANDOMIZE"),
            Timer => write!(f, "TIMER"),
            Intrinsic { builtin, argc } => write!(f, "INTRINSIC {:?} /{}", builtin, argc),
            Halt => write!(f, "HALT"),
        }
    }
}

fn slot_tag(global: bool) -> &'static str {
    if global {
        "g"
    } else {
        "l"
    }
}
