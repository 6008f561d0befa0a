/*!
## Machine module

The back half of the pipeline: the value model, the bytecode emitter, the
serialized image, and the stack virtual machine that executes it.
*/

pub type Address = usize;

mod emit;
mod host;
mod image;
mod link;
mod opcode;
mod operation;
mod runtime;
mod stack;
mod trap;
mod val;

pub use emit::emit;
pub use host::{ChannelIo, Host, StdHost};
pub use image::{Image, ImageError, ParamEntry, ProcEntry, SlotEntry, MAGIC as IMAGE_MAGIC};
pub use opcode::Opcode;
pub use operation::Operation;
pub use runtime::Runtime;
pub use stack::Stack;
pub use trap::{Trap, TrapKind};
pub use val::{default_val, Array, Val};
