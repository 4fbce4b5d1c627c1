pub mod arena;
pub mod context;
pub mod cost;
pub mod cpu;
pub mod decoder;
pub mod effects;
pub mod error;
pub mod features;
pub mod instruction;
pub mod memory;
pub mod metering;
pub mod program;
pub mod registers;
pub mod sys_call;
pub mod vm;

pub use crate::effects::{Effects, ExecResult};
pub use crate::error::{LayoutError, VmFault};
pub use crate::vm::{InputSlice, InvocationInput, Vm};

/// A 32-byte account address identifying one input sub-slice.
pub type Pubkey = [u8; 32];
