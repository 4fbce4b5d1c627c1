use serde::{Deserialize, Serialize};

use crate::Pubkey;

/// The reserved instruction-error code whose nested `custom` value is
/// supplied by the program itself (its nonzero r0 at top-level exit).
pub const INSTRUCTION_ERROR_CUSTOM: u32 = 1;

/// Terminal classification of one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecResult {
    /// Clean exit with r0 == 0.
    Success,
    /// Clean exit with a program-visible error in r0.
    InstructionError { code: u32, custom: Option<u64> },
    /// The VM terminated the program; `code` is a stable
    /// [`crate::error::VmFault`] code.
    Fault { code: u32 },
}

/// Final contents of one writable input sub-slice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModifiedSlice {
    pub pubkey: Pubkey,
    pub data: Vec<u8>,
}

/// The terminal, fully serializable output of one invocation.
///
/// Effects are a pure function of the program image, the invocation input
/// and the syscall registry; a differential harness declares two Effects
/// equal iff every field matches exactly, byte-for-byte on the
/// variable-length ones. Equality derives field-wise, so `==` here is
/// exactly that comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Effects {
    pub result: ExecResult,
    pub compute_units_consumed: u64,
    pub return_data: Vec<u8>,
    pub modified_slices: Vec<ModifiedSlice>,
}
