use std::collections::BTreeMap;
use std::rc::Rc;

use crate::decoder::SLOT_BYTES;
use crate::instruction::Instruction;
use crate::memory::{MemoryRegion, Perms, PROGRAM_REGION_START};

/// Hard cap on decoded instructions per program.
pub const MAX_INSTRUCTION_COUNT: usize = 65_536;

/// A resolved call destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallTarget {
    /// Native handler registered under this id.
    Syscall(u32),
    /// Instruction index inside this program's text.
    Internal(u32),
}

/// Loaded, validated, immutable program.
///
/// Built once by the loader and shared (`Rc`) across any number of
/// invocations; nothing here is ever written after load. The call table is
/// closed-world: every `call` in `instructions` resolves here, checked at
/// load time.
#[derive(Debug)]
pub struct ProgramImage {
    /// Instruction index execution starts at.
    pub entry_pc: usize,
    /// One decoded instruction per text slot.
    pub instructions: Vec<Instruction>,
    /// Raw text bytes, mapped read-execute.
    pub text: Rc<Vec<u8>>,
    /// Offset of text inside the program region.
    pub text_off: u64,
    /// Read-only data, mapped read-only.
    pub rodata: Rc<Vec<u8>>,
    /// Offset of rodata inside the program region.
    pub rodata_off: u64,
    /// Hash of symbol name or of target pc, to resolved destination.
    pub call_table: BTreeMap<u32, CallTarget>,
}

impl ProgramImage {
    pub fn text_vaddr(&self) -> u64 {
        PROGRAM_REGION_START + self.text_off
    }

    pub fn rodata_vaddr(&self) -> u64 {
        PROGRAM_REGION_START + self.rodata_off
    }

    /// Memory regions exposing this image to one invocation.
    pub fn regions(&self) -> Vec<MemoryRegion> {
        let mut regions = Vec::with_capacity(2);
        if !self.text.is_empty() {
            regions.push(MemoryRegion::shared(
                self.text_vaddr(),
                Rc::clone(&self.text),
                Perms::RX,
            ));
        }
        if !self.rodata.is_empty() {
            regions.push(MemoryRegion::shared(
                self.rodata_vaddr(),
                Rc::clone(&self.rodata),
                Perms::R,
            ));
        }
        regions
    }

    /// Maps a virtual address to the instruction index it names, for
    /// register-indirect calls. The address must sit on a slot boundary
    /// inside text.
    pub fn pc_at_vaddr(&self, vaddr: u64) -> Option<usize> {
        let base = self.text_vaddr();
        let off = vaddr.checked_sub(base)?;
        if off % SLOT_BYTES as u64 != 0 {
            return None;
        }
        let pc = (off / SLOT_BYTES as u64) as usize;
        (pc < self.instructions.len()).then_some(pc)
    }
}
