//! Program image loading.
//!
//! `load` takes a relocatable executable blob and produces an immutable
//! [`ProgramImage`], or rejects it. Loading is all-or-nothing and
//! closed-world: every call target and every relocation must resolve
//! against the program itself or the syscall namespace, so no unresolved
//! reference can survive to execution time.
//!
//! The pipeline has two stages. [`parse`] lifts the container format into
//! a [`RawProgram`] (structural validation only); [`link`] applies
//! relocations, decodes the text and resolves the call table. Keeping the
//! stages separate lets resolution logic be exercised without crafting
//! container bytes.

pub mod elf;

use thiserror::Error;

use vm::decoder::{decode_program, DecodeError, SLOT_BYTES};
use vm::instruction::Instruction;
use vm::memory::PROGRAM_REGION_START;
use vm::program::{CallTarget, ProgramImage, MAX_INSTRUCTION_COUNT};
use vm::sys_call::{hash_internal_pc, hash_symbol_name, SyscallRegistry};

use std::collections::BTreeMap;
use std::rc::Rc;

/// `lddw`-style 64-bit address fixup.
pub const R_BPF_64_64: u32 = 1;
/// Call-immediate fixup.
pub const R_BPF_64_32: u32 = 10;

/// Load failures. Stable and specific: a program either loads completely
/// and deterministically or is rejected with one of these.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("malformed container: {0}")]
    Malformed(String),
    #[error("missing required section {0}")]
    MissingSection(&'static str),
    #[error("duplicate section {0}")]
    DuplicateSection(String),
    #[error("section {0} data out of file bounds")]
    SectionOutOfBounds(String),
    #[error("text length {0} is not a multiple of the slot width")]
    UnalignedText(usize),
    #[error("entry offset {0:#x} outside the text section")]
    EntryOutOfBounds(u64),
    #[error("truncated trailing instruction")]
    TruncatedInstruction,
    #[error("instruction count {0} exceeds the maximum")]
    TooManyInstructions(usize),
    #[error("relocation at text offset {0:#x} out of bounds")]
    RelocationOutOfBounds(u64),
    #[error("unsupported relocation type {0}")]
    UnsupportedRelocation(u32),
    #[error("unresolved import {0:#010x}")]
    UnresolvedImport(u32),
    #[error("text and read-only data overlap")]
    OverlappingSections,
}

impl From<DecodeError> for LoadError {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::UnalignedText(len) => LoadError::UnalignedText(len),
            DecodeError::DanglingLddw => LoadError::TruncatedInstruction,
        }
    }
}

/// One relocation, offsets already rebased onto the text section.
#[derive(Debug, Clone)]
pub struct RawReloc {
    pub r_type: u32,
    /// Byte offset of the patched slot inside text.
    pub offset: u64,
    pub sym_name: Option<String>,
    /// Raw symbol address in the object's address space.
    pub sym_value: u64,
    pub sym_defined: bool,
}

/// Container contents after structural validation, before resolution.
#[derive(Debug, Default)]
pub struct RawProgram {
    pub text: Vec<u8>,
    /// Object address of text; becomes its offset in the program region.
    pub text_off: u64,
    pub rodata: Vec<u8>,
    pub rodata_off: u64,
    /// Entry point as a byte offset into text.
    pub entry_off: u64,
    /// Byte offsets of defined functions inside text.
    pub func_offs: Vec<u64>,
    pub relocs: Vec<RawReloc>,
}

/// Stage 1: container bytes to [`RawProgram`].
pub fn parse(bytes: &[u8]) -> Result<RawProgram, LoadError> {
    let unit = elf::parse_elf(bytes)?;

    let text_len = unit.text.len() as u64;
    let entry_off = unit
        .entry
        .checked_sub(unit.text_addr)
        .filter(|off| *off < text_len)
        .ok_or(LoadError::EntryOutOfBounds(unit.entry))?;

    let func_offs = unit
        .func_vaddrs
        .iter()
        .filter_map(|v| v.checked_sub(unit.text_addr))
        .filter(|off| *off < text_len && off % SLOT_BYTES as u64 == 0)
        .collect();

    let mut relocs = Vec::with_capacity(unit.relocs.len());
    for reloc in unit.relocs {
        let offset = reloc
            .offset
            .checked_sub(unit.text_addr)
            .filter(|off| *off < text_len)
            .ok_or(LoadError::RelocationOutOfBounds(reloc.offset))?;
        relocs.push(RawReloc {
            r_type: reloc.r_type,
            offset,
            sym_name: reloc.sym_name,
            sym_value: reloc.sym_value,
            sym_defined: reloc.sym_defined,
        });
    }

    Ok(RawProgram {
        text: unit.text,
        text_off: unit.text_addr,
        rodata: unit.rodata,
        rodata_off: unit.rodata_addr,
        entry_off,
        func_offs,
        relocs,
    })
}

/// Stage 2: relocation, decoding and call-target resolution.
pub fn link(mut raw: RawProgram, syscalls: &SyscallRegistry) -> Result<ProgramImage, LoadError> {
    if raw.text.len() % SLOT_BYTES != 0 {
        return Err(LoadError::UnalignedText(raw.text.len()));
    }
    let count = raw.text.len() / SLOT_BYTES;
    if count > MAX_INSTRUCTION_COUNT {
        return Err(LoadError::TooManyInstructions(count));
    }
    if raw.entry_off % SLOT_BYTES as u64 != 0 || raw.entry_off >= raw.text.len() as u64 {
        return Err(LoadError::EntryOutOfBounds(raw.entry_off));
    }
    let entry_pc = (raw.entry_off / SLOT_BYTES as u64) as usize;

    // Both segments must fit inside the 4 GiB program region; that also
    // rules out address-space wraparound below.
    const PROGRAM_REGION_SPAN: u64 = 1 << 32;
    let text_end = raw
        .text_off
        .checked_add(raw.text.len() as u64)
        .filter(|end| *end <= PROGRAM_REGION_SPAN)
        .ok_or_else(|| LoadError::SectionOutOfBounds(".text".to_string()))?;
    let rodata_end = raw
        .rodata_off
        .checked_add(raw.rodata.len() as u64)
        .filter(|end| *end <= PROGRAM_REGION_SPAN)
        .ok_or_else(|| LoadError::SectionOutOfBounds(".rodata".to_string()))?;
    if !raw.rodata.is_empty() && raw.text_off < rodata_end && raw.rodata_off < text_end {
        return Err(LoadError::OverlappingSections);
    }

    let mut call_table: BTreeMap<u32, CallTarget> = BTreeMap::new();
    for off in &raw.func_offs {
        let pc = (off / SLOT_BYTES as u64) as u32;
        call_table.insert(hash_internal_pc(pc as u64), CallTarget::Internal(pc));
    }

    let relocs = std::mem::take(&mut raw.relocs);
    for reloc in &relocs {
        let slot = reloc.offset as usize;
        if reloc.offset % SLOT_BYTES as u64 != 0 || slot + SLOT_BYTES > raw.text.len() {
            return Err(LoadError::RelocationOutOfBounds(reloc.offset));
        }
        match reloc.r_type {
            R_BPF_64_32 => {
                let hash = if reloc.sym_defined {
                    let target_off = reloc
                        .sym_value
                        .checked_sub(raw.text_off)
                        .filter(|off| *off < raw.text.len() as u64)
                        .filter(|off| off % SLOT_BYTES as u64 == 0)
                        .ok_or(LoadError::RelocationOutOfBounds(reloc.offset))?;
                    let pc = (target_off / SLOT_BYTES as u64) as u32;
                    let hash = hash_internal_pc(pc as u64);
                    call_table.insert(hash, CallTarget::Internal(pc));
                    hash
                } else {
                    let name = reloc.sym_name.as_deref().unwrap_or("");
                    let id = hash_symbol_name(name.as_bytes());
                    if !syscalls.contains(id) {
                        return Err(LoadError::UnresolvedImport(id));
                    }
                    call_table.insert(id, CallTarget::Syscall(id));
                    id
                };
                raw.text[slot + 4..slot + 8].copy_from_slice(&hash.to_le_bytes());
            }
            R_BPF_64_64 => {
                if slot + 2 * SLOT_BYTES > raw.text.len() {
                    return Err(LoadError::RelocationOutOfBounds(reloc.offset));
                }
                if !reloc.sym_defined {
                    let name = reloc.sym_name.as_deref().unwrap_or("");
                    return Err(LoadError::UnresolvedImport(hash_symbol_name(name.as_bytes())));
                }
                let addend = i32::from_le_bytes([
                    raw.text[slot + 4],
                    raw.text[slot + 5],
                    raw.text[slot + 6],
                    raw.text[slot + 7],
                ]) as i64 as u64;
                let target = reloc.sym_value.wrapping_add(addend);
                let in_text = target >= raw.text_off && target < text_end;
                let in_rodata =
                    !raw.rodata.is_empty() && target >= raw.rodata_off && target < rodata_end;
                if !(in_text || in_rodata) {
                    return Err(LoadError::RelocationOutOfBounds(reloc.offset));
                }
                let vaddr = PROGRAM_REGION_START + target;
                raw.text[slot + 4..slot + 8].copy_from_slice(&(vaddr as u32).to_le_bytes());
                raw.text[slot + 12..slot + 16]
                    .copy_from_slice(&((vaddr >> 32) as u32).to_le_bytes());
            }
            other => return Err(LoadError::UnsupportedRelocation(other)),
        }
    }

    let instructions = decode_program(&raw.text)?;

    // Closed world: every call must resolve now, either through the table
    // built above or directly against the syscall namespace.
    for instruction in &instructions {
        if let Instruction::Call { hash } = instruction {
            if call_table.contains_key(hash) {
                continue;
            }
            if syscalls.contains(*hash) {
                call_table.insert(*hash, CallTarget::Syscall(*hash));
            } else {
                return Err(LoadError::UnresolvedImport(*hash));
            }
        }
    }

    tracing::debug!(
        target: "loader",
        instructions = instructions.len(),
        entry_pc,
        call_targets = call_table.len(),
        "linked program image"
    );

    Ok(ProgramImage {
        entry_pc,
        instructions,
        text: Rc::new(raw.text),
        text_off: raw.text_off,
        rodata: Rc::new(raw.rodata),
        rodata_off: raw.rodata_off,
        call_table,
    })
}

/// `load(bytes) -> ProgramImage | LoadError`, resolving imports against
/// `syscalls`.
pub fn load(bytes: &[u8], syscalls: &SyscallRegistry) -> Result<ProgramImage, LoadError> {
    link(parse(bytes)?, syscalls)
}
