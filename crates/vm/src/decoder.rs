//! Wire-format decoding.
//!
//! Instructions are fixed 8-byte slots: opcode byte, destination and source
//! register packed in one byte (destination in the low nibble), a signed
//! 16-bit offset and a signed 32-bit immediate, all little-endian. The
//! `lddw` form spans two consecutive slots; its continuation slot must have
//! a zero opcode.
//!
//! Decoding is total at slot granularity: encodings the VM does not know
//! become [`Instruction::Illegal`] and fault only if executed, so dead
//! garbage in the text section cannot prevent a program from loading.

use thiserror::Error;

use crate::instruction::{AccessSize, AluOp, ByteOrder, Instruction, JumpCond, Src};
use crate::registers::{FRAME_POINTER, LAST_WRITABLE};

/// Bytes per instruction slot.
pub const SLOT_BYTES: usize = 8;

/// Raw opcode bytes, grouped the way the ISA groups them.
pub mod opc {
    // ALU, immediate and register forms, 32- and 64-bit classes.
    pub const ADD32_IMM: u8 = 0x04;
    pub const ADD32_REG: u8 = 0x0c;
    pub const ADD64_IMM: u8 = 0x07;
    pub const ADD64_REG: u8 = 0x0f;
    pub const SUB32_IMM: u8 = 0x14;
    pub const SUB32_REG: u8 = 0x1c;
    pub const SUB64_IMM: u8 = 0x17;
    pub const SUB64_REG: u8 = 0x1f;
    pub const MUL32_IMM: u8 = 0x24;
    pub const MUL32_REG: u8 = 0x2c;
    pub const MUL64_IMM: u8 = 0x27;
    pub const MUL64_REG: u8 = 0x2f;
    pub const DIV32_IMM: u8 = 0x34;
    pub const DIV32_REG: u8 = 0x3c;
    pub const DIV64_IMM: u8 = 0x37;
    pub const DIV64_REG: u8 = 0x3f;
    pub const OR32_IMM: u8 = 0x44;
    pub const OR32_REG: u8 = 0x4c;
    pub const OR64_IMM: u8 = 0x47;
    pub const OR64_REG: u8 = 0x4f;
    pub const AND32_IMM: u8 = 0x54;
    pub const AND32_REG: u8 = 0x5c;
    pub const AND64_IMM: u8 = 0x57;
    pub const AND64_REG: u8 = 0x5f;
    pub const LSH32_IMM: u8 = 0x64;
    pub const LSH32_REG: u8 = 0x6c;
    pub const LSH64_IMM: u8 = 0x67;
    pub const LSH64_REG: u8 = 0x6f;
    pub const RSH32_IMM: u8 = 0x74;
    pub const RSH32_REG: u8 = 0x7c;
    pub const RSH64_IMM: u8 = 0x77;
    pub const RSH64_REG: u8 = 0x7f;
    pub const NEG32: u8 = 0x84;
    pub const NEG64: u8 = 0x87;
    pub const MOD32_IMM: u8 = 0x94;
    pub const MOD32_REG: u8 = 0x9c;
    pub const MOD64_IMM: u8 = 0x97;
    pub const MOD64_REG: u8 = 0x9f;
    pub const XOR32_IMM: u8 = 0xa4;
    pub const XOR32_REG: u8 = 0xac;
    pub const XOR64_IMM: u8 = 0xa7;
    pub const XOR64_REG: u8 = 0xaf;
    pub const MOV32_IMM: u8 = 0xb4;
    pub const MOV32_REG: u8 = 0xbc;
    pub const MOV64_IMM: u8 = 0xb7;
    pub const MOV64_REG: u8 = 0xbf;
    pub const ARSH32_IMM: u8 = 0xc4;
    pub const ARSH32_REG: u8 = 0xcc;
    pub const ARSH64_IMM: u8 = 0xc7;
    pub const ARSH64_REG: u8 = 0xcf;
    pub const LE: u8 = 0xd4;
    pub const BE: u8 = 0xdc;

    // Loads and stores.
    pub const LDDW: u8 = 0x18;
    pub const LDXW: u8 = 0x61;
    pub const LDXH: u8 = 0x69;
    pub const LDXB: u8 = 0x71;
    pub const LDXDW: u8 = 0x79;
    pub const STW: u8 = 0x62;
    pub const STH: u8 = 0x6a;
    pub const STB: u8 = 0x72;
    pub const STDW: u8 = 0x7a;
    pub const STXW: u8 = 0x63;
    pub const STXH: u8 = 0x6b;
    pub const STXB: u8 = 0x73;
    pub const STXDW: u8 = 0x7b;

    // Control flow.
    pub const JA: u8 = 0x05;
    pub const JEQ_IMM: u8 = 0x15;
    pub const JEQ_REG: u8 = 0x1d;
    pub const JGT_IMM: u8 = 0x25;
    pub const JGT_REG: u8 = 0x2d;
    pub const JGE_IMM: u8 = 0x35;
    pub const JGE_REG: u8 = 0x3d;
    pub const JSET_IMM: u8 = 0x45;
    pub const JSET_REG: u8 = 0x4d;
    pub const JNE_IMM: u8 = 0x55;
    pub const JNE_REG: u8 = 0x5d;
    pub const JSGT_IMM: u8 = 0x65;
    pub const JSGT_REG: u8 = 0x6d;
    pub const JSGE_IMM: u8 = 0x75;
    pub const JSGE_REG: u8 = 0x7d;
    pub const CALL: u8 = 0x85;
    pub const CALLX: u8 = 0x8d;
    pub const EXIT: u8 = 0x95;
    pub const JLT_IMM: u8 = 0xa5;
    pub const JLT_REG: u8 = 0xad;
    pub const JLE_IMM: u8 = 0xb5;
    pub const JLE_REG: u8 = 0xbd;
    pub const JSLT_IMM: u8 = 0xc5;
    pub const JSLT_REG: u8 = 0xcd;
    pub const JSLE_IMM: u8 = 0xd5;
    pub const JSLE_REG: u8 = 0xdd;
}

/// Structural decode failures. Anything not listed here decodes to
/// [`Instruction::Illegal`] instead of failing the load.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("text length {0} is not a multiple of the slot width")]
    UnalignedText(usize),
    #[error("trailing multi-slot instruction is truncated")]
    DanglingLddw,
}

/// One raw slot, exactly as laid out on the wire.
#[derive(Debug, Clone, Copy)]
pub struct RawSlot {
    pub op: u8,
    pub dst: u8,
    pub src: u8,
    pub offset: i16,
    pub imm: i32,
}

impl RawSlot {
    pub fn parse(bytes: &[u8; 8]) -> Self {
        Self {
            op: bytes[0],
            dst: bytes[1] & 0x0f,
            src: bytes[1] >> 4,
            offset: i16::from_le_bytes([bytes[2], bytes[3]]),
            imm: i32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        }
    }
}

/// Decodes a whole text section into one [`Instruction`] per slot.
pub fn decode_program(text: &[u8]) -> Result<Vec<Instruction>, DecodeError> {
    if text.len() % SLOT_BYTES != 0 {
        return Err(DecodeError::UnalignedText(text.len()));
    }
    let slots: Vec<RawSlot> = text
        .chunks_exact(SLOT_BYTES)
        .map(|c| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(c);
            RawSlot::parse(&raw)
        })
        .collect();

    let mut out = Vec::with_capacity(slots.len());
    let mut pc = 0usize;
    while pc < slots.len() {
        let slot = slots[pc];
        if slot.op == opc::LDDW {
            let Some(tail) = slots.get(pc + 1) else {
                return Err(DecodeError::DanglingLddw);
            };
            if tail.op == 0 && slot.dst <= LAST_WRITABLE {
                let imm =
                    (slot.imm as u32 as u64) | ((tail.imm as u32 as u64) << 32);
                out.push(Instruction::LoadImm64 { dst: slot.dst, imm });
                out.push(Instruction::LoadImm64Tail);
                pc += 2;
                continue;
            }
            out.push(Instruction::Illegal);
            pc += 1;
            continue;
        }
        out.push(decode_slot(slot));
        pc += 1;
    }
    Ok(out)
}

fn writable(dst: u8) -> bool {
    dst <= LAST_WRITABLE
}

fn readable(reg: u8) -> bool {
    reg <= FRAME_POINTER
}

fn alu(op: AluOp, slot: RawSlot, wide: bool, reg_src: bool) -> Instruction {
    if !writable(slot.dst) || (reg_src && !readable(slot.src)) {
        return Instruction::Illegal;
    }
    let src = if reg_src {
        Src::Reg(slot.src)
    } else {
        Src::Imm(slot.imm)
    };
    if wide {
        Instruction::Alu64 { op, dst: slot.dst, src }
    } else {
        Instruction::Alu32 { op, dst: slot.dst, src }
    }
}

fn load(size: AccessSize, slot: RawSlot) -> Instruction {
    if !writable(slot.dst) || !readable(slot.src) {
        return Instruction::Illegal;
    }
    Instruction::Load { size, dst: slot.dst, base: slot.src, offset: slot.offset }
}

fn store(size: AccessSize, slot: RawSlot, reg_src: bool) -> Instruction {
    if !readable(slot.dst) || (reg_src && !readable(slot.src)) {
        return Instruction::Illegal;
    }
    let src = if reg_src {
        Src::Reg(slot.src)
    } else {
        Src::Imm(slot.imm)
    };
    Instruction::Store { size, base: slot.dst, offset: slot.offset, src }
}

fn branch(cond: JumpCond, slot: RawSlot, reg_src: bool) -> Instruction {
    if !readable(slot.dst) || (reg_src && !readable(slot.src)) {
        return Instruction::Illegal;
    }
    let src = if reg_src {
        Src::Reg(slot.src)
    } else {
        Src::Imm(slot.imm)
    };
    Instruction::Branch { cond, dst: slot.dst, src, offset: slot.offset }
}

fn byte_swap(order: ByteOrder, slot: RawSlot) -> Instruction {
    let width = slot.imm as u32;
    if !writable(slot.dst) || !matches!(width, 16 | 32 | 64) {
        return Instruction::Illegal;
    }
    Instruction::ByteSwap { order, dst: slot.dst, width }
}

/// Decodes one slot. Total: never fails, unknown encodings become
/// [`Instruction::Illegal`].
pub fn decode_slot(slot: RawSlot) -> Instruction {
    use AluOp::*;
    match slot.op {
        opc::ADD32_IMM => alu(Add, slot, false, false),
        opc::ADD32_REG => alu(Add, slot, false, true),
        opc::ADD64_IMM => alu(Add, slot, true, false),
        opc::ADD64_REG => alu(Add, slot, true, true),
        opc::SUB32_IMM => alu(Sub, slot, false, false),
        opc::SUB32_REG => alu(Sub, slot, false, true),
        opc::SUB64_IMM => alu(Sub, slot, true, false),
        opc::SUB64_REG => alu(Sub, slot, true, true),
        opc::MUL32_IMM => alu(Mul, slot, false, false),
        opc::MUL32_REG => alu(Mul, slot, false, true),
        opc::MUL64_IMM => alu(Mul, slot, true, false),
        opc::MUL64_REG => alu(Mul, slot, true, true),
        opc::DIV32_IMM => alu(Div, slot, false, false),
        opc::DIV32_REG => alu(Div, slot, false, true),
        opc::DIV64_IMM => alu(Div, slot, true, false),
        opc::DIV64_REG => alu(Div, slot, true, true),
        opc::OR32_IMM => alu(Or, slot, false, false),
        opc::OR32_REG => alu(Or, slot, false, true),
        opc::OR64_IMM => alu(Or, slot, true, false),
        opc::OR64_REG => alu(Or, slot, true, true),
        opc::AND32_IMM => alu(And, slot, false, false),
        opc::AND32_REG => alu(And, slot, false, true),
        opc::AND64_IMM => alu(And, slot, true, false),
        opc::AND64_REG => alu(And, slot, true, true),
        opc::LSH32_IMM => alu(Lsh, slot, false, false),
        opc::LSH32_REG => alu(Lsh, slot, false, true),
        opc::LSH64_IMM => alu(Lsh, slot, true, false),
        opc::LSH64_REG => alu(Lsh, slot, true, true),
        opc::RSH32_IMM => alu(Rsh, slot, false, false),
        opc::RSH32_REG => alu(Rsh, slot, false, true),
        opc::RSH64_IMM => alu(Rsh, slot, true, false),
        opc::RSH64_REG => alu(Rsh, slot, true, true),
        opc::NEG32 => alu(Neg, slot, false, false),
        opc::NEG64 => alu(Neg, slot, true, false),
        opc::MOD32_IMM => alu(Mod, slot, false, false),
        opc::MOD32_REG => alu(Mod, slot, false, true),
        opc::MOD64_IMM => alu(Mod, slot, true, false),
        opc::MOD64_REG => alu(Mod, slot, true, true),
        opc::XOR32_IMM => alu(Xor, slot, false, false),
        opc::XOR32_REG => alu(Xor, slot, false, true),
        opc::XOR64_IMM => alu(Xor, slot, true, false),
        opc::XOR64_REG => alu(Xor, slot, true, true),
        opc::MOV32_IMM => alu(Mov, slot, false, false),
        opc::MOV32_REG => alu(Mov, slot, false, true),
        opc::MOV64_IMM => alu(Mov, slot, true, false),
        opc::MOV64_REG => alu(Mov, slot, true, true),
        opc::ARSH32_IMM => alu(Arsh, slot, false, false),
        opc::ARSH32_REG => alu(Arsh, slot, false, true),
        opc::ARSH64_IMM => alu(Arsh, slot, true, false),
        opc::ARSH64_REG => alu(Arsh, slot, true, true),
        opc::LE => byte_swap(ByteOrder::Le, slot),
        opc::BE => byte_swap(ByteOrder::Be, slot),

        opc::LDXW => load(AccessSize::Word, slot),
        opc::LDXH => load(AccessSize::Half, slot),
        opc::LDXB => load(AccessSize::Byte, slot),
        opc::LDXDW => load(AccessSize::Dword, slot),
        opc::STW => store(AccessSize::Word, slot, false),
        opc::STH => store(AccessSize::Half, slot, false),
        opc::STB => store(AccessSize::Byte, slot, false),
        opc::STDW => store(AccessSize::Dword, slot, false),
        opc::STXW => store(AccessSize::Word, slot, true),
        opc::STXH => store(AccessSize::Half, slot, true),
        opc::STXB => store(AccessSize::Byte, slot, true),
        opc::STXDW => store(AccessSize::Dword, slot, true),

        opc::JA => Instruction::Ja { offset: slot.offset },
        opc::JEQ_IMM => branch(JumpCond::Eq, slot, false),
        opc::JEQ_REG => branch(JumpCond::Eq, slot, true),
        opc::JGT_IMM => branch(JumpCond::Gt, slot, false),
        opc::JGT_REG => branch(JumpCond::Gt, slot, true),
        opc::JGE_IMM => branch(JumpCond::Ge, slot, false),
        opc::JGE_REG => branch(JumpCond::Ge, slot, true),
        opc::JSET_IMM => branch(JumpCond::Set, slot, false),
        opc::JSET_REG => branch(JumpCond::Set, slot, true),
        opc::JNE_IMM => branch(JumpCond::Ne, slot, false),
        opc::JNE_REG => branch(JumpCond::Ne, slot, true),
        opc::JSGT_IMM => branch(JumpCond::Sgt, slot, false),
        opc::JSGT_REG => branch(JumpCond::Sgt, slot, true),
        opc::JSGE_IMM => branch(JumpCond::Sge, slot, false),
        opc::JSGE_REG => branch(JumpCond::Sge, slot, true),
        opc::JLT_IMM => branch(JumpCond::Lt, slot, false),
        opc::JLT_REG => branch(JumpCond::Lt, slot, true),
        opc::JLE_IMM => branch(JumpCond::Le, slot, false),
        opc::JLE_REG => branch(JumpCond::Le, slot, true),
        opc::JSLT_IMM => branch(JumpCond::Slt, slot, false),
        opc::JSLT_REG => branch(JumpCond::Slt, slot, true),
        opc::JSLE_IMM => branch(JumpCond::Sle, slot, false),
        opc::JSLE_REG => branch(JumpCond::Sle, slot, true),
        opc::CALL => Instruction::Call { hash: slot.imm as u32 },
        opc::CALLX => {
            let reg = slot.imm as u32;
            if reg > FRAME_POINTER as u32 {
                Instruction::Illegal
            } else {
                Instruction::CallReg { reg: reg as u8 }
            }
        }
        opc::EXIT => Instruction::Exit,

        _ => Instruction::Illegal,
    }
}
