//! The fetch-decode-execute loop.
//!
//! Drives an [`ExecutionContext`] from `Ready` to one of its terminal
//! states. Numeric semantics are exact: ALU ops wrap on overflow, shift
//! amounts are masked to the operand width, division by zero faults, and
//! 32-bit results zero-extend. Every retired instruction charges the meter
//! before its effect commits.

use crate::context::{CallFrame, ExecState, ExecutionContext};
use crate::error::VmFault;
use crate::features::Feature;
use crate::instruction::{AluOp, ByteOrder, Instruction, JumpCond, Src};
use crate::program::CallTarget;
use crate::registers::FRAME_POINTER;
use crate::sys_call::SyscallRegistry;

enum StepFlow {
    Continue,
    Halt(u64),
}

/// Stateless execution engine; all mutable state lives in the context.
pub struct Interpreter<'a> {
    syscalls: &'a SyscallRegistry,
}

impl<'a> Interpreter<'a> {
    pub fn new(syscalls: &'a SyscallRegistry) -> Self {
        Self { syscalls }
    }

    /// Runs the context to a terminal state. A context that is not `Ready`
    /// is left untouched: faulted or halted contexts never resume.
    pub fn run(&self, ctx: &mut ExecutionContext) {
        if ctx.state != ExecState::Ready {
            return;
        }
        ctx.state = ExecState::Running;
        loop {
            match self.step(ctx) {
                Ok(StepFlow::Continue) => {}
                Ok(StepFlow::Halt(r0)) => {
                    ctx.state = ExecState::Halted(r0);
                    return;
                }
                Err(VmFault::Cost) => {
                    ctx.state = ExecState::ComputeExhausted;
                    return;
                }
                Err(fault) => {
                    ctx.state = ExecState::Faulted(fault);
                    return;
                }
            }
        }
    }

    fn step(&self, ctx: &mut ExecutionContext) -> Result<StepFlow, VmFault> {
        let instr = *ctx.program.instructions.get(ctx.pc).ok_or(VmFault::Text)?;
        ctx.meter.consume(ctx.cost.instruction)?;
        tracing::trace!(target: "vm", pc = ctx.pc, cu = ctx.meter.remaining(), ?instr);

        let mut next = ctx.pc + 1;
        match instr {
            Instruction::Alu64 { op, dst, src } => {
                let rhs = operand64(ctx, src);
                ctx.regs[dst as usize] = alu64(op, ctx.regs[dst as usize], rhs)?;
            }
            Instruction::Alu32 { op, dst, src } => {
                let rhs = match src {
                    Src::Reg(r) => ctx.regs[r as usize] as u32,
                    Src::Imm(imm) => imm as u32,
                };
                let lhs = ctx.regs[dst as usize] as u32;
                ctx.regs[dst as usize] = alu32(op, lhs, rhs)? as u64;
            }
            Instruction::ByteSwap { order, dst, width } => {
                let v = ctx.regs[dst as usize];
                ctx.regs[dst as usize] = match (order, width) {
                    (ByteOrder::Le, 16) => v as u16 as u64,
                    (ByteOrder::Le, 32) => v as u32 as u64,
                    (ByteOrder::Le, 64) => v,
                    (ByteOrder::Be, 16) => (v as u16).swap_bytes() as u64,
                    (ByteOrder::Be, 32) => (v as u32).swap_bytes() as u64,
                    (ByteOrder::Be, 64) => v.swap_bytes(),
                    _ => return Err(VmFault::Ill),
                };
            }
            Instruction::LoadImm64 { dst, imm } => {
                ctx.regs[dst as usize] = imm;
                next = ctx.pc + 2;
            }
            Instruction::LoadImm64Tail => return Err(VmFault::Split),
            Instruction::Load { size, dst, base, offset } => {
                let addr = ctx.regs[base as usize].wrapping_add(offset as i64 as u64);
                ctx.regs[dst as usize] = ctx.memory.load(size, addr, ctx.strict_align())?;
            }
            Instruction::Store { size, base, offset, src } => {
                let addr = ctx.regs[base as usize].wrapping_add(offset as i64 as u64);
                let value = operand64(ctx, src);
                ctx.memory.store(size, addr, value, ctx.strict_align())?;
            }
            Instruction::Ja { offset } => {
                next = branch_target(ctx.pc, offset)?;
            }
            Instruction::Branch { cond, dst, src, offset } => {
                let lhs = ctx.regs[dst as usize];
                let rhs = operand64(ctx, src);
                if taken(cond, lhs, rhs) {
                    next = branch_target(ctx.pc, offset)?;
                }
            }
            Instruction::Call { hash } => match ctx.program.call_table.get(&hash).copied() {
                Some(CallTarget::Syscall(id)) => {
                    let entry = self.syscalls.get(id).ok_or(VmFault::Call)?;
                    tracing::trace!(target: "vm", syscall = entry.name);
                    let args =
                        [ctx.regs[1], ctx.regs[2], ctx.regs[3], ctx.regs[4], ctx.regs[5]];
                    ctx.regs[0] = (entry.func)(ctx, args)?;
                }
                Some(CallTarget::Internal(pc)) => {
                    let return_pc = ctx.pc + 1;
                    push_frame(ctx, return_pc)?;
                    next = pc as usize;
                }
                None => return Err(VmFault::Call),
            },
            Instruction::CallReg { reg } => {
                if reg == FRAME_POINTER && ctx.features.is_active(Feature::RejectCallxR10) {
                    return Err(VmFault::Call);
                }
                let target = ctx.regs[reg as usize];
                let pc = ctx.program.pc_at_vaddr(target).ok_or(VmFault::Call)?;
                let return_pc = ctx.pc + 1;
                push_frame(ctx, return_pc)?;
                next = pc;
            }
            Instruction::Exit => match ctx.frames.pop() {
                None => return Ok(StepFlow::Halt(ctx.regs[0])),
                Some(frame) => {
                    ctx.regs[6..10].copy_from_slice(&frame.saved);
                    ctx.regs[FRAME_POINTER as usize] = frame.frame_ptr;
                    next = frame.return_pc;
                }
            },
            Instruction::Illegal => return Err(VmFault::Ill),
        }
        ctx.pc = next;
        Ok(StepFlow::Continue)
    }
}

fn operand64(ctx: &ExecutionContext, src: Src) -> u64 {
    match src {
        Src::Reg(r) => ctx.regs[r as usize],
        Src::Imm(imm) => imm as i64 as u64,
    }
}

fn branch_target(pc: usize, offset: i16) -> Result<usize, VmFault> {
    let target = pc as i64 + 1 + offset as i64;
    if target < 0 {
        return Err(VmFault::Text);
    }
    // Targets past the end of text fault at the next fetch.
    Ok(target as usize)
}

fn push_frame(ctx: &mut ExecutionContext, return_pc: usize) -> Result<(), VmFault> {
    if ctx.frames.len() as u64 + 1 >= ctx.cost.max_call_depth {
        return Err(VmFault::Stack);
    }
    let fp = ctx.regs[FRAME_POINTER as usize];
    ctx.frames.push(CallFrame {
        return_pc,
        frame_ptr: fp,
        saved: [ctx.regs[6], ctx.regs[7], ctx.regs[8], ctx.regs[9]],
    });
    let stride = if ctx.features.is_active(Feature::StackFrameGaps) {
        2 * ctx.cost.stack_frame_size
    } else {
        ctx.cost.stack_frame_size
    };
    ctx.regs[FRAME_POINTER as usize] = fp.wrapping_add(stride);
    Ok(())
}

fn alu64(op: AluOp, lhs: u64, rhs: u64) -> Result<u64, VmFault> {
    Ok(match op {
        AluOp::Add => lhs.wrapping_add(rhs),
        AluOp::Sub => lhs.wrapping_sub(rhs),
        AluOp::Mul => lhs.wrapping_mul(rhs),
        AluOp::Div => {
            if rhs == 0 {
                return Err(VmFault::Fpe);
            }
            lhs / rhs
        }
        AluOp::Mod => {
            if rhs == 0 {
                return Err(VmFault::Fpe);
            }
            lhs % rhs
        }
        AluOp::Or => lhs | rhs,
        AluOp::And => lhs & rhs,
        AluOp::Xor => lhs ^ rhs,
        AluOp::Lsh => lhs << (rhs & 63),
        AluOp::Rsh => lhs >> (rhs & 63),
        AluOp::Arsh => ((lhs as i64) >> (rhs & 63)) as u64,
        AluOp::Neg => lhs.wrapping_neg(),
        AluOp::Mov => rhs,
    })
}

fn alu32(op: AluOp, lhs: u32, rhs: u32) -> Result<u32, VmFault> {
    Ok(match op {
        AluOp::Add => lhs.wrapping_add(rhs),
        AluOp::Sub => lhs.wrapping_sub(rhs),
        AluOp::Mul => lhs.wrapping_mul(rhs),
        AluOp::Div => {
            if rhs == 0 {
                return Err(VmFault::Fpe);
            }
            lhs / rhs
        }
        AluOp::Mod => {
            if rhs == 0 {
                return Err(VmFault::Fpe);
            }
            lhs % rhs
        }
        AluOp::Or => lhs | rhs,
        AluOp::And => lhs & rhs,
        AluOp::Xor => lhs ^ rhs,
        AluOp::Lsh => lhs << (rhs & 31),
        AluOp::Rsh => lhs >> (rhs & 31),
        AluOp::Arsh => ((lhs as i32) >> (rhs & 31)) as u32,
        AluOp::Neg => lhs.wrapping_neg(),
        AluOp::Mov => rhs,
    })
}

fn taken(cond: JumpCond, lhs: u64, rhs: u64) -> bool {
    match cond {
        JumpCond::Eq => lhs == rhs,
        JumpCond::Gt => lhs > rhs,
        JumpCond::Ge => lhs >= rhs,
        JumpCond::Lt => lhs < rhs,
        JumpCond::Le => lhs <= rhs,
        JumpCond::Set => lhs & rhs != 0,
        JumpCond::Ne => lhs != rhs,
        JumpCond::Sgt => (lhs as i64) > (rhs as i64),
        JumpCond::Sge => (lhs as i64) >= (rhs as i64),
        JumpCond::Slt => (lhs as i64) < (rhs as i64),
        JumpCond::Sle => (lhs as i64) <= (rhs as i64),
    }
}
