//! Invocation assembly: one program image + one input = one Effects record.

use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::arena::Arena;
use crate::context::{ExecState, ExecutionContext};
use crate::cost::CostSchedule;
use crate::cpu::Interpreter;
use crate::effects::{Effects, ExecResult, ModifiedSlice, INSTRUCTION_ERROR_CUSTOM};
use crate::error::{LayoutError, VmFault};
use crate::features::{Feature, FeatureSet};
use crate::memory::{
    MemoryMap, MemoryRegion, HEAP_REGION_START, INPUT_REGION_START, STACK_REGION_START,
};
use crate::metering::ComputeMeter;
use crate::program::ProgramImage;
use crate::registers::Register;
use crate::sys_call::SyscallRegistry;
use crate::Pubkey;

/// Heap size used when the input does not request one.
pub const DEFAULT_HEAP_SIZE: u64 = 32 * 1024;
/// Largest heap an input may request.
pub const MAX_HEAP_SIZE: u64 = 256 * 1024;

/// One input sub-slice, e.g. one account's data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSlice {
    pub pubkey: Pubkey,
    pub data: Vec<u8>,
    pub writable: bool,
    pub resizable: bool,
}

/// Everything one invocation consumes besides the program itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationInput {
    pub slices: Vec<InputSlice>,
    pub compute_budget: u64,
    /// Requested heap bytes; 0 selects [`DEFAULT_HEAP_SIZE`].
    pub heap_size: u64,
    pub features: FeatureSet,
    pub cost: CostSchedule,
}

impl InvocationInput {
    pub fn new(compute_budget: u64) -> Self {
        Self {
            slices: Vec::new(),
            compute_budget,
            heap_size: 0,
            features: FeatureSet::empty(),
            cost: CostSchedule::default(),
        }
    }
}

/// A program bound to a syscall table, ready to run invocations.
///
/// The image and registry are shared and read-only; every `invoke` builds
/// its own context and memory map, so a `Vm` can be reused across any
/// number of invocations without state leaking between them.
pub struct Vm {
    program: Rc<ProgramImage>,
    syscalls: Rc<SyscallRegistry>,
}

impl Vm {
    pub fn new(program: Rc<ProgramImage>, syscalls: Rc<SyscallRegistry>) -> Self {
        Self { program, syscalls }
    }

    pub fn program(&self) -> &ProgramImage {
        &self.program
    }

    /// Runs one invocation to its terminal state.
    ///
    /// Calling convention: registers start zeroed, r1 holds the input
    /// region base, r2 the sub-slice count, r10 the first frame's top.
    /// Scratch backings come from `arena` and return to it on every exit
    /// path when the region table drops.
    pub fn invoke(&self, input: InvocationInput, arena: &Arena) -> Result<Effects, LayoutError> {
        let InvocationInput { slices, compute_budget, heap_size, features, cost } = input;

        let heap_size = if heap_size == 0 { DEFAULT_HEAP_SIZE } else { heap_size };
        if heap_size > MAX_HEAP_SIZE {
            return Err(LayoutError::HeapTooLarge(heap_size, MAX_HEAP_SIZE));
        }

        let gaps = features.is_active(Feature::StackFrameGaps);
        let frame = cost.stack_frame_size as usize;
        let stack_size = frame * cost.max_call_depth as usize * if gaps { 2 } else { 1 };

        let mut regions = self.program.regions();
        regions.push(MemoryRegion::scratch(
            STACK_REGION_START,
            arena.take(stack_size),
            gaps.then_some(frame),
        ));
        regions.push(MemoryRegion::scratch(
            HEAP_REGION_START,
            arena.take(heap_size as usize),
            None,
        ));

        let slice_count = slices.len() as u64;
        let mut cursor = INPUT_REGION_START;
        for slice in slices {
            let headroom = if slice.resizable { cost.max_resize_delta as usize } else { 0 };
            let span = (slice.data.len() + headroom) as u64;
            regions.push(MemoryRegion::input_slice(
                cursor,
                slice.pubkey,
                slice.data,
                slice.writable,
                headroom,
            ));
            cursor += span;
        }

        let memory = MemoryMap::new(regions, cost.max_resize_delta)?;
        let meter = ComputeMeter::new(compute_budget);
        let frame_top = STACK_REGION_START + cost.stack_frame_size;
        let mut ctx =
            ExecutionContext::new(Rc::clone(&self.program), memory, meter, features, cost);
        ctx.regs[Register::R1 as usize] = INPUT_REGION_START;
        ctx.regs[Register::R2 as usize] = slice_count;
        ctx.regs[Register::Fp as usize] = frame_top;

        Interpreter::new(&self.syscalls).run(&mut ctx);
        Ok(Self::effects(ctx))
    }

    /// Tears a terminal context down into its Effects record.
    fn effects(ctx: ExecutionContext) -> Effects {
        let result = match ctx.state {
            ExecState::Halted(0) => ExecResult::Success,
            ExecState::Halted(r0) => ExecResult::InstructionError {
                code: INSTRUCTION_ERROR_CUSTOM,
                custom: Some(r0),
            },
            ExecState::Faulted(fault) => ExecResult::Fault { code: fault.code() },
            ExecState::ComputeExhausted => ExecResult::Fault { code: VmFault::Cost.code() },
            // run() always terminates the context; a non-terminal state
            // here means it was never run.
            ExecState::Ready | ExecState::Running => {
                ExecResult::Fault { code: VmFault::Ill.code() }
            }
        };
        let compute_units_consumed = ctx.meter.consumed();
        let return_data = ctx.return_data;
        let modified_slices = ctx
            .memory
            .into_regions()
            .into_iter()
            .filter_map(|region| region.into_input())
            .filter(|(_, _, writable)| *writable)
            .map(|(pubkey, data, _)| ModifiedSlice { pubkey, data })
            .collect();
        Effects { result, compute_units_consumed, return_data, modified_slices }
    }
}
