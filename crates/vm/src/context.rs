use std::rc::Rc;

use crate::cost::CostSchedule;
use crate::error::VmFault;
use crate::features::{Feature, FeatureSet};
use crate::memory::MemoryMap;
use crate::metering::ComputeMeter;
use crate::program::ProgramImage;
use crate::registers::REGISTER_COUNT;

/// Interpreter state machine. `Running` is re-entered once per instruction;
/// the three terminal states are never left again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecState {
    Ready,
    Running,
    Halted(u64),
    Faulted(VmFault),
    ComputeExhausted,
}

impl ExecState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ExecState::Ready | ExecState::Running)
    }
}

/// One entry of the shadow call stack.
#[derive(Debug, Clone, Copy)]
pub struct CallFrame {
    pub return_pc: usize,
    pub frame_ptr: u64,
    /// r6..r9, restored on return.
    pub saved: [u64; 4],
}

/// All mutable state of one invocation.
///
/// Owned exclusively by a single run: it is built fresh for every
/// invocation and torn down into [`crate::effects::Effects`] afterwards,
/// so no state can leak between invocations.
#[derive(Debug)]
pub struct ExecutionContext {
    pub regs: [u64; REGISTER_COUNT],
    pub pc: usize,
    pub frames: Vec<CallFrame>,
    pub state: ExecState,
    pub meter: ComputeMeter,
    pub memory: MemoryMap,
    pub program: Rc<ProgramImage>,
    pub features: FeatureSet,
    pub cost: CostSchedule,
    pub return_data: Vec<u8>,
    strict_align: bool,
}

impl ExecutionContext {
    pub fn new(
        program: Rc<ProgramImage>,
        memory: MemoryMap,
        meter: ComputeMeter,
        features: FeatureSet,
        cost: CostSchedule,
    ) -> Self {
        let strict_align = features.is_active(Feature::StrictAlignment);
        Self {
            regs: [0; REGISTER_COUNT],
            pc: program.entry_pc,
            frames: Vec::new(),
            state: ExecState::Ready,
            meter,
            memory,
            program,
            features,
            cost,
            return_data: Vec::new(),
            strict_align,
        }
    }

    /// Whether interpreter loads/stores enforce natural alignment.
    pub fn strict_align(&self) -> bool {
        self.strict_align
    }
}
