use thiserror::Error;

/// Terminal execution faults.
///
/// Every fault maps onto a fixed numeric code that is part of the external
/// contract: the differential harness compares these codes byte-for-byte
/// across implementations, so the numbering below must never be reordered
/// or reused. New faults get new codes at the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VmFault {
    /// Program counter left the text segment.
    #[error("program counter out of text")]
    Text,
    /// Jump into the middle of a multi-slot instruction, or a multi-slot
    /// instruction with a malformed continuation slot.
    #[error("split multi-slot instruction")]
    Split,
    /// `call`/`callx` target does not resolve to a function or syscall.
    #[error("unresolvable call target")]
    Call,
    /// Call depth limit exceeded.
    #[error("call stack overflow")]
    Stack,
    /// Unrecognized opcode, or a write to a read-only register.
    #[error("illegal instruction")]
    Ill,
    /// Access outside any mapped region, across a sub-slice boundary, or
    /// with insufficient permissions.
    #[error("memory access violation")]
    Segv,
    /// Misaligned access while strict alignment is enforced.
    #[error("misaligned memory access")]
    Bus,
    /// Write into a readable but read-only region.
    #[error("write to read-only memory")]
    Rdonly,
    /// Division or remainder by zero.
    #[error("division by zero")]
    Fpe,
    /// Compute budget exhausted.
    #[error("compute budget exhausted")]
    Cost,
    /// The program invoked the `abort` import.
    #[error("program aborted")]
    Abort,
    /// The program invoked the panic import.
    #[error("program panicked")]
    Panic,
    /// A syscall received arguments it cannot act on (overlapping copy,
    /// oversized return data, slice count over the limit, ...).
    #[error("malformed syscall argument")]
    Syscall,
    /// Input sub-slice resize past its headroom or the invocation budget.
    #[error("input slice resize out of bounds")]
    Resize,
}

impl VmFault {
    /// Stable wire code reported in [`crate::effects::Effects`].
    pub fn code(self) -> u32 {
        match self {
            VmFault::Text => 1,
            VmFault::Split => 2,
            VmFault::Call => 3,
            VmFault::Stack => 4,
            VmFault::Ill => 5,
            VmFault::Segv => 6,
            VmFault::Bus => 7,
            VmFault::Rdonly => 8,
            VmFault::Fpe => 9,
            VmFault::Cost => 10,
            VmFault::Abort => 11,
            VmFault::Panic => 12,
            VmFault::Syscall => 13,
            VmFault::Resize => 14,
        }
    }
}

/// Invocation setup failures.
///
/// These are host-side caller errors raised before any guest instruction
/// runs; they are distinct from [`VmFault`], which is part of the Effects
/// contract.
#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("memory regions at {0:#x} and {1:#x} overlap")]
    RegionOverlap(u64, u64),
    #[error("region at {0:#x} wraps the virtual address space")]
    RegionWraps(u64),
    #[error("requested heap size {0} exceeds the maximum {1}")]
    HeapTooLarge(u64, u64),
}
