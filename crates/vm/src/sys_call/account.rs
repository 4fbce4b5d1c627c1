use crate::context::ExecutionContext;
use crate::error::VmFault;

/// `sol_account_resize(slice, new_len)`: grows or shrinks one input
/// sub-slice in place. `slice` must be the sub-slice base address; growth
/// is bounded by the slice's headroom and the invocation-wide resize
/// budget, and over-budget requests fault.
pub fn sol_account_resize(ctx: &mut ExecutionContext, args: [u64; 5]) -> Result<u64, VmFault> {
    let [vaddr, new_len, ..] = args;
    ctx.meter.consume(ctx.cost.syscall_base)?;
    ctx.memory.resize_slice(vaddr, new_len)?;
    tracing::debug!(target: "vm", vaddr, new_len, "resized input slice");
    Ok(0)
}
