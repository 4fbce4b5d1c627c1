use crate::context::ExecutionContext;
use crate::error::VmFault;

/// `sol_log_(msg, len)`: logs a guest byte string.
pub fn sol_log(ctx: &mut ExecutionContext, args: [u64; 5]) -> Result<u64, VmFault> {
    let [vaddr, len, ..] = args;
    ctx.meter.consume(ctx.cost.syscall_base.max(len))?;
    if len == 0 {
        tracing::info!(target: "program", "log:");
        return Ok(0);
    }
    let bytes = ctx.memory.slice(vaddr, len)?;
    tracing::info!(target: "program", "log: {}", String::from_utf8_lossy(bytes));
    Ok(0)
}

/// `sol_log_64_(a, b, c, d, e)`: logs five words.
pub fn sol_log_64(ctx: &mut ExecutionContext, args: [u64; 5]) -> Result<u64, VmFault> {
    ctx.meter.consume(ctx.cost.log_64)?;
    let [a, b, c, d, e] = args;
    tracing::info!(
        target: "program",
        "log: {a:#x} {b:#x} {c:#x} {d:#x} {e:#x}"
    );
    Ok(0)
}

/// `sol_panic_(file, len, line, column)`: logs the panic location and
/// terminates with a panic fault. The fault is the point; the log line is
/// best effort on top.
pub fn sol_panic(ctx: &mut ExecutionContext, args: [u64; 5]) -> Result<u64, VmFault> {
    let [file, len, line, column, _] = args;
    ctx.meter.consume(len.max(1))?;
    if len > 0 {
        let bytes = ctx.memory.slice(file, len)?;
        tracing::info!(
            target: "program",
            "panicked at {}:{line}:{column}",
            String::from_utf8_lossy(bytes)
        );
    }
    Err(VmFault::Panic)
}
