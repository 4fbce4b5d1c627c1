use crate::context::ExecutionContext;
use crate::error::VmFault;

/// `sol_set_return_data(data, len)`: replaces the invocation's return
/// data, which lands in the Effects record at termination.
pub fn sol_set_return_data(ctx: &mut ExecutionContext, args: [u64; 5]) -> Result<u64, VmFault> {
    let [vaddr, len, ..] = args;
    ctx.meter
        .consume(ctx.cost.syscall_base + len / ctx.cost.bytes_per_unit.max(1))?;
    if len > ctx.cost.max_return_data {
        return Err(VmFault::Syscall);
    }
    ctx.return_data = if len == 0 {
        Vec::new()
    } else {
        ctx.memory.slice(vaddr, len)?.to_vec()
    };
    tracing::debug!(target: "vm", data = %hex::encode(&ctx.return_data), "set return data");
    Ok(0)
}

/// `sol_get_return_data(buf, len)`: copies up to `len` bytes of the
/// current return data into `buf` and returns its full length in r0.
pub fn sol_get_return_data(ctx: &mut ExecutionContext, args: [u64; 5]) -> Result<u64, VmFault> {
    let [vaddr, len, ..] = args;
    ctx.meter.consume(ctx.cost.syscall_base)?;
    let data_len = ctx.return_data.len() as u64;
    let copy_len = data_len.min(len);
    if copy_len > 0 {
        ctx.meter.consume(copy_len / ctx.cost.bytes_per_unit.max(1))?;
        let data = ctx.return_data[..copy_len as usize].to_vec();
        ctx.memory.slice_mut(vaddr, copy_len)?.copy_from_slice(&data);
    }
    Ok(data_len)
}
