use sha2::{Digest, Sha256};

use crate::context::ExecutionContext;
use crate::error::VmFault;
use crate::sys_call::read_u64;

/// Upper bound on the number of (addr, len) pairs one hashing call may
/// pass; anything larger is a malformed argument, not a cost problem.
pub const MAX_HASH_SLICES: u64 = 20_000;

/// `sol_sha256(vals, vals_len, result)`: `vals` is an array of
/// `vals_len` 16-byte (addr, len) pairs; the digest of their concatenation
/// lands in the 32-byte `result` buffer.
pub fn sol_sha256(ctx: &mut ExecutionContext, args: [u64; 5]) -> Result<u64, VmFault> {
    let [vals, vals_len, result, ..] = args;
    ctx.meter.consume(ctx.cost.sha256_base)?;
    if vals_len > MAX_HASH_SLICES {
        return Err(VmFault::Syscall);
    }
    let mut hasher = Sha256::new();
    if vals_len > 0 {
        let table = ctx.memory.slice(vals, vals_len * 16)?.to_vec();
        for entry in table.chunks_exact(16) {
            let addr = read_u64(&entry[0..8]);
            let len = read_u64(&entry[8..16]);
            ctx.meter.consume(ctx.cost.sha256_per_byte.saturating_mul(len))?;
            if len > 0 {
                hasher.update(ctx.memory.slice(addr, len)?);
            }
        }
    }
    let digest = hasher.finalize();
    ctx.memory.slice_mut(result, 32)?.copy_from_slice(&digest);
    Ok(0)
}
