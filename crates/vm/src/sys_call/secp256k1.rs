use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};

use crate::context::ExecutionContext;
use crate::error::VmFault;
use crate::memory::Access;

/// Program-visible result codes in r0. These are domain errors, not VM
/// faults: the invocation continues and the program decides what to do.
pub const RECOVER_OK: u64 = 0;
pub const RECOVER_INVALID_RECOVERY_ID: u64 = 1;
pub const RECOVER_INVALID_SIGNATURE: u64 = 2;

/// `sol_secp256k1_recover(hash, recovery_id, signature, result)`: recovers
/// the 64-byte uncompressed public key (without the SEC1 tag byte) that
/// signed the 32-byte prehash.
///
/// All three pointers translate before any semantic check, so a bad
/// pointer is a fault even when the recovery id is also bad; on any domain
/// error the result buffer is left untouched.
pub fn sol_secp256k1_recover(
    ctx: &mut ExecutionContext,
    args: [u64; 5],
) -> Result<u64, VmFault> {
    let [hash_va, recovery_id, sig_va, result_va, _] = args;
    ctx.meter.consume(ctx.cost.secp256k1_recover)?;

    let hash: [u8; 32] = {
        let b = ctx.memory.slice(hash_va, 32)?;
        let mut out = [0u8; 32];
        out.copy_from_slice(b);
        out
    };
    let sig_bytes: [u8; 64] = {
        let b = ctx.memory.slice(sig_va, 64)?;
        let mut out = [0u8; 64];
        out.copy_from_slice(b);
        out
    };
    ctx.memory.translate(result_va, 64, 1, Access::Store)?;

    if recovery_id > 4 {
        return Ok(RECOVER_INVALID_RECOVERY_ID);
    }
    let Some(recovery_id) = RecoveryId::from_byte(recovery_id as u8) else {
        return Ok(RECOVER_INVALID_SIGNATURE);
    };
    let Ok(signature) = Signature::from_slice(&sig_bytes) else {
        return Ok(RECOVER_INVALID_SIGNATURE);
    };
    let Ok(key) = VerifyingKey::recover_from_prehash(&hash, &signature, recovery_id) else {
        return Ok(RECOVER_INVALID_SIGNATURE);
    };

    let point = key.to_encoded_point(false);
    ctx.memory
        .slice_mut(result_va, 64)?
        .copy_from_slice(&point.as_bytes()[1..65]);
    Ok(RECOVER_OK)
}
