//! Syscall dispatch: a fixed, load-time-resolved mapping from stable
//! numeric identifiers to native handlers.
//!
//! Ids are the murmur3 hash of the imported symbol name, so they are
//! derived, never assigned, and can never be reused for a different name.
//! Handlers read their arguments from r1..r5, translate any pointer
//! arguments, charge their own compute, and either return the value for r0
//! or a [`VmFault`]. Domain errors (bad signature, bad recovery id, ...)
//! are r0 values the program inspects; they never terminate the
//! invocation. Handlers hold no state between invocations.

pub mod account;
pub mod hash;
pub mod log;
pub mod mem;
pub mod return_data;
pub mod secp256k1;

use std::collections::BTreeMap;

use thiserror::Error;

use crate::context::ExecutionContext;
use crate::error::VmFault;

/// Handler signature: context plus the five argument registers.
pub type SyscallFn = fn(&mut ExecutionContext, [u64; 5]) -> Result<u64, VmFault>;

pub struct SyscallEntry {
    pub name: &'static str,
    pub func: SyscallFn,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Two names hashed to the same id; the namespace forbids reassignment.
    #[error("syscall id {0:#010x} already registered by {1}")]
    DuplicateId(u32, &'static str),
}

/// The id -> handler table for one VM instance. Iteration order is the id
/// order (`BTreeMap`), so nothing about this table depends on hash-map
/// iteration.
#[derive(Default)]
pub struct SyscallRegistry {
    entries: BTreeMap<u32, SyscallEntry>,
}

impl SyscallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `func` under the hash of `name` and returns the id.
    pub fn register(&mut self, name: &'static str, func: SyscallFn) -> Result<u32, RegistryError> {
        let id = hash_symbol_name(name.as_bytes());
        if let Some(prev) = self.entries.get(&id) {
            return Err(RegistryError::DuplicateId(id, prev.name));
        }
        self.entries.insert(id, SyscallEntry { name, func });
        Ok(id)
    }

    pub fn get(&self, id: u32) -> Option<&SyscallEntry> {
        self.entries.get(&id)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.entries.contains_key(&id)
    }

    /// The (id, name) namespace, in id order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &'static str)> + '_ {
        self.entries.iter().map(|(id, e)| (*id, e.name))
    }
}

/// The standard syscall set.
pub fn default_registry() -> Result<SyscallRegistry, RegistryError> {
    let mut reg = SyscallRegistry::new();
    reg.register("abort", abort)?;
    reg.register("sol_panic_", log::sol_panic)?;
    reg.register("sol_log_", log::sol_log)?;
    reg.register("sol_log_64_", log::sol_log_64)?;
    reg.register("sol_memcpy_", mem::sol_memcpy)?;
    reg.register("sol_memset_", mem::sol_memset)?;
    reg.register("sol_memcmp_", mem::sol_memcmp)?;
    reg.register("sol_sha256", hash::sol_sha256)?;
    reg.register("sol_secp256k1_recover", secp256k1::sol_secp256k1_recover)?;
    reg.register("sol_set_return_data", return_data::sol_set_return_data)?;
    reg.register("sol_get_return_data", return_data::sol_get_return_data)?;
    reg.register("sol_account_resize", account::sol_account_resize)?;
    Ok(reg)
}

fn abort(_ctx: &mut ExecutionContext, _args: [u64; 5]) -> Result<u64, VmFault> {
    Err(VmFault::Abort)
}

/// murmur3 x86 32-bit, the reference system's symbol hash.
pub fn murmur3_32(data: &[u8], seed: u32) -> u32 {
    const C1: u32 = 0xcc9e_2d51;
    const C2: u32 = 0x1b87_3593;
    let mut h = seed;
    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        h = (h ^ k).rotate_left(13).wrapping_mul(5).wrapping_add(0xe654_6b64);
    }
    let tail = chunks.remainder();
    if !tail.is_empty() {
        let mut k = 0u32;
        for (i, &b) in tail.iter().enumerate() {
            k |= (b as u32) << (8 * i);
        }
        k = k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        h ^= k;
    }
    h ^= data.len() as u32;
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}

/// Id of an imported symbol.
pub fn hash_symbol_name(name: &[u8]) -> u32 {
    murmur3_32(name, 0)
}

/// Hash keying an internal call destination by its instruction index.
pub fn hash_internal_pc(pc: u64) -> u32 {
    murmur3_32(&pc.to_le_bytes(), 0)
}

/// Little-endian u64 out of an 8-byte (or longer) slice prefix.
pub(crate) fn read_u64(b: &[u8]) -> u64 {
    u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
}
