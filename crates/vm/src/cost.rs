use serde::{Deserialize, Serialize};

/// Unit costs and execution limits for one invocation.
///
/// The schedule is data, not code: it arrives with the invocation input so
/// that cost changes ship as configuration (gated by the feature set of the
/// surrounding system) rather than as new interpreter builds. The defaults
/// mirror the reference schedule and are what the differential fixtures
/// assume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostSchedule {
    /// Charged for every retired instruction.
    pub instruction: u64,
    /// Floor charge for syscalls whose cost scales with a length argument.
    pub syscall_base: u64,
    /// Bytes moved per compute unit by memory-op and logging syscalls.
    pub bytes_per_unit: u64,
    /// Flat charge for `sol_log_64_`.
    pub log_64: u64,
    /// Flat charge for hashing, plus one unit per hashed byte.
    pub sha256_base: u64,
    pub sha256_per_byte: u64,
    /// Flat charge for `sol_secp256k1_recover`.
    pub secp256k1_recover: u64,
    /// Maximum nesting of internal calls, entry frame included.
    pub max_call_depth: u64,
    /// Bytes of stack addressable per frame.
    pub stack_frame_size: u64,
    /// Upper bound on `sol_set_return_data` payloads.
    pub max_return_data: u64,
    /// Per-slice growth headroom and the invocation-wide cumulative
    /// resize budget for input sub-slices.
    pub max_resize_delta: u64,
}

impl Default for CostSchedule {
    fn default() -> Self {
        Self {
            instruction: 1,
            syscall_base: 100,
            bytes_per_unit: 250,
            log_64: 100,
            sha256_base: 85,
            sha256_per_byte: 1,
            secp256k1_recover: 25_000,
            max_call_depth: 64,
            stack_frame_size: 4_096,
            max_return_data: 1_024,
            max_resize_delta: 10_240,
        }
    }
}

impl CostSchedule {
    /// Cost of moving `len` bytes: the per-byte rate with the base as floor.
    pub fn byte_cost(&self, len: u64) -> u64 {
        (len / self.bytes_per_unit.max(1)).max(self.syscall_base)
    }
}
