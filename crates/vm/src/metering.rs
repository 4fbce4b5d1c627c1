use crate::error::VmFault;

/// Monotonically decreasing compute budget.
///
/// Charging is all-or-nothing per unit of work: a charge that would drive
/// the balance negative consumes the entire remaining balance and fails, so
/// an exhausted invocation always reports exactly its initial budget as
/// consumed. The meter is the system's only timeout, expressed in logical
/// units so it reproduces identically across hardware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeMeter {
    budget: u64,
    remaining: u64,
}

impl ComputeMeter {
    pub fn new(budget: u64) -> Self {
        Self { budget, remaining: budget }
    }

    /// Charges `units`, or terminates the invocation with
    /// [`VmFault::Cost`] if the balance is insufficient.
    pub fn consume(&mut self, units: u64) -> Result<(), VmFault> {
        if units > self.remaining {
            self.remaining = 0;
            return Err(VmFault::Cost);
        }
        self.remaining -= units;
        Ok(())
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Units consumed so far; equals the full budget after exhaustion.
    pub fn consumed(&self) -> u64 {
        self.budget - self.remaining
    }
}
