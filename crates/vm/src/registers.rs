/// Register file layout of the 64-bit register machine.
///
/// Calling convention:
/// - r0 carries syscall results and the program's return value at `exit`
/// - r1..r5 carry call and syscall arguments
/// - r6..r9 are callee-saved across internal calls
/// - r10 is the frame pointer; instructions may read it but never write it
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Register {
    R0 = 0,
    R1 = 1,
    R2 = 2,
    R3 = 3,
    R4 = 4,
    R5 = 5,
    R6 = 6,
    R7 = 7,
    R8 = 8,
    R9 = 9,
    Fp = 10,
}

/// Number of addressable registers, frame pointer included.
pub const REGISTER_COUNT: usize = 11;

/// Highest register index an instruction may write to.
pub const LAST_WRITABLE: u8 = 9;

/// Index of the frame pointer register.
pub const FRAME_POINTER: u8 = 10;
