//! # AArch64
//!
//! Instruction encoders for the reference trampoline backend.
//!
//! Only the three instructions a trampoline is built from are encoded here;
//! everything else about the architecture (argument registers `x0..x7`,
//! scratch register `x16`) enters as constants.

/// Widest register file a trampoline can bind (arguments are passed in
/// `x0..x7`).
pub const MAX_ARGS: usize = 8;

/// Intra-procedure-call scratch register (x16/IP0), reserved for breaking
/// move cycles and holding the tail-call target.
pub const SCRATCH: u8 = 16;

/// Width of one instruction in bytes.
pub const INSTR_BYTES: usize = 4;

/// Width of one literal-pool word in bytes.
pub const WORD_BYTES: usize = 8;

/// Encodes `mov xd, xm` (an alias of `orr xd, xzr, xm`).
pub fn mov(rd: u8, rm: u8) -> u32 {
    assert!(rd < 31 && rm < 31, "register index out of range");
    // ORR Xd, XZR, Xm: sf 01 01010 00 0 Rm 000000 11111 Rd
    0xAA00_03E0 | (u32::from(rm) << 16) | u32::from(rd)
}

/// Encodes `ldr xt, <label>`, a PC-relative 64-bit literal load.
///
/// `offset` is the byte distance from this instruction to the literal; it
/// must be a multiple of 4 within ±1 MiB. Negative offsets are legal but a
/// trampoline only ever references forward into its trailing pool.
pub fn ldr_literal(rt: u8, offset: i32) -> u32 {
    assert!(rt < 31, "register index out of range");
    assert!(offset % 4 == 0, "literal offset must be word aligned");
    assert!(
        (-0x10_0000..0x10_0000).contains(&offset),
        "literal offset out of range"
    );
    // LDR Xt, <label>: 01 011 0 00 imm19 Rt
    0x5800_0000 | ((((offset >> 2) as u32) & 0x7FFFF) << 5) | u32::from(rt)
}

/// Encodes `br xn`, an indirect branch with no link.
pub fn br(rn: u8) -> u32 {
    assert!(rn < 31, "register index out of range");
    // BR Xn: 1101011 0000 11111 000000 Rn 00000
    0xD61F_0000 | (u32::from(rn) << 5)
}
