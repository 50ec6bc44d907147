//! # x86-64
//!
//! Instruction-encoding helpers for x86-64. This backend is not wired into
//! the trampoline generator (which targets AArch64); only the raw encoders
//! exist, limited to the eight classic registers (`rax..rdi`, no REX.B
//! extension).

use std::mem;

#[repr(C, packed)]
#[allow(dead_code)]
/// Struct helper for generating an absolute jump
struct JmpAbs {
    /// Indirect jmp through the word that follows (`jmp [rip + 0]`)
    jmp: [u8; 6],
    /// Absolute address to jump to
    target: usize,
}

/// Generates an absolute jump to a specified address and returns bytecode
pub fn jmp_abs(target: usize) -> [u8; mem::size_of::<JmpAbs>()] {
    unsafe {
        mem::transmute(JmpAbs {
            jmp: [0xff, 0x25, 0x00, 0x00, 0x00, 0x00],
            target,
        })
    }
}

#[repr(C, packed)]
#[allow(dead_code)]
/// Struct helper for loading a 64-bit immediate
struct MovRegImm {
    /// `mov r64, imm64` opcode (REX.W + B8+r)
    op: [u8; 2],
    /// Immediate to load
    imm: u64,
}

/// Generates `mov reg, imm64` for one of the classic registers and returns
/// bytecode
pub fn mov_reg_imm(reg: u8, imm: u64) -> [u8; mem::size_of::<MovRegImm>()] {
    assert!(reg < 8, "register index out of range");
    unsafe {
        mem::transmute(MovRegImm {
            op: [0x48, 0xB8 + reg],
            imm,
        })
    }
}

/// Generates `mov dst, src` between two of the classic registers and returns
/// bytecode
pub fn mov_reg_reg(dst: u8, src: u8) -> [u8; 3] {
    assert!(dst < 8 && src < 8, "register index out of range");
    // REX.W 89 /r with a register-direct modrm (mod = 11, reg = src, rm = dst)
    [0x48, 0x89, 0xC0 | (src << 3) | dst]
}
