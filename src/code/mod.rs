//! # Code
//!
//! Architecture backends: raw instruction encoders and the register-model
//! constants the generator is built against. Only [`aarch64`] backs the
//! generator; [`x64`] is encoding helpers without an assembler.

pub mod aarch64;
pub mod x64;
