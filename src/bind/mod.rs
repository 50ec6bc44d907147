//! # Bind
//!
//! The trampoline generator: partial application of native functions at the
//! machine-code level.
//!
//! [`bind`] writes a small code fragment that rearranges the argument
//! registers per an ordered slice of [`Binding`]s and tail-calls a target
//! function. A [`Binding::Literal`] slot is fixed to a word baked into the
//! fragment; a [`Binding::Placeholder`] slot forwards one of the fragment's
//! own incoming arguments. The fragment builds no stack frame, so the target
//! observes the trampoline's caller directly.
//!
//! ```no_run
//! use std::ptr::NonNull;
//!
//! use libbind::alloc::Pool;
//! use libbind::bind::mem::ExecutableBuffer;
//! use libbind::bind::{bind, max_size, Binding};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! extern "C" fn mul_add(x: usize, y: usize, z: usize) -> usize {
//!     x * y + z
//! }
//!
//! // carve trampoline-sized chunks out of one rwx mapping
//! let mut mapping = region::alloc(4096, region::Protection::READ_WRITE_EXECUTE)?;
//! let base = NonNull::new(mapping.as_mut_ptr::<u8>()).unwrap();
//! let mut pool = unsafe { Pool::new(base, mapping.len(), max_size(3)) };
//!
//! let chunk = pool.alloc().ok_or("pool exhausted")?;
//! let mut buf = unsafe { ExecutableBuffer::from_rwx(chunk, pool.chunk_size()) };
//!
//! // fix the first argument to 2, shift the caller's arguments up one slot
//! let target: extern "C" fn(usize, usize, usize) -> usize = mul_add;
//! let specs = [Binding::Literal(2), Binding::Placeholder(0), Binding::Placeholder(1)];
//! let tramp = unsafe { bind(&mut buf, target as *const (), &specs)? };
//!
//! let adapted: extern "C" fn(usize, usize) -> usize = unsafe { tramp.cast() };
//! assert_eq!(adapted(1, 25), 27);
//! # Ok(())
//! # }
//! ```

use std::mem::{size_of, transmute_copy};
use std::ptr;

use thiserror::Error;

use crate::code::aarch64::{br, ldr_literal, mov, INSTR_BYTES, MAX_ARGS, SCRATCH, WORD_BYTES};

use self::mem::ExecutableBuffer;

pub mod mem;
mod moves;

/// One binding for a destination argument slot of the generated trampoline.
///
/// The slot's position in the binding slice is the target argument register it
/// fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    /// The slot is fixed to this machine word, baked into the fragment.
    /// Whatever happens to sit in the register when the trampoline is
    /// entered is overwritten.
    Literal(usize),
    /// The slot receives the value the trampoline itself was passed at this
    /// argument index.
    Placeholder(usize),
}

/// Errors when generating a trampoline
#[derive(Debug, Error)]
pub enum BindError {
    /// Error when staging the buffer between writable and executable
    #[error("error staging buffer permissions")]
    Protection(#[from] region::Error),
}

/// A generated, installed trampoline.
///
/// Plain data about the fragment: entry address and emitted length. The
/// backing chunk's lifetime stays with the caller; dropping this value frees
/// nothing.
#[derive(Debug, Clone, Copy)]
pub struct Trampoline {
    /// Entry point of the fragment
    entry: *const u8,
    /// Emitted length in bytes
    len: usize,
}

impl Trampoline {
    /// Entry point of the fragment.
    pub fn entry(&self) -> *const u8 {
        self.entry
    }

    /// Emitted length in bytes, always the binding slice's
    /// [`required_size`].
    pub fn size(&self) -> usize {
        self.len
    }

    /// Reinterprets the entry point as a callable function pointer.
    ///
    /// # Safety
    ///
    /// `F` must be a function pointer type whose ABI and argument/return
    /// shape match what the binding produced, the backing buffer must still
    /// be staged executable and unmodified, and calls are only meaningful on
    /// the architecture the fragment was emitted for.
    pub unsafe fn cast<F: Copy>(&self) -> F {
        assert_eq!(
            size_of::<F>(),
            size_of::<*const u8>(),
            "cast target must be pointer sized"
        );
        transmute_copy(&self.entry)
    }
}

/// Exact fragment size in bytes for a binding slice.
///
/// Pure: performs the same move resolution as [`bind`] without touching any
/// memory, so callers can size a buffer precisely. Shares [`bind`]'s
/// contract on the slice itself.
pub fn required_size(specs: &[Binding]) -> usize {
    let (pairs, literals) = partition(specs);
    fragment_size(moves::resolve(&pairs).len(), literals.len())
}

/// Conservative fragment size covering every possible binding of `arity`
/// slots, for sizing buffers before any concrete binding is known.
///
/// The all-literal case dominates: a literal costs an instruction plus a
/// pool word, more than any placeholder move can, even with cycle breaks.
pub fn max_size(arity: usize) -> usize {
    assert!(arity <= MAX_ARGS, "arity {arity} exceeds {MAX_ARGS} arguments");
    INSTR_BYTES * (arity + 2) + WORD_BYTES * (arity + 1)
}

/// Emits a trampoline for `target` into `buf` and stages it executable.
///
/// Slot `i` of `specs` fills the target's argument register `i`; the
/// fragment is invoked with whatever arguments its placeholder sources name
/// (sources `0..k` mean calling it with `k` arguments). Binding a buffer
/// that already holds a trampoline replaces it.
///
/// When this returns, the buffer has been staged executable and the
/// instruction cache synchronized; the fragment is callable immediately.
///
/// Violating a precondition (more than [`MAX_ARGS`] slots, a placeholder
/// source outside the slice, a buffer too small for [`required_size`] or not
/// 4-byte aligned) panics rather than emitting corrupt code.
///
/// # Safety
///
/// `buf` must uphold its constructor's contract and must not hold code that
/// could be executing concurrently with the rewrite. `target` must remain a
/// callable function address for as long as the trampoline is used. The
/// emitted fragment follows the AArch64 argument convention; executing it on
/// any other architecture is undefined.
pub unsafe fn bind(
    buf: &mut ExecutableBuffer,
    target: *const (),
    specs: &[Binding],
) -> Result<Trampoline, BindError> {
    let code = encode(target as usize, specs);
    assert!(
        code.len() <= buf.len(),
        "buffer of {} bytes cannot hold a {} byte trampoline",
        buf.len(),
        code.len()
    );
    assert!(
        buf.as_ptr() as usize % INSTR_BYTES == 0,
        "buffer is not instruction aligned"
    );

    buf.make_writable()?;
    // Safety: the span is staged writable and the capacity was checked above
    ptr::copy_nonoverlapping(code.as_ptr(), buf.as_ptr(), code.len());
    buf.make_executable()?;

    Ok(Trampoline {
        entry: buf.as_ptr(),
        len: code.len(),
    })
}

/// Assembles the fragment for `target` as position-independent bytes.
///
/// Layout: register moves, literal loads, `ldr scratch` + `br scratch`,
/// then the literal pool with the target address as its final word. Loads
/// reference the pool pc-relative, so the bytes are valid at any 4-byte
/// aligned address.
fn encode(target: usize, specs: &[Binding]) -> Vec<u8> {
    let (pairs, literals) = partition(specs);
    let ordered = moves::resolve(&pairs);

    let insns = ordered.len() + literals.len() + 2;
    let pool_base = insns * INSTR_BYTES;
    let mut code = Vec::with_capacity(pool_base + (literals.len() + 1) * WORD_BYTES);
    let mut pool: Vec<u64> = Vec::with_capacity(literals.len() + 1);

    for m in &ordered {
        put(&mut code, mov(m.dst, m.src));
    }
    for &(dst, value) in &literals {
        // each load references the next free pool slot
        let slot = pool_base + pool.len() * WORD_BYTES;
        let offset = (slot - code.len()) as i32;
        put(&mut code, ldr_literal(dst, offset));
        pool.push(value as u64);
    }

    // tail call through the scratch register
    let slot = pool_base + pool.len() * WORD_BYTES;
    let offset = (slot - code.len()) as i32;
    put(&mut code, ldr_literal(SCRATCH, offset));
    put(&mut code, br(SCRATCH));
    pool.push(target as u64);

    for word in pool {
        code.extend_from_slice(&word.to_le_bytes());
    }
    debug_assert_eq!(code.len(), fragment_size(ordered.len(), literals.len()));
    code
}

/// Splits a binding slice into placeholder `(dst, src)` pairs and literal
/// `(dst, value)` loads, enforcing the slice contract.
fn partition(specs: &[Binding]) -> (Vec<(u8, u8)>, Vec<(u8, usize)>) {
    let arity = specs.len();
    assert!(arity <= MAX_ARGS, "arity {arity} exceeds {MAX_ARGS} arguments");

    let mut pairs = Vec::new();
    let mut literals = Vec::new();
    for (dst, spec) in specs.iter().enumerate() {
        match *spec {
            Binding::Placeholder(src) => {
                assert!(
                    src < arity,
                    "placeholder source {src} is outside arity {arity}"
                );
                pairs.push((dst as u8, src as u8));
            }
            Binding::Literal(value) => literals.push((dst as u8, value)),
        }
    }
    (pairs, literals)
}

/// Bytes for a fragment of `movs` register moves and `literals` pool loads,
/// including the tail call and its target word.
fn fragment_size(movs: usize, literals: usize) -> usize {
    INSTR_BYTES * (movs + literals + 2) + WORD_BYTES * (literals + 1)
}

/// Appends one instruction word to the fragment.
fn put(code: &mut Vec<u8>, insn: u32) {
    code.extend_from_slice(&insn.to_le_bytes());
}
