//! This module resolves parallel register assignments into a clobber-free
//! move sequence.
//!
//! The problem is the classic parallel-move one: every destination register
//! must end up holding its source's original value, with moves executed one
//! at a time. Chains are ordered so each register is read before it is
//! overwritten; cycles are broken by evacuating one value into the scratch
//! register.

use crate::code::aarch64::SCRATCH;

/// One register-to-register copy, in emission-ready order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Move {
    /// Destination register
    pub dst: u8,
    /// Source register
    pub src: u8,
}

/// Resolution state of one destination.
#[derive(Clone, Copy, PartialEq)]
enum Status {
    /// Not visited yet
    ToMove,
    /// On the current resolution path; a second visit means a cycle closed
    BeingMoved,
    /// Its move has been emitted
    Moved,
}

/// Orders the parallel assignment `dst[k] <- src[k]` into sequential moves.
///
/// Destinations must be unique and every register id must be below
/// [`SCRATCH`]. Sources may repeat (fan-out) and may name registers that are
/// not destinations. Fixed entries (`dst == src`) emit nothing; each cycle
/// adds one extra move through the scratch register. The output is
/// deterministic for a given input order.
pub(crate) fn resolve(pairs: &[(u8, u8)]) -> Vec<Move> {
    let dst: Vec<u8> = pairs.iter().map(|&(d, _)| d).collect();
    let mut src: Vec<u8> = pairs.iter().map(|&(_, s)| s).collect();
    debug_assert!(pairs.iter().all(|&(d, s)| d < SCRATCH && s < SCRATCH));

    let mut status = vec![Status::ToMove; pairs.len()];
    let mut out = Vec::with_capacity(pairs.len() + 1);
    for i in 0..pairs.len() {
        if status[i] == Status::ToMove {
            move_one(i, &dst, &mut src, &mut status, &mut out);
        }
    }
    out
}

/// Emits the move for destination `i`, first resolving everything that still
/// needs to read `dst[i]` before it is overwritten.
fn move_one(i: usize, dst: &[u8], src: &mut [u8], status: &mut [Status], out: &mut Vec<Move>) {
    if src[i] == dst[i] {
        // already in place
        return;
    }
    status[i] = Status::BeingMoved;
    for j in 0..dst.len() {
        if src[j] != dst[i] {
            continue;
        }
        match status[j] {
            Status::ToMove => move_one(j, dst, src, status, out),
            Status::BeingMoved => {
                // the chain closed into a cycle; evacuate j's pending source
                // so the cycle can finish, and let j complete from scratch
                out.push(Move {
                    dst: SCRATCH,
                    src: src[j],
                });
                src[j] = SCRATCH;
            }
            Status::Moved => {}
        }
    }
    out.push(Move {
        dst: dst[i],
        src: src[i],
    });
    status[i] = Status::Moved;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Replays a resolved move sequence over a synthetic register file; slot
    /// `r` starts out holding `0x100 + r`
    fn replay(pairs: &[(u8, u8)]) -> Vec<u64> {
        let mut regs: Vec<u64> = (0..=u64::from(SCRATCH)).map(|r| 0x100 + r).collect();
        for m in resolve(pairs) {
            regs[usize::from(m.dst)] = regs[usize::from(m.src)];
        }
        regs
    }

    /// Asserts every destination ended up with its source's original value
    fn check(pairs: &[(u8, u8)]) {
        let regs = replay(pairs);
        for &(dst, src) in pairs {
            assert_eq!(
                regs[usize::from(dst)],
                0x100 + u64::from(src),
                "wrong value in r{dst} for assignment {pairs:?}"
            );
        }
    }

    /// Calls `f` with every permutation of `0..n`
    fn for_each_permutation(n: u8, f: &mut impl FnMut(&[u8])) {
        fn go(current: &mut Vec<u8>, left: &mut Vec<u8>, f: &mut impl FnMut(&[u8])) {
            if left.is_empty() {
                f(current);
                return;
            }
            for k in 0..left.len() {
                let v = left.remove(k);
                current.push(v);
                go(current, left, f);
                current.pop();
                left.insert(k, v);
            }
        }
        go(&mut Vec::new(), &mut (0..n).collect(), f)
    }

    /// Steps a linear congruential generator and reduces into `0..bound`
    fn lcg(seed: &mut i64, bound: u64) -> u64 {
        *seed = seed.wrapping_mul(1103515245).wrapping_add(12345);
        (seed.unsigned_abs() >> 16) % bound
    }

    /// Counts (non-fixed entries, cycles) of a permutation
    fn permutation_stats(perm: &[u8]) -> (usize, usize) {
        let mut seen = vec![false; perm.len()];
        let (mut non_fixed, mut cycles) = (0, 0);
        for start in 0..perm.len() {
            if seen[start] || usize::from(perm[start]) == start {
                seen[start] = true;
                continue;
            }
            let mut i = start;
            while !seen[i] {
                seen[i] = true;
                i = usize::from(perm[i]);
                non_fixed += 1;
            }
            cycles += 1;
        }
        (non_fixed, cycles)
    }

    /// Pairs up `0..n` destinations with the given sources
    fn pairs_of(srcs: &[u8]) -> Vec<(u8, u8)> {
        srcs.iter()
            .enumerate()
            .map(|(d, &s)| (d as u8, s))
            .collect()
    }

    #[test]
    /// Test that in-place assignments emit no moves
    fn test_fixed_points() {
        for n in 0..=8u8 {
            let identity: Vec<(u8, u8)> = (0..n).map(|r| (r, r)).collect();
            assert!(resolve(&identity).is_empty());
        }
    }

    #[test]
    /// Test that a dependency chain is emitted reader-first
    fn test_chain() {
        let moves = resolve(&[(0, 1), (1, 2)]);
        assert_eq!(
            moves,
            [Move { dst: 0, src: 1 }, Move { dst: 1, src: 2 }]
        );
        check(&[(0, 1), (1, 2)]);
    }

    #[test]
    /// Test that a two-cycle is broken through the scratch register
    fn test_swap() {
        let moves = resolve(&[(0, 1), (1, 0)]);
        assert_eq!(
            moves,
            [
                Move {
                    dst: SCRATCH,
                    src: 1
                },
                Move { dst: 1, src: 0 },
                Move {
                    dst: 0,
                    src: SCRATCH
                },
            ]
        );
        check(&[(0, 1), (1, 0)]);
    }

    #[test]
    /// Test a three-cycle end to end
    fn test_rotation() {
        let pairs = [(0, 1), (1, 2), (2, 0)];
        assert_eq!(resolve(&pairs).len(), 4);
        check(&pairs);
    }

    #[test]
    /// Test one source fanning out to several destinations
    fn test_fan_out() {
        let pairs = [(0, 0), (1, 0), (2, 0), (3, 0)];
        assert_eq!(resolve(&pairs).len(), 3);
        check(&pairs);
    }

    #[test]
    /// Test a fan-out whose shared source is itself displaced
    fn test_fan_out_displaced() {
        let pairs = [(0, 1), (1, 0), (2, 0)];
        let moves = resolve(&pairs);
        // swap plus one extra copy
        assert_eq!(moves.len(), 4);
        check(&pairs);
    }

    #[test]
    /// Test every permutation of small register files, with the move-count law
    fn test_permutations_exhaustive() {
        for n in 2..=5 {
            for_each_permutation(n, &mut |perm| {
                let pairs = pairs_of(perm);
                check(&pairs);

                // one move per displaced register plus one per cycle
                let (non_fixed, cycles) = permutation_stats(perm);
                assert_eq!(resolve(&pairs).len(), non_fixed + cycles);
            });
        }
    }

    #[test]
    /// Test randomized permutations of every bindable width
    fn test_permutations_random() {
        let mut seed = 42i64;
        for n in 2..=8u8 {
            for _ in 0..1500 {
                let mut perm: Vec<u8> = (0..n).collect();
                for i in (1..usize::from(n)).rev() {
                    let j = lcg(&mut seed, i as u64 + 1) as usize;
                    perm.swap(i, j);
                }

                let pairs = pairs_of(&perm);
                check(&pairs);
                let (non_fixed, cycles) = permutation_stats(&perm);
                assert_eq!(resolve(&pairs).len(), non_fixed + cycles);
            }
        }
    }

    #[test]
    /// Test randomized general assignments, sources repeating freely
    fn test_random_assignments() {
        let mut seed = 1337i64;
        for n in 2..=8u8 {
            for _ in 0..500 {
                let srcs: Vec<u8> =
                    (0..n).map(|_| lcg(&mut seed, u64::from(n)) as u8).collect();
                check(&pairs_of(&srcs));
            }
        }
    }

    #[test]
    /// Test every general assignment of small register files
    fn test_assignments_exhaustive() {
        for n in 2..=5u32 {
            // each assignment is one n-digit base-n numeral
            for index in 0..n.pow(n) {
                let mut value = index;
                let srcs: Vec<u8> = (0..n)
                    .map(|_| {
                        let digit = (value % n) as u8;
                        value /= n;
                        digit
                    })
                    .collect();
                check(&pairs_of(&srcs));
            }
        }
    }
}
