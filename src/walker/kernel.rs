// The reference iteration function F, shared by the CPU fallback miner,
// the finalizer, and the golden-vector tests. The GPU kernel in `gpu.rs`
// must match this bit-exactly.

use crate::params::{dp_masks, is_distinguished, HashParams};
use sha2::{Digest, Sha256};

/// Render a truncated state as uppercase ASCII hex-nibble characters in
/// `['A'..'P']`: each byte becomes two characters, high nibble then low
/// nibble, each offset by `0x41`.
pub fn ascii_render(state: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(state.len() * 2);
    for &byte in state {
        out.push((byte >> 4) + 0x41);
        out.push((byte & 0x0F) + 0x41);
    }
    out
}

/// One application of `F`: render, hash once with SHA-256, truncate to
/// `prefix_bytes` + `suffix_bytes` of the digest.
///
/// `sha2::Sha256::digest` performs the identical single-block pad-and-hash
/// the kernel's WGSL implementation does by hand (the ASCII message is at
/// most 54 bytes, always one block) so the CPU and GPU paths are bit-exact
/// by construction.
pub fn step(state: &[u8], params: &HashParams) -> Vec<u8> {
    let ascii = ascii_render(state);
    let digest = Sha256::digest(&ascii);

    let prefix = params.prefix_bytes as usize;
    let suffix = params.suffix_bytes as usize;
    let mut next = Vec::with_capacity(prefix + suffix);
    next.extend_from_slice(&digest[..prefix]);
    next.extend_from_slice(&digest[32 - suffix..32]);
    next
}

/// Walk from `start` until a distinguished point is reached, returning the
/// terminal state and the number of `F` applications taken.
pub fn walk_to_dp(start: &[u8], params: &HashParams) -> (Vec<u8>, u64) {
    let masks = params.dp_masks();
    let mut state = start.to_vec();
    let mut steps = 0u64;
    loop {
        state = step(&state, params);
        steps += 1;
        if is_distinguished(&state, masks) {
            return (state, steps);
        }
    }
}

/// Convenience wrapper matching spec notation `F*(start) == dp`: walk from
/// `start` and report whether the walk's terminus equals `dp`.
pub fn chain_terminates_at(start: &[u8], dp: &[u8], params: &HashParams) -> bool {
    let (terminus, _) = walk_to_dp(start, params);
    terminus == dp
}

/// Whether `state` satisfies the DP predicate for `dp_bits`.
pub fn is_dp(state: &[u8], dp_bits: u32) -> bool {
    is_distinguished(state, dp_masks(dp_bits))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_render_uses_a_to_p_alphabet() {
        let rendered = ascii_render(&[0x00, 0xFF, 0x4A]);
        assert_eq!(rendered, b"AAPPEK");
        for &c in &rendered {
            assert!((b'A'..=b'P').contains(&c));
        }
    }

    #[test]
    fn step_is_deterministic() {
        let params = HashParams::new(8, 0, 16).unwrap();
        let start = vec![0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        let a = step(&start, &params);
        let b = step(&start, &params);
        assert_eq!(a, b);
        assert_eq!(a.len(), 8);
    }

    #[test]
    fn golden_s1_scenario() {
        // S1: start 0x4443504d4c424149 ("CDPMLBAI") iterated 10 times
        // produces a deterministic state_10, pinned here so a future
        // change to F is caught rather than silently accepted.
        let params = HashParams::new(8, 0, 16).unwrap();
        let start: Vec<u8> = 0x4443504d4c424149u64.to_be_bytes().to_vec();

        let mut state = start;
        for _ in 0..10 {
            state = step(&state, &params);
        }

        assert_eq!(state, hex::decode("53ed248c8e97e6c3").unwrap());
    }

    #[test]
    fn determinism_over_a_hundred_seeded_states() {
        // Spec property 1: a golden vector of 100 states drawn
        // deterministically from a seed yields identical sequences across
        // independent evaluations. We derive the 100 seeds from a fixed
        // xorshift stream (not `rand`, so the seed derivation itself is
        // reproducible without depending on an RNG's own stability
        // guarantees) and recompute each seed's `F`-image twice.
        let params = HashParams::new(8, 0, 16).unwrap();
        let mut rng_state = 0xD1B54A32D192ED03u64;
        for _ in 0..100 {
            rng_state ^= rng_state << 13;
            rng_state ^= rng_state >> 7;
            rng_state ^= rng_state << 17;
            let seed = rng_state.to_be_bytes().to_vec();

            let first = step(&seed, &params);
            let second = step(&seed, &params);
            assert_eq!(first, second, "F must be a pure function of its input");
            assert_eq!(first.len(), params.total_bytes());
        }
    }

    #[test]
    fn walk_to_dp_terminates_and_matches_predicate() {
        let params = HashParams::new(8, 0, 4).unwrap(); // easy DP for fast test
        let start = vec![1, 2, 3, 4, 5, 6, 7, 8];
        let (dp, steps) = walk_to_dp(&start, &params);
        assert!(steps > 0);
        assert!(is_dp(&dp, 4));
        assert!(chain_terminates_at(&start, &dp, &params));
    }

    #[test]
    fn dp_fraction_matches_two_pow_neg_dp_bits() {
        let params = HashParams::new(8, 0, 8).unwrap();
        let masks = params.dp_masks();
        let mut rng_state = 0x9E3779B97F4A7C15u64;
        let mut hits = 0u32;
        let trials = 20_000u32;
        for _ in 0..trials {
            rng_state ^= rng_state << 13;
            rng_state ^= rng_state >> 7;
            rng_state ^= rng_state << 17;
            let bytes = rng_state.to_be_bytes();
            let mut state = vec![0u8; 8];
            state.copy_from_slice(&bytes);
            if is_distinguished(&state, masks) {
                hits += 1;
            }
        }
        let expected = trials as f64 / 256.0;
        let observed = hits as f64;
        // Loose bound: within 5x expected count (high variance at this
        // sample size; this is a smoke test, not a statistical proof).
        assert!(observed < expected * 5.0 + 20.0);
    }
}
