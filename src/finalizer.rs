// Finalizer (spec §4.3): given two starts sharing a distinguished point,
// rewalk both chains in lockstep to recover the collision witness.

use crate::error::CoreError;
use crate::params::HashParams;
use crate::walker::kernel::step;

/// Walk `start` forward, recording every visited state (including `start`
/// itself) up to and including its distinguished-point terminus.
fn materialize_chain(start: &[u8], params: &HashParams) -> Vec<Vec<u8>> {
    let masks = params.dp_masks();
    let mut chain = vec![start.to_vec()];
    loop {
        let next = step(chain.last().unwrap(), params);
        let is_dp = crate::params::is_distinguished(&next, masks);
        chain.push(next);
        if is_dp {
            return chain;
        }
    }
}

/// Recover the collision witness `(p_a, p_b)` from two starts whose chains
/// share a distinguished point. Returns `CoreError::NoCollision` if the
/// starts are identical, or if their chains merge earlier than the DP
/// without ever disagreeing (the "robin-hood" case, spec §4.3 step 4 / §9
/// Open Question (b)).
pub fn finalize(
    start_a: &[u8],
    start_b: &[u8],
    params: &HashParams,
) -> Result<(Vec<u8>, Vec<u8>), CoreError> {
    if start_a == start_b {
        return Err(CoreError::NoCollision);
    }

    let chain_a = materialize_chain(start_a, params);
    let chain_b = materialize_chain(start_b, params);

    // Both chains necessarily end at the same DP (the caller is expected
    // to have matched them on `dp`); equalize their distance to that
    // terminus by dropping the extra prefix of the longer chain.
    let (shorter_len, longer_len) = (chain_a.len().min(chain_b.len()), chain_a.len().max(chain_b.len()));
    let skip = longer_len - shorter_len;

    let (mut idx_a, mut idx_b) = if chain_a.len() > chain_b.len() {
        (skip, 0)
    } else {
        (0, skip)
    };

    loop {
        let cur_a = &chain_a[idx_a];
        let cur_b = &chain_b[idx_b];

        if cur_a == cur_b {
            if idx_a == 0 || idx_b == 0 {
                // No predecessor to compare on at least one side: the
                // chains were already equal at the equalization point.
                return Err(CoreError::NoCollision);
            }
            let prev_a = &chain_a[idx_a - 1];
            let prev_b = &chain_b[idx_b - 1];
            if prev_a != prev_b {
                return Ok((prev_a.clone(), prev_b.clone()));
            }
            return Err(CoreError::NoCollision);
        }

        if idx_a + 1 >= chain_a.len() || idx_b + 1 >= chain_b.len() {
            return Err(CoreError::NoCollision);
        }
        idx_a += 1;
        idx_b += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_identical_starts() {
        let params = HashParams::new(8, 0, 4).unwrap();
        let start = vec![1, 2, 3, 4, 5, 6, 7, 8];
        assert_eq!(finalize(&start, &start, &params), Err(CoreError::NoCollision));
    }

    #[test]
    fn finds_witness_when_chains_converge_before_the_dp() {
        // Construct two starts and confirm: if finalize succeeds, the
        // witness satisfies F(p_a) == F(p_b) and p_a != p_b (spec
        // property 3).
        let params = HashParams::new(8, 0, 2).unwrap(); // easy DPs for a fast test
        let start_a = vec![11, 22, 33, 44, 55, 66, 77, 88];
        let start_b = vec![99, 88, 77, 66, 55, 44, 33, 22];

        match finalize(&start_a, &start_b, &params) {
            Ok((p_a, p_b)) => {
                assert_ne!(p_a, p_b);
                assert_eq!(step(&p_a, &params), step(&p_b, &params));
            }
            Err(CoreError::NoCollision) => {
                // The two arbitrary seeds may simply never collide within
                // reasonable walk length; that's an acceptable outcome for
                // this smoke test, not a failure.
            }
            Err(e) => panic!("unexpected error: {:?}", e),
        }
    }

    #[test]
    fn detects_robin_hood_case() {
        // Two starts whose chains are engineered to merge before the DP
        // with identical predecessors should report NoCollision, not a
        // false witness.
        let params = HashParams::new(8, 0, 4).unwrap();
        let start = vec![5, 5, 5, 5, 5, 5, 5, 5];
        // Walking the same start forward one step yields a second "start"
        // on the very same chain: their predecessors coincide everywhere
        // they overlap, so this must resolve to NoCollision.
        let start_b = step(&start, &params);
        let result = finalize(&start, &start_b, &params);
        assert_eq!(result, Err(CoreError::NoCollision));
    }
}
