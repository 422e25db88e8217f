use crate::error::NonConvergence;

/**
 * Runs `step` until it reports no change, giving up after `limit` rounds.
 * Returns the number of rounds that were needed to reach the fixpoint.
 **/
pub(crate) fn iterate<F>(phase: &'static str, limit: usize, mut step: F) -> Result<usize, NonConvergence>
where
    F: FnMut() -> bool,
{
    for round in 1..=limit {
        if !step() {
            return Ok(round);
        }
    }
    log::warn!("{} did not converge after {} rounds", phase, limit);
    Err(NonConvergence { phase, limit })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_converges() {
        let mut x = 0;
        let rounds = iterate("count", 10, || {
            if x < 3 {
                x += 1;
                true
            } else {
                false
            }
        });
        assert_eq!(Ok(4), rounds);
        assert_eq!(3, x);
    }

    #[test]
    fn test_non_convergence() {
        let mut flip = false;
        let r = iterate("oscillate", 16, || {
            flip = !flip;
            true
        });
        assert_eq!(
            Err(NonConvergence {
                phase: "oscillate",
                limit: 16
            }),
            r
        );
    }
}
