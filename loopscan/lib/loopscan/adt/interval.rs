/**
 * A closed range of integers, used for iteration spaces and dependence distances.
 */
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct Interval {
    pub min: i64,
    pub max: i64,
}

impl Interval {
    pub(crate) const fn new(min: i64, max: i64) -> Interval {
        Self { min, max }
    }

    /// The distances `1..=n-1` that separate two distinct iterations of an `n`-trip loop.
    pub(crate) const fn iteration_distances(n: i64) -> Interval {
        Self::new(1, n - 1)
    }

    pub(crate) fn contains(&self, x: i64) -> bool {
        self.min <= x && x <= self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iteration_distances() {
        let d = Interval::iteration_distances(100);
        assert!(d.contains(1));
        assert!(d.contains(99));
        assert!(!d.contains(100));
        assert!(!d.contains(0));
        // a single iteration has no distinct pair
        assert!(!Interval::iteration_distances(1).contains(0));
        assert!(!Interval::iteration_distances(1).contains(1));
    }
}
