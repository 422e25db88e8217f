/// `None` when the result is 2^63, which only `i64::MIN` inputs reach.
pub(crate) fn gcd(a: i64, b: i64) -> Option<i64> {
    let (mut a, mut b) = (a.unsigned_abs(), b.unsigned_abs());
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    i64::try_from(a).ok()
}

/// Returns `a / b` only when the division is exact.
pub(crate) fn exact_div(a: i64, b: i64) -> Option<i64> {
    if b == 0 || a.checked_rem(b)? != 0 {
        None
    } else {
        a.checked_div(b)
    }
}

pub(crate) fn shl_factor(amount: i64) -> Option<i64> {
    u32::try_from(amount)
        .ok()
        .and_then(|x| 1i64.checked_shl(x))
        .filter(|x| *x > 0)
}
