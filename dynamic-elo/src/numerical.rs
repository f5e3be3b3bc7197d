/// Conventional rating that maps to an internal value of zero.
pub const RATING_ORIGIN: f64 = 2000.;
/// Conventional rating points per internal unit.
pub const RATING_SCALE: f64 = 1000.;
/// Probabilities are kept in `[PROB_EPS, 1 - PROB_EPS]` before taking a log or a reciprocal.
pub const PROB_EPS: f64 = 1e-10;

pub fn rating_to_internal(rating: f64) -> f64 {
    (rating - RATING_ORIGIN) / RATING_SCALE
}

pub fn internal_to_rating(value: f64) -> f64 {
    value * RATING_SCALE + RATING_ORIGIN
}

pub fn rating_diff_to_internal(diff: f64) -> f64 {
    diff / RATING_SCALE
}

pub fn clamp_probability(prob: f64) -> f64 {
    prob.clamp(PROB_EPS, 1. - PROB_EPS)
}

/// sech(x)^2, written to avoid overflow in cosh for large |x|.
pub fn sech2(x: f64) -> f64 {
    let ee = (-x.abs()).exp();
    let sech = 2. * ee / (1. + ee * ee);
    sech * sech
}

/// 1 / (1 + exp(-y)), without overflow for large |y|.
pub fn sigmoid(y: f64) -> f64 {
    if y >= 0. {
        1. / (1. + (-y).exp())
    } else {
        let e = y.exp();
        e / (1. + e)
    }
}

/// log(1 / (1 + exp(-y)))
pub fn log_sigmoid(y: f64) -> f64 {
    if y > 0. {
        -(-y).exp().ln_1p()
    } else {
        y - y.exp().ln_1p()
    }
}

/// log(1 - 1 / (1 + exp(-y)))
pub fn log_complement_sigmoid(y: f64) -> f64 {
    if y > 0. {
        -y - (-y).exp().ln_1p()
    } else {
        -y.exp().ln_1p()
    }
}

pub fn l2_norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// Halves `(lo, hi)` until the two are adjacent, keeping `below(lo)` true and `below(hi)` false.
pub fn bracket_by_halving((mut lo, mut hi): (usize, usize), below: impl Fn(usize) -> bool) -> (usize, usize) {
    while hi - lo > 1 {
        let mid = lo + (hi - lo) / 2;
        if below(mid) {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    (lo, hi)
}

pub fn central_difference(f: impl Fn(f64) -> f64, x: f64, dx: f64) -> f64 {
    (f(x + dx) - f(x - dx)) / (2. * dx)
}
