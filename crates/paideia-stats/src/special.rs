//! Special functions for the F-distribution tail, implemented from scratch:
//! Lanczos log-gamma, the regularized incomplete beta via a modified Lentz
//! continued fraction, and the upper-tail F probability built on both.

use std::f64::consts::PI;

// Lanczos approximation, g = 7, 9 coefficients.
const LANCZOS_G: f64 = 7.0;
const LANCZOS_COEFFS: [f64; 9] = [
    0.999_999_999_999_809_93,
    676.520_368_121_885_1,
    -1_259.139_216_722_402_8,
    771.323_428_777_653_13,
    -176.615_029_162_140_59,
    12.507_343_278_686_905,
    -0.138_571_095_265_720_12,
    9.984_369_578_019_571_6e-6,
    1.505_632_735_149_311_6e-7,
];

/// Natural log of the gamma function for x > 0, with the reflection
/// identity for arguments below 0.5.
pub fn ln_gamma(x: f64) -> f64 {
    if x < 0.5 {
        // Gamma(x) Gamma(1-x) = pi / sin(pi x)
        return (PI / (PI * x).sin()).ln() - ln_gamma(1.0 - x);
    }
    let x = x - 1.0;
    let mut acc = LANCZOS_COEFFS[0];
    for (i, c) in LANCZOS_COEFFS.iter().enumerate().skip(1) {
        acc += c / (x + i as f64);
    }
    let t = x + LANCZOS_G + 0.5;
    0.5 * (2.0 * PI).ln() + (x + 0.5) * t.ln() - t + acc.ln()
}

/// Regularized incomplete beta function I_x(a, b). The continued fraction
/// converges fast only for x below (a+1)/(a+b+2); above that the symmetry
/// I_x(a,b) = 1 - I_{1-x}(b,a) flips into the stable region.
pub fn beta_inc(a: f64, b: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }
    let ln_front =
        ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b) + a * x.ln() + b * (1.0 - x).ln();
    let front = ln_front.exp();
    if x < (a + 1.0) / (a + b + 2.0) {
        front * beta_cf(a, b, x) / a
    } else {
        1.0 - front * beta_cf(b, a, 1.0 - x) / b
    }
}

// Modified Lentz evaluation of the incomplete-beta continued fraction
// (Numerical Recipes betacf).
fn beta_cf(a: f64, b: f64, x: f64) -> f64 {
    const MAX_ITER: usize = 200;
    const EPS: f64 = 3.0e-14;
    const FPMIN: f64 = 1.0e-30;

    let qab = a + b;
    let qap = a + 1.0;
    let qam = a - 1.0;
    let mut c = 1.0;
    let mut d = 1.0 - qab * x / qap;
    if d.abs() < FPMIN {
        d = FPMIN;
    }
    d = 1.0 / d;
    let mut h = d;

    for m in 1..=MAX_ITER {
        let m = m as f64;
        let m2 = 2.0 * m;

        // even step
        let aa = m * (b - m) * x / ((qam + m2) * (a + m2));
        d = 1.0 + aa * d;
        if d.abs() < FPMIN {
            d = FPMIN;
        }
        c = 1.0 + aa / c;
        if c.abs() < FPMIN {
            c = FPMIN;
        }
        d = 1.0 / d;
        h *= d * c;

        // odd step
        let aa = -(a + m) * (qab + m) * x / ((a + m2) * (qap + m2));
        d = 1.0 + aa * d;
        if d.abs() < FPMIN {
            d = FPMIN;
        }
        c = 1.0 + aa / c;
        if c.abs() < FPMIN {
            c = FPMIN;
        }
        d = 1.0 / d;
        let del = d * c;
        h *= del;
        if (del - 1.0).abs() < EPS {
            break;
        }
    }
    h
}

/// Upper-tail probability of the F distribution: P(F' > f) for d1 numerator
/// and d2 denominator degrees of freedom.
pub fn f_sf(f: f64, d1: f64, d2: f64) -> f64 {
    if f.is_nan() || d1 <= 0.0 || d2 <= 0.0 {
        return 1.0;
    }
    if f <= 0.0 {
        return 1.0;
    }
    if f.is_infinite() {
        return 0.0;
    }
    let x = d1 * f / (d1 * f + d2);
    (1.0 - beta_inc(d1 / 2.0, d2 / 2.0, x)).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64, tol: f64) {
        assert!((a - b).abs() < tol, "{a} !~ {b}");
    }

    #[test]
    fn ln_gamma_known_values() {
        close(ln_gamma(1.0), 0.0, 1e-12);
        close(ln_gamma(2.0), 0.0, 1e-12);
        // Gamma(5) = 24
        close(ln_gamma(5.0), 24f64.ln(), 1e-10);
        // Gamma(1/2) = sqrt(pi)
        close(ln_gamma(0.5), PI.sqrt().ln(), 1e-10);
        // reflection region: Gamma(0.25) = 3.62561...
        close(ln_gamma(0.25), 3.625_609_908_221_908f64.ln(), 1e-9);
    }

    #[test]
    fn beta_inc_boundaries_and_symmetry() {
        assert_eq!(beta_inc(2.0, 3.0, 0.0), 0.0);
        assert_eq!(beta_inc(2.0, 3.0, 1.0), 1.0);
        // I_x(a,a) at x = 1/2 is exactly 1/2
        close(beta_inc(2.0, 2.0, 0.5), 0.5, 1e-12);
        // I_x(1,1) is the identity
        close(beta_inc(1.0, 1.0, 0.3), 0.3, 1e-12);
        // symmetry: I_x(a,b) = 1 - I_{1-x}(b,a)
        let lhs = beta_inc(2.5, 4.0, 0.7);
        let rhs = 1.0 - beta_inc(4.0, 2.5, 0.3);
        close(lhs, rhs, 1e-12);
    }

    #[test]
    fn f_tail_limits() {
        close(f_sf(0.0, 1.0, 24.0), 1.0, 1e-12);
        assert!(f_sf(1e9, 1.0, 24.0) < 1e-6);
        // monotone decreasing in f
        assert!(f_sf(1.0, 3.0, 20.0) > f_sf(2.0, 3.0, 20.0));
    }

    #[test]
    fn f_tail_matches_critical_value_tables() {
        // F crit at alpha = .05 for (1, 24) df is 4.2597
        close(f_sf(4.2597, 1.0, 24.0), 0.05, 1e-3);
        // F crit at alpha = .05 for (1, 12) df is 4.7472
        close(f_sf(4.7472, 1.0, 12.0), 0.05, 1e-3);
        // F(1, 10) at f = 1 has p ~ 0.3409
        close(f_sf(1.0, 1.0, 10.0), 0.340_89, 1e-3);
    }

    #[test]
    fn invalid_inputs_degrade_to_one() {
        assert_eq!(f_sf(f64::NAN, 1.0, 24.0), 1.0);
        assert_eq!(f_sf(2.0, 0.0, 24.0), 1.0);
        assert_eq!(f_sf(2.0, 1.0, 0.0), 1.0);
        assert_eq!(f_sf(f64::INFINITY, 1.0, 24.0), 0.0);
    }
}
