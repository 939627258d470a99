//! Trace interpolation over a bounded cell window.
//!
//! The timing extraction evaluates the sampled trace between digitizer
//! cells; the interpolation kind is a run-time configuration choice.
//! All kinds share the same build/eval surface so the pipeline can
//! treat the interpolant as a tagged value with a single `eval`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Selectable interpolation scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterpolationKind {
    /// Piecewise linear between adjacent cells.
    Linear,
    /// Natural cubic spline (zero curvature at both ends).
    CubicNatural,
    /// Akima sub-spline; less sensitive to outlier cells than the
    /// natural cubic.
    Akima,
    /// Cubic Hermite with Catmull-Rom tangents.
    CatmullRom,
    /// Monotonicity-preserving cubic Hermite (Fritsch-Carlson).
    MonotonicHermite,
    /// Barycentric Lagrange polynomial over the whole window.
    Barycentric,
}

impl std::fmt::Display for InterpolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InterpolationKind::Linear => write!(f, "linear"),
            InterpolationKind::CubicNatural => write!(f, "cubic (natural)"),
            InterpolationKind::Akima => write!(f, "Akima"),
            InterpolationKind::CatmullRom => write!(f, "Catmull-Rom"),
            InterpolationKind::MonotonicHermite => write!(f, "monotone Hermite"),
            InterpolationKind::Barycentric => write!(f, "barycentric polynomial"),
        }
    }
}

#[derive(Error, Debug)]
pub enum InterpolError {
    #[error("x and y length mismatch: {x} vs {y}")]
    LengthMismatch { x: usize, y: usize },
    #[error("too few points for {kind}: need {needed}, got {got}")]
    TooFewPoints {
        kind: InterpolationKind,
        needed: usize,
        got: usize,
    },
    #[error("x values must be strictly increasing (violated at index {0})")]
    NotStrictlyIncreasing(usize),
}

/// A built interpolant ready for repeated evaluation.
///
/// Piecewise kinds store per-segment cubic coefficients
/// `f(t) = a·(t-x_i)³ + b·(t-x_i)² + c·(t-x_i) + y_i`; the barycentric
/// kind stores node weights.
#[derive(Debug, Clone)]
pub enum Interpolant {
    Linear {
        x: Vec<f64>,
        y: Vec<f64>,
    },
    Piecewise {
        x: Vec<f64>,
        y: Vec<f64>,
        a: Vec<f64>,
        b: Vec<f64>,
        c: Vec<f64>,
    },
    Barycentric {
        x: Vec<f64>,
        y: Vec<f64>,
        /// Barycentric weights, rescaled so the largest magnitude is 1.
        w: Vec<f64>,
    },
}

impl Interpolant {
    /// Build an interpolant of the requested kind.
    ///
    /// `x` must be strictly increasing and of the same length as `y`;
    /// the non-linear kinds need at least 4 points (Akima 5).
    pub fn build(kind: InterpolationKind, x: &[f64], y: &[f64]) -> Result<Self, InterpolError> {
        if x.len() != y.len() {
            return Err(InterpolError::LengthMismatch {
                x: x.len(),
                y: y.len(),
            });
        }
        let needed = match kind {
            InterpolationKind::Linear => 2,
            InterpolationKind::Akima => 5,
            _ => 4,
        };
        if x.len() < needed {
            return Err(InterpolError::TooFewPoints {
                kind,
                needed,
                got: x.len(),
            });
        }
        for i in 1..x.len() {
            if x[i] <= x[i - 1] {
                return Err(InterpolError::NotStrictlyIncreasing(i));
            }
        }

        match kind {
            InterpolationKind::Linear => Ok(Interpolant::Linear {
                x: x.to_vec(),
                y: y.to_vec(),
            }),
            InterpolationKind::CubicNatural => Ok(build_natural_cubic(x, y)),
            InterpolationKind::Akima => Ok(build_hermite(x, y, akima_tangents(x, y))),
            InterpolationKind::CatmullRom => Ok(build_hermite(x, y, catmull_rom_tangents(x, y))),
            InterpolationKind::MonotonicHermite => {
                Ok(build_hermite(x, y, monotone_tangents(x, y)))
            }
            InterpolationKind::Barycentric => Ok(build_barycentric(x, y)),
        }
    }

    /// Evaluate at `t`.
    ///
    /// Outside the node range, `Linear` clamps to the endpoint values;
    /// the piecewise kinds continue the boundary polynomial and the
    /// barycentric kind evaluates the global polynomial. The pipeline
    /// only queries inside the region of interest.
    pub fn eval(&self, t: f64) -> f64 {
        match self {
            Interpolant::Linear { x, y } => {
                let n = x.len();
                if t <= x[0] {
                    return y[0];
                }
                if t >= x[n - 1] {
                    return y[n - 1];
                }
                let i = segment_index(x, t);
                let frac = (t - x[i]) / (x[i + 1] - x[i]);
                y[i] + frac * (y[i + 1] - y[i])
            }
            Interpolant::Piecewise { x, y, a, b, c } => {
                let i = segment_index(x, t);
                let h = t - x[i];
                ((a[i] * h + b[i]) * h + c[i]) * h + y[i]
            }
            Interpolant::Barycentric { x, y, w } => {
                let mut num = 0.0;
                let mut den = 0.0;
                for i in 0..x.len() {
                    let d = t - x[i];
                    if d.abs() < f64::EPSILON * (1.0 + x[i].abs()) {
                        return y[i];
                    }
                    let q = w[i] / d;
                    num += q * y[i];
                    den += q;
                }
                num / den
            }
        }
    }
}

/// Index of the segment containing `t`, clamped to a valid segment so
/// boundary polynomials extend naturally.
fn segment_index(x: &[f64], t: f64) -> usize {
    let n = x.len();
    match x.partition_point(|&xi| xi <= t) {
        0 => 0,
        p if p >= n => n - 2,
        p => p - 1,
    }
}

/// Natural cubic spline: tridiagonal solve for the curvature, then the
/// per-segment coefficient form.
fn build_natural_cubic(x: &[f64], y: &[f64]) -> Interpolant {
    let n = x.len();

    // Thomas algorithm on the second-derivative system with natural
    // boundary rows.
    let mut diag = vec![0.0; n];
    let mut upper = vec![0.0; n];
    let mut rhs = vec![0.0; n];
    diag[0] = 1.0;
    diag[n - 1] = 1.0;
    for i in 1..n - 1 {
        let h0 = x[i] - x[i - 1];
        let h1 = x[i + 1] - x[i];
        diag[i] = 2.0 * (h0 + h1) / 3.0;
        upper[i] = h1 / 3.0;
        rhs[i] = (y[i + 1] - y[i]) / h1 - (y[i] - y[i - 1]) / h0;
    }

    // forward sweep (lower entries equal the previous row's upper)
    for i in 1..n - 1 {
        let lower = (x[i] - x[i - 1]) / 3.0;
        let m = lower / diag[i - 1];
        diag[i] -= m * upper[i - 1];
        rhs[i] -= m * rhs[i - 1];
    }
    let mut b = vec![0.0; n];
    for i in (1..n - 1).rev() {
        b[i] = (rhs[i] - upper[i] * b[i + 1]) / diag[i];
    }

    let mut a = vec![0.0; n];
    let mut c = vec![0.0; n];
    for i in 0..n - 1 {
        let h = x[i + 1] - x[i];
        a[i] = (b[i + 1] - b[i]) / (3.0 * h);
        c[i] = (y[i + 1] - y[i]) / h - h / 3.0 * (2.0 * b[i] + b[i + 1]);
    }
    // last row carries the one-sided slope so right-of-range evaluation
    // continues the end polynomial
    let h = x[n - 1] - x[n - 2];
    a[n - 1] = 0.0;
    c[n - 1] = 3.0 * a[n - 2] * h * h + 2.0 * b[n - 2] * h + c[n - 2];

    Interpolant::Piecewise {
        x: x.to_vec(),
        y: y.to_vec(),
        a,
        b,
        c,
    }
}

/// Cubic Hermite segments from node tangents.
fn build_hermite(x: &[f64], y: &[f64], m: Vec<f64>) -> Interpolant {
    let n = x.len();
    let mut a = vec![0.0; n];
    let mut b = vec![0.0; n];
    let mut c = vec![0.0; n];
    for i in 0..n - 1 {
        let h = x[i + 1] - x[i];
        let d = (y[i + 1] - y[i]) / h;
        c[i] = m[i];
        b[i] = (3.0 * d - 2.0 * m[i] - m[i + 1]) / h;
        a[i] = (m[i] + m[i + 1] - 2.0 * d) / h / h;
    }
    c[n - 1] = m[n - 1];
    Interpolant::Piecewise {
        x: x.to_vec(),
        y: y.to_vec(),
        a,
        b,
        c,
    }
}

fn akima_tangents(x: &[f64], y: &[f64]) -> Vec<f64> {
    let n = x.len();
    // segment slopes, extended by two virtual segments on each side
    let mut d = vec![0.0; n + 3];
    for i in 0..n - 1 {
        d[i + 2] = (y[i + 1] - y[i]) / (x[i + 1] - x[i]);
    }
    d[1] = 2.0 * d[2] - d[3];
    d[0] = 2.0 * d[1] - d[2];
    d[n + 1] = 2.0 * d[n] - d[n - 1];
    d[n + 2] = 2.0 * d[n + 1] - d[n];

    let mut m = vec![0.0; n];
    for i in 0..n {
        let w1 = (d[i + 3] - d[i + 2]).abs();
        let w2 = (d[i + 1] - d[i]).abs();
        m[i] = if w1 + w2 > 1e-12 {
            (w1 * d[i + 1] + w2 * d[i + 2]) / (w1 + w2)
        } else {
            0.5 * (d[i + 1] + d[i + 2])
        };
    }
    m
}

fn catmull_rom_tangents(x: &[f64], y: &[f64]) -> Vec<f64> {
    let n = x.len();
    let mut m = vec![0.0; n];
    m[0] = (y[1] - y[0]) / (x[1] - x[0]);
    m[n - 1] = (y[n - 1] - y[n - 2]) / (x[n - 1] - x[n - 2]);
    for i in 1..n - 1 {
        m[i] = (y[i + 1] - y[i - 1]) / (x[i + 1] - x[i - 1]);
    }
    m
}

/// Fritsch-Carlson limited tangents. A flat span gets zero tangents so
/// evaluation inside it degenerates to linear interpolation.
fn monotone_tangents(x: &[f64], y: &[f64]) -> Vec<f64> {
    let n = x.len();
    let mut d = vec![0.0; n - 1];
    for i in 0..n - 1 {
        d[i] = (y[i + 1] - y[i]) / (x[i + 1] - x[i]);
    }

    let mut m = vec![0.0; n];
    m[0] = d[0];
    m[n - 1] = d[n - 2];
    for i in 1..n - 1 {
        m[i] = if d[i - 1] * d[i] <= 0.0 {
            0.0
        } else {
            0.5 * (d[i - 1] + d[i])
        };
    }

    for i in 0..n - 1 {
        if d[i] == 0.0 {
            m[i] = 0.0;
            m[i + 1] = 0.0;
            continue;
        }
        let alpha = m[i] / d[i];
        let beta = m[i + 1] / d[i];
        let s = alpha * alpha + beta * beta;
        if s > 9.0 {
            let tau = 3.0 / s.sqrt();
            m[i] = tau * alpha * d[i];
            m[i + 1] = tau * beta * d[i];
        }
    }
    m
}

/// Barycentric weights computed in log space to survive the large node
/// counts of a full cell window.
fn build_barycentric(x: &[f64], y: &[f64]) -> Interpolant {
    let n = x.len();
    let mut logw = vec![0.0f64; n];
    let mut sign = vec![1.0f64; n];
    for i in 0..n {
        let mut ls = 0.0;
        let mut s = 1.0;
        for j in 0..n {
            if j == i {
                continue;
            }
            let d = x[i] - x[j];
            ls -= d.abs().ln();
            if d < 0.0 {
                s = -s;
            }
        }
        logw[i] = ls;
        sign[i] = s;
    }
    let max = logw.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let w: Vec<f64> = logw
        .iter()
        .zip(&sign)
        .map(|(&l, &s)| s * (l - max).exp())
        .collect();
    Interpolant::Barycentric {
        x: x.to_vec(),
        y: y.to_vec(),
        w,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn grid(n: usize) -> Vec<f64> {
        (0..n).map(|i| i as f64 * 0.5).collect()
    }

    #[test]
    fn test_linear_interpolates_and_clamps() {
        let x = [0.0, 1.0, 2.0];
        let y = [0.0, 2.0, 0.0];
        let it = Interpolant::build(InterpolationKind::Linear, &x, &y).unwrap();
        assert_relative_eq!(it.eval(0.5), 1.0);
        assert_relative_eq!(it.eval(1.5), 1.0);
        assert_relative_eq!(it.eval(-3.0), 0.0);
        assert_relative_eq!(it.eval(9.0), 0.0);
    }

    #[test]
    fn test_all_kinds_reproduce_nodes() {
        let x = grid(12);
        let y: Vec<f64> = x.iter().map(|&t| (t * 0.7).sin() * 80.0).collect();
        for kind in [
            InterpolationKind::Linear,
            InterpolationKind::CubicNatural,
            InterpolationKind::Akima,
            InterpolationKind::CatmullRom,
            InterpolationKind::MonotonicHermite,
            InterpolationKind::Barycentric,
        ] {
            let it = Interpolant::build(kind, &x, &y).unwrap();
            for (xi, yi) in x.iter().zip(&y) {
                assert_relative_eq!(it.eval(*xi), *yi, max_relative = 1e-9, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_cubic_matches_smooth_function() {
        let x = grid(40);
        let y: Vec<f64> = x.iter().map(|&t| (-(t - 10.0).powi(2) / 8.0).exp()).collect();
        let it = Interpolant::build(InterpolationKind::CubicNatural, &x, &y).unwrap();
        for i in 0..390 {
            let t = 0.05 + i as f64 * 0.05;
            let exact = (-(t - 10.0f64).powi(2) / 8.0).exp();
            assert!((it.eval(t) - exact).abs() < 1e-3, "t={t}");
        }
    }

    #[test]
    fn test_monotone_hermite_preserves_monotone_segments() {
        let x = grid(10);
        let y = [0.0, 0.0, 0.1, 0.5, 3.0, 9.0, 9.5, 9.9, 10.0, 10.0];
        let it = Interpolant::build(InterpolationKind::MonotonicHermite, &x, &y).unwrap();
        let mut prev = it.eval(x[0]);
        let mut t = x[0];
        while t < x[9] {
            t += 0.01;
            let v = it.eval(t);
            assert!(v >= prev - 1e-12, "overshoot at t={t}");
            prev = v;
        }
    }

    #[test]
    fn test_monotone_hermite_flat_span_is_linear() {
        let x = grid(6);
        let y = [1.0, 4.0, 4.0, 4.0, 6.0, 7.0];
        let it = Interpolant::build(InterpolationKind::MonotonicHermite, &x, &y).unwrap();
        assert_relative_eq!(it.eval(0.75), 4.0, epsilon = 1e-12);
        assert_relative_eq!(it.eval(1.25), 4.0, epsilon = 1e-12);
    }

    #[test]
    fn test_barycentric_exact_on_polynomial() {
        let x = grid(7);
        let y: Vec<f64> = x.iter().map(|&t| 2.0 * t * t - 3.0 * t + 1.0).collect();
        let it = Interpolant::build(InterpolationKind::Barycentric, &x, &y).unwrap();
        for i in 0..60 {
            let t = i as f64 * 0.05;
            let exact = 2.0 * t * t - 3.0 * t + 1.0;
            assert_relative_eq!(it.eval(t), exact, epsilon = 1e-8, max_relative = 1e-8);
        }
    }

    #[test]
    fn test_build_rejects_bad_input() {
        let x = [0.0, 1.0, 1.0, 2.0];
        let y = [0.0; 4];
        assert!(matches!(
            Interpolant::build(InterpolationKind::CubicNatural, &x, &y),
            Err(InterpolError::NotStrictlyIncreasing(2))
        ));
        assert!(matches!(
            Interpolant::build(InterpolationKind::Akima, &[0.0, 1.0, 2.0, 3.0], &[0.0; 4]),
            Err(InterpolError::TooFewPoints { .. })
        ));
        assert!(matches!(
            Interpolant::build(InterpolationKind::Linear, &[0.0, 1.0], &[0.0; 3]),
            Err(InterpolError::LengthMismatch { .. })
        ));
    }
}
