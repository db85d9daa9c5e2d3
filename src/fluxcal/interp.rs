// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Natural cubic-spline interpolation across frequency channels, with
//! extrapolation past the ends so that a calibrator observed with a slightly
//! different band still covers the science channels.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum InterpError {
    #[error("Interpolation needs at least one knot")]
    Empty,

    #[error("Got {xs} abscissae but {ys} ordinates")]
    LengthMismatch { xs: usize, ys: usize },

    #[error("Abscissae must be strictly increasing (violated at index {0})")]
    NotIncreasing(usize),
}

/// A natural cubic spline through a set of knots. Evaluation outside the knot
/// range extrapolates with the end segments' polynomials. Fewer than four
/// knots fall back to linear interpolation.
#[derive(Debug, Clone)]
pub struct CubicSpline {
    xs: Vec<f64>,
    ys: Vec<f64>,
    /// Second derivatives at the knots; empty in the linear fallback.
    m: Vec<f64>,
}

impl CubicSpline {
    pub fn new(xs: &[f64], ys: &[f64]) -> Result<CubicSpline, InterpError> {
        if xs.is_empty() {
            return Err(InterpError::Empty);
        }
        if xs.len() != ys.len() {
            return Err(InterpError::LengthMismatch {
                xs: xs.len(),
                ys: ys.len(),
            });
        }
        for i in 1..xs.len() {
            if xs[i] <= xs[i - 1] {
                return Err(InterpError::NotIncreasing(i));
            }
        }

        let n = xs.len();
        let m = if n < 4 {
            vec![]
        } else {
            // Natural boundary conditions: zero second derivative at the
            // ends. The interior system is tridiagonal; solve it with the
            // Thomas algorithm.
            let mut sub = vec![0.0; n];
            let mut diag = vec![0.0; n];
            let mut sup = vec![0.0; n];
            let mut rhs = vec![0.0; n];
            for i in 1..n - 1 {
                let h0 = xs[i] - xs[i - 1];
                let h1 = xs[i + 1] - xs[i];
                sub[i] = h0;
                diag[i] = 2.0 * (h0 + h1);
                sup[i] = h1;
                rhs[i] = 6.0 * ((ys[i + 1] - ys[i]) / h1 - (ys[i] - ys[i - 1]) / h0);
            }

            // Forward sweep over the interior rows.
            for i in 2..n - 1 {
                let w = sub[i] / diag[i - 1];
                diag[i] -= w * sup[i - 1];
                rhs[i] -= w * rhs[i - 1];
            }
            let mut m = vec![0.0; n];
            m[n - 2] = rhs[n - 2] / diag[n - 2];
            for i in (1..n - 2).rev() {
                m[i] = (rhs[i] - sup[i] * m[i + 1]) / diag[i];
            }
            m
        };

        Ok(CubicSpline {
            xs: xs.to_vec(),
            ys: ys.to_vec(),
            m,
        })
    }

    /// The segment whose polynomial covers `x`; out-of-range values use the
    /// nearest end segment.
    fn segment(&self, x: f64) -> usize {
        let n = self.xs.len();
        if x <= self.xs[0] {
            return 0;
        }
        if x >= self.xs[n - 1] {
            return n - 2;
        }
        match self.xs.partition_point(|&knot| knot <= x) {
            0 => 0,
            p => p - 1,
        }
    }

    pub fn evaluate(&self, x: f64) -> f64 {
        let n = self.xs.len();
        if n == 1 {
            return self.ys[0];
        }
        let i = self.segment(x);
        let (x0, x1) = (self.xs[i], self.xs[i + 1]);
        let (y0, y1) = (self.ys[i], self.ys[i + 1]);
        let h = x1 - x0;

        if self.m.is_empty() {
            // Linear fallback, extended past the ends.
            return y0 + (y1 - y0) * (x - x0) / h;
        }

        let (m0, m1) = (self.m[i], self.m[i + 1]);
        m0 * (x1 - x).powi(3) / (6.0 * h)
            + m1 * (x - x0).powi(3) / (6.0 * h)
            + (y0 / h - m0 * h / 6.0) * (x1 - x)
            + (y1 / h - m1 * h / 6.0) * (x - x0)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn interpolates_through_the_knots() {
        let xs = [0.0, 1.0, 2.0, 3.0, 4.0];
        let ys = [1.0, 3.0, 2.0, 5.0, 4.0];
        let spline = CubicSpline::new(&xs, &ys).unwrap();
        for (&x, &y) in xs.iter().zip(ys.iter()) {
            assert_abs_diff_eq!(spline.evaluate(x), y, epsilon = 1e-9);
        }
    }

    #[test]
    fn reproduces_a_straight_line_exactly() {
        let xs: Vec<f64> = (0..6).map(|i| i as f64).collect();
        let ys: Vec<f64> = xs.iter().map(|x| 2.0 * x + 1.0).collect();
        let spline = CubicSpline::new(&xs, &ys).unwrap();
        // Including extrapolated points: the spline of a line is the line.
        for x in [-1.0, 0.5, 2.25, 4.9, 7.0] {
            assert_abs_diff_eq!(spline.evaluate(x), 2.0 * x + 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn few_knots_fall_back_to_linear() {
        let spline = CubicSpline::new(&[0.0, 2.0], &[0.0, 4.0]).unwrap();
        assert_abs_diff_eq!(spline.evaluate(1.0), 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(spline.evaluate(3.0), 6.0, epsilon = 1e-12);

        let single = CubicSpline::new(&[1.0], &[7.0]).unwrap();
        assert_abs_diff_eq!(single.evaluate(42.0), 7.0);
    }

    #[test]
    fn bad_knots_are_rejected() {
        assert!(matches!(CubicSpline::new(&[], &[]), Err(InterpError::Empty)));
        assert!(matches!(
            CubicSpline::new(&[0.0, 1.0], &[0.0]),
            Err(InterpError::LengthMismatch { xs: 2, ys: 1 })
        ));
        assert!(matches!(
            CubicSpline::new(&[0.0, 1.0, 1.0], &[0.0, 1.0, 2.0]),
            Err(InterpError::NotIncreasing(2))
        ));
    }

    #[test]
    fn interpolation_is_smooth_between_knots() {
        // A parabola sampled at integer points is reproduced well inside the
        // domain.
        let xs: Vec<f64> = (0..8).map(|i| i as f64).collect();
        let ys: Vec<f64> = xs.iter().map(|x| x * x).collect();
        let spline = CubicSpline::new(&xs, &ys).unwrap();
        assert_abs_diff_eq!(spline.evaluate(3.5), 12.25, epsilon = 0.05);
    }
}
