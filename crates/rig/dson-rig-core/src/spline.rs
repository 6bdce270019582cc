//! Control-point curve interpolation for spline formula operations.
//!
//! The cubic variant is a Kochanek-Bartels (TCB) spline over non-uniformly
//! spaced knots; tangents follow the Kochanek and Bartels tension, continuity
//! and bias equations with the non-uniform spacing correction. Outside the
//! knot domain every variant clamps to the nearest endpoint value.

use dson_api_core::DsonError;

/// One TCB knot: position, value, tension, continuity, bias.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TcbKey {
    pub x: f64,
    pub y: f64,
    pub tension: f64,
    pub continuity: f64,
    pub bias: f64,
}

impl TcbKey {
    pub fn from_slice(values: &[f64]) -> Result<TcbKey, DsonError> {
        match *values {
            [x, y, tension, continuity, bias] => Ok(TcbKey {
                x,
                y,
                tension,
                continuity,
                bias,
            }),
            // Plain (x, y) knots come from linear/constant splines sharing
            // the knot encoding; TCB weights default to the midpoint.
            [x, y] => Ok(TcbKey {
                x,
                y,
                tension: 0.5,
                continuity: 0.5,
                bias: 0.5,
            }),
            _ => Err(DsonError::Parse {
                reason: format!("spline knot must have 2 or 5 values, got {}", values.len()),
            }),
        }
    }
}

/// A Kochanek-Bartels spline with precomputed segment coefficients.
#[derive(Debug, Clone)]
pub struct KochanekBartelsSpline {
    keys: Vec<TcbKey>,
    /// Cubic coefficients per segment, constant term first.
    coef: Vec<[f64; 4]>,
}

impl KochanekBartelsSpline {
    pub fn new(mut keys: Vec<TcbKey>) -> Result<KochanekBartelsSpline, DsonError> {
        if keys.is_empty() {
            return Err(DsonError::Parse {
                reason: "spline needs at least one knot".to_string(),
            });
        }
        keys.sort_by(|a, b| a.x.total_cmp(&b.x));

        let n = keys.len();
        let mut incoming = Vec::with_capacity(n);
        let mut outgoing = Vec::with_capacity(n);
        for idx in 0..n {
            let prev = &keys[idx.saturating_sub(1)];
            let key = &keys[idx];
            let next = &keys[(idx + 1).min(n - 1)];

            let cs = key.y - prev.y;
            let cd = next.y - key.y;
            let (t, c, b) = (key.tension, key.continuity, key.bias);

            let mut ds = cs * ((1.0 - t) * (1.0 - c) * (1.0 + b)) / 2.0
                + cd * ((1.0 - t) * (1.0 + c) * (1.0 - b)) / 2.0;
            let mut dd = cs * ((1.0 - t) * (1.0 + c) * (1.0 + b)) / 2.0
                + cd * ((1.0 - t) * (1.0 - c) * (1.0 - b)) / 2.0;

            // Correct the tangents for non-uniform knot spacing.
            let n0 = key.x - prev.x;
            let n1 = next.x - key.x;
            if n0 + n1 > 0.0 {
                ds *= 2.0 * n0 / (n0 + n1);
                dd *= 2.0 * n1 / (n0 + n1);
            }
            incoming.push(ds);
            outgoing.push(dd);
        }

        let mut coef = Vec::with_capacity(n.saturating_sub(1));
        for idx in 0..n.saturating_sub(1) {
            let y1 = keys[idx].y;
            let y2 = keys[idx + 1].y;
            let d0 = outgoing[idx];
            let d1 = incoming[idx + 1];
            coef.push([
                y1,
                d0,
                -3.0 * y1 + 3.0 * y2 - 2.0 * d0 - d1,
                2.0 * y1 - 2.0 * y2 + d0 + d1,
            ]);
        }

        Ok(KochanekBartelsSpline { keys, coef })
    }

    pub fn evaluate(&self, x: f64) -> f64 {
        if self.keys.len() == 1 {
            return self.keys[0].y;
        }
        let idx = self.segment_for(x);
        let x1 = self.keys[idx].x;
        let x2 = self.keys[idx + 1].x;
        let span = x2 - x1;
        let f = if span > 0.0 {
            ((x - x1) / span).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let c = &self.coef[idx];
        c[3] * f * f * f + c[2] * f * f + c[1] * f + c[0]
    }

    fn segment_for(&self, x: f64) -> usize {
        let after = self.keys.partition_point(|k| k.x <= x);
        after.saturating_sub(1).min(self.keys.len() - 2)
    }
}

/// Piecewise-linear curve over (x, y) knots with endpoint clamping.
pub fn evaluate_linear(knots: &[(f64, f64)], x: f64) -> f64 {
    let mut sorted: Vec<(f64, f64)> = knots.to_vec();
    sorted.sort_by(|a, b| a.0.total_cmp(&b.0));
    match sorted.as_slice() {
        [] => 0.0,
        [only] => only.1,
        _ => {
            let (first, last) = (sorted[0], sorted[sorted.len() - 1]);
            if x <= first.0 {
                return first.1;
            }
            if x >= last.0 {
                return last.1;
            }
            let idx = sorted.partition_point(|k| k.0 <= x) - 1;
            let (x1, y1) = sorted[idx];
            let (x2, y2) = sorted[idx + 1];
            let span = x2 - x1;
            if span <= 0.0 {
                return y1;
            }
            y1 + (y2 - y1) * (x - x1) / span
        }
    }
}

/// Step curve: the value of the last knot at or before `x`, clamped.
pub fn evaluate_constant(knots: &[(f64, f64)], x: f64) -> f64 {
    let mut sorted: Vec<(f64, f64)> = knots.to_vec();
    sorted.sort_by(|a, b| a.0.total_cmp(&b.0));
    match sorted.as_slice() {
        [] => 0.0,
        [only] => only.1,
        _ => {
            let idx = sorted.partition_point(|k| k.0 <= x);
            sorted[idx.saturating_sub(1)].1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tcb(knots: &[[f64; 5]]) -> KochanekBartelsSpline {
        let keys = knots
            .iter()
            .map(|k| TcbKey::from_slice(k).unwrap())
            .collect();
        KochanekBartelsSpline::new(keys).unwrap()
    }

    #[test]
    fn tcb_hits_knots_and_clamps_endpoints() {
        let spline = tcb(&[
            [0.0, 0.0, 0.5, 0.5, 0.5],
            [1.0, 10.0, 0.5, 0.5, 0.5],
            [2.0, 20.0, 0.5, 0.5, 0.5],
        ]);
        assert_eq!(spline.evaluate(-1.0), 0.0);
        assert_eq!(spline.evaluate(0.0), 0.0);
        assert_eq!(spline.evaluate(1.0), 10.0);
        assert_eq!(spline.evaluate(2.0), 20.0);
        assert_eq!(spline.evaluate(3.0), 20.0);
    }

    #[test]
    fn tcb_midpoint_matches_reference_curve() {
        let spline = tcb(&[
            [0.0, 0.0, 0.5, 0.5, 0.5],
            [1.0, 10.0, 0.5, 0.5, 0.5],
            [2.0, 20.0, 0.5, 0.5, 0.5],
        ]);
        assert!((spline.evaluate(1.5) - 15.3125).abs() < 1e-9);
    }

    #[test]
    fn tcb_single_knot_is_constant() {
        let spline = tcb(&[[5.0, 3.0, 0.5, 0.5, 0.5]]);
        assert_eq!(spline.evaluate(-10.0), 3.0);
        assert_eq!(spline.evaluate(100.0), 3.0);
    }

    #[test]
    fn linear_interpolates_and_clamps() {
        let knots = [(0.0, 0.0), (90.0, 1.0)];
        assert_eq!(evaluate_linear(&knots, 45.0), 0.5);
        assert_eq!(evaluate_linear(&knots, 120.0), 1.0);
        assert_eq!(evaluate_linear(&knots, -30.0), 0.0);
    }

    #[test]
    fn constant_steps_at_knots() {
        let knots = [(0.0, 1.0), (10.0, 2.0)];
        assert_eq!(evaluate_constant(&knots, -5.0), 1.0);
        assert_eq!(evaluate_constant(&knots, 5.0), 1.0);
        assert_eq!(evaluate_constant(&knots, 10.0), 2.0);
        assert_eq!(evaluate_constant(&knots, 15.0), 2.0);
    }
}
