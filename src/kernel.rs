//! Centred B-spline basis functions of degree 1, 2 and 3.
//!
//! Shared by the B-spline deformable transform and the B-spline interpolator.

/// Largest supported spline order.
pub const MAX_SPLINE_ORDER: usize = 3;

/// Whether `order` is a supported spline order.
pub fn is_supported_order(order: u32) -> bool {
    (1..=MAX_SPLINE_ORDER as u32).contains(&order)
}

/// Value of the centred B-spline of degree `order` at `x`.
///
/// Panics for unsupported orders.
#[inline]
pub fn basis(order: usize, x: f64) -> f64 {
    let a = x.abs();
    match order {
        1 => {
            if a < 1.0 {
                1.0 - a
            } else {
                0.0
            }
        }
        2 => {
            if a < 0.5 {
                0.75 - a * a
            } else if a < 1.5 {
                0.5 * (1.5 - a) * (1.5 - a)
            } else {
                0.0
            }
        }
        3 => {
            if a < 1.0 {
                2.0 / 3.0 - a * a + 0.5 * a * a * a
            } else if a < 2.0 {
                let b = 2.0 - a;
                b * b * b / 6.0
            } else {
                0.0
            }
        }
        _ => panic!("unsupported spline order {order}"),
    }
}

/// First derivative of the centred B-spline of degree `order` at `x`.
///
/// Panics for unsupported orders.
#[inline]
pub fn basis_derivative(order: usize, x: f64) -> f64 {
    let a = x.abs();
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    match order {
        1 => {
            if x == 0.0 || a >= 1.0 {
                0.0
            } else {
                -sign
            }
        }
        2 => {
            if a < 0.5 {
                -2.0 * x
            } else if a < 1.5 {
                -sign * (1.5 - a)
            } else {
                0.0
            }
        }
        3 => {
            if a < 1.0 {
                -2.0 * x + 1.5 * x * a
            } else if a < 2.0 {
                let b = 2.0 - a;
                -sign * 0.5 * b * b
            } else {
                0.0
            }
        }
        _ => panic!("unsupported spline order {order}"),
    }
}

/// First grid index of the `order + 1` basis functions supporting continuous index `u`.
#[inline]
pub fn support_start(order: usize, u: f64) -> isize {
    (u - (order as f64 - 1.0) / 2.0).floor() as isize
}

/// Fill `weights` (length `order + 1`) with the basis values at `u`,
/// returning the first supporting grid index.
#[inline]
pub fn weights_into(order: usize, u: f64, weights: &mut [f64]) -> isize {
    let start = support_start(order, u);
    for (k, w) in weights.iter_mut().enumerate() {
        *w = basis(order, u - (start + k as isize) as f64);
    }
    start
}

/// As [weights_into], for the basis derivatives.
#[inline]
pub fn derivative_weights_into(order: usize, u: f64, weights: &mut [f64]) -> isize {
    let start = support_start(order, u);
    for (k, w) in weights.iter_mut().enumerate() {
        *w = basis_derivative(order, u - (start + k as isize) as f64);
    }
    start
}
