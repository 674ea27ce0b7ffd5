//! B-spline coefficient decomposition, run on a worker thread.
//!
//! Coefficients are found by separable recursive filtering along every axis
//! with mirror-symmetric boundary conditions,
//! so that the B-spline of the given order through them interpolates the image samples.
use std::{
    sync::Arc,
    thread::{self, JoinHandle},
};

use ndarray::{ArrayD, Axis};

use super::BSplineInterpolator;
use crate::{Error, FeatureImage, Result, kernel};

/// Truncation tolerance for the causal initialisation sum.
const INITIAL_TOLERANCE: f64 = 1e-10;

/// Pole of the recursive prefilter for the given spline order, if one is needed.
fn pole(order: u32) -> Option<f64> {
    match order {
        2 => Some(8.0_f64.sqrt() - 3.0),
        3 => Some(3.0_f64.sqrt() - 2.0),
        _ => None,
    }
}

/// Initial coefficient of the causal pass, assuming mirror-symmetric extension.
fn initial_causal(line: &[f64], z: f64) -> f64 {
    let n = line.len();
    let horizon = (INITIAL_TOLERANCE.ln() / z.abs().ln()).ceil() as usize;
    if horizon < n {
        let mut zn = z;
        let mut sum = line[0];
        for v in &line[1..horizon] {
            sum += zn * v;
            zn *= z;
        }
        return sum;
    }
    let iz = 1.0 / z;
    let mut zn = z;
    let mut z2n = z.powi(n as i32 - 1);
    let mut sum = line[0] + z2n * line[n - 1];
    z2n *= z2n * iz;
    for v in &line[1..n - 1] {
        sum += (zn + z2n) * v;
        zn *= z;
        z2n *= iz;
    }
    sum / (1.0 - zn * zn)
}

/// Replace samples along one line with their B-spline coefficients, in place.
fn filter_line(line: &mut [f64], z: f64) {
    let n = line.len();
    if n < 2 {
        return;
    }
    let gain = (1.0 - z) * (1.0 - 1.0 / z);
    for v in line.iter_mut() {
        *v *= gain;
    }

    line[0] = initial_causal(line, z);
    for k in 1..n {
        line[k] += z * line[k - 1];
    }

    line[n - 1] = (z / (z * z - 1.0)) * (z * line[n - 2] + line[n - 1]);
    for k in (0..n - 1).rev() {
        line[k] = z * (line[k + 1] - line[k]);
    }
}

/// Compute B-spline coefficients of `data` for the given order.
fn decompose(data: &ArrayD<f64>, order: u32) -> Result<ArrayD<f64>> {
    if data.iter().any(|v| !v.is_finite()) {
        return Err(Error::Dispatch(
            "cannot decompose an image with non-finite values".into(),
        ));
    }
    let mut coefficients = data.clone();
    let Some(z) = pole(order) else {
        return Ok(coefficients);
    };
    let mut line = Vec::new();
    for axis in 0..coefficients.ndim() {
        for mut lane in coefficients.lanes_mut(Axis(axis)) {
            line.clear();
            line.extend(lane.iter().copied());
            filter_line(&mut line, z);
            for (dst, src) in lane.iter_mut().zip(line.iter()) {
                *dst = *src;
            }
        }
    }
    Ok(coefficients)
}

/// A decomposition running on a worker thread.
///
/// The coefficients are only available through [PendingDecomposition::wait].
#[derive(Debug)]
pub struct PendingDecomposition {
    image: Arc<FeatureImage>,
    order: u32,
    handle: JoinHandle<Result<ArrayD<f64>>>,
}

impl PendingDecomposition {
    /// Block until the decomposition finishes.
    ///
    /// Fails with [Error::Dispatch] if the worker failed or panicked.
    pub fn wait(self) -> Result<BSplineInterpolator> {
        let coefficients = self
            .handle
            .join()
            .map_err(|_| Error::Dispatch("decomposition worker panicked".into()))??;
        log::debug!(
            "Finished order {} decomposition of {:?} image",
            self.order,
            self.image.shape()
        );
        Ok(BSplineInterpolator::from_coefficients(
            self.image,
            self.order,
            coefficients,
        ))
    }
}

/// Start computing the B-spline coefficients of `image` on a worker thread.
///
/// Unsupported orders are rejected immediately;
/// failures of the computation itself are reported by [PendingDecomposition::wait].
pub fn dispatch_decomposition(image: Arc<FeatureImage>, order: u32) -> Result<PendingDecomposition> {
    if !kernel::is_supported_order(order) {
        return Err(Error::UnsupportedSplineOrder(order));
    }
    let worker_image = image.clone();
    let handle = thread::Builder::new()
        .name("bspline-decomposition".into())
        .spawn(move || decompose(worker_image.data(), order))
        .map_err(|e| Error::Dispatch(format!("cannot start decomposition worker: {e}")))?;
    Ok(PendingDecomposition {
        image,
        order,
        handle,
    })
}
