// SPDX-FileCopyrightText: 2026 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Minimum-phase conversion of an impulse response.
//!
//! The magnitude response is kept; the phase is replaced by the negated
//! Hilbert transform of the log-magnitude, obtained from the analytic signal
//! of the log spectrum. The spectrum is oversampled to keep cepstral aliasing
//! low. Work is done in `f64`: the log floor is far below `f32` range.

use std::sync::Arc;

use num_complex::Complex;
use rustfft::{Fft, FftPlanner};

/// Oversampling factor used by the filter core.
pub const MIN_PHASE_OVERSAMPLE: usize = 16;

const LOG_FLOOR: f64 = 1.0e-300;

/// Return the minimum-phase equivalent of `impulse`, same length.
pub fn minimum_phase(impulse: &[Complex<f32>], oversample: usize) -> Vec<Complex<f32>> {
    let taps = impulse.len();
    if taps == 0 {
        return Vec::new();
    }
    let size = taps * oversample.max(1);
    let inv_size = 1.0 / size as f64;

    let mut planner = FftPlanner::<f64>::new();
    let fwd = planner.plan_fft_forward(size);
    let rev = planner.plan_fft_inverse(size);

    let mut spectrum: Vec<Complex<f64>> = impulse
        .iter()
        .map(|c| Complex::new(c.re as f64, c.im as f64))
        .collect();
    spectrum.resize(size, Complex::new(0.0, 0.0));
    fwd.process(&mut spectrum);

    let magnitude: Vec<f64> = spectrum.iter().map(|c| c.norm() * inv_size).collect();
    let mut log_mag: Vec<Complex<f64>> = magnitude
        .iter()
        .map(|&m| Complex::new(if m > 0.0 { m.ln() } else { LOG_FLOOR.ln() }, 0.0))
        .collect();
    analytic(&mut log_mag, &fwd, &rev);

    let mut rebuilt: Vec<Complex<f64>> = magnitude
        .iter()
        .zip(&log_mag)
        .map(|(&m, a)| {
            let (sin, cos) = a.im.sin_cos();
            Complex::new(m * cos, -m * sin)
        })
        .collect();
    rev.process(&mut rebuilt);

    rebuilt[..taps]
        .iter()
        .map(|c| Complex::new(c.re as f32, c.im as f32))
        .collect()
}

/// In-place analytic signal: keep DC and Nyquist, double positive bins,
/// zero negative bins.
fn analytic(buf: &mut [Complex<f64>], fwd: &Arc<dyn Fft<f64>>, rev: &Arc<dyn Fft<f64>>) {
    let n = buf.len();
    if n < 2 {
        return;
    }
    let inv_n = 1.0 / n as f64;
    let two_inv_n = 2.0 * inv_n;
    fwd.process(buf);
    buf[0] *= inv_n;
    for bin in &mut buf[1..n / 2] {
        *bin *= two_inv_n;
    }
    buf[n / 2] *= inv_n;
    for bin in &mut buf[n / 2 + 1..] {
        *bin = Complex::new(0.0, 0.0);
    }
    rev.process(buf);
}
