// SPDX-FileCopyrightText: 2026 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Impulse response design helpers for the filter core.

use std::f64::consts::PI;

use num_complex::Complex;

/// Taper applied to a truncated sinc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Window {
    Rectangular,
    Hann,
    #[default]
    BlackmanHarris,
}

impl Window {
    /// Parse a config-file window name. Unknown names yield `None`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "rect" | "rectangular" | "none" => Some(Self::Rectangular),
            "hann" | "hanning" => Some(Self::Hann),
            "blackman-harris" | "blackmanharris" | "bh4" => Some(Self::BlackmanHarris),
            _ => None,
        }
    }

    /// Window value at tap `i` of `taps`.
    pub fn value(self, i: usize, taps: usize) -> f64 {
        if taps <= 1 {
            return 1.0;
        }
        let phase = 2.0 * PI * i as f64 / (taps - 1) as f64;
        match self {
            Self::Rectangular => 1.0,
            Self::Hann => 0.5 * (1.0 - phase.cos()),
            Self::BlackmanHarris => {
                0.35875 - 0.48829 * phase.cos() + 0.14128 * (2.0 * phase).cos()
                    - 0.01168 * (3.0 * phase).cos()
            }
        }
    }
}

/// Real windowed-sinc low-pass, normalised to unity DC gain.
///
/// `cutoff_norm` is `cutoff_hz / sample_rate` (0.0–0.5).
pub fn windowed_sinc_coeffs(cutoff_norm: f32, taps: usize, window: Window) -> Vec<f32> {
    assert!(taps >= 1, "FIR filter must have at least 1 tap");
    let m = (taps - 1) as f64 / 2.0;
    let cutoff = cutoff_norm as f64;
    let mut coeffs: Vec<f64> = (0..taps)
        .map(|i| {
            let x = i as f64 - m;
            let sinc = if x == 0.0 {
                2.0 * cutoff
            } else {
                (2.0 * PI * cutoff * x).sin() / (PI * x)
            };
            sinc * window.value(i, taps)
        })
        .collect();
    let sum: f64 = coeffs.iter().sum();
    if sum.abs() > 1e-12 {
        let inv = 1.0 / sum;
        for coeff in &mut coeffs {
            *coeff *= inv;
        }
    }
    coeffs.into_iter().map(|c| c as f32).collect()
}

/// Complex bandpass impulse passing `f_low..f_high` Hz at `sample_rate`.
///
/// Frequencies are signed; a positive frequency is a counter-clockwise
/// rotating phasor, so `(-3000, -300)` passes only the lower sideband.
/// The low-pass prototype is normalised so a tone at the band centre sees a
/// gain of `gain`.
pub fn fir_bandpass(
    taps: usize,
    f_low: f64,
    f_high: f64,
    sample_rate: f64,
    window: Window,
    gain: f64,
) -> Vec<Complex<f32>> {
    assert!(taps >= 1, "FIR filter must have at least 1 tap");
    let rate = if sample_rate > 0.0 { sample_rate } else { 1.0 };
    let half_width = (f_high - f_low).abs() / (2.0 * rate);
    let centre = PI * (f_high + f_low) / rate;
    let m = (taps - 1) as f64 / 2.0;

    let prototype: Vec<f64> = (0..taps)
        .map(|i| {
            let x = i as f64 - m;
            let sinc = if x == 0.0 {
                2.0 * half_width
            } else {
                (2.0 * PI * half_width * x).sin() / (PI * x)
            };
            sinc * window.value(i, taps)
        })
        .collect();
    let sum: f64 = prototype.iter().sum();
    let scale = if sum.abs() > 1e-12 { gain / sum } else { gain };

    prototype
        .iter()
        .enumerate()
        .map(|(i, &coef)| {
            let x = i as f64 - m;
            let (sin, cos) = (x * centre).sin_cos();
            Complex::new((coef * scale * cos) as f32, (coef * scale * sin) as f32)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response_at(impulse: &[Complex<f32>], freq_norm: f64) -> f64 {
        let mut acc = Complex::new(0.0f64, 0.0);
        for (n, h) in impulse.iter().enumerate() {
            let w = -2.0 * PI * freq_norm * n as f64;
            acc += Complex::new(h.re as f64, h.im as f64) * Complex::new(w.cos(), w.sin());
        }
        acc.norm()
    }

    #[test]
    fn lowpass_dc_gain_is_unity() {
        for window in [Window::Rectangular, Window::Hann, Window::BlackmanHarris] {
            let coeffs = windowed_sinc_coeffs(0.1, 63, window);
            let sum: f32 = coeffs.iter().sum();
            assert!((sum - 1.0).abs() < 1e-5, "{window:?} sum {sum}");
        }
    }

    #[test]
    fn lowpass_is_symmetric() {
        let coeffs = windowed_sinc_coeffs(0.2, 31, Window::Hann);
        for i in 0..coeffs.len() / 2 {
            assert!((coeffs[i] - coeffs[coeffs.len() - 1 - i]).abs() < 1e-6);
        }
    }

    #[test]
    fn bandpass_passes_centre_and_rejects_image() {
        let rate = 48_000.0;
        let imp = fir_bandpass(255, 300.0, 3_000.0, rate, Window::BlackmanHarris, 1.0);
        let centre = response_at(&imp, 1_650.0 / rate);
        let image = response_at(&imp, -1_650.0 / rate);
        assert!((centre - 1.0).abs() < 0.01, "centre gain {centre}");
        assert!(image < 1e-3, "image leakage {image}");
    }

    #[test]
    fn window_names_parse() {
        assert_eq!(Window::from_name("Hann"), Some(Window::Hann));
        assert_eq!(
            Window::from_name("blackman-harris"),
            Some(Window::BlackmanHarris)
        );
        assert_eq!(Window::from_name("kaiser"), None);
    }
}
