// SPDX-FileCopyrightText: 2026 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Partitioned overlap-save FIR filtering.
//!
//! [`FirCore`] convolves a continuous complex stream with an impulse response
//! of arbitrary length, one block of `size` samples per call. The impulse is
//! split into `size`-long partitions whose spectra are multiplied against a
//! delay ring of input-block spectra. Coefficients can be replaced while the
//! stream runs: new masks are built into a shadow set and become visible with
//! a single selector flip between two blocks.

pub mod bandpass;
pub mod design;
pub mod fircore;
pub mod mask;
pub mod minphase;

use thiserror::Error;

pub use bandpass::{BandpassControl, BandpassFilter, BandpassParams};
pub use fircore::FirCore;
pub use design::{fir_bandpass, windowed_sinc_coeffs, Window};
pub use mask::{MaskSet, MaskUpdater};
pub use minphase::minimum_phase;

pub use num_complex::Complex;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FirError {
    #[error("block size must be > 0")]
    ZeroSize,
    #[error("coefficient count must be > 0")]
    ZeroCoefficients,
    #[error("impulse has {got} coefficients, filter holds at most {max}")]
    ImpulseTooLong { got: usize, max: usize },
}
