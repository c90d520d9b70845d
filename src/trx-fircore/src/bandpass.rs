// SPDX-FileCopyrightText: 2026 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Complex bandpass built on [`FirCore`], retunable at runtime.

use std::sync::{Arc, Mutex};

use num_complex::Complex;

use crate::design::{fir_bandpass, Window};
use crate::fircore::FirCore;
use crate::mask::MaskUpdater;
use crate::FirError;

#[derive(Debug, Clone, PartialEq)]
pub struct BandpassParams {
    pub low_hz: f64,
    pub high_hz: f64,
    pub sample_rate: f64,
    pub taps: usize,
    pub window: Window,
    pub gain: f64,
}

impl BandpassParams {
    fn design(&self) -> Vec<Complex<f32>> {
        fir_bandpass(
            self.taps,
            self.low_hz,
            self.high_hz,
            self.sample_rate,
            self.window,
            self.gain,
        )
    }
}

/// Retunes a running [`BandpassFilter`] from any thread.
#[derive(Clone)]
pub struct BandpassControl {
    params: Arc<Mutex<BandpassParams>>,
    updater: MaskUpdater,
}

impl BandpassControl {
    /// Move the passband. The new response applies from the next block.
    pub fn set_freqs(&self, low_hz: f64, high_hz: f64) -> Result<(), FirError> {
        self.retune(|params| {
            params.low_hz = low_hz;
            params.high_hz = high_hz;
        })
    }

    /// Redesign for a new input rate, keeping the passband in Hz.
    pub fn set_sample_rate(&self, sample_rate: f64) -> Result<(), FirError> {
        self.retune(|params| params.sample_rate = sample_rate)?;
        self.updater.set_sample_rate(sample_rate);
        Ok(())
    }

    /// Params and masks change under one guard so concurrent retunes land in
    /// the same order in both. Only control paths take this lock.
    fn retune(&self, edit: impl FnOnce(&mut BandpassParams)) -> Result<(), FirError> {
        let mut params = self.params.lock().unwrap_or_else(|e| e.into_inner());
        let mut next = params.clone();
        edit(&mut next);
        self.updater.set_impulse(&next.design(), true)?;
        *params = next;
        Ok(())
    }

    pub fn params(&self) -> BandpassParams {
        self.params
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// Streaming bandpass with an arbitrary-length input interface.
///
/// Samples are collected into core-sized blocks; output lags input by at
/// most one block.
pub struct BandpassFilter {
    core: FirCore,
    control: BandpassControl,
    pending: Vec<Complex<f32>>,
    block_out: Vec<Complex<f32>>,
}

impl BandpassFilter {
    pub fn new(params: BandpassParams, size: usize, min_phase: bool) -> Result<Self, FirError> {
        if params.taps == 0 {
            return Err(FirError::ZeroCoefficients);
        }
        let impulse = params.design();
        let core = FirCore::new(
            true,
            size,
            params.taps,
            min_phase,
            params.sample_rate,
            &impulse,
        )?;
        let control = BandpassControl {
            params: Arc::new(Mutex::new(params)),
            updater: core.mask_updater(),
        };
        Ok(Self {
            core,
            control,
            pending: Vec::with_capacity(size),
            block_out: vec![Complex::new(0.0, 0.0); size],
        })
    }

    pub fn control(&self) -> BandpassControl {
        self.control.clone()
    }

    pub fn core(&self) -> &FirCore {
        &self.core
    }

    pub fn set_run(&mut self, run: bool) {
        self.core.set_run(run);
    }

    /// Filter `input`, appending every completed block to `output`.
    pub fn filter_into(&mut self, input: &[Complex<f32>], output: &mut Vec<Complex<f32>>) {
        let size = self.core.size();
        let mut rest = input;
        while !rest.is_empty() {
            let take = (size - self.pending.len()).min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.pending.len() == size {
                self.core.execute(&self.pending, &mut self.block_out);
                output.extend_from_slice(&self.block_out);
                self.pending.clear();
            }
        }
    }

    pub fn filter(&mut self, input: &[Complex<f32>]) -> Vec<Complex<f32>> {
        let mut out = Vec::with_capacity(input.len() + self.core.size());
        self.filter_into(input, &mut out);
        out
    }

    /// Samples held back waiting for a full block.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }
}
