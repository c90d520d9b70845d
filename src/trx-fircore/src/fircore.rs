// SPDX-FileCopyrightText: 2026 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Partitioned overlap-save convolution.
//!
//! Each call to [`FirCore::execute`] consumes one block of `size` complex
//! samples. The transform input holds the previous and the current block;
//! its spectrum is stored in a ring of `P = ceil(nc / size)` slots and every
//! slot is multiplied with the mask of the partition matching its age.

use std::sync::Arc;

use num_complex::Complex;
use rustfft::{Fft, FftPlanner, Length};

use crate::mask::{mac_freq_domain, partition_count, MaskBank, MaskSet, MaskUpdater};
use crate::FirError;

pub struct FirCore {
    run: bool,
    size: usize,
    nc: usize,
    nfor: usize,
    min_phase: bool,
    /// `[previous block, current block]`.
    fftin: Vec<Complex<f32>>,
    /// Ring of forward spectra, one per partition.
    fftout: Vec<Vec<Complex<f32>>>,
    buffidx: usize,
    accum: Vec<Complex<f32>>,
    fwd: Arc<dyn Fft<f32>>,
    rev: Arc<dyn Fft<f32>>,
    scratch: Vec<Complex<f32>>,
    bank: Arc<MaskBank>,
}

impl FirCore {
    /// Build a filter of `nc` coefficients processed in blocks of `size`.
    ///
    /// `impulse` may be shorter than `nc`; it is zero-padded.
    pub fn new(
        run: bool,
        size: usize,
        nc: usize,
        min_phase: bool,
        sample_rate: f64,
        impulse: &[Complex<f32>],
    ) -> Result<Self, FirError> {
        if size == 0 {
            return Err(FirError::ZeroSize);
        }
        if nc == 0 {
            return Err(FirError::ZeroCoefficients);
        }
        let bank = Arc::new(MaskBank::new(size, nc, min_phase, sample_rate, impulse)?);
        let mut planner = FftPlanner::<f32>::new();
        let mut core = Self {
            run,
            size,
            nc,
            nfor: 0,
            min_phase,
            fftin: Vec::new(),
            fftout: Vec::new(),
            buffidx: 0,
            accum: Vec::new(),
            fwd: planner.plan_fft_forward(2 * size),
            rev: planner.plan_fft_inverse(2 * size),
            scratch: Vec::new(),
            bank,
        };
        core.plan();
        Ok(core)
    }

    fn plan(&mut self) {
        let len = 2 * self.size;
        if self.fwd.len() != len {
            let mut planner = FftPlanner::<f32>::new();
            self.fwd = planner.plan_fft_forward(len);
            self.rev = planner.plan_fft_inverse(len);
        }
        let scratch_len = self
            .fwd
            .get_inplace_scratch_len()
            .max(self.rev.get_inplace_scratch_len());
        self.scratch = vec![Complex::new(0.0, 0.0); scratch_len];
        self.nfor = partition_count(self.nc, self.size);
        self.fftin = vec![Complex::new(0.0, 0.0); len];
        self.fftout = vec![vec![Complex::new(0.0, 0.0); len]; self.nfor];
        self.accum = vec![Complex::new(0.0, 0.0); len];
        self.buffidx = 0;
    }

    /// Filter one block. Both slices must hold exactly `size` samples.
    pub fn execute(&mut self, input: &[Complex<f32>], output: &mut [Complex<f32>]) {
        assert_eq!(input.len(), self.size, "input block length");
        assert_eq!(output.len(), self.size, "output block length");

        if !self.run {
            output.copy_from_slice(input);
            return;
        }

        let size = self.size;
        let nfor = self.nfor;
        self.fftin[size..].copy_from_slice(input);

        let slot = &mut self.fftout[self.buffidx];
        slot.copy_from_slice(&self.fftin);
        self.fwd.process_with_scratch(slot, &mut self.scratch);

        self.accum.fill(Complex::new(0.0, 0.0));
        let accum = &mut self.accum;
        let fftout = &self.fftout;
        let mut k = self.buffidx;
        self.bank.with_active(|masks| {
            for mask in masks.iter().take(nfor) {
                mac_freq_domain(accum, &fftout[k], mask);
                k = (k + nfor - 1) % nfor;
            }
        });
        self.buffidx = (self.buffidx + 1) % nfor;

        self.rev.process_with_scratch(&mut self.accum, &mut self.scratch);
        output.copy_from_slice(&self.accum[..size]);
        self.fftin.copy_within(size.., 0);
    }

    /// Enable or bypass filtering. Bypass copies input to output.
    pub fn set_run(&mut self, run: bool) {
        self.run = run;
    }

    /// See [`MaskUpdater::set_impulse`].
    pub fn set_impulse(&self, impulse: &[Complex<f32>], update: bool) -> Result<(), FirError> {
        self.bank.set_impulse(impulse, update)
    }

    pub fn apply_pending(&self) -> bool {
        self.bank.apply_pending()
    }

    /// Handle for updating coefficients from another thread.
    pub fn mask_updater(&self) -> MaskUpdater {
        MaskUpdater {
            bank: self.bank.clone(),
        }
    }

    /// Change the block size. Re-plans every transform and clears history.
    pub fn set_size(&mut self, size: usize) -> Result<(), FirError> {
        if size == 0 {
            return Err(FirError::ZeroSize);
        }
        self.bank.replan(size, self.nc, self.min_phase, None)?;
        self.size = size;
        self.plan();
        tracing::debug!("fir core resized to {} samples, {} partitions", size, self.nfor);
        Ok(())
    }

    /// Change the coefficient count and load `impulse` in one step.
    pub fn set_nc(&mut self, nc: usize, impulse: &[Complex<f32>]) -> Result<(), FirError> {
        if nc == 0 {
            return Err(FirError::ZeroCoefficients);
        }
        self.bank.replan(self.size, nc, self.min_phase, Some(impulse))?;
        self.nc = nc;
        self.plan();
        Ok(())
    }

    /// Toggle minimum-phase conversion of the stored impulse.
    pub fn set_min_phase(&mut self, min_phase: bool) -> Result<(), FirError> {
        if min_phase == self.min_phase {
            return Ok(());
        }
        self.bank.replan(self.size, self.nc, min_phase, None)?;
        self.min_phase = min_phase;
        self.plan();
        Ok(())
    }

    /// Clear the input history without touching coefficients.
    pub fn reset(&mut self) {
        self.fftin.fill(Complex::new(0.0, 0.0));
        for slot in &mut self.fftout {
            slot.fill(Complex::new(0.0, 0.0));
        }
        self.buffidx = 0;
    }

    pub fn run(&self) -> bool {
        self.run
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn nc(&self) -> usize {
        self.nc
    }

    pub fn partitions(&self) -> usize {
        self.nfor
    }

    pub fn min_phase(&self) -> bool {
        self.min_phase
    }

    /// Rate the loaded coefficients were designed for. Updated through
    /// [`MaskUpdater::set_sample_rate`] as well.
    pub fn sample_rate(&self) -> f64 {
        self.bank.sample_rate()
    }

    pub fn set_sample_rate(&mut self, sample_rate: f64) {
        self.bank.set_sample_rate(sample_rate);
    }

    pub fn active_set(&self) -> MaskSet {
        self.bank.active()
    }

    /// Stored time-domain impulse, zero-padded to `nc`.
    pub fn impulse(&self) -> Vec<Complex<f32>> {
        self.bank.impulse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design::{fir_bandpass, Window};

    fn c(re: f32, im: f32) -> Complex<f32> {
        Complex::new(re, im)
    }

    fn delta(len: usize, at: usize, gain: f32) -> Vec<Complex<f32>> {
        let mut v = vec![c(0.0, 0.0); len];
        v[at] = c(gain, 0.0);
        v
    }

    /// Deterministic test signal.
    fn signal(len: usize, seed: u32) -> Vec<Complex<f32>> {
        let mut state = seed.wrapping_mul(2_654_435_761).max(1);
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                let re = (state & 0xffff) as f32 / 65_535.0 - 0.5;
                let im = (state >> 16) as f32 / 65_535.0 - 0.5;
                c(re, im)
            })
            .collect()
    }

    fn direct_convolution(x: &[Complex<f32>], h: &[Complex<f32>]) -> Vec<Complex<f32>> {
        (0..x.len())
            .map(|n| {
                let mut acc = c(0.0, 0.0);
                for (j, tap) in h.iter().enumerate() {
                    if j <= n {
                        acc += tap * x[n - j];
                    }
                }
                acc
            })
            .collect()
    }

    fn run_blocks(core: &mut FirCore, x: &[Complex<f32>]) -> Vec<Complex<f32>> {
        let size = core.size();
        let mut out = vec![c(0.0, 0.0); x.len()];
        for (inp, outp) in x.chunks(size).zip(out.chunks_mut(size)) {
            core.execute(inp, outp);
        }
        out
    }

    fn assert_close(a: &[Complex<f32>], b: &[Complex<f32>], tol: f32) {
        assert_eq!(a.len(), b.len());
        for (i, (x, y)) in a.iter().zip(b).enumerate() {
            assert!((x - y).norm() < tol, "sample {i}: {x} vs {y}");
        }
    }

    #[test]
    fn delta_impulse_is_passthrough() {
        let mut core = FirCore::new(true, 16, 16, false, 48_000.0, &delta(16, 0, 1.0)).unwrap();
        let x = signal(64, 1);
        let y = run_blocks(&mut core, &x);
        assert_close(&y, &x, 1e-5);
    }

    #[test]
    fn same_input_same_output() {
        let h = fir_bandpass(64, -3_000.0, 3_000.0, 48_000.0, Window::Hann, 1.0);
        let mut a = FirCore::new(true, 32, 64, false, 48_000.0, &h).unwrap();
        let mut b = FirCore::new(true, 32, 64, false, 48_000.0, &h).unwrap();
        let x = signal(256, 7);
        assert_eq!(run_blocks(&mut a, &x), run_blocks(&mut b, &x));
    }

    #[test]
    fn partitioned_matches_direct_convolution() {
        let h = signal(32, 3);
        let mut core = FirCore::new(true, 8, 32, false, 48_000.0, &h).unwrap();
        assert_eq!(core.partitions(), 4);
        let x = signal(96, 11);
        let y = run_blocks(&mut core, &x);
        assert_close(&y, &direct_convolution(&x, &h), 1e-4);
    }

    #[test]
    fn coefficient_count_not_multiple_of_size() {
        let h = signal(20, 5);
        let mut core = FirCore::new(true, 8, 20, false, 48_000.0, &h).unwrap();
        assert_eq!(core.partitions(), 3);
        let x = signal(80, 13);
        let y = run_blocks(&mut core, &x);
        assert_close(&y, &direct_convolution(&x, &h), 1e-4);
    }

    #[test]
    fn delayed_delta_delays_by_whole_partitions() {
        let mut core = FirCore::new(true, 8, 24, false, 48_000.0, &delta(24, 19, 1.0)).unwrap();
        let x = signal(64, 21);
        let y = run_blocks(&mut core, &x);
        for n in 0..x.len() {
            let expect = if n >= 19 { x[n - 19] } else { c(0.0, 0.0) };
            assert!((y[n] - expect).norm() < 1e-5, "sample {n}");
        }
    }

    #[test]
    fn swap_takes_effect_on_next_block() {
        let size = 16;
        let mut core = FirCore::new(true, size, size, false, 48_000.0, &delta(size, 0, 1.0)).unwrap();
        let x = signal(size * 4, 9);
        let mut out = vec![c(0.0, 0.0); size];

        core.execute(&x[..size], &mut out);
        assert_close(&out, &x[..size], 1e-5);

        core.set_impulse(&delta(size, 0, 2.0), true).unwrap();
        core.execute(&x[size..2 * size], &mut out);
        let doubled: Vec<_> = x[size..2 * size].iter().map(|v| v * 2.0).collect();
        assert_close(&out, &doubled, 1e-5);
    }

    #[test]
    fn deferred_swap_keeps_old_masks() {
        let size = 8;
        let mut core = FirCore::new(true, size, size, false, 48_000.0, &delta(size, 0, 1.0)).unwrap();
        let x = signal(size * 3, 4);
        let mut out = vec![c(0.0, 0.0); size];

        core.set_impulse(&delta(size, 0, 3.0), false).unwrap();
        core.execute(&x[..size], &mut out);
        assert_close(&out, &x[..size], 1e-5);

        assert!(core.apply_pending());
        core.execute(&x[size..2 * size], &mut out);
        let tripled: Vec<_> = x[size..2 * size].iter().map(|v| v * 3.0).collect();
        assert_close(&out, &tripled, 1e-5);
    }

    #[test]
    fn updater_from_another_thread() {
        let size = 8;
        let mut core = FirCore::new(true, size, size, false, 48_000.0, &delta(size, 0, 1.0)).unwrap();
        let updater = core.mask_updater();
        std::thread::spawn(move || updater.set_impulse(&delta(size, 0, 0.5), true))
            .join()
            .unwrap()
            .unwrap();
        let x = signal(size, 2);
        let mut out = vec![c(0.0, 0.0); size];
        core.execute(&x, &mut out);
        let halved: Vec<_> = x.iter().map(|v| v * 0.5).collect();
        assert_close(&out, &halved, 1e-5);
    }

    #[test]
    fn bypass_copies_input() {
        let h = signal(16, 8);
        let mut core = FirCore::new(false, 16, 16, false, 48_000.0, &h).unwrap();
        let x = signal(16, 99);
        let mut out = vec![c(0.0, 0.0); 16];
        core.execute(&x, &mut out);
        assert_eq!(out, x);
    }

    #[test]
    fn resize_replans() {
        let h = signal(32, 6);
        let mut core = FirCore::new(true, 8, 32, false, 48_000.0, &h).unwrap();
        core.set_size(16).unwrap();
        assert_eq!(core.partitions(), 2);
        let x = signal(64, 17);
        let y = run_blocks(&mut core, &x);
        assert_close(&y, &direct_convolution(&x, &h), 1e-4);
    }

    #[test]
    fn min_phase_delta_still_passes() {
        let mut core = FirCore::new(true, 16, 16, true, 48_000.0, &delta(16, 0, 1.0)).unwrap();
        let x = signal(32, 12);
        let y = run_blocks(&mut core, &x);
        assert_close(&y, &x, 1e-3);
    }

    #[test]
    fn rejects_zero_geometry() {
        assert_eq!(
            FirCore::new(true, 0, 8, false, 1.0, &[]).err(),
            Some(FirError::ZeroSize)
        );
        assert_eq!(
            FirCore::new(true, 8, 0, false, 1.0, &[]).err(),
            Some(FirError::ZeroCoefficients)
        );
    }
}
