// SPDX-FileCopyrightText: 2026 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Double-buffered frequency-domain coefficient masks.
//!
//! Two mask sets live side by side. The convolution pass locks the active
//! set for one whole block; a coefficient update locks only the inactive set
//! while it regenerates every partition, then publishes it by storing the
//! selector. A pass therefore sees either the complete old set or the
//! complete new one.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use crate::minphase::{minimum_phase, MIN_PHASE_OVERSAMPLE};
use crate::FirError;

/// One of the two mask buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MaskSet {
    A = 0,
    B = 1,
}

impl MaskSet {
    pub fn other(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }

    fn index(self) -> usize {
        self as usize
    }

    fn from_raw(raw: u8) -> Self {
        if raw == 0 {
            Self::A
        } else {
            Self::B
        }
    }
}

/// Partition spectra: `partitions[p]` holds `2 * size` bins.
pub(crate) type Masks = Vec<Vec<Complex<f32>>>;

struct MaskGenerator {
    size: usize,
    nc: usize,
    min_phase: bool,
    /// Time-domain impulse, zero-padded to `nc`.
    impulse: Vec<Complex<f32>>,
    fft: Arc<dyn Fft<f32>>,
    scratch: Vec<Complex<f32>>,
    work: Vec<Complex<f32>>,
}

impl MaskGenerator {
    fn new(size: usize, nc: usize, min_phase: bool) -> Self {
        let fft = FftPlanner::<f32>::new().plan_fft_forward(2 * size);
        let scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];
        Self {
            size,
            nc,
            min_phase,
            impulse: vec![Complex::new(0.0, 0.0); nc],
            fft,
            scratch,
            work: vec![Complex::new(0.0, 0.0); 2 * size],
        }
    }

    fn partitions(&self) -> usize {
        partition_count(self.nc, self.size)
    }

    fn store_impulse(&mut self, impulse: &[Complex<f32>]) -> Result<(), FirError> {
        if impulse.len() > self.nc {
            return Err(FirError::ImpulseTooLong {
                got: impulse.len(),
                max: self.nc,
            });
        }
        self.impulse.clear();
        self.impulse.extend_from_slice(impulse);
        self.impulse.resize(self.nc, Complex::new(0.0, 0.0));
        Ok(())
    }

    /// Regenerate every partition mask into `masks`.
    ///
    /// The impulse segment sits in the upper half of the transform input so
    /// the valid output of each pass lands in the lower half.
    fn fill(&mut self, masks: &mut Masks) {
        let size = self.size;
        let parts = self.partitions();
        let imp = if self.min_phase {
            minimum_phase(&self.impulse, MIN_PHASE_OVERSAMPLE)
        } else {
            self.impulse.clone()
        };
        let scale = 1.0 / (2 * size) as f32;

        masks.resize_with(parts, Vec::new);
        for (p, mask) in masks.iter_mut().enumerate() {
            self.work.fill(Complex::new(0.0, 0.0));
            let start = p * size;
            let end = (start + size).min(imp.len());
            if start < end {
                self.work[size..size + (end - start)].copy_from_slice(&imp[start..end]);
            }
            self.fft.process_with_scratch(&mut self.work, &mut self.scratch);
            mask.clear();
            mask.extend(self.work.iter().map(|c| c * scale));
        }
    }
}

pub(crate) fn partition_count(nc: usize, size: usize) -> usize {
    nc.div_ceil(size).max(1)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) struct MaskBank {
    generator: Mutex<MaskGenerator>,
    sets: [Mutex<Masks>; 2],
    active: AtomicU8,
    pending: AtomicBool,
    /// `f64` bits of the rate the current masks were designed for.
    sample_rate: AtomicU64,
}

impl MaskBank {
    pub(crate) fn new(
        size: usize,
        nc: usize,
        min_phase: bool,
        sample_rate: f64,
        impulse: &[Complex<f32>],
    ) -> Result<Self, FirError> {
        let mut generator = MaskGenerator::new(size, nc, min_phase);
        generator.store_impulse(impulse)?;
        let mut a = Masks::new();
        generator.fill(&mut a);
        let b = a.clone();
        Ok(Self {
            generator: Mutex::new(generator),
            sets: [Mutex::new(a), Mutex::new(b)],
            active: AtomicU8::new(MaskSet::A as u8),
            pending: AtomicBool::new(false),
            sample_rate: AtomicU64::new(sample_rate.to_bits()),
        })
    }

    pub(crate) fn active(&self) -> MaskSet {
        MaskSet::from_raw(self.active.load(Ordering::Acquire))
    }

    /// Run `f` against the active set, holding it for the whole call.
    pub(crate) fn with_active<R>(&self, f: impl FnOnce(&Masks) -> R) -> R {
        let set = lock(&self.sets[self.active().index()]);
        f(&set)
    }

    /// Precompute `impulse` into the shadow set; flip when `update` is set,
    /// otherwise leave it pending for [`MaskBank::apply_pending`].
    pub(crate) fn set_impulse(&self, impulse: &[Complex<f32>], update: bool) -> Result<(), FirError> {
        let mut generator = lock(&self.generator);
        generator.store_impulse(impulse)?;
        self.regenerate_shadow(&mut generator, update);
        Ok(())
    }

    fn regenerate_shadow(&self, generator: &mut MaskGenerator, update: bool) {
        let shadow = self.active().other();
        {
            let mut set = lock(&self.sets[shadow.index()]);
            generator.fill(&mut set);
        }
        if update {
            self.active.store(shadow as u8, Ordering::Release);
            self.pending.store(false, Ordering::Release);
            tracing::trace!("fir masks flipped to {:?}", shadow);
        } else {
            self.pending.store(true, Ordering::Release);
        }
    }

    pub(crate) fn apply_pending(&self) -> bool {
        let _generator = lock(&self.generator);
        if !self.pending.swap(false, Ordering::AcqRel) {
            return false;
        }
        let next = self.active().other();
        self.active.store(next as u8, Ordering::Release);
        true
    }

    pub(crate) fn has_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Re-plan for a new geometry. Both sets end up identical and nothing is
    /// left pending. `impulse` replaces the stored one when given; otherwise
    /// the stored impulse is truncated or zero-padded to `nc`.
    pub(crate) fn replan(
        &self,
        size: usize,
        nc: usize,
        min_phase: bool,
        impulse: Option<&[Complex<f32>]>,
    ) -> Result<(), FirError> {
        let mut generator = lock(&self.generator);
        let mut next = MaskGenerator::new(size, nc, min_phase);
        match impulse {
            Some(imp) => next.store_impulse(imp)?,
            None => {
                let keep = generator.impulse.len().min(nc);
                next.store_impulse(&generator.impulse[..keep])?;
            }
        }
        *generator = next;

        let mut a = lock(&self.sets[0]);
        let mut b = lock(&self.sets[1]);
        generator.fill(&mut a);
        (*b).clone_from(&*a);
        self.pending.store(false, Ordering::Release);
        Ok(())
    }

    pub(crate) fn impulse(&self) -> Vec<Complex<f32>> {
        lock(&self.generator).impulse.clone()
    }

    pub(crate) fn sample_rate(&self) -> f64 {
        f64::from_bits(self.sample_rate.load(Ordering::Acquire))
    }

    pub(crate) fn set_sample_rate(&self, sample_rate: f64) {
        self.sample_rate
            .store(sample_rate.to_bits(), Ordering::Release);
    }
}

/// Control-side handle to a filter's masks.
///
/// Cloneable and `Send`, so a control thread can swap coefficients while the
/// DSP thread owns the [`crate::FirCore`] and keeps calling `execute`.
#[derive(Clone)]
pub struct MaskUpdater {
    pub(crate) bank: Arc<MaskBank>,
}

impl MaskUpdater {
    /// Load a new impulse response. With `update` the new masks are used from
    /// the next block on; without it they wait for [`MaskUpdater::apply_pending`].
    pub fn set_impulse(&self, impulse: &[Complex<f32>], update: bool) -> Result<(), FirError> {
        self.bank.set_impulse(impulse, update)
    }

    /// Activate masks prepared by a deferred `set_impulse`. Returns whether a
    /// flip happened.
    pub fn apply_pending(&self) -> bool {
        self.bank.apply_pending()
    }

    pub fn has_pending(&self) -> bool {
        self.bank.has_pending()
    }

    pub fn active_set(&self) -> MaskSet {
        self.bank.active()
    }

    /// Record the input rate the loaded coefficients were designed for.
    pub fn set_sample_rate(&self, sample_rate: f64) {
        self.bank.set_sample_rate(sample_rate);
    }

    pub fn sample_rate(&self) -> f64 {
        self.bank.sample_rate()
    }
}

/// `acc += x * h`, element-wise over complex bins.
pub(crate) fn mac_freq_domain(
    acc: &mut [Complex<f32>],
    x: &[Complex<f32>],
    h: &[Complex<f32>],
) {
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    {
        if std::arch::is_x86_feature_detected!("avx2") {
            unsafe {
                mac_freq_domain_avx2(acc, x, h);
            }
            return;
        }
    }

    mac_freq_domain_scalar(acc, x, h);
}

fn mac_freq_domain_scalar(acc: &mut [Complex<f32>], x: &[Complex<f32>], h: &[Complex<f32>]) {
    for ((a, &x), &h) in acc.iter_mut().zip(x.iter()).zip(h.iter()) {
        a.re += x.re * h.re - x.im * h.im;
        a.im += x.re * h.im + x.im * h.re;
    }
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
#[target_feature(enable = "avx2")]
unsafe fn mac_freq_domain_avx2(acc: &mut [Complex<f32>], x: &[Complex<f32>], h: &[Complex<f32>]) {
    #[cfg(target_arch = "x86")]
    use std::arch::x86::*;
    #[cfg(target_arch = "x86_64")]
    use std::arch::x86_64::*;

    let len = acc.len().min(x.len()).min(h.len());
    let mut i = 0usize;
    while i + 4 <= len {
        let a_ptr = acc.as_mut_ptr().add(i) as *mut f32;
        let x_ptr = x.as_ptr().add(i) as *const f32;
        let h_ptr = h.as_ptr().add(i) as *const f32;
        let a_v = _mm256_loadu_ps(a_ptr);
        let x_v = _mm256_loadu_ps(x_ptr);
        let h_v = _mm256_loadu_ps(h_ptr);
        let h_re = _mm256_moveldup_ps(h_v);
        let h_im = _mm256_movehdup_ps(h_v);
        let x_swapped = _mm256_permute_ps(x_v, 0xB1);
        let prod = _mm256_addsub_ps(_mm256_mul_ps(x_v, h_re), _mm256_mul_ps(x_swapped, h_im));
        _mm256_storeu_ps(a_ptr, _mm256_add_ps(a_v, prod));
        i += 4;
    }

    mac_freq_domain_scalar(&mut acc[i..len], &x[i..len], &h[i..len]);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(len: usize, at: usize, gain: f32) -> Vec<Complex<f32>> {
        let mut v = vec![Complex::new(0.0, 0.0); len];
        v[at] = Complex::new(gain, 0.0);
        v
    }

    #[test]
    fn mac_matches_scalar() {
        let x: Vec<Complex<f32>> = (0..19)
            .map(|i| Complex::new(i as f32 * 0.5, -(i as f32)))
            .collect();
        let h: Vec<Complex<f32>> = (0..19)
            .map(|i| Complex::new(1.0 - i as f32 * 0.1, i as f32 * 0.25))
            .collect();
        let mut fast = vec![Complex::new(1.0, 1.0); 19];
        let mut slow = fast.clone();
        mac_freq_domain(&mut fast, &x, &h);
        mac_freq_domain_scalar(&mut slow, &x, &h);
        for (a, b) in fast.iter().zip(&slow) {
            assert!((a - b).norm() < 1e-4);
        }
    }

    #[test]
    fn partitions_round_up() {
        assert_eq!(partition_count(1024, 256), 4);
        assert_eq!(partition_count(1000, 256), 4);
        assert_eq!(partition_count(10, 256), 1);
    }

    #[test]
    fn deferred_update_waits_for_apply() {
        let bank = Arc::new(MaskBank::new(8, 8, false, 48_000.0, &delta(8, 0, 1.0)).unwrap());
        let updater = MaskUpdater { bank };
        assert_eq!(updater.active_set(), MaskSet::A);

        updater.set_impulse(&delta(8, 0, 2.0), false).unwrap();
        assert!(updater.has_pending());
        assert_eq!(updater.active_set(), MaskSet::A);

        assert!(updater.apply_pending());
        assert_eq!(updater.active_set(), MaskSet::B);
        assert!(!updater.apply_pending());
    }

    #[test]
    fn sample_rate_is_shared_with_updaters() {
        let bank = Arc::new(MaskBank::new(8, 8, false, 48_000.0, &delta(8, 0, 1.0)).unwrap());
        let updater = MaskUpdater { bank: bank.clone() };
        updater.clone().set_sample_rate(96_000.0);
        assert_eq!(bank.sample_rate(), 96_000.0);
        assert_eq!(updater.sample_rate(), 96_000.0);
    }

    #[test]
    fn immediate_update_flips() {
        let bank = Arc::new(MaskBank::new(8, 16, false, 48_000.0, &delta(16, 0, 1.0)).unwrap());
        let updater = MaskUpdater { bank: bank.clone() };
        updater.set_impulse(&delta(16, 3, 1.0), true).unwrap();
        assert_eq!(updater.active_set(), MaskSet::B);
        assert!(!updater.has_pending());
        bank.with_active(|masks| assert_eq!(masks.len(), 2));
    }

    #[test]
    fn rejects_oversized_impulse() {
        let bank = MaskBank::new(8, 8, false, 48_000.0, &delta(8, 0, 1.0)).unwrap();
        let err = bank.set_impulse(&delta(9, 0, 1.0), true).unwrap_err();
        assert_eq!(err, FirError::ImpulseTooLong { got: 9, max: 8 });
    }
}
