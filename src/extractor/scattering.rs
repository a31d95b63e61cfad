//! Joint time-frequency scattering
//!
//! First order: analytic Gabor wavelets in time, modulus.
//! Second order: temporal wavelets on each first-order envelope, then
//! frequential wavelets (both spins) or a frequential low-pass along the
//! log-frequency axis, modulus. Every path is averaged over `T` samples in
//! time and `F` channels in frequency and subsampled accordingly, giving a
//! `(n_paths, n_freq, n_time)` array.

use super::config::JtfsConfig;
use super::FeatureExtractor;
use crate::error::Result;
use ndarray::{s, Array2, Array3, ArrayD, ArrayView1, ArrayView2, ArrayViewMut1};
use parking_lot::Mutex;
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;
use tracing::debug;

/// Centre frequency of the highest wavelet, in cycles per sample
const XI_MAX: f32 = 0.35;

/// Low-pass bandwidth times its averaging scale
const SIGMA0: f32 = 0.1;

/// Second-order outputs keep this many samples per averaging window
const TIME_OVERSAMPLING: usize = 2;

/// Centre frequency and bandwidth of a Gabor filter
#[derive(Debug, Clone, Copy)]
struct Gabor {
    xi: f32,
    sigma: f32,
}

/// `n_filters` wavelets spaced `q` per octave below `XI_MAX`;
/// neighbours cross at half maximum
fn filterbank(n_filters: usize, q: usize) -> Vec<Gabor> {
    let half_max_width = 2.0 * (2.0f32 * 2f32.ln()).sqrt();
    (0..n_filters)
        .map(|k| {
            let xi = XI_MAX * 2f32.powf(-(k as f32) / q as f32);
            let sigma = xi * (1.0 - 2f32.powf(-1.0 / q as f32)) / half_max_width;
            Gabor { xi, sigma }
        })
        .collect()
}

/// Frequency response on an FFT grid of length `n`; `negative` mirrors the
/// filter onto negative frequencies (spin -1)
fn gabor_response(n: usize, filter: Gabor, negative: bool) -> Vec<f32> {
    (0..n)
        .map(|k| {
            let bin = if negative { (n - k) % n } else { k };
            if bin > n / 2 || (negative && k == 0) {
                return 0.0;
            }
            let omega = bin as f32 / n as f32;
            (-(omega - filter.xi).powi(2) / (2.0 * filter.sigma.powi(2))).exp()
        })
        .collect()
}

/// Gaussian low-pass averaging over roughly `scale` samples
fn lowpass_response(n: usize, scale: f32) -> Vec<f32> {
    let sigma = SIGMA0 / scale;
    (0..n)
        .map(|k| {
            let omega = k.min(n - k) as f32 / n as f32;
            (-omega * omega / (2.0 * sigma * sigma)).exp()
        })
        .collect()
}

/// Sum `spectrum` into `folded.len()` bins. The inverse transform of the
/// folded spectrum is the full inverse transform subsampled by
/// `spectrum.len() / folded.len()`, up to the `1 / len` scaling.
fn fold_spectrum(spectrum: &[Complex<f32>], folded: &mut [Complex<f32>]) {
    let m = folded.len();
    folded.iter_mut().for_each(|c| *c = Complex::new(0.0, 0.0));
    for (k, &v) in spectrum.iter().enumerate() {
        folded[k % m] += v;
    }
}

/// Gaussian low-pass of single rows followed by subsampling
struct Averager {
    fft: Arc<dyn Fft<f32>>,
    ifft: Arc<dyn Fft<f32>>,
    phi: Vec<f32>,
    step: usize,
    buffer: Vec<Complex<f32>>,
}

impl Averager {
    fn apply(&mut self, row: ArrayView1<'_, f32>, mut out: ArrayViewMut1<'_, f32>) {
        let n_cols = row.len();
        if n_cols == 0 {
            return;
        }
        let m = self.buffer.len();
        self.buffer.iter_mut().for_each(|b| *b = Complex::new(0.0, 0.0));
        for (b, &v) in self.buffer.iter_mut().zip(row.iter()) {
            *b = Complex::new(v, 0.0);
        }
        self.fft.process(&mut self.buffer);
        for (b, &p) in self.buffer.iter_mut().zip(&self.phi) {
            *b *= p;
        }
        self.ifft.process(&mut self.buffer);
        for (i, o) in out.iter_mut().enumerate() {
            let idx = (i * self.step).min(n_cols - 1);
            *o = self.buffer[idx].re / m as f32;
        }
    }
}

/// Joint time-frequency scattering extractor
pub struct JtfsExtractor {
    config: JtfsConfig,
    psi1: Vec<Gabor>,
    psi2: Vec<Gabor>,
    psi_fr: Vec<Gabor>,
    /// Caches FFT plans across calls and input lengths
    planner: Mutex<FftPlanner<f32>>,
}

impl JtfsExtractor {
    pub fn new(config: JtfsConfig) -> Result<Self> {
        config.validate()?;
        let psi1 = filterbank(config.n_first_order(), config.q.0);
        let psi2 = filterbank(config.n_second_order(), config.q.1);
        let psi_fr = filterbank(config.n_frequential(), config.q_fr);
        Ok(Self {
            config,
            psi1,
            psi2,
            psi_fr,
            planner: Mutex::new(FftPlanner::new()),
        })
    }

    pub fn config(&self) -> &JtfsConfig {
        &self.config
    }

    /// Output shape `(n_paths, n_freq, n_time)` for `len` input samples
    pub fn output_shape(&self, len: usize) -> (usize, usize, usize) {
        let c = &self.config;
        let n_freq = (c.n_first_order() + c.f - 1) / c.f;
        let n_time = (len + c.t - 1) / c.t;
        (c.n_paths(), n_freq, n_time)
    }

    fn plan(&self, len: usize) -> (Arc<dyn Fft<f32>>, Arc<dyn Fft<f32>>) {
        let mut planner = self.planner.lock();
        (planner.plan_fft_forward(len), planner.plan_fft_inverse(len))
    }

    /// Averager for rows of `n_cols` samples
    fn averager(&self, n_cols: usize, scale: usize, step: usize) -> Averager {
        let m = (n_cols + 2 * scale).next_power_of_two();
        let (fft, ifft) = self.plan(m);
        Averager {
            fft,
            ifft,
            phi: lowpass_response(m, scale as f32),
            step,
            buffer: vec![Complex::new(0.0, 0.0); m],
        }
    }

    /// Low-pass every row of `rows` and keep every `step`-th sample, `n_out` per row
    fn lowpass_rows(&self, rows: ArrayView2<'_, f32>, scale: usize, step: usize, n_out: usize) -> Array2<f32> {
        let (n_rows, n_cols) = rows.dim();
        let mut out = Array2::<f32>::zeros((n_rows, n_out));
        if n_cols == 0 || n_out == 0 {
            return out;
        }
        let mut averager = self.averager(n_cols, scale, step);
        for (row, out_row) in rows.outer_iter().zip(out.outer_iter_mut()) {
            averager.apply(row, out_row);
        }
        out
    }

    /// Average over log-frequency (scale `F`) rows already averaged in time
    fn average_frequency(&self, time_avg: ArrayView2<'_, f32>, n_freq: usize) -> Array2<f32> {
        self.lowpass_rows(time_avg.t(), self.config.f, self.config.f, n_freq)
            .reversed_axes()
    }

    /// Average over time (scale `T`) and then over log-frequency (scale `F`)
    fn average(&self, u: ArrayView2<'_, f32>, decimation: usize, n_freq: usize, n_time: usize) -> Array2<f32> {
        let step = self.config.t / decimation;
        let time_avg = self.lowpass_rows(u, step, step, n_time);
        self.average_frequency(time_avg.view(), n_freq)
    }

    fn scatter(&self, x: &[f32]) -> Array3<f32> {
        let (n_paths, n_freq, n_time) = self.output_shape(x.len());
        let mut out = Array3::<f32>::zeros((n_paths, n_freq, n_time));
        let n = x.len();
        if n == 0 {
            return out;
        }

        let t = self.config.t;
        let n_l1 = self.psi1.len();
        let pad = (n + 2 * t).next_power_of_two();
        let (fft, ifft) = self.plan(pad);
        let zero = Complex::new(0.0f32, 0.0);

        let mut x_hat: Vec<Complex<f32>> = x.iter().map(|&v| Complex::new(v, 0.0)).collect();
        x_hat.resize(pad, zero);
        fft.process(&mut x_hat);

        let decimation = if t % TIME_OVERSAMPLING == 0 {
            t / TIME_OVERSAMPLING
        } else {
            1
        };
        let n_dec = (n + decimation - 1) / decimation;
        // Second-order inverse transforms run at the decimated rate when possible
        let fold = if pad % decimation == 0 { pad / decimation } else { pad };
        let (_, ifft_fold) = self.plan(fold);
        let psi2_responses: Vec<Vec<f32>> = self
            .psi2
            .iter()
            .map(|&g| gabor_response(pad, g, false))
            .collect();

        // One channel at a time: U1 row, its time average, and
        // Y2[l2][l1, t'] = (U1[l1] * psi2[l2])(t' * decimation)
        let mut s1_time = Array2::<f32>::zeros((n_l1, n_time));
        let mut y2: Vec<Array2<Complex<f32>>> = (0..self.psi2.len())
            .map(|_| Array2::<Complex<f32>>::zeros((n_l1, n_dec)))
            .collect();
        let mut time_averager = self.averager(n, t, t);
        let mut buffer = vec![zero; pad];
        let mut u1_hat = vec![zero; pad];
        let mut folded = vec![zero; fold];
        let mut u1 = vec![0.0f32; n];

        for (l1, &psi) in self.psi1.iter().enumerate() {
            let response = gabor_response(pad, psi, false);
            for ((b, &xh), &h) in buffer.iter_mut().zip(&x_hat).zip(&response) {
                *b = xh * h;
            }
            ifft.process(&mut buffer);
            for (u, b) in u1.iter_mut().zip(&buffer) {
                *u = b.norm() / pad as f32;
            }
            time_averager.apply(ArrayView1::from(&u1[..]), s1_time.row_mut(l1));

            u1_hat.iter_mut().for_each(|c| *c = zero);
            for (c, &u) in u1_hat.iter_mut().zip(&u1) {
                *c = Complex::new(u, 0.0);
            }
            fft.process(&mut u1_hat);

            for (plane, response) in y2.iter_mut().zip(&psi2_responses) {
                for ((b, &uh), &h) in buffer.iter_mut().zip(&u1_hat).zip(response) {
                    *b = uh * h;
                }
                if fold < pad {
                    fold_spectrum(&buffer, &mut folded);
                    ifft_fold.process(&mut folded);
                    for j in 0..n_dec {
                        plane[[l1, j]] = folded[j] / pad as f32;
                    }
                } else {
                    ifft.process(&mut buffer);
                    for j in 0..n_dec {
                        plane[[l1, j]] = buffer[j * decimation] / pad as f32;
                    }
                }
            }
        }

        out.slice_mut(s![0, .., ..])
            .assign(&self.average_frequency(s1_time.view(), n_freq));

        // Frequential filters along the log-frequency axis: phi_f, spin +1, spin -1
        let m_fr = (2 * n_l1).next_power_of_two();
        let mut fr_bank = vec![lowpass_response(m_fr, self.config.f as f32)];
        fr_bank.extend(self.psi_fr.iter().map(|&g| gabor_response(m_fr, g, false)));
        fr_bank.extend(self.psi_fr.iter().map(|&g| gabor_response(m_fr, g, true)));
        let (fft_fr, ifft_fr) = self.plan(m_fr);

        for (l2, plane) in y2.into_iter().enumerate() {
            let mut u2: Vec<Array2<f32>> = (0..fr_bank.len())
                .map(|_| Array2::<f32>::zeros((n_l1, n_dec)))
                .collect();
            let mut column = vec![zero; m_fr];
            let mut filtered = vec![zero; m_fr];
            for j in 0..n_dec {
                column.iter_mut().for_each(|c| *c = zero);
                for (c, &y) in column.iter_mut().zip(plane.column(j).iter()) {
                    *c = y;
                }
                fft_fr.process(&mut column);

                for (idx, filter) in fr_bank.iter().enumerate() {
                    for ((o, &c), &h) in filtered.iter_mut().zip(&column).zip(filter) {
                        *o = c * h;
                    }
                    ifft_fr.process(&mut filtered);
                    for l1 in 0..n_l1 {
                        u2[idx][[l1, j]] = filtered[l1].norm() / m_fr as f32;
                    }
                }
            }
            drop(plane);

            let base = 1 + l2 * fr_bank.len();
            for (idx, u) in u2.iter().enumerate() {
                out.slice_mut(s![base + idx, .., ..])
                    .assign(&self.average(u.view(), decimation, n_freq, n_time));
            }
        }

        out
    }
}

impl FeatureExtractor for JtfsExtractor {
    fn name(&self) -> &str {
        "JTFS"
    }

    fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    fn compute_features(&self, audio: ArrayView1<'_, f32>) -> Result<ArrayD<f32>> {
        let samples = audio.to_vec();
        let coefficients = self.scatter(&samples);
        debug!("JTFS: {} samples -> {:?}", samples.len(), coefficients.dim());
        Ok(coefficients.into_dyn())
    }
}
