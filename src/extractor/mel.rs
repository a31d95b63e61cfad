use ndarray::Array2;
use rustfft::{num_complex::Complex, FftPlanner};
use std::f32::consts::PI;

/// Mel spectrogram configuration
#[derive(Debug, Clone)]
pub struct MelConfig {
    pub sample_rate: u32,
    pub n_fft: usize,
    pub hop_length: usize,
    pub n_mels: usize,
    pub fmin: f32,
    pub fmax: f32,
}

impl Default for MelConfig {
    fn default() -> Self {
        Self {
            sample_rate: 22050,
            n_fft: 2048,
            hop_length: 512,
            n_mels: 128,
            fmin: 0.0,
            fmax: 11025.0,
        }
    }
}

/// Periodic Hann window
pub fn hann_window(n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / n as f32).cos()))
        .collect()
}

/// Centred power spectrogram, shape `(n_fft / 2 + 1, 1 + len / hop_length)`
pub fn power_spectrogram(samples: &[f32], n_fft: usize, hop_length: usize) -> Array2<f32> {
    let window = hann_window(n_fft);

    // Zero-pad half a frame on both sides so frame t is centred on sample t * hop
    let pad_length = n_fft / 2;
    let mut padded = vec![0.0f32; pad_length];
    padded.extend_from_slice(samples);
    padded.extend(vec![0.0f32; pad_length]);

    let num_frames = if padded.len() >= n_fft {
        (padded.len() - n_fft) / hop_length + 1
    } else {
        0
    };
    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(n_fft);

    let mut spectrogram = Array2::<f32>::zeros((n_fft / 2 + 1, num_frames));
    let mut buffer = vec![Complex::new(0.0f32, 0.0); n_fft];

    for frame_idx in 0..num_frames {
        let start = frame_idx * hop_length;
        for ((b, &s), &w) in buffer
            .iter_mut()
            .zip(&padded[start..start + n_fft])
            .zip(window.iter())
        {
            *b = Complex::new(s * w, 0.0);
        }

        fft.process(&mut buffer);

        for (i, c) in buffer.iter().take(n_fft / 2 + 1).enumerate() {
            spectrogram[[i, frame_idx]] = c.norm_sqr();
        }
    }

    spectrogram
}

/// Compute a (linear power) mel spectrogram from audio samples
pub fn compute_mel_spectrogram(samples: &[f32], config: &MelConfig) -> Array2<f32> {
    let spectrogram = power_spectrogram(samples, config.n_fft, config.hop_length);
    let mel_filterbank = create_mel_filterbank(
        config.sample_rate,
        config.n_fft,
        config.n_mels,
        config.fmin,
        config.fmax,
    );
    mel_filterbank.dot(&spectrogram)
}

/// Convert power to decibels (ref 1.0, amin 1e-10), clipped `top_db` below the peak
pub fn power_to_db(power: &Array2<f32>, top_db: f32) -> Array2<f32> {
    const AMIN: f32 = 1e-10;
    let log_spec = power.mapv(|x| 10.0 * x.max(AMIN).log10());
    let peak = log_spec.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    if peak.is_finite() {
        let floor = peak - top_db;
        log_spec.mapv(|x| x.max(floor))
    } else {
        log_spec
    }
}

// Slaney-style mel scale: linear below 1 kHz, logarithmic above
const F_SP: f32 = 200.0 / 3.0;
const MIN_LOG_HZ: f32 = 1000.0;
const MIN_LOG_MEL: f32 = MIN_LOG_HZ / F_SP;

fn log_step() -> f32 {
    6.4f32.ln() / 27.0
}

/// Convert frequency to mel scale
fn hz_to_mel(hz: f32) -> f32 {
    if hz >= MIN_LOG_HZ {
        MIN_LOG_MEL + (hz / MIN_LOG_HZ).ln() / log_step()
    } else {
        hz / F_SP
    }
}

/// Convert mel to frequency
fn mel_to_hz(mel: f32) -> f32 {
    if mel >= MIN_LOG_MEL {
        MIN_LOG_HZ * (log_step() * (mel - MIN_LOG_MEL)).exp()
    } else {
        F_SP * mel
    }
}

/// Create an area-normalized mel filterbank matrix `(n_mels, n_fft / 2 + 1)`
pub fn create_mel_filterbank(
    sample_rate: u32,
    n_fft: usize,
    n_mels: usize,
    fmin: f32,
    fmax: f32,
) -> Array2<f32> {
    let n_freqs = n_fft / 2 + 1;

    let fft_freqs: Vec<f32> = (0..n_freqs)
        .map(|k| k as f32 * sample_rate as f32 / n_fft as f32)
        .collect();

    let mel_min = hz_to_mel(fmin);
    let mel_max = hz_to_mel(fmax);
    let hz_points: Vec<f32> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_min + (mel_max - mel_min) * i as f32 / (n_mels + 1) as f32))
        .collect();

    let mut filterbank = Array2::<f32>::zeros((n_mels, n_freqs));

    for m in 0..n_mels {
        let lower_edge = hz_points[m];
        let centre = hz_points[m + 1];
        let upper_edge = hz_points[m + 2];
        let enorm = 2.0 / (upper_edge - lower_edge);

        for (k, &freq) in fft_freqs.iter().enumerate() {
            let rising = (freq - lower_edge) / (centre - lower_edge);
            let falling = (upper_edge - freq) / (upper_edge - centre);
            let weight = rising.min(falling).max(0.0);
            filterbank[[m, k]] = weight * enorm;
        }
    }

    filterbank
}
