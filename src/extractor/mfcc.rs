//! Mel-frequency cepstral coefficients
//!
//! Centred STFT → Slaney mel filterbank → dB → orthonormal DCT-II.

use super::config::MfccConfig;
use super::mel::{compute_mel_spectrogram, power_to_db, MelConfig};
use super::FeatureExtractor;
use crate::error::Result;
use ndarray::{Array2, ArrayD, ArrayView1};
use std::f32::consts::PI;
use tracing::debug;

const TOP_DB: f32 = 80.0;

/// Orthonormal DCT-II basis truncated to the first `n_out` coefficients
pub fn dct_basis(n_out: usize, n_in: usize) -> Array2<f32> {
    let scale_first = (1.0 / n_in as f32).sqrt();
    let scale_rest = (2.0 / n_in as f32).sqrt();
    Array2::from_shape_fn((n_out, n_in), |(k, n)| {
        let scale = if k == 0 { scale_first } else { scale_rest };
        scale * (PI * k as f32 * (2 * n + 1) as f32 / (2 * n_in) as f32).cos()
    })
}

/// Cepstral-coefficient extractor, output `(n_mfcc, n_frames)`
pub struct MfccExtractor {
    config: MfccConfig,
    mel: MelConfig,
    dct: Array2<f32>,
}

impl MfccExtractor {
    pub fn new(config: MfccConfig) -> Result<Self> {
        config.validate()?;
        let mel = MelConfig {
            sample_rate: config.sample_rate,
            n_fft: config.n_fft,
            hop_length: config.hop_length,
            n_mels: config.n_mels,
            fmin: 0.0,
            fmax: config.sample_rate as f32 / 2.0,
        };
        let dct = dct_basis(config.n_mfcc, config.n_mels);
        Ok(Self { config, mel, dct })
    }

    pub fn config(&self) -> &MfccConfig {
        &self.config
    }
}

impl FeatureExtractor for MfccExtractor {
    fn name(&self) -> &str {
        "MFCC"
    }

    fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    fn compute_features(&self, audio: ArrayView1<'_, f32>) -> Result<ArrayD<f32>> {
        let samples = audio.to_vec();
        let mel_db = power_to_db(&compute_mel_spectrogram(&samples, &self.mel), TOP_DB);
        let mfcc = self.dct.dot(&mel_db);
        debug!("MFCC: {} samples -> {:?}", samples.len(), mfcc.dim());
        Ok(mfcc.into_dyn())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array1;

    fn tone(freq: f32, sample_rate: u32, len: usize) -> Array1<f32> {
        Array1::from_shape_fn(len, |i| (2.0 * PI * freq * i as f32 / sample_rate as f32).sin())
    }

    #[test]
    fn test_dct_basis_is_orthonormal() {
        let basis = dct_basis(16, 16);
        let gram = basis.dot(&basis.t());
        for i in 0..16 {
            for j in 0..16 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((gram[[i, j]] - expected).abs() < 1e-4);
            }
        }
    }

    #[test]
    fn test_mfcc_shape() {
        let extractor = MfccExtractor::new(MfccConfig::new(44100, 2048, 2048)).unwrap();
        let audio = tone(440.0, 44100, 44100 * 2);
        let features = extractor.extract(audio.view().into_dyn()).unwrap();
        assert_eq!(features.shape(), &[20, 1 + 88200 / 2048]);
    }

    #[test]
    fn test_mfcc_custom_coefficients() {
        let config = MfccConfig::new(22050, 512, 2048).with_n_mfcc(13);
        let extractor = MfccExtractor::new(config).unwrap();
        let audio = tone(220.0, 22050, 10_000);
        let features = extractor.extract_samples(audio.as_slice().unwrap()).unwrap();
        assert_eq!(features.shape(), &[13, 1 + 10_000 / 512]);
    }

    #[test]
    fn test_mfcc_is_deterministic() {
        let extractor = MfccExtractor::new(MfccConfig::new(22050, 512, 1024)).unwrap();
        let audio = tone(330.0, 22050, 8000);
        let a = extractor.extract(audio.view().into_dyn()).unwrap();
        let b = extractor.extract(audio.view().into_dyn()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(MfccExtractor::new(MfccConfig::new(22050, 0, 1024)).is_err());
    }
}
